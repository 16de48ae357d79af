//! Core types for weave.
//!
//! This crate provides foundational types used throughout the workspace:
//! - `span`: Source offsets and line/column locations
//! - `path`: Response paths
//! - `error`: The located, serializable `GraphQLError`
//! - `diagnostics`: Parser diagnostics

pub mod diagnostics;
pub mod error;
pub mod path;
pub mod span;

pub use diagnostics::{Diagnostic, DiagnosticBag, Label};
pub use error::GraphQLError;
pub use path::{Path, PathSegment};
pub use span::{LineIndex, Location, Span};
