//! Token kinds and structures for executable documents.

use weave_core::Span;

/// The kind of a token.
///
/// Keywords (`query`, `fragment`, `on`, `true`, ...) are lexed as names and
/// recognized by the parser in context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TokenKind {
    // Special tokens
    Eof,
    Error,

    // Literals
    Name,
    IntLiteral,
    FloatLiteral,
    StringLiteral,
    BlockStringLiteral,

    // Punctuation
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Colon,
    Spread,
    Eq,
    Pipe,
    Amp,
    At,
    Bang,
    Dollar,
}

impl TokenKind {
    #[must_use]
    pub const fn is_punctuator(self) -> bool {
        matches!(
            self,
            Self::LBrace
                | Self::RBrace
                | Self::LParen
                | Self::RParen
                | Self::LBracket
                | Self::RBracket
                | Self::Colon
                | Self::Spread
                | Self::Eq
                | Self::Pipe
                | Self::Amp
                | Self::At
                | Self::Bang
                | Self::Dollar
        )
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eof => "<EOF>",
            Self::Error => "<error>",
            Self::Name => "Name",
            Self::IntLiteral => "Int",
            Self::FloatLiteral => "Float",
            Self::StringLiteral => "String",
            Self::BlockStringLiteral => "BlockString",
            Self::LBrace => "{",
            Self::RBrace => "}",
            Self::LParen => "(",
            Self::RParen => ")",
            Self::LBracket => "[",
            Self::RBracket => "]",
            Self::Colon => ":",
            Self::Spread => "...",
            Self::Eq => "=",
            Self::Pipe => "|",
            Self::Amp => "&",
            Self::At => "@",
            Self::Bang => "!",
            Self::Dollar => "$",
        }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_punctuator() {
            write!(f, "\"{}\"", self.as_str())
        } else {
            f.write_str(self.as_str())
        }
    }
}

/// A token with its kind and source span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    #[must_use]
    #[inline]
    pub const fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }

    #[must_use]
    #[inline]
    pub const fn is_eof(&self) -> bool {
        matches!(self.kind, TokenKind::Eof)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_quotes_punctuators() {
        assert_eq!(TokenKind::RBrace.to_string(), "\"}\"");
        assert_eq!(TokenKind::Spread.to_string(), "\"...\"");
        assert_eq!(TokenKind::Name.to_string(), "Name");
        assert_eq!(TokenKind::Eof.to_string(), "<EOF>");
    }
}
