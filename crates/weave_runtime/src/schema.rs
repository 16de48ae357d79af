//! Schema model consumed by the executor.
//!
//! The schema is immutable once built: type kinds and the possible types of
//! every abstract type are computed by [`SchemaBuilder::build`] and answered
//! from lookup tables during execution.

use crate::directives::builtin_directives;
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use weave_syntax::OperationType;

/// Errors raised while building a schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("Query root type must be provided.")]
    MissingQueryType,

    #[error("{operation} root type \"{name}\" must be an Object type.")]
    InvalidRootType {
        operation: OperationType,
        name: String,
    },

    #[error("Unknown type \"{name}\" referenced by \"{referenced_by}\".")]
    UnknownType { name: String, referenced_by: String },

    #[error("Union \"{union}\" can only include Object types, it cannot include \"{member}\".")]
    InvalidUnionMember { union: String, member: String },

    #[error("Type \"{object}\" must only implement Interface types, it cannot implement \"{interface}\".")]
    InvalidInterface { object: String, interface: String },

    #[error("The type of \"{field}\" must be Output Type but got: \"{ty}\".")]
    InvalidOutputType { field: String, ty: String },

    #[error("The type of \"{field}\" must be Input Type but got: \"{ty}\".")]
    InvalidInputType { field: String, ty: String },

    #[error("Invalid type reference \"{0}\".")]
    InvalidTypeRef(String),
}

/// The kind of a named type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Scalar,
    Object,
    Interface,
    Union,
    Enum,
    InputObject,
}

impl TypeKind {
    pub const fn is_leaf(self) -> bool {
        matches!(self, Self::Scalar | Self::Enum)
    }

    pub const fn is_abstract(self) -> bool {
        matches!(self, Self::Interface | Self::Union)
    }

    pub const fn is_object(self) -> bool {
        matches!(self, Self::Object)
    }

    pub const fn is_input(self) -> bool {
        matches!(self, Self::Scalar | Self::Enum | Self::InputObject)
    }

    pub const fn is_output(self) -> bool {
        !matches!(self, Self::InputObject)
    }
}

/// A GraphQL schema.
#[derive(Debug, Clone)]
pub struct Schema {
    pub query_type: Option<String>,
    pub mutation_type: Option<String>,
    pub subscription_type: Option<String>,
    pub types: IndexMap<String, TypeDef>,
    pub directives: IndexMap<String, DirectiveDefinition>,
    kinds: FxHashMap<String, TypeKind>,
    possible_types: FxHashMap<String, Vec<String>>,
    typename_field: FieldDef,
}

impl Schema {
    /// Gets a type by name.
    pub fn get_type(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    /// Returns the kind of a named type.
    pub fn type_kind(&self, name: &str) -> Option<TypeKind> {
        self.kinds.get(name).copied()
    }

    pub fn object(&self, name: &str) -> Option<&ObjectDef> {
        match self.types.get(name) {
            Some(TypeDef::Object(object)) => Some(object),
            _ => None,
        }
    }

    /// Returns the name of the root type for an operation type.
    pub fn root_type_name(&self, operation: OperationType) -> Option<&str> {
        match operation {
            OperationType::Query => self.query_type.as_deref(),
            OperationType::Mutation => self.mutation_type.as_deref(),
            OperationType::Subscription => self.subscription_type.as_deref(),
        }
    }

    /// Returns the root object type for an operation type.
    pub fn root_type(&self, operation: OperationType) -> Option<&ObjectDef> {
        self.root_type_name(operation).and_then(|name| self.object(name))
    }

    /// Looks up a field of an object or interface type.
    ///
    /// `__typename` resolves on every composite type.
    pub fn field(&self, parent_type: &str, field_name: &str) -> Option<&FieldDef> {
        if field_name == "__typename" {
            return Some(&self.typename_field);
        }
        match self.types.get(parent_type)? {
            TypeDef::Object(object) => object.fields.get(field_name),
            TypeDef::Interface(interface) => interface.fields.get(field_name),
            _ => None,
        }
    }

    /// Returns the object types an abstract type can resolve to.
    pub fn possible_types(&self, abstract_type: &str) -> &[String] {
        self.possible_types
            .get(abstract_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Returns true if `maybe_sub_type` is `super_type` or one of its
    /// possible types (or implementations).
    pub fn is_sub_type(&self, super_type: &str, maybe_sub_type: &str) -> bool {
        if super_type == maybe_sub_type {
            return true;
        }
        match self.types.get(super_type) {
            Some(TypeDef::Union(union)) => union.members.iter().any(|m| m == maybe_sub_type),
            Some(TypeDef::Interface(_)) => match self.types.get(maybe_sub_type) {
                Some(TypeDef::Object(object)) => object.implements.iter().any(|i| i == super_type),
                Some(TypeDef::Interface(interface)) => {
                    interface.implements.iter().any(|i| i == super_type)
                }
                _ => false,
            },
            _ => false,
        }
    }

    pub fn directive(&self, name: &str) -> Option<&DirectiveDefinition> {
        self.directives.get(name)
    }

    /// Serializes a leaf value with the scalar or enum type's serializer.
    pub fn serialize_leaf(&self, type_name: &str, value: &Value) -> Result<Value, String> {
        match self.types.get(type_name) {
            Some(TypeDef::Scalar(scalar)) => scalar.serializer.serialize(value),
            Some(TypeDef::Enum(enum_def)) => enum_def.serialize(value),
            _ => Err(format!("Type \"{type_name}\" is not a leaf type.")),
        }
    }
}

/// A type definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TypeDef {
    Scalar(ScalarDef),
    Object(ObjectDef),
    Interface(InterfaceDef),
    Union(UnionDef),
    Enum(EnumDef),
    InputObject(InputObjectDef),
}

impl TypeDef {
    pub fn name(&self) -> &str {
        match self {
            Self::Scalar(s) => &s.name,
            Self::Object(o) => &o.name,
            Self::Interface(i) => &i.name,
            Self::Union(u) => &u.name,
            Self::Enum(e) => &e.name,
            Self::InputObject(i) => &i.name,
        }
    }

    pub fn kind(&self) -> TypeKind {
        match self {
            Self::Scalar(_) => TypeKind::Scalar,
            Self::Object(_) => TypeKind::Object,
            Self::Interface(_) => TypeKind::Interface,
            Self::Union(_) => TypeKind::Union,
            Self::Enum(_) => TypeKind::Enum,
            Self::InputObject(_) => TypeKind::InputObject,
        }
    }
}

type SerializeFn = dyn Fn(&Value) -> Result<Value, String> + Send + Sync;

/// Output serializer of a scalar type.
#[derive(Clone, Default)]
pub struct ScalarSerializer(Option<Arc<SerializeFn>>);

impl ScalarSerializer {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self(Some(Arc::new(f)))
    }

    /// Serializes a value; scalars without a serializer pass values through.
    pub fn serialize(&self, value: &Value) -> Result<Value, String> {
        match &self.0 {
            Some(f) => f(value),
            None => Ok(value.clone()),
        }
    }
}

impl fmt::Debug for ScalarSerializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.0.is_some() {
            "ScalarSerializer(custom)"
        } else {
            "ScalarSerializer(identity)"
        })
    }
}

/// Scalar type definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalarDef {
    pub name: String,
    pub description: Option<String>,
    #[serde(skip)]
    pub serializer: ScalarSerializer,
}

impl ScalarDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            serializer: ScalarSerializer::default(),
        }
    }

    pub fn with_serializer<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.serializer = ScalarSerializer::new(f);
        self
    }

    fn builtin(name: &str) -> Self {
        let serializer = match name {
            "Int" => ScalarSerializer::new(serialize_int),
            "Float" => ScalarSerializer::new(serialize_float),
            "String" => ScalarSerializer::new(serialize_string),
            "Boolean" => ScalarSerializer::new(serialize_boolean),
            _ => ScalarSerializer::new(serialize_id),
        };
        Self {
            name: name.to_string(),
            description: Some(format!("Built-in {name} scalar")),
            serializer,
        }
    }
}

fn serialize_int(value: &Value) -> Result<Value, String> {
    let number = match value {
        Value::Bool(b) => return Ok(Value::from(i32::from(*b))),
        Value::Number(n) => n.as_f64(),
        Value::String(s) if !s.is_empty() => s.parse::<f64>().ok(),
        _ => None,
    };
    match number {
        Some(n) if n.fract() == 0.0 && n.is_finite() => {
            if n > f64::from(i32::MAX) || n < f64::from(i32::MIN) {
                Err(format!(
                    "Int cannot represent non 32-bit signed integer value: {value}"
                ))
            } else {
                Ok(Value::from(n as i32))
            }
        }
        _ => Err(format!("Int cannot represent non-integer value: {value}")),
    }
}

fn serialize_float(value: &Value) -> Result<Value, String> {
    let number = match value {
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => n.as_f64(),
        Value::String(s) if !s.is_empty() => s.parse::<f64>().ok(),
        _ => None,
    };
    number
        .filter(|n| n.is_finite())
        .and_then(|n| serde_json::Number::from_f64(n).map(Value::Number))
        .ok_or_else(|| format!("Float cannot represent non numeric value: {value}"))
}

fn serialize_string(value: &Value) -> Result<Value, String> {
    match value {
        Value::String(_) => Ok(value.clone()),
        Value::Bool(b) => Ok(Value::String(b.to_string())),
        Value::Number(n) => Ok(Value::String(n.to_string())),
        _ => Err(format!("String cannot represent value: {value}")),
    }
}

fn serialize_boolean(value: &Value) -> Result<Value, String> {
    match value {
        Value::Bool(_) => Ok(value.clone()),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.is_finite() => Ok(Value::Bool(f != 0.0)),
            _ => Err(format!("Boolean cannot represent a non boolean value: {value}")),
        },
        _ => Err(format!("Boolean cannot represent a non boolean value: {value}")),
    }
}

fn serialize_id(value: &Value) -> Result<Value, String> {
    match value {
        Value::String(_) => Ok(value.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(Value::String(n.to_string())),
        _ => Err(format!("ID cannot represent value: {value}")),
    }
}

/// Object type definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectDef {
    pub name: String,
    pub description: Option<String>,
    pub fields: IndexMap<String, FieldDef>,
    pub implements: Vec<String>,
}

impl ObjectDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            fields: IndexMap::new(),
            implements: Vec::new(),
        }
    }

    /// Adds a field.
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.insert(field.name.clone(), field);
        self
    }

    /// Declares an implemented interface.
    pub fn implements(mut self, interface: impl Into<String>) -> Self {
        self.implements.push(interface.into());
        self
    }
}

/// Interface type definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceDef {
    pub name: String,
    pub description: Option<String>,
    pub fields: IndexMap<String, FieldDef>,
    pub implements: Vec<String>,
}

impl InterfaceDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            fields: IndexMap::new(),
            implements: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.insert(field.name.clone(), field);
        self
    }
}

/// Union type definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnionDef {
    pub name: String,
    pub description: Option<String>,
    pub members: Vec<String>,
}

impl UnionDef {
    pub fn new<I, S>(name: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            description: None,
            members: members.into_iter().map(Into::into).collect(),
        }
    }
}

/// Enum type definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumDef {
    pub name: String,
    pub description: Option<String>,
    pub values: Vec<EnumValueDef>,
}

impl EnumDef {
    pub fn new<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            description: None,
            values: values
                .into_iter()
                .map(|value| EnumValueDef {
                    name: value.into(),
                    description: None,
                    deprecated: false,
                    deprecation_reason: None,
                })
                .collect(),
        }
    }

    pub fn has_value(&self, name: &str) -> bool {
        self.values.iter().any(|v| v.name == name)
    }

    fn serialize(&self, value: &Value) -> Result<Value, String> {
        match value {
            Value::String(name) if self.has_value(name) => Ok(value.clone()),
            _ => Err(format!(
                "Enum \"{}\" cannot represent value: {value}",
                self.name
            )),
        }
    }
}

/// Enum value definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumValueDef {
    pub name: String,
    pub description: Option<String>,
    pub deprecated: bool,
    pub deprecation_reason: Option<String>,
}

/// Input object type definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputObjectDef {
    pub name: String,
    pub description: Option<String>,
    pub fields: IndexMap<String, InputFieldDef>,
}

impl InputObjectDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            fields: IndexMap::new(),
        }
    }

    pub fn field(mut self, field: InputFieldDef) -> Self {
        self.fields.insert(field.name.clone(), field);
        self
    }
}

/// Field definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub description: Option<String>,
    pub ty: TypeRef,
    pub arguments: IndexMap<String, InputFieldDef>,
    pub deprecated: bool,
    pub deprecation_reason: Option<String>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            description: None,
            ty,
            arguments: IndexMap::new(),
            deprecated: false,
            deprecation_reason: None,
        }
    }

    /// Adds an argument definition.
    pub fn argument(mut self, argument: InputFieldDef) -> Self {
        self.arguments.insert(argument.name.clone(), argument);
        self
    }
}

/// Input field (or argument) definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputFieldDef {
    pub name: String,
    pub description: Option<String>,
    pub ty: TypeRef,
    pub default_value: Option<Value>,
}

impl InputFieldDef {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            description: None,
            ty,
            default_value: None,
        }
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }
}

/// Type reference with list and non-null wrappers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeRef {
    Named(String),
    List(Box<TypeRef>),
    NonNull(Box<TypeRef>),
}

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    pub fn list(inner: TypeRef) -> Self {
        Self::List(Box::new(inner))
    }

    pub fn non_null(inner: TypeRef) -> Self {
        Self::NonNull(Box::new(inner))
    }

    /// Returns the innermost named type.
    pub fn named_type(&self) -> &str {
        match self {
            Self::Named(name) => name,
            Self::List(inner) | Self::NonNull(inner) => inner.named_type(),
        }
    }

    pub fn is_non_null(&self) -> bool {
        matches!(self, Self::NonNull(_))
    }

    /// Returns the type without its outer non-null wrapper.
    pub fn nullable(&self) -> &TypeRef {
        match self {
            Self::NonNull(inner) => inner,
            other => other,
        }
    }
}

impl From<&weave_syntax::Type> for TypeRef {
    fn from(ty: &weave_syntax::Type) -> Self {
        match ty {
            weave_syntax::Type::Named(name) => Self::named(name.as_str()),
            weave_syntax::Type::List(inner) => Self::list(inner.as_ref().into()),
            weave_syntax::Type::NonNull(inner) => Self::non_null(inner.as_ref().into()),
        }
    }
}

impl FromStr for TypeRef {
    type Err = SchemaError;

    /// Parses type references such as `String`, `[Int!]` or `[[ID]]!`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SchemaError::InvalidTypeRef(s.to_string());
        let trimmed = s.trim();
        if let Some(inner) = trimmed.strip_suffix('!') {
            let inner: TypeRef = inner.parse().map_err(|_| invalid())?;
            if inner.is_non_null() {
                return Err(invalid());
            }
            return Ok(Self::non_null(inner));
        }
        if let Some(inner) = trimmed.strip_prefix('[') {
            let inner = inner.strip_suffix(']').ok_or_else(invalid)?;
            return Ok(Self::list(inner.parse().map_err(|_| invalid())?));
        }
        let is_name = trimmed
            .chars()
            .enumerate()
            .all(|(i, c)| c == '_' || c.is_ascii_alphabetic() || (i > 0 && c.is_ascii_digit()));
        if trimmed.is_empty() || !is_name {
            return Err(invalid());
        }
        Ok(Self::named(trimmed))
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => f.write_str(name),
            Self::List(inner) => write!(f, "[{inner}]"),
            Self::NonNull(inner) => write!(f, "{inner}!"),
        }
    }
}

/// Directive definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectiveDefinition {
    pub name: String,
    pub description: Option<String>,
    pub arguments: IndexMap<String, InputFieldDef>,
    pub locations: Vec<DirectiveLocation>,
    pub repeatable: bool,
}

/// Executable directive locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirectiveLocation {
    Query,
    Mutation,
    Subscription,
    Field,
    FragmentDefinition,
    FragmentSpread,
    InlineFragment,
    VariableDefinition,
}

/// Schema builder.
#[derive(Debug)]
pub struct SchemaBuilder {
    query_type: Option<String>,
    mutation_type: Option<String>,
    subscription_type: Option<String>,
    types: IndexMap<String, TypeDef>,
    directives: IndexMap<String, DirectiveDefinition>,
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaBuilder {
    /// Creates a builder preloaded with the built-in scalars and directives.
    pub fn new() -> Self {
        let mut types = IndexMap::new();
        for name in ["Int", "Float", "String", "Boolean", "ID"] {
            types.insert(name.to_string(), TypeDef::Scalar(ScalarDef::builtin(name)));
        }
        let directives = builtin_directives()
            .into_iter()
            .map(|d| (d.name.clone(), d))
            .collect();
        Self {
            query_type: None,
            mutation_type: None,
            subscription_type: None,
            types,
            directives,
        }
    }

    pub fn query_type(mut self, name: impl Into<String>) -> Self {
        self.query_type = Some(name.into());
        self
    }

    pub fn mutation_type(mut self, name: impl Into<String>) -> Self {
        self.mutation_type = Some(name.into());
        self
    }

    pub fn subscription_type(mut self, name: impl Into<String>) -> Self {
        self.subscription_type = Some(name.into());
        self
    }

    /// Adds a type, replacing any type of the same name.
    pub fn add_type(mut self, type_def: TypeDef) -> Self {
        self.types.insert(type_def.name().to_string(), type_def);
        self
    }

    pub fn object(self, object: ObjectDef) -> Self {
        self.add_type(TypeDef::Object(object))
    }

    pub fn interface(self, interface: InterfaceDef) -> Self {
        self.add_type(TypeDef::Interface(interface))
    }

    pub fn union(self, union: UnionDef) -> Self {
        self.add_type(TypeDef::Union(union))
    }

    pub fn enum_type(self, enum_def: EnumDef) -> Self {
        self.add_type(TypeDef::Enum(enum_def))
    }

    pub fn input_object(self, input: InputObjectDef) -> Self {
        self.add_type(TypeDef::InputObject(input))
    }

    pub fn scalar(self, scalar: ScalarDef) -> Self {
        self.add_type(TypeDef::Scalar(scalar))
    }

    /// Adds a directive definition.
    pub fn add_directive(mut self, directive: DirectiveDefinition) -> Self {
        self.directives.insert(directive.name.clone(), directive);
        self
    }

    /// Validates the type references and builds the schema.
    pub fn build(self) -> Result<Schema, SchemaError> {
        let kinds: FxHashMap<String, TypeKind> = self
            .types
            .iter()
            .map(|(name, def)| (name.clone(), def.kind()))
            .collect();

        let query_type = self.query_type.ok_or(SchemaError::MissingQueryType)?;
        for (operation, root) in [
            (OperationType::Query, Some(&query_type)),
            (OperationType::Mutation, self.mutation_type.as_ref()),
            (OperationType::Subscription, self.subscription_type.as_ref()),
        ] {
            if let Some(name) = root {
                if kinds.get(name) != Some(&TypeKind::Object) {
                    return Err(SchemaError::InvalidRootType {
                        operation,
                        name: name.clone(),
                    });
                }
            }
        }

        let mut possible_types: FxHashMap<String, Vec<String>> = FxHashMap::default();
        for def in self.types.values() {
            validate_type(def, &kinds)?;
            match def {
                TypeDef::Union(union) => {
                    possible_types
                        .entry(union.name.clone())
                        .or_default()
                        .extend(union.members.iter().cloned());
                }
                TypeDef::Object(object) => {
                    for interface in &object.implements {
                        possible_types
                            .entry(interface.clone())
                            .or_default()
                            .push(object.name.clone());
                    }
                }
                _ => {}
            }
        }

        Ok(Schema {
            query_type: Some(query_type),
            mutation_type: self.mutation_type,
            subscription_type: self.subscription_type,
            types: self.types,
            directives: self.directives,
            kinds,
            possible_types,
            typename_field: FieldDef::new("__typename", TypeRef::non_null(TypeRef::named("String"))),
        })
    }
}

fn validate_type(def: &TypeDef, kinds: &FxHashMap<String, TypeKind>) -> Result<(), SchemaError> {
    let lookup = |name: &str, referenced_by: &str| {
        kinds
            .get(name)
            .copied()
            .ok_or_else(|| SchemaError::UnknownType {
                name: name.to_string(),
                referenced_by: referenced_by.to_string(),
            })
    };

    let check_fields = |owner: &str, fields: &IndexMap<String, FieldDef>| -> Result<(), SchemaError> {
        for field in fields.values() {
            let coordinate = format!("{owner}.{}", field.name);
            if !lookup(field.ty.named_type(), &coordinate)?.is_output() {
                return Err(SchemaError::InvalidOutputType {
                    field: coordinate,
                    ty: field.ty.to_string(),
                });
            }
            for arg in field.arguments.values() {
                let arg_coordinate = format!("{coordinate}({}:)", arg.name);
                if !lookup(arg.ty.named_type(), &arg_coordinate)?.is_input() {
                    return Err(SchemaError::InvalidInputType {
                        field: arg_coordinate,
                        ty: arg.ty.to_string(),
                    });
                }
            }
        }
        Ok(())
    };

    let check_interfaces = |owner: &str, interfaces: &[String]| -> Result<(), SchemaError> {
        for interface in interfaces {
            if lookup(interface, owner)? != TypeKind::Interface {
                return Err(SchemaError::InvalidInterface {
                    object: owner.to_string(),
                    interface: interface.clone(),
                });
            }
        }
        Ok(())
    };

    match def {
        TypeDef::Object(object) => {
            check_fields(&object.name, &object.fields)?;
            check_interfaces(&object.name, &object.implements)
        }
        TypeDef::Interface(interface) => {
            check_fields(&interface.name, &interface.fields)?;
            check_interfaces(&interface.name, &interface.implements)
        }
        TypeDef::Union(union) => {
            for member in &union.members {
                if lookup(member, &union.name)? != TypeKind::Object {
                    return Err(SchemaError::InvalidUnionMember {
                        union: union.name.clone(),
                        member: member.clone(),
                    });
                }
            }
            Ok(())
        }
        TypeDef::InputObject(input) => {
            for field in input.fields.values() {
                let coordinate = format!("{}.{}", input.name, field.name);
                if !lookup(field.ty.named_type(), &coordinate)?.is_input() {
                    return Err(SchemaError::InvalidInputType {
                        field: coordinate,
                        ty: field.ty.to_string(),
                    });
                }
            }
            Ok(())
        }
        TypeDef::Scalar(_) | TypeDef::Enum(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ty(s: &str) -> TypeRef {
        s.parse().unwrap()
    }

    fn character_schema() -> Schema {
        SchemaBuilder::new()
            .query_type("Query")
            .interface(InterfaceDef::new("Character").field(FieldDef::new("name", ty("String"))))
            .object(
                ObjectDef::new("Human")
                    .implements("Character")
                    .field(FieldDef::new("name", ty("String"))),
            )
            .object(
                ObjectDef::new("Droid")
                    .implements("Character")
                    .field(FieldDef::new("name", ty("String"))),
            )
            .union(UnionDef::new("SearchResult", ["Human", "Droid"]))
            .object(ObjectDef::new("Query").field(FieldDef::new("hero", ty("Character"))))
            .build()
            .unwrap()
    }

    #[test]
    fn test_type_ref_parse_and_display() {
        for source in ["String", "[Int!]", "[[ID]]!", "Friend!"] {
            assert_eq!(ty(source).to_string(), source);
        }
        assert_eq!(ty("[Friend!]!").named_type(), "Friend");
        assert!("[Int".parse::<TypeRef>().is_err());
        assert!("Int!!".parse::<TypeRef>().is_err());
    }

    #[test]
    fn test_possible_types_and_subtypes() {
        let schema = character_schema();
        assert_eq!(schema.possible_types("Character"), ["Human", "Droid"]);
        assert_eq!(schema.possible_types("SearchResult"), ["Human", "Droid"]);
        assert!(schema.is_sub_type("Character", "Droid"));
        assert!(schema.is_sub_type("SearchResult", "Human"));
        assert!(!schema.is_sub_type("Human", "Droid"));
        assert_eq!(schema.type_kind("Character"), Some(TypeKind::Interface));
    }

    #[test]
    fn test_typename_field_on_every_type() {
        let schema = character_schema();
        let field = schema.field("Character", "__typename").unwrap();
        assert_eq!(field.ty.to_string(), "String!");
        assert!(schema.field("Human", "missing").is_none());
    }

    #[test]
    fn test_build_rejects_unknown_types() {
        let err = SchemaBuilder::new()
            .query_type("Query")
            .object(ObjectDef::new("Query").field(FieldDef::new("hero", ty("Hero"))))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            SchemaError::UnknownType {
                name: "Hero".to_string(),
                referenced_by: "Query.hero".to_string()
            }
        );
        assert!(matches!(
            SchemaBuilder::new().build(),
            Err(SchemaError::MissingQueryType)
        ));
    }

    #[test]
    fn test_builtin_scalar_serializers() {
        let schema = character_schema();
        assert_eq!(schema.serialize_leaf("Int", &json!(3.0)), Ok(json!(3)));
        assert_eq!(schema.serialize_leaf("Int", &json!(true)), Ok(json!(1)));
        assert_eq!(
            schema.serialize_leaf("Int", &json!(1.5)),
            Err("Int cannot represent non-integer value: 1.5".to_string())
        );
        assert_eq!(schema.serialize_leaf("String", &json!(12)), Ok(json!("12")));
        assert_eq!(schema.serialize_leaf("ID", &json!(7)), Ok(json!("7")));
        assert!(schema.serialize_leaf("Boolean", &json!("yes")).is_err());
    }

    #[test]
    fn test_custom_scalar_serializer() {
        let date = ScalarDef::new("Date").with_serializer(|value| match value {
            Value::String(s) if s.len() == 10 => Ok(value.clone()),
            other => Err(format!("Date cannot represent value: {other}")),
        });
        let schema = SchemaBuilder::new()
            .query_type("Query")
            .scalar(date)
            .object(ObjectDef::new("Query").field(FieldDef::new("today", ty("Date"))))
            .build()
            .unwrap();
        assert_eq!(
            schema.serialize_leaf("Date", &json!("2024-01-31")),
            Ok(json!("2024-01-31"))
        );
        assert_eq!(
            schema.serialize_leaf("Date", &json!(5)),
            Err("Date cannot represent value: 5".to_string())
        );
    }

    #[test]
    fn test_enum_serializer() {
        let schema = SchemaBuilder::new()
            .query_type("Query")
            .enum_type(EnumDef::new("Color", ["RED", "GREEN"]))
            .object(ObjectDef::new("Query").field(FieldDef::new("color", ty("Color"))))
            .build()
            .unwrap();
        assert_eq!(schema.serialize_leaf("Color", &json!("RED")), Ok(json!("RED")));
        assert_eq!(
            schema.serialize_leaf("Color", &json!("BLUE")),
            Err("Enum \"Color\" cannot represent value: \"BLUE\"".to_string())
        );
    }
}
