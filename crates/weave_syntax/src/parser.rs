//! Recursive descent parser for executable documents.

use crate::ast::*;
use crate::lexer::{block_string_value, string_value, Lexer};
use crate::token::{Token, TokenKind};
use std::sync::Arc;
use weave_core::{diagnostics::codes, DiagnosticBag, GraphQLError, LineIndex, Span};

/// Parser for executable documents.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    line_index: LineIndex,
    current: Token,
    diagnostics: DiagnosticBag,
}

/// Result of parsing.
pub struct ParseResult {
    pub document: Document,
    pub diagnostics: DiagnosticBag,
}

impl ParseResult {
    /// Returns the document, or the syntax errors located in `source`.
    pub fn into_result(self, source: &str) -> Result<Document, Vec<GraphQLError>> {
        if self.diagnostics.has_errors() {
            Err(self.diagnostics.to_graphql_errors(source))
        } else {
            Ok(self.document)
        }
    }
}

/// Parses a source string into a document.
pub fn parse(source: &str) -> ParseResult {
    let mut parser = Parser::new(source);
    let document = parser.parse_document();
    ParseResult {
        document,
        diagnostics: parser.diagnostics,
    }
}

impl<'a> Parser<'a> {
    /// Creates a new parser.
    pub fn new(source: &'a str) -> Self {
        let mut parser = Self {
            lexer: Lexer::new(source),
            line_index: LineIndex::new(source),
            current: Token::new(TokenKind::Eof, Span::empty(0)),
            diagnostics: DiagnosticBag::new(),
        };
        parser.advance();
        parser
    }

    #[inline]
    fn at(&self) -> TokenKind {
        self.current.kind
    }

    #[inline]
    fn at_kind(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    /// Returns true if the current token is the name `keyword`.
    fn at_keyword(&self, keyword: &str) -> bool {
        self.at_kind(TokenKind::Name) && self.current_text() == keyword
    }

    /// Advances to the next token, reporting malformed tokens on the way.
    fn advance(&mut self) {
        loop {
            self.current = self.lexer.next_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            self.report_lex_error();
        }
    }

    fn expect(&mut self, kind: TokenKind) -> bool {
        if self.at_kind(kind) {
            self.advance();
            true
        } else {
            self.error_expected(&kind.to_string());
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> bool {
        if self.at_keyword(keyword) {
            self.advance();
            true
        } else {
            self.error_expected(&format!("\"{keyword}\""));
            false
        }
    }

    fn current_text(&self) -> &'a str {
        self.lexer.span_text(self.current.span)
    }

    fn describe_current(&self) -> String {
        match self.at() {
            TokenKind::Name
            | TokenKind::IntLiteral
            | TokenKind::FloatLiteral
            | TokenKind::StringLiteral
            | TokenKind::BlockStringLiteral => {
                format!("{} \"{}\"", self.at().as_str(), self.current_text())
            }
            kind => kind.to_string(),
        }
    }

    fn report_lex_error(&mut self) {
        let text = self.current_text();
        let (code, message) = match text.as_bytes().first() {
            Some(b'"') => (codes::UNTERMINATED_STRING, "Unterminated string.".to_string()),
            Some(b'-' | b'0'..=b'9') => (
                codes::INVALID_NUMBER,
                format!("Invalid number \"{text}\"."),
            ),
            _ => (
                codes::INVALID_SYNTAX,
                format!("Unexpected character \"{text}\"."),
            ),
        };
        self.diagnostics
            .error(code, "invalid token", self.current.span, message);
    }

    fn error_unexpected(&mut self) {
        let message = format!("Unexpected {}.", self.describe_current());
        self.diagnostics.error(
            codes::UNEXPECTED_TOKEN,
            "unexpected token",
            self.current.span,
            message,
        );
    }

    fn error_expected(&mut self, expected: &str) {
        let code = if self.current.is_eof() {
            codes::UNEXPECTED_EOF
        } else {
            codes::UNEXPECTED_TOKEN
        };
        let message = format!("Expected {expected}, found {}.", self.describe_current());
        self.diagnostics
            .error(code, "unexpected token", self.current.span, message);
    }

    /// Parses a document.
    pub fn parse_document(&mut self) -> Document {
        let start = self.current.span.start;
        let mut definitions = Vec::new();

        if self.current.is_eof() {
            self.error_unexpected();
        }

        while !self.at_kind(TokenKind::Eof) {
            if let Some(def) = self.parse_definition() {
                definitions.push(def);
            } else {
                // Recovery: skip to next definition
                self.advance();
            }
        }

        Document {
            definitions,
            span: Span::new(start, self.current.span.end),
        }
    }

    fn parse_definition(&mut self) -> Option<Definition> {
        if self.at_kind(TokenKind::LBrace)
            || self.at_keyword("query")
            || self.at_keyword("mutation")
            || self.at_keyword("subscription")
        {
            return Some(Definition::Operation(Arc::new(self.parse_operation())));
        }
        if self.at_keyword("fragment") {
            return Some(Definition::Fragment(Arc::new(
                self.parse_fragment_definition(),
            )));
        }
        self.error_unexpected();
        None
    }

    /// Parses a name. On failure the offending token is skipped.
    fn parse_name(&mut self) -> Name {
        let span = self.current.span;
        if self.at_kind(TokenKind::Name) {
            let name = Name::new(self.current_text(), span);
            self.advance();
            name
        } else {
            self.error_expected("Name");
            if !self.current.is_eof() {
                self.advance();
            }
            Name::new(String::new(), span)
        }
    }

    fn parse_operation(&mut self) -> OperationDefinition {
        let start = self.current.span.start;

        if self.at_kind(TokenKind::LBrace) {
            let selection_set = self.parse_selection_set();
            return OperationDefinition {
                operation: OperationType::Query,
                name: None,
                variable_definitions: Vec::new(),
                directives: Vec::new(),
                selection_set,
                span: Span::new(start, self.current.span.start),
            };
        }

        let operation = match self.current_text() {
            "mutation" => OperationType::Mutation,
            "subscription" => OperationType::Subscription,
            _ => OperationType::Query,
        };
        self.advance();

        let name = if self.at_kind(TokenKind::Name) {
            Some(self.parse_name())
        } else {
            None
        };

        let variable_definitions = if self.at_kind(TokenKind::LParen) {
            self.advance();
            let mut vars = Vec::new();
            while !self.at_kind(TokenKind::RParen) && !self.at_kind(TokenKind::Eof) {
                vars.push(self.parse_variable_definition());
            }
            self.expect(TokenKind::RParen);
            vars
        } else {
            Vec::new()
        };

        let directives = self.parse_directives();
        let selection_set = self.parse_selection_set();

        OperationDefinition {
            operation,
            name,
            variable_definitions,
            directives,
            selection_set,
            span: Span::new(start, self.current.span.start),
        }
    }

    fn parse_variable_definition(&mut self) -> VariableDefinition {
        let start = self.current.span.start;
        let location = self.line_index.location(start);
        self.expect(TokenKind::Dollar);
        let name = self.parse_name();
        self.expect(TokenKind::Colon);
        let ty = self.parse_type();

        let default_value = if self.at_kind(TokenKind::Eq) {
            self.advance();
            Some(self.parse_value(true))
        } else {
            None
        };

        let directives = self.parse_directives();

        VariableDefinition {
            name,
            ty,
            default_value,
            directives,
            span: Span::new(start, self.current.span.start),
            location,
        }
    }

    fn parse_type(&mut self) -> Type {
        let ty = if self.at_kind(TokenKind::LBracket) {
            self.advance();
            let inner = self.parse_type();
            self.expect(TokenKind::RBracket);
            Type::List(Box::new(inner))
        } else {
            Type::Named(self.parse_name())
        };

        if self.at_kind(TokenKind::Bang) {
            self.advance();
            Type::NonNull(Box::new(ty))
        } else {
            ty
        }
    }

    fn parse_fragment_definition(&mut self) -> FragmentDefinition {
        let start = self.current.span.start;
        self.advance(); // fragment

        let name = self.parse_name();
        if name.value == "on" {
            self.diagnostics.error(
                codes::UNEXPECTED_TOKEN,
                "unexpected token",
                name.span,
                "Unexpected Name \"on\".",
            );
        }
        self.expect_keyword("on");
        let type_condition = self.parse_name();
        let directives = self.parse_directives();
        let selection_set = self.parse_selection_set();

        FragmentDefinition {
            name,
            type_condition,
            directives,
            selection_set,
            span: Span::new(start, self.current.span.start),
        }
    }

    fn parse_selection_set(&mut self) -> SelectionSet {
        let start = self.current.span.start;
        self.expect(TokenKind::LBrace);

        let mut selections = Vec::new();
        loop {
            selections.push(self.parse_selection());
            if self.at_kind(TokenKind::RBrace) || self.at_kind(TokenKind::Eof) {
                break;
            }
        }
        self.expect(TokenKind::RBrace);

        SelectionSet {
            selections,
            span: Span::new(start, self.current.span.start),
        }
    }

    fn parse_selection(&mut self) -> Selection {
        if !self.at_kind(TokenKind::Spread) {
            return Selection::Field(Arc::new(self.parse_field()));
        }

        let start = self.current.span.start;
        self.advance(); // ...

        if self.at_keyword("on") {
            self.advance();
            let type_condition = Some(self.parse_name());
            let directives = self.parse_directives();
            let selection_set = self.parse_selection_set();
            Selection::InlineFragment(InlineFragment {
                type_condition,
                directives,
                selection_set,
                span: Span::new(start, self.current.span.start),
            })
        } else if self.at_kind(TokenKind::LBrace) || self.at_kind(TokenKind::At) {
            let directives = self.parse_directives();
            let selection_set = self.parse_selection_set();
            Selection::InlineFragment(InlineFragment {
                type_condition: None,
                directives,
                selection_set,
                span: Span::new(start, self.current.span.start),
            })
        } else {
            let name = self.parse_name();
            let directives = self.parse_directives();
            Selection::FragmentSpread(FragmentSpread {
                name,
                directives,
                span: Span::new(start, self.current.span.start),
            })
        }
    }

    fn parse_field(&mut self) -> Field {
        let start = self.current.span.start;
        let location = self.line_index.location(start);

        let first_name = self.parse_name();
        let (alias, name) = if self.at_kind(TokenKind::Colon) {
            self.advance();
            (Some(first_name), self.parse_name())
        } else {
            (None, first_name)
        };

        let arguments = self.parse_arguments();
        let directives = self.parse_directives();

        let selection_set = if self.at_kind(TokenKind::LBrace) {
            Some(self.parse_selection_set())
        } else {
            None
        };

        Field {
            alias,
            name,
            arguments,
            directives,
            selection_set,
            span: Span::new(start, self.current.span.start),
            location,
        }
    }

    fn parse_directives(&mut self) -> Vec<Directive> {
        let mut directives = Vec::new();
        while self.at_kind(TokenKind::At) {
            let start = self.current.span.start;
            self.advance(); // @
            let name = self.parse_name();
            let arguments = self.parse_arguments();
            directives.push(Directive {
                name,
                arguments,
                span: Span::new(start, self.current.span.start),
            });
        }
        directives
    }

    fn parse_arguments(&mut self) -> Vec<Argument> {
        if !self.at_kind(TokenKind::LParen) {
            return Vec::new();
        }
        self.advance();

        let mut args = Vec::new();
        loop {
            let start = self.current.span.start;
            let name = self.parse_name();
            self.expect(TokenKind::Colon);
            let value = self.parse_value(false);
            args.push(Argument {
                name,
                value,
                span: Span::new(start, self.current.span.start),
            });
            if self.at_kind(TokenKind::RParen) || self.at_kind(TokenKind::Eof) {
                break;
            }
        }
        self.expect(TokenKind::RParen);
        args
    }

    /// Parses a value literal; variables are rejected in const positions.
    fn parse_value(&mut self, is_const: bool) -> Value {
        match self.at() {
            TokenKind::Dollar if !is_const => {
                self.advance();
                Value::Variable(self.parse_name())
            }
            TokenKind::IntLiteral => {
                let value = match self.current_text().parse() {
                    Ok(value) => Value::Int(value),
                    Err(_) => {
                        let message =
                            format!("Int cannot represent value: {}.", self.current_text());
                        self.diagnostics.error(
                            codes::INVALID_NUMBER,
                            "invalid number",
                            self.current.span,
                            message,
                        );
                        Value::Null
                    }
                };
                self.advance();
                value
            }
            TokenKind::FloatLiteral => {
                let value = self.current_text().parse().map_or(Value::Null, Value::Float);
                self.advance();
                value
            }
            TokenKind::StringLiteral => {
                let value = match string_value(self.current_text()) {
                    Some(value) => Value::String(value),
                    None => {
                        self.diagnostics.error(
                            codes::INVALID_SYNTAX,
                            "invalid string",
                            self.current.span,
                            "Invalid character escape sequence.",
                        );
                        Value::Null
                    }
                };
                self.advance();
                value
            }
            TokenKind::BlockStringLiteral => {
                let value = Value::String(block_string_value(self.current_text()));
                self.advance();
                value
            }
            TokenKind::Name => {
                let value = match self.current_text() {
                    "true" => Value::Boolean(true),
                    "false" => Value::Boolean(false),
                    "null" => Value::Null,
                    other => Value::Enum(other.to_string()),
                };
                self.advance();
                value
            }
            TokenKind::LBracket => {
                self.advance();
                let mut values = Vec::new();
                while !self.at_kind(TokenKind::RBracket) && !self.at_kind(TokenKind::Eof) {
                    values.push(self.parse_value(is_const));
                }
                self.expect(TokenKind::RBracket);
                Value::List(values)
            }
            TokenKind::LBrace => {
                self.advance();
                let mut fields = Vec::new();
                while !self.at_kind(TokenKind::RBrace) && !self.at_kind(TokenKind::Eof) {
                    let name = self.parse_name();
                    self.expect(TokenKind::Colon);
                    let value = self.parse_value(is_const);
                    fields.push((name, value));
                }
                self.expect(TokenKind::RBrace);
                Value::Object(fields)
            }
            _ => {
                self.error_unexpected();
                if !self.current.is_eof() {
                    self.advance();
                }
                Value::Null
            }
        }
    }
}
