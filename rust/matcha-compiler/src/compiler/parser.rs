//! Recursive-descent parser for `.mtc` source files.

use crate::compiler::ast::{
    Block, BlockId, BundleDecl, CaseClause, CaseValue, ComponentDecl, CompositeCondition,
    Condition, ConstantCondition, DefaultCaseClause, ElseClause, ElseIfClause, GotoStatement,
    IfStatement, Label, LogicalOp, ReturnStatement, Statement, StmtId, SwitchStatement,
    TestCondition, Transform, TransformSpec, UnitDecl,
};
use crate::compiler::keys::KeyRegistry;
use crate::compiler::scanner::{ScanError, Scanner};
use crate::compiler::tokens::{SourceLocation, Token, TokenKind};
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error("{location}: unexpected token {found:?}, {expected} is expected")]
    UnexpectedToken {
        location: SourceLocation,
        found: String,
        expected: String,
    },
    #[error("{location}: unexpected token {found:?}")]
    UnexpectedInput {
        location: SourceLocation,
        found: String,
    },
    #[error("{location}: unexpected end of file")]
    UnexpectedEof { location: SourceLocation },
    #[error("{location}: invalid string literal {literal:?}")]
    InvalidStringLiteral {
        location: SourceLocation,
        literal: String,
    },
    #[error("{location}: invalid transform literal {literal:?}, {detail}")]
    InvalidTransformLiteral {
        location: SourceLocation,
        literal: String,
        detail: String,
    },
    #[error("{location}: invalid string template {template:?}, {detail}")]
    InvalidStringTemplate {
        location: SourceLocation,
        template: String,
        detail: String,
    },
    #[error("{location}: label {name:?} must be followed by a return statement")]
    InvalidLabelPosition {
        location: SourceLocation,
        name: String,
    },
    #[error("{location}: unknown key {key:?}")]
    UnknownKey {
        location: SourceLocation,
        key: String,
    },
    #[error("{location}: failed to import {file_name:?}: {detail}")]
    ImportFailure {
        location: SourceLocation,
        file_name: String,
        detail: String,
    },
}

pub struct Parser<'a> {
    scanner: Scanner,
    buffered: VecDeque<Token>,
    key_registry: &'a mut KeyRegistry,
    line_directives: BTreeMap<u32, Vec<String>>,
    stmts: Vec<Statement>,
    blocks: Vec<Block>,
}

impl<'a> Parser<'a> {
    pub fn new(scanner: Scanner, key_registry: &'a mut KeyRegistry) -> Self {
        Self {
            scanner,
            buffered: VecDeque::new(),
            key_registry,
            line_directives: BTreeMap::new(),
            stmts: Vec::new(),
            blocks: Vec::new(),
        }
    }

    /// Parses one source file into a component declaration.
    pub fn component_declaration(&mut self) -> Result<ComponentDecl, ParseError> {
        self.import_files()?;

        let mut component = self.get_component_declaration()?;
        let t = self.peek_token(1)?;
        if t.kind != TokenKind::Eof {
            return Err(ParseError::UnexpectedInput {
                location: t.source_location,
                found: t.data,
            });
        }
        component.line_directives = std::mem::take(&mut self.line_directives);
        Ok(component)
    }

    // ── Token plumbing ──

    fn do_get_token(&mut self) -> Result<Option<Token>, ParseError> {
        loop {
            let Some(token) = self.scanner.get_token()? else {
                return Ok(None);
            };
            match token.kind {
                TokenKind::Whitespace => continue,
                TokenKind::Comment => {
                    if let Some(text) = token.data.strip_prefix("//#") {
                        self.line_directives
                            .entry(token.source_location.line_number)
                            .or_default()
                            .push(text.trim().to_string());
                    }
                    continue;
                }
                _ => return Ok(Some(token)),
            }
        }
    }

    fn peek_token(&mut self, pos: usize) -> Result<Token, ParseError> {
        while self.buffered.len() < pos {
            let token = match self.do_get_token()? {
                Some(t) => t,
                None => Token::eof(self.scanner.location()),
            };
            self.buffered.push_back(token);
        }
        Ok(self.buffered[pos - 1].clone())
    }

    fn peek_kind(&mut self, pos: usize) -> Result<TokenKind, ParseError> {
        Ok(self.peek_token(pos)?.kind)
    }

    fn get_token(&mut self) -> Result<Token, ParseError> {
        let token = match self.buffered.pop_front() {
            Some(t) => t,
            None => match self.do_get_token()? {
                Some(t) => t,
                None => Token::eof(self.scanner.location()),
            },
        };
        if token.kind == TokenKind::Eof {
            return Err(ParseError::UnexpectedEof {
                location: token.source_location,
            });
        }
        Ok(token)
    }

    fn discard(&mut self, count: usize) -> Result<(), ParseError> {
        for _ in 0..count {
            self.get_token()?;
        }
        Ok(())
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        let token = self.get_token()?;
        if token.kind != kind {
            return Err(ParseError::UnexpectedToken {
                location: token.source_location,
                found: token.data,
                expected: kind.to_string(),
            });
        }
        Ok(token)
    }

    fn add_stmt(&mut self, stmt: Statement) -> StmtId {
        self.stmts.push(stmt);
        self.stmts.len() - 1
    }

    fn add_block(&mut self, block: Block) -> BlockId {
        self.blocks.push(block);
        self.blocks.len() - 1
    }

    // ── Declarations ──

    fn get_component_declaration(&mut self) -> Result<ComponentDecl, ParseError> {
        let source_location = self.expect(TokenKind::ComponentKw)?.source_location;
        let name = self.get_identifier()?;
        let alias = if self.peek_kind(1)? == TokenKind::AsKw {
            self.discard(1)?;
            self.get_string()?
        } else {
            String::new()
        };

        self.import_files()?;

        let bundles = self.get_bundle_declarations()?;
        Ok(ComponentDecl {
            source_location,
            name,
            alias,
            bundles,
            line_directives: BTreeMap::new(),
        })
    }

    fn import_files(&mut self) -> Result<(), ParseError> {
        while self.peek_kind(1)? == TokenKind::ImportKw {
            self.import_file()?;
        }
        Ok(())
    }

    fn import_file(&mut self) -> Result<(), ParseError> {
        let import_location = self.expect(TokenKind::ImportKw)?.source_location;
        let (key_file_name, location) = self.get_string_with_location()?;

        let mut path = PathBuf::from(&key_file_name);
        if import_location.file_name != "<unnamed>" {
            if let Some(dir) = Path::new(&import_location.file_name).parent() {
                path = dir.join(&key_file_name);
            }
        }

        self.key_registry
            .load_keys_from_file(&path)
            .map_err(|e| ParseError::ImportFailure {
                location,
                file_name: key_file_name,
                detail: e.to_string(),
            })
    }

    fn get_bundle_declarations(&mut self) -> Result<Vec<BundleDecl>, ParseError> {
        let mut bundles = Vec::new();
        while self.peek_kind(1)? == TokenKind::BundleKw {
            bundles.push(self.get_bundle_declaration()?);
        }
        Ok(bundles)
    }

    fn get_bundle_declaration(&mut self) -> Result<BundleDecl, ParseError> {
        let source_location = self.expect(TokenKind::BundleKw)?.source_location;
        let name = self.get_identifier()?;
        self.expect(TokenKind::OpenBrace)?;
        let units = self.get_unit_declarations()?;
        self.expect(TokenKind::CloseBrace)?;
        Ok(BundleDecl {
            source_location,
            name,
            units,
        })
    }

    fn get_unit_declarations(&mut self) -> Result<Vec<UnitDecl>, ParseError> {
        let mut units = Vec::new();
        while self.peek_kind(1)? == TokenKind::UnitKw {
            units.push(self.get_unit_declaration()?);
        }
        Ok(units)
    }

    fn get_unit_declaration(&mut self) -> Result<UnitDecl, ParseError> {
        let source_location = self.expect(TokenKind::UnitKw)?.source_location;
        let name = self.get_identifier()?;
        let alias = if self.peek_kind(1)? == TokenKind::AsKw {
            self.discard(1)?;
            self.get_string()?
        } else {
            String::new()
        };
        let default_transform_list = self.maybe_get_default_transform_list()?;
        self.expect(TokenKind::OpenBrace)?;
        let program = self.parse_block()?;
        self.expect(TokenKind::CloseBrace)?;
        Ok(UnitDecl {
            source_location,
            name,
            alias,
            default_transform_list,
            stmts: std::mem::take(&mut self.stmts),
            blocks: std::mem::take(&mut self.blocks),
            program,
        })
    }

    // ── Transforms ──

    fn maybe_get_default_transform_list(&mut self) -> Result<Vec<Transform>, ParseError> {
        if self.peek_kind(1)? == TokenKind::DefaultKw {
            self.discard(1)?;
            return self.get_transform_list();
        }
        Ok(Vec::new())
    }

    fn get_transform_list(&mut self) -> Result<Vec<Transform>, ParseError> {
        if self.peek_kind(1)? != TokenKind::TransformKw {
            return Ok(Vec::new());
        }

        let mut transform_list = Vec::new();
        loop {
            transform_list.push(self.get_transform()?);
            if self.peek_kind(1)? != TokenKind::Comma {
                break;
            }
            self.discard(1)?;
        }
        Ok(transform_list)
    }

    fn get_transform(&mut self) -> Result<Transform, ParseError> {
        let source_location = self.expect(TokenKind::TransformKw)?.source_location;
        self.expect(TokenKind::OpenParen)?;
        let spec = self.get_transform_spec()?;
        self.expect(TokenKind::CloseParen)?;
        self.expect(TokenKind::AsKw)?;
        let (template, template_location) = self.get_string_with_location()?;
        let mapping = serde_json::to_value(&spec).unwrap_or(Value::Null);
        let annotation = render_string_template(&template, &template_location, &mapping)?;
        Ok(Transform {
            source_location,
            spec,
            annotation,
        })
    }

    fn get_transform_spec(&mut self) -> Result<TransformSpec, ParseError> {
        let (literal, location) = self.get_string_with_location()?;

        let mut spec: TransformSpec =
            serde_json::from_str(&literal).map_err(|e| ParseError::InvalidTransformLiteral {
                location: location.clone(),
                literal: literal.clone(),
                detail: e.to_string(),
            })?;
        if spec.to.is_empty() {
            return Err(ParseError::InvalidTransformLiteral {
                location,
                literal,
                detail: "empty \"to\" key".to_string(),
            });
        }

        let key_index = self.lookup_key(&spec.to, &location)?;
        spec.underlying_to = Some(key_index);

        for operator in &mut spec.operators {
            if operator.op.is_empty() {
                return Err(ParseError::InvalidTransformLiteral {
                    location: location.clone(),
                    literal: literal.clone(),
                    detail: "empty operator \"op\"".to_string(),
                });
            }

            if operator.op == "expr" {
                if let Some(values) = &operator.values {
                    if !values.is_empty() {
                        let mut underlying_values = values.clone();
                        let (rewritten, expr_keys) =
                            rewrite_expr_value(&underlying_values[0], &location, self.key_registry)?;
                        underlying_values[0] = rewritten;
                        operator.underlying_values = Some(underlying_values);
                        operator.expr_keys = Some(expr_keys);
                    }
                }
            }

            if let Some(from) = &operator.from {
                let mut underlying_from = Vec::with_capacity(from.len());
                for key in from {
                    underlying_from.push(self.lookup_key(key, &location)?);
                }
                operator.underlying_from = Some(underlying_from);
            }

            if let Some(op_type) = &operator.op_type {
                let underlying_op_type = match op_type.as_str() {
                    "any" => 0,
                    "bool" => 1,
                    "int" => 2,
                    "string" => 3,
                    "float" => 4,
                    other => self.lookup_key(other, &location)?,
                };
                operator.underlying_op_type = Some(underlying_op_type);
            }
        }

        Ok(spec)
    }

    // ── Statements ──

    fn parse_block(&mut self) -> Result<BlockId, ParseError> {
        let mut stmt_ids = Vec::new();
        loop {
            let label = self.maybe_get_label()?;
            let stmt = match self.peek_kind(1)? {
                TokenKind::ReturnKw => Statement::Return(self.parse_return(label)?),
                TokenKind::GotoKw => Statement::Goto(self.parse_goto()?),
                TokenKind::SwitchKw => Statement::Switch(self.parse_switch()?),
                TokenKind::IfKw => Statement::If(self.parse_if()?),
                _ => break,
            };
            stmt_ids.push(self.add_stmt(stmt));
        }
        Ok(self.add_block(Block { stmts: stmt_ids }))
    }

    fn maybe_get_label(&mut self) -> Result<Option<Label>, ParseError> {
        let t1 = self.peek_token(1)?;
        let t2 = self.peek_token(2)?;
        if t1.kind != TokenKind::Identifier || t2.kind != TokenKind::Colon {
            return Ok(None);
        }
        self.discard(2)?;
        let label = Label {
            source_location: t1.source_location,
            name: t1.data,
        };
        if self.peek_kind(1)? != TokenKind::ReturnKw {
            return Err(ParseError::InvalidLabelPosition {
                location: label.source_location,
                name: label.name,
            });
        }
        Ok(Some(label))
    }

    fn parse_return(&mut self, label: Option<Label>) -> Result<ReturnStatement, ParseError> {
        let source_location = self.expect(TokenKind::ReturnKw)?.source_location;
        let transform_list = self.get_transform_list()?;
        Ok(ReturnStatement {
            source_location,
            transform_list,
            label,
        })
    }

    fn parse_goto(&mut self) -> Result<GotoStatement, ParseError> {
        let source_location = self.expect(TokenKind::GotoKw)?.source_location;
        let label_name = self.get_identifier()?;
        Ok(GotoStatement {
            source_location,
            label_name,
        })
    }

    fn parse_switch(&mut self) -> Result<SwitchStatement, ParseError> {
        let source_location = self.expect(TokenKind::SwitchKw)?.source_location;
        self.expect(TokenKind::GetKw)?;
        self.expect(TokenKind::OpenParen)?;
        let (key, key_index) = self.get_key()?;
        self.expect(TokenKind::CloseParen)?;
        self.expect(TokenKind::OpenBrace)?;

        let mut case_clauses = vec![self.parse_case_clause(&key)?];
        while self.peek_kind(1)? == TokenKind::CaseKw {
            case_clauses.push(self.parse_case_clause(&key)?);
        }

        let default_case_clause = self.maybe_parse_default_case_clause()?;
        self.expect(TokenKind::CloseBrace)?;

        Ok(SwitchStatement {
            source_location,
            key,
            key_index,
            case_clauses,
            default_case_clause,
        })
    }

    fn parse_case_clause(&mut self, key: &str) -> Result<CaseClause, ParseError> {
        let source_location = self.expect(TokenKind::CaseKw)?.source_location;
        let mut case_values = Vec::new();
        loop {
            case_values.push(self.parse_case_value(key)?);
            if self.peek_kind(1)? != TokenKind::Comma {
                break;
            }
            self.discard(1)?;
        }
        self.expect(TokenKind::Colon)?;
        let body = self.parse_block()?;
        Ok(CaseClause {
            source_location,
            case_values,
            body,
        })
    }

    fn parse_case_value(&mut self, key: &str) -> Result<CaseValue, ParseError> {
        let (value, source_location) = self.get_string_with_location()?;
        self.expect(TokenKind::AsKw)?;
        let (template, template_location) = self.get_string_with_location()?;
        let mapping = json!({"key": key, "op": "eq", "values": [value.clone()]});
        let fact = render_string_template(&template, &template_location, &mapping)?;
        Ok(CaseValue {
            source_location,
            value,
            fact,
        })
    }

    fn maybe_parse_default_case_clause(&mut self) -> Result<DefaultCaseClause, ParseError> {
        let t = self.peek_token(1)?;
        if t.kind != TokenKind::DefaultKw {
            let body = self.add_block(Block { stmts: Vec::new() });
            return Ok(DefaultCaseClause {
                source_location: None,
                body,
            });
        }
        self.discard(1)?;
        self.expect(TokenKind::Colon)?;
        let body = self.parse_block()?;
        Ok(DefaultCaseClause {
            source_location: Some(t.source_location),
            body,
        })
    }

    fn parse_if(&mut self) -> Result<IfStatement, ParseError> {
        let source_location = self.expect(TokenKind::IfKw)?.source_location;
        let condition = self.parse_condition(Some(0))?;
        self.expect(TokenKind::OpenBrace)?;
        let body = self.parse_block()?;
        self.expect(TokenKind::CloseBrace)?;

        let mut else_if_clauses = Vec::new();
        while self.peek_kind(1)? == TokenKind::ElseKw && self.peek_kind(2)? == TokenKind::IfKw {
            else_if_clauses.push(self.parse_else_if_clause()?);
        }

        let else_clause = self.maybe_parse_else_clause()?;

        Ok(IfStatement {
            source_location,
            condition,
            body,
            else_if_clauses,
            else_clause,
        })
    }

    fn parse_else_if_clause(&mut self) -> Result<ElseIfClause, ParseError> {
        let source_location = self.expect(TokenKind::ElseKw)?.source_location;
        self.expect(TokenKind::IfKw)?;
        let condition = self.parse_condition(Some(0))?;
        self.expect(TokenKind::OpenBrace)?;
        let body = self.parse_block()?;
        self.expect(TokenKind::CloseBrace)?;
        Ok(ElseIfClause {
            source_location,
            condition,
            body,
        })
    }

    fn maybe_parse_else_clause(&mut self) -> Result<ElseClause, ParseError> {
        let t = self.peek_token(1)?;
        if t.kind != TokenKind::ElseKw {
            let body = self.add_block(Block { stmts: Vec::new() });
            return Ok(ElseClause {
                source_location: None,
                body,
            });
        }
        self.discard(1)?;
        self.expect(TokenKind::OpenBrace)?;
        let body = self.parse_block()?;
        self.expect(TokenKind::CloseBrace)?;
        Ok(ElseClause {
            source_location: Some(t.source_location),
            body,
        })
    }

    // ── Conditions ──

    /// `min_binary_op_precedence` of `None` forbids binary operators, so
    /// `!a && b` parses as `(!a) && b`.
    fn parse_condition(
        &mut self,
        min_binary_op_precedence: Option<u8>,
    ) -> Result<Condition, ParseError> {
        let t = self.peek_token(1)?;
        let mut condition = match t.kind {
            TokenKind::OpenParen => {
                self.discard(1)?;
                let condition = self.parse_condition(Some(0))?;
                self.expect(TokenKind::CloseParen)?;
                condition
            }
            TokenKind::LogicalNot => {
                self.discard(1)?;
                Condition::Composite(Box::new(CompositeCondition {
                    source_location: t.source_location,
                    logical_op: LogicalOp::Not,
                    condition_1: self.parse_condition(None)?,
                    condition_2: None,
                }))
            }
            _ => self.parse_basic_condition()?,
        };

        let Some(min_precedence) = min_binary_op_precedence else {
            return Ok(condition);
        };

        loop {
            let logical_op = match self.peek_kind(1)? {
                TokenKind::LogicalOr => LogicalOp::Or,
                TokenKind::LogicalAnd => LogicalOp::And,
                _ => break,
            };
            let precedence = binary_op_precedence(logical_op);
            if precedence < min_precedence {
                break;
            }

            self.discard(1)?;
            let rhs = self.parse_condition(Some(precedence + 1))?;
            let source_location = condition.source_location().clone();
            condition = Condition::Composite(Box::new(CompositeCondition {
                source_location,
                logical_op,
                condition_1: condition,
                condition_2: Some(rhs),
            }));
        }

        Ok(condition)
    }

    fn parse_basic_condition(&mut self) -> Result<Condition, ParseError> {
        let t = self.peek_token(1)?;
        match t.kind {
            TokenKind::TrueKw | TokenKind::FalseKw => {
                self.discard(1)?;
                Ok(Condition::Constant(ConstantCondition {
                    source_location: t.source_location,
                    constant: t.kind == TokenKind::TrueKw,
                }))
            }
            TokenKind::TestKw => self.parse_test_condition(),
            _ => Err(ParseError::UnexpectedInput {
                location: t.source_location,
                found: t.data,
            }),
        }
    }

    fn parse_test_condition(&mut self) -> Result<Condition, ParseError> {
        let source_location = self.expect(TokenKind::TestKw)?.source_location;
        self.expect(TokenKind::OpenParen)?;
        let (key, key_index) = self.get_key()?;
        self.expect(TokenKind::Comma)?;
        let op = self.get_string()?;
        let is_v_op = op.starts_with("v_");

        let mut values = Vec::new();
        let mut underlying_values = Vec::new();
        while self.peek_kind(1)? == TokenKind::Comma {
            self.discard(1)?;
            let (value, value_location) = self.get_string_with_location()?;
            if is_v_op {
                let value_key_index = self.lookup_key(&value, &value_location)?;
                underlying_values.push(value_key_index.to_string());
            }
            values.push(value);
        }
        if !is_v_op {
            underlying_values = values.clone();
        }

        self.expect(TokenKind::CloseParen)?;
        self.expect(TokenKind::AsKw)?;
        let (template, template_location) = self.get_string_with_location()?;
        let mapping = json!({"key": key, "op": op, "values": values});
        let fact = render_string_template(&template, &template_location, &mapping)?;

        Ok(Condition::Test(TestCondition {
            source_location,
            key,
            key_index,
            op,
            values,
            underlying_values,
            fact,
        }))
    }

    // ── Terminals ──

    fn get_identifier(&mut self) -> Result<String, ParseError> {
        Ok(self.expect(TokenKind::Identifier)?.data)
    }

    fn get_string(&mut self) -> Result<String, ParseError> {
        Ok(self.get_string_with_location()?.0)
    }

    fn get_string_with_location(&mut self) -> Result<(String, SourceLocation), ParseError> {
        let mut token = self.expect(TokenKind::StringLiteral)?;
        let source_location = token.source_location.clone();
        let mut buffer = String::new();

        loop {
            match token.data.chars().next() {
                Some('"') => buffer.push_str(&evaluate_single_line_string_literal(&token)?),
                _ => buffer.push_str(&token.data[1..token.data.len() - 1]),
            }

            if self.peek_kind(1)? != TokenKind::Plus {
                break;
            }
            self.discard(1)?;
            token = self.expect(TokenKind::StringLiteral)?;
        }

        Ok((buffer, source_location))
    }

    fn get_key(&mut self) -> Result<(String, i64), ParseError> {
        let (key, source_location) = self.get_string_with_location()?;
        let key_index = self.lookup_key(&key, &source_location)?;
        Ok((key, key_index))
    }

    fn lookup_key(&self, key: &str, location: &SourceLocation) -> Result<i64, ParseError> {
        self.key_registry
            .lookup_index(key)
            .ok_or_else(|| ParseError::UnknownKey {
                location: location.clone(),
                key: key.to_string(),
            })
    }
}

fn binary_op_precedence(op: LogicalOp) -> u8 {
    match op {
        LogicalOp::Or => 1,
        LogicalOp::And => 2,
        LogicalOp::Not => 0,
    }
}

fn evaluate_single_line_string_literal(token: &Token) -> Result<String, ParseError> {
    let chars: Vec<char> = token.data.chars().collect();
    let mut out = String::new();
    let mut i = 1;
    let end = chars.len().saturating_sub(1);

    while i < end {
        let mut c = chars[i];
        i += 1;
        if c == '\\' {
            if i >= end {
                break;
            }
            c = chars[i];
            i += 1;
            match c {
                '\\' | '"' => {}
                _ => {
                    return Err(ParseError::InvalidStringLiteral {
                        location: token.source_location.clone(),
                        literal: token.data.clone(),
                    })
                }
            }
        }
        out.push(c);
    }
    Ok(out)
}

/// Renders a fact/annotation template: `$$` escapes a dollar, `$(path)`
/// queries `mapping` by dot-separated path (object keys and array indices).
fn render_string_template(
    template: &str,
    location: &SourceLocation,
    mapping: &Value,
) -> Result<String, ParseError> {
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::new();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '$' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        match chars.get(i + 1) {
            Some('$') => {
                out.push('$');
                i += 2;
            }
            Some('(') => {
                i += 2;
                let mut query = String::new();
                let mut closed = false;
                while i < chars.len() {
                    if chars[i] == '\\' && chars.get(i + 1) == Some(&')') {
                        query.push(')');
                        i += 2;
                        continue;
                    }
                    if chars[i] == ')' {
                        closed = true;
                        i += 1;
                        break;
                    }
                    query.push(chars[i]);
                    i += 1;
                }
                if !closed {
                    return Err(ParseError::InvalidStringTemplate {
                        location: location.clone(),
                        template: template.to_string(),
                        detail: "missing ')'".to_string(),
                    });
                }
                out.push_str(&convert_value_to_text(query_value(mapping, &query)));
            }
            _ => {
                out.push('$');
                i += 1;
            }
        }
    }

    Ok(out)
}

fn query_value<'v>(mapping: &'v Value, query: &str) -> &'v Value {
    let mut current = mapping;
    for part in query.split('.') {
        current = match current {
            Value::Object(map) => map.get(part).unwrap_or(&Value::Null),
            Value::Array(items) => match part.parse::<usize>() {
                Ok(index) => items.get(index).unwrap_or(&Value::Null),
                Err(_) => &Value::Null,
            },
            _ => &Value::Null,
        };
    }
    current
}

fn convert_value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => {
            if s.is_empty() {
                "\"\"".to_string()
            } else {
                s.clone()
            }
        }
        Value::Array(items) if items.iter().all(Value::is_string) => items
            .iter()
            .map(|item| {
                let s = item.as_str().unwrap_or("");
                if s.is_empty() {
                    "\"\""
                } else {
                    s
                }
            })
            .collect::<Vec<_>>()
            .join("／"),
        other => other.to_string(),
    }
}

/// Rewrites `GetFuncInt(key)` / `GetFuncFloat(key)` references inside an
/// `expr` operator value to use declared key indices, collecting the
/// referenced key names.
fn rewrite_expr_value(
    expr: &str,
    location: &SourceLocation,
    registry: &KeyRegistry,
) -> Result<(String, Vec<String>), ParseError> {
    let mut out = String::new();
    let mut expr_keys = Vec::new();
    let mut i = 0;

    while let Some(found) = expr[i..].find("GetFunc") {
        let start = i + found;
        out.push_str(&expr[i..start]);

        let boundary_ok = expr[..start]
            .chars()
            .next_back()
            .map(|c| !c.is_ascii_alphanumeric() && c != '_')
            .unwrap_or(true);
        let tail = &expr[start..];
        let name_len = if tail.starts_with("GetFuncInt(") {
            Some("GetFuncInt".len())
        } else if tail.starts_with("GetFuncFloat(") {
            Some("GetFuncFloat".len())
        } else {
            None
        };

        let (true, Some(name_len)) = (boundary_ok, name_len) else {
            out.push_str("GetFunc");
            i = start + "GetFunc".len();
            continue;
        };

        let after_paren = start + name_len + 1;
        let Some(close) = expr[after_paren..].find(')') else {
            out.push_str(&expr[start..after_paren]);
            i = after_paren;
            continue;
        };
        let key = &expr[after_paren..after_paren + close];
        if key.is_empty() {
            out.push_str(&expr[start..after_paren]);
            i = after_paren;
            continue;
        }

        let key_index = registry
            .lookup_index(key)
            .ok_or_else(|| ParseError::UnknownKey {
                location: location.clone(),
                key: key.to_string(),
            })?;
        out.push_str(&expr[start..after_paren]);
        out.push_str(&key_index.to_string());
        out.push(')');
        expr_keys.push(key.to_string());
        i = after_paren + close + 1;
    }
    out.push_str(&expr[i..]);

    Ok((out, expr_keys))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::Statement;

    fn test_registry() -> KeyRegistry {
        let mut registry = KeyRegistry::new();
        registry.insert("UserId", 1001, "string");
        registry.insert("Country", 1002, "string");
        registry.insert("Score", 1003, "int");
        registry.insert("Flag", 2001, "string");
        registry
    }

    fn parse(source: &str) -> Result<ComponentDecl, ParseError> {
        let mut registry = test_registry();
        let scanner = Scanner::new(source, "<unnamed>", "<unnamed>");
        let mut parser = Parser::new(scanner, &mut registry);
        parser.component_declaration()
    }

    #[test]
    fn test_parse_minimal_component() {
        let component = parse(
            r#"
            component demo as "Demo"

            bundle main {
                unit choose as "Choose" {
                    if test("Country", "eq", "US") as "country is US" {
                        return transform("{\"to\": \"Flag\", \"operators\": [{\"op\": \"set\", \"values\": [\"on\"]}]}") as "set flag"
                    }
                    return
                }
            }
            "#,
        )
        .unwrap();

        assert_eq!(component.name, "demo");
        assert_eq!(component.alias, "Demo");
        assert_eq!(component.bundles.len(), 1);
        let bundle = &component.bundles[0];
        assert_eq!(bundle.name, "main");
        assert_eq!(bundle.units.len(), 1);
        let unit = &bundle.units[0];
        assert_eq!(unit.name, "choose");
        assert_eq!(unit.block(unit.program).stmts.len(), 2);
    }

    #[test]
    fn test_test_condition_fields() {
        let component = parse(
            r#"
            component demo
            bundle b {
                unit u {
                    if test("Country", "in", "US", "CA") as "$(key) $(op) $(values)" {
                        return transform("{\"to\": \"Flag\", \"operators\": [{\"op\": \"set\"}]}") as "x"
                    }
                    return
                }
            }
            "#,
        )
        .unwrap();

        let unit = &component.bundles[0].units[0];
        let first = unit.block(unit.program).stmts[0];
        let Statement::If(if_stmt) = unit.stmt(first) else {
            panic!("expected if statement");
        };
        let Condition::Test(test) = &if_stmt.condition else {
            panic!("expected test condition");
        };
        assert_eq!(test.key, "Country");
        assert_eq!(test.key_index, 1002);
        assert_eq!(test.op, "in");
        assert_eq!(test.values, vec!["US", "CA"]);
        assert_eq!(test.underlying_values, vec!["US", "CA"]);
        assert_eq!(test.fact, "Country in US／CA");
    }

    #[test]
    fn test_v_op_resolves_value_keys() {
        let component = parse(
            r#"
            component demo
            bundle b {
                unit u {
                    if test("UserId", "v_eq", "Country") as "cross key" {
                        return transform("{\"to\": \"Flag\", \"operators\": [{\"op\": \"set\"}]}") as "x"
                    }
                    return
                }
            }
            "#,
        )
        .unwrap();

        let unit = &component.bundles[0].units[0];
        let Statement::If(if_stmt) = unit.stmt(unit.block(unit.program).stmts[0]) else {
            panic!("expected if statement");
        };
        let Condition::Test(test) = &if_stmt.condition else {
            panic!("expected test condition");
        };
        assert_eq!(test.values, vec!["Country"]);
        assert_eq!(test.underlying_values, vec!["1002"]);
    }

    #[test]
    fn test_transform_spec_enrichment() {
        let component = parse(
            r#"
            component demo
            bundle b {
                unit u {
                    return transform("{\"to\": \"Flag\", \"operators\": [{\"op\": \"copy\", \"from\": [\"UserId\", \"Score\"], \"op_type\": \"int\"}]}") as "copy $(to)"
                }
            }
            "#,
        )
        .unwrap();

        let unit = &component.bundles[0].units[0];
        let Statement::Return(ret) = unit.stmt(unit.block(unit.program).stmts[0]) else {
            panic!("expected return statement");
        };
        let spec = &ret.transform_list[0].spec;
        assert_eq!(spec.underlying_to, Some(2001));
        let operator = &spec.operators[0];
        assert_eq!(operator.underlying_from.as_deref(), Some(&[1001, 1003][..]));
        assert_eq!(operator.underlying_op_type, Some(2));
        assert_eq!(ret.transform_list[0].annotation, "copy Flag");
    }

    #[test]
    fn test_expr_operator_key_rewrite() {
        let registry = test_registry();
        let (rewritten, keys) = rewrite_expr_value(
            "GetFuncInt(Score) + GetFuncFloat(UserId) - XGetFuncInt(Score)",
            &SourceLocation::dummy(),
            &registry,
        )
        .unwrap();
        assert_eq!(
            rewritten,
            "GetFuncInt(1003) + GetFuncFloat(1001) - XGetFuncInt(Score)"
        );
        assert_eq!(keys, vec!["Score", "UserId"]);
    }

    #[test]
    fn test_label_must_precede_return() {
        let err = parse(
            r#"
            component demo
            bundle b {
                unit u {
                    exit: goto exit
                }
            }
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ParseError::InvalidLabelPosition { .. }));
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let err = parse(
            r#"
            component demo
            bundle b {
                unit u {
                    if test("Nope", "eq", "x") as "f" {
                        return
                    }
                    return
                }
            }
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ParseError::UnknownKey { ref key, .. } if key == "Nope"));
    }

    #[test]
    fn test_string_concatenation_and_escapes() {
        let component = parse(
            "component demo\nbundle b {\nunit u as \"a\\\"b\" + `-tail` {\nreturn\n}\n}\n",
        )
        .unwrap();
        assert_eq!(component.bundles[0].units[0].alias, "a\"b-tail");
    }

    #[test]
    fn test_template_escapes_and_misses() {
        let mapping = json!({"key": "K", "values": ["", "x"]});
        let rendered = render_string_template(
            "$$ $(key) $(values.0) $(values.1) $(missing)",
            &SourceLocation::dummy(),
            &mapping,
        )
        .unwrap();
        assert_eq!(rendered, "$ K \"\" x null");

        let err = render_string_template("$(key", &SourceLocation::dummy(), &mapping).unwrap_err();
        assert!(matches!(err, ParseError::InvalidStringTemplate { .. }));
    }

    #[test]
    fn test_condition_precedence() {
        let component = parse(
            r#"
            component demo
            bundle b {
                unit u {
                    if test("Flag", "eq", "a") as "fa" || test("Flag", "eq", "b") as "fb" && test("Flag", "eq", "c") as "fc" {
                        return transform("{\"to\": \"Flag\", \"operators\": [{\"op\": \"set\"}]}") as "t"
                    }
                    return
                }
            }
            "#,
        )
        .unwrap();

        let unit = &component.bundles[0].units[0];
        let Statement::If(if_stmt) = unit.stmt(unit.block(unit.program).stmts[0]) else {
            panic!("expected if statement");
        };
        let Condition::Composite(top) = &if_stmt.condition else {
            panic!("expected composite condition");
        };
        assert_eq!(top.logical_op, LogicalOp::Or);
        let Some(Condition::Composite(rhs)) = &top.condition_2 else {
            panic!("expected `&&` on the right of `||`");
        };
        assert_eq!(rhs.logical_op, LogicalOp::And);
    }

    #[test]
    fn test_line_directives_are_collected() {
        let component = parse(
            "component demo\n//# owner: growth\n// plain comment\nbundle b {\nunit u {\nreturn\n}\n}\n",
        )
        .unwrap();
        assert_eq!(
            component.line_directives.get(&2),
            Some(&vec!["owner: growth".to_string()])
        );
        assert_eq!(component.line_directives.len(), 1);
    }
}
