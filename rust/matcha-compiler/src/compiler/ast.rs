//! Declarations and statements as produced by the parser.
//!
//! Each unit owns its statements and blocks in slab vectors addressed by
//! [`StmtId`] / [`BlockId`]; compound statements refer to their bodies by
//! block id. Control-flow linking fills a side table instead of mutating
//! these nodes.

use crate::compiler::tokens::SourceLocation;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type StmtId = usize;
pub type BlockId = usize;

#[derive(Debug, Clone, Serialize)]
pub struct ComponentDecl {
    pub source_location: SourceLocation,
    pub name: String,
    pub alias: String,
    pub bundles: Vec<BundleDecl>,
    /// `//#` comment texts keyed by line number.
    pub line_directives: BTreeMap<u32, Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BundleDecl {
    pub source_location: SourceLocation,
    pub name: String,
    pub units: Vec<UnitDecl>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitDecl {
    pub source_location: SourceLocation,
    pub name: String,
    pub alias: String,
    pub default_transform_list: Vec<Transform>,
    pub stmts: Vec<Statement>,
    pub blocks: Vec<Block>,
    /// The unit's program body.
    pub program: BlockId,
}

impl UnitDecl {
    pub fn stmt(&self, id: StmtId) -> &Statement {
        &self.stmts[id]
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id]
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Block {
    pub stmts: Vec<StmtId>,
}

#[derive(Debug, Clone, Serialize)]
pub enum Statement {
    Return(ReturnStatement),
    Goto(GotoStatement),
    If(IfStatement),
    Switch(SwitchStatement),
}

#[derive(Debug, Clone, Serialize)]
pub struct Label {
    pub source_location: SourceLocation,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReturnStatement {
    pub source_location: SourceLocation,
    pub transform_list: Vec<Transform>,
    pub label: Option<Label>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GotoStatement {
    pub source_location: SourceLocation,
    pub label_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IfStatement {
    pub source_location: SourceLocation,
    pub condition: Condition,
    pub body: BlockId,
    pub else_if_clauses: Vec<ElseIfClause>,
    pub else_clause: ElseClause,
}

#[derive(Debug, Clone, Serialize)]
pub struct ElseIfClause {
    pub source_location: SourceLocation,
    pub condition: Condition,
    pub body: BlockId,
}

/// `source_location` is `None` when no `else` clause was written; the body
/// block is empty then and falls through to the enclosing continuation.
#[derive(Debug, Clone, Serialize)]
pub struct ElseClause {
    pub source_location: Option<SourceLocation>,
    pub body: BlockId,
}

#[derive(Debug, Clone, Serialize)]
pub struct SwitchStatement {
    pub source_location: SourceLocation,
    pub key: String,
    pub key_index: i64,
    pub case_clauses: Vec<CaseClause>,
    pub default_case_clause: DefaultCaseClause,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseClause {
    pub source_location: SourceLocation,
    pub case_values: Vec<CaseValue>,
    pub body: BlockId,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseValue {
    pub source_location: SourceLocation,
    pub value: String,
    pub fact: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DefaultCaseClause {
    pub source_location: Option<SourceLocation>,
    pub body: BlockId,
}

#[derive(Debug, Clone, Serialize)]
pub enum Condition {
    Constant(ConstantCondition),
    Test(TestCondition),
    Composite(Box<CompositeCondition>),
}

impl Condition {
    pub fn source_location(&self) -> &SourceLocation {
        match self {
            Condition::Constant(c) => &c.source_location,
            Condition::Test(c) => &c.source_location,
            Condition::Composite(c) => &c.source_location,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConstantCondition {
    pub source_location: SourceLocation,
    pub constant: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestCondition {
    pub source_location: SourceLocation,
    pub key: String,
    pub key_index: i64,
    pub op: String,
    pub values: Vec<String>,
    pub underlying_values: Vec<String>,
    pub fact: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogicalOp {
    Not,
    Or,
    And,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompositeCondition {
    pub source_location: SourceLocation,
    pub logical_op: LogicalOp,
    pub condition_1: Condition,
    /// `None` for `Not`.
    pub condition_2: Option<Condition>,
}

/// A data mutation applied to the output context when a return fires.
/// The spec payload is carried through the pipeline untouched.
#[derive(Debug, Clone, Serialize)]
pub struct Transform {
    pub source_location: SourceLocation,
    pub spec: TransformSpec,
    pub annotation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformSpec {
    pub to: String,
    /// Key index resolved by the parser; absent in source payloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub underlying_to: Option<i64>,
    #[serde(default)]
    pub operators: Vec<TransformOperator>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformOperator {
    pub op: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub underlying_from: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub underlying_values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr_keys: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub underlying_op_type: Option<i64>,
}
