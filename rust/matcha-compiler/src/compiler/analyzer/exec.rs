//! Pass 2: symbolic execution.
//!
//! Follows the linked program from its first statement, maintaining the
//! path-condition stack, and accumulates one boolean formula per visit of
//! each return target. Targets are keyed by the return's file offset;
//! returns with an empty transform list all collapse into one synthetic
//! target carrying the unit's default transform list, keyed by the dummy
//! offset and ranked last downstream.

use crate::compiler::analyzer::formula::{Formula, SymbolId};
use crate::compiler::analyzer::link::LinkTable;
use crate::compiler::analyzer::AnalyzeError;
use crate::compiler::ast::{
    BlockId, Condition, IfStatement, LogicalOp, ReturnStatement, Statement, StmtId,
    SwitchStatement, Transform, UnitDecl,
};
use crate::compiler::ops::TestOpRegistry;
use crate::compiler::tokens::SourceLocation;
use indexmap::IndexMap;
use std::collections::HashSet;

pub const DUMMY_FILE_OFFSET: i64 = -1;

/// Metadata behind one symbol: the primitive test it stands for.
#[derive(Debug, Clone)]
pub struct TestArgs {
    pub source_location: SourceLocation,
    pub key: String,
    pub key_index: i64,
    pub op: String,
    pub values: Vec<String>,
    pub underlying_values: Vec<String>,
    pub fact: String,
    pub reverse_op: String,
    pub number_of_subkeys: usize,
    pub equals_real_values: bool,
    pub unequals_real_values: bool,
}

#[derive(Debug)]
pub struct RawReturnPoint {
    pub source_location: SourceLocation,
    pub file_offset: i64,
    pub transform_list: Vec<Transform>,
    pub conditions: Vec<Formula>,
}

#[derive(Debug)]
pub struct RawReturnPoints {
    /// Return targets in first-visit order, keyed by file offset.
    pub targets: IndexMap<i64, RawReturnPoint>,
    /// Symbols in allocation order; a [`SymbolId`] indexes this map.
    pub symbols: IndexMap<(i64, i64), TestArgs>,
    /// Offsets of every source return collapsed into the default target.
    pub default_return_point_file_offsets: HashSet<i64>,
}

pub fn execute_unit(
    unit: &UnitDecl,
    links: &LinkTable,
    ops: &TestOpRegistry,
) -> Result<RawReturnPoints, AnalyzeError> {
    let mut executor = Executor {
        unit,
        links,
        ops,
        condition_stack: Vec::new(),
        out: RawReturnPoints {
            targets: IndexMap::new(),
            symbols: IndexMap::new(),
            default_return_point_file_offsets: HashSet::new(),
        },
    };
    executor.exec_stmt(links.program_link)?;
    Ok(executor.out)
}

struct Executor<'a> {
    unit: &'a UnitDecl,
    links: &'a LinkTable,
    ops: &'a TestOpRegistry,
    condition_stack: Vec<Formula>,
    out: RawReturnPoints,
}

impl<'a> Executor<'a> {
    fn exec_stmt(&mut self, stmt_id: StmtId) -> Result<(), AnalyzeError> {
        match self.unit.stmt(stmt_id) {
            Statement::Return(ret) => self.exec_return(ret),
            Statement::Goto(goto) => {
                let Some(target) = self.links.goto_target(stmt_id) else {
                    return Err(AnalyzeError::UndefinedLabel {
                        location: goto.source_location.clone(),
                        name: goto.label_name.clone(),
                    });
                };
                self.exec_stmt(target)
            }
            Statement::If(if_stmt) => self.exec_if(if_stmt),
            Statement::Switch(switch) => self.exec_switch(switch),
        }
    }

    fn exec_return(&mut self, ret: &ReturnStatement) -> Result<(), AnalyzeError> {
        let condition = match self.condition_stack.split_first() {
            None => Formula::True,
            Some((first, rest)) => rest
                .iter()
                .fold(first.clone(), |acc, c| Formula::and(acc, c.clone())),
        };

        let mut transform_list = ret.transform_list.clone();
        let mut file_offset = ret.source_location.file_offset;
        if transform_list.is_empty() {
            transform_list = self.unit.default_transform_list.clone();
            self.out
                .default_return_point_file_offsets
                .insert(file_offset);
            file_offset = DUMMY_FILE_OFFSET;
        }

        let target = self
            .out
            .targets
            .entry(file_offset)
            .or_insert_with(|| RawReturnPoint {
                source_location: ret.source_location.clone(),
                file_offset,
                transform_list,
                conditions: Vec::new(),
            });
        target.conditions.push(condition);
        Ok(())
    }

    fn exec_if(&mut self, if_stmt: &IfStatement) -> Result<(), AnalyzeError> {
        let condition = self.eval_condition(&if_stmt.condition)?;
        self.condition_stack.push(condition.clone());
        self.exec_block_link(if_stmt.body)?;
        self.condition_stack.pop();
        let mut other_condition = Formula::not(condition);

        for else_if in &if_stmt.else_if_clauses {
            let added = self.eval_condition(&else_if.condition)?;
            let guard = Formula::and(other_condition.clone(), added);
            self.condition_stack.push(guard.clone());
            self.exec_block_link(else_if.body)?;
            self.condition_stack.pop();
            other_condition = Formula::and(other_condition, Formula::not(guard));
        }

        self.condition_stack.push(other_condition);
        self.exec_block_link(if_stmt.else_clause.body)?;
        self.condition_stack.pop();
        Ok(())
    }

    fn exec_switch(&mut self, switch: &SwitchStatement) -> Result<(), AnalyzeError> {
        let Some(in_op) = self.ops.get("in") else {
            return Err(AnalyzeError::UnknownTestOp {
                location: switch.source_location.clone(),
                op: "in".to_string(),
            });
        };
        let in_op = in_op.clone();

        let mut seen_case_values: HashSet<&str> = HashSet::new();
        let mut other_condition: Option<Formula> = None;

        for case_clause in &switch.case_clauses {
            let mut condition: Option<Formula> = None;
            for case_value in &case_clause.case_values {
                if !seen_case_values.insert(case_value.value.as_str()) {
                    return Err(AnalyzeError::DuplicateCaseValue {
                        location: case_value.source_location.clone(),
                        value: case_value.value.clone(),
                    });
                }

                let args = TestArgs {
                    source_location: case_value.source_location.clone(),
                    key: switch.key.clone(),
                    key_index: switch.key_index,
                    op: in_op.op.clone(),
                    values: vec![case_value.value.clone()],
                    underlying_values: vec![case_value.value.clone()],
                    fact: case_value.fact.clone(),
                    reverse_op: in_op.reverse_op.clone(),
                    number_of_subkeys: in_op.number_of_subkeys,
                    equals_real_values: in_op.equals_real_values,
                    unequals_real_values: in_op.unequals_real_values,
                };
                let symbol = self.intern_symbol(
                    (
                        switch.source_location.file_offset,
                        case_value.source_location.file_offset,
                    ),
                    args,
                );
                let var = Formula::Var(symbol);
                condition = Some(match condition {
                    None => var,
                    Some(c) => Formula::or(c, var),
                });
            }
            let condition = match condition {
                Some(c) => c,
                None => continue,
            };

            self.condition_stack.push(condition.clone());
            self.exec_block_link(case_clause.body)?;
            self.condition_stack.pop();

            other_condition = Some(match other_condition {
                None => Formula::not(condition),
                Some(other) => Formula::and(other, Formula::not(condition)),
            });
        }

        let other_condition = other_condition.unwrap_or(Formula::True);
        self.condition_stack.push(other_condition);
        self.exec_block_link(switch.default_case_clause.body)?;
        self.condition_stack.pop();
        Ok(())
    }

    fn exec_block_link(&mut self, block: BlockId) -> Result<(), AnalyzeError> {
        let Some(next) = self.links.block_link(block) else {
            return Err(AnalyzeError::MissingReturnStatement {
                location: self.unit.source_location.clone(),
            });
        };
        self.exec_stmt(next)
    }

    fn eval_condition(&mut self, condition: &Condition) -> Result<Formula, AnalyzeError> {
        match condition {
            Condition::Constant(c) => Ok(if c.constant {
                Formula::True
            } else {
                Formula::False
            }),
            Condition::Test(test) => {
                let Some(mut info) = self.ops.get(&test.op) else {
                    return Err(AnalyzeError::UnknownTestOp {
                        location: test.source_location.clone(),
                        op: test.op.clone(),
                    });
                };

                if test.values.len() < info.min_number_of_values {
                    return Err(AnalyzeError::InsufficientTestOpValues {
                        location: test.source_location.clone(),
                        op: info.op.clone(),
                        min: info.min_number_of_values,
                    });
                }
                if let Some(max) = info.max_number_of_values {
                    if test.values.len() > max {
                        return Err(AnalyzeError::TooManyTestOpValues {
                            location: test.source_location.clone(),
                            op: info.op.clone(),
                            max,
                        });
                    }
                }

                // Normalizing to the multi-valued form up front maximizes
                // merging opportunities in simplification.
                if let Some(multiple_op) = &info.multiple_op {
                    let Some(multiple_info) = self.ops.get(multiple_op) else {
                        return Err(AnalyzeError::UnknownTestOp {
                            location: test.source_location.clone(),
                            op: multiple_op.clone(),
                        });
                    };
                    info = multiple_info;
                }

                let args = TestArgs {
                    source_location: test.source_location.clone(),
                    key: test.key.clone(),
                    key_index: test.key_index,
                    op: info.op.clone(),
                    values: test.values.clone(),
                    underlying_values: test.underlying_values.clone(),
                    fact: test.fact.clone(),
                    reverse_op: info.reverse_op.clone(),
                    number_of_subkeys: info.number_of_subkeys,
                    equals_real_values: info.equals_real_values,
                    unequals_real_values: info.unequals_real_values,
                };
                let symbol = self.intern_symbol(
                    (test.source_location.file_offset, DUMMY_FILE_OFFSET),
                    args,
                );
                Ok(Formula::Var(symbol))
            }
            Condition::Composite(composite) => match composite.logical_op {
                LogicalOp::Not => {
                    let inner = self.eval_condition(&composite.condition_1)?;
                    Ok(Formula::not(inner))
                }
                LogicalOp::Or => {
                    let a = self.eval_condition(&composite.condition_1)?;
                    let b = self.eval_condition_2(composite.condition_2.as_ref())?;
                    // `a ∨ (¬a ∧ b)`: plants ¬a next to b so DNF clauses
                    // expose it to the simplifier.
                    Ok(Formula::or(
                        a.clone(),
                        Formula::and(Formula::not(a), b),
                    ))
                }
                LogicalOp::And => {
                    let a = self.eval_condition(&composite.condition_1)?;
                    let b = self.eval_condition_2(composite.condition_2.as_ref())?;
                    Ok(Formula::and(
                        a.clone(),
                        Formula::or(Formula::not(a), b),
                    ))
                }
            },
        }
    }

    fn eval_condition_2(&mut self, condition: Option<&Condition>) -> Result<Formula, AnalyzeError> {
        match condition {
            Some(c) => self.eval_condition(c),
            None => Ok(Formula::True),
        }
    }

    fn intern_symbol(&mut self, file_offsets: (i64, i64), args: TestArgs) -> SymbolId {
        let entry = self.out.symbols.entry(file_offsets);
        let symbol = entry.index();
        entry.or_insert(args);
        symbol
    }
}
