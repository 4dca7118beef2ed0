//! Pass 4: reachability check.
//!
//! Every source return must survive simplification, either as a return
//! point of its own or folded into the default-fallthrough target. A
//! return missing from both had its guard proven unsatisfiable.

use crate::compiler::analyzer::link::LinkTable;
use crate::compiler::analyzer::simplify::SimplifiedReturnPoint;
use crate::compiler::analyzer::AnalyzeError;
use crate::compiler::ast::{BlockId, ReturnStatement, Statement, UnitDecl};
use std::collections::HashSet;

pub fn check_return_statements(
    unit: &UnitDecl,
    links: &LinkTable,
    return_points: &[SimplifiedReturnPoint],
    default_return_point_file_offsets: &HashSet<i64>,
) -> Result<(), AnalyzeError> {
    let mut live_file_offsets: HashSet<i64> = default_return_point_file_offsets.clone();
    for return_point in return_points {
        if return_point.file_offset >= 0 {
            live_file_offsets.insert(return_point.file_offset);
        }
    }

    let checker = Checker {
        unit,
        links,
        live_file_offsets,
    };
    checker.check_block(unit.program)
}

struct Checker<'a> {
    unit: &'a UnitDecl,
    links: &'a LinkTable,
    live_file_offsets: HashSet<i64>,
}

impl<'a> Checker<'a> {
    fn check_block(&self, block: BlockId) -> Result<(), AnalyzeError> {
        for &stmt_id in &self.unit.block(block).stmts {
            match self.unit.stmt(stmt_id) {
                Statement::Return(ret) => self.check_return(ret)?,
                Statement::Goto(_) => {
                    if let Some(target) = self.links.goto_target(stmt_id) {
                        if let Statement::Return(ret) = self.unit.stmt(target) {
                            self.check_return(ret)?;
                        }
                    }
                }
                Statement::If(if_stmt) => {
                    self.check_block(if_stmt.body)?;
                    for else_if in &if_stmt.else_if_clauses {
                        self.check_block(else_if.body)?;
                    }
                    self.check_block(if_stmt.else_clause.body)?;
                }
                Statement::Switch(switch) => {
                    for case_clause in &switch.case_clauses {
                        self.check_block(case_clause.body)?;
                    }
                    self.check_block(switch.default_case_clause.body)?;
                }
            }
        }
        Ok(())
    }

    fn check_return(&self, ret: &ReturnStatement) -> Result<(), AnalyzeError> {
        if !self
            .live_file_offsets
            .contains(&ret.source_location.file_offset)
        {
            return Err(AnalyzeError::UnreachableReturnStatement {
                location: ret.source_location.clone(),
            });
        }
        Ok(())
    }
}
