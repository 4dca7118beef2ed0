//! Pass 1: control-flow linking.
//!
//! Annotates every block with the statement that receives control when the
//! block falls through, so symbolic execution can follow execution order
//! without re-discovering it. The pending-link stack holds slots still
//! waiting for "the next statement": entering a compound statement pushes
//! one slot per inner block, and the next statement in the enclosing block
//! fills every slot accumulated beneath it at once. A slot surviving to
//! the end of the program is a path with no terminating return.

use crate::compiler::analyzer::AnalyzeError;
use crate::compiler::ast::{BlockId, ReturnStatement, Statement, StmtId, UnitDecl};
use std::collections::HashMap;

#[derive(Debug)]
pub struct LinkTable {
    /// First statement the unit executes.
    pub program_link: StmtId,
    /// Fall-through target per block; `None` for blocks never reached.
    block_links: Vec<Option<StmtId>>,
    /// Resolved `goto` targets: goto statement id → labeled return id.
    goto_targets: HashMap<StmtId, StmtId>,
}

impl LinkTable {
    pub fn block_link(&self, block: BlockId) -> Option<StmtId> {
        self.block_links[block]
    }

    pub fn goto_target(&self, goto: StmtId) -> Option<StmtId> {
        self.goto_targets.get(&goto).copied()
    }
}

#[derive(Debug, Clone, Copy)]
enum LinkSlot {
    Program,
    Block(BlockId),
}

pub fn link_unit(unit: &UnitDecl) -> Result<LinkTable, AnalyzeError> {
    let mut linker = Linker {
        unit,
        slot_stack: vec![LinkSlot::Program],
        labeled_returns: HashMap::new(),
        gotos: Vec::new(),
        program_link: None,
        block_links: vec![None; unit.blocks.len()],
    };
    linker.visit_block(unit.program)?;

    if !linker.slot_stack.is_empty() {
        return Err(AnalyzeError::MissingReturnStatement {
            location: unit.source_location.clone(),
        });
    }
    let Some(program_link) = linker.program_link else {
        return Err(AnalyzeError::MissingReturnStatement {
            location: unit.source_location.clone(),
        });
    };

    let mut goto_targets = HashMap::new();
    for goto_id in linker.gotos {
        let Statement::Goto(goto) = unit.stmt(goto_id) else {
            continue;
        };
        let Some(&target) = linker.labeled_returns.get(goto.label_name.as_str()) else {
            return Err(AnalyzeError::UndefinedLabel {
                location: goto.source_location.clone(),
                name: goto.label_name.clone(),
            });
        };
        goto_targets.insert(goto_id, target);
    }

    Ok(LinkTable {
        program_link,
        block_links: linker.block_links,
        goto_targets,
    })
}

struct Linker<'a> {
    unit: &'a UnitDecl,
    slot_stack: Vec<LinkSlot>,
    labeled_returns: HashMap<&'a str, StmtId>,
    gotos: Vec<StmtId>,
    program_link: Option<StmtId>,
    block_links: Vec<Option<StmtId>>,
}

impl<'a> Linker<'a> {
    fn fill_slot(&mut self, slot: LinkSlot, stmt: StmtId) {
        match slot {
            LinkSlot::Program => self.program_link = Some(stmt),
            LinkSlot::Block(block) => self.block_links[block] = Some(stmt),
        }
    }

    fn visit_block(&mut self, block: BlockId) -> Result<(), AnalyzeError> {
        let first_slot_index = self.slot_stack.len() - 1;
        let stmt_ids = &self.unit.block(block).stmts;

        for (i, &stmt_id) in stmt_ids.iter().enumerate() {
            let pending: Vec<LinkSlot> = self.slot_stack.drain(first_slot_index..).collect();
            for slot in pending {
                self.fill_slot(slot, stmt_id);
            }

            match self.unit.stmt(stmt_id) {
                Statement::Return(ret) => {
                    self.register_label(stmt_id, ret)?;
                    // Statements after a return contribute no control flow,
                    // but their labels must still resolve.
                    for &later_id in &stmt_ids[i + 1..] {
                        if let Statement::Return(later) = self.unit.stmt(later_id) {
                            self.register_label(later_id, later)?;
                        }
                    }
                    return Ok(());
                }
                Statement::Goto(_) => {
                    self.gotos.push(stmt_id);
                    return Ok(());
                }
                Statement::If(if_stmt) => {
                    self.slot_stack.push(LinkSlot::Block(if_stmt.body));
                    self.visit_block(if_stmt.body)?;
                    for else_if in &if_stmt.else_if_clauses {
                        self.slot_stack.push(LinkSlot::Block(else_if.body));
                        self.visit_block(else_if.body)?;
                    }
                    self.slot_stack.push(LinkSlot::Block(if_stmt.else_clause.body));
                    self.visit_block(if_stmt.else_clause.body)?;
                }
                Statement::Switch(switch) => {
                    for case_clause in &switch.case_clauses {
                        self.slot_stack.push(LinkSlot::Block(case_clause.body));
                        self.visit_block(case_clause.body)?;
                    }
                    self.slot_stack
                        .push(LinkSlot::Block(switch.default_case_clause.body));
                    self.visit_block(switch.default_case_clause.body)?;
                }
            }
        }

        Ok(())
    }

    fn register_label(&mut self, ret_id: StmtId, ret: &'a ReturnStatement) -> Result<(), AnalyzeError> {
        let Some(label) = &ret.label else {
            return Ok(());
        };
        if self.labeled_returns.contains_key(label.name.as_str()) {
            return Err(AnalyzeError::DuplicateLabelName {
                location: label.source_location.clone(),
                name: label.name.clone(),
            });
        }
        self.labeled_returns.insert(label.name.as_str(), ret_id);
        Ok(())
    }
}
