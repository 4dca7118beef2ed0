//! Per-unit analysis pipeline.
//!
//! Lowers each unit's statement tree into a flat return-point table: for
//! every distinct return action, a minimized disjunction of conjunctions
//! of primitive tests that route to it. Four passes per unit — control
//! flow linking, symbolic execution, DNF simplification, reachability —
//! all deterministic and driven by source file offsets.

pub mod exec;
pub mod formula;
pub mod ir;
pub mod link;
pub mod reach;
pub mod simplify;

use crate::compiler::ast::{ComponentDecl, UnitDecl};
use crate::compiler::ops::TestOpRegistry;
use crate::compiler::tokens::SourceLocation;
use self::ir::{Bundle, Component, ReturnPoint, Unit};
use self::simplify::Simplifier;
use std::collections::HashSet;
use thiserror::Error;

pub const DEFAULT_OPTIMIZATION_LEVEL: u8 = 2;

#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("{location}: duplicate bundle name {name:?}")]
    DuplicateBundleName {
        location: SourceLocation,
        name: String,
    },
    #[error("{location}: duplicate unit name {name:?}")]
    DuplicateUnitName {
        location: SourceLocation,
        name: String,
    },
    #[error("{location}: duplicate case value {value:?}")]
    DuplicateCaseValue {
        location: SourceLocation,
        value: String,
    },
    #[error("{location}: missing return statement")]
    MissingReturnStatement { location: SourceLocation },
    #[error("{location}: duplicate label name {name:?}")]
    DuplicateLabelName {
        location: SourceLocation,
        name: String,
    },
    #[error("{location}: label {name:?} not defined")]
    UndefinedLabel {
        location: SourceLocation,
        name: String,
    },
    #[error("{location}: unknown test operation {op:?}")]
    UnknownTestOp {
        location: SourceLocation,
        op: String,
    },
    #[error("{location}: test operation {op:?} requires at least {min} values")]
    InsufficientTestOpValues {
        location: SourceLocation,
        op: String,
        min: usize,
    },
    #[error("{location}: test operation {op:?} accepts at most {max} values")]
    TooManyTestOpValues {
        location: SourceLocation,
        op: String,
        max: usize,
    },
    #[error("{location}: unreachable return statement")]
    UnreachableReturnStatement { location: SourceLocation },
}

pub struct Analyzer<'a> {
    component_declaration: &'a ComponentDecl,
    ops: &'a TestOpRegistry,
    optimization_level: u8,
}

impl<'a> Analyzer<'a> {
    pub fn new(component_declaration: &'a ComponentDecl, ops: &'a TestOpRegistry) -> Self {
        Self::with_optimization_level(component_declaration, ops, DEFAULT_OPTIMIZATION_LEVEL)
    }

    pub fn with_optimization_level(
        component_declaration: &'a ComponentDecl,
        ops: &'a TestOpRegistry,
        optimization_level: u8,
    ) -> Self {
        Self {
            component_declaration,
            ops,
            optimization_level,
        }
    }

    pub fn component(&self) -> Result<Component, AnalyzeError> {
        Ok(Component {
            source_location: self.component_declaration.source_location.clone(),
            name: self.component_declaration.name.clone(),
            alias: self.component_declaration.alias.clone(),
            bundles: self.bundles()?,
            line_directives: self.component_declaration.line_directives.clone(),
        })
    }

    fn bundles(&self) -> Result<Vec<Bundle>, AnalyzeError> {
        let mut bundles = Vec::new();
        let mut bundle_names: HashSet<&str> = HashSet::new();

        for bundle_declaration in &self.component_declaration.bundles {
            if !bundle_names.insert(bundle_declaration.name.as_str()) {
                return Err(AnalyzeError::DuplicateBundleName {
                    location: bundle_declaration.source_location.clone(),
                    name: bundle_declaration.name.clone(),
                });
            }

            let mut units = Vec::new();
            let mut unit_names: HashSet<&str> = HashSet::new();
            for unit_declaration in &bundle_declaration.units {
                if !unit_names.insert(unit_declaration.name.as_str()) {
                    return Err(AnalyzeError::DuplicateUnitName {
                        location: unit_declaration.source_location.clone(),
                        name: unit_declaration.name.clone(),
                    });
                }
                units.push(Unit {
                    source_location: unit_declaration.source_location.clone(),
                    name: unit_declaration.name.clone(),
                    alias: unit_declaration.alias.clone(),
                    return_points: self.return_points(unit_declaration)?,
                });
            }

            bundles.push(Bundle {
                source_location: bundle_declaration.source_location.clone(),
                name: bundle_declaration.name.clone(),
                units,
            });
        }

        Ok(bundles)
    }

    fn return_points(&self, unit: &UnitDecl) -> Result<Vec<ReturnPoint>, AnalyzeError> {
        let links = link::link_unit(unit)?;
        let raw_return_points = exec::execute_unit(unit, &links, self.ops)?;
        let simplified = Simplifier::new(&raw_return_points, self.ops)
            .simplify_return_points(self.optimization_level);
        reach::check_return_statements(
            unit,
            &links,
            &simplified,
            &raw_return_points.default_return_point_file_offsets,
        )?;
        Ok(simplified
            .into_iter()
            .map(|rp| rp.into_return_point())
            .collect())
    }
}
