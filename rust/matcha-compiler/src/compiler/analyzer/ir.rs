//! Compiled output of the analyzer: per unit, an ordered list of return
//! points, each guarded by a disjunction of conjunctions of primitive
//! tests. Built fresh per unit and handed to emitters read-only.

use crate::compiler::ast::Transform;
use crate::compiler::tokens::SourceLocation;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize)]
pub struct Component {
    pub source_location: SourceLocation,
    pub name: String,
    pub alias: String,
    pub bundles: Vec<Bundle>,
    pub line_directives: BTreeMap<u32, Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Bundle {
    pub source_location: SourceLocation,
    pub name: String,
    pub units: Vec<Unit>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Unit {
    pub source_location: SourceLocation,
    pub name: String,
    pub alias: String,
    pub return_points: Vec<ReturnPoint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReturnPoint {
    pub source_location: SourceLocation,
    pub or_expr: OrExpr,
    pub transform_list: Vec<Transform>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrExpr {
    pub and_exprs: Vec<AndExpr>,
}

/// A conjunction; `index` is its global rank within the unit. The lower
/// the index, the earlier the row is tried by the emitted matcher.
#[derive(Debug, Clone, Serialize)]
pub struct AndExpr {
    pub test_exprs: Vec<TestExpr>,
    pub index: i64,
}

/// A primitive predicate with stable identity.
///
/// `test_id` is unit-unique: its absolute value identifies the
/// `(op, key, values)` triple normalized against operator reversal, its
/// sign encodes negation. Two test exprs are boolean negations of each
/// other exactly when their ids sum to zero.
#[derive(Debug, Clone, Serialize)]
pub struct TestExpr {
    pub test_id: i32,
    pub source_location: SourceLocation,
    pub is_negative: bool,
    pub key: String,
    pub key_index: i64,
    pub op: String,
    pub values: Vec<String>,
    pub underlying_values: Vec<String>,
    pub fact: String,
    pub reverse_op: String,
    /// Proven false by earlier row outcomes; kept for traceability, not
    /// emitted at runtime.
    pub is_dismissed: bool,
    /// Absorbed into a peer; the peer's `merged_children` keeps it.
    pub is_merged: bool,
    pub merged_children: Vec<TestExpr>,
    pub file_offsets: (i64, i64),
    pub number_of_subkeys: usize,
    pub equals_real_values: bool,
    pub unequals_real_values: bool,
}

impl TestExpr {
    /// Key plus any leading subkey values; tests over the same virtual key
    /// are comparable for reduction and merging.
    pub fn virtual_key(&self) -> (&str, &[String]) {
        let n = self.number_of_subkeys.min(self.values.len());
        (&self.key, &self.values[..n])
    }

    pub fn number_of_real_values(&self) -> usize {
        self.values.len().saturating_sub(self.number_of_subkeys)
    }

    /// The values after the subkey prefix; what the op actually tests.
    pub fn real_values(&self) -> &[String] {
        let n = self.number_of_subkeys.min(self.values.len());
        &self.values[n..]
    }

    pub fn real_underlying_values(&self) -> &[String] {
        let n = self.number_of_subkeys.min(self.underlying_values.len());
        &self.underlying_values[n..]
    }
}
