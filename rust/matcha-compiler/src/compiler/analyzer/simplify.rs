//! Pass 3: DNF simplification.
//!
//! Turns the per-target formulas from symbolic execution into minimized,
//! stable-ordered return-point tables. Stages, gated by the optimization
//! level:
//!
//! 1. expand every accumulated formula to DNF and build raw conjunctions,
//!    assigning each distinct test its signed identity;
//! 2. (level ≥ 1) reduce conjunctions — duplicates, direct conflicts,
//!    set-valued subsumption — then drop subsumed conjunctions;
//! 3. re-rank all conjunctions by reference weight and assign dense
//!    indices;
//! 4. (level ≥ 2) dismiss literals proven false by earlier rows;
//! 5. (level ≥ 1) merge compatible set-valued tests within a conjunction.

use crate::compiler::analyzer::exec::{RawReturnPoints, TestArgs, DUMMY_FILE_OFFSET};
use crate::compiler::analyzer::formula::{to_dnf, Dnf, Formula, Literal};
use crate::compiler::analyzer::ir::{AndExpr, OrExpr, ReturnPoint, TestExpr};
use crate::compiler::ast::Transform;
use crate::compiler::ops::TestOpRegistry;
use crate::compiler::tokens::SourceLocation;
use indexmap::IndexMap;
use std::collections::{BTreeSet, HashSet, VecDeque};

#[derive(Debug)]
pub struct SimplifiedReturnPoint {
    pub source_location: SourceLocation,
    pub transform_list: Vec<Transform>,
    pub file_offset: i64,
    and_exprs: Vec<RankedAndExpr>,
}

impl SimplifiedReturnPoint {
    pub fn into_return_point(self) -> ReturnPoint {
        ReturnPoint {
            source_location: self.source_location,
            or_expr: OrExpr {
                and_exprs: self
                    .and_exprs
                    .into_iter()
                    .map(|ae| AndExpr {
                        test_exprs: ae.test_exprs,
                        index: ae.index,
                    })
                    .collect(),
            },
            transform_list: self.transform_list,
        }
    }
}

#[derive(Debug)]
struct RankedAndExpr {
    test_exprs: Vec<TestExpr>,
    index: i64,
    test_ids: BTreeSet<i32>,
    rank: Vec<i64>,
}

impl RankedAndExpr {
    fn new(test_exprs: Vec<TestExpr>) -> Self {
        Self {
            test_exprs,
            index: -1,
            test_ids: BTreeSet::new(),
            rank: Vec::new(),
        }
    }
}

enum ExpandedConditions {
    AlwaysTrue,
    NeverTrue,
    Dnfs(Vec<Vec<Vec<Literal>>>),
}

pub struct Simplifier<'a> {
    raw: &'a RawReturnPoints,
    ops: &'a TestOpRegistry,
    absolute_test_ids: IndexMap<Vec<String>, i32>,
}

impl<'a> Simplifier<'a> {
    pub fn new(raw: &'a RawReturnPoints, ops: &'a TestOpRegistry) -> Self {
        Self {
            raw,
            ops,
            absolute_test_ids: IndexMap::new(),
        }
    }

    pub fn simplify_return_points(
        mut self,
        optimization_level: u8,
    ) -> Vec<SimplifiedReturnPoint> {
        let mut return_points = self.make_return_points();

        if optimization_level >= 1 {
            return_points = reduce_return_points(return_points);
        }

        let ranked_handles = self.arrange_all_and_exprs(&mut return_points);

        if optimization_level >= 2 {
            dismiss_redundant_and_exprs(&mut return_points, &ranked_handles);
        }

        if optimization_level >= 1 {
            merge_test_exprs(&mut return_points, self.ops);
        }

        return_points
    }

    // ── Stage 1: raw return points ──

    fn make_return_points(&mut self) -> Vec<SimplifiedReturnPoint> {
        let mut return_points = Vec::new();

        for raw_return_point in self.raw.targets.values() {
            let and_exprs = match expand_conditions(&raw_return_point.conditions) {
                ExpandedConditions::NeverTrue => continue,
                // One empty conjunction: the return always fires.
                ExpandedConditions::AlwaysTrue => vec![RankedAndExpr::new(Vec::new())],
                ExpandedConditions::Dnfs(dnfs) => self.make_and_exprs(dnfs),
            };

            return_points.push(SimplifiedReturnPoint {
                source_location: raw_return_point.source_location.clone(),
                transform_list: raw_return_point.transform_list.clone(),
                file_offset: raw_return_point.file_offset,
                and_exprs,
            });
        }

        return_points
            .sort_by_key(|rp| (rp.file_offset == DUMMY_FILE_OFFSET, rp.file_offset));
        return_points
    }

    fn make_and_exprs(&mut self, dnfs: Vec<Vec<Vec<Literal>>>) -> Vec<RankedAndExpr> {
        let mut and_exprs = Vec::new();

        for clauses in dnfs {
            let mut group: Vec<RankedAndExpr> = clauses
                .into_iter()
                .map(|clause| self.make_and_expr(&clause))
                .collect();
            group.sort_by(|a, b| file_offset_sequence(a).cmp(&file_offset_sequence(b)));
            and_exprs.extend(group);
        }

        and_exprs
    }

    fn make_and_expr(&mut self, clause: &[Literal]) -> RankedAndExpr {
        let mut test_exprs: Vec<TestExpr> = clause
            .iter()
            .map(|literal| self.make_test_expr(*literal))
            .collect();
        test_exprs.sort_by(|a, b| a.file_offsets.cmp(&b.file_offsets));
        RankedAndExpr::new(test_exprs)
    }

    fn make_test_expr(&mut self, literal: Literal) -> TestExpr {
        let (file_offsets, args) = self
            .raw
            .symbols
            .get_index(literal.symbol)
            .map(|(offsets, args)| (*offsets, args))
            .unwrap_or_else(|| {
                unreachable!("symbol {} missing from symbol table", literal.symbol)
            });

        TestExpr {
            test_id: self.make_test_id(literal.negative, args),
            source_location: args.source_location.clone(),
            is_negative: literal.negative,
            key: args.key.clone(),
            key_index: args.key_index,
            op: args.op.clone(),
            values: args.values.clone(),
            underlying_values: args.underlying_values.clone(),
            fact: args.fact.clone(),
            reverse_op: args.reverse_op.clone(),
            is_dismissed: false,
            is_merged: false,
            merged_children: Vec::new(),
            file_offsets,
            number_of_subkeys: args.number_of_subkeys,
            equals_real_values: args.equals_real_values,
            unequals_real_values: args.unequals_real_values,
        }
    }

    /// Allocates the signed identity: identical `(op, key, values)` share
    /// one absolute id; a test whose op is the registered reverse of an
    /// existing id reuses it with flipped sign; negation flips the sign.
    fn make_test_id(&mut self, is_negative: bool, args: &TestArgs) -> i32 {
        let mut factor: i32 = if is_negative { -1 } else { 1 };

        let mut test_traits = Vec::with_capacity(2 + args.values.len());
        test_traits.push(args.op.clone());
        test_traits.push(args.key.clone());
        test_traits.extend(args.values.iter().cloned());

        let absolute_test_id = match self.absolute_test_ids.get(&test_traits) {
            Some(&id) => id,
            None => {
                let mut reverse_test_traits = test_traits.clone();
                reverse_test_traits[0] = args.reverse_op.clone();
                match self.absolute_test_ids.get(&reverse_test_traits) {
                    Some(&id) => {
                        factor = -factor;
                        id
                    }
                    None => {
                        let id = 1 + self.absolute_test_ids.len() as i32;
                        self.absolute_test_ids.insert(test_traits, id);
                        id
                    }
                }
            }
        };

        factor * absolute_test_id
    }

    // ── Stage 3: re-ranking ──

    /// Computes reference-weight ranks, sorts every or-expr's conjunctions,
    /// assigns dense indices in return-point order, and returns handles to
    /// all conjunctions in global rank order.
    fn arrange_all_and_exprs(
        &self,
        return_points: &mut [SimplifiedReturnPoint],
    ) -> Vec<(usize, usize)> {
        let k = self.absolute_test_ids.len() as i64;
        let mut test_id_ref_weights = vec![0i64; (2 * k + 1) as usize];
        for return_point in return_points.iter() {
            for and_expr in &return_point.and_exprs {
                let n = and_expr.test_exprs.len() as i64;
                for (i, test_expr) in and_expr.test_exprs.iter().enumerate() {
                    let weight = n - i as i64;
                    test_id_ref_weights[(k + test_expr.test_id as i64) as usize] += weight;
                    test_id_ref_weights[(k - test_expr.test_id as i64) as usize] -= weight;
                }
            }
        }

        for return_point in return_points.iter_mut() {
            for and_expr in &mut return_point.and_exprs {
                let mut rank = Vec::with_capacity(4 * and_expr.test_exprs.len());
                for test_expr in &and_expr.test_exprs {
                    rank.push(test_id_ref_weights[(k + test_expr.test_id as i64) as usize]);
                    rank.push(test_expr.file_offsets.0);
                    rank.push(test_expr.file_offsets.1);
                    rank.push(i64::from(test_expr.is_negative));
                }
                and_expr.rank = rank;
            }
            return_point.and_exprs.sort_by(|a, b| a.rank.cmp(&b.rank));
        }

        let mut index = 0i64;
        let mut handles = Vec::new();
        for (rp_index, return_point) in return_points.iter_mut().enumerate() {
            for (ae_index, and_expr) in return_point.and_exprs.iter_mut().enumerate() {
                and_expr.index = index;
                index += 1;
                handles.push((rp_index, ae_index));
            }
        }

        handles.sort_by(|&(ra, aa), &(rb, ab)| {
            return_points[ra].and_exprs[aa]
                .rank
                .cmp(&return_points[rb].and_exprs[ab].rank)
        });
        handles
    }
}

fn expand_conditions(conditions: &[Formula]) -> ExpandedConditions {
    if conditions.is_empty() {
        return ExpandedConditions::AlwaysTrue;
    }

    let mut dnfs = Vec::new();
    for condition in conditions {
        match to_dnf(condition) {
            Dnf::True => return ExpandedConditions::AlwaysTrue,
            Dnf::False => continue,
            Dnf::Clauses(clauses) => dnfs.push(clauses),
        }
    }

    if dnfs.is_empty() {
        ExpandedConditions::NeverTrue
    } else {
        ExpandedConditions::Dnfs(dnfs)
    }
}

fn file_offset_sequence(and_expr: &RankedAndExpr) -> Vec<i64> {
    let mut sequence = Vec::with_capacity(2 * and_expr.test_exprs.len());
    for test_expr in &and_expr.test_exprs {
        sequence.push(test_expr.file_offsets.0);
        sequence.push(test_expr.file_offsets.1);
    }
    sequence
}

// ── Stage 2: reduction ──

fn reduce_return_points(
    return_points: Vec<SimplifiedReturnPoint>,
) -> Vec<SimplifiedReturnPoint> {
    return_points
        .into_iter()
        .filter_map(|mut return_point| {
            let and_exprs = reduce_and_exprs(std::mem::take(&mut return_point.and_exprs))?;
            return_point.and_exprs = and_exprs;
            Some(return_point)
        })
        .collect()
}

/// Reduces each conjunction, then drops conjunctions whose test-id set is
/// a superset of another's. `None` when nothing survives — the return
/// point is unreachable.
fn reduce_and_exprs(and_exprs: Vec<RankedAndExpr>) -> Option<Vec<RankedAndExpr>> {
    let mut reduced: Vec<Option<RankedAndExpr>> = and_exprs
        .into_iter()
        .map(|mut and_expr| {
            let test_exprs = reduce_test_exprs(std::mem::take(&mut and_expr.test_exprs))?;
            and_expr.test_ids = test_exprs.iter().map(|te| te.test_id).collect();
            and_expr.test_exprs = test_exprs;
            Some(and_expr)
        })
        .collect();

    for i in 0..reduced.len() {
        let Some(x_test_ids) = reduced[i].as_ref().map(|x| x.test_ids.clone()) else {
            continue;
        };
        for j in 0..reduced.len() {
            if j == i {
                continue;
            }
            let Some(y) = reduced[j].as_ref() else {
                continue;
            };
            if x_test_ids.is_subset(&y.test_ids) {
                reduced[j] = None;
            }
        }
    }

    let survivors: Vec<RankedAndExpr> = reduced.into_iter().flatten().collect();
    if survivors.is_empty() {
        None
    } else {
        Some(survivors)
    }
}

/// Walks the conjunction pairwise. `None` means the conjunction is
/// unsatisfiable and the whole row must go.
fn reduce_test_exprs(test_exprs: Vec<TestExpr>) -> Option<Vec<TestExpr>> {
    let n = test_exprs.len();
    let mut alive = vec![true; n];

    for i in 0..n {
        if !alive[i] {
            continue;
        }
        let x = &test_exprs[i];

        let x_real_values: Option<HashSet<&str>> = if (!x.is_negative && x.equals_real_values)
            || (x.is_negative && x.unequals_real_values)
        {
            Some(x.real_values().iter().map(String::as_str).collect())
        } else {
            None
        };

        for j in 0..n {
            if j == i || !alive[j] {
                continue;
            }
            let y = &test_exprs[j];

            if y.test_id == x.test_id {
                alive[j] = false;
                continue;
            }
            if y.test_id == -x.test_id {
                return None;
            }

            let Some(x_values) = &x_real_values else {
                continue;
            };
            if (y.op != x.op && y.op != x.reverse_op) || y.virtual_key() != x.virtual_key() {
                continue;
            }

            let same_class = (y.is_negative, y.op.as_str()) == (x.is_negative, x.op.as_str())
                || (y.is_negative, y.op.as_str()) == (!x.is_negative, x.reverse_op.as_str());
            let y_values: HashSet<&str> = y.real_values().iter().map(String::as_str).collect();

            if same_class {
                if x_values.is_subset(&y_values) {
                    // X=`in[a, b]` vs Y=`in[a, b, c]`: Y is weaker.
                    alive[j] = false;
                } else if x_values.is_disjoint(&y_values) {
                    // X=`in[a, b]` vs Y=`in[c]`: conflict.
                    return None;
                }
                // Overlap like `in[a, b]` vs `in[a, c]` is left to merging.
            } else if x_values.is_subset(&y_values) {
                // X=`in[a, b]` vs Y=`nin[a, b, c]`: conflict.
                return None;
            } else if x_values.is_disjoint(&y_values) {
                // X=`in[a, b]` vs Y=`nin[c]`: Y is implied.
                alive[j] = false;
            }
        }
    }

    Some(
        test_exprs
            .into_iter()
            .zip(alive)
            .filter_map(|(te, keep)| keep.then_some(te))
            .collect(),
    )
}

// ── Stage 4: cross-row dismissal ──

/// Marks literals that are guaranteed false when their row is reached:
/// if rows are tried in index order, a row failing earlier implies facts
/// about later rows. Tracks accepted test-id tuples and fuses tuples
/// differing only by one complemented literal (absorption), which keeps
/// the set small and termination certain.
fn dismiss_redundant_and_exprs(
    return_points: &mut [SimplifiedReturnPoint],
    ranked_handles: &[(usize, usize)],
) {
    let mut test_id_sets: BTreeSet<Vec<i32>> = BTreeSet::new();

    for (position, &(rp_index, ae_index)) in ranked_handles.iter().enumerate() {
        let and_expr = &mut return_points[rp_index].and_exprs[ae_index];
        and_expr.index = position as i64;

        let mut new_test_ids: Vec<i32> = Vec::new();
        for test_expr in &mut and_expr.test_exprs {
            let mut probe = new_test_ids.clone();
            probe.push(-test_expr.test_id);
            if test_id_sets.contains(&probe) {
                test_expr.is_dismissed = true;
                continue;
            }
            new_test_ids.push(test_expr.test_id);
        }

        let mut pending: VecDeque<Vec<i32>> = VecDeque::new();
        pending.push_back(new_test_ids);
        while let Some(test_ids) = pending.pop_front() {
            if test_ids.is_empty() || test_id_sets.contains(&test_ids) {
                continue;
            }
            test_id_sets.insert(test_ids.clone());

            let (last, prefix) = match test_ids.split_last() {
                Some((last, prefix)) => (*last, prefix),
                None => continue,
            };

            let snapshot: Vec<Vec<i32>> = test_id_sets.iter().cloned().collect();
            for existing in snapshot {
                if existing.len() <= prefix.len() || existing[..prefix.len()] != *prefix {
                    continue;
                }
                let suffix = &existing[prefix.len()..];
                if suffix.contains(&-last) {
                    let mut fused = prefix.to_vec();
                    fused.extend(suffix.iter().copied().filter(|&id| id != -last));
                    pending.push_back(fused);
                    test_id_sets.remove(&existing);
                }
            }
        }
    }
}

// ── Stage 5: merging ──

fn merge_test_exprs(return_points: &mut [SimplifiedReturnPoint], ops: &TestOpRegistry) {
    for return_point in return_points.iter_mut() {
        for and_expr in &mut return_point.and_exprs {
            do_merge_test_exprs(&mut and_expr.test_exprs, ops);
        }
    }
}

fn matches_op_class(x: &TestExpr, y: &TestExpr) -> bool {
    (y.is_negative, y.op.as_str()) == (x.is_negative, x.op.as_str())
        || (y.is_negative, y.op.as_str()) == (!x.is_negative, x.reverse_op.as_str())
}

fn do_merge_test_exprs(test_exprs: &mut [TestExpr], ops: &TestOpRegistry) {
    let n = test_exprs.len();

    // Phase 1: a positive `in`-family test (or negative `nin`) absorbs
    // peers over the same virtual key — unions in same-class values,
    // subtracts opposite-class ones.
    for i in 0..n {
        if test_exprs[i].is_merged {
            continue;
        }
        {
            let x = &test_exprs[i];
            if !((!x.is_negative && x.equals_real_values)
                || (x.is_negative && x.unequals_real_values))
            {
                continue;
            }
        }

        for j in 0..n {
            if j == i || test_exprs[j].is_merged {
                continue;
            }
            if test_exprs[i].is_dismissed != test_exprs[j].is_dismissed {
                // Only merge tests that are both or neither dismissed.
                continue;
            }

            let (same_class, op_and_key_match) = {
                let (x, y) = (&test_exprs[i], &test_exprs[j]);
                (
                    matches_op_class(x, y),
                    (y.op == x.op || y.op == x.reverse_op) && y.virtual_key() == x.virtual_key(),
                )
            };
            if !op_and_key_match {
                continue;
            }

            if same_class {
                // Merge Y=`in[a, c]` into X=`in[a, b]`.
                let y_values: Vec<String> = test_exprs[j].real_values().to_vec();
                let y_underlying: Vec<String> = test_exprs[j].real_underlying_values().to_vec();
                test_exprs[i].values.extend(y_values);
                test_exprs[i].underlying_values.extend(y_underlying);
            } else {
                // Merge Y=`nin[a, c]` into X=`in[a, b]`.
                let y_values: HashSet<String> =
                    test_exprs[j].real_values().iter().cloned().collect();
                remove_real_values(&mut test_exprs[i], &y_values);
            }

            test_exprs[j].is_merged = true;
            let child = test_exprs[j].clone();
            test_exprs[i].merged_children.push(child);
        }
    }

    // Phase 2: negative `in`-family / positive `nin` absorb same-class
    // peers by union.
    for i in 0..n {
        if test_exprs[i].is_merged {
            continue;
        }
        {
            let x = &test_exprs[i];
            if !((x.is_negative && x.equals_real_values)
                || (!x.is_negative && x.unequals_real_values))
            {
                continue;
            }
        }

        for j in 0..n {
            if j == i || test_exprs[j].is_merged {
                continue;
            }
            if test_exprs[i].is_dismissed != test_exprs[j].is_dismissed {
                continue;
            }

            let merge = {
                let (x, y) = (&test_exprs[i], &test_exprs[j]);
                matches_op_class(x, y) && y.virtual_key() == x.virtual_key()
            };
            if !merge {
                continue;
            }

            let y_values: Vec<String> = test_exprs[j].real_values().to_vec();
            let y_underlying: Vec<String> = test_exprs[j].real_underlying_values().to_vec();
            test_exprs[i].values.extend(y_values);
            test_exprs[i].underlying_values.extend(y_underlying);
            test_exprs[j].is_merged = true;
            let child = test_exprs[j].clone();
            test_exprs[i].merged_children.push(child);
        }
    }

    // Phase 3: a set-valued op left with one real value rewrites to its
    // single form, e.g. `in` back to `eq`.
    for test_expr in test_exprs.iter_mut() {
        rewrite_single_value_op(test_expr, ops);
    }
}

fn rewrite_single_value_op(test_expr: &mut TestExpr, ops: &TestOpRegistry) {
    if test_expr.number_of_real_values() == 1 {
        if let Some(single_op) = ops.get(&test_expr.op).and_then(|info| info.single_op.clone()) {
            if let Some(single_info) = ops.get(&single_op) {
                test_expr.reverse_op = single_info.reverse_op.clone();
                test_expr.op = single_op;
            }
        }
    }
    for child in &mut test_expr.merged_children {
        rewrite_single_value_op(child, ops);
    }
}

fn remove_real_values(test_expr: &mut TestExpr, target_values: &HashSet<String>) {
    let mut keep = test_expr.number_of_subkeys.min(test_expr.values.len());
    for j in keep..test_expr.values.len() {
        if target_values.contains(&test_expr.values[j]) {
            continue;
        }
        test_expr.values.swap(keep, j);
        if j < test_expr.underlying_values.len() && keep < test_expr.underlying_values.len() {
            test_expr.underlying_values.swap(keep, j);
        }
        keep += 1;
    }
    test_expr.values.truncate(keep);
    test_expr.underlying_values.truncate(keep);
}
