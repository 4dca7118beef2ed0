//! End-to-end analyzer scenarios: source text in, return-point tables out.

use matcha_compiler::{
    compile_source, AnalyzeError, CompileError, CompileOptions, Component, KeyRegistry,
    ReturnPoint, TestOpRegistry, Unit,
};
use std::collections::HashSet;

fn registry() -> KeyRegistry {
    let mut keys = KeyRegistry::new();
    keys.insert("Country", 1001, "string");
    keys.insert("Region", 1002, "string");
    keys.insert("Age", 1003, "int");
    keys.insert("Flag", 5001, "string");
    keys
}

fn transform(tag: &str) -> String {
    format!(
        r#"transform("{{\"to\": \"Flag\", \"operators\": [{{\"op\": \"set\", \"values\": [\"{tag}\"]}}]}}") as "{tag}""#
    )
}

fn compile_with_level(body: &str, level: u8) -> Result<Component, CompileError> {
    let source = format!("component demo\nbundle main {{\nunit decide {{\n{body}\n}}\n}}\n");
    let mut keys = registry();
    let ops = TestOpRegistry::builtin();
    compile_source(
        &source,
        "<unnamed>",
        "<unnamed>",
        &mut keys,
        &ops,
        &CompileOptions {
            optimization_level: level,
        },
    )
}

fn compile(body: &str) -> Result<Component, CompileError> {
    compile_with_level(body, 2)
}

fn unit(component: &Component) -> &Unit {
    &component.bundles[0].units[0]
}

fn annotation(return_point: &ReturnPoint) -> &str {
    &return_point.transform_list[0].annotation
}

/// Structural invariants from the data model, checked over a whole unit.
fn check_invariants(unit: &Unit) {
    let mut indices = HashSet::new();
    for return_point in &unit.return_points {
        let and_exprs = &return_point.or_expr.and_exprs;
        assert!(!and_exprs.is_empty(), "empty or-exprs must be dropped");

        for and_expr in and_exprs {
            assert!(indices.insert(and_expr.index), "indices must be unique");

            let mut absolute_ids = HashSet::new();
            for test_expr in &and_expr.test_exprs {
                assert_ne!(test_expr.test_id, 0, "test ids are non-zero");
                assert!(
                    absolute_ids.insert(test_expr.test_id.abs()),
                    "no two tests in a conjunction share an absolute id"
                );
            }
            for a in &and_expr.test_exprs {
                for b in &and_expr.test_exprs {
                    assert_ne!(a.test_id, -b.test_id, "no conflicts inside a conjunction");
                }
            }
        }

        for (i, a) in and_exprs.iter().enumerate() {
            for (j, b) in and_exprs.iter().enumerate() {
                if i == j {
                    continue;
                }
                let ids_a: HashSet<i32> = a.test_exprs.iter().map(|t| t.test_id).collect();
                let ids_b: HashSet<i32> = b.test_exprs.iter().map(|t| t.test_id).collect();
                assert!(
                    !ids_a.is_subset(&ids_b),
                    "no conjunction may subsume a sibling"
                );
            }
        }
    }

    let count = indices.len() as i64;
    for index in 0..count {
        assert!(indices.contains(&index), "indices are dense");
    }
}

// ── Constants ──

#[test]
fn test_constant_true_guard_always_fires() {
    let body = format!("if true {{\n{}\n}}\nreturn\n", transform("T1"));
    let component = compile(&body).unwrap();
    let unit = unit(&component);

    assert_eq!(unit.return_points.len(), 1);
    let rp = &unit.return_points[0];
    assert_eq!(annotation(rp), "T1");
    assert_eq!(rp.or_expr.and_exprs.len(), 1);
    assert!(rp.or_expr.and_exprs[0].test_exprs.is_empty());
    assert_eq!(rp.or_expr.and_exprs[0].index, 0);
}

#[test]
fn test_return_after_constant_true_is_unreachable() {
    let body = format!(
        "if true {{\n{}\n}}\n{}\n",
        transform("T1"),
        transform("T2")
    );
    let err = compile(&body).unwrap_err();
    assert!(matches!(
        err,
        CompileError::Analyze(AnalyzeError::UnreachableReturnStatement { .. })
    ));
}

#[test]
fn test_constant_false_branch_is_dropped() {
    let body = format!(
        "if false {{\nreturn\n}}\n{}\n",
        transform("T1")
    );
    let component = compile(&body).unwrap();
    let unit = unit(&component);

    // The false branch collapses into the (empty-guard) default target,
    // which never fires and is dropped; the trailing return always fires.
    assert_eq!(unit.return_points.len(), 1);
    assert_eq!(annotation(&unit.return_points[0]), "T1");
    assert!(unit.return_points[0].or_expr.and_exprs[0]
        .test_exprs
        .is_empty());
}

// ── Conflicts and subsumption ──

#[test]
fn test_direct_conflict_row_is_dropped() {
    let body = format!(
        "if test(\"Country\", \"eq\", \"US\") as \"is US\" && test(\"Country\", \"neq\", \"US\") as \"is not US\" {{\nreturn\n}}\n{}\n",
        transform("T2")
    );
    let component = compile(&body).unwrap();
    let unit = unit(&component);

    // The contradictory branch folds into the default target, whose only
    // rows are unsatisfiable, so only T2 survives.
    assert_eq!(unit.return_points.len(), 1);
    let rp = &unit.return_points[0];
    assert_eq!(annotation(rp), "T2");
    assert_eq!(rp.or_expr.and_exprs.len(), 2);

    let positive = &rp.or_expr.and_exprs[0].test_exprs[0];
    assert_eq!(positive.op, "eq");
    assert!(!positive.is_negative);
    assert!(!positive.is_dismissed);

    let negative = &rp.or_expr.and_exprs[1].test_exprs[0];
    assert!(negative.is_negative);
    assert!(negative.is_dismissed);
    assert_eq!(negative.test_id, -positive.test_id);
    check_invariants(unit);
}

#[test]
fn test_conflicting_transform_return_is_unreachable() {
    let body = format!(
        "if test(\"Country\", \"eq\", \"US\") as \"a\" && test(\"Country\", \"neq\", \"US\") as \"b\" {{\n{}\n}}\n{}\n",
        transform("T1"),
        transform("T2")
    );
    let err = compile(&body).unwrap_err();
    assert!(matches!(
        err,
        CompileError::Analyze(AnalyzeError::UnreachableReturnStatement { .. })
    ));
}

#[test]
fn test_set_subsumption_drops_weaker_test() {
    let body = format!(
        "if test(\"Country\", \"in\", \"a\", \"b\") as \"small\" && test(\"Country\", \"in\", \"a\", \"b\", \"c\") as \"big\" {{\n{}\n}}\nreturn\n",
        transform("T1")
    );
    let component = compile(&body).unwrap();
    let unit = unit(&component);

    assert_eq!(unit.return_points.len(), 2);
    let rp = &unit.return_points[0];
    assert_eq!(annotation(rp), "T1");
    assert_eq!(rp.or_expr.and_exprs.len(), 1);
    let tests = &rp.or_expr.and_exprs[0].test_exprs;
    assert_eq!(tests.len(), 1);
    assert_eq!(tests[0].op, "in");
    assert_eq!(tests[0].values, vec!["a", "b"]);
    assert!(tests[0].merged_children.is_empty());

    // The default-fallthrough return point carries the (empty) default
    // transform list and ranks last.
    assert!(unit.return_points[1].transform_list.is_empty());
    check_invariants(unit);
}

// ── Switch lowering ──

#[test]
fn test_switch_lowering_and_id_negation() {
    let body = format!(
        "switch get(\"Region\") {{\ncase \"a\" as \"ra\", \"b\" as \"rb\":\n{}\ndefault:\n{}\n}}\n",
        transform("T1"),
        transform("T2")
    );
    let component = compile(&body).unwrap();
    let unit = unit(&component);

    assert_eq!(unit.return_points.len(), 2);

    // One row per case value; single-valued `in` rewrites to `eq`.
    let t1 = &unit.return_points[0];
    assert_eq!(annotation(t1), "T1");
    assert_eq!(t1.or_expr.and_exprs.len(), 2);
    let row_a = &t1.or_expr.and_exprs[0].test_exprs[0];
    let row_b = &t1.or_expr.and_exprs[1].test_exprs[0];
    assert_eq!(row_a.op, "eq");
    assert_eq!(row_a.values, vec!["a"]);
    assert_eq!(row_b.values, vec!["b"]);

    // The default guard merges the negated case symbols into one `nin`
    // (negated `in`) over both values, dismissed because the case rows
    // failing already proves it.
    let t2 = &unit.return_points[1];
    assert_eq!(annotation(t2), "T2");
    assert_eq!(t2.or_expr.and_exprs.len(), 1);
    let guard = &t2.or_expr.and_exprs[0].test_exprs;
    assert_eq!(guard.len(), 2);
    let merged_into = &guard[0];
    assert!(merged_into.is_negative);
    assert_eq!(merged_into.op, "in");
    assert_eq!(merged_into.values, vec!["a", "b"]);
    assert_eq!(merged_into.merged_children.len(), 1);
    assert!(merged_into.is_dismissed);
    assert_eq!(merged_into.test_id, -row_a.test_id);
    assert!(guard[1].is_merged);
    check_invariants(unit);
}

#[test]
fn test_switch_without_default_falls_through() {
    let body = format!(
        "switch get(\"Region\") {{\ncase \"a\" as \"ra\":\n{}\n}}\nreturn\n",
        transform("T1")
    );
    let component = compile(&body).unwrap();
    let unit = unit(&component);
    assert_eq!(unit.return_points.len(), 2);
    assert_eq!(annotation(&unit.return_points[0]), "T1");
    assert!(unit.return_points[1].transform_list.is_empty());
}

#[test]
fn test_duplicate_case_value_is_rejected() {
    let body = format!(
        "switch get(\"Region\") {{\ncase \"a\" as \"ra\":\n{}\ncase \"a\" as \"again\":\n{}\n}}\nreturn\n",
        transform("T1"),
        transform("T2")
    );
    let err = compile(&body).unwrap_err();
    assert!(matches!(
        err,
        CompileError::Analyze(AnalyzeError::DuplicateCaseValue { ref value, .. }) if value == "a"
    ));
}

// ── Goto and labels ──

#[test]
fn test_labeled_return_wins_unconditionally() {
    let body = format!(
        "A: {}\nif test(\"Country\", \"eq\", \"US\") as \"us\" {{\ngoto A\n}}\n",
        transform("T1")
    );
    let component = compile(&body).unwrap();
    let unit = unit(&component);

    assert_eq!(unit.return_points.len(), 1);
    let rp = &unit.return_points[0];
    assert_eq!(annotation(rp), "T1");
    assert_eq!(rp.or_expr.and_exprs.len(), 1);
    assert!(rp.or_expr.and_exprs[0].test_exprs.is_empty());
}

#[test]
fn test_goto_merges_conditions_into_target() {
    let body = format!(
        "if test(\"Country\", \"eq\", \"US\") as \"us\" {{\ngoto A\n}}\nA: {}\n",
        transform("T1")
    );
    let component = compile(&body).unwrap();
    let unit = unit(&component);

    // Reached through the goto under `us` and through fall-through under
    // `¬us`; the second row's literal is dismissed once ranked.
    assert_eq!(unit.return_points.len(), 1);
    let rp = &unit.return_points[0];
    assert_eq!(rp.or_expr.and_exprs.len(), 2);
    assert!(!rp.or_expr.and_exprs[0].test_exprs[0].is_dismissed);
    assert!(rp.or_expr.and_exprs[1].test_exprs[0].is_dismissed);
    check_invariants(unit);
}

#[test]
fn test_duplicate_label_is_rejected() {
    let body = format!("A: {}\nA: {}\n", transform("T1"), transform("T2"));
    let err = compile(&body).unwrap_err();
    assert!(matches!(
        err,
        CompileError::Analyze(AnalyzeError::DuplicateLabelName { ref name, .. }) if name == "A"
    ));
}

#[test]
fn test_undefined_label_is_rejected() {
    let body = format!(
        "if test(\"Country\", \"eq\", \"US\") as \"us\" {{\ngoto B\n}}\nA: {}\n",
        transform("T1")
    );
    let err = compile(&body).unwrap_err();
    assert!(matches!(
        err,
        CompileError::Analyze(AnalyzeError::UndefinedLabel { ref name, .. }) if name == "B"
    ));
}

// ── Control-flow linking ──

#[test]
fn test_missing_return_is_rejected() {
    let body = "if test(\"Country\", \"eq\", \"US\") as \"us\" {\nreturn\n}\n".to_string();
    let err = compile(&body).unwrap_err();
    assert!(matches!(
        err,
        CompileError::Analyze(AnalyzeError::MissingReturnStatement { .. })
    ));
}

#[test]
fn test_else_if_chain_guards() {
    let body = format!(
        "if test(\"Country\", \"eq\", \"US\") as \"us\" {{\n{}\n}} else if test(\"Region\", \"eq\", \"na\") as \"na\" {{\n{}\n}} else {{\n{}\n}}\n",
        transform("T1"),
        transform("T2"),
        transform("T3")
    );
    let component = compile(&body).unwrap();
    let unit = unit(&component);

    assert_eq!(unit.return_points.len(), 3);
    let (t1, t2, t3) = (
        &unit.return_points[0],
        &unit.return_points[1],
        &unit.return_points[2],
    );

    assert_eq!(t1.or_expr.and_exprs[0].test_exprs.len(), 1);

    let t2_tests = &t2.or_expr.and_exprs[0].test_exprs;
    assert_eq!(t2_tests.len(), 2);
    assert!(t2_tests[0].is_negative);
    assert!(t2_tests[0].is_dismissed);
    assert!(!t2_tests[1].is_negative);
    assert!(!t2_tests[1].is_dismissed);

    let t3_tests = &t3.or_expr.and_exprs[0].test_exprs;
    assert_eq!(t3_tests.len(), 2);
    assert!(t3_tests.iter().all(|t| t.is_negative && t.is_dismissed));

    // Rows are tried in source order here.
    assert_eq!(t1.or_expr.and_exprs[0].index, 0);
    assert_eq!(t2.or_expr.and_exprs[0].index, 1);
    assert_eq!(t3.or_expr.and_exprs[0].index, 2);
    check_invariants(unit);
}

// ── Operator identity ──

#[test]
fn test_gt_and_lte_share_one_identity() {
    let body = format!(
        "if test(\"Age\", \"gt\", \"18\") as \"adult\" {{\n{}\n}}\nif test(\"Age\", \"lte\", \"18\") as \"minor\" {{\n{}\n}}\nreturn\n",
        transform("T1"),
        transform("T2")
    );
    let component = compile(&body).unwrap();
    let unit = unit(&component);

    assert_eq!(unit.return_points.len(), 2);
    let adult = &unit.return_points[0].or_expr.and_exprs[0].test_exprs[0];
    assert_eq!(adult.op, "gt");
    assert!(!adult.is_negative);

    // `lte 18` is recognized as the negation of `gt 18`: the guard
    // `¬gt ∧ lte` dedupes to one literal with the opposite sign.
    let minor_row = &unit.return_points[1].or_expr.and_exprs[0];
    assert_eq!(minor_row.test_exprs.len(), 1);
    let minor = &minor_row.test_exprs[0];
    assert_eq!(minor.test_id, -adult.test_id);
    assert_eq!(minor.op, "gt");
    assert!(minor.is_negative);
    assert!(minor.is_dismissed);
    check_invariants(unit);
}

#[test]
fn test_unknown_op_and_arity_errors() {
    let bad_op = "if test(\"Country\", \"frobnicate\", \"x\") as \"f\" {\nreturn\n}\nreturn\n";
    assert!(matches!(
        compile(bad_op).unwrap_err(),
        CompileError::Analyze(AnalyzeError::UnknownTestOp { ref op, .. }) if op == "frobnicate"
    ));

    let too_few = "if test(\"Country\", \"eq\") as \"f\" {\nreturn\n}\nreturn\n";
    assert!(matches!(
        compile(too_few).unwrap_err(),
        CompileError::Analyze(AnalyzeError::InsufficientTestOpValues { min: 1, .. })
    ));

    let too_many = "if test(\"Country\", \"eq\", \"a\", \"b\") as \"f\" {\nreturn\n}\nreturn\n";
    assert!(matches!(
        compile(too_many).unwrap_err(),
        CompileError::Analyze(AnalyzeError::TooManyTestOpValues { max: 1, .. })
    ));
}

// ── Merging ──

#[test]
fn test_in_nin_merge_at_level_one() {
    let body = format!(
        "if test(\"Country\", \"in\", \"a\", \"b\") as \"inab\" && test(\"Country\", \"nin\", \"b\", \"c\") as \"ninbc\" {{\n{}\n}}\nreturn\n",
        transform("T1")
    );
    let component = compile_with_level(&body, 1).unwrap();
    let unit = unit(&component);

    let tests = &unit.return_points[0].or_expr.and_exprs[0].test_exprs;
    assert_eq!(tests.len(), 2);

    // `nin[b, c]` subtracts from `in[a, b]`, leaving one value, which
    // rewrites `in` to `eq`.
    let merged_into = &tests[0];
    assert_eq!(merged_into.op, "eq");
    assert_eq!(merged_into.values, vec!["a"]);
    assert_eq!(merged_into.reverse_op, "neq");
    assert_eq!(merged_into.merged_children.len(), 1);
    let child = &merged_into.merged_children[0];
    assert_eq!(child.op, "nin");
    assert!(child.is_merged);
    assert!(tests[1].is_merged);
}

#[test]
fn test_dismissal_gate_blocks_merging_at_level_two() {
    let body = format!(
        "if test(\"Country\", \"in\", \"a\", \"b\") as \"inab\" && test(\"Country\", \"nin\", \"b\", \"c\") as \"ninbc\" {{\n{}\n}}\nreturn\n",
        transform("T1")
    );
    let component = compile(&body).unwrap();
    let unit = unit(&component);

    // With dismissal on, the `in[a, b]` literal is proven by an earlier
    // row's failure and gets dismissed; a dismissed test never merges
    // with a live one, so both stay intact.
    let tests = &unit.return_points[0].or_expr.and_exprs[0].test_exprs;
    assert_eq!(tests.len(), 2);
    assert!(tests[0].is_dismissed);
    assert!(!tests[0].is_merged);
    assert_eq!(tests[0].values, vec!["a", "b"]);
    assert!(!tests[1].is_dismissed);
    assert_eq!(tests[1].values, vec!["b", "c"]);
    check_invariants(unit);
}

// ── Or-conditions and dismissal ──

#[test]
fn test_or_rewriting_feeds_dismissal() {
    let body = format!(
        "if test(\"Country\", \"eq\", \"US\") as \"us\" || test(\"Region\", \"eq\", \"na\") as \"na\" {{\n{}\n}}\n{}\n",
        transform("T1"),
        transform("T2")
    );
    let component = compile(&body).unwrap();
    let unit = unit(&component);

    let t1 = &unit.return_points[0];
    assert_eq!(t1.or_expr.and_exprs.len(), 2);

    // Second disjunct carries the planted ¬us, which ranking turns into
    // a dismissed literal: by the time the row runs, us already failed.
    let second = &t1.or_expr.and_exprs[1].test_exprs;
    assert_eq!(second.len(), 2);
    assert!(second[0].is_negative);
    assert!(second[0].is_dismissed);
    assert!(!second[1].is_dismissed);

    let t2_tests = &unit.return_points[1].or_expr.and_exprs[0].test_exprs;
    assert!(t2_tests.iter().all(|t| t.is_dismissed));
    check_invariants(unit);
}

// ── Optimization levels ──

#[test]
fn test_level_zero_keeps_contradictions() {
    let body = format!(
        "if test(\"Country\", \"eq\", \"US\") as \"a\" && test(\"Country\", \"neq\", \"US\") as \"b\" {{\n{}\n}}\n{}\n",
        transform("T1"),
        transform("T2")
    );
    let component = compile_with_level(&body, 0).unwrap();
    let unit = unit(&component);

    assert_eq!(unit.return_points.len(), 2);
    let t1_tests = &unit.return_points[0].or_expr.and_exprs[0].test_exprs;
    assert_eq!(t1_tests.len(), 2);
    assert_eq!(t1_tests[0].test_id, -t1_tests[1].test_id);
    assert!(t1_tests.iter().all(|t| !t.is_dismissed && !t.is_merged));
}

#[test]
fn test_level_one_reduces_without_dismissal() {
    let body = format!(
        "if test(\"Country\", \"eq\", \"US\") as \"us\" {{\n{}\n}}\nreturn\n",
        transform("T1")
    );
    let component = compile_with_level(&body, 1).unwrap();
    let unit = unit(&component);

    for return_point in &unit.return_points {
        for and_expr in &return_point.or_expr.and_exprs {
            assert!(and_expr.test_exprs.iter().all(|t| !t.is_dismissed));
        }
    }
}

// ── Defaults ──

#[test]
fn test_default_transform_list_is_collected_last() {
    let body = format!(
        "if test(\"Country\", \"eq\", \"US\") as \"us\" {{\n{}\n}}\nreturn\n",
        transform("T1")
    );
    let source = format!(
        "component demo\nbundle main {{\nunit decide default {} {{\n{}\n}}\n}}\n",
        transform("DFT"),
        body
    );
    let mut keys = registry();
    let ops = TestOpRegistry::builtin();
    let component = compile_source(
        &source,
        "<unnamed>",
        "<unnamed>",
        &mut keys,
        &ops,
        &CompileOptions::default(),
    )
    .unwrap();
    let unit = unit(&component);

    assert_eq!(unit.return_points.len(), 2);
    assert_eq!(annotation(&unit.return_points[0]), "T1");
    assert_eq!(annotation(&unit.return_points[1]), "DFT");
}

// ── Algebraic laws ──

fn row_signature(return_point: &ReturnPoint) -> Vec<Vec<(i32, String, Vec<String>, bool, bool)>> {
    return_point
        .or_expr
        .and_exprs
        .iter()
        .map(|and_expr| {
            and_expr
                .test_exprs
                .iter()
                .map(|t| {
                    (
                        t.test_id,
                        t.op.clone(),
                        t.values.clone(),
                        t.is_negative,
                        t.is_dismissed,
                    )
                })
                .collect()
        })
        .collect()
}

#[test]
fn test_de_morgan_equivalence() {
    let negated_and = format!(
        "if !(test(\"Country\", \"eq\", \"US\") as \"us\" && test(\"Region\", \"eq\", \"na\") as \"na\") {{\n{}\n}}\nreturn\n",
        transform("T1")
    );
    let or_of_negations = format!(
        "if !test(\"Country\", \"eq\", \"US\") as \"us\" || !test(\"Region\", \"eq\", \"na\") as \"na\" {{\n{}\n}}\nreturn\n",
        transform("T1")
    );

    let a = compile(&negated_and).unwrap();
    let b = compile(&or_of_negations).unwrap();
    assert_eq!(
        row_signature(&unit(&a).return_points[0]),
        row_signature(&unit(&b).return_points[0])
    );
}

#[test]
fn test_switch_and_if_in_agree_on_default_guard() {
    let switch_body = format!(
        "switch get(\"Region\") {{\ncase \"a\" as \"ra\", \"b\" as \"rb\":\n{}\ndefault:\n{}\n}}\n",
        transform("T1"),
        transform("T2")
    );
    let if_body = format!(
        "if test(\"Region\", \"in\", \"a\", \"b\") as \"ab\" {{\n{}\n}}\n{}\n",
        transform("T1"),
        transform("T2")
    );

    let from_switch = compile(&switch_body).unwrap();
    let from_if = compile(&if_body).unwrap();

    let guard_of = |component: &Component| -> (bool, HashSet<String>) {
        let unit = &component.bundles[0].units[0];
        let t2 = &unit.return_points[1];
        let test = &t2.or_expr.and_exprs[0].test_exprs[0];
        (
            test.is_negative,
            test.real_values().iter().cloned().collect(),
        )
    };

    // Modulo merging, both forms guard the fallback with the negation of
    // membership in {a, b}.
    let (switch_negative, switch_values) = guard_of(&from_switch);
    let (if_negative, if_values) = guard_of(&from_if);
    assert!(switch_negative && if_negative);
    assert_eq!(switch_values, if_values);
}

// ── Scope checks ──

#[test]
fn test_duplicate_bundle_name_is_rejected() {
    let source = format!(
        "component demo\nbundle main {{\nunit u {{\n{t}\n}}\n}}\nbundle main {{\nunit u {{\n{t}\n}}\n}}\n",
        t = transform("T1")
    );
    let mut keys = registry();
    let ops = TestOpRegistry::builtin();
    let err = compile_source(
        &source,
        "<unnamed>",
        "<unnamed>",
        &mut keys,
        &ops,
        &CompileOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        CompileError::Analyze(AnalyzeError::DuplicateBundleName { ref name, .. }) if name == "main"
    ));
}

#[test]
fn test_duplicate_unit_name_is_rejected() {
    let source = format!(
        "component demo\nbundle main {{\nunit u {{\n{t}\n}}\nunit u {{\n{t}\n}}\n}}\n",
        t = transform("T1")
    );
    let mut keys = registry();
    let ops = TestOpRegistry::builtin();
    let err = compile_source(
        &source,
        "<unnamed>",
        "<unnamed>",
        &mut keys,
        &ops,
        &CompileOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        CompileError::Analyze(AnalyzeError::DuplicateUnitName { ref name, .. }) if name == "u"
    ));
}

// ── Determinism ──

#[test]
fn test_same_input_gives_identical_ir() {
    let body = format!(
        "switch get(\"Region\") {{\ncase \"a\" as \"ra\", \"b\" as \"rb\":\n{}\ndefault:\n{}\n}}\n",
        transform("T1"),
        transform("T2")
    );
    let first = compile(&body).unwrap();
    let second = compile(&body).unwrap();
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}
