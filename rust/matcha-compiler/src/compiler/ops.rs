//! Metadata for the primitive test operators.
//!
//! Every operator has a reverse whose truth value is the negation over the
//! same key/values; the analyzer leans on that to give `gt`/`lte` (and
//! friends) one shared test identity. `equals_real_values` /
//! `unequals_real_values` mark the set-valued families whose value sets can
//! be compared and merged. Single-valued ops carrying a `multiple_op` are
//! normalized to the multi form on entry and rewritten back via `single_op`
//! when merging leaves one value.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OpRegistryError {
    #[error("failed to read test op file {file_name:?}: {source}")]
    Io {
        file_name: String,
        source: std::io::Error,
    },
    #[error("invalid test op data in {file_name:?}: {detail}")]
    InvalidData { file_name: String, detail: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestOpInfo {
    pub op: String,
    pub reverse_op: String,
    #[serde(default)]
    pub min_number_of_values: usize,
    #[serde(default)]
    pub max_number_of_values: Option<usize>,
    #[serde(default)]
    pub number_of_subkeys: usize,
    #[serde(default)]
    pub equals_real_values: bool,
    #[serde(default)]
    pub unequals_real_values: bool,
    #[serde(default)]
    pub multiple_op: Option<String>,
    #[serde(default)]
    pub single_op: Option<String>,
}

/// Single-valued op accepting exactly one value; the base most entries
/// adjust from.
fn op_info(op: &str, reverse_op: &str) -> TestOpInfo {
    TestOpInfo {
        op: op.to_string(),
        reverse_op: reverse_op.to_string(),
        min_number_of_values: 1,
        max_number_of_values: Some(1),
        number_of_subkeys: 0,
        equals_real_values: false,
        unequals_real_values: false,
        multiple_op: None,
        single_op: None,
    }
}

#[derive(Debug)]
pub struct TestOpRegistry {
    infos: HashMap<String, TestOpInfo>,
}

impl TestOpRegistry {
    /// The built-in operator table.
    pub fn builtin() -> Self {
        let mut infos = HashMap::new();
        let mut add = |name: &str, info: TestOpInfo| {
            infos.insert(name.to_string(), info);
        };

        add(
            "in",
            TestOpInfo {
                max_number_of_values: None,
                equals_real_values: true,
                single_op: Some("eq".to_string()),
                ..op_info("in", "nin")
            },
        );
        add(
            "nin",
            TestOpInfo {
                max_number_of_values: None,
                unequals_real_values: true,
                single_op: Some("neq".to_string()),
                ..op_info("nin", "in")
            },
        );
        add(
            "eq",
            TestOpInfo {
                equals_real_values: true,
                multiple_op: Some("in".to_string()),
                ..op_info("eq", "neq")
            },
        );
        add(
            "neq",
            TestOpInfo {
                unequals_real_values: true,
                multiple_op: Some("nin".to_string()),
                ..op_info("neq", "eq")
            },
        );
        add("gt", op_info("gt", "lte"));
        add("lte", op_info("lte", "gt"));
        add("lt", op_info("lt", "gte"));
        add("gte", op_info("gte", "lt"));
        add(
            "len_eq",
            TestOpInfo {
                equals_real_values: true,
                ..op_info("len_eq", "len_neq")
            },
        );
        add(
            "len_neq",
            TestOpInfo {
                unequals_real_values: true,
                ..op_info("len_neq", "len_eq")
            },
        );
        add("len_gt", op_info("len_gt", "len_lte"));
        add("len_lte", op_info("len_lte", "len_gt"));
        add("len_lt", op_info("len_lt", "len_gte"));
        add("len_gte", op_info("len_gte", "len_lt"));
        add(
            "v_in",
            TestOpInfo {
                max_number_of_values: None,
                single_op: Some("v_eq".to_string()),
                ..op_info("v_in", "v_nin")
            },
        );
        add(
            "v_nin",
            TestOpInfo {
                max_number_of_values: None,
                single_op: Some("v_neq".to_string()),
                ..op_info("v_nin", "v_in")
            },
        );
        add("v_in_list", op_info("v_in_list", "v_nin_list"));
        add("v_nin_list", op_info("v_nin_list", "v_in_list"));
        add(
            "v_eq",
            TestOpInfo {
                multiple_op: Some("v_in".to_string()),
                ..op_info("v_eq", "v_neq")
            },
        );
        add(
            "v_neq",
            TestOpInfo {
                multiple_op: Some("v_nin".to_string()),
                ..op_info("v_neq", "v_eq")
            },
        );
        add("v_gt", op_info("v_gt", "v_lte"));
        add("v_lte", op_info("v_lte", "v_gt"));
        add("v_lt", op_info("v_lt", "v_gte"));
        add("v_gte", op_info("v_gte", "v_lt"));
        add("v_len_eq", op_info("v_len_eq", "v_len_neq"));
        add("v_len_neq", op_info("v_len_neq", "v_len_eq"));
        add("v_len_gt", op_info("v_len_gt", "v_len_lte"));
        add("v_len_lte", op_info("v_len_lte", "v_len_gt"));
        add("v_len_lt", op_info("v_len_lt", "v_len_gte"));
        add("v_len_gte", op_info("v_len_gte", "v_len_lt"));
        add("has_substring", op_info("has_substring", "not_has_substring"));
        add("not_has_substring", op_info("not_has_substring", "has_substring"));
        add("regex", op_info("regex", "not_regex"));
        add("not_regex", op_info("not_regex", "regex"));
        add("has_prefix", op_info("has_prefix", "not_has_prefix"));
        add("not_has_prefix", op_info("not_has_prefix", "has_prefix"));
        add("has_suffix", op_info("has_suffix", "not_has_suffix"));
        add("not_has_suffix", op_info("not_has_suffix", "has_suffix"));
        // The v_ string-test aliases resolve to the plain ops; the value is
        // still read from the context by the runtime.
        add("v_has_substring", op_info("has_substring", "not_has_substring"));
        add("v_not_has_substring", op_info("not_has_substring", "has_substring"));
        add("v_regex", op_info("regex", "not_regex"));
        add("v_not_regex", op_info("not_regex", "regex"));
        add("v_has_prefix", op_info("has_prefix", "not_has_prefix"));
        add("v_not_has_prefix", op_info("not_has_prefix", "has_prefix"));
        add("v_has_suffix", op_info("has_suffix", "not_has_suffix"));
        add("v_not_has_suffix", op_info("not_has_suffix", "has_suffix"));

        Self { infos }
    }

    pub fn get(&self, op: &str) -> Option<&TestOpInfo> {
        self.infos.get(op)
    }

    /// Merges custom operator records over the built-ins.
    pub fn load_overlay_from_json(&mut self, data: &str) -> Result<(), serde_json::Error> {
        let custom_infos: Vec<TestOpInfo> = serde_json::from_str(data)?;
        for info in custom_infos {
            self.infos.insert(info.op.clone(), info);
        }
        Ok(())
    }

    pub fn load_overlay_from_file(&mut self, file_name: &Path) -> Result<(), OpRegistryError> {
        let data = std::fs::read_to_string(file_name).map_err(|source| OpRegistryError::Io {
            file_name: file_name.display().to_string(),
            source,
        })?;
        self.load_overlay_from_json(&data)
            .map_err(|source| OpRegistryError::InvalidData {
                file_name: file_name.display().to_string(),
                detail: source.to_string(),
            })
    }
}

/// Maps the list-membership aliases to the operator the runtime implements.
pub fn real_op(op: &str) -> &str {
    match op {
        "v_in_list" => "v_in",
        "v_nin_list" => "v_nin",
        _ => op,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_reversals_are_symmetric() {
        let registry = TestOpRegistry::builtin();
        for op in ["in", "eq", "gt", "lt", "len_eq", "has_prefix", "regex"] {
            let info = registry.get(op).unwrap();
            let reverse = registry.get(&info.reverse_op).unwrap();
            assert_eq!(reverse.reverse_op, info.op, "reverse of {op} round-trips");
        }
    }

    #[test]
    fn test_eq_normalizes_to_in_and_back() {
        let registry = TestOpRegistry::builtin();
        let eq = registry.get("eq").unwrap();
        assert_eq!(eq.multiple_op.as_deref(), Some("in"));
        let r#in = registry.get("in").unwrap();
        assert_eq!(r#in.single_op.as_deref(), Some("eq"));
        assert!(r#in.equals_real_values);
        assert_eq!(r#in.max_number_of_values, None);
    }

    #[test]
    fn test_v_aliases_resolve_to_plain_ops() {
        let registry = TestOpRegistry::builtin();
        assert_eq!(registry.get("v_regex").unwrap().op, "regex");
        assert_eq!(registry.get("v_has_suffix").unwrap().op, "has_suffix");
    }

    #[test]
    fn test_overlay_adds_and_replaces() {
        let mut registry = TestOpRegistry::builtin();
        registry
            .load_overlay_from_json(
                r#"[
                    {"op": "geo_in", "reverse_op": "geo_nin",
                     "min_number_of_values": 2, "number_of_subkeys": 1,
                     "equals_real_values": true}
                ]"#,
            )
            .unwrap();
        let info = registry.get("geo_in").unwrap();
        assert_eq!(info.number_of_subkeys, 1);
        assert!(info.equals_real_values);
    }

    #[test]
    fn test_overlay_rejects_unknown_fields() {
        let mut registry = TestOpRegistry::builtin();
        let result = registry
            .load_overlay_from_json(r#"[{"op": "x", "reverse_op": "y", "bogus": true}]"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_real_op_mapping() {
        assert_eq!(real_op("v_in_list"), "v_in");
        assert_eq!(real_op("v_nin_list"), "v_nin");
        assert_eq!(real_op("in"), "in");
    }
}
