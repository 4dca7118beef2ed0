//! Bundle JSON writer and debug-map renderer.
//!
//! One JSON document per bundle: for each unit a `tree.match` list with
//! one entry per conjunction in index order, and a `target_values` list
//! with the enriched transform payload per return point. `__`-prefixed
//! fields carry human-readable context for reviewers; the runtime loader
//! ignores them. When the key registry declares a `TracePointIds` key,
//! trace-point conditions with globally increasing ids are woven between
//! the match conditions so production hits can be mapped back to rows.

use crate::compiler::analyzer::ir::{AndExpr, Bundle, Component, ReturnPoint, TestExpr, Unit};
use crate::compiler::keys::KeyRegistry;
use crate::compiler::ops::real_op;
use serde_json::{json, Value};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("output file {file_name:?} name conflicts")]
    OutputFileConflict { file_name: String },
    #[error("failed to write {file_name:?}: {source}")]
    Io {
        file_name: String,
        source: std::io::Error,
    },
}

pub struct BundleWriter<'a> {
    components: &'a [Component],
    trace_point_ids_key_index: i64,
    next_trace_point_id: i64,
}

impl<'a> BundleWriter<'a> {
    pub fn new(components: &'a [Component], key_registry: &KeyRegistry) -> Self {
        let trace_point_ids_key_index = key_registry
            .lookup_index("TracePointIds")
            .unwrap_or(0);
        Self {
            components,
            trace_point_ids_key_index,
            next_trace_point_id: 1,
        }
    }

    /// Writes `<bundle>.json` per bundle under `bundle_dir_name`, plus the
    /// optional debug map.
    pub fn write_bundles(
        &mut self,
        bundle_dir_name: &Path,
        debug_map_file_name: Option<&Path>,
    ) -> Result<(), EmitError> {
        let mut bundle_file_names: Vec<String> = Vec::new();
        let mut debug_map: Vec<String> = Vec::new();

        for component in self.components {
            for bundle in &component.bundles {
                let bundle_file_name = bundle_dir_name.join(format!("{}.json", bundle.name));
                let display_name = bundle_file_name.display().to_string();
                if bundle_file_names.contains(&display_name) {
                    return Err(EmitError::OutputFileConflict {
                        file_name: display_name,
                    });
                }
                bundle_file_names.push(display_name.clone());

                let bundle_value = self.dump_bundle(bundle, &mut debug_map);
                let data = to_pretty_string(&bundle_value);
                std::fs::write(&bundle_file_name, data).map_err(|source| EmitError::Io {
                    file_name: display_name,
                    source,
                })?;
            }
        }

        if let Some(file_name) = debug_map_file_name {
            std::fs::write(file_name, debug_map.join("\n")).map_err(|source| EmitError::Io {
                file_name: file_name.display().to_string(),
                source,
            })?;
        }

        Ok(())
    }

    pub fn dump_bundle(&mut self, bundle: &Bundle, debug_map: &mut Vec<String>) -> Value {
        let unit_list: Vec<Value> = bundle
            .units
            .iter()
            .map(|unit| self.dump_unit(unit, debug_map))
            .collect();
        Value::Array(unit_list)
    }

    fn dump_unit(&mut self, unit: &Unit, debug_map: &mut Vec<String>) -> Value {
        // Rows sorted back into global index order; each row remembers its
        // return point and its position in return-point-major order.
        let mut rows: Vec<(&AndExpr, usize, usize)> = Vec::new();
        let mut transform_list: Vec<Value> = Vec::new();
        for (return_point_index, return_point) in unit.return_points.iter().enumerate() {
            transform_list.push(dump_transform(return_point_index, return_point));
            for and_expr in &return_point.or_expr.and_exprs {
                let original_index = rows.len();
                rows.push((and_expr, return_point_index, original_index));
            }
        }
        rows.sort_by_key(|(and_expr, _, _)| and_expr.index);

        let debug_trace_point_id = self.next_trace_point_id;

        let match_list: Vec<Value> = rows
            .iter()
            .map(|(and_expr, return_point_index, _)| {
                self.dump_match(and_expr, *return_point_index)
            })
            .collect();

        self.render_debug_map(unit, &rows, debug_trace_point_id, debug_map);

        json!({
            "__unit_name__": unit.name,
            "tree": {
                "default_target_value_index": 0,
                "match": match_list,
            },
            "target_values": transform_list,
        })
    }

    fn dump_match(&mut self, and_expr: &AndExpr, return_point_index: usize) -> Value {
        let mut condition_list: Vec<Value> = Vec::new();
        let mut miss_final_trace_point = false;

        for test_expr in &and_expr.test_exprs {
            if test_expr.is_dismissed || test_expr.is_merged {
                continue;
            }

            let mut condition_tags = vec![make_condition_tag(test_expr)];
            for child in &test_expr.merged_children {
                condition_tags.push(make_condition_tag(child));
            }

            let op = if test_expr.is_negative {
                &test_expr.reverse_op
            } else {
                &test_expr.op
            };
            let op = real_op(op);

            let mut condition = json!({
                "__comment__": condition_tags.join("; "),
                "key": test_expr.key_index,
                "__named_key__": test_expr.key,
                "values": test_expr.underlying_values,
                "operator": op,
            });
            if test_expr.values != test_expr.underlying_values {
                condition["__named_values__"] = json!(test_expr.values);
            }

            if self.trace_point_ids_key_index >= 1 {
                condition_list.push(self.make_trace_point_condition());
                miss_final_trace_point = true;
            }
            condition_list.push(condition);
        }

        if miss_final_trace_point {
            condition_list.push(self.make_trace_point_condition());
        }

        json!({
            "condition_node": {
                "condition": condition_list,
                "condition_type": 0,
            },
            "target_value_index": return_point_index,
        })
    }

    fn make_trace_point_condition(&mut self) -> Value {
        let condition = json!({
            "__comment__": format!("trace point {}", self.next_trace_point_id),
            "key": self.trace_point_ids_key_index,
            "values": [self.next_trace_point_id.to_string()],
            "operator": "MatchOp_X/TracePoint/True",
        });
        self.next_trace_point_id += 1;
        condition
    }

    fn render_debug_map(
        &self,
        unit: &Unit,
        rows: &[(&AndExpr, usize, usize)],
        mut trace_point_id: i64,
        debug_map: &mut Vec<String>,
    ) {
        debug_map.push(format!("========== {} ==========", unit.name));

        for (and_expr, return_point_index, original_index) in rows {
            let mut condition_tags: Vec<String> = Vec::new();
            let mut miss_final_trace_point = false;

            for test_expr in &and_expr.test_exprs {
                if test_expr.is_merged {
                    continue;
                }

                let mut condition_tag = if test_expr.merged_children.is_empty() {
                    make_condition_tag(test_expr)
                } else {
                    let mut tag = format!("{{ {}", make_condition_tag(test_expr));
                    for child in &test_expr.merged_children {
                        tag.push_str("; ");
                        tag.push_str(&make_condition_tag(child));
                    }
                    tag.push_str(" }");
                    tag
                };

                if test_expr.is_dismissed {
                    condition_tag = format!("~~{condition_tag}");
                } else if self.trace_point_ids_key_index >= 1 {
                    condition_tag = format!("[{trace_point_id}] {condition_tag}");
                    trace_point_id += 1;
                    miss_final_trace_point = true;
                }

                condition_tags.push(condition_tag);
            }

            if miss_final_trace_point {
                if let Some(last) = condition_tags.last_mut() {
                    last.push_str(&format!(" [{trace_point_id}]"));
                }
                trace_point_id += 1;
            }

            debug_map.push(format!(
                "M{original_index} => T{return_point_index}: {}",
                condition_tags.join("; ")
            ));
        }

        debug_map.push(String::new());
    }
}

fn dump_transform(return_point_index: usize, return_point: &ReturnPoint) -> Value {
    let mut transforms: Vec<Value> = Vec::new();

    for transform in &return_point.transform_list {
        let mut operators: Vec<Value> = Vec::new();
        for operator in &transform.spec.operators {
            let mut operator_value = json!({"op": operator.op});
            if let Some(underlying_from) = &operator.underlying_from {
                operator_value["from"] = json!(underlying_from);
                operator_value["__named_from__"] = json!(operator.from);
            }
            if let Some(values) = &operator.values {
                operator_value["values"] = json!(values);
            }
            if let Some(underlying_op_type) = operator.underlying_op_type {
                operator_value["op_type"] = json!(underlying_op_type);
                operator_value["__named_op_type__"] = json!(operator.op_type);
            }
            operators.push(operator_value);
        }

        transforms.push(json!({
            "__comment__": transform.annotation,
            "to": transform.spec.underlying_to,
            "__named_to__": transform.spec.to,
            "operators": operators,
        }));
    }

    json!({
        "__target_value_index__": return_point_index,
        "items": transforms,
    })
}

fn make_condition_tag(test_expr: &TestExpr) -> String {
    if test_expr.is_negative {
        format!("❌ {}", test_expr.fact)
    } else {
        format!("✅ {}", test_expr.fact)
    }
}

fn to_pretty_string(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}
