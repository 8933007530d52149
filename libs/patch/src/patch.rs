//! RFC 6902 JSON Patch
//!
//! Operations are parsed into `json_patch` operations once their pointers
//! have been checked, then applied one by one to a working copy of the
//! target. The first failing operation aborts the whole application and the
//! caller's document is left exactly as it was. `test` compares numbers by
//! value, so `1` matches `1.0`.

use serde_json::{Number, Value};

use crate::error::{PatchError, Result};
use crate::pointer::JsonPointer;

pub use json_patch::PatchOperation;

/// An ordered list of JSON Patch operations.
#[derive(Debug, Clone, PartialEq)]
pub struct Patch(pub json_patch::Patch);

impl Patch {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| PatchError::Malformed(format!("invalid JSON: {e}")))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Array(items) = value else {
            return Err(PatchError::Malformed(
                "JSON Patch document must be an array of operations".to_string(),
            ));
        };

        items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                check_pointers(index, &item)?;
                serde_json::from_value::<PatchOperation>(item)
                    .map_err(|e| PatchError::Malformed(format!("operation {index}: {e}")))
            })
            .collect::<Result<Vec<_>>>()
            .map(|ops| Patch(json_patch::Patch(ops)))
    }

    pub fn operations(&self) -> &[PatchOperation] {
        &self.0 .0
    }

    pub fn is_empty(&self) -> bool {
        self.operations().is_empty()
    }

    /// Apply to a copy of `doc` and return the patched copy.
    pub fn apply(&self, doc: &Value) -> Result<Value> {
        let mut working = doc.clone();
        for (index, op) in self.operations().iter().enumerate() {
            apply_operation(&mut working, index, op)?;
        }
        Ok(working)
    }

    /// Apply in place. `doc` is only replaced once every operation succeeded.
    pub fn apply_in_place(&self, doc: &mut Value) -> Result<()> {
        *doc = self.apply(doc)?;
        Ok(())
    }
}

/// Parse and apply in one step.
pub fn apply_patch(doc: &Value, patch: &Value) -> Result<Value> {
    Patch::from_value(patch.clone())?.apply(doc)
}

// `path` and `from` must be RFC 6901 pointers. Anything else about the
// operation is left to its deserializer.
fn check_pointers(index: usize, item: &Value) -> Result<()> {
    for member in ["path", "from"] {
        if let Some(raw) = item.get(member).and_then(Value::as_str) {
            JsonPointer::parse(raw).map_err(|_| PatchError::InvalidPointer {
                index,
                pointer: raw.to_string(),
            })?;
        }
    }
    Ok(())
}

fn apply_operation(doc: &mut Value, index: usize, op: &PatchOperation) -> Result<()> {
    if let PatchOperation::Test(test) = op {
        let path = test.path.to_string();
        return match doc.pointer(&path) {
            Some(actual) if json_equal(actual, &test.value) => Ok(()),
            _ => Err(PatchError::TestFailed { index, path }),
        };
    }

    json_patch::patch(doc, std::slice::from_ref(op)).map_err(|e| match e.kind {
        json_patch::PatchErrorKind::TestFailed => PatchError::TestFailed {
            index,
            path: e.path.to_string(),
        },
        json_patch::PatchErrorKind::CannotMoveInsideItself => match op {
            PatchOperation::Move(mv) => PatchError::MoveIntoDescendant {
                index,
                from: mv.from.to_string(),
                path: mv.path.to_string(),
            },
            _ => PatchError::PathNotFound {
                index,
                path: e.path.to_string(),
            },
        },
        _ => PatchError::PathNotFound {
            index,
            path: e.path.to_string(),
        },
    })
}

/// Structural equality as RFC 6902 `test` defines it: numbers compare by
/// value (`1` equals `1.0`), object member order is irrelevant, array order is
/// not.
pub fn json_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| json_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| json_equal(v, other)))
        }
        _ => a == b,
    }
}

fn numbers_equal(x: &Number, y: &Number) -> bool {
    if let (Some(a), Some(b)) = (x.as_i64(), y.as_i64()) {
        return a == b;
    }
    if let (Some(a), Some(b)) = (x.as_u64(), y.as_u64()) {
        return a == b;
    }
    match (x.as_f64(), y.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patch(ops: Value) -> Patch {
        Patch::from_value(ops).unwrap()
    }

    #[test]
    fn test_then_replace_succeeds_on_match() {
        let doc = json!({"status": "active"});
        let p = patch(json!([
            {"op": "test", "path": "/status", "value": "active"},
            {"op": "replace", "path": "/status", "value": "inactive"}
        ]));
        assert_eq!(p.apply(&doc).unwrap(), json!({"status": "inactive"}));
    }

    #[test]
    fn test_failure_aborts_and_leaves_input_untouched() {
        let mut doc = json!({"status": "draft"});
        let p = patch(json!([
            {"op": "replace", "path": "/status", "value": "inactive"},
            {"op": "test", "path": "/status", "value": "active"}
        ]));
        let err = p.apply_in_place(&mut doc).unwrap_err();
        assert_eq!(
            err,
            PatchError::TestFailed {
                index: 1,
                path: "/status".into()
            }
        );
        assert_eq!(doc, json!({"status": "draft"}));
    }

    #[test]
    fn add_dash_appends() {
        let doc = json!({"tags": ["a"]});
        let p = patch(json!([{"op": "add", "path": "/tags/-", "value": "b"}]));
        assert_eq!(p.apply(&doc).unwrap(), json!({"tags": ["a", "b"]}));
    }

    #[test]
    fn add_inserts_and_shifts() {
        let doc = json!({"a": [1, 3]});
        let p = patch(json!([
            {"op": "add", "path": "/a/1", "value": 2},
            {"op": "add", "path": "/a/3", "value": 4}
        ]));
        assert_eq!(p.apply(&doc).unwrap(), json!({"a": [1, 2, 3, 4]}));
    }

    #[test]
    fn add_past_end_is_not_found() {
        let doc = json!({"a": [1]});
        let p = patch(json!([{"op": "add", "path": "/a/2", "value": 2}]));
        assert!(matches!(
            p.apply(&doc),
            Err(PatchError::PathNotFound { index: 0, .. })
        ));
    }

    #[test]
    fn add_requires_existing_parent() {
        let doc = json!({});
        let p = patch(json!([{"op": "add", "path": "/a/b", "value": 1}]));
        assert_eq!(
            p.apply(&doc).unwrap_err(),
            PatchError::PathNotFound {
                index: 0,
                path: "/a/b".into()
            }
        );
    }

    #[test]
    fn add_at_root_replaces_document() {
        let p = patch(json!([{"op": "add", "path": "", "value": [1]}]));
        assert_eq!(p.apply(&json!({"x": 1})).unwrap(), json!([1]));
    }

    #[test]
    fn remove_shifts_left() {
        let doc = json!({"a": [1, 2, 3]});
        let p = patch(json!([{"op": "remove", "path": "/a/0"}]));
        assert_eq!(p.apply(&doc).unwrap(), json!({"a": [2, 3]}));
    }

    #[test]
    fn remove_root_is_rejected() {
        let p = patch(json!([{"op": "remove", "path": ""}]));
        assert!(matches!(
            p.apply(&json!({})),
            Err(PatchError::PathNotFound { .. })
        ));
    }

    #[test]
    fn replace_missing_is_not_found() {
        let p = patch(json!([{"op": "replace", "path": "/nope", "value": 1}]));
        assert!(matches!(
            p.apply(&json!({})),
            Err(PatchError::PathNotFound { .. })
        ));
    }

    #[test]
    fn move_and_copy() {
        let doc = json!({"a": {"b": 1}, "c": []});
        let p = patch(json!([
            {"op": "copy", "from": "/a/b", "path": "/c/-"},
            {"op": "move", "from": "/a", "path": "/d"}
        ]));
        assert_eq!(p.apply(&doc).unwrap(), json!({"c": [1], "d": {"b": 1}}));
    }

    #[test]
    fn move_into_descendant_fails() {
        let p = patch(json!([{"op": "move", "from": "/a", "path": "/a/b"}]));
        assert!(matches!(
            p.apply(&json!({"a": {}})),
            Err(PatchError::MoveIntoDescendant { index: 0, .. })
        ));
    }

    #[test]
    fn move_to_same_location_is_noop() {
        let doc = json!({"a": 1});
        let p = patch(json!([{"op": "move", "from": "/a", "path": "/a"}]));
        assert_eq!(p.apply(&doc).unwrap(), doc);
    }

    #[test]
    fn test_compares_numbers_numerically() {
        let doc = json!({"n": 1.0});
        let p = patch(json!([{"op": "test", "path": "/n", "value": 1}]));
        assert!(p.apply(&doc).is_ok());
    }

    #[test]
    fn test_on_missing_path_fails() {
        let p = patch(json!([{"op": "test", "path": "/x", "value": null}]));
        assert!(matches!(
            p.apply(&json!({})),
            Err(PatchError::TestFailed { .. })
        ));
    }

    #[test]
    fn leading_zero_index_never_resolves() {
        let doc = json!({"a": [1, 2]});
        let p = patch(json!([{"op": "replace", "path": "/a/01", "value": 0}]));
        assert!(p.apply(&doc).is_err());
    }

    #[test]
    fn malformed_documents() {
        assert!(matches!(
            Patch::from_value(json!({"op": "add"})),
            Err(PatchError::Malformed(_))
        ));
        assert!(matches!(
            Patch::from_value(json!([{"op": "frobnicate", "path": "/a"}])),
            Err(PatchError::Malformed(_))
        ));
        assert!(matches!(
            Patch::from_value(json!([{"op": "add", "path": "/a"}])),
            Err(PatchError::Malformed(_))
        ));
        assert!(matches!(
            Patch::from_slice(b"not json"),
            Err(PatchError::Malformed(_))
        ));
    }

    #[test]
    fn explicit_null_value_is_allowed() {
        let p = patch(json!([{"op": "add", "path": "/a", "value": null}]));
        assert_eq!(p.apply(&json!({})).unwrap(), json!({"a": null}));
    }

    #[test]
    fn invalid_pointer_reports_index() {
        let err = Patch::from_value(json!([
            {"op": "test", "path": "", "value": {}},
            {"op": "remove", "path": "a"}
        ]))
        .unwrap_err();
        assert_eq!(
            err,
            PatchError::InvalidPointer {
                index: 1,
                pointer: "a".into()
            }
        );
    }

    #[test]
    fn failing_operation_reports_its_own_index() {
        let doc = json!({"a": 1});
        let p = patch(json!([
            {"op": "replace", "path": "/a", "value": 2},
            {"op": "add", "path": "/b", "value": 3},
            {"op": "remove", "path": "/missing"}
        ]));
        assert_eq!(p.operations().len(), 3);
        assert_eq!(
            p.apply(&doc).unwrap_err(),
            PatchError::PathNotFound {
                index: 2,
                path: "/missing".into()
            }
        );
    }

    #[test]
    fn move_into_descendant_names_both_pointers() {
        let p = patch(json!([
            {"op": "test", "path": "/a", "value": {}},
            {"op": "move", "from": "/a", "path": "/a/b"}
        ]));
        assert_eq!(
            p.apply(&json!({"a": {}})).unwrap_err(),
            PatchError::MoveIntoDescendant {
                index: 1,
                from: "/a".into(),
                path: "/a/b".into()
            }
        );
    }

    #[test]
    fn json_equal_ignores_member_order() {
        assert!(json_equal(&json!({"a": 1, "b": 2}), &json!({"b": 2, "a": 1})));
        assert!(!json_equal(&json!([1, 2]), &json!([2, 1])));
        assert!(!json_equal(&json!("1"), &json!(1)));
    }
}
