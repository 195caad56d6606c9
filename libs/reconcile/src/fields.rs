//! Mutable field sets.
//!
//! A [`FieldSet`] names the parts of a child's body that the controller owns
//! after creation. Updates overwrite exactly these fields from freshly computed
//! desired content and leave everything else (server defaults, fields written
//! by other controllers) as found on the live object.

use serde_json::{Map, Value};

/// Set of JSON pointers (RFC 6901) into an object body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSet {
    pointers: Vec<String>,
}

impl FieldSet {
    /// Creates a field set from pointers such as `/spec/replicas`.
    pub fn new<I, S>(pointers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pointers: pointers.into_iter().map(Into::into).collect(),
        }
    }

    /// A field set that owns nothing beyond labels and annotations.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Adds a pointer, builder style.
    pub fn with(mut self, pointer: impl Into<String>) -> Self {
        self.pointers.push(pointer.into());
        self
    }

    pub fn pointers(&self) -> &[String] {
        &self.pointers
    }

    pub fn is_empty(&self) -> bool {
        self.pointers.is_empty()
    }

    /// Merges `desired` into a copy of `live`.
    ///
    /// For each pointer the desired value replaces the live one; a pointer
    /// missing from `desired` removes the field from the result. Intermediate
    /// objects are created as needed. Pointers only traverse object members.
    pub fn apply(&self, desired: &Value, live: &Value) -> Value {
        let mut merged = live.clone();
        for pointer in &self.pointers {
            let tokens = tokens(pointer);
            match desired.pointer(pointer) {
                Some(value) => set(&mut merged, &tokens, value.clone()),
                None => remove(&mut merged, &tokens),
            }
        }
        merged
    }
}

fn tokens(pointer: &str) -> Vec<String> {
    if pointer.is_empty() {
        return Vec::new();
    }
    pointer
        .trim_start_matches('/')
        .split('/')
        .map(|t| t.replace("~1", "/").replace("~0", "~"))
        .collect()
}

fn set(target: &mut Value, tokens: &[String], value: Value) {
    let Some((last, parents)) = tokens.split_last() else {
        *target = value;
        return;
    };

    let mut cursor = target;
    for token in parents {
        if !cursor.is_object() {
            *cursor = Value::Object(Map::new());
        }
        let Value::Object(map) = cursor else {
            return;
        };
        cursor = map
            .entry(token.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    if !cursor.is_object() {
        *cursor = Value::Object(Map::new());
    }
    if let Value::Object(map) = cursor {
        map.insert(last.clone(), value);
    }
}

fn remove(target: &mut Value, tokens: &[String]) {
    let Some((last, parents)) = tokens.split_last() else {
        *target = Value::Null;
        return;
    };

    let mut cursor = target;
    for token in parents {
        match cursor.get_mut(token.as_str()) {
            Some(next) => cursor = next,
            None => return,
        }
    }
    if let Value::Object(map) = cursor {
        map.remove(last);
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_apply_overwrites_only_listed_fields() {
        let fields = FieldSet::new(["/spec/replicas", "/spec/template"]);
        let desired = json!({"spec": {"replicas": 3, "template": {"image": "v2"}}});
        let live = json!({
            "spec": {
                "replicas": 1,
                "template": {"image": "v1"},
                "progressDeadlineSeconds": 600
            }
        });

        let merged = fields.apply(&desired, &live);
        assert_eq!(
            merged,
            json!({
                "spec": {
                    "replicas": 3,
                    "template": {"image": "v2"},
                    "progressDeadlineSeconds": 600
                }
            })
        );
    }

    #[test]
    fn test_apply_removes_fields_absent_from_desired() {
        let fields = FieldSet::new(["/spec/replicas"]);
        let merged = fields.apply(&json!({"spec": {}}), &json!({"spec": {"replicas": 2}}));
        assert_eq!(merged, json!({"spec": {}}));
    }

    #[test]
    fn test_apply_creates_intermediate_objects() {
        let fields = FieldSet::empty().with("/data");
        let merged = fields.apply(&json!({"data": {"a": "1"}}), &json!({}));
        assert_eq!(merged, json!({"data": {"a": "1"}}));
    }

    #[test]
    fn test_escaped_tokens() {
        let fields = FieldSet::new(["/metadata/a~1b"]);
        let desired = json!({"metadata": {"a/b": "x"}});
        let merged = fields.apply(&desired, &json!({}));
        assert_eq!(merged, desired);
    }

    #[test]
    fn test_root_pointer_replaces_everything() {
        let fields = FieldSet::new([""]);
        let merged = fields.apply(&json!({"spec": 1}), &json!({"spec": 2, "extra": true}));
        assert_eq!(merged, json!({"spec": 1}));
    }

    proptest! {
        #[test]
        fn prop_apply_is_idempotent(replicas in 0i64..100, image in "[a-z]{1,8}", extra in any::<bool>()) {
            let fields = FieldSet::new(["/spec/replicas", "/spec/image"]);
            let desired = json!({"spec": {"replicas": replicas, "image": image}});
            let live = json!({"spec": {"replicas": 0, "paused": extra}});

            let once = fields.apply(&desired, &live);
            let twice = fields.apply(&desired, &once);
            prop_assert_eq!(&once, &twice);
            prop_assert_eq!(once.pointer("/spec/paused"), Some(&json!(extra)));
        }
    }
}
