//! Flattening of nested objects into column-shaped records.

use serde_json::Value;

use crate::core::Object;

/// Separator between path segments of nested keys.
pub const PATH_SEPARATOR: &str = "_";

/// Flatten nested objects: `{"a": {"b": 1}}` becomes `{"a_b": 1}`. Arrays
/// are kept as values (stored as JSON), empty nested objects are omitted.
/// Later keys win when two paths flatten to the same name.
pub fn flatten(object: &Object) -> Object {
    let mut out = Object::new();
    flatten_into(&mut out, "", object);
    out
}

fn flatten_into(out: &mut Object, prefix: &str, object: &Object) {
    for (key, value) in object {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}{}{}", prefix, PATH_SEPARATOR, key)
        };
        match value {
            Value::Object(nested) => flatten_into(out, &name, nested),
            other => {
                out.insert(name, other.clone());
            }
        }
    }
}
