//! Utility helpers shared across layers.

macro_rules! log {
    ($($tt:tt)*) => {
        {
            #[cfg(feature = "log")]
            log::error!($($tt)*);
            #[cfg(not(feature = "log"))]
            eprintln!($($tt)*);
        }
    };
}

pub(crate) use log;

use serde_json::Value;

/// Format a single pivot value as a wire atom.
///
/// Strings pass through, numbers and booleans render in their canonical
/// form, anything structured falls back to its JSON text.
pub(crate) fn atom(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                itoa::Buffer::new().format(i).to_owned()
            } else if let Some(u) = n.as_u64() {
                itoa::Buffer::new().format(u).to_owned()
            } else {
                n.to_string()
            }
        }
        Value::Bool(true) => "true".to_owned(),
        Value::Bool(false) => "false".to_owned(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Expand a pivot value into zero or more wire atoms.
///
/// Arrays become one atom per element (repeated keys on the wire), `null`
/// becomes none, everything else a single atom.
pub(crate) fn atoms(value: &Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().map(atom).collect(),
        other => vec![atom(other)],
    }
}

/// Whether a pivot value counts as empty for `omitempty` and default
/// purposes. Zero numbers and `false` are empty, mirroring the wire side
/// where an absent atom leaves the typed field at its zero value.
pub(crate) fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f == 0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn atom_rendering() {
        assert_eq!(atom(&json!("hi")), "hi");
        assert_eq!(atom(&json!(42)), "42");
        assert_eq!(atom(&json!(-7)), "-7");
        assert_eq!(atom(&json!(1.5)), "1.5");
        assert_eq!(atom(&json!(true)), "true");
        assert_eq!(atom(&json!(null)), "");
    }

    #[test]
    fn atoms_expansion() {
        assert_eq!(atoms(&json!(null)), Vec::<String>::new());
        assert_eq!(atoms(&json!(["a", 1])), vec!["a".to_owned(), "1".to_owned()]);
        assert_eq!(atoms(&json!("x")), vec!["x".to_owned()]);
    }

    #[test]
    fn emptiness() {
        assert!(is_empty(&json!(null)));
        assert!(is_empty(&json!("")));
        assert!(is_empty(&json!([])));
        assert!(is_empty(&json!(0)));
        assert!(is_empty(&json!(0.0)));
        assert!(is_empty(&json!(false)));
        assert!(!is_empty(&json!(1)));
        assert!(!is_empty(&json!(true)));
        assert!(!is_empty(&json!("0")));
    }
}
