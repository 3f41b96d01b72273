//! Edge condition evaluation against job options.

use serde_json::{Map, Value};

/// Whether an edge guarded by `condition` is active.
///
/// `"key"` is active when option `key` is truthy; `"!key"` negates. An edge
/// without a condition is always active.
pub fn is_active(condition: Option<&str>, options: &Map<String, Value>) -> bool {
    let Some(condition) = condition.map(str::trim).filter(|c| !c.is_empty()) else {
        return true;
    };

    match condition.strip_prefix('!') {
        Some(key) => !truthy(options.get(key.trim())),
        None => truthy(options.get(condition)),
    }
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(Value::String(s)) => {
            let s = s.trim();
            !s.is_empty() && !s.eq_ignore_ascii_case("false") && s != "0"
        }
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
    }
}
