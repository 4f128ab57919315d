use serde_json::{Map, Value};

/// Open property bag: an ordered string-to-variant map. Unknown keys pass
/// through untouched, both for caller-supplied gateway overrides and for the
/// raw fields a gateway hands back.
pub type Properties = Map<String, Value>;

pub fn find_str<'a>(props: &'a Properties, key: &str) -> Option<&'a str> {
    props.get(key).and_then(Value::as_str)
}

pub fn find_i64(props: &Properties, key: &str) -> Option<i64> {
    match props.get(key) {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}

pub fn find_f64(props: &Properties, key: &str) -> Option<f64> {
    match props.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}

/// Loose boolean normalization: gateways and callers send booleans as
/// booleans, strings or numbers depending on the day.
pub fn find_bool(props: &Properties, key: &str) -> Option<bool> {
    match props.get(key) {
        Some(Value::Bool(b)) => Some(*b),
        Some(Value::String(s)) => match s.as_str() {
            "true" | "TRUE" | "yes" | "1" => Some(true),
            "false" | "FALSE" | "no" | "0" => Some(false),
            _ => None,
        },
        Some(Value::Number(n)) => n.as_i64().map(|v| v != 0),
        _ => None,
    }
}

/// Walks a nested path into a raw gateway payload, e.g.
/// `extract(&raw, &["card", "id"])`.
pub fn extract<'a>(raw: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut cur = raw;
    for key in path {
        cur = cur.as_object()?.get(*key)?;
    }
    Some(cur)
}

pub fn extract_str<'a>(raw: &'a Value, path: &[&str]) -> Option<&'a str> {
    extract(raw, path).and_then(Value::as_str)
}

pub fn extract_i64(raw: &Value, path: &[&str]) -> Option<i64> {
    extract(raw, path).and_then(Value::as_i64)
}
