use serde_json::Value;

/// Resolve a dot-separated path through nested objects.
///
/// Numeric segments index into arrays (`items.0.sku`). Returns `None` when
/// any segment is missing.
pub fn get_field_value<'a>(path: &str, record: &'a Value) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    path.split('.').try_fold(record, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
