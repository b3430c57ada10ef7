use crate::models::{Record, Value};

/// `{"lat": 52.2, "lon": 0.1}` becomes `52.2, 0.1`. Anything that is not a
/// JSON object with both keys is returned unchanged, blanks become empty.
pub fn format_coordinates(value: &Value) -> Value {
    let Some(raw) = value.text().filter(|t| !t.is_empty()) else {
        return Value::Text(String::new());
    };

    match serde_json::from_str::<serde_json::Value>(&raw) {
        Ok(serde_json::Value::Object(map)) => match (map.get("lat"), map.get("lon")) {
            (Some(lat), Some(lon)) => Value::Text(format!("{}, {}", plain(lat), plain(lon))),
            _ => value.clone(),
        },
        _ => value.clone(),
    }
}

fn plain(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Rewrite `column` in place on every row that has it. Returns the number of
/// rows whose value changed.
pub fn apply(records: &mut [Record], column: &str) -> usize {
    let mut changed = 0;
    for record in records.iter_mut().filter(|r| r.contains(column)) {
        let formatted = format_coordinates(record.get(column));
        if &formatted != record.get(column) {
            changed += 1;
            record.set(column, formatted);
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_object_is_flattened() {
        let value = Value::from(r#"{"lat": 52.25, "lon": 0.12}"#);
        assert_eq!(format_coordinates(&value), Value::from("52.25, 0.12"));

        let value = Value::from(r#"{"lat": "52.25", "lon": "0.12"}"#);
        assert_eq!(format_coordinates(&value), Value::from("52.25, 0.12"));
    }

    #[test]
    fn test_other_values_untouched() {
        let value = Value::from("52.25, 0.12");
        assert_eq!(format_coordinates(&value), value);
        let value = Value::from(r#"{"x": 1}"#);
        assert_eq!(format_coordinates(&value), value);
        assert_eq!(format_coordinates(&Value::Null), Value::from(""));
    }

    #[test]
    fn test_apply_counts_changes() {
        let mut records = vec![
            Record::from_pairs([("spatial_coordinates", r#"{"lat": 1, "lon": 2}"#)]),
            Record::from_pairs([("spatial_coordinates", "1, 2")]),
            Record::new(),
        ];
        assert_eq!(apply(&mut records, "spatial_coordinates"), 1);
        assert_eq!(records[0].get("spatial_coordinates"), &Value::from("1, 2"));
        assert!(!records[2].contains("spatial_coordinates"));
    }
}
