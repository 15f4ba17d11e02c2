use serde::de::DeserializeOwned;
use serde_json::Value;

/// Random hyphen-less uuid, used for stream ids and generated request ids
pub fn new_uuid() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Decode positional params into a tuple or struct.
///
/// A struct target accepts either a single object argument or the list
/// itself (serde maps sequences onto struct fields in order).
pub fn decode_params<T: DeserializeOwned>(params: &[Value]) -> Result<T, serde_json::Error> {
    if let [single @ Value::Object(_)] = params {
        if let Ok(value) = serde_json::from_value(single.clone()) {
            return Ok(value);
        }
    }
    serde_json::from_value(Value::Array(params.to_vec()))
}

/// Best JSON reading of a textual argument: bool, integer, float, array or
/// object, falling back to a plain string.
pub fn guess_json(input: &str) -> Value {
    let trimmed = input.trim();
    match trimmed {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" => return Value::Null,
        _ => {}
    }
    if let Ok(n) = trimmed.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if f.is_finite() {
            if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
                return value;
            }
            return Value::from(f);
        }
    }
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            return value;
        }
    }
    Value::String(input.to_string())
}

/// Apply [`guess_json`] to each argument
pub fn guess_json_array(inputs: &[impl AsRef<str>]) -> Vec<Value> {
    inputs.iter().map(|s| guess_json(s.as_ref())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn test_new_uuid_shape() {
        let id = new_uuid();
        assert_eq!(id.len(), 32);
        assert!(!id.contains('-'));
        assert_ne!(id, new_uuid());
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Point {
        x: i64,
        y: i64,
    }

    #[test]
    fn test_decode_params_tuple_and_struct() {
        let tuple: (i64, String) = decode_params(&[json!(1), json!("a")]).unwrap();
        assert_eq!(tuple, (1, "a".to_string()));

        let from_object: Point = decode_params(&[json!({"x": 1, "y": 2})]).unwrap();
        assert_eq!(from_object, Point { x: 1, y: 2 });

        let from_list: Point = decode_params(&[json!(3), json!(4)]).unwrap();
        assert_eq!(from_list, Point { x: 3, y: 4 });

        assert!(decode_params::<(i64, i64)>(&[json!("x"), json!(1)]).is_err());
    }

    #[test]
    fn test_guess_json() {
        assert_eq!(guess_json("true"), json!(true));
        assert_eq!(guess_json("42"), json!(42));
        assert_eq!(guess_json("-1.5"), json!(-1.5));
        assert_eq!(guess_json("[1,2]"), json!([1, 2]));
        assert_eq!(guess_json(r#"{"a":1}"#), json!({"a": 1}));
        assert_eq!(guess_json("hello"), json!("hello"));
        assert_eq!(guess_json("[broken"), json!("[broken"));
        assert_eq!(guess_json_array(&["1", "x"]), vec![json!(1), json!("x")]);
    }
}
