//! Conversion from Python values to JSON.
//!
//! Accepts what the standard `json` encoder accepts with `allow_nan=False`:
//!
//! | Python | JSON |
//! |--------|------|
//! | `None` | `null` |
//! | `bool` | `true` / `false` |
//! | `int` | number (must fit `i64` or `u64`) |
//! | `float` | number (must be finite) |
//! | `str` | string |
//! | `list`, `tuple` | array |
//! | `dict` | object, keys stringified like `json.dumps` |
//!
//! Subclasses convert as their base type. Anything else is an error naming the
//! type.

use pyo3::prelude::*;
use pyo3::types::{PyBool, PyDict, PyFloat, PyList, PyLong, PyString, PyTuple};
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Containers nested deeper than this are rejected.
pub const MAX_DEPTH: usize = 256;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConvertError {
    #[error("Object of type {0} is not JSON serializable")]
    Unsupported(String),

    #[error("keys must be str, int, float, bool or None, not {0}")]
    Key(String),

    #[error("Out of range float values are not JSON compliant")]
    NonFinite,

    #[error("Integer out of range for JSON: {0}")]
    IntOutOfRange(String),

    #[error("Result nesting exceeds {MAX_DEPTH} levels")]
    TooDeep,

    #[error("String contains lone surrogate characters")]
    Surrogate,
}

/// Convert a Python value to JSON.
pub fn to_json(value: &PyAny) -> Result<Value, ConvertError> {
    convert(value, 0)
}

fn convert(value: &PyAny, depth: usize) -> Result<Value, ConvertError> {
    if depth > MAX_DEPTH {
        return Err(ConvertError::TooDeep);
    }

    if value.is_none() {
        return Ok(Value::Null);
    }
    // bool before int: `bool` subclasses `int`.
    if let Ok(b) = value.downcast::<PyBool>() {
        return Ok(Value::Bool(b.is_true()));
    }
    if value.is_instance_of::<PyLong>() {
        return int_to_number(value).map(Value::Number);
    }
    if let Ok(f) = value.downcast::<PyFloat>() {
        return Number::from_f64(f.value())
            .map(Value::Number)
            .ok_or(ConvertError::NonFinite);
    }
    if let Ok(s) = value.downcast::<PyString>() {
        return utf8(s).map(Value::String);
    }
    if let Ok(list) = value.downcast::<PyList>() {
        return list
            .iter()
            .map(|item| convert(item, depth + 1))
            .collect::<Result<_, _>>()
            .map(Value::Array);
    }
    if let Ok(tuple) = value.downcast::<PyTuple>() {
        return tuple
            .iter()
            .map(|item| convert(item, depth + 1))
            .collect::<Result<_, _>>()
            .map(Value::Array);
    }
    if let Ok(dict) = value.downcast::<PyDict>() {
        let mut map = Map::with_capacity(dict.len());
        for (k, v) in dict.iter() {
            map.insert(key_to_string(k)?, convert(v, depth + 1)?);
        }
        return Ok(Value::Object(map));
    }

    Err(ConvertError::Unsupported(type_name(value)))
}

fn int_to_number(value: &PyAny) -> Result<Number, ConvertError> {
    if let Ok(i) = value.extract::<i64>() {
        return Ok(Number::from(i));
    }
    if let Ok(u) = value.extract::<u64>() {
        return Ok(Number::from(u));
    }
    Err(ConvertError::IntOutOfRange(display(value)))
}

/// Strict UTF-8; lone surrogates cannot be encoded.
fn utf8(s: &PyString) -> Result<String, ConvertError> {
    s.to_str()
        .map(str::to_owned)
        .map_err(|_| ConvertError::Surrogate)
}

/// Stringify a dict key the way `json.dumps` does.
fn key_to_string(key: &PyAny) -> Result<String, ConvertError> {
    if let Ok(s) = key.downcast::<PyString>() {
        return utf8(s);
    }
    if key.is_none() {
        return Ok("null".to_string());
    }
    if let Ok(b) = key.downcast::<PyBool>() {
        return Ok(if b.is_true() { "true" } else { "false" }.to_string());
    }
    if key.is_instance_of::<PyLong>() {
        return Ok(display(key));
    }
    if let Ok(f) = key.downcast::<PyFloat>() {
        let f = f.value();
        return Ok(match f {
            f if f.is_nan() => "NaN".to_string(),
            f if f == f64::INFINITY => "Infinity".to_string(),
            f if f == f64::NEG_INFINITY => "-Infinity".to_string(),
            _ => key.repr().map(|r| r.to_string_lossy().into_owned()).unwrap_or_else(|_| f.to_string()),
        });
    }
    Err(ConvertError::Key(type_name(key)))
}

fn type_name(value: &PyAny) -> String {
    value
        .get_type()
        .name()
        .map(str::to_string)
        .unwrap_or_else(|_| "object".to_string())
}

fn display(value: &PyAny) -> String {
    value
        .str()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(expr: &str) -> Result<Value, ConvertError> {
        Python::with_gil(|py| {
            let value = py.eval(expr, None, None).unwrap();
            to_json(value)
        })
    }

    #[test]
    fn scalars() {
        assert_eq!(eval("None").unwrap(), Value::Null);
        assert_eq!(eval("True").unwrap(), json!(true));
        assert_eq!(eval("42").unwrap(), json!(42));
        assert_eq!(eval("-7").unwrap(), json!(-7));
        assert_eq!(eval("2**64 - 1").unwrap(), json!(u64::MAX));
        assert_eq!(eval("1.5").unwrap(), json!(1.5));
        assert_eq!(eval("'héllo'").unwrap(), json!("héllo"));
    }

    #[test]
    fn bool_is_not_an_int() {
        assert_eq!(eval("[True, 1]").unwrap(), json!([true, 1]));
    }

    #[test]
    fn containers() {
        assert_eq!(
            eval("{'a': [1, (2, 3)], 'b': {'c': None}}").unwrap(),
            json!({"a": [1, [2, 3]], "b": {"c": null}})
        );
    }

    #[test]
    fn keys_are_stringified() {
        assert_eq!(
            eval("{1: 'a', False: 'b', None: 'c', 2.5: 'd'}").unwrap(),
            json!({"1": "a", "false": "b", "null": "c", "2.5": "d"})
        );
    }

    #[test]
    fn unsupported_types() {
        assert_eq!(
            eval("object()").unwrap_err().to_string(),
            "Object of type object is not JSON serializable"
        );
        assert_eq!(
            eval("{1, 2}").unwrap_err().to_string(),
            "Object of type set is not JSON serializable"
        );
        assert_eq!(
            eval("[b'raw']").unwrap_err().to_string(),
            "Object of type bytes is not JSON serializable"
        );
        assert!(matches!(eval("{(1, 2): 3}"), Err(ConvertError::Key(_))));
    }

    #[test]
    fn non_finite_floats() {
        assert_eq!(eval("float('nan')"), Err(ConvertError::NonFinite));
        assert_eq!(eval("float('inf')"), Err(ConvertError::NonFinite));
    }

    #[test]
    fn lone_surrogates_are_rejected() {
        assert_eq!(eval("'\\ud800'"), Err(ConvertError::Surrogate));
        assert_eq!(eval("{'\\udfff': 1}"), Err(ConvertError::Surrogate));
        assert_eq!(eval("'caf\\u00e9'"), Ok(Value::String("café".into())));
    }

    #[test]
    fn huge_int() {
        assert_eq!(
            eval("2**70"),
            Err(ConvertError::IntOutOfRange("1180591620717411303424".into()))
        );
    }

    #[test]
    fn depth_limit() {
        // Built in a loop; the parser caps literal nesting well below MAX_DEPTH.
        let nested = |levels: usize| {
            Python::with_gil(|py| {
                let globals = PyDict::new(py);
                let code = format!("v = []\nfor _ in range({levels}):\n    v = [v]\n");
                py.run(&code, Some(globals), None).unwrap();
                to_json(globals.get_item("v").unwrap().unwrap())
            })
        };
        assert_eq!(nested(MAX_DEPTH + 10), Err(ConvertError::TooDeep));
        assert!(nested(10).is_ok());
    }
}
