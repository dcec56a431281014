use crate::error::ParseError;
use crate::value::Value;
use serde_json::{Map, Number, Value as Json};

/// Converts a decoded value graph to JSON, computing every lazy field on the
/// way. Keys of composites come out sorted; nil and `_`-prefixed fields are
/// left out.
pub fn to_json(v: &Value) -> Result<Json, ParseError> {
    Ok(match v {
        Value::Int(i) => Json::from(*i),
        Value::UInt(u) => Json::from(*u),
        Value::Float(f) => Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
        Value::Bool(b) => Json::Bool(*b),
        Value::Str(s) | Value::Enum(s) => Json::String(s.clone()),
        Value::Bytes(b) => Json::String(hex_upper(b)),
        Value::Array(items) => Json::Array(items.iter().map(to_json).collect::<Result<_, _>>()?),
        Value::Struct(c) => {
            let mut m = Map::new();
            for name in c.seq_fields() {
                if name.starts_with('_') {
                    continue;
                }
                if let Some(v) = c.seq_value(name) {
                    m.insert(name.clone(), to_json(&v)?);
                }
            }
            for name in c.instance_fields() {
                if name.starts_with('_') || m.contains_key(name) {
                    continue;
                }
                m.insert(name.clone(), to_json(&c.instance(name)?)?);
            }
            Json::Object(m)
        }
    })
}

pub fn hex_upper(b: &[u8]) -> String {
    b.iter().map(|x| format!("{x:02X}")).collect::<Vec<_>>().join(" ")
}
