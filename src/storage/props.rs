use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::primitives::bytes::{buf, buf::Cursor, var};
use crate::types::{NodeId, PoolError, Result, StrId};

const TYPE_NULL: u8 = 0;
const TYPE_BOOL: u8 = 1;
const TYPE_INT: u8 = 2;
const TYPE_FLOAT: u8 = 3;
const TYPE_STR: u8 = 4;
const TYPE_BYTES: u8 = 5;
const TYPE_DATETIME: u8 = 6;
const TYPE_DATE: u8 = 7;

/// A scalar property value.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropValue {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit floating point number.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Days since the Unix epoch.
    Date(i64),
    /// Milliseconds since the Unix epoch.
    DateTime(i64),
}

impl PropValue {
    /// Returns the string payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer payload, if any.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the float payload, if any.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            PropValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the boolean payload, if any.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValue::Null => write!(f, "null"),
            PropValue::Bool(v) => write!(f, "{v}"),
            PropValue::Int(v) => write!(f, "{v}"),
            PropValue::Float(v) => write!(f, "{v}"),
            PropValue::Str(v) => write!(f, "{v:?}"),
            PropValue::Bytes(v) => write!(f, "bytes(len={})", v.len()),
            PropValue::Date(v) => write!(f, "date({v})"),
            PropValue::DateTime(v) => write!(f, "datetime({v})"),
        }
    }
}

impl From<bool> for PropValue {
    fn from(v: bool) -> Self {
        PropValue::Bool(v)
    }
}

impl From<i64> for PropValue {
    fn from(v: i64) -> Self {
        PropValue::Int(v)
    }
}

impl From<i32> for PropValue {
    fn from(v: i32) -> Self {
        PropValue::Int(v as i64)
    }
}

impl From<f64> for PropValue {
    fn from(v: f64) -> Self {
        PropValue::Float(v)
    }
}

impl From<&str> for PropValue {
    fn from(v: &str) -> Self {
        PropValue::Str(v.to_owned())
    }
}

impl From<String> for PropValue {
    fn from(v: String) -> Self {
        PropValue::Str(v)
    }
}

impl From<Vec<u8>> for PropValue {
    fn from(v: Vec<u8>) -> Self {
        PropValue::Bytes(v)
    }
}

/// A node's property map.
pub type Properties = BTreeMap<String, PropValue>;

/// Builds a property map from key/value pairs.
pub fn props<K, V, I>(pairs: I) -> Properties
where
    K: Into<String>,
    V: Into<PropValue>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// A committed node as read back from a graph.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Node {
    /// Node identifier.
    pub id: NodeId,
    /// Node label.
    pub label: String,
    /// Node properties.
    pub properties: Properties,
}

/// Node body with dictionary ids still unresolved.
#[derive(Clone, Debug, PartialEq)]
pub struct RawBody {
    /// Interned label.
    pub label: StrId,
    /// Properties keyed by interned key.
    pub props: Vec<(StrId, PropValue)>,
}

/// Encodes a node body: label id, property count, then `(key id, tag, value)`.
pub fn encode_body(label: StrId, props: &[(StrId, &PropValue)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + props.len() * 8);
    var::encode_u64(label.0 as u64, &mut out);
    var::encode_u64(props.len() as u64, &mut out);
    for (key, value) in props {
        var::encode_u64(key.0 as u64, &mut out);
        encode_value(value, &mut out);
    }
    out
}

fn encode_value(value: &PropValue, out: &mut Vec<u8>) {
    match value {
        PropValue::Null => out.push(TYPE_NULL),
        PropValue::Bool(v) => {
            out.push(TYPE_BOOL);
            out.push(u8::from(*v));
        }
        PropValue::Int(v) => {
            out.push(TYPE_INT);
            var::encode_i64(*v, out);
        }
        PropValue::Float(v) => {
            out.push(TYPE_FLOAT);
            out.extend_from_slice(&v.to_le_bytes());
        }
        PropValue::Str(s) => {
            out.push(TYPE_STR);
            buf::put_bytes(out, s.as_bytes());
        }
        PropValue::Bytes(b) => {
            out.push(TYPE_BYTES);
            buf::put_bytes(out, b);
        }
        PropValue::Date(v) => {
            out.push(TYPE_DATE);
            var::encode_i64(*v, out);
        }
        PropValue::DateTime(v) => {
            out.push(TYPE_DATETIME);
            var::encode_i64(*v, out);
        }
    }
}

/// Decodes only the label of a node body.
pub fn decode_label(bytes: &[u8]) -> Result<StrId> {
    let mut cur = Cursor::new(bytes);
    Ok(StrId(cur.var_u32()?))
}

/// Decodes a full node body.
pub fn decode_body(bytes: &[u8]) -> Result<RawBody> {
    let mut cur = Cursor::new(bytes);
    let label = StrId(cur.var_u32()?);
    let count = cur.var_u64()?;
    if count > cur.remaining() as u64 {
        return Err(PoolError::Corruption("property count exceeds body length"));
    }
    let mut props = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let key = StrId(cur.var_u32()?);
        let value = match cur.u8()? {
            TYPE_NULL => PropValue::Null,
            TYPE_BOOL => PropValue::Bool(cur.u8()? != 0),
            TYPE_INT => PropValue::Int(cur.var_i64()?),
            TYPE_FLOAT => {
                let bytes = cur.take(8)?;
                PropValue::Float(f64::from_le_bytes(bytes.try_into().unwrap()))
            }
            TYPE_STR => PropValue::Str(cur.str()?.to_owned()),
            TYPE_BYTES => PropValue::Bytes(cur.bytes()?.to_vec()),
            TYPE_DATE => PropValue::Date(cur.var_i64()?),
            TYPE_DATETIME => PropValue::DateTime(cur.var_i64()?),
            _ => return Err(PoolError::Corruption("unknown property type tag")),
        };
        props.push((key, value));
    }
    if !cur.is_exhausted() {
        return Err(PoolError::Corruption("trailing bytes after node body"));
    }
    Ok(RawBody { label, props })
}
