//! Keys, key ranges and key paths.
//!
//! Keys are totally ordered: every number sorts before every string, and every
//! string before every array. Arrays compare element by element, a shorter
//! prefix first. [`Key::encode`] maps that order onto plain byte order so
//! SQLite BLOB comparison (memcmp) walks records in key order.

use std::cmp::Ordering;

use serde_json::Value;

use crate::error::{Error, Result};

const TAG_NUMBER: u8 = 0x10;
const TAG_STRING: u8 = 0x30;
const TAG_ARRAY: u8 = 0x50;
const TERMINATOR: u8 = 0x00;
const SIGN_BIT: u64 = 1 << 63;

/// Largest integer an f64 holds exactly; generated keys never exceed it.
pub(crate) const MAX_GENERATED_KEY: f64 = 9_007_199_254_740_992.0;

#[derive(Debug, Clone)]
pub enum Key {
    Number(f64),
    String(String),
    Array(Vec<Key>),
}

impl Key {
    /// Builds a key from a json value. Only numbers, strings and arrays of
    /// valid keys qualify.
    pub fn from_value(value: &Value) -> Result<Key> {
        match value {
            Value::Number(n) => {
                let n = n
                    .as_f64()
                    .ok_or_else(|| Error::Data(format!("number {n} is not a valid key")))?;
                Ok(Key::number(n))
            }
            Value::String(s) => Ok(Key::String(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(Key::from_value)
                .collect::<Result<Vec<_>>>()
                .map(Key::Array),
            other => Err(Error::Data(format!("{other} is not a valid key"))),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Key::Number(n) => {
                if n.fract() == 0.0 && n.abs() <= MAX_GENERATED_KEY {
                    Value::from(*n as i64)
                } else {
                    serde_json::Number::from_f64(*n)
                        .map(Value::Number)
                        .unwrap_or(Value::Null)
                }
            }
            Key::String(s) => Value::String(s.clone()),
            Key::Array(items) => Value::Array(items.iter().map(Key::to_value).collect()),
        }
    }

    // -0.0 and 0.0 are the same key
    fn number(n: f64) -> Key {
        if n == 0.0 {
            Key::Number(0.0)
        } else {
            Key::Number(n)
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Key::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Key::Number(n) => {
                out.push(TAG_NUMBER);
                let bits = n.to_bits();
                let ordered = if bits & SIGN_BIT != 0 { !bits } else { bits ^ SIGN_BIT };
                out.extend_from_slice(&ordered.to_be_bytes());
            }
            Key::String(s) => {
                out.push(TAG_STRING);
                for &b in s.as_bytes() {
                    if b == 0x00 {
                        out.extend_from_slice(&[0x00, 0xFF]);
                    } else {
                        out.push(b);
                    }
                }
                out.extend_from_slice(&[0x00, 0x01]);
            }
            Key::Array(items) => {
                out.push(TAG_ARRAY);
                for item in items {
                    item.encode_into(out);
                }
                out.push(TERMINATOR);
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Key> {
        let (key, rest) = decode_one(bytes)?;
        if !rest.is_empty() {
            return Err(corrupt());
        }
        Ok(key)
    }

    fn rank(&self) -> u8 {
        match self {
            Key::Number(_) => 0,
            Key::String(_) => 1,
            Key::Array(_) => 2,
        }
    }
}

fn corrupt() -> Error {
    Error::Request("stored key is corrupt".into())
}

fn decode_one(bytes: &[u8]) -> Result<(Key, &[u8])> {
    let (&tag, rest) = bytes.split_first().ok_or_else(corrupt)?;
    match tag {
        TAG_NUMBER => {
            if rest.len() < 8 {
                return Err(corrupt());
            }
            let (head, tail) = rest.split_at(8);
            let mut raw = [0u8; 8];
            raw.copy_from_slice(head);
            let ordered = u64::from_be_bytes(raw);
            let bits = if ordered & SIGN_BIT != 0 { ordered ^ SIGN_BIT } else { !ordered };
            Ok((Key::Number(f64::from_bits(bits)), tail))
        }
        TAG_STRING => {
            let mut buf = Vec::new();
            let mut i = 0;
            loop {
                match (rest.get(i), rest.get(i + 1)) {
                    (Some(0x00), Some(0xFF)) => {
                        buf.push(0x00);
                        i += 2;
                    }
                    (Some(0x00), Some(0x01)) => {
                        i += 2;
                        break;
                    }
                    (Some(0x00), _) | (None, _) => return Err(corrupt()),
                    (Some(&b), _) => {
                        buf.push(b);
                        i += 1;
                    }
                }
            }
            let s = String::from_utf8(buf).map_err(|_| corrupt())?;
            Ok((Key::String(s), &rest[i..]))
        }
        TAG_ARRAY => {
            let mut items = Vec::new();
            let mut rest = rest;
            loop {
                match rest.first() {
                    Some(&TERMINATOR) => return Ok((Key::Array(items), &rest[1..])),
                    Some(_) => {
                        let (item, tail) = decode_one(rest)?;
                        items.push(item);
                        rest = tail;
                    }
                    None => return Err(corrupt()),
                }
            }
        }
        _ => Err(corrupt()),
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Number(a), Key::Number(b)) => a.total_cmp(b),
            (Key::String(a), Key::String(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Key::Array(a), Key::Array(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl From<u64> for Key {
    fn from(n: u64) -> Self {
        Key::number(n as f64)
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::number(n as f64)
    }
}

impl From<f64> for Key {
    fn from(n: f64) -> Self {
        Key::number(n)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::String(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::String(s)
    }
}

/// Bounds restricting which keys a walk or lookup visits.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRange {
    lower: Option<Key>,
    upper: Option<Key>,
    lower_open: bool,
    upper_open: bool,
}

impl KeyRange {
    pub fn only(key: impl Into<Key>) -> Self {
        let key = key.into();
        KeyRange {
            lower: Some(key.clone()),
            upper: Some(key),
            lower_open: false,
            upper_open: false,
        }
    }

    pub fn lower_bound(key: impl Into<Key>, open: bool) -> Self {
        KeyRange {
            lower: Some(key.into()),
            upper: None,
            lower_open: open,
            upper_open: false,
        }
    }

    pub fn upper_bound(key: impl Into<Key>, open: bool) -> Self {
        KeyRange {
            lower: None,
            upper: Some(key.into()),
            lower_open: false,
            upper_open: open,
        }
    }

    pub fn bound(
        lower: impl Into<Key>,
        upper: impl Into<Key>,
        lower_open: bool,
        upper_open: bool,
    ) -> Result<Self> {
        let (lower, upper) = (lower.into(), upper.into());
        match lower.cmp(&upper) {
            Ordering::Greater => {
                return Err(Error::Data("lower bound is greater than upper bound".into()))
            }
            Ordering::Equal if lower_open || upper_open => {
                return Err(Error::Data("range with equal bounds cannot be open".into()))
            }
            _ => {}
        }
        Ok(KeyRange {
            lower: Some(lower),
            upper: Some(upper),
            lower_open,
            upper_open,
        })
    }

    pub fn lower(&self) -> Option<&Key> {
        self.lower.as_ref()
    }

    pub fn upper(&self) -> Option<&Key> {
        self.upper.as_ref()
    }

    pub fn lower_open(&self) -> bool {
        self.lower_open
    }

    pub fn upper_open(&self) -> bool {
        self.upper_open
    }
}

/// Resolves a dotted key path against a record. The empty path is the
/// record itself.
pub fn extract<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.')
        .try_fold(value, |current, segment| current.as_object()?.get(segment))
}

/// Writes a generated key into a record at `path`, creating intermediate
/// objects as needed.
pub fn inject(value: &mut Value, path: &str, key: &Key) -> Result<()> {
    let segments: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = segments.split_last() else {
        return Err(Error::Data("empty key path".into()));
    };

    let mut current = value;
    for segment in parents {
        let object = current
            .as_object_mut()
            .ok_or_else(|| Error::Data(format!("cannot inject key at '{path}'")))?;
        current = object
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }

    let object = current
        .as_object_mut()
        .ok_or_else(|| Error::Data(format!("cannot inject key at '{path}'")))?;
    object.insert(last.to_string(), key.to_value());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numbers_sort_before_strings_before_arrays() {
        let number = Key::from(1_000_000u64);
        let string = Key::from("");
        let array = Key::Array(vec![]);
        assert!(number < string);
        assert!(string < array);
        assert!(number.encode() < string.encode());
        assert!(string.encode() < array.encode());
    }

    #[test]
    fn encoding_preserves_order() {
        let mut keys = vec![
            Key::from(-10.5),
            Key::from(-1.0),
            Key::from(0.0),
            Key::from(2.0),
            Key::from(1e9),
            Key::from("a"),
            Key::from("a\0"),
            Key::from("ab"),
            Key::from("b"),
            Key::Array(vec![Key::from("a")]),
            Key::Array(vec![Key::from("a"), Key::from(1u64)]),
            Key::Array(vec![Key::from("b")]),
        ];
        let expected = keys.clone();
        keys.reverse();
        keys.sort_by_key(|k| k.encode());
        assert_eq!(keys, expected);
    }

    #[test]
    fn negative_zero_is_zero() {
        assert_eq!(Key::from(-0.0).encode(), Key::from(0.0).encode());
    }

    #[test]
    fn decode_inverts_encode_for_nested_keys() {
        let key = Key::Array(vec![
            Key::from("with\0nul"),
            Key::Array(vec![Key::from(-3.25)]),
            Key::from(7u64),
        ]);
        assert_eq!(Key::decode(&key.encode()).unwrap(), key);
    }

    #[test]
    fn decode_rejects_truncated_input() {
        let mut bytes = Key::from("abc").encode();
        bytes.pop();
        assert!(Key::decode(&bytes).is_err());
    }

    #[test]
    fn objects_and_booleans_are_not_keys() {
        assert!(Key::from_value(&json!({"a": 1})).is_err());
        assert!(Key::from_value(&json!(true)).is_err());
        assert!(Key::from_value(&json!([1, null])).is_err());
    }

    #[test]
    fn integral_numbers_render_as_integers() {
        assert_eq!(Key::from(42u64).to_value(), json!(42));
        assert_eq!(Key::from(1.5).to_value(), json!(1.5));
    }

    #[test]
    fn range_bounds() {
        let range = KeyRange::bound(1u64, 5u64, true, false).unwrap();
        assert_eq!(range.lower(), Some(&Key::from(1u64)));
        assert_eq!(range.upper(), Some(&Key::from(5u64)));
        assert!(range.lower_open());
        assert!(!range.upper_open());

        let only = KeyRange::only("x");
        assert_eq!(only.lower(), only.upper());
        assert!(KeyRange::lower_bound(2u64, false).upper().is_none());
        assert!(KeyRange::upper_bound(2u64, true).upper_open());
    }

    #[test]
    fn inverted_or_empty_ranges_fail() {
        assert!(KeyRange::bound(5u64, 1u64, false, false).is_err());
        assert!(KeyRange::bound(1u64, 1u64, true, false).is_err());
        assert!(KeyRange::bound(1u64, 1u64, false, false).is_ok());
    }

    #[test]
    fn key_paths_navigate_nested_objects() {
        let record = json!({"meta": {"id": 9}, "name": "n"});
        assert_eq!(extract(&record, "meta.id"), Some(&json!(9)));
        assert_eq!(extract(&record, "name.length"), None);
        assert_eq!(extract(&record, ""), Some(&record));
    }

    #[test]
    fn inject_creates_parents() {
        let mut record = json!({"name": "n"});
        inject(&mut record, "meta.id", &Key::from(3u64)).unwrap();
        assert_eq!(record, json!({"name": "n", "meta": {"id": 3}}));

        let mut scalar = json!(5);
        assert!(inject(&mut scalar, "id", &Key::from(1u64)).is_err());
    }
}
