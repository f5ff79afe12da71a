//! Key encoding and decoding for objects and index entries
//!
//! Layout (all parts are raw bytes, `|` is only for reading):
//! - Object: `{model_id:4 BE}|{topic}|0x00|{object_id:24 hex}`
//! - Index:  `{model_id:4 BE}|{topic}|0x00|{index_id:8 hex}|0x00|{field}|0x00|...|{field}|0x00|{object_id}`
//!
//! Unique indexes stop after the last field separator, so the key itself is
//! the uniqueness slot and the owner's id lives in the value.
//!
//! A repeated field contributes one key per distinct element, and an empty
//! one leaves the object out of the index.
//!
//! Field encodings keep byte order equal to value order:
//! - absent: zero length, sorts before everything
//! - bool: `0` / `1`
//! - int: sign bit flipped, 16 hex digits
//! - uint: 16 hex digits
//! - datetime: epoch seconds as int
//! - date: `YYYYMMDD`
//! - bytes: hex, empty bytes as `0x02`
//! - string: raw bytes, empty string as `0x02`; bytes below `0x03` are rejected
//! - object id: its 24 hex chars

use std::collections::BTreeSet;
use std::fmt::Write;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rd_core::object_id::OBJECT_ID_LEN;
use rd_core::{FieldKind, Index, Model, ObjectId, Topic, Unit, Value};

use crate::error::{DbError, DbResult};

pub const SEPARATOR: u8 = 0x00;
pub const SEPARATOR_PLUS: u8 = 0x01;
pub const EMPTY_CHAR: u8 = 0x02;

const SIGN_BIT: u64 = 1 << 63;

fn codec_error(msg: impl Into<String>) -> DbError {
    DbError::Codec(msg.into())
}

/// Topics share the key space with separators, so reserved bytes are refused.
pub fn validate_topic(topic: &Topic) -> DbResult<()> {
    if topic.as_bytes().iter().any(|b| *b <= EMPTY_CHAR) {
        return Err(codec_error(format!("topic {:?} contains reserved bytes", topic.as_str())));
    }
    Ok(())
}

/// `{model_id}{topic}0x00`
pub fn model_topic_prefix(model: &Model, topic: &Topic) -> Vec<u8> {
    let mut key = Vec::with_capacity(5 + topic.as_bytes().len() + OBJECT_ID_LEN);
    key.extend_from_slice(&model.id_prefix());
    key.extend_from_slice(topic.as_bytes());
    key.push(SEPARATOR);
    key
}

/// Build object key: `{model_id}{topic}0x00{object_id}`
pub fn object_key(model: &Model, topic: &Topic, id: &ObjectId) -> Vec<u8> {
    let mut key = model_topic_prefix(model, topic);
    id.write_hex(&mut key);
    key
}

/// Build index prefix for iteration: `{model_id}{topic}0x00{index_id}0x00`
pub fn index_prefix(model: &Model, topic: &Topic, index: &Index) -> Vec<u8> {
    let mut key = model_topic_prefix(model, topic);
    key.extend_from_slice(index.id().as_bytes());
    key.push(SEPARATOR);
    key
}

/// Build the index keys of `unit` for `index`, sorted and distinct.
pub fn index_keys<U: Unit>(model: &Model, topic: &Topic, index: &Index, unit: &U) -> DbResult<Vec<Vec<u8>>> {
    let mut keys = BTreeSet::from([index_prefix(model, topic, index)]);
    for field in index.fields() {
        let field_error = |e: DbError| codec_error(format!("index {} field {}: {}", index.name(), field.name, e));
        let value = unit.field(&field.name);
        let elements: Vec<Option<&Value>> = match &value {
            Some(Value::Array(items)) => items.iter().map(Some).collect(),
            other => vec![other.as_ref()],
        };
        let mut segments = BTreeSet::new();
        for element in elements {
            let mut segment = Vec::new();
            encode_field(&mut segment, element, field.kind).map_err(field_error)?;
            segment.push(SEPARATOR);
            segments.insert(segment);
        }
        keys = keys
            .iter()
            .flat_map(|key| segments.iter().map(move |segment| [key.as_slice(), segment.as_slice()].concat()))
            .collect();
    }
    let mut keys: Vec<Vec<u8>> = keys.into_iter().collect();
    if !index.is_unique() {
        for key in &mut keys {
            unit.object_id().write_hex(key);
        }
    }
    Ok(keys)
}

/// Append the order-preserving encoding of `value` as a field of `kind`.
pub fn encode_field(buf: &mut Vec<u8>, value: Option<&Value>, kind: FieldKind) -> DbResult<()> {
    let value = match value {
        Some(v) => v,
        None => return Ok(()),
    };
    match (kind, value) {
        (FieldKind::Bool, Value::Bool(b)) => buf.push(if *b { b'1' } else { b'0' }),
        (FieldKind::Int, Value::Int(v)) => push_hex_u64(buf, (*v as u64) ^ SIGN_BIT),
        (FieldKind::Int, Value::UInt(v)) => {
            let v = i64::try_from(*v).map_err(|_| codec_error(format!("{} overflows int", v)))?;
            push_hex_u64(buf, (v as u64) ^ SIGN_BIT)
        }
        (FieldKind::UInt, Value::UInt(v)) => push_hex_u64(buf, *v),
        (FieldKind::UInt, Value::Int(v)) => {
            let v = u64::try_from(*v).map_err(|_| codec_error(format!("{} is not unsigned", v)))?;
            push_hex_u64(buf, v)
        }
        (FieldKind::DateTime, Value::DateTime(dt)) => push_hex_u64(buf, (dt.timestamp() as u64) ^ SIGN_BIT),
        (FieldKind::Date, Value::Date(d)) => {
            if !(0..=9999).contains(&d.year()) {
                return Err(codec_error(format!("date {} out of range", d)));
            }
            let _ = write!(DigitSink(buf), "{:04}{:02}{:02}", d.year(), d.month(), d.day());
        }
        (FieldKind::ObjectId, Value::ObjectId(id)) => id.write_hex(buf),
        (FieldKind::String, Value::String(s)) => {
            if s.is_empty() {
                buf.push(EMPTY_CHAR);
            } else if s.bytes().any(|b| b <= EMPTY_CHAR) {
                return Err(codec_error("string contains reserved bytes"));
            } else {
                buf.extend_from_slice(s.as_bytes());
            }
        }
        (FieldKind::Bytes, Value::Bytes(bytes)) => {
            if bytes.is_empty() {
                buf.push(EMPTY_CHAR);
            } else {
                for b in bytes {
                    let _ = write!(DigitSink(buf), "{:02x}", b);
                }
            }
        }
        (FieldKind::Double, _) => return Err(codec_error("double fields are not indexable")),
        (kind, value) => {
            return Err(codec_error(format!(
                "expected {:?} value, got {:?}",
                kind,
                value.kind()
            )))
        }
    }
    Ok(())
}

/// Decode one field encoded by [`encode_field`].
pub fn decode_field(data: &[u8], kind: FieldKind) -> DbResult<Option<Value>> {
    if data.is_empty() {
        return Ok(None);
    }
    let text = || std::str::from_utf8(data).map_err(|_| codec_error("field is not valid utf-8"));
    let hex_u64 = || -> DbResult<u64> {
        let t = text()?;
        if t.len() != 16 {
            return Err(codec_error(format!("bad numeric field length {}", t.len())));
        }
        u64::from_str_radix(t, 16).map_err(|e| codec_error(e.to_string()))
    };
    let value = match kind {
        FieldKind::Bool => match data {
            b"0" => Value::Bool(false),
            b"1" => Value::Bool(true),
            _ => return Err(codec_error("bad bool field")),
        },
        FieldKind::Int => Value::Int((hex_u64()? ^ SIGN_BIT) as i64),
        FieldKind::UInt => Value::UInt(hex_u64()?),
        FieldKind::DateTime => {
            let secs = (hex_u64()? ^ SIGN_BIT) as i64;
            let dt = DateTime::<Utc>::from_timestamp(secs, 0)
                .ok_or_else(|| codec_error(format!("bad timestamp {}", secs)))?;
            Value::DateTime(dt)
        }
        FieldKind::Date => {
            let d = NaiveDate::parse_from_str(text()?, "%Y%m%d").map_err(|e| codec_error(e.to_string()))?;
            Value::Date(d)
        }
        FieldKind::ObjectId => Value::ObjectId(ObjectId::parse_hex(data)?),
        FieldKind::String if data == [EMPTY_CHAR] => Value::String(String::new()),
        FieldKind::String => Value::String(text()?.to_string()),
        FieldKind::Bytes if data == [EMPTY_CHAR] => Value::Bytes(Vec::new()),
        FieldKind::Bytes => {
            let t = text()?;
            if t.len() % 2 != 0 {
                return Err(codec_error("odd hex length"));
            }
            let bytes = (0..t.len())
                .step_by(2)
                .map(|i| u8::from_str_radix(&t[i..i + 2], 16))
                .collect::<Result<Vec<u8>, _>>()
                .map_err(|e| codec_error(e.to_string()))?;
            Value::Bytes(bytes)
        }
        FieldKind::Double | FieldKind::Array => {
            return Err(codec_error(format!("{:?} fields are not indexable", kind)))
        }
    };
    Ok(Some(value))
}

/// Components of an index key, borrowed from the key.
#[derive(Debug, PartialEq, Eq)]
pub struct IndexKeyParts<'a> {
    pub fields: Vec<&'a [u8]>,
    /// Present for non-unique indexes only
    pub object_id: Option<ObjectId>,
}

/// Split an index key into its encoded fields. `prefix_len` is the length of
/// [`index_prefix`] for the key's model, topic and index.
pub fn decode_index_key<'a>(key: &'a [u8], prefix_len: usize, index: &Index) -> DbResult<IndexKeyParts<'a>> {
    if key.len() < prefix_len {
        return Err(codec_error("truncated index key"));
    }
    let mut rest = &key[prefix_len..];
    let mut fields = Vec::with_capacity(index.fields().len());
    for field in index.fields() {
        let end = rest
            .iter()
            .position(|b| *b == SEPARATOR)
            .ok_or_else(|| codec_error(format!("missing separator after field {}", field.name)))?;
        fields.push(&rest[..end]);
        rest = &rest[end + 1..];
    }
    let object_id = if index.is_unique() {
        if !rest.is_empty() {
            return Err(codec_error("trailing bytes in unique index key"));
        }
        None
    } else {
        Some(ObjectId::parse_hex(rest)?)
    };
    Ok(IndexKeyParts { fields, object_id })
}

/// Object id at the end of an object key.
pub fn decode_object_key(key: &[u8]) -> DbResult<ObjectId> {
    if key.len() < 4 + 1 + OBJECT_ID_LEN || key[key.len() - OBJECT_ID_LEN - 1] != SEPARATOR {
        return Err(codec_error("malformed object key"));
    }
    Ok(ObjectId::parse_hex(&key[key.len() - OBJECT_ID_LEN..])?)
}

/// Smallest key greater than every key starting with `prefix`.
pub fn prefix_successor(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return end;
        }
    }
    vec![u8::MAX; prefix.len() + 1]
}

fn push_hex_u64(buf: &mut Vec<u8>, v: u64) {
    let _ = write!(DigitSink(buf), "{:016x}", v);
}

struct DigitSink<'a>(&'a mut Vec<u8>);

impl Write for DigitSink<'_> {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        self.0.extend_from_slice(s.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rd_core::{Document, ModelRegistry};

    fn enc(value: Value) -> Vec<u8> {
        let kind = value.kind();
        let mut buf = Vec::new();
        encode_field(&mut buf, Some(&value), kind).unwrap();
        buf
    }

    fn assert_ordered(values: Vec<Value>) {
        for pair in values.windows(2) {
            assert!(
                enc(pair[0].clone()) < enc(pair[1].clone()),
                "{:?} should sort before {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_integer_ordering() {
        assert_ordered(vec![
            Value::Int(i64::MIN),
            Value::Int(-1000),
            Value::Int(-1),
            Value::Int(0),
            Value::Int(1),
            Value::Int(255),
            Value::Int(256),
            Value::Int(i64::MAX),
        ]);
        assert_ordered(vec![Value::UInt(0), Value::UInt(9), Value::UInt(10), Value::UInt(u64::MAX)]);
    }

    #[test]
    fn test_string_ordering() {
        let mut empty = Vec::new();
        encode_field(&mut empty, None, FieldKind::String).unwrap();
        assert!(empty.is_empty());
        assert_eq!(enc(Value::from("")), vec![EMPTY_CHAR]);
        assert_ordered(vec![
            Value::from(""),
            Value::from("a"),
            Value::from("ab"),
            Value::from("abc"),
            Value::from("b"),
        ]);
    }

    #[test]
    fn test_date_and_id_ordering() {
        let d = |y, m, dd| Value::Date(NaiveDate::from_ymd_opt(y, m, dd).unwrap());
        assert_ordered(vec![d(999, 1, 1), d(2023, 12, 31), d(2024, 1, 1), d(2024, 1, 2)]);

        let t = |secs| Value::DateTime(Utc.timestamp_opt(secs, 0).unwrap());
        assert_ordered(vec![t(-86400), t(0), t(1), t(1_700_000_000)]);

        assert_ordered(vec![
            Value::ObjectId(ObjectId::from_parts(1, 5, 9)),
            Value::ObjectId(ObjectId::from_parts(1, 6, 0)),
            Value::ObjectId(ObjectId::from_parts(2, 0, 0)),
        ]);
        assert_ordered(vec![
            Value::Bytes(vec![]),
            Value::Bytes(vec![0x00]),
            Value::Bytes(vec![0x00, 0x01]),
            Value::Bytes(vec![0xff]),
        ]);
    }

    #[test]
    fn test_reserved_bytes_rejected() {
        let mut buf = Vec::new();
        assert!(matches!(
            encode_field(&mut buf, Some(&Value::from("a\0b")), FieldKind::String),
            Err(DbError::Codec(_))
        ));
        assert!(encode_field(&mut buf, Some(&Value::Int(-1)), FieldKind::UInt).is_err());
        assert!(encode_field(&mut buf, Some(&Value::from("x")), FieldKind::Int).is_err());
        assert!(validate_topic(&Topic::from("bad\u{1}topic")).is_err());
        assert!(validate_topic(&Topic::from("tenant-1")).is_ok());
    }

    #[test]
    fn test_decode_field_values() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        for value in [
            Value::Int(-42),
            Value::UInt(42),
            Value::Bool(true),
            Value::from(""),
            Value::from("héllo"),
            Value::Bytes(vec![1, 2, 0xfe]),
            Value::DateTime(at),
            Value::Date(at.date_naive()),
            Value::ObjectId(ObjectId::generate()),
        ] {
            let kind = value.kind();
            assert_eq!(decode_field(&enc(value.clone()), kind).unwrap(), Some(value));
        }
        assert_eq!(decode_field(b"", FieldKind::Int).unwrap(), None);
        assert!(decode_field(b"12", FieldKind::Int).is_err());
    }

    #[test]
    fn test_index_key_layout() {
        let mut registry = ModelRegistry::new();
        let model = rd_core::Model::builder("user")
            .index(
                Index::builder("name_age")
                    .field("name", FieldKind::String)
                    .field("age", FieldKind::UInt),
            )
            .index(Index::builder("email").field("email", FieldKind::String).unique())
            .build(&mut registry)
            .unwrap();
        let topic = Topic::from("t1");
        let mut doc = Document::new().with("name", "bob").with("email", "b@x.com");
        doc.set_object_id(ObjectId::from_parts(0x10, 1, 2));

        let index = model.index("name_age").unwrap();
        let keys = index_keys(&model, &topic, index, &doc).unwrap();
        assert_eq!(keys.len(), 1);
        let key = keys[0].clone();
        let prefix = index_prefix(&model, &topic, index);
        assert!(key.starts_with(&prefix));
        assert_eq!(&prefix[..7], &[0, 0, 0, 1, b't', b'1', SEPARATOR]);

        let parts = decode_index_key(&key, prefix.len(), index).unwrap();
        assert_eq!(parts.fields, vec![&b"bob"[..], &b""[..]]);
        assert_eq!(parts.object_id, Some(doc.object_id()));

        let unique = model.index("email").unwrap();
        let key = index_keys(&model, &topic, unique, &doc).unwrap().remove(0);
        assert_eq!(key.last(), Some(&SEPARATOR));
        let parts = decode_index_key(&key, index_prefix(&model, &topic, unique).len(), unique).unwrap();
        assert_eq!(parts.fields, vec![&b"b@x.com"[..]]);
        assert_eq!(parts.object_id, None);

        let obj = object_key(&model, &topic, &doc.object_id());
        assert_eq!(decode_object_key(&obj).unwrap(), doc.object_id());
    }

    #[test]
    fn test_repeated_field_keys() {
        let mut registry = ModelRegistry::new();
        let model = rd_core::Model::builder("post")
            .index(Index::builder("tags").field("tags", FieldKind::String))
            .index(
                Index::builder("tag_rank")
                    .field("tags", FieldKind::String)
                    .field("rank", FieldKind::UInt),
            )
            .index(Index::builder("slug").field("slugs", FieldKind::String).unique())
            .build(&mut registry)
            .unwrap();
        let topic = Topic::from("t");
        let mut doc = Document::new()
            .with("tags", Value::array(["b", "a", "b"]))
            .with("rank", 3u64)
            .with("slugs", Value::array(["x", "y"]));
        doc.set_object_id(ObjectId::from_parts(0x10, 1, 2));

        let tags = model.index("tags").unwrap();
        let prefix_len = index_prefix(&model, &topic, tags).len();
        let keys = index_keys(&model, &topic, tags, &doc).unwrap();
        let fields: Vec<Vec<u8>> = keys
            .iter()
            .map(|k| decode_index_key(k, prefix_len, tags).unwrap().fields[0].to_vec())
            .collect();
        assert_eq!(fields, vec![b"a".to_vec(), b"b".to_vec()]);

        let compound = model.index("tag_rank").unwrap();
        assert_eq!(index_keys(&model, &topic, compound, &doc).unwrap().len(), 2);
        let slugs = model.index("slug").unwrap();
        assert_eq!(index_keys(&model, &topic, slugs, &doc).unwrap().len(), 2);

        let empty = doc.clone().with("tags", Value::Array(Vec::new()));
        assert!(index_keys(&model, &topic, tags, &empty).unwrap().is_empty());

        let nested = doc.clone().with("tags", Value::array([Value::array(["a"])]));
        assert!(matches!(index_keys(&model, &topic, tags, &nested), Err(DbError::Codec(_))));
        let bad = doc.with("tags", Value::array(["ok", "bad\u{1}"]));
        assert!(matches!(index_keys(&model, &topic, tags, &bad), Err(DbError::Codec(_))));
    }

    #[test]
    fn test_prefix_successor() {
        assert_eq!(prefix_successor(&[1, 2, 0]), vec![1, 2, 1]);
        assert_eq!(prefix_successor(&[1, 0xff]), vec![2]);
    }
}
