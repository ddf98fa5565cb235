//! Canonical JSON encoding.
//!
//! Numbers keep their exact source text (serde_json `arbitrary_precision`),
//! object keys are sorted recursively and no insignificant whitespace is
//! emitted. Documents with a repeated object key have no canonical form.

use std::collections::HashSet;
use std::fmt;

use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{self, Serialize, Serializer};
use serde_json::{Map, Value};

/// Encode a JSON value with recursively sorted object keys and no whitespace.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::from(key.as_str()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        // Display for scalars is compact JSON with proper string escaping.
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Parse `raw` as JSON, refusing documents that repeat a key in any object.
///
/// Returns `None` for invalid JSON as well.
pub(crate) fn parse_unique(raw: &[u8]) -> Option<Value> {
    serde_json::from_slice::<UniqueKeys>(raw).ok()?;
    serde_json::from_slice(raw).ok()
}

/// Deserializes any JSON document, failing on the first repeated object key.
struct UniqueKeys;

impl<'de> Deserialize<'de> for UniqueKeys {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(UniqueKeysVisitor)
    }
}

struct UniqueKeysVisitor;

impl<'de> Visitor<'de> for UniqueKeysVisitor {
    type Value = UniqueKeys;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON value")
    }

    fn visit_bool<E: de::Error>(self, _: bool) -> Result<UniqueKeys, E> {
        Ok(UniqueKeys)
    }

    fn visit_i64<E: de::Error>(self, _: i64) -> Result<UniqueKeys, E> {
        Ok(UniqueKeys)
    }

    fn visit_u64<E: de::Error>(self, _: u64) -> Result<UniqueKeys, E> {
        Ok(UniqueKeys)
    }

    fn visit_f64<E: de::Error>(self, _: f64) -> Result<UniqueKeys, E> {
        Ok(UniqueKeys)
    }

    fn visit_str<E: de::Error>(self, _: &str) -> Result<UniqueKeys, E> {
        Ok(UniqueKeys)
    }

    fn visit_unit<E: de::Error>(self) -> Result<UniqueKeys, E> {
        Ok(UniqueKeys)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<UniqueKeys, A::Error> {
        while seq.next_element::<UniqueKeys>()?.is_some() {}
        Ok(UniqueKeys)
    }

    // Exact-text numbers also arrive here, as a single-entry map.
    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<UniqueKeys, A::Error> {
        let mut seen = HashSet::new();
        while let Some(key) = map.next_key::<String>()? {
            if !seen.insert(key.clone()) {
                return Err(de::Error::custom(format!("duplicate key `{}`", key)));
            }
            map.next_value::<UniqueKeys>()?;
        }
        Ok(UniqueKeys)
    }
}

/// Convert a serializable value to JSON, writing map keys that are not
/// strings as their canonical JSON text (`(1, 2)` becomes the key `"[1,2]"`).
pub(crate) fn to_value_with_text_keys<T>(value: &T) -> Result<Value, serde_json::Error>
where
    T: Serialize + ?Sized,
{
    value.serialize(TextKeySerializer)
}

fn key_text(key: Value) -> String {
    match key {
        Value::String(s) => s,
        other => canonical_json(&other),
    }
}

type SerResult<T> = Result<T, serde_json::Error>;

struct TextKeySerializer;

macro_rules! forward_scalars {
    ($($method:ident($ty:ty)),* $(,)?) => {
        $(
            fn $method(self, v: $ty) -> SerResult<Value> {
                serde_json::value::Serializer.$method(v)
            }
        )*
    };
}

impl Serializer for TextKeySerializer {
    type Ok = Value;
    type Error = serde_json::Error;
    type SerializeSeq = SeqCollector;
    type SerializeTuple = SeqCollector;
    type SerializeTupleStruct = SeqCollector;
    type SerializeTupleVariant = TupleVariantCollector;
    type SerializeMap = MapCollector;
    type SerializeStruct = MapCollector;
    type SerializeStructVariant = StructVariantCollector;

    forward_scalars!(
        serialize_bool(bool),
        serialize_i8(i8),
        serialize_i16(i16),
        serialize_i32(i32),
        serialize_i64(i64),
        serialize_i128(i128),
        serialize_u8(u8),
        serialize_u16(u16),
        serialize_u32(u32),
        serialize_u64(u64),
        serialize_u128(u128),
        serialize_f32(f32),
        serialize_f64(f64),
        serialize_char(char),
        serialize_str(&str),
        serialize_bytes(&[u8]),
    );

    fn serialize_none(self) -> SerResult<Value> {
        Ok(Value::Null)
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> SerResult<Value> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> SerResult<Value> {
        Ok(Value::Null)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> SerResult<Value> {
        Ok(Value::Null)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
    ) -> SerResult<Value> {
        Ok(Value::String(variant.to_string()))
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> SerResult<Value> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        value: &T,
    ) -> SerResult<Value> {
        let mut map = Map::new();
        map.insert(variant.to_string(), value.serialize(TextKeySerializer)?);
        Ok(Value::Object(map))
    }

    fn serialize_seq(self, len: Option<usize>) -> SerResult<SeqCollector> {
        Ok(SeqCollector(Vec::with_capacity(len.unwrap_or(0))))
    }

    fn serialize_tuple(self, len: usize) -> SerResult<SeqCollector> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(self, _name: &'static str, len: usize) -> SerResult<SeqCollector> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> SerResult<TupleVariantCollector> {
        Ok(TupleVariantCollector {
            variant,
            items: Vec::with_capacity(len),
        })
    }

    fn serialize_map(self, _len: Option<usize>) -> SerResult<MapCollector> {
        Ok(MapCollector::default())
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> SerResult<MapCollector> {
        Ok(MapCollector::default())
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        _len: usize,
    ) -> SerResult<StructVariantCollector> {
        Ok(StructVariantCollector {
            variant,
            map: Map::new(),
        })
    }
}

struct SeqCollector(Vec<Value>);

impl ser::SerializeSeq for SeqCollector {
    type Ok = Value;
    type Error = serde_json::Error;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> SerResult<()> {
        self.0.push(value.serialize(TextKeySerializer)?);
        Ok(())
    }

    fn end(self) -> SerResult<Value> {
        Ok(Value::Array(self.0))
    }
}

impl ser::SerializeTuple for SeqCollector {
    type Ok = Value;
    type Error = serde_json::Error;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> SerResult<()> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> SerResult<Value> {
        ser::SerializeSeq::end(self)
    }
}

impl ser::SerializeTupleStruct for SeqCollector {
    type Ok = Value;
    type Error = serde_json::Error;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> SerResult<()> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> SerResult<Value> {
        ser::SerializeSeq::end(self)
    }
}

struct TupleVariantCollector {
    variant: &'static str,
    items: Vec<Value>,
}

impl ser::SerializeTupleVariant for TupleVariantCollector {
    type Ok = Value;
    type Error = serde_json::Error;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> SerResult<()> {
        self.items.push(value.serialize(TextKeySerializer)?);
        Ok(())
    }

    fn end(self) -> SerResult<Value> {
        let mut map = Map::new();
        map.insert(self.variant.to_string(), Value::Array(self.items));
        Ok(Value::Object(map))
    }
}

#[derive(Default)]
struct MapCollector {
    map: Map<String, Value>,
    pending_key: Option<String>,
}

impl ser::SerializeMap for MapCollector {
    type Ok = Value;
    type Error = serde_json::Error;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> SerResult<()> {
        self.pending_key = Some(key_text(key.serialize(TextKeySerializer)?));
        Ok(())
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> SerResult<()> {
        let key = self
            .pending_key
            .take()
            .ok_or_else(|| <serde_json::Error as ser::Error>::custom("map value without a key"))?;
        self.map.insert(key, value.serialize(TextKeySerializer)?);
        Ok(())
    }

    fn end(self) -> SerResult<Value> {
        Ok(Value::Object(self.map))
    }
}

impl ser::SerializeStruct for MapCollector {
    type Ok = Value;
    type Error = serde_json::Error;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> SerResult<()> {
        self.map
            .insert(key.to_string(), value.serialize(TextKeySerializer)?);
        Ok(())
    }

    fn end(self) -> SerResult<Value> {
        Ok(Value::Object(self.map))
    }
}

struct StructVariantCollector {
    variant: &'static str,
    map: Map<String, Value>,
}

impl ser::SerializeStructVariant for StructVariantCollector {
    type Ok = Value;
    type Error = serde_json::Error;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> SerResult<()> {
        self.map
            .insert(key.to_string(), value.serialize(TextKeySerializer)?);
        Ok(())
    }

    fn end(self) -> SerResult<Value> {
        let mut outer = Map::new();
        outer.insert(self.variant.to_string(), Value::Object(self.map));
        Ok(Value::Object(outer))
    }
}
