//! Runtime type registry: per-connection OID → codec tables.
//!
//! Each codec is a set of four optional function slots (text/binary ×
//! decode/encode) over the owned [`Value`] model. Array, composite and
//! range codecs close over their element codecs, so the slots are `Arc`
//! closures rather than plain function pointers.

pub mod array;
mod builtin;
pub mod composite;
pub mod datetime;
pub mod numeric;
pub mod range;
pub mod value;

pub use array::{ArrayDim, ArrayValue};
pub use composite::{CompositeField, CompositeValue};
pub use numeric::{Numeric, NumericSign};
pub use range::RangeValue;
pub use value::Value;

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crate::error::{Error, Result};
use crate::protocol::frontend::BindParam;
use crate::protocol::types::{FormatCode, Oid};

/// Decoder slot: wire payload → owned value.
pub type DecodeFn = Arc<dyn Fn(&[u8]) -> Result<Value> + Send + Sync>;

/// Encoder slot: appends the encoded payload to the buffer.
///
/// The length prefix (or -1 for NULL) is written by the caller, never by
/// the codec.
pub type EncodeFn = Arc<dyn Fn(&Value, &mut Vec<u8>) -> Result<()> + Send + Sync>;

/// A type codec: up to four conversion slots plus a preferred parameter
/// format.
#[derive(Clone, Default)]
pub struct Codec {
    /// Decode the text wire format
    pub text_decode: Option<DecodeFn>,
    /// Decode the binary wire format
    pub binary_decode: Option<DecodeFn>,
    /// Encode to the text wire format
    pub text_encode: Option<EncodeFn>,
    /// Encode to the binary wire format
    pub binary_encode: Option<EncodeFn>,
    /// Preferred format for outgoing parameters
    pub preferred: FormatCode,
}

impl std::fmt::Debug for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codec")
            .field("text_decode", &self.text_decode.is_some())
            .field("binary_decode", &self.binary_decode.is_some())
            .field("text_encode", &self.text_encode.is_some())
            .field("binary_encode", &self.binary_encode.is_some())
            .field("preferred", &self.preferred)
            .finish()
    }
}

impl Codec {
    /// Decode a payload in the given format, if the slot exists.
    pub fn decode(&self, format: FormatCode, bytes: &[u8]) -> Option<Result<Value>> {
        let slot = match format {
            FormatCode::Text => self.text_decode.as_ref(),
            FormatCode::Binary => self.binary_decode.as_ref(),
        };
        slot.map(|f| f(bytes))
    }
}

/// Per-connection mapping from type OIDs to codecs, plus the name → OID
/// map used to resolve types registered by name.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    codecs: HashMap<Oid, Codec>,
    names: HashMap<String, Oid>,
}

impl TypeRegistry {
    /// An empty registry with no codecs at all.
    pub fn empty() -> Self {
        Self {
            codecs: HashMap::new(),
            names: HashMap::new(),
        }
    }

    /// A registry seeded with every built-in codec.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        builtin::install(&mut registry);
        registry
    }

    /// The process-wide default registry; cloning it is cheap because the
    /// codec slots are shared.
    pub fn shared_default() -> &'static TypeRegistry {
        static DEFAULT: OnceLock<TypeRegistry> = OnceLock::new();
        DEFAULT.get_or_init(TypeRegistry::with_builtins)
    }

    /// Register a codec under an OID and type name.
    pub fn register(&mut self, oid: Oid, name: &str, codec: Codec) {
        self.codecs.insert(oid, codec);
        self.names.insert(name.to_string(), oid);
    }

    /// Register an alias name for an already-registered OID.
    pub fn register_name(&mut self, name: &str, oid: Oid) {
        self.names.insert(name.to_string(), oid);
    }

    /// Look up the codec for an OID.
    pub fn codec(&self, oid: Oid) -> Option<&Codec> {
        self.codecs.get(&oid)
    }

    /// Resolve a type name to its OID.
    pub fn oid_of(&self, name: &str) -> Option<Oid> {
        self.names.get(name).copied()
    }

    /// Result format to request for a column of this OID: binary when a
    /// binary decoder exists, text otherwise.
    pub fn result_format(&self, oid: Oid) -> FormatCode {
        match self.codec(oid) {
            Some(codec) if codec.binary_decode.is_some() => FormatCode::Binary,
            _ => FormatCode::Text,
        }
    }

    /// Decode a column payload into an owned value.
    ///
    /// `None` input means SQL NULL. OIDs without a codec (or without the
    /// needed slot) fall back to [`Value::Raw`].
    pub fn decode(&self, oid: Oid, format: FormatCode, bytes: Option<&[u8]>) -> Result<Value> {
        let Some(bytes) = bytes else {
            return Ok(Value::Null);
        };

        match self.codec(oid).and_then(|codec| codec.decode(format, bytes)) {
            Some(result) => result,
            None => Ok(Value::Raw {
                oid,
                format,
                bytes: bytes.to_vec(),
            }),
        }
    }

    /// Encode one parameter for the given declared OID.
    ///
    /// When the server declared no type (OID 0) or the OID is unknown,
    /// the value's natural type is used; raw values pass through in their
    /// recorded format.
    pub fn encode_param(&self, value: &Value, target_oid: Oid) -> Result<BindParam> {
        if value.is_null() {
            return Ok(BindParam::null());
        }

        if let Value::Raw { format, bytes, .. } = value {
            return Ok(BindParam {
                format: *format,
                data: Some(bytes.clone()),
            });
        }

        let oid = if target_oid != 0 && self.codecs.contains_key(&target_oid) {
            target_oid
        } else {
            value.natural_oid()
        };

        let Some(codec) = self.codec(oid) else {
            // Last resort: ship text as-is
            if let Value::Text(s) = value {
                return Ok(BindParam::text(s.as_bytes().to_vec()));
            }
            return Err(Error::Encode(format!(
                "no codec for oid {} (value {:?})",
                oid, value
            )));
        };

        let (format, encoder) = match codec.preferred {
            FormatCode::Binary => match (&codec.binary_encode, &codec.text_encode) {
                (Some(e), _) => (FormatCode::Binary, e),
                (None, Some(e)) => (FormatCode::Text, e),
                (None, None) => {
                    return Err(Error::Encode(format!("oid {} has no encoder", oid)));
                }
            },
            FormatCode::Text => match (&codec.text_encode, &codec.binary_encode) {
                (Some(e), _) => (FormatCode::Text, e),
                (None, Some(e)) => (FormatCode::Binary, e),
                (None, None) => {
                    return Err(Error::Encode(format!("oid {} has no encoder", oid)));
                }
            },
        };

        let mut data = Vec::new();
        encoder(value, &mut data)?;
        Ok(BindParam {
            format,
            data: Some(data),
        })
    }

    /// Register an array type over an already-registered element type.
    pub fn register_array(&mut self, array_oid: Oid, name: &str, elem_oid: Oid) -> Result<()> {
        let elem = self
            .codec(elem_oid)
            .cloned()
            .ok_or_else(|| Error::Config(format!("array element oid {} not registered", elem_oid)))?;

        let mut codec = Codec {
            preferred: FormatCode::Binary,
            ..Codec::default()
        };

        if let Some(decode) = elem.binary_decode.clone() {
            codec.binary_decode = Some(Arc::new(move |bytes| {
                array::decode_binary(bytes, &|b| decode(b)).map(|a| Value::Array(Box::new(a)))
            }));
        }
        if let Some(decode) = elem.text_decode.clone() {
            codec.text_decode = Some(Arc::new(move |bytes| {
                let text = simdutf8::compat::from_utf8(bytes)
                    .map_err(|e| Error::Decode(format!("array text: invalid UTF-8: {e}")))?;
                array::decode_text(text, elem_oid, &|s| decode(s.as_bytes()))
                    .map(|a| Value::Array(Box::new(a)))
            }));
        }
        if let Some(encode) = elem.binary_encode.clone() {
            codec.binary_encode = Some(Arc::new(move |value, out| match value {
                Value::Array(a) => array::encode_binary(a, &|v, out| encode(v, out), out),
                _ => Err(Error::Encode("expected array value".into())),
            }));
        }
        if let Some(encode) = elem.text_encode.clone() {
            codec.text_encode = Some(Arc::new(move |value, out| match value {
                Value::Array(a) => {
                    let mut text = String::new();
                    array::encode_text(
                        a,
                        &|v| {
                            let mut buf = Vec::new();
                            encode(v, &mut buf)?;
                            String::from_utf8(buf)
                                .map_err(|e| Error::Encode(format!("non-UTF-8 element: {e}")))
                        },
                        &mut text,
                    )?;
                    out.extend_from_slice(text.as_bytes());
                    Ok(())
                }
                _ => Err(Error::Encode("expected array value".into())),
            }));
        }

        self.register(array_oid, name, codec);
        Ok(())
    }

    /// Register a composite type; every field type must already be
    /// registered.
    pub fn register_composite(
        &mut self,
        oid: Oid,
        name: &str,
        fields: Vec<CompositeField>,
    ) -> Result<()> {
        // Snapshot the child codecs; the registry is immutable between
        // queries so the snapshot cannot go stale.
        let mut children: HashMap<Oid, Codec> = HashMap::new();
        for field in &fields {
            let codec = self.codec(field.oid).cloned().ok_or_else(|| {
                Error::Config(format!(
                    "composite field {} type oid {} not registered",
                    field.name, field.oid
                ))
            })?;
            children.insert(field.oid, codec);
        }
        let children = Arc::new(children);
        let fields = Arc::new(fields);

        let decode_children = Arc::clone(&children);
        let decode_fields = Arc::clone(&fields);
        let binary_decode: DecodeFn = Arc::new(move |bytes| {
            composite::decode_binary(bytes, &decode_fields, &|oid, payload| {
                match decode_children.get(&oid).and_then(|c| c.binary_decode.as_ref()) {
                    Some(decode) => decode(payload),
                    None => Ok(Value::Raw {
                        oid,
                        format: FormatCode::Binary,
                        bytes: payload.to_vec(),
                    }),
                }
            })
            .map(Value::Composite)
        });

        let text_children = Arc::clone(&children);
        let text_fields = Arc::clone(&fields);
        let text_decode: DecodeFn = Arc::new(move |bytes| {
            let text = simdutf8::compat::from_utf8(bytes)
                .map_err(|e| Error::Decode(format!("composite text: invalid UTF-8: {e}")))?;
            composite::decode_text(text, &text_fields, &|oid, field_text| {
                match text_children.get(&oid).and_then(|c| c.text_decode.as_ref()) {
                    Some(decode) => decode(field_text.as_bytes()),
                    None => Ok(Value::Raw {
                        oid,
                        format: FormatCode::Text,
                        bytes: field_text.as_bytes().to_vec(),
                    }),
                }
            })
            .map(Value::Composite)
        });

        let encode_children = Arc::clone(&children);
        let encode_fields = Arc::clone(&fields);
        let binary_encode: EncodeFn = Arc::new(move |value, out| match value {
            Value::Composite(v) => composite::encode_binary(
                v,
                &encode_fields,
                &|oid, field_value, out| {
                    let encode = encode_children
                        .get(&oid)
                        .and_then(|c| c.binary_encode.as_ref())
                        .ok_or_else(|| {
                            Error::Encode(format!("composite field oid {} has no encoder", oid))
                        })?;
                    encode(field_value, out)
                },
                out,
            ),
            _ => Err(Error::Encode("expected composite value".into())),
        });

        let codec = Codec {
            text_decode: Some(text_decode),
            binary_decode: Some(binary_decode),
            text_encode: None,
            binary_encode: Some(binary_encode),
            preferred: FormatCode::Binary,
        };

        self.register(oid, name, codec);
        Ok(())
    }

    /// Register a range type over an already-registered subtype.
    pub fn register_range(&mut self, oid: Oid, name: &str, subtype_oid: Oid) -> Result<()> {
        let subtype = self.codec(subtype_oid).cloned().ok_or_else(|| {
            Error::Config(format!("range subtype oid {} not registered", subtype_oid))
        })?;

        let mut codec = Codec {
            preferred: FormatCode::Binary,
            ..Codec::default()
        };

        if let Some(decode) = subtype.binary_decode.clone() {
            codec.binary_decode = Some(Arc::new(move |bytes| {
                range::decode_binary(bytes, subtype_oid, &|b| decode(b))
                    .map(|r| Value::Range(Box::new(r)))
            }));
        }
        if let Some(decode) = subtype.text_decode.clone() {
            codec.text_decode = Some(Arc::new(move |bytes| {
                let text = simdutf8::compat::from_utf8(bytes)
                    .map_err(|e| Error::Decode(format!("range text: invalid UTF-8: {e}")))?;
                range::decode_text(text, subtype_oid, &|s| decode(s.as_bytes()))
                    .map(|r| Value::Range(Box::new(r)))
            }));
        }
        if let Some(encode) = subtype.binary_encode.clone() {
            codec.binary_encode = Some(Arc::new(move |value, out| match value {
                Value::Range(r) => range::encode_binary(r, &|v, out| encode(v, out), out),
                _ => Err(Error::Encode("expected range value".into())),
            }));
        }

        self.register(oid, name, codec);
        Ok(())
    }

    /// Register an enum type (values travel as text).
    pub fn register_enum(&mut self, oid: Oid, name: &str) {
        self.register(oid, name, builtin::enum_codec());
    }

    /// Register a domain as an alias of its base type's codec.
    pub fn register_domain(&mut self, oid: Oid, name: &str, base_oid: Oid) -> Result<()> {
        let base = self
            .codec(base_oid)
            .cloned()
            .ok_or_else(|| Error::Config(format!("domain base oid {} not registered", base_oid)))?;
        self.register(oid, name, base);
        Ok(())
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::shared_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::oid;

    #[test]
    fn builtin_round_trip_binary() {
        let registry = TypeRegistry::with_builtins();

        let cases = vec![
            (oid::BOOL, Value::Bool(true)),
            (oid::INT2, Value::Int2(-7)),
            (oid::INT4, Value::Int4(123_456)),
            (oid::INT8, Value::Int8(-9_876_543_210)),
            (oid::FLOAT4, Value::Float4(1.5)),
            (oid::FLOAT8, Value::Float8(-2.25)),
            (oid::TEXT, Value::Text("héllo".into())),
            (oid::BYTEA, Value::Bytea(vec![0, 1, 255])),
            (oid::DATE, Value::Date(8765)),
            (oid::TIME, Value::Time(12 * 3_600_000_000 + 1)),
            (oid::TIMESTAMP, Value::Timestamp(-123_456_789)),
            (oid::TIMESTAMPTZ, Value::TimestampTz(987_654_321)),
            (oid::UUID, Value::Uuid([7; 16])),
            (
                oid::NUMERIC,
                Value::Numeric(Numeric::from_text("-123.45").unwrap()),
            ),
        ];

        for (type_oid, value) in cases {
            let param = registry.encode_param(&value, type_oid).unwrap();
            assert_eq!(param.format, FormatCode::Binary, "oid {type_oid}");
            let decoded = registry
                .decode(type_oid, FormatCode::Binary, param.data.as_deref())
                .unwrap();
            assert_eq!(decoded, value, "oid {type_oid}");
        }
    }

    #[test]
    fn builtin_round_trip_text() {
        let registry = TypeRegistry::with_builtins();

        let cases = vec![
            (oid::BOOL, Value::Bool(false), "f"),
            (oid::INT4, Value::Int4(-42), "-42"),
            (oid::TEXT, Value::Text("plain".into()), "plain"),
            (oid::DATE, Value::Date(0), "2000-01-01"),
            (
                oid::NUMERIC,
                Value::Numeric(Numeric::from_text("99.90").unwrap()),
                "99.90",
            ),
        ];

        for (type_oid, value, text) in cases {
            let codec = registry.codec(type_oid).unwrap();
            let mut out = Vec::new();
            codec.text_encode.as_ref().unwrap()(&value, &mut out).unwrap();
            assert_eq!(out, text.as_bytes(), "oid {type_oid}");

            let decoded = registry
                .decode(type_oid, FormatCode::Text, Some(text.as_bytes()))
                .unwrap();
            assert_eq!(decoded, value, "oid {type_oid}");
        }
    }

    #[test]
    fn unknown_oid_falls_back_to_raw() {
        let registry = TypeRegistry::with_builtins();
        let decoded = registry
            .decode(99_999, FormatCode::Binary, Some(b"blob"))
            .unwrap();
        assert_eq!(
            decoded,
            Value::Raw {
                oid: 99_999,
                format: FormatCode::Binary,
                bytes: b"blob".to_vec(),
            }
        );

        // And raw values pass back through encoding untouched
        let param = registry.encode_param(&decoded, 99_999).unwrap();
        assert_eq!(param.data.as_deref(), Some(&b"blob"[..]));
    }

    #[test]
    fn null_encodes_as_null_param() {
        let registry = TypeRegistry::with_builtins();
        let param = registry.encode_param(&Value::Null, oid::INT4).unwrap();
        assert!(param.data.is_none());
    }

    #[test]
    fn integer_narrowing_is_checked() {
        let registry = TypeRegistry::with_builtins();

        // In range: i64 value encodes into int4
        let ok = registry.encode_param(&Value::Int8(1000), oid::INT4).unwrap();
        assert_eq!(ok.data.as_deref(), Some(&1000_i32.to_be_bytes()[..]));

        // Out of range: refused before anything hits the wire
        let err = registry
            .encode_param(&Value::Int8(i64::MAX), oid::INT4)
            .unwrap_err();
        assert!(matches!(err, Error::Encode(_)));

        let err = registry
            .encode_param(&Value::Int4(70_000), oid::INT2)
            .unwrap_err();
        assert!(matches!(err, Error::Encode(_)));
    }

    #[test]
    fn result_format_follows_binary_decoder() {
        let registry = TypeRegistry::with_builtins();
        assert_eq!(registry.result_format(oid::INT4), FormatCode::Binary);
        assert_eq!(registry.result_format(99_999), FormatCode::Text);
    }

    #[test]
    fn registered_array_round_trips() {
        let registry = TypeRegistry::with_builtins();
        let array = Value::Array(Box::new(ArrayValue::new(
            oid::INT4,
            vec![Value::Int4(1), Value::Null, Value::Int4(3)],
        )));

        let param = registry.encode_param(&array, oid::INT4_ARRAY).unwrap();
        let decoded = registry
            .decode(oid::INT4_ARRAY, FormatCode::Binary, param.data.as_deref())
            .unwrap();
        assert_eq!(decoded, array);
    }

    #[test]
    fn custom_composite_registration() {
        let mut registry = TypeRegistry::with_builtins();
        registry
            .register_composite(
                60_001,
                "inventory_item",
                vec![
                    CompositeField {
                        name: "id".into(),
                        oid: oid::INT4,
                    },
                    CompositeField {
                        name: "label".into(),
                        oid: oid::TEXT,
                    },
                ],
            )
            .unwrap();

        assert_eq!(registry.oid_of("inventory_item"), Some(60_001));

        let value = Value::Composite(CompositeValue {
            fields: vec![
                ("id".into(), Value::Int4(3)),
                ("label".into(), Value::Text("bolt".into())),
            ],
        });

        let param = registry.encode_param(&value, 60_001).unwrap();
        let decoded = registry
            .decode(60_001, FormatCode::Binary, param.data.as_deref())
            .unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn custom_range_registration() {
        let registry = TypeRegistry::with_builtins();

        let range = Value::Range(Box::new(RangeValue {
            subtype_oid: oid::INT4,
            empty: false,
            lower: Some(Value::Int4(1)),
            upper: Some(Value::Int4(10)),
            lower_inclusive: true,
            upper_inclusive: false,
        }));

        let param = registry.encode_param(&range, oid::INT4RANGE).unwrap();
        let decoded = registry
            .decode(oid::INT4RANGE, FormatCode::Binary, param.data.as_deref())
            .unwrap();
        assert_eq!(decoded, range);
    }

    #[test]
    fn domain_aliases_base_codec() {
        let mut registry = TypeRegistry::with_builtins();
        registry.register_domain(70_001, "positive_int", oid::INT4).unwrap();

        let decoded = registry
            .decode(70_001, FormatCode::Binary, Some(&5_i32.to_be_bytes()))
            .unwrap();
        assert_eq!(decoded, Value::Int4(5));
    }

    #[test]
    fn enum_travels_as_text() {
        let mut registry = TypeRegistry::with_builtins();
        registry.register_enum(80_001, "mood");

        let decoded = registry
            .decode(80_001, FormatCode::Text, Some(b"happy"))
            .unwrap();
        assert_eq!(decoded, Value::Text("happy".into()));

        let param = registry
            .encode_param(&Value::Text("sad".into()), 80_001)
            .unwrap();
        assert_eq!(param.data.as_deref(), Some(&b"sad"[..]));
    }
}
