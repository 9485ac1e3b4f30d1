//! Composite (row) type codec.
//!
//! Binary layout: i32 field count, then per field a u32 type OID and an
//! i32 length (-1 for NULL) followed by the payload. The text form is the
//! parenthesized record syntax with `""` doubling inside quotes.

use crate::error::{Error, Result};
use crate::protocol::codec::Cursor;
use crate::protocol::types::Oid;

use super::value::Value;

/// One field of a registered composite type.
#[derive(Debug, Clone)]
pub struct CompositeField {
    /// Field name (attname)
    pub name: String,
    /// Field type OID
    pub oid: Oid,
}

/// An owned composite value: ordered (name, value) pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeValue {
    /// Fields in declaration order
    pub fields: Vec<(String, Value)>,
}

impl CompositeValue {
    /// Look up a field by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

/// Decode the binary record format.
///
/// `fields` is the registered field list; `decode_field` decodes one
/// field payload given its declared OID.
pub fn decode_binary(
    bytes: &[u8],
    fields: &[CompositeField],
    decode_field: &dyn Fn(Oid, &[u8]) -> Result<Value>,
) -> Result<CompositeValue> {
    let mut cur = Cursor::new(bytes);
    let count = cur.i32()?;
    if count < 0 || count as usize != fields.len() {
        return Err(Error::Decode(format!(
            "composite has {} fields, expected {}",
            count,
            fields.len()
        )));
    }

    let mut out = Vec::with_capacity(fields.len());
    for field in fields {
        let oid = cur.u32()?;
        if oid != field.oid {
            return Err(Error::Decode(format!(
                "composite field {} has oid {}, expected {}",
                field.name, oid, field.oid
            )));
        }
        let len = cur.i32()?;
        if len == -1 {
            out.push((field.name.clone(), Value::Null));
        } else {
            let payload = cur.bytes(len as usize)?;
            out.push((field.name.clone(), decode_field(oid, payload)?));
        }
    }

    Ok(CompositeValue { fields: out })
}

/// Append the binary record format to `out`.
pub fn encode_binary(
    value: &CompositeValue,
    fields: &[CompositeField],
    encode_field: &dyn Fn(Oid, &Value, &mut Vec<u8>) -> Result<()>,
    out: &mut Vec<u8>,
) -> Result<()> {
    if value.fields.len() != fields.len() {
        return Err(Error::Encode(format!(
            "composite has {} fields, expected {}",
            value.fields.len(),
            fields.len()
        )));
    }

    out.extend_from_slice(&(fields.len() as i32).to_be_bytes());
    for (field, (_, v)) in fields.iter().zip(&value.fields) {
        out.extend_from_slice(&field.oid.to_be_bytes());
        if v.is_null() {
            out.extend_from_slice(&(-1_i32).to_be_bytes());
            continue;
        }
        let len_at = out.len();
        out.extend_from_slice(&[0, 0, 0, 0]);
        encode_field(field.oid, v, out)?;
        let len = (out.len() - len_at - 4) as i32;
        out[len_at..len_at + 4].copy_from_slice(&len.to_be_bytes());
    }
    Ok(())
}

/// Decode the parenthesized text record format.
pub fn decode_text(
    input: &str,
    fields: &[CompositeField],
    decode_field: &dyn Fn(Oid, &str) -> Result<Value>,
) -> Result<CompositeValue> {
    let trimmed = input.trim();
    let body = trimmed
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| Error::Decode(format!("invalid composite text: {:?}", input)))?;

    let bytes = body.as_bytes();
    let mut pos = 0;
    let mut out = Vec::with_capacity(fields.len());

    for (idx, field) in fields.iter().enumerate() {
        if idx > 0 {
            if bytes.get(pos) != Some(&b',') {
                return Err(Error::Decode("composite text: expected ','".into()));
            }
            pos += 1;
        }

        // Unquoted empty field is NULL
        if matches!(bytes.get(pos), None | Some(&b',')) {
            out.push((field.name.clone(), Value::Null));
            continue;
        }

        let raw = if bytes[pos] == b'"' {
            pos += 1;
            let mut raw = Vec::new();
            loop {
                match bytes.get(pos) {
                    Some(&b'"') if bytes.get(pos + 1) == Some(&b'"') => {
                        raw.push(b'"');
                        pos += 2;
                    }
                    Some(&b'"') => {
                        pos += 1;
                        break;
                    }
                    Some(&b'\\') => {
                        let next = bytes.get(pos + 1).ok_or_else(|| {
                            Error::Decode("composite text: dangling escape".into())
                        })?;
                        raw.push(*next);
                        pos += 2;
                    }
                    Some(&b) => {
                        raw.push(b);
                        pos += 1;
                    }
                    None => {
                        return Err(Error::Decode(
                            "composite text: unterminated quote".into(),
                        ));
                    }
                }
            }
            raw
        } else {
            let start = pos;
            while pos < bytes.len() && bytes[pos] != b',' {
                pos += 1;
            }
            bytes[start..pos].to_vec()
        };

        let text = simdutf8::compat::from_utf8(&raw)
            .map_err(|e| Error::Decode(format!("composite text: invalid UTF-8: {e}")))?;
        out.push((field.name.clone(), decode_field(field.oid, text)?));
    }

    if pos != bytes.len() {
        return Err(Error::Decode("composite text: trailing data".into()));
    }

    Ok(CompositeValue { fields: out })
}

/// Append the parenthesized text record format to `out`.
pub fn encode_text(
    value: &CompositeValue,
    fields: &[CompositeField],
    encode_field: &dyn Fn(Oid, &Value) -> Result<String>,
    out: &mut String,
) -> Result<()> {
    if value.fields.len() != fields.len() {
        return Err(Error::Encode(format!(
            "composite has {} fields, expected {}",
            value.fields.len(),
            fields.len()
        )));
    }

    out.push('(');
    for (idx, (field, (_, v))) in fields.iter().zip(&value.fields).enumerate() {
        if idx > 0 {
            out.push(',');
        }
        if v.is_null() {
            continue; // NULL renders as an empty field
        }
        let text = encode_field(field.oid, v)?;
        let needs_quoting = text.is_empty()
            || text
                .bytes()
                .any(|b| matches!(b, b'(' | b')' | b',' | b'"' | b'\\') || b.is_ascii_whitespace());
        if needs_quoting {
            out.push('"');
            for c in text.chars() {
                if c == '"' {
                    out.push('"');
                }
                if c == '\\' {
                    out.push('\\');
                }
                out.push(c);
            }
            out.push('"');
        } else {
            out.push_str(&text);
        }
    }
    out.push(')');
    Ok(())
}
