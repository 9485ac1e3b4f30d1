//! Range type codec.
//!
//! Binary layout: one flags byte, then for each finite bound present an
//! i32 length-prefixed payload (lower first). The text form is
//! `[lower,upper)` / `empty` with optional quoting of the bound values.

use crate::error::{Error, Result};
use crate::protocol::codec::Cursor;
use crate::protocol::types::{Oid, oid};

use super::value::Value;

/// Range flag bits, from PostgreSQL's `rangetypes.h`.
mod flags {
    pub const EMPTY: u8 = 0x01;
    pub const LOWER_INCLUSIVE: u8 = 0x02;
    pub const UPPER_INCLUSIVE: u8 = 0x04;
    pub const LOWER_INFINITE: u8 = 0x08;
    pub const UPPER_INFINITE: u8 = 0x10;
}

/// An owned range value.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeValue {
    /// Subtype OID (element type of the range)
    pub subtype_oid: Oid,
    /// True for the canonical empty range
    pub empty: bool,
    /// Lower bound; `None` means unbounded
    pub lower: Option<Value>,
    /// Upper bound; `None` means unbounded
    pub upper: Option<Value>,
    /// Lower bound inclusive
    pub lower_inclusive: bool,
    /// Upper bound inclusive
    pub upper_inclusive: bool,
}

impl RangeValue {
    /// The canonical empty range over the given subtype.
    pub fn empty(subtype_oid: Oid) -> Self {
        Self {
            subtype_oid,
            empty: true,
            lower: None,
            upper: None,
            lower_inclusive: false,
            upper_inclusive: false,
        }
    }

    /// OID of the built-in range type over this subtype, 0 otherwise.
    pub fn range_oid(&self) -> Oid {
        match self.subtype_oid {
            oid::INT4 => oid::INT4RANGE,
            oid::INT8 => oid::INT8RANGE,
            oid::NUMERIC => oid::NUMRANGE,
            oid::TIMESTAMP => oid::TSRANGE,
            oid::TIMESTAMPTZ => oid::TSTZRANGE,
            oid::DATE => oid::DATERANGE,
            _ => 0,
        }
    }
}

/// Decode the binary range format.
pub fn decode_binary(
    bytes: &[u8],
    subtype_oid: Oid,
    decode_bound: &dyn Fn(&[u8]) -> Result<Value>,
) -> Result<RangeValue> {
    let mut cur = Cursor::new(bytes);
    let flag_byte = cur.u8()?;

    if flag_byte & flags::EMPTY != 0 {
        return Ok(RangeValue::empty(subtype_oid));
    }

    let read_bound = |cur: &mut Cursor<'_>, present: bool| -> Result<Option<Value>> {
        if !present {
            return Ok(None);
        }
        let len = cur.i32()?;
        if len < 0 {
            return Err(Error::Decode("range bound cannot be NULL".into()));
        }
        decode_bound(cur.bytes(len as usize)?).map(Some)
    };

    let lower = read_bound(&mut cur, flag_byte & flags::LOWER_INFINITE == 0)?;
    let upper = read_bound(&mut cur, flag_byte & flags::UPPER_INFINITE == 0)?;

    Ok(RangeValue {
        subtype_oid,
        empty: false,
        lower,
        upper,
        lower_inclusive: flag_byte & flags::LOWER_INCLUSIVE != 0,
        upper_inclusive: flag_byte & flags::UPPER_INCLUSIVE != 0,
    })
}

/// Append the binary range format to `out`.
pub fn encode_binary(
    range: &RangeValue,
    encode_bound: &dyn Fn(&Value, &mut Vec<u8>) -> Result<()>,
    out: &mut Vec<u8>,
) -> Result<()> {
    if range.empty {
        out.push(flags::EMPTY);
        return Ok(());
    }

    let mut flag_byte = 0u8;
    if range.lower_inclusive {
        flag_byte |= flags::LOWER_INCLUSIVE;
    }
    if range.upper_inclusive {
        flag_byte |= flags::UPPER_INCLUSIVE;
    }
    if range.lower.is_none() {
        flag_byte |= flags::LOWER_INFINITE;
    }
    if range.upper.is_none() {
        flag_byte |= flags::UPPER_INFINITE;
    }
    out.push(flag_byte);

    for bound in [&range.lower, &range.upper].into_iter().flatten() {
        let len_at = out.len();
        out.extend_from_slice(&[0, 0, 0, 0]);
        encode_bound(bound, out)?;
        let len = (out.len() - len_at - 4) as i32;
        out[len_at..len_at + 4].copy_from_slice(&len.to_be_bytes());
    }

    Ok(())
}

/// Decode the text range format (`empty`, `[a,b)`, `(,b]`, …).
pub fn decode_text(
    input: &str,
    subtype_oid: Oid,
    decode_bound: &dyn Fn(&str) -> Result<Value>,
) -> Result<RangeValue> {
    let trimmed = input.trim();
    if trimmed.eq_ignore_ascii_case("empty") {
        return Ok(RangeValue::empty(subtype_oid));
    }

    let bytes = trimmed.as_bytes();
    let lower_inclusive = match bytes.first() {
        Some(&b'[') => true,
        Some(&b'(') => false,
        _ => return Err(Error::Decode(format!("invalid range text: {:?}", input))),
    };
    let upper_inclusive = match bytes.last() {
        Some(&b']') => true,
        Some(&b')') => false,
        _ => return Err(Error::Decode(format!("invalid range text: {:?}", input))),
    };

    let body = &bytes[1..bytes.len() - 1];

    // Split on the comma outside quotes
    let mut depth_quote = false;
    let mut split = None;
    let mut i = 0;
    while i < body.len() {
        match body[i] {
            b'\\' => i += 1,
            b'"' => depth_quote = !depth_quote,
            b',' if !depth_quote => {
                split = Some(i);
                break;
            }
            _ => {}
        }
        i += 1;
    }
    let split = split.ok_or_else(|| Error::Decode(format!("invalid range text: {:?}", input)))?;

    let parse_bound = |raw: &[u8]| -> Result<Option<Value>> {
        if raw.is_empty() {
            return Ok(None);
        }
        let unquoted = if raw.first() == Some(&b'"') && raw.last() == Some(&b'"') && raw.len() >= 2
        {
            let inner = &raw[1..raw.len() - 1];
            let mut unescaped = Vec::with_capacity(inner.len());
            let mut i = 0;
            while i < inner.len() {
                match inner[i] {
                    b'\\' if i + 1 < inner.len() => {
                        unescaped.push(inner[i + 1]);
                        i += 2;
                    }
                    b'"' if inner.get(i + 1) == Some(&b'"') => {
                        unescaped.push(b'"');
                        i += 2;
                    }
                    b => {
                        unescaped.push(b);
                        i += 1;
                    }
                }
            }
            unescaped
        } else {
            raw.to_vec()
        };
        let text = simdutf8::compat::from_utf8(&unquoted)
            .map_err(|e| Error::Decode(format!("range text: invalid UTF-8: {e}")))?;
        decode_bound(text).map(Some)
    };

    Ok(RangeValue {
        subtype_oid,
        empty: false,
        lower: parse_bound(&body[..split])?,
        upper: parse_bound(&body[split + 1..])?,
        lower_inclusive,
        upper_inclusive,
    })
}

/// Append the text range format to `out`.
pub fn encode_text(
    range: &RangeValue,
    encode_bound: &dyn Fn(&Value) -> Result<String>,
    out: &mut String,
) -> Result<()> {
    if range.empty {
        out.push_str("empty");
        return Ok(());
    }

    out.push(if range.lower_inclusive { '[' } else { '(' });

    let mut push_bound = |bound: &Option<Value>, out: &mut String| -> Result<()> {
        if let Some(value) = bound {
            let text = encode_bound(value)?;
            let needs_quoting = text.is_empty()
                || text.bytes().any(|b| {
                    matches!(b, b'(' | b')' | b'[' | b']' | b',' | b'"' | b'\\')
                        || b.is_ascii_whitespace()
                });
            if needs_quoting {
                out.push('"');
                for c in text.chars() {
                    if c == '"' || c == '\\' {
                        out.push('\\');
                    }
                    out.push(c);
                }
                out.push('"');
            } else {
                out.push_str(&text);
            }
        }
        Ok(())
    };

    push_bound(&range.lower, out)?;
    out.push(',');
    push_bound(&range.upper, out)?;
    out.push(if range.upper_inclusive { ']' } else { ')' });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int4_decode_binary(bytes: &[u8]) -> Result<Value> {
        let arr: [u8; 4] = bytes
            .try_into()
            .map_err(|_| Error::Decode("bad int4".into()))?;
        Ok(Value::Int4(i32::from_be_bytes(arr)))
    }

    fn int4_encode_binary(value: &Value, out: &mut Vec<u8>) -> Result<()> {
        match value {
            Value::Int4(v) => {
                out.extend_from_slice(&v.to_be_bytes());
                Ok(())
            }
            _ => Err(Error::Encode("expected int4".into())),
        }
    }

    fn int4_decode_text(s: &str) -> Result<Value> {
        s.parse()
            .map(Value::Int4)
            .map_err(|e| Error::Decode(format!("bad int4: {e}")))
    }

    #[test]
    fn binary_round_trip() {
        let range = RangeValue {
            subtype_oid: oid::INT4,
            empty: false,
            lower: Some(Value::Int4(1)),
            upper: Some(Value::Int4(10)),
            lower_inclusive: true,
            upper_inclusive: false,
        };

        let mut encoded = Vec::new();
        encode_binary(&range, &int4_encode_binary, &mut encoded).unwrap();
        assert_eq!(encoded[0], 0x02);

        let decoded = decode_binary(&encoded, oid::INT4, &int4_decode_binary).unwrap();
        assert_eq!(decoded, range);
    }

    #[test]
    fn binary_empty() {
        let mut encoded = Vec::new();
        encode_binary(&RangeValue::empty(oid::INT4), &int4_encode_binary, &mut encoded).unwrap();
        assert_eq!(encoded, vec![0x01]);

        let decoded = decode_binary(&encoded, oid::INT4, &int4_decode_binary).unwrap();
        assert!(decoded.empty);
    }

    #[test]
    fn binary_unbounded_sides() {
        let range = RangeValue {
            subtype_oid: oid::INT4,
            empty: false,
            lower: None,
            upper: Some(Value::Int4(5)),
            lower_inclusive: false,
            upper_inclusive: true,
        };

        let mut encoded = Vec::new();
        encode_binary(&range, &int4_encode_binary, &mut encoded).unwrap();
        assert_eq!(encoded[0], 0x04 | 0x08);

        let decoded = decode_binary(&encoded, oid::INT4, &int4_decode_binary).unwrap();
        assert_eq!(decoded, range);
    }

    #[test]
    fn text_round_trip() {
        let range = decode_text("[1,10)", oid::INT4, &int4_decode_text).unwrap();
        assert_eq!(range.lower, Some(Value::Int4(1)));
        assert_eq!(range.upper, Some(Value::Int4(10)));
        assert!(range.lower_inclusive);
        assert!(!range.upper_inclusive);

        let mut out = String::new();
        encode_text(
            &range,
            &|v| match v {
                Value::Int4(n) => Ok(n.to_string()),
                _ => Err(Error::Encode("expected int4".into())),
            },
            &mut out,
        )
        .unwrap();
        assert_eq!(out, "[1,10)");
    }

    #[test]
    fn text_empty_and_unbounded() {
        assert!(decode_text("empty", oid::INT4, &int4_decode_text)
            .unwrap()
            .empty);

        let range = decode_text("(,5]", oid::INT4, &int4_decode_text).unwrap();
        assert_eq!(range.lower, None);
        assert_eq!(range.upper, Some(Value::Int4(5)));
        assert!(range.upper_inclusive);
    }

    #[test]
    fn range_oid_mapping() {
        assert_eq!(RangeValue::empty(oid::INT4).range_oid(), oid::INT4RANGE);
        assert_eq!(RangeValue::empty(oid::DATE).range_oid(), oid::DATERANGE);
        assert_eq!(RangeValue::empty(oid::TEXT).range_oid(), 0);
    }
}
