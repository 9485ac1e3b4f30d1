//! Array codec: PostgreSQL's documented binary array format plus the
//! brace-delimited text form.
//!
//! Binary layout:
//! - i32 number of dimensions (0 for an empty array)
//! - i32 has-null flag
//! - u32 element OID
//! - per dimension: i32 length, i32 lower bound
//! - elements in row-major order: i32 length (-1 for NULL) + payload

use crate::error::{Error, Result};
use crate::protocol::codec::Cursor;
use crate::protocol::types::{Oid, oid};

use super::value::Value;

/// One array dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayDim {
    /// Number of elements in this dimension
    pub len: i32,
    /// Lower bound (1 by default in PostgreSQL)
    pub lower: i32,
}

/// An owned array value.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayValue {
    /// Element type OID
    pub elem_oid: Oid,
    /// Dimensions; empty for an empty array
    pub dims: Vec<ArrayDim>,
    /// Elements in row-major order
    pub elements: Vec<Value>,
}

impl ArrayValue {
    /// Create a one-dimensional array with the default lower bound.
    pub fn new(elem_oid: Oid, elements: Vec<Value>) -> Self {
        let dims = if elements.is_empty() {
            Vec::new()
        } else {
            vec![ArrayDim {
                len: elements.len() as i32,
                lower: 1,
            }]
        };
        Self {
            elem_oid,
            dims,
            elements,
        }
    }

    /// OID of the array type containing this element type, for the
    /// built-in element types; 0 (server-inferred) otherwise.
    pub fn array_oid(&self) -> Oid {
        builtin_array_oid(self.elem_oid).unwrap_or(0)
    }

    /// True when any element is NULL.
    pub fn has_null(&self) -> bool {
        self.elements.iter().any(|v| v.is_null())
    }
}

/// Map a built-in element OID to its array container OID.
pub fn builtin_array_oid(elem: Oid) -> Option<Oid> {
    let array = match elem {
        oid::BOOL => oid::BOOL_ARRAY,
        oid::BYTEA => oid::BYTEA_ARRAY,
        oid::NAME => oid::NAME_ARRAY,
        oid::INT2 => oid::INT2_ARRAY,
        oid::INT4 => oid::INT4_ARRAY,
        oid::INT8 => oid::INT8_ARRAY,
        oid::TEXT => oid::TEXT_ARRAY,
        oid::OID => oid::OID_ARRAY,
        oid::FLOAT4 => oid::FLOAT4_ARRAY,
        oid::FLOAT8 => oid::FLOAT8_ARRAY,
        oid::VARCHAR => oid::VARCHAR_ARRAY,
        oid::DATE => oid::DATE_ARRAY,
        oid::TIME => oid::TIME_ARRAY,
        oid::TIMESTAMP => oid::TIMESTAMP_ARRAY,
        oid::TIMESTAMPTZ => oid::TIMESTAMPTZ_ARRAY,
        oid::NUMERIC => oid::NUMERIC_ARRAY,
        oid::UUID => oid::UUID_ARRAY,
        oid::JSONB => oid::JSONB_ARRAY,
        _ => return None,
    };
    Some(array)
}

/// Decode the binary array format.
///
/// `decode_elem` is the element codec's binary decoder.
pub fn decode_binary(
    bytes: &[u8],
    decode_elem: &dyn Fn(&[u8]) -> Result<Value>,
) -> Result<ArrayValue> {
    let mut cur = Cursor::new(bytes);
    let ndim = cur.i32()?;
    let _has_null = cur.i32()?;
    let elem_oid = cur.u32()?;

    if !(0..=6).contains(&ndim) {
        return Err(Error::Decode(format!("invalid array dimensions: {}", ndim)));
    }

    let mut dims = Vec::with_capacity(ndim as usize);
    let mut total: usize = if ndim == 0 { 0 } else { 1 };
    for _ in 0..ndim {
        let len = cur.i32()?;
        let lower = cur.i32()?;
        if len < 0 {
            return Err(Error::Decode(format!("invalid array dimension: {}", len)));
        }
        total = total.saturating_mul(len as usize);
        dims.push(ArrayDim { len, lower });
    }

    let mut elements = Vec::with_capacity(total);
    for _ in 0..total {
        let len = cur.i32()?;
        if len == -1 {
            elements.push(Value::Null);
        } else {
            elements.push(decode_elem(cur.bytes(len as usize)?)?);
        }
    }

    Ok(ArrayValue {
        elem_oid,
        dims,
        elements,
    })
}

/// Append the binary array format to `out`.
///
/// `encode_elem` is the element codec's binary encoder, appending the
/// payload only; the length prefix is written here.
pub fn encode_binary(
    array: &ArrayValue,
    encode_elem: &dyn Fn(&Value, &mut Vec<u8>) -> Result<()>,
    out: &mut Vec<u8>,
) -> Result<()> {
    out.extend_from_slice(&(array.dims.len() as i32).to_be_bytes());
    out.extend_from_slice(&i32::from(array.has_null()).to_be_bytes());
    out.extend_from_slice(&array.elem_oid.to_be_bytes());

    let mut total: usize = if array.dims.is_empty() { 0 } else { 1 };
    for dim in &array.dims {
        out.extend_from_slice(&dim.len.to_be_bytes());
        out.extend_from_slice(&dim.lower.to_be_bytes());
        total = total.saturating_mul(dim.len.max(0) as usize);
    }

    if total != array.elements.len() {
        return Err(Error::Encode(format!(
            "array dimensions cover {} elements but {} were provided",
            total,
            array.elements.len()
        )));
    }

    for element in &array.elements {
        if element.is_null() {
            out.extend_from_slice(&(-1_i32).to_be_bytes());
            continue;
        }
        let len_at = out.len();
        out.extend_from_slice(&[0, 0, 0, 0]);
        encode_elem(element, out)?;
        let len = (out.len() - len_at - 4) as i32;
        out[len_at..len_at + 4].copy_from_slice(&len.to_be_bytes());
    }

    Ok(())
}

/// Decode the brace-delimited text array format.
///
/// `decode_elem` is the element codec's text decoder.
pub fn decode_text(
    input: &str,
    elem_oid: Oid,
    decode_elem: &dyn Fn(&str) -> Result<Value>,
) -> Result<ArrayValue> {
    let trimmed = input.trim();

    // A leading bounds decoration like "[0:2]={…}" overrides lower bounds;
    // parse the braces part and keep default bounds otherwise.
    let body = match trimmed.find('{') {
        Some(pos) => &trimmed[pos..],
        None => return Err(Error::Decode(format!("invalid array text: {:?}", input))),
    };

    let mut parser = TextParser {
        input: body.as_bytes(),
        pos: 0,
    };
    let (elements, dims) = parser.parse_level(decode_elem)?;
    parser.skip_whitespace();
    if parser.pos != parser.input.len() {
        return Err(Error::Decode(format!("trailing array text: {:?}", input)));
    }

    Ok(ArrayValue {
        elem_oid,
        dims,
        elements,
    })
}

struct TextParser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl TextParser<'_> {
    fn skip_whitespace(&mut self) {
        while self.pos < self.input.len() && self.input[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn parse_level(
        &mut self,
        decode_elem: &dyn Fn(&str) -> Result<Value>,
    ) -> Result<(Vec<Value>, Vec<ArrayDim>)> {
        self.skip_whitespace();
        if self.input.get(self.pos) != Some(&b'{') {
            return Err(Error::Decode("array text: expected '{'".into()));
        }
        self.pos += 1;

        let mut elements = Vec::new();
        let mut inner_dims: Option<Vec<ArrayDim>> = None;
        let mut count = 0;

        self.skip_whitespace();
        if self.input.get(self.pos) == Some(&b'}') {
            self.pos += 1;
            return Ok((elements, Vec::new()));
        }

        loop {
            self.skip_whitespace();
            if self.input.get(self.pos) == Some(&b'{') {
                let (child_elements, child_dims) = self.parse_level(decode_elem)?;
                match &inner_dims {
                    None => inner_dims = Some(child_dims),
                    Some(expected) if *expected == child_dims => {}
                    Some(_) => {
                        return Err(Error::Decode("array text: ragged dimensions".into()));
                    }
                }
                elements.extend(child_elements);
            } else {
                elements.push(self.parse_element(decode_elem)?);
            }
            count += 1;

            self.skip_whitespace();
            match self.input.get(self.pos) {
                Some(&b',') => {
                    self.pos += 1;
                }
                Some(&b'}') => {
                    self.pos += 1;
                    break;
                }
                _ => return Err(Error::Decode("array text: expected ',' or '}'".into())),
            }
        }

        let mut dims = vec![ArrayDim {
            len: count,
            lower: 1,
        }];
        if let Some(inner) = inner_dims {
            dims.extend(inner);
        }
        Ok((elements, dims))
    }

    fn parse_element(&mut self, decode_elem: &dyn Fn(&str) -> Result<Value>) -> Result<Value> {
        self.skip_whitespace();

        if self.input.get(self.pos) == Some(&b'"') {
            // Quoted element: backslash escapes anything
            self.pos += 1;
            let mut raw = Vec::new();
            loop {
                match self.input.get(self.pos) {
                    Some(&b'\\') => {
                        let next = self
                            .input
                            .get(self.pos + 1)
                            .ok_or_else(|| Error::Decode("array text: dangling escape".into()))?;
                        raw.push(*next);
                        self.pos += 2;
                    }
                    Some(&b'"') => {
                        self.pos += 1;
                        break;
                    }
                    Some(&b) => {
                        raw.push(b);
                        self.pos += 1;
                    }
                    None => return Err(Error::Decode("array text: unterminated quote".into())),
                }
            }
            let text = simdutf8::compat::from_utf8(&raw)
                .map_err(|e| Error::Decode(format!("array text: invalid UTF-8: {e}")))?;
            return decode_elem(text);
        }

        // Bare element: runs until ',' or '}'
        let start = self.pos;
        while let Some(&b) = self.input.get(self.pos) {
            if b == b',' || b == b'}' {
                break;
            }
            self.pos += 1;
        }
        let raw = &self.input[start..self.pos];
        let text = simdutf8::compat::from_utf8(raw)
            .map_err(|e| Error::Decode(format!("array text: invalid UTF-8: {e}")))?
            .trim();

        if text.eq_ignore_ascii_case("NULL") {
            return Ok(Value::Null);
        }
        decode_elem(text)
    }
}

/// Append the brace-delimited text array format to `out`.
///
/// `encode_elem` renders one element to its text form.
pub fn encode_text(
    array: &ArrayValue,
    encode_elem: &dyn Fn(&Value) -> Result<String>,
    out: &mut String,
) -> Result<()> {
    if array.dims.len() > 1 {
        return encode_text_level(array, 0, &mut 0, encode_elem, out);
    }

    out.push('{');
    for (i, element) in array.elements.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        push_element(element, encode_elem, out)?;
    }
    out.push('}');
    Ok(())
}

fn encode_text_level(
    array: &ArrayValue,
    dim: usize,
    cursor: &mut usize,
    encode_elem: &dyn Fn(&Value) -> Result<String>,
    out: &mut String,
) -> Result<()> {
    out.push('{');
    let len = array.dims[dim].len.max(0) as usize;
    for i in 0..len {
        if i > 0 {
            out.push(',');
        }
        if dim + 1 < array.dims.len() {
            encode_text_level(array, dim + 1, cursor, encode_elem, out)?;
        } else {
            let element = array
                .elements
                .get(*cursor)
                .ok_or_else(|| Error::Encode("array dimensions exceed elements".into()))?;
            push_element(element, encode_elem, out)?;
            *cursor += 1;
        }
    }
    out.push('}');
    Ok(())
}

fn push_element(
    element: &Value,
    encode_elem: &dyn Fn(&Value) -> Result<String>,
    out: &mut String,
) -> Result<()> {
    if element.is_null() {
        out.push_str("NULL");
        return Ok(());
    }

    let text = encode_elem(element)?;
    let needs_quoting = text.is_empty()
        || text.eq_ignore_ascii_case("null")
        || text.bytes().any(|b| {
            matches!(b, b'{' | b'}' | b',' | b'"' | b'\\') || b.is_ascii_whitespace()
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
    Ok(())
}
