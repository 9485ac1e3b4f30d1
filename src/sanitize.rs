//! Placeholder interpolation for the simple query protocol.
//!
//! The lexer walks the SQL with three states (raw text, single-quoted
//! literal, double-quoted identifier); `$N` sequences found in raw state
//! are replaced with literal-encoded arguments. `''` and `""` do not close
//! their quotes. Interpolation is refused when the server reports
//! `standard_conforming_strings = off`, because backslash handling would
//! change the lexing rules.

use crate::error::{Error, Result};
use crate::types::datetime;
use crate::types::value::Value;

/// Quote an identifier, doubling embedded `"`.
///
/// Used for LISTEN/UNLISTEN channel names and DEALLOCATE statement names,
/// which accept arbitrary strings.
pub fn quote_identifier(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    out.push('"');
    for c in name.chars() {
        if c == '"' {
            out.push('"');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Render one argument as a SQL literal.
pub fn quote_literal(value: &Value, out: &mut String) -> Result<()> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Int2(v) => out.push_str(&v.to_string()),
        Value::Int4(v) => out.push_str(&v.to_string()),
        Value::Int8(v) => out.push_str(&v.to_string()),
        Value::Float4(v) => float_literal(f64::from(*v), out),
        Value::Float8(v) => float_literal(*v, out),
        Value::Numeric(n) => {
            let text = n.to_string();
            if text.chars().all(|c| c.is_ascii_digit() || c == '-' || c == '.') {
                out.push_str(&text);
            } else {
                // NaN / Infinity need quoting
                string_literal(&text, out)?;
            }
        }
        Value::Text(s) => string_literal(s, out)?,
        Value::Json(s) | Value::Jsonb(s) => string_literal(s, out)?,
        Value::Bytea(data) => {
            // E'\\x<hex>' survives both conforming-string settings
            out.push_str("E'\\\\x");
            for b in data {
                out.push_str(&format!("{:02x}", b));
            }
            out.push('\'');
        }
        Value::Date(days) => string_literal(&datetime::format_date(*days), out)?,
        Value::Time(micros) => string_literal(&datetime::format_time(*micros), out)?,
        Value::Timestamp(micros) => string_literal(&datetime::format_timestamp(*micros), out)?,
        Value::TimestampTz(micros) => {
            string_literal(&datetime::format_timestamptz(*micros), out)?
        }
        Value::Uuid(bytes) => {
            let mut text = String::with_capacity(36);
            for (i, b) in bytes.iter().enumerate() {
                if matches!(i, 4 | 6 | 8 | 10) {
                    text.push('-');
                }
                text.push_str(&format!("{:02x}", b));
            }
            string_literal(&text, out)?;
        }
        Value::Array(_) | Value::Composite(_) | Value::Range(_) | Value::Raw { .. } => {
            return Err(Error::Encode(format!(
                "argument {:?} cannot be rendered as a simple-protocol literal",
                value
            )));
        }
    }
    Ok(())
}

fn string_literal(s: &str, out: &mut String) -> Result<()> {
    // NUL cannot travel in a query string
    if s.contains('\0') {
        return Err(Error::Encode("string argument contains NUL".into()));
    }
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push('\'');
        }
        out.push(c);
    }
    out.push('\'');
    Ok(())
}

fn float_literal(v: f64, out: &mut String) {
    if v.is_nan() {
        out.push_str("'NaN'");
    } else if v == f64::INFINITY {
        out.push_str("'Infinity'");
    } else if v == f64::NEG_INFINITY {
        out.push_str("'-Infinity'");
    } else {
        out.push_str(&v.to_string());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexState {
    Raw,
    SingleQuote,
    DoubleQuote,
}

/// Substitute `$N` placeholders with literal-encoded arguments.
///
/// Placeholders are 1-based; every argument must be used by at least the
/// highest placeholder referenced. A `$` not followed by digits is
/// literal text.
pub fn interpolate(sql: &str, args: &[Value]) -> Result<String> {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len() + args.len() * 8);
    let mut state = LexState::Raw;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match state {
            LexState::Raw => match b {
                b'\'' => {
                    state = LexState::SingleQuote;
                    out.push('\'');
                    i += 1;
                }
                b'"' => {
                    state = LexState::DoubleQuote;
                    out.push('"');
                    i += 1;
                }
                b'$' => {
                    let digits_start = i + 1;
                    let mut digits_end = digits_start;
                    while digits_end < bytes.len() && bytes[digits_end].is_ascii_digit() {
                        digits_end += 1;
                    }
                    if digits_end == digits_start {
                        // Plain dollar (or a $tag$ quote, which the server
                        // will reject anyway without conforming lexing)
                        out.push('$');
                        i += 1;
                        continue;
                    }
                    let index: usize = sql[digits_start..digits_end]
                        .parse()
                        .map_err(|_| Error::Encode("placeholder index overflow".into()))?;
                    if index == 0 || index > args.len() {
                        return Err(Error::Encode(format!(
                            "placeholder ${} out of range (have {} arguments)",
                            index,
                            args.len()
                        )));
                    }
                    quote_literal(&args[index - 1], &mut out)?;
                    i = digits_end;
                }
                _ => {
                    // Push whole UTF-8 char
                    let ch_len = utf8_len(b);
                    out.push_str(&sql[i..i + ch_len]);
                    i += ch_len;
                }
            },
            LexState::SingleQuote => match b {
                b'\'' => {
                    // '' stays inside the literal
                    if bytes.get(i + 1) == Some(&b'\'') {
                        out.push_str("''");
                        i += 2;
                    } else {
                        state = LexState::Raw;
                        out.push('\'');
                        i += 1;
                    }
                }
                _ => {
                    let ch_len = utf8_len(b);
                    out.push_str(&sql[i..i + ch_len]);
                    i += ch_len;
                }
            },
            LexState::DoubleQuote => match b {
                b'"' => {
                    if bytes.get(i + 1) == Some(&b'"') {
                        out.push_str("\"\"");
                        i += 2;
                    } else {
                        state = LexState::Raw;
                        out.push('"');
                        i += 1;
                    }
                }
                _ => {
                    let ch_len = utf8_len(b);
                    out.push_str(&sql[i..i + ch_len]);
                    i += ch_len;
                }
            },
        }
    }

    Ok(out)
}

fn utf8_len(first_byte: u8) -> usize {
    match first_byte {
        0x00..=0x7F => 1,
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        _ => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_substitution() {
        let out = interpolate("select $1, $2", &[Value::Int4(42), Value::from("hi")]).unwrap();
        assert_eq!(out, "select 42, 'hi'");
    }

    #[test]
    fn string_quotes_doubled() {
        let out = interpolate("select $1", &[Value::from("it's")]).unwrap();
        assert_eq!(out, "select 'it''s'");
    }

    #[test]
    fn placeholder_inside_single_quotes_is_literal() {
        let out = interpolate("select '$1', $1", &[Value::Int4(7)]).unwrap();
        assert_eq!(out, "select '$1', 7");
    }

    #[test]
    fn placeholder_inside_identifier_is_literal() {
        let out = interpolate("select \"$1\" from t where x = $1", &[Value::Int4(7)]).unwrap();
        assert_eq!(out, "select \"$1\" from t where x = 7");
    }

    #[test]
    fn doubled_quote_does_not_close_literal() {
        let out = interpolate("select 'a''$1' , $1", &[Value::Int4(1)]).unwrap();
        assert_eq!(out, "select 'a''$1' , 1");
    }

    #[test]
    fn bare_dollar_is_literal() {
        let out = interpolate("select '$' , $1, $x", &[Value::Int4(1)]).unwrap();
        assert_eq!(out, "select '$' , 1, $x");
    }

    #[test]
    fn out_of_range_placeholder_fails() {
        let err = interpolate("select $2", &[Value::Int4(1)]).unwrap_err();
        assert!(matches!(err, Error::Encode(_)));
        assert!(interpolate("select $0", &[Value::Int4(1)]).is_err());
    }

    #[test]
    fn null_renders_bare() {
        let out = interpolate("select $1", &[Value::Null]).unwrap();
        assert_eq!(out, "select null");
    }

    #[test]
    fn bytes_render_hex_escape() {
        let out = interpolate("select $1", &[Value::Bytea(vec![0xDE, 0xAD])]).unwrap();
        assert_eq!(out, "select E'\\\\xdead'");
    }

    #[test]
    fn booleans_and_floats() {
        let out = interpolate(
            "select $1, $2, $3",
            &[Value::Bool(true), Value::Float8(1.5), Value::Float8(f64::NAN)],
        )
        .unwrap();
        assert_eq!(out, "select true, 1.5, 'NaN'");
    }

    #[test]
    fn timestamps_quoted() {
        let out = interpolate("select $1", &[Value::Timestamp(0)]).unwrap();
        assert_eq!(out, "select '2000-01-01 00:00:00'");

        let out = interpolate("select $1", &[Value::TimestampTz(0)]).unwrap();
        assert_eq!(out, "select '2000-01-01 00:00:00+00'");
    }

    #[test]
    fn nul_in_string_refused() {
        let err = interpolate("select $1", &[Value::from("a\0b")]).unwrap_err();
        assert!(matches!(err, Error::Encode(_)));
    }

    #[test]
    fn repeated_placeholder() {
        let out = interpolate("select $1 + $1", &[Value::Int4(3)]).unwrap();
        assert_eq!(out, "select 3 + 3");
    }

    #[test]
    fn multibyte_text_passthrough() {
        let out = interpolate("select 'héllo', $1", &[Value::from("wörld")]).unwrap();
        assert_eq!(out, "select 'héllo', 'wörld'");
    }

    #[test]
    fn quote_identifier_doubling() {
        assert_eq!(quote_identifier("chat"), "\"chat\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }
}
