//! Codec for the PHP `serialize()` text format the CMS stores attachment
//! metadata in.
//!
//! String lengths are byte counts, not character counts, both when reading
//! and writing. Arrays keep their key order, which matters because the CMS
//! compares serialized blobs as strings.

use std::fmt::Write as _;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} at byte {offset}")]
pub struct PhpSerializeError {
    pub offset: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PhpKey {
    Int(i64),
    Str(String),
}

impl PhpKey {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PhpKey::Str(s) => Some(s),
            PhpKey::Int(_) => None,
        }
    }
}

impl From<&str> for PhpKey {
    fn from(s: &str) -> Self {
        PhpKey::Str(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PhpValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<(PhpKey, PhpValue)>),
    Object {
        class: String,
        props: Vec<(PhpKey, PhpValue)>,
    },
}

impl PhpValue {
    /// Entries of an array or object.
    pub fn entries(&self) -> Option<&[(PhpKey, PhpValue)]> {
        match self {
            PhpValue::Array(entries) | PhpValue::Object { props: entries, .. } => Some(entries),
            _ => None,
        }
    }

    /// Value under string key `key` of an array or object.
    pub fn get(&self, key: &str) -> Option<&PhpValue> {
        self.entries()?
            .iter()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PhpValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view, accepting numeric strings and integral floats since the
    /// CMS is not consistent about which it stores.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PhpValue::Int(i) => Some(*i),
            PhpValue::Str(s) => s.trim().parse().ok(),
            PhpValue::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// Encoding
// ═══════════════════════════════════════════════════════════════

pub fn serialize(value: &PhpValue) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut String, value: &PhpValue) {
    match value {
        PhpValue::Null => out.push_str("N;"),
        PhpValue::Bool(b) => {
            let _ = write!(out, "b:{};", u8::from(*b));
        }
        PhpValue::Int(i) => {
            let _ = write!(out, "i:{};", i);
        }
        PhpValue::Float(f) => {
            out.push_str("d:");
            if f.is_nan() {
                out.push_str("NAN");
            } else if f.is_infinite() {
                out.push_str(if *f > 0.0 { "INF" } else { "-INF" });
            } else {
                write_float(out, *f);
            }
            out.push(';');
        }
        PhpValue::Str(s) => write_str(out, s),
        PhpValue::Array(entries) => {
            let _ = write!(out, "a:{}:{{", entries.len());
            write_entries(out, entries);
            out.push('}');
        }
        PhpValue::Object { class, props } => {
            let _ = write!(out, "O:{}:\"{}\":{}:{{", class.len(), class, props.len());
            write_entries(out, props);
            out.push('}');
        }
    }
}

/// Shortest round-trip digits laid out the way PHP does with
/// `serialize_precision = -1`: plain notation for decimal exponents in
/// `-4..=16` with no trailing `.0`, otherwise `d.dddE+x` with at least one
/// fractional digit (`1.0E+25`, `1.5E-7`).
fn write_float(out: &mut String, f: f64) {
    if f == 0.0 {
        out.push_str(if f.is_sign_negative() { "-0" } else { "0" });
        return;
    }
    if f.is_sign_negative() {
        out.push('-');
    }
    // `{:e}` yields the shortest digits that round-trip, e.g. `1.5e-7`.
    let sci = format!("{:e}", f.abs());
    let (mantissa, exponent) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let exponent: i32 = exponent.parse().unwrap_or(0);
    // Digits are `0.d1d2...` times 10^decpt.
    let decpt = exponent + 1;

    if decpt < -3 || decpt > 17 {
        let (first, rest) = digits.split_at(1);
        let _ = write!(
            out,
            "{}.{}E{}{}",
            first,
            if rest.is_empty() { "0" } else { rest },
            if exponent < 0 { '-' } else { '+' },
            exponent.abs()
        );
    } else if decpt <= 0 {
        out.push_str("0.");
        out.extend(std::iter::repeat('0').take(decpt.unsigned_abs() as usize));
        out.push_str(&digits);
    } else {
        let decpt = decpt as usize;
        if digits.len() <= decpt {
            out.push_str(&digits);
            out.extend(std::iter::repeat('0').take(decpt - digits.len()));
        } else {
            out.push_str(&digits[..decpt]);
            out.push('.');
            out.push_str(&digits[decpt..]);
        }
    }
}

fn write_str(out: &mut String, s: &str) {
    let _ = write!(out, "s:{}:\"{}\";", s.len(), s);
}

fn write_entries(out: &mut String, entries: &[(PhpKey, PhpValue)]) {
    for (key, value) in entries {
        match key {
            PhpKey::Int(i) => {
                let _ = write!(out, "i:{};", i);
            }
            PhpKey::Str(s) => write_str(out, s),
        }
        write_value(out, value);
    }
}

// ═══════════════════════════════════════════════════════════════
// Decoding
// ═══════════════════════════════════════════════════════════════

/// Decode one complete value; trailing bytes are an error.
pub fn unserialize(input: &str) -> Result<PhpValue, PhpSerializeError> {
    let mut parser = Parser {
        bytes: input.as_bytes(),
        pos: 0,
    };
    let value = parser.value()?;
    if parser.pos != parser.bytes.len() {
        return Err(parser.error("trailing data after value"));
    }
    Ok(value)
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, message: impl Into<String>) -> PhpSerializeError {
        PhpSerializeError {
            offset: self.pos,
            message: message.into(),
        }
    }

    fn next_byte(&mut self) -> Result<u8, PhpSerializeError> {
        let b = *self
            .bytes
            .get(self.pos)
            .ok_or_else(|| self.error("unexpected end of input"))?;
        self.pos += 1;
        Ok(b)
    }

    fn expect(&mut self, expected: u8) -> Result<(), PhpSerializeError> {
        let start = self.pos;
        let b = self.next_byte()?;
        if b != expected {
            self.pos = start;
            return Err(self.error(format!(
                "expected '{}', found '{}'",
                expected as char, b as char
            )));
        }
        Ok(())
    }

    /// Text up to (not including) `terminator`, consuming the terminator.
    fn until(&mut self, terminator: u8) -> Result<&'a str, PhpSerializeError> {
        let start = self.pos;
        let len = self.bytes[start..]
            .iter()
            .position(|b| *b == terminator)
            .ok_or_else(|| self.error(format!("missing '{}'", terminator as char)))?;
        self.pos = start + len + 1;
        std::str::from_utf8(&self.bytes[start..start + len]).map_err(|_| PhpSerializeError {
            offset: start,
            message: "invalid UTF-8".into(),
        })
    }

    fn int(&mut self, terminator: u8) -> Result<i64, PhpSerializeError> {
        let start = self.pos;
        let text = self.until(terminator)?;
        text.parse().map_err(|_| PhpSerializeError {
            offset: start,
            message: format!("invalid integer {:?}", text),
        })
    }

    fn count(&mut self, terminator: u8) -> Result<usize, PhpSerializeError> {
        let start = self.pos;
        let n = self.int(terminator)?;
        usize::try_from(n).map_err(|_| PhpSerializeError {
            offset: start,
            message: format!("negative length {}", n),
        })
    }

    /// `<len>:"<bytes>"` with the length in bytes.
    fn quoted(&mut self) -> Result<String, PhpSerializeError> {
        let len = self.count(b':')?;
        self.expect(b'"')?;
        let start = self.pos;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| self.error(format!("string length {} runs past end of input", len)))?;
        let text = std::str::from_utf8(&self.bytes[start..end]).map_err(|_| PhpSerializeError {
            offset: start,
            message: format!("string of {} bytes is not valid UTF-8", len),
        })?;
        self.pos = end;
        self.expect(b'"')
            .map_err(|e| PhpSerializeError {
                message: format!("string length {} does not match its contents: {}", len, e.message),
                ..e
            })?;
        Ok(text.to_string())
    }

    fn entries(&mut self) -> Result<Vec<(PhpKey, PhpValue)>, PhpSerializeError> {
        let n = self.count(b':')?;
        self.expect(b'{')?;
        let mut entries = Vec::with_capacity(n.min(1024));
        for _ in 0..n {
            let key = match self.value()? {
                PhpValue::Int(i) => PhpKey::Int(i),
                PhpValue::Str(s) => PhpKey::Str(s),
                _ => return Err(self.error("array key must be an integer or string")),
            };
            let value = self.value()?;
            entries.push((key, value));
        }
        self.expect(b'}')?;
        Ok(entries)
    }

    fn value(&mut self) -> Result<PhpValue, PhpSerializeError> {
        let tag_pos = self.pos;
        let tag = self.next_byte()?;
        if tag == b'N' {
            self.expect(b';')?;
            return Ok(PhpValue::Null);
        }
        self.expect(b':')?;
        match tag {
            b'b' => match self.until(b';')? {
                "0" => Ok(PhpValue::Bool(false)),
                "1" => Ok(PhpValue::Bool(true)),
                other => Err(PhpSerializeError {
                    offset: tag_pos,
                    message: format!("invalid boolean {:?}", other),
                }),
            },
            b'i' => Ok(PhpValue::Int(self.int(b';')?)),
            b'd' => {
                let text = self.until(b';')?;
                let value = match text {
                    "INF" => f64::INFINITY,
                    "-INF" => f64::NEG_INFINITY,
                    "NAN" => f64::NAN,
                    _ => text.parse().map_err(|_| PhpSerializeError {
                        offset: tag_pos,
                        message: format!("invalid float {:?}", text),
                    })?,
                };
                Ok(PhpValue::Float(value))
            }
            b's' => {
                let s = self.quoted()?;
                self.expect(b';')?;
                Ok(PhpValue::Str(s))
            }
            b'a' => Ok(PhpValue::Array(self.entries()?)),
            b'O' => {
                let class = self.quoted()?;
                self.expect(b':')?;
                let props = self.entries()?;
                Ok(PhpValue::Object { class, props })
            }
            other => Err(PhpSerializeError {
                offset: tag_pos,
                message: format!("unsupported type tag '{}'", other as char),
            }),
        }
    }
}
