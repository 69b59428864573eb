//! Minimal protobuf wire codec
//!
//! Only what the provisioning messages need: varint and length-delimited
//! fields, written in field order and looked up by linear scan. Default
//! values are omitted on write and reported as absent on read, as proto3
//! does.

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_LEN: u8 = 2;
const WIRE_FIXED32: u8 = 5;

const MAX_VARINT_LEN: usize = 10;

pub fn encode_varint(mut value: u64, out: &mut Vec<u8>) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Returns the value and the number of bytes consumed.
pub fn decode_varint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    for (i, &b) in buf.iter().take(MAX_VARINT_LEN).enumerate() {
        value |= ((b & 0x7F) as u64) << (7 * i);
        if b & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

fn key(field: u32, wire: u8) -> u64 {
    ((field as u64) << 3) | wire as u64
}

/// Message builder
#[derive(Debug, Clone, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Varint field, omitted when zero
    pub fn varint(mut self, field: u32, value: u64) -> Self {
        if value != 0 {
            encode_varint(key(field, WIRE_VARINT), &mut self.buf);
            encode_varint(value, &mut self.buf);
        }
        self
    }

    /// Varint field written even when zero (oneof members carry presence)
    pub fn varint_always(mut self, field: u32, value: u64) -> Self {
        encode_varint(key(field, WIRE_VARINT), &mut self.buf);
        encode_varint(value, &mut self.buf);
        self
    }

    /// Bool field, omitted when false
    pub fn bool(self, field: u32, value: bool) -> Self {
        self.varint(field, value as u64)
    }

    /// Bytes field, omitted when empty
    pub fn bytes(mut self, field: u32, value: &[u8]) -> Self {
        if !value.is_empty() {
            self.put_len_delimited(field, value);
        }
        self
    }

    pub fn string(self, field: u32, value: &str) -> Self {
        self.bytes(field, value.as_bytes())
    }

    /// Embedded message. Always written, an empty body still marks presence.
    pub fn message(mut self, field: u32, inner: Writer) -> Self {
        self.put_len_delimited(field, &inner.buf);
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    fn put_len_delimited(&mut self, field: u32, value: &[u8]) {
        encode_varint(key(field, WIRE_LEN), &mut self.buf);
        encode_varint(value.len() as u64, &mut self.buf);
        self.buf.extend_from_slice(value);
    }
}

/// One field as found on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
    Varint(u64),
    Bytes(&'a [u8]),
    Fixed64(&'a [u8]),
    Fixed32(&'a [u8]),
}

/// Iterator over `(field number, value)` pairs; stops at the first malformed field.
pub struct Fields<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for Fields<'a> {
    type Item = (u32, FieldValue<'a>);

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.buf.get(self.pos..)?;
        if rest.is_empty() {
            return None;
        }
        let (k, used) = decode_varint(rest)?;
        let field = u32::try_from(k >> 3).ok()?;
        let wire = (k & 0x07) as u8;
        let mut pos = self.pos + used;

        let value = match wire {
            WIRE_VARINT => {
                let (v, n) = decode_varint(self.buf.get(pos..)?)?;
                pos += n;
                FieldValue::Varint(v)
            }
            WIRE_LEN => {
                let (len, n) = decode_varint(self.buf.get(pos..)?)?;
                pos += n;
                let end = pos.checked_add(usize::try_from(len).ok()?)?;
                let v = self.buf.get(pos..end)?;
                pos = end;
                FieldValue::Bytes(v)
            }
            WIRE_FIXED64 => {
                let v = self.buf.get(pos..pos + 8)?;
                pos += 8;
                FieldValue::Fixed64(v)
            }
            WIRE_FIXED32 => {
                let v = self.buf.get(pos..pos + 4)?;
                pos += 4;
                FieldValue::Fixed32(v)
            }
            _ => {
                self.pos = self.buf.len();
                return None;
            }
        };

        self.pos = pos;
        Some((field, value))
    }
}

/// Read-only view of an encoded message
#[derive(Debug, Clone, Copy)]
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn fields(&self) -> Fields<'a> {
        Fields { buf: self.buf, pos: 0 }
    }

    /// First varint with this field number
    pub fn varint(&self, field: u32) -> Option<u64> {
        self.fields().find_map(|(f, v)| match v {
            FieldValue::Varint(n) if f == field => Some(n),
            _ => None,
        })
    }

    /// Varint reinterpreted as a two's-complement int32/int64
    pub fn signed(&self, field: u32) -> Option<i64> {
        self.varint(field).map(|v| v as i64)
    }

    pub fn bool(&self, field: u32) -> Option<bool> {
        self.varint(field).map(|v| v != 0)
    }

    /// First length-delimited field with this number
    pub fn bytes(&self, field: u32) -> Option<&'a [u8]> {
        self.fields().find_map(|(f, v)| match v {
            FieldValue::Bytes(b) if f == field => Some(b),
            _ => None,
        })
    }

    pub fn message(&self, field: u32) -> Option<Reader<'a>> {
        self.bytes(field).map(Reader::new)
    }

    /// Every length-delimited occurrence of this field, in wire order
    pub fn repeated_bytes(&self, field: u32) -> Vec<&'a [u8]> {
        self.fields()
            .filter_map(|(f, v)| match v {
                FieldValue::Bytes(b) if f == field => Some(b),
                _ => None,
            })
            .collect()
    }

    pub fn has(&self, field: u32) -> bool {
        self.fields().any(|(f, _)| f == field)
    }
}
