use byteorder::{ByteOrder, LittleEndian};
use crate::llm::error::InferenceError;

/// A decoded protobuf field value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WireValue<'a> {
    Varint(u64),
    Fixed64(u64),
    Bytes(&'a [u8]),
    Fixed32(u32),
}

impl<'a> WireValue<'a> {
    pub fn as_bytes(&self) -> Result<&'a [u8], InferenceError> {
        match self {
            WireValue::Bytes(b) => Ok(b),
            other => Err(InferenceError::Tokenizer(format!("expected length-delimited field, got {:?}", other))),
        }
    }

    pub fn as_varint(&self) -> Result<u64, InferenceError> {
        match self {
            WireValue::Varint(v) => Ok(*v),
            other => Err(InferenceError::Tokenizer(format!("expected varint field, got {:?}", other))),
        }
    }

    pub fn as_f32(&self) -> Result<f32, InferenceError> {
        match self {
            WireValue::Fixed32(bits) => Ok(f32::from_bits(*bits)),
            other => Err(InferenceError::Tokenizer(format!("expected fixed32 field, got {:?}", other))),
        }
    }

    /// Proto `int32` fields: negative values are sign-extended to ten bytes on the wire.
    pub fn as_i32(&self) -> Result<i32, InferenceError> {
        Ok(self.as_varint()? as i32)
    }
}

/// Sequential reader over the fields of one protobuf message
pub struct ProtoReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ProtoReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], InferenceError> {
        let end = self.pos.checked_add(len).filter(|&end| end <= self.buf.len()).ok_or_else(|| {
            InferenceError::Tokenizer(format!(
                "field of {} bytes at offset {} runs past end of message ({} bytes)",
                len,
                self.pos,
                self.buf.len()
            ))
        })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn varint(&mut self) -> Result<u64, InferenceError> {
        let mut value = 0u64;
        for shift in (0..64).step_by(7) {
            let byte = self.take(1)?[0];
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(InferenceError::Tokenizer(format!("varint longer than 10 bytes at offset {}", self.pos)))
    }

    /// Returns the next `(field number, value)` pair, or `None` at end of message.
    pub fn next_field(&mut self) -> Result<Option<(u32, WireValue<'a>)>, InferenceError> {
        if self.pos >= self.buf.len() {
            return Ok(None);
        }
        let key = self.varint()?;
        let field = (key >> 3) as u32;
        let value = match key & 0x7 {
            0 => WireValue::Varint(self.varint()?),
            1 => WireValue::Fixed64(LittleEndian::read_u64(self.take(8)?)),
            2 => {
                let len = self.varint()? as usize;
                WireValue::Bytes(self.take(len)?)
            }
            5 => WireValue::Fixed32(LittleEndian::read_u32(self.take(4)?)),
            wire => {
                return Err(InferenceError::Tokenizer(format!(
                    "unsupported wire type {} for field {}",
                    wire, field
                )))
            }
        };
        Ok(Some((field, value)))
    }
}

/// Minimal protobuf encoder for building tokenizer fixtures in tests.
#[cfg(test)]
#[derive(Default)]
pub struct ProtoWriter {
    pub buf: Vec<u8>,
}

#[cfg(test)]
impl ProtoWriter {
    fn raw_varint(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.buf.push((value as u8) | 0x80);
            value >>= 7;
        }
        self.buf.push(value as u8);
    }

    pub fn varint(&mut self, field: u32, value: u64) -> &mut Self {
        self.raw_varint(u64::from(field) << 3);
        self.raw_varint(value);
        self
    }

    pub fn int32(&mut self, field: u32, value: i32) -> &mut Self {
        self.varint(field, value as i64 as u64)
    }

    pub fn float(&mut self, field: u32, value: f32) -> &mut Self {
        self.raw_varint((u64::from(field) << 3) | 5);
        let mut bytes = [0u8; 4];
        LittleEndian::write_f32(&mut bytes, value);
        self.buf.extend_from_slice(&bytes);
        self
    }

    pub fn bytes(&mut self, field: u32, value: &[u8]) -> &mut Self {
        self.raw_varint((u64::from(field) << 3) | 2);
        self.raw_varint(value.len() as u64);
        self.buf.extend_from_slice(value);
        self
    }
}
