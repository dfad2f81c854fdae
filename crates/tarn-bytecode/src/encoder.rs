//! Bytecode encoding and decoding utilities

use crate::opcode::Opcode;
use thiserror::Error;

/// Errors raised while decoding a bytecode stream
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Unexpected end of stream
    #[error("unexpected end of bytecode at offset {0}")]
    UnexpectedEnd(usize),

    /// Invalid UTF-8 string
    #[error("invalid UTF-8 string at offset {0}")]
    InvalidUtf8(usize),

    /// Invalid opcode byte
    #[error("invalid opcode {0:#04x} at offset {1}")]
    InvalidOpcode(u8, usize),
}

/// Writer for emitting instructions and operands into a binary buffer
#[derive(Default)]
pub struct BytecodeWriter {
    pub(crate) buffer: Vec<u8>,
}

impl BytecodeWriter {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Current offset (length of emitted code)
    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    pub fn emit(&mut self, op: Opcode) {
        self.buffer.push(op as u8);
    }

    pub fn emit_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn emit_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn emit_i16(&mut self, value: i16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn emit_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn emit_i64(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn emit_f64(&mut self, value: f64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Emit a length-prefixed UTF-8 string
    pub fn emit_string(&mut self, s: &str) {
        self.emit_u32(s.len() as u32);
        self.buffer.extend_from_slice(s.as_bytes());
    }

    /// Patch a previously emitted i16 at the given offset
    pub fn patch_i16(&mut self, offset: usize, value: i16) {
        self.buffer[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    /// Patch a previously emitted u32 at the given offset
    pub fn patch_u32(&mut self, offset: usize, value: u32) {
        self.buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
}

/// Reader over a binary buffer
pub struct BytecodeReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> BytecodeReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn has_more(&self) -> bool {
        self.offset < self.data.len()
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        if self.offset >= self.data.len() {
            return Err(DecodeError::UnexpectedEnd(self.offset));
        }
        let value = self.data[self.offset];
        self.offset += 1;
        Ok(value)
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.read_array::<2>()?;
        Ok(u16::from_le_bytes(bytes))
    }

    pub fn read_i16(&mut self) -> Result<i16, DecodeError> {
        let bytes = self.read_array::<2>()?;
        Ok(i16::from_le_bytes(bytes))
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.read_array::<4>()?;
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        let bytes = self.read_array::<8>()?;
        Ok(i64::from_le_bytes(bytes))
    }

    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        let bytes = self.read_array::<8>()?;
        Ok(f64::from_le_bytes(bytes))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, DecodeError> {
        if self.offset + len > self.data.len() {
            return Err(DecodeError::UnexpectedEnd(self.offset));
        }
        let bytes = self.data[self.offset..self.offset + len].to_vec();
        self.offset += len;
        Ok(bytes)
    }

    /// Read a length-prefixed UTF-8 string
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let start = self.offset;
        let len = self.read_u32()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8(start))
    }

    /// Read the next opcode byte
    pub fn read_opcode(&mut self) -> Result<Opcode, DecodeError> {
        let at = self.offset;
        let byte = self.read_u8()?;
        Opcode::try_from(byte).map_err(|b| DecodeError::InvalidOpcode(b, at))
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        if self.offset + N > self.data.len() {
            return Err(DecodeError::UnexpectedEnd(self.offset));
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.offset..self.offset + N]);
        self.offset += N;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_reader_roundtrip() {
        let mut writer = BytecodeWriter::new();
        writer.emit(Opcode::ConstI64);
        writer.emit_i64(42);
        writer.emit(Opcode::ReturnValue);
        writer.emit_string("hello");

        let bytes = writer.into_bytes();
        let mut reader = BytecodeReader::new(&bytes);
        assert_eq!(reader.read_opcode().unwrap(), Opcode::ConstI64);
        assert_eq!(reader.read_i64().unwrap(), 42);
        assert_eq!(reader.read_opcode().unwrap(), Opcode::ReturnValue);
        assert_eq!(reader.read_string().unwrap(), "hello");
        assert!(!reader.has_more());
    }

    #[test]
    fn test_patch_i16() {
        let mut writer = BytecodeWriter::new();
        writer.emit(Opcode::Jump);
        let at = writer.offset();
        writer.emit_i16(0);
        writer.patch_i16(at, -7);

        let bytes = writer.into_bytes();
        let mut reader = BytecodeReader::new(&bytes);
        reader.read_opcode().unwrap();
        assert_eq!(reader.read_i16().unwrap(), -7);
    }

    #[test]
    fn test_unexpected_end() {
        let mut reader = BytecodeReader::new(&[0x07]);
        reader.read_u8().unwrap();
        assert!(matches!(
            reader.read_i64(),
            Err(DecodeError::UnexpectedEnd(_))
        ));
    }

    #[test]
    fn test_invalid_opcode() {
        let mut reader = BytecodeReader::new(&[0xEE]);
        assert!(matches!(
            reader.read_opcode(),
            Err(DecodeError::InvalidOpcode(0xEE, 0))
        ));
    }
}
