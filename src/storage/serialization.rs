//! Byte cursors over SQLite's big-endian on-disk encodings.
//!
//! Every read is checked: a read past the end of the buffer yields `None`
//! (or a zero-length varint) and never panics. Callers translate that into a
//! page or frame corruption.

use crate::types::error::DatabaseError;

pub const MAX_VARINT_SIZE: usize = 9;

/// Number of bytes `value` occupies as a varint.
pub fn varint_length(value: u64) -> usize {
    if value & (0xff00_0000u64 << 32) != 0 {
        return MAX_VARINT_SIZE;
    }
    let mut length = 1;
    let mut rest = value >> 7;
    while rest != 0 {
        length += 1;
        rest >>= 7;
    }
    length
}

/// Encodes `value` as a SQLite varint.
pub fn encode_varint(value: u64) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(MAX_VARINT_SIZE);
    if value & (0xff00_0000u64 << 32) != 0 {
        let mut bytes = [0u8; MAX_VARINT_SIZE];
        bytes[8] = value as u8;
        let mut rest = value >> 8;
        for i in (0..8).rev() {
            bytes[i] = ((rest & 0x7f) as u8) | 0x80;
            rest >>= 7;
        }
        buffer.extend_from_slice(&bytes);
        return buffer;
    }
    let mut rest = value;
    loop {
        buffer.push(((rest & 0x7f) as u8) | 0x80);
        rest >>= 7;
        if rest == 0 {
            break;
        }
    }
    // least significant group was pushed first and carries no continuation bit
    buffer[0] &= 0x7f;
    buffer.reverse();
    buffer
}

/// Decodes a varint at the start of `bytes`. Returns `(consumed, value)`,
/// with `consumed == 0` when the buffer ends before the terminating byte.
pub fn decode_varint(bytes: &[u8]) -> (usize, u64) {
    let mut value: u64 = 0;
    for i in 0..8 {
        let Some(&byte) = bytes.get(i) else {
            return (0, 0);
        };
        value = (value << 7) | (byte & 0x7f) as u64;
        if byte & 0x80 == 0 {
            return (i + 1, value);
        }
    }
    match bytes.get(8) {
        Some(&byte) => (MAX_VARINT_SIZE, (value << 8) | byte as u64),
        None => (0, 0),
    }
}

#[derive(Debug, Clone)]
pub struct Deserialization<'a> {
    data: &'a [u8],
    cursor: usize,
}

impl<'a> Deserialization<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, cursor: 0 }
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn seek(&mut self, position: usize) {
        self.cursor = position;
    }

    pub fn advance(&mut self, size: usize) {
        self.cursor = self.cursor.saturating_add(size);
    }

    pub fn ended(&self) -> bool {
        self.cursor >= self.data.len()
    }

    /// Whether `size` more bytes can be read from the cursor.
    pub fn can_advance(&self, size: usize) -> bool {
        self.cursor
            .checked_add(size)
            .is_some_and(|end| end <= self.data.len())
    }

    /// Whether the buffer holds at least `size` bytes.
    pub fn is_enough(&self, size: usize) -> bool {
        size <= self.data.len()
    }

    pub fn get_bytes(&self, offset: usize, size: usize) -> Option<&'a [u8]> {
        let end = offset.checked_add(size)?;
        self.data.get(offset..end)
    }

    /// Big-endian two's complement integer of `width` bytes (1, 2, 3, 4, 6 or 8).
    pub fn get_int(&self, offset: usize, width: usize) -> Option<i64> {
        if width == 0 || width > 8 {
            return None;
        }
        let bytes = self.get_bytes(offset, width)?;
        let mut value: u64 = 0;
        for byte in bytes {
            value = (value << 8) | *byte as u64;
        }
        let shift = 64 - 8 * width as u32;
        Some(((value << shift) as i64) >> shift)
    }

    pub fn get_uint(&self, offset: usize, width: usize) -> Option<u64> {
        if width == 0 || width > 8 {
            return None;
        }
        let bytes = self.get_bytes(offset, width)?;
        Some(bytes.iter().fold(0u64, |value, byte| (value << 8) | *byte as u64))
    }

    pub fn get_1byte_int(&self, offset: usize) -> Option<i64> {
        self.get_int(offset, 1)
    }

    pub fn get_2bytes_int(&self, offset: usize) -> Option<i64> {
        self.get_int(offset, 2)
    }

    pub fn get_3bytes_int(&self, offset: usize) -> Option<i64> {
        self.get_int(offset, 3)
    }

    pub fn get_4bytes_int(&self, offset: usize) -> Option<i64> {
        self.get_int(offset, 4)
    }

    pub fn get_6bytes_int(&self, offset: usize) -> Option<i64> {
        self.get_int(offset, 6)
    }

    pub fn get_8bytes_int(&self, offset: usize) -> Option<i64> {
        self.get_int(offset, 8)
    }

    pub fn get_1byte_uint(&self, offset: usize) -> Option<u8> {
        self.data.get(offset).copied()
    }

    pub fn get_2bytes_uint(&self, offset: usize) -> Option<u16> {
        self.get_uint(offset, 2).map(|v| v as u16)
    }

    pub fn get_4bytes_uint(&self, offset: usize) -> Option<u32> {
        self.get_uint(offset, 4).map(|v| v as u32)
    }

    pub fn get_8bytes_double(&self, offset: usize) -> Option<f64> {
        self.get_uint(offset, 8).map(f64::from_bits)
    }

    pub fn get_varint(&self, offset: usize) -> (usize, u64) {
        match self.data.get(offset..) {
            Some(rest) => decode_varint(rest),
            None => (0, 0),
        }
    }

    /// Returns the string and the number of bytes consumed including the terminator.
    pub fn get_zero_terminated_string(&self, offset: usize) -> Option<(usize, &'a str)> {
        let rest = self.data.get(offset..)?;
        let end = rest.iter().position(|byte| *byte == 0)?;
        let string = std::str::from_utf8(&rest[..end]).ok()?;
        Some((end + 1, string))
    }

    pub fn advance_bytes(&mut self, size: usize) -> Option<&'a [u8]> {
        let bytes = self.get_bytes(self.cursor, size)?;
        self.cursor += size;
        Some(bytes)
    }

    pub fn advance_1byte_uint(&mut self) -> Option<u8> {
        let value = self.get_1byte_uint(self.cursor)?;
        self.cursor += 1;
        Some(value)
    }

    pub fn advance_2bytes_uint(&mut self) -> Option<u16> {
        let value = self.get_2bytes_uint(self.cursor)?;
        self.cursor += 2;
        Some(value)
    }

    pub fn advance_4bytes_uint(&mut self) -> Option<u32> {
        let value = self.get_4bytes_uint(self.cursor)?;
        self.cursor += 4;
        Some(value)
    }

    pub fn advance_int(&mut self, width: usize) -> Option<i64> {
        let value = self.get_int(self.cursor, width)?;
        self.cursor += width;
        Some(value)
    }

    pub fn advance_varint(&mut self) -> (usize, u64) {
        let result = self.get_varint(self.cursor);
        self.cursor += result.0;
        result
    }

    pub fn advance_zero_terminated_string(&mut self) -> Option<&'a str> {
        let (consumed, string) = self.get_zero_terminated_string(self.cursor)?;
        self.cursor += consumed;
        Some(string)
    }
}

/// Growable big-endian writer, the inverse of [`Deserialization`].
#[derive(Debug, Default, Clone)]
pub struct Serialization {
    buffer: Vec<u8>,
}

impl Serialization {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn put_1byte_uint(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn put_2bytes_uint(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_4bytes_uint(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_8bytes_double(&mut self, value: f64) {
        self.buffer.extend_from_slice(&value.to_bits().to_be_bytes());
    }

    /// Writes the low `width` bytes of `value`, big-endian.
    pub fn put_int(&mut self, value: i64, width: usize) {
        let bytes = value.to_be_bytes();
        let width = width.min(8);
        self.buffer.extend_from_slice(&bytes[8 - width..]);
    }

    pub fn put_varint(&mut self, value: u64) -> usize {
        let encoded = encode_varint(value);
        self.buffer.extend_from_slice(&encoded);
        encoded.len()
    }

    pub fn put_zero_terminated_string(&mut self, string: &str) -> Result<(), DatabaseError> {
        if string.as_bytes().contains(&0) {
            return Err(DatabaseError::SerializationError {
                details: "String contains an embedded zero byte".to_string(),
            });
        }
        self.buffer.extend_from_slice(string.as_bytes());
        self.buffer.push(0);
        Ok(())
    }

    pub fn finalize(self) -> Vec<u8> {
        self.buffer
    }
}
