//! Delta primitives: varints, field markers, and the writer/reader pair used
//! by WORLD_FULL and WORLD_DELTA payloads.
//!
//! A world payload is a sequence of objects. Each object starts with a varint
//! entity kind tag, carries any number of `(field marker, value)` pairs, and
//! ends with an [`FieldType::End`] marker. The marker byte packs
//! `(field_id << 3) | field_type`, so a receiver that does not know a field id
//! can still determine the value length and skip it, which keeps the format
//! forward-compatible.

use crate::DecodeError;

/// Maximum encoded size of a u32 varint.
pub const MAX_VARINT_LEN: usize = 5;

/// Entity kind tags opening each object in a world payload.
pub mod entity {
    pub const COMPUTER: u32 = 1;
    pub const MISSION: u32 = 2;
    pub const ACCOUNT: u32 = 3;
    pub const AGENT: u32 = 4;
}

/// Field ids within a computer object.
pub mod computer_field {
    pub const ID: u8 = 1;
    pub const IP: u8 = 2;
    pub const NAME: u8 = 3;
    pub const SECURITY: u8 = 4;
    pub const RUNNING: u8 = 5;
    pub const BYPASS: u8 = 6;
    pub const CONNECTED: u8 = 7;
}

/// Field ids within a mission object.
pub mod mission_field {
    pub const ID: u8 = 1;
    pub const KIND: u8 = 2;
    pub const TARGET_IP: u8 = 3;
    pub const PAYMENT: u8 = 4;
    pub const DIFFICULTY: u8 = 5;
    pub const CLAIMED_BY: u8 = 6;
    pub const COMPLETED: u8 = 7;
    pub const DESCRIPTION: u8 = 8;
}

/// Field ids within a bank account object.
pub mod account_field {
    pub const ID: u8 = 1;
    pub const BALANCE: u8 = 2;
    pub const NUMBER: u8 = 3;
    pub const BANK_IP: u8 = 4;
}

/// Value encodings a field marker can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldType {
    Varint = 0,
    Fixed32 = 1,
    Fixed64 = 2,
    Str = 3,
    Bytes = 4,
    End = 7,
}

impl FieldType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Varint),
            1 => Some(Self::Fixed32),
            2 => Some(Self::Fixed64),
            3 => Some(Self::Str),
            4 => Some(Self::Bytes),
            7 => Some(Self::End),
            _ => None,
        }
    }
}

/// Appends a u32 as a 7-bit continuation varint.
pub fn encode_varint(out: &mut Vec<u8>, mut value: u32) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Decodes a varint, returning the value and bytes consumed.
pub fn decode_varint(bytes: &[u8]) -> Result<(u32, usize), DecodeError> {
    let mut value: u32 = 0;
    let mut shift = 0;
    for (i, &byte) in bytes.iter().enumerate().take(MAX_VARINT_LEN) {
        value |= u32::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        shift += 7;
    }
    Err(DecodeError::InvalidVarint)
}

/// Append-only encoder for delta payloads.
#[derive(Debug, Default)]
pub struct DeltaWriter {
    buf: Vec<u8>,
}

impl DeltaWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_varint(&mut self, value: u32) {
        encode_varint(&mut self.buf, value);
    }

    pub fn write_fixed32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_fixed64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_string(&mut self, s: &str) {
        encode_varint(&mut self.buf, s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        encode_varint(&mut self.buf, bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
    }

    fn marker(&mut self, field_id: u8, field_type: FieldType) {
        self.buf.push((field_id << 3) | (field_type as u8 & 0x07));
    }

    /// Opens an object with its entity kind tag.
    pub fn begin_object(&mut self, kind: u32) {
        self.write_varint(kind);
    }

    /// Closes the current object.
    pub fn end_object(&mut self) {
        self.buf.push(FieldType::End as u8 & 0x07);
    }

    pub fn varint_field(&mut self, field_id: u8, value: u32) {
        self.marker(field_id, FieldType::Varint);
        self.write_varint(value);
    }

    pub fn fixed32_field(&mut self, field_id: u8, value: u32) {
        self.marker(field_id, FieldType::Fixed32);
        self.write_fixed32(value);
    }

    pub fn fixed64_field(&mut self, field_id: u8, value: u64) {
        self.marker(field_id, FieldType::Fixed64);
        self.write_fixed64(value);
    }

    pub fn string_field(&mut self, field_id: u8, value: &str) {
        self.marker(field_id, FieldType::Str);
        self.write_string(value);
    }

    pub fn bytes_field(&mut self, field_id: u8, value: &[u8]) {
        self.marker(field_id, FieldType::Bytes);
        self.write_bytes(value);
    }
}

/// One decoded field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Varint(u32),
    Fixed32(u32),
    Fixed64(u64),
    Str(String),
    Bytes(Vec<u8>),
}

/// Cursor-style decoder for delta payloads.
#[derive(Debug)]
pub struct DeltaReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> DeltaReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn has_more(&self) -> bool {
        self.pos < self.data.len()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn read_varint(&mut self) -> Result<u32, DecodeError> {
        let (value, consumed) = decode_varint(&self.data[self.pos..])?;
        self.pos += consumed;
        Ok(value)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::Truncated {
                needed: n,
                got: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_fixed32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_fixed64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let len = self.read_varint()? as usize;
        let bytes = self.take(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.read_varint()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// Reads the next field marker within an object. Returns `None` at the
    /// end-of-object marker.
    pub fn read_field(&mut self) -> Result<Option<(u8, FieldType)>, DecodeError> {
        let marker = self.take(1)?[0];
        let field_type = FieldType::from_u8(marker & 0x07)
            .ok_or(DecodeError::Corrupt("unknown field type"))?;
        if field_type == FieldType::End {
            return Ok(None);
        }
        Ok(Some((marker >> 3, field_type)))
    }

    /// Reads the value for a field marker. Callers that do not recognize a
    /// field id use this to consume (and discard) the value.
    pub fn read_value(&mut self, field_type: FieldType) -> Result<FieldValue, DecodeError> {
        match field_type {
            FieldType::Varint => Ok(FieldValue::Varint(self.read_varint()?)),
            FieldType::Fixed32 => Ok(FieldValue::Fixed32(self.read_fixed32()?)),
            FieldType::Fixed64 => Ok(FieldValue::Fixed64(self.read_fixed64()?)),
            FieldType::Str => Ok(FieldValue::Str(self.read_string()?)),
            FieldType::Bytes => Ok(FieldValue::Bytes(self.read_bytes()?)),
            FieldType::End => Err(DecodeError::Corrupt("value read at end marker")),
        }
    }

    /// Skips a value without materializing it.
    pub fn skip_value(&mut self, field_type: FieldType) -> Result<(), DecodeError> {
        match field_type {
            FieldType::Varint => {
                self.read_varint()?;
            }
            FieldType::Fixed32 => {
                self.take(4)?;
            }
            FieldType::Fixed64 => {
                self.take(8)?;
            }
            FieldType::Str | FieldType::Bytes => {
                let len = self.read_varint()? as usize;
                self.take(len)?;
            }
            FieldType::End => return Err(DecodeError::Corrupt("skip at end marker")),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn varint_roundtrip(value: u32) {
        let mut buf = Vec::new();
        encode_varint(&mut buf, value);
        assert!(buf.len() <= MAX_VARINT_LEN);
        let (decoded, consumed) = decode_varint(&buf).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn varint_boundaries() {
        for value in [
            0,
            1,
            127,
            128,
            16_383,
            16_384,
            2_097_151,
            2_097_152,
            268_435_455,
            268_435_456,
            u32::MAX,
        ] {
            varint_roundtrip(value);
        }
    }

    #[test]
    fn varint_lengths() {
        let mut buf = Vec::new();
        encode_varint(&mut buf, 127);
        assert_eq!(buf.len(), 1);

        buf.clear();
        encode_varint(&mut buf, 128);
        assert_eq!(buf.len(), 2);

        buf.clear();
        encode_varint(&mut buf, u32::MAX);
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn varint_incomplete_is_error() {
        // Continuation bit set with no following byte.
        assert_eq!(decode_varint(&[0x80]), Err(DecodeError::InvalidVarint));
        assert_eq!(decode_varint(&[]), Err(DecodeError::InvalidVarint));
    }

    #[test]
    fn varint_overlong_is_error() {
        // Six continuation bytes exceed the 5-byte u32 limit.
        let bytes = [0x80, 0x80, 0x80, 0x80, 0x80, 0x01];
        assert_eq!(decode_varint(&bytes), Err(DecodeError::InvalidVarint));
    }

    #[test]
    fn object_roundtrip() {
        let mut writer = DeltaWriter::new();
        writer.begin_object(entity::COMPUTER);
        writer.varint_field(computer_field::ID, 7);
        writer.fixed32_field(computer_field::IP, 0x7F00_0001);
        writer.string_field(computer_field::NAME, "ARC Central Mainframe");
        writer.varint_field(computer_field::RUNNING, 1);
        writer.end_object();

        let bytes = writer.into_inner();
        let mut reader = DeltaReader::new(&bytes);
        assert_eq!(reader.read_varint().unwrap(), entity::COMPUTER);

        let mut seen = Vec::new();
        while let Some((field_id, field_type)) = reader.read_field().unwrap() {
            seen.push((field_id, reader.read_value(field_type).unwrap()));
        }

        assert_eq!(
            seen,
            vec![
                (computer_field::ID, FieldValue::Varint(7)),
                (computer_field::IP, FieldValue::Fixed32(0x7F00_0001)),
                (
                    computer_field::NAME,
                    FieldValue::Str("ARC Central Mainframe".to_string())
                ),
                (computer_field::RUNNING, FieldValue::Varint(1)),
            ]
        );
        assert!(!reader.has_more());
    }

    #[test]
    fn unknown_fields_are_skippable() {
        // Writer from a hypothetical newer revision: extra fields the reader
        // has never heard of, of every skippable type.
        let mut writer = DeltaWriter::new();
        writer.begin_object(entity::MISSION);
        writer.varint_field(mission_field::ID, 3);
        writer.varint_field(14, 99);
        writer.fixed32_field(13, 0xDEAD_BEEF);
        writer.fixed64_field(12, u64::MAX);
        writer.string_field(11, "future field");
        writer.bytes_field(10, &[1, 2, 3]);
        writer.varint_field(mission_field::PAYMENT, 500);
        writer.end_object();

        let bytes = writer.into_inner();
        let mut reader = DeltaReader::new(&bytes);
        assert_eq!(reader.read_varint().unwrap(), entity::MISSION);

        let mut id = None;
        let mut payment = None;
        while let Some((field_id, field_type)) = reader.read_field().unwrap() {
            match field_id {
                mission_field::ID => id = Some(reader.read_varint().unwrap()),
                mission_field::PAYMENT => payment = Some(reader.read_varint().unwrap()),
                _ => reader.skip_value(field_type).unwrap(),
            }
        }

        assert_eq!(id, Some(3));
        assert_eq!(payment, Some(500));
        assert!(!reader.has_more());
    }

    #[test]
    fn truncated_string_is_error() {
        let mut writer = DeltaWriter::new();
        writer.write_string("twenty bytes of text");
        let bytes = writer.into_inner();

        let mut reader = DeltaReader::new(&bytes[..5]);
        assert!(matches!(
            reader.read_string(),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn multiple_objects() {
        let mut writer = DeltaWriter::new();
        for id in 1..=3u32 {
            writer.begin_object(entity::ACCOUNT);
            writer.varint_field(account_field::ID, id);
            writer.fixed64_field(account_field::BALANCE, id as u64 * 1000);
            writer.end_object();
        }

        let bytes = writer.into_inner();
        let mut reader = DeltaReader::new(&bytes);
        let mut balances = Vec::new();
        while reader.has_more() {
            assert_eq!(reader.read_varint().unwrap(), entity::ACCOUNT);
            while let Some((field_id, field_type)) = reader.read_field().unwrap() {
                if field_id == account_field::BALANCE {
                    balances.push(reader.read_fixed64().unwrap());
                } else {
                    reader.skip_value(field_type).unwrap();
                }
            }
        }
        assert_eq!(balances, vec![1000, 2000, 3000]);
    }
}
