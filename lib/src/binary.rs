//! Endian-aware cursor primitives every codec in this crate is built on.

use std::io::{Cursor, Seek, SeekFrom, Write};

use binrw::{BinRead, BinWrite, Endian};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Byte order of a binary document, as reported across the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endianness {
    Big,
    Little,
}

impl Endianness {
    pub const fn is_big(self) -> bool {
        matches!(self, Endianness::Big)
    }
}

impl From<Endian> for Endianness {
    fn from(value: Endian) -> Self {
        match value {
            Endian::Big => Endianness::Big,
            Endian::Little => Endianness::Little,
        }
    }
}

impl From<Endianness> for Endian {
    fn from(value: Endianness) -> Self {
        match value {
            Endianness::Big => Endian::Big,
            Endianness::Little => Endian::Little,
        }
    }
}

fn map_read_error(err: binrw::Error, offset: u64, len: u64) -> Error {
    match err {
        binrw::Error::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
            Error::OutOfBounds { offset, len }
        }
        binrw::Error::BadMagic { pos, .. } => {
            Error::invalid("binary", format!("bad magic at {pos:#x}"))
        }
        other => Error::invalid("binary", other.to_string()),
    }
}

fn map_write_error(err: binrw::Error) -> Error {
    match err {
        binrw::Error::Io(io) => Error::Io(io),
        other => Error::invalid("binary", other.to_string()),
    }
}

/// Read cursor over a borrowed buffer.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    cursor: Cursor<&'a [u8]>,
    endian: Endian,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8], endian: Endian) -> Self {
        Self {
            cursor: Cursor::new(data),
            endian,
        }
    }

    pub const fn endian(&self) -> Endian {
        self.endian
    }

    pub fn set_endian(&mut self, endian: Endian) {
        self.endian = endian;
    }

    pub fn data(&self) -> &'a [u8] {
        self.cursor.get_ref()
    }

    pub fn len(&self) -> u64 {
        self.cursor.get_ref().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.cursor.get_ref().is_empty()
    }

    pub fn position(&self) -> u64 {
        self.cursor.position()
    }

    fn out_of_bounds(&self, offset: u64) -> Error {
        Error::OutOfBounds {
            offset,
            len: self.len(),
        }
    }

    /// Moves to an absolute offset. Seeking exactly to the end is allowed.
    pub fn seek(&mut self, pos: u64) -> Result<()> {
        if pos > self.len() {
            return Err(self.out_of_bounds(pos));
        }
        self.cursor.set_position(pos);
        Ok(())
    }

    pub fn skip(&mut self, count: u64) -> Result<()> {
        self.seek(self.position() + count)
    }

    /// Runs `func` at `pos` and restores the current position afterwards,
    /// whether or not `func` succeeded.
    pub fn seek_task<R, F>(&mut self, pos: u64, func: F) -> Result<R>
    where
        F: FnOnce(&mut Self) -> Result<R>,
    {
        let current = self.position();
        self.seek(pos)?;
        let res = func(self);
        self.cursor.set_position(current);
        res
    }

    /// Reads any argument-less binrw type in the reader's endianness.
    pub fn read<T>(&mut self) -> Result<T>
    where
        T: for<'b> BinRead<Args<'b> = ()>,
    {
        let pos = self.position();
        let len = self.len();
        T::read_options(&mut self.cursor, self.endian, ()).map_err(|e| {
            self.cursor.set_position(pos);
            map_read_error(e, pos, len)
        })
    }

    pub fn u8(&mut self) -> Result<u8> {
        self.read()
    }

    pub fn u16(&mut self) -> Result<u16> {
        self.read()
    }

    pub fn u24(&mut self) -> Result<u32> {
        let bytes = self.bytes(3)?;
        Ok(match self.endian {
            Endian::Big => u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]),
            Endian::Little => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]),
        })
    }

    pub fn u32(&mut self) -> Result<u32> {
        self.read()
    }

    pub fn u64(&mut self) -> Result<u64> {
        self.read()
    }

    pub fn i8(&mut self) -> Result<i8> {
        self.read()
    }

    pub fn i16(&mut self) -> Result<i16> {
        self.read()
    }

    pub fn i32(&mut self) -> Result<i32> {
        self.read()
    }

    pub fn i64(&mut self) -> Result<i64> {
        self.read()
    }

    pub fn f32(&mut self) -> Result<f32> {
        self.read()
    }

    pub fn f64(&mut self) -> Result<f64> {
        self.read()
    }

    /// Borrows the next `count` bytes.
    pub fn bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        let start = self.position();
        let end = start
            .checked_add(count as u64)
            .filter(|end| *end <= self.len())
            .ok_or_else(|| self.out_of_bounds(start))?;
        let data: &'a [u8] = self.cursor.get_ref();
        self.cursor.set_position(end);
        Ok(&data[start as usize..end as usize])
    }

    pub fn magic<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    /// Reads a NUL-terminated string and consumes the terminator.
    pub fn null_string(&mut self) -> Result<String> {
        let start = self.position();
        let rest = &self.data()[start as usize..];
        let end = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| self.out_of_bounds(self.len()))?;
        let text = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.cursor.set_position(start + end as u64 + 1);
        Ok(text)
    }

    pub fn null_string_at(&mut self, pos: u64) -> Result<String> {
        self.seek_task(pos, |reader| reader.null_string())
    }

    /// Reads a fixed-size field holding a NUL-padded string.
    pub fn fixed_string(&mut self, size: usize) -> Result<String> {
        let raw = self.bytes(size)?;
        let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }

    /// Reads a string prefixed by a single length byte.
    pub fn u8_prefixed_string(&mut self) -> Result<String> {
        let len = self.u8()? as usize;
        Ok(String::from_utf8_lossy(self.bytes(len)?).into_owned())
    }

    pub fn align(&mut self, alignment: u64) -> Result<()> {
        self.seek(self.position().next_multiple_of(alignment))
    }
}

/// Write cursor over an owned, growable buffer.
#[derive(Debug, Clone)]
pub struct Writer {
    cursor: Cursor<Vec<u8>>,
    endian: Endian,
}

impl Writer {
    pub fn new(endian: Endian) -> Self {
        Self {
            cursor: Cursor::new(Vec::new()),
            endian,
        }
    }

    pub const fn endian(&self) -> Endian {
        self.endian
    }

    pub fn position(&self) -> u64 {
        self.cursor.position()
    }

    pub fn len(&self) -> u64 {
        self.cursor.get_ref().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.cursor.get_ref().is_empty()
    }

    /// Moves to an absolute offset; later writes past the end zero-fill the gap.
    pub fn seek(&mut self, pos: u64) -> Result<()> {
        self.cursor.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    pub fn seek_end(&mut self) -> Result<u64> {
        Ok(self.cursor.seek(SeekFrom::End(0))?)
    }

    pub fn write<T>(&mut self, value: &T) -> Result<()>
    where
        T: for<'b> BinWrite<Args<'b> = ()>,
    {
        value
            .write_options(&mut self.cursor, self.endian, ())
            .map_err(map_write_error)
    }

    /// Writes `value` at `pos` without moving the cursor.
    pub fn write_at<T>(&mut self, pos: u64, value: &T) -> Result<()>
    where
        T: for<'b> BinWrite<Args<'b> = ()>,
    {
        let current = self.position();
        self.seek(pos)?;
        let res = self.write(value);
        self.cursor.set_position(current);
        res
    }

    pub fn u8(&mut self, value: u8) -> Result<()> {
        self.write(&value)
    }

    pub fn u16(&mut self, value: u16) -> Result<()> {
        self.write(&value)
    }

    pub fn u24(&mut self, value: u32) -> Result<()> {
        if value > 0x00FF_FFFF {
            return Err(Error::ValueOutOfRange {
                field: "u24",
                value: value as u64,
            });
        }
        let bytes = match self.endian {
            Endian::Big => {
                let b = value.to_be_bytes();
                [b[1], b[2], b[3]]
            }
            Endian::Little => {
                let b = value.to_le_bytes();
                [b[0], b[1], b[2]]
            }
        };
        self.bytes(&bytes)
    }

    pub fn u32(&mut self, value: u32) -> Result<()> {
        self.write(&value)
    }

    pub fn u64(&mut self, value: u64) -> Result<()> {
        self.write(&value)
    }

    pub fn i32(&mut self, value: i32) -> Result<()> {
        self.write(&value)
    }

    pub fn i64(&mut self, value: i64) -> Result<()> {
        self.write(&value)
    }

    pub fn f32(&mut self, value: f32) -> Result<()> {
        self.write(&value)
    }

    pub fn f64(&mut self, value: f64) -> Result<()> {
        self.write(&value)
    }

    pub fn bytes(&mut self, data: &[u8]) -> Result<()> {
        self.cursor.write_all(data)?;
        Ok(())
    }

    pub fn null_string(&mut self, text: &str) -> Result<()> {
        self.bytes(text.as_bytes())?;
        self.u8(0)
    }

    /// Writes `text` NUL-padded to exactly `size` bytes. At least one NUL must fit.
    pub fn fixed_string(&mut self, text: &str, size: usize) -> Result<()> {
        if text.len() >= size {
            return Err(Error::ValueOutOfRange {
                field: "fixed string",
                value: text.len() as u64,
            });
        }
        self.bytes(text.as_bytes())?;
        self.bytes(&vec![0u8; size - text.len()])
    }

    pub fn u8_prefixed_string(&mut self, text: &str) -> Result<()> {
        let len = u8::try_from(text.len()).map_err(|_| Error::ValueOutOfRange {
            field: "string length",
            value: text.len() as u64,
        })?;
        self.u8(len)?;
        self.bytes(text.as_bytes())
    }

    /// Zero-fills up to the next multiple of `alignment`.
    pub fn align(&mut self, alignment: u64) -> Result<()> {
        self.align_with(alignment, 0)
    }

    pub fn align_with(&mut self, alignment: u64, fill: u8) -> Result<()> {
        let pos = self.position();
        let target = pos.next_multiple_of(alignment);
        if target > pos {
            self.bytes(&vec![fill; (target - pos) as usize])?;
        }
        Ok(())
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.cursor.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_in_requested_endianness() {
        let data = [0x12, 0x34, 0x56, 0x78];
        assert_eq!(Reader::new(&data, Endian::Big).u32().unwrap(), 0x12345678);
        assert_eq!(Reader::new(&data, Endian::Little).u32().unwrap(), 0x78563412);
        assert_eq!(Reader::new(&data, Endian::Big).u24().unwrap(), 0x123456);
        assert_eq!(Reader::new(&data, Endian::Little).u24().unwrap(), 0x563412);
    }

    #[test]
    fn reading_past_end_is_out_of_bounds() {
        let data = [1, 2, 3];
        let mut reader = Reader::new(&data, Endian::Big);
        assert!(matches!(reader.u32(), Err(Error::OutOfBounds { offset: 0, .. })));
        // A failed read leaves the cursor untouched.
        assert_eq!(reader.position(), 0);
        assert!(matches!(reader.seek(4), Err(Error::OutOfBounds { .. })));
        assert!(matches!(
            Reader::new(b"abc", Endian::Big).null_string(),
            Err(Error::OutOfBounds { .. })
        ));
    }

    #[test]
    fn seek_task_restores_position() {
        let data = b"\x00\x00hello\x00";
        let mut reader = Reader::new(data, Endian::Little);
        reader.skip(1).unwrap();
        assert_eq!(reader.null_string_at(2).unwrap(), "hello");
        assert_eq!(reader.position(), 1);
    }

    #[test]
    fn writer_aligns_and_patches() {
        let mut writer = Writer::new(Endian::Little);
        writer.u8(1).unwrap();
        writer.align(4).unwrap();
        writer.u16(0xBEEF).unwrap();
        writer.write_at(1, &0xAAu8).unwrap();
        writer.align_with(8, 0xAB).unwrap();
        assert_eq!(
            writer.into_inner(),
            vec![1, 0xAA, 0, 0, 0xEF, 0xBE, 0xAB, 0xAB]
        );
    }

    #[test]
    fn declared_widths_are_enforced() {
        let mut writer = Writer::new(Endian::Big);
        assert!(matches!(
            writer.u24(0x0100_0000),
            Err(Error::ValueOutOfRange { .. })
        ));
        assert!(matches!(
            writer.fixed_string("0123456789", 8),
            Err(Error::ValueOutOfRange { .. })
        ));
        writer.fixed_string("abc", 8).unwrap();
        assert_eq!(writer.len(), 8);
    }
}
