//! Fixed-width big-endian primitives shared by the on-disk formats.
//!
//! Strings are `i32` length-prefixed UTF-8.

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{ChronoError, Result};

/// Upper bound on any length prefix we are willing to allocate for
const MAX_STRING_LEN: i32 = 64 * 1024 * 1024;

pub(crate) fn write_string<W: Write>(writer: &mut W, s: &str) -> Result<()> {
    let len = i32::try_from(s.len())
        .map_err(|_| ChronoError::Storage(format!("String too long: {} bytes", s.len())))?;
    writer.write_i32::<BigEndian>(len)?;
    writer.write_all(s.as_bytes())?;
    Ok(())
}

pub(crate) fn read_string<R: Read>(reader: &mut R) -> Result<String> {
    let len = reader.read_i32::<BigEndian>().map_err(eof_as_corruption)?;
    if !(0..=MAX_STRING_LEN).contains(&len) {
        return Err(ChronoError::Corruption(format!(
            "Invalid string length: {}",
            len
        )));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).map_err(eof_as_corruption)?;
    String::from_utf8(buf).map_err(|e| ChronoError::Corruption(format!("Invalid UTF-8: {}", e)))
}

/// Read a non-negative `i32` element count
pub(crate) fn read_count<R: Read>(reader: &mut R) -> Result<usize> {
    let count = reader.read_i32::<BigEndian>().map_err(eof_as_corruption)?;
    usize::try_from(count)
        .map_err(|_| ChronoError::Corruption(format!("Negative element count: {}", count)))
}

pub(crate) fn read_i64<R: Read>(reader: &mut R) -> Result<i64> {
    reader.read_i64::<BigEndian>().map_err(eof_as_corruption)
}

pub(crate) fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    reader.read_u64::<BigEndian>().map_err(eof_as_corruption)
}

pub(crate) fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    reader.read_u32::<BigEndian>().map_err(eof_as_corruption)
}

pub(crate) fn read_u8<R: Read>(reader: &mut R) -> Result<u8> {
    reader.read_u8().map_err(eof_as_corruption)
}

/// A short read inside a persisted structure means the structure is truncated
pub(crate) fn eof_as_corruption(err: io::Error) -> ChronoError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        ChronoError::Corruption("unexpected end of data".to_string())
    } else {
        ChronoError::Io(err)
    }
}
