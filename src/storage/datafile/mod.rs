//! Data File Module
//!
//! Immutable-once-sealed columnar data files.
//!
//! ## File Format (big-endian)
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (6 bytes)                                             │
//! │   Magic: "CHTS" (4) | FormatVersion: u16 (2)                 │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Chunk Group (repeated, one per device per flush)             │
//! │   Marker 0x01 (1) | BodyLen: u32 (4)                         │
//! │   Body: [device: string][version: u64][chunkCount: u32]      │
//! │         chunkCount × Chunk                                   │
//! │   BodyCRC: u32 (4)                                           │
//! │                                                              │
//! │   Chunk: [measurement: string][type: u8][count: u32]         │
//! │          [start: i64][end: i64] count × [t: i64][value]      │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Footer                                                       │
//! │   Marker 0x02 (1)                                            │
//! │   Metadata: schema + chunk-group index (see `FileMetadata`)  │
//! │   MetadataLen: u32 (4) | MetadataCRC: u32 (4) | Magic (4)    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//! A file that does not end with a verifiable footer has crashed mid-write.
//! Its surviving chunk groups are those that decode with a valid CRC,
//! scanning forward from the header.

mod reader;
mod restorable;
mod writer;

pub use reader::DataFileReader;
pub use restorable::RestorableWriter;
pub use writer::DataFileWriter;

use std::io::{Read, Write};

use byteorder::{BigEndian, WriteBytesExt};

use crate::error::{ChronoError, Result};
use crate::schema::{DataType, FileSchema, Timestamp, Value};
use crate::storage::codec::{read_count, read_i64, read_string, read_u32, read_u64, read_u8, write_string};

// =============================================================================
// Shared Constants (used by writer, reader, restorable writer)
// =============================================================================

/// Magic bytes opening and closing every data file
pub(crate) const MAGIC: &[u8; 4] = b"CHTS";

/// Current data file format version
pub(crate) const FORMAT_VERSION: u16 = 1;

/// Header size: Magic (4) + FormatVersion (2)
pub(crate) const HEADER_SIZE: u64 = 6;

/// Marker opening a chunk group
pub(crate) const CHUNK_GROUP_MARKER: u8 = 0x01;

/// Marker opening the footer
pub(crate) const FOOTER_MARKER: u8 = 0x02;

/// Trailer size: MetadataLen (4) + MetadataCRC (4) + Magic (4)
pub(crate) const TRAILER_SIZE: u64 = 12;

/// Chunk group framing: Marker (1) + BodyLen (4) before the body, CRC (4) after
pub(crate) const GROUP_PREFIX_SIZE: u64 = 5;
pub(crate) const GROUP_SUFFIX_SIZE: u64 = 4;

/// Data file extension
pub const DATA_FILE_EXTENSION: &str = "tsfile";

// =============================================================================
// Metadata
// =============================================================================

/// Location and time range of one chunk (one measurement within a group)
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkMetadata {
    pub measurement: String,
    pub data_type: DataType,
    pub point_count: u32,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    /// Absolute file offset of the chunk
    pub offset: u64,
    /// Version issued when the owning group was flushed
    pub version: u64,
}

/// One device's chunks from one flush
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkGroupMetadata {
    pub device: String,
    pub version: u64,
    /// Absolute file offset of the group marker
    pub offset: u64,
    pub chunks: Vec<ChunkMetadata>,
}

impl ChunkGroupMetadata {
    /// Earliest and latest timestamp across all chunks of the group
    pub fn time_range(&self) -> Option<(Timestamp, Timestamp)> {
        let start = self.chunks.iter().map(|c| c.start_time).min()?;
        let end = self.chunks.iter().map(|c| c.end_time).max()?;
        Some((start, end))
    }
}

/// Everything stored in the footer of a sealed file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileMetadata {
    pub schema: FileSchema,
    pub chunk_groups: Vec<ChunkGroupMetadata>,
}

impl FileMetadata {
    /// Chunks of one series across all groups, in file order
    pub fn chunks_of<'a>(
        &'a self,
        device: &'a str,
        measurement: &'a str,
    ) -> impl Iterator<Item = &'a ChunkMetadata> + 'a {
        self.chunk_groups
            .iter()
            .filter(move |g| g.device == device)
            .flat_map(|g| g.chunks.iter())
            .filter(move |c| c.measurement == measurement)
    }

    /// Encode the footer metadata block
    pub(crate) fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();

        buf.write_i32::<BigEndian>(len_i32(self.schema.len())?)?;
        for (measurement, data_type) in self.schema.iter() {
            write_string(&mut buf, measurement)?;
            buf.write_u8(data_type.code())?;
        }

        buf.write_i32::<BigEndian>(len_i32(self.chunk_groups.len())?)?;
        for group in &self.chunk_groups {
            write_string(&mut buf, &group.device)?;
            buf.write_u64::<BigEndian>(group.offset)?;
            buf.write_u64::<BigEndian>(group.version)?;
            buf.write_i32::<BigEndian>(len_i32(group.chunks.len())?)?;
            for chunk in &group.chunks {
                write_string(&mut buf, &chunk.measurement)?;
                buf.write_u8(chunk.data_type.code())?;
                buf.write_u32::<BigEndian>(chunk.point_count)?;
                buf.write_i64::<BigEndian>(chunk.start_time)?;
                buf.write_i64::<BigEndian>(chunk.end_time)?;
                buf.write_u64::<BigEndian>(chunk.offset)?;
            }
        }

        Ok(buf)
    }

    /// Decode the footer metadata block
    pub(crate) fn decode<R: Read>(reader: &mut R) -> Result<Self> {
        let mut schema = FileSchema::new();
        for _ in 0..read_count(reader)? {
            let measurement = read_string(reader)?;
            let data_type = DataType::from_code(read_u8(reader)?)?;
            schema.register(measurement, data_type);
        }

        let group_count = read_count(reader)?;
        let mut chunk_groups = Vec::with_capacity(group_count.min(4096));
        for _ in 0..group_count {
            let device = read_string(reader)?;
            let offset = read_u64(reader)?;
            let version = read_u64(reader)?;
            let chunk_count = read_count(reader)?;
            let mut chunks = Vec::with_capacity(chunk_count.min(4096));
            for _ in 0..chunk_count {
                chunks.push(ChunkMetadata {
                    measurement: read_string(reader)?,
                    data_type: DataType::from_code(read_u8(reader)?)?,
                    point_count: read_u32(reader)?,
                    start_time: read_i64(reader)?,
                    end_time: read_i64(reader)?,
                    offset: read_u64(reader)?,
                    version,
                });
            }
            chunk_groups.push(ChunkGroupMetadata {
                device,
                version,
                offset,
                chunks,
            });
        }

        Ok(Self {
            schema,
            chunk_groups,
        })
    }
}

// =============================================================================
// Chunk Group Body Codec
// =============================================================================

/// Decode a verified chunk group body located at `group_offset`
pub(crate) fn decode_group_body(body: &[u8], group_offset: u64) -> Result<ChunkGroupMetadata> {
    let body_start = group_offset + GROUP_PREFIX_SIZE;
    let mut cursor = std::io::Cursor::new(body);

    let device = read_string(&mut cursor)?;
    let version = read_u64(&mut cursor)?;
    let chunk_count = read_u32(&mut cursor)? as usize;

    let mut chunks = Vec::with_capacity(chunk_count.min(4096));
    for _ in 0..chunk_count {
        let offset = body_start + cursor.position();
        let (header, _points) = read_chunk(&mut cursor, false)?;
        chunks.push(ChunkMetadata {
            measurement: header.measurement,
            data_type: header.data_type,
            point_count: header.point_count,
            start_time: header.start_time,
            end_time: header.end_time,
            offset,
            version,
        });
    }

    if cursor.position() as usize != body.len() {
        return Err(ChronoError::Corruption(format!(
            "chunk group at {} has trailing bytes",
            group_offset
        )));
    }

    Ok(ChunkGroupMetadata {
        device,
        version,
        offset: group_offset,
        chunks,
    })
}

pub(crate) struct ChunkHeader {
    pub measurement: String,
    pub data_type: DataType,
    pub point_count: u32,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
}

/// Read one chunk; points are materialized only when `with_points` is set
pub(crate) fn read_chunk<R: Read>(
    reader: &mut R,
    with_points: bool,
) -> Result<(ChunkHeader, Vec<(Timestamp, Value)>)> {
    let header = ChunkHeader {
        measurement: read_string(reader)?,
        data_type: DataType::from_code(read_u8(reader)?)?,
        point_count: read_u32(reader)?,
        start_time: read_i64(reader)?,
        end_time: read_i64(reader)?,
    };

    let mut points = Vec::new();
    for _ in 0..header.point_count {
        let t = read_i64(reader)?;
        let value = read_value(reader, header.data_type)?;
        if with_points {
            points.push((t, value));
        }
    }

    Ok((header, points))
}

/// Encode one chunk of points already ordered by timestamp
pub(crate) fn write_chunk<W: Write>(
    writer: &mut W,
    measurement: &str,
    data_type: DataType,
    points: &[(Timestamp, Value)],
) -> Result<()> {
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return Err(ChronoError::Storage(format!(
            "refusing to write empty chunk for {}",
            measurement
        )));
    };
    let count = u32::try_from(points.len())
        .map_err(|_| ChronoError::Storage(format!("chunk too large: {}", points.len())))?;

    write_string(writer, measurement)?;
    writer.write_u8(data_type.code())?;
    writer.write_u32::<BigEndian>(count)?;
    writer.write_i64::<BigEndian>(first.0)?;
    writer.write_i64::<BigEndian>(last.0)?;
    for (t, value) in points {
        if value.data_type() != data_type {
            return Err(ChronoError::TypeMismatch {
                measurement: measurement.to_string(),
                expected: data_type.to_string(),
                value: value.to_string(),
            });
        }
        writer.write_i64::<BigEndian>(*t)?;
        write_value(writer, value)?;
    }
    Ok(())
}

// =============================================================================
// Value Codec (PLAIN)
// =============================================================================

fn write_value<W: Write>(writer: &mut W, value: &Value) -> Result<()> {
    match value {
        Value::Boolean(v) => writer.write_u8(u8::from(*v))?,
        Value::Int32(v) => writer.write_i32::<BigEndian>(*v)?,
        Value::Int64(v) => writer.write_i64::<BigEndian>(*v)?,
        Value::Float(v) => writer.write_f32::<BigEndian>(*v)?,
        Value::Double(v) => writer.write_f64::<BigEndian>(*v)?,
        Value::Text(v) => write_string(writer, v)?,
    }
    Ok(())
}

fn read_value<R: Read>(reader: &mut R, data_type: DataType) -> Result<Value> {
    use byteorder::ReadBytesExt;
    use crate::storage::codec::eof_as_corruption;

    let value = match data_type {
        DataType::Boolean => Value::Boolean(read_u8(reader)? != 0),
        DataType::Int32 => Value::Int32(reader.read_i32::<BigEndian>().map_err(eof_as_corruption)?),
        DataType::Int64 => Value::Int64(read_i64(reader)?),
        DataType::Float => Value::Float(reader.read_f32::<BigEndian>().map_err(eof_as_corruption)?),
        DataType::Double => {
            Value::Double(reader.read_f64::<BigEndian>().map_err(eof_as_corruption)?)
        }
        DataType::Text => Value::Text(read_string(reader)?),
    };
    Ok(value)
}

fn len_i32(len: usize) -> Result<i32> {
    i32::try_from(len).map_err(|_| ChronoError::Storage(format!("too many entries: {}", len)))
}
