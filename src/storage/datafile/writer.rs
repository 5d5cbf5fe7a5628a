//! Data File Writer
//!
//! Appends chunk groups and seals the file with a footer.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, WriteBytesExt};
use tracing::debug;

use crate::error::{ChronoError, Result};
use crate::memtable::ReadOnlyMemChunk;
use crate::schema::FileSchema;
use crate::storage::codec::write_string;
use crate::storage::sync_dir;

use super::{
    write_chunk, ChunkGroupMetadata, ChunkMetadata, FileMetadata, CHUNK_GROUP_MARKER,
    FOOTER_MARKER, FORMAT_VERSION, GROUP_PREFIX_SIZE, GROUP_SUFFIX_SIZE, HEADER_SIZE, MAGIC,
};

/// Writer for one data file
///
/// Chunk groups are appended in flush order; `end_file` writes the footer.
/// Once `end_file` has been attempted the writer accepts nothing more, even
/// if the footer could not be written. When created by a [`RestorableWriter`](super::RestorableWriter) the bytes
/// go to a temporary sibling that replaces the target on `end_file`.
pub struct DataFileWriter {
    /// Final location of the data file
    path: PathBuf,
    /// File actually being written (same as `path` unless restoring)
    write_path: PathBuf,
    /// Buffered writer for performance
    writer: BufWriter<File>,
    /// Current write position
    offset: u64,
    /// Index of every chunk group written so far
    chunk_groups: Vec<ChunkGroupMetadata>,
    /// Set once `end_file` starts or a chunk group write fails
    finished: bool,
}

impl DataFileWriter {
    /// Create (or truncate) a data file and write its header
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut writer = BufWriter::new(file);
        Self::write_header(&mut writer)?;

        Ok(Self {
            path: path.to_path_buf(),
            write_path: path.to_path_buf(),
            writer,
            offset: HEADER_SIZE,
            chunk_groups: Vec::new(),
            finished: false,
        })
    }

    /// Continue an already-prepared file at `offset` (used by recovery)
    pub(crate) fn resume(
        path: PathBuf,
        write_path: PathBuf,
        writer: BufWriter<File>,
        offset: u64,
        chunk_groups: Vec<ChunkGroupMetadata>,
    ) -> Self {
        Self {
            path,
            write_path,
            writer,
            offset,
            chunk_groups,
            finished: false,
        }
    }

    pub(crate) fn write_header<W: Write>(writer: &mut W) -> Result<()> {
        writer.write_all(MAGIC)?;
        writer.write_u16::<BigEndian>(FORMAT_VERSION)?;
        Ok(())
    }

    /// Append one chunk group holding the non-empty chunks of `device`
    ///
    /// Returns `None` if every chunk was empty (nothing is written).
    pub fn write_chunk_group(
        &mut self,
        device: &str,
        version: u64,
        chunks: &[ReadOnlyMemChunk],
    ) -> Result<Option<ChunkGroupMetadata>> {
        self.ensure_open()?;
        let chunks: Vec<&ReadOnlyMemChunk> = chunks.iter().filter(|c| !c.is_empty()).collect();
        if chunks.is_empty() {
            return Ok(None);
        }

        let group_offset = self.offset;
        let body_start = group_offset + GROUP_PREFIX_SIZE;

        let mut body = Vec::new();
        write_string(&mut body, device)?;
        body.write_u64::<BigEndian>(version)?;
        body.write_u32::<BigEndian>(chunks.len() as u32)?;

        let mut metadata = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let chunk_offset = body_start + body.len() as u64;
            write_chunk(&mut body, &chunk.measurement, chunk.data_type, &chunk.points)?;
            metadata.push(ChunkMetadata {
                measurement: chunk.measurement.clone(),
                data_type: chunk.data_type,
                point_count: chunk.points.len() as u32,
                start_time: chunk.start_time().unwrap_or_default(),
                end_time: chunk.end_time().unwrap_or_default(),
                offset: chunk_offset,
                version,
            });
        }

        let body_len = u32::try_from(body.len())
            .map_err(|_| ChronoError::Storage(format!("chunk group too large: {}", body.len())))?;
        let crc = crc32fast::hash(&body);

        if let Err(e) = self.append_group(body_len, &body, crc) {
            // Part of the group may be in the file; later offsets would be wrong
            self.finished = true;
            return Err(e);
        }
        self.offset += GROUP_PREFIX_SIZE + body.len() as u64 + GROUP_SUFFIX_SIZE;

        let group = ChunkGroupMetadata {
            device: device.to_string(),
            version,
            offset: group_offset,
            chunks: metadata,
        };
        self.chunk_groups.push(group.clone());
        Ok(Some(group))
    }

    fn append_group(&mut self, body_len: u32, body: &[u8], crc: u32) -> Result<()> {
        self.writer.write_u8(CHUNK_GROUP_MARKER)?;
        self.writer.write_u32::<BigEndian>(body_len)?;
        self.writer.write_all(body)?;
        self.writer.write_u32::<BigEndian>(crc)?;
        Ok(())
    }

    /// Push buffered chunk groups to stable storage without sealing
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }

    /// Seal the file: write the footer, fsync, and move it into place
    ///
    /// The chunk-group index stays readable through
    /// [`chunk_groups`](Self::chunk_groups) whether or not sealing succeeds.
    pub fn end_file(&mut self, schema: &FileSchema) -> Result<FileMetadata> {
        self.ensure_open()?;
        self.finished = true;

        let metadata = FileMetadata {
            schema: schema.clone(),
            chunk_groups: self.chunk_groups.clone(),
        };

        let encoded = metadata.encode()?;
        let encoded_len = u32::try_from(encoded.len())
            .map_err(|_| ChronoError::Storage(format!("footer too large: {}", encoded.len())))?;

        self.writer.write_u8(FOOTER_MARKER)?;
        self.writer.write_all(&encoded)?;
        self.writer.write_u32::<BigEndian>(encoded_len)?;
        self.writer.write_u32::<BigEndian>(crc32fast::hash(&encoded))?;
        self.writer.write_all(MAGIC)?;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        if self.write_path != self.path {
            fs::rename(&self.write_path, &self.path)?;
        }
        if let Some(parent) = self.path.parent() {
            sync_dir(parent)?;
        }

        debug!(
            file = %self.path.display(),
            chunk_groups = metadata.chunk_groups.len(),
            "sealed data file"
        );
        Ok(metadata)
    }

    /// Whether the writer stopped accepting chunk groups
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn ensure_open(&self) -> Result<()> {
        if self.finished {
            return Err(ChronoError::Storage(format!(
                "data file {} no longer accepts writes",
                self.path.display()
            )));
        }
        Ok(())
    }

    /// Chunk groups written so far (including those that survived a crash)
    pub fn chunk_groups(&self) -> &[ChunkGroupMetadata] {
        &self.chunk_groups
    }

    /// Final location of the data file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current write position
    pub fn offset(&self) -> u64 {
        self.offset
    }
}
