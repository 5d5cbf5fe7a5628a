//! Data File Reader
//!
//! Opens sealed data files and reads chunks through the footer index.

use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::{ChronoError, Result};
use crate::schema::{Timestamp, Value};
use crate::storage::codec::{read_u32, read_u8};

use super::{
    read_chunk, ChunkMetadata, FileMetadata, FOOTER_MARKER, FORMAT_VERSION, HEADER_SIZE, MAGIC,
    TRAILER_SIZE,
};

/// Reader for sealed data files with the footer index held in memory
pub struct DataFileReader {
    path: PathBuf,
    /// File handle for reading chunks
    file: BufReader<File>,
    /// Decoded footer
    metadata: FileMetadata,
}

impl DataFileReader {
    /// Open a sealed data file
    ///
    /// Fails with `Corruption` if the header or footer does not verify.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();

        Self::check_header(&mut file)?;
        let metadata = Self::read_footer(&mut file, len)?;

        Ok(Self {
            path: path.to_path_buf(),
            file: BufReader::new(file),
            metadata,
        })
    }

    /// Validate the magic and format version at the start of the file
    pub(crate) fn check_header<R: Read + Seek>(file: &mut R) -> Result<()> {
        file.seek(SeekFrom::Start(0))?;
        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)
            .map_err(|_| ChronoError::Corruption("data file shorter than header".to_string()))?;

        if &header[0..4] != MAGIC {
            return Err(ChronoError::Corruption(format!(
                "Invalid data file magic: {:?}",
                &header[0..4]
            )));
        }
        let version = u16::from_be_bytes([header[4], header[5]]);
        if version != FORMAT_VERSION {
            return Err(ChronoError::Corruption(format!(
                "Unsupported data file version: {}",
                version
            )));
        }
        Ok(())
    }

    /// Locate, verify and decode the footer of a file of length `len`
    pub(crate) fn read_footer<R: Read + Seek>(file: &mut R, len: u64) -> Result<FileMetadata> {
        if len < HEADER_SIZE + 1 + TRAILER_SIZE {
            return Err(ChronoError::Corruption("data file has no footer".to_string()));
        }

        file.seek(SeekFrom::Start(len - TRAILER_SIZE))?;
        let metadata_len = read_u32(file)? as u64;
        let expected_crc = read_u32(file)?;
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(ChronoError::Corruption("data file has no tail magic".to_string()));
        }

        let footer_start = (len - TRAILER_SIZE)
            .checked_sub(metadata_len + 1)
            .filter(|start| *start >= HEADER_SIZE)
            .ok_or_else(|| {
                ChronoError::Corruption(format!("footer length {} out of range", metadata_len))
            })?;

        file.seek(SeekFrom::Start(footer_start))?;
        if read_u8(file)? != FOOTER_MARKER {
            return Err(ChronoError::Corruption("footer marker missing".to_string()));
        }

        let mut encoded = vec![0u8; metadata_len as usize];
        file.read_exact(&mut encoded)?;
        let actual_crc = crc32fast::hash(&encoded);
        if actual_crc != expected_crc {
            return Err(ChronoError::Corruption(format!(
                "footer checksum mismatch: expected {}, got {}",
                expected_crc, actual_crc
            )));
        }

        let mut cursor = Cursor::new(encoded.as_slice());
        let metadata = FileMetadata::decode(&mut cursor)?;
        if cursor.position() as usize != encoded.len() {
            return Err(ChronoError::Corruption(
                "footer has trailing bytes".to_string(),
            ));
        }
        Ok(metadata)
    }

    /// Decoded footer: schema and chunk-group index
    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every point of one chunk
    pub fn read_chunk(&mut self, chunk: &ChunkMetadata) -> Result<Vec<(Timestamp, Value)>> {
        read_indexed_chunk(&mut self.file, &self.path, chunk)
    }

    /// Read one chunk of a file that has no footer yet, located through the
    /// metadata its writer returned
    pub fn read_unsealed_chunk(path: &Path, chunk: &ChunkMetadata) -> Result<Vec<(Timestamp, Value)>> {
        let mut file = BufReader::new(File::open(path)?);
        read_indexed_chunk(&mut file, path, chunk)
    }

    /// Every chunk of a series as `(flush version, points)`, in file order
    pub fn read_series(
        &mut self,
        device: &str,
        measurement: &str,
    ) -> Result<Vec<(u64, Vec<(Timestamp, Value)>)>> {
        let chunks: Vec<ChunkMetadata> = self
            .metadata
            .chunks_of(device, measurement)
            .cloned()
            .collect();

        let mut series = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            series.push((chunk.version, self.read_chunk(chunk)?));
        }
        Ok(series)
    }
}

fn read_indexed_chunk<R: Read + Seek>(
    file: &mut R,
    path: &Path,
    chunk: &ChunkMetadata,
) -> Result<Vec<(Timestamp, Value)>> {
    file.seek(SeekFrom::Start(chunk.offset))?;
    let (header, points) = read_chunk(file, true)?;
    if header.measurement != chunk.measurement || header.point_count != chunk.point_count {
        return Err(ChronoError::Corruption(format!(
            "{}: chunk at {} does not match its index entry",
            path.display(),
            chunk.offset
        )));
    }
    Ok(points)
}
