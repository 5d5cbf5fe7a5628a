//! Restorable Writer
//!
//! Detects whether a data file was sealed, and if not, salvages the chunk
//! groups that were fully written before the crash.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{ChronoError, Result};
use crate::storage::codec::{read_u32, read_u8};

use super::reader::DataFileReader;
use super::writer::DataFileWriter;
use super::{
    decode_group_body, ChunkGroupMetadata, FileMetadata, CHUNK_GROUP_MARKER, GROUP_PREFIX_SIZE,
    GROUP_SUFFIX_SIZE, HEADER_SIZE,
};

/// Suffix of the temporary file a crashed data file is rebuilt into
const RECOVERING_SUFFIX: &str = ".recovering";

/// Crash inspector for one data file
///
/// ## Recovery model
/// The original file is never modified in place. Its valid prefix (header and
/// surviving chunk groups) is copied into `<file>.recovering`, new chunk
/// groups are appended there, and sealing renames it over the original.
pub struct RestorableWriter {
    path: PathBuf,
    /// Footer of an intact file
    sealed: Option<FileMetadata>,
    /// Chunk groups that survived a crash
    surviving: Vec<ChunkGroupMetadata>,
    /// Length of the valid prefix of a crashed file (0 if even the header is bad)
    valid_len: u64,
}

impl RestorableWriter {
    /// Inspect `path`
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();

        let header_ok = DataFileReader::check_header(&mut file).is_ok();
        if header_ok {
            match DataFileReader::read_footer(&mut file, len) {
                Ok(metadata) => {
                    return Ok(Self {
                        path: path.to_path_buf(),
                        sealed: Some(metadata),
                        surviving: Vec::new(),
                        valid_len: len,
                    });
                }
                Err(ChronoError::Io(e)) => return Err(ChronoError::Io(e)),
                Err(e) => debug!(file = %path.display(), reason = %e, "data file is not sealed"),
            }
        }

        let (surviving, valid_len) = if header_ok {
            Self::scan_chunk_groups(&mut file, len)?
        } else {
            warn!(file = %path.display(), len, "data file header is damaged, discarding content");
            (Vec::new(), 0)
        };

        warn!(
            file = %path.display(),
            len,
            valid_len,
            surviving_groups = surviving.len(),
            "data file crashed before it was sealed"
        );

        Ok(Self {
            path: path.to_path_buf(),
            sealed: None,
            surviving,
            valid_len,
        })
    }

    /// Whether the file ends before a verifiable footer
    pub fn has_crashed(&self) -> bool {
        self.sealed.is_none()
    }

    /// Footer of an intact file
    pub fn sealed_metadata(&self) -> Option<&FileMetadata> {
        self.sealed.as_ref()
    }

    /// Chunk groups that survived a crash (empty for intact files)
    pub fn chunk_groups(&self) -> &[ChunkGroupMetadata] {
        &self.surviving
    }

    /// Length of the bytes that will be kept from a crashed file
    pub fn valid_len(&self) -> u64 {
        self.valid_len
    }

    /// Start rebuilding a crashed file: copy its valid prefix into a
    /// temporary sibling and return a writer positioned after it
    pub fn into_writer(self) -> Result<DataFileWriter> {
        if !self.has_crashed() {
            return Err(ChronoError::Storage(format!(
                "{} is sealed and cannot be reopened for writing",
                self.path.display()
            )));
        }

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(RECOVERING_SUFFIX);
        let tmp = PathBuf::from(tmp_name);

        let out = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        let mut writer = BufWriter::new(out);

        let offset = if self.valid_len >= HEADER_SIZE {
            let mut source = BufReader::new(File::open(&self.path)?);
            let copied = io::copy(&mut (&mut source).take(self.valid_len), &mut writer)?;
            if copied != self.valid_len {
                let _ = fs::remove_file(&tmp);
                return Err(ChronoError::Storage(format!(
                    "{} shrank while being recovered",
                    self.path.display()
                )));
            }
            self.valid_len
        } else {
            DataFileWriter::write_header(&mut writer)?;
            HEADER_SIZE
        };

        Ok(DataFileWriter::resume(
            self.path,
            tmp,
            writer,
            offset,
            self.surviving,
        ))
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Walk chunk groups from the header, stopping at the first one that is
    /// incomplete or fails its checksum
    fn scan_chunk_groups(file: &mut File, len: u64) -> Result<(Vec<ChunkGroupMetadata>, u64)> {
        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(HEADER_SIZE))?;

        let mut groups = Vec::new();
        let mut offset = HEADER_SIZE;

        while offset + GROUP_PREFIX_SIZE <= len {
            let Ok(marker) = read_u8(&mut reader) else { break };
            if marker != CHUNK_GROUP_MARKER {
                break;
            }
            let Ok(body_len) = read_u32(&mut reader) else { break };
            let body_len = body_len as u64;
            if offset + GROUP_PREFIX_SIZE + body_len + GROUP_SUFFIX_SIZE > len {
                break;
            }

            let mut body = vec![0u8; body_len as usize];
            reader.read_exact(&mut body)?;
            let crc = read_u32(&mut reader)?;
            if crc32fast::hash(&body) != crc {
                warn!(offset, "chunk group checksum mismatch, truncating here");
                break;
            }

            match decode_group_body(&body, offset) {
                Ok(group) => groups.push(group),
                Err(e) => {
                    warn!(offset, reason = %e, "undecodable chunk group, truncating here");
                    break;
                }
            }
            offset += GROUP_PREFIX_SIZE + body_len + GROUP_SUFFIX_SIZE;
        }

        Ok((groups, offset))
    }
}
