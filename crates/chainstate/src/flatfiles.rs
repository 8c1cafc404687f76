//! Append-only block and undo files.
//!
//! Every record is framed as `magic || len (u32 LE) || payload`. A record is
//! addressed by the file number and the offset of its frame, so an index
//! entry only ever points at bytes that were fully written and synced.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use zend_primitives::encoding::{DecodeError, Decoder, Encoder};

const FRAME_HEADER_LEN: u64 = 8;
/// Size at which appends roll over to the next file.
pub const MAX_BLOCKFILE_SIZE: u64 = 128 * 1024 * 1024;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FileLocation {
    pub file_id: u32,
    pub offset: u64,
    pub len: u32,
}

impl FileLocation {
    pub fn encode_into(&self, encoder: &mut Encoder) {
        encoder.write_u32_le(self.file_id);
        encoder.write_u64_le(self.offset);
        encoder.write_u32_le(self.len);
    }

    pub fn decode_from(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            file_id: decoder.read_u32_le()?,
            offset: decoder.read_u64_le()?,
            len: decoder.read_u32_le()?,
        })
    }
}

#[derive(Debug)]
pub enum FlatFileError {
    Io(std::io::Error),
    BadMagic { file_id: u32, offset: u64 },
    LengthMismatch { expected: u32, found: u32 },
    Poisoned,
}

impl std::fmt::Display for FlatFileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlatFileError::Io(err) => write!(f, "{err}"),
            FlatFileError::BadMagic { file_id, offset } => {
                write!(f, "bad record magic in file {file_id} at offset {offset}")
            }
            FlatFileError::LengthMismatch { expected, found } => {
                write!(f, "record length {found} does not match index length {expected}")
            }
            FlatFileError::Poisoned => write!(f, "flat file lock poisoned"),
        }
    }
}

impl std::error::Error for FlatFileError {}

impl From<std::io::Error> for FlatFileError {
    fn from(err: std::io::Error) -> Self {
        FlatFileError::Io(err)
    }
}

pub struct FlatFileStore {
    dir: PathBuf,
    prefix: &'static str,
    magic: [u8; 4],
    max_file_size: u64,
    cursor: Mutex<Cursor>,
}

#[derive(Debug)]
struct Cursor {
    file_id: u32,
    len: u64,
}

impl FlatFileStore {
    /// Block files, `blk00000.dat` and onwards.
    pub fn blocks(
        dir: impl Into<PathBuf>,
        magic: [u8; 4],
        max_file_size: u64,
    ) -> Result<Self, FlatFileError> {
        Self::open(dir, "blk", magic, max_file_size)
    }

    /// Undo files, `rev00000.dat` and onwards.
    pub fn undo(
        dir: impl Into<PathBuf>,
        magic: [u8; 4],
        max_file_size: u64,
    ) -> Result<Self, FlatFileError> {
        Self::open(dir, "rev", magic, max_file_size)
    }

    fn open(
        dir: impl Into<PathBuf>,
        prefix: &'static str,
        magic: [u8; 4],
        max_file_size: u64,
    ) -> Result<Self, FlatFileError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let cursor = last_file(&dir, prefix, max_file_size)?;
        Ok(Self {
            dir,
            prefix,
            magic,
            max_file_size,
            cursor: Mutex::new(cursor),
        })
    }

    /// Appends one record and syncs it before returning its location.
    pub fn append(&self, payload: &[u8]) -> Result<FileLocation, FlatFileError> {
        let mut cursor = self.cursor.lock().map_err(|_| FlatFileError::Poisoned)?;
        let frame_len = FRAME_HEADER_LEN + payload.len() as u64;
        if cursor.len > 0 && cursor.len + frame_len > self.max_file_size {
            cursor.file_id += 1;
            cursor.len = 0;
        }
        let len = u32::try_from(payload.len()).map_err(|_| {
            FlatFileError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "record larger than 4 GiB",
            ))
        })?;
        let path = file_path(&self.dir, self.prefix, cursor.file_id);
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut frame = Vec::with_capacity(frame_len as usize);
        frame.extend_from_slice(&self.magic);
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(payload);
        file.write_all(&frame)?;
        file.sync_data()?;

        let location = FileLocation {
            file_id: cursor.file_id,
            offset: cursor.len,
            len,
        };
        cursor.len += frame_len;
        Ok(location)
    }

    pub fn read(&self, location: FileLocation) -> Result<Vec<u8>, FlatFileError> {
        let path = file_path(&self.dir, self.prefix, location.file_id);
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(location.offset))?;
        let mut header = [0u8; FRAME_HEADER_LEN as usize];
        file.read_exact(&mut header)?;
        if header[..4] != self.magic {
            return Err(FlatFileError::BadMagic {
                file_id: location.file_id,
                offset: location.offset,
            });
        }
        let found = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if found != location.len {
            return Err(FlatFileError::LengthMismatch {
                expected: location.len,
                found,
            });
        }
        let mut payload = vec![0u8; found as usize];
        file.read_exact(&mut payload)?;
        Ok(payload)
    }
}

fn file_path(dir: &Path, prefix: &str, file_id: u32) -> PathBuf {
    dir.join(format!("{prefix}{file_id:05}.dat"))
}

fn last_file(dir: &Path, prefix: &str, max_file_size: u64) -> Result<Cursor, FlatFileError> {
    let mut file_id = 0u32;
    let mut last = None;
    loop {
        let path = file_path(dir, prefix, file_id);
        if !path.exists() {
            break;
        }
        last = Some(Cursor {
            file_id,
            len: std::fs::metadata(&path)?.len(),
        });
        file_id += 1;
    }
    Ok(match last {
        Some(cursor) if cursor.len >= max_file_size => Cursor {
            file_id: cursor.file_id + 1,
            len: 0,
        },
        Some(cursor) => cursor,
        None => Cursor { file_id: 0, len: 0 },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAGIC: [u8; 4] = [0xfa, 0xbf, 0xb5, 0xda];

    #[test]
    fn records_roll_over_to_new_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FlatFileStore::blocks(dir.path(), MAGIC, 64).expect("open");
        let first = store.append(&[1u8; 40]).expect("append");
        let second = store.append(&[2u8; 40]).expect("append");
        assert_eq!(first.file_id, 0);
        assert_eq!(second.file_id, 1);
        assert_eq!(second.offset, 0);
        assert_eq!(store.read(first).expect("read"), vec![1u8; 40]);
        assert_eq!(store.read(second).expect("read"), vec![2u8; 40]);
    }

    #[test]
    fn reopen_appends_after_existing_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = {
            let store = FlatFileStore::undo(dir.path(), MAGIC, 1 << 20).expect("open");
            store.append(b"undo-a").expect("append")
        };
        let store = FlatFileStore::undo(dir.path(), MAGIC, 1 << 20).expect("reopen");
        let second = store.append(b"undo-b").expect("append");
        assert_eq!(second.offset, FRAME_HEADER_LEN + 6);
        assert_eq!(store.read(first).expect("read"), b"undo-a");
    }

    #[test]
    fn wrong_length_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FlatFileStore::blocks(dir.path(), MAGIC, 1 << 20).expect("open");
        let mut location = store.append(b"payload").expect("append");
        location.len += 1;
        assert!(matches!(
            store.read(location),
            Err(FlatFileError::LengthMismatch { .. })
        ));
    }
}
