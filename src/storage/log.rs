//! Durable Record Log
//!
//! File-backed databases persist every committed batch as one frame in an
//! append-only log. Opening the database replays the frames into a fresh
//! [`RecordTable`].
//!
//! ## File Layout
//!
//! ```text
//! ┌──────────────────────┐
//! │ "FLASHDB" │ version  │  8-byte header
//! ├──────────────────────┤
//! │ len │ crc32 │ payload│  frame 0   (len, crc32: u32 little-endian)
//! ├──────────────────────┤
//! │ len │ crc32 │ payload│  frame 1   (payload: MessagePack Vec<Mutation>)
//! ├──────────────────────┤
//! │         ...          │
//! └──────────────────────┘
//! ```
//!
//! ## Recovery
//!
//! A batch is one frame, so a crash leaves each batch either fully present or
//! absent. Replay stops at the first frame that is short or fails its
//! checksum and truncates the file back to the last good frame, provided
//! nothing but zero fill follows it. A damaged frame with real data after it
//! is not a torn write, and opening fails with [`Error::Corrupted`] rather
//! than dropping the frames behind it. The one case replay cannot tell apart
//! is a damaged length field that points past the end of the file: it reads
//! as a torn tail, and the frames after it are dropped.
//!
//! ## Durability
//!
//! Appends go through a `BufWriter`. They are visible in memory as soon as
//! they are appended and durable once [`RecordLog::sync`] returns.
//!
//! A failed append is rolled back: the partial frame is discarded and the
//! file is cut back to the last good frame. If even that fails, the log is
//! marked failed and refuses every further append and sync until the
//! database is reopened.

use super::table::{Mutation, RecordTable};
use crate::config::SyncMode;
use crate::error::{Error, Result};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, trace, warn};

/// File magic, followed by one format version byte.
const MAGIC: &[u8; 7] = b"FLASHDB";

/// Current on-disk format version.
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes.
pub const HEADER_SIZE: u64 = 8;

/// Frame prefix: payload length + checksum.
const FRAME_HEADER_SIZE: u64 = 8;

/// Largest payload a single frame may carry.
const MAX_FRAME_SIZE: u32 = 1 << 30;

/// Puts per frame when rewriting the log.
const REWRITE_BATCH: usize = 1024;

#[derive(Debug)]
pub struct RecordLog {
    path: PathBuf,
    /// None once a failed append could not be rolled back
    writer: Option<BufWriter<File>>,
    /// Bytes written so far, header included
    len: u64,
    sync: SyncMode,
}

impl RecordLog {
    /// Opens or creates the log at `path` and replays it into `table`.
    pub fn open(path: &Path, sync: SyncMode, table: &mut RecordTable) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut file = File::options()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;

        let file_len = file.metadata()?.len();
        let len = if file_len == 0 {
            write_header(&mut file)?;
            file.sync_all()?;
            HEADER_SIZE
        } else {
            let valid = replay(&file, file_len, table)?;
            if valid < file_len {
                warn!(
                    path = %path.display(),
                    valid_bytes = valid,
                    dropped_bytes = file_len - valid,
                    "Truncating torn tail of record log"
                );
                file.set_len(valid)?;
                file.sync_all()?;
            }
            valid
        };

        file.seek(SeekFrom::Start(len))?;

        debug!(path = %path.display(), bytes = len, records = table.len(), "Record log opened");

        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(BufWriter::new(file)),
            len,
            sync,
        })
    }

    /// Location of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Logical size of the log in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// True if the log holds no frames.
    pub fn is_empty(&self) -> bool {
        self.len <= HEADER_SIZE
    }

    /// True once a failed append could not be rolled back.
    pub fn is_failed(&self) -> bool {
        self.writer.is_none()
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>> {
        self.writer.as_mut().ok_or_else(|| {
            Error::Io(io::Error::other(
                "record log failed after an unrecoverable write error; reopen the database",
            ))
        })
    }

    /// Appends one batch as a single frame.
    ///
    /// On error nothing of the batch remains in the log.
    pub fn append(&mut self, batch: &[Mutation]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let frame = encode_frame(batch)?;
        let always = self.sync == SyncMode::Always;

        let writer = self.writer()?;
        let result = writer.write_all(&frame).map_err(Error::from).and_then(|()| {
            if always {
                sync_writer(writer)?;
            }
            Ok(())
        });

        match result {
            Ok(()) => {
                self.len += frame.len() as u64;
                trace!(ops = batch.len(), bytes = frame.len(), "Appended log frame");
                Ok(())
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Log append failed, rolling back");
                self.roll_back();
                Err(e)
            }
        }
    }

    /// Blocks until every appended frame is on stable storage.
    pub fn sync(&mut self) -> Result<()> {
        sync_writer(self.writer()?)
    }

    /// Discards whatever a failed append left behind and rewinds the file to
    /// the last good frame.
    fn roll_back(&mut self) {
        // into_parts drops the buffer; dropping the BufWriter would flush it
        if let Some(writer) = self.writer.take() {
            let _ = writer.into_parts();
        }
        match self.reopen_at_len() {
            Ok(writer) => self.writer = Some(writer),
            Err(e) => error!(
                path = %self.path.display(),
                error = %e,
                "Record log rollback failed, refusing further writes"
            ),
        }
    }

    fn reopen_at_len(&self) -> Result<BufWriter<File>> {
        let mut file = File::options().read(true).write(true).open(&self.path)?;
        file.set_len(self.len)?;
        file.seek(SeekFrom::Start(self.len))?;
        file.sync_data()?;
        Ok(BufWriter::new(file))
    }

    /// Replaces the log with a minimal one holding exactly `table`.
    ///
    /// The new log is written beside the old one and renamed over it, so a
    /// crash at any point leaves one complete log behind. The writer moves to
    /// the new file in the same step as the rename.
    pub fn rewrite(&mut self, table: &RecordTable) -> Result<()> {
        self.sync()?;
        let before = self.len;

        let tmp_path = compact_path(&self.path);
        let (file, len) = match write_compacted(&tmp_path, table) {
            Ok(written) => written,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        // The old writer is synced, so dropping it writes nothing
        self.writer = Some(BufWriter::new(file));
        self.len = len;

        sync_parent_dir(&self.path)?;

        info!(
            path = %self.path.display(),
            before_bytes = before,
            after_bytes = len,
            "Record log compacted"
        );
        Ok(())
    }
}

/// Writes `table` as a fresh log at `path` and returns the handle positioned
/// at its end.
fn write_compacted(path: &Path, table: &RecordTable) -> Result<(File, u64)> {
    let mut file = File::options()
        .create(true)
        .truncate(true)
        .read(true)
        .write(true)
        .open(path)?;
    write_header(&mut file)?;
    let mut len = HEADER_SIZE;
    {
        let mut writer = BufWriter::new(&mut file);
        let mut batch = Vec::with_capacity(REWRITE_BATCH);
        for (key, record) in table.iter() {
            batch.push(Mutation::put(key.clone(), record.clone()));
            if batch.len() == REWRITE_BATCH {
                len += write_frame(&mut writer, &batch)?;
                batch.clear();
            }
        }
        if !batch.is_empty() {
            len += write_frame(&mut writer, &batch)?;
        }
        writer.flush()?;
    }
    file.sync_all()?;
    file.seek(SeekFrom::Start(len))?;
    Ok((file, len))
}

fn sync_writer(writer: &mut BufWriter<File>) -> Result<()> {
    writer.flush()?;
    writer.get_ref().sync_data()?;
    Ok(())
}

fn write_header(file: &mut File) -> Result<()> {
    let mut header = [0u8; HEADER_SIZE as usize];
    header[..7].copy_from_slice(MAGIC);
    header[7] = FORMAT_VERSION;
    file.write_all(&header)?;
    Ok(())
}

/// Serializes one batch into a complete frame.
fn encode_frame(batch: &[Mutation]) -> Result<Vec<u8>> {
    let payload = rmp_serde::to_vec(batch)?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_SIZE)
        .ok_or_else(|| Error::invalid(format!("batch too large: {} bytes", payload.len())))?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE as usize + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

fn write_frame<W: Write>(writer: &mut W, batch: &[Mutation]) -> Result<u64> {
    let frame = encode_frame(batch)?;
    writer.write_all(&frame)?;
    Ok(frame.len() as u64)
}

/// Replays every intact frame into `table` and returns the offset just past
/// the last one.
fn replay(file: &File, file_len: u64, table: &mut RecordTable) -> Result<u64> {
    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(0))?;

    let mut header = [0u8; HEADER_SIZE as usize];
    match reader.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
            return Err(Error::Corrupted {
                offset: 0,
                reason: "truncated header".into(),
            })
        }
        Err(e) => return Err(e.into()),
    }
    if &header[..7] != MAGIC {
        return Err(Error::Corrupted {
            offset: 0,
            reason: "not a flashdb record log".into(),
        });
    }
    if header[7] != FORMAT_VERSION {
        return Err(Error::Corrupted {
            offset: 7,
            reason: format!("unsupported format version {}", header[7]),
        });
    }

    let mut offset = HEADER_SIZE;
    let mut frames = 0u64;
    loop {
        let mut prefix = [0u8; FRAME_HEADER_SIZE as usize];
        if !read_full(&mut reader, &mut prefix)? {
            break;
        }
        let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
        let crc = u32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);
        let end = offset + FRAME_HEADER_SIZE + len as u64;

        if end > file_len {
            debug!(offset, len, "Incomplete frame at end of log");
            break;
        }
        // Every written payload is at least one byte, so this is zero fill
        // left by a crash, or damage
        if len == 0 {
            if prefix.iter().any(|b| *b != 0) || !rest_is_zero(&mut reader)? {
                return Err(Error::Corrupted {
                    offset,
                    reason: "empty frame before the end of the log".into(),
                });
            }
            debug!(offset, "Zero fill at end of log");
            break;
        }

        let mut payload = vec![0u8; len as usize];
        reader.read_exact(&mut payload)?;
        if crc32fast::hash(&payload) != crc {
            if !rest_is_zero(&mut reader)? {
                return Err(Error::Corrupted {
                    offset,
                    reason: "checksum mismatch before the end of the log".into(),
                });
            }
            debug!(offset, "Frame checksum mismatch at end of log");
            break;
        }

        let batch: Vec<Mutation> = rmp_serde::from_slice(&payload).map_err(|e| Error::Corrupted {
            offset,
            reason: format!("undecodable frame: {e}"),
        })?;
        table.apply(batch);

        offset = end;
        frames += 1;
    }

    debug!(frames, bytes = offset, "Record log replayed");
    Ok(offset)
}

/// Fills `buf` completely. Returns false if the input ended first.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// True if nothing but zero bytes remain in `reader`.
fn rest_is_zero<R: Read>(reader: &mut R) -> Result<bool> {
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => return Ok(true),
            Ok(n) if buf[..n].iter().all(|b| *b == 0) => continue,
            Ok(_) => return Ok(false),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

fn compact_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".compact");
    PathBuf::from(name)
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        File::open(parent)?.sync_all()?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> Result<()> {
    Ok(())
}
