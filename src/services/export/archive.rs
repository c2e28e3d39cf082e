//! Incremental zip writer for streamed exports.
//!
//! `zip::ZipWriter` needs `Write + Seek` because it patches each local file
//! header (CRC and sizes) once the entry's data is written. It only ever
//! seeks back into the entry it is currently writing, so everything before
//! the start of that entry is final. [`Spool`] keeps just that unfinished
//! tail in memory and hands finished bytes out as they become final.

use bytes::Bytes;
use std::{
    collections::HashSet,
    io::{self, Seek, SeekFrom, Write},
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::warn;
use zip::{
    CompressionMethod, ZipWriter,
    result::ZipResult,
    write::FileOptions,
};

#[derive(Debug, Default)]
struct Window {
    /// Absolute offset of `buf[0]`. Bytes before it were handed out.
    base: u64,
    buf: Vec<u8>,
    /// Absolute cursor.
    pos: u64,
}

impl Window {
    fn end(&self) -> u64 {
        self.base + self.buf.len() as u64
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.pos < self.base {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "write before the committed offset",
            ));
        }
        let start = (self.pos - self.base) as usize;
        let end = start + data.len();
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.buf[start..end].copy_from_slice(data);
        self.pos += data.len() as u64;
        Ok(data.len())
    }

    fn seek(&mut self, target: SeekFrom) -> io::Result<u64> {
        let next = match target {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
            SeekFrom::End(delta) => self.end().checked_add_signed(delta),
        };
        match next {
            Some(next) if next >= self.base && next <= self.end() => {
                self.pos = next;
                Ok(next)
            }
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek outside the uncommitted window",
            )),
        }
    }

    /// Remove and return every byte before `upto`.
    fn drain_to(&mut self, upto: u64) -> Bytes {
        let upto = upto.clamp(self.base, self.end());
        let n = (upto - self.base) as usize;
        let out: Vec<u8> = self.buf.drain(..n).collect();
        self.base = upto;
        Bytes::from(out)
    }
}

/// Shared handle to the spool window; one clone is owned by the zip writer,
/// the other drains finished bytes.
#[derive(Clone, Debug, Default)]
pub struct Spool {
    window: Arc<Mutex<Window>>,
}

impl Spool {
    fn lock(&self) -> io::Result<MutexGuard<'_, Window>> {
        self.window
            .lock()
            .map_err(|_| io::Error::other("archive spool lock poisoned"))
    }

    pub fn position(&self) -> io::Result<u64> {
        Ok(self.lock()?.pos)
    }

    /// Bytes handed out so far.
    #[cfg(test)]
    pub fn committed(&self) -> io::Result<u64> {
        Ok(self.lock()?.base)
    }

    /// Mark everything before `offset` final and return it.
    pub fn take_until(&self, offset: u64) -> io::Result<Bytes> {
        Ok(self.lock()?.drain_to(offset))
    }

    pub fn take_all(&self) -> io::Result<Bytes> {
        let mut window = self.lock()?;
        let end = window.end();
        Ok(window.drain_to(end))
    }
}

impl Write for Spool {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.lock()?.write(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for Spool {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.lock()?.seek(pos)
    }
}

/// Zip writer whose output can be drained while entries are still being
/// added.
pub struct ArchiveWriter {
    zip: ZipWriter<Spool>,
    spool: Spool,
    options: FileOptions,
    /// Offset before which every byte is final.
    ready_until: u64,
    paths: HashSet<String>,
    duplicates: usize,
}

impl ArchiveWriter {
    pub fn new() -> Self {
        let spool = Spool::default();
        let options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(0o644);
        Self {
            zip: ZipWriter::new(spool.clone()),
            spool,
            options,
            ready_until: 0,
            paths: HashSet::new(),
            duplicates: 0,
        }
    }

    /// Add one file. Starting an entry finalizes the previous one, so the
    /// bytes up to the new entry's header become ready.
    ///
    /// Zip allows two entries with one path; extractors keep only the last,
    /// so a repeat is counted and logged.
    pub fn append(&mut self, path: &str, content: &[u8]) -> ZipResult<()> {
        if !self.paths.insert(path.to_string()) {
            self.duplicates += 1;
            warn!(path, "archive already holds an entry at this path");
        }
        let boundary = self.spool.position()?;
        self.zip.start_file(path, self.options)?;
        self.ready_until = boundary;
        self.zip.write_all(content)?;
        Ok(())
    }

    /// Entries written at a path that was already taken.
    pub fn duplicate_entries(&self) -> usize {
        self.duplicates
    }

    /// Drain the bytes that can no longer change. Empty when nothing new is
    /// final yet.
    pub fn take_ready(&mut self) -> io::Result<Bytes> {
        self.spool.take_until(self.ready_until)
    }

    /// Write the central directory and return every remaining byte.
    pub fn finish(mut self) -> ZipResult<Bytes> {
        self.zip.finish()?;
        Ok(self.spool.take_all()?)
    }
}

impl Default for ArchiveWriter {
    fn default() -> Self {
        Self::new()
    }
}
