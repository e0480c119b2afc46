//! Incremental reader over the newest game log file

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Tracks the active log file and how far into it we have read.
#[derive(Debug)]
pub struct LogCursor {
    directory: PathBuf,
    prefix: String,
    suffix: String,
    active_file: Option<PathBuf>,
    byte_offset: u64,
}

impl LogCursor {
    pub fn new(directory: impl Into<PathBuf>, prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            prefix: prefix.into(),
            suffix: suffix.into(),
            active_file: None,
            byte_offset: 0,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn active_file(&self) -> Option<&Path> {
        self.active_file.as_deref()
    }

    pub fn byte_offset(&self) -> u64 {
        self.byte_offset
    }

    /// Return text appended since the last poll, or an empty string.
    ///
    /// Switching to a different file resets the offset and yields nothing for
    /// that poll; the new file is read from its start on the next one.
    pub fn poll(&mut self) -> String {
        let newest = self.find_latest_log();
        if newest != self.active_file {
            tracing::info!("[TAIL] Active log file: {:?}", newest);
            self.active_file = newest;
            self.byte_offset = 0;
            return String::new();
        }

        let Some(path) = self.active_file.clone() else {
            return String::new();
        };

        match self.read_delta(&path) {
            Ok(delta) => delta,
            Err(e) => {
                tracing::warn!("[TAIL] Failed to read {:?}: {}", path, e);
                String::new()
            }
        }
    }

    /// Newest file in the directory matching prefix and suffix, by mtime.
    fn find_latest_log(&self) -> Option<PathBuf> {
        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!("[TAIL] Cannot list {:?}: {}", self.directory, e);
                return None;
            }
        };

        entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                name.starts_with(&self.prefix) && name.ends_with(&self.suffix)
            })
            .filter_map(|entry| {
                let meta = entry.metadata().ok()?;
                if !meta.is_file() {
                    return None;
                }
                let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                Some((modified, entry.path()))
            })
            .max()
            .map(|(_, path)| path)
    }

    fn read_delta(&mut self, path: &Path) -> io::Result<String> {
        let mut file = File::open(path)?;
        let size = file.seek(SeekFrom::End(0))?;

        if self.byte_offset > size {
            tracing::info!("[TAIL] {:?} shrank ({} > {}), rereading from start", path, self.byte_offset, size);
            self.byte_offset = 0;
        }

        file.seek(SeekFrom::Start(self.byte_offset))?;
        let mut buf = Vec::new();
        file.take(size - self.byte_offset).read_to_end(&mut buf)?;

        let (text, consumed) = decode_complete(&buf);
        self.byte_offset += consumed as u64;
        Ok(text)
    }
}

/// Decode `buf`, holding back a trailing partial UTF-8 sequence.
///
/// Returns the text and how many bytes it accounts for. Invalid bytes in the
/// middle are replaced, as the game log is not guaranteed to be clean.
fn decode_complete(buf: &[u8]) -> (String, usize) {
    match std::str::from_utf8(buf) {
        Ok(text) => (text.to_string(), buf.len()),
        Err(e) if e.error_len().is_none() => {
            let end = e.valid_up_to();
            (String::from_utf8_lossy(&buf[..end]).into_owned(), end)
        }
        Err(_) => {
            let end = incomplete_tail_start(buf);
            (String::from_utf8_lossy(&buf[..end]).into_owned(), end)
        }
    }
}

/// Index where a trailing incomplete UTF-8 sequence starts, or `buf.len()`.
fn incomplete_tail_start(buf: &[u8]) -> usize {
    for back in 1..=3.min(buf.len()) {
        let i = buf.len() - back;
        let byte = buf[i];
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let needed = match byte {
            b if b & 0b1110_0000 == 0b1100_0000 => 2,
            b if b & 0b1111_0000 == 0b1110_0000 => 3,
            b if b & 0b1111_1000 == 0b1111_0000 => 4,
            _ => return buf.len(),
        };
        return if back < needed { i } else { buf.len() };
    }
    buf.len()
}
