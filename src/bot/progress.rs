// src/bot/progress.rs - Append-only record of names already actioned

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::types::{MassBanError, MassBanResult};

/// A local progress file.
///
/// Names are only ever appended, and each append reaches the disk before
/// it returns so a crash leaves an accurate resume point.
#[derive(Debug, Clone)]
pub struct ProgressFile {
    path: PathBuf,
    separator: String,
}

impl ProgressFile {
    pub fn new<P: Into<PathBuf>>(path: P, separator: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            separator: separator.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Record `name` as actioned
    pub fn append(&self, name: &str) -> MassBanResult<()> {
        self.write_record(name).map_err(|source| MassBanError::ProgressWrite {
            name: name.to_string(),
            path: self.path.clone(),
            source,
        })
    }

    fn write_record(&self, name: &str) -> io::Result<()> {
        // Never create the file here: a missing file is a configuration problem
        let mut file = OpenOptions::new().read(true).append(true).open(&self.path)?;

        let mut record = String::with_capacity(name.len() + 2 * self.separator.len());
        if !self.ends_with_separator(&mut file)? {
            record.push_str(&self.separator);
        }
        record.push_str(name);
        record.push_str(&self.separator);

        file.write_all(record.as_bytes())?;
        file.sync_data()
    }

    /// True when the file is empty or its last bytes are the separator
    fn ends_with_separator(&self, file: &mut File) -> io::Result<bool> {
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(true);
        }

        let separator = self.separator.as_bytes();
        if len < separator.len() as u64 {
            return Ok(false);
        }

        file.seek(SeekFrom::End(-(separator.len() as i64)))?;
        let mut tail = vec![0u8; separator.len()];
        file.read_exact(&mut tail)?;
        Ok(tail == separator)
    }
}
