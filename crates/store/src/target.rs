use std::fs;
use std::path::{Path, PathBuf};

use blockflow_core::{Args, FlowError, Records, Value};
use tracing::debug;

use crate::frame::Frame;
use crate::reader::RecordReader;
use crate::record_set::RecordSet;
use crate::writer::RecordWriter;

/// Persistence state of a block's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetStatus {
    /// No file on disk.
    Missing,
    /// A file exists but the block never committed (failed or interrupted).
    Partial,
    /// The block finished and committed its output.
    Complete,
}

/// The output file of one block.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    path: PathBuf,
}

impl Target {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `{dir}/{script}-{block}.{ext}`
    pub fn for_block(dir: &Path, script: &str, block: &str, extension: &str) -> Self {
        Self::new(dir.join(format!("{script}-{block}.{extension}")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True if the file is present, whatever its completion state.
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn status(&self) -> Result<TargetStatus, FlowError> {
        if !self.exists() {
            return Ok(TargetStatus::Missing);
        }
        let reader = RecordReader::open(&self.path)?;
        Ok(match reader.last_frame() {
            Ok(Some(Frame::Commit)) => TargetStatus::Complete,
            _ => TargetStatus::Partial,
        })
    }

    /// Shorthand for `status() == Complete`; unreadable files count as not complete.
    pub fn is_complete(&self) -> bool {
        matches!(self.status(), Ok(TargetStatus::Complete))
    }

    pub fn load(&self) -> Result<RecordSet, FlowError> {
        let reader = RecordReader::open(&self.path)?;
        RecordSet::replay(&reader)
    }

    /// Create or overwrite each symbol. Creates the file even for an empty map.
    pub fn write(&self, symbols: &Records) -> Result<(), FlowError> {
        let mut writer = RecordWriter::open(&self.path)?;
        for (name, value) in symbols.iter() {
            writer.append(&Frame::Set {
                name: name.to_string(),
                value: value.clone(),
            })?;
        }
        writer.finish()
    }

    /// Record the instance's keyword arguments. Opaque arguments have no
    /// stored form and are skipped. Returns how many were written.
    pub fn write_args(&self, args: &Args) -> Result<usize, FlowError> {
        let mut writer = RecordWriter::open(&self.path)?;
        let mut written = 0;
        for (name, arg) in args {
            match arg.as_value() {
                Some(value) => {
                    writer.append(&Frame::Arg {
                        name: name.clone(),
                        value: value.clone(),
                    })?;
                    written += 1;
                }
                None => debug!(arg = %name, "skipping argument with no stored representation"),
            }
        }
        writer.finish()?;
        Ok(written)
    }

    /// Declare empty growable datasets.
    pub fn create_datasets<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Result<(), FlowError> {
        let mut writer = RecordWriter::open(&self.path)?;
        for name in names {
            writer.append(&Frame::Create { name: name.to_string() })?;
        }
        writer.finish()
    }

    /// Append buffered rows to several datasets in one file open.
    pub fn append_rows(&self, batches: Vec<(String, Vec<Value>)>) -> Result<(), FlowError> {
        let mut writer = RecordWriter::open(&self.path)?;
        for (name, rows) in batches {
            writer.append(&Frame::Append { name, rows })?;
        }
        writer.finish()
    }

    /// Mark the output as complete.
    pub fn commit(&self) -> Result<(), FlowError> {
        let mut writer = RecordWriter::open(&self.path)?;
        writer.append(&Frame::Commit)?;
        writer.finish()
    }

    pub fn remove(&self) -> Result<(), FlowError> {
        fs::remove_file(&self.path)?;
        debug!(path = %self.path.display(), "target removed");
        Ok(())
    }
}
