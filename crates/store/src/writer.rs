use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use blockflow_core::FlowError;
use tracing::debug;

use crate::frame::{self, Frame, MAGIC};

/// Appends frames to a record file, creating it (with header) if absent.
///
/// Writers never truncate: existing frames stay in place and later frames
/// shadow them on load.
pub struct RecordWriter {
    path: PathBuf,
    out: BufWriter<fs::File>,
    bytes_written: u64,
    frames: usize,
}

impl RecordWriter {
    pub fn open(path: &Path) -> Result<Self, FlowError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let existing = file.metadata()?.len();
        let mut out = BufWriter::new(file);

        let mut bytes_written = 0;
        if existing == 0 {
            out.write_all(MAGIC)?;
            bytes_written += MAGIC.len() as u64;
        }

        Ok(Self {
            path: path.to_path_buf(),
            out,
            bytes_written,
            frames: 0,
        })
    }

    /// Append one length-prefixed frame.
    pub fn append(&mut self, frame: &Frame) -> Result<(), FlowError> {
        let encoded = frame::encode(frame)?;
        let len = u32::try_from(encoded.len()).map_err(|_| {
            FlowError::Serialize(format!("frame of {} bytes exceeds 4 GiB", encoded.len()))
        })?;

        self.out.write_all(&len.to_le_bytes())?;
        self.out.write_all(&encoded)?;

        self.bytes_written += 4 + encoded.len() as u64;
        self.frames += 1;
        Ok(())
    }

    /// Flush buffered bytes to the file.
    pub fn finish(mut self) -> Result<(), FlowError> {
        self.out.flush()?;
        debug!(
            path = %self.path.display(),
            frames = self.frames,
            bytes = self.bytes_written,
            "record frames written"
        );
        Ok(())
    }
}
