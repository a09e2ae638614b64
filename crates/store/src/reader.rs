use std::path::{Path, PathBuf};

use blockflow_core::FlowError;
use memmap2::Mmap;

use crate::frame::{self, Frame, MAGIC};

pub struct RecordReader {
    path: PathBuf,
    data: Mmap,
}

impl RecordReader {
    pub fn open(path: &Path) -> Result<Self, FlowError> {
        let file = std::fs::File::open(path)?;
        let len = file.metadata()?.len();
        if len < MAGIC.len() as u64 {
            return Err(FlowError::Corrupt {
                path: path.display().to_string(),
                reason: format!("file is {len} bytes, shorter than the header"),
            });
        }

        let data = unsafe { Mmap::map(&file)? };
        if &data[..MAGIC.len()] != MAGIC {
            return Err(FlowError::Corrupt {
                path: path.display().to_string(),
                reason: "bad magic header".to_string(),
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            data,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Iterate all complete frames in file order.
    pub fn iter(&self) -> FrameIter<'_> {
        FrameIter {
            data: &self.data,
            pos: MAGIC.len(),
        }
    }

    /// Decode only the final complete frame, skipping over the others
    /// by their length prefixes.
    pub fn last_frame(&self) -> Result<Option<Frame>, FlowError> {
        let data: &[u8] = &self.data;
        let mut pos = MAGIC.len();
        let mut last = None;

        while let Some((start, end)) = frame_bounds(data, pos) {
            last = Some((start, end));
            pos = end;
        }

        last.map(|(start, end)| frame::decode(&data[start..end]))
            .transpose()
    }
}

/// Payload range of the frame whose length prefix starts at `pos`, or None
/// when the remaining bytes do not hold a complete frame.
fn frame_bounds(data: &[u8], pos: usize) -> Option<(usize, usize)> {
    let header = data.get(pos..pos + 4)?;
    let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let end = pos + 4 + len;
    if end > data.len() {
        return None;
    }
    Some((pos + 4, end))
}

/// Iterator over frames. A torn trailing frame (interrupted write) ends
/// the iteration instead of producing an error.
pub struct FrameIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FrameIter<'a> {
    /// True when bytes remain after the last complete frame.
    pub fn has_torn_tail(&self) -> bool {
        self.pos < self.data.len() && frame_bounds(self.data, self.pos).is_none()
    }
}

impl<'a> Iterator for FrameIter<'a> {
    type Item = Result<Frame, FlowError>;

    fn next(&mut self) -> Option<Self::Item> {
        let (start, end) = frame_bounds(self.data, self.pos)?;
        self.pos = end;
        Some(frame::decode(&self.data[start..end]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::RecordWriter;
    use blockflow_core::Value;
    use std::io::Write;

    #[test]
    fn torn_tail_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("torn.rec");

        let mut writer = RecordWriter::open(&path).unwrap();
        writer
            .append(&Frame::Set { name: "x".into(), value: Value::Int(2) })
            .unwrap();
        writer.finish().unwrap();

        // Simulate a crash halfway through the next frame.
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&100u32.to_le_bytes()).unwrap();
        file.write_all(&[1, 2, 3]).unwrap();

        let reader = RecordReader::open(&path).unwrap();
        let mut iter = reader.iter();
        assert!(matches!(iter.next(), Some(Ok(Frame::Set { .. }))));
        assert!(iter.next().is_none());
        assert!(iter.has_torn_tail());
    }

    #[test]
    fn last_frame_skips_payloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last.rec");

        let mut writer = RecordWriter::open(&path).unwrap();
        writer
            .append(&Frame::Set { name: "a".into(), value: Value::Floats(vec![0.5; 64]) })
            .unwrap();
        writer.append(&Frame::Commit).unwrap();
        writer.finish().unwrap();

        let reader = RecordReader::open(&path).unwrap();
        assert_eq!(reader.last_frame().unwrap(), Some(Frame::Commit));
    }

    #[test]
    fn rejects_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foreign.rec");
        std::fs::write(&path, b"not a record file").unwrap();
        assert!(matches!(
            RecordReader::open(&path),
            Err(FlowError::Corrupt { .. })
        ));
    }
}
