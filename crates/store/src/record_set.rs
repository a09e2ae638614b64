use std::ops::Index;

use blockflow_core::{FlowError, Records, Value};
use indexmap::IndexMap;
use tracing::warn;

use crate::frame::Frame;
use crate::reader::RecordReader;

/// Everything stored for one block: its top-level symbols, the keyword
/// arguments of the instance (if it belongs to a family) and whether the
/// block finished.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordSet {
    records: Records,
    args: Option<Records>,
    complete: bool,
}

impl RecordSet {
    /// Replay every frame of a record file.
    pub fn replay(reader: &RecordReader) -> Result<Self, FlowError> {
        let mut symbols: IndexMap<String, Value> = IndexMap::new();
        let mut args: IndexMap<String, Value> = IndexMap::new();
        let mut complete = false;

        let mut frames = reader.iter();
        for frame in frames.by_ref() {
            match frame? {
                Frame::Set { name, value } => {
                    symbols.insert(name, value);
                }
                Frame::Create { name } => {
                    symbols.entry(name).or_insert_with(|| Value::List(Vec::new()));
                }
                Frame::Append { name, rows } => {
                    match symbols.entry(name).or_insert_with(|| Value::List(Vec::new())) {
                        Value::List(existing) => existing.extend(rows),
                        other => {
                            return Err(FlowError::Corrupt {
                                path: reader.path().display().to_string(),
                                reason: format!("append onto non-dataset value {other}"),
                            })
                        }
                    }
                }
                Frame::Arg { name, value } => {
                    args.insert(name, value);
                }
                Frame::Commit => complete = true,
            }
        }

        if frames.has_torn_tail() {
            warn!(path = %reader.path().display(), "ignoring torn frame at end of record file");
        }

        Ok(Self {
            records: symbols.into_iter().collect(),
            args: if args.is_empty() { None } else { Some(args.into_iter().collect()) },
            complete,
        })
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.records.get(name)
    }

    pub fn records(&self) -> &Records {
        &self.records
    }

    /// Keyword arguments the instance was invoked with.
    pub fn args(&self) -> Option<&Records> {
        self.args.as_ref()
    }

    /// Whether the completion marker was found.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

impl Index<&str> for RecordSet {
    type Output = Value;

    fn index(&self, name: &str) -> &Value {
        &self.records[name]
    }
}
