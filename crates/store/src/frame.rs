use blockflow_core::{FlowError, Value};
use serde::{Deserialize, Serialize};

/// Leading bytes of every record file.
pub const MAGIC: &[u8; 8] = b"BFREC\0\0\x01";

/// One append operation recorded in a block's file.
///
/// Files are replayed front to back on load, so a later `Set` of the same
/// name wins and `Append` extends whatever `Create` started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    /// Create or overwrite a top-level symbol.
    Set { name: String, value: Value },
    /// Declare a growable dataset (empty list) for streamed rows.
    Create { name: String },
    /// Append rows to a dataset.
    Append { name: String, rows: Vec<Value> },
    /// One keyword argument of the block instance.
    Arg { name: String, value: Value },
    /// The block finished successfully.
    Commit,
}

pub(crate) fn encode(frame: &Frame) -> Result<Vec<u8>, FlowError> {
    rmp_serde::to_vec(frame).map_err(|e| FlowError::Serialize(e.to_string()))
}

pub(crate) fn decode(bytes: &[u8]) -> Result<Frame, FlowError> {
    rmp_serde::from_slice(bytes).map_err(|e| FlowError::Serialize(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_does_not_decode() {
        assert!(decode(&[0xc1, 0xff, 0x00]).is_err());
    }
}
