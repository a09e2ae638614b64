//! What a block function hands back to the executor.

use blockflow_core::Records;

/// Lazily produced output of a streaming block.
pub type RecordStream = Box<dyn Iterator<Item = anyhow::Result<StreamItem>>>;

/// One step of a [`RecordStream`].
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    /// Rows appended to the growable datasets of each named symbol.
    Records(Records),
    /// Symbols written once, bypassing the streaming cache.
    Once(Records),
}

impl From<Records> for StreamItem {
    fn from(records: Records) -> Self {
        StreamItem::Records(records)
    }
}

/// Output of one block call.
pub enum BlockOutput {
    /// Nothing to store; the block still counts as done.
    Empty,
    RecordSet(Records),
    RecordStream(RecordStream),
}

impl BlockOutput {
    /// Stream infallible items.
    pub fn stream<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T> + 'static,
        I::IntoIter: 'static,
        T: Into<StreamItem> + 'static,
    {
        BlockOutput::RecordStream(Box::new(
            items
                .into_iter()
                .map(|item| Ok::<StreamItem, anyhow::Error>(item.into())),
        ))
    }

    /// Stream items that may fail part way through.
    pub fn try_stream<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = anyhow::Result<T>> + 'static,
        I::IntoIter: 'static,
        T: Into<StreamItem> + 'static,
    {
        BlockOutput::RecordStream(Box::new(
            items
                .into_iter()
                .map(|item| -> anyhow::Result<StreamItem> { item.map(Into::into) }),
        ))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BlockOutput::Empty => "empty",
            BlockOutput::RecordSet(_) => "record set",
            BlockOutput::RecordStream(_) => "record stream",
        }
    }
}

impl std::fmt::Debug for BlockOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockOutput::RecordSet(records) => f.debug_tuple("RecordSet").field(records).finish(),
            other => f.write_str(other.kind()),
        }
    }
}

/// Conversion applied to a block function's return value when the
/// function is registered.
pub trait IntoBlockOutput {
    fn into_block_output(self) -> BlockOutput;
}

impl IntoBlockOutput for BlockOutput {
    fn into_block_output(self) -> BlockOutput {
        self
    }
}

impl IntoBlockOutput for () {
    fn into_block_output(self) -> BlockOutput {
        BlockOutput::Empty
    }
}

impl IntoBlockOutput for Records {
    fn into_block_output(self) -> BlockOutput {
        BlockOutput::RecordSet(self)
    }
}

impl IntoBlockOutput for Option<Records> {
    fn into_block_output(self) -> BlockOutput {
        match self {
            Some(records) => BlockOutput::RecordSet(records),
            None => BlockOutput::Empty,
        }
    }
}

impl IntoBlockOutput for RecordStream {
    fn into_block_output(self) -> BlockOutput {
        BlockOutput::RecordStream(self)
    }
}
