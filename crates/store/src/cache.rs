use std::time::{Duration, Instant};

use blockflow_core::{FlowError, Records, Value};
use indexmap::IndexMap;
use tracing::debug;

use crate::target::Target;

/// In-memory rows for one streamed symbol.
struct SymbolBuffer {
    rows: Vec<Value>,
    capacity: usize,
}

impl SymbolBuffer {
    /// Size the buffer so `capacity` rows shaped like `first` fit in `budget` bytes.
    fn sized_for(first: &Value, budget: u64) -> Self {
        let record = first.size_hint().max(1) as u64;
        let capacity = (budget / record).max(1) as usize;
        Self {
            rows: Vec::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    fn is_full(&self) -> bool {
        self.rows.len() >= self.capacity
    }
}

/// Buffers rows yielded by a streaming block and appends them to the
/// block's target when a buffer fills or `cache_time` elapses.
pub struct StreamingCache<'a> {
    target: &'a Target,
    cache_bytes: u64,
    cache_time: Duration,
    last_flush: Instant,
    buffers: IndexMap<String, SymbolBuffer>,
    flushes: usize,
    rows_written: usize,
}

impl<'a> StreamingCache<'a> {
    pub fn new(target: &'a Target, cache_bytes: u64, cache_time: Duration) -> Self {
        Self {
            target,
            cache_bytes,
            cache_time,
            last_flush: Instant::now(),
            buffers: IndexMap::new(),
            flushes: 0,
            rows_written: 0,
        }
    }

    /// Buffer one row under `name`. The first row of a new symbol creates
    /// its dataset on disk.
    pub fn add(&mut self, name: &str, value: Value) -> Result<(), FlowError> {
        if !self.buffers.contains_key(name) {
            self.target.create_datasets([name])?;
            self.buffers
                .insert(name.to_string(), SymbolBuffer::sized_for(&value, self.cache_bytes));
        }

        let full = match self.buffers.get_mut(name) {
            Some(buffer) => {
                buffer.rows.push(value);
                buffer.is_full()
            }
            None => false,
        };

        if full || self.last_flush.elapsed() > self.cache_time {
            self.flush()?;
        }
        Ok(())
    }

    /// Buffer every entry of one yielded mapping.
    pub fn add_records(&mut self, records: Records) -> Result<(), FlowError> {
        for (name, value) in records {
            self.add(&name, value)?;
        }
        Ok(())
    }

    /// Append all buffered rows and reset the flush timer. No-op when empty.
    pub fn flush(&mut self) -> Result<(), FlowError> {
        self.last_flush = Instant::now();

        let batches: Vec<(String, Vec<Value>)> = self
            .buffers
            .iter_mut()
            .filter(|(_, b)| !b.rows.is_empty())
            .map(|(name, b)| (name.clone(), std::mem::take(&mut b.rows)))
            .collect();

        if batches.is_empty() {
            return Ok(());
        }

        let rows: usize = batches.iter().map(|(_, r)| r.len()).sum();
        self.target.append_rows(batches)?;
        self.flushes += 1;
        self.rows_written += rows;

        debug!(
            path = %self.target.path().display(),
            rows,
            flushes = self.flushes,
            "streaming cache flushed"
        );
        Ok(())
    }

    /// Number of non-empty flushes so far.
    pub fn flush_count(&self) -> usize {
        self.flushes
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    /// Whether any symbol was ever added.
    pub fn is_unused(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Per-symbol row capacity, if the symbol has been seen.
    pub fn capacity_of(&self, name: &str) -> Option<usize> {
        self.buffers.get(name).map(|b| b.capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_from_record_size() {
        let dir = tempfile::tempdir().unwrap();
        let target = Target::new(dir.path().join("cap.rec"));
        let mut cache = StreamingCache::new(&target, 800, Duration::from_secs(300));

        cache.add("sample", Value::Floats(vec![0.0; 10])).unwrap();
        assert_eq!(cache.capacity_of("sample"), Some(10));

        cache.add("big", Value::Floats(vec![0.0; 1000])).unwrap();
        assert_eq!(cache.capacity_of("big"), Some(1));
    }

    #[test]
    fn flush_on_empty_buffer_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let target = Target::new(dir.path().join("noop.rec"));
        let mut cache = StreamingCache::new(&target, 1_000_000, Duration::from_secs(300));

        cache.flush().unwrap();
        cache.flush().unwrap();
        assert_eq!(cache.flush_count(), 0);
        assert!(!target.exists());
    }

    #[test]
    fn elapsed_time_forces_flush() {
        let dir = tempfile::tempdir().unwrap();
        let target = Target::new(dir.path().join("timed.rec"));
        let mut cache = StreamingCache::new(&target, 1_000_000, Duration::ZERO);

        cache.add("t", Value::Int(1)).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        cache.add("t", Value::Int(2)).unwrap();
        assert!(cache.flush_count() >= 1);
    }
}
