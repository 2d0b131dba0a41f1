//! Bulk entity persistence.
//!
//! [`BulkProcess`] buffers entities and hands them to an [`EntitySaver`] in
//! fixed-size chunks, independent of the factory's correctness guarantees.
//! Callers must finish with [`BulkProcess::end`]; dropping an unfinished
//! process logs a warning rather than silently losing the buffer.

use entforge_core::{EntityRef, Result};

/// Downstream saver a bulk process flushes chunks into.
pub trait EntitySaver {
    fn save_batch(&mut self, entities: &[EntityRef]) -> Result<()>;
}

/// Chunked buffer in front of an [`EntitySaver`].
pub struct BulkProcess<S: EntitySaver> {
    saver: S,
    buffer: Vec<EntityRef>,
    chunk_size: usize,
    started: bool,
    ended: bool,
}

impl<S: EntitySaver> BulkProcess<S> {
    const DEFAULT_CHUNK_SIZE: usize = 1000;

    #[must_use]
    pub fn new(saver: S) -> Self {
        Self {
            saver,
            buffer: Vec::new(),
            chunk_size: Self::DEFAULT_CHUNK_SIZE,
            started: false,
            ended: false,
        }
    }

    /// Override the flush threshold.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Entities currently buffered, not yet saved.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Queue one entity, flushing if the chunk is full.
    pub fn add(&mut self, entity: EntityRef) -> Result<()> {
        self.started = true;
        self.ended = false;
        self.buffer.push(entity);
        self.flush_if_chunk_full()
    }

    /// Queue many entities, flushing as chunks fill.
    pub fn add_all(&mut self, entities: impl IntoIterator<Item = EntityRef>) -> Result<()> {
        for entity in entities {
            self.add(entity)?;
        }
        Ok(())
    }

    /// Flush the remainder and finish the process.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn end(&mut self) -> Result<()> {
        self.started = false;
        self.ended = true;
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.flush()
    }

    /// Access the saver, e.g. to inspect results in tests.
    #[must_use]
    pub fn saver(&self) -> &S {
        &self.saver
    }

    fn flush_if_chunk_full(&mut self) -> Result<()> {
        if self.buffer.len() >= self.chunk_size {
            return self.flush();
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        tracing::debug!(entities = self.buffer.len(), "Flushing bulk chunk");
        let chunk: Vec<EntityRef> = std::mem::take(&mut self.buffer);
        self.saver.save_batch(&chunk)
    }
}

impl<S: EntitySaver> Drop for BulkProcess<S> {
    fn drop(&mut self) {
        if self.started && !self.ended && !self.buffer.is_empty() {
            tracing::warn!(
                buffered = self.buffer.len(),
                "BulkProcess dropped with unsaved entities; call end() before dropping"
            );
        }
    }
}
