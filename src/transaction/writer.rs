//! The write transaction.
//!
//! A writer holds the writer slot from begin until commit or rollback. Page
//! images and allocator changes stay in private buffers until commit, so an
//! aborted writer leaves nothing behind.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use log::debug;

use super::coordinator::TransactionCoordinator;
use super::id::TransactionId;
use super::state::TransactionState;
use crate::concurrency::CommitSequence;
use crate::error::{Error, Result};
use crate::events::FailureKind;
use crate::storage::page::meta::MetaPage;
use crate::storage::{PageNumber, StorageError};

pub struct Writer {
    id: TransactionId,
    coordinator: Arc<TransactionCoordinator>,
    /// Read mark observed at begin; reads that miss the buffer use it.
    boundary: CommitSequence,
    meta: MetaPage,
    meta_dirty: bool,
    pages: BTreeMap<PageNumber, Bytes>,
    state: TransactionState,
}

impl Writer {
    pub(crate) fn new(
        id: TransactionId,
        coordinator: Arc<TransactionCoordinator>,
        boundary: CommitSequence,
        meta: MetaPage,
    ) -> Self {
        debug!("{} writing on top of {}", id, boundary);
        Self {
            id,
            coordinator,
            boundary,
            meta,
            meta_dirty: false,
            pages: BTreeMap::new(),
            state: TransactionState::Active,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn boundary(&self) -> CommitSequence {
        self.boundary
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Number of page images buffered for commit.
    pub fn dirty_pages(&self) -> usize {
        self.pages.len()
    }

    /// Allocates the lowest free page, or a new one past the end. The page
    /// reads as zeroes until written.
    pub fn allocate(&mut self) -> Result<PageNumber> {
        self.ensure_active()?;
        let page = self.meta.alloc.allocate()?;
        self.meta_dirty = true;
        self.pages
            .insert(page, Bytes::from(vec![0u8; self.coordinator.page_size()]));
        debug!("{} allocated {}", self.id, page);
        Ok(page)
    }

    /// Own buffered image first, then the committed state at the boundary.
    pub fn read(&mut self, page: PageNumber) -> Result<Bytes> {
        self.ensure_active()?;
        self.check_allocated(page)?;
        if let Some(data) = self.pages.get(&page) {
            return Ok(data.clone());
        }
        let result = self
            .coordinator
            .store()
            .read(page, self.boundary, self.coordinator.wal())
            .map_err(Error::from);
        self.abort_on_io(result)
    }

    /// Buffers a new image of `page`. Shorter input is zero-padded.
    pub fn write(&mut self, page: PageNumber, data: &[u8]) -> Result<()> {
        self.ensure_active()?;
        let page_size = self.coordinator.page_size();
        if data.len() > page_size {
            return Err(StorageError::InvalidPageSize {
                expected: page_size,
                actual: data.len(),
            }
            .into());
        }
        self.check_allocated(page)?;

        let mut image = BytesMut::zeroed(page_size);
        image[..data.len()].copy_from_slice(data);
        self.pages.insert(page, image.freeze());
        Ok(())
    }

    /// Returns `page` to the free list. Snapshots taken before this commit
    /// still see its last image.
    pub fn free(&mut self, page: PageNumber) -> Result<()> {
        self.ensure_active()?;
        let capacity = MetaPage::free_capacity(self.coordinator.page_size());
        self.meta.alloc.free(page, capacity)?;
        self.pages.remove(&page);
        self.meta_dirty = true;
        debug!("{} freed {}", self.id, page);
        Ok(())
    }

    /// Makes every buffered change durable and visible under one new
    /// sequence. Returns `None` when there was nothing to write; no sequence
    /// is consumed then.
    pub fn commit(mut self) -> Result<Option<CommitSequence>> {
        self.ensure_active()?;

        if self.pages.is_empty() && !self.meta_dirty {
            self.finish(TransactionState::Committed);
            debug!("{} committed without changes", self.id);
            return Ok(None);
        }

        let mut frames: Vec<(PageNumber, Bytes)> =
            std::mem::take(&mut self.pages).into_iter().collect();
        if self.meta_dirty {
            frames.push((PageNumber::META, Bytes::from(self.meta.encode())));
        }

        match self.coordinator.commit_frames(self.id, &frames) {
            Ok(sequence) => {
                self.finish(TransactionState::Committed);
                self.coordinator.maybe_auto_checkpoint();
                Ok(Some(sequence))
            }
            Err(e) => {
                self.coordinator.report_failure(
                    FailureKind::CommitAborted,
                    format!("{} aborted during commit: {}", self.id, e),
                );
                self.finish(TransactionState::Aborted);
                Err(e)
            }
        }
    }

    /// Discards every buffered change and frees the writer slot.
    pub fn rollback(mut self) -> Result<()> {
        self.ensure_active()?;
        self.finish(TransactionState::Aborted);
        debug!("{} rolled back", self.id);
        Ok(())
    }

    fn ensure_active(&self) -> Result<()> {
        if !self.state.is_active() {
            return Err(Error::InvalidState {
                id: self.id,
                state: self.state,
            });
        }
        Ok(())
    }

    fn check_allocated(&self, page: PageNumber) -> Result<()> {
        if !self.meta.alloc.is_allocated(page) {
            return Err(StorageError::PageNotFound(page).into());
        }
        Ok(())
    }

    /// A failing medium ends the transaction.
    fn abort_on_io<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_io() {
                self.coordinator.report_failure(
                    FailureKind::WriterIo,
                    format!("{} aborted after I/O failure: {}", self.id, e),
                );
                self.finish(TransactionState::Aborted);
            }
        }
        result
    }

    fn finish(&mut self, state: TransactionState) {
        self.state = state;
        self.pages.clear();
        self.coordinator.writer_slot().release(self.id);
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        if self.state.is_active() {
            debug!("{} dropped while active, rolling back", self.id);
            self.finish(TransactionState::Aborted);
        }
    }
}

impl std::fmt::Debug for Writer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writer")
            .field("id", &self.id)
            .field("boundary", &self.boundary)
            .field("state", &self.state)
            .field("dirty_pages", &self.pages.len())
            .finish()
    }
}
