//! In-memory index over the frames of the WAL.
//!
//! For every page the index keeps the file offset of each committed version,
//! keyed by commit sequence. A lookup for boundary `S` returns the newest
//! version with sequence `<= S`.

use std::collections::{BTreeMap, HashMap};

use crate::concurrency::CommitSequence;
use crate::storage::page::PageNumber;

/// Where a frame's page image lives in the WAL file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLocation {
    pub sequence: CommitSequence,
    /// Offset of the page payload (not the frame header).
    pub offset: u64,
}

#[derive(Debug, Default)]
pub struct FrameIndex {
    pages: HashMap<PageNumber, BTreeMap<CommitSequence, u64>>,
    commits: BTreeMap<CommitSequence, Vec<PageNumber>>,
    frame_count: usize,
}

impl FrameIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes every frame of one commit. `frames` holds payload offsets.
    pub fn insert_commit(&mut self, sequence: CommitSequence, frames: &[(PageNumber, u64)]) {
        let mut pages = Vec::with_capacity(frames.len());
        for &(page, offset) in frames {
            let versions = self.pages.entry(page).or_default();
            if versions.insert(sequence, offset).is_none() {
                self.frame_count += 1;
                pages.push(page);
            }
        }
        self.commits.insert(sequence, pages);
    }

    pub fn lookup(&self, page: PageNumber, boundary: CommitSequence) -> Option<FrameLocation> {
        self.pages
            .get(&page)?
            .range(..=boundary)
            .next_back()
            .map(|(&sequence, &offset)| FrameLocation { sequence, offset })
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn commit_count(&self) -> usize {
        self.commits.len()
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn last_sequence(&self) -> Option<CommitSequence> {
        self.commits.keys().next_back().copied()
    }

    /// For each page with a version older than `min_retained`, the newest
    /// such version. Sorted by page number.
    pub fn merge_plan(&self, min_retained: CommitSequence) -> Vec<(PageNumber, FrameLocation)> {
        let mut plan: Vec<_> = self
            .pages
            .iter()
            .filter_map(|(&page, versions)| {
                versions
                    .range(..min_retained)
                    .next_back()
                    .map(|(&sequence, &offset)| (page, FrameLocation { sequence, offset }))
            })
            .collect();
        plan.sort_by_key(|(page, _)| *page);
        plan
    }

    /// Number of frames a checkpoint at `min_retained` would discard.
    pub fn frames_before(&self, min_retained: CommitSequence) -> usize {
        self.commits
            .range(..min_retained)
            .map(|(_, pages)| pages.len())
            .sum()
    }

    /// Commits at or after `min_retained`, oldest first, with their frames in
    /// write order.
    pub fn retained_commits(
        &self,
        min_retained: CommitSequence,
    ) -> Vec<(CommitSequence, Vec<(PageNumber, u64)>)> {
        self.commits
            .range(min_retained..)
            .map(|(&sequence, pages)| {
                let frames = pages
                    .iter()
                    .filter_map(|page| {
                        self.pages
                            .get(page)
                            .and_then(|versions| versions.get(&sequence))
                            .map(|&offset| (*page, offset))
                    })
                    .collect();
                (sequence, frames)
            })
            .collect()
    }
}
