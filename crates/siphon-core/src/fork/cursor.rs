//! Segment cursor: a two-state automaton tracking whether the segment being
//! built is linked to the LIB.

use crate::types::{Block, BlockRef};

/// Whether the tip of the current segment is known to be linked to the LIB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    /// Every processed block so far chains down to the LIB.
    Continuous,
    /// The most recent block's ancestry is incomplete; the poller is pivoting
    /// backwards, fetching missing parents by hash.
    Disjoint,
}

/// Tracks the walk tip across blocks arriving out of linear order.
///
/// While disjoint, the original tip is pinned: ancestors fetched during the
/// pivot must not replace it, since the segment walk always starts from the
/// newest block of the disjoint segment.
#[derive(Debug)]
pub struct SegmentCursor {
    state: SegmentState,
    current_block: Option<BlockRef>,
    disjoint_tip: Option<BlockRef>,
}

impl SegmentCursor {
    #[must_use]
    pub fn new() -> Self {
        Self { state: SegmentState::Continuous, current_block: None, disjoint_tip: None }
    }

    #[must_use]
    pub fn state(&self) -> SegmentState {
        self.state
    }

    /// Records a newly processed block and returns the tip the segment walk
    /// should start from.
    pub fn add_block(&mut self, block: &Block, seen_parent: bool) -> BlockRef {
        let block_ref = block.to_ref();

        if self.disjoint_tip.is_some() {
            if seen_parent {
                // the missing ancestor arrived; pending LIB confirmation
                self.state = SegmentState::Continuous;
            }
        } else if !seen_parent && self.state == SegmentState::Continuous {
            self.state = SegmentState::Disjoint;
            self.disjoint_tip = Some(block_ref.clone());
        }

        self.current_block = Some(block_ref);
        self.segment_tip()
    }

    /// The segment reached the LIB and was fired.
    pub fn connected_to_lib(&mut self) {
        self.state = SegmentState::Continuous;
        self.disjoint_tip = None;
    }

    /// The segment walk ended short of the LIB.
    pub fn not_connected_to_lib(&mut self) {
        self.state = SegmentState::Disjoint;
        if self.disjoint_tip.is_none() {
            self.disjoint_tip.clone_from(&self.current_block);
        }
    }

    /// The pinned segment turned out to be a dead fork branch; drop it and
    /// walk forward from the next processed block.
    pub fn abandon_segment(&mut self) {
        self.state = SegmentState::Continuous;
        self.disjoint_tip = None;
    }

    fn segment_tip(&self) -> BlockRef {
        self.disjoint_tip
            .clone()
            .or_else(|| self.current_block.clone())
            .unwrap_or_default()
    }
}

impl Default for SegmentCursor {
    fn default() -> Self {
        Self::new()
    }
}
