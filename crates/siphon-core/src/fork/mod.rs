//! Fork resolution: the in-memory block graph and the segment cursor.
//!
//! [`ForkDb`] indexes every known block by id and resolves parent links into
//! contiguous segments; [`SegmentCursor`] tracks whether the segment currently
//! being built is linked to the last irreversible block (LIB) and which tip
//! the segment walk should start from.

pub mod cursor;
pub mod forkdb;

pub use cursor::{SegmentCursor, SegmentState};
pub use forkdb::{ForkDb, ForkLink, SegmentBlock};
