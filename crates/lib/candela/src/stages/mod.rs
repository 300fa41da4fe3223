//! The ordered per-frame sub-passes. Every stage records into the same
//! linear command stream; each one's writes are gated by a barrier
//! before the next stage reads them.

pub mod blend;
pub mod classify;
pub mod gather;
pub mod relocate;
pub mod trace;
pub mod variability;
