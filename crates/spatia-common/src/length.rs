//! Valid-length bookkeeping for padded batches.
//!
//! Every batch element carries the number of frames that hold real data.
//! Frames at or past that length are padding: they are not guaranteed to be
//! zero and must not contribute to any statistic.

use crate::{Error, Result};

/// Checks that `lengths` has one entry per batch element and that no entry
/// exceeds `num_frames`.
pub fn check_lengths(lengths: &[usize], batch_size: usize, num_frames: usize) -> Result<()> {
    if lengths.len() != batch_size {
        return Err(Error::ShapeMismatch(format!(
            "expected {batch_size} lengths, got {}",
            lengths.len()
        )));
    }
    if let Some((b, &len)) = lengths.iter().enumerate().find(|&(_, &len)| len > num_frames) {
        return Err(Error::ShapeMismatch(format!(
            "length {len} of batch element {b} exceeds {num_frames} frames"
        )));
    }
    Ok(())
}

/// Number of valid frames of batch element `b`; all frames when no lengths
/// are given.
#[inline]
pub fn valid_frames(lengths: Option<&[usize]>, b: usize, num_frames: usize) -> usize {
    lengths.map_or(num_frames, |lengths| lengths[b].min(num_frames))
}
