//! Growable texture atlases for decoded sprite and cell pixel data.
//!
//! Each logical atlas owns one GPU texture plus a CPU-mappable staging
//! buffer. Pixel decode writes into the mapped staging region between
//! `pull()` and `push()`; `push()` uploads the written rows and rewinds
//! the allocation cursor for the next frame. Placements are bump-allocated
//! and live for exactly one frame; the placement cache avoids re-decoding
//! identical source data inside that frame.

mod cache;
mod cursor;
mod fence;
mod gpu;

pub use cache::{Fingerprint, Placement, PlacementCache};
pub use cursor::{AllocOutcome, AtlasCursor};
pub use fence::{FenceWaitError, FrameFence, TEARDOWN_WAIT};
pub use gpu::Atlas;

/// Atlas dimensions grow in steps of this many pixels.
pub const GROWTH_STEP: u32 = 512;

/// Past this edge length the atlas is compacted back to its initial size
/// at the next frame boundary.
pub const COMPACTION_LIMIT: u32 = 2048;

/// Bytes per texel: atlases are always RGBA8.
pub const TEXEL_BYTES: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtlasCreateError {
    /// Requested dimensions exceed what the device supports.
    ExceedsDeviceLimit { requested: u32, limit: u32 },
    ZeroSized,
}

impl std::fmt::Display for AtlasCreateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExceedsDeviceLimit { requested, limit } => write!(
                f,
                "atlas dimension {requested} exceeds device limit {limit}"
            ),
            Self::ZeroSized => write!(f, "atlas dimensions must be non-zero"),
        }
    }
}

impl std::error::Error for AtlasCreateError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtlasMapError {
    /// The staging buffer mapping callback reported failure.
    MapFailed,
    /// A fence guarding the surface never signaled within the wait cap.
    FenceTimedOut,
}

impl std::fmt::Display for AtlasMapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MapFailed => write!(f, "atlas staging buffer mapping failed"),
            Self::FenceTimedOut => {
                write!(f, "fence guarding atlas surface did not signal in time")
            }
        }
    }
}

impl std::error::Error for AtlasMapError {}

pub(crate) fn round_up_to_step(value: u32) -> u32 {
    value.div_ceil(GROWTH_STEP) * GROWTH_STEP
}
