//! CPU-side bump allocation over an atlas surface.
//!
//! Kept separate from the GPU surface so the placement arithmetic is
//! testable without a device. The cursor walks left to right, wrapping to
//! a new row at the tallest allocation seen on the current row; `reset()`
//! rewinds everything at the start of a frame, which is what lets every
//! frame redraw from scratch without net growth.

use crate::{GROWTH_STEP, round_up_to_step};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocOutcome {
    Placed { x: u32, y: u32 },
    /// Caller must grow the surface to at least these dimensions and retry.
    NeedsGrowth { width: u32, height: u32 },
}

#[derive(Debug, Clone, Copy)]
pub struct AtlasCursor {
    width: u32,
    height: u32,
    x: u32,
    y: u32,
    row_max: u32,
    /// Highest row ever written this frame; `push` uploads only this much.
    watermark: u32,
}

impl AtlasCursor {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            x: 0,
            y: 0,
            row_max: 0,
            watermark: 0,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Rows that carry pixel data this frame.
    pub fn watermark(&self) -> u32 {
        self.watermark
    }

    pub fn reset(&mut self) {
        self.x = 0;
        self.y = 0;
        self.row_max = 0;
        self.watermark = 0;
    }

    /// Called by the surface after growth; placements made before the
    /// resize stay valid because growth preserves content.
    pub fn resize(&mut self, width: u32, height: u32) {
        assert!(
            width >= self.width && height >= self.height,
            "atlas cursor must not shrink mid-frame"
        );
        self.width = width;
        self.height = height;
    }

    pub fn allocate(&mut self, w: u32, h: u32) -> AllocOutcome {
        if self.width < w {
            return AllocOutcome::NeedsGrowth {
                width: round_up_to_step(w),
                height: self.height,
            };
        }
        if self.height - self.y < h {
            return AllocOutcome::NeedsGrowth {
                width: self.width,
                height: self.height + round_up_to_step(h).max(GROWTH_STEP),
            };
        }
        if self.width - self.x < w {
            // Wrap to the next row at the tallest allocation seen so far.
            self.x = 0;
            self.y = self.row_max.max(self.y);
            return self.allocate(w, h);
        }
        let x = self.x;
        let y = self.y;
        self.x += w;
        if y + h > self.row_max {
            self.row_max = y + h;
        }
        if self.row_max > self.watermark {
            self.watermark = self.row_max;
        }
        AllocOutcome::Placed { x, y }
    }
}
