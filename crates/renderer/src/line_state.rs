//! Per-scanline register state and frame-to-frame diffing.
//!
//! The composite shader reads color offsets, priorities and color-calc
//! ratios from a per-line lookup texture (one row per screen). Most
//! frames change nothing, so the previous frame's states are kept and
//! diffed; only contiguous runs of changed lines are re-uploaded.

use smallvec::SmallVec;
use vdp_protocol::{LineState, MAX_SCANLINES, ScreenLineStates};

/// Contiguous half-open range of scanlines needing re-upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyRange {
    pub start: usize,
    pub end: usize,
}

impl DirtyRange {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Compare a screen's new per-line states against the retained previous
/// frame, coalescing changed lines into ranges. A fresh (previously
/// unseen) screen dirties its whole extent.
#[derive(Debug, Default)]
pub struct LineStateDiff {
    previous: [Option<Vec<LineState>>; 7],
}

impl LineStateDiff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ranges of `states.lines` that differ from the last frame. The
    /// new states are retained as the next comparison baseline.
    pub fn update(&mut self, states: &ScreenLineStates) -> SmallVec<[DirtyRange; 4]> {
        assert!(states.lines.len() <= MAX_SCANLINES, "scanline count out of range");
        let slot = &mut self.previous[states.screen.index()];
        let ranges = match slot {
            Some(prev) if prev.len() == states.lines.len() => diff_ranges(prev, &states.lines),
            _ => {
                let mut all = SmallVec::new();
                if !states.lines.is_empty() {
                    all.push(DirtyRange {
                        start: 0,
                        end: states.lines.len(),
                    });
                }
                all
            }
        };
        match slot {
            Some(prev) => {
                prev.clear();
                prev.extend_from_slice(&states.lines);
            }
            None => *slot = Some(states.lines.clone()),
        }
        ranges
    }

    /// Drop all baselines, forcing full uploads next frame (used after
    /// the lookup texture is recreated).
    pub fn invalidate(&mut self) {
        self.previous = Default::default();
    }
}

fn diff_ranges(prev: &[LineState], next: &[LineState]) -> SmallVec<[DirtyRange; 4]> {
    let mut ranges: SmallVec<[DirtyRange; 4]> = SmallVec::new();
    let mut open: Option<usize> = None;
    for (i, (a, b)) in prev.iter().zip(next).enumerate() {
        if a != b {
            open.get_or_insert(i);
        } else if let Some(start) = open.take() {
            ranges.push(DirtyRange { start, end: i });
        }
    }
    if let Some(start) = open {
        ranges.push(DirtyRange {
            start,
            end: next.len(),
        });
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdp_protocol::ScreenId;

    fn line(priority: u8) -> LineState {
        LineState {
            priority,
            ..LineState::default()
        }
    }

    fn states(screen: ScreenId, lines: Vec<LineState>) -> ScreenLineStates {
        ScreenLineStates { screen, lines }
    }

    #[test]
    fn first_frame_dirties_everything() {
        let mut diff = LineStateDiff::new();
        let ranges = diff.update(&states(ScreenId::Nbg0, vec![line(1); 224]));
        assert_eq!(ranges.as_slice(), [DirtyRange { start: 0, end: 224 }]);
    }

    #[test]
    fn identical_frames_upload_nothing() {
        let mut diff = LineStateDiff::new();
        let frame = states(ScreenId::Nbg0, vec![line(1); 224]);
        diff.update(&frame);
        assert!(diff.update(&frame).is_empty());
    }

    #[test]
    fn single_changed_line_yields_one_range() {
        let mut diff = LineStateDiff::new();
        let mut lines = vec![line(1); 224];
        diff.update(&states(ScreenId::Sprite, lines.clone()));
        lines[100] = line(5);
        let ranges = diff.update(&states(ScreenId::Sprite, lines));
        assert_eq!(ranges.as_slice(), [DirtyRange { start: 100, end: 101 }]);
    }

    #[test]
    fn separated_changes_stay_separate_ranges() {
        let mut diff = LineStateDiff::new();
        let mut lines = vec![line(0); 224];
        diff.update(&states(ScreenId::Nbg1, lines.clone()));
        lines[10] = line(3);
        lines[11] = line(3);
        lines[223] = line(7);
        let ranges = diff.update(&states(ScreenId::Nbg1, lines));
        assert_eq!(
            ranges.as_slice(),
            [
                DirtyRange { start: 10, end: 12 },
                DirtyRange { start: 223, end: 224 },
            ]
        );
    }

    #[test]
    fn screens_are_diffed_independently() {
        let mut diff = LineStateDiff::new();
        diff.update(&states(ScreenId::Nbg0, vec![line(1); 224]));
        // A different screen starts from scratch.
        let ranges = diff.update(&states(ScreenId::Nbg1, vec![line(1); 224]));
        assert_eq!(ranges.len(), 1);
    }

    #[test]
    fn resolution_change_dirties_the_full_extent() {
        let mut diff = LineStateDiff::new();
        diff.update(&states(ScreenId::Nbg0, vec![line(1); 224]));
        let ranges = diff.update(&states(ScreenId::Nbg0, vec![line(1); 240]));
        assert_eq!(ranges.as_slice(), [DirtyRange { start: 0, end: 240 }]);
    }

    #[test]
    fn invalidate_forces_full_upload() {
        let mut diff = LineStateDiff::new();
        let frame = states(ScreenId::Nbg0, vec![line(1); 224]);
        diff.update(&frame);
        diff.invalidate();
        assert_eq!(diff.update(&frame).len(), 1);
    }
}
