//! Register-change run detection.
//!
//! Games that raster-split a rotating background rewrite the rotation
//! registers mid-frame. The emulation layer snapshots the decoded
//! registers per scanline; consecutive identical snapshots collapse
//! into a run so table decode and per-run derivation happen once per
//! split instead of once per line.

use vdp_protocol::RotationRegisters;

/// A maximal span of scanlines sharing one register snapshot.
/// `lines` is half-open: `start..end`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegisterRun {
    pub start: u32,
    pub end: u32,
    pub regs: RotationRegisters,
}

pub fn detect_runs(lines: &[RotationRegisters]) -> Vec<RegisterRun> {
    let mut runs = Vec::new();
    let Some(first) = lines.first() else {
        return runs;
    };
    let mut current = RegisterRun {
        start: 0,
        end: 1,
        regs: *first,
    };
    for (i, regs) in lines.iter().enumerate().skip(1) {
        if *regs == current.regs {
            current.end = i as u32 + 1;
        } else {
            runs.push(current);
            current = RegisterRun {
                start: i as u32,
                end: i as u32 + 1,
                regs: *regs,
            };
        }
    }
    runs.push(current);
    runs
}
