//! Rotating background (RBG0/RBG1) sampling.
//!
//! Rotating backgrounds cannot be drawn as transformed quads: the
//! rotation parameters, coefficient tables and even the parameter
//! *selection* can change per scanline and per pixel. This crate walks
//! every output pixel on the CPU, inverse-mapping it through the active
//! rotation parameter into plane space and fetching the source dot,
//! exactly as the hardware's address generator does. The result is an
//! RGBA layer texture plus a per-scanline line-color side channel.
//!
//! Register snapshots are taken per scanline; consecutive identical
//! snapshots form a run, and the expensive table decode happens once
//! per run rather than once per line.

mod coefficient;
mod params;
mod runs;
mod sampler;
mod select;

pub use coefficient::CoefficientEntry;
pub use params::{ParamState, RotationTable};
pub use runs::{RegisterRun, detect_runs};
pub use sampler::{RbgLayer, RbgSampler};
pub use select::{RotationWindow, Selected};
