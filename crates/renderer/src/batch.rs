//! Draw batching: priority levels and program runs.
//!
//! A level holds every draw of one compositing priority. Within a level,
//! geometry accumulates into the currently open program until something
//! that would require different GPU state shows up, at which point a new
//! program run starts. User-clip changes additionally emit marker
//! programs so the scissor rect travels through the stream in submission
//! order instead of being latched out of band.

use smallvec::SmallVec;
use vdp_protocol::{BlendStep, ScreenId, UserClipMode};

use crate::Vertex;
use crate::geometry::TESS_GRID;

/// One level per VDP2 compositing priority.
pub const LEVEL_COUNT: usize = 8;

/// Worst-case vertex footprint of a single quad: the CPU-tessellated
/// grid. Headroom checks use this so a growth never lands mid-quad.
pub const QUAD_FOOTPRINT: usize = (TESS_GRID * TESS_GRID * 6) as usize;

/// Quads reserved per growth step; buffers never shrink below one step.
const GROWTH_QUADS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipRect {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl ClipRect {
    pub const fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self { x0, y0, x1, y1 }
    }
}

/// Everything that must match for two quads to share one draw call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramKey {
    pub blend: BlendStep,
    pub screen: ScreenId,
    pub user_clip: UserClipMode,
    /// Only significant when `user_clip` is not `Disabled`.
    pub user_clip_rect: ClipRect,
    pub system_clip: ClipRect,
}

impl ProgramKey {
    fn breaks_from(&self, other: &ProgramKey) -> bool {
        if self.blend != other.blend
            || self.screen != other.screen
            || self.user_clip != other.user_clip
            || self.system_clip != other.system_clip
        {
            return true;
        }
        self.user_clip != UserClipMode::Disabled && self.user_clip_rect != other.user_clip_rect
    }
}

#[derive(Debug)]
pub enum Program {
    Draw {
        key: ProgramKey,
        vertices: Vec<Vertex>,
    },
    /// Scissor on: subsequent draws clip to this rect.
    SetUserClip(ClipRect),
    /// Scissor back to the full target.
    ClearUserClip,
}

/// One compositing priority's ordered program list. Vertex buffers are
/// recycled through a spare pool across frames so steady-state frames
/// allocate nothing.
#[derive(Debug, Default)]
pub struct Level {
    programs: SmallVec<[Program; 8]>,
    spare: Vec<Vec<Vertex>>,
    clip_active: bool,
}

impl Level {
    /// Append one quad's vertices, opening a new program when `key`
    /// breaks from the open one. Returns true when a vertex buffer had
    /// to grow; the caller must reset the atlas cache in that case.
    pub fn push_quad(&mut self, key: ProgramKey, quad: &[Vertex]) -> bool {
        debug_assert!(quad.len() <= QUAD_FOOTPRINT, "quad exceeds worst-case footprint");
        if !self.open_matches(&key) {
            self.emit_clip_markers(&key);
            let vertices = self.spare.pop().unwrap_or_default();
            self.programs.push(Program::Draw { key, vertices });
        }
        let Some(Program::Draw { vertices, .. }) = self.programs.last_mut() else {
            panic!("push_quad: no open draw program");
        };
        let mut grew = false;
        if vertices.capacity() - vertices.len() < QUAD_FOOTPRINT {
            vertices.reserve(GROWTH_QUADS * QUAD_FOOTPRINT);
            grew = true;
        }
        vertices.extend_from_slice(quad);
        grew
    }

    fn open_matches(&self, key: &ProgramKey) -> bool {
        match self.programs.last() {
            Some(Program::Draw { key: open, .. }) => !key.breaks_from(open),
            _ => false,
        }
    }

    fn emit_clip_markers(&mut self, key: &ProgramKey) {
        let wants_clip = key.user_clip != UserClipMode::Disabled;
        match (self.clip_active, wants_clip) {
            (false, true) => {
                self.programs.push(Program::SetUserClip(key.user_clip_rect));
                self.clip_active = true;
            }
            (true, false) => {
                self.programs.push(Program::ClearUserClip);
                self.clip_active = false;
            }
            (true, true) => {
                // Rect changes re-emit the marker; same rect rides along.
                if let Some(Program::Draw { key: open, .. }) = self.programs.last()
                    && open.user_clip_rect != key.user_clip_rect
                {
                    self.programs.push(Program::SetUserClip(key.user_clip_rect));
                }
            }
            (false, false) => {}
        }
    }

    pub fn programs(&self) -> &[Program] {
        &self.programs
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Total vertex count across draw programs.
    pub fn vertex_count(&self) -> usize {
        self.programs
            .iter()
            .map(|p| match p {
                Program::Draw { vertices, .. } => vertices.len(),
                _ => 0,
            })
            .sum()
    }

    /// Zero the counters for the next frame, recycling vertex buffers.
    /// Oversized buffers shrink back to one growth step.
    pub fn reset(&mut self) {
        if self.clip_active {
            self.programs.push(Program::ClearUserClip);
            self.clip_active = false;
        }
        for program in self.programs.drain(..) {
            if let Program::Draw { mut vertices, .. } = program {
                vertices.clear();
                if vertices.capacity() > 4 * GROWTH_QUADS * QUAD_FOOTPRINT {
                    vertices.shrink_to(GROWTH_QUADS * QUAD_FOOTPRINT);
                }
                self.spare.push(vertices);
            }
        }
    }
}

/// All priority levels of one draw target, lowest priority first.
#[derive(Debug, Default)]
pub struct BatchSystem {
    levels: [Level; LEVEL_COUNT],
}

impl BatchSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route a quad to its priority level. Returns true on buffer
    /// growth (atlas cache must be reset).
    pub fn push_quad(&mut self, priority: u8, key: ProgramKey, quad: &[Vertex]) -> bool {
        self.levels[priority as usize & 0x7].push_quad(key, quad)
    }

    /// Levels in flush order (ascending priority).
    pub fn levels(&self) -> &[Level; LEVEL_COUNT] {
        &self.levels
    }

    pub fn reset(&mut self) {
        for level in &mut self.levels {
            level.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_CLIP: ClipRect = ClipRect::new(0, 0, 0, 0);
    const SYSTEM: ClipRect = ClipRect::new(0, 0, 320, 224);

    fn key(blend: BlendStep) -> ProgramKey {
        ProgramKey {
            blend,
            screen: ScreenId::Sprite,
            user_clip: UserClipMode::Disabled,
            user_clip_rect: NO_CLIP,
            system_clip: SYSTEM,
        }
    }

    fn quad() -> Vec<Vertex> {
        vec![Vertex::default(); 6]
    }

    #[test]
    fn same_key_shares_one_program() {
        let mut level = Level::default();
        level.push_quad(key(BlendStep::Replace), &quad());
        level.push_quad(key(BlendStep::Replace), &quad());
        assert_eq!(level.programs().len(), 1);
        assert_eq!(level.vertex_count(), 12);
    }

    #[test]
    fn each_break_condition_opens_a_program() {
        let mut level = Level::default();
        let base = key(BlendStep::Replace);
        level.push_quad(base, &quad());

        let mut blend = base;
        blend.blend = BlendStep::HalfTransparent;
        level.push_quad(blend, &quad());

        let mut screen = blend;
        screen.screen = ScreenId::Nbg0;
        level.push_quad(screen, &quad());

        let mut system = screen;
        system.system_clip = ClipRect::new(0, 0, 352, 240);
        level.push_quad(system, &quad());

        let draws = level
            .programs()
            .iter()
            .filter(|p| matches!(p, Program::Draw { .. }))
            .count();
        assert_eq!(draws, 4);
    }

    #[test]
    fn clip_rect_only_breaks_when_clipping() {
        let mut level = Level::default();
        let mut a = key(BlendStep::Replace);
        let mut b = a;
        b.user_clip_rect = ClipRect::new(8, 8, 64, 64);
        // Clip disabled: differing latched rects must not split the run.
        level.push_quad(a, &quad());
        level.push_quad(b, &quad());
        assert_eq!(level.programs().len(), 1);

        a.user_clip = UserClipMode::Inside;
        b.user_clip = UserClipMode::Inside;
        a.user_clip_rect = ClipRect::new(0, 0, 32, 32);
        level.push_quad(a, &quad());
        level.push_quad(b, &quad());
        let draws = level
            .programs()
            .iter()
            .filter(|p| matches!(p, Program::Draw { .. }))
            .count();
        assert_eq!(draws, 3);
    }

    #[test]
    fn clip_markers_bracket_clipped_draws() {
        let mut level = Level::default();
        let mut clipped = key(BlendStep::Replace);
        clipped.user_clip = UserClipMode::Inside;
        clipped.user_clip_rect = ClipRect::new(16, 16, 48, 48);
        level.push_quad(key(BlendStep::Replace), &quad());
        level.push_quad(clipped, &quad());
        level.push_quad(key(BlendStep::Replace), &quad());

        let shape: Vec<&'static str> = level
            .programs()
            .iter()
            .map(|p| match p {
                Program::Draw { .. } => "draw",
                Program::SetUserClip(_) => "set",
                Program::ClearUserClip => "clear",
            })
            .collect();
        assert_eq!(shape, ["draw", "set", "draw", "clear", "draw"]);
    }

    #[test]
    fn growth_is_reported_and_capacity_survives_reset() {
        let mut level = Level::default();
        // First push finds an empty buffer and must grow.
        assert!(level.push_quad(key(BlendStep::Replace), &quad()));
        // The step covers many quads; the next push fits.
        assert!(!level.push_quad(key(BlendStep::Replace), &quad()));
        level.reset();
        assert!(level.is_empty());
        // The recycled buffer still has headroom.
        assert!(!level.push_quad(key(BlendStep::Replace), &quad()));
    }

    #[test]
    fn dangling_clip_is_closed_on_reset() {
        let mut level = Level::default();
        let mut clipped = key(BlendStep::Replace);
        clipped.user_clip = UserClipMode::Outside;
        clipped.user_clip_rect = ClipRect::new(0, 0, 8, 8);
        level.push_quad(clipped, &quad());
        level.reset();
        level.push_quad(key(BlendStep::Replace), &quad());
        // A fresh frame must not inherit the previous frame's scissor.
        assert!(matches!(level.programs()[0], Program::Draw { .. }));
    }

    #[test]
    fn batch_routes_by_priority() {
        let mut batch = BatchSystem::new();
        batch.push_quad(2, key(BlendStep::Replace), &quad());
        batch.push_quad(5, key(BlendStep::Replace), &quad());
        assert!(batch.levels()[0].is_empty());
        assert!(!batch.levels()[2].is_empty());
        assert!(!batch.levels()[5].is_empty());
    }
}
