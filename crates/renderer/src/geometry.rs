//! Quad geometry: perspective Q factors, texcoord biasing, tessellation.
//!
//! Distorted sprites are arbitrary quads, and sampling them with plain
//! affine interpolation bows the texture toward the shorter edges. The
//! Q factors recover projective interpolation: each corner's texcoords
//! are premultiplied by q and the fragment stage divides by the
//! interpolated q. The factors come from intersecting each diagonal
//! with the line through the opposite edge, which is exactly the
//! projective depth ratio of the two triangles sharing that diagonal.

use crate::Vertex;

/// Inward texel bias applied to quad texcoords so bilinear filtering
/// never bleeds a neighboring atlas entry in.
pub const ATLAS_BIAS: f32 = 0.025;

/// CPU tessellation grid edge; a quad becomes `TESS_GRID`^2 sub-quads.
pub const TESS_GRID: u32 = 8;

const EPS: f32 = 1e-10;

fn is_zero(v: f32) -> bool {
    v < EPS && v > -EPS
}

fn cross2d(a: [f32; 2], b: [f32; 2]) -> f32 {
    a[0] * b[1] - a[1] * b[0]
}

/// Intersect the line a1->a2 with the line through b1 and b2. Returns
/// `None` when the lines are parallel.
fn intersect_opposite_edge(
    a1: [f32; 2],
    a2: [f32; 2],
    b1: [f32; 2],
    b2: [f32; 2],
) -> Option<[f32; 2]> {
    let veca = [a2[0] - a1[0], a2[1] - a1[1]];
    let vecb = [b1[0] - a1[0], b1[1] - a1[1]];
    let vecc = [b2[0] - a1[0], b2[1] - a1[1]];
    let d1 = cross2d(vecb, vecc);
    if is_zero(d1) {
        return None;
    }
    let d2 = cross2d(vecb, veca);
    Some([a1[0] + vecc[0] * d2 / d1, a1[1] + vecc[1] * d2 / d1])
}

/// Ratio |dx / w| with the x deltas preferred and the y deltas as the
/// degenerate fallback.
fn edge_ratio(o: [f32; 2], p: [f32; 2], e1: [f32; 2], e2: [f32; 2]) -> f32 {
    let dx = o[0] - p[0];
    if !is_zero(dx) {
        let w = e1[0] - e2[0];
        if !is_zero(w) { (dx / w).abs() } else { 0.0 }
    } else {
        let w = e1[1] - e2[1];
        if !is_zero(w) {
            let dy = o[1] - p[1];
            if !is_zero(dy) { (dy / w).abs() } else { 0.0 }
        } else {
            0.0
        }
    }
}

/// Per-corner projective texture factors for an arbitrary quad. The
/// second corner is the q = 1 reference; the whole set is normalized so
/// no factor exceeds 1 (otherwise biased texcoords could escape the
/// atlas entry). Parallelogram edges intersect nowhere and degrade to
/// q = 1, which is the exact affine case.
pub fn texture_q(p: &[[f32; 2]; 4]) -> [f32; 4] {
    let [p1, p2, p3, p4] = *p;

    let q1 = match intersect_opposite_edge(p3, p1, p2, p4) {
        Some(o) => edge_ratio(o, p1, p3, p2),
        None => 1.0,
    };
    let q3 = match intersect_opposite_edge(p1, p3, p2, p4) {
        Some(o) => edge_ratio(o, p3, p1, p2),
        None => 1.0,
    };
    let q4 = match intersect_opposite_edge(p3, p1, p4, p2) {
        Some(o) => {
            let qw = edge_ratio(o, p1, p3, p4);
            let w = if !is_zero(qw) { qw / q1 } else { 0.0 };
            if is_zero(w) { 1.0 } else { 1.0 / w }
        }
        None => 1.0,
    };

    let max = q1.max(1.0).max(q3).max(q4);
    if max != 1.0 {
        let inv = 1.0 / max;
        [q1 * inv, inv, q3 * inv, q4 * inv]
    } else {
        [q1, 1.0, q3, q4]
    }
}

/// Atlas placement plus draw parameters for one quad.
#[derive(Debug, Clone, Copy)]
pub struct QuadInput {
    /// Screen-space corners, clockwise from top-left.
    pub vertices: [[f32; 2]; 4],
    /// Atlas texel rectangle holding the decoded pixels.
    pub atlas_x: u32,
    pub atlas_y: u32,
    pub width: u32,
    pub height: u32,
    /// Bit 0: horizontal flip, bit 1: vertical flip.
    pub flip: u8,
    /// Per-corner signed color deltas; zero when the command has no
    /// gouraud table.
    pub gouraud: [[f32; 4]; 4],
    /// Premultiply texcoords by the projective Q factors.
    pub perspective: bool,
}

impl QuadInput {
    /// Biased atlas texcoords per corner, honoring the flip bits.
    fn corner_texcoords(&self) -> [[f32; 2]; 4] {
        let (x, y, w, h) = (
            self.atlas_x as f32,
            self.atlas_y as f32,
            self.width as f32,
            self.height as f32,
        );
        let (s0, s1) = if self.flip & 0x1 != 0 {
            (x + w - ATLAS_BIAS, x + ATLAS_BIAS)
        } else {
            (x + ATLAS_BIAS, x + w - ATLAS_BIAS)
        };
        let (t0, t1) = if self.flip & 0x2 != 0 {
            (y + h - ATLAS_BIAS, y + ATLAS_BIAS)
        } else {
            (y + ATLAS_BIAS, y + h - ATLAS_BIAS)
        };
        [[s0, t0], [s1, t0], [s1, t1], [s0, t1]]
    }
}

fn vertex(pos: [f32; 2], tex: [f32; 2], q: f32, gouraud: [f32; 4]) -> Vertex {
    Vertex {
        position: pos,
        texcoord: [tex[0] * q, tex[1] * q],
        q,
        gouraud,
    }
}

/// Expand a quad into two triangles (corners 0-1-2 and 0-2-3).
pub fn expand_quad(input: &QuadInput) -> [Vertex; 6] {
    let tex = input.corner_texcoords();
    let q = if input.perspective {
        texture_q(&input.vertices)
    } else {
        [1.0; 4]
    };
    let c = |i: usize| vertex(input.vertices[i], tex[i], q[i], input.gouraud[i]);
    [c(0), c(1), c(2), c(0), c(2), c(3)]
}

/// Subdivide a quad into a `TESS_GRID` x `TESS_GRID` grid of affine
/// sub-quads. Rows interpolate along the left (0->3) and right (1->2)
/// edges; texcoords and gouraud deltas interpolate bilinearly, so each
/// sub-quad is small enough that affine sampling no longer shows the
/// distortion the Q factors exist to fix.
pub fn tessellate_quad(input: &QuadInput) -> Vec<Vertex> {
    let n = TESS_GRID;
    let tex = input.corner_texcoords();
    let mut out = Vec::with_capacity((n * n * 6) as usize);
    let v = &input.vertices;
    let lerp2 = |a: [f32; 2], b: [f32; 2], t: f32| {
        [a[0] + (b[0] - a[0]) * t, a[1] + (b[1] - a[1]) * t]
    };
    let bilerp4 = |g: &[[f32; 4]; 4], u: f32, t: f32| {
        let mut r = [0.0f32; 4];
        for (i, r) in r.iter_mut().enumerate() {
            let top = g[0][i] + (g[1][i] - g[0][i]) * u;
            let bottom = g[3][i] + (g[2][i] - g[3][i]) * u;
            *r = top + (bottom - top) * t;
        }
        r
    };
    for row in 0..n {
        let t0 = row as f32 / n as f32;
        let t1 = (row + 1) as f32 / n as f32;
        let left0 = lerp2(v[0], v[3], t0);
        let right0 = lerp2(v[1], v[2], t0);
        let left1 = lerp2(v[0], v[3], t1);
        let right1 = lerp2(v[1], v[2], t1);
        for col in 0..n {
            let u0 = col as f32 / n as f32;
            let u1 = (col + 1) as f32 / n as f32;
            let pa = lerp2(left0, right0, u0);
            let pb = lerp2(left0, right0, u1);
            let pc = lerp2(left1, right1, u1);
            let pd = lerp2(left1, right1, u0);
            let ta = lerp2(lerp2(tex[0], tex[1], u0), lerp2(tex[3], tex[2], u0), t0);
            let tb = lerp2(lerp2(tex[0], tex[1], u1), lerp2(tex[3], tex[2], u1), t0);
            let tc = lerp2(lerp2(tex[0], tex[1], u1), lerp2(tex[3], tex[2], u1), t1);
            let td = lerp2(lerp2(tex[0], tex[1], u0), lerp2(tex[3], tex[2], u0), t1);
            let ga = bilerp4(&input.gouraud, u0, t0);
            let gb = bilerp4(&input.gouraud, u1, t0);
            let gc = bilerp4(&input.gouraud, u1, t1);
            let gd = bilerp4(&input.gouraud, u0, t1);
            out.push(vertex(pa, ta, 1.0, ga));
            out.push(vertex(pb, tb, 1.0, gb));
            out.push(vertex(pc, tc, 1.0, gc));
            out.push(vertex(pa, ta, 1.0, ga));
            out.push(vertex(pc, tc, 1.0, gc));
            out.push(vertex(pd, td, 1.0, gd));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_GOURAUD: [[f32; 4]; 4] = [[0.0; 4]; 4];

    #[test]
    fn rectangle_q_factors_are_unit() {
        let rect = [[0.0, 0.0], [32.0, 0.0], [32.0, 16.0], [0.0, 16.0]];
        assert_eq!(texture_q(&rect), [1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn parallelogram_q_factors_are_unit() {
        let para = [[0.0, 0.0], [32.0, 0.0], [40.0, 16.0], [8.0, 16.0]];
        assert_eq!(texture_q(&para), [1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn trapezoid_q_factors_stay_normalized() {
        // Top edge half the bottom edge: a classic perspective quad.
        let trap = [[8.0, 0.0], [24.0, 0.0], [32.0, 16.0], [0.0, 16.0]];
        let q = texture_q(&trap);
        let max = q.iter().fold(0.0f32, |m, &v| m.max(v));
        assert!((max - 1.0).abs() < 1e-5, "max q should normalize to 1, got {q:?}");
        assert!(q.iter().all(|&v| v > 0.0 && v <= 1.0 + 1e-5));
        // Opposing corners of a symmetric trapezoid share factors.
        assert!((q[0] - q[1]).abs() < 1e-5);
        assert!((q[2] - q[3]).abs() < 1e-5);
    }

    #[test]
    fn degenerate_quad_gets_unit_factors() {
        // Corners 2 and 3 coincide: a triangle. Every edge pair is
        // either parallel or meets at the shared corner.
        let tri = [[0.0, 0.0], [16.0, 0.0], [8.0, 16.0], [8.0, 16.0]];
        let q = texture_q(&tri);
        assert!(q.iter().all(|&v| v > 0.0 && v <= 1.0 + 1e-5), "{q:?}");
    }

    #[test]
    fn texcoords_are_biased_inward() {
        let input = QuadInput {
            vertices: [[0.0, 0.0], [8.0, 0.0], [8.0, 8.0], [0.0, 8.0]],
            atlas_x: 100,
            atlas_y: 200,
            width: 8,
            height: 8,
            flip: 0,
            gouraud: NO_GOURAUD,
            perspective: false,
        };
        let verts = expand_quad(&input);
        assert_eq!(verts[0].texcoord, [100.0 + ATLAS_BIAS, 200.0 + ATLAS_BIAS]);
        assert_eq!(verts[2].texcoord, [108.0 - ATLAS_BIAS, 208.0 - ATLAS_BIAS]);
        assert!(verts.iter().all(|v| v.q == 1.0));
    }

    #[test]
    fn flip_bits_swap_texcoord_edges() {
        let base = QuadInput {
            vertices: [[0.0, 0.0], [8.0, 0.0], [8.0, 8.0], [0.0, 8.0]],
            atlas_x: 0,
            atlas_y: 0,
            width: 8,
            height: 8,
            flip: 0x3,
            gouraud: NO_GOURAUD,
            perspective: false,
        };
        let verts = expand_quad(&base);
        // Both flips: corner 0 samples the far corner of the entry.
        assert_eq!(verts[0].texcoord, [8.0 - ATLAS_BIAS, 8.0 - ATLAS_BIAS]);
        assert_eq!(verts[2].texcoord, [ATLAS_BIAS, ATLAS_BIAS]);
    }

    #[test]
    fn tessellation_covers_the_quad() {
        let input = QuadInput {
            vertices: [[0.0, 0.0], [16.0, 0.0], [16.0, 16.0], [0.0, 16.0]],
            atlas_x: 0,
            atlas_y: 0,
            width: 16,
            height: 16,
            flip: 0,
            gouraud: NO_GOURAUD,
            perspective: false,
        };
        let verts = tessellate_quad(&input);
        assert_eq!(verts.len(), (TESS_GRID * TESS_GRID * 6) as usize);
        // First vertex is the quad's first corner, last is its fourth.
        assert_eq!(verts[0].position, [0.0, 0.0]);
        assert_eq!(verts.last().unwrap().position, [0.0, 16.0]);
        // Grid rows partition the vertical extent evenly.
        let row_height = 16.0 / TESS_GRID as f32;
        assert_eq!(verts[5].position[1], row_height);
    }

    #[test]
    fn tessellated_gouraud_interpolates_bilinearly() {
        let mut gouraud = NO_GOURAUD;
        gouraud[1] = [1.0, 0.0, 0.0, 0.0]; // red delta at the top-right
        let input = QuadInput {
            vertices: [[0.0, 0.0], [16.0, 0.0], [16.0, 16.0], [0.0, 16.0]],
            atlas_x: 0,
            atlas_y: 0,
            width: 16,
            height: 16,
            flip: 0,
            gouraud,
            perspective: false,
        };
        let verts = tessellate_quad(&input);
        // Top-left sub-quad: corner a has no red, corner b has 1/N.
        assert_eq!(verts[0].gouraud[0], 0.0);
        assert!((verts[1].gouraud[0] - 1.0 / TESS_GRID as f32).abs() < 1e-6);
    }
}
