//! Face alignment to the canonical 112×112 ArcFace input.
//!
//! Estimates a 4-DOF similarity transform (scale, rotation, translation)
//! from the five detected landmarks to the InsightFace reference positions,
//! then warps the luma frame.

/// InsightFace reference landmarks for a 112×112 crop:
/// left eye, right eye, nose, left mouth, right mouth.
const REFERENCE_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

pub const ALIGNED_SIZE: usize = 112;

/// Align a detected face to a canonical 112×112 luma crop.
pub fn align_face(
    frame: &[u8],
    width: u32,
    height: u32,
    landmarks: &[(f32, f32); 5],
) -> Vec<u8> {
    let matrix = estimate_transform(landmarks, &REFERENCE_LANDMARKS);
    warp(frame, width as usize, height as usize, &matrix, ALIGNED_SIZE)
}

/// Least-squares similarity transform from `src` to `dst` landmarks.
///
/// Returns `[a, -b, tx, b, a, ty]`, the row-major 2×3 matrix
/// `[[a, -b, tx], [b, a, ty]]`.
fn estimate_transform(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> [f32; 6] {
    // Normal equations for the overdetermined system; unknowns [a, b, tx, ty].
    // Each point pair contributes:
    //   sx * a - sy * b + tx = dx
    //   sy * a + sx * b + ty = dy
    let mut ata = [0.0f32; 16];
    let mut atb = [0.0f32; 4];

    for i in 0..5 {
        let (sx, sy) = src[i];
        let (dx, dy) = dst[i];
        let rows = [[sx, -sy, 1.0, 0.0], [sy, sx, 0.0, 1.0]];
        let rhs = [dx, dy];

        for (row, &r) in rows.iter().zip(rhs.iter()) {
            for j in 0..4 {
                for k in 0..4 {
                    ata[j * 4 + k] += row[j] * row[k];
                }
                atb[j] += row[j] * r;
            }
        }
    }

    let x = solve_4x4(&ata, &atb);
    [x[0], -x[1], x[2], x[1], x[0], x[3]]
}

/// Gaussian elimination with partial pivoting on a 4×4 system.
fn solve_4x4(ata: &[f32; 16], atb: &[f32; 4]) -> [f32; 4] {
    let mut m = [[0.0f32; 5]; 4];
    for (i, row) in m.iter_mut().enumerate() {
        row[..4].copy_from_slice(&ata[i * 4..i * 4 + 4]);
        row[4] = atb[i];
    }

    for col in 0..4 {
        let mut pivot_row = col;
        for row in (col + 1)..4 {
            if m[row][col].abs() > m[pivot_row][col].abs() {
                pivot_row = row;
            }
        }
        m.swap(col, pivot_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            // Degenerate landmark geometry; fall back to identity scale.
            return [1.0, 0.0, 0.0, 0.0];
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }
    x
}

/// Inverse-map affine warp with bilinear sampling; out-of-bounds reads as 0.
fn warp(frame: &[u8], src_w: usize, src_h: usize, matrix: &[f32; 6], out_size: usize) -> Vec<u8> {
    let (a, tx) = (matrix[0], matrix[2]);
    let (b, ty) = (matrix[3], matrix[5]);

    // M = [[a, -b], [b, a]], det = a² + b²
    let det = a * a + b * b;
    if det.abs() < 1e-12 {
        return vec![0u8; out_size * out_size];
    }
    let ia = a / det;
    let ib = b / det;

    let sample = |x: i32, y: i32| -> f32 {
        if x >= 0 && x < src_w as i32 && y >= 0 && y < src_h as i32 {
            frame[y as usize * src_w + x as usize] as f32
        } else {
            0.0
        }
    };

    let mut out = vec![0u8; out_size * out_size];
    for oy in 0..out_size {
        for ox in 0..out_size {
            let dx = ox as f32 - tx;
            let dy = oy as f32 - ty;
            let sx = ia * dx + ib * dy;
            let sy = -ib * dx + ia * dy;

            let x0 = sx.floor() as i32;
            let y0 = sy.floor() as i32;
            let fx = sx - x0 as f32;
            let fy = sy - y0 as f32;

            let val = sample(x0, y0) * (1.0 - fx) * (1.0 - fy)
                + sample(x0 + 1, y0) * fx * (1.0 - fy)
                + sample(x0, y0 + 1) * (1.0 - fx) * fy
                + sample(x0 + 1, y0 + 1) * fx * fy;

            out[oy * out_size + ox] = val.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}
