use crate::data::types::{CameraUniform, GaussianPrimitive, RenderSettings, ShCoefficients};
use crate::renderer::DepthOrder;
use glam::{Mat3, Quat, Vec2, Vec3, Vec4Swizzles};
use rayon::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};

pub const NEAR_CULL: f32 = 0.2;
pub const FRUSTUM_SLACK: f32 = 1.2;
pub const MIN_ALPHA: f32 = 1.0 / 255.0;
pub const COV_LOW_PASS: f32 = 0.3;

pub const SH_C0: f32 = 0.282_094_8;
pub const SH_C1: f32 = 0.488_602_5;
pub const SH_C2: [f32; 5] = [1.092_548_4, -1.092_548_4, 0.315_391_57, -1.092_548_4, 0.546_274_2];
pub const SH_C3: [f32; 7] = [
    -0.590_043_6,
    2.890_611_4,
    -0.457_045_8,
    0.373_176_33,
    -0.457_045_8,
    1.445_305_7,
    -0.590_043_6,
];

/// Screen-space splat as preprocess computes it, before encoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectedSplat {
    /// NDC center.
    pub center: Vec2,
    /// Pixels.
    pub radius: f32,
    pub opacity: f32,
    /// Inverse 2D covariance (xx, xy, yy), pixels.
    pub conic: Vec3,
    pub color: Vec3,
    /// View-space distance along the camera axis.
    pub depth: f32,
}

#[inline]
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

pub fn eval_sh(sh: &ShCoefficients, degree: u32, dir: Vec3) -> Vec3 {
    let c = |k: usize| Vec3::from(sh.coeffs[k]);
    let mut result = SH_C0 * c(0);

    if degree > 0 {
        let (x, y, z) = (dir.x, dir.y, dir.z);
        result += -SH_C1 * y * c(1) + SH_C1 * z * c(2) - SH_C1 * x * c(3);

        if degree > 1 {
            let (xx, yy, zz) = (x * x, y * y, z * z);
            let (xy, yz, xz) = (x * y, y * z, x * z);
            result += SH_C2[0] * xy * c(4)
                + SH_C2[1] * yz * c(5)
                + SH_C2[2] * (2.0 * zz - xx - yy) * c(6)
                + SH_C2[3] * xz * c(7)
                + SH_C2[4] * (xx - yy) * c(8);

            if degree > 2 {
                result += SH_C3[0] * y * (3.0 * xx - yy) * c(9)
                    + SH_C3[1] * xy * z * c(10)
                    + SH_C3[2] * y * (4.0 * zz - xx - yy) * c(11)
                    + SH_C3[3] * z * (2.0 * zz - 3.0 * xx - 3.0 * yy) * c(12)
                    + SH_C3[4] * x * (4.0 * zz - xx - yy) * c(13)
                    + SH_C3[5] * z * (xx - yy) * c(14)
                    + SH_C3[6] * x * (xx - 3.0 * yy) * c(15);
            }
        }
    }

    (result + Vec3::splat(0.5)).max(Vec3::ZERO)
}

/// DC coefficient that evaluates to `color` at any view direction.
pub fn dc_for_color(color: Vec3) -> [f32; 3] {
    ((color - Vec3::splat(0.5)) / SH_C0).into()
}

/// Projects one primitive, or `None` when it is culled.
pub fn project(
    prim: &GaussianPrimitive,
    sh: &ShCoefficients,
    camera: &CameraUniform,
    settings: &RenderSettings,
) -> Option<ProjectedSplat> {
    let view = camera.view();
    let proj = camera.proj();
    let position = Vec3::from(prim.position);

    let view_pos = view * position.extend(1.0);
    let depth = -view_pos.z;
    if depth < NEAR_CULL {
        return None;
    }

    let clip = proj * view_pos;
    let center = clip.xy() / clip.w;
    if center.abs().cmpgt(Vec2::splat(FRUSTUM_SLACK)).any() {
        return None;
    }

    let opacity = sigmoid(prim.opacity);
    if opacity < MIN_ALPHA {
        return None;
    }

    let [sx, sy, sz] = prim.scale;
    let scale = Vec3::new(sx.exp(), sy.exp(), sz.exp()) * settings.gaussian_scaling;
    let [w, x, y, z] = prim.rotation;
    let rotation = Quat::from_xyzw(x, y, z, w).normalize();
    let m = Mat3::from_quat(rotation) * Mat3::from_diagonal(scale);
    let sigma = m * m.transpose();

    let limit = 1.3 / Vec2::new(proj.x_axis.x, proj.y_axis.y);
    let t_xy = (view_pos.xy() / depth).clamp(-limit, limit) * depth;
    let focal = Vec2::from(camera.focal);
    let depth2 = depth * depth;
    let j = Mat3::from_cols(
        Vec3::new(focal.x / depth, 0.0, 0.0),
        Vec3::new(0.0, focal.y / depth, 0.0),
        Vec3::new(focal.x * t_xy.x / depth2, focal.y * t_xy.y / depth2, 0.0),
    );
    let t = j * Mat3::from_mat4(view);
    let cov = t * sigma * t.transpose();

    let a = cov.x_axis.x + COV_LOW_PASS;
    let b = cov.x_axis.y;
    let c = cov.y_axis.y + COV_LOW_PASS;
    let det = a * c - b * b;
    if det <= 0.0 {
        return None;
    }
    let conic = Vec3::new(c, -b, a) / det;
    let mid = 0.5 * (a + c);
    let lambda_max = mid + (mid * mid - det).max(0.1).sqrt();
    let radius = (3.0 * lambda_max.sqrt()).ceil();

    let dir = (position - camera.position()).normalize();
    let color = eval_sh(sh, settings.sh_degree.min(3), dir);

    Some(ProjectedSplat {
        center,
        radius,
        opacity,
        conic,
        color,
        depth,
    })
}

/// Splats, keys and values in slot order, as left by the preprocess pass.
#[derive(Debug, Clone, Default)]
pub struct PreprocessOutput {
    pub splats: Vec<ProjectedSplat>,
    pub keys: Vec<u32>,
    pub values: Vec<u32>,
    /// Primitive index that produced each slot.
    pub sources: Vec<u32>,
}

impl PreprocessOutput {
    #[inline]
    pub fn count(&self) -> u32 {
        self.splats.len() as u32
    }
}

/// Runs [`project`] over the cloud in parallel. Slots come from a shared
/// atomic counter, so their assignment order is unspecified, as on the GPU.
pub fn preprocess(
    primitives: &[GaussianPrimitive],
    sh: &[ShCoefficients],
    camera: &CameraUniform,
    settings: &RenderSettings,
    order: DepthOrder,
) -> PreprocessOutput {
    let counter = AtomicU32::new(0);
    let mut slotted: Vec<(u32, u32, ProjectedSplat)> = primitives
        .par_iter()
        .zip(sh.par_iter())
        .enumerate()
        .filter_map(|(i, (prim, sh))| project(prim, sh, camera, settings).map(|s| (i as u32, s)))
        .map(|(i, splat)| (counter.fetch_add(1, Ordering::Relaxed), i, splat))
        .collect();
    slotted.sort_unstable_by_key(|(slot, _, _)| *slot);

    PreprocessOutput {
        keys: slotted.iter().map(|(_, _, s)| order.depth_key(s.depth)).collect(),
        values: slotted.iter().map(|(slot, _, _)| *slot).collect(),
        sources: slotted.iter().map(|(_, i, _)| *i).collect(),
        splats: slotted.into_iter().map(|(_, _, s)| s).collect(),
    }
}
