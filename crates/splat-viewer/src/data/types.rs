//! Core data types shared with the GPU. Every struct here is `Pod` and its
//! size is asserted at compile time against the WGSL declaration it mirrors.

use glam::{Mat4, Vec2};

/// One 3D Gaussian as read by the preprocess shader.
/// Must match the layout of `Gaussian` in `preprocess.wgsl`.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Debug, Default, PartialEq)]
pub struct GaussianPrimitive {
    pub position: [f32; 3],
    /// Logit-space opacity, activated with a sigmoid on the GPU.
    pub opacity: f32,
    /// Quaternion (w, x, y, z); normalized on the GPU.
    pub rotation: [f32; 4],
    /// Log-space scale, activated with `exp` on the GPU.
    pub scale: [f32; 3],
    pub _pad: f32,
}

/// Degree-3 SH coefficients of one primitive, RGB interleaved.
/// The shader addresses them as a flat `array<f32>` with 48 floats per primitive.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Debug, Default, PartialEq)]
pub struct ShCoefficients {
    pub coeffs: [[f32; 3]; 16],
}

/// Must match the layout of `CameraUniforms` in `common.wgsl`.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Debug, PartialEq)]
pub struct CameraUniform {
    pub view: [[f32; 4]; 4],
    pub view_inv: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    pub proj_inv: [[f32; 4]; 4],
    /// Size of the viewport in physical pixels.
    pub viewport: [f32; 2],
    /// Focal lengths in pixels.
    pub focal: [f32; 2],
}

impl CameraUniform {
    /// Builds the uniform from a right-handed view matrix and a `[0, 1]`-depth
    /// perspective projection.
    pub fn new(view: Mat4, proj: Mat4, viewport: Vec2) -> Self {
        let focal = Vec2::new(
            0.5 * viewport.x * proj.x_axis.x,
            0.5 * viewport.y * proj.y_axis.y,
        );
        Self {
            view: view.to_cols_array_2d(),
            view_inv: view.inverse().to_cols_array_2d(),
            proj: proj.to_cols_array_2d(),
            proj_inv: proj.inverse().to_cols_array_2d(),
            viewport: viewport.into(),
            focal: focal.into(),
        }
    }

    #[inline]
    pub fn view(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.view)
    }

    #[inline]
    pub fn proj(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.proj)
    }

    /// World-space camera position.
    #[inline]
    pub fn position(&self) -> glam::Vec3 {
        Mat4::from_cols_array_2d(&self.view_inv).w_axis.truncate()
    }
}

/// Must match `RenderSettings` in `common.wgsl`.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Debug, PartialEq)]
pub struct RenderSettings {
    pub gaussian_scaling: f32,
    pub sh_degree: u32,
    pub _pad: [u32; 2],
}

impl RenderSettings {
    pub fn new(gaussian_scaling: f32, sh_degree: u32) -> Self {
        Self {
            gaussian_scaling,
            sh_degree,
            _pad: [0; 2],
        }
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self::new(1.0, 0)
    }
}

/// Sort bookkeeping. `keys_size` is the visible count written by preprocess.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Debug, Default, PartialEq, Eq)]
pub struct SortInfo {
    pub keys_size: u32,
    pub padded_size: u32,
    pub passes: u32,
    pub even_pass: u32,
}

/// `draw_indirect` argument block.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Debug, Default, PartialEq, Eq)]
pub struct DrawIndirectArgs {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

impl DrawIndirectArgs {
    /// Byte offset of `instance_count`, the target of the per-frame fixup copy.
    pub const INSTANCE_COUNT_OFFSET: u64 = std::mem::offset_of!(DrawIndirectArgs, instance_count) as u64;

    /// Six vertices per quad, instance count filled in on the GPU.
    pub const fn quads() -> Self {
        Self {
            vertex_count: 6,
            instance_count: 0,
            first_vertex: 0,
            first_instance: 0,
        }
    }
}

/// `dispatch_workgroups_indirect` argument block.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Debug, Default, PartialEq, Eq)]
pub struct DispatchIndirectArgs {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl DispatchIndirectArgs {
    pub const fn empty() -> Self {
        Self { x: 0, y: 1, z: 1 }
    }
}

/// Half-float packed splat used by the index-draw strategy.
/// Must match `Splat` in `splat_packed.wgsl`.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Debug, Default, PartialEq, Eq)]
pub struct PackedSplat {
    /// center.xy, (radius, 0), conic.xy, (conic.z, opacity), color.rg, (color.b, 0)
    pub words: [u32; 6],
}

/// Full precision splat used by the quad-instance strategy.
/// Must match `Splat` in `splat_unpacked.wgsl`.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Debug, Default, PartialEq)]
pub struct UnpackedSplat {
    pub center: [f32; 2],
    pub radius: f32,
    pub opacity: f32,
    pub conic: [f32; 4],
    pub color: [f32; 4],
}

const _: [(); 48] = [(); std::mem::size_of::<GaussianPrimitive>()];
const _: [(); 192] = [(); std::mem::size_of::<ShCoefficients>()];
const _: [(); 272] = [(); std::mem::size_of::<CameraUniform>()];
const _: [(); 16] = [(); std::mem::size_of::<RenderSettings>()];
const _: [(); 16] = [(); std::mem::size_of::<SortInfo>()];
const _: [(); 16] = [(); std::mem::size_of::<DrawIndirectArgs>()];
const _: [(); 12] = [(); std::mem::size_of::<DispatchIndirectArgs>()];
const _: [(); 24] = [(); std::mem::size_of::<PackedSplat>()];
const _: [(); 48] = [(); std::mem::size_of::<UnpackedSplat>()];
