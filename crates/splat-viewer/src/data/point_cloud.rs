use crate::data::types::{GaussianPrimitive, ShCoefficients};
use crate::renderer::{allocator::ResourceAllocator, error::error_scope, RendererError};
use anyhow::{Context, Result};
use glam::Vec3;
use rayon::prelude::*;
use splat_ply::{SplatCloud, SplatRecord, SH_DEGREE_MAX};
use std::path::Path;

/// Axis-aligned bounds of the primitive centers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub const EMPTY: Aabb = Aabb {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    #[inline]
    pub fn union(self, other: Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        0.5 * (self.min + self.max)
    }

    /// Half the diagonal.
    #[inline]
    pub fn radius(&self) -> f32 {
        0.5 * (self.max - self.min).length()
    }
}

/// Converts one file record into the GPU layouts. Activations (sigmoid,
/// exp, quaternion normalization) stay on the GPU.
pub fn pack_record(record: &SplatRecord) -> (GaussianPrimitive, ShCoefficients) {
    (
        GaussianPrimitive {
            position: record.position,
            opacity: record.opacity,
            rotation: record.rotation,
            scale: record.scale,
            _pad: 0.0,
        },
        ShCoefficients { coeffs: record.sh },
    )
}

pub fn pack_cloud(cloud: &SplatCloud) -> (Vec<GaussianPrimitive>, Vec<ShCoefficients>) {
    cloud.splats.par_iter().map(pack_record).unzip()
}

pub fn bounds(primitives: &[GaussianPrimitive]) -> Aabb {
    primitives
        .par_iter()
        .map(|p| {
            let v = Vec3::from(p.position);
            Aabb { min: v, max: v }
        })
        .reduce(|| Aabb::EMPTY, Aabb::union)
}

/// GPU-resident, immutable point cloud consumed by the renderer.
pub struct PointCloud {
    gaussians: wgpu::Buffer,
    sh_coeffs: wgpu::Buffer,
    num_primitives: u32,
    sh_degree: u32,
    bounds: Aabb,
}

impl PointCloud {
    /// Uploads the cloud. Allocation runs inside wgpu error scopes so device
    /// failures come back as [`RendererError`].
    pub async fn new(
        device: &wgpu::Device,
        primitives: &[GaussianPrimitive],
        sh: &[ShCoefficients],
        sh_degree: u32,
    ) -> Result<Self, RendererError> {
        if primitives.len() != sh.len() {
            return Err(RendererError::ShCountMismatch {
                primitives: primitives.len(),
                sh: sh.len(),
            });
        }

        let alloc = ResourceAllocator::new(device);
        let usage = wgpu::BufferUsages::STORAGE;
        let (gaussians, sh_coeffs) = error_scope(device, "point cloud upload", || {
            // Empty clouds still get one zeroed element so the bindings stay valid.
            Ok(if primitives.is_empty() {
                (
                    alloc.allocate_array::<GaussianPrimitive>("Gaussians", usage, 0)?,
                    alloc.allocate_array::<ShCoefficients>("SH Coefficients", usage, 0)?,
                )
            } else {
                (
                    alloc.allocate_init("Gaussians", usage, primitives)?,
                    alloc.allocate_init("SH Coefficients", usage, sh)?,
                )
            })
        })
        .await?;

        Ok(Self {
            gaussians,
            sh_coeffs,
            num_primitives: primitives.len() as u32,
            sh_degree: sh_degree.min(SH_DEGREE_MAX),
            bounds: bounds(primitives),
        })
    }

    pub async fn from_splats(
        device: &wgpu::Device,
        cloud: &SplatCloud,
    ) -> Result<Self, RendererError> {
        let (primitives, sh) = pack_cloud(cloud);
        Self::new(device, &primitives, &sh, cloud.sh_degree).await
    }

    /// Reads a 3DGS PLY file and uploads it.
    pub async fn load(device: &wgpu::Device, path: &Path) -> Result<Self> {
        let cloud = splat_ply::read_file(path)
            .with_context(|| format!("reading splat PLY {}", path.display()))?;
        let point_cloud = Self::from_splats(device, &cloud)
            .await
            .with_context(|| format!("uploading {}", path.display()))?;

        let b = point_cloud.bounds;
        log::info!(
            "Loaded {:?}: {} gaussians, sh_degree={}, AABB min({:.2},{:.2},{:.2}) max({:.2},{:.2},{:.2})",
            path.file_name().and_then(|s| s.to_str()).unwrap_or("?"),
            point_cloud.num_primitives,
            point_cloud.sh_degree,
            b.min.x, b.min.y, b.min.z,
            b.max.x, b.max.y, b.max.z,
        );
        Ok(point_cloud)
    }

    #[inline]
    pub fn num_primitives(&self) -> u32 {
        self.num_primitives
    }

    #[inline]
    pub fn sh_degree(&self) -> u32 {
        self.sh_degree
    }

    #[inline]
    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    pub fn gaussian_buffer(&self) -> &wgpu::Buffer {
        &self.gaussians
    }

    pub fn sh_buffer(&self) -> &wgpu::Buffer {
        &self.sh_coeffs
    }
}
