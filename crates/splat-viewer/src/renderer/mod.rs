//! The splat frame orchestrator. Owns every GPU buffer and pipeline of the
//! preprocess -> sort -> indirect draw chain and records one frame into a
//! caller-provided command encoder.

pub mod allocator;
pub mod context;
pub mod error;
pub mod pipelines;
pub mod shaders;
pub mod strategy;

pub use self::error::RendererError;
pub use self::strategy::{RasterStrategy, RenderStrategy, SplatLayout};

use self::{
    allocator::ResourceAllocator,
    error::error_scope,
    pipelines::{
        background::BackgroundPipeline,
        preprocess::{PreprocessInputs, PreprocessPipeline},
        radix_sort::RadixSorter,
    },
    strategy::{build_strategy, RasterInputs},
};
use crate::data::{
    types::{CameraUniform, DrawIndirectArgs, RenderSettings},
    PointCloud,
};
use wgpu::BufferUsages;

/// Order in which splats reach the blender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum DepthOrder {
    /// Farthest first, composited with premultiplied OVER.
    #[default]
    BackToFront,
    /// Nearest first, composited with UNDER onto a transparent target; the
    /// background goes under the result last.
    FrontToBack,
}

impl DepthOrder {
    /// Sort key of a positive view depth; ascending keys follow this order.
    #[inline]
    pub fn depth_key(self, depth: f32) -> u32 {
        let bits = depth.to_bits();
        match self {
            DepthOrder::BackToFront => !bits,
            DepthOrder::FrontToBack => bits,
        }
    }

    pub fn blend_state(self) -> wgpu::BlendState {
        match self {
            DepthOrder::BackToFront => wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING,
            DepthOrder::FrontToBack => {
                let under = wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::OneMinusDstAlpha,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                };
                wgpu::BlendState {
                    color: under,
                    alpha: under,
                }
            }
        }
    }

    /// UNDER accumulates onto transparent black and composites the background
    /// afterwards; OVER starts from the background.
    pub fn clear_color(self, background: wgpu::Color) -> wgpu::Color {
        match self {
            DepthOrder::BackToFront => background,
            DepthOrder::FrontToBack => wgpu::Color::TRANSPARENT,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RendererConfig {
    pub strategy: RasterStrategy,
    pub depth_order: DepthOrder,
    pub background: wgpu::Color,
    pub gaussian_scaling: f32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            strategy: RasterStrategy::IndexDraw,
            depth_order: DepthOrder::BackToFront,
            background: wgpu::Color::BLACK,
            gaussian_scaling: 1.0,
        }
    }
}

/// The steps of one frame, in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameStage {
    /// Zero the visible count and the sort dispatch width (GPU copies).
    Reset,
    Preprocess,
    Sort,
    /// Copy the visible count into the draw's instance count.
    FixupIndirectCount,
    Render,
}

impl FrameStage {
    pub const SEQUENCE: [FrameStage; 5] = [
        FrameStage::Reset,
        FrameStage::Preprocess,
        FrameStage::Sort,
        FrameStage::FixupIndirectCount,
        FrameStage::Render,
    ];

    pub fn next(self) -> Option<FrameStage> {
        match self {
            FrameStage::Reset => Some(FrameStage::Preprocess),
            FrameStage::Preprocess => Some(FrameStage::Sort),
            FrameStage::Sort => Some(FrameStage::FixupIndirectCount),
            FrameStage::FixupIndirectCount => Some(FrameStage::Render),
            FrameStage::Render => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FrameStage::Reset => "reset",
            FrameStage::Preprocess => "preprocess",
            FrameStage::Sort => "sort",
            FrameStage::FixupIndirectCount => "fixup-indirect-count",
            FrameStage::Render => "render",
        }
    }
}

/// Copy source for the per-frame counter resets.
const ZERO_BYTES: u64 = 16;
const COUNT_BYTES: u64 = 4;

pub struct GaussianRenderer {
    config: RendererConfig,
    num_primitives: u32,
    settings: RenderSettings,

    camera_buffer: wgpu::Buffer,
    settings_buffer: wgpu::Buffer,
    splat_buffer: wgpu::Buffer,
    indirect_buffer: wgpu::Buffer,
    zero_buffer: wgpu::Buffer,

    preprocess: PreprocessPipeline,
    sorter: RadixSorter,
    raster: Box<dyn RenderStrategy>,
    /// Front-to-back only.
    background: Option<BackgroundPipeline>,
}

impl GaussianRenderer {
    /// Builds every buffer and pipeline for `cloud`. The primitive count is
    /// fixed from here on; a different cloud needs a new renderer.
    pub async fn new(
        device: &wgpu::Device,
        target_format: wgpu::TextureFormat,
        cloud: &PointCloud,
        config: RendererConfig,
    ) -> Result<Self, RendererError> {
        let alloc = ResourceAllocator::new(device);
        let num_primitives = cloud.num_primitives();
        let layout = config.strategy.splat_layout();
        let settings = RenderSettings::new(config.gaussian_scaling, cloud.sh_degree());

        if num_primitives == 0 {
            log::warn!("point cloud is empty; frames will only clear the target");
        }

        let (camera_buffer, settings_buffer, splat_buffer, indirect_buffer, zero_buffer) =
            error_scope(device, "frame buffers", || {
                Ok((
                    alloc.allocate(
                        "Camera Uniform",
                        std::mem::size_of::<CameraUniform>() as u64,
                        BufferUsages::UNIFORM | BufferUsages::COPY_DST,
                        None,
                    )?,
                    alloc.allocate_init(
                        "Render Settings",
                        BufferUsages::UNIFORM | BufferUsages::COPY_DST,
                        &[settings],
                    )?,
                    alloc.allocate(
                        "Splats",
                        num_primitives.max(1) as u64 * layout.bytes_per_splat(),
                        BufferUsages::STORAGE | BufferUsages::COPY_SRC,
                        None,
                    )?,
                    alloc.allocate_init(
                        "Draw Indirect",
                        BufferUsages::INDIRECT | BufferUsages::COPY_DST | BufferUsages::COPY_SRC,
                        &[DrawIndirectArgs::quads()],
                    )?,
                    alloc.allocate("Zero", ZERO_BYTES, BufferUsages::COPY_SRC, None)?,
                ))
            })
            .await?;

        let sorter = error_scope(device, "radix sorter", || {
            RadixSorter::new(device, &alloc, num_primitives as usize)
        })
        .await?;

        let preprocess = error_scope(device, "preprocess pipeline", || {
            Ok(PreprocessPipeline::new(
                device,
                &PreprocessInputs {
                    camera: &camera_buffer,
                    gaussians: cloud.gaussian_buffer(),
                    sh_coeffs: cloud.sh_buffer(),
                    sort_info: sorter.sort_info_buffer(),
                    sort_keys: sorter.keys_buffer(0),
                    sort_values: sorter.values_buffer(0),
                    splats: &splat_buffer,
                    settings: &settings_buffer,
                    num_primitives,
                    layout,
                    depth_order: config.depth_order,
                },
            ))
        })
        .await?;

        let raster = error_scope(device, "raster pipeline", || {
            build_strategy(
                config.strategy,
                device,
                &alloc,
                &RasterInputs {
                    splats: &splat_buffer,
                    sorted_indices: sorter.sorted_values(),
                    camera: &camera_buffer,
                    target_format,
                    depth_order: config.depth_order,
                },
            )
        })
        .await?;

        let background = match config.depth_order {
            DepthOrder::BackToFront => None,
            DepthOrder::FrontToBack => Some(
                error_scope(device, "background pipeline", || {
                    Ok(BackgroundPipeline::new(device, target_format, config.background))
                })
                .await?,
            ),
        };

        log::debug!(
            "gaussian renderer: {} primitives (sort capacity {}), {} ({} B/splat), {:?}, sh_degree={}, storage binding limit {} MiB",
            num_primitives,
            sorter.capacity(),
            raster.kind().label(),
            layout.bytes_per_splat(),
            config.depth_order,
            settings.sh_degree,
            alloc.limits().max_storage_buffer_binding_size / 1024 / 1024
        );

        Ok(Self {
            config,
            num_primitives,
            settings,
            camera_buffer,
            settings_buffer,
            splat_buffer,
            indirect_buffer,
            zero_buffer,
            preprocess,
            sorter,
            raster,
            background,
        })
    }

    /// Records a full frame: reset, preprocess, sort, fixup, render.
    pub fn frame(&self, encoder: &mut wgpu::CommandEncoder, target: &wgpu::TextureView) {
        for stage in FrameStage::SEQUENCE {
            self.encode_stage(stage, encoder, target);
        }
    }

    /// Records a single stage. Running stages out of sequence is allowed for
    /// diagnostics; the GPU state is only meaningful after a full sequence.
    pub fn encode_stage(
        &self,
        stage: FrameStage,
        encoder: &mut wgpu::CommandEncoder,
        target: &wgpu::TextureView,
    ) {
        log::trace!("encoding {}", stage.label());
        match stage {
            FrameStage::Reset => {
                encoder.copy_buffer_to_buffer(
                    &self.zero_buffer,
                    0,
                    self.sorter.sort_info_buffer(),
                    0,
                    COUNT_BYTES,
                );
                encoder.copy_buffer_to_buffer(
                    &self.zero_buffer,
                    0,
                    self.sorter.dispatch_buffer(),
                    0,
                    COUNT_BYTES,
                );
            }
            FrameStage::Preprocess => self.preprocess.record(encoder),
            FrameStage::Sort => self.sorter.record_sort(encoder),
            FrameStage::FixupIndirectCount => {
                encoder.copy_buffer_to_buffer(
                    self.sorter.sort_info_buffer(),
                    0,
                    &self.indirect_buffer,
                    DrawIndirectArgs::INSTANCE_COUNT_OFFSET,
                    COUNT_BYTES,
                );
            }
            FrameStage::Render => {
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Splat Render Pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: target,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(
                                self.config.depth_order.clear_color(self.config.background),
                            ),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                self.raster.draw(&mut pass, &self.indirect_buffer);
                if let Some(background) = &self.background {
                    background.draw(&mut pass);
                }
            }
        }
    }

    pub fn update_camera(&self, queue: &wgpu::Queue, camera: &CameraUniform) {
        queue.write_buffer(&self.camera_buffer, 0, bytemuck::bytes_of(camera));
    }

    pub fn update_settings(&mut self, queue: &wgpu::Queue, settings: RenderSettings) {
        self.settings = settings;
        queue.write_buffer(&self.settings_buffer, 0, bytemuck::bytes_of(&settings));
    }

    #[inline]
    pub fn settings(&self) -> RenderSettings {
        self.settings
    }

    #[inline]
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    #[inline]
    pub fn num_primitives(&self) -> u32 {
        self.num_primitives
    }

    pub fn camera_buffer(&self) -> &wgpu::Buffer {
        &self.camera_buffer
    }

    pub fn settings_buffer(&self) -> &wgpu::Buffer {
        &self.settings_buffer
    }

    pub fn splat_buffer(&self) -> &wgpu::Buffer {
        &self.splat_buffer
    }

    pub fn indirect_buffer(&self) -> &wgpu::Buffer {
        &self.indirect_buffer
    }

    pub fn sorter(&self) -> &RadixSorter {
        &self.sorter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_sequence_follows_next() {
        let mut walked = vec![FrameStage::SEQUENCE[0]];
        while let Some(next) = walked.last().and_then(|s| s.next()) {
            walked.push(next);
        }
        assert_eq!(walked, FrameStage::SEQUENCE);
    }

    #[test]
    fn back_to_front_keys_put_far_splats_first() {
        let order = DepthOrder::BackToFront;
        assert!(order.depth_key(10.0) < order.depth_key(5.0));
        assert!(order.depth_key(5.0) < order.depth_key(1.0));
        let just_nearer = f32::from_bits(0.2f32.to_bits() - 1);
        assert!(order.depth_key(0.2) < order.depth_key(just_nearer));
    }

    #[test]
    fn front_to_back_keys_follow_depth() {
        let order = DepthOrder::FrontToBack;
        let depths = [0.25f32, 1.0, 1.5, 100.0, 1.0e6];
        let keys: Vec<u32> = depths.iter().map(|&d| order.depth_key(d)).collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn under_blending_clears_to_transparent() {
        let bg = wgpu::Color::WHITE;
        assert_eq!(DepthOrder::BackToFront.clear_color(bg), bg);
        assert_eq!(DepthOrder::FrontToBack.clear_color(bg), wgpu::Color::TRANSPARENT);
        assert_eq!(
            DepthOrder::BackToFront.blend_state(),
            wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING
        );
    }
}
