//! The two ways of rasterizing sorted splats. Both draw six vertices per
//! visible splat through the same indirect argument buffer; they differ in
//! where the quad corners come from and in the splat encoding they read.

use super::allocator::ResourceAllocator;
use super::error::RendererError;
use super::pipelines::{index_draw::IndexDrawPipeline, quad_instance::QuadInstancePipeline};
use super::DepthOrder;
use crate::data::types::{PackedSplat, UnpackedSplat};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum RasterStrategy {
    /// Corners derived from the vertex index; 24-byte half-float splats.
    #[default]
    IndexDraw,
    /// Corners from a six vertex quad buffer; 48-byte full precision splats.
    QuadInstance,
}

impl RasterStrategy {
    pub fn splat_layout(self) -> SplatLayout {
        match self {
            RasterStrategy::IndexDraw => SplatLayout::Packed,
            RasterStrategy::QuadInstance => SplatLayout::Unpacked,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RasterStrategy::IndexDraw => "index-draw",
            RasterStrategy::QuadInstance => "quad-instance",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplatLayout {
    Packed,
    Unpacked,
}

impl SplatLayout {
    pub const fn bytes_per_splat(self) -> u64 {
        match self {
            SplatLayout::Packed => std::mem::size_of::<PackedSplat>() as u64,
            SplatLayout::Unpacked => std::mem::size_of::<UnpackedSplat>() as u64,
        }
    }
}

/// Resources a raster strategy binds. All of them are owned by the renderer.
pub struct RasterInputs<'a> {
    pub splats: &'a wgpu::Buffer,
    pub sorted_indices: &'a wgpu::Buffer,
    pub camera: &'a wgpu::Buffer,
    pub target_format: wgpu::TextureFormat,
    pub depth_order: DepthOrder,
}

pub trait RenderStrategy {
    fn kind(&self) -> RasterStrategy;

    /// Records the indirect draw. `indirect` holds `[6, visible, 0, 0]`.
    fn draw<'a>(&'a self, pass: &mut wgpu::RenderPass<'a>, indirect: &'a wgpu::Buffer);
}

pub fn build_strategy(
    strategy: RasterStrategy,
    device: &wgpu::Device,
    alloc: &ResourceAllocator,
    inputs: &RasterInputs,
) -> Result<Box<dyn RenderStrategy>, RendererError> {
    Ok(match strategy {
        RasterStrategy::IndexDraw => Box::new(IndexDrawPipeline::new(device, inputs)),
        RasterStrategy::QuadInstance => Box::new(QuadInstancePipeline::new(device, alloc, inputs)?),
    })
}

/// Bind group shared by both strategies: splats, sorted indices, camera.
pub(crate) fn raster_bindings(
    device: &wgpu::Device,
    inputs: &RasterInputs,
) -> (wgpu::BindGroupLayout, wgpu::BindGroup) {
    let storage = |binding| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::VERTEX,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    };

    let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Splat Raster Layout"),
        entries: &[
            storage(0),
            storage(1),
            wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
        ],
    });

    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Splat Raster BindGroup"),
        layout: &layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: inputs.splats.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: inputs.sorted_indices.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: inputs.camera.as_entire_binding(),
            },
        ],
    });

    (layout, bind_group)
}

/// Render pipeline without depth testing; order comes from the sort alone.
pub(crate) fn raster_pipeline(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::BindGroupLayout,
    module: &wgpu::ShaderModule,
    buffers: &[wgpu::VertexBufferLayout],
    inputs: &RasterInputs,
) -> wgpu::RenderPipeline {
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[layout],
        push_constant_ranges: &[],
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: "vs_main",
            buffers,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            ..Default::default()
        },
        depth_stencil: None,
        fragment: Some(wgpu::FragmentState {
            module,
            entry_point: "fs_main",
            targets: &[Some(wgpu::ColorTargetState {
                format: inputs.target_format,
                blend: Some(inputs.depth_order.blend_state()),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
    })
}
