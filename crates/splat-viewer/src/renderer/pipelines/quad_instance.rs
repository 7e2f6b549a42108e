use crate::renderer::allocator::ResourceAllocator;
use crate::renderer::error::RendererError;
use crate::renderer::shaders;
use crate::renderer::strategy::{
    raster_bindings, raster_pipeline, RasterInputs, RasterStrategy, RenderStrategy,
};

/// Two triangles covering [-1, 1]², scaled by each splat's radius.
pub const QUAD_CORNERS: [[f32; 2]; 6] = [
    [-1.0, -1.0],
    [1.0, -1.0],
    [1.0, 1.0],
    [-1.0, -1.0],
    [1.0, 1.0],
    [-1.0, 1.0],
];

/// Instanced quads: the corner buffer steps per vertex, the splat is looked
/// up through the sorted index by `instance_index`.
pub struct QuadInstancePipeline {
    pipeline: wgpu::RenderPipeline,
    bind_group: wgpu::BindGroup,
    quad_vb: wgpu::Buffer,
}

impl QuadInstancePipeline {
    pub fn new(
        device: &wgpu::Device,
        alloc: &ResourceAllocator,
        inputs: &RasterInputs,
    ) -> Result<Self, RendererError> {
        let quad_vb =
            alloc.allocate_init("Splat Quad VB", wgpu::BufferUsages::VERTEX, &QUAD_CORNERS)?;

        let (layout, bind_group) = raster_bindings(device, inputs);
        let module = shaders::create_module(
            device,
            "shaders/render_quad.wgsl",
            shaders::render_source(RasterStrategy::QuadInstance, inputs.depth_order),
        );

        let corner_layout = wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<[f32; 2]>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[wgpu::VertexAttribute {
                shader_location: 0,
                offset: 0,
                format: wgpu::VertexFormat::Float32x2,
            }],
        };

        let pipeline = raster_pipeline(
            device,
            "Splat Quad-Instance Pipeline",
            &layout,
            &module,
            &[corner_layout],
            inputs,
        );

        Ok(Self {
            pipeline,
            bind_group,
            quad_vb,
        })
    }
}

impl RenderStrategy for QuadInstancePipeline {
    fn kind(&self) -> RasterStrategy {
        RasterStrategy::QuadInstance
    }

    fn draw<'a>(&'a self, pass: &mut wgpu::RenderPass<'a>, indirect: &'a wgpu::Buffer) {
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.bind_group, &[]);
        pass.set_vertex_buffer(0, self.quad_vb.slice(..));
        pass.draw_indirect(indirect, 0);
    }
}
