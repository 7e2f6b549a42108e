use crate::renderer::shaders;
use crate::renderer::strategy::{
    raster_bindings, raster_pipeline, RasterInputs, RasterStrategy, RenderStrategy,
};

/// Draws six vertices per instance with no vertex input; the shader picks
/// the quad corner from `vertex_index` and the splat from the sorted index.
pub struct IndexDrawPipeline {
    pipeline: wgpu::RenderPipeline,
    bind_group: wgpu::BindGroup,
}

impl IndexDrawPipeline {
    pub fn new(device: &wgpu::Device, inputs: &RasterInputs) -> Self {
        let (layout, bind_group) = raster_bindings(device, inputs);
        let module = shaders::create_module(
            device,
            "shaders/render_index.wgsl",
            shaders::render_source(RasterStrategy::IndexDraw, inputs.depth_order),
        );
        let pipeline = raster_pipeline(
            device,
            "Splat Index-Draw Pipeline",
            &layout,
            &module,
            &[],
            inputs,
        );

        Self {
            pipeline,
            bind_group,
        }
    }
}

impl RenderStrategy for IndexDrawPipeline {
    fn kind(&self) -> RasterStrategy {
        RasterStrategy::IndexDraw
    }

    fn draw<'a>(&'a self, pass: &mut wgpu::RenderPass<'a>, indirect: &'a wgpu::Buffer) {
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.bind_group, &[]);
        pass.draw_indirect(indirect, 0);
    }
}
