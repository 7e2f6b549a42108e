use crate::renderer::shaders;
use crate::renderer::strategy::SplatLayout;
use crate::renderer::DepthOrder;

pub const WORKGROUP_SIZE: u32 = 256;

/// Buffers bound by the preprocess pass, grouped as the shader declares them.
pub struct PreprocessInputs<'a> {
    pub camera: &'a wgpu::Buffer,
    pub gaussians: &'a wgpu::Buffer,
    pub sh_coeffs: &'a wgpu::Buffer,
    pub sort_info: &'a wgpu::Buffer,
    pub sort_keys: &'a wgpu::Buffer,
    pub sort_values: &'a wgpu::Buffer,
    pub splats: &'a wgpu::Buffer,
    pub settings: &'a wgpu::Buffer,
    pub num_primitives: u32,
    pub layout: SplatLayout,
    pub depth_order: DepthOrder,
}

pub struct PreprocessPipeline {
    pipeline: wgpu::ComputePipeline,
    bind_groups: [wgpu::BindGroup; 4],
    workgroups: u32,
}

#[inline]
pub fn workgroup_count(num_primitives: u32) -> u32 {
    num_primitives.div_ceil(WORKGROUP_SIZE)
}

fn buffer_entry(
    binding: u32,
    ty: wgpu::BufferBindingType,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

const UNIFORM: wgpu::BufferBindingType = wgpu::BufferBindingType::Uniform;
const READ: wgpu::BufferBindingType = wgpu::BufferBindingType::Storage { read_only: true };
const READ_WRITE: wgpu::BufferBindingType = wgpu::BufferBindingType::Storage { read_only: false };

fn bind(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::BindGroupLayout,
    buffers: &[&wgpu::Buffer],
) -> wgpu::BindGroup {
    let entries: Vec<wgpu::BindGroupEntry> = buffers
        .iter()
        .enumerate()
        .map(|(i, buffer)| wgpu::BindGroupEntry {
            binding: i as u32,
            resource: buffer.as_entire_binding(),
        })
        .collect();

    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &entries,
    })
}

impl PreprocessPipeline {
    pub fn new(device: &wgpu::Device, inputs: &PreprocessInputs) -> Self {
        let layout = |label, entries: &[wgpu::BindGroupLayoutEntry]| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries,
            })
        };

        let camera_layout = layout("Preprocess Camera Layout", &[buffer_entry(0, UNIFORM)]);
        let cloud_layout = layout(
            "Preprocess Cloud Layout",
            &[buffer_entry(0, READ), buffer_entry(1, READ)],
        );
        let sort_layout = layout(
            "Preprocess Sort Layout",
            &[
                buffer_entry(0, READ_WRITE),
                buffer_entry(1, READ_WRITE),
                buffer_entry(2, READ_WRITE),
            ],
        );
        let output_layout = layout(
            "Preprocess Output Layout",
            &[buffer_entry(0, READ_WRITE), buffer_entry(1, UNIFORM)],
        );

        let bind_groups = [
            bind(device, "Preprocess Camera", &camera_layout, &[inputs.camera]),
            bind(
                device,
                "Preprocess Cloud",
                &cloud_layout,
                &[inputs.gaussians, inputs.sh_coeffs],
            ),
            bind(
                device,
                "Preprocess Sort",
                &sort_layout,
                &[inputs.sort_info, inputs.sort_keys, inputs.sort_values],
            ),
            bind(
                device,
                "Preprocess Output",
                &output_layout,
                &[inputs.splats, inputs.settings],
            ),
        ];

        let module = shaders::create_module(
            device,
            "shaders/preprocess.wgsl",
            shaders::preprocess_source(inputs.layout, inputs.depth_order),
        );

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Preprocess PipelineLayout"),
            bind_group_layouts: &[&camera_layout, &cloud_layout, &sort_layout, &output_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Preprocess Pipeline"),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: "preprocess",
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        });

        Self {
            pipeline,
            bind_groups,
            workgroups: workgroup_count(inputs.num_primitives),
        }
    }

    /// Records the projection pass. Nothing is dispatched for an empty cloud.
    pub fn record(&self, encoder: &mut wgpu::CommandEncoder) {
        if self.workgroups == 0 {
            return;
        }

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Preprocess Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        for (i, group) in self.bind_groups.iter().enumerate() {
            pass.set_bind_group(i as u32, group, &[]);
        }
        pass.dispatch_workgroups(self.workgroups, 1, 1);
    }
}
