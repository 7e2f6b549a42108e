//! GPU-only LSD radix sort of (depth key, splat index) pairs.
//!
//! The element count is never known on the CPU: it lives in the `SortInfo`
//! buffer written by preprocess. A one-thread kernel turns it into the
//! indirect workgroup count used by every per-block kernel. Four 8-bit
//! passes ping-pong between two key/value buffer pairs, so the sorted
//! output always ends up in pair 0.

use crate::data::types::{DispatchIndirectArgs, SortInfo};
use crate::renderer::allocator::ResourceAllocator;
use crate::renderer::error::RendererError;
use crate::renderer::shaders;
use wgpu::BufferUsages;

pub const RADIX: u32 = 256;
pub const RADIX_BITS: u32 = 8;
pub const PASSES: usize = 4;
pub const BLOCK_SIZE: u32 = 256;
/// Indirect dispatches are limited to 65535 workgroups per dimension.
pub const MAX_KEYS: usize = 65_535 * BLOCK_SIZE as usize;

const HISTOGRAM_BYTES: u64 = RADIX as u64 * 4;

#[inline]
pub fn num_blocks(keys: u32) -> u32 {
    keys.div_ceil(BLOCK_SIZE)
}

/// Buffer pair index read (`.0`) and written (`.1`) by pass `pass`.
#[inline]
pub fn pass_buffers(pass: usize) -> (usize, usize) {
    (pass % 2, (pass + 1) % 2)
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Debug)]
struct SortParams {
    shift: u32,
    _pad: [u32; 3],
}

pub struct RadixSorter {
    capacity: u32,

    sort_info: wgpu::Buffer,
    dispatch: wgpu::Buffer,
    keys: [wgpu::Buffer; 2],
    values: [wgpu::Buffer; 2],
    global_histogram: wgpu::Buffer,
    zero_histogram: wgpu::Buffer,
    _block_histograms: wgpu::Buffer,
    _params: Vec<wgpu::Buffer>,

    prepare_pipeline: wgpu::ComputePipeline,
    prepare_bind_group: wgpu::BindGroup,

    histogram: wgpu::ComputePipeline,
    scan_bins: wgpu::ComputePipeline,
    block_offsets: wgpu::ComputePipeline,
    scatter: wgpu::ComputePipeline,
    /// Group 0 per pass; only the digit shift differs.
    pass_bind_groups: Vec<wgpu::BindGroup>,
    /// Group 1: `[pair 0 -> pair 1, pair 1 -> pair 0]`.
    data_bind_groups: [wgpu::BindGroup; 2],
}

fn entry(binding: u32, ty: wgpu::BufferBindingType) -> wgpu::BindGroupLayoutEntry {
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

fn storage(read_only: bool) -> wgpu::BufferBindingType {
    wgpu::BufferBindingType::Storage { read_only }
}

impl RadixSorter {
    /// Allocates every buffer and bind group for up to `capacity` keys.
    pub fn new(
        device: &wgpu::Device,
        alloc: &ResourceAllocator,
        capacity: usize,
    ) -> Result<Self, RendererError> {
        if capacity > MAX_KEYS {
            return Err(RendererError::TooManyPrimitives {
                count: capacity,
                max: MAX_KEYS,
            });
        }
        let capacity = capacity as u32;

        let info = SortInfo {
            keys_size: 0,
            padded_size: capacity.next_multiple_of(BLOCK_SIZE),
            passes: PASSES as u32,
            even_pass: (PASSES % 2 == 0) as u32,
        };
        let sort_info = alloc.allocate_init(
            "Sort Info",
            BufferUsages::STORAGE | BufferUsages::COPY_DST | BufferUsages::COPY_SRC,
            &[info],
        )?;
        let dispatch = alloc.allocate_init(
            "Sort Dispatch Indirect",
            BufferUsages::STORAGE
                | BufferUsages::INDIRECT
                | BufferUsages::COPY_DST
                | BufferUsages::COPY_SRC,
            &[DispatchIndirectArgs::empty()],
        )?;

        let pair_usage = BufferUsages::STORAGE | BufferUsages::COPY_DST | BufferUsages::COPY_SRC;
        let n = capacity as usize;
        let keys = [
            alloc.allocate_array::<u32>("Sort Keys 0", pair_usage, n)?,
            alloc.allocate_array::<u32>("Sort Keys 1", pair_usage, n)?,
        ];
        let values = [
            alloc.allocate_array::<u32>("Sort Values 0", pair_usage, n)?,
            alloc.allocate_array::<u32>("Sort Values 1", pair_usage, n)?,
        ];

        let global_histogram = alloc.allocate(
            "Sort Global Histogram",
            HISTOGRAM_BYTES,
            BufferUsages::STORAGE | BufferUsages::COPY_DST,
            None,
        )?;
        let zero_histogram =
            alloc.allocate("Sort Zero Histogram", HISTOGRAM_BYTES, BufferUsages::COPY_SRC, None)?;
        let block_histograms = alloc.allocate_array::<u32>(
            "Sort Block Histograms",
            BufferUsages::STORAGE,
            (num_blocks(capacity) * RADIX) as usize,
        )?;

        let params: Vec<wgpu::Buffer> = (0..PASSES)
            .map(|pass| {
                let p = SortParams {
                    shift: pass as u32 * RADIX_BITS,
                    _pad: [0; 3],
                };
                alloc.allocate_init(&format!("Sort Params {}", pass), BufferUsages::UNIFORM, &[p])
            })
            .collect::<Result<_, _>>()?;

        // Dispatch preparation
        let prepare_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Sort Prepare Layout"),
            entries: &[entry(0, storage(true)), entry(1, storage(false))],
        });
        let prepare_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Sort Prepare BindGroup"),
            layout: &prepare_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: sort_info.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: dispatch.as_entire_binding(),
                },
            ],
        });
        let prepare_module = shaders::create_module(
            device,
            "shaders/sort_dispatch.wgsl",
            shaders::SORT_DISPATCH.to_string(),
        );
        let prepare_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Sort Prepare PipelineLayout"),
                bind_group_layouts: &[&prepare_layout],
                push_constant_ranges: &[],
            });
        let prepare_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Sort Prepare Dispatch"),
            layout: Some(&prepare_pipeline_layout),
            module: &prepare_module,
            entry_point: "prepare_dispatch",
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        });

        // Radix passes
        let pass_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Sort Pass Layout"),
            entries: &[
                entry(0, storage(true)),
                entry(1, storage(false)),
                entry(2, storage(false)),
                entry(3, wgpu::BufferBindingType::Uniform),
            ],
        });
        let data_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Sort Data Layout"),
            entries: &[
                entry(0, storage(true)),
                entry(1, storage(true)),
                entry(2, storage(false)),
                entry(3, storage(false)),
            ],
        });

        let pass_bind_groups = params
            .iter()
            .enumerate()
            .map(|(pass, uniform)| {
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(&format!("Sort Pass {} BindGroup", pass)),
                    layout: &pass_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: sort_info.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: global_histogram.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: block_histograms.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 3,
                            resource: uniform.as_entire_binding(),
                        },
                    ],
                })
            })
            .collect();

        let data_bind_group = |src: usize, dst: usize| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&format!("Sort Data {} -> {}", src, dst)),
                layout: &data_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: keys[src].as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: values[src].as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: keys[dst].as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: values[dst].as_entire_binding(),
                    },
                ],
            })
        };
        let data_bind_groups = [data_bind_group(0, 1), data_bind_group(1, 0)];

        let module =
            shaders::create_module(device, "shaders/sort.wgsl", shaders::SORT.to_string());
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Sort PipelineLayout"),
            bind_group_layouts: &[&pass_layout, &data_layout],
            push_constant_ranges: &[],
        });
        let kernel = |entry_point: &str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry_point),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            })
        };

        log::debug!(
            "radix sorter: capacity={} blocks={} passes={}",
            capacity,
            num_blocks(capacity),
            PASSES
        );

        Ok(Self {
            capacity,
            histogram: kernel("histogram"),
            scan_bins: kernel("scan_bins"),
            block_offsets: kernel("block_offsets"),
            scatter: kernel("scatter"),
            sort_info,
            dispatch,
            keys,
            values,
            global_histogram,
            zero_histogram,
            _block_histograms: block_histograms,
            _params: params,
            prepare_pipeline,
            prepare_bind_group,
            pass_bind_groups,
            data_bind_groups,
        })
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Holds the visible count in its first word.
    pub fn sort_info_buffer(&self) -> &wgpu::Buffer {
        &self.sort_info
    }

    pub fn dispatch_buffer(&self) -> &wgpu::Buffer {
        &self.dispatch
    }

    pub fn keys_buffer(&self, pair: usize) -> &wgpu::Buffer {
        &self.keys[pair]
    }

    pub fn values_buffer(&self, pair: usize) -> &wgpu::Buffer {
        &self.values[pair]
    }

    /// Pair holding the sorted result once `record_sort` has run.
    #[inline]
    pub fn output_index(&self) -> usize {
        PASSES % 2
    }

    pub fn sorted_values(&self) -> &wgpu::Buffer {
        &self.values[self.output_index()]
    }

    /// Sorts the first `SortInfo.keys_size` pairs of pair 0 ascending by key.
    pub fn record_sort(&self, encoder: &mut wgpu::CommandEncoder) {
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Sort Prepare Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.prepare_pipeline);
            pass.set_bind_group(0, &self.prepare_bind_group, &[]);
            pass.dispatch_workgroups(1, 1, 1);
        }

        for pass_index in 0..PASSES {
            let (src, _) = pass_buffers(pass_index);
            encoder.copy_buffer_to_buffer(
                &self.zero_histogram,
                0,
                &self.global_histogram,
                0,
                HISTOGRAM_BYTES,
            );

            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Sort Radix Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.histogram);
            pass.set_bind_group(0, &self.pass_bind_groups[pass_index], &[]);
            pass.set_bind_group(1, &self.data_bind_groups[src], &[]);
            pass.dispatch_workgroups_indirect(&self.dispatch, 0);

            pass.set_pipeline(&self.scan_bins);
            pass.dispatch_workgroups(1, 1, 1);

            pass.set_pipeline(&self.block_offsets);
            pass.dispatch_workgroups(1, 1, 1);

            pass.set_pipeline(&self.scatter);
            pass.dispatch_workgroups_indirect(&self.dispatch, 0);
        }
    }
}
