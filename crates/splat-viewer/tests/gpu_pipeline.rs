//! End-to-end checks of the splat frame on a real device. Every test skips
//! with a message when no adapter is available.

use glam::{Mat4, Vec2, Vec3};
use rand::{rngs::StdRng, Rng, SeedableRng};
use splat_viewer::{
    data::{
        types::{CameraUniform, GaussianPrimitive, RenderSettings, ShCoefficients, SortInfo, UnpackedSplat},
        PointCloud,
    },
    reference,
    renderer::{
        allocator::ResourceAllocator,
        context::HeadlessGpu,
        pipelines::radix_sort::RadixSorter,
        DepthOrder, FrameStage, GaussianRenderer, RasterStrategy, RendererConfig, RendererError,
    },
};

const SIZE: u32 = 64;
const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

fn gpu() -> Option<HeadlessGpu> {
    match pollster::block_on(HeadlessGpu::new()) {
        Ok(gpu) => Some(gpu),
        Err(err) => {
            eprintln!("skipping GPU test: {err:#}");
            None
        }
    }
}

fn camera_looking_at(eye: Vec3, target: Vec3) -> CameraUniform {
    let view = Mat4::look_at_rh(eye, target, Vec3::Y);
    let proj = Mat4::perspective_rh(60f32.to_radians(), 1.0, 0.1, 100.0);
    CameraUniform::new(view, proj, Vec2::splat(SIZE as f32))
}

fn default_camera() -> CameraUniform {
    camera_looking_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO)
}

fn gaussian_at(position: Vec3) -> GaussianPrimitive {
    GaussianPrimitive {
        position: position.into(),
        opacity: 10.0,
        rotation: [1.0, 0.0, 0.0, 0.0],
        scale: [0.5f32.ln(); 3],
        _pad: 0.0,
    }
}

fn colored(color: Vec3) -> ShCoefficients {
    let mut sh = ShCoefficients::default();
    sh.coeffs[0] = reference::project::dc_for_color(color);
    sh
}

fn read_bytes(gpu: &HeadlessGpu, buffer: &wgpu::Buffer, size: u64) -> Vec<u8> {
    let staging = gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Test Readback"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut encoder = gpu
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
    encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
    gpu.queue.submit(std::iter::once(encoder.finish()));

    map_and_copy(gpu, &staging)
}

fn map_and_copy(gpu: &HeadlessGpu, staging: &wgpu::Buffer) -> Vec<u8> {
    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    gpu.device.poll(wgpu::Maintain::Wait);
    rx.recv().unwrap().unwrap();

    let bytes = slice.get_mapped_range().to_vec();
    staging.unmap();
    bytes
}

fn read_u32s(gpu: &HeadlessGpu, buffer: &wgpu::Buffer, count: usize) -> Vec<u32> {
    read_bytes(gpu, buffer, (count * 4) as u64)
        .chunks_exact(4)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .collect()
}

struct Scene {
    _cloud: PointCloud,
    renderer: GaussianRenderer,
    target: wgpu::Texture,
    view: wgpu::TextureView,
}

impl Scene {
    fn new(
        gpu: &HeadlessGpu,
        primitives: &[GaussianPrimitive],
        sh: &[ShCoefficients],
        config: RendererConfig,
    ) -> Self {
        let cloud = pollster::block_on(PointCloud::new(&gpu.device, primitives, sh, 0)).unwrap();
        let renderer =
            pollster::block_on(GaussianRenderer::new(&gpu.device, FORMAT, &cloud, config))
                .unwrap();
        renderer.update_camera(&gpu.queue, &default_camera());

        let target = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Test Target"),
            size: wgpu::Extent3d {
                width: SIZE,
                height: SIZE,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = target.create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            _cloud: cloud,
            renderer,
            target,
            view,
        }
    }

    fn encode(&self, gpu: &HeadlessGpu, stages: &[FrameStage]) {
        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        for &stage in stages {
            self.renderer.encode_stage(stage, &mut encoder, &self.view);
        }
        gpu.queue.submit(std::iter::once(encoder.finish()));
    }

    fn frame(&self, gpu: &HeadlessGpu) {
        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        self.renderer.frame(&mut encoder, &self.view);
        gpu.queue.submit(std::iter::once(encoder.finish()));
    }

    fn visible_count(&self, gpu: &HeadlessGpu) -> u32 {
        read_u32s(gpu, self.renderer.sorter().sort_info_buffer(), 1)[0]
    }

    fn indirect(&self, gpu: &HeadlessGpu) -> Vec<u32> {
        read_u32s(gpu, self.renderer.indirect_buffer(), 4)
    }

    /// RGBA8 pixels, row-major. One row of 64 pixels is exactly 256 bytes.
    fn pixels(&self, gpu: &HeadlessGpu) -> Vec<[u8; 4]> {
        let bytes_per_row = SIZE * 4;
        let staging = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Test Target Readback"),
            size: (bytes_per_row * SIZE) as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(SIZE),
                },
            },
            wgpu::Extent3d {
                width: SIZE,
                height: SIZE,
                depth_or_array_layers: 1,
            },
        );
        gpu.queue.submit(std::iter::once(encoder.finish()));

        map_and_copy(gpu, &staging)
            .chunks_exact(4)
            .map(|p| [p[0], p[1], p[2], p[3]])
            .collect()
    }
}

fn config(strategy: RasterStrategy, depth_order: DepthOrder) -> RendererConfig {
    RendererConfig {
        strategy,
        depth_order,
        ..RendererConfig::default()
    }
}

fn assert_close(actual: u8, expected: f32) {
    let expected = (expected * 255.0).round();
    assert!(
        (actual as f32 - expected).abs() <= 6.0,
        "channel {actual} expected about {expected}"
    );
}

#[test]
fn single_centered_primitive() {
    let Some(gpu) = gpu() else { return };
    let color = Vec3::new(0.8, 0.2, 0.4);

    for strategy in [RasterStrategy::IndexDraw, RasterStrategy::QuadInstance] {
        let scene = Scene::new(
            &gpu,
            &[gaussian_at(Vec3::ZERO)],
            &[colored(color)],
            config(strategy, DepthOrder::BackToFront),
        );
        scene.frame(&gpu);

        assert_eq!(scene.visible_count(&gpu), 1, "{strategy:?}");
        assert_eq!(read_u32s(&gpu, scene.renderer.sorter().sorted_values(), 1), vec![0]);
        assert_eq!(scene.indirect(&gpu), vec![6, 1, 0, 0]);

        let pixels = scene.pixels(&gpu);
        let center = pixels[(SIZE / 2 * SIZE + SIZE / 2) as usize];
        // Peak alpha is capped at 0.99.
        assert_close(center[0], 0.99 * color.x);
        assert_close(center[1], 0.99 * color.y);
        assert_close(center[2], 0.99 * color.z);
        assert_eq!(pixels[0], [0, 0, 0, 255], "{strategy:?} corner");
    }
}

#[test]
fn front_to_back_composites_background_underneath() {
    let Some(gpu) = gpu() else { return };
    let color = Vec3::new(0.8, 0.2, 0.4);
    let scene = Scene::new(
        &gpu,
        &[gaussian_at(Vec3::ZERO)],
        &[colored(color)],
        RendererConfig {
            background: wgpu::Color::WHITE,
            ..config(RasterStrategy::IndexDraw, DepthOrder::FrontToBack)
        },
    );
    scene.frame(&gpu);
    assert_eq!(scene.visible_count(&gpu), 1);

    let pixels = scene.pixels(&gpu);
    let center = pixels[(SIZE / 2 * SIZE + SIZE / 2) as usize];
    // 0.99 of the splat over 0.01 of white.
    assert_close(center[0], 0.99 * color.x + 0.01);
    assert_close(center[1], 0.99 * color.y + 0.01);
    assert_close(center[2], 0.99 * color.z + 0.01);
    assert_eq!(center[3], 255);
    assert_eq!(pixels[0], [255, 255, 255, 255]);
}

#[test]
fn sorted_keys_follow_depth_order() {
    let Some(gpu) = gpu() else { return };
    // Depths 10, 5 and 1 from the camera, listed farthest first.
    let primitives = [
        gaussian_at(Vec3::new(0.0, 0.0, -5.0)),
        gaussian_at(Vec3::new(0.0, 0.0, 0.0)),
        gaussian_at(Vec3::new(0.0, 0.0, 4.0)),
    ];
    let sh = [colored(Vec3::splat(0.5)); 3];

    for (order, expected) in [
        (DepthOrder::BackToFront, [10.0, 5.0, 1.0]),
        (DepthOrder::FrontToBack, [1.0, 5.0, 10.0]),
    ] {
        let scene = Scene::new(&gpu, &primitives, &sh, config(RasterStrategy::IndexDraw, order));
        scene.frame(&gpu);
        assert_eq!(scene.visible_count(&gpu), 3);

        let sorter = scene.renderer.sorter();
        let keys = read_u32s(&gpu, sorter.keys_buffer(sorter.output_index()), 3);
        assert!(keys.windows(2).all(|w| w[0] <= w[1]), "{order:?}: {keys:?}");

        let depths: Vec<f32> = keys
            .iter()
            .map(|&key| match order {
                DepthOrder::BackToFront => f32::from_bits(!key),
                DepthOrder::FrontToBack => f32::from_bits(key),
            })
            .collect();
        for (depth, want) in depths.iter().zip(expected) {
            assert!((depth - want).abs() < 1e-3, "{order:?}: {depths:?}");
        }

        let mut values = read_u32s(&gpu, sorter.sorted_values(), 3);
        values.sort_unstable();
        assert_eq!(values, vec![0, 1, 2]);
    }
}

#[test]
fn empty_cloud_clears_to_background() {
    let Some(gpu) = gpu() else { return };
    let background = wgpu::Color {
        r: 0.0,
        g: 0.0,
        b: 1.0,
        a: 1.0,
    };

    for strategy in [RasterStrategy::IndexDraw, RasterStrategy::QuadInstance] {
        for order in [DepthOrder::BackToFront, DepthOrder::FrontToBack] {
            let scene = Scene::new(
                &gpu,
                &[],
                &[],
                RendererConfig {
                    background,
                    ..config(strategy, order)
                },
            );

            gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
            scene.frame(&gpu);
            let error = pollster::block_on(gpu.device.pop_error_scope());
            assert!(error.is_none(), "{strategy:?} {order:?}: {error:?}");

            assert_eq!(scene.visible_count(&gpu), 0);
            assert_eq!(scene.indirect(&gpu), vec![6, 0, 0, 0]);
            assert!(
                scene.pixels(&gpu).iter().all(|p| *p == [0, 0, 255, 255]),
                "{strategy:?} {order:?}"
            );
        }
    }
}

#[test]
fn cloud_upload_errors_come_back_as_values() {
    let Some(gpu) = gpu() else { return };

    gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
    let mismatch = pollster::block_on(PointCloud::new(
        &gpu.device,
        &[gaussian_at(Vec3::ZERO); 2],
        &[ShCoefficients::default()],
        0,
    ));
    assert!(matches!(
        mismatch,
        Err(RendererError::ShCountMismatch { primitives: 2, sh: 1 })
    ));

    let cloud = pollster::block_on(PointCloud::new(
        &gpu.device,
        &[gaussian_at(Vec3::ZERO)],
        &[ShCoefficients::default()],
        3,
    ))
    .unwrap();
    assert_eq!(cloud.num_primitives(), 1);
    assert_eq!(cloud.sh_degree(), 3);

    // The upload's own scopes leave nothing for an enclosing one.
    assert!(pollster::block_on(gpu.device.pop_error_scope()).is_none());
}

#[test]
fn reset_is_idempotent() {
    let Some(gpu) = gpu() else { return };
    let scene = Scene::new(
        &gpu,
        &[gaussian_at(Vec3::ZERO)],
        &[colored(Vec3::ONE)],
        RendererConfig::default(),
    );
    scene.frame(&gpu);
    assert_eq!(scene.visible_count(&gpu), 1);

    scene.encode(&gpu, &[FrameStage::Reset, FrameStage::Reset]);
    assert_eq!(scene.visible_count(&gpu), 0);
    assert_eq!(read_u32s(&gpu, scene.renderer.sorter().dispatch_buffer(), 1), vec![0]);

    scene.encode(&gpu, &[FrameStage::Preprocess]);
    assert_eq!(scene.visible_count(&gpu), 1);
}

#[test]
fn fixup_tracks_the_latest_count() {
    let Some(gpu) = gpu() else { return };
    let scene = Scene::new(
        &gpu,
        &[gaussian_at(Vec3::ZERO)],
        &[colored(Vec3::ONE)],
        RendererConfig::default(),
    );
    scene.frame(&gpu);
    assert_eq!(scene.indirect(&gpu), vec![6, 1, 0, 0]);

    // Turn around: the primitive is now behind the camera.
    scene.renderer.update_camera(
        &gpu.queue,
        &camera_looking_at(Vec3::new(0.0, 0.0, 5.0), Vec3::new(0.0, 0.0, 10.0)),
    );
    scene.frame(&gpu);
    assert_eq!(scene.visible_count(&gpu), 0);
    assert_eq!(scene.indirect(&gpu), vec![6, 0, 0, 0]);
}

#[test]
fn gpu_sort_matches_reference() {
    let Some(gpu) = gpu() else { return };
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let capacity = 5_000;
    // Not a multiple of the block size, and short of the capacity.
    let n = 4_321;

    let keys: Vec<u32> = (0..n).map(|_| rng.gen()).collect();
    let values: Vec<u32> = (0..n as u32).collect();

    let alloc = ResourceAllocator::new(&gpu.device);
    let sorter = RadixSorter::new(&gpu.device, &alloc, capacity).unwrap();
    assert_eq!(sorter.capacity(), capacity as u32);
    gpu.queue.write_buffer(sorter.keys_buffer(0), 0, bytemuck::cast_slice(&keys));
    gpu.queue.write_buffer(sorter.values_buffer(0), 0, bytemuck::cast_slice(&values));
    gpu.queue.write_buffer(
        sorter.sort_info_buffer(),
        0,
        bytemuck::bytes_of(&SortInfo {
            keys_size: n as u32,
            padded_size: (capacity as u32).next_multiple_of(256),
            passes: 4,
            even_pass: 1,
        }),
    );

    let mut encoder = gpu
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
    sorter.record_sort(&mut encoder);
    gpu.queue.submit(std::iter::once(encoder.finish()));

    let (want_keys, want_values) = reference::sort_pairs(&keys, &values);
    let out = sorter.output_index();
    assert_eq!(read_u32s(&gpu, sorter.keys_buffer(out), n), want_keys);
    assert_eq!(read_u32s(&gpu, sorter.values_buffer(out), n), want_values);
}

#[test]
fn visible_set_matches_reference() {
    let Some(gpu) = gpu() else { return };
    let mut rng = StdRng::seed_from_u64(42);

    // Every primitive is clearly inside or outside each cull test.
    let primitives: Vec<GaussianPrimitive> = (0..2_000)
        .map(|_| {
            let behind = rng.gen_bool(0.25);
            let z = if behind {
                rng.gen_range(6.0..10.0)
            } else {
                rng.gen_range(-2.0..2.0)
            };
            GaussianPrimitive {
                position: [rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), z],
                opacity: if rng.gen_bool(0.2) { -10.0 } else { 2.0 },
                rotation: [1.0, 0.0, 0.0, 0.0],
                scale: [rng.gen_range(-4.0..-2.0); 3],
                _pad: 0.0,
            }
        })
        .collect();
    let sh: Vec<ShCoefficients> = (0..primitives.len())
        .map(|_| colored(Vec3::new(rng.gen(), rng.gen(), rng.gen())))
        .collect();

    let expected = reference::preprocess(
        &primitives,
        &sh,
        &default_camera(),
        &RenderSettings::default(),
        DepthOrder::BackToFront,
    );
    assert!(expected.count() > 0 && (expected.count() as usize) < primitives.len());

    let scene = Scene::new(
        &gpu,
        &primitives,
        &sh,
        config(RasterStrategy::QuadInstance, DepthOrder::BackToFront),
    );
    scene.frame(&gpu);

    let m = expected.count() as usize;
    assert_eq!(scene.visible_count(&gpu), m as u32);

    let mut sorted = read_u32s(&gpu, scene.renderer.sorter().sorted_values(), m);
    sorted.sort_unstable();
    assert_eq!(sorted, (0..m as u32).collect::<Vec<_>>());

    let splat_bytes = read_bytes(
        &gpu,
        scene.renderer.splat_buffer(),
        (m * std::mem::size_of::<UnpackedSplat>()) as u64,
    );
    let gpu_centers: Vec<Vec2> = splat_bytes
        .chunks_exact(std::mem::size_of::<UnpackedSplat>())
        .map(|chunk| Vec2::from(bytemuck::pod_read_unaligned::<UnpackedSplat>(chunk).center))
        .collect();
    for splat in &expected.splats {
        let nearest = gpu_centers
            .iter()
            .map(|g| g.distance(splat.center))
            .fold(f32::INFINITY, f32::min);
        assert!(nearest < 1e-3, "no GPU splat near {}", splat.center);
    }
}
