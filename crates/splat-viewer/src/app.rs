use crate::{
    camera::{CameraController, OrbitCamera},
    config::Config,
    data::{types::RenderSettings, PointCloud},
    renderer::{context::GfxContext, GaussianRenderer},
    ui::{FrameStats, SettingsPanel},
};
use anyhow::{Context, Result};
use glam::{Vec2, Vec3};
use std::{sync::Arc, time::Instant};
use winit::{event::WindowEvent, window::Window};

pub struct App {
    pub gfx: GfxContext,
    pub renderer: GaussianRenderer,
    pub cloud: PointCloud,
    pub camera: OrbitCamera,
    pub camera_controller: CameraController,
    pub egui_ctx: egui::Context,
    pub egui_state: egui_winit::State,
    pub egui_renderer: egui_wgpu::Renderer,
    pub panel: SettingsPanel,
    stats: FrameStats,
    last_frame: Instant,
}

impl App {
    pub async fn new(window: Arc<Window>, config: &Config) -> Result<Self> {
        let gfx = GfxContext::new(window.clone()).await?;

        let cloud = PointCloud::load(&gfx.device, &config.ply).await?;
        let mut renderer = GaussianRenderer::new(
            &gfx.device,
            gfx.config.format,
            &cloud,
            config.renderer_config(),
        )
        .await
        .context("building the gaussian renderer")?;

        let panel = SettingsPanel::new(
            RenderSettings::new(
                config.gaussian_scaling,
                config.sh_degree.unwrap_or(cloud.sh_degree()),
            ),
            cloud.sh_degree(),
        );
        renderer.update_settings(&gfx.queue, panel.settings());

        let mut camera = OrbitCamera::new(
            Vec3::ZERO,
            5.0,
            gfx.size.width as f32 / gfx.size.height.max(1) as f32,
        );
        camera.frame_bounds(&cloud.bounds());
        log::info!(
            "orbiting {:?} at radius {:.2}",
            camera.target,
            camera.radius
        );

        let egui_ctx = egui::Context::default();
        let egui_state = egui_winit::State::new(
            egui_ctx.clone(),
            egui_ctx.viewport_id(),
            &*window,
            None,
            None,
        );
        let egui_renderer = egui_wgpu::Renderer::new(&gfx.device, gfx.config.format, None, 1);

        let stats = FrameStats {
            num_primitives: renderer.num_primitives(),
            strategy: renderer.config().strategy.label(),
            frame_ms: 0.0,
        };

        Ok(Self {
            gfx,
            renderer,
            cloud,
            camera,
            camera_controller: CameraController::new(),
            egui_ctx,
            egui_state,
            egui_renderer,
            panel,
            stats,
            last_frame: Instant::now(),
        })
    }

    pub fn resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.gfx.resize(new_size);
            self.camera.set_viewport(new_size.width, new_size.height);
        }
    }

    pub fn handle_event(&mut self, window: &Window, event: &WindowEvent) -> bool {
        let response = self.egui_state.on_window_event(window, event);
        if response.consumed {
            return true;
        }

        self.camera_controller.handle_event(event, &mut self.camera);

        if let WindowEvent::Resized(physical_size) = event {
            self.resize(*physical_size);
        }

        false
    }

    pub fn render(&mut self, window: &Window) -> Result<(), wgpu::SurfaceError> {
        let now = Instant::now();
        self.stats.frame_ms = now.duration_since(self.last_frame).as_secs_f32() * 1000.0;
        self.last_frame = now;

        let frame = self.gfx.surface.get_current_texture()?;
        let swap_view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let viewport = Vec2::new(self.gfx.config.width as f32, self.gfx.config.height as f32);
        self.renderer
            .update_camera(&self.gfx.queue, &self.camera.uniform(viewport));

        let egui_input = self.egui_state.take_egui_input(window);
        self.egui_ctx.begin_frame(egui_input);
        if self.panel.show(&self.egui_ctx, &self.stats) {
            self.renderer
                .update_settings(&self.gfx.queue, self.panel.settings());
        }
        let egui_output = self.egui_ctx.end_frame();
        self.egui_state
            .handle_platform_output(window, egui_output.platform_output);

        let shapes = self
            .egui_ctx
            .tessellate(egui_output.shapes, self.egui_ctx.pixels_per_point());
        let screen_descriptor = egui_wgpu::ScreenDescriptor {
            size_in_pixels: [self.gfx.config.width, self.gfx.config.height],
            pixels_per_point: self.egui_ctx.pixels_per_point(),
        };

        let mut encoder = self
            .gfx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });

        self.renderer.frame(&mut encoder, &swap_view);

        for (id, delta) in &egui_output.textures_delta.set {
            self.egui_renderer
                .update_texture(&self.gfx.device, &self.gfx.queue, *id, delta);
        }
        self.egui_renderer.update_buffers(
            &self.gfx.device,
            &self.gfx.queue,
            &mut encoder,
            &shapes,
            &screen_descriptor,
        );

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("EGUI Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &swap_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            self.egui_renderer
                .render(&mut render_pass, &shapes, &screen_descriptor);
        }

        for id in &egui_output.textures_delta.free {
            self.egui_renderer.free_texture(id);
        }

        self.gfx.queue.submit(std::iter::once(encoder.finish()));
        frame.present();

        Ok(())
    }
}
