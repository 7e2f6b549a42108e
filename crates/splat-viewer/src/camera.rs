use crate::data::{point_cloud::Aabb, types::CameraUniform};
use glam::{Mat4, Vec2, Vec3};
use winit::event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent};

const MIN_RADIUS: f32 = 0.05;
const MAX_RADIUS: f32 = 10_000.0;

/// Y-up orbit camera. Produces a right-handed view looking down -Z and a
/// `[0, 1]`-depth projection, as the splat shaders expect.
#[derive(Debug, Clone)]
pub struct OrbitCamera {
    /// The point the camera orbits around.
    pub target: Vec3,
    /// Distance from the camera to the target.
    pub radius: f32,
    /// Rotation around the world Y axis (radians).
    pub azimuth_rad: f32,
    /// Angle above the XZ plane (radians).
    pub elevation_rad: f32,

    pub fovy_rad: f32,
    pub aspect: f32,
    pub znear: f32,
    pub zfar: f32,
}

impl OrbitCamera {
    pub fn new(target: Vec3, radius: f32, aspect: f32) -> Self {
        Self {
            target,
            radius,
            azimuth_rad: 0.0,
            elevation_rad: 0.0,
            fovy_rad: 60f32.to_radians(),
            aspect,
            znear: 0.1,
            zfar: 1_000.0,
        }
    }

    /// Centers the orbit on `bounds` at a distance that keeps it in view.
    pub fn frame_bounds(&mut self, bounds: &Aabb) {
        if bounds.is_empty() {
            return;
        }
        self.target = bounds.center();
        self.radius = (bounds.radius() * 2.0).clamp(1.0, MAX_RADIUS);
        self.zfar = self.zfar.max(self.radius * 4.0);
    }

    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.aspect = width as f32 / height.max(1) as f32;
    }

    pub fn position(&self) -> Vec3 {
        let (sin_az, cos_az) = self.azimuth_rad.sin_cos();
        let (sin_el, cos_el) = self.elevation_rad.sin_cos();
        self.target + self.radius * Vec3::new(cos_el * sin_az, sin_el, cos_el * cos_az)
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.position(), self.target, Vec3::Y)
    }

    pub fn proj(&self) -> Mat4 {
        Mat4::perspective_rh(self.fovy_rad, self.aspect, self.znear, self.zfar)
    }

    pub fn uniform(&self, viewport: Vec2) -> CameraUniform {
        CameraUniform::new(self.view(), self.proj(), viewport)
    }
}

#[derive(Default)]
pub struct CameraController {
    mouse_down: bool,
    last_mouse: Option<(f64, f64)>,
}

impl CameraController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles window events and updates the camera.
    pub fn handle_event(&mut self, event: &WindowEvent, camera: &mut OrbitCamera) {
        match event {
            WindowEvent::MouseInput { button, state, .. } => {
                if *button == MouseButton::Left {
                    self.mouse_down = *state == ElementState::Pressed;
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.handle_cursor_orbit((position.x, position.y), camera);
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let scroll = match delta {
                    MouseScrollDelta::LineDelta(_, y) => *y,
                    MouseScrollDelta::PixelDelta(pos) => pos.y as f32 / 120.0,
                };
                self.handle_scroll(scroll, camera);
            }
            _ => {}
        }
    }

    /// Positive delta zooms in.
    fn handle_scroll(&mut self, delta: f32, camera: &mut OrbitCamera) {
        camera.radius = (camera.radius * 1.1f32.powf(-delta)).clamp(MIN_RADIUS, MAX_RADIUS);
    }

    /// Rotates the camera around the target while the left mouse button is held.
    fn handle_cursor_orbit(&mut self, xy: (f64, f64), camera: &mut OrbitCamera) {
        if let Some(last) = self.last_mouse {
            if self.mouse_down {
                let dx = ((xy.0 - last.0) * 0.005) as f32;
                let dy = ((xy.1 - last.1) * 0.005) as f32;

                camera.azimuth_rad -= dx;
                // Stay short of the poles so look_at keeps a valid up vector.
                camera.elevation_rad =
                    (camera.elevation_rad + dy).clamp(-89f32.to_radians(), 89f32.to_radians());
            }
        }
        self.last_mouse = Some(xy);
    }
}
