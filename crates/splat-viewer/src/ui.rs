//! The settings panel drawn over the splats.

use crate::data::types::RenderSettings;

/// Editable copy of the render settings plus what the panel displays.
#[derive(Debug, Clone)]
pub struct SettingsPanel {
    pub gaussian_scaling: f32,
    pub sh_degree: u32,
    max_sh_degree: u32,
}

/// Read-only figures shown under the controls.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameStats {
    pub num_primitives: u32,
    pub strategy: &'static str,
    pub frame_ms: f32,
}

impl SettingsPanel {
    pub fn new(settings: RenderSettings, max_sh_degree: u32) -> Self {
        Self {
            gaussian_scaling: settings.gaussian_scaling,
            sh_degree: settings.sh_degree.min(max_sh_degree),
            max_sh_degree,
        }
    }

    pub fn settings(&self) -> RenderSettings {
        RenderSettings::new(self.gaussian_scaling, self.sh_degree.min(self.max_sh_degree))
    }

    /// Draws the panel and returns `true` when a setting was edited.
    pub fn show(&mut self, ctx: &egui::Context, stats: &FrameStats) -> bool {
        let mut changed = false;

        egui::Window::new("Splats")
            .default_pos([12.0, 12.0])
            .resizable(false)
            .show(ctx, |ui| {
                changed |= ui
                    .add(
                        egui::Slider::new(&mut self.gaussian_scaling, 0.05..=4.0)
                            .logarithmic(true)
                            .text("scaling"),
                    )
                    .changed();
                changed |= ui
                    .add_enabled(
                        self.max_sh_degree > 0,
                        egui::Slider::new(&mut self.sh_degree, 0..=self.max_sh_degree)
                            .text("SH degree"),
                    )
                    .changed();

                ui.separator();
                ui.label(format!("{} gaussians", stats.num_primitives));
                ui.label(format!("raster: {}", stats.strategy));
                ui.label(format!("{:.2} ms", stats.frame_ms));
            });

        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sh_degree_is_capped_by_the_cloud() {
        let mut panel = SettingsPanel::new(RenderSettings::new(1.5, 3), 1);
        assert_eq!(panel.sh_degree, 1);

        panel.sh_degree = 3;
        let settings = panel.settings();
        assert_eq!(settings.sh_degree, 1);
        assert_eq!(settings.gaussian_scaling, 1.5);
    }
}
