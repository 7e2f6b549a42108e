use crate::renderer::{DepthOrder, RasterStrategy, RendererConfig};
use clap::Parser;
use std::path::PathBuf;

/// `splat_viewer` - interactive viewer for 3D Gaussian splat scenes.
///
/// Loads a standard 3DGS `.ply` file, uploads it to the GPU and renders it
/// every frame through preprocess, radix sort and an indirect draw.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Path to the `.ply` scene to load.
    #[arg(env = "SPLAT_PLY")]
    pub ply: PathBuf,

    /// How sorted splats are rasterized.
    #[arg(long, value_enum, default_value_t = RasterStrategy::IndexDraw)]
    pub strategy: RasterStrategy,

    /// Compositing order of the sorted splats.
    #[arg(long, value_enum, default_value_t = DepthOrder::BackToFront)]
    pub depth_order: DepthOrder,

    /// Multiplier applied to every gaussian's scale.
    #[arg(long, default_value_t = 1.0)]
    pub gaussian_scaling: f32,

    /// Caps the SH degree evaluated per splat. Defaults to the file's degree.
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=3))]
    pub sh_degree: Option<u32>,

    /// Background color as `RRGGBB` hex.
    #[arg(long, default_value = "000000", value_parser = parse_hex_color)]
    pub background: [f64; 3],

    #[arg(long, default_value_t = 1280)]
    pub width: u32,

    #[arg(long, default_value_t = 720)]
    pub height: u32,
}

impl Config {
    pub fn renderer_config(&self) -> RendererConfig {
        let [r, g, b] = self.background;
        RendererConfig {
            strategy: self.strategy,
            depth_order: self.depth_order,
            background: wgpu::Color { r, g, b, a: 1.0 },
            gaussian_scaling: self.gaussian_scaling,
        }
    }
}

fn parse_hex_color(s: &str) -> Result<[f64; 3], String> {
    let hex = s.trim_start_matches('#');
    if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(format!("expected six hex digits, got '{s}'"));
    }
    let channel = |i: usize| {
        u8::from_str_radix(&hex[i..i + 2], 16)
            .map(|v| v as f64 / 255.0)
            .map_err(|e| format!("invalid color '{s}': {e}"))
    };
    Ok([channel(0)?, channel(2)?, channel(4)?])
}
