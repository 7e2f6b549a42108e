//! WGSL sources and their composition into complete modules.

use super::strategy::{RasterStrategy, SplatLayout};
use super::DepthOrder;

pub const COMMON: &str = include_str!("../../shaders/common.wgsl");
pub const SPLAT_PACKED: &str = include_str!("../../shaders/splat_packed.wgsl");
pub const SPLAT_UNPACKED: &str = include_str!("../../shaders/splat_unpacked.wgsl");
pub const PREPROCESS: &str = include_str!("../../shaders/preprocess.wgsl");
pub const SORT: &str = include_str!("../../shaders/sort.wgsl");
pub const SORT_DISPATCH: &str = include_str!("../../shaders/sort_dispatch.wgsl");
pub const SPLAT_RASTER: &str = include_str!("../../shaders/splat_raster.wgsl");
pub const RENDER_INDEX: &str = include_str!("../../shaders/render_index.wgsl");
pub const RENDER_QUAD: &str = include_str!("../../shaders/render_quad.wgsl");
pub const BACKGROUND: &str = include_str!("../../shaders/background.wgsl");

/// Compile-time switches injected ahead of every composed module.
pub fn header(order: DepthOrder) -> String {
    format!(
        "const BACK_TO_FRONT: bool = {};\n",
        order == DepthOrder::BackToFront
    )
}

fn layout_source(layout: SplatLayout) -> &'static str {
    match layout {
        SplatLayout::Packed => SPLAT_PACKED,
        SplatLayout::Unpacked => SPLAT_UNPACKED,
    }
}

fn compose(parts: &[&str]) -> String {
    parts.join("\n")
}

pub fn preprocess_source(layout: SplatLayout, order: DepthOrder) -> String {
    compose(&[&header(order), COMMON, layout_source(layout), PREPROCESS])
}

pub fn render_source(strategy: RasterStrategy, order: DepthOrder) -> String {
    let body = match strategy {
        RasterStrategy::IndexDraw => RENDER_INDEX,
        RasterStrategy::QuadInstance => RENDER_QUAD,
    };
    compose(&[
        &header(order),
        COMMON,
        layout_source(strategy.splat_layout()),
        SPLAT_RASTER,
        body,
    ])
}

pub fn background_source(color: wgpu::Color) -> String {
    let c = [color.r, color.g, color.b, color.a].map(|v| v.clamp(0.0, 1.0) as f32);
    format!(
        "const BACKGROUND: vec4<f32> = vec4<f32>({:?}, {:?}, {:?}, {:?});\n{}",
        c[0], c[1], c[2], c[3], BACKGROUND
    )
}

pub fn create_module(device: &wgpu::Device, label: &str, source: String) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    })
}
