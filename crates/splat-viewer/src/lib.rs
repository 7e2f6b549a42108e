//! Gaussian splat viewer library.
//!
//! Renders 3D Gaussian splat clouds on the GPU: every frame projects the
//! gaussians to screen-space splats, radix sorts them by depth and blends
//! them with a single indirect draw.

pub mod app;
pub mod camera;
pub mod config;
pub mod data;
pub mod reference;
pub mod renderer;
pub mod ui;
