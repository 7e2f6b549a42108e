//! Data handling modules for the splat viewer.
//!
//! This module provides functionality for:
//! - Packing loaded PLY records into GPU layouts and uploading them.
//! - Defining the data structures shared with the shaders.

pub mod point_cloud;
pub mod types;

// Re-export commonly used types for convenience.
pub use self::point_cloud::PointCloud;
pub use self::types::{
    CameraUniform, DispatchIndirectArgs, DrawIndirectArgs, GaussianPrimitive, RenderSettings,
    ShCoefficients, SortInfo,
};
