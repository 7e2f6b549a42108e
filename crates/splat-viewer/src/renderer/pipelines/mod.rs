//! GPU pipelines of the splat frame.

pub mod background;
pub mod index_draw;
pub mod preprocess;
pub mod quad_instance;
pub mod radix_sort;
