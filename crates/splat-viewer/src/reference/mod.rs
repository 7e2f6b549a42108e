//! CPU model of the splat frame.
//!
//! Mirrors the preprocess math, the block radix sort and the frame's counter
//! bookkeeping so their properties can be tested without a GPU, and so GPU
//! results can be compared against a known answer.

pub mod frame;
pub mod project;
pub mod radix;

pub use self::frame::FrameSimulator;
pub use self::project::{preprocess, project, PreprocessOutput, ProjectedSplat};
pub use self::radix::sort_pairs;
