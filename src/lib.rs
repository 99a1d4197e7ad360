//! Image guided tracking pipeline: tracking device abstractions with an
//! OpenIGTLink network client, tool storage handling, pipeline configuration
//! and an image filter chain with asynchronous foreground segmentation.

pub mod device;
pub mod error;
pub mod filters;
pub mod igtl;
pub mod logging;
pub mod navigation;
pub mod pipeline;
