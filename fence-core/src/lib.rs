pub mod annotate;
pub mod detection;
pub mod geometry;
pub mod pipeline;
pub mod runtime;
pub mod video;

// Re-export the top-level error type so callers only need `fence_core::Error`
pub use anyhow::Error;
pub use anyhow::Result;
