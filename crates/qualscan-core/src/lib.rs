//! qualscan-core: Core types for image/video quality diagnosis
//!
//! - Frame: owned decoded raster handed to detectors as a read-only view
//! - Finding/Verdict: one detector's output and the per-input rollups
//! - Profile: named threshold vectors (strict/normal/loose) with overrides
//! - Task/Execution: persisted scheduler records
//! - Error taxonomy shared by every crate in the workspace

pub mod config;
pub mod error;
pub mod frame;
pub mod limits;
pub mod profile;
pub mod synth;
pub mod task;
pub mod types;

pub use self::error::*;
pub use self::frame::*;
pub use self::types::*;
