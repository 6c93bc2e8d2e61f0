//! The DeepStream graph: camera, muxer, detector, overlay and display, plus
//! the encoder branch that feeds smart record.

mod build;
mod config;
pub mod element;
mod probe;
mod task;

pub use build::*;
pub use config::*;
pub use probe::*;
pub use task::*;
