//! Offline render engine and processing graph.
//!
//! This crate provides the pull-based audio graph, the offline engine that
//! drives it faster than real time, file readers/writers, the built-in nodes
//! and the render loop that ties a source to a destination.

pub mod builtin;
pub mod engine;
pub mod file;
pub mod graph;
pub mod io;
pub mod render;
pub mod session;

pub use engine::OfflineEngine;
pub use graph::{AudioGraph, NodeId};
pub use io::{AudioSink, AudioSource};
pub use render::{RenderOptions, RenderReport, RenderSession, TailPolicy};
pub use session::Session;

use offgraph_core::{AudioFormat, Frames, quantum_sizes};

/// Offline rendering configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfflineConfig {
    /// Format of the engine's output buffer (and of the sink node)
    pub format: AudioFormat,
    /// Largest number of frames rendered per pull
    pub max_frames: Frames,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            format: AudioFormat::default(),
            max_frames: quantum_sizes::QUANTUM_4096,
        }
    }
}
