//! Core types shared across the offgraph crates.
//!
//! This crate provides the sample/frame vocabulary, the `AudioFormat` every
//! connection carries, the reusable `SampleBuffer`, and the common error type.

pub mod buffer;
pub mod format;

pub use buffer::SampleBuffer;
pub use format::{AudioFormat, SampleLayout};

use std::path::PathBuf;

/// Sample rate in Hz
pub type SampleRate = u32;

/// Number of audio frames (samples per channel)
pub type Frames = usize;

/// Audio sample type (32-bit float throughout the graph)
pub type Sample = f32;

/// Number of audio channels
pub type ChannelCount = usize;

/// Common sample rates
pub mod sample_rates {
    use super::SampleRate;

    /// 44.1 kHz sample rate (CD quality)
    pub const SR_44100: SampleRate = 44100;
    /// 48 kHz sample rate (professional audio standard)
    pub const SR_48000: SampleRate = 48000;
    /// 96 kHz sample rate (high resolution audio)
    pub const SR_96000: SampleRate = 96000;
}

/// Render quantum sizes (maximum frames per pull)
pub mod quantum_sizes {
    use super::Frames;

    /// 512 frames per pull
    pub const QUANTUM_512: Frames = 512;
    /// 1024 frames per pull
    pub const QUANTUM_1024: Frames = 1024;
    /// 4096 frames per pull (the usual offline choice)
    pub const QUANTUM_4096: Frames = 4096;
}

/// Common error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The source file is missing or its codec is unsupported
    #[error("Unreadable audio file {}: {reason}", path.display())]
    UnreadableFile { path: PathBuf, reason: String },

    /// The destination could not be created
    #[error("Unwritable destination {}: {reason}", path.display())]
    UnwritableDestination { path: PathBuf, reason: String },

    /// Two ends of a connection disagree on format
    #[error("Format mismatch: expected {expected}, found {found}")]
    FormatMismatch {
        expected: AudioFormat,
        found: AudioFormat,
    },

    /// The format cannot drive a graph (zero rate or channels, unsupported encoding)
    #[error("Unsupported format: {0}")]
    FormatUnsupported(String),

    /// Connecting `from` to `to` would close a loop
    #[error("Connecting node {from} to node {to} would create a cycle")]
    CycleDetected { from: usize, to: usize },

    /// The node id was never attached (or was detached)
    #[error("Unknown node {0}")]
    UnknownNode(usize),

    /// A node reachable from the sink has an empty input slot
    #[error("Sink input chain is disconnected: node {node} has no input on slot {slot}")]
    DisconnectedSink { node: usize, slot: usize },

    /// No node has been designated as the sink
    #[error("No sink node designated")]
    MissingSink,

    /// The input slot does not exist or is already connected
    #[error("Input slot {slot} of node {node} is not available")]
    SlotUnavailable { node: usize, slot: usize },

    /// `enable_offline_mode` was called twice
    #[error("Engine is already configured")]
    AlreadyConfigured,

    /// The engine has not been configured for offline rendering
    #[error("Engine is not configured")]
    NotConfigured,

    /// The engine is not running
    #[error("Engine is not running")]
    NotRunning,

    /// The graph cannot change while the engine runs
    #[error("Engine is running")]
    EngineRunning,

    /// A maximum frame count of zero was requested
    #[error("Invalid maximum frame count: {0}")]
    InvalidMaxFrames(Frames),

    /// More frames than the buffer can hold
    #[error("Buffer capacity exceeded: {requested} frames requested, capacity is {capacity}")]
    CapacityExceeded { requested: Frames, capacity: Frames },

    /// The source is unbounded
    #[error("Source length is unknown")]
    UnknownLength,

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Fatal render failure
    #[error("Render error: {0}")]
    Render(String),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_rates() {
        assert_eq!(sample_rates::SR_48000, 48000);
    }

    #[test]
    fn test_error_messages_name_the_culprit() {
        let err = Error::CycleDetected { from: 3, to: 1 };
        assert_eq!(
            err.to_string(),
            "Connecting node 3 to node 1 would create a cycle"
        );

        let err = Error::UnreadableFile {
            path: PathBuf::from("/nope.wav"),
            reason: "No such file".to_string(),
        };
        assert!(err.to_string().contains("/nope.wav"));
    }
}
