//! Built-in processing nodes.
//!
//! These implement the `Node` trait directly and cover what an offline
//! render needs: a file player as the source, a reverb effect, a gain stage,
//! and the summing mixer that serves as the default sink.

pub mod gain;
pub mod mixer;
pub mod player;
pub mod reverb;

pub use gain::GainNode;
pub use mixer::MixerNode;
pub use player::{PlaybackState, PlayerNode};
pub use reverb::{ReverbConfig, ReverbNode, ReverbPreset};
