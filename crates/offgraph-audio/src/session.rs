//! Session file format for saving/loading render setups.
//!
//! Uses RON (Rust Object Notation) for human-readable, version-control-friendly
//! serialization of the node graph, its connections, the designated sink and
//! the render settings.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use offgraph_core::{AudioFormat, Error, Frames, quantum_sizes};
use offgraph_node::Node;

use crate::builtin::reverb::DEFAULT_MAX_TAIL_SECONDS;
use crate::builtin::{GainNode, MixerNode, PlayerNode, ReverbConfig, ReverbNode, ReverbPreset};
use crate::engine::OfflineEngine;
use crate::file::{AudioFileReader, FileSettings};
use crate::render::{RenderOptions, TailPolicy};

/// Current session format version
pub const SESSION_VERSION: u32 = 1;

fn default_max_tail_seconds() -> f32 {
    DEFAULT_MAX_TAIL_SECONDS
}

/// Specification for how to instantiate a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeSpec {
    /// File player reading a WAV file
    Player {
        path: PathBuf,

        /// Engine sample time of the first frame (0 when absent)
        #[serde(default)]
        start_offset: Option<u64>,
    },
    /// Reverb effect
    Reverb {
        preset: ReverbPreset,

        /// Percentage of processed signal, 0 to 100
        wet_dry_mix: f32,

        #[serde(default = "default_max_tail_seconds")]
        max_tail_seconds: f32,
    },
    /// Linear gain stage
    Gain { gain: f32 },
    /// Summing mixer with `inputs` input slots
    Mixer { inputs: usize },
}

/// A node in the session graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionNode {
    /// Unique node ID within this session
    pub id: usize,

    pub node: NodeSpec,
}

/// Connection between two nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionConnection {
    /// Source node ID
    pub from: usize,

    /// Destination node ID
    pub to: usize,

    /// Destination input slot (next free slot when absent)
    #[serde(default)]
    pub slot: Option<usize>,
}

/// The node graph structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionGraph {
    /// All nodes in the graph
    pub nodes: Vec<SessionNode>,

    /// Connections between nodes
    pub connections: Vec<SessionConnection>,

    /// Node whose output is rendered
    pub sink: usize,
}

/// Top-level session structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Format version for future compatibility
    pub version: u32,

    /// Human-readable session name
    pub name: String,

    /// Largest number of frames per pull
    pub max_frames: Frames,

    /// What to render after the source ends
    #[serde(default)]
    pub tail: TailPolicy,

    /// The node graph
    pub graph: SessionGraph,
}

/// A session turned into a configured (not yet started) engine
pub struct BuiltSession {
    pub engine: OfflineEngine,
    /// Format of every connection, taken from the first player's file
    pub format: AudioFormat,
    /// Encoding of the first player's file, reused for the output
    pub settings: FileSettings,
    /// Latest player end time
    pub source_frames: u64,
    pub options: RenderOptions,
}

impl Session {
    /// Create a new empty session
    #[must_use]
    pub fn new(name: impl Into<String>, max_frames: Frames) -> Self {
        Self {
            version: SESSION_VERSION,
            name: name.into(),
            max_frames,
            tail: TailPolicy::default(),
            graph: SessionGraph {
                nodes: Vec::new(),
                connections: Vec::new(),
                sink: 0,
            },
        }
    }

    /// Player -> reverb -> mixer, with the mixer as sink
    #[must_use]
    pub fn reverb_chain(
        input: impl Into<PathBuf>,
        preset: ReverbPreset,
        wet_dry_mix: f32,
        max_frames: Frames,
    ) -> Self {
        let mut session = Self::new("reverb", max_frames);
        session.graph.nodes = vec![
            SessionNode {
                id: 0,
                node: NodeSpec::Player {
                    path: input.into(),
                    start_offset: None,
                },
            },
            SessionNode {
                id: 1,
                node: NodeSpec::Reverb {
                    preset,
                    wet_dry_mix,
                    max_tail_seconds: DEFAULT_MAX_TAIL_SECONDS,
                },
            },
            SessionNode {
                id: 2,
                node: NodeSpec::Mixer { inputs: 1 },
            },
        ];
        session.graph.connections = vec![
            SessionConnection {
                from: 0,
                to: 1,
                slot: None,
            },
            SessionConnection {
                from: 1,
                to: 2,
                slot: None,
            },
        ];
        session.graph.sink = 2;
        session
    }

    /// Set the render tail, bounding every reverb's own tail the same way
    pub fn set_tail(&mut self, tail: TailPolicy) {
        self.tail = tail;
        let TailPolicy::Render { max_seconds } = tail else {
            return;
        };
        for session_node in &mut self.graph.nodes {
            if let NodeSpec::Reverb {
                max_tail_seconds, ..
            } = &mut session_node.node
            {
                *max_tail_seconds = max_seconds as f32;
            }
        }
    }

    /// Reject numeric fields no render can use
    fn check_values(&self) -> Result<(), SessionError> {
        if self.max_frames == 0 {
            return Err(SessionError::InvalidData(
                "max_frames must be at least 1".to_string(),
            ));
        }
        if !self.tail.is_valid() {
            return Err(SessionError::InvalidData(format!(
                "tail bound must be a finite, non-negative number of seconds: {:?}",
                self.tail
            )));
        }

        for session_node in &self.graph.nodes {
            let valid = match session_node.node {
                NodeSpec::Reverb {
                    wet_dry_mix,
                    max_tail_seconds,
                    ..
                } => wet_dry_mix.is_finite() && max_tail_seconds >= 0.0,
                NodeSpec::Gain { gain } => gain.is_finite(),
                NodeSpec::Player { .. } | NodeSpec::Mixer { .. } => true,
            };
            if !valid {
                return Err(SessionError::InvalidData(format!(
                    "node {} has an out-of-range parameter: {:?}",
                    session_node.id, session_node.node
                )));
            }
        }
        Ok(())
    }

    /// Save session to a RON file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be written or serialization fails
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| SessionError::SerializationFailed(e.to_string()))?;

        std::fs::write(path.as_ref(), ron_string)
            .map_err(|e| SessionError::IoError(e.to_string()))?;

        tracing::debug!("Saved session '{}' to {}", self.name, path.as_ref().display());
        Ok(())
    }

    /// Load session from a RON file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read, deserialization fails, the
    /// version is newer than this build understands or a numeric field is
    /// out of range
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let ron_string = std::fs::read_to_string(path.as_ref())
            .map_err(|e| SessionError::IoError(e.to_string()))?;

        let session: Self = ron::from_str(&ron_string)
            .map_err(|e| SessionError::DeserializationFailed(e.to_string()))?;

        if session.version > SESSION_VERSION {
            return Err(SessionError::UnsupportedVersion(session.version));
        }
        session.check_values()?;

        tracing::debug!(
            "Loaded session '{}' ({} nodes)",
            session.name,
            session.graph.nodes.len()
        );
        Ok(session)
    }

    /// Open every player's file and wire the graph into a configured engine.
    ///
    /// All connections carry the first player's format; offline mode is
    /// enabled at that format with this session's `max_frames`.
    ///
    /// # Errors
    ///
    /// Returns error if a numeric field is out of range, a file cannot be
    /// opened, players disagree on format, the session references unknown or
    /// duplicate node ids, or the graph rejects a connection
    pub fn build(&self) -> Result<BuiltSession, SessionError> {
        self.check_values()?;

        let mut source: Option<(AudioFormat, FileSettings)> = None;
        let mut source_frames = 0;
        let mut nodes: Vec<(usize, Box<dyn Node>)> = Vec::with_capacity(self.graph.nodes.len());

        for session_node in &self.graph.nodes {
            let node: Box<dyn Node> = match &session_node.node {
                NodeSpec::Player { path, start_offset } => {
                    let (reader, format) = AudioFileReader::open(path)?;
                    match source {
                        None => source = Some((format, reader.settings())),
                        Some((expected, _)) if expected != format => {
                            return Err(Error::FormatMismatch {
                                expected,
                                found: format,
                            }
                            .into());
                        }
                        Some(_) => {}
                    }

                    let mut player = PlayerNode::new();
                    player.schedule_file(reader, *start_offset);
                    source_frames = source_frames.max(player.end_time().ok_or(Error::UnknownLength)?);
                    Box::new(player)
                }
                NodeSpec::Reverb {
                    preset,
                    wet_dry_mix,
                    max_tail_seconds,
                } => Box::new(ReverbNode::new(ReverbConfig {
                    preset: *preset,
                    wet_dry_mix: *wet_dry_mix,
                    max_tail_seconds: *max_tail_seconds,
                })),
                NodeSpec::Gain { gain } => Box::new(GainNode::new(*gain)),
                NodeSpec::Mixer { inputs } => Box::new(MixerNode::new(*inputs)),
            };
            nodes.push((session_node.id, node));
        }

        let (format, settings) = source
            .ok_or_else(|| SessionError::InvalidData("session has no player node".to_string()))?;

        let mut engine = OfflineEngine::new();
        let mut node_id_map = HashMap::new(); // Session ID -> Graph ID
        for (session_id, node) in nodes {
            let graph_id = engine.attach(node)?;
            if node_id_map.insert(session_id, graph_id).is_some() {
                return Err(SessionError::InvalidData(format!(
                    "Duplicate node id {session_id}"
                )));
            }
        }
        let lookup = |id: usize, role: &str| {
            node_id_map.get(&id).copied().ok_or_else(|| {
                SessionError::InvalidData(format!("{role} references unknown node {id}"))
            })
        };

        for connection in &self.graph.connections {
            let from = lookup(connection.from, "Connection")?;
            let to = lookup(connection.to, "Connection")?;
            match connection.slot {
                Some(slot) => engine.graph_mut()?.connect_to_slot(from, to, slot, format)?,
                None => engine.connect(from, to, format)?,
            }
        }

        let sink = lookup(self.graph.sink, "Sink")?;
        engine.graph_mut()?.set_sink(sink)?;
        engine.enable_offline_mode(format, self.max_frames)?;

        tracing::info!(
            "Built session '{}': {} nodes, {} frames of source at {}",
            self.name,
            node_id_map.len(),
            source_frames,
            format
        );

        Ok(BuiltSession {
            engine,
            format,
            settings,
            source_frames,
            options: RenderOptions {
                tail: self.tail,
                ..RenderOptions::default()
            },
        })
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new("untitled", quantum_sizes::QUANTUM_4096)
    }
}

/// Errors that can occur during session operations
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    #[error("Unsupported session version: {0}")]
    UnsupportedVersion(u32),

    #[error("Invalid session data: {0}")]
    InvalidData(String),

    #[error(transparent)]
    Engine(#[from] Error),
}
