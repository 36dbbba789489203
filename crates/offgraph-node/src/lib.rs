//! Processing node abstraction.
//!
//! This crate defines the `Node` trait that every unit in the render graph
//! implements (players, effects, mixers), together with the buffers a node
//! is handed per pull and the status it reports back.

use offgraph_core::{AudioFormat, Frames, SampleBuffer};

/// Buffers and timing for one pull
pub struct ProcessBuffers<'a> {
    /// Output buffers of the connected upstream nodes, in slot order
    pub inputs: &'a [&'a SampleBuffer],
    /// Buffer this node renders into (cleared before the call)
    pub output: &'a mut SampleBuffer,
    /// Number of frames requested
    pub frames: Frames,
    /// Engine sample time of the first requested frame
    pub sample_time: u64,
    /// True once every upstream node has reported `Drained`
    pub inputs_drained: bool,
}

impl ProcessBuffers<'_> {
    /// Mark the requested frames of the output as populated
    pub fn prepare_output(&mut self) -> Result<(), NodeError> {
        self.output
            .set_frame_length(self.frames)
            .map_err(|e| NodeError::ProcessingFailed(e.to_string()))
    }
}

/// Outcome of a single pull.
///
/// `Success` and `Drained` carry data in the output buffer. The two retryable
/// statuses mean nothing was rendered and the same pull should be repeated.
#[derive(Debug)]
pub enum RenderStatus {
    /// Output buffer holds the requested frames
    Success,
    /// Output buffer holds the requested frames and nothing but silence follows
    Drained,
    /// An upstream input had no data available for this pull
    InsufficientUpstreamData,
    /// The node could not render in the current call
    CannotRenderInCurrentContext,
    /// Fatal failure
    Error(NodeError),
}

impl RenderStatus {
    /// True for `Success` and `Drained`
    #[must_use]
    pub const fn has_data(&self) -> bool {
        matches!(self, Self::Success | Self::Drained)
    }

    /// True for the statuses that ask for the same pull to be repeated
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InsufficientUpstreamData | Self::CannotRenderInCurrentContext
        )
    }
}

impl From<NodeError> for RenderStatus {
    fn from(error: NodeError) -> Self {
        Self::Error(error)
    }
}

/// Information about a parameter
#[derive(Debug, Clone)]
pub struct ParameterInfo {
    pub id: u32,
    pub name: String,
    pub min_value: f32,
    pub max_value: f32,
    pub default_value: f32,
}

/// Node metadata
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub name: String,
    pub unique_id: String,
}

impl NodeInfo {
    #[must_use]
    pub fn new(name: impl Into<String>, unique_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unique_id: unique_id.into(),
        }
    }
}

/// Trait implemented by every processing node
pub trait Node: Send {
    /// Get node information
    fn info(&self) -> &NodeInfo;

    /// Number of input connection slots
    fn input_slots(&self) -> usize;

    /// Format the node produces on its own, if it is fixed (e.g. a file player).
    ///
    /// Nodes returning `None` adopt the format of their connections.
    fn output_format(&self) -> Option<AudioFormat> {
        None
    }

    /// Prepare for rendering at `format` with pulls of at most `max_frames`
    fn initialize(&mut self, format: AudioFormat, max_frames: Frames) -> Result<(), NodeError>;

    /// Render `buffers.frames` frames into `buffers.output`
    fn process(&mut self, buffers: &mut ProcessBuffers<'_>) -> RenderStatus;

    /// Set a parameter value
    fn set_parameter(&mut self, id: u32, _value: f32) -> Result<(), NodeError> {
        Err(NodeError::InvalidParameter(format!(
            "{} has no parameter with id {id}",
            self.info().name
        )))
    }

    /// Get a parameter value
    fn get_parameter(&self, id: u32) -> Result<f32, NodeError> {
        Err(NodeError::InvalidParameter(format!(
            "{} has no parameter with id {id}",
            self.info().name
        )))
    }

    /// Get all parameters
    fn parameters(&self) -> Vec<ParameterInfo> {
        Vec::new()
    }

    /// Drop per-run state after the engine stops
    fn reset(&mut self) {}
}

/// Node-related errors
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("Node initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Node processing failed: {0}")]
    ProcessingFailed(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}
