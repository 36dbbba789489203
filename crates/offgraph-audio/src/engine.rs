//! Offline engine - renders the graph on demand, decoupled from wall-clock time.

use offgraph_core::{AudioFormat, Error, Frames, Result, SampleBuffer};
use offgraph_node::{Node, RenderStatus};

use crate::graph::{AudioGraph, NodeId};
use crate::OfflineConfig;

/// Lifecycle of the engine
enum EngineState {
    /// Graph can be edited; no render format chosen yet
    Unconfigured,
    /// Offline mode enabled; graph can still be edited
    Configured(OfflineConfig),
    /// Rendering; the graph is frozen and the output buffer is live
    Running {
        config: OfflineConfig,
        buffer: SampleBuffer,
    },
    /// Rendering finished; render state released
    Stopped,
}

/// Engine that renders its graph one pull at a time, as fast as the caller asks.
///
/// The output buffer is allocated once by [`start`](Self::start) and reused by
/// every [`render_offline`](Self::render_offline) call.
pub struct OfflineEngine {
    graph: AudioGraph,
    state: EngineState,
    /// Frames rendered since `start`
    sample_time: u64,
}

impl Default for OfflineEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl OfflineEngine {
    /// Create an engine with an empty graph
    pub fn new() -> Self {
        Self::with_graph(AudioGraph::new())
    }

    /// Create an engine around an existing graph
    pub fn with_graph(graph: AudioGraph) -> Self {
        Self {
            graph,
            state: EngineState::Unconfigured,
            sample_time: 0,
        }
    }

    pub fn graph(&self) -> &AudioGraph {
        &self.graph
    }

    /// Mutable access to the graph while it is not rendering
    pub fn graph_mut(&mut self) -> Result<&mut AudioGraph> {
        if self.is_running() {
            return Err(Error::EngineRunning);
        }
        Ok(&mut self.graph)
    }

    /// Attach a node to the graph
    pub fn attach(&mut self, node: Box<dyn Node>) -> Result<NodeId> {
        Ok(self.graph_mut()?.attach(node))
    }

    /// Connect two nodes carrying `format`
    pub fn connect(&mut self, from: NodeId, to: NodeId, format: AudioFormat) -> Result<()> {
        self.graph_mut()?.connect(from, to, format)
    }

    /// The graph's default sink, created on first use
    pub fn main_mixer(&mut self) -> Result<NodeId> {
        Ok(self.graph_mut()?.main_mixer())
    }

    /// Switch to offline rendering at `format`, pulling at most `max_frames` per call
    pub fn enable_offline_mode(&mut self, format: AudioFormat, max_frames: Frames) -> Result<()> {
        if !matches!(self.state, EngineState::Unconfigured) {
            return Err(Error::AlreadyConfigured);
        }
        format.validate()?;
        if max_frames == 0 {
            return Err(Error::InvalidMaxFrames(max_frames));
        }

        tracing::info!(
            "Offline rendering enabled: {}, {} frames per pull",
            format,
            max_frames
        );
        self.state = EngineState::Configured(OfflineConfig { format, max_frames });
        Ok(())
    }

    /// Offline configuration, once enabled
    pub fn config(&self) -> Option<OfflineConfig> {
        match &self.state {
            EngineState::Configured(config) | EngineState::Running { config, .. } => Some(*config),
            EngineState::Unconfigured | EngineState::Stopped => None,
        }
    }

    /// Format of the rendered output
    pub fn format(&self) -> Option<AudioFormat> {
        self.config().map(|config| config.format)
    }

    /// Largest frame count a single pull may request
    pub fn max_frames(&self) -> Option<Frames> {
        self.config().map(|config| config.max_frames)
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, EngineState::Running { .. })
    }

    /// Validate the graph, allocate render state and reset the sample time
    pub fn start(&mut self) -> Result<()> {
        let EngineState::Configured(config) = &self.state else {
            return Err(Error::NotConfigured);
        };
        let config = *config;

        self.graph.prepare(config.format, config.max_frames)?;
        let buffer = SampleBuffer::new(config.format, config.max_frames);
        self.sample_time = 0;
        self.state = EngineState::Running { config, buffer };

        tracing::info!("Offline engine started");
        Ok(())
    }

    /// Render up to `frames` frames into the engine's output buffer.
    ///
    /// On `Success` or `Drained` the buffer holds the rendered frames and the
    /// sample time advances by that many. Retryable statuses leave both
    /// untouched; repeat the call.
    pub fn render_offline(&mut self, frames: Frames) -> Result<RenderStatus> {
        let EngineState::Running { buffer, .. } = &mut self.state else {
            return Err(Error::NotRunning);
        };
        if frames > buffer.frame_capacity() {
            return Err(Error::CapacityExceeded {
                requested: frames,
                capacity: buffer.frame_capacity(),
            });
        }

        buffer.clear();
        let status = self.graph.render(frames, buffer, self.sample_time);
        if status.has_data() {
            self.sample_time += buffer.frame_length() as u64;
        }
        Ok(status)
    }

    /// The output buffer (same allocation for every pull) while running
    pub fn buffer(&self) -> Option<&SampleBuffer> {
        match &self.state {
            EngineState::Running { buffer, .. } => Some(buffer),
            _ => None,
        }
    }

    /// Frames rendered since `start`
    pub fn sample_time(&self) -> u64 {
        self.sample_time
    }

    /// Stop rendering and release render state. Calling it again is a no-op.
    pub fn stop(&mut self) {
        if self.is_running() {
            self.graph.reset();
            self.state = EngineState::Stopped;
            tracing::info!("Offline engine stopped at sample time {}", self.sample_time);
        }
    }
}
