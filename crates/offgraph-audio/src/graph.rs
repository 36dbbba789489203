//! Pull-based audio processing graph.
//!
//! Nodes live in an arena indexed by [`NodeId`]. Every connection fills one
//! input slot of its destination and carries one [`AudioFormat`]; the graph
//! is kept acyclic at connect time. Rendering pulls from the designated sink:
//! `prepare` computes a post-order of everything reachable from it, and
//! `render` evaluates that order once per pull, each upstream node exactly
//! once.

use offgraph_core::{AudioFormat, Error, Frames, Result, SampleBuffer};
use offgraph_node::{Node, NodeError, ProcessBuffers, RenderStatus};
use smallvec::SmallVec;

use crate::builtin::MixerNode;

/// Handle to a node attached to an [`AudioGraph`]
pub type NodeId = usize;

/// A node attached to the graph
pub struct AudioNode {
    id: NodeId,
    node: Box<dyn Node>,
    /// Upstream node feeding each input slot
    inputs: Vec<Option<NodeId>>,
    /// Format fixed by the node itself or by its first connection
    format: Option<AudioFormat>,
}

impl AudioNode {
    /// Get the node's ID
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn node(&self) -> &dyn Node {
        self.node.as_ref()
    }

    pub fn node_mut(&mut self) -> &mut dyn Node {
        self.node.as_mut()
    }

    /// Upstream node per input slot (`None` = empty slot)
    pub fn inputs(&self) -> &[Option<NodeId>] {
        &self.inputs
    }

    pub fn format(&self) -> Option<AudioFormat> {
        self.format
    }
}

/// Connection between two nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Connection {
    pub from: NodeId,
    pub to: NodeId,
    pub slot: usize,
}

/// Where an interrupted pull picks up again
#[derive(Debug, Clone, Copy)]
struct Resume {
    position: usize,
    frames: Frames,
    sample_time: u64,
}

/// The audio processing graph
#[derive(Default)]
pub struct AudioGraph {
    nodes: Vec<Option<AudioNode>>,
    sink: Option<NodeId>,
    main_mixer: Option<NodeId>,

    // Render state, valid between `prepare` and `reset`
    prepared: bool,
    pull_order: Vec<NodeId>,
    node_buffers: Vec<SampleBuffer>,
    drained: Vec<bool>,
    resume: Option<Resume>,
}

impl AudioGraph {
    /// Create a new empty audio graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a node and return its handle
    pub fn attach(&mut self, node: Box<dyn Node>) -> NodeId {
        let id = self.nodes.len();
        let slots = node.input_slots();
        let format = node.output_format();
        tracing::debug!(
            "Attached node {} ({}, {} input slots)",
            id,
            node.info().name,
            slots
        );

        self.nodes.push(Some(AudioNode {
            id,
            node,
            inputs: vec![None; slots],
            format,
        }));
        self.invalidate();
        id
    }

    /// Remove a node and every connection touching it
    pub fn detach(&mut self, id: NodeId) -> Result<Box<dyn Node>> {
        let removed = self
            .nodes
            .get_mut(id)
            .and_then(Option::take)
            .ok_or(Error::UnknownNode(id))?;

        for entry in self.nodes.iter_mut().flatten() {
            for slot in &mut entry.inputs {
                if *slot == Some(id) {
                    *slot = None;
                }
            }
        }
        if self.sink == Some(id) {
            self.sink = None;
        }
        if self.main_mixer == Some(id) {
            self.main_mixer = None;
        }

        self.invalidate();
        tracing::debug!("Detached node {}", id);
        Ok(removed.node)
    }

    /// Get a node by handle
    pub fn node(&self, id: NodeId) -> Option<&AudioNode> {
        self.nodes.get(id).and_then(Option::as_ref)
    }

    /// Get a node by handle, mutably
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut AudioNode> {
        self.nodes.get_mut(id).and_then(Option::as_mut)
    }

    /// All attached nodes
    pub fn nodes(&self) -> impl Iterator<Item = &AudioNode> {
        self.nodes.iter().flatten()
    }

    /// Number of attached nodes
    pub fn node_count(&self) -> usize {
        self.nodes().count()
    }

    /// All connections, by destination and slot
    pub fn connections(&self) -> impl Iterator<Item = Connection> + '_ {
        self.nodes().flat_map(|entry| {
            entry
                .inputs
                .iter()
                .enumerate()
                .filter_map(move |(slot, from)| {
                    from.map(|from| Connection {
                        from,
                        to: entry.id,
                        slot,
                    })
                })
        })
    }

    /// The default sink, created on first use
    pub fn main_mixer(&mut self) -> NodeId {
        if let Some(id) = self.main_mixer {
            return id;
        }

        let id = self.attach(Box::new(MixerNode::new(1)));
        self.main_mixer = Some(id);
        if self.sink.is_none() {
            self.sink = Some(id);
        }
        id
    }

    /// Designate the node whose output the engine renders
    pub fn set_sink(&mut self, id: NodeId) -> Result<()> {
        self.entry(id)?;
        self.sink = Some(id);
        self.invalidate();
        Ok(())
    }

    pub fn sink(&self) -> Option<NodeId> {
        self.sink
    }

    /// Connect `from` to the first free input slot of `to`
    pub fn connect(&mut self, from: NodeId, to: NodeId, format: AudioFormat) -> Result<()> {
        self.entry(from)?;
        let inputs = &self.entry(to)?.inputs;
        let slot = inputs
            .iter()
            .position(Option::is_none)
            .ok_or(Error::SlotUnavailable {
                node: to,
                slot: inputs.len(),
            })?;
        self.connect_to_slot(from, to, slot, format)
    }

    /// Connect `from` to input `slot` of `to` carrying `format`.
    ///
    /// Nothing changes unless every check passes: both nodes exist, both agree
    /// with `format`, the slot is free and the edge does not close a cycle.
    pub fn connect_to_slot(
        &mut self,
        from: NodeId,
        to: NodeId,
        slot: usize,
        format: AudioFormat,
    ) -> Result<()> {
        format.validate()?;
        let source = self.entry(from)?;
        let destination = self.entry(to)?;

        for found in [source.format, destination.format].into_iter().flatten() {
            if found != format {
                return Err(Error::FormatMismatch {
                    expected: format,
                    found,
                });
            }
        }
        if destination.inputs.get(slot) != Some(&None) {
            return Err(Error::SlotUnavailable { node: to, slot });
        }
        if from == to || self.feeds(to, from) {
            return Err(Error::CycleDetected { from, to });
        }

        if let Some(source) = self.node_mut(from) {
            source.format = Some(format);
        }
        if let Some(destination) = self.node_mut(to) {
            destination.format = Some(format);
            destination.inputs[slot] = Some(from);
        }

        self.invalidate();
        tracing::debug!("Connected {} -> {}:{} ({})", from, to, slot, format);
        Ok(())
    }

    /// Remove every connection from `from` into `to`
    pub fn disconnect(&mut self, from: NodeId, to: NodeId) {
        let Some(destination) = self.node_mut(to) else {
            return;
        };

        let mut removed = false;
        for slot in &mut destination.inputs {
            if *slot == Some(from) {
                *slot = None;
                removed = true;
            }
        }

        if removed {
            self.invalidate();
            tracing::debug!("Disconnected {} -> {}", from, to);
        }
    }

    /// Whether `upstream` feeds `node`, directly or through other nodes
    pub fn feeds(&self, upstream: NodeId, node: NodeId) -> bool {
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![node];

        while let Some(id) = stack.pop() {
            let Some(entry) = self.node(id) else {
                continue;
            };
            for &source in entry.inputs.iter().flatten() {
                if source == upstream {
                    return true;
                }
                if !visited[source] {
                    visited[source] = true;
                    stack.push(source);
                }
            }
        }
        false
    }

    /// Order in which a pull evaluates nodes (empty until prepared)
    pub fn pull_order(&self) -> &[NodeId] {
        &self.pull_order
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Check that a sink is designated and every slot reachable from it is connected
    pub fn validate(&self) -> Result<()> {
        let sink = self.sink.ok_or(Error::MissingSink)?;
        self.compute_pull_order(sink).map(drop)
    }

    /// Validate the sink chain, initialize its nodes and allocate buffers.
    ///
    /// Everything allocated here is reused by every subsequent `render` call.
    pub fn prepare(&mut self, format: AudioFormat, max_frames: Frames) -> Result<()> {
        let sink = self.sink.ok_or(Error::MissingSink)?;
        let order = self.compute_pull_order(sink)?;

        for &id in &order {
            if let Some(found) = self.entry(id)?.format {
                if found != format {
                    return Err(Error::FormatMismatch {
                        expected: format,
                        found,
                    });
                }
            }
        }

        for &id in &order {
            let entry = self.node_mut(id).ok_or(Error::UnknownNode(id))?;
            entry.node.initialize(format, max_frames).map_err(|e| match e {
                NodeError::UnsupportedFormat(reason) => Error::FormatUnsupported(reason),
                other => Error::Render(format!("node {id}: {other}")),
            })?;
        }

        let mut reachable = vec![false; self.nodes.len()];
        for &id in &order {
            reachable[id] = true;
        }
        self.node_buffers = reachable
            .iter()
            .enumerate()
            .map(|(id, &live)| {
                if live && id != sink {
                    SampleBuffer::new(format, max_frames)
                } else {
                    SampleBuffer::default()
                }
            })
            .collect();
        self.drained = vec![false; self.nodes.len()];
        self.resume = None;
        self.pull_order = order;
        self.prepared = true;

        tracing::info!(
            "Graph prepared: {} nodes in pull order {:?}, {} frames per pull",
            self.pull_order.len(),
            self.pull_order,
            max_frames
        );
        Ok(())
    }

    /// Post-order walk from the sink over input slots in slot order
    fn compute_pull_order(&self, sink: NodeId) -> Result<Vec<NodeId>> {
        self.entry(sink)?;

        let mut order = Vec::new();
        let mut visited = vec![false; self.nodes.len()];
        let mut stack: Vec<(NodeId, usize)> = vec![(sink, 0)];
        visited[sink] = true;

        while let Some(top) = stack.last_mut() {
            let (id, slot) = *top;
            let entry = self.entry(id)?;

            if slot < entry.inputs.len() {
                top.1 += 1;
                let Some(source) = entry.inputs[slot] else {
                    return Err(Error::DisconnectedSink { node: id, slot });
                };
                if !visited[source] {
                    visited[source] = true;
                    stack.push((source, 0));
                }
            } else {
                order.push(id);
                stack.pop();
            }
        }

        Ok(order)
    }

    /// Pull `frames` frames from the sink into `output`.
    ///
    /// A retryable status leaves the nodes that already rendered untouched;
    /// the next call with the same `frames` and `sample_time` resumes at the
    /// node that asked for the retry.
    pub fn render(
        &mut self,
        frames: Frames,
        output: &mut SampleBuffer,
        sample_time: u64,
    ) -> RenderStatus {
        if !self.prepared {
            return NodeError::ProcessingFailed("graph has not been prepared".to_string()).into();
        }
        let Some(sink) = self.sink else {
            return NodeError::ProcessingFailed("graph has no sink".to_string()).into();
        };

        let start = match self.resume.take() {
            Some(resume) if resume.frames == frames && resume.sample_time == sample_time => {
                resume.position
            }
            Some(resume) => {
                tracing::debug!(
                    "Discarding interrupted pull at sample time {}",
                    resume.sample_time
                );
                0
            }
            None => 0,
        };

        for position in start..self.pull_order.len() {
            let id = self.pull_order[position];
            match self.process_node(id, id == sink, frames, sample_time, output) {
                RenderStatus::Success => self.drained[id] = false,
                RenderStatus::Drained => self.drained[id] = true,
                status if status.is_retryable() => {
                    self.resume = Some(Resume {
                        position,
                        frames,
                        sample_time,
                    });
                    return status;
                }
                error => return error,
            }
        }

        if self.drained[sink] {
            RenderStatus::Drained
        } else {
            RenderStatus::Success
        }
    }

    fn process_node(
        &mut self,
        id: NodeId,
        is_sink: bool,
        frames: Frames,
        sample_time: u64,
        output: &mut SampleBuffer,
    ) -> RenderStatus {
        let Self {
            nodes,
            node_buffers,
            drained,
            ..
        } = self;
        let Some(entry) = nodes.get_mut(id).and_then(Option::as_mut) else {
            return NodeError::ProcessingFailed(format!("node {id} is not attached")).into();
        };

        let inputs_drained = entry.inputs.iter().flatten().all(|&source| drained[source]);
        let mut own = (!is_sink).then(|| std::mem::take(&mut node_buffers[id]));

        let status = {
            let inputs: SmallVec<[&SampleBuffer; 4]> = entry
                .inputs
                .iter()
                .flatten()
                .map(|&source| &node_buffers[source])
                .collect();
            let target = match own.as_mut() {
                Some(buffer) => buffer,
                None => &mut *output,
            };
            target.clear();

            entry.node.process(&mut ProcessBuffers {
                inputs: inputs.as_slice(),
                output: target,
                frames,
                sample_time,
                inputs_drained,
            })
        };

        if let Some(buffer) = own {
            node_buffers[id] = buffer;
        }
        status
    }

    /// Release render state and reset every node (after the engine stops)
    pub fn reset(&mut self) {
        for entry in self.nodes.iter_mut().flatten() {
            entry.node.reset();
        }
        self.invalidate();
        self.node_buffers = Vec::new();
        self.drained = Vec::new();
        self.pull_order.clear();
    }

    fn entry(&self, id: NodeId) -> Result<&AudioNode> {
        self.node(id).ok_or(Error::UnknownNode(id))
    }

    fn invalidate(&mut self) {
        self.prepared = false;
        self.resume = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use offgraph_node::NodeInfo;

    fn stereo() -> AudioFormat {
        AudioFormat::new(48000, 2).unwrap()
    }

    fn mono() -> AudioFormat {
        AudioFormat::new(48000, 1).unwrap()
    }

    /// Emits a constant, drains after `drain_after` pulls, counts calls
    struct Constant {
        value: f32,
        format: Option<AudioFormat>,
        calls: Arc<AtomicUsize>,
        drain_after: usize,
        info: NodeInfo,
    }

    impl Constant {
        fn new(value: f32) -> Self {
            Self {
                value,
                format: None,
                calls: Arc::new(AtomicUsize::new(0)),
                drain_after: usize::MAX,
                info: NodeInfo::new("Constant", "test.constant"),
            }
        }
    }

    impl Node for Constant {
        fn info(&self) -> &NodeInfo {
            &self.info
        }

        fn input_slots(&self) -> usize {
            0
        }

        fn output_format(&self) -> Option<AudioFormat> {
            self.format
        }

        fn initialize(
            &mut self,
            _format: AudioFormat,
            _max_frames: Frames,
        ) -> std::result::Result<(), NodeError> {
            Ok(())
        }

        fn process(&mut self, buffers: &mut ProcessBuffers<'_>) -> RenderStatus {
            let calls = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Err(e) = buffers.prepare_output() {
                return e.into();
            }
            for channel in 0..buffers.output.channels() {
                for frame in 0..buffers.frames {
                    buffers.output.set(frame, channel, self.value);
                }
            }
            if calls >= self.drain_after {
                RenderStatus::Drained
            } else {
                RenderStatus::Success
            }
        }
    }

    /// Copies its input; asks for a retry on the calls listed in `busy_on`
    struct PassThrough {
        slots: usize,
        calls: Arc<AtomicUsize>,
        busy_on: Vec<usize>,
        info: NodeInfo,
    }

    impl PassThrough {
        fn new() -> Self {
            Self {
                slots: 1,
                calls: Arc::new(AtomicUsize::new(0)),
                busy_on: Vec::new(),
                info: NodeInfo::new("PassThrough", "test.pass"),
            }
        }
    }

    impl Node for PassThrough {
        fn info(&self) -> &NodeInfo {
            &self.info
        }

        fn input_slots(&self) -> usize {
            self.slots
        }

        fn initialize(
            &mut self,
            _format: AudioFormat,
            _max_frames: Frames,
        ) -> std::result::Result<(), NodeError> {
            Ok(())
        }

        fn process(&mut self, buffers: &mut ProcessBuffers<'_>) -> RenderStatus {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.busy_on.contains(&call) {
                return RenderStatus::CannotRenderInCurrentContext;
            }
            if let Err(e) = buffers.prepare_output() {
                return e.into();
            }
            let inputs = buffers.inputs;
            if let Some(input) = inputs.first() {
                for channel in 0..buffers.output.channels() {
                    for frame in 0..buffers.frames {
                        buffers.output.set(frame, channel, input.get(frame, channel));
                    }
                }
            }
            if buffers.inputs_drained {
                RenderStatus::Drained
            } else {
                RenderStatus::Success
            }
        }
    }

    fn connection_count(graph: &AudioGraph) -> usize {
        graph.connections().count()
    }

    #[test]
    fn test_attach_returns_sequential_ids() {
        let mut graph = AudioGraph::new();
        assert_eq!(graph.attach(Box::new(Constant::new(0.0))), 0);
        assert_eq!(graph.attach(Box::new(Constant::new(0.0))), 1);
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.node(1).unwrap().id(), 1);
    }

    #[test]
    fn test_connect_unknown_node() {
        let mut graph = AudioGraph::new();
        let a = graph.attach(Box::new(Constant::new(0.0)));
        assert!(matches!(
            graph.connect(a, 42, stereo()),
            Err(Error::UnknownNode(42))
        ));
        assert!(matches!(
            graph.connect(42, a, stereo()),
            Err(Error::UnknownNode(_))
        ));
    }

    #[test]
    fn test_connect_rejects_format_mismatch() {
        let mut graph = AudioGraph::new();
        let mut source = Constant::new(0.5);
        source.format = Some(mono());
        let a = graph.attach(Box::new(source));
        let b = graph.attach(Box::new(PassThrough::new()));

        let err = graph.connect(a, b, stereo()).unwrap_err();
        assert!(matches!(
            err,
            Error::FormatMismatch { expected, found } if expected == stereo() && found == mono()
        ));
        assert_eq!(connection_count(&graph), 0);
        assert_eq!(graph.node(b).unwrap().format(), None);

        graph.connect(a, b, mono()).unwrap();
        assert_eq!(graph.node(b).unwrap().format(), Some(mono()));
    }

    #[test]
    fn test_downstream_format_is_fixed_by_first_connection() {
        let mut graph = AudioGraph::new();
        let a = graph.attach(Box::new(PassThrough::new()));
        let b = graph.attach(Box::new(PassThrough::new()));
        let c = graph.attach(Box::new(Constant::new(0.0)));

        graph.connect(a, b, stereo()).unwrap();
        assert!(matches!(
            graph.connect(c, a, mono()),
            Err(Error::FormatMismatch { .. })
        ));
    }

    #[test]
    fn test_connect_rejects_cycles_without_mutation() {
        let mut graph = AudioGraph::new();
        let a = graph.attach(Box::new(PassThrough::new()));
        let b = graph.attach(Box::new(PassThrough::new()));
        let c = graph.attach(Box::new(PassThrough::new()));

        graph.connect(a, b, stereo()).unwrap();
        graph.connect(b, c, stereo()).unwrap();

        assert!(matches!(
            graph.connect(c, a, stereo()),
            Err(Error::CycleDetected { from, to }) if from == c && to == a
        ));
        assert!(matches!(
            graph.connect(a, a, stereo()),
            Err(Error::CycleDetected { .. })
        ));
        assert_eq!(connection_count(&graph), 2);
        assert_eq!(graph.node(a).unwrap().inputs(), &[None]);
    }

    #[test]
    fn test_connect_rejects_occupied_slot() {
        let mut graph = AudioGraph::new();
        let a = graph.attach(Box::new(Constant::new(0.0)));
        let b = graph.attach(Box::new(Constant::new(0.0)));
        let pass = graph.attach(Box::new(PassThrough::new()));

        graph.connect(a, pass, stereo()).unwrap();
        assert!(matches!(
            graph.connect(b, pass, stereo()),
            Err(Error::SlotUnavailable { slot: 1, .. })
        ));
        assert!(matches!(
            graph.connect_to_slot(b, pass, 0, stereo()),
            Err(Error::SlotUnavailable { slot: 0, .. })
        ));
    }

    #[test]
    fn test_disconnect_and_detach() {
        let mut graph = AudioGraph::new();
        let a = graph.attach(Box::new(Constant::new(0.0)));
        let b = graph.attach(Box::new(PassThrough::new()));
        let mixer = graph.main_mixer();
        graph.connect(a, b, stereo()).unwrap();
        graph.connect(b, mixer, stereo()).unwrap();

        graph.disconnect(a, b);
        assert_eq!(connection_count(&graph), 1);

        graph.detach(mixer).unwrap();
        assert_eq!(connection_count(&graph), 0);
        assert_eq!(graph.sink(), None);
        assert!(graph.node(mixer).is_none());
        assert!(matches!(graph.detach(mixer), Err(Error::UnknownNode(_))));
    }

    #[test]
    fn test_main_mixer_is_created_once() {
        let mut graph = AudioGraph::new();
        let first = graph.main_mixer();
        let second = graph.main_mixer();
        assert_eq!(first, second);
        assert_eq!(graph.sink(), Some(first));
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn test_prepare_requires_sink() {
        let mut graph = AudioGraph::new();
        graph.attach(Box::new(Constant::new(0.0)));
        assert!(matches!(
            graph.prepare(stereo(), 64),
            Err(Error::MissingSink)
        ));
    }

    #[test]
    fn test_prepare_reports_disconnected_chain() {
        let mut graph = AudioGraph::new();
        let mixer = graph.main_mixer();
        assert!(matches!(
            graph.prepare(stereo(), 64),
            Err(Error::DisconnectedSink { node, slot: 0 }) if node == mixer
        ));

        let pass = graph.attach(Box::new(PassThrough::new()));
        graph.connect(pass, mixer, stereo()).unwrap();
        assert!(matches!(
            graph.prepare(stereo(), 64),
            Err(Error::DisconnectedSink { node, slot: 0 }) if node == pass
        ));
        assert!(!graph.is_prepared());
    }

    #[test]
    fn test_validate_does_not_prepare() {
        let mut graph = AudioGraph::new();
        assert!(matches!(graph.validate(), Err(Error::MissingSink)));

        let mixer = graph.main_mixer();
        assert!(matches!(
            graph.validate(),
            Err(Error::DisconnectedSink { node, slot: 0 }) if node == mixer
        ));

        let a = graph.attach(Box::new(Constant::new(0.0)));
        graph.connect(a, mixer, stereo()).unwrap();
        assert!(graph.validate().is_ok());
        assert!(!graph.is_prepared());
        assert!(graph.pull_order().is_empty());
    }

    #[test]
    fn test_prepare_rejects_engine_format_mismatch() {
        let mut graph = AudioGraph::new();
        let a = graph.attach(Box::new(Constant::new(0.0)));
        let mixer = graph.main_mixer();
        graph.connect(a, mixer, mono()).unwrap();

        assert!(matches!(
            graph.prepare(stereo(), 64),
            Err(Error::FormatMismatch { .. })
        ));
    }

    #[test]
    fn test_pull_order_visits_only_reachable_nodes() {
        let mut graph = AudioGraph::new();
        let source = graph.attach(Box::new(Constant::new(0.0)));
        let orphan = graph.attach(Box::new(Constant::new(0.0)));
        let left = graph.attach(Box::new(PassThrough::new()));
        let right = graph.attach(Box::new(PassThrough::new()));
        let mixer = graph.attach(Box::new(MixerNode::new(2)));
        graph.set_sink(mixer).unwrap();

        // Diamond: source feeds both branches
        graph.connect(source, left, stereo()).unwrap();
        graph.connect(source, right, stereo()).unwrap();
        graph.connect(left, mixer, stereo()).unwrap();
        graph.connect(right, mixer, stereo()).unwrap();

        graph.prepare(stereo(), 64).unwrap();
        assert_eq!(graph.pull_order(), &[source, left, right, mixer]);
        assert!(!graph.pull_order().contains(&orphan));
    }

    #[test]
    fn test_render_evaluates_each_node_once_per_pull() {
        let mut graph = AudioGraph::new();
        let constant = Constant::new(0.25);
        let calls = Arc::clone(&constant.calls);
        let source = graph.attach(Box::new(constant));
        let left = graph.attach(Box::new(PassThrough::new()));
        let right = graph.attach(Box::new(PassThrough::new()));
        let mixer = graph.attach(Box::new(MixerNode::new(2)));
        graph.set_sink(mixer).unwrap();
        graph.connect(source, left, stereo()).unwrap();
        graph.connect(source, right, stereo()).unwrap();
        graph.connect(left, mixer, stereo()).unwrap();
        graph.connect(right, mixer, stereo()).unwrap();
        graph.prepare(stereo(), 64).unwrap();

        let mut output = SampleBuffer::new(stereo(), 64);
        for pull in 1..=3 {
            output.clear();
            assert!(matches!(
                graph.render(64, &mut output, 0),
                RenderStatus::Success
            ));
            assert_eq!(calls.load(Ordering::SeqCst), pull);
        }
        assert_eq!(output.frame_length(), 64);
        assert_eq!(output.get(63, 1), 0.5);
    }

    #[test]
    fn test_render_resumes_after_retry() {
        let mut graph = AudioGraph::new();
        let constant = Constant::new(1.0);
        let source_calls = Arc::clone(&constant.calls);
        let source = graph.attach(Box::new(constant));
        let mut busy = PassThrough::new();
        busy.busy_on = vec![1, 2];
        let busy_calls = Arc::clone(&busy.calls);
        let pass = graph.attach(Box::new(busy));
        let mixer = graph.main_mixer();
        graph.connect(source, pass, stereo()).unwrap();
        graph.connect(pass, mixer, stereo()).unwrap();
        graph.prepare(stereo(), 32).unwrap();

        let mut output = SampleBuffer::new(stereo(), 32);
        assert!(matches!(
            graph.render(32, &mut output, 0),
            RenderStatus::CannotRenderInCurrentContext
        ));
        assert!(matches!(
            graph.render(32, &mut output, 0),
            RenderStatus::CannotRenderInCurrentContext
        ));
        assert!(matches!(
            graph.render(32, &mut output, 0),
            RenderStatus::Success
        ));

        // The source rendered once; only the busy node was retried
        assert_eq!(source_calls.load(Ordering::SeqCst), 1);
        assert_eq!(busy_calls.load(Ordering::SeqCst), 3);
        assert_eq!(output.get(31, 0), 1.0);
    }

    #[test]
    fn test_render_propagates_drained() {
        let mut graph = AudioGraph::new();
        let mut constant = Constant::new(0.1);
        constant.drain_after = 2;
        let source = graph.attach(Box::new(constant));
        let pass = graph.attach(Box::new(PassThrough::new()));
        let mixer = graph.main_mixer();
        graph.connect(source, pass, mono()).unwrap();
        graph.connect(pass, mixer, mono()).unwrap();
        graph.prepare(mono(), 16).unwrap();

        let mut output = SampleBuffer::new(mono(), 16);
        assert!(matches!(
            graph.render(16, &mut output, 0),
            RenderStatus::Success
        ));
        output.clear();
        assert!(matches!(
            graph.render(16, &mut output, 16),
            RenderStatus::Drained
        ));
    }

    #[test]
    fn test_render_before_prepare_is_an_error() {
        let mut graph = AudioGraph::new();
        graph.main_mixer();
        let mut output = SampleBuffer::new(stereo(), 16);
        assert!(matches!(
            graph.render(16, &mut output, 0),
            RenderStatus::Error(_)
        ));
    }

    #[test]
    fn test_mutation_invalidates_preparation() {
        let mut graph = AudioGraph::new();
        let a = graph.attach(Box::new(Constant::new(0.0)));
        let mixer = graph.main_mixer();
        graph.connect(a, mixer, stereo()).unwrap();
        graph.prepare(stereo(), 16).unwrap();
        assert!(graph.is_prepared());

        graph.attach(Box::new(Constant::new(0.0)));
        assert!(!graph.is_prepared());
    }
}
