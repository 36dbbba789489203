//! Player node - streams a scheduled source into the graph.

use offgraph_core::{AudioFormat, Frames};
use offgraph_node::{Node, NodeError, NodeInfo, ProcessBuffers, RenderStatus};

use crate::io::AudioSource;

/// Where the player is in its schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Nothing scheduled; renders silence
    Idle,
    /// A source is scheduled but its start time has not been reached
    Scheduled,
    /// Streaming source frames
    Playing,
    /// Source exhausted; renders silence and reports `Drained`
    Finished,
}

/// Source node playing one scheduled [`AudioSource`].
///
/// The source is read sequentially; the player never seeks. Frames before the
/// scheduled start time and after the end of the source are silence.
pub struct PlayerNode {
    source: Option<Box<dyn AudioSource>>,
    state: PlaybackState,
    /// Engine sample time at which the first source frame plays
    start_time: u64,
    /// Source frames delivered so far
    position: u64,
    info: NodeInfo,
}

impl Default for PlayerNode {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayerNode {
    pub fn new() -> Self {
        Self {
            source: None,
            state: PlaybackState::Idle,
            start_time: 0,
            position: 0,
            info: NodeInfo::new("Player", "offgraph.builtin.player"),
        }
    }

    /// Schedule `source` to start at engine sample time `at` (0 when `None`).
    ///
    /// Replaces anything previously scheduled.
    pub fn schedule_file(&mut self, source: impl AudioSource + 'static, at: Option<u64>) {
        self.schedule(Box::new(source), at);
    }

    /// Schedule an already boxed source
    pub fn schedule(&mut self, source: Box<dyn AudioSource>, at: Option<u64>) {
        tracing::debug!(
            "Player scheduled {:?} frames at sample time {}",
            source.length(),
            at.unwrap_or(0)
        );
        self.source = Some(source);
        self.start_time = at.unwrap_or(0);
        self.position = 0;
        self.state = PlaybackState::Scheduled;
    }

    /// Drop the scheduled source and return to `Idle`
    pub fn stop(&mut self) {
        self.source = None;
        self.position = 0;
        self.state = PlaybackState::Idle;
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Length of the scheduled source in frames
    pub fn length(&self) -> Option<u64> {
        self.source.as_ref().and_then(|source| source.length())
    }

    /// Engine sample time just past the last source frame
    pub fn end_time(&self) -> Option<u64> {
        self.length().map(|length| self.start_time + length)
    }
}

impl Node for PlayerNode {
    fn info(&self) -> &NodeInfo {
        &self.info
    }

    fn input_slots(&self) -> usize {
        0
    }

    fn output_format(&self) -> Option<AudioFormat> {
        self.source.as_ref().map(|source| source.format())
    }

    fn initialize(&mut self, format: AudioFormat, _max_frames: Frames) -> Result<(), NodeError> {
        match self.output_format() {
            Some(source_format) if source_format != format => Err(NodeError::UnsupportedFormat(
                format!("player source is {source_format}, graph runs at {format}"),
            )),
            _ => Ok(()),
        }
    }

    fn process(&mut self, buffers: &mut ProcessBuffers<'_>) -> RenderStatus {
        let frames = buffers.frames;
        if let Err(e) = buffers.prepare_output() {
            return e.into();
        }
        let output = &mut *buffers.output;

        if self.state == PlaybackState::Finished {
            output.silence(0..frames);
            return RenderStatus::Drained;
        }
        let Some(source) = self.source.as_mut() else {
            output.silence(0..frames);
            return RenderStatus::Success;
        };

        let lead = self
            .start_time
            .saturating_sub(buffers.sample_time)
            .min(frames as u64) as Frames;
        output.silence(0..lead);
        if lead == frames {
            return RenderStatus::Success;
        }

        self.state = PlaybackState::Playing;
        let wanted = frames - lead;
        let read = match source.read_into(output, lead, wanted) {
            Ok(read) => read,
            Err(e) => return NodeError::ProcessingFailed(e.to_string()).into(),
        };
        output.silence(lead + read..frames);
        self.position += read as u64;

        let exhausted =
            read < wanted || source.length().is_some_and(|length| self.position >= length);
        if exhausted {
            tracing::debug!("Player finished after {} frames", self.position);
            self.state = PlaybackState::Finished;
            RenderStatus::Drained
        } else {
            RenderStatus::Success
        }
    }

    fn reset(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemorySource;
    use offgraph_core::SampleBuffer;

    fn mono() -> AudioFormat {
        AudioFormat::new(48000, 1).unwrap()
    }

    fn ramp(frames: usize) -> MemorySource {
        MemorySource::new(mono(), (1..=frames).map(|i| i as f32).collect())
    }

    fn pull(
        player: &mut PlayerNode,
        output: &mut SampleBuffer,
        frames: Frames,
        sample_time: u64,
    ) -> RenderStatus {
        output.clear();
        player.process(&mut ProcessBuffers {
            inputs: &[],
            output,
            frames,
            sample_time,
            inputs_drained: true,
        })
    }

    #[test]
    fn test_idle_player_renders_silence() {
        let mut player = PlayerNode::new();
        let mut output = SampleBuffer::new(mono(), 8);
        output.write_interleaved(&[1.0; 8], 0).unwrap();

        assert!(matches!(pull(&mut player, &mut output, 8, 0), RenderStatus::Success));
        assert_eq!(output.frame_length(), 8);
        assert_eq!(output.peak(), 0.0);
        assert_eq!(player.state(), PlaybackState::Idle);
    }

    #[test]
    fn test_player_pads_final_pull_and_drains() {
        let mut player = PlayerNode::new();
        player.schedule_file(ramp(10), None);
        assert_eq!(player.end_time(), Some(10));

        let mut output = SampleBuffer::new(mono(), 4);
        assert!(matches!(pull(&mut player, &mut output, 4, 0), RenderStatus::Success));
        assert_eq!(output.get(0, 0), 1.0);
        assert!(matches!(pull(&mut player, &mut output, 4, 4), RenderStatus::Success));

        assert!(matches!(pull(&mut player, &mut output, 4, 8), RenderStatus::Drained));
        assert_eq!(output.frame_length(), 4);
        assert_eq!(output.get(1, 0), 10.0);
        assert_eq!(output.get(2, 0), 0.0);
        assert_eq!(output.get(3, 0), 0.0);

        assert!(matches!(pull(&mut player, &mut output, 4, 12), RenderStatus::Drained));
        assert_eq!(output.peak(), 0.0);
    }

    #[test]
    fn test_player_drains_on_exact_boundary() {
        let mut player = PlayerNode::new();
        player.schedule_file(ramp(8), None);

        let mut output = SampleBuffer::new(mono(), 4);
        assert!(matches!(pull(&mut player, &mut output, 4, 0), RenderStatus::Success));
        assert!(matches!(pull(&mut player, &mut output, 4, 4), RenderStatus::Drained));
        assert_eq!(output.get(3, 0), 8.0);
    }

    #[test]
    fn test_player_start_offset() {
        let mut player = PlayerNode::new();
        player.schedule_file(ramp(4), Some(6));
        assert_eq!(player.end_time(), Some(10));

        let mut output = SampleBuffer::new(mono(), 4);
        assert!(matches!(pull(&mut player, &mut output, 4, 0), RenderStatus::Success));
        assert_eq!(output.peak(), 0.0);
        assert_eq!(player.state(), PlaybackState::Scheduled);

        assert!(matches!(pull(&mut player, &mut output, 4, 4), RenderStatus::Success));
        assert_eq!(output.get(1, 0), 0.0);
        assert_eq!(output.get(2, 0), 1.0);
        assert_eq!(output.get(3, 0), 2.0);
        assert_eq!(player.state(), PlaybackState::Playing);

        assert!(matches!(pull(&mut player, &mut output, 4, 8), RenderStatus::Drained));
        assert_eq!(output.get(1, 0), 4.0);
    }

    #[test]
    fn test_empty_source_drains_immediately() {
        let mut player = PlayerNode::new();
        player.schedule_file(ramp(0), None);

        let mut output = SampleBuffer::new(mono(), 4);
        assert!(matches!(pull(&mut player, &mut output, 4, 0), RenderStatus::Drained));
        assert_eq!(output.frame_length(), 4);
    }

    #[test]
    fn test_initialize_rejects_other_format() {
        let mut player = PlayerNode::new();
        player.schedule_file(ramp(4), None);

        assert!(player.initialize(mono(), 512).is_ok());
        assert!(matches!(
            player.initialize(AudioFormat::default(), 512),
            Err(NodeError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_reset_returns_to_idle() {
        let mut player = PlayerNode::new();
        player.schedule_file(ramp(4), None);
        player.reset();

        assert_eq!(player.state(), PlaybackState::Idle);
        assert_eq!(player.output_format(), None);
        assert_eq!(player.end_time(), None);
    }
}
