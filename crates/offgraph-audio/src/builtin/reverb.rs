//! Reverb node - damped comb and allpass network with factory presets.
//!
//! Each channel runs eight parallel lowpass-feedback comb filters followed by
//! four series allpass diffusers. Delay lengths are tuned at 44.1 kHz and
//! scaled to the processing rate; every channel after the first is offset by a
//! small spread so the channels decorrelate.

use std::fmt;
use std::str::FromStr;

use offgraph_core::{AudioFormat, Frames, SampleRate};
use offgraph_node::{Node, NodeError, NodeInfo, ParameterInfo, ProcessBuffers, RenderStatus};
use serde::{Deserialize, Serialize};

const COMB_TUNING: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];
const ALLPASS_TUNING: [usize; 4] = [556, 441, 341, 225];
const STEREO_SPREAD: usize = 23;
const TUNING_RATE: f64 = 44_100.0;

const INPUT_GAIN: f32 = 0.015;
const WET_SCALE: f32 = 3.0;
const ALLPASS_FEEDBACK: f32 = 0.5;
const ROOM_SCALE: f32 = 0.28;
const ROOM_OFFSET: f32 = 0.7;
const DAMP_SCALE: f32 = 0.4;

/// Delay-line energy below which the tail counts as silent
pub const SILENCE_THRESHOLD: f32 = 1.0e-5;

/// Default bound on tail length once the input has drained
pub const DEFAULT_MAX_TAIL_SECONDS: f32 = 20.0;

/// Wet/dry mix parameter id (percent, 0 to 100)
pub const PARAM_WET_DRY_MIX: u32 = 0;

/// Factory room presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReverbPreset {
    SmallRoom,
    MediumRoom,
    LargeRoom,
    #[default]
    MediumHall,
    LargeHall,
    Plate,
    MediumChamber,
    LargeChamber,
    Cathedral,
    LargeRoom2,
    MediumHall2,
    MediumHall3,
    LargeHall2,
}

impl ReverbPreset {
    pub const ALL: [Self; 13] = [
        Self::SmallRoom,
        Self::MediumRoom,
        Self::LargeRoom,
        Self::MediumHall,
        Self::LargeHall,
        Self::Plate,
        Self::MediumChamber,
        Self::LargeChamber,
        Self::Cathedral,
        Self::LargeRoom2,
        Self::MediumHall2,
        Self::MediumHall3,
        Self::LargeHall2,
    ];

    /// Command-line name of the preset
    pub const fn name(self) -> &'static str {
        match self {
            Self::SmallRoom => "small-room",
            Self::MediumRoom => "medium-room",
            Self::LargeRoom => "large-room",
            Self::MediumHall => "medium-hall",
            Self::LargeHall => "large-hall",
            Self::Plate => "plate",
            Self::MediumChamber => "medium-chamber",
            Self::LargeChamber => "large-chamber",
            Self::Cathedral => "cathedral",
            Self::LargeRoom2 => "large-room2",
            Self::MediumHall2 => "medium-hall2",
            Self::MediumHall3 => "medium-hall3",
            Self::LargeHall2 => "large-hall2",
        }
    }

    /// Room size and damping, both in 0..1
    const fn room(self) -> (f32, f32) {
        match self {
            Self::SmallRoom => (0.30, 0.55),
            Self::MediumRoom => (0.50, 0.50),
            Self::LargeRoom => (0.70, 0.45),
            Self::MediumHall => (0.75, 0.40),
            Self::LargeHall => (0.85, 0.35),
            Self::Plate => (0.65, 0.20),
            Self::MediumChamber => (0.60, 0.45),
            Self::LargeChamber => (0.72, 0.40),
            Self::Cathedral => (0.95, 0.25),
            Self::LargeRoom2 => (0.72, 0.55),
            Self::MediumHall2 => (0.78, 0.45),
            Self::MediumHall3 => (0.80, 0.50),
            Self::LargeHall2 => (0.88, 0.30),
        }
    }
}

impl fmt::Display for ReverbPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ReverbPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|preset| preset.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let names: Vec<_> = Self::ALL.iter().map(|p| p.name()).collect();
                format!("unknown reverb preset '{s}' (expected one of: {})", names.join(", "))
            })
    }
}

fn default_max_tail_seconds() -> f32 {
    DEFAULT_MAX_TAIL_SECONDS
}

/// Reverb settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReverbConfig {
    pub preset: ReverbPreset,
    /// Percentage of processed signal in the output, 0 to 100
    pub wet_dry_mix: f32,
    /// Upper bound on rendered tail after the input drains
    #[serde(default = "default_max_tail_seconds")]
    pub max_tail_seconds: f32,
}

impl Default for ReverbConfig {
    fn default() -> Self {
        Self {
            preset: ReverbPreset::MediumHall,
            wet_dry_mix: 50.0,
            max_tail_seconds: DEFAULT_MAX_TAIL_SECONDS,
        }
    }
}

#[inline]
fn flush_denormal(value: f32) -> f32 {
    if value.abs() < 1.0e-20 { 0.0 } else { value }
}

fn scaled_length(length: usize, sample_rate: SampleRate) -> usize {
    ((length as f64 * f64::from(sample_rate) / TUNING_RATE).round() as usize).max(1)
}

struct Comb {
    buffer: Box<[f32]>,
    index: usize,
    store: f32,
}

impl Comb {
    fn new(length: usize) -> Self {
        Self {
            buffer: vec![0.0; length].into_boxed_slice(),
            index: 0,
            store: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32, feedback: f32, damp: f32) -> f32 {
        let output = self.buffer[self.index];
        self.store = flush_denormal(output.mul_add(1.0 - damp, self.store * damp));
        self.buffer[self.index] = flush_denormal(self.store.mul_add(feedback, input));
        self.index = (self.index + 1) % self.buffer.len();
        output
    }
}

struct Allpass {
    buffer: Box<[f32]>,
    index: usize,
}

impl Allpass {
    fn new(length: usize) -> Self {
        Self {
            buffer: vec![0.0; length].into_boxed_slice(),
            index: 0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let delayed = self.buffer[self.index];
        self.buffer[self.index] = flush_denormal(delayed.mul_add(ALLPASS_FEEDBACK, input));
        self.index = (self.index + 1) % self.buffer.len();
        delayed - input
    }
}

/// Filter network for one channel
struct ChannelReverb {
    combs: Vec<Comb>,
    allpasses: Vec<Allpass>,
}

impl ChannelReverb {
    fn new(sample_rate: SampleRate, spread: usize) -> Self {
        Self {
            combs: COMB_TUNING
                .iter()
                .map(|&length| Comb::new(scaled_length(length + spread, sample_rate)))
                .collect(),
            allpasses: ALLPASS_TUNING
                .iter()
                .map(|&length| Allpass::new(scaled_length(length + spread, sample_rate)))
                .collect(),
        }
    }

    #[inline]
    fn tick(&mut self, input: f32, feedback: f32, damp: f32) -> f32 {
        let excitation = input * INPUT_GAIN;
        let mut output = 0.0;
        for comb in &mut self.combs {
            output += comb.process(excitation, feedback, damp);
        }
        for allpass in &mut self.allpasses {
            output = allpass.process(output);
        }
        output * WET_SCALE
    }

    /// Largest magnitude held anywhere in the network
    fn energy(&self) -> f32 {
        let combs = self
            .combs
            .iter()
            .flat_map(|comb| comb.buffer.iter().chain(std::iter::once(&comb.store)));
        let allpasses = self.allpasses.iter().flat_map(|allpass| allpass.buffer.iter());
        combs.chain(allpasses).fold(0.0_f32, |peak, s| peak.max(s.abs()))
    }

    fn clear(&mut self) {
        for comb in &mut self.combs {
            comb.buffer.fill(0.0);
            comb.store = 0.0;
        }
        for allpass in &mut self.allpasses {
            allpass.buffer.fill(0.0);
        }
    }
}

/// Single-input reverb effect.
///
/// With a wet/dry mix of 0 the output is the input, sample for sample. Once
/// the input has drained the node keeps rendering its tail until the network
/// falls below [`SILENCE_THRESHOLD`] or `max_tail_seconds` have elapsed, then
/// reports `Drained`.
pub struct ReverbNode {
    config: ReverbConfig,
    channels: Vec<ChannelReverb>,
    tail_frames: u64,
    max_tail_frames: u64,
    info: NodeInfo,
}

impl Default for ReverbNode {
    fn default() -> Self {
        Self::new(ReverbConfig::default())
    }
}

impl ReverbNode {
    pub fn new(config: ReverbConfig) -> Self {
        let mut node = Self {
            config,
            channels: Vec::new(),
            tail_frames: 0,
            max_tail_frames: 0,
            info: NodeInfo::new("Reverb", "offgraph.builtin.reverb"),
        };
        node.set_wet_dry_mix(config.wet_dry_mix);
        node
    }

    /// Switch to a factory preset; the wet/dry mix is kept
    pub fn load_factory_preset(&mut self, preset: ReverbPreset) {
        tracing::debug!("Reverb preset {}", preset);
        self.config.preset = preset;
    }

    pub fn preset(&self) -> ReverbPreset {
        self.config.preset
    }

    /// Set the wet percentage, clamped to 0..=100. NaN means fully dry.
    pub fn set_wet_dry_mix(&mut self, mix: f32) {
        self.config.wet_dry_mix = if mix.is_nan() {
            0.0
        } else {
            mix.clamp(0.0, 100.0)
        };
    }

    pub fn wet_dry_mix(&self) -> f32 {
        self.config.wet_dry_mix
    }

    fn coefficients(&self) -> (f32, f32) {
        let (room, damping) = self.config.preset.room();
        (room.mul_add(ROOM_SCALE, ROOM_OFFSET), damping * DAMP_SCALE)
    }

    fn energy(&self) -> f32 {
        self.channels
            .iter()
            .map(ChannelReverb::energy)
            .fold(0.0, f32::max)
    }
}

impl Node for ReverbNode {
    fn info(&self) -> &NodeInfo {
        &self.info
    }

    fn input_slots(&self) -> usize {
        1
    }

    fn initialize(&mut self, format: AudioFormat, _max_frames: Frames) -> Result<(), NodeError> {
        self.channels = (0..format.channels)
            .map(|channel| ChannelReverb::new(format.sample_rate, channel * STEREO_SPREAD))
            .collect();
        self.tail_frames = 0;
        self.max_tail_frames = format.frames_for_seconds(f64::from(self.config.max_tail_seconds));

        tracing::debug!(
            "Reverb initialized: {}, preset {}, mix {}%",
            format,
            self.config.preset,
            self.config.wet_dry_mix
        );
        Ok(())
    }

    fn process(&mut self, buffers: &mut ProcessBuffers<'_>) -> RenderStatus {
        if self.channels.is_empty() {
            return NodeError::ProcessingFailed("reverb used before initialize".to_string()).into();
        }
        let inputs = buffers.inputs;
        let Some(input) = inputs.first().copied() else {
            return NodeError::ProcessingFailed("reverb node has no input".to_string()).into();
        };
        if let Err(e) = buffers.prepare_output() {
            return e.into();
        }

        let frames = buffers.frames;
        let available = input.frame_length().min(frames);
        let (feedback, damp) = self.coefficients();
        let wet = self.config.wet_dry_mix / 100.0;
        let dry = 1.0 - wet;
        let output = &mut *buffers.output;

        for (channel, state) in self.channels.iter_mut().enumerate() {
            for frame in 0..frames {
                let x = if frame < available {
                    input.get(frame, channel)
                } else {
                    0.0
                };
                let reverberated = state.tick(x, feedback, damp);
                let y = if wet == 0.0 {
                    x
                } else {
                    dry.mul_add(x, wet * reverberated)
                };
                output.set(frame, channel, y);
            }
        }

        if !buffers.inputs_drained {
            self.tail_frames = 0;
            return RenderStatus::Success;
        }

        self.tail_frames += frames as u64;
        if wet == 0.0 || self.energy() < SILENCE_THRESHOLD {
            RenderStatus::Drained
        } else if self.tail_frames >= self.max_tail_frames {
            tracing::debug!("Reverb tail cut off after {} frames", self.tail_frames);
            RenderStatus::Drained
        } else {
            RenderStatus::Success
        }
    }

    fn set_parameter(&mut self, id: u32, value: f32) -> Result<(), NodeError> {
        match id {
            PARAM_WET_DRY_MIX => {
                self.set_wet_dry_mix(value);
                Ok(())
            }
            _ => Err(NodeError::InvalidParameter(format!(
                "Unknown parameter ID: {id}"
            ))),
        }
    }

    fn get_parameter(&self, id: u32) -> Result<f32, NodeError> {
        match id {
            PARAM_WET_DRY_MIX => Ok(self.wet_dry_mix()),
            _ => Err(NodeError::InvalidParameter(format!(
                "Unknown parameter ID: {id}"
            ))),
        }
    }

    fn parameters(&self) -> Vec<ParameterInfo> {
        vec![ParameterInfo {
            id: PARAM_WET_DRY_MIX,
            name: "Wet/Dry Mix".to_string(),
            min_value: 0.0,
            max_value: 100.0,
            default_value: 50.0,
        }]
    }

    fn reset(&mut self) {
        for channel in &mut self.channels {
            channel.clear();
        }
        self.tail_frames = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offgraph_core::SampleBuffer;

    fn stereo() -> AudioFormat {
        AudioFormat::new(48000, 2).unwrap()
    }

    fn node(preset: ReverbPreset, mix: f32) -> ReverbNode {
        let mut node = ReverbNode::new(ReverbConfig {
            preset,
            wet_dry_mix: mix,
            max_tail_seconds: DEFAULT_MAX_TAIL_SECONDS,
        });
        node.initialize(stereo(), 512).unwrap();
        node
    }

    fn pull(
        node: &mut ReverbNode,
        input: &SampleBuffer,
        output: &mut SampleBuffer,
        drained: bool,
    ) -> RenderStatus {
        output.clear();
        let inputs = [input];
        node.process(&mut ProcessBuffers {
            inputs: &inputs,
            output,
            frames: input.frame_capacity(),
            sample_time: 0,
            inputs_drained: drained,
        })
    }

    fn sine(frames: usize) -> SampleBuffer {
        let mut buffer = SampleBuffer::new(stereo(), frames);
        let samples: Vec<f32> = (0..frames * 2)
            .map(|i| ((i / 2) as f32 * 0.05).sin() * 0.8)
            .collect();
        buffer.write_interleaved(&samples, 0).unwrap();
        buffer
    }

    fn silence(frames: usize) -> SampleBuffer {
        let mut buffer = SampleBuffer::new(stereo(), frames);
        buffer.set_frame_length(frames).unwrap();
        buffer
    }

    #[test]
    fn test_fully_dry_mix_is_identity() {
        let mut reverb = node(ReverbPreset::Cathedral, 0.0);
        let input = sine(512);
        let mut output = SampleBuffer::new(stereo(), 512);

        for _ in 0..3 {
            assert!(matches!(
                pull(&mut reverb, &input, &mut output, false),
                RenderStatus::Success
            ));
            for frame in 0..512 {
                for channel in 0..2 {
                    assert_eq!(output.get(frame, channel), input.get(frame, channel));
                }
            }
        }

        // Drains together with its input
        assert!(matches!(
            pull(&mut reverb, &input, &mut output, true),
            RenderStatus::Drained
        ));
    }

    #[test]
    fn test_nan_mix_falls_back_to_dry() {
        let mut reverb = node(ReverbPreset::MediumHall, f32::NAN);
        assert_eq!(reverb.wet_dry_mix(), 0.0);

        let input = sine(512);
        let mut output = SampleBuffer::new(stereo(), 512);
        assert!(matches!(
            pull(&mut reverb, &input, &mut output, true),
            RenderStatus::Drained
        ));
        for frame in 0..512 {
            assert_eq!(output.get(frame, 0), input.get(frame, 0));
        }

        reverb.set_parameter(PARAM_WET_DRY_MIX, 40.0).unwrap();
        reverb.set_parameter(PARAM_WET_DRY_MIX, f32::NAN).unwrap();
        assert_eq!(reverb.wet_dry_mix(), 0.0);
        reverb.set_parameter(PARAM_WET_DRY_MIX, f32::INFINITY).unwrap();
        assert_eq!(reverb.wet_dry_mix(), 100.0);
    }

    #[test]
    fn test_fully_wet_mix_has_no_dry_signal() {
        let mut reverb = node(ReverbPreset::MediumHall, 100.0);
        let mut impulse = SampleBuffer::new(stereo(), 4096);
        impulse.set_frame_length(4096).unwrap();
        impulse.set(0, 0, 1.0);
        impulse.set(0, 1, 1.0);
        let mut output = SampleBuffer::new(stereo(), 4096);

        pull(&mut reverb, &impulse, &mut output, false);

        // The network has no zero-delay path, so the impulse itself never appears
        assert_eq!(output.get(0, 0), 0.0);
        assert!(output.peak() > 0.0);
    }

    #[test]
    fn test_channels_are_decorrelated() {
        let mut reverb = node(ReverbPreset::LargeHall, 100.0);
        let input = sine(2048);
        let mut output = SampleBuffer::new(stereo(), 2048);
        pull(&mut reverb, &input, &mut output, false);

        let differs = (0..2048).any(|frame| output.get(frame, 0) != output.get(frame, 1));
        assert!(differs);
    }

    #[test]
    fn test_tail_rings_then_drains() {
        let mut reverb = node(ReverbPreset::SmallRoom, 50.0);
        let input = sine(512);
        let quiet = silence(512);
        let mut output = SampleBuffer::new(stereo(), 512);

        for _ in 0..8 {
            pull(&mut reverb, &input, &mut output, false);
        }

        // First drained pull still carries tail
        assert!(matches!(
            pull(&mut reverb, &quiet, &mut output, true),
            RenderStatus::Success
        ));
        assert!(output.peak() > 0.0);

        let mut pulls = 1;
        loop {
            match pull(&mut reverb, &quiet, &mut output, true) {
                RenderStatus::Success => pulls += 1,
                RenderStatus::Drained => break,
                other => panic!("unexpected status {other:?}"),
            }
            assert!(pulls < 4000, "tail never drained");
        }
        assert!(reverb.energy() < SILENCE_THRESHOLD || reverb.tail_frames >= reverb.max_tail_frames);
    }

    #[test]
    fn test_tail_is_bounded() {
        let mut reverb = ReverbNode::new(ReverbConfig {
            preset: ReverbPreset::Cathedral,
            wet_dry_mix: 100.0,
            max_tail_seconds: 0.02,
        });
        reverb.initialize(stereo(), 512).unwrap();

        let input = sine(512);
        let quiet = silence(512);
        let mut output = SampleBuffer::new(stereo(), 512);
        pull(&mut reverb, &input, &mut output, false);

        // 0.02 s at 48 kHz = 960 frames = two pulls of 512
        assert!(matches!(
            pull(&mut reverb, &quiet, &mut output, true),
            RenderStatus::Success
        ));
        assert!(matches!(
            pull(&mut reverb, &quiet, &mut output, true),
            RenderStatus::Drained
        ));
    }

    #[test]
    fn test_reset_clears_tail() {
        let mut reverb = node(ReverbPreset::Plate, 100.0);
        let input = sine(512);
        let mut output = SampleBuffer::new(stereo(), 512);
        pull(&mut reverb, &input, &mut output, false);
        assert!(reverb.energy() > 0.0);

        reverb.reset();
        assert_eq!(reverb.energy(), 0.0);
    }

    #[test]
    fn test_wet_dry_mix_parameter() {
        let mut reverb = ReverbNode::default();
        assert_eq!(reverb.get_parameter(PARAM_WET_DRY_MIX).unwrap(), 50.0);

        reverb.set_parameter(PARAM_WET_DRY_MIX, 150.0).unwrap();
        assert_eq!(reverb.wet_dry_mix(), 100.0);
        reverb.set_parameter(PARAM_WET_DRY_MIX, -5.0).unwrap();
        assert_eq!(reverb.wet_dry_mix(), 0.0);

        assert!(reverb.set_parameter(7, 1.0).is_err());
        assert_eq!(reverb.parameters().len(), 1);
    }

    #[test]
    fn test_process_before_initialize_fails() {
        let mut reverb = ReverbNode::default();
        let input = sine(16);
        let mut output = SampleBuffer::new(stereo(), 16);
        assert!(matches!(
            pull(&mut reverb, &input, &mut output, false),
            RenderStatus::Error(_)
        ));
    }

    #[test]
    fn test_preset_names_round_trip() {
        for preset in ReverbPreset::ALL {
            assert_eq!(preset.name().parse::<ReverbPreset>().unwrap(), preset);
            assert_eq!(preset.to_string(), preset.name());
        }
        assert_eq!(
            "Medium-Hall".parse::<ReverbPreset>().unwrap(),
            ReverbPreset::MediumHall
        );
        assert!("broom-closet".parse::<ReverbPreset>().is_err());
    }

    #[test]
    fn test_larger_rooms_ring_longer() {
        let (small, _) = ReverbPreset::SmallRoom.room();
        let (cathedral, _) = ReverbPreset::Cathedral.room();
        assert!(cathedral > small);

        let feedback = |preset: ReverbPreset| ReverbNode::new(ReverbConfig {
            preset,
            ..ReverbConfig::default()
        })
        .coefficients()
        .0;
        assert!(feedback(ReverbPreset::Cathedral) < 1.0);
        assert!(feedback(ReverbPreset::Cathedral) > feedback(ReverbPreset::SmallRoom));
    }
}
