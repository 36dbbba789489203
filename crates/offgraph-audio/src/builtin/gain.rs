//! Gain node - simple volume control.

use offgraph_core::{AudioFormat, Frames};
use offgraph_node::{Node, NodeError, NodeInfo, ParameterInfo, ProcessBuffers, RenderStatus};

/// Gain parameter id
pub const PARAM_GAIN: u32 = 0;

/// Single-input gain stage
///
/// Multiplies every sample by a linear gain factor.
///
/// ## Parameter Range
///
/// Gain: 0.0 to 2.0 (linear)
/// - 0.0 = silence
/// - 1.0 = unity gain (default)
/// - 2.0 = double amplitude (+6 dB)
pub struct GainNode {
    gain: f32,
    info: NodeInfo,
}

impl Default for GainNode {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl GainNode {
    /// Create a gain node; `gain` is clamped to 0.0..=2.0
    pub fn new(gain: f32) -> Self {
        Self {
            gain: clamp_gain(gain),
            info: NodeInfo::new("Gain", "offgraph.builtin.gain"),
        }
    }
}

/// NaN maps to unity
fn clamp_gain(value: f32) -> f32 {
    if value.is_nan() {
        1.0
    } else {
        value.clamp(0.0, 2.0)
    }
}

impl Node for GainNode {
    fn info(&self) -> &NodeInfo {
        &self.info
    }

    fn input_slots(&self) -> usize {
        1
    }

    fn initialize(&mut self, _format: AudioFormat, _max_frames: Frames) -> Result<(), NodeError> {
        Ok(())
    }

    fn process(&mut self, buffers: &mut ProcessBuffers<'_>) -> RenderStatus {
        let inputs = buffers.inputs;
        let Some(input) = inputs.first().copied() else {
            return NodeError::ProcessingFailed("gain node has no input".to_string()).into();
        };
        if let Err(e) = buffers.prepare_output() {
            return e.into();
        }

        let gain = self.gain;
        let available = input.frame_length().min(buffers.frames);
        for channel in 0..buffers.output.channels() {
            for frame in 0..available {
                buffers
                    .output
                    .set(frame, channel, input.get(frame, channel) * gain);
            }
        }
        buffers.output.silence(available..buffers.frames);

        if buffers.inputs_drained {
            RenderStatus::Drained
        } else {
            RenderStatus::Success
        }
    }

    fn set_parameter(&mut self, id: u32, value: f32) -> Result<(), NodeError> {
        match id {
            PARAM_GAIN => {
                // NaN leaves the gain unchanged
                if !value.is_nan() {
                    self.gain = clamp_gain(value);
                }
                Ok(())
            }
            _ => Err(NodeError::InvalidParameter(format!(
                "Unknown parameter ID: {id}"
            ))),
        }
    }

    fn get_parameter(&self, id: u32) -> Result<f32, NodeError> {
        match id {
            PARAM_GAIN => Ok(self.gain),
            _ => Err(NodeError::InvalidParameter(format!(
                "Unknown parameter ID: {id}"
            ))),
        }
    }

    fn parameters(&self) -> Vec<ParameterInfo> {
        vec![ParameterInfo {
            id: PARAM_GAIN,
            name: "Gain".to_string(),
            min_value: 0.0,
            max_value: 2.0,
            default_value: 1.0,
        }]
    }
}
