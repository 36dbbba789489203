//! Mixer node - sums its inputs with per-input and master volume.
//!
//! This is the node the graph uses as its default sink ("main mixer").

use offgraph_core::{AudioFormat, Frames};
use offgraph_node::{Node, NodeError, NodeInfo, ParameterInfo, ProcessBuffers, RenderStatus};

const MAX_VOLUME: f32 = 2.0;

/// N-input summing mixer
///
/// ## Parameters
///
/// - ids `0..inputs`: per-input volume, 0.0 to 2.0 (default 1.0)
/// - id `inputs`: master volume, 0.0 to 2.0 (default 1.0)
///
/// Summing is additive with no automatic gain compensation.
pub struct MixerNode {
    /// Per-input volumes followed by the master volume
    volumes: Box<[f32]>,
    info: NodeInfo,
}

impl MixerNode {
    /// Create a mixer with `inputs` input slots (at least one)
    pub fn new(inputs: usize) -> Self {
        let inputs = inputs.max(1);
        Self {
            volumes: vec![1.0; inputs + 1].into_boxed_slice(),
            info: NodeInfo::new("Mixer", "offgraph.builtin.mixer"),
        }
    }

    /// Parameter id of the master volume
    pub fn master_id(&self) -> u32 {
        (self.volumes.len() - 1) as u32
    }

    fn unknown(id: u32) -> NodeError {
        NodeError::InvalidParameter(format!("Unknown parameter ID: {id}"))
    }
}

impl Default for MixerNode {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Node for MixerNode {
    fn info(&self) -> &NodeInfo {
        &self.info
    }

    fn input_slots(&self) -> usize {
        self.volumes.len() - 1
    }

    fn initialize(&mut self, _format: AudioFormat, _max_frames: Frames) -> Result<(), NodeError> {
        Ok(())
    }

    fn process(&mut self, buffers: &mut ProcessBuffers<'_>) -> RenderStatus {
        if let Err(e) = buffers.prepare_output() {
            return e.into();
        }

        let frames = buffers.frames;
        let inputs = buffers.inputs;
        let master = self.volumes[self.volumes.len() - 1];
        let output = &mut *buffers.output;
        output.silence(0..frames);

        for (index, input) in inputs.iter().enumerate() {
            let volume = self.volumes[index] * master;
            let available = input.frame_length().min(frames);
            for channel in 0..output.channels().min(input.channels()) {
                for frame in 0..available {
                    let mixed = input.get(frame, channel).mul_add(volume, output.get(frame, channel));
                    output.set(frame, channel, mixed);
                }
            }
        }

        if buffers.inputs_drained {
            RenderStatus::Drained
        } else {
            RenderStatus::Success
        }
    }

    fn set_parameter(&mut self, id: u32, value: f32) -> Result<(), NodeError> {
        let volume = self
            .volumes
            .get_mut(id as usize)
            .ok_or_else(|| Self::unknown(id))?;
        // NaN leaves the volume unchanged
        if !value.is_nan() {
            *volume = value.clamp(0.0, MAX_VOLUME);
        }
        Ok(())
    }

    fn get_parameter(&self, id: u32) -> Result<f32, NodeError> {
        self.volumes
            .get(id as usize)
            .copied()
            .ok_or_else(|| Self::unknown(id))
    }

    fn parameters(&self) -> Vec<ParameterInfo> {
        let master = self.master_id();
        (0..=master)
            .map(|id| ParameterInfo {
                id,
                name: if id == master {
                    "Master Volume".to_string()
                } else {
                    format!("Input {id} Volume")
                },
                min_value: 0.0,
                max_value: MAX_VOLUME,
                default_value: 1.0,
            })
            .collect()
    }
}
