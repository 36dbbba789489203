//! Audio format carried by every graph connection.

use std::fmt;

use crate::{ChannelCount, Error, Result, SampleRate};

/// How samples of different channels are arranged in a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SampleLayout {
    /// One contiguous run per channel
    #[default]
    Planar,
    /// Frames stored one after another, channels side by side
    Interleaved,
}

/// Sample rate, channel count and layout of float samples.
///
/// A single format is fixed for a whole graph; connections are only accepted
/// between nodes that agree on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    pub sample_rate: SampleRate,
    pub channels: ChannelCount,
    pub layout: SampleLayout,
}

impl AudioFormat {
    /// Create a planar format, validating rate and channel count
    pub fn new(sample_rate: SampleRate, channels: ChannelCount) -> Result<Self> {
        Self::with_layout(sample_rate, channels, SampleLayout::Planar)
    }

    /// Create a format with an explicit layout
    pub fn with_layout(
        sample_rate: SampleRate,
        channels: ChannelCount,
        layout: SampleLayout,
    ) -> Result<Self> {
        let format = Self {
            sample_rate,
            channels,
            layout,
        };
        format.validate()?;
        Ok(format)
    }

    /// Check that rate and channel count are positive
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::FormatUnsupported(
                "sample rate must be positive".to_string(),
            ));
        }
        if self.channels == 0 {
            return Err(Error::FormatUnsupported(
                "channel count must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Convert a duration in seconds to whole frames at this rate
    #[must_use]
    pub fn frames_for_seconds(&self, seconds: f64) -> u64 {
        (seconds.max(0.0) * f64::from(self.sample_rate)).round() as u64
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: crate::sample_rates::SR_48000,
            channels: 2,
            layout: SampleLayout::Planar,
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let layout = match self.layout {
            SampleLayout::Planar => "planar",
            SampleLayout::Interleaved => "interleaved",
        };
        write!(
            f,
            "{} Hz, {} ch, {layout} f32",
            self.sample_rate, self.channels
        )
    }
}
