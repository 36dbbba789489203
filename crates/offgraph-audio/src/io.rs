//! Source and destination abstractions for offline rendering.
//!
//! A render reads from an [`AudioSource`] (through a player node) and writes
//! every rendered buffer to an [`AudioSink`]. File-backed implementations live
//! in [`crate::file`]; the in-memory ones here are handy for tests and for
//! embedding the engine without touching the filesystem.

use offgraph_core::{AudioFormat, Error, Frames, Result, Sample, SampleBuffer};

/// Sequential reader of float frames
pub trait AudioSource: Send {
    /// Format of the frames this source delivers
    fn format(&self) -> AudioFormat;

    /// Total length in frames, if known
    fn length(&self) -> Option<u64>;

    /// Read up to `max_frames` frames into `buffer` starting at frame `offset`.
    ///
    /// Returns the number of frames read; fewer than requested means the
    /// source is exhausted. Extends the buffer's frame length to cover what
    /// was written.
    fn read_into(
        &mut self,
        buffer: &mut SampleBuffer,
        offset: Frames,
        max_frames: Frames,
    ) -> Result<Frames>;
}

/// Sequential writer of rendered buffers
pub trait AudioSink {
    /// Append the populated frames of `buffer`
    fn write(&mut self, buffer: &SampleBuffer) -> Result<()>;

    /// Flush and close the destination
    fn finalize(self) -> Result<()>
    where
        Self: Sized;
}

/// A borrowed sink is written through but finalized by its owner
impl<S: AudioSink> AudioSink for &mut S {
    fn write(&mut self, buffer: &SampleBuffer) -> Result<()> {
        (**self).write(buffer)
    }

    fn finalize(self) -> Result<()> {
        Ok(())
    }
}

fn check_channels(expected: AudioFormat, buffer: &SampleBuffer) -> Result<()> {
    if buffer.channels() != expected.channels {
        return Err(Error::FormatMismatch {
            expected,
            found: buffer.format(),
        });
    }
    Ok(())
}

/// Source backed by interleaved samples held in memory
#[derive(Debug, Clone)]
pub struct MemorySource {
    format: AudioFormat,
    samples: Box<[Sample]>,
    position: Frames,
}

impl MemorySource {
    /// Create a source from interleaved samples.
    ///
    /// A trailing partial frame is ignored.
    pub fn new(format: AudioFormat, samples: Vec<Sample>) -> Self {
        Self {
            format,
            samples: samples.into_boxed_slice(),
            position: 0,
        }
    }

    fn frame_count(&self) -> Frames {
        self.samples.len() / self.format.channels
    }
}

impl AudioSource for MemorySource {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn length(&self) -> Option<u64> {
        Some(self.frame_count() as u64)
    }

    fn read_into(
        &mut self,
        buffer: &mut SampleBuffer,
        offset: Frames,
        max_frames: Frames,
    ) -> Result<Frames> {
        check_channels(self.format, buffer)?;

        let channels = self.format.channels;
        let frames = max_frames.min(self.frame_count() - self.position);
        let start = self.position * channels;
        let written =
            buffer.write_interleaved(&self.samples[start..start + frames * channels], offset)?;

        self.position += written;
        Ok(written)
    }
}

/// Sink collecting interleaved samples in memory
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    format: Option<AudioFormat>,
    samples: Vec<Sample>,
    write_sizes: Vec<Frames>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, interleaved
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Frame count of every `write` call, in order
    pub fn write_sizes(&self) -> &[Frames] {
        &self.write_sizes
    }

    /// Total frames written
    pub fn frames(&self) -> u64 {
        self.write_sizes.iter().map(|&n| n as u64).sum()
    }

    /// Format of the first buffer written
    pub fn format(&self) -> Option<AudioFormat> {
        self.format
    }
}

impl AudioSink for MemorySink {
    fn write(&mut self, buffer: &SampleBuffer) -> Result<()> {
        match self.format {
            Some(format) => check_channels(format, buffer)?,
            None => self.format = Some(buffer.format()),
        }

        buffer.append_interleaved(&mut self.samples);
        self.write_sizes.push(buffer.frame_length());
        Ok(())
    }

    fn finalize(self) -> Result<()> {
        tracing::debug!(
            "Memory sink closed after {} writes ({} frames)",
            self.write_sizes.len(),
            self.frames()
        );
        Ok(())
    }
}
