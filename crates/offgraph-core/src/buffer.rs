//! Fixed-capacity multi-channel sample buffer.

use std::ops::Range;

use crate::{AudioFormat, ChannelCount, Error, Frames, Result, Sample, SampleLayout};

/// Fixed-capacity buffer of float frames exchanged between graph nodes.
///
/// The backing storage is allocated once in [`SampleBuffer::new`] and never
/// grows. `frame_length` tracks how many frames are populated; [`clear`]
/// resets it without touching the allocation, so one buffer can be reused for
/// every pull of a render.
///
/// [`clear`]: SampleBuffer::clear
#[derive(Debug, Clone, Default)]
pub struct SampleBuffer {
    format: AudioFormat,
    capacity: Frames,
    length: Frames,
    samples: Vec<Sample>,
}

impl SampleBuffer {
    /// Allocate a zeroed buffer able to hold `capacity` frames
    #[must_use]
    pub fn new(format: AudioFormat, capacity: Frames) -> Self {
        Self {
            format,
            capacity,
            length: 0,
            samples: vec![0.0; capacity * format.channels],
        }
    }

    #[must_use]
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    #[must_use]
    pub fn channels(&self) -> ChannelCount {
        self.format.channels
    }

    /// Maximum number of frames this buffer can hold
    #[must_use]
    pub fn frame_capacity(&self) -> Frames {
        self.capacity
    }

    /// Number of frames currently populated
    #[must_use]
    pub fn frame_length(&self) -> Frames {
        self.length
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Set the populated frame count
    pub fn set_frame_length(&mut self, frames: Frames) -> Result<()> {
        self.check_capacity(frames)?;
        self.length = frames;
        Ok(())
    }

    /// Mark the buffer empty for reuse (no reallocation)
    pub fn clear(&mut self) {
        self.length = 0;
    }

    /// Pointer to the backing storage; stable for the lifetime of the buffer
    #[must_use]
    pub fn as_ptr(&self) -> *const Sample {
        self.samples.as_ptr()
    }

    #[inline]
    fn index(&self, frame: Frames, channel: ChannelCount) -> usize {
        match self.format.layout {
            SampleLayout::Planar => channel * self.capacity + frame,
            SampleLayout::Interleaved => frame * self.format.channels + channel,
        }
    }

    /// Read one sample
    ///
    /// # Panics
    ///
    /// Panics if `frame` or `channel` is outside the buffer's capacity.
    #[inline]
    #[must_use]
    pub fn get(&self, frame: Frames, channel: ChannelCount) -> Sample {
        self.samples[self.index(frame, channel)]
    }

    /// Write one sample (does not change `frame_length`)
    ///
    /// # Panics
    ///
    /// Panics if `frame` or `channel` is outside the buffer's capacity.
    #[inline]
    pub fn set(&mut self, frame: Frames, channel: ChannelCount, value: Sample) {
        let index = self.index(frame, channel);
        self.samples[index] = value;
    }

    /// Zero-fill `frames` on every channel
    pub fn silence(&mut self, frames: Range<Frames>) {
        let end = frames.end.min(self.capacity);
        let start = frames.start.min(end);
        match self.format.layout {
            SampleLayout::Planar => {
                for channel in self.samples.chunks_exact_mut(self.capacity.max(1)) {
                    channel[start..end].fill(0.0);
                }
            }
            SampleLayout::Interleaved => {
                let channels = self.format.channels;
                self.samples[start * channels..end * channels].fill(0.0);
            }
        }
    }

    /// Copy interleaved frames into the buffer starting at frame `offset`.
    ///
    /// Extends `frame_length` to cover the written range. Returns the number
    /// of frames written.
    pub fn write_interleaved(&mut self, source: &[Sample], offset: Frames) -> Result<Frames> {
        let channels = self.format.channels;
        let frames = source.len() / channels;
        self.check_capacity(offset + frames)?;

        for (i, frame) in source.chunks_exact(channels).enumerate() {
            for (channel, &sample) in frame.iter().enumerate() {
                self.set(offset + i, channel, sample);
            }
        }

        self.length = self.length.max(offset + frames);
        Ok(frames)
    }

    /// Append the populated frames to `dest` in interleaved order
    pub fn append_interleaved(&self, dest: &mut Vec<Sample>) {
        dest.reserve(self.length * self.format.channels);
        for frame in 0..self.length {
            for channel in 0..self.format.channels {
                dest.push(self.get(frame, channel));
            }
        }
    }

    /// Largest absolute sample value among the populated frames
    #[must_use]
    pub fn peak(&self) -> Sample {
        let mut peak = 0.0_f32;
        for frame in 0..self.length {
            for channel in 0..self.format.channels {
                peak = peak.max(self.get(frame, channel).abs());
            }
        }
        peak
    }

    fn check_capacity(&self, frames: Frames) -> Result<()> {
        if frames > self.capacity {
            return Err(Error::CapacityExceeded {
                requested: frames,
                capacity: self.capacity,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo() -> AudioFormat {
        AudioFormat::new(48000, 2).unwrap()
    }

    #[test]
    fn test_new_buffer_is_empty() {
        let buffer = SampleBuffer::new(stereo(), 256);
        assert_eq!(buffer.frame_capacity(), 256);
        assert_eq!(buffer.frame_length(), 0);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_write_beyond_capacity_fails() {
        let mut buffer = SampleBuffer::new(stereo(), 4);
        let data = vec![0.5; 2 * 3];

        assert_eq!(buffer.write_interleaved(&data, 1).unwrap(), 3);
        assert_eq!(buffer.frame_length(), 4);

        let err = buffer.write_interleaved(&data, 2).unwrap_err();
        assert!(matches!(
            err,
            Error::CapacityExceeded {
                requested: 5,
                capacity: 4
            }
        ));
    }

    #[test]
    fn test_set_frame_length_respects_capacity() {
        let mut buffer = SampleBuffer::new(stereo(), 8);
        assert!(buffer.set_frame_length(8).is_ok());
        assert!(buffer.set_frame_length(9).is_err());
        assert_eq!(buffer.frame_length(), 8);
    }

    #[test]
    fn test_clear_keeps_allocation() {
        let mut buffer = SampleBuffer::new(stereo(), 64);
        buffer.write_interleaved(&[1.0; 128], 0).unwrap();
        let ptr = buffer.as_ptr();

        buffer.clear();
        assert_eq!(buffer.frame_length(), 0);
        assert_eq!(buffer.frame_capacity(), 64);
        assert_eq!(buffer.as_ptr(), ptr);
    }

    #[test]
    fn test_planar_and_interleaved_agree() {
        let data = [1.0, -1.0, 2.0, -2.0, 3.0, -3.0];
        let mut planar = SampleBuffer::new(stereo(), 4);
        let mut interleaved = SampleBuffer::new(
            AudioFormat::with_layout(48000, 2, SampleLayout::Interleaved).unwrap(),
            4,
        );
        planar.write_interleaved(&data, 0).unwrap();
        interleaved.write_interleaved(&data, 0).unwrap();

        for frame in 0..3 {
            for channel in 0..2 {
                assert_eq!(planar.get(frame, channel), interleaved.get(frame, channel));
            }
        }

        let mut out = Vec::new();
        planar.append_interleaved(&mut out);
        assert_eq!(out, data);
    }

    #[test]
    fn test_silence_range() {
        let mut buffer = SampleBuffer::new(stereo(), 4);
        buffer.write_interleaved(&[1.0; 8], 0).unwrap();
        buffer.silence(2..4);

        assert_eq!(buffer.get(1, 1), 1.0);
        assert_eq!(buffer.get(2, 0), 0.0);
        assert_eq!(buffer.get(3, 1), 0.0);
    }

    #[test]
    fn test_peak() {
        let mut buffer = SampleBuffer::new(stereo(), 4);
        buffer.write_interleaved(&[0.1, -0.7, 0.3, 0.2], 0).unwrap();
        assert_eq!(buffer.peak(), 0.7);
    }
}
