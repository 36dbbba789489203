//! WAV file reader and writer.
//!
//! Files are decoded to planar `f32` on the way in and encoded back to the
//! source file's sample encoding on the way out. Integer conversion goes
//! through `dasp` so that 8/16/24/32-bit PCM all map onto `[-1.0, 1.0)`.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use dasp::sample::{I24, Sample as _};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use offgraph_core::{AudioFormat, Error, Frames, Result, SampleBuffer};

use crate::io::{AudioSink, AudioSource};

/// How samples are encoded in the file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleEncoding {
    Int,
    Float,
}

/// On-disk sample encoding, carried from the input file to the output file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileSettings {
    pub bits_per_sample: u16,
    pub encoding: SampleEncoding,
}

impl FileSettings {
    /// 32-bit IEEE float
    pub const FLOAT32: Self = Self {
        bits_per_sample: 32,
        encoding: SampleEncoding::Float,
    };

    /// 16-bit signed PCM
    pub const PCM16: Self = Self {
        bits_per_sample: 16,
        encoding: SampleEncoding::Int,
    };

    fn from_spec(spec: WavSpec) -> Self {
        Self {
            bits_per_sample: spec.bits_per_sample,
            encoding: match spec.sample_format {
                SampleFormat::Int => SampleEncoding::Int,
                SampleFormat::Float => SampleEncoding::Float,
            },
        }
    }

    /// Check that the encoding is one we can convert
    pub fn validate(self) -> std::result::Result<(), String> {
        match (self.encoding, self.bits_per_sample) {
            (SampleEncoding::Int, 8 | 16 | 24 | 32) | (SampleEncoding::Float, 32) => Ok(()),
            (encoding, bits) => Err(format!("{bits}-bit {encoding:?} samples are not supported")),
        }
    }

    fn spec(self, format: AudioFormat) -> Result<WavSpec> {
        self.validate().map_err(Error::FormatUnsupported)?;
        let channels = u16::try_from(format.channels).map_err(|_| {
            Error::FormatUnsupported(format!("{} channels exceed the WAV limit", format.channels))
        })?;

        Ok(WavSpec {
            channels,
            sample_rate: format.sample_rate,
            bits_per_sample: self.bits_per_sample,
            sample_format: match self.encoding {
                SampleEncoding::Int => SampleFormat::Int,
                SampleEncoding::Float => SampleFormat::Float,
            },
        })
    }
}

impl Default for FileSettings {
    fn default() -> Self {
        Self::FLOAT32
    }
}

fn hound_error(error: hound::Error) -> Error {
    match error {
        hound::Error::IoError(e) => Error::Io(e),
        other => Error::Io(std::io::Error::other(other)),
    }
}

/// Decode samples into `buffer` starting at frame `offset`, returning whole frames written
fn fill<I>(buffer: &mut SampleBuffer, offset: Frames, channels: usize, samples: I) -> Result<Frames>
where
    I: Iterator<Item = std::result::Result<f32, hound::Error>>,
{
    let mut written = 0;
    for sample in samples {
        let sample = sample.map_err(hound_error)?;
        buffer.set(offset + written / channels, written % channels, sample);
        written += 1;
    }

    let frames = written / channels;
    buffer.set_frame_length(buffer.frame_length().max(offset + frames))?;
    Ok(frames)
}

/// Streaming WAV reader
pub struct AudioFileReader {
    reader: WavReader<BufReader<File>>,
    path: PathBuf,
    format: AudioFormat,
    settings: FileSettings,
    length: u64,
    position: u64,
}

impl AudioFileReader {
    /// Open a WAV file, returning the reader and its processing format
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, AudioFormat)> {
        let path = path.as_ref();
        let unreadable = |reason: String| Error::UnreadableFile {
            path: path.to_path_buf(),
            reason,
        };

        let reader = WavReader::open(path).map_err(|e| unreadable(e.to_string()))?;
        let spec = reader.spec();
        let settings = FileSettings::from_spec(spec);
        settings.validate().map_err(unreadable)?;
        let format = AudioFormat::new(spec.sample_rate, usize::from(spec.channels))
            .map_err(|e| unreadable(e.to_string()))?;
        let length = u64::from(reader.duration());

        tracing::info!(
            "Opened {}: {} frames, {}, {}-bit {:?}",
            path.display(),
            length,
            format,
            settings.bits_per_sample,
            settings.encoding
        );

        Ok((
            Self {
                reader,
                path: path.to_path_buf(),
                format,
                settings,
                length,
                position: 0,
            },
            format,
        ))
    }

    /// Encoding of the file on disk
    pub fn settings(&self) -> FileSettings {
        self.settings
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AudioSource for AudioFileReader {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn length(&self) -> Option<u64> {
        Some(self.length)
    }

    fn read_into(
        &mut self,
        buffer: &mut SampleBuffer,
        offset: Frames,
        max_frames: Frames,
    ) -> Result<Frames> {
        if buffer.channels() != self.format.channels {
            return Err(Error::FormatMismatch {
                expected: self.format,
                found: buffer.format(),
            });
        }

        let remaining = self.length - self.position;
        let frames = (max_frames as u64).min(remaining) as Frames;
        if offset + frames > buffer.frame_capacity() {
            return Err(Error::CapacityExceeded {
                requested: offset + frames,
                capacity: buffer.frame_capacity(),
            });
        }

        let channels = self.format.channels;
        let count = frames * channels;
        let samples = &mut self.reader;
        let read = match (self.settings.encoding, self.settings.bits_per_sample) {
            (SampleEncoding::Float, _) => {
                fill(buffer, offset, channels, samples.samples::<f32>().take(count))?
            }
            (SampleEncoding::Int, 8) => fill(
                buffer,
                offset,
                channels,
                samples
                    .samples::<i8>()
                    .take(count)
                    .map(|s| s.map(|v| v.to_sample::<f32>())),
            )?,
            (SampleEncoding::Int, 16) => fill(
                buffer,
                offset,
                channels,
                samples
                    .samples::<i16>()
                    .take(count)
                    .map(|s| s.map(|v| v.to_sample::<f32>())),
            )?,
            (SampleEncoding::Int, 24) => fill(
                buffer,
                offset,
                channels,
                samples
                    .samples::<i32>()
                    .take(count)
                    .map(|s| s.map(|v| I24::new_unchecked(v).to_sample::<f32>())),
            )?,
            (SampleEncoding::Int, _) => fill(
                buffer,
                offset,
                channels,
                samples
                    .samples::<i32>()
                    .take(count)
                    .map(|s| s.map(|v| v.to_sample::<f32>())),
            )?,
        };

        self.position += read as u64;
        if read < frames {
            tracing::warn!(
                "{} ended early: expected {} more frames, got {}",
                self.path.display(),
                frames,
                read
            );
        }
        Ok(read)
    }
}

/// Streaming WAV writer.
///
/// Dropping the writer without calling [`AudioSink::finalize`] still closes
/// the file, but errors raised while doing so are lost.
pub struct AudioFileWriter {
    writer: Option<WavWriter<BufWriter<File>>>,
    path: PathBuf,
    format: AudioFormat,
    settings: FileSettings,
    frames_written: u64,
}

impl AudioFileWriter {
    /// Create (or truncate) a WAV file with the given format and encoding
    pub fn create(
        path: impl AsRef<Path>,
        format: AudioFormat,
        settings: FileSettings,
    ) -> Result<Self> {
        let path = path.as_ref();
        let spec = settings.spec(format)?;
        let writer = WavWriter::create(path, spec).map_err(|e| Error::UnwritableDestination {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        tracing::debug!("Created {} ({}, {:?})", path.display(), format, settings);

        Ok(Self {
            writer: Some(writer),
            path: path.to_path_buf(),
            format,
            settings,
            frames_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

fn encode(
    writer: &mut WavWriter<BufWriter<File>>,
    settings: FileSettings,
    sample: f32,
) -> std::result::Result<(), hound::Error> {
    match (settings.encoding, settings.bits_per_sample) {
        (SampleEncoding::Float, _) => writer.write_sample(sample),
        (SampleEncoding::Int, 8) => writer.write_sample(sample.clamp(-1.0, 1.0).to_sample::<i8>()),
        (SampleEncoding::Int, 16) => {
            writer.write_sample(sample.clamp(-1.0, 1.0).to_sample::<i16>())
        }
        (SampleEncoding::Int, 24) => {
            writer.write_sample(sample.clamp(-1.0, 1.0).to_sample::<I24>().inner())
        }
        (SampleEncoding::Int, _) => {
            writer.write_sample(sample.clamp(-1.0, 1.0).to_sample::<i32>())
        }
    }
}

impl AudioSink for AudioFileWriter {
    fn write(&mut self, buffer: &SampleBuffer) -> Result<()> {
        if buffer.channels() != self.format.channels {
            return Err(Error::FormatMismatch {
                expected: self.format,
                found: buffer.format(),
            });
        }

        let writer = self.writer.as_mut().ok_or_else(|| {
            Error::Io(std::io::Error::other("writer has already been finalized"))
        })?;

        for frame in 0..buffer.frame_length() {
            for channel in 0..buffer.channels() {
                encode(writer, self.settings, buffer.get(frame, channel)).map_err(hound_error)?;
            }
        }

        self.frames_written += buffer.frame_length() as u64;
        Ok(())
    }

    fn finalize(mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize().map_err(hound_error)?;
            tracing::debug!(
                "Finalized {} ({} frames)",
                self.path.display(),
                self.frames_written
            );
        }
        Ok(())
    }
}
