//! Generate a test WAV file
//!
//! Useful for trying the offline renderer.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use hound::{WavSpec, WavWriter};
use std::f32::consts::PI;
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Shape {
    /// Sine tone at `--frequency`
    Sine,
    /// Single full-amplitude frame followed by silence
    Impulse,
    Silence,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Encoding {
    /// 32-bit float
    F32,
    /// 16-bit integer PCM
    I16,
    /// 24-bit integer PCM
    I24,
}

impl Encoding {
    const fn spec(self, sample_rate: u32, channels: u16) -> WavSpec {
        let (bits_per_sample, sample_format) = match self {
            Self::F32 => (32, hound::SampleFormat::Float),
            Self::I16 => (16, hound::SampleFormat::Int),
            Self::I24 => (24, hound::SampleFormat::Int),
        };
        WavSpec {
            channels,
            sample_rate,
            bits_per_sample,
            sample_format,
        }
    }
}

/// Generate a test WAV file
#[derive(Parser, Debug)]
#[command(name = "generate-test-wav")]
#[command(about = "Generate test WAV files for offline rendering", long_about = None)]
struct Args {
    /// Output WAV file
    #[arg(short, long)]
    output: PathBuf,

    /// Signal shape
    #[arg(long, value_enum, default_value_t = Shape::Sine)]
    shape: Shape,

    /// Sample encoding
    #[arg(short, long, value_enum, default_value_t = Encoding::F32)]
    encoding: Encoding,

    /// Sample rate (Hz)
    #[arg(short, long, default_value_t = 48000)]
    sample_rate: u32,

    /// Number of channels
    #[arg(short, long, default_value_t = 2)]
    channels: u16,

    /// Duration (seconds)
    #[arg(short, long, default_value_t = 5.0)]
    duration: f32,

    /// Frequency (Hz)
    #[arg(short, long, default_value_t = 440.0)]
    frequency: f32,

    /// Amplitude (0.0-1.0)
    #[arg(short, long, default_value_t = 0.5)]
    amplitude: f32,
}

fn main() -> Result<()> {
    let args = Args::parse();

    println!("Generating test WAV:");
    println!("  Output: {}", args.output.display());
    println!("  Shape: {:?}", args.shape);
    println!("  Encoding: {:?}", args.encoding);
    println!("  Sample rate: {} Hz", args.sample_rate);
    println!("  Channels: {}", args.channels);
    println!("  Duration: {:.1} seconds", args.duration);
    println!("  Frequency: {:.1} Hz", args.frequency);
    println!("  Amplitude: {:.2}", args.amplitude);

    let spec = args.encoding.spec(args.sample_rate, args.channels);
    let mut writer = WavWriter::create(&args.output, spec)
        .with_context(|| format!("Failed to create output file: {}", args.output.display()))?;

    let num_frames = (args.sample_rate as f32 * args.duration) as usize;
    let amplitude = args.amplitude.clamp(0.0, 1.0);

    for frame in 0..num_frames {
        let sample = match args.shape {
            Shape::Sine => {
                let t = frame as f32 / args.sample_rate as f32;
                amplitude * (2.0 * PI * args.frequency * t).sin()
            }
            Shape::Impulse if frame == 0 => amplitude,
            Shape::Impulse | Shape::Silence => 0.0,
        };

        // Write same sample to all channels
        for _ in 0..args.channels {
            match args.encoding {
                Encoding::F32 => writer.write_sample(sample),
                Encoding::I16 => writer.write_sample((sample * f32::from(i16::MAX)) as i16),
                Encoding::I24 => writer.write_sample((sample * 8_388_607.0) as i32), // 2^23 - 1
            }
            .context("Failed to write sample")?;
        }
    }

    writer.finalize().context("Failed to finalize WAV file")?;

    println!("Successfully wrote {num_frames} frames");
    Ok(())
}
