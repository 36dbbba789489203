//! Offline renderer
//!
//! Renders a WAV file through a player -> reverb -> mixer graph (or any graph
//! described by a session file) faster than real time, writing the result
//! with the input file's encoding.

use anyhow::{Context, Result};
use clap::Parser;
use offgraph_audio::builtin::ReverbPreset;
use offgraph_audio::file::AudioFileWriter;
use offgraph_audio::session::BuiltSession;
use offgraph_audio::{RenderSession, Session, TailPolicy};
use offgraph_core::{Frames, quantum_sizes};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Offline audio graph renderer
#[derive(Parser, Debug)]
#[command(name = "offgraph")]
#[command(about = "Render WAV files through an audio graph offline", long_about = None)]
struct Args {
    /// Input WAV file
    #[arg(short, long, required_unless_present = "session")]
    input: Option<PathBuf>,

    /// Output WAV file
    #[arg(short, long)]
    output: PathBuf,

    /// Reverb factory preset
    #[arg(short, long, default_value = "medium-hall")]
    preset: ReverbPreset,

    /// Reverb wet/dry mix (percent, 0 to 100)
    #[arg(short, long, default_value_t = 50.0, value_parser = parse_percent)]
    wet_dry_mix: f32,

    /// Largest number of frames rendered per pull
    #[arg(short, long, default_value_t = quantum_sizes::QUANTUM_4096)]
    max_frames: Frames,

    /// Stop at the end of the input instead of rendering the reverb tail
    #[arg(long)]
    no_tail: bool,

    /// Upper bound on rendered tail (seconds), applied to the reverb as well
    #[arg(long, conflicts_with = "no_tail", value_parser = parse_seconds)]
    max_tail_seconds: Option<f64>,

    /// Render the graph described by a session file instead of the reverb chain
    #[arg(short, long, conflicts_with_all = ["input", "preset", "wet_dry_mix"])]
    session: Option<PathBuf>,

    /// Save the session being rendered to a file
    #[arg(long)]
    save_session: Option<PathBuf>,
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "offgraph=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let session = load_session(&args)?;

    if let Some(path) = &args.save_session {
        session
            .save(path)
            .with_context(|| format!("Failed to save session: {}", path.display()))?;
        tracing::info!("Session saved to {:?}", path);
    }

    render(&session, &args.output)?;

    println!("Output {}", args.output.display());
    println!("offline rendering completed");
    Ok(())
}

/// Session from `--session`, or the reverb chain over `--input`
fn load_session(args: &Args) -> Result<Session> {
    let mut session = match (&args.session, &args.input) {
        (Some(path), _) => Session::load(path)
            .with_context(|| format!("Failed to load session: {}", path.display()))?,
        (None, Some(input)) => {
            Session::reverb_chain(input, args.preset, args.wet_dry_mix, args.max_frames)
        }
        (None, None) => anyhow::bail!("Either --input or --session is required"),
    };

    if args.no_tail {
        session.set_tail(TailPolicy::Truncate);
    } else if let Some(max_seconds) = args.max_tail_seconds {
        session.set_tail(TailPolicy::Render { max_seconds });
    }
    Ok(session)
}

fn parse_percent(value: &str) -> Result<f32, String> {
    let percent: f32 = value.parse().map_err(|e| format!("{e}"))?;
    if (0.0..=100.0).contains(&percent) {
        Ok(percent)
    } else {
        Err(format!("{value} is not between 0 and 100"))
    }
}

fn parse_seconds(value: &str) -> Result<f64, String> {
    let seconds: f64 = value.parse().map_err(|e| format!("{e}"))?;
    if seconds.is_finite() && seconds >= 0.0 {
        Ok(seconds)
    } else {
        Err(format!("{value} is not a finite, non-negative number of seconds"))
    }
}

fn render(session: &Session, output: &Path) -> Result<()> {
    let BuiltSession {
        mut engine,
        format,
        settings,
        source_frames,
        options,
    } = session.build().context("Failed to build render graph")?;

    tracing::info!("Rendering '{}'", session.name);
    tracing::info!("Output: {:?}", output);
    tracing::info!("Format: {}, {} frames of source", format, source_frames);
    tracing::info!("Tail: {:?}", options.tail);

    engine.start().context("Failed to start offline engine")?;

    let writer = AudioFileWriter::create(output, format, settings)
        .with_context(|| format!("Failed to create output file: {}", output.display()))?;

    let report = RenderSession::new(writer, source_frames, options)
        .run(&mut engine)
        .context("Offline render failed")?;

    tracing::info!(
        "Wrote {} frames ({} source pulls, {} tail pulls, {} retries)",
        report.rendered_frames,
        report.source_pulls,
        report.tail_pulls,
        report.busy_retries + report.insufficient_data_retries
    );
    Ok(())
}
