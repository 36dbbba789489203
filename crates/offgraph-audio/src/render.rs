//! Offline render loop.
//!
//! [`RenderSession`] drives a started [`OfflineEngine`] until the source's
//! frames have been rendered, writing every successful pull to an
//! [`AudioSink`]. Pull sizes are `min(max_frames, remaining)`, so a source of
//! `N` frames takes exactly `ceil(N / max_frames)` successful pulls. After the
//! source, an optional tail phase keeps pulling full quanta until the graph
//! reports `Drained` or a time bound is hit.

use offgraph_core::{Error, Frames, Result};
use offgraph_node::RenderStatus;
use serde::{Deserialize, Serialize};

use crate::engine::OfflineEngine;
use crate::io::AudioSink;

/// Default upper bound on rendered tail
pub const DEFAULT_MAX_TAIL_SECONDS: f64 = 30.0;

/// Default number of back-to-back retryable statuses tolerated for one pull
pub const DEFAULT_MAX_CONSECUTIVE_RETRIES: u32 = 10_000;

/// What happens after the source's frames have been rendered
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TailPolicy {
    /// Stop exactly at the end of the source
    Truncate,
    /// Keep rendering until the graph drains, for at most `max_seconds`
    Render { max_seconds: f64 },
}

impl TailPolicy {
    /// Whether the tail bound is a finite, non-negative number of seconds
    pub fn is_valid(&self) -> bool {
        match *self {
            Self::Truncate => true,
            Self::Render { max_seconds } => max_seconds.is_finite() && max_seconds >= 0.0,
        }
    }
}

impl Default for TailPolicy {
    fn default() -> Self {
        Self::Render {
            max_seconds: DEFAULT_MAX_TAIL_SECONDS,
        }
    }
}

/// Render loop settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderOptions {
    pub tail: TailPolicy,
    /// Consecutive retryable statuses before the render fails
    pub max_consecutive_retries: u32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            tail: TailPolicy::default(),
            max_consecutive_retries: DEFAULT_MAX_CONSECUTIVE_RETRIES,
        }
    }
}

/// Counters collected over one render
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderReport {
    /// Frames the source phase was asked to cover
    pub source_frames: u64,
    /// Frames written to the sink, tail included
    pub rendered_frames: u64,
    /// Frames written after the source phase
    pub tail_frames: u64,
    /// Successful pulls during the source phase
    pub source_pulls: u64,
    /// Successful pulls during the tail phase
    pub tail_pulls: u64,
    /// Calls to the sink's `write`
    pub write_calls: u64,
    /// Pulls answered with `InsufficientUpstreamData`
    pub insufficient_data_retries: u64,
    /// Pulls answered with `CannotRenderInCurrentContext`
    pub busy_retries: u64,
    /// Whether the last pull reported `Drained`
    pub drained: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Source,
    Tail,
}

/// One offline render from a started engine into a sink
pub struct RenderSession<S: AudioSink> {
    sink: S,
    options: RenderOptions,
    report: RenderReport,
    consecutive_retries: u32,
}

impl<S: AudioSink> RenderSession<S> {
    /// Prepare a render of `source_frames` frames into `sink`
    pub fn new(sink: S, source_frames: u64, options: RenderOptions) -> Self {
        Self {
            sink,
            options,
            report: RenderReport {
                source_frames,
                ..RenderReport::default()
            },
            consecutive_retries: 0,
        }
    }

    /// Render to completion, then stop the engine and finalize the sink.
    ///
    /// On failure the engine is stopped and the sink dropped without being
    /// finalized.
    pub fn run(mut self, engine: &mut OfflineEngine) -> Result<RenderReport> {
        let result = self.render_all(engine);
        engine.stop();

        let Self { sink, report, .. } = self;
        match result {
            Ok(()) => {
                sink.finalize()?;
                tracing::info!(
                    "Rendered {} frames ({} tail) in {} writes",
                    report.rendered_frames,
                    report.tail_frames,
                    report.write_calls
                );
                Ok(report)
            }
            Err(e) => {
                tracing::error!("Render failed after {} frames: {}", report.rendered_frames, e);
                Err(e)
            }
        }
    }

    fn render_all(&mut self, engine: &mut OfflineEngine) -> Result<()> {
        if !engine.is_running() {
            return Err(Error::NotRunning);
        }
        let quantum = engine.max_frames().ok_or(Error::NotConfigured)?;
        let source_frames = self.report.source_frames;

        while engine.sample_time() < source_frames {
            let remaining = source_frames - engine.sample_time();
            let frames = Frames::try_from(remaining).map_or(quantum, |r| r.min(quantum));
            self.pull(engine, frames, Phase::Source)?;
        }

        let TailPolicy::Render { max_seconds } = self.options.tail else {
            return Ok(());
        };
        let format = engine.format().ok_or(Error::NotConfigured)?;
        let end = source_frames.saturating_add(format.frames_for_seconds(max_seconds));

        while !self.report.drained && engine.sample_time() < end {
            let remaining = end - engine.sample_time();
            let frames = Frames::try_from(remaining).map_or(quantum, |r| r.min(quantum));
            self.pull(engine, frames, Phase::Tail)?;
        }

        if !self.report.drained {
            tracing::warn!(
                "Tail still sounding after {} s, truncating",
                max_seconds
            );
        }
        Ok(())
    }

    fn pull(&mut self, engine: &mut OfflineEngine, frames: Frames, phase: Phase) -> Result<()> {
        match engine.render_offline(frames)? {
            RenderStatus::Success => self.commit(engine, phase, false),
            RenderStatus::Drained => self.commit(engine, phase, true),
            RenderStatus::InsufficientUpstreamData => {
                self.report.insufficient_data_retries += 1;
                self.retry(engine)
            }
            RenderStatus::CannotRenderInCurrentContext => {
                self.report.busy_retries += 1;
                self.retry(engine)
            }
            RenderStatus::Error(e) => Err(Error::Render(e.to_string())),
        }
    }

    fn commit(&mut self, engine: &OfflineEngine, phase: Phase, drained: bool) -> Result<()> {
        let buffer = engine.buffer().ok_or(Error::NotRunning)?;
        let frames = buffer.frame_length() as u64;
        if frames == 0 {
            return self.retry(engine);
        }

        self.sink.write(buffer)?;
        self.consecutive_retries = 0;
        self.report.write_calls += 1;
        self.report.rendered_frames += frames;
        self.report.drained = drained;
        match phase {
            Phase::Source => self.report.source_pulls += 1,
            Phase::Tail => {
                self.report.tail_pulls += 1;
                self.report.tail_frames += frames;
            }
        }

        if self.report.write_calls % 256 == 0 {
            tracing::debug!(
                "Rendered {} / {} source frames",
                engine.sample_time().min(self.report.source_frames),
                self.report.source_frames
            );
        }
        Ok(())
    }

    fn retry(&mut self, engine: &OfflineEngine) -> Result<()> {
        self.consecutive_retries += 1;
        if self.consecutive_retries > self.options.max_consecutive_retries {
            return Err(Error::Render(format!(
                "no progress at sample time {} after {} consecutive retries",
                engine.sample_time(),
                self.options.max_consecutive_retries
            )));
        }
        Ok(())
    }
}
