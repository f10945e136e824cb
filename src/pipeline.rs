// src/pipeline.rs
//
// Per-feed orchestrator. One CrowdPipeline owns all mutable state for one
// camera feed; `analyze` runs the full frame-to-insight chain and never
// returns an error. Any failure inside the detector path degrades to the
// heuristic fallback estimator with the reason recorded in the result.

use crate::behavior::BehaviorAnalyzer;
use crate::config::PipelineConfig;
use crate::detection::{decode_person_boxes, nms};
use crate::error::PipelineError;
use crate::fallback::FallbackEstimator;
use crate::inference::Detector;
use crate::preprocessing::preprocess_roi;
use crate::risk::RiskEngine;
use crate::tracking::IdentityTracker;
use crate::types::{
    CrowdDensity, FlowDirection, Frame, FrameResult, RegionOfInterest, SpatialStats, TimeContext,
    TrackedPerson,
};
use anyhow::{anyhow, Result};
use chrono::Utc;
use serde::Serialize;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufWriter, Write as IoWrite};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Load-shedding hook, polled once at the top of every `analyze` call.
/// When stressed, the detector is skipped entirely for that frame.
pub trait ResourceMonitor: Send {
    fn is_stressed(&self) -> bool;
}

/// Shared-flag monitor; flip the handle from anywhere to shed load.
#[derive(Clone, Default)]
pub struct StressFlag(Arc<AtomicBool>);

impl StressFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_stressed(&self, stressed: bool) {
        self.0.store(stressed, Ordering::Relaxed);
    }
}

impl ResourceMonitor for StressFlag {
    fn is_stressed(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Monitor that never sheds load.
pub struct NoMonitor;

impl ResourceMonitor for NoMonitor {
    fn is_stressed(&self) -> bool {
        false
    }
}

/// Camera-side collaborator. `None` ends the analysis loop.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Option<Frame>;
}

/// Persistence-side collaborator for completed results.
pub trait ResultSink: Send {
    fn write(&mut self, result: &FrameResult) -> Result<()>;
}

/// One JSON document per line, flushed after every result so a tail of the
/// file is always whole documents.
pub struct JsonlSink<W: IoWrite> {
    writer: W,
}

impl JsonlSink<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: IoWrite> JsonlSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: IoWrite + Send> ResultSink for JsonlSink<W> {
    fn write(&mut self, result: &FrameResult) -> Result<()> {
        serde_json::to_writer(&mut self.writer, result)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStats {
    pub frames_processed: u64,
    pub frames_degraded: u64,
    /// Degradations caused by the detector itself (inference failure or
    /// malformed output), as opposed to load shedding or bad frames.
    pub detector_failures: u64,
    pub total_processing_ms: f64,
}

impl PipelineStats {
    pub fn avg_processing_ms(&self) -> f64 {
        if self.frames_processed == 0 {
            0.0
        } else {
            self.total_processing_ms / self.frames_processed as f64
        }
    }
}

pub struct CrowdPipeline {
    config: PipelineConfig,
    detector: Option<Box<dyn Detector>>,
    monitor: Box<dyn ResourceMonitor>,
    tracker: IdentityTracker,
    analyzer: BehaviorAnalyzer,
    history: VecDeque<FrameResult>,
    last_cleanup_ms: f64,
    stats: PipelineStats,
    /// Fixed wall-clock context for deterministic replay; `None` samples the
    /// local clock each frame.
    time_override: Option<TimeContext>,
}

impl CrowdPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            tracker: IdentityTracker::new(config.tracking.clone()),
            analyzer: BehaviorAnalyzer::new(config.behavior.clone()),
            config,
            detector: None,
            monitor: Box::new(NoMonitor),
            history: VecDeque::new(),
            last_cleanup_ms: 0.0,
            stats: PipelineStats::default(),
            time_override: None,
        }
    }

    pub fn with_detector(mut self, detector: Box<dyn Detector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn with_monitor(mut self, monitor: Box<dyn ResourceMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_time_context(mut self, time: TimeContext) -> Self {
        self.time_override = Some(time);
        self
    }

    /// Run the full analysis chain on one frame. Infallible by contract:
    /// detector failures, malformed output, bad frames and resource pressure
    /// all degrade to the fallback estimator instead of erroring.
    pub fn analyze(&mut self, frame: &Frame, roi: &RegionOfInterest) -> FrameResult {
        let started = Instant::now();
        let time = self.time_override.unwrap_or_else(TimeContext::now);

        let outcome = if self.monitor.is_stressed() {
            Err(PipelineError::ResourceExhausted)
        } else {
            self.run_detector_path(frame, roi, &time)
        };

        let mut result = match outcome {
            Ok(result) => result,
            Err(err) => {
                warn!("Analysis degraded to fallback estimator: {}", err);
                if matches!(
                    err,
                    PipelineError::Inference { .. } | PipelineError::MalformedOutput(_)
                ) {
                    self.stats.detector_failures += 1;
                }
                self.degraded_result(frame, roi, &time, err.degraded_reason())
            }
        };

        result.processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.stats.frames_processed += 1;
        if result.degraded {
            self.stats.frames_degraded += 1;
        }
        self.stats.total_processing_ms += result.processing_time_ms;

        self.push_history(result.clone(), frame.timestamp_ms);

        debug!(
            "Frame analyzed: {} person(s), risk {}, degraded={}",
            result.count,
            result.risk.level.as_str(),
            result.degraded
        );
        result
    }

    fn run_detector_path(
        &mut self,
        frame: &Frame,
        roi: &RegionOfInterest,
        time: &TimeContext,
    ) -> Result<FrameResult, PipelineError> {
        let detector = self.detector.as_mut().ok_or_else(|| PipelineError::Inference {
            source: anyhow!("no detector configured"),
        })?;

        let tensor = preprocess_roi(frame, roi, self.config.detection.input_size)?;
        let raw = detector.infer(&tensor, self.config.detection.input_size)?;
        let candidates = decode_person_boxes(&raw, &self.config.detection)?;
        let boxes = nms(
            &candidates,
            self.config.detection.iou_threshold,
            self.config.detection.max_detections,
        );

        let recent: &[FrameResult] = self.history.make_contiguous();
        let previous: &[TrackedPerson] = recent
            .last()
            .map(|r| r.tracking.as_slice())
            .unwrap_or(&[]);
        let prev_ts = recent.last().map(|r| r.frame_timestamp_ms);

        let tracked = self
            .tracker
            .update(&boxes, previous, frame.timestamp_ms, prev_ts);

        let dt_secs = prev_ts
            .map(|prev| ((frame.timestamp_ms - prev) / 1000.0) as f32)
            .filter(|&dt| dt > 1e-3)
            .unwrap_or(self.config.schedule.detection_interval_ms as f32 / 1000.0);

        let report = self
            .analyzer
            .analyze(&tracked, previous, recent, dt_secs, time);

        let count = tracked.len();
        let risk = RiskEngine::assess(count, &report.patterns, &report.flow, time);
        let recent_counts: Vec<usize> = recent.iter().map(|r| r.count).collect();
        let predictions = RiskEngine::predict(count, &recent_counts, &report.patterns, time);

        let confidence = if boxes.is_empty() {
            0.0
        } else {
            boxes.iter().map(|b| b.confidence).sum::<f32>() / boxes.len() as f32
        };

        Ok(FrameResult {
            count,
            confidence,
            person_ids: tracked.iter().map(|p| p.id).collect(),
            boxes,
            tracking: tracked,
            behavior_patterns: report.patterns,
            flow: report.flow,
            spatial: report.spatial,
            risk,
            predictions,
            crowd_density: CrowdDensity::classify(count),
            degraded: false,
            timestamp: Utc::now(),
            frame_timestamp_ms: frame.timestamp_ms,
            processing_time_ms: 0.0,
        })
    }

    /// Heuristic-only result for frames where the detector path is skipped
    /// or failed. Count comes from the fallback estimator; tracking and
    /// behavior are empty for the frame but history keeps accumulating.
    fn degraded_result(
        &mut self,
        frame: &Frame,
        roi: &RegionOfInterest,
        time: &TimeContext,
        reason: &str,
    ) -> FrameResult {
        let recent_counts: Vec<usize> = self.history.iter().map(|r| r.count).collect();
        let estimate = FallbackEstimator::estimate(frame, roi, &recent_counts, time);

        let mut risk =
            RiskEngine::assess(estimate.count, &[], &FlowDirection::still(), time);
        risk.risk_factors
            .push(format!("degraded mode: fallback estimator active ({})", reason));

        let predictions = RiskEngine::predict(estimate.count, &recent_counts, &[], time);

        FrameResult {
            count: estimate.count,
            confidence: estimate.confidence,
            boxes: Vec::new(),
            person_ids: Vec::new(),
            tracking: Vec::new(),
            behavior_patterns: Vec::new(),
            flow: FlowDirection::still(),
            spatial: SpatialStats::empty(),
            risk,
            predictions,
            crowd_density: CrowdDensity::classify(estimate.count),
            degraded: true,
            timestamp: Utc::now(),
            frame_timestamp_ms: frame.timestamp_ms,
            processing_time_ms: 0.0,
        }
    }

    fn push_history(&mut self, result: FrameResult, now_ms: f64) {
        self.history.push_back(result);
        while self.history.len() > self.config.history.max_len {
            self.history.pop_front();
        }

        if now_ms - self.last_cleanup_ms >= self.config.history.cleanup_interval_ms {
            let max_age = self.config.history.max_age_ms;
            let before = self.history.len();
            self.history
                .retain(|r| now_ms - r.frame_timestamp_ms <= max_age);
            if self.history.len() < before {
                info!(
                    "History cleanup dropped {} stale result(s)",
                    before - self.history.len()
                );
            }
            self.last_cleanup_ms = now_ms;
        }
    }

    pub fn history(&self) -> &VecDeque<FrameResult> {
        &self.history
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Drop all accumulated feed state. Stats survive; they describe the
    /// pipeline, not the feed.
    pub fn reset(&mut self) {
        self.history.clear();
        self.tracker.reset();
        self.last_cleanup_ms = 0.0;
    }
}

/// Fixed-interval driver connecting a frame source to a result sink.
/// Overlapping work is never queued: a tick that arrives while analysis is
/// still running is skipped, so a slow frame delays rather than stacks.
pub struct AnalysisLoop<S, K> {
    pipeline: CrowdPipeline,
    source: S,
    sink: K,
    roi: RegionOfInterest,
}

impl<S: FrameSource, K: ResultSink> AnalysisLoop<S, K> {
    pub fn new(pipeline: CrowdPipeline, source: S, sink: K, roi: RegionOfInterest) -> Self {
        Self {
            pipeline,
            source,
            sink,
            roi,
        }
    }

    /// Run until the source is exhausted. Sink failures end the loop with an
    /// error; analysis itself cannot fail.
    pub async fn run(mut self) -> Result<PipelineStats> {
        let interval = self.pipeline.config.schedule.detection_interval_ms;
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(interval));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Analysis loop started, interval {} ms", interval);

        loop {
            ticker.tick().await;
            let Some(frame) = self.source.next_frame() else {
                break;
            };
            let result = self.pipeline.analyze(&frame, &self.roi);
            self.sink.write(&result)?;
        }

        info!(
            "Analysis loop finished: {} frame(s), {} degraded",
            self.pipeline.stats.frames_processed, self.pipeline.stats.frames_degraded
        );
        Ok(self.pipeline.stats.clone())
    }
}
