// End-to-end pipeline behavior through the public API: scripted detector
// outputs in, FrameResults out, no real model anywhere.

use crowdwatch::config::PipelineConfig;
use crowdwatch::error::PipelineError;
use crowdwatch::inference::{Detector, RawOutput};
use crowdwatch::pipeline::{AnalysisLoop, CrowdPipeline, FrameSource, JsonlSink, ResultSink};
use crowdwatch::types::{Frame, RegionOfInterest, TimeContext};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const ATTRS: usize = 84; // 4 geometry rows + 80 class rows

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Raw output from explicit (cx, cy, w, h, person_conf) anchors in tensor
/// pixels.
fn raw_output(anchors: &[(f32, f32, f32, f32, f32)]) -> RawOutput {
    let n = anchors.len();
    let mut data = vec![0.0f32; ATTRS * n];
    for (i, &(cx, cy, w, h, conf)) in anchors.iter().enumerate() {
        data[i] = cx;
        data[n + i] = cy;
        data[2 * n + i] = w;
        data[3 * n + i] = h;
        data[4 * n + i] = conf;
    }
    RawOutput {
        data,
        shape: vec![1, ATTRS, n],
    }
}

struct ScriptedDetector {
    outputs: VecDeque<Result<RawOutput, PipelineError>>,
}

impl ScriptedDetector {
    fn new(outputs: Vec<Result<RawOutput, PipelineError>>) -> Self {
        Self {
            outputs: outputs.into(),
        }
    }
}

impl Detector for ScriptedDetector {
    fn infer(&mut self, _: &[f32], _: usize) -> Result<RawOutput, PipelineError> {
        self.outputs
            .pop_front()
            .unwrap_or_else(|| Err(PipelineError::MalformedOutput("script exhausted".into())))
    }
}

fn gray_frame(timestamp_ms: f64) -> Frame {
    Frame {
        data: vec![120; 96 * 72 * 3],
        width: 96,
        height: 72,
        timestamp_ms,
    }
}

fn pipeline(outputs: Vec<Result<RawOutput, PipelineError>>) -> CrowdPipeline {
    CrowdPipeline::new(PipelineConfig::default())
        .with_detector(Box::new(ScriptedDetector::new(outputs)))
        .with_time_context(TimeContext::at_hour(12))
}

#[test]
fn overlapping_anchors_collapse_to_one_person() {
    init_logging();
    // Two anchors over the same body: NMS keeps the stronger one.
    let mut p = pipeline(vec![Ok(raw_output(&[
        (320.0, 320.0, 80.0, 160.0, 0.9),
        (324.0, 322.0, 80.0, 160.0, 0.7),
    ]))]);

    let result = p.analyze(&gray_frame(0.0), &RegionOfInterest::full());

    assert!(!result.degraded);
    assert_eq!(result.count, 1);
    assert_eq!(result.boxes.len(), 1);
    assert!((result.boxes[0].confidence - 0.9).abs() < 1e-6);
}

#[test]
fn detector_failure_never_panics_or_errors() {
    init_logging();
    let mut p = pipeline(vec![
        Ok(raw_output(&[(320.0, 320.0, 80.0, 160.0, 0.9)])),
        Err(PipelineError::Inference {
            source: anyhow::anyhow!("session lost"),
        }),
        Ok(raw_output(&[(320.0, 320.0, 80.0, 160.0, 0.9)])),
    ]);
    let roi = RegionOfInterest::full();

    let healthy = p.analyze(&gray_frame(0.0), &roi);
    let degraded = p.analyze(&gray_frame(500.0), &roi);
    let recovered = p.analyze(&gray_frame(1000.0), &roi);

    assert!(!healthy.degraded);
    assert!(degraded.degraded);
    assert!(degraded
        .risk
        .risk_factors
        .iter()
        .any(|f| f.contains("degraded mode")));
    // Fallback blends history, so the estimate stays grounded.
    assert!(degraded.count <= healthy.count + 1);
    assert!(!recovered.degraded);
}

#[test]
fn identity_survives_across_frames() {
    init_logging();
    // Same person drifting right a little each frame.
    let frames: Vec<_> = (0..3)
        .map(|i| {
            Ok(raw_output(&[(
                320.0 + i as f32 * 8.0,
                320.0,
                80.0,
                160.0,
                0.9,
            )]))
        })
        .collect();
    let mut p = pipeline(frames);
    let roi = RegionOfInterest::full();

    let ids: Vec<u64> = (0..3)
        .map(|i| {
            let r = p.analyze(&gray_frame(i as f64 * 500.0), &roi);
            assert_eq!(r.count, 1);
            r.person_ids[0]
        })
        .collect();

    assert_eq!(ids[0], ids[1]);
    assert_eq!(ids[1], ids[2]);
}

#[test]
fn malformed_output_shape_degrades() {
    init_logging();
    let mut p = pipeline(vec![Ok(RawOutput {
        data: vec![0.0; 7],
        shape: vec![7],
    })]);

    let result = p.analyze(&gray_frame(0.0), &RegionOfInterest::full());
    assert!(result.degraded);
    assert!(result
        .risk
        .risk_factors
        .iter()
        .any(|f| f.contains("malformed detector output")));
}

struct ScriptedSource {
    frames: VecDeque<Frame>,
}

impl FrameSource for ScriptedSource {
    fn next_frame(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }
}

/// Sink collecting counts; shared so the test can inspect them after the
/// loop consumes the sink.
#[derive(Clone)]
struct CollectingSink(Arc<Mutex<Vec<usize>>>);

impl ResultSink for CollectingSink {
    fn write(&mut self, result: &crowdwatch::FrameResult) -> anyhow::Result<()> {
        self.0.lock().unwrap().push(result.count);
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn loop_processes_frames_in_order_until_source_ends() {
    init_logging();
    let outputs = vec![
        Ok(raw_output(&[(320.0, 320.0, 80.0, 160.0, 0.9)])),
        Ok(raw_output(&[
            (200.0, 320.0, 80.0, 160.0, 0.9),
            (440.0, 320.0, 80.0, 160.0, 0.9),
        ])),
        Ok(raw_output(&[])),
    ];
    let source = ScriptedSource {
        frames: (0..3).map(|i| gray_frame(i as f64 * 500.0)).collect(),
    };
    let sink = CollectingSink(Arc::new(Mutex::new(Vec::new())));
    let counts = sink.clone();

    let stats = AnalysisLoop::new(
        pipeline(outputs),
        source,
        sink,
        RegionOfInterest::full(),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(stats.frames_processed, 3);
    assert_eq!(stats.frames_degraded, 0);
    assert_eq!(*counts.0.lock().unwrap(), vec![1, 2, 0]);
}

/// Sink recording how far into virtual time each result lands.
struct TimingSink {
    start: tokio::time::Instant,
    times: Arc<Mutex<Vec<Duration>>>,
}

impl ResultSink for TimingSink {
    fn write(&mut self, _: &crowdwatch::FrameResult) -> anyhow::Result<()> {
        self.times.lock().unwrap().push(self.start.elapsed());
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn stalled_loop_skips_missed_ticks_instead_of_bursting() {
    init_logging();
    let outputs = (0..3)
        .map(|_| Ok(raw_output(&[(320.0, 320.0, 80.0, 160.0, 0.9)])))
        .collect();
    let source = ScriptedSource {
        frames: (0..3).map(|i| gray_frame(i as f64 * 500.0)).collect(),
    };

    let times = Arc::new(Mutex::new(Vec::new()));
    let sink = TimingSink {
        start: tokio::time::Instant::now(),
        times: times.clone(),
    };

    let handle = tokio::spawn(
        AnalysisLoop::new(pipeline(outputs), source, sink, RegionOfInterest::full()).run(),
    );

    // Let the first tick fire and frame one complete.
    tokio::time::sleep(Duration::from_millis(10)).await;
    // Stall past five 500 ms intervals. The overdue tick must fire once and
    // the schedule resync to the next interval boundary, not replay every
    // missed tick back to back.
    tokio::time::advance(Duration::from_millis(2600)).await;

    let stats = handle.await.unwrap().unwrap();
    assert_eq!(stats.frames_processed, 3);

    let times = times.lock().unwrap();
    assert_eq!(times.len(), 3);
    assert!(times[1] >= Duration::from_millis(2600));
    assert!(
        times[2].saturating_sub(times[1]) >= Duration::from_millis(300),
        "ticks stacked: {:?}",
        *times
    );
}

#[test]
fn jsonl_output_round_trips_through_serde() {
    init_logging();
    let mut p = pipeline(vec![Ok(raw_output(&[(320.0, 320.0, 80.0, 160.0, 0.9)]))]);
    let result = p.analyze(&gray_frame(0.0), &RegionOfInterest::full());

    let mut sink = JsonlSink::new(Vec::new());
    sink.write(&result).unwrap();
    let written = String::from_utf8(sink.into_inner()).unwrap();

    let doc: serde_json::Value = serde_json::from_str(written.trim()).unwrap();
    assert_eq!(doc["count"], 1);
    assert_eq!(doc["degraded"], false);
    assert_eq!(doc["crowd_density"], "low");
    assert!(doc["predictions"]["horizon_counts"]["1"].is_u64());
}
