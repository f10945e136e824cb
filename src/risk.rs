// src/risk.rs
//
// Additive risk scoring and multi-horizon occupancy forecasting. Both are
// pure functions of the current frame plus the history window; no I/O, no
// randomness, so identical inputs always produce identical assessments.

use crate::types::{
    BehaviorKind, BehaviorPattern, CrowdDensity, FlowDirection, PredictionResult, RiskAssessment,
    RiskLevel, TimeContext, TrendDirection,
};
use std::collections::BTreeMap;
use tracing::debug;

/// Expected occupancy multiplier by hour of day. Morning and evening
/// visiting peaks run hot; the small hours idle near empty.
pub const HOURLY_MULTIPLIER: [f32; 24] = [
    0.2, 0.2, 0.2, 0.3, 0.5, 1.0, // 00-05
    2.2, 2.6, 2.8, 2.4, // 06-09 morning peak
    1.4, 1.2, 1.3, 1.1, 1.0, 1.1, 1.4, // 10-16 midday plateau
    2.4, 2.8, 2.6, 2.2, // 17-20 evening peak
    1.2, 0.8, 0.4, // 21-23 wind-down
];

/// Forecast horizons in minutes with how strongly the observed trend is
/// extrapolated at each. Short horizons stay close to the present.
const HORIZONS: [(u32, f32); 4] = [(1, 0.1), (5, 0.3), (15, 0.6), (30, 1.0)];

/// Relative count change below this is reported as a stable trend.
const TREND_EPSILON: f32 = 0.1;

/// Flow velocity under this with a large crowd reads as dangerous stalling.
const SLOW_FLOW: f32 = 0.01;

pub struct RiskEngine;

impl RiskEngine {
    /// Score the current frame. Factors accumulate additively and the total
    /// is clamped to [0, 1] before level mapping.
    pub fn assess(
        count: usize,
        patterns: &[BehaviorPattern],
        flow: &FlowDirection,
        time: &TimeContext,
    ) -> RiskAssessment {
        let mut score = 0.0f32;
        let mut factors = Vec::new();

        let density = CrowdDensity::classify(count);
        score += (count as f32 / 50.0).min(1.0) * 0.4;
        if density >= CrowdDensity::High {
            factors.push(format!("{} crowd density ({} people)", density.as_str(), count));
        }

        let group_patterns = patterns
            .iter()
            .filter(|p| {
                matches!(
                    p.kind,
                    BehaviorKind::Clustering | BehaviorKind::Gathering | BehaviorKind::Queuing
                )
            })
            .count();
        if group_patterns > 2 {
            score += 0.2;
            factors.push(format!("{} simultaneous group formations", group_patterns));
        }

        if flow.bottleneck {
            score += 0.3;
            factors.push("bottleneck forming".to_string());
        }

        if flow.velocity_magnitude < SLOW_FLOW && count >= 25 {
            score += 0.2;
            factors.push("large crowd with stalled movement".to_string());
        }

        if time.is_peak_hour {
            score += 0.25;
            factors.push("peak visiting hours".to_string());
        }
        if time.is_auspicious {
            score += 0.25;
            factors.push("auspicious window, influx expected".to_string());
        }

        let score = score.clamp(0.0, 1.0);
        let level = if score > 0.8 {
            RiskLevel::Critical
        } else if score > 0.6 {
            RiskLevel::High
        } else if score > 0.4 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        debug!("Risk score {:.2} -> {}", score, level.as_str());

        RiskAssessment {
            level,
            score,
            safety_score: (1.0 - score) * 100.0,
            evacuation_urgency: score,
            risk_factors: factors,
            recommendations: recommendations(level, count, flow),
        }
    }

    /// Forecast occupancy at each horizon from the current count, the recent
    /// count trend, the hourly profile and active behavior patterns.
    pub fn predict(
        current_count: usize,
        recent_counts: &[usize],
        patterns: &[BehaviorPattern],
        time: &TimeContext,
    ) -> PredictionResult {
        let trend = count_trend(recent_counts);
        let hourly = HOURLY_MULTIPLIER[time.hour as usize % 24];
        let behavior = behavior_multiplier(patterns);

        let mut horizon_counts = BTreeMap::new();
        let mut peak = current_count;
        for (minutes, trend_weight) in HORIZONS {
            let forecast =
                current_count as f32 * hourly * behavior * (1.0 + trend * trend_weight);
            let forecast = forecast.round().max(0.0) as usize;
            peak = peak.max(forecast);
            horizon_counts.insert(minutes, forecast);
        }

        let direction = if trend > TREND_EPSILON {
            TrendDirection::Increasing
        } else if trend < -TREND_EPSILON {
            TrendDirection::Decreasing
        } else {
            TrendDirection::Stable
        };

        // More history, more confidence in the trend term.
        let confidence = (0.3 + 0.05 * recent_counts.len() as f32).min(0.8);

        PredictionResult {
            horizon_counts,
            trend: direction,
            confidence,
            risk_level: density_risk(CrowdDensity::classify(peak)),
        }
    }
}

/// How many of the newest counts the trend looks at. The history buffer can
/// hold more; older samples say little about the next half hour.
const TREND_WINDOW: usize = 10;

/// Relative change between the older and newer halves of the newest counts.
/// Needs at least four samples; returns 0.0 otherwise.
fn count_trend(recent_counts: &[usize]) -> f32 {
    let window = &recent_counts[recent_counts.len().saturating_sub(TREND_WINDOW)..];
    if window.len() < 4 {
        return 0.0;
    }
    let mid = window.len() / 2;
    let older = window[..mid].iter().sum::<usize>() as f32 / mid as f32;
    let newer = window[mid..].iter().sum::<usize>() as f32 / (window.len() - mid) as f32;
    if older > 0.0 {
        (newer - older) / older
    } else if newer > 0.0 {
        1.0
    } else {
        0.0
    }
}

/// Active movement and grouping nudge the forecast upward, capped at 1.5x.
/// Exactly 1.0 when no patterns are active.
fn behavior_multiplier(patterns: &[BehaviorPattern]) -> f32 {
    let mut mult = 1.0f32;
    for pattern in patterns {
        mult += match pattern.kind {
            BehaviorKind::Flowing => 0.1,
            BehaviorKind::Clustering | BehaviorKind::Gathering => 0.05,
            _ => 0.0,
        };
    }
    mult.min(1.5)
}

fn density_risk(density: CrowdDensity) -> RiskLevel {
    match density {
        CrowdDensity::Low => RiskLevel::Low,
        CrowdDensity::Moderate => RiskLevel::Medium,
        CrowdDensity::High => RiskLevel::High,
        CrowdDensity::Critical => RiskLevel::Critical,
    }
}

fn recommendations(level: RiskLevel, count: usize, flow: &FlowDirection) -> Vec<String> {
    let mut recs = Vec::new();
    match level {
        RiskLevel::Critical => {
            recs.push("restrict entry until occupancy drops".to_string());
            recs.push("deploy staff to all exits".to_string());
        }
        RiskLevel::High => {
            recs.push("slow entry rate and open secondary exits".to_string());
        }
        RiskLevel::Medium => {
            recs.push("increase monitoring frequency".to_string());
        }
        RiskLevel::Low => {}
    }
    if flow.bottleneck {
        recs.push("clear the congestion point before it locks up".to_string());
    }
    if count >= 25 && flow.velocity_magnitude < SLOW_FLOW {
        recs.push("encourage circulation through announcements".to_string());
    }
    recs
}
