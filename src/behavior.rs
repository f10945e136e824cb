// src/behavior.rs
//
// Spatial and temporal pattern analysis over the current tracked set plus a
// short history window. Clustering, queue lines, frame-level flow and the
// density grid are all heuristic but deterministic: same inputs, same
// patterns.

use crate::config::BehaviorConfig;
use crate::types::{
    BehaviorKind, BehaviorPattern, CrowdDensity, FlowDirection, FrameResult, Hotspot,
    SpatialStats, TimeContext, TrackedPerson,
};
use tracing::debug;

/// Group spread below this is a tight huddle (gathering), above the upper
/// bound a loose spread-out group (dispersing); in between plain clustering.
const GATHERING_SPREAD: f32 = 0.04;
const DISPERSING_SPREAD: f32 = 0.09;

/// Mean per-frame displacement below this counts as "standing still" for
/// bottleneck detection.
const STALL_DISPLACEMENT: f32 = 0.005;

/// Flow consistency above this plus an auspicious-time window marks a
/// directed procession.
const RITUAL_CONSISTENCY: f32 = 0.7;

#[derive(Debug, Clone)]
pub struct BehaviorReport {
    pub patterns: Vec<BehaviorPattern>,
    pub flow: FlowDirection,
    pub spatial: SpatialStats,
}

pub struct BehaviorAnalyzer {
    config: BehaviorConfig,
}

impl BehaviorAnalyzer {
    pub fn new(config: BehaviorConfig) -> Self {
        Self { config }
    }

    /// Analyze the current frame against the previous tracked set and the
    /// recent history window (oldest first).
    pub fn analyze(
        &self,
        current: &[TrackedPerson],
        previous: &[TrackedPerson],
        recent: &[FrameResult],
        dt_secs: f32,
        time: &TimeContext,
    ) -> BehaviorReport {
        let centers: Vec<(f32, f32)> = current.iter().map(|p| p.center).collect();
        let groups = proximity_groups(&centers, self.config.proximity_threshold);

        let mut patterns = Vec::new();

        for group in &groups {
            if group.len() >= 3 {
                patterns.push(self.group_pattern(group, &centers, recent, dt_secs));
            }
            if group.len() >= self.config.queue_min_people {
                if let Some(queue) = self.queue_pattern(group, &centers, recent, dt_secs) {
                    patterns.push(queue);
                }
            }
        }

        let displacements = match_displacements(
            &centers,
            previous,
            self.config.flow_match_radius,
        );
        let flow = self.flow_direction(&displacements, centers.len(), recent, dt_secs, time);

        if let Some(flowing) = self.flowing_pattern(&displacements, recent, dt_secs) {
            patterns.push(flowing);
        }

        let spatial = self.spatial_stats(&centers);

        debug!(
            "Behavior: {} pattern(s), {} group(s), {} hotspot(s)",
            patterns.len(),
            groups.len(),
            spatial.hotspots.len()
        );

        BehaviorReport {
            patterns,
            flow,
            spatial,
        }
    }

    fn group_pattern(
        &self,
        group: &[usize],
        centers: &[(f32, f32)],
        recent: &[FrameResult],
        dt_secs: f32,
    ) -> BehaviorPattern {
        let centroid = centroid_of(group, centers);
        let spread = group
            .iter()
            .map(|&i| dist(centers[i], centroid))
            .sum::<f32>()
            / group.len() as f32;

        let kind = if spread < GATHERING_SPREAD {
            BehaviorKind::Gathering
        } else if spread > DISPERSING_SPREAD {
            BehaviorKind::Dispersing
        } else {
            BehaviorKind::Clustering
        };

        BehaviorPattern {
            kind,
            confidence: (0.5 + 0.05 * group.len() as f32).min(0.95),
            people_involved: group.len(),
            location: centroid,
            intensity: (group.len() as f32 / 15.0).min(1.0),
            duration_ms: kind_duration_ms(recent, kind, dt_secs),
        }
    }

    /// Scan every pair in the group as a candidate line and count members
    /// within the perpendicular tolerance. The best line with enough points
    /// becomes a queuing pattern.
    fn queue_pattern(
        &self,
        group: &[usize],
        centers: &[(f32, f32)],
        recent: &[FrameResult],
        dt_secs: f32,
    ) -> Option<BehaviorPattern> {
        let tol = self.config.queue_line_tolerance;
        let mut best: Vec<usize> = Vec::new();

        for (ai, &a) in group.iter().enumerate() {
            for &b in &group[ai + 1..] {
                let (ax, ay) = centers[a];
                let (bx, by) = centers[b];
                let (dx, dy) = (bx - ax, by - ay);
                let len = (dx * dx + dy * dy).sqrt();
                if len < 1e-6 {
                    continue;
                }

                let on_line: Vec<usize> = group
                    .iter()
                    .copied()
                    .filter(|&p| {
                        let (px, py) = centers[p];
                        // Perpendicular distance from p to the a-b line.
                        ((px - ax) * dy - (py - ay) * dx).abs() / len <= tol
                    })
                    .collect();

                if on_line.len() <= best.len() {
                    continue;
                }

                // A queue is elongated: the span along the line must dwarf
                // the tolerance, otherwise a tight huddle would qualify.
                let (span_min, span_max) = on_line.iter().fold(
                    (f32::INFINITY, f32::NEG_INFINITY),
                    |(lo, hi), &p| {
                        let (px, py) = centers[p];
                        let t = ((px - ax) * dx + (py - ay) * dy) / len;
                        (lo.min(t), hi.max(t))
                    },
                );
                if span_max - span_min >= tol * self.config.queue_min_people as f32 {
                    best = on_line;
                }
            }
        }

        if best.len() < self.config.queue_min_people {
            return None;
        }

        let location = centroid_of(&best, centers);
        Some(BehaviorPattern {
            kind: BehaviorKind::Queuing,
            confidence: (0.55 + 0.05 * best.len() as f32).min(0.95),
            people_involved: best.len(),
            location,
            intensity: best.len() as f32 / group.len() as f32,
            duration_ms: kind_duration_ms(recent, BehaviorKind::Queuing, dt_secs),
        })
    }

    fn flowing_pattern(
        &self,
        displacements: &[(f32, f32)],
        recent: &[FrameResult],
        dt_secs: f32,
    ) -> Option<BehaviorPattern> {
        if displacements.is_empty() {
            return None;
        }
        let (mx, my) = mean_vector(displacements);
        let magnitude = (mx * mx + my * my).sqrt();
        if magnitude <= self.config.flow_min_displacement {
            return None;
        }

        Some(BehaviorPattern {
            kind: BehaviorKind::Flowing,
            confidence: (0.5 + 0.03 * displacements.len() as f32).min(0.9),
            people_involved: displacements.len(),
            location: (0.5, 0.5),
            intensity: (magnitude / (self.config.flow_min_displacement * 10.0)).min(1.0),
            duration_ms: kind_duration_ms(recent, BehaviorKind::Flowing, dt_secs),
        })
    }

    fn flow_direction(
        &self,
        displacements: &[(f32, f32)],
        count: usize,
        recent: &[FrameResult],
        dt_secs: f32,
        time: &TimeContext,
    ) -> FlowDirection {
        if displacements.is_empty() {
            let mut flow = FlowDirection::still();
            flow.bottleneck = self.is_bottleneck(count, 0.0, recent);
            return flow;
        }

        let (mx, my) = mean_vector(displacements);
        let magnitude = (mx * mx + my * my).sqrt();

        // Deviation of each displacement from the mean vector.
        let deviations: Vec<f32> = displacements
            .iter()
            .map(|&(dx, dy)| ((dx - mx).powi(2) + (dy - my).powi(2)).sqrt())
            .collect();
        let max_dev = deviations.iter().cloned().fold(0.0f32, f32::max);
        let avg_dev = deviations.iter().sum::<f32>() / deviations.len() as f32;
        let consistency = if max_dev > 1e-6 {
            (1.0 - avg_dev / max_dev).clamp(0.0, 1.0)
        } else {
            1.0
        };

        let velocity_magnitude = if dt_secs > 1e-3 {
            magnitude / dt_secs
        } else {
            0.0
        };

        FlowDirection {
            angle: my.atan2(mx),
            velocity_magnitude,
            consistency,
            ritual_flow: time.is_auspicious
                && consistency > RITUAL_CONSISTENCY
                && magnitude > self.config.flow_min_displacement,
            bottleneck: self.is_bottleneck(count, magnitude, recent),
        }
    }

    /// High density, near-zero movement and a rising recent count together
    /// indicate a choke point.
    fn is_bottleneck(&self, count: usize, mean_displacement: f32, recent: &[FrameResult]) -> bool {
        if CrowdDensity::classify(count) < CrowdDensity::High {
            return false;
        }
        if mean_displacement >= STALL_DISPLACEMENT {
            return false;
        }
        rising_counts(recent)
    }

    fn spatial_stats(&self, centers: &[(f32, f32)]) -> SpatialStats {
        let n = self.config.grid_size;
        let mut cells = vec![0usize; n * n];

        for &(x, y) in centers {
            let cx = ((x * n as f32) as usize).min(n - 1);
            let cy = ((y * n as f32) as usize).min(n - 1);
            cells[cy * n + cx] += 1;
        }

        let total = centers.len();
        let density = total as f32 / (n * n) as f32;

        let max_count = cells.iter().copied().max().unwrap_or(0);
        let hotspot_floor = (max_count as f32 * self.config.hotspot_ratio).ceil() as usize;
        let mut hotspots = Vec::new();
        if max_count > 0 {
            for cy in 0..n {
                for cx in 0..n {
                    let count = cells[cy * n + cx];
                    if count >= hotspot_floor.max(1) && count > 0 {
                        hotspots.push(Hotspot {
                            cell: (cx, cy),
                            count,
                            center: (
                                (cx as f32 + 0.5) / n as f32,
                                (cy as f32 + 0.5) / n as f32,
                            ),
                        });
                    }
                }
            }
        }

        // Uniformity: inverse coefficient of variation across all cells.
        let mean = density;
        let uniformity = if mean > 0.0 {
            let variance = cells
                .iter()
                .map(|&c| (c as f32 - mean).powi(2))
                .sum::<f32>()
                / (n * n) as f32;
            let cv = variance.sqrt() / mean;
            (1.0 / (1.0 + cv)).clamp(0.0, 1.0)
        } else {
            1.0
        };

        // Clustering: how similar each occupied cell is to its 8-neighborhood.
        // High values mean occupied cells sit next to similarly-occupied
        // cells; isolated singletons score low.
        let clustering = if max_count > 0 {
            let mut sims = Vec::new();
            for cy in 0..n as isize {
                for cx in 0..n as isize {
                    let count = cells[cy as usize * n + cx as usize];
                    if count == 0 {
                        continue;
                    }
                    let mut neighbor_sum = 0.0f32;
                    let mut neighbors = 0u32;
                    for dy in -1isize..=1 {
                        for dx in -1isize..=1 {
                            if dx == 0 && dy == 0 {
                                continue;
                            }
                            let (nx, ny) = (cx + dx, cy + dy);
                            if nx < 0 || ny < 0 || nx >= n as isize || ny >= n as isize {
                                continue;
                            }
                            let other = cells[ny as usize * n + nx as usize];
                            let hi = count.max(other) as f32;
                            neighbor_sum += other.min(count) as f32 / hi;
                            neighbors += 1;
                        }
                    }
                    if neighbors > 0 {
                        sims.push(neighbor_sum / neighbors as f32);
                    }
                }
            }
            if sims.is_empty() {
                0.0
            } else {
                sims.iter().sum::<f32>() / sims.len() as f32
            }
        } else {
            0.0
        };

        SpatialStats {
            density,
            uniformity,
            clustering,
            hotspots,
        }
    }
}

/// Union people into groups where every member is within the proximity
/// threshold of at least one other member (single-linkage, BFS).
fn proximity_groups(centers: &[(f32, f32)], threshold: f32) -> Vec<Vec<usize>> {
    let mut visited = vec![false; centers.len()];
    let mut groups = Vec::new();

    for start in 0..centers.len() {
        if visited[start] {
            continue;
        }
        let mut group = vec![start];
        let mut queue = vec![start];
        visited[start] = true;

        while let Some(i) = queue.pop() {
            for j in 0..centers.len() {
                if !visited[j] && dist(centers[i], centers[j]) <= threshold {
                    visited[j] = true;
                    group.push(j);
                    queue.push(j);
                }
            }
        }
        groups.push(group);
    }

    groups
}

/// Per-person displacement vectors: each current center matched to the
/// nearest previous center within the radius.
fn match_displacements(
    centers: &[(f32, f32)],
    previous: &[TrackedPerson],
    radius: f32,
) -> Vec<(f32, f32)> {
    let radius_sq = radius * radius;
    let mut displacements = Vec::new();

    for &(cx, cy) in centers {
        let nearest = previous
            .iter()
            .map(|p| {
                let d = (p.center.0 - cx).powi(2) + (p.center.1 - cy).powi(2);
                (p, d)
            })
            .filter(|&(_, d)| d <= radius_sq)
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        if let Some((p, _)) = nearest {
            displacements.push((cx - p.center.0, cy - p.center.1));
        }
    }

    displacements
}

/// True when the newer half of recent counts averages above the older half.
fn rising_counts(recent: &[FrameResult]) -> bool {
    let counts: Vec<usize> = recent.iter().map(|r| r.count).collect();
    if counts.len() < 4 {
        return false;
    }
    let window = &counts[counts.len().saturating_sub(6)..];
    let mid = window.len() / 2;
    let older: f32 = window[..mid].iter().sum::<usize>() as f32 / mid as f32;
    let newer: f32 =
        window[mid..].iter().sum::<usize>() as f32 / (window.len() - mid) as f32;
    newer > older
}

/// Persistence of a pattern kind across the newest consecutive history
/// entries, plus the current frame interval.
fn kind_duration_ms(recent: &[FrameResult], kind: BehaviorKind, dt_secs: f32) -> f64 {
    let mut oldest_match: Option<f64> = None;
    let mut newest_match: Option<f64> = None;

    for result in recent.iter().rev() {
        if result.behavior_patterns.iter().any(|p| p.kind == kind) {
            newest_match.get_or_insert(result.frame_timestamp_ms);
            oldest_match = Some(result.frame_timestamp_ms);
        } else {
            break;
        }
    }

    match (oldest_match, newest_match) {
        (Some(oldest), Some(newest)) => (newest - oldest) + dt_secs as f64 * 1000.0,
        _ => dt_secs as f64 * 1000.0,
    }
}

fn centroid_of(indices: &[usize], centers: &[(f32, f32)]) -> (f32, f32) {
    let n = indices.len().max(1) as f32;
    let (sx, sy) = indices
        .iter()
        .fold((0.0f32, 0.0f32), |(sx, sy), &i| {
            (sx + centers[i].0, sy + centers[i].1)
        });
    (sx / n, sy / n)
}

fn dist(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

fn mean_vector(vectors: &[(f32, f32)]) -> (f32, f32) {
    let n = vectors.len().max(1) as f32;
    let (sx, sy) = vectors
        .iter()
        .fold((0.0f32, 0.0f32), |(sx, sy), &(x, y)| (sx + x, sy + y));
    (sx / n, sy / n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer() -> BehaviorAnalyzer {
        BehaviorAnalyzer::new(BehaviorConfig::default())
    }

    fn person(id: u64, x: f32, y: f32) -> TrackedPerson {
        TrackedPerson {
            id,
            center: (x, y),
            confidence: 0.8,
            velocity: None,
        }
    }

    #[test]
    fn test_tight_group_detected_with_full_headcount() {
        // Ten people on a circle of radius 0.03 around (0.5, 0.5).
        let current: Vec<TrackedPerson> = (0..10)
            .map(|i| {
                let angle = i as f32 / 10.0 * std::f32::consts::TAU;
                person(i, 0.5 + 0.03 * angle.cos(), 0.5 + 0.03 * angle.sin())
            })
            .collect();

        let report = analyzer().analyze(&current, &[], &[], 0.5, &TimeContext::at_hour(12));

        let group = report
            .patterns
            .iter()
            .find(|p| matches!(p.kind, BehaviorKind::Gathering | BehaviorKind::Clustering))
            .expect("tight group should produce a pattern");
        assert_eq!(group.people_involved, 10);
        assert!((group.location.0 - 0.5).abs() < 0.02);
        assert!((group.location.1 - 0.5).abs() < 0.02);

        // A huddle is not a queue, even though a line through its center
        // passes within tolerance of every member.
        assert!(report
            .patterns
            .iter()
            .all(|p| p.kind != BehaviorKind::Queuing));
    }

    #[test]
    fn test_collinear_people_detected_as_queue() {
        // Six people along a horizontal line, small vertical jitter.
        let jitter = [0.01, -0.01, 0.008, -0.006, 0.01, -0.009];
        let current: Vec<TrackedPerson> = (0..6)
            .map(|i| person(i as u64, 0.2 + i as f32 * 0.08, 0.5 + jitter[i]))
            .collect();

        let report = analyzer().analyze(&current, &[], &[], 0.5, &TimeContext::at_hour(12));

        let queue = report
            .patterns
            .iter()
            .find(|p| p.kind == BehaviorKind::Queuing)
            .expect("collinear group should produce a queuing pattern");
        assert!(queue.people_involved >= 5);
    }

    #[test]
    fn test_identical_displacements_give_full_consistency() {
        let previous: Vec<TrackedPerson> =
            (0..5).map(|i| person(i, 0.1 + i as f32 * 0.15, 0.3)).collect();
        let current: Vec<TrackedPerson> = previous
            .iter()
            .map(|p| person(p.id, p.center.0 + 0.02, p.center.1))
            .collect();

        let report =
            analyzer().analyze(&current, &previous, &[], 0.5, &TimeContext::at_hour(12));

        assert!((report.flow.consistency - 1.0).abs() < 1e-6);
        assert!(report.flow.angle.abs() < 1e-3, "flow should point right");
        assert!((report.flow.velocity_magnitude - 0.04).abs() < 1e-3);
        assert!(report
            .patterns
            .iter()
            .any(|p| p.kind == BehaviorKind::Flowing));
        assert!(!report.flow.ritual_flow, "midday is not an auspicious window");
    }

    #[test]
    fn test_consistent_flow_in_auspicious_window_is_ritual() {
        let previous: Vec<TrackedPerson> =
            (0..5).map(|i| person(i, 0.1 + i as f32 * 0.15, 0.3)).collect();
        let current: Vec<TrackedPerson> = previous
            .iter()
            .map(|p| person(p.id, p.center.0 + 0.02, p.center.1))
            .collect();

        let report =
            analyzer().analyze(&current, &previous, &[], 0.5, &TimeContext::at_hour(18));
        assert!(report.flow.ritual_flow);
    }

    #[test]
    fn test_empty_frame_yields_still_flow_and_no_patterns() {
        let report = analyzer().analyze(&[], &[], &[], 0.5, &TimeContext::at_hour(12));
        assert!(report.patterns.is_empty());
        assert_eq!(report.flow.velocity_magnitude, 0.0);
        assert!(!report.flow.bottleneck);
        assert!(report.spatial.hotspots.is_empty());
    }

    #[test]
    fn test_hotspots_found_where_people_concentrate() {
        // Eight people in one corner cell, one person far away.
        let mut current: Vec<TrackedPerson> = (0..8)
            .map(|i| person(i, 0.02 + i as f32 * 0.005, 0.02))
            .collect();
        current.push(person(99, 0.95, 0.95));

        let report = analyzer().analyze(&current, &[], &[], 0.5, &TimeContext::at_hour(12));

        let top = report
            .spatial
            .hotspots
            .iter()
            .max_by_key(|h| h.count)
            .expect("concentration should produce a hotspot");
        assert_eq!(top.cell, (0, 0));
        assert_eq!(top.count, 8);
        assert!(report.spatial.uniformity < 0.5);
    }

    #[test]
    fn test_proximity_groups_single_linkage() {
        let centers = vec![
            (0.10, 0.10),
            (0.18, 0.10), // chained to the first
            (0.26, 0.10), // chained to the second
            (0.80, 0.80), // isolated
        ];
        let groups = proximity_groups(&centers, 0.1);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups.iter().map(Vec::len).max(), Some(3));
    }

    #[test]
    fn test_scattered_people_produce_no_group_pattern() {
        let current: Vec<TrackedPerson> = (0..4)
            .map(|i| person(i, 0.2 * (i as f32 + 1.0), 0.15 + 0.2 * i as f32))
            .collect();
        let report = analyzer().analyze(&current, &[], &[], 0.5, &TimeContext::at_hour(12));
        assert!(report
            .patterns
            .iter()
            .all(|p| p.kind == BehaviorKind::Flowing || p.people_involved < 3));
    }
}
