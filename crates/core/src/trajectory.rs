//! Result segments and the trajectory panel derived from them.
//!
//! The server attaches an optional [`Trajectory`] to each [`Segment`] of the
//! result video. [`render_trajectory`] turns those into a [`TrajectoryPanel`]:
//! one [`SegmentBlock`] per segment that carries metrics, with km/h values
//! marked as calibrated (server-provided) or estimated (derived here from
//! [`DEFAULT_METERS_PER_PIXEL`]).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::format::{format_duration, format_one_decimal, format_time};

/// Fallback pixel-to-meter factor when the camera is not calibrated.
pub const DEFAULT_METERS_PER_PIXEL: f64 = 0.01;

/// Meters per second to kilometres per hour.
const MS_TO_KMH: f64 = 3.6;

const ESTIMATE_DISCLAIMER: &str = "Note: km/h values marked as estimated assume 1 px = 0.01 m. \
Calibrate the camera for accurate speeds.";

/// A contiguous range of the result video for one tracking episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Start position in seconds.
    pub start_time: f64,
    /// End position in seconds.
    pub end_time: f64,
    /// Source (or annotated) video the range was cut from.
    #[serde(default)]
    pub video_path: Option<String>,
    #[serde(default)]
    pub trajectory: Option<Trajectory>,
}

/// Motion metrics estimated by the server for one segment.
///
/// Every field is optional. `*_kmh` and `total_distance_m` are only sent
/// when the server has a calibration factor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Trajectory {
    pub speed_px_per_sec: Option<f64>,
    pub speed_kmh: Option<f64>,
    pub direction_deg: Option<f64>,
    pub direction_name: Option<String>,
    pub total_distance_px: Option<f64>,
    pub total_distance_m: Option<f64>,
    pub max_speed_px_per_sec: Option<f64>,
    pub max_speed_kmh: Option<f64>,
}

impl Trajectory {
    /// True when the record carries no metric at all.
    pub fn is_empty(&self) -> bool {
        self.speed_px_per_sec.is_none()
            && self.speed_kmh.is_none()
            && self.direction_deg.is_none()
            && self.direction_name.is_none()
            && self.total_distance_px.is_none()
            && self.total_distance_m.is_none()
            && self.max_speed_px_per_sec.is_none()
            && self.max_speed_kmh.is_none()
    }
}

/// A km/h value and where it came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Kmh {
    /// Reported by the server from a real calibration.
    Calibrated(f64),
    /// Derived locally from [`DEFAULT_METERS_PER_PIXEL`].
    Estimated(f64),
}

impl Kmh {
    pub fn is_estimate(&self) -> bool {
        matches!(self, Kmh::Estimated(_))
    }
}

/// Estimate km/h from a pixel speed using the default factor.
pub fn estimate_kmh(px_per_sec: f64) -> f64 {
    px_per_sec * DEFAULT_METERS_PER_PIXEL * MS_TO_KMH
}

/// A speed in px/s with its km/h counterpart.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedReading {
    pub px_per_sec: Option<f64>,
    pub kmh: Option<Kmh>,
}

impl SpeedReading {
    /// Prefer the calibrated value; estimate only when it is missing.
    fn from_parts(px_per_sec: Option<f64>, kmh: Option<f64>) -> Option<Self> {
        let kmh = match (kmh, px_per_sec) {
            (Some(v), _) => Some(Kmh::Calibrated(v)),
            (None, Some(px)) => Some(Kmh::Estimated(estimate_kmh(px))),
            (None, None) => return None,
        };
        Some(Self { px_per_sec, kmh })
    }

    fn is_estimate(&self) -> bool {
        self.kmh.is_some_and(|k| k.is_estimate())
    }
}

impl fmt::Display for SpeedReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(px) = self.px_per_sec {
            write!(f, "{} px/s", format_one_decimal(px))?;
        }
        match (self.px_per_sec.is_some(), self.kmh) {
            (true, Some(Kmh::Calibrated(v))) => {
                write!(f, " ({} km/h, calibrated)", format_one_decimal(v))
            }
            (true, Some(Kmh::Estimated(v))) => {
                write!(f, " (~{} km/h, estimated)", format_one_decimal(v))
            }
            (false, Some(Kmh::Calibrated(v))) => {
                write!(f, "{} km/h (calibrated)", format_one_decimal(v))
            }
            (false, Some(Kmh::Estimated(v))) => {
                write!(f, "~{} km/h (estimated)", format_one_decimal(v))
            }
            (_, None) => Ok(()),
        }
    }
}

/// Heading as a compass label, with degrees when the server sent them.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectionReading {
    pub label: String,
    pub degrees: Option<f64>,
}

impl fmt::Display for DirectionReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.degrees {
            Some(deg) => write!(f, "{} ({}°)", self.label, format_one_decimal(deg)),
            None => f.write_str(&self.label),
        }
    }
}

/// Travelled distance in pixels, plus meters when calibrated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceReading {
    pub px: f64,
    pub meters: Option<f64>,
}

impl fmt::Display for DistanceReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} px", format_one_decimal(self.px))?;
        if let Some(m) = self.meters {
            write!(f, " ({} m)", format_one_decimal(m))?;
        }
        Ok(())
    }
}

/// Compass label for a heading where 0° is East and angles grow
/// counter-clockwise (image y axis already flipped by the server).
pub fn compass_label(degrees: f64) -> &'static str {
    const LABELS: [&str; 8] = [
        "East",
        "North-East",
        "North",
        "North-West",
        "West",
        "South-West",
        "South",
        "South-East",
    ];
    if !degrees.is_finite() {
        return "Unknown";
    }
    let normalized = degrees.rem_euclid(360.0);
    let sector = ((normalized + 22.5) / 45.0).floor() as usize % LABELS.len();
    LABELS[sector]
}

/// One rendered segment of the trajectory panel.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentBlock {
    /// 1-based position among the rendered blocks.
    pub index: usize,
    pub start: String,
    pub end: String,
    pub duration: String,
    pub speed: Option<SpeedReading>,
    pub max_speed: Option<SpeedReading>,
    pub direction: Option<DirectionReading>,
    pub distance: Option<DistanceReading>,
}

impl SegmentBlock {
    fn build(index: usize, segment: &Segment, trajectory: &Trajectory) -> Self {
        let direction = match (&trajectory.direction_name, trajectory.direction_deg) {
            (Some(name), deg) => Some(DirectionReading {
                label: name.clone(),
                degrees: deg,
            }),
            (None, Some(deg)) => Some(DirectionReading {
                label: compass_label(deg).to_string(),
                degrees: Some(deg),
            }),
            (None, None) => None,
        };

        let distance = trajectory.total_distance_px.map(|px| DistanceReading {
            px,
            meters: trajectory.total_distance_m,
        });

        Self {
            index,
            start: format_time(segment.start_time),
            end: format_time(segment.end_time),
            duration: format_duration(segment.start_time, segment.end_time),
            speed: SpeedReading::from_parts(trajectory.speed_px_per_sec, trajectory.speed_kmh),
            max_speed: SpeedReading::from_parts(
                trajectory.max_speed_px_per_sec,
                trajectory.max_speed_kmh,
            ),
            direction,
            distance,
        }
    }

    /// True when any km/h value in the block is an estimate.
    pub fn uses_estimate(&self) -> bool {
        self.speed.is_some_and(|s| s.is_estimate())
            || self.max_speed.is_some_and(|s| s.is_estimate())
    }
}

impl fmt::Display for SegmentBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Segment {}: {} - {} ({})",
            self.index, self.start, self.end, self.duration
        )?;
        if let Some(speed) = &self.speed {
            write!(f, "\n  Speed: {speed}")?;
        }
        if let Some(max) = &self.max_speed {
            write!(f, "\n  Max speed: {max}")?;
        }
        if let Some(direction) = &self.direction {
            write!(f, "\n  Direction: {direction}")?;
        }
        if let Some(distance) = &self.distance {
            write!(f, "\n  Distance: {distance}")?;
        }
        Ok(())
    }
}

/// The trajectory panel shown after a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryPanel {
    /// Present when at least one block relies on an estimated km/h.
    pub disclaimer: Option<String>,
    pub blocks: Vec<SegmentBlock>,
}

impl fmt::Display for TrajectoryPanel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(note) = &self.disclaimer {
            writeln!(f, "{note}")?;
        }
        for (i, block) in self.blocks.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{block}")?;
        }
        Ok(())
    }
}

/// Build the panel from result segments.
///
/// Returns `None` (panel hidden) when no segment carries a non-empty
/// trajectory record.
pub fn render_trajectory(segments: &[Segment]) -> Option<TrajectoryPanel> {
    let blocks: Vec<SegmentBlock> = segments
        .iter()
        .filter_map(|s| {
            s.trajectory
                .as_ref()
                .filter(|t| !t.is_empty())
                .map(|t| (s, t))
        })
        .enumerate()
        .map(|(i, (segment, trajectory))| SegmentBlock::build(i + 1, segment, trajectory))
        .collect();

    if blocks.is_empty() {
        return None;
    }

    let disclaimer = blocks
        .iter()
        .any(SegmentBlock::uses_estimate)
        .then(|| ESTIMATE_DISCLAIMER.to_string());

    Some(TrajectoryPanel { disclaimer, blocks })
}
