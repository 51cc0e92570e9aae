//! Time Series Descriptor
//!
//! Derives the statistics a narrative is built from: history versus
//! projections, start/end/max/min, local peaks and valleys, the milestone
//! sequence with normalized change magnitudes, and the overall trend.

use crate::error::Result;
use crate::table::ResultTable;
use chrono::{Datelike, Local};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use tracing::debug;

/// Reversal share of the series length above which a series fluctuates.
const FLUCTUATION_RATIO: f64 = 0.3;

/// max - min below which a flat series counts as stable.
const STABLE_RANGE: f64 = 0.1;

/// One (period, value) row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimePoint {
    pub period: String,
    pub year: i32,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Increase,
    Decrease,
    NoChange,
}

impl Direction {
    pub fn between(from: f64, to: f64) -> Self {
        match to.partial_cmp(&from) {
            Some(Ordering::Greater) => Direction::Increase,
            Some(Ordering::Less) => Direction::Decrease,
            _ => Direction::NoChange,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Increase => "Increase",
            Direction::Decrease => "Decrease",
            Direction::NoChange => "No change",
        })
    }
}

/// Size of a change measured in standard deviations of the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Magnitude {
    Slight,
    Modest,
    Moderate,
    Substantial,
    Dramatic,
}

impl Magnitude {
    /// Bucket a normalized delta (`|Δ| / stdev`).
    pub fn classify(normalized: f64) -> Self {
        let normalized = normalized.abs();
        if normalized.is_nan() || normalized < 0.5 {
            Magnitude::Slight
        } else if normalized < 1.0 {
            Magnitude::Modest
        } else if normalized < 2.0 {
            Magnitude::Moderate
        } else if normalized < 3.0 {
            Magnitude::Substantial
        } else {
            Magnitude::Dramatic
        }
    }
}

impl fmt::Display for Magnitude {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Magnitude::Slight => "Slight",
            Magnitude::Modest => "Modest",
            Magnitude::Moderate => "Moderate",
            Magnitude::Substantial => "Substantial",
            Magnitude::Dramatic => "Dramatic",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MilestoneKind {
    Start,
    Peak,
    Valley,
    End,
    Max,
    Min,
}

/// Change from the previous milestone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub direction: Direction,
    pub magnitude: Magnitude,
    pub delta: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub point: TimePoint,
    /// A single-row history is both start and end.
    pub kinds: Vec<MilestoneKind>,
    /// `None` for the first milestone.
    pub change: Option<Change>,
}

impl Milestone {
    pub fn is(&self, kind: MilestoneKind) -> bool {
        self.kinds.contains(&kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    FluctuatesSignificantly,
    Upward,
    Downward,
    Stable,
    ModerateVariation,
}

impl Trend {
    pub fn sentence(&self) -> &'static str {
        match self {
            Trend::FluctuatesSignificantly => "The values fluctuate significantly over time.",
            Trend::Upward => "The values show an overall upward trend.",
            Trend::Downward => "The values show an overall downward trend.",
            Trend::Stable => "The values remain relatively stable over time.",
            Trend::ModerateVariation => "The values show moderate variations over time.",
        }
    }
}

/// A future row, tagged against its predecessor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub point: TimePoint,
    /// `None` when there is nothing to compare against.
    pub direction: Option<Direction>,
}

/// Year encoded in the leading four digits of a period label (`2020`, `2020-Q1`, `2020-M03`).
pub fn period_year(period: &str) -> Option<i32> {
    let head = period.trim().get(..4)?;
    if head.chars().all(|c| c.is_ascii_digit()) {
        head.parse().ok()
    } else {
        None
    }
}

fn sign(x: f64) -> i8 {
    if x > 0.0 {
        1
    } else if x < 0.0 {
        -1
    } else {
        0
    }
}

/// Sample standard deviation; `None` below two values.
fn sample_stdev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(variance.sqrt())
}

/// Statistics over the time/value columns of a [`ResultTable`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeriesDescriptor {
    reference_year: i32,
    history: Vec<TimePoint>,
    future: Vec<TimePoint>,
    max: Option<usize>,
    min: Option<usize>,
    peaks: Vec<usize>,
    valleys: Vec<usize>,
    stdev: Option<f64>,
    reversals: usize,
    milestones: Vec<Milestone>,
    trend: Option<Trend>,
    projections: Vec<Projection>,
}

impl TimeSeriesDescriptor {
    /// Describe `table` relative to the current calendar year.
    pub fn new(table: &ResultTable) -> Result<Self> {
        Self::at_year(table, Local::now().year())
    }

    /// Describe `table` treating periods up to `reference_year` as history.
    pub fn at_year(table: &ResultTable, reference_year: i32) -> Result<Self> {
        let mut points = Vec::with_capacity(table.height());
        let mut skipped = 0usize;
        for (period, value) in table.points()? {
            let year = period.as_deref().and_then(period_year);
            match (year, value) {
                (Some(year), Some(value)) if value.is_finite() => points.push(TimePoint {
                    period: period.unwrap_or_default(),
                    year,
                    value,
                }),
                _ => skipped += 1,
            }
        }
        if skipped > 0 {
            debug!("Ignored {} rows without a usable period or value", skipped);
        }
        Ok(Self::from_points(points, reference_year))
    }

    /// Describe rows already in table order.
    pub fn from_points(points: Vec<TimePoint>, reference_year: i32) -> Self {
        let (history, future): (Vec<_>, Vec<_>) =
            points.into_iter().partition(|p| p.year <= reference_year);

        let values: Vec<f64> = history.iter().map(|p| p.value).collect();

        let max = values
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
                Some((_, b)) if v <= b => best,
                _ => Some((i, v)),
            })
            .map(|(i, _)| i);
        let min = values
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
                Some((_, b)) if v >= b => best,
                _ => Some((i, v)),
            })
            .map(|(i, _)| i);

        let mut peaks = Vec::new();
        let mut valleys = Vec::new();
        for (i, (prev, current, next)) in values.iter().tuple_windows().enumerate() {
            if current > prev && current > next {
                peaks.push(i + 1);
            } else if current < prev && current < next {
                valleys.push(i + 1);
            }
        }

        let stdev = sample_stdev(&values);
        let reversals = values
            .iter()
            .tuple_windows()
            .map(|(a, b)| sign(b - a))
            .tuple_windows()
            .filter(|(a, b)| a != b)
            .count();

        let mut descriptor = Self {
            reference_year,
            history,
            future,
            max,
            min,
            peaks,
            valleys,
            stdev,
            reversals,
            milestones: Vec::new(),
            trend: None,
            projections: Vec::new(),
        };
        descriptor.milestones = descriptor.build_milestones();
        descriptor.trend = descriptor.classify_trend();
        descriptor.projections = descriptor.build_projections();

        debug!(
            "Described {} historical and {} future rows: {} milestones, trend {:?}",
            descriptor.history.len(),
            descriptor.future.len(),
            descriptor.milestones.len(),
            descriptor.trend
        );

        descriptor
    }

    fn build_milestones(&self) -> Vec<Milestone> {
        let Some(last) = self.history.len().checked_sub(1) else {
            return Vec::new();
        };

        let mut tagged: Vec<(usize, MilestoneKind)> = vec![(0, MilestoneKind::Start)];
        tagged.extend(self.peaks.iter().map(|&i| (i, MilestoneKind::Peak)));
        tagged.extend(self.valleys.iter().map(|&i| (i, MilestoneKind::Valley)));
        tagged.push((last, MilestoneKind::End));
        // plateaus hide the extremes from peak/valley detection
        tagged.extend(self.max.map(|i| (i, MilestoneKind::Max)));
        tagged.extend(self.min.map(|i| (i, MilestoneKind::Min)));

        let mut milestones: Vec<Milestone> = Vec::new();
        for (index, kind) in tagged {
            let point = &self.history[index];
            match milestones.iter_mut().find(|m| m.point.period == point.period) {
                Some(existing) => {
                    if !existing.kinds.contains(&kind) {
                        existing.kinds.push(kind);
                    }
                }
                None => milestones.push(Milestone {
                    point: point.clone(),
                    kinds: vec![kind],
                    change: None,
                }),
            }
        }

        milestones.sort_by(|a, b| {
            a.point
                .year
                .cmp(&b.point.year)
                .then_with(|| a.point.period.cmp(&b.point.period))
        });

        let stdev = self.stdev.filter(|s| *s > 0.0);
        for i in 1..milestones.len() {
            let from = milestones[i - 1].point.value;
            let to = milestones[i].point.value;
            let delta = to - from;
            let magnitude = match stdev {
                Some(s) => Magnitude::classify(delta / s),
                None => Magnitude::Slight,
            };
            milestones[i].change = Some(Change {
                direction: Direction::between(from, to),
                magnitude,
                delta,
            });
        }

        milestones
    }

    fn classify_trend(&self) -> Option<Trend> {
        let start = self.start()?.value;
        let end = self.end()?.value;

        let trend = if self.reversals as f64 > FLUCTUATION_RATIO * self.history.len() as f64 {
            Trend::FluctuatesSignificantly
        } else if start < end {
            Trend::Upward
        } else if start > end {
            Trend::Downward
        } else if self.range().unwrap_or(0.0) < STABLE_RANGE {
            Trend::Stable
        } else {
            Trend::ModerateVariation
        };
        Some(trend)
    }

    fn build_projections(&self) -> Vec<Projection> {
        let mut previous = self.end().map(|p| p.value);
        self.future
            .iter()
            .map(|point| {
                let direction = previous.map(|from| Direction::between(from, point.value));
                previous = Some(point.value);
                Projection {
                    point: point.clone(),
                    direction,
                }
            })
            .collect()
    }

    pub fn reference_year(&self) -> i32 {
        self.reference_year
    }

    pub fn history(&self) -> &[TimePoint] {
        &self.history
    }

    pub fn future(&self) -> &[TimePoint] {
        &self.future
    }

    /// True when the table had no usable rows at all.
    pub fn is_empty(&self) -> bool {
        self.history.is_empty() && self.future.is_empty()
    }

    /// First historical row in table order.
    pub fn start(&self) -> Option<&TimePoint> {
        self.history.first()
    }

    /// Last historical row in table order.
    pub fn end(&self) -> Option<&TimePoint> {
        self.history.last()
    }

    /// First occurrence of the largest historical value.
    pub fn max(&self) -> Option<&TimePoint> {
        self.max.map(|i| &self.history[i])
    }

    pub fn min(&self) -> Option<&TimePoint> {
        self.min.map(|i| &self.history[i])
    }

    pub fn range(&self) -> Option<f64> {
        Some(self.max()?.value - self.min()?.value)
    }

    /// Indices into [`Self::history`] of strict local maxima.
    pub fn peaks(&self) -> &[usize] {
        &self.peaks
    }

    pub fn valleys(&self) -> &[usize] {
        &self.valleys
    }

    pub fn stdev(&self) -> Option<f64> {
        self.stdev
    }

    /// Direction reversals across the history.
    pub fn reversals(&self) -> usize {
        self.reversals
    }

    pub fn milestones(&self) -> &[Milestone] {
        &self.milestones
    }

    pub fn trend(&self) -> Option<Trend> {
        self.trend
    }

    pub fn projections(&self) -> &[Projection] {
        &self.projections
    }
}
