// Circuit reference line and the track-position metric used for ranking

use serde::{Deserialize, Serialize};

use crate::ReplayError;

/// Segments searched on either side of the previous hit before falling back
/// to a full search.
const PROJECTION_WINDOW: usize = 40;
/// A windowed projection further than this from the line is discarded in
/// favour of a global search (metres).
const MAX_WINDOWED_OFFSET_M: f64 = 50.0;

/// Closed polyline following the racing line of the circuit
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ReferenceLine {
    points: Vec<(f64, f64)>,
    /// Distance from the first point to the start of each segment
    cumulative: Vec<f64>,
    length: f64,
}

/// Position of a point projected onto the reference line
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Projection {
    /// Distance along the line from its first point, in `[0, length)`
    pub distance: f64,
    pub segment: usize,
    /// Perpendicular distance from the line
    pub offset: f64,
}

impl ReferenceLine {
    pub fn new(points: Vec<(f64, f64)>) -> Result<Self, ReplayError> {
        let mut deduped: Vec<(f64, f64)> = Vec::with_capacity(points.len());
        for point in points {
            if deduped.last() != Some(&point) {
                deduped.push(point);
            }
        }
        // the loop closes itself, a repeated start point would be a zero-length segment
        if deduped.len() > 1 && deduped.first() == deduped.last() {
            deduped.pop();
        }
        if deduped.len() < 2 {
            return Err(ReplayError::ReferenceLineTooShort {
                points: deduped.len(),
            });
        }

        let mut cumulative = Vec::with_capacity(deduped.len());
        let mut length = 0.0;
        for idx in 0..deduped.len() {
            cumulative.push(length);
            let (a, b) = (deduped[idx], deduped[(idx + 1) % deduped.len()]);
            length += (b.0 - a.0).hypot(b.1 - a.1);
        }

        Ok(Self {
            points: deduped,
            cumulative,
            length,
        })
    }

    /// Total lap length along the line
    pub fn length(&self) -> f64 {
        self.length
    }

    pub fn segment_count(&self) -> usize {
        self.points.len()
    }

    fn project_segment(&self, segment: usize, x: f64, y: f64) -> Projection {
        let a = self.points[segment];
        let b = self.points[(segment + 1) % self.points.len()];
        let (dx, dy) = (b.0 - a.0, b.1 - a.1);
        let len_sq = dx * dx + dy * dy;
        let t = if len_sq > 0.0 {
            (((x - a.0) * dx + (y - a.1) * dy) / len_sq).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let (px, py) = (a.0 + t * dx, a.1 + t * dy);
        let mut distance = self.cumulative[segment] + t * len_sq.sqrt();
        if distance >= self.length {
            distance -= self.length;
        }
        Projection {
            distance,
            segment,
            offset: (x - px).hypot(y - py),
        }
    }

    fn best_of(&self, segments: impl Iterator<Item = usize>, x: f64, y: f64) -> Projection {
        let mut best: Option<Projection> = None;
        for segment in segments {
            let candidate = self.project_segment(segment, x, y);
            // strict comparison keeps the lowest segment index on ties
            if best.is_none_or(|b| candidate.offset < b.offset) {
                best = Some(candidate);
            }
        }
        best.unwrap_or(Projection {
            distance: 0.0,
            segment: 0,
            offset: f64::INFINITY,
        })
    }

    /// Nearest point on the whole line
    pub fn project(&self, x: f64, y: f64) -> Projection {
        self.best_of(0..self.points.len(), x, y)
    }

    /// Nearest point within a window around `hint`. Keeps a car on its own
    /// part of the circuit where the layout doubles back on itself.
    pub fn project_near(&self, x: f64, y: f64, hint: usize) -> Projection {
        let n = self.points.len();
        if n <= 2 * PROJECTION_WINDOW + 1 {
            return self.project(x, y);
        }
        let windowed = self.best_of(
            (0..=2 * PROJECTION_WINDOW).map(|k| (hint + n + k - PROJECTION_WINDOW) % n),
            x,
            y,
        );
        if windowed.offset <= MAX_WINDOWED_OFFSET_M {
            windowed
        } else {
            self.project(x, y)
        }
    }
}

/// Accumulates a non-decreasing distance travelled for one driver from
/// successive positions.
#[derive(Debug, Clone)]
pub struct ProgressTracker<'a> {
    line: Option<&'a ReferenceLine>,
    last_position: Option<(f64, f64)>,
    last_projection: Option<Projection>,
    laps: i64,
    progress: f64,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(line: Option<&'a ReferenceLine>) -> Self {
        Self {
            line,
            last_position: None,
            last_projection: None,
            laps: 0,
            progress: 0.0,
        }
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    /// Feed the next position and return the updated distance travelled
    pub fn update(&mut self, x: f64, y: f64) -> f64 {
        match self.line {
            Some(line) => self.update_on_line(line, x, y),
            None => {
                if let Some((px, py)) = self.last_position {
                    self.progress += (x - px).hypot(y - py);
                }
            }
        }
        self.last_position = Some((x, y));
        self.progress
    }

    fn update_on_line(&mut self, line: &ReferenceLine, x: f64, y: f64) {
        let length = line.length();
        let projection = match self.last_projection {
            Some(last) => {
                let projection = line.project_near(x, y, last.segment);
                let delta = projection.distance - last.distance;
                if delta < -length / 2.0 {
                    self.laps += 1;
                } else if delta > length / 2.0 {
                    self.laps -= 1;
                }
                projection
            }
            None => {
                let projection = line.project(x, y);
                // cars lined up behind the start line have not started lap one yet
                if projection.distance > length / 2.0 {
                    self.laps = -1;
                }
                let initial = self.laps as f64 * length + projection.distance;
                self.progress = initial;
                projection
            }
        };
        self.last_projection = Some(projection);

        let raw = self.laps as f64 * length + projection.distance;
        if raw > self.progress {
            self.progress = raw;
        }
    }
}
