pub mod synthesizer;

use std::cmp::Ordering;
use std::collections::BTreeMap;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::telemetry::{DriverNumber, TyreCompound};

pub use synthesizer::FrameSynthesizer;

/// Fixed speed used to turn a distance gap into a time gap, 200 km/h in m/s
pub const GAP_REFERENCE_SPEED_MPS: f64 = 55.56;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum DriverStatus {
    Running,
    Out,
}

/// Snapshot of one driver at one frame
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DriverState {
    pub x: f64,
    pub y: f64,
    /// Speed in km/h
    pub speed: f64,
    pub gear: u8,
    pub drs_on: bool,
    pub lap: u32,
    pub tyre: TyreCompound,
    /// Distance travelled along the circuit, the ranking metric
    pub progress_m: f64,
    pub status: DriverStatus,
}

impl DriverState {
    pub fn is_out(&self) -> bool {
        self.status == DriverStatus::Out
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub enum Gap {
    Leader,
    /// Behind the leader on the same lap
    Behind { metres: f64, seconds: f64 },
    /// One or more full laps down
    Laps(u32),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LeaderboardEntry {
    /// 1-based position
    pub rank: u32,
    pub driver: DriverNumber,
    pub progress_m: f64,
    pub gap: Gap,
}

/// One uniform time step covering every active driver
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Frame {
    pub index: usize,
    /// Seconds since the first frame of the session
    pub timestamp: f64,
    pub drivers: BTreeMap<DriverNumber, DriverState>,
    /// Lap length of the reference line, when ranking used one. Carried per
    /// frame so `leaderboard()` works on a frame handed out on its own.
    pub lap_length_m: Option<f64>,
}

impl Frame {
    pub fn driver(&self, driver: DriverNumber) -> Option<&DriverState> {
        self.drivers.get(&driver)
    }

    /// Running drivers ranked by distance travelled, then by speed, then by
    /// driver number. Computed from the frame alone so repeated calls agree.
    pub fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        let ranked = self
            .drivers
            .iter()
            .filter(|(_, state)| !state.is_out())
            .sorted_by(|(a_num, a), (b_num, b)| rank_order(a_num, a, b_num, b))
            .collect::<Vec<_>>();

        let Some((_, leader)) = ranked.first() else {
            return Vec::new();
        };
        let leader_progress = leader.progress_m;

        ranked
            .iter()
            .enumerate()
            .map(|(idx, (driver, state))| LeaderboardEntry {
                rank: idx as u32 + 1,
                driver: **driver,
                progress_m: state.progress_m,
                gap: if idx == 0 {
                    Gap::Leader
                } else {
                    self.gap_to_leader(leader_progress - state.progress_m)
                },
            })
            .collect()
    }

    /// Drivers marked out, in driver number order
    pub fn retired(&self) -> Vec<DriverNumber> {
        self.drivers
            .iter()
            .filter(|(_, state)| state.is_out())
            .map(|(driver, _)| *driver)
            .collect()
    }

    fn gap_to_leader(&self, metres: f64) -> Gap {
        if let Some(lap_length) = self.lap_length_m {
            if lap_length > 0.0 && metres >= lap_length {
                return Gap::Laps((metres / lap_length).floor() as u32);
            }
        }
        Gap::Behind {
            metres,
            seconds: metres / GAP_REFERENCE_SPEED_MPS,
        }
    }
}

fn rank_order(
    a_num: &DriverNumber,
    a: &DriverState,
    b_num: &DriverNumber,
    b: &DriverState,
) -> Ordering {
    b.progress_m
        .total_cmp(&a.progress_m)
        .then_with(|| b.speed.total_cmp(&a.speed))
        .then_with(|| a_num.cmp(b_num))
}

/// The full, contiguous frame sequence of a session
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FrameSequence {
    pub dt: f64,
    /// Session time of frame 0, on the clock of the raw samples
    pub start_s: f64,
    pub frames: Vec<Frame>,
}

impl FrameSequence {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    pub fn last(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Session duration covered by the sequence
    pub fn duration(&self) -> f64 {
        self.frames.last().map(|f| f.timestamp).unwrap_or(0.0)
    }

    /// Index of the frame covering session time `t`, unclamped so callers can
    /// tell times before the first or after the last frame apart.
    pub fn index_at(&self, t: f64) -> i64 {
        // same tolerance as the resampling grid, a tick time maps to its own frame
        ((t - self.start_s) / self.dt + 1e-9).floor() as i64
    }

    /// Check frame indices and timestamps form the uniform grid `i * dt`
    pub fn is_contiguous(&self) -> bool {
        self.frames
            .iter()
            .enumerate()
            .all(|(i, frame)| frame.index == i && frame.timestamp == i as f64 * self.dt)
    }
}
