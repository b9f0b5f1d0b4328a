// Post-session summary derived from a frame sequence

use std::collections::BTreeMap;
use std::fmt;

use crate::frames::{DriverStatus, FrameSequence};
use crate::telemetry::{DriverNumber, TyreCompound};

#[derive(Clone, Debug, PartialEq)]
pub struct ClassificationRow {
    pub position: u32,
    pub driver: DriverNumber,
    pub lap: u32,
    pub tyre: TyreCompound,
    pub status: DriverStatus,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FastestLap {
    pub driver: DriverNumber,
    pub lap: u32,
    pub time_s: f64,
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct RaceSummary {
    /// Running drivers in leaderboard order, then drivers who went out
    pub classification: Vec<ClassificationRow>,
    /// Tyre compound changes per driver
    pub pit_stops: BTreeMap<DriverNumber, u32>,
    /// Estimated from the frames at which lap numbers change
    pub fastest_lap: Option<FastestLap>,
}

impl RaceSummary {
    pub fn from_frames(frames: &FrameSequence) -> Self {
        let Some(last) = frames.last() else {
            return Self::default();
        };

        let mut classification: Vec<ClassificationRow> = last
            .leaderboard()
            .iter()
            .filter_map(|entry| {
                let state = last.driver(entry.driver)?;
                Some(ClassificationRow {
                    position: entry.rank,
                    driver: entry.driver,
                    lap: state.lap,
                    tyre: state.tyre,
                    status: state.status,
                })
            })
            .collect();
        for driver in last.retired() {
            if let Some(state) = last.driver(driver) {
                classification.push(ClassificationRow {
                    position: classification.len() as u32 + 1,
                    driver,
                    lap: state.lap,
                    tyre: state.tyre,
                    status: state.status,
                });
            }
        }

        let mut pit_stops: BTreeMap<DriverNumber, u32> = BTreeMap::new();
        let mut tyres: BTreeMap<DriverNumber, TyreCompound> = BTreeMap::new();
        // (lap number, time the lap started)
        let mut lap_starts: BTreeMap<DriverNumber, (u32, f64)> = BTreeMap::new();
        let mut first_laps: BTreeMap<DriverNumber, u32> = BTreeMap::new();
        let mut fastest_lap: Option<FastestLap> = None;

        for frame in frames.frames() {
            for (driver, state) in &frame.drivers {
                match tyres.insert(*driver, state.tyre) {
                    Some(previous) if previous != state.tyre => {
                        *pit_stops.entry(*driver).or_insert(0) += 1;
                    }
                    _ => {}
                }

                match lap_starts.get(driver).copied() {
                    None => {
                        first_laps.insert(*driver, state.lap);
                        lap_starts.insert(*driver, (state.lap, frame.timestamp));
                    }
                    Some((lap, started)) if lap != state.lap => {
                        // the first lap seen is partial, its duration is not a lap time
                        let partial = first_laps.get(driver) == Some(&lap);
                        let time_s = frame.timestamp - started;
                        if !partial
                            && time_s > 0.0
                            && fastest_lap.is_none_or(|best| time_s < best.time_s)
                        {
                            fastest_lap = Some(FastestLap {
                                driver: *driver,
                                lap,
                                time_s,
                            });
                        }
                        lap_starts.insert(*driver, (state.lap, frame.timestamp));
                    }
                    Some(_) => {}
                }
            }
        }

        Self {
            classification,
            pit_stops,
            fastest_lap,
        }
    }
}

pub fn format_lap_time(seconds: f64) -> String {
    let minutes = (seconds / 60.0).floor() as u64;
    let secs = seconds - minutes as f64 * 60.0;
    format!("{:02}:{:05.2}", minutes, secs)
}

impl fmt::Display for RaceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Final Classification")?;
        for row in &self.classification {
            let out = if row.status == DriverStatus::Out {
                "   OUT"
            } else {
                ""
            };
            writeln!(
                f,
                "P{:>2}  {:<4} Lap {:<3} {}{}",
                row.position,
                row.driver.0,
                row.lap,
                row.tyre.short_code(),
                out
            )?;
        }

        match &self.fastest_lap {
            Some(lap) => writeln!(
                f,
                "Fastest Lap: {} (Lap {}) - {}",
                lap.driver,
                lap.lap,
                format_lap_time(lap.time_s)
            )?,
            None => writeln!(f, "Fastest Lap: N/A")?,
        }

        writeln!(f, "Pit Stops")?;
        if self.pit_stops.is_empty() {
            writeln!(f, "No pit-stop data available")?;
        }
        for (driver, count) in &self.pit_stops {
            writeln!(f, "{}: {}", driver, count)?;
        }
        Ok(())
    }
}
