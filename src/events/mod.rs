// Race timeline derived from a frame sequence: retirements, leader laps and
// track status periods, keyed by frame index

use std::collections::BTreeSet;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::frames::FrameSequence;
use crate::telemetry::{DriverNumber, TrackStatus, TrackStatusPeriod};

/// Length given to a track status period that has no end time
pub const OPEN_PERIOD_DEFAULT_S: f64 = 10.0;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub enum RaceEventKind {
    /// Driver went out, on the lap they were running
    Dnf { driver: DriverNumber, lap: u32 },
    /// The race leader started a new lap
    LeaderLap { lap: u32 },
    /// Flag, safety car or red flag period, ending before `end_index`
    TrackStatus {
        status: TrackStatus,
        end_index: usize,
    },
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct RaceEvent {
    /// Frame at which the event starts
    pub index: usize,
    pub kind: RaceEventKind,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionEvents {
    /// Sorted by frame index
    pub events: Vec<RaceEvent>,
    pub total_laps: Option<u32>,
}

impl SessionEvents {
    pub fn derive(
        frames: &FrameSequence,
        track_statuses: &[TrackStatusPeriod],
        total_laps: Option<u32>,
    ) -> Self {
        let mut events = Vec::new();
        let mut out: BTreeSet<DriverNumber> = BTreeSet::new();
        let mut leader_lap: Option<u32> = None;

        for frame in frames.frames() {
            for (driver, state) in &frame.drivers {
                if state.is_out() && out.insert(*driver) {
                    events.push(RaceEvent {
                        index: frame.index,
                        kind: RaceEventKind::Dnf {
                            driver: *driver,
                            lap: state.lap,
                        },
                    });
                }
            }

            let lap = frame
                .leaderboard()
                .first()
                .and_then(|leader| frame.driver(leader.driver))
                .map(|state| state.lap);
            match (leader_lap, lap) {
                (None, Some(lap)) => leader_lap = Some(lap),
                (Some(previous), Some(lap)) if lap > previous => {
                    events.push(RaceEvent {
                        index: frame.index,
                        kind: RaceEventKind::LeaderLap { lap },
                    });
                    leader_lap = Some(lap);
                }
                _ => {}
            }
        }

        for period in track_statuses {
            if let Some(event) = status_event(frames, period) {
                events.push(event);
            }
        }

        // stable, so events at the same frame keep the order above
        events.sort_by_key(|event| event.index);
        debug!("Derived {} race events", events.len());

        Self { events, total_laps }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events starting in `[from, to)`
    pub fn between(&self, from: usize, to: usize) -> impl Iterator<Item = &RaceEvent> {
        self.events
            .iter()
            .filter(move |event| event.index >= from && event.index < to)
    }

    /// Track status in force at frame `index`, the latest starting one when
    /// periods overlap
    pub fn track_status_at(&self, index: usize) -> Option<TrackStatus> {
        self.events
            .iter()
            .rev()
            .find_map(|event| match event.kind {
                RaceEventKind::TrackStatus { status, end_index }
                    if event.index <= index && index < end_index =>
                {
                    Some(status)
                }
                _ => None,
            })
    }
}

fn status_event(frames: &FrameSequence, period: &TrackStatusPeriod) -> Option<RaceEvent> {
    if period.status == TrackStatus::Green || frames.is_empty() {
        return None;
    }
    let len = frames.len() as i64;
    let start = frames.index_at(period.start_s);
    let end = match period.end_s {
        Some(end_s) => frames.index_at(end_s),
        None => start + (OPEN_PERIOD_DEFAULT_S / frames.dt).round() as i64,
    };
    // entirely before the first frame or after the last one
    if end <= 0 || start >= len || end <= start {
        return None;
    }
    Some(RaceEvent {
        index: start.max(0) as usize,
        kind: RaceEventKind::TrackStatus {
            status: period.status,
            end_index: end.min(len) as usize,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{DriverState, DriverStatus, Frame};
    use crate::telemetry::TyreCompound;

    fn state(lap: u32, progress_m: f64, status: DriverStatus) -> DriverState {
        DriverState {
            x: 0.,
            y: 0.,
            speed: 250.,
            gear: 7,
            drs_on: false,
            lap,
            tyre: TyreCompound::Medium,
            progress_m,
            status,
        }
    }

    /// One frame per second starting at session time 100s, each row lists
    /// (driver, lap, progress, status)
    fn frames(rows: Vec<Vec<(u32, u32, f64, DriverStatus)>>) -> FrameSequence {
        FrameSequence {
            dt: 1.0,
            start_s: 100.0,
            frames: rows
                .into_iter()
                .enumerate()
                .map(|(i, drivers)| Frame {
                    index: i,
                    timestamp: i as f64,
                    drivers: drivers
                        .into_iter()
                        .map(|(d, lap, progress, status)| {
                            (DriverNumber(d), state(lap, progress, status))
                        })
                        .collect(),
                    lap_length_m: None,
                })
                .collect(),
        }
    }

    fn race() -> FrameSequence {
        use DriverStatus::*;
        frames(vec![
            vec![(1, 1, 0., Running), (2, 1, 0., Running), (3, 1, 0., Running)],
            vec![(1, 1, 10., Running), (2, 1, 20., Running), (3, 1, 5., Running)],
            vec![(1, 2, 30., Running), (2, 1, 25., Running), (3, 1, 5., Out)],
            vec![(1, 2, 40., Running), (2, 2, 45., Running), (3, 1, 5., Out)],
            vec![(1, 3, 60., Running), (2, 2, 50., Out), (3, 1, 5., Out)],
            vec![(1, 3, 70., Running), (2, 2, 50., Out), (3, 1, 5., Out)],
        ])
    }

    fn kinds(events: &SessionEvents) -> Vec<(usize, RaceEventKind)> {
        events.events.iter().map(|e| (e.index, e.kind)).collect()
    }

    #[test]
    fn test_retirements_and_leader_laps() {
        let events = SessionEvents::derive(&race(), &[], Some(3));
        assert_eq!(
            kinds(&events),
            vec![
                (
                    2,
                    RaceEventKind::Dnf {
                        driver: DriverNumber(3),
                        lap: 1
                    }
                ),
                (2, RaceEventKind::LeaderLap { lap: 2 }),
                (
                    4,
                    RaceEventKind::Dnf {
                        driver: DriverNumber(2),
                        lap: 2
                    }
                ),
                (4, RaceEventKind::LeaderLap { lap: 3 }),
            ]
        );
        assert_eq!(events.total_laps, Some(3));
    }

    #[test]
    fn test_leader_lap_ignores_a_new_leader_on_an_older_lap() {
        use DriverStatus::*;
        // driver 2 takes the lead at frame 2 while still on lap 1
        let sequence = frames(vec![
            vec![(1, 1, 0., Running), (2, 1, 0., Running)],
            vec![(1, 2, 20., Running), (2, 1, 15., Running)],
            vec![(1, 2, 20., Out), (2, 1, 25., Running)],
            vec![(1, 2, 20., Out), (2, 2, 35., Running)],
        ]);
        let laps: Vec<(usize, u32)> = SessionEvents::derive(&sequence, &[], None)
            .events
            .iter()
            .filter_map(|e| match e.kind {
                RaceEventKind::LeaderLap { lap } => Some((e.index, lap)),
                _ => None,
            })
            .collect();
        assert_eq!(laps, vec![(1, 2)]);
    }

    #[test]
    fn test_track_status_periods() {
        let statuses = [
            // before the first frame, dropped
            TrackStatusPeriod {
                status: TrackStatus::Yellow,
                start_s: 50.0,
                end_s: Some(60.0),
            },
            // spans the first frame, clamped to it
            TrackStatusPeriod {
                status: TrackStatus::RedFlag,
                start_s: 98.0,
                end_s: Some(101.0),
            },
            // green is the normal state, not an event
            TrackStatusPeriod {
                status: TrackStatus::Green,
                start_s: 101.0,
                end_s: Some(102.0),
            },
            // open ended, runs to the default length and is clamped to the sequence
            TrackStatusPeriod {
                status: TrackStatus::SafetyCar,
                start_s: 103.0,
                end_s: None,
            },
        ];
        let events = SessionEvents::derive(&race(), &statuses, Some(3));
        let periods: Vec<(usize, RaceEventKind)> = kinds(&events)
            .into_iter()
            .filter(|(_, kind)| matches!(kind, RaceEventKind::TrackStatus { .. }))
            .collect();
        assert_eq!(
            periods,
            vec![
                (
                    0,
                    RaceEventKind::TrackStatus {
                        status: TrackStatus::RedFlag,
                        end_index: 1
                    }
                ),
                (
                    3,
                    RaceEventKind::TrackStatus {
                        status: TrackStatus::SafetyCar,
                        end_index: 6
                    }
                ),
            ]
        );

        assert_eq!(events.track_status_at(0), Some(TrackStatus::RedFlag));
        assert_eq!(events.track_status_at(1), None);
        assert_eq!(events.track_status_at(5), Some(TrackStatus::SafetyCar));
        assert_eq!(events.between(3, 5).count(), 3);
    }

    #[test]
    fn test_empty_sequence_has_no_events() {
        let sequence = FrameSequence {
            dt: 1.0,
            start_s: 0.0,
            frames: Vec::new(),
        };
        let statuses = [TrackStatusPeriod {
            status: TrackStatus::RedFlag,
            start_s: 0.0,
            end_s: Some(10.0),
        }];
        assert!(SessionEvents::derive(&sequence, &statuses, None).is_empty());
    }
}
