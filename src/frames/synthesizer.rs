use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info};
use rayon::prelude::*;

use crate::ReplayError;
use crate::resample::{ResampledPoint, ResampledSession};
use crate::telemetry::DriverNumber;
use crate::track::{ProgressTracker, ReferenceLine};

use super::{DriverState, DriverStatus, Frame, FrameSequence};

/// Merges resampled driver tracks into one [`Frame`] per tick, deriving the
/// ranking metric and retirement status along the way.
pub struct FrameSynthesizer {
    retirement_threshold_s: f64,
    reference_line: Option<ReferenceLine>,
}

impl FrameSynthesizer {
    pub fn new(
        retirement_threshold_s: f64,
        reference_line: Option<ReferenceLine>,
    ) -> Result<Self, ReplayError> {
        if !(retirement_threshold_s.is_finite() && retirement_threshold_s >= 0.0) {
            return Err(ReplayError::InvalidConfig {
                reason: format!(
                    "retirement threshold must be non-negative, got {retirement_threshold_s}"
                ),
            });
        }
        Ok(Self {
            retirement_threshold_s,
            reference_line,
        })
    }

    pub fn synthesize(&self, session: &ResampledSession) -> Result<FrameSequence, ReplayError> {
        self.synthesize_cancellable(session, &AtomicBool::new(false))
    }

    /// Same as [`Self::synthesize`], giving up with `SynthesisCancelled` as
    /// soon as `cancel` is raised. Nothing is returned for a cancelled run.
    pub fn synthesize_cancellable(
        &self,
        session: &ResampledSession,
        cancel: &AtomicBool,
    ) -> Result<FrameSequence, ReplayError> {
        if session.drivers.is_empty() {
            return Err(ReplayError::EmptySession);
        }

        // fork: every driver's track is independent of the others
        let tracks: BTreeMap<DriverNumber, Vec<Option<DriverState>>> = session
            .drivers
            .par_iter()
            .map(|(driver, points)| {
                if cancel.load(Ordering::Relaxed) {
                    return Err(ReplayError::SynthesisCancelled);
                }
                Ok((*driver, self.driver_track(*driver, points)))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .collect::<Result<_, _>>()?;

        // join: one frame per tick once every driver is known
        let grid = session.grid;
        let lap_length_m = self.reference_line.as_ref().map(ReferenceLine::length);
        let mut frames = Vec::with_capacity(grid.count);
        for k in 0..grid.count {
            if cancel.load(Ordering::Relaxed) {
                return Err(ReplayError::SynthesisCancelled);
            }
            let drivers = tracks
                .iter()
                .filter_map(|(driver, track)| track[k].clone().map(|state| (*driver, state)))
                .collect();
            frames.push(Frame {
                index: k,
                timestamp: grid.offset(k),
                drivers,
                lap_length_m,
            });
        }

        info!(
            "Synthesized {} frames for {} drivers",
            frames.len(),
            tracks.len()
        );

        Ok(FrameSequence {
            dt: grid.dt,
            start_s: grid.start,
            frames,
        })
    }

    fn driver_track(
        &self,
        driver: DriverNumber,
        points: &[Option<ResampledPoint>],
    ) -> Vec<Option<DriverState>> {
        let mut tracker = ProgressTracker::new(self.reference_line.as_ref());
        let mut out_since: Option<usize> = None;

        let track = points
            .iter()
            .enumerate()
            .map(|(k, point)| {
                let point = point.as_ref()?;
                if out_since.is_none()
                    && (point.retired || point.hold_s > self.retirement_threshold_s)
                {
                    out_since = Some(k);
                }
                // ranking ignores out drivers, their distance stays frozen
                let progress_m = if out_since.is_some() {
                    tracker.progress()
                } else {
                    tracker.update(point.x, point.y)
                };
                Some(DriverState {
                    x: point.x,
                    y: point.y,
                    speed: point.speed,
                    gear: point.gear,
                    drs_on: point.drs_on,
                    lap: point.lap,
                    tyre: point.tyre,
                    progress_m,
                    status: if out_since.is_some() {
                        DriverStatus::Out
                    } else {
                        DriverStatus::Running
                    },
                })
            })
            .collect();

        if let Some(k) = out_since {
            debug!("Driver {} marked out from frame {}", driver, k);
        }
        track
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resample::Resampler;
    use crate::telemetry::{RawSample, TyreCompound};
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn sample(driver: u32, t: f64, x: f64) -> RawSample {
        RawSample {
            driver: DriverNumber(driver),
            t,
            x,
            y: 0.0,
            speed: 200.0,
            gear: 7,
            drs_on: false,
            lap: 1,
            tyre: TyreCompound::Hard,
            retired: false,
        }
    }

    fn synthesize(
        samples: Vec<(u32, Vec<RawSample>)>,
        dt: f64,
        retirement_threshold_s: f64,
    ) -> FrameSequence {
        let samples = samples
            .into_iter()
            .map(|(d, s)| (DriverNumber(d), s))
            .collect();
        let resampled = Resampler::new(dt, 5.0).unwrap().resample(&samples).unwrap();
        FrameSynthesizer::new(retirement_threshold_s, None)
            .unwrap()
            .synthesize(&resampled)
            .unwrap()
    }

    #[test]
    fn test_two_driver_scenario() {
        let frames = synthesize(
            vec![
                (1, vec![sample(1, 0., 0.), sample(1, 2., 20.)]),
                (2, vec![sample(2, 0., 0.), sample(2, 2., 10.)]),
            ],
            1.0,
            10.0,
        );

        let frame = frames.get(1).unwrap();
        assert_eq!(frame.timestamp, 1.0);
        assert_relative_eq!(frame.driver(DriverNumber(1)).unwrap().x, 10.0);
        assert_relative_eq!(frame.driver(DriverNumber(2)).unwrap().x, 5.0);
        let order: Vec<DriverNumber> = frame.leaderboard().iter().map(|e| e.driver).collect();
        assert_eq!(order, vec![DriverNumber(1), DriverNumber(2)]);
    }

    #[test]
    fn test_retirement_after_hold_threshold() {
        let frames = synthesize(
            vec![
                (1, vec![sample(1, 0., 0.), sample(1, 80., 8000.)]),
                (3, vec![sample(3, 0., 0.), sample(3, 50., 4000.)]),
            ],
            1.0,
            10.0,
        );

        let driver_c = DriverNumber(3);
        assert_eq!(
            frames.get(59).unwrap().driver(driver_c).unwrap().status,
            DriverStatus::Running
        );
        assert_eq!(
            frames.get(60).unwrap().driver(driver_c).unwrap().status,
            DriverStatus::Running
        );
        assert_eq!(
            frames.get(61).unwrap().driver(driver_c).unwrap().status,
            DriverStatus::Out
        );
        let held = frames.get(59).unwrap().driver(driver_c).unwrap();
        assert_relative_eq!(held.x, 4000.0);

        // out drivers stay in the frame but leave the leaderboard
        let last = frames.last().unwrap();
        assert!(last.driver(driver_c).is_some());
        assert_eq!(last.leaderboard().len(), 1);
        assert_eq!(last.retired(), vec![driver_c]);
    }

    #[test]
    fn test_explicit_retirement_marker() {
        let mut marked = sample(2, 5., 500.);
        marked.retired = true;
        let frames = synthesize(
            vec![
                (1, vec![sample(1, 0., 0.), sample(1, 10., 1000.)]),
                (2, vec![sample(2, 0., 0.), marked, sample(2, 10., 600.)]),
            ],
            1.0,
            30.0,
        );
        assert!(!frames.get(4).unwrap().driver(DriverNumber(2)).unwrap().is_out());
        assert!(frames.get(5).unwrap().driver(DriverNumber(2)).unwrap().is_out());
        assert!(frames.get(10).unwrap().driver(DriverNumber(2)).unwrap().is_out());
    }

    #[test]
    fn test_late_starter_absent_until_active() {
        let frames = synthesize(
            vec![
                (1, vec![sample(1, 0., 0.), sample(1, 20., 1000.)]),
                (2, vec![sample(2, 10., 0.), sample(2, 20., 500.)]),
            ],
            1.0,
            10.0,
        );
        assert!(frames.get(0).unwrap().driver(DriverNumber(2)).is_none());
        assert!(frames.get(5).unwrap().driver(DriverNumber(2)).is_some());
        assert!(frames.is_contiguous());
    }

    #[test]
    fn test_cancelled_synthesis_returns_nothing() {
        let samples = [(DriverNumber(1), vec![sample(1, 0., 0.), sample(1, 2., 1.)])]
            .into_iter()
            .collect();
        let resampled = Resampler::new(1.0, 5.0).unwrap().resample(&samples).unwrap();
        let cancel = AtomicBool::new(true);
        let result = FrameSynthesizer::new(10.0, None)
            .unwrap()
            .synthesize_cancellable(&resampled, &cancel);
        assert!(matches!(result, Err(ReplayError::SynthesisCancelled)));
    }

    #[test]
    fn test_ranking_uses_reference_line() {
        let line =
            ReferenceLine::new(vec![(0., 0.), (100., 0.), (100., 100.), (0., 100.)]).unwrap();
        let mut a = vec![];
        let mut b = vec![];
        // A completes most of a lap, B only a quarter but ends closer to the start in x,y
        for (i, (ax, ay)) in [(0., 0.), (100., 0.), (100., 100.), (10., 100.)]
            .iter()
            .enumerate()
        {
            let mut s = sample(1, i as f64, *ax);
            s.y = *ay;
            a.push(s);
        }
        for (i, bx) in [0., 30., 60., 90.].iter().enumerate() {
            b.push(sample(2, i as f64, *bx));
        }
        let samples = [(DriverNumber(1), a), (DriverNumber(2), b)]
            .into_iter()
            .collect();
        let resampled = Resampler::new(1.0, 5.0).unwrap().resample(&samples).unwrap();
        let frames = FrameSynthesizer::new(10.0, Some(line))
            .unwrap()
            .synthesize(&resampled)
            .unwrap();

        let last = frames.last().unwrap();
        assert_eq!(last.lap_length_m, Some(400.0));
        assert_eq!(last.leaderboard()[0].driver, DriverNumber(1));
        assert_relative_eq!(last.driver(DriverNumber(1)).unwrap().progress_m, 290.0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_status_is_monotonic(
            ends in prop::collection::vec(2.0f64..60.0, 1..6),
            threshold in 0.5f64..15.0,
        ) {
            let samples: Vec<(u32, Vec<RawSample>)> = ends
                .iter()
                .enumerate()
                .map(|(i, end)| {
                    let d = i as u32 + 1;
                    (d, vec![sample(d, 0., 0.), sample(d, *end, end * 10.)])
                })
                .collect();
            let frames = synthesize(samples, 0.5, threshold);

            prop_assert!(frames.is_contiguous());
            for driver in 1..=ends.len() as u32 {
                let statuses: Vec<DriverStatus> = frames
                    .frames()
                    .iter()
                    .filter_map(|f| f.driver(DriverNumber(driver)).map(|s| s.status))
                    .collect();
                if let Some(first_out) = statuses.iter().position(|s| *s == DriverStatus::Out) {
                    prop_assert!(statuses[first_out..].iter().all(|s| *s == DriverStatus::Out));
                }
            }
        }
    }
}
