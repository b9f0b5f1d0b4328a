// Aligns per-driver raw telemetry onto a shared uniform time grid

use std::collections::BTreeMap;

use log::{debug, info};
use rayon::prelude::*;

use crate::ReplayError;
use crate::telemetry::{DriverNumber, RawSample, TyreCompound};

/// Uniform grid of ticks `start + k * dt` for `k` in `[0, count)`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeGrid {
    /// Session time of the first tick
    pub start: f64,
    pub dt: f64,
    pub count: usize,
}

impl TimeGrid {
    /// Grid covering `[start, end]` with step `dt`
    pub fn covering(start: f64, end: f64, dt: f64) -> Self {
        let span = (end - start).max(0.0);
        // the tolerance absorbs float error when the span is an exact multiple of dt
        let count = (span / dt + 1e-9).floor() as usize + 1;
        Self { start, dt, count }
    }

    /// Session time of tick `k`
    pub fn tick_time(&self, k: usize) -> f64 {
        self.start + k as f64 * self.dt
    }

    /// Timestamp of tick `k` relative to the grid start
    pub fn offset(&self, k: usize) -> f64 {
        k as f64 * self.dt
    }
}

/// Driver values at one tick
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResampledPoint {
    pub x: f64,
    pub y: f64,
    pub speed: f64,
    pub gear: u8,
    pub drs_on: bool,
    pub lap: u32,
    pub tyre: TyreCompound,
    /// Seconds since the last genuine sample when past the end of the
    /// driver's data, zero otherwise
    pub hold_s: f64,
    /// A retirement marker was seen at or before this tick
    pub retired: bool,
}

/// All drivers on a common grid. `None` marks ticks where a driver is not yet
/// active.
#[derive(Clone, Debug, PartialEq)]
pub struct ResampledSession {
    pub grid: TimeGrid,
    pub drivers: BTreeMap<DriverNumber, Vec<Option<ResampledPoint>>>,
}

pub struct Resampler {
    dt: f64,
    max_hold_s: f64,
}

impl Resampler {
    pub fn new(dt: f64, max_hold_s: f64) -> Result<Self, ReplayError> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(ReplayError::InvalidConfig {
                reason: format!("time step must be positive, got {dt}"),
            });
        }
        if !(max_hold_s.is_finite() && max_hold_s >= 0.0) {
            return Err(ReplayError::InvalidConfig {
                reason: format!("max hold must be non-negative, got {max_hold_s}"),
            });
        }
        Ok(Self { dt, max_hold_s })
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Resample every driver onto a grid spanning the earliest first sample to
    /// the latest last sample of the session.
    pub fn resample(
        &self,
        samples: &BTreeMap<DriverNumber, Vec<RawSample>>,
    ) -> Result<ResampledSession, ReplayError> {
        if samples.is_empty() {
            return Err(ReplayError::EmptySession);
        }

        // report the first defect in driver order, regardless of which thread finds it
        for (driver, driver_samples) in samples {
            validate_samples(*driver, driver_samples)?;
        }

        let min_start = samples
            .values()
            .map(|s| s[0].t)
            .fold(f64::INFINITY, f64::min);
        let max_end = samples
            .values()
            .map(|s| s[s.len() - 1].t)
            .fold(f64::NEG_INFINITY, f64::max);
        let grid = TimeGrid::covering(min_start, max_end, self.dt);

        info!(
            "Resampling {} drivers onto {} ticks of {:.3}s",
            samples.len(),
            grid.count,
            self.dt
        );

        let drivers = samples
            .par_iter()
            .map(|(driver, driver_samples)| {
                (*driver, self.resample_driver(&grid, driver_samples))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .collect();

        Ok(ResampledSession { grid, drivers })
    }

    fn resample_driver(
        &self,
        grid: &TimeGrid,
        samples: &[RawSample],
    ) -> Vec<Option<ResampledPoint>> {
        let first = &samples[0];
        let last = &samples[samples.len() - 1];
        let retired_at = samples.iter().find(|s| s.retired).map(|s| s.t);

        let mut values = Vec::with_capacity(grid.count);
        // index of the latest sample at or before the current tick
        let mut cursor = 0;
        for k in 0..grid.count {
            let t = grid.tick_time(k);
            let retired = retired_at.is_some_and(|at| t >= at);

            if t < first.t {
                if first.t - t > self.max_hold_s {
                    values.push(None);
                } else {
                    values.push(Some(held(first, 0.0, retired)));
                }
                continue;
            }

            while cursor + 1 < samples.len() && samples[cursor + 1].t <= t {
                cursor += 1;
            }

            if cursor + 1 == samples.len() {
                values.push(Some(held(last, t - last.t, retired)));
            } else {
                values.push(Some(interpolate(
                    &samples[cursor],
                    &samples[cursor + 1],
                    t,
                    retired,
                )));
            }
        }

        debug!(
            "Driver {} resampled: {} samples, {} active ticks",
            first.driver,
            samples.len(),
            values.iter().filter(|v| v.is_some()).count()
        );
        values
    }
}

fn validate_samples(driver: DriverNumber, samples: &[RawSample]) -> Result<(), ReplayError> {
    if samples.len() < 2 {
        return Err(ReplayError::InsufficientSamples {
            driver,
            count: samples.len(),
        });
    }
    if !samples[0].t.is_finite() {
        return Err(ReplayError::NonMonotonicTimestamps { driver, index: 0 });
    }
    for (index, pair) in samples.windows(2).enumerate() {
        // written so that NaN fails the check
        if !(pair[1].t > pair[0].t) {
            return Err(ReplayError::NonMonotonicTimestamps {
                driver,
                index: index + 1,
            });
        }
    }
    Ok(())
}

fn held(sample: &RawSample, hold_s: f64, retired: bool) -> ResampledPoint {
    ResampledPoint {
        x: sample.x,
        y: sample.y,
        speed: sample.speed,
        gear: sample.gear,
        drs_on: sample.drs_on,
        lap: sample.lap,
        tyre: sample.tyre,
        hold_s,
        retired,
    }
}

/// Linear blend of the continuous fields, discrete fields taken from `before`
fn interpolate(before: &RawSample, after: &RawSample, t: f64, retired: bool) -> ResampledPoint {
    let ratio = (t - before.t) / (after.t - before.t);
    let lerp = |a: f64, b: f64| a + (b - a) * ratio;
    ResampledPoint {
        x: lerp(before.x, after.x),
        y: lerp(before.y, after.y),
        speed: lerp(before.speed, after.speed),
        ..held(before, 0.0, retired)
    }
}
