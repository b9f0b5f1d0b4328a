// Session assembly: frame cache lookup with the resample/synthesize pipeline
// as fallback

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;

use log::{info, warn};

use crate::ReplayError;
use crate::cache::FrameCache;
use crate::config::ReplayConfig;
use crate::events::SessionEvents;
use crate::frames::{FrameSequence, FrameSynthesizer};
use crate::resample::Resampler;
use crate::telemetry::{Driver, DriverNumber, SampleSource, SessionInfo};
use crate::track::ReferenceLine;

/// Where the frames of a loaded session came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOrigin {
    Cache,
    Synthesized,
}

/// One replayable session. Owns its roster and frames, the playback
/// controller borrows from it.
#[derive(Clone, Debug)]
pub struct Session {
    pub info: SessionInfo,
    pub drivers: BTreeMap<DriverNumber, Driver>,
    pub frames: FrameSequence,
    pub events: SessionEvents,
    pub origin: FrameOrigin,
}

impl Session {
    pub fn driver(&self, number: DriverNumber) -> Option<&Driver> {
        self.drivers.get(&number)
    }

    /// Display code for a driver, falling back to the number
    pub fn driver_code(&self, number: DriverNumber) -> String {
        self.driver(number)
            .map(|d| d.code.clone())
            .unwrap_or_else(|| number.0.to_string())
    }

    pub fn title(&self) -> String {
        format!("{} - {}", self.info.event_name, self.info.key.kind)
    }
}

/// Runs the full pipeline for a source: resample every driver, then
/// synthesize frames.
pub fn synthesize_frames(
    config: &ReplayConfig,
    source: &impl SampleSource,
    cancel: &AtomicBool,
) -> Result<FrameSequence, ReplayError> {
    config.validate()?;
    let samples = source.samples()?;
    let reference_line = source
        .reference_line()?
        .map(ReferenceLine::new)
        .transpose()?;

    let resampled = Resampler::new(config.dt(), config.max_hold_s)?.resample(&samples)?;
    FrameSynthesizer::new(config.retirement_threshold_s, reference_line)?
        .synthesize_cancellable(&resampled, cancel)
}

pub struct SessionLoader<C: FrameCache> {
    config: ReplayConfig,
    cache: C,
}

impl<C: FrameCache> SessionLoader<C> {
    pub fn new(config: ReplayConfig, cache: C) -> Self {
        Self { config, cache }
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Load a session from the cache, synthesizing it on a miss. `refresh`
    /// skips the cache lookup and overwrites the stored entry once synthesis
    /// succeeds, a failed or cancelled refresh leaves it in place.
    pub fn load(
        &mut self,
        source: &impl SampleSource,
        refresh: bool,
    ) -> Result<Session, ReplayError> {
        self.load_cancellable(source, refresh, &AtomicBool::new(false))
    }

    pub fn load_cancellable(
        &mut self,
        source: &impl SampleSource,
        refresh: bool,
        cancel: &AtomicBool,
    ) -> Result<Session, ReplayError> {
        let info = source.session_info()?;
        let key = info.key;
        let params = self.config.synthesis_params();
        let track_statuses = source.track_statuses()?;

        if refresh {
            info!("Forced refresh of {}, bypassing frame cache", key);
        } else {
            match self.cache.load(&key, &params) {
                Ok(cached) => {
                    let events =
                        SessionEvents::derive(&cached.frames, &track_statuses, info.total_laps);
                    return Ok(Session {
                        info,
                        drivers: cached.roster.into_iter().map(|d| (d.number, d)).collect(),
                        frames: cached.frames,
                        events,
                        origin: FrameOrigin::Cache,
                    });
                }
                Err(e) => info!("{}, synthesizing frames for {}", e, key),
            }
        }

        let frames = synthesize_frames(&self.config, source, cancel)?;
        let drivers: BTreeMap<DriverNumber, Driver> = source
            .drivers()?
            .into_iter()
            .map(|d| (d.number, d))
            .collect();

        let roster: Vec<Driver> = drivers.values().cloned().collect();
        if let Err(e) = self.cache.store(&key, &params, &roster, &frames) {
            // playback carries on from memory, the next load just pays the synthesis again
            warn!("Could not cache frames for {}: {}", key, e);
        }

        let events = SessionEvents::derive(&frames, &track_statuses, info.total_laps);
        Ok(Session {
            info,
            drivers,
            frames,
            events,
            origin: FrameOrigin::Synthesized,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CachedSession, FileFrameCache};
    use crate::config::SynthesisParams;
    use crate::telemetry::{
        JsonlSampleSource, SessionKey, SessionKind, TelemetryRecord, TyreCompound,
        source::SampleRecord,
    };
    use tempfile::TempDir;

    fn record(driver: u32, t: f64, x: f64) -> TelemetryRecord {
        TelemetryRecord::Sample(SampleRecord {
            driver,
            t,
            x,
            y: 0.0,
            speed: 250.0,
            gear: 7,
            drs: 0,
            lap: 1,
            tyre: TyreCompound::Medium,
            retired: false,
        })
    }

    fn source(last_x: f64) -> JsonlSampleSource {
        JsonlSampleSource::from_records(vec![
            TelemetryRecord::Session(SessionInfo {
                key: SessionKey {
                    year: 2023,
                    round: 4,
                    kind: SessionKind::Race,
                },
                event_name: "Azerbaijan Grand Prix".to_string(),
                total_laps: Some(51),
            }),
            record(1, 0., 0.),
            record(1, 2., last_x),
            record(11, 0., 0.),
            record(11, 2., 10.),
        ])
        .unwrap()
    }

    fn config() -> ReplayConfig {
        ReplayConfig {
            frame_rate_hz: 1.0,
            ..Default::default()
        }
    }

    /// Cache whose writes always fail
    struct ReadOnlyCache;

    impl FrameCache for ReadOnlyCache {
        fn load(&self, _: &SessionKey, _: &SynthesisParams) -> Result<CachedSession, ReplayError> {
            Err(ReplayError::CacheMiss {
                reason: "read only".to_string(),
            })
        }

        fn store(
            &mut self,
            _: &SessionKey,
            _: &SynthesisParams,
            _: &[Driver],
            _: &FrameSequence,
        ) -> Result<(), ReplayError> {
            Err(ReplayError::CacheWriteFailure {
                reason: "read only".to_string(),
            })
        }

        fn invalidate(&mut self, _: &SessionKey) -> Result<(), ReplayError> {
            Ok(())
        }
    }

    #[test]
    fn test_miss_then_hit() {
        let temp_dir = TempDir::new().unwrap();
        let cache = FileFrameCache::new(temp_dir.path().to_path_buf()).unwrap();
        let mut loader = SessionLoader::new(config(), cache);

        let first = loader.load(&source(20.), false).unwrap();
        assert_eq!(first.origin, FrameOrigin::Synthesized);
        assert_eq!(first.frames.len(), 3);
        assert_eq!(first.drivers.len(), 2);

        let second = loader.load(&source(20.), false).unwrap();
        assert_eq!(second.origin, FrameOrigin::Cache);
        assert_eq!(second.frames, first.frames);
        assert_eq!(second.drivers, first.drivers);
        assert_eq!(second.title(), "Azerbaijan Grand Prix - Race");
    }

    #[test]
    fn test_refresh_resynthesizes_and_overwrites() {
        let temp_dir = TempDir::new().unwrap();
        let cache = FileFrameCache::new(temp_dir.path().to_path_buf()).unwrap();
        let mut loader = SessionLoader::new(config(), cache);

        loader.load(&source(20.), false).unwrap();
        // same key, different data: only a refresh picks it up
        let stale = loader.load(&source(40.), false).unwrap();
        assert_eq!(stale.origin, FrameOrigin::Cache);
        assert_eq!(stale.frames.last().unwrap().drivers[&DriverNumber(1)].x, 20.0);

        let refreshed = loader.load(&source(40.), true).unwrap();
        assert_eq!(refreshed.origin, FrameOrigin::Synthesized);
        assert_eq!(refreshed.frames.last().unwrap().drivers[&DriverNumber(1)].x, 40.0);

        let reloaded = loader.load(&source(20.), false).unwrap();
        assert_eq!(reloaded.origin, FrameOrigin::Cache);
        assert_eq!(reloaded.frames, refreshed.frames);
    }

    #[test]
    fn test_cache_write_failure_is_not_fatal() {
        let mut loader = SessionLoader::new(config(), ReadOnlyCache);
        let session = loader.load(&source(20.), false).unwrap();
        assert_eq!(session.origin, FrameOrigin::Synthesized);
        assert_eq!(session.frames.len(), 3);
    }

    #[test]
    fn test_pipeline_error_aborts_and_stores_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let cache = FileFrameCache::new(temp_dir.path().to_path_buf()).unwrap();
        let mut loader = SessionLoader::new(config(), cache);

        let broken = JsonlSampleSource::from_records(vec![
            TelemetryRecord::Session(SessionInfo {
                key: SessionKey {
                    year: 2023,
                    round: 4,
                    kind: SessionKind::Race,
                },
                event_name: "Azerbaijan Grand Prix".to_string(),
                total_laps: Some(51),
            }),
            record(1, 0., 0.),
            record(1, 2., 20.),
            record(11, 5., 0.),
            record(11, 2., 10.),
        ])
        .unwrap();

        let result = loader.load(&broken, false);
        assert!(matches!(
            result,
            Err(ReplayError::NonMonotonicTimestamps { .. })
        ));
        let key = broken.session_info().unwrap().key;
        assert!(loader.cache().load(&key, &config().synthesis_params()).unwrap_err().is_cache_miss());
    }

    #[test]
    fn test_cancelled_load_stores_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let cache = FileFrameCache::new(temp_dir.path().to_path_buf()).unwrap();
        let mut loader = SessionLoader::new(config(), cache);

        let result = loader.load_cancellable(&source(20.), false, &AtomicBool::new(true));
        assert!(matches!(result, Err(ReplayError::SynthesisCancelled)));
        let key = source(20.).session_info().unwrap().key;
        assert!(loader.cache().load(&key, &config().synthesis_params()).unwrap_err().is_cache_miss());
    }

    #[test]
    fn test_cancelled_refresh_keeps_cached_entry() {
        let temp_dir = TempDir::new().unwrap();
        let cache = FileFrameCache::new(temp_dir.path().to_path_buf()).unwrap();
        let mut loader = SessionLoader::new(config(), cache);
        let first = loader.load(&source(20.), false).unwrap();

        let result = loader.load_cancellable(&source(40.), true, &AtomicBool::new(true));
        assert!(matches!(result, Err(ReplayError::SynthesisCancelled)));

        let key = source(20.).session_info().unwrap().key;
        let cached = loader
            .cache()
            .load(&key, &config().synthesis_params())
            .unwrap();
        assert_eq!(cached.frames, first.frames);
        let reloaded = loader.load(&source(40.), false).unwrap();
        assert_eq!(reloaded.origin, FrameOrigin::Cache);
    }

    #[test]
    fn test_frame_rate_change_resynthesizes() {
        let temp_dir = TempDir::new().unwrap();
        let first = SessionLoader::new(
            config(),
            FileFrameCache::new(temp_dir.path().to_path_buf()).unwrap(),
        )
        .load(&source(20.), false)
        .unwrap();
        assert_eq!(first.frames.len(), 3);

        let faster = ReplayConfig {
            frame_rate_hz: 10.0,
            ..Default::default()
        };
        let mut loader = SessionLoader::new(
            faster,
            FileFrameCache::new(temp_dir.path().to_path_buf()).unwrap(),
        );
        let second = loader.load(&source(20.), false).unwrap();
        assert_eq!(second.origin, FrameOrigin::Synthesized);
        assert_eq!(second.frames.dt, 0.1);
        assert_eq!(second.frames.len(), 21);

        // the entry now belongs to the new rate
        let third = loader.load(&source(20.), false).unwrap();
        assert_eq!(third.origin, FrameOrigin::Cache);
        assert_eq!(third.frames.dt, 0.1);
    }

    #[test]
    fn test_events_on_both_paths() {
        let temp_dir = TempDir::new().unwrap();
        let cache = FileFrameCache::new(temp_dir.path().to_path_buf()).unwrap();
        let mut loader = SessionLoader::new(config(), cache);

        let first = loader.load(&source(20.), false).unwrap();
        let second = loader.load(&source(20.), false).unwrap();
        assert_eq!(second.origin, FrameOrigin::Cache);
        assert_eq!(first.events, second.events);
        assert_eq!(first.events.total_laps, Some(51));
    }
}
