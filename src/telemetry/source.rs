use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_jsonlines::JsonLinesReader;

use crate::ReplayError;

use super::{Driver, DriverNumber, RawSample, SessionInfo, TrackStatusPeriod, TyreCompound};

/// Supplier of raw telemetry for one session. Implemented by whatever talks to
/// the upstream timing API; this crate ships a JSON Lines file adapter.
pub trait SampleSource {
    fn session_info(&self) -> Result<SessionInfo, ReplayError>;

    /// Roster of every driver taking part in the session
    fn drivers(&self) -> Result<Vec<Driver>, ReplayError>;

    /// Per-driver samples in delivery order
    fn samples(&self) -> Result<BTreeMap<DriverNumber, Vec<RawSample>>, ReplayError>;

    /// Circuit reference line used for the track-position metric
    fn reference_line(&self) -> Result<Option<Vec<(f64, f64)>>, ReplayError>;

    /// Flag, safety car and red flag periods, in start time order
    fn track_statuses(&self) -> Result<Vec<TrackStatusPeriod>, ReplayError>;
}

/// Sample row as it appears on the wire. DRS is the raw integer code.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SampleRecord {
    pub driver: u32,
    pub t: f64,
    pub x: f64,
    pub y: f64,
    pub speed: f64,
    pub gear: u8,
    #[serde(default)]
    pub drs: u8,
    pub lap: u32,
    #[serde(default)]
    pub tyre: TyreCompound,
    #[serde(default)]
    pub retired: bool,
}

impl SampleRecord {
    fn into_sample(self, line: usize) -> Result<RawSample, ReplayError> {
        for (field, value) in [
            ("t", self.t),
            ("x", self.x),
            ("y", self.y),
            ("speed", self.speed),
        ] {
            if !value.is_finite() {
                return Err(ReplayError::SampleParseError {
                    line,
                    reason: format!("field {field} is not a finite number"),
                });
            }
        }

        Ok(RawSample {
            driver: DriverNumber(self.driver),
            t: self.t,
            x: self.x,
            y: self.y,
            speed: self.speed,
            gear: self.gear,
            drs_on: RawSample::drs_from_code(self.drs),
            lap: self.lap,
            tyre: self.tyre,
            retired: self.retired,
        })
    }
}

/// One line of a telemetry JSON Lines file
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryRecord {
    Session(SessionInfo),
    Driver(Driver),
    Sample(SampleRecord),
    ReferenceLine { points: Vec<[f64; 2]> },
    TrackStatus(TrackStatusPeriod),
}

/// Session telemetry loaded from a JSON Lines file, one [`TelemetryRecord`]
/// per line.
#[derive(Debug, Clone)]
pub struct JsonlSampleSource {
    info: SessionInfo,
    drivers: BTreeMap<DriverNumber, Driver>,
    samples: BTreeMap<DriverNumber, Vec<RawSample>>,
    reference_line: Option<Vec<(f64, f64)>>,
    track_statuses: Vec<TrackStatusPeriod>,
}

impl JsonlSampleSource {
    pub fn open(path: &Path) -> Result<Self, ReplayError> {
        info!("Loading telemetry from {:?}", path);
        let file =
            std::fs::File::open(path).map_err(|e| ReplayError::SampleSourceError { source: e })?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, ReplayError> {
        let mut records = Vec::new();
        for (line_no, record) in JsonLinesReader::new(reader)
            .read_all::<TelemetryRecord>()
            .enumerate()
        {
            let record = record.map_err(|e| match e.kind() {
                // truncated lines surface as UnexpectedEof
                std::io::ErrorKind::InvalidData | std::io::ErrorKind::UnexpectedEof => {
                    ReplayError::SampleParseError {
                        line: line_no + 1,
                        reason: e.to_string(),
                    }
                }
                _ => ReplayError::SampleSourceError { source: e },
            })?;
            records.push(record);
        }
        Self::from_records(records)
    }

    pub fn from_records(
        records: impl IntoIterator<Item = TelemetryRecord>,
    ) -> Result<Self, ReplayError> {
        let mut info = None;
        let mut drivers = BTreeMap::new();
        let mut samples: BTreeMap<DriverNumber, Vec<RawSample>> = BTreeMap::new();
        let mut reference_line = None;
        let mut track_statuses = Vec::new();

        for (idx, record) in records.into_iter().enumerate() {
            let line = idx + 1;
            match record {
                TelemetryRecord::Session(session) => info = Some(session),
                TelemetryRecord::Driver(driver) => {
                    drivers.insert(driver.number, driver);
                }
                TelemetryRecord::Sample(row) => {
                    let sample = row.into_sample(line)?;
                    samples.entry(sample.driver).or_default().push(sample);
                }
                TelemetryRecord::ReferenceLine { points } => {
                    reference_line = Some(points.into_iter().map(|[x, y]| (x, y)).collect());
                }
                TelemetryRecord::TrackStatus(period) => {
                    if !period.start_s.is_finite() || period.end_s.is_some_and(|e| !e.is_finite())
                    {
                        return Err(ReplayError::SampleParseError {
                            line,
                            reason: "track status times must be finite".to_string(),
                        });
                    }
                    track_statuses.push(period);
                }
            }
        }

        let info = info.ok_or_else(|| ReplayError::SampleParseError {
            line: 0,
            reason: "missing session record".to_string(),
        })?;

        for number in samples.keys() {
            if !drivers.contains_key(number) {
                debug!("No roster entry for driver {}, using number as code", number);
                drivers.insert(*number, Driver::unnamed(*number));
            }
        }

        info!(
            "Loaded {} samples for {} drivers ({})",
            samples.values().map(Vec::len).sum::<usize>(),
            samples.len(),
            info.key
        );

        Ok(Self {
            info,
            drivers,
            samples,
            reference_line,
            track_statuses,
        })
    }
}

impl SampleSource for JsonlSampleSource {
    fn session_info(&self) -> Result<SessionInfo, ReplayError> {
        Ok(self.info.clone())
    }

    fn drivers(&self) -> Result<Vec<Driver>, ReplayError> {
        Ok(self.drivers.values().cloned().collect())
    }

    fn samples(&self) -> Result<BTreeMap<DriverNumber, Vec<RawSample>>, ReplayError> {
        Ok(self.samples.clone())
    }

    fn reference_line(&self) -> Result<Option<Vec<(f64, f64)>>, ReplayError> {
        Ok(self.reference_line.clone())
    }

    fn track_statuses(&self) -> Result<Vec<TrackStatusPeriod>, ReplayError> {
        let mut periods = self.track_statuses.clone();
        periods.sort_by(|a, b| a.start_s.total_cmp(&b.start_s));
        Ok(periods)
    }
}
