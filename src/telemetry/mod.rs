pub mod source;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use source::{JsonlSampleSource, SampleSource, TelemetryRecord};

/// Raw DRS codes at or above this value mean the flap is open (10, 12 and 14
/// in the upstream feed).
pub const DRS_OPEN_CODE: u8 = 10;

/// Car/driver number, the identity of a driver within a session
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct DriverNumber(pub u32);

impl fmt::Display for DriverNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Driver {
    pub number: DriverNumber,
    /// Three letter display code, e.g. "VER"
    pub code: String,
    pub team: String,
    /// Starting grid slot, when known
    pub grid_position: Option<u32>,
}

impl Driver {
    /// Roster entry for a driver that only appears in the sample stream
    pub fn unnamed(number: DriverNumber) -> Self {
        Self {
            number,
            code: number.0.to_string(),
            team: String::new(),
            grid_position: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum TyreCompound {
    Soft,
    Medium,
    Hard,
    Intermediate,
    Wet,
    #[default]
    Unknown,
}

impl TyreCompound {
    pub fn short_code(&self) -> &'static str {
        match self {
            TyreCompound::Soft => "S",
            TyreCompound::Medium => "M",
            TyreCompound::Hard => "H",
            TyreCompound::Intermediate => "I",
            TyreCompound::Wet => "W",
            TyreCompound::Unknown => "?",
        }
    }
}

/// One timestamped telemetry sample for one driver, as delivered upstream
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RawSample {
    pub driver: DriverNumber,
    /// Session time in seconds
    pub t: f64,
    pub x: f64,
    pub y: f64,
    /// Speed in km/h
    pub speed: f64,
    pub gear: u8,
    pub drs_on: bool,
    pub lap: u32,
    pub tyre: TyreCompound,
    /// Explicit retirement marker
    #[serde(default)]
    pub retired: bool,
}

impl RawSample {
    pub fn drs_from_code(code: u8) -> bool {
        code >= DRS_OPEN_CODE
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SessionKind {
    Race,
    Qualifying,
    Sprint,
    SprintQualifying,
}

impl SessionKind {
    pub fn code(&self) -> &'static str {
        match self {
            SessionKind::Race => "R",
            SessionKind::Qualifying => "Q",
            SessionKind::Sprint => "S",
            SessionKind::SprintQualifying => "SQ",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.to_uppercase().as_str() {
            "R" => Some(SessionKind::Race),
            "Q" => Some(SessionKind::Qualifying),
            "S" => Some(SessionKind::Sprint),
            "SQ" => Some(SessionKind::SprintQualifying),
            _ => None,
        }
    }

    pub fn is_sprint(&self) -> bool {
        matches!(self, SessionKind::Sprint | SessionKind::SprintQualifying)
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionKind::Race => "Race",
            SessionKind::Qualifying => "Qualifying",
            SessionKind::Sprint => "Sprint",
            SessionKind::SprintQualifying => "Sprint Qualifying",
        };
        f.write_str(name)
    }
}

/// Identity of a replayed session
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub year: u16,
    pub round: u8,
    pub kind: SessionKind,
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} round {} {}", self.year, self.round, self.kind)
    }
}

/// Track-wide condition reported by race control
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TrackStatus {
    Green,
    Yellow,
    SafetyCar,
    RedFlag,
    VirtualSafetyCar,
}

impl TrackStatus {
    /// Upstream status code: 1 green, 2 yellow, 4 safety car, 5 red flag,
    /// 6 and 7 virtual safety car (deployed / ending).
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "1" => Some(TrackStatus::Green),
            "2" => Some(TrackStatus::Yellow),
            "4" => Some(TrackStatus::SafetyCar),
            "5" => Some(TrackStatus::RedFlag),
            "6" | "7" => Some(TrackStatus::VirtualSafetyCar),
            _ => None,
        }
    }
}

impl fmt::Display for TrackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrackStatus::Green => "Green",
            TrackStatus::Yellow => "Yellow Flag",
            TrackStatus::SafetyCar => "Safety Car",
            TrackStatus::RedFlag => "Red Flag",
            TrackStatus::VirtualSafetyCar => "Virtual SC",
        };
        f.write_str(name)
    }
}

/// A track status in force from `start_s` until `end_s` (session time, same
/// clock as the samples). An open period has no end.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct TrackStatusPeriod {
    pub status: TrackStatus,
    pub start_s: f64,
    #[serde(default)]
    pub end_s: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionInfo {
    pub key: SessionKey,
    pub event_name: String,
    pub total_laps: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drs_codes() {
        assert!(!RawSample::drs_from_code(0));
        assert!(!RawSample::drs_from_code(8));
        assert!(RawSample::drs_from_code(10));
        assert!(RawSample::drs_from_code(12));
        assert!(RawSample::drs_from_code(14));
    }

    #[test]
    fn test_session_kind_codes() {
        for kind in [
            SessionKind::Race,
            SessionKind::Qualifying,
            SessionKind::Sprint,
            SessionKind::SprintQualifying,
        ] {
            assert_eq!(SessionKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(SessionKind::from_code("sq"), Some(SessionKind::SprintQualifying));
        assert_eq!(SessionKind::from_code("FP1"), None);
        assert!(SessionKind::Sprint.is_sprint());
        assert!(!SessionKind::Race.is_sprint());
    }

    #[test]
    fn test_track_status_codes() {
        assert_eq!(TrackStatus::from_code("1"), Some(TrackStatus::Green));
        assert_eq!(TrackStatus::from_code("2"), Some(TrackStatus::Yellow));
        assert_eq!(TrackStatus::from_code("4"), Some(TrackStatus::SafetyCar));
        assert_eq!(TrackStatus::from_code("5"), Some(TrackStatus::RedFlag));
        assert_eq!(
            TrackStatus::from_code("6"),
            Some(TrackStatus::VirtualSafetyCar)
        );
        assert_eq!(
            TrackStatus::from_code("7"),
            Some(TrackStatus::VirtualSafetyCar)
        );
        assert_eq!(TrackStatus::from_code("3"), None);
        assert_eq!(TrackStatus::SafetyCar.to_string(), "Safety Car");
    }

    #[test]
    fn test_driver_number_display() {
        assert_eq!(DriverNumber(44).to_string(), "#44");
        assert_eq!(Driver::unnamed(DriverNumber(1)).code, "1");
    }
}
