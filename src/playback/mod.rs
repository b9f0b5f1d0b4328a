// Tick-driven playback over a resident frame sequence

use std::fmt;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::ReplayError;
use crate::frames::{DriverState, Frame, FrameSequence, LeaderboardEntry};
use crate::telemetry::DriverNumber;

/// Frames skipped by a single step forward/backward
pub const STEP_FRAMES: i64 = 10;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn reversed(&self) -> Self {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum PlaybackSpeed {
    Half,
    Normal,
    Double,
    Quadruple,
}

impl PlaybackSpeed {
    pub fn multiplier(&self) -> f64 {
        match self {
            PlaybackSpeed::Half => 0.5,
            PlaybackSpeed::Normal => 1.0,
            PlaybackSpeed::Double => 2.0,
            PlaybackSpeed::Quadruple => 4.0,
        }
    }

    /// Next speed up, saturating at 4x
    pub fn faster(&self) -> Self {
        match self {
            PlaybackSpeed::Half => PlaybackSpeed::Normal,
            PlaybackSpeed::Normal => PlaybackSpeed::Double,
            PlaybackSpeed::Double | PlaybackSpeed::Quadruple => PlaybackSpeed::Quadruple,
        }
    }

    /// Next speed down, saturating at 0.5x
    pub fn slower(&self) -> Self {
        match self {
            PlaybackSpeed::Half | PlaybackSpeed::Normal => PlaybackSpeed::Half,
            PlaybackSpeed::Double => PlaybackSpeed::Normal,
            PlaybackSpeed::Quadruple => PlaybackSpeed::Double,
        }
    }
}

impl TryFrom<f64> for PlaybackSpeed {
    type Error = ReplayError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        match value {
            v if v == 0.5 => Ok(PlaybackSpeed::Half),
            v if v == 1.0 => Ok(PlaybackSpeed::Normal),
            v if v == 2.0 => Ok(PlaybackSpeed::Double),
            v if v == 4.0 => Ok(PlaybackSpeed::Quadruple),
            _ => Err(ReplayError::InvalidSpeed { value }),
        }
    }
}

impl fmt::Display for PlaybackSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}x", self.multiplier())
    }
}

/// Snapshot of the controller for pause/speed/direction indicators
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct PlaybackState {
    pub index: usize,
    pub direction: Direction,
    pub speed: PlaybackSpeed,
    pub paused: bool,
}

/// Control input, applied in the order received
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ControlEvent {
    Tick,
    Pause,
    Resume,
    TogglePause,
    SetDirection(Direction),
    SetSpeed(PlaybackSpeed),
    Faster,
    Slower,
    Seek(i64),
    StepForward,
    StepBackward,
    Restart,
    SelectDriver(Option<DriverNumber>),
}

/// Cursor over a frame sequence. Driven by an external update loop calling
/// [`PlaybackController::tick`]; all mutation goes through `&mut self`, so the
/// owner serializes ticks and control events.
pub struct PlaybackController<'a> {
    frames: &'a FrameSequence,
    state: PlaybackState,
    /// Fraction of a frame carried between ticks at sub-unit speeds
    carry: f64,
    selected: Option<DriverNumber>,
}

impl<'a> PlaybackController<'a> {
    /// Starts paused on the first frame, forward at 1x
    pub fn new(frames: &'a FrameSequence) -> Result<Self, ReplayError> {
        if frames.is_empty() {
            return Err(ReplayError::EmptySession);
        }
        Ok(Self {
            frames,
            state: PlaybackState {
                index: 0,
                direction: Direction::Forward,
                speed: PlaybackSpeed::Normal,
                paused: true,
            },
            carry: 0.0,
            selected: None,
        })
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn last_index(&self) -> usize {
        self.frames.len() - 1
    }

    pub fn pause(&mut self) {
        self.state.paused = true;
    }

    pub fn resume(&mut self) {
        self.state.paused = false;
    }

    pub fn toggle_pause(&mut self) {
        self.state.paused = !self.state.paused;
    }

    pub fn set_direction(&mut self, direction: Direction) {
        if direction != self.state.direction {
            self.carry = 0.0;
        }
        self.state.direction = direction;
    }

    pub fn set_speed(&mut self, speed: PlaybackSpeed) {
        self.state.speed = speed;
    }

    /// Set the speed from a raw multiplier, one of 0.5, 1, 2 or 4
    pub fn set_speed_multiplier(&mut self, multiplier: f64) -> Result<(), ReplayError> {
        self.state.speed = PlaybackSpeed::try_from(multiplier)?;
        Ok(())
    }

    /// Jump to `index`, clamped to the sequence
    pub fn seek(&mut self, index: i64) {
        let clamped = index.clamp(0, self.last_index() as i64) as usize;
        debug!("Seek to {} (requested {})", clamped, index);
        self.state.index = clamped;
        self.carry = 0.0;
    }

    pub fn step_forward(&mut self) {
        self.seek(self.state.index as i64 + STEP_FRAMES);
    }

    pub fn step_backward(&mut self) {
        self.seek(self.state.index as i64 - STEP_FRAMES);
    }

    /// Back to the first frame, paused, forward at 1x
    pub fn restart(&mut self) {
        self.seek(0);
        self.state.direction = Direction::Forward;
        self.state.speed = PlaybackSpeed::Normal;
        self.state.paused = true;
    }

    /// Advance by `speed` frames in the current direction while playing.
    /// Reaching either end of the sequence pauses playback.
    pub fn tick(&mut self) {
        if self.state.paused {
            return;
        }

        self.carry += self.state.speed.multiplier();
        let whole = self.carry.floor();
        self.carry -= whole;
        let step = whole as usize;

        let last = self.last_index();
        let index = self.state.index;
        let (next, at_boundary) = match self.state.direction {
            Direction::Forward => {
                let next = index.saturating_add(step).min(last);
                (next, next == last)
            }
            Direction::Backward => {
                let next = index.saturating_sub(step);
                (next, next == 0)
            }
        };
        self.state.index = next;

        if at_boundary {
            debug!("Reached frame {} of {}, pausing", next, self.frames.len());
            self.state.paused = true;
            self.carry = 0.0;
        }
    }

    /// Apply one control event
    pub fn apply(&mut self, event: ControlEvent) -> Result<(), ReplayError> {
        match event {
            ControlEvent::Tick => self.tick(),
            ControlEvent::Pause => self.pause(),
            ControlEvent::Resume => self.resume(),
            ControlEvent::TogglePause => self.toggle_pause(),
            ControlEvent::SetDirection(direction) => self.set_direction(direction),
            ControlEvent::SetSpeed(speed) => self.set_speed(speed),
            ControlEvent::Faster => self.set_speed(self.state.speed.faster()),
            ControlEvent::Slower => self.set_speed(self.state.speed.slower()),
            ControlEvent::Seek(index) => self.seek(index),
            ControlEvent::StepForward => self.step_forward(),
            ControlEvent::StepBackward => self.step_backward(),
            ControlEvent::Restart => self.restart(),
            ControlEvent::SelectDriver(driver) => self.select_driver(driver)?,
        }
        Ok(())
    }

    pub fn current_frame(&self) -> &'a Frame {
        &self.frames.frames()[self.state.index]
    }

    pub fn current_leaderboard(&self) -> Vec<LeaderboardEntry> {
        self.current_frame().leaderboard()
    }

    pub fn driver_detail(&self, driver: DriverNumber) -> Result<&'a DriverState, ReplayError> {
        self.current_frame()
            .driver(driver)
            .ok_or(ReplayError::UnknownDriver { driver })
    }

    /// Select a driver for detail display, `None` clears the selection. A
    /// driver that never appears in the session is rejected.
    pub fn select_driver(&mut self, driver: Option<DriverNumber>) -> Result<(), ReplayError> {
        if let Some(number) = driver {
            let known = self
                .frames
                .frames()
                .iter()
                .any(|frame| frame.drivers.contains_key(&number));
            if !known {
                return Err(ReplayError::UnknownDriver { driver: number });
            }
        }
        self.selected = driver;
        Ok(())
    }

    pub fn selected_driver(&self) -> Option<DriverNumber> {
        self.selected
    }

    /// Detail for the selected driver in the current frame
    pub fn selected_detail(&self) -> Option<Result<&'a DriverState, ReplayError>> {
        self.selected.map(|driver| self.driver_detail(driver))
    }
}
