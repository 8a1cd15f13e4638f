//! Animation settings shared by the headless runner and the tests
//!
//! Pipeline evaluation works in integer ticks ([`TimePoint`]). Animation
//! frames map onto ticks through a fixed number of ticks per frame, so a
//! modifier whose result is valid for one frame reports a validity interval
//! covering that frame's ticks.

use crate::types::{TimeInterval, TimePoint};
use serde::{Deserialize, Serialize};

/// Default ticks per animation frame
pub const DEFAULT_TICKS_PER_FRAME: i64 = 1;

/// Frame range and frame-to-time mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnimationSettings {
    /// Number of time ticks per animation frame
    #[serde(default = "default_ticks_per_frame")]
    pub ticks_per_frame: i64,

    /// First frame of the animation interval
    #[serde(default)]
    pub first_frame: i64,

    /// Last frame of the animation interval (inclusive)
    #[serde(default)]
    pub last_frame: i64,
}

fn default_ticks_per_frame() -> i64 {
    DEFAULT_TICKS_PER_FRAME
}

impl Default for AnimationSettings {
    fn default() -> Self {
        Self {
            ticks_per_frame: DEFAULT_TICKS_PER_FRAME,
            first_frame: 0,
            last_frame: 0,
        }
    }
}

impl AnimationSettings {
    pub fn new(first_frame: i64, last_frame: i64) -> Self {
        Self {
            first_frame,
            last_frame,
            ..Default::default()
        }
    }

    fn ticks(&self) -> i64 {
        self.ticks_per_frame.max(1)
    }

    /// Animation time at the start of `frame`
    pub fn frame_to_time(&self, frame: i64) -> TimePoint {
        frame.saturating_mul(self.ticks())
    }

    /// The frame containing `time`, rounding towards negative infinity
    pub fn time_to_frame(&self, time: TimePoint) -> i64 {
        time.div_euclid(self.ticks())
    }

    /// All ticks belonging to `frame`
    pub fn frame_interval(&self, frame: i64) -> TimeInterval {
        let start = self.frame_to_time(frame);
        TimeInterval::new(start, start.saturating_add(self.ticks()))
    }

    /// Ticks spanned by the whole animation interval
    pub fn animation_interval(&self) -> TimeInterval {
        if self.last_frame < self.first_frame {
            return TimeInterval::empty();
        }
        TimeInterval::new(
            self.frame_to_time(self.first_frame),
            self.frame_interval(self.last_frame).end(),
        )
    }

    pub fn frame_count(&self) -> usize {
        if self.last_frame < self.first_frame {
            0
        } else {
            (self.last_frame - self.first_frame + 1) as usize
        }
    }

    /// Start times of every frame in order
    pub fn frame_times(&self) -> impl Iterator<Item = TimePoint> + '_ {
        (self.first_frame..=self.last_frame).map(move |frame| self.frame_to_time(frame))
    }
}
