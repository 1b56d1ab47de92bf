//! Tick-based timestamps for the output package and for source content.
//!
//! Both timelines count ticks at [`TIME_HZ`], which divides evenly by every
//! DCP frame rate so frame boundaries land on whole ticks.

use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

use crate::playlist::FrameRateChange;

/// Ticks per second on both timelines.
pub const TIME_HZ: i64 = 96_000;

const FRAME_EPSILON: f64 = 1e-6;

macro_rules! tick_time {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            pub const fn new(ticks: i64) -> Self {
                Self(ticks)
            }

            pub const fn zero() -> Self {
                Self(0)
            }

            pub const fn ticks(self) -> i64 {
                self.0
            }

            pub fn from_seconds(seconds: f64) -> Self {
                Self((seconds * TIME_HZ as f64).round() as i64)
            }

            pub fn seconds(self) -> f64 {
                self.0 as f64 / TIME_HZ as f64
            }

            pub fn from_frames(frames: i64, rate: f64) -> Self {
                Self((frames as f64 * TIME_HZ as f64 / rate).round() as i64)
            }

            fn frames_exact(self, rate: f64) -> f64 {
                self.0 as f64 * rate / TIME_HZ as f64
            }

            /// Index of the frame containing this time.
            pub fn frames_floor(self, rate: f64) -> i64 {
                (self.frames_exact(rate) + FRAME_EPSILON).floor() as i64
            }

            pub fn frames_round(self, rate: f64) -> i64 {
                self.frames_exact(rate).round() as i64
            }

            pub fn frames_ceil(self, rate: f64) -> i64 {
                (self.frames_exact(rate) - FRAME_EPSILON).ceil() as i64
            }
        }

        impl Add for $name {
            type Output = Self;
            fn add(self, rhs: Self) -> Self {
                Self(self.0 + rhs.0)
            }
        }

        impl AddAssign for $name {
            fn add_assign(&mut self, rhs: Self) {
                self.0 += rhs.0;
            }
        }

        impl Sub for $name {
            type Output = Self;
            fn sub(self, rhs: Self) -> Self {
                Self(self.0 - rhs.0)
            }
        }

        impl SubAssign for $name {
            fn sub_assign(&mut self, rhs: Self) {
                self.0 -= rhs.0;
            }
        }

        impl Neg for $name {
            type Output = Self;
            fn neg(self) -> Self {
                Self(-self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:.3}s", self.seconds())
            }
        }
    };
}

tick_time!(
    /// A point or duration on the output package timeline.
    DcpTime
);

tick_time!(
    /// A point or duration inside a piece of source content.
    ContentTime
);

impl DcpTime {
    /// Output duration of `time` worth of content played through `frc`.
    pub fn from_content(time: ContentTime, frc: &FrameRateChange) -> Self {
        Self((time.ticks() as f64 / frc.speed_up).round() as i64)
    }
}

impl ContentTime {
    pub fn from_dcp(time: DcpTime, frc: &FrameRateChange) -> Self {
        Self((time.ticks() as f64 * frc.speed_up).round() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dcp_rates_land_on_whole_ticks() {
        for rate in [24.0, 25.0, 30.0, 48.0, 50.0, 60.0] {
            let t = DcpTime::from_frames(1, rate);
            assert_eq!(t.ticks() as f64 * rate, TIME_HZ as f64);
            assert_eq!(DcpTime::from_frames(137, rate).frames_floor(rate), 137);
        }
    }

    #[test]
    fn floor_and_ceil_straddle_frame_boundaries() {
        let one_tick_past = DcpTime::from_frames(10, 24.0) + DcpTime::new(1);
        assert_eq!(one_tick_past.frames_floor(24.0), 10);
        assert_eq!(one_tick_past.frames_ceil(24.0), 11);
        assert_eq!(DcpTime::from_frames(10, 24.0).frames_ceil(24.0), 10);
    }

    #[test]
    fn content_conversion_follows_speed_up() {
        let frc = FrameRateChange::new(25.0, 24);
        let content = ContentTime::from_frames(25, 25.0);
        let dcp = DcpTime::from_content(content, &frc);
        assert_eq!(dcp.frames_round(24.0), 25);
        assert_eq!(ContentTime::from_dcp(dcp, &frc), content);
    }
}
