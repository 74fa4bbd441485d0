//! Time base arithmetic.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A time base or rate expressed as `num / den`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

/// Millisecond time base used for timestamps handed to frame sinks.
pub const MILLISECONDS: Rational = Rational { num: 1, den: 1000 };

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    pub fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }

    pub fn to_f64(&self) -> f64 {
        if self.den == 0 {
            return 0.0;
        }
        self.num as f64 / self.den as f64
    }

    pub fn recip(&self) -> Self {
        Self {
            num: self.den,
            den: self.num,
        }
    }

    /// Duration of one tick when `self` is a rate, e.g. 30/1 fps => 33.3ms.
    pub fn frame_interval(&self) -> Duration {
        if !self.is_valid() {
            return Duration::ZERO;
        }
        Duration::from_nanos(1_000_000_000u64 * self.den as u64 / self.num as u64)
    }

    /// Converts `value` expressed in `from` units into `to` units, rounding to
    /// the nearest integer with ties away from zero.
    pub fn rescale(value: i64, from: Rational, to: Rational) -> i64 {
        if !from.is_valid() || !to.is_valid() {
            return value;
        }
        let num = value as i128 * from.num as i128 * to.den as i128;
        let den = from.den as i128 * to.num as i128;
        let half = den / 2;
        let q = if num >= 0 {
            (num + half) / den
        } else {
            (num - half) / den
        };
        q.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self { num: 0, den: 1 }
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl From<(i32, i32)> for Rational {
    fn from((num, den): (i32, i32)) -> Self {
        Self { num, den }
    }
}
