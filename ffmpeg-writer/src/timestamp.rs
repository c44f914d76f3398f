//! Time base conversion and per-track decode-time ordering.

use ffmpeg_next::{
    Rational,
    util::mathematics::{Rescale, Rounding},
};

/// Rescale `value` from `from` to `to`, rounding half away from zero.
///
/// `i64::MIN` and `i64::MAX` are passed through untouched so sentinel values
/// survive the conversion. An invalid time base (non-positive numerator or
/// denominator) leaves the value unchanged.
pub fn rescale(value: i64, from: Rational, to: Rational) -> i64 {
    if value == i64::MIN || value == i64::MAX {
        return value;
    }
    if !is_valid(from) || !is_valid(to) || from == to {
        return value;
    }
    value.rescale_with(from, to, Rounding::NearestInfinity)
}

fn is_valid(time_base: Rational) -> bool {
    time_base.numerator() > 0 && time_base.denominator() > 0
}

/// Timestamp in seconds, for log output.
pub fn seconds(value: Option<i64>, time_base: Rational) -> String {
    match value {
        Some(v) if is_valid(time_base) => format!(
            "{:.6}",
            v as f64 * time_base.numerator() as f64 / time_base.denominator() as f64
        ),
        _ => "NOPTS".to_string(),
    }
}

/// What [`TrackTiming::correct`] did with a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    /// Decode-time moved forward to one tick past the last emitted one.
    /// `from` is the decode-time the packet arrived with.
    Shifted { from: Option<i64> },
    /// Same decode-time as the last emitted packet; must not be written.
    Duplicate,
}

/// Decode-time state of one output track.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackTiming {
    last_dts: Option<i64>,
}

impl TrackTiming {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last decode-time handed to the container, `None` before the first packet.
    pub fn last_dts(&self) -> Option<i64> {
        self.last_dts
    }

    pub fn reset(&mut self) {
        self.last_dts = None;
    }

    /// Enforce strictly increasing decode-times, rewriting `pts`/`dts` in place.
    ///
    /// A late packet keeps its pts - dts offset. Missing decode-times are
    /// assigned the next tick and leave pts as it was.
    pub fn correct(&mut self, pts: &mut Option<i64>, dts: &mut Option<i64>) -> Verdict {
        let verdict = match (self.last_dts, *dts) {
            (None, Some(_)) => Verdict::Accepted,
            (None, None) => {
                *dts = Some(0);
                Verdict::Shifted { from: None }
            }
            (Some(last), Some(current)) if current < last => {
                let next = last.saturating_add(1);
                *pts = pts.map(|p| next.saturating_add(p.saturating_sub(current)));
                *dts = Some(next);
                Verdict::Shifted {
                    from: Some(current),
                }
            }
            (Some(last), Some(current)) if current == last => return Verdict::Duplicate,
            (Some(_), Some(_)) => Verdict::Accepted,
            (Some(last), None) => {
                *dts = Some(last.saturating_add(1));
                Verdict::Shifted { from: None }
            }
        };
        self.last_dts = *dts;
        verdict
    }
}
