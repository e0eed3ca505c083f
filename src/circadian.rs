/// Circadian engine: maps the current time + solar events to a color temperature.
///
/// Phases:
///   Day   → sunrise .. sunset, start_colortemp fading to sunset_colortemp
///   Night → sunset .. stop_time, sunset_colortemp fading to stop_colortemp,
///           then held at stop_colortemp until the next sunrise
///
/// Pure: no I/O, no clock. Callers supply `now` and the day's events.

use chrono::{DateTime, Duration, FixedOffset, NaiveTime};

use crate::color::{MAX_KELVIN, MIN_KELVIN};

/// The three color temperature anchors, in Kelvin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorTemps {
    pub start: u32,
    pub sunset: u32,
    pub stop: u32,
}

impl Default for ColorTemps {
    fn default() -> Self {
        Self {
            start: 4000,
            sunset: 3000,
            stop: 1900,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Day,
    Night,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Day => f.write_str("day"),
            Phase::Night => f.write_str("night"),
        }
    }
}

/// Result of one `compute` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interpolation {
    pub kelvin: f64,
    pub phase: Phase,
    /// Progress through the current phase, 0.0..=1.0.
    pub percentage: f64,
}

/// `now`'s calendar day at the given wall-clock time, seconds and below zeroed.
pub fn at_wall_clock(now: DateTime<FixedOffset>, time: NaiveTime) -> DateTime<FixedOffset> {
    let local = now.date_naive().and_time(time);
    let offset = *now.offset();
    let utc = local - Duration::seconds(offset.local_minus_utc() as i64);
    DateTime::from_naive_utc_and_offset(utc, offset)
}

/// Move `stop_time` onto the night that contains `now`.
///
/// A stop time at or before sunrise belongs to the following day once sunrise
/// has passed; a stop time after sunrise belongs to yesterday while sunrise is
/// still ahead.
pub fn normalize_stop_time(
    now: DateTime<FixedOffset>,
    sunrise: DateTime<FixedOffset>,
    stop_time: DateTime<FixedOffset>,
) -> DateTime<FixedOffset> {
    if stop_time <= sunrise {
        if sunrise < now {
            return stop_time + Duration::days(1);
        }
    } else if now < sunrise {
        return stop_time - Duration::days(1);
    }
    stop_time
}

/// Fraction of a window elapsed, in whole seconds. A window of zero (or
/// negative) length counts as complete.
fn fraction(elapsed: Duration, length: Duration) -> f64 {
    let length = length.num_seconds();
    if length <= 0 {
        return 1.0;
    }
    (elapsed.num_seconds() as f64 / length as f64).clamp(0.0, 1.0)
}

fn blend(from: u32, to: u32, percentage: f64) -> f64 {
    let range = from.abs_diff(to) as f64 * percentage;
    if from > to {
        from as f64 - range
    } else {
        from as f64 + range
    }
}

/// Compute the target color temperature for `now`.
///
/// `sunrise` is either the solar sunrise or the configured start time,
/// `sunset` is the solar sunset of `now`'s day, and `stop_time` is the
/// configured stop time on `now`'s day (normalized here).
pub fn compute(
    now: DateTime<FixedOffset>,
    sunrise: DateTime<FixedOffset>,
    sunset: DateTime<FixedOffset>,
    stop_time: DateTime<FixedOffset>,
    temps: ColorTemps,
) -> Interpolation {
    debug_assert!(
        [temps.start, temps.sunset, temps.stop]
            .iter()
            .all(|k| (MIN_KELVIN..=MAX_KELVIN).contains(k)),
        "color temperatures must be validated before interpolation: {temps:?}"
    );

    let stop_time = normalize_stop_time(now, sunrise, stop_time);

    if sunrise < now && now < sunset {
        let percentage = fraction(now - sunrise, sunset - sunrise);
        return Interpolation {
            kelvin: blend(temps.start, temps.sunset, percentage),
            phase: Phase::Day,
            percentage,
        };
    }

    let percentage = if now < stop_time {
        // Early morning tail of last night: measure from yesterday's sunset.
        let sunset = if stop_time < sunrise && stop_time.date_naive() == sunset.date_naive() {
            sunset - Duration::days(1)
        } else {
            sunset
        };
        fraction(now - sunset, stop_time - sunset)
    } else {
        1.0
    };

    Interpolation {
        kelvin: blend(temps.sunset, temps.stop, percentage),
        phase: Phase::Night,
        percentage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, h: u32, m: u32, s: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2024, 6, day, h, m, s)
            .unwrap()
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    /// Sunrise 07:00, sunset 19:00, stop 22:00 on `now`'s day.
    fn scenario(now: DateTime<FixedOffset>) -> Interpolation {
        compute(
            now,
            at_wall_clock(now, hm(7, 0)),
            at_wall_clock(now, hm(19, 0)),
            at_wall_clock(now, hm(22, 0)),
            ColorTemps::default(),
        )
    }

    #[test]
    fn midday_is_halfway_to_sunset_temp() {
        let r = scenario(at(10, 13, 0, 0));
        assert_eq!(r.phase, Phase::Day);
        assert!((r.percentage - 0.5).abs() < 1e-9);
        assert!((r.kelvin - 3500.0).abs() < 1e-9);
    }

    #[test]
    fn evening_is_halfway_to_stop_temp() {
        let r = scenario(at(10, 20, 30, 0));
        assert_eq!(r.phase, Phase::Night);
        assert!((r.percentage - 0.5).abs() < 1e-9);
        assert!((r.kelvin - 2450.0).abs() < 1e-9);
    }

    #[test]
    fn after_stop_time_is_pinned() {
        let r = scenario(at(10, 23, 0, 0));
        assert_eq!(r.phase, Phase::Night);
        assert_eq!(r.percentage, 1.0);
        assert_eq!(r.kelvin, 1900.0);

        // Before sunrise the stop time is yesterday's, so still pinned.
        let r = scenario(at(10, 3, 0, 0));
        assert_eq!(r.phase, Phase::Night);
        assert_eq!(r.percentage, 1.0);
        assert_eq!(r.kelvin, 1900.0);
    }

    #[test]
    fn day_percentage_rises_monotonically() {
        let mut previous = -1.0;
        for hour in 7..19 {
            for minute in [1, 30, 59] {
                let r = scenario(at(10, hour, minute, 0));
                assert_eq!(r.phase, Phase::Day);
                assert!(r.percentage > previous, "{hour}:{minute} did not advance");
                previous = r.percentage;
            }
        }
        assert!(scenario(at(10, 7, 0, 1)).percentage < 0.001);
        assert!(scenario(at(10, 18, 59, 59)).percentage > 0.999);
    }

    #[test]
    fn night_percentage_rises_then_holds() {
        assert_eq!(scenario(at(10, 19, 0, 0)).percentage, 0.0);
        let mut previous = -1.0;
        for (h, m) in [(19, 0), (19, 45), (20, 30), (21, 15), (21, 59)] {
            let r = scenario(at(10, h, m, 0));
            assert_eq!(r.phase, Phase::Night);
            assert!(r.percentage > previous);
            previous = r.percentage;
        }
        for h in [22, 23] {
            assert_eq!(scenario(at(10, h, 0, 0)).percentage, 1.0);
        }
    }

    #[test]
    fn stop_after_midnight_uses_yesterdays_sunset() {
        let stop = hm(1, 0);
        let run = |now: DateTime<FixedOffset>| {
            compute(
                now,
                at_wall_clock(now, hm(7, 0)),
                at_wall_clock(now, hm(19, 0)),
                at_wall_clock(now, stop),
                ColorTemps::default(),
            )
        };

        // 00:00 is 5h into the 6h window that started at 19:00 yesterday.
        let r = run(at(10, 0, 0, 0));
        assert_eq!(r.phase, Phase::Night);
        assert!((r.percentage - 5.0 / 6.0).abs() < 1e-9);

        // 22:00 is 3h into tonight's window, which ends at 01:00 tomorrow.
        let r = run(at(10, 22, 0, 0));
        assert!((r.percentage - 0.5).abs() < 1e-9);

        assert_eq!(run(at(10, 2, 0, 0)).percentage, 1.0);
    }

    #[test]
    fn rising_anchors_count_upwards() {
        let now = at(10, 13, 0, 0);
        let temps = ColorTemps { start: 2000, sunset: 6000, stop: 1900 };
        let r = compute(
            now,
            at_wall_clock(now, hm(7, 0)),
            at_wall_clock(now, hm(19, 0)),
            at_wall_clock(now, hm(22, 0)),
            temps,
        );
        assert!((r.kelvin - 4000.0).abs() < 1e-9);
    }

    #[test]
    fn zero_length_day_does_not_divide_by_zero() {
        // Sunrise and sunset within the same second: the day window truncates to 0s.
        let sunrise = at(10, 12, 0, 0);
        let sunset = sunrise + Duration::milliseconds(800);
        let now = sunrise + Duration::milliseconds(400);
        let r = compute(now, sunrise, sunset, at(10, 22, 0, 0), ColorTemps::default());
        assert_eq!(r.phase, Phase::Day);
        assert_eq!(r.percentage, 1.0);
        assert_eq!(r.kelvin, 3000.0);
    }

    #[test]
    fn stop_at_sunset_is_fully_night() {
        let now = at(10, 20, 0, 0);
        let r = compute(
            now,
            at(10, 7, 0, 0),
            at(10, 19, 0, 0),
            at(10, 19, 0, 0),
            ColorTemps::default(),
        );
        assert_eq!(r.phase, Phase::Night);
        assert_eq!(r.percentage, 1.0);
        assert!(r.kelvin.is_finite());
    }

    #[test]
    fn wall_clock_keeps_offset_and_date() {
        let now = at(10, 13, 45, 12);
        let t = at_wall_clock(now, hm(22, 0));
        assert_eq!(t, at(10, 22, 0, 0));
        assert_eq!(t.offset(), now.offset());
    }
}
