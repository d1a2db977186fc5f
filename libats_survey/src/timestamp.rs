//! UTC instants with sub-second fractions.
//!
//! Recordings start on whole seconds, but stop times and gap positions can
//! land between seconds at fractional rates. All duration math here splits
//! whole seconds from the sub-second part so that stop times stay
//! sample-accurate at high rates instead of accumulating float rounding.

use std::cmp::Ordering;

use time::OffsetDateTime;

/// Fractions below this are treated as a clean zero.
const SUB_SECOND_EPS: f64 = 1e-9;

/// A UTC instant: Unix seconds plus a fraction in `[0, 1)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeStamp {
    pub secs: i64,
    pub fracs: f64,
}

impl TimeStamp {
    pub fn new(secs: i64, fracs: f64) -> Self {
        let mut ts = Self { secs, fracs };
        ts.normalize();
        ts
    }

    /// Epoch start, the default for synthetic channels.
    pub fn epoch() -> Self {
        Self::default()
    }

    fn normalize(&mut self) {
        if self.fracs >= 1.0 {
            let whole = self.fracs.floor();
            self.secs += whole as i64;
            self.fracs -= whole;
        } else if self.fracs < 0.0 {
            let whole = self.fracs.floor();
            self.secs += whole as i64;
            self.fracs -= whole;
        }
        if self.fracs < SUB_SECOND_EPS {
            self.fracs = 0.0;
        } else if 1.0 - self.fracs < SUB_SECOND_EPS {
            self.secs += 1;
            self.fracs = 0.0;
        }
    }

    /// The instant `samples / sample_rate` seconds after `self`.
    ///
    /// Integral rates and integral periods are handled with integer
    /// division so the result is exact for arbitrarily long recordings.
    pub fn add_samples(&self, samples: u64, sample_rate: f64) -> Self {
        let (secs, fracs) = duration_of(samples, sample_rate);
        Self::new(self.secs + secs, self.fracs + fracs)
    }

    /// Number of sample intervals from `self` to `later` at `sample_rate`,
    /// rounded to the nearest integer. Negative when `later` lies before
    /// `self`.
    pub fn samples_until(&self, later: &TimeStamp, sample_rate: f64) -> i64 {
        let dt = (later.secs - self.secs) as f64 + (later.fracs - self.fracs);
        (dt * sample_rate).round() as i64
    }

    fn civil(&self) -> OffsetDateTime {
        // i64 seconds are always in range for OffsetDateTime
        OffsetDateTime::from_unix_timestamp(self.secs)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }

    /// `YYYY-MM-DD`
    pub fn date(&self) -> String {
        let t = self.civil();
        format!("{:04}-{:02}-{:02}", t.year(), t.month() as u8, t.day())
    }

    /// `HH:MM:SS`
    pub fn time_of_day(&self) -> String {
        let t = self.civil();
        format!("{:02}:{:02}:{:02}", t.hour(), t.minute(), t.second())
    }

    /// `HH-MM-SS`, for use inside filenames.
    pub fn time_of_day_dashed(&self) -> String {
        self.time_of_day().replace(':', "-")
    }

    /// ISO-8601 `YYYY-MM-DDTHH:MM:SS`, with the fraction appended when
    /// non-zero.
    pub fn datetime(&self) -> String {
        let base = format!("{}T{}", self.date(), self.time_of_day());
        if self.fracs > 0.0 {
            // strip the leading "0" of e.g. "0.25"
            format!("{}{}", base, format!("{:.6}", self.fracs).trim_end_matches('0').trim_start_matches('0'))
        } else {
            base
        }
    }

    /// Measurement-directory name, `meas_YYYY-MM-DD_HH-MM-SS`.
    pub fn measdir(&self) -> String {
        format!("meas_{}_{}", self.date(), self.time_of_day_dashed())
    }

    /// Parse `YYYY-MM-DDTHH:MM:SS` with an optional `.fff` fraction.
    pub fn parse(datetime: &str) -> Option<Self> {
        let (whole, fracs) = match datetime.find('.') {
            Some(dot) => (&datetime[..dot], format!("0{}", &datetime[dot..]).parse::<f64>().ok()?),
            None => (datetime, 0.0),
        };
        let (date, time) = whole.split_once('T')?;
        let mut dparts = date.split('-');
        let year: i32 = dparts.next()?.parse().ok()?;
        let month: u8 = dparts.next()?.parse().ok()?;
        let day: u8 = dparts.next()?.parse().ok()?;
        let mut tparts = time.split(':');
        let hour: u8 = tparts.next()?.parse().ok()?;
        let minute: u8 = tparts.next()?.parse().ok()?;
        let second: u8 = tparts.next()?.parse().ok()?;
        let month = time::Month::try_from(month).ok()?;
        let date = time::Date::from_calendar_date(year, month, day).ok()?;
        let time = time::Time::from_hms(hour, minute, second).ok()?;
        let secs = date.with_time(time).assume_utc().unix_timestamp();
        Some(Self::new(secs, fracs))
    }
}

/// Split `samples / rate` into whole seconds and a sub-second fraction.
fn duration_of(samples: u64, rate: f64) -> (i64, f64) {
    if rate <= 0.0 {
        return (0, 0.0);
    }
    if rate >= 1.0 && rate.fract() == 0.0 {
        let r = rate as u64;
        ((samples / r) as i64, (samples % r) as f64 / rate)
    } else if rate < 1.0 && (1.0 / rate - (1.0 / rate).round()).abs() < SUB_SECOND_EPS {
        // integral period in seconds, e.g. 0.25 Hz -> 4 s
        let period = (1.0 / rate).round() as i64;
        (samples as i64 * period, 0.0)
    } else {
        let d = samples as f64 / rate;
        (d.trunc() as i64, d.fract())
    }
}

impl PartialEq for TimeStamp {
    fn eq(&self, other: &Self) -> bool {
        self.secs == other.secs && self.fracs == other.fracs
    }
}

impl Eq for TimeStamp {}

impl PartialOrd for TimeStamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeStamp {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.secs.cmp(&other.secs) {
            Ordering::Equal => self
                .fracs
                .partial_cmp(&other.fracs)
                .unwrap_or(Ordering::Equal),
            ord => ord,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_time_is_exact_at_high_rates() {
        // one hour of 4096 Hz must land exactly on the hour
        let start = TimeStamp::new(1_574_230_369, 0.0);
        let stop = start.add_samples(4096 * 3600, 4096.0);
        assert_eq!(stop.secs, 1_574_230_369 + 3600);
        assert_eq!(stop.fracs, 0.0);
    }

    #[test]
    fn test_stop_time_fraction() {
        let start = TimeStamp::new(0, 0.0);
        let stop = start.add_samples(10, 4.0);
        assert_eq!(stop.secs, 2);
        assert!((stop.fracs - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_integral_period() {
        let start = TimeStamp::new(100, 0.0);
        let stop = start.add_samples(7, 0.25);
        assert_eq!(stop.secs, 128);
        assert_eq!(stop.fracs, 0.0);
    }

    #[test]
    fn test_samples_until() {
        let a = TimeStamp::new(1000, 0.0);
        let b = TimeStamp::new(1011, 0.0);
        assert_eq!(a.samples_until(&b, 10.0), 110);
        assert_eq!(b.samples_until(&a, 10.0), -110);
    }

    #[test]
    fn test_rendering() {
        let ts = TimeStamp::new(1_574_232_769, 0.0);
        assert_eq!(ts.date(), "2019-11-20");
        assert_eq!(ts.time_of_day(), "06:52:49");
        assert_eq!(ts.datetime(), "2019-11-20T06:52:49");
        assert_eq!(ts.measdir(), "meas_2019-11-20_06-52-49");
    }

    #[test]
    fn test_parse_roundtrip() {
        let ts = TimeStamp::parse("2019-11-20T06:52:49").unwrap();
        assert_eq!(ts.secs, 1_574_232_769);
        assert_eq!(ts.datetime(), "2019-11-20T06:52:49");

        let frac = TimeStamp::parse("2019-11-20T06:52:49.25").unwrap();
        assert_eq!(frac.secs, 1_574_232_769);
        assert!((frac.fracs - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_ordering() {
        let a = TimeStamp::new(10, 0.0);
        let b = TimeStamp::new(10, 0.5);
        let c = TimeStamp::new(11, 0.0);
        assert!(a < b && b < c);
    }
}
