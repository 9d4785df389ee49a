/*
 *  daylight.rs
 *
 *  RGBClock - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  Day/night state and panel brightness
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

//! Sunrise/Sunset for a given lat/lon and date (NOAA algorithm, zenith 90.833°)
//! as the fallback horizon until the weather feed supplies one.

use chrono::{prelude::*, Duration as ChronoDuration};
use log::{debug, info};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use crate::guard;
use crate::icon_cache::IconCache;
use crate::source::{PeriodicSource, PollOutcome, SourceError};

const ZENITH_DEG: f64 = 90.833_f64; // "official" sunrise/sunset (refraction accounted)
const DEG_TO_RAD: f64 = std::f64::consts::PI / 180.0;
const RAD_TO_DEG: f64 = 180.0 / std::f64::consts::PI;

#[inline]
fn sin_deg(x: f64) -> f64 { (x * DEG_TO_RAD).sin() }
#[inline]
fn cos_deg(x: f64) -> f64 { (x * DEG_TO_RAD).cos() }
#[inline]
fn tan_deg(x: f64) -> f64 { (x * DEG_TO_RAD).tan() }

/// Normalize angle to [0,360)
fn norm360(x: f64) -> f64 {
    x.rem_euclid(360.0)
}

/// UT hours of sunrise (or sunset) on day-of-year `n`, None at polar day/night.
fn compute_ut(lat_deg: f64, lng_hour: f64, n: f64, is_rise: bool) -> Option<f64> {
    let solar = if is_rise { 6.0 } else { 18.0 };
    let t = n + (solar - lng_hour) / 24.0;

    // mean anomaly, then true longitude
    let m = 0.9856 * t - 3.289;
    let l = norm360(m + 1.916 * sin_deg(m) + 0.020 * sin_deg(2.0 * m) + 282.634);

    // right ascension, in the same quadrant as L
    let mut ra = norm360((0.91764 * tan_deg(l)).atan() * RAD_TO_DEG);
    ra += (l / 90.0).floor() * 90.0 - (ra / 90.0).floor() * 90.0;
    ra /= 15.0;

    let sin_dec = 0.39782 * sin_deg(l);
    let cos_dec = (1.0 - sin_dec * sin_dec).sqrt();
    let cos_h = (cos_deg(ZENITH_DEG) - sin_dec * sin_deg(lat_deg)) / (cos_dec * cos_deg(lat_deg));
    if !(-1.0..=1.0).contains(&cos_h) {
        return None;
    }

    let h = cos_h.acos() * RAD_TO_DEG;
    let h = if is_rise { 360.0 - h } else { h };
    let h = h / 15.0;
    let t_local = h + ra - (0.06571 * t) - 6.622;
    Some((t_local - lng_hour).rem_euclid(24.0))
}

fn ut_hours_to_utc(date: NaiveDate, ut_hours: f64) -> DateTime<Utc> {
    let secs = (ut_hours * 3600.0).round() as i64;
    let base = date.and_time(NaiveTime::MIN);
    DateTime::<Utc>::from_naive_utc_and_offset(base + ChronoDuration::seconds(secs), Utc)
}

/// Sunrise and sunset in UTC for the civil `date`.
pub fn sun_times(lat_deg: f64, lon_deg: f64, date: NaiveDate) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let n = date.ordinal() as f64;
    let lng_hour = lon_deg / 15.0;
    let rise = compute_ut(lat_deg, lng_hour, n, true)?;
    let set = compute_ut(lat_deg, lng_hour, n, false)?;
    Some((ut_hours_to_utc(date, rise), ut_hours_to_utc(date, set)))
}

/// Local sunrise and sunset wall clock times.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Horizon {
    pub sunrise: NaiveTime,
    pub sunset: NaiveTime,
}

impl Horizon {
    /// "06:42 AM" style times from the weather feed.
    pub fn parse(sunrise: &str, sunset: &str) -> Option<Self> {
        let p = |s: &str| NaiveTime::parse_from_str(s.trim(), "%I:%M %p").ok();
        Some(Self { sunrise: p(sunrise)?, sunset: p(sunset)? })
    }

    pub fn from_location(lat: f64, lng: f64, date: NaiveDate) -> Option<Self> {
        let (rise, set) = sun_times(lat, lng, date)?;
        Some(Self {
            sunrise: rise.with_timezone(&Local).time(),
            sunset: set.with_timezone(&Local).time(),
        })
    }

    pub fn is_day(&self, now: NaiveTime) -> bool {
        now > self.sunrise && now < self.sunset - ChronoDuration::minutes(1)
    }

    /// Countdown to the next sunrise or sunset as "HH:MM".
    pub fn next_event(&self, now: NaiveTime) -> String {
        let until = |t: NaiveTime| {
            let d = t.signed_duration_since(now);
            if d < ChronoDuration::zero() { d + ChronoDuration::days(1) } else { d }
        };
        let d = if self.is_day(now) { until(self.sunset) } else { until(self.sunrise) };
        format!("{:02}:{:02}", d.num_hours(), d.num_minutes() % 60)
    }
}

/// Day/night flag and the brightness the compositor should use.
pub struct Daylight {
    day_bright: u8,
    night_bright: u8,
    brightness: AtomicU8,
    is_day: AtomicBool,
    horizon: Mutex<Option<Horizon>>,
    next_event: Mutex<String>,
}

impl Daylight {
    pub fn new(day_bright: u8, night_bright: u8) -> Self {
        Self {
            day_bright,
            night_bright,
            brightness: AtomicU8::new(day_bright),
            is_day: AtomicBool::new(true),
            horizon: Mutex::new(None),
            next_event: Mutex::new(String::new()),
        }
    }

    pub fn brightness(&self) -> u8 {
        self.brightness.load(Ordering::Relaxed)
    }

    pub fn is_day(&self) -> bool {
        self.is_day.load(Ordering::Relaxed)
    }

    pub fn next_event(&self) -> String {
        guard::lock(&self.next_event).clone()
    }

    pub fn horizon(&self) -> Option<Horizon> {
        *guard::lock(&self.horizon)
    }

    /// The weather feed's horizon takes over from the computed one.
    pub fn set_horizon(&self, h: Horizon) {
        let mut cur = guard::lock(&self.horizon);
        if cur.as_ref() != Some(&h) {
            debug!("horizon {} .. {}", h.sunrise, h.sunset);
            *cur = Some(h);
        }
    }

    /// Seed the horizon when nothing better is known yet.
    pub fn seed_horizon(&self, h: Horizon) {
        let mut cur = guard::lock(&self.horizon);
        if cur.is_none() {
            *cur = Some(h);
        }
    }

    /// Recompute for `now`; true when day/night flipped.
    pub fn refresh(&self, now: NaiveTime) -> bool {
        let Some(h) = self.horizon() else {
            return false;
        };
        let day = h.is_day(now);
        *guard::lock(&self.next_event) = h.next_event(now);
        self.brightness
            .store(if day { self.day_bright } else { self.night_bright }, Ordering::Relaxed);
        let was = self.is_day.swap(day, Ordering::Relaxed);
        was != day
    }
}

/// Drives [`Daylight`] once a minute.
pub struct DaylightSource {
    daylight: Arc<Daylight>,
    location: Option<(f64, f64)>,
    /// icons with night variants, re-rendered on a flip
    on_flip: Vec<Arc<IconCache>>,
}

impl DaylightSource {
    pub fn new(daylight: Arc<Daylight>, location: Option<(f64, f64)>, on_flip: Vec<Arc<IconCache>>) -> Self {
        Self { daylight, location, on_flip }
    }
}

impl PeriodicSource for DaylightSource {
    fn name(&self) -> &str {
        "daylight"
    }

    async fn poll(&self) -> Result<PollOutcome, SourceError> {
        let now = Local::now();
        if let Some((lat, lng)) = self.location {
            if let Some(h) = Horizon::from_location(lat, lng, now.date_naive()) {
                self.daylight.seed_horizon(h);
            }
        }
        if self.daylight.refresh(now.time()) {
            info!(
                "switched to {} brightness {}",
                if self.daylight.is_day() { "day" } else { "night" },
                self.daylight.brightness()
            );
            for c in &self.on_flip {
                c.invalidate();
            }
            return Ok(PollOutcome::Updated);
        }
        Ok(PollOutcome::Unchanged)
    }

    fn mark_unknown(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn parses_feed_times() {
        let h = Horizon::parse("06:42 AM", "07:15 PM").unwrap();
        assert_eq!(h.sunrise, t(6, 42));
        assert_eq!(h.sunset, t(19, 15));
        assert!(Horizon::parse("dawn", "7:15 PM").is_none());
    }

    #[test]
    fn day_window_excludes_last_minute() {
        let h = Horizon { sunrise: t(6, 0), sunset: t(18, 0) };
        assert!(!h.is_day(t(6, 0)));
        assert!(h.is_day(t(12, 0)));
        assert!(h.is_day(t(17, 58)));
        assert!(!h.is_day(t(17, 59)));
        assert!(!h.is_day(t(23, 0)));
    }

    #[test]
    fn countdown_to_next_event() {
        let h = Horizon { sunrise: t(6, 0), sunset: t(18, 0) };
        assert_eq!(h.next_event(t(16, 30)), "01:30");
        assert_eq!(h.next_event(t(22, 0)), "08:00");
        assert_eq!(h.next_event(t(5, 15)), "00:45");
    }

    #[test]
    fn refresh_reports_flips_and_brightness() {
        let d = Daylight::new(40, 5);
        assert!(!d.refresh(t(12, 0)));
        d.set_horizon(Horizon { sunrise: t(6, 0), sunset: t(18, 0) });
        assert!(!d.refresh(t(12, 0)));
        assert_eq!(d.brightness(), 40);
        assert!(d.refresh(t(21, 0)));
        assert_eq!(d.brightness(), 5);
        assert!(!d.is_day());
        assert!(!d.refresh(t(22, 0)));
    }

    #[test]
    fn noaa_boston_summer_is_plausible() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 21).unwrap();
        let (rise, set) = sun_times(42.36, -71.06, date).unwrap();
        // about 09:07 and 00:25 UTC
        assert!((8..=9).contains(&rise.hour()));
        let day_len = (set - rise).num_minutes().rem_euclid(24 * 60);
        assert!((900..=935).contains(&day_len), "{day_len}");
    }

    #[test]
    fn polar_night_has_no_horizon() {
        let date = NaiveDate::from_ymd_opt(2024, 12, 21).unwrap();
        assert!(sun_times(80.0, 0.0, date).is_none());
    }
}
