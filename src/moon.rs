/*
 *  moon.rs
 *
 *  RGBClock - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  Lunar phase from the mean synodic month
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

use chrono::{DateTime, Local, TimeZone, Utc};
use log::info;
use std::sync::Arc;

use crate::icon_cache::IconCache;
use crate::source::{PeriodicSource, PollOutcome, SourceError};

pub const SYNODIC_MONTH: f64 = 29.530_588_68;

const NAMES: [&str; 9] = [
    "New Moon",
    "Waxing Crescent",
    "First Quarter",
    "Waxing Gibbous",
    "Full Moon",
    "Waning Gibbous",
    "Third Quarter",
    "Waning Crescent",
    "New Moon",
];

/// 2000-01-06 18:14 UTC
fn reference_new_moon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 6, 18, 14, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Fraction of the lunation in `[0, 1)`, 0 is new and 0.5 full.
pub fn moon_phase<Tz: TimeZone>(t: &DateTime<Tz>) -> f64 {
    let days = (t.with_timezone(&Utc) - reference_new_moon()).num_seconds() as f64 / 86_400.0;
    (days / SYNODIC_MONTH).rem_euclid(1.0)
}

/// Eighths, centred on the named phases; 8 is the new moon again.
pub fn phase_index(phase: f64) -> usize {
    (((phase + 0.0625) * 8.0).floor() as usize).min(8)
}

pub fn phase_name(index: usize) -> &'static str {
    NAMES.get(index).copied().unwrap_or(NAMES[0])
}

/// Icon map key for the moon at `t`.
pub fn moon_key<Tz: TimeZone>(t: &DateTime<Tz>) -> String {
    format!("moon-{}", phase_index(moon_phase(t)))
}

/// Keeps the moon icon on the current phase, off the render path.
pub struct MoonSource {
    icon: Arc<IconCache>,
}

impl MoonSource {
    pub fn new(icon: Arc<IconCache>) -> Self {
        Self { icon }
    }

    pub(crate) fn refresh_at(&self, now: &DateTime<Local>) -> PollOutcome {
        let key = moon_key(now);
        if self.icon.key() == key {
            return PollOutcome::Unchanged;
        }
        self.icon.ensure(&key, None, None);
        info!("moon now {}", phase_name(phase_index(moon_phase(now))));
        PollOutcome::Updated
    }
}

impl PeriodicSource for MoonSource {
    fn name(&self) -> &str {
        "moon"
    }

    async fn poll(&self) -> Result<PollOutcome, SourceError> {
        Ok(self.refresh_at(&Local::now()))
    }

    fn mark_unknown(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_is_new() {
        let t = reference_new_moon();
        assert!(moon_phase(&t) < 1e-9);
        assert_eq!(moon_key(&t), "moon-0");
    }

    #[test]
    fn half_a_lunation_is_full() {
        let t = reference_new_moon() + chrono::Duration::seconds((SYNODIC_MONTH * 43_200.0) as i64);
        assert!((moon_phase(&t) - 0.5).abs() < 1e-4);
        assert_eq!(phase_name(phase_index(moon_phase(&t))), "Full Moon");
    }

    #[test]
    fn index_wraps_to_new_near_the_end() {
        assert_eq!(phase_index(0.0), 0);
        assert_eq!(phase_index(0.06), 0);
        assert_eq!(phase_index(0.07), 1);
        assert_eq!(phase_index(0.25), 2);
        assert_eq!(phase_index(0.95), 8);
        assert_eq!(phase_name(8), "New Moon");
    }

    #[test]
    fn before_the_reference_stays_in_range() {
        let t = Utc.with_ymd_and_hms(1999, 12, 1, 0, 0, 0).unwrap();
        let p = moon_phase(&t);
        assert!((0.0..1.0).contains(&p));
    }

    #[test]
    fn source_renders_only_on_a_new_phase() {
        use crate::config::IconConfig;
        use crate::icon_cache::testing::CountingRasterizer;
        use crate::icons::IconMap;

        let r = Arc::new(CountingRasterizer::default());
        let icon = Arc::new(IconCache::new("moon", Arc::new(IconMap::new(&IconConfig::default())), r.clone()));
        let src = MoonSource::new(icon.clone());
        let new = reference_new_moon().with_timezone(&Local);

        assert_eq!(src.refresh_at(&new), PollOutcome::Updated);
        assert_eq!(icon.key(), "moon-0");
        assert_eq!(src.refresh_at(&(new + chrono::Duration::hours(6))), PollOutcome::Unchanged);
        assert_eq!(r.calls(), 1);

        let full = new + chrono::Duration::seconds((SYNODIC_MONTH * 43_200.0) as i64);
        assert_eq!(src.refresh_at(&full), PollOutcome::Updated);
        assert_eq!(icon.key(), "moon-4");
        assert_eq!(r.calls(), 2);
    }
}
