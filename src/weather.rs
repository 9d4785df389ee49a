/*
 *  weather.rs
 *
 *  RGBClock - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  Current conditions and daypart forecast from the weather server
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
use log::{debug, info};
use reqwest::{header, Client};
use serde::Deserialize;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::daylight::{Daylight, Horizon};
use crate::deutils::{deserialize_numeric_i32, scan_numbers, DecodeError};
use crate::guard;
use crate::icon_cache::IconCache;
use crate::source::{PeriodicSource, PollOutcome, SourceError};

pub const WEATHER_TIMEOUT: Duration = Duration::from_secs(5);
const DAYPART_SCALE: f32 = 0.35;

/// Forecast period detail.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Daypart {
    pub hilo: String,
    pub icon: String,
    pub id: String,
    pub label: String,
    pub temperature: String,
    #[serde(rename = "pcntprecip")]
    pub precipitation: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Current {
    #[serde(deserialize_with = "deserialize_numeric_i32")]
    pub beafort: i32,
    #[serde(rename = "daypart-0")]
    pub daypart0: Daypart,
    #[serde(rename = "daypart-1")]
    pub daypart1: Daypart,
    #[serde(rename = "daypart-2")]
    pub daypart2: Daypart,
    #[serde(rename = "daypart-3")]
    pub daypart3: Daypart,
    #[serde(rename = "daypart-4")]
    pub daypart4: Daypart,
    pub feels: String,
    pub humidity: String,
    #[serde(rename = "Icon")]
    pub icon: String,
    pub phrase: String,
    pub sunrise: String,
    pub sunset: String,
    #[serde(rename = "temp")]
    pub temperature: String,
    pub wind: String,
}

impl Current {
    pub fn dayparts(&self) -> [&Daypart; 4] {
        [&self.daypart1, &self.daypart2, &self.daypart3, &self.daypart4]
    }

    /// Compass point of "NNE 5 mph".
    pub fn wind_direction(&self) -> &str {
        self.wind.split_whitespace().next().unwrap_or("")
    }
}

#[derive(Debug, Deserialize)]
struct WeatherReply {
    current: Current,
}

/// Snapshot the compositor draws from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeatherState {
    pub current: Current,
    pub temp_f: f64,
    pub temp_c: f64,
    /// percent sign stripped
    pub humidity: String,
    pub valid: bool,
}

impl WeatherState {
    pub fn from_current(mut current: Current) -> Result<Self, DecodeError> {
        current.temperature = current.temperature.replace(".0", "");
        let temps = scan_numbers(&current.temperature);
        let (Some(&temp_f), Some(&temp_c)) = (temps.first(), temps.get(1)) else {
            return Err(DecodeError::NotANumber(current.temperature.clone()));
        };
        let humidity = current.humidity.replace('%', "").trim().to_string();
        Ok(Self { current, temp_f, temp_c, humidity, valid: true })
    }
}

pub trait WeatherFetch: Send + Sync + 'static {
    fn fetch_current(&self) -> impl Future<Output = Result<Current, SourceError>> + Send;
}

/// HTTP client for the weather server's `current` document.
#[derive(Debug)]
pub struct WeatherClient {
    url: String,
    client: Client,
}

impl WeatherClient {
    pub fn new(url: &str) -> Result<Self, SourceError> {
        let mut headers = header::HeaderMap::new();
        headers.insert("Accept", header::HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(WEATHER_TIMEOUT)
            .build()?;
        Ok(Self { url: url.to_string(), client })
    }
}

impl WeatherFetch for WeatherClient {
    async fn fetch_current(&self) -> Result<Current, SourceError> {
        debug!("Fetching weather data from {}", self.url);
        let res = self.client.get(&self.url).send().await?;
        let status = res.status();
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }
        let text = res.text().await?;
        let reply: WeatherReply = serde_json::from_str(&text)?;
        Ok(reply.current)
    }
}

/// Icon slots fed by the weather source.
pub struct WeatherIcons {
    pub main: Arc<IconCache>,
    pub dayparts: [Arc<IconCache>; 4],
    pub wind_dir: Arc<IconCache>,
    pub brolly: Arc<IconCache>,
    pub humidity: Arc<IconCache>,
}

impl WeatherIcons {
    pub fn new(make: impl Fn(&'static str) -> Arc<IconCache>) -> Self {
        Self {
            main: make("weather"),
            dayparts: [make("daypart-1"), make("daypart-2"), make("daypart-3"), make("daypart-4")],
            wind_dir: make("wind-dir"),
            brolly: make("brolly"),
            humidity: make("humidity"),
        }
    }
}

/// Latest conditions and their icons, read by the compositor.
pub struct Weather {
    state: RwLock<WeatherState>,
    icons: WeatherIcons,
}

impl Weather {
    pub fn new(icons: WeatherIcons) -> Self {
        Self { state: RwLock::new(WeatherState::default()), icons }
    }

    pub fn snapshot(&self) -> WeatherState {
        guard::read(&self.state).clone()
    }

    pub fn icons(&self) -> &WeatherIcons {
        &self.icons
    }

    fn ensure_icons(&self, c: &Current) {
        let i = &self.icons;
        i.main.ensure(&c.icon, None, None);
        for (slot, dp) in i.dayparts.iter().zip(c.dayparts()) {
            slot.ensure(&dp.icon, Some(DAYPART_SCALE), None);
        }
        i.wind_dir.ensure(&format!("wind-{}", c.wind_direction()), None, None);
        i.brolly.ensure("brolly", None, None);
        i.humidity.ensure("humidity", None, None);
    }

    fn replace(&self, next: WeatherState) -> PollOutcome {
        let mut state = guard::write(&self.state);
        if *state == next {
            return PollOutcome::Unchanged;
        }
        info!("weather {} {}", next.current.temperature, next.current.phrase);
        *state = next;
        PollOutcome::Updated
    }
}

pub struct WeatherSource<F: WeatherFetch> {
    fetch: F,
    weather: Arc<Weather>,
    daylight: Arc<Daylight>,
}

impl<F: WeatherFetch> WeatherSource<F> {
    pub fn new(fetch: F, weather: Arc<Weather>, daylight: Arc<Daylight>) -> Self {
        Self { fetch, weather, daylight }
    }
}

impl<F: WeatherFetch> PeriodicSource for WeatherSource<F> {
    fn name(&self) -> &str {
        "weather"
    }

    async fn poll(&self) -> Result<PollOutcome, SourceError> {
        let current = self.fetch.fetch_current().await?;
        let next = WeatherState::from_current(current)?;

        if let Some(h) = Horizon::parse(&next.current.sunrise, &next.current.sunset) {
            self.daylight.set_horizon(h);
        }
        self.weather.ensure_icons(&next.current);
        Ok(self.weather.replace(next))
    }

    fn mark_unknown(&self) {
        guard::write(&self.weather.state).valid = false;
    }
}
