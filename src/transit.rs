/*
 *  transit.rs
 *
 *  RGBClock - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  MBTA arrival predictions inside the commute window
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
use chrono::{DateTime, Datelike, Local, NaiveDateTime, NaiveTime, Utc};
use log::{debug, info};
use reqwest::{header, Client};
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::bitmap::{font_by_name, Bitmap};
use crate::color::Rgba;
use crate::config::{parse_clock_time, TransitConfig};
use crate::guard;
use crate::icon_cache::IconCache;
use crate::icons::IconMap;
use crate::rasterizer::Rasterizer;
use crate::source::{PeriodicSource, PollOutcome, SourceError};

pub const TRANSIT_TIMEOUT: Duration = Duration::from_secs(10);
pub const CANVAS: (u32, u32) = (128, 18);

/// Weekdays and hours predictions are wanted.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveWindow {
    pub from: NaiveTime,
    pub until: NaiveTime,
    /// 0 = Sunday
    pub days: Vec<u32>,
}

impl ActiveWindow {
    pub fn from_config(cfg: &TransitConfig) -> Self {
        // both were checked when the config loaded
        Self {
            from: parse_clock_time(&cfg.from).unwrap_or(NaiveTime::MIN),
            until: parse_clock_time(&cfg.until).unwrap_or(NaiveTime::MIN),
            days: cfg.days.clone(),
        }
    }

    /// `[from, until)` on a listed day; equal bounds mean all day.
    pub fn contains(&self, now: NaiveDateTime) -> bool {
        if !self.days.contains(&now.weekday().num_days_from_sunday()) {
            return false;
        }
        let t = now.time();
        self.from == self.until || (t >= self.from && t < self.until)
    }
}

// JSON:API document, only what is drawn
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PredictionDoc {
    #[serde(default)]
    pub data: Vec<Resource<PredictionAttrs>>,
    #[serde(default)]
    pub included: Vec<Included>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Resource<A> {
    pub id: String,
    pub attributes: A,
    #[serde(default)]
    pub relationships: Relationships,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PredictionAttrs {
    pub arrival_time: Option<String>,
    pub departure_time: Option<String>,
    pub direction_id: usize,
    pub schedule_relationship: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Relationships {
    pub route: Option<Related>,
    pub stop: Option<Related>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Related {
    pub data: Option<ResourceId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceId {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Included {
    Route { id: String, attributes: RouteAttrs },
    Stop { id: String, attributes: StopAttrs },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RouteAttrs {
    pub color: String,
    pub description: String,
    pub direction_names: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StopAttrs {
    pub name: String,
    pub platform_name: Option<String>,
}

/// One line of the transit panel.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// "Rapid Transit", also the icon key
    pub route_type: String,
    pub stop_name: String,
    pub direction: String,
    pub route_id: String,
    pub color: String,
    pub arrival: DateTime<Utc>,
    pub countdown: String,
    /// further arrivals merged into this one
    pub stack: u32,
    pub canvas: Arc<Bitmap>,
}

impl Prediction {
    fn same_line(&self, other: &Prediction) -> bool {
        self.route_type == other.route_type && self.stop_name == other.stop_name && self.direction == other.direction
    }

    pub fn headline(&self) -> String {
        let others = if self.stack > 0 { format!(" +{}", self.stack) } else { String::new() };
        format!("{} {} {}{}", self.route_id, self.direction, self.countdown, others)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredictionSet {
    pub display: bool,
    pub predictions: Vec<Prediction>,
}

/// "at stop", "1 min", "N mins"
pub fn countdown(now: DateTime<Utc>, at: DateTime<Utc>) -> String {
    match (at - now).num_minutes() {
        m if m < 1 => "at stop".into(),
        1 => "1 min".into(),
        m => format!("{m} mins"),
    }
}

fn route_label(route: &str, description: &str) -> String {
    if description == "Rapid Transit" {
        format!("{route} Line")
    } else {
        route.to_string()
    }
}

/// Arrivals in `(now, now + offset)`, merged per route type, stop and direction.
pub fn merge_predictions(doc: &PredictionDoc, now: DateTime<Utc>, offset: chrono::Duration) -> Vec<Prediction> {
    let mut routes = HashMap::new();
    let mut stops = HashMap::new();
    for inc in &doc.included {
        match inc {
            Included::Route { id, attributes } => {
                routes.insert(id.as_str(), attributes);
            }
            Included::Stop { id, attributes } => {
                stops.insert(id.as_str(), attributes);
            }
            Included::Other => {}
        }
    }

    let horizon = now + offset;
    let mut out: Vec<Prediction> = Vec::new();
    for p in &doc.data {
        let a = &p.attributes;
        if a.schedule_relationship.as_deref().is_some_and(|s| s.eq_ignore_ascii_case("skipped")) {
            continue;
        }
        let Some(when) = a.arrival_time.as_ref().or(a.departure_time.as_ref()) else {
            continue;
        };
        let arrival = match DateTime::parse_from_rfc3339(when) {
            Ok(t) => t.with_timezone(&Utc),
            Err(e) => {
                debug!("prediction {} time {:?}: {}", p.id, when, e);
                continue;
            }
        };
        if arrival <= now || arrival >= horizon {
            continue;
        }
        let rel = |r: &Option<Related>| r.as_ref().and_then(|r| r.data.as_ref()).map(|d| d.id.clone());
        let route_id = rel(&p.relationships.route).unwrap_or_default();
        let stop_id = rel(&p.relationships.stop).unwrap_or_default();
        let route = routes.get(route_id.as_str()).copied().cloned().unwrap_or_default();
        let stop = stops.get(stop_id.as_str()).copied().cloned().unwrap_or_default();

        let mut stop_name = stop.name;
        if let Some(platform) = stop.platform_name {
            stop_name = format!("{stop_name}.{platform}");
        }
        let next = Prediction {
            route_id: route_label(&route_id, &route.description),
            route_type: route.description,
            stop_name,
            direction: route.direction_names.get(a.direction_id).cloned().unwrap_or_default(),
            color: format!("#{}", route.color),
            arrival,
            countdown: countdown(now, arrival),
            stack: 0,
            canvas: Arc::new(Bitmap::default()),
        };
        match out.iter_mut().find(|o| o.same_line(&next)) {
            Some(o) => o.stack += 1,
            None => out.push(next),
        }
    }
    out
}

pub trait TransitFetch: Send + Sync + 'static {
    fn predictions(&self) -> impl Future<Output = Result<PredictionDoc, SourceError>> + Send;
}

/// MBTA v3 predictions endpoint.
pub struct TransitClient {
    url: String,
    route: String,
    stop: String,
    client: Client,
}

impl TransitClient {
    pub fn new(cfg: &TransitConfig) -> Result<Self, SourceError> {
        let mut headers = header::HeaderMap::new();
        headers.insert("Accept", header::HeaderValue::from_static("application/vnd.api+json"));
        if let Ok(key) = std::env::var(&cfg.api_env) {
            if let Ok(v) = header::HeaderValue::from_str(&key) {
                headers.insert("x-api-key", v);
            }
        }
        let client = Client::builder()
            .default_headers(headers)
            .timeout(TRANSIT_TIMEOUT)
            .build()?;
        Ok(Self {
            url: cfg.url.clone(),
            route: clean_list(&cfg.route),
            stop: clean_list(&cfg.stop),
            client,
        })
    }
}

fn clean_list(s: &str) -> String {
    s.split(',').map(str::trim).filter(|v| !v.is_empty()).collect::<Vec<_>>().join(",")
}

impl TransitFetch for TransitClient {
    async fn predictions(&self) -> Result<PredictionDoc, SourceError> {
        let res = self
            .client
            .get(&self.url)
            .query(&[
                ("filter[route]", self.route.as_str()),
                ("filter[stop]", self.stop.as_str()),
                ("include", "stop,route"),
                ("sort", "arrival_time"),
            ])
            .send()
            .await?;
        let status = res.status();
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }
        Ok(serde_json::from_str(&res.text().await?)?)
    }
}

/// Predictions the compositor draws, one canvas per line.
pub struct Transit {
    set: RwLock<PredictionSet>,
    map: Arc<IconMap>,
    rasterizer: Arc<dyn Rasterizer>,
    icons: Mutex<HashMap<String, Arc<IconCache>>>,
}

impl Transit {
    pub fn new(map: Arc<IconMap>, rasterizer: Arc<dyn Rasterizer>) -> Self {
        Self {
            set: RwLock::new(PredictionSet::default()),
            map,
            rasterizer,
            icons: Mutex::new(HashMap::new()),
        }
    }

    pub fn snapshot(&self) -> PredictionSet {
        guard::read(&self.set).clone()
    }

    pub fn is_displayed(&self) -> bool {
        let set = guard::read(&self.set);
        set.display && !set.predictions.is_empty()
    }

    fn icon(&self, route_type: &str) -> Arc<IconCache> {
        guard::lock(&self.icons)
            .entry(route_type.to_string())
            .or_insert_with(|| Arc::new(IconCache::new("transit", self.map.clone(), self.rasterizer.clone())))
            .clone()
    }

    /// Mode icon, headline in the route colour, stop name below.
    fn render(&self, p: &Prediction) -> Bitmap {
        let (w, h) = CANVAS;
        let mut canvas = Bitmap::new(w, h);
        let icon = self.icon(&p.route_type).ensure(&p.route_type, None, None);
        canvas.draw_over(&icon.resize(h, h), 0, 0);
        let font = font_by_name("5x8");
        canvas.text(&p.headline(), font, Rgba::from_hex_or_white(&p.color), h as i32 + 1, 1);
        canvas.text(&p.stop_name, font, Rgba::WHITE, h as i32 + 1, 9);
        canvas
    }

    fn replace(&self, next: PredictionSet) -> PollOutcome {
        let mut set = guard::write(&self.set);
        if *set == next {
            return PollOutcome::Unchanged;
        }
        if set.display != next.display {
            info!("transit display {}", if next.display { "on" } else { "off" });
        }
        *set = next;
        PollOutcome::Updated
    }
}

pub struct TransitSource<F: TransitFetch> {
    fetch: F,
    transit: Arc<Transit>,
    window: ActiveWindow,
    offset: chrono::Duration,
}

impl<F: TransitFetch> TransitSource<F> {
    pub fn new(fetch: F, transit: Arc<Transit>, window: ActiveWindow, offset_minutes: i64) -> Self {
        Self { fetch, transit, window, offset: chrono::Duration::minutes(offset_minutes) }
    }
}

impl<F: TransitFetch> PeriodicSource for TransitSource<F> {
    fn name(&self) -> &str {
        "transit"
    }

    async fn poll(&self) -> Result<PollOutcome, SourceError> {
        if !self.window.contains(Local::now().naive_local()) {
            return Ok(self.transit.replace(PredictionSet::default()));
        }
        let doc = self.fetch.predictions().await?;
        let mut predictions = merge_predictions(&doc, Utc::now(), self.offset);
        for p in &mut predictions {
            p.canvas = Arc::new(self.transit.render(p));
        }
        Ok(self.transit.replace(PredictionSet { display: true, predictions }))
    }

    fn mark_unknown(&self) {
        guard::write(&self.transit.set).display = false;
    }
}
