/*
 *  state.rs
 *
 *  RGBClock - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  Shared application state, its sources and their lifetimes
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

use chrono::{DateTime, Datelike, Local};
use log::{info, warn};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::artcache::{ArtCache, CacheError};
use crate::config::Config;
use crate::cpustat::{CpuSource, CpuStats, ProcPaths, CPU_PERIOD};
use crate::daylight::{Daylight, DaylightSource};
use crate::icon_cache::IconCache;
use crate::icons::IconMap;
use crate::meter::{spawn_meter, VuMeter};
use crate::moon::{moon_key, MoonSource};
use crate::news::{FeedClient, News, NewsSource};
use crate::player::{LmsClient, Player, PlayerSource};
use crate::rasterizer::Rasterizer;
use crate::source::{spawn_source, PeriodicSource, PollOutcome, SourceError, SourceHandle};
use crate::transit::{ActiveWindow, Transit, TransitClient, TransitSource};
use crate::weather::{Weather, WeatherClient, WeatherIcons, WeatherSource};

pub const MODE_PERIOD: Duration = Duration::from_secs(15);
pub const DATE_PERIOD: Duration = Duration::from_secs(3);
pub const DAYLIGHT_PERIOD: Duration = Duration::from_secs(60);
/// news gating runs finer than its feed poll
pub const NEWS_PERIOD: Duration = Duration::from_secs(10);

/// Alternating panel mode and the rotating date part.
#[derive(Debug, Default)]
pub struct Toggles {
    mode: AtomicBool,
    date: AtomicUsize,
}

impl Toggles {
    pub fn mode(&self) -> bool {
        self.mode.load(Ordering::Relaxed)
    }

    pub fn date_index(&self) -> usize {
        self.date.load(Ordering::Relaxed)
    }

    /// Weekday, month, day, year in turn.
    pub fn date_text(&self, now: &DateTime<Local>) -> String {
        match self.date_index() % 4 {
            0 => now.format("%a").to_string(),
            1 => now.format("%b").to_string(),
            2 => now.day().to_string(),
            _ => now.year().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleKind {
    Mode,
    Date,
}

pub struct ToggleSource {
    toggles: Arc<Toggles>,
    kind: ToggleKind,
}

impl ToggleSource {
    pub fn new(toggles: Arc<Toggles>, kind: ToggleKind) -> Self {
        Self { toggles, kind }
    }
}

impl PeriodicSource for ToggleSource {
    fn name(&self) -> &str {
        match self.kind {
            ToggleKind::Mode => "mode",
            ToggleKind::Date => "date",
        }
    }

    async fn poll(&self) -> Result<PollOutcome, SourceError> {
        match self.kind {
            ToggleKind::Mode => {
                self.toggles.mode.fetch_xor(true, Ordering::Relaxed);
            }
            ToggleKind::Date => {
                let _ = self.toggles.date.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |i| Some((i + 1) % 4));
            }
        }
        Ok(PollOutcome::Updated)
    }

    fn mark_unknown(&self) {}
}

/// Clock face decorations. Rendered when the state is built; the moon is
/// kept on its phase by [`MoonSource`].
pub struct Decor {
    pub corner: IconCache,
    pub alt_corner: IconCache,
    pub global: IconCache,
    pub moon: Arc<IconCache>,
}

impl Decor {
    fn new(cache: impl Fn(&'static str) -> IconCache, now: &DateTime<Local>) -> Self {
        let decor = Self {
            corner: cache("corner"),
            alt_corner: cache("alt-corner"),
            global: cache("global"),
            moon: Arc::new(cache("moon")),
        };
        decor.corner.ensure("corner-scroll", None, None);
        decor.alt_corner.ensure("alt-corner-scroll", None, None);
        decor.global.ensure("global", None, None);
        decor.moon.ensure(&moon_key(now), None, None);
        decor
    }
}

/// Everything the compositor reads, built once in `main`.
pub struct AppState {
    pub config: Config,
    pub map: Arc<IconMap>,
    pub rasterizer: Arc<dyn Rasterizer>,
    pub daylight: Arc<Daylight>,
    pub weather: Arc<Weather>,
    pub player: Option<Arc<Player>>,
    pub meter: Option<Arc<VuMeter>>,
    pub transit: Option<Arc<Transit>>,
    pub news: Option<Arc<News>>,
    pub cpu: Option<Arc<CpuStats>>,
    pub toggles: Arc<Toggles>,
    pub decor: Decor,
}

impl AppState {
    pub fn new(config: Config, rasterizer: Arc<dyn Rasterizer>) -> Result<Self, CacheError> {
        let map = Arc::new(IconMap::new(&config.icons));
        let cache = |name: &'static str| IconCache::new(name, map.clone(), rasterizer.clone());

        let (day, night) = config.display.brightness();
        let weather = Arc::new(Weather::new(WeatherIcons::new(|name| Arc::new(cache(name)))));

        let player = match &config.lms {
            Some(lms) => {
                let art = Arc::new(ArtCache::with_limits(
                    &lms.cache_dir,
                    Duration::from_secs(lms.art_ttl_secs),
                    lms.art_capacity,
                    lms.art_max_bytes,
                )?);
                match art.cleanup() {
                    Ok(0) => {}
                    Ok(n) => info!("art cache cleanup removed {n} files"),
                    Err(e) => warn!("art cache cleanup failed: {e}"),
                }
                Some(Arc::new(Player::new(map.clone(), rasterizer.clone(), config.display.scroll_limit, Some(art))))
            }
            None => None,
        };
        let meter = config
            .lms
            .as_ref()
            .filter(|l| l.meter.active)
            .map(|_| Arc::new(VuMeter::default()));
        let transit = config
            .transit
            .as_ref()
            .map(|_| Arc::new(Transit::new(map.clone(), rasterizer.clone())));
        let panel_width = crate::compositor::Geometry::from_config(&config.display).panel.2;
        let news = config.news.as_ref().map(|n| Arc::new(News::new(n, panel_width)));
        let cpu = config
            .display
            .instrument
            .then(|| Arc::new(CpuStats::new(map.clone(), rasterizer.clone())));

        let decor = Decor::new(cache, &Local::now());

        Ok(Self {
            daylight: Arc::new(Daylight::new(day, night)),
            weather,
            player,
            meter,
            transit,
            news,
            cpu,
            toggles: Arc::new(Toggles::default()),
            decor,
            map,
            rasterizer,
            config,
        })
    }

    /// Start every configured source under `token`.
    pub fn spawn(&self, token: &CancellationToken) -> Result<Running, SourceError> {
        let cfg = &self.config;
        let mut sources = Vec::new();

        let weather = WeatherSource::new(WeatherClient::new(&cfg.weather.url)?, self.weather.clone(), self.daylight.clone());
        sources.push(spawn_source(Arc::new(weather), Duration::from_secs(cfg.weather.interval_secs), token.child_token()));

        let daylight = DaylightSource::new(
            self.daylight.clone(),
            cfg.location.as_ref().map(|l| (l.lat, l.lng)),
            vec![self.weather.icons().main.clone()],
        );
        sources.push(spawn_source(Arc::new(daylight), DAYLIGHT_PERIOD, token.child_token()));

        let moon = MoonSource::new(self.decor.moon.clone());
        sources.push(spawn_source(Arc::new(moon), DAYLIGHT_PERIOD, token.child_token()));

        let mut meter = None;
        if let (Some(lms), Some(player)) = (&cfg.lms, &self.player) {
            let client = LmsClient::new(&lms.host, lms.port, &lms.player)?;
            let src = PlayerSource::new(client, player.clone());
            sources.push(spawn_source(Arc::new(src), Duration::from_millis(lms.interval_ms), token.child_token()));
            player.labels().start();
            if let Some(vu) = &self.meter {
                let m = &lms.meter;
                let host = if m.host.is_empty() { &lms.host } else { &m.host };
                let url = format!("http://{}:{}/{}", host, m.port, m.endpoint.trim_start_matches('/'));
                meter = Some(spawn_meter(url, vu.clone(), token.child_token())?);
            }
        }

        if let (Some(tc), Some(transit)) = (&cfg.transit, &self.transit) {
            let src = TransitSource::new(TransitClient::new(tc)?, transit.clone(), ActiveWindow::from_config(tc), tc.offset);
            sources.push(spawn_source(Arc::new(src), Duration::from_secs(tc.interval_secs), token.child_token()));
        }

        if let (Some(nc), Some(news)) = (&cfg.news, &self.news) {
            let src = NewsSource::new(FeedClient::new()?, news.clone(), nc);
            sources.push(spawn_source(Arc::new(src), NEWS_PERIOD, token.child_token()));
        }

        if let Some(cpu) = &self.cpu {
            let src = CpuSource::new(cpu.clone(), ProcPaths::default());
            sources.push(spawn_source(Arc::new(src), CPU_PERIOD, token.child_token()));
        }

        for (kind, every) in [(ToggleKind::Mode, MODE_PERIOD), (ToggleKind::Date, DATE_PERIOD)] {
            let src = ToggleSource::new(self.toggles.clone(), kind);
            sources.push(spawn_source(Arc::new(src), every, token.child_token()));
        }

        info!("{} sources running", sources.len());
        Ok(Running { sources, meter, player: self.player.clone(), news: self.news.clone() })
    }
}

/// Handles of the running sources.
pub struct Running {
    sources: Vec<SourceHandle>,
    meter: Option<JoinHandle<()>>,
    player: Option<Arc<Player>>,
    news: Option<Arc<News>>,
}

impl Running {
    pub fn handles(&self) -> &[SourceHandle] {
        &self.sources
    }

    /// Stop everything; in-flight polls finish first.
    pub async fn stop(self) {
        if let Some(p) = &self.player {
            p.labels().stop();
        }
        if let Some(n) = &self.news {
            n.stop_ticker();
        }
        for s in self.sources {
            s.stop().await;
        }
        if let Some(m) = self.meter {
            if let Err(e) = m.await {
                warn!("meter task failed to join: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::icon_cache::testing::CountingRasterizer;
    use chrono::TimeZone;

    #[tokio::test]
    async fn toggles_flip_and_rotate() {
        let t = Arc::new(Toggles::default());
        let mode = ToggleSource::new(t.clone(), ToggleKind::Mode);
        let date = ToggleSource::new(t.clone(), ToggleKind::Date);
        assert!(!t.mode());
        mode.poll().await.unwrap();
        assert!(t.mode());
        mode.poll().await.unwrap();
        assert!(!t.mode());

        let now = Local.with_ymd_and_hms(2024, 3, 4, 7, 0, 0).single().unwrap();
        let mut parts = Vec::new();
        for _ in 0..5 {
            parts.push(t.date_text(&now));
            date.poll().await.unwrap();
        }
        assert_eq!(parts, ["Mon", "Mar", "4", "2024", "Mon"]);
    }

    #[test]
    fn optional_panels_follow_the_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config::default();
        let state = AppState::new(cfg.clone(), Arc::new(CountingRasterizer::default())).unwrap();
        assert!(state.player.is_none() && state.transit.is_none() && state.news.is_none());
        assert!(state.cpu.is_none() && state.meter.is_none());

        let mut lms = crate::config::LmsConfig::default();
        lms.cache_dir = dir.path().join("art");
        cfg.lms = Some(lms);
        cfg.transit = Some(Default::default());
        cfg.display.instrument = true;
        let state = AppState::new(cfg, Arc::new(CountingRasterizer::default())).unwrap();
        assert!(state.player.is_some() && state.transit.is_some() && state.cpu.is_some());
        assert!(state.meter.is_none());
        assert!(dir.path().join("art").is_dir());
    }

    #[test]
    fn decorations_are_ready_before_the_first_frame() {
        let r = Arc::new(CountingRasterizer::default());
        let state = AppState::new(Config::default(), r.clone()).unwrap();
        let d = &state.decor;
        assert_eq!(d.corner.key(), "corner-scroll");
        assert_eq!(d.alt_corner.key(), "alt-corner-scroll");
        assert_eq!(d.global.key(), "global");
        assert!(d.moon.key().starts_with("moon-"));
        assert!(!d.global.image().is_empty());
        assert_eq!(r.calls(), 4);
    }
}
