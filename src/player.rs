/*
 *  player.rs
 *
 *  RGBClock - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  LMS now playing: status, scrolling labels, glyphs and cover art
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
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::artcache::ArtCache;
use crate::bitmap::{font_by_name, measure, Bitmap};
use crate::color::Rgba;
use crate::deutils::{
    deserialize_bool_from_anything,
    deserialize_numeric_i32,
    deserialize_numeric_u8,
    deserialize_string_from_anything,
    seconds_to_hms,
    NumberOrText,
};
use crate::guard;
use crate::icon_cache::IconCache;
use crate::icons::IconMap;
use crate::marquee::ScrollingLabel;
use crate::rasterizer::Rasterizer;
use crate::rpc::SlimClient;
use crate::source::{PeriodicSource, PollOutcome, SourceError};

pub const STATUS_TAGS: &str = "cgABbehldiqtyrSuoKLNJITC";
pub const COVER_SIZE: u32 = 64;
const VARIOUS_ARTISTS: &str = "Various Artists";
const VOLUME_GLYPH: (u32, u32) = (24, 16);
const MODIFIER_GLYPH: (u32, u32) = (28, 16);
const GLYPH_ICON: u32 = 13;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct Track {
    album: String,
    albumartist: String,
    artist: String,
    trackartist: String,
    composer: String,
    conductor: String,
    #[serde(deserialize_with = "deserialize_string_from_anything")]
    compilation: String,
    #[serde(deserialize_with = "deserialize_string_from_anything")]
    coverid: String,
    genre: String,
    #[serde(deserialize_with = "deserialize_string_from_anything")]
    samplesize: String,
    #[serde(deserialize_with = "deserialize_string_from_anything")]
    samplerate: String,
    title: String,
    #[serde(deserialize_with = "deserialize_string_from_anything")]
    year: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RemoteMeta {
    artist: String,
    title: String,
    remote_title: String,
    genre: String,
    #[serde(deserialize_with = "deserialize_string_from_anything")]
    coverid: String,
    #[serde(deserialize_with = "deserialize_string_from_anything")]
    year: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct PlayerStatus {
    mode: String,
    #[serde(rename = "mixer volume", deserialize_with = "deserialize_numeric_i32")]
    mixer_volume: i32,
    time: Option<NumberOrText>,
    duration: Option<NumberOrText>,
    #[serde(rename = "playlist repeat", deserialize_with = "deserialize_numeric_u8")]
    playlist_repeat: u8,
    #[serde(rename = "playlist shuffle", deserialize_with = "deserialize_numeric_u8")]
    playlist_shuffle: u8,
    #[serde(deserialize_with = "deserialize_bool_from_anything")]
    remote: bool,
    #[serde(rename = "remoteMeta")]
    remote_meta: Option<RemoteMeta>,
    playlist_loop: Vec<Track>,
}

/// Now playing snapshot; the label texts live in [`PlayerLabels`].
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerState {
    pub mode: String,
    pub volume: i32,
    pub repeat: u8,
    pub shuffle: u8,
    pub time: f64,
    pub duration: f64,
    pub percent: f64,
    pub time_str: String,
    pub duration_str: String,
    pub remaining_str: String,
    pub remote: bool,
    /// "16b • 44.1kHz"
    pub bitty: String,
    pub year: String,
    pub genre: String,
    pub coverid: String,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            mode: "stop".into(),
            volume: 0,
            repeat: 0,
            shuffle: 0,
            time: 0.0,
            duration: 0.0,
            percent: 0.0,
            time_str: "00:00".into(),
            duration_str: "00:00".into(),
            remaining_str: "00:00".into(),
            remote: false,
            bitty: "CD".into(),
            year: "????".into(),
            genre: String::new(),
            coverid: String::new(),
        }
    }
}

impl PlayerState {
    pub fn is_playing(&self) -> bool {
        self.mode == "play"
    }

    fn set_times(&mut self, time: f64, duration: f64) {
        self.time = time;
        self.time_str = seconds_to_hms(time);
        self.duration = duration;
        self.duration_str = seconds_to_hms(duration);
        if duration > 0.0 {
            self.percent = 100.0 * time / duration;
            self.remaining_str = format!("-{}", seconds_to_hms(duration - time));
        } else {
            self.percent = 0.0;
            self.remaining_str = "00:00".into();
        }
    }
}

/// "{size}b • {rate}kHz", DSD when the sample size is one bit.
pub fn bitty(samplesize: &str, samplerate: &str) -> String {
    let size = samplesize.trim().parse::<f64>().unwrap_or(16.0);
    let rate = samplerate.trim().parse::<f64>().map(|r| r / 1000.0).unwrap_or(44.1);
    if size == 1.0 {
        format!("• DSD{} •", (rate / 44.1).floor())
    } else {
        format!("{size}b • {rate}kHz")
    }
}

/// 1..=20 -> 0, 81..=100 -> 4
pub fn volume_level(volume: i32) -> u32 {
    ((volume as f64 / 20.0).ceil() as i32 - 1).clamp(0, 4) as u32
}

/// The six marquee labels of the now playing panel.
pub struct PlayerLabels {
    pub artist: ScrollingLabel,
    pub album: ScrollingLabel,
    pub title: ScrollingLabel,
    pub albumartist: ScrollingLabel,
    pub composer: ScrollingLabel,
    pub conductor: ScrollingLabel,
}

impl PlayerLabels {
    pub fn new(max_visible: usize) -> Self {
        let fast = Duration::from_millis(120);
        let slow = Duration::from_millis(180);
        Self {
            artist: ScrollingLabel::new("artist", true, max_visible, 1, slow),
            album: ScrollingLabel::new("album", true, max_visible, 2, fast),
            title: ScrollingLabel::new("title", true, max_visible, 1, slow),
            albumartist: ScrollingLabel::new("albumartist", true, max_visible, 2, fast),
            composer: ScrollingLabel::new("composer", true, max_visible, 1, slow),
            conductor: ScrollingLabel::new("conductor", true, max_visible, 1, fast),
        }
    }

    pub fn all(&self) -> [&ScrollingLabel; 6] {
        [&self.artist, &self.album, &self.title, &self.albumartist, &self.composer, &self.conductor]
    }

    pub fn start(&self) {
        self.all().iter().for_each(|l| l.start());
    }

    pub fn stop(&self) {
        self.all().iter().for_each(|l| l.stop());
    }

    pub fn set_max_visible(&self, n: usize) {
        self.all().iter().for_each(|l| l.set_max_visible(n));
    }

    /// album, artist, title: a change means new cover art
    fn track_key(&self) -> (String, String, String) {
        (self.album.text(), self.artist.text(), self.title.text())
    }
}

/// Everything the compositor reads for the now playing panel.
pub struct Player {
    state: RwLock<PlayerState>,
    labels: PlayerLabels,
    volume_icon: IconCache,
    repeat_icon: IconCache,
    shuffle_icon: IconCache,
    volume: RwLock<Arc<Bitmap>>,
    modifiers: RwLock<Arc<Bitmap>>,
    cover: RwLock<Arc<Bitmap>>,
    drawn: Mutex<(Option<i32>, Option<(u8, u8)>)>,
    art: Option<Arc<ArtCache>>,
}

impl Player {
    pub fn new(
        map: Arc<IconMap>,
        rasterizer: Arc<dyn Rasterizer>,
        max_visible: usize,
        art: Option<Arc<ArtCache>>,
    ) -> Self {
        Self {
            state: RwLock::new(PlayerState::default()),
            labels: PlayerLabels::new(max_visible),
            volume_icon: IconCache::new("volume", map.clone(), rasterizer.clone()),
            repeat_icon: IconCache::new("repeat", map.clone(), rasterizer.clone()),
            shuffle_icon: IconCache::new("shuffle", map, rasterizer),
            volume: RwLock::new(Arc::new(Bitmap::new(VOLUME_GLYPH.0, VOLUME_GLYPH.1))),
            modifiers: RwLock::new(Arc::new(Bitmap::new(MODIFIER_GLYPH.0, MODIFIER_GLYPH.1))),
            cover: RwLock::new(Arc::new(Bitmap::default())),
            drawn: Mutex::new((None, None)),
            art,
        }
    }

    pub fn snapshot(&self) -> PlayerState {
        guard::read(&self.state).clone()
    }

    pub fn labels(&self) -> &PlayerLabels {
        &self.labels
    }

    pub fn volume_glyph(&self) -> Arc<Bitmap> {
        guard::read(&self.volume).clone()
    }

    pub fn modifiers_glyph(&self) -> Arc<Bitmap> {
        guard::read(&self.modifiers).clone()
    }

    pub fn cover(&self) -> Arc<Bitmap> {
        guard::read(&self.cover).clone()
    }

    fn set_cover(&self, image: Bitmap) {
        let image = if image.dimensions() == (COVER_SIZE, COVER_SIZE) {
            image
        } else {
            image.resize(COVER_SIZE, COVER_SIZE)
        };
        *guard::write(&self.cover) = Arc::new(image);
    }

    fn glyph_icon(cache: &IconCache, key: &str, color: Option<&str>) -> Bitmap {
        cache.ensure(key, None, color).resize(GLYPH_ICON, GLYPH_ICON)
    }

    /// Icon at the right, the level right-justified before it.
    fn draw_volume(&self, volume: i32) {
        let icon = if volume <= 0 {
            Self::glyph_icon(&self.volume_icon, "volume-mute", Some("red"))
        } else {
            Self::glyph_icon(&self.volume_icon, &format!("volume-{}", volume_level(volume)), None)
        };
        let (w, h) = VOLUME_GLYPH;
        let mut canvas = Bitmap::new(w, h);
        let x = (w - GLYPH_ICON - 1) as i32;
        canvas.draw_over(&icon, x, 1);
        let font = font_by_name("4x6");
        let t = volume.max(0).to_string();
        canvas.text(&t, font, Rgba::WHITE, x - 1 - measure(&t, font) as i32, 5);
        *guard::write(&self.volume) = Arc::new(canvas);
    }

    fn draw_modifiers(&self, repeat: u8, shuffle: u8) {
        let (w, h) = MODIFIER_GLYPH;
        let mut canvas = Bitmap::new(w, h);
        let mut x = 2;
        if repeat != 0 {
            canvas.draw_over(&Self::glyph_icon(&self.repeat_icon, &format!("repeat-{repeat}"), None), x, 1);
        }
        x += GLYPH_ICON as i32 + 2;
        if shuffle != 0 {
            canvas.draw_over(&Self::glyph_icon(&self.shuffle_icon, &format!("shuffle-{shuffle}"), None), x, 1);
        }
        *guard::write(&self.modifiers) = Arc::new(canvas);
    }

    /// Redraw the glyphs whose inputs changed since they were last drawn.
    fn refresh_glyphs(&self, s: &PlayerState) {
        let mut drawn = guard::lock(&self.drawn);
        if drawn.0 != Some(s.volume) {
            self.draw_volume(s.volume);
            drawn.0 = Some(s.volume);
        }
        if drawn.1 != Some((s.repeat, s.shuffle)) {
            self.draw_modifiers(s.repeat, s.shuffle);
            drawn.1 = Some((s.repeat, s.shuffle));
        }
    }

    /// Push the track metadata into the labels and the snapshot.
    fn apply(&self, status: &PlayerStatus, next: &mut PlayerState) -> Result<(), SourceError> {
        let time = status.time.as_ref().map(NumberOrText::seconds).transpose()?.unwrap_or(0.0);
        let duration = status.duration.as_ref().map(NumberOrText::seconds).transpose()?.unwrap_or(0.0);
        next.set_times(time, duration);
        next.volume = status.mixer_volume;
        next.repeat = status.playlist_repeat;
        next.shuffle = status.playlist_shuffle;
        next.remote = status.remote;

        let l = &self.labels;
        if status.remote {
            let m = status.remote_meta.clone().unwrap_or_default();
            l.artist.set_text(&m.artist);
            l.albumartist.set_text(&m.artist);
            l.title.set_text(if m.remote_title.is_empty() { &m.title } else { &m.remote_title });
            l.composer.set_text("");
            l.conductor.set_text("");
            next.year = m.year;
            next.genre = m.genre;
            next.coverid = m.coverid;
        } else {
            let Some(t) = status.playlist_loop.first() else {
                return Err(SourceError::Invariant("playing with an empty playlist_loop".into()));
            };
            let artist: &str = if t.artist.is_empty() { &t.trackartist } else { &t.artist };
            l.artist.set_text(artist);
            l.album.set_text(&t.album);
            l.title.set_text(&t.title);
            l.composer.set_text(&t.composer);
            l.conductor.set_text(&t.conductor);
            let albumartist = if t.compilation == "1" { VARIOUS_ARTISTS } else { t.albumartist.as_str() };
            l.albumartist.set_text(if albumartist.is_empty() { artist } else { albumartist });
            next.bitty = bitty(&t.samplesize, &t.samplerate);
            next.year = t.year.clone();
            next.genre = t.genre.clone();
            next.coverid = t.coverid.clone();
        }
        if next.year.is_empty() || next.year == "0" {
            next.year = "????".into();
        }
        Ok(())
    }

    fn replace(&self, next: PlayerState) -> PollOutcome {
        let mut state = guard::write(&self.state);
        if *state == next {
            return PollOutcome::Unchanged;
        }
        if state.mode != next.mode {
            info!("player mode {} -> {}", state.mode, next.mode);
        }
        *state = next;
        PollOutcome::Updated
    }
}

/// The LMS calls the player source needs.
pub trait PlayerFetch: Send + Sync + 'static {
    fn status(&self) -> impl Future<Output = Result<Value, SourceError>> + Send;
    /// PNG bytes of the cover for `coverid`.
    fn cover(&self, coverid: &str) -> impl Future<Output = Result<Vec<u8>, SourceError>> + Send;
}

/// JSON-RPC status plus the artwork endpoints for one player.
pub struct LmsClient {
    rpc: SlimClient,
    player: String,
}

impl LmsClient {
    pub fn new(host: &str, port: u16, player: &str) -> Result<Self, SourceError> {
        Ok(Self { rpc: SlimClient::new(host, port)?, player: player.to_string() })
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, SourceError> {
        debug!("cover art {url}");
        let res = self.rpc.http().get(url).send().await?.error_for_status()?;
        Ok(res.bytes().await?.to_vec())
    }
}

impl PlayerFetch for LmsClient {
    async fn status(&self) -> Result<Value, SourceError> {
        Ok(self.rpc.status(&self.player, STATUS_TAGS).await?)
    }

    async fn cover(&self, coverid: &str) -> Result<Vec<u8>, SourceError> {
        let base = self.rpc.base_url();
        let by_id = format!("{base}/music/{coverid}/cover_{COVER_SIZE}x{COVER_SIZE}_o.png");
        match self.get_bytes(&by_id).await {
            Ok(b) => Ok(b),
            Err(e) => {
                debug!("cover {coverid} by id failed: {e}");
                self.get_bytes(&format!("{base}/music/current/cover.png?player={}", self.player))
                    .await
            }
        }
    }
}

pub struct PlayerSource<F: PlayerFetch> {
    fetch: F,
    player: Arc<Player>,
}

impl<F: PlayerFetch> PlayerSource<F> {
    pub fn new(fetch: F, player: Arc<Player>) -> Self {
        Self { fetch, player }
    }

    /// Disk cache first, then the server.
    async fn refresh_cover(&self, coverid: &str) {
        let art = self.player.art.as_ref().filter(|_| !coverid.is_empty());
        if let Some(img) = art.and_then(|a| a.get_image(coverid)) {
            debug!("cover {coverid} from cache");
            self.player.set_cover(img);
            return;
        }
        let fetched = self.fetch.cover(coverid).await.and_then(|bytes| {
            Bitmap::decode_png(&bytes).map_err(|e| SourceError::Decode(e.to_string()))
        });
        match fetched {
            Ok(img) => {
                if let Some(a) = art {
                    if let Err(e) = a.set_image(coverid, &img) {
                        warn!("cover {coverid} not cached: {e}");
                    }
                }
                self.player.set_cover(img);
            }
            Err(e) => warn!("cover {coverid} unavailable: {e}"),
        }
    }
}

impl<F: PlayerFetch> PeriodicSource for PlayerSource<F> {
    fn name(&self) -> &str {
        "player"
    }

    async fn poll(&self) -> Result<PollOutcome, SourceError> {
        let value = self.fetch.status().await?;
        let status: PlayerStatus = serde_json::from_value(value)?;

        let mut next = self.player.snapshot();
        next.mode = status.mode.clone();
        if next.is_playing() {
            let before = self.player.labels.track_key();
            self.player.apply(&status, &mut next)?;
            self.player.refresh_glyphs(&next);
            if before != self.player.labels.track_key() {
                self.refresh_cover(&next.coverid).await;
            }
        }
        Ok(self.player.replace(next))
    }

    fn mark_unknown(&self) {
        guard::write(&self.player.state).mode = "unknown".into();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted status replies, every cover a solid square.
    pub struct FakeLms {
        pub statuses: Mutex<VecDeque<Result<Value, SourceError>>>,
        pub covers: AtomicUsize,
        pub cover_color: Rgba,
    }

    impl FakeLms {
        pub fn new(statuses: Vec<Result<Value, SourceError>>) -> Self {
            Self::with_cover(statuses, Rgba::RED)
        }

        pub fn with_cover(statuses: Vec<Result<Value, SourceError>>, cover_color: Rgba) -> Self {
            Self { statuses: Mutex::new(statuses.into()), covers: AtomicUsize::new(0), cover_color }
        }
    }

    impl PlayerFetch for FakeLms {
        async fn status(&self) -> Result<Value, SourceError> {
            self.statuses.lock().unwrap().pop_front().unwrap_or(Err(SourceError::Timeout))
        }

        async fn cover(&self, _coverid: &str) -> Result<Vec<u8>, SourceError> {
            self.covers.fetch_add(1, Ordering::SeqCst);
            Ok(Bitmap::filled(8, 8, self.cover_color).encode_png().unwrap())
        }
    }

    /// A local file playing `title`, a minute into an hour long track.
    pub fn local_status(title: &str) -> Value {
        json!({
            "mode": "play", "mixer volume": 55, "time": 61.5, "duration": "3700",
            "playlist repeat": 1, "playlist shuffle": "0",
            "playlist_loop": [{
                "artist": "", "trackartist": "Miles Davis", "album": "Kind of Blue",
                "title": title, "compilation": "1", "samplesize": "24", "samplerate": "96000",
                "year": 0, "coverid": "a1b2", "genre": "Jazz"
            }]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{local_status as local, FakeLms};
    use super::*;
    use crate::config::IconConfig;
    use crate::icon_cache::testing::CountingRasterizer;
    use crate::source::{spawn_source, SourceState};
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use tokio_util::sync::CancellationToken;

    fn player(art: Option<Arc<ArtCache>>) -> Arc<Player> {
        let map = Arc::new(IconMap::new(&IconConfig::default()));
        Arc::new(Player::new(map, Arc::new(CountingRasterizer::default()), 22, art))
    }

    #[test]
    fn formatting_helpers() {
        assert_eq!(bitty("16", "44100"), "16b • 44.1kHz");
        assert_eq!(bitty("1", "2822400"), "• DSD64 •");
        assert_eq!(bitty("", "x"), "16b • 44.1kHz");
        assert_eq!(volume_level(1), 0);
        assert_eq!(volume_level(20), 0);
        assert_eq!(volume_level(21), 1);
        assert_eq!(volume_level(100), 4);
    }

    #[tokio::test]
    async fn local_track_fills_labels_and_times() {
        let p = player(None);
        let src = PlayerSource::new(FakeLms::new(vec![Ok(local("So What"))]), p.clone());
        assert_eq!(src.poll().await.unwrap(), PollOutcome::Updated);
        let s = p.snapshot();
        assert!(s.is_playing());
        assert_eq!(s.time_str, "01:01");
        assert_eq!(s.duration_str, "01:01:40");
        assert_eq!(s.remaining_str, "-01:00:38");
        assert_eq!(s.bitty, "24b • 96kHz");
        assert_eq!(s.year, "????");
        assert_eq!(s.volume, 55);
        let l = p.labels();
        assert_eq!(l.artist.text(), "Miles Davis");
        assert_eq!(l.albumartist.text(), VARIOUS_ARTISTS);
        assert_eq!(l.title.text(), "So What");
        assert_eq!(p.volume_glyph().dimensions(), VOLUME_GLYPH);
        assert!(!p.volume_glyph().is_blank());
        assert_eq!(p.cover().dimensions(), (COVER_SIZE, COVER_SIZE));
    }

    #[tokio::test]
    async fn remote_stream_uses_remote_meta() {
        let p = player(None);
        let status = json!({
            "mode": "play", "remote": 1, "time": 10,
            "remoteMeta": {"artist": "BBC", "title": "Radio 3", "remote_title": "", "year": "2024"}
        });
        let src = PlayerSource::new(FakeLms::new(vec![Ok(status)]), p.clone());
        src.poll().await.unwrap();
        assert_eq!(p.labels().albumartist.text(), "BBC");
        assert_eq!(p.labels().title.text(), "Radio 3");
        assert_eq!(p.snapshot().year, "2024");
        assert_eq!(p.snapshot().remaining_str, "00:00");
    }

    #[tokio::test]
    async fn cover_is_served_from_the_art_cache() {
        let dir = tempfile::tempdir().unwrap();
        let art = Arc::new(ArtCache::new(dir.path()).unwrap());
        let p = player(Some(art.clone()));
        let lms = FakeLms::new(vec![Ok(local("So What")), Ok(local("Blue in Green"))]);
        let src = PlayerSource::new(lms, p.clone());
        src.poll().await.unwrap();
        assert!(art.contains("a1b2"));
        src.poll().await.unwrap();
        // second track shares the cover id, no second download
        assert_eq!(src.fetch.covers.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn same_track_does_not_refetch_art() {
        let p = player(None);
        let lms = FakeLms::new(vec![Ok(local("So What")), Ok(local("So What"))]);
        let src = PlayerSource::new(lms, p.clone());
        src.poll().await.unwrap();
        src.poll().await.unwrap();
        assert_eq!(src.fetch.covers.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bad_time_text_is_a_decode_error() {
        let p = player(None);
        let mut v = local("So What");
        v["time"] = json!("soon");
        let src = PlayerSource::new(FakeLms::new(vec![Ok(v)]), p.clone());
        assert!(matches!(src.poll().await, Err(SourceError::Decode(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_playlist_marks_unknown_and_failure_is_stale() {
        let p = player(None);
        let script = vec![
            Ok(local("So What")),
            Err(SourceError::Timeout),
            Ok(json!({"mode": "play", "playlist_loop": []})),
        ];
        let h = spawn_source(
            Arc::new(PlayerSource::new(FakeLms::new(script), p.clone())),
            Duration::from_millis(400),
            CancellationToken::new(),
        );
        let mut rx = h.subscribe();
        let st = *rx.wait_for(|s| s.polls >= 2).await.unwrap();
        assert_eq!(st.last, Some(SourceState::Failed));
        assert!(p.snapshot().is_playing());
        let st = *rx.wait_for(|s| s.polls >= 3).await.unwrap();
        assert_eq!(st.last, Some(SourceState::Unknown));
        assert_eq!(p.snapshot().mode, "unknown");
        h.stop().await;
    }
}
