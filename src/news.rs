/*
 *  news.rs
 *
 *  RGBClock - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  RSS / Atom headlines shown in a repeating window
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
use chrono::{DateTime, Duration as Span, Local, NaiveTime, TimeZone, Utc};
use embedded_graphics::mono_font::MonoFont;
use log::{debug, info, warn};
use reqwest::Client;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::bitmap::{char_advance, font_by_name, Bitmap};
use crate::color::Rgba;
use crate::config::{parse_clock_time, NewsConfig};
use crate::guard;
use crate::source::{PeriodicSource, PollOutcome, SourceError};

pub const FEED_TIMEOUT: Duration = Duration::from_secs(10);
pub const TICKER_PERIOD: Duration = Duration::from_millis(200);
const NEWS_COLOR: &str = "#52bbc5cc";
/// fetch this long before the window opens
const LEAD: Span = Span::minutes(1);

/// One headline off a feed.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    pub title: String,
    pub description: String,
    pub published: Option<DateTime<Utc>>,
}

/// Parse an RSS 2.0 or Atom document.
pub fn parse_feed(xml: &str) -> Result<Vec<FeedItem>, SourceError> {
    let doc = roxmltree::Document::parse(xml).map_err(|e| SourceError::Decode(e.to_string()))?;
    let root = doc.root_element();
    let child_text = |n: roxmltree::Node, name: &str| {
        n.children()
            .find(|c| c.is_element() && c.tag_name().name() == name)
            .and_then(|c| c.text())
            .map(|t| t.trim().to_string())
    };

    let items = match root.tag_name().name() {
        "rss" => root
            .descendants()
            .filter(|n| n.is_element() && n.tag_name().name() == "item")
            .map(|n| FeedItem {
                title: child_text(n, "title").unwrap_or_default(),
                description: child_text(n, "description").unwrap_or_default(),
                published: child_text(n, "pubDate")
                    .and_then(|d| DateTime::parse_from_rfc2822(&d).ok())
                    .map(|d| d.with_timezone(&Utc)),
            })
            .collect(),
        "feed" => root
            .children()
            .filter(|n| n.is_element() && n.tag_name().name() == "entry")
            .map(|n| FeedItem {
                title: child_text(n, "title").unwrap_or_default(),
                description: child_text(n, "summary")
                    .or_else(|| child_text(n, "content"))
                    .unwrap_or_default(),
                published: child_text(n, "published")
                    .or_else(|| child_text(n, "updated"))
                    .and_then(|d| DateTime::parse_from_rfc3339(&d).ok())
                    .map(|d| d.with_timezone(&Utc)),
            })
            .collect(),
        other => return Err(SourceError::Decode(format!("not a feed: <{other}>"))),
    };
    Ok(items)
}

/// "• title" lines for items newer than `since`, each title once.
pub fn headlines<'a>(items: impl IntoIterator<Item = &'a FeedItem>, since: DateTime<Utc>, detail: bool) -> String {
    let mut seen: Vec<&str> = Vec::new();
    let mut lines = Vec::new();
    for item in items {
        if item.title.is_empty() || !item.published.is_some_and(|p| p > since) {
            continue;
        }
        if seen.contains(&item.title.as_str()) {
            continue;
        }
        seen.push(&item.title);
        let mut line = format!("• {}", item.title);
        if detail && !item.description.is_empty() {
            line.push('\n');
            line.push_str(&item.description);
        }
        lines.push(line);
    }
    lines.join("\n")
}

/// Greedy wrap to `max_chars` columns, hard breaks kept.
pub fn word_wrap(text: &str, max_chars: usize) -> Vec<String> {
    let max = max_chars.max(1);
    let mut out = Vec::new();
    for para in text.split('\n') {
        let mut line = String::new();
        for word in para.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();
            // words wider than a line get split
            while word.len() > max {
                if !line.is_empty() {
                    out.push(std::mem::take(&mut line));
                }
                out.push(word.drain(..max).collect());
            }
            let word: String = word.into_iter().collect();
            if word.is_empty() {
                continue;
            }
            let needed = line.chars().count() + usize::from(!line.is_empty()) + word.chars().count();
            if needed > max && !line.is_empty() {
                out.push(std::mem::take(&mut line));
            }
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(&word);
        }
        out.push(line);
    }
    out
}

/// Wrapped text on a tall canvas, 1.2 line spacing.
pub fn paint(text: &str, width: u32, font: &MonoFont<'_>) -> Bitmap {
    let cols = (width.saturating_sub(2) / char_advance(font)) as usize;
    let lines = word_wrap(text, cols);
    let pitch = (font.character_size.height as f32 * 1.2).ceil() as u32;
    let mut canvas = Bitmap::new(width, lines.len() as u32 * pitch + 5);
    let color = Rgba::from_hex_or_white(NEWS_COLOR);
    for (i, line) in lines.iter().enumerate() {
        canvas.text(line, font, color, 1, 1 + (i as u32 * pitch) as i32);
    }
    canvas
}

/// Display schedule: `duration` long, every `repeat`, seeded at a clock time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewsWindow {
    pub seed: NaiveTime,
    pub duration: Span,
    pub repeat: Span,
}

impl NewsWindow {
    pub fn from_config(cfg: &NewsConfig) -> Self {
        Self {
            // checked when the config loaded
            seed: parse_clock_time(&cfg.time).unwrap_or(NaiveTime::MIN),
            duration: Span::minutes(cfg.duration.max(1)),
            repeat: Span::minutes(cfg.repeat.max(1)),
        }
    }

    /// Start and end of the first window opening after `now`.
    pub fn next_window<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> (DateTime<Tz>, DateTime<Tz>) {
        let mut at = now
            .timezone()
            .from_local_datetime(&now.date_naive().and_time(self.seed))
            .earliest()
            .unwrap_or_else(|| now.clone());
        while at <= *now {
            at += self.repeat;
        }
        let end = at.clone() + self.duration;
        (at, end)
    }
}

#[derive(Debug, Clone)]
struct Schedule {
    at: DateTime<Local>,
    end: DateTime<Local>,
    /// items older than this were shown already
    since: DateTime<Utc>,
    fetched: Option<DateTime<Local>>,
}

#[derive(Debug, Default)]
struct Ticker {
    canvas: Bitmap,
    velocity: u32,
    limit: u32,
}

impl Ticker {
    fn scrolls(&self) -> bool {
        self.canvas.height() > self.limit
    }

    fn tick(&mut self) {
        if self.scrolls() {
            self.canvas.shift_up_wrap(self.velocity);
        }
    }
}

/// Headline text, its canvas and the vertical ticker.
pub struct News {
    text: RwLock<String>,
    schedule: Mutex<Schedule>,
    window: NewsWindow,
    width: u32,
    font: &'static MonoFont<'static>,
    ticker: Arc<Mutex<Ticker>>,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl News {
    pub fn new(cfg: &NewsConfig, width: u32) -> Self {
        let now = Local::now();
        let window = NewsWindow::from_config(cfg);
        let (at, end) = window.next_window(&now);
        info!("news window {} to {}", at.format("%a %H:%M"), end.format("%H:%M"));
        Self {
            text: RwLock::new(String::new()),
            schedule: Mutex::new(Schedule { at, end, since: (now - Span::hours(24)).with_timezone(&Utc), fetched: None }),
            window,
            width,
            font: font_by_name("7x13"),
            ticker: Arc::new(Mutex::new(Ticker { velocity: cfg.velocity.max(1), limit: cfg.limit, ..Default::default() })),
            task: Mutex::new(None),
        }
    }

    pub fn text(&self) -> String {
        guard::read(&self.text).clone()
    }

    pub fn image(&self) -> Bitmap {
        guard::lock(&self.ticker).canvas.clone()
    }

    pub fn is_displayed(&self) -> bool {
        self.is_displayed_at(Local::now())
    }

    pub fn is_displayed_at(&self, now: DateTime<Local>) -> bool {
        let s = guard::lock(&self.schedule);
        now >= s.at - Span::seconds(1) && now < s.end && !guard::read(&self.text).is_empty()
    }

    pub fn is_scrolling(&self) -> bool {
        guard::lock(&self.task).as_ref().is_some_and(|(_, h)| !h.is_finished())
    }

    /// Replace the text and repaint, scrolling only when it is too tall.
    fn set_text(&self, text: String) {
        let canvas = paint(&text, self.width, self.font);
        *guard::write(&self.text) = text;
        let scrolls = {
            let mut t = guard::lock(&self.ticker);
            t.canvas = canvas;
            t.scrolls()
        };
        if scrolls {
            self.start_ticker();
        } else {
            self.stop_ticker();
        }
    }

    fn start_ticker(&self) {
        let mut task = guard::lock(&self.task);
        if task.as_ref().is_some_and(|(_, h)| !h.is_finished()) {
            return;
        }
        let token = CancellationToken::new();
        let child = token.clone();
        let ticker = self.ticker.clone();
        let handle = tokio::spawn(async move {
            let mut tick = interval(TICKER_PERIOD);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = tick.tick() => guard::lock(&ticker).tick(),
                }
            }
            debug!("news ticker exiting");
        });
        *task = Some((token, handle));
    }

    pub fn stop_ticker(&self) {
        if let Some((token, _)) = guard::lock(&self.task).take() {
            token.cancel();
        }
    }

    /// Roll the schedule forward once the window has closed.
    fn roll(&self, now: DateTime<Local>) -> bool {
        let mut s = guard::lock(&self.schedule);
        if now < s.end {
            return false;
        }
        let (at, end) = self.window.next_window(&now);
        info!("news window closed, next {} to {}", at.format("%a %H:%M"), end.format("%H:%M"));
        s.at = at;
        s.end = end;
        s.fetched = None;
        true
    }
}

impl Drop for News {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}

pub trait FeedFetch: Send + Sync + 'static {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Vec<FeedItem>, SourceError>> + Send;
}

pub struct FeedClient {
    client: Client,
}

impl FeedClient {
    pub fn new() -> Result<Self, SourceError> {
        Ok(Self { client: Client::builder().timeout(FEED_TIMEOUT).build()? })
    }
}

impl FeedFetch for FeedClient {
    async fn fetch(&self, url: &str) -> Result<Vec<FeedItem>, SourceError> {
        let res = self.client.get(url).send().await?;
        let status = res.status();
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }
        parse_feed(&res.text().await?)
    }
}

pub struct NewsSource<F: FeedFetch> {
    fetch: Arc<F>,
    news: Arc<News>,
    feeds: Vec<String>,
    detail: bool,
    every: Span,
}

impl<F: FeedFetch> NewsSource<F> {
    pub fn new(fetch: F, news: Arc<News>, cfg: &NewsConfig) -> Self {
        Self {
            fetch: Arc::new(fetch),
            news,
            feeds: cfg.feeds.clone(),
            detail: cfg.detail,
            every: Span::seconds(cfg.poll.max(1) as i64),
        }
    }

    /// All feeds at once; failed ones are logged and left out. Fails only
    /// when every feed did.
    async fn fetch_all(&self) -> Result<Vec<FeedItem>, SourceError> {
        let mut set = JoinSet::new();
        for (i, url) in self.feeds.iter().enumerate() {
            let fetch = self.fetch.clone();
            let url = url.clone();
            set.spawn(async move { (i, fetch.fetch(&url).await.map_err(|e| (url, e))) });
        }
        let mut feeds = Vec::new();
        let mut last_err = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((i, Ok(items))) => feeds.push((i, items)),
                Ok((_, Err((url, e)))) => {
                    warn!("news feed {url} failed: {e}");
                    last_err = Some(e);
                }
                Err(e) => {
                    warn!("news feed task failed: {e}");
                    last_err = Some(SourceError::Invariant(format!("feed task: {e}")));
                }
            }
        }
        if feeds.is_empty() {
            if let Some(e) = last_err {
                return Err(e);
            }
        }
        // keep the configured order
        feeds.sort_by_key(|(i, _)| *i);
        Ok(feeds.into_iter().flat_map(|(_, items)| items).collect())
    }

    pub(crate) async fn poll_at(&self, now: DateTime<Local>) -> Result<PollOutcome, SourceError> {
        if self.news.roll(now) && !self.news.text().is_empty() {
            self.news.set_text(String::new());
            return Ok(PollOutcome::Updated);
        }
        let (due, since) = {
            let s = guard::lock(&self.news.schedule);
            let open = now >= s.at - LEAD && now < s.end;
            (open && s.fetched.is_none_or(|f| now - f >= self.every), s.since)
        };
        if !due {
            return Ok(PollOutcome::Unchanged);
        }

        let items = self.fetch_all().await?;
        let text = headlines(&items, since, self.detail);
        {
            let mut s = guard::lock(&self.news.schedule);
            s.fetched = Some(now);
            s.since = now.with_timezone(&Utc);
        }
        // nothing new keeps what is on screen
        if text.is_empty() || text == self.news.text() {
            return Ok(PollOutcome::Unchanged);
        }
        debug!("news: {} headlines", text.lines().filter(|l| l.starts_with('•')).count());
        self.news.set_text(text);
        Ok(PollOutcome::Updated)
    }
}

impl<F: FeedFetch> PeriodicSource for NewsSource<F> {
    fn name(&self) -> &str {
        "news"
    }

    async fn poll(&self) -> Result<PollOutcome, SourceError> {
        self.poll_at(Local::now()).await
    }

    fn mark_unknown(&self) {
        self.news.stop_ticker();
        guard::write(&self.news.text).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>t</title>
<item><title>Harbour frozen</title><description>Boats stuck</description><pubDate>Mon, 04 Mar 2024 06:00:00 +0000</pubDate></item>
<item><title>Old news</title><pubDate>Mon, 01 Jan 2024 06:00:00 +0000</pubDate></item>
<item><title>Harbour frozen</title><pubDate>Mon, 04 Mar 2024 06:05:00 +0000</pubDate></item>
</channel></rss>"#;

    const ATOM: &str = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom"><title>a</title>
<entry><title>Snow due</title><summary>Lots</summary><updated>2024-03-04T05:30:00Z</updated></entry>
</feed>"#;

    fn cfg() -> NewsConfig {
        NewsConfig {
            feeds: vec!["rss".into(), "atom".into(), "broken".into()],
            time: "07:00".into(),
            duration: 10,
            repeat: 60,
            limit: 62,
            ..Default::default()
        }
    }

    fn local(h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 4, h, m, 0).single().unwrap()
    }

    #[test]
    fn parses_rss_and_atom() {
        let rss = parse_feed(RSS).unwrap();
        assert_eq!(rss.len(), 3);
        assert_eq!(rss[0].description, "Boats stuck");
        assert!(rss[0].published.is_some());
        let atom = parse_feed(ATOM).unwrap();
        assert_eq!(atom[0].title, "Snow due");
        assert_eq!(atom[0].description, "Lots");
        assert!(matches!(parse_feed("<html/>"), Err(SourceError::Decode(_))));
    }

    #[test]
    fn headlines_are_new_and_unique() {
        let mut items = parse_feed(RSS).unwrap();
        items.extend(parse_feed(ATOM).unwrap());
        let since = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(headlines(&items, since, false), "• Harbour frozen\n• Snow due");
        assert_eq!(
            headlines(&items, since, true),
            "• Harbour frozen\nBoats stuck\n• Snow due\nLots"
        );
    }

    #[test]
    fn wrap_breaks_on_words() {
        assert_eq!(word_wrap("one two three", 7), vec!["one two", "three"]);
        assert_eq!(word_wrap("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
        assert_eq!(word_wrap("a\nb", 10), vec!["a", "b"]);
    }

    #[test]
    fn next_window_rolls_past_now() {
        let w = NewsWindow { seed: NaiveTime::from_hms_opt(7, 0, 0).unwrap(), duration: Span::minutes(10), repeat: Span::minutes(60) };
        let (at, end) = w.next_window(&local(6, 30));
        assert_eq!(at, local(7, 0));
        assert_eq!(end, local(7, 10));
        let (at, _) = w.next_window(&local(9, 0));
        assert_eq!(at, local(10, 0));
    }

    struct Feeds {
        calls: AtomicUsize,
    }

    impl FeedFetch for Feeds {
        async fn fetch(&self, url: &str) -> Result<Vec<FeedItem>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match url {
                "rss" => parse_feed(RSS),
                "atom" => parse_feed(ATOM),
                _ => Err(SourceError::Status(404)),
            }
        }
    }

    fn source_at(now: DateTime<Local>) -> NewsSource<Feeds> {
        let news = Arc::new(News::new(&cfg(), 126));
        {
            let mut s = guard::lock(&news.schedule);
            let (at, end) = news.window.next_window(&(now - Span::minutes(5)));
            s.at = at;
            s.end = end;
            s.since = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        }
        NewsSource::new(Feeds { calls: AtomicUsize::new(0) }, news, &cfg())
    }

    #[tokio::test]
    async fn window_gates_fetch_and_display() {
        let src = source_at(local(6, 59));
        // window 07:00-07:10, too early for the lead
        assert_eq!(src.poll_at(local(6, 57)).await.unwrap(), PollOutcome::Unchanged);
        assert_eq!(src.fetch.calls.load(Ordering::SeqCst), 0);

        assert_eq!(src.poll_at(local(6, 59)).await.unwrap(), PollOutcome::Updated);
        assert_eq!(src.fetch.calls.load(Ordering::SeqCst), 3);
        assert_eq!(src.news.text(), "• Harbour frozen\n• Snow due");
        assert!(!src.news.is_displayed_at(local(6, 59)));
        assert!(src.news.is_displayed_at(local(7, 0)));
        assert!(!src.news.image().is_blank());

        // within the poll interval nothing is fetched again
        assert_eq!(src.poll_at(local(7, 2)).await.unwrap(), PollOutcome::Unchanged);
        assert_eq!(src.fetch.calls.load(Ordering::SeqCst), 3);

        // closing the window clears the text
        assert_eq!(src.poll_at(local(7, 10)).await.unwrap(), PollOutcome::Updated);
        assert!(src.news.text().is_empty());
        assert!(!src.news.is_displayed_at(local(8, 0)));
    }

    /// Every feed down until `up` is set, then one early item.
    struct Outage {
        up: std::sync::atomic::AtomicBool,
    }

    impl FeedFetch for Outage {
        async fn fetch(&self, _url: &str) -> Result<Vec<FeedItem>, SourceError> {
            if !self.up.load(Ordering::SeqCst) {
                return Err(SourceError::Status(500));
            }
            Ok(vec![FeedItem {
                title: "Ferry cancelled".into(),
                description: String::new(),
                published: Some(local(6, 30).with_timezone(&Utc)),
            }])
        }
    }

    #[tokio::test]
    async fn total_outage_fails_and_keeps_the_cursor() {
        let news = Arc::new(News::new(&cfg(), 126));
        {
            let mut s = guard::lock(&news.schedule);
            let (at, end) = news.window.next_window(&local(6, 50));
            s.at = at;
            s.end = end;
            s.since = local(6, 0).with_timezone(&Utc);
        }
        let src = NewsSource::new(Outage { up: Default::default() }, news.clone(), &cfg());

        assert!(matches!(src.poll_at(local(6, 59)).await, Err(SourceError::Status(500))));
        assert!(guard::lock(&news.schedule).fetched.is_none());
        assert_eq!(guard::lock(&news.schedule).since, local(6, 0).with_timezone(&Utc));

        // the item from before the outage still makes it on screen
        src.fetch.up.store(true, Ordering::SeqCst);
        assert_eq!(src.poll_at(local(7, 1)).await.unwrap(), PollOutcome::Updated);
        assert_eq!(news.text(), "• Ferry cancelled");
    }

    #[tokio::test]
    async fn tall_text_starts_the_ticker() {
        let src = source_at(local(6, 59));
        src.news.set_text(vec!["• headline words"; 12].join("\n"));
        assert!(src.news.is_scrolling());
        let before = src.news.image();
        guard::lock(&src.news.ticker).tick();
        let after = src.news.image();
        assert_eq!(before.dimensions(), after.dimensions());
        assert_ne!(before, after);
        src.news.set_text("• short".into());
        assert!(!src.news.is_scrolling());
    }
}
