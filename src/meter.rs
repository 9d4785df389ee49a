/*
 *  meter.rs
 *
 *  RGBClock - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  VU peak meter fed by the LMS server-sent-events stream
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
use reqwest::{header, Client};
use serde::Deserialize;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bitmap::Bitmap;
use crate::guard;
use crate::rasterizer::render_svg_str;
use crate::source::SourceError;

pub const VU_WIDTH: u32 = 162;
pub const VU_HEIGHT: u32 = 40;
pub const RECONNECT: Duration = Duration::from_secs(5);
const LED_LEVELS: [i32; 12] = [-50, -40, -30, -24, -18, -12, -9, -6, -3, 0, 2, 4];
const ROW_Y: [f32; 2] = [9.28, 25.21];

/// One `event:`/`data:` pair off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Line parser that tolerates events split across chunks.
#[derive(Debug, Default)]
pub struct SseParser {
    pending: String,
    event: String,
}

impl SseParser {
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.pending.push_str(&String::from_utf8_lossy(chunk));
        let mut out = Vec::new();
        while let Some(nl) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=nl).collect();
            let line = line.trim_end_matches(['\r', '\n']);
            if let Some(v) = line.strip_prefix("event:") {
                self.event = v.trim().to_string();
            } else if let Some(v) = line.strip_prefix("data:") {
                out.push(SseEvent { event: self.event.clone(), data: v.trim().to_string() });
            } else if line.is_empty() {
                self.event.clear();
            }
        }
        out
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Channel {
    pub name: String,
    #[serde(rename = "dBfs")]
    pub dbfs: i32,
    #[serde(rename = "dB")]
    pub db: i32,
    pub linear: i32,
    pub scaled: i32,
}

/// Visualizer payload, `{type, channel: [...]}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MeterEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "channel")]
    pub channels: Vec<Channel>,
}

impl MeterEvent {
    pub fn is_vu(&self) -> bool {
        self.kind.eq_ignore_ascii_case("vu")
    }

    /// Left and right dBfs, a mono feed is mirrored.
    pub fn dbfs(&self) -> [i32; 2] {
        match self.channels.as_slice() {
            [] => [-100, -100],
            [m] => [m.dbfs, m.dbfs],
            [l, r, ..] => [l.dbfs, r.dbfs],
        }
    }
}

/// Two rows of LEDs and the overload lamp.
pub fn vu_svg(dbfs: [i32; 2]) -> String {
    let mut s = format!(
        r##"<svg width="{VU_WIDTH}" height="{VU_HEIGHT}" xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink"><defs><g id="led"><rect x="0" y="0" width="8" height="5.5"/><rect x=".5" y=".5" width="7" height="4.5" fill="black" fill-opacity=".15"/></g></defs>"##
    );
    for (p, &level) in LED_LEVELS.iter().enumerate() {
        let x = 24.0 + (p as f32 + 1.0) * 9.791538;
        for (ch, y) in ROW_Y.iter().enumerate() {
            let test = 20 + dbfs[ch];
            let (color, opacity) = if level >= test {
                ("lightgrey", 0.4)
            } else if level >= 0 && test > 0 {
                (if level >= 4 { "red" } else { "yellow" }, 0.9)
            } else {
                ("green", 0.9)
            };
            let _ = write!(
                s,
                r##"<use xlink:href="#led" x="{x:.2}" y="{y:.2}" fill="{color}" fill-opacity="{opacity}"/>"##
            );
        }
    }
    let over = if dbfs[0] > 0 || dbfs[1] > 0 {
        r#"fill="red" fill-opacity="1""#
    } else {
        r#"fill="lightgrey" fill-opacity="0.5""#
    };
    let _ = write!(s, r#"<rect x="138" y="17.5" width="16" height="4.5" {over}/></svg>"#);
    s
}

/// Latest VU rendering and whether the stream is live.
pub struct VuMeter {
    bitmap: RwLock<Arc<Bitmap>>,
    active: AtomicBool,
    updates: AtomicU64,
}

impl Default for VuMeter {
    fn default() -> Self {
        Self {
            bitmap: RwLock::new(Arc::new(Bitmap::new(VU_WIDTH, VU_HEIGHT))),
            active: AtomicBool::new(false),
            updates: AtomicU64::new(0),
        }
    }
}

impl VuMeter {
    pub fn image(&self) -> Arc<Bitmap> {
        guard::read(&self.bitmap).clone()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    /// Render off-lock, swap in.
    pub fn apply(&self, ev: &MeterEvent) {
        if !ev.is_vu() {
            return;
        }
        match render_svg_str(&vu_svg(ev.dbfs()), VU_WIDTH, VU_HEIGHT, 1.0) {
            Ok(b) => {
                *guard::write(&self.bitmap) = Arc::new(b);
                self.updates.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => warn!("vu render failed: {e}"),
        }
    }

    /// Read one connection until it ends.
    async fn stream(&self, client: &Client, url: &str, token: &CancellationToken) -> Result<(), SourceError> {
        let mut res = client
            .get(url)
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await?
            .error_for_status()?;
        self.active.store(true, Ordering::Relaxed);
        info!("meter stream connected to {url}");

        let mut parser = SseParser::default();
        loop {
            let chunk = tokio::select! {
                _ = token.cancelled() => return Ok(()),
                c = res.chunk() => c?,
            };
            let Some(chunk) = chunk else {
                return Err(SourceError::Decode("meter stream closed".into()));
            };
            for ev in parser.feed(&chunk) {
                match serde_json::from_str::<MeterEvent>(&ev.data) {
                    Ok(m) => self.apply(&m),
                    Err(e) => debug!("meter {} payload skipped: {}", ev.event, e),
                }
            }
        }
    }
}

/// Keep a meter stream open until cancelled, reconnecting after failures.
pub fn spawn_meter(url: String, meter: Arc<VuMeter>, token: CancellationToken) -> Result<JoinHandle<()>, SourceError> {
    let client = Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .build()?;
    Ok(tokio::spawn(async move {
        loop {
            if let Err(e) = meter.stream(&client, &url, &token).await {
                warn!("meter polling failed: {e}");
            }
            meter.active.store(false, Ordering::Relaxed);
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(RECONNECT) => {}
            }
        }
        info!("meter stream stopped.");
    }))
}
