/*
 *  compositor.rs
 *
 *  RGBClock - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  Per tick frame composition and hand off to the sink
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

//! The compositor is the only writer of a frame. Panels are read through
//! their own locks, one short copy each, and nothing here waits on the
//! network.

use chrono::{DateTime, Local, Timelike};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::bitmap::{font_by_name, measure, Bitmap};
use crate::color::Rgba;
use crate::config::{DisplayConfig, Layout};
use crate::player::{Player, PlayerState};
use crate::sink::DisplaySink;
use crate::state::AppState;

const DIGITS: Rgba = Rgba::rgb(0xf5, 0xf5, 0xdc);
const SECONDS: Rgba = Rgba::rgb(0xff, 0x99, 0x00);
const RING: Rgba = Rgba::rgb(0x28, 0x28, 0x28);
const TICKS: Rgba = Rgba::rgb(0x60, 0x60, 0x60);
const LABEL: Rgba = Rgba::rgb(0x52, 0xbb, 0xc5);
/// below this sweep the seconds arc gets a dim full ring
const RING_BELOW: f32 = 8.0;
const EXPERIMENT_STEP: f32 = 0.2;
/// height of the weather strip above the content panel
const WEATHER_ROWS: u32 = 30;
/// cover brightness, in percent, when it sits behind the labels
const BACKDROP: u8 = 35;
/// text room needed beside a cover before it is drawn as a thumbnail
const THUMB_TEXT: u32 = 64;
const PROGRESS: Rgba = Rgba::rgb(0xff, 0x99, 0x00);

/// Where things go for a given display size and layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
    /// centre and radius of the clock face
    pub face: (f32, f32, f32),
    /// x, y, w, h of the weather and content column
    pub panel: (i32, i32, u32, u32),
    pub compact: bool,
    pub full: bool,
    /// room for the daypart strip
    pub wide: bool,
}

impl Geometry {
    pub fn from_config(d: &DisplayConfig) -> Self {
        let (w, h) = (d.width.max(1), d.height.max(1));
        let side = w.min(h);
        let compact = d.layout == Layout::Compact || w <= h;
        let panel = if compact {
            let top = (h / 2 + 4).min(h);
            (0, top as i32, w, h - top)
        } else {
            (side as i32, 0, w - side, h)
        };
        Self {
            width: w,
            height: h,
            face: (side as f32 / 2.0, side as f32 / 2.0, side as f32 / 2.0 - 1.0),
            panel,
            compact,
            full: d.layout == Layout::Full,
            wide: !compact && w - side >= 128,
        }
    }
}

fn lerp(a: Rgba, b: Rgba, t: f32) -> Rgba {
    let m = |x: u8, y: u8| (x as f32 + (y as f32 - x as f32) * t).round() as u8;
    Rgba::new(m(a.r, b.r), m(a.g, b.g), m(a.b, b.b), m(a.a, b.a))
}

/// Composes one frame per tick and presents it.
pub struct Compositor<S: DisplaySink> {
    state: Arc<AppState>,
    sink: S,
    geometry: Geometry,
    delay: Duration,
    background: Option<Arc<Bitmap>>,
    /// cover as handed over by the player, and as drawn
    cover: Option<(Arc<Bitmap>, Arc<Bitmap>)>,
    angle: f32,
    direction: f32,
    brightness: Option<u8>,
    frames: u64,
}

impl<S: DisplaySink> Compositor<S> {
    pub fn new(state: Arc<AppState>, sink: S) -> Self {
        let d = &state.config.display;
        let geometry = Geometry::from_config(d);
        let delay = Duration::from_millis(d.tick_ms.max(1));
        let (sw, sh) = sink.bounds();
        let out_w = if d.folding { geometry.width * 2 } else { geometry.width };
        if (sw, sh) != (out_w, geometry.height) {
            warn!("frame {}x{} does not match the sink {}x{}", out_w, geometry.height, sw, sh);
        }
        Self {
            state,
            sink,
            geometry,
            delay,
            background: None,
            cover: None,
            angle: 0.0,
            direction: 1.0,
            brightness: None,
            frames: 0,
        }
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Force the next frame to rebuild the static background.
    pub fn invalidate_background(&mut self) {
        self.background = None;
    }

    fn background(&mut self) -> Arc<Bitmap> {
        if let Some(bg) = &self.background {
            return bg.clone();
        }
        let bg = Arc::new(self.build_background());
        debug!("background rebuilt");
        self.background = Some(bg.clone());
        bg
    }

    /// Gradient, decorations and hour ticks.
    fn build_background(&self) -> Bitmap {
        let g = self.geometry;
        let d = &self.state.config.display;
        let (cx, cy, r) = g.face;
        let inner = Rgba::from_hex(&d.gradient[0]).unwrap_or(Rgba::BLACK);
        let outer = Rgba::from_hex(&d.gradient[1]).unwrap_or(Rgba::BLACK);

        let mut bg = Bitmap::new(g.width, g.height);
        let reach = (g.width.max(g.height) as f32).max(1.0);
        for y in 0..g.height as i32 {
            for x in 0..g.width as i32 {
                let dist = ((x as f32 + 0.5 - cx).powi(2) + (y as f32 + 0.5 - cy).powi(2)).sqrt();
                bg.set_pixel(x, y, lerp(inner, outer, (dist / reach).min(1.0)));
            }
        }

        let decor = &self.state.decor;
        let side = g.width.min(g.height);
        let globe = decor.global.image().resize(side, side);
        bg.draw_over(&globe, 0, 0);
        let corner_size = (side / 4).max(1);
        let corner = decor.corner.image().resize(corner_size, corner_size);
        bg.draw_over(&corner, 0, 0);
        bg.draw_over(&corner.rotate180(), (side - corner_size) as i32, (side - corner_size) as i32);
        let alt = decor.alt_corner.image().resize(corner_size, corner_size);
        bg.draw_over(&alt.flip_h(), (side - corner_size) as i32, 0);
        bg.draw_over(&alt.flip_v(), 0, (side - corner_size) as i32);

        for hour in 0..12 {
            let (s, c) = (hour as f32 * 30.0).to_radians().sin_cos();
            let len = if hour % 3 == 0 { 4.0 } else { 2.0 };
            let at = |radius: f32| ((cx + radius * s).round() as i32, (cy - radius * c).round() as i32);
            bg.line(at(r - len), at(r), 1, TICKS);
        }
        bg
    }

    /// Seconds arc and the digits.
    fn draw_face(&self, frame: &mut Bitmap, now: &DateTime<Local>) {
        let (cx, cy, r) = self.geometry.face;
        let secs = now.second() as f32 + now.timestamp_subsec_millis().min(999) as f32 / 1000.0;
        let sweep = 6.0 * secs;
        if sweep < RING_BELOW {
            frame.arc(cx, cy, r - 1.0, 360.0, 1, RING);
        }
        frame.arc(cx, cy, r - 1.0, sweep, 2, SECONDS);

        let font = font_by_name("10x20");
        let sep = if now.second() % 2 == 0 { ':' } else { ' ' };
        let digits = format!("{:02}{}{:02}", now.hour(), sep, now.minute());
        let x = cx as i32 - measure(&digits, font) as i32 / 2;
        frame.text(&digits, font, DIGITS, x, cy as i32 - 14);
    }

    /// Date part and the moon inside the face.
    fn draw_full_extras(&self, frame: &mut Bitmap, now: &DateTime<Local>) {
        let (cx, cy, r) = self.geometry.face;
        let font = font_by_name("5x8");
        let date = self.state.toggles.date_text(now);
        frame.text(&date, font, LABEL, cx as i32 - measure(&date, font) as i32 / 2, cy as i32 + 8);

        let size = (r / 3.0).max(4.0) as u32;
        let moon = self.state.decor.moon.image().resize(size, size);
        frame.draw_over(&moon, cx as i32 - size as i32 / 2, cy as i32 + 17);
    }

    /// Icon, temperature and the alternating humidity / precipitation line.
    fn draw_weather(&self, frame: &mut Bitmap) -> bool {
        let w = self.state.weather.snapshot();
        if !w.valid {
            return false;
        }
        let icons = self.state.weather.icons();
        let (px, py, pw, _) = self.geometry.panel;
        let font = font_by_name("6x10");
        let small = font_by_name("5x8");

        let main = icons.main.image();
        if self.geometry.compact {
            // under the digits, face centre
            let (cx, cy, _) = self.geometry.face;
            let t = format!("{:.0}°", w.temp_f);
            frame.text(&t, small, DIGITS, cx as i32 - measure(&t, small) as i32 / 2, cy as i32 + 8);
            return true;
        }

        let icon_size = main.height().min(WEATHER_ROWS - 2);
        frame.draw_over(&main.resize(icon_size, icon_size), px, py);
        let tx = px + icon_size as i32 + 1;
        frame.text(&format!("{:.0}°F", w.temp_f), font, DIGITS, tx, py + 1);

        let glyph = 10;
        let (icon, value) = if self.state.toggles.mode() {
            (icons.humidity.image(), format!("{}%", w.humidity))
        } else {
            let dp = w.current.dayparts()[0];
            (icons.brolly.image(), format!("{}%", dp.precipitation.trim_end_matches('%')))
        };
        frame.draw_over(&icon.resize(glyph, glyph), tx, py + 13);
        frame.text(&value, small, Rgba::WHITE, tx + glyph as i32 + 1, py + 14);
        let wind = icons.wind_dir.image();
        frame.draw_over(&wind.resize(12, 12), px + pw as i32 - 12, py + 12);

        if self.geometry.wide {
            let dx = px + 64;
            for (i, slot) in icons.dayparts.iter().enumerate() {
                let img = slot.image();
                frame.draw_over(&img, dx + i as i32 * 16, py);
            }
        }
        true
    }

    fn content_area(&self) -> (i32, i32, u32, u32) {
        let (px, py, pw, ph) = self.geometry.panel;
        if self.geometry.compact {
            (px, py, pw, ph)
        } else {
            (px, py + WEATHER_ROWS as i32, pw, ph.saturating_sub(WEATHER_ROWS))
        }
    }

    /// The cover scaled for the player panel, redone only when the player
    /// hands over a new one.
    fn cover_art(&mut self, source: Arc<Bitmap>, w: u32, h: u32, thumb: bool) -> Arc<Bitmap> {
        if let Some((seen, drawn)) = &self.cover {
            if Arc::ptr_eq(seen, &source) {
                return drawn.clone();
            }
        }
        let drawn = if thumb {
            source.resize(h, h)
        } else {
            let mut b = source.resize(w, h);
            for p in b.as_mut_slice() {
                *p = p.scaled(BACKDROP);
            }
            b
        };
        let drawn = Arc::new(drawn);
        self.cover = Some((source, drawn.clone()));
        drawn
    }

    /// Third label row: the info line in one mode, otherwise album, album
    /// artist, composer and conductor in turn, skipping the empty ones.
    fn third_row(&self, player: &Player, ps: &PlayerState, width: u32) -> Bitmap {
        if self.state.toggles.mode() {
            let info = [ps.year.as_str(), ps.genre.as_str(), ps.bitty.as_str()]
                .iter()
                .filter(|s| !s.is_empty())
                .copied()
                .collect::<Vec<_>>()
                .join(" ");
            let mut row = Bitmap::new(width, 15);
            row.text(&info, font_by_name("5x8"), LABEL, 0, 4);
            return row;
        }
        let l = player.labels();
        let turn = [&l.album, &l.albumartist, &l.composer, &l.conductor];
        let first = self.state.toggles.date_index() % turn.len();
        (0..turn.len())
            .map(|i| turn[(first + i) % turn.len()])
            .find(|label| !label.text().is_empty())
            .unwrap_or(&l.album)
            .image()
    }

    /// Now playing over the whole panel: the cover behind or beside the
    /// labels, progress, then time and glyphs along the bottom; the meter
    /// when live.
    fn draw_player(&mut self, frame: &mut Bitmap) -> bool {
        let Some(player) = self.state.player.clone() else {
            return false;
        };
        let ps = player.snapshot();
        if !ps.is_playing() {
            return false;
        }
        let (x, y, w, h) = self.geometry.panel;
        if w == 0 || h == 0 {
            return false;
        }
        let mut panel = Bitmap::new(w, h);

        let thumb = w >= h + THUMB_TEXT;
        let cover = player.cover();
        if !cover.is_empty() {
            let art = self.cover_art(cover, w, h, thumb);
            panel.draw_over(&art, 0, 0);
        }
        let (tx, tw) = if thumb { (h as i32 + 1, w - h - 1) } else { (0, w) };

        let strip = if h >= 48 { 16 } else { 9u32.min(h) };
        let sy = (h - strip) as i32;
        let bar = sy - 2;

        let labels = player.labels();
        let mut ry = 0;
        for row in [labels.title.image(), labels.artist.image(), self.third_row(&player, &ps, tw)] {
            if ry + row.height() as i32 > bar {
                break;
            }
            panel.draw_over(&row.crop(0, 0, tw, row.height()), tx, ry);
            ry += row.height() as i32;
        }

        if bar >= 0 {
            let done = ((tw as f64 * ps.percent / 100.0).round() as u32).min(tw);
            panel.fill_rect(tx, bar, done, 2, PROGRESS);
        }

        let remaining = self.state.config.lms.as_ref().is_none_or(|l| l.remaining);
        let time = if remaining { &ps.remaining_str } else { &ps.time_str };
        let small = font_by_name("5x8");
        let mut show_time = true;
        if strip == 16 {
            let vol = player.volume_glyph();
            let right = w as i32 - vol.width() as i32;
            panel.draw_over(&vol, right, sy);
            let mods = player.modifiers_glyph();
            // no room for both: the modifiers take turns with the time
            let fits = tx + measure(time, small) as i32 + mods.width() as i32 <= right;
            if fits || self.state.toggles.mode() {
                panel.draw_over(&mods, right - mods.width() as i32, sy);
                show_time = fits;
            }
        }
        if show_time {
            panel.text(time, small, LABEL, tx, sy + (strip as i32 - 8) / 2);
        }

        if let Some(meter) = self.state.meter.as_ref().filter(|m| m.is_active()) {
            let vu = meter.image();
            let vh = (tw * vu.height() / vu.width().max(1)).max(1);
            panel.draw_over(&vu.resize(tw, vh), tx, bar - vh as i32);
        }
        frame.draw_over(&panel, x, y);
        true
    }

    fn draw_transit(&self, frame: &mut Bitmap) -> bool {
        let Some(transit) = self.state.transit.as_ref().filter(|t| t.is_displayed()) else {
            return false;
        };
        let (x, y, w, h) = self.content_area();
        let mut at = y;
        for p in transit.snapshot().predictions {
            if at + p.canvas.height() as i32 > y + h as i32 {
                break;
            }
            frame.draw_over(&p.canvas.crop(0, 0, w, p.canvas.height()), x, at);
            at += p.canvas.height() as i32;
        }
        true
    }

    fn draw_news(&self, frame: &mut Bitmap, now: &DateTime<Local>) -> bool {
        let Some(news) = self.state.news.as_ref().filter(|n| n.is_displayed_at(*now)) else {
            return false;
        };
        let (x, y, w, h) = self.content_area();
        frame.draw_over(&news.image().crop(0, 0, w, h), x, y);
        true
    }

    /// CPU glyphs stacked in an idle content panel.
    fn draw_instruments(&self, frame: &mut Bitmap) {
        let Some(cpu) = &self.state.cpu else {
            return;
        };
        let (x, mut y, _, h) = self.content_area();
        let bottom = y + h as i32;
        for glyph in [cpu.temp_glyph(), cpu.usage_glyph(), cpu.ram_glyph()] {
            if y + glyph.height() as i32 > bottom {
                break;
            }
            frame.draw_over(&glyph, x + 1, y);
            y += glyph.height() as i32 + 1;
        }
    }

    /// One frame at `now`, before experiment and folding.
    pub fn render(&mut self, now: &DateTime<Local>) -> Bitmap {
        let mut frame = (*self.background()).clone();
        self.draw_face(&mut frame, now);
        let playing = self.draw_player(&mut frame);
        // the player takes the weather strip too, unless weather sits in the face
        if !playing || self.geometry.compact {
            self.draw_weather(&mut frame);
        }
        let busy = playing || self.draw_transit(&mut frame) || self.draw_news(&mut frame, now);
        if self.geometry.full {
            self.draw_full_extras(&mut frame, now);
            if !busy {
                self.draw_instruments(&mut frame);
            }
        }
        frame
    }

    /// Rotation and the folded output.
    fn finish(&mut self, frame: Bitmap) -> Bitmap {
        let d = &self.state.config.display;
        let frame = if d.experiment {
            self.angle += EXPERIMENT_STEP * self.direction;
            if self.angle >= 360.0 {
                self.angle = 360.0;
                self.direction = -1.0;
            } else if self.angle <= 0.0 {
                self.angle = 0.0;
                self.direction = 1.0;
            }
            frame.rotate(self.angle)
        } else {
            frame
        };
        if !d.folding {
            return frame;
        }
        let (w, h) = frame.dimensions();
        let mut out = Bitmap::new(w * 2, h);
        out.copy_from(&frame, 0, 0);
        out.copy_from(&frame.rotate180(), w as i32, 0);
        out
    }

    /// Compose and present one frame.
    pub fn tick(&mut self, now: &DateTime<Local>) {
        let brightness = self.state.daylight.brightness();
        if self.brightness != Some(brightness) {
            info!("brightness {}", brightness);
            self.brightness = Some(brightness);
        }
        let frame = self.render(now);
        let frame = self.finish(frame);
        if let Err(e) = self.sink.present(&frame, brightness) {
            warn!("present failed: {e}");
        }
        self.frames += 1;
    }

    /// Tick on a fixed delay until cancelled, then close and hand back the sink.
    pub async fn run(mut self, token: CancellationToken) -> S {
        info!("compositor running, {:?} between frames", self.delay);
        loop {
            self.tick(&Local::now());
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.delay) => {}
            }
        }
        if let Err(e) = self.sink.close() {
            warn!("sink close failed: {e}");
        }
        info!("compositor stopped after {} frames", self.frames);
        self.sink
    }
}
