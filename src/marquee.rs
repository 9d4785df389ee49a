/*
 *  marquee.rs
 *
 *  RGBClock - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  Scrolling label, graphical (pixel shift) or text (char rotate)
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

use embedded_graphics::mono_font::MonoFont;
use log::{debug, info};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::bitmap::{char_advance, font_by_name, measure, Bitmap};
use crate::color::Rgba;
use crate::guard;

/// Shared state for the label and its ticker task.
struct LabelState {
    text: String,
    graphical: bool,
    max_visible: usize,
    velocity: u32,
    font: &'static MonoFont<'static>,
    color: Rgba,
    /// text plus a leading and trailing space, rendered once per text
    wide: Bitmap,
    /// " " + text, rotated in text mode
    buffer: Vec<char>,
}

impl LabelState {
    fn scrolls(&self) -> bool {
        self.text.chars().count() > self.max_visible
    }

    fn regenerate(&mut self) {
        if self.graphical {
            let space = measure(" ", self.font);
            let w = measure(&self.text, self.font) + 2 * space;
            let h = self.font.character_size.height + 2;
            let mut wide = Bitmap::new(w, h);
            wide.text(&self.text, self.font, self.color, space as i32, 1);
            self.wide = wide;
            self.buffer.clear();
        } else {
            self.buffer = std::iter::once(' ').chain(self.text.chars()).collect();
            self.wide = Bitmap::default();
        }
    }

    fn tick(&mut self) {
        if !self.scrolls() {
            return;
        }
        if self.graphical {
            self.wide.shift_left_wrap(self.velocity);
        } else if !self.buffer.is_empty() {
            self.buffer.rotate_left(1);
        }
    }

    fn window_width(&self) -> u32 {
        (self.max_visible as u32 * char_advance(self.font)).min(self.wide.width())
    }
}

/// A label that marquee scrolls when its text is longer than `max_visible`.
pub struct ScrollingLabel {
    name: String,
    tick_interval: Duration,
    state: Arc<Mutex<LabelState>>,
    ticker: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl ScrollingLabel {
    pub fn new(
        name: &str,
        graphical: bool,
        max_visible: usize,
        velocity: u32,
        tick_interval: Duration,
    ) -> Self {
        let state = LabelState {
            text: String::new(),
            graphical,
            max_visible,
            velocity: velocity.max(1),
            font: font_by_name("7x13"),
            color: Rgba::WHITE,
            wide: Bitmap::default(),
            buffer: Vec::new(),
        };
        Self {
            name: name.to_string(),
            tick_interval,
            state: Arc::new(Mutex::new(state)),
            ticker: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replace the text; a no-op when unchanged. Regeneration and the offset
    /// reset happen together under the lock.
    pub fn set_text(&self, text: &str) {
        let mut s = guard::lock(&self.state);
        if s.text == text {
            return;
        }
        debug!("{} text {:?}", self.name, text);
        s.text = text.to_string();
        s.regenerate();
    }

    pub fn text(&self) -> String {
        guard::lock(&self.state).text.clone()
    }

    pub fn set_max_visible(&self, n: usize) {
        let mut s = guard::lock(&self.state);
        if s.max_visible != n {
            s.max_visible = n;
            // restart the scroll from the top
            s.regenerate();
        }
    }

    pub fn set_style(&self, font: &'static MonoFont<'static>, color: Rgba) {
        let mut s = guard::lock(&self.state);
        if !std::ptr::eq(s.font, font) || s.color != color {
            s.font = font;
            s.color = color;
            if s.graphical {
                s.regenerate();
            }
        }
    }

    /// One scroll step, a no-op when the text fits.
    pub fn tick(&self) {
        guard::lock(&self.state).tick();
    }

    /// Visible window of the graphical rendering.
    pub fn image(&self) -> Bitmap {
        let s = guard::lock(&self.state);
        if s.wide.is_empty() {
            return Bitmap::default();
        }
        if !s.scrolls() {
            return s.wide.clone();
        }
        s.wide.crop(0, 0, s.window_width(), s.wide.height())
    }

    /// The whole rotated canvas.
    pub fn wide_image(&self) -> Bitmap {
        guard::lock(&self.state).wide.clone()
    }

    /// Visible window of the text buffer.
    pub fn display(&self) -> String {
        let s = guard::lock(&self.state);
        if !s.scrolls() {
            return s.text.clone();
        }
        s.buffer.iter().take(s.max_visible).collect()
    }

    pub fn is_active(&self) -> bool {
        guard::lock(&self.ticker)
            .as_ref()
            .is_some_and(|(_, h)| !h.is_finished())
    }

    /// Spawn the ticker if it's not already running. Needs a tokio runtime.
    pub fn start(&self) {
        let mut ticker = guard::lock(&self.ticker);
        if ticker.as_ref().is_some_and(|(_, h)| !h.is_finished()) {
            debug!("{} ticker already running", self.name);
            return;
        }
        let token = CancellationToken::new();
        let child = token.clone();
        let state = self.state.clone();
        let name = self.name.clone();
        let every = self.tick_interval;
        let handle = tokio::spawn(async move {
            let mut tick = interval(every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick is immediate
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = tick.tick() => guard::lock(&state).tick(),
                }
            }
            info!("{} ticker exiting", name);
        });
        *ticker = Some((token, handle));
    }

    /// Cancel the ticker; never waits on it.
    pub fn stop(&self) {
        if let Some((token, _handle)) = guard::lock(&self.ticker).take() {
            token.cancel();
            debug!("{} ticker cancelled", self.name);
        }
    }
}

impl Drop for ScrollingLabel {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(graphical: bool, max: usize) -> ScrollingLabel {
        ScrollingLabel::new("test", graphical, max, 1, Duration::from_millis(100))
    }

    #[test]
    fn static_text_never_moves() {
        let l = label(true, 22);
        l.set_text("short");
        let before = l.wide_image();
        for _ in 0..50 {
            l.tick();
        }
        assert_eq!(l.wide_image(), before);
        assert_eq!(l.image(), before);

        let t = label(false, 22);
        t.set_text("short");
        t.tick();
        assert_eq!(t.display(), "short");
    }

    #[test]
    fn graphical_full_cycle_returns_to_start() {
        let l = label(true, 4);
        l.set_text("a long marquee title");
        let start = l.wide_image();
        let cycle = start.width();
        for _ in 0..cycle - 1 {
            l.tick();
        }
        assert_ne!(l.wide_image(), start);
        l.tick();
        assert_eq!(l.wide_image(), start);
    }

    #[test]
    fn text_full_cycle_returns_to_start() {
        let l = label(false, 3);
        l.set_text("abcdef");
        assert_eq!(l.display(), " ab");
        l.tick();
        assert_eq!(l.display(), "abc");
        // " abcdef" is seven characters
        for _ in 0..6 {
            l.tick();
        }
        assert_eq!(l.display(), " ab");
    }

    #[test]
    fn window_is_sub_rectangle_of_wide() {
        let l = label(true, 5);
        l.set_text("scrolling along");
        let win = l.image();
        let wide = l.wide_image();
        assert_eq!(win.height(), wide.height());
        assert_eq!(win.width(), 5 * char_advance(font_by_name("7x13")));
        assert_eq!(win, wide.crop(0, 0, win.width(), win.height()));
    }

    #[test]
    fn set_text_resets_offset() {
        let l = label(true, 2);
        l.set_text("first text");
        let fresh = l.wide_image();
        l.tick();
        l.set_text("other text");
        l.set_text("first text");
        assert_eq!(l.wide_image(), fresh);
    }

    #[test]
    fn set_text_same_is_noop() {
        let l = label(true, 2);
        l.set_text("hello there");
        l.tick();
        let moved = l.wide_image();
        l.set_text("hello there");
        assert_eq!(l.wide_image(), moved);
    }

    #[test]
    fn max_visible_change_regenerates() {
        let l = label(false, 2);
        l.set_text("abcd");
        l.tick();
        l.set_max_visible(10);
        assert_eq!(l.display(), "abcd");
        l.set_max_visible(2);
        assert_eq!(l.display(), " a");
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_scrolls_and_stops() {
        let l = label(false, 2);
        l.set_text("abcdef");
        l.start();
        l.start();
        assert!(l.is_active());
        tokio::time::sleep(Duration::from_millis(350)).await;
        let shown = l.display();
        assert_ne!(shown, " a");
        l.stop();
        l.stop();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!l.is_active());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(l.display(), shown);
    }
}
