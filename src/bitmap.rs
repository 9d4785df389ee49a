/*
 *  bitmap.rs
 *
 *  RGBClock - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  Runtime sized RGBA bitmap, draw target and compositing helpers
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

use core::convert::Infallible;
use embedded_graphics::{
    geometry::{OriginDimensions, Size},
    mono_font::{iso_8859_1, MonoFont, MonoTextStyle},
    pixelcolor::Rgb888,
    prelude::*,
    primitives::{Line, PrimitiveStyle},
    text::{Baseline, Text},
};
use thiserror::Error;
use tiny_skia::{ColorU8, Pixmap};

use crate::color::Rgba;

#[derive(Debug, Error)]
pub enum BitmapError {
    #[error("invalid bitmap size {0}x{1}")]
    Size(u32, u32),
    #[error("png: {0}")]
    Png(String),
}

/// Runtime sized RGBA framebuffer; also an embedded-graphics draw target.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bitmap {
    buf: Vec<Rgba>,
    w: u32,
    h: u32,
}

impl Bitmap {
    pub fn new(width: u32, height: u32) -> Self {
        Self::filled(width, height, Rgba::TRANSPARENT)
    }

    pub fn filled(width: u32, height: u32, fill: Rgba) -> Self {
        Self {
            buf: vec![fill; width as usize * height as usize],
            w: width,
            h: height,
        }
    }

    pub fn width(&self) -> u32 { self.w }
    pub fn height(&self) -> u32 { self.h }
    pub fn dimensions(&self) -> (u32, u32) { (self.w, self.h) }

    /// Zero sized, the "nothing rendered yet" value.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[Rgba] { &self.buf }
    pub fn as_mut_slice(&mut self) -> &mut [Rgba] { &mut self.buf }

    /// True when no pixel has any coverage.
    pub fn is_blank(&self) -> bool {
        self.buf.iter().all(|p| p.a == 0)
    }

    pub fn clear_color(&mut self, color: Rgba) {
        self.buf.fill(color);
    }

    #[inline]
    fn idx(&self, x: i32, y: i32) -> Option<usize> {
        if x >= 0 && y >= 0 && (x as u32) < self.w && (y as u32) < self.h {
            Some(y as usize * self.w as usize + x as usize)
        } else {
            None
        }
    }

    /// Pixel at (x, y), transparent when out of bounds.
    pub fn pixel(&self, x: i32, y: i32) -> Rgba {
        self.idx(x, y).map(|i| self.buf[i]).unwrap_or_default()
    }

    pub fn set_pixel(&mut self, x: i32, y: i32, c: Rgba) {
        if let Some(i) = self.idx(x, y) {
            self.buf[i] = c;
        }
    }

    pub fn blend_pixel(&mut self, x: i32, y: i32, c: Rgba) {
        if let Some(i) = self.idx(x, y) {
            self.buf[i] = c.over(self.buf[i]);
        }
    }

    /// Alpha blend `src` with its top left at (x, y).
    pub fn draw_over(&mut self, src: &Bitmap, x: i32, y: i32) {
        for sy in 0..src.h as i32 {
            let dy = y + sy;
            if dy < 0 || dy >= self.h as i32 {
                continue;
            }
            for sx in 0..src.w as i32 {
                let dx = x + sx;
                if dx < 0 || dx >= self.w as i32 {
                    continue;
                }
                let s = src.buf[(sy as u32 * src.w + sx as u32) as usize];
                if s.a != 0 {
                    let i = (dy as u32 * self.w + dx as u32) as usize;
                    self.buf[i] = s.over(self.buf[i]);
                }
            }
        }
    }

    /// Replace pixels with `src` at (x, y), no blending.
    pub fn copy_from(&mut self, src: &Bitmap, x: i32, y: i32) {
        for sy in 0..src.h as i32 {
            for sx in 0..src.w as i32 {
                let c = src.buf[(sy as u32 * src.w + sx as u32) as usize];
                self.set_pixel(x + sx, y + sy, c);
            }
        }
    }

    /// Blend `src` so the anchor fraction (ax, ay) of it lands on (x, y).
    pub fn draw_anchored(&mut self, src: &Bitmap, x: i32, y: i32, ax: f32, ay: f32) {
        let ox = x - (ax * src.w as f32).round() as i32;
        let oy = y - (ay * src.h as f32).round() as i32;
        self.draw_over(src, ox, oy);
    }

    /// Copy of the (x, y, w, h) window; pixels outside the source are transparent.
    pub fn crop(&self, x: i32, y: i32, w: u32, h: u32) -> Bitmap {
        let mut out = Bitmap::new(w, h);
        for oy in 0..h as i32 {
            for ox in 0..w as i32 {
                let c = self.pixel(x + ox, y + oy);
                out.buf[(oy as u32 * w + ox as u32) as usize] = c;
            }
        }
        out
    }

    /// Rotate every row left by `n` columns, wrapping.
    pub fn shift_left_wrap(&mut self, n: u32) {
        if self.w == 0 {
            return;
        }
        let n = (n % self.w) as usize;
        if n == 0 {
            return;
        }
        for row in self.buf.chunks_mut(self.w as usize) {
            row.rotate_left(n);
        }
    }

    /// Rotate the rows up by `n`, wrapping.
    pub fn shift_up_wrap(&mut self, n: u32) {
        if self.h == 0 {
            return;
        }
        let n = (n % self.h) as usize;
        self.buf.rotate_left(n * self.w as usize);
    }

    pub fn flip_h(&self) -> Bitmap {
        let mut out = self.clone();
        for row in out.buf.chunks_mut(self.w.max(1) as usize) {
            row.reverse();
        }
        out
    }

    pub fn flip_v(&self) -> Bitmap {
        let mut out = Bitmap::new(self.w, self.h);
        let w = self.w as usize;
        for (y, row) in self.buf.chunks(w.max(1)).enumerate() {
            let dy = self.h as usize - 1 - y;
            out.buf[dy * w..dy * w + w].copy_from_slice(row);
        }
        out
    }

    pub fn rotate180(&self) -> Bitmap {
        let mut out = self.clone();
        out.buf.reverse();
        out
    }

    /// Rotate about the centre by `deg` (clockwise), same canvas size,
    /// nearest neighbour sampling.
    pub fn rotate(&self, deg: f32) -> Bitmap {
        let mut out = Bitmap::new(self.w, self.h);
        let (s, c) = deg.to_radians().sin_cos();
        let cx = self.w as f32 / 2.0;
        let cy = self.h as f32 / 2.0;
        for y in 0..self.h {
            for x in 0..self.w {
                let dx = x as f32 + 0.5 - cx;
                let dy = y as f32 + 0.5 - cy;
                // inverse map destination to source
                let sx = dx * c + dy * s + cx;
                let sy = -dx * s + dy * c + cy;
                let px = self.pixel(sx.floor() as i32, sy.floor() as i32);
                out.buf[(y * self.w + x) as usize] = px;
            }
        }
        out
    }

    /// Bilinear resize.
    pub fn resize(&self, width: u32, height: u32) -> Bitmap {
        if width == self.w && height == self.h {
            return self.clone();
        }
        let mut out = Bitmap::new(width, height);
        if self.is_empty() || width == 0 || height == 0 {
            return out;
        }
        let fx = self.w as f32 / width as f32;
        let fy = self.h as f32 / height as f32;
        for y in 0..height {
            let sy = ((y as f32 + 0.5) * fy - 0.5).max(0.0);
            let y0 = sy.floor() as i32;
            let y1 = (y0 + 1).min(self.h as i32 - 1);
            let ty = sy - y0 as f32;
            for x in 0..width {
                let sx = ((x as f32 + 0.5) * fx - 0.5).max(0.0);
                let x0 = sx.floor() as i32;
                let x1 = (x0 + 1).min(self.w as i32 - 1);
                let tx = sx - x0 as f32;
                let p00 = self.pixel(x0, y0);
                let p10 = self.pixel(x1, y0);
                let p01 = self.pixel(x0, y1);
                let p11 = self.pixel(x1, y1);
                let lerp = |a: u8, b: u8, c: u8, d: u8| -> u8 {
                    let top = a as f32 + (b as f32 - a as f32) * tx;
                    let bot = c as f32 + (d as f32 - c as f32) * tx;
                    (top + (bot - top) * ty).round().clamp(0.0, 255.0) as u8
                };
                out.buf[(y * width + x) as usize] = Rgba::new(
                    lerp(p00.r, p10.r, p01.r, p11.r),
                    lerp(p00.g, p10.g, p01.g, p11.g),
                    lerp(p00.b, p10.b, p01.b, p11.b),
                    lerp(p00.a, p10.a, p01.a, p11.a),
                );
            }
        }
        out
    }

    /// Blend a solid rectangle.
    pub fn fill_rect(&mut self, x: i32, y: i32, w: u32, h: u32, c: Rgba) {
        for yy in y..y + h as i32 {
            for xx in x..x + w as i32 {
                self.blend_pixel(xx, yy, c);
            }
        }
    }

    /// Stroke a line with embedded-graphics.
    pub fn line(&mut self, from: (i32, i32), to: (i32, i32), width: u32, c: Rgba) {
        let style = PrimitiveStyle::with_stroke(Rgb888::from(c), width);
        let _ = Line::new(Point::new(from.0, from.1), Point::new(to.0, to.1))
            .into_styled(style)
            .draw(self);
    }

    /// Stroke a clockwise arc from 12 o'clock through `sweep_deg`.
    pub fn arc(&mut self, cx: f32, cy: f32, r: f32, sweep_deg: f32, width: u32, c: Rgba) {
        let sweep = sweep_deg.clamp(0.0, 360.0);
        if sweep <= 0.0 {
            return;
        }
        let steps = (sweep / 3.0).ceil().max(1.0) as i32;
        let at = |deg: f32| {
            let (s, co) = deg.to_radians().sin_cos();
            ((cx + r * s).round() as i32, (cy - r * co).round() as i32)
        };
        let mut prev = at(0.0);
        for i in 1..=steps {
            let next = at(sweep * i as f32 / steps as f32);
            self.line(prev, next, width, c);
            prev = next;
        }
    }

    /// Draw text with its top left at (x, y).
    pub fn text(&mut self, text: &str, font: &MonoFont<'_>, color: Rgba, x: i32, y: i32) {
        let style = MonoTextStyle::new(font, Rgb888::from(color));
        let text = latin1(text);
        let _ = Text::with_baseline(&text, Point::new(x, y), style, Baseline::Top).draw(self);
    }

    /// Straight alpha from tiny-skia's premultiplied pixels.
    pub fn from_pixmap(pixmap: &Pixmap) -> Bitmap {
        let buf = pixmap
            .pixels()
            .iter()
            .map(|p| {
                let c = p.demultiply();
                Rgba::new(c.red(), c.green(), c.blue(), c.alpha())
            })
            .collect();
        Bitmap { buf, w: pixmap.width(), h: pixmap.height() }
    }

    pub fn to_pixmap(&self) -> Result<Pixmap, BitmapError> {
        let mut pixmap = Pixmap::new(self.w, self.h).ok_or(BitmapError::Size(self.w, self.h))?;
        for (dst, src) in pixmap.pixels_mut().iter_mut().zip(self.buf.iter()) {
            *dst = ColorU8::from_rgba(src.r, src.g, src.b, src.a).premultiply();
        }
        Ok(pixmap)
    }

    pub fn encode_png(&self) -> Result<Vec<u8>, BitmapError> {
        self.to_pixmap()?
            .encode_png()
            .map_err(|e| BitmapError::Png(e.to_string()))
    }

    pub fn decode_png(data: &[u8]) -> Result<Bitmap, BitmapError> {
        let pixmap = Pixmap::decode_png(data).map_err(|e| BitmapError::Png(e.to_string()))?;
        Ok(Bitmap::from_pixmap(&pixmap))
    }
}

impl OriginDimensions for Bitmap {
    fn size(&self) -> Size {
        Size::new(self.w, self.h)
    }
}

impl DrawTarget for Bitmap {
    type Color = Rgb888;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(p, c) in pixels {
            if let Some(i) = self.idx(p.x, p.y) {
                self.buf[i] = Rgba::from(c);
            }
        }
        Ok(())
    }

    fn clear(&mut self, color: Self::Color) -> Result<(), Self::Error> {
        self.clear_color(Rgba::from(color));
        Ok(())
    }
}

/// Glyphs outside latin-1 that show up in track metadata and our own labels.
fn latin1(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '•' => '·',
            '‘' | '’' => '\'',
            '“' | '”' => '"',
            '–' | '—' => '-',
            '…' => '~',
            c if (c as u32) < 256 => c,
            _ => '?',
        })
        .collect()
}

/// Pixel advance of one character.
pub fn char_advance(font: &MonoFont<'_>) -> u32 {
    font.character_size.width + font.character_spacing
}

/// Width of `text` in `font`.
pub fn measure(text: &str, font: &MonoFont<'_>) -> u32 {
    text.chars().count() as u32 * char_advance(font)
}

/// Configured font names to the latin-1 mono fonts.
pub fn font_by_name(name: &str) -> &'static MonoFont<'static> {
    match name {
        "4x6" => &iso_8859_1::FONT_4X6,
        "5x7" => &iso_8859_1::FONT_5X7,
        "5x8" => &iso_8859_1::FONT_5X8,
        "6x9" => &iso_8859_1::FONT_6X9,
        "6x12" => &iso_8859_1::FONT_6X12,
        "6x13" => &iso_8859_1::FONT_6X13,
        "7x13" => &iso_8859_1::FONT_7X13,
        "7x14" => &iso_8859_1::FONT_7X14,
        "8x13" => &iso_8859_1::FONT_8X13,
        "9x15" => &iso_8859_1::FONT_9X15,
        "10x20" => &iso_8859_1::FONT_10X20,
        _ => &iso_8859_1::FONT_6X10,
    }
}
