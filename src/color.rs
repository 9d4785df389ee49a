/*
 *  color.rs
 *
 *  RGBClock - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  RGBA pixel and hex colour parsing
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

use embedded_graphics::pixelcolor::{Rgb888, RgbColor};

/// Straight (non premultiplied) RGBA pixel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const TRANSPARENT: Rgba = Rgba::new(0, 0, 0, 0);
    pub const BLACK: Rgba = Rgba::rgb(0, 0, 0);
    pub const WHITE: Rgba = Rgba::rgb(255, 255, 255);
    pub const RED: Rgba = Rgba::rgb(255, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn with_alpha(self, a: u8) -> Self {
        Self { a, ..self }
    }

    /// Parse `#rgb`, `#rrggbb` or `#rrggbbaa`, leading `#` optional.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let h = hex.trim().trim_start_matches('#');
        let nib = |i: usize| u8::from_str_radix(h.get(i..i + 1)?, 16).ok();
        let byte = |i: usize| u8::from_str_radix(h.get(i..i + 2)?, 16).ok();
        match h.len() {
            3 => Some(Rgba::rgb(nib(0)? * 17, nib(1)? * 17, nib(2)? * 17)),
            6 => Some(Rgba::rgb(byte(0)?, byte(2)?, byte(4)?)),
            8 => Some(Rgba::new(byte(0)?, byte(2)?, byte(4)?, byte(6)?)),
            _ => None,
        }
    }

    /// Lenient parse used for configured colours, white when unparsable.
    pub fn from_hex_or_white(hex: &str) -> Self {
        Self::from_hex(hex).unwrap_or(Rgba::WHITE)
    }

    pub fn is_transparent(&self) -> bool {
        self.a == 0
    }

    /// Source-over `self` onto `dst`.
    #[inline]
    pub fn over(self, dst: Rgba) -> Rgba {
        match self.a {
            0 => dst,
            255 => self,
            sa => {
                let sa = sa as u32;
                let da = dst.a as u32;
                // out alpha scaled by 255
                let oa = sa * 255 + da * (255 - sa);
                if oa == 0 {
                    return Rgba::TRANSPARENT;
                }
                let mix = |s: u8, d: u8| -> u8 {
                    ((s as u32 * sa * 255 + d as u32 * da * (255 - sa)) / oa) as u8
                };
                Rgba::new(
                    mix(self.r, dst.r),
                    mix(self.g, dst.g),
                    mix(self.b, dst.b),
                    ((oa + 127) / 255) as u8,
                )
            }
        }
    }

    /// Scale colour channels by `level` percent (brightness).
    pub fn scaled(self, level: u8) -> Rgba {
        let l = level.min(100) as u32;
        let s = |c: u8| ((c as u32 * l) / 100) as u8;
        Rgba::new(s(self.r), s(self.g), s(self.b), self.a)
    }
}

impl From<Rgb888> for Rgba {
    fn from(c: Rgb888) -> Self {
        Rgba::rgb(c.r(), c.g(), c.b())
    }
}

impl From<Rgba> for Rgb888 {
    fn from(c: Rgba) -> Self {
        Rgb888::new(c.r, c.g, c.b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_short_long_and_alpha_forms() {
        assert_eq!(Rgba::from_hex("#f00"), Some(Rgba::rgb(255, 0, 0)));
        assert_eq!(Rgba::from_hex("0099ff"), Some(Rgba::rgb(0, 0x99, 0xff)));
        assert_eq!(Rgba::from_hex("#56ccf240"), Some(Rgba::new(0x56, 0xcc, 0xf2, 0x40)));
        assert_eq!(Rgba::from_hex("#12345"), None);
        assert_eq!(Rgba::from_hex("#zzz"), None);
    }

    #[test]
    fn over_respects_extremes() {
        let dst = Rgba::rgb(10, 20, 30);
        assert_eq!(Rgba::TRANSPARENT.over(dst), dst);
        assert_eq!(Rgba::RED.over(dst), Rgba::RED);
        let half = Rgba::new(255, 255, 255, 128).over(Rgba::BLACK);
        assert_eq!(half.a, 255);
        assert!(half.r > 120 && half.r < 135);
    }

    #[test]
    fn brightness_scales_channels() {
        assert_eq!(Rgba::rgb(200, 100, 50).scaled(50), Rgba::rgb(100, 50, 25));
        assert_eq!(Rgba::WHITE.scaled(250), Rgba::WHITE);
    }
}
