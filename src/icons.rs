/*
 *  icons.rs
 *
 *  RGBClock - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  Semantic icon keys to SVG asset descriptors
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

use log::warn;
use std::collections::HashMap;

use crate::config::IconConfig;

pub const WIND_DEG_ASSET: &str = "wic-wind-deg";

const WIND_COLOR: &str = "#66ff99";
const GLYPH_COLOR: &str = "#ff9900";

/// How an icon is composed before rasterizing. Each variant layers on the
/// one below it: pop draws a halo under a shadowed icon, blurred adds a glow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RenderVariant {
    Plain,
    ScaledRotated,
    Shadowed,
    Blurred,
    PopHighlight,
}

impl RenderVariant {
    pub fn select(pop: bool, blur: bool, shadow: bool, scale: f32, rotate: f32) -> Self {
        if pop {
            RenderVariant::PopHighlight
        } else if blur {
            RenderVariant::Blurred
        } else if shadow {
            RenderVariant::Shadowed
        } else if (scale - 1.0).abs() > f32::EPSILON || rotate != 0.0 {
            RenderVariant::ScaledRotated
        } else {
            RenderVariant::Plain
        }
    }
}

/// Everything the rasterizer needs to render one icon.
#[derive(Clone, Debug, PartialEq)]
pub struct IconDescriptor {
    pub asset: String,
    pub width: u32,
    pub height: u32,
    pub scale: f32,
    pub rotate: f32,
    pub alpha: f32,
    pub color: String,
    pub pop_color: Option<String>,
    pub variant: RenderVariant,
    /// Use the asset document verbatim, scaled to fit.
    pub as_is: bool,
}

impl IconDescriptor {
    pub fn new(asset: &str, color: &str, size: u32, scale: f32, alpha: f32) -> Self {
        Self {
            asset: asset.to_string(),
            width: size,
            height: size,
            scale,
            rotate: 0.0,
            alpha,
            color: color.to_string(),
            pop_color: None,
            variant: RenderVariant::select(false, false, false, scale, 0.0),
            as_is: false,
        }
    }

    fn rotated(mut self, deg: f32) -> Self {
        self.rotate = deg;
        if self.variant == RenderVariant::Plain && deg != 0.0 {
            self.variant = RenderVariant::ScaledRotated;
        }
        self
    }

    fn shadow(mut self) -> Self {
        if matches!(self.variant, RenderVariant::Plain | RenderVariant::ScaledRotated) {
            self.variant = RenderVariant::Shadowed;
        }
        self
    }

    fn blur(mut self) -> Self {
        if self.variant != RenderVariant::PopHighlight {
            self.variant = RenderVariant::Blurred;
        }
        self
    }

    fn pop(mut self, color: &str) -> Self {
        self.pop_color = Some(color.to_string());
        self.variant = RenderVariant::PopHighlight;
        self
    }

    /// Shrink or grow the canvas and the glyph together.
    pub fn scaled(mut self, factor: f32) -> Self {
        self.width = ((self.width as f32 * factor).round() as u32).max(1);
        self.height = ((self.height as f32 * factor).round() as u32).max(1);
        self.scale *= factor;
        if self.variant == RenderVariant::Plain && (factor - 1.0).abs() > f32::EPSILON {
            self.variant = RenderVariant::ScaledRotated;
        }
        self
    }

    /// Apply the optional per call overrides.
    pub fn with_overrides(self, scale: Option<f32>, color: Option<&str>) -> Self {
        let mut d = match scale {
            Some(s) if s > 0.0 => self.scaled(s),
            _ => self,
        };
        if let Some(c) = color.filter(|c| !c.is_empty()) {
            d.color = c.to_string();
        }
        d
    }
}

/// Icon key table built from the configured main and wind icon geometry.
#[derive(Clone, Debug)]
pub struct IconMap {
    icons: HashMap<String, IconDescriptor>,
    unknown: IconDescriptor,
}

impl IconMap {
    pub fn new(cfg: &IconConfig) -> Self {
        let (mw, ms, ma) = (cfg.main.width, cfg.main.scale, cfg.main.alpha);
        let (ww, ws, wa) = (cfg.wind.width, cfg.wind.scale, cfg.wind.alpha);
        let mut icons = HashMap::new();
        let mut put = |k: &str, d: IconDescriptor| {
            icons.insert(k.to_string(), d);
        };

        // weather glyphs, indexed by condition code
        const WEATHER: [(&str, &str); 48] = [
            ("wi-tornado", "red"), ("wi-tornado", "red"), ("wi-hurricane", "red"),
            ("wi-thunderstorm", "linen"), ("wi-lightning", "linen"), ("wi-rain-mix", "linen"),
            ("wi-rain-mix", "linen"), ("wi-day-sleet-storm", "linen"), ("wi-day-sleet", "linen"),
            ("wi-sprinkle", "linen"), ("wi-rain-wind", "linen"), ("wi-sprinkle", "linen"),
            ("wi-rain", "linen"), ("wi-day-snow-wind", "linen"), ("wi-day-snow", "linen"),
            ("wi-snow-wind", "linen"), ("wi-snow", "linen"), ("wi-day-hail", "linen"),
            ("wi-sleet", "linen"), ("wi-dust", "linen"), ("wi-fog", "linen"),
            ("wi-haze", "linen"), ("wi-smoke", "linen"), ("wi-windy", "linen"),
            ("wi-windy", "linen"), ("wi-cloudy", "linen"), ("wi-cloudy", "linen"),
            ("wi-night-cloudy", "linen"), ("wi-cloudy", "linen"), ("wi-night-partly-cloudy", "linen"),
            ("wi-day-cloudy", "linen"), ("wi-night-clear", "linen"), ("wi-day-sunny", "yellow"),
            ("wi-night-clear", "linen"), ("wi-day-sunny", "yellow"), ("wi-hail", "linen"),
            ("wi-hot", "yellow"), ("wi-thunderstorm", "linen"), ("wi-storm-showers", "linen"),
            ("wi-rain", "linen"), ("wi-rain", "linen"), ("wi-snowflake-cold", "linen"),
            ("wi-snow", "linen"), ("wi-snow-wind", "linen"), ("wi-day-cloudy", "linen"),
            ("wi-night-thunderstorm", "linen"), ("wi-night-snow", "linen"), ("wi-night-thunderstorm", "linen"),
        ];
        for (i, (asset, color)) in WEATHER.iter().enumerate() {
            let d = IconDescriptor::new(asset, color, mw, ms, ma).shadow();
            // sunny gets a halo
            let d = if i == 32 { d.pop("yellow") } else { d };
            put(&format!("icon-{i}"), d);
        }

        for b in 0..=12 {
            let color = match b {
                0..=4 => "yellowgreen",
                5..=8 => "darkorange",
                _ => "crimson",
            };
            put(
                &format!("wind-{b}"),
                IconDescriptor::new(&format!("wi-wind-beaufort-{b}"), color, mw, ms, ma).shadow(),
            );
        }

        // the arrow asset points south at 0 degrees
        const COMPASS: [&str; 16] = [
            "S", "SSW", "SW", "WSW", "W", "WNW", "NW", "NNW",
            "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE",
        ];
        for (i, dir) in COMPASS.iter().enumerate() {
            put(
                &format!("wind-{dir}"),
                IconDescriptor::new(WIND_DEG_ASSET, WIND_COLOR, ww, ws, wa)
                    .rotated(i as f32 * 22.5)
                    .shadow(),
            );
        }

        const MOON: [&str; 9] = [
            "wi-moon-alt-new", "wi-moon-alt-waxing-crescent-5", "wi-moon-alt-first-quarter",
            "wi-moon-alt-waxing-gibbous-5", "wi-moon-alt-full", "wi-moon-alt-waning-gibbous-5",
            "wi-moon-alt-third-quarter", "wi-moon-alt-waning-crescent-5", "wi-moon-alt-new",
        ];
        for (i, asset) in MOON.iter().enumerate() {
            put(&format!("moon-{i}"), IconDescriptor::new(asset, "bisque", 24, 0.6, 1.0).shadow());
        }

        for (k, asset) in [("brolly", "wi-umbrella"), ("humidity", "wi-humidity"), ("snowflake", "wi-snowflake-cold")] {
            put(k, IconDescriptor::new(asset, WIND_COLOR, ww, ws * 1.2, 1.0).shadow());
        }

        put("Rapid Transit", IconDescriptor::new("mbta-t-train", "red", 30, 1.0, 1.0).shadow());
        put("Commuter Rail", IconDescriptor::new("mbta-commuter", "purple", 30, 1.0, 1.0).shadow());
        put("Local Bus", IconDescriptor::new("mbta-bus", "silver", 30, 1.0, 1.0));
        put("The Ride", IconDescriptor::new("mbta-the-ride", "#52bbc5", 30, 1.0, 1.0));
        put("Ferry", IconDescriptor::new("mbta-ferry", "#008eaa", 30, 1.0, 1.0));

        put("corner-scroll", IconDescriptor::new("cscroll", "#ffcc0008", 60, 1.0, 0.25));
        put("alt-corner-scroll", IconDescriptor::new("cscroll2", "#d4af3708", 60, 1.0, 0.35));
        put("global", IconDescriptor::new("global", "#fffffc", 192, 1.0, 0.025).shadow().blur());

        for n in 0..=4 {
            put(&format!("volume-{n}"), IconDescriptor::new(&format!("volume-{n}"), GLYPH_COLOR, 60, 1.0, 0.9));
        }
        put("volume-mute", IconDescriptor::new("volume-mute", "orangered", 60, 1.0, 0.9));
        put("repeat-1", IconDescriptor::new("repeat-one", GLYPH_COLOR, 50, 1.0, 0.9));
        put("repeat-2", IconDescriptor::new("repeat-all", GLYPH_COLOR, 50, 1.0, 0.9));
        put("shuffle-1", IconDescriptor::new("shuffle-song", GLYPH_COLOR, 50, 1.0, 0.9));
        put("shuffle-2", IconDescriptor::new("shuffle-album", GLYPH_COLOR, 50, 1.0, 0.9));

        put("cpu-temp", IconDescriptor::new("wi-thermometer", "orangered", 30, 1.0, 1.0));
        put("cpu-metrics", IconDescriptor::new("cpu", "#0099ff", 30, 1.0, 1.0));
        put("ram-metrics", IconDescriptor::new("ram", "#66ff99", 30, 1.0, 1.0));

        Self {
            icons,
            unknown: IconDescriptor::new("wi-alien", "red", mw, 1.0, 1.0),
        }
    }

    /// Replace or add a key, used for skin specific glyphs.
    pub fn insert(&mut self, key: &str, desc: IconDescriptor) {
        self.icons.insert(key.to_string(), desc);
    }

    pub fn get(&self, key: &str) -> Option<&IconDescriptor> {
        self.icons.get(key)
    }

    /// Descriptor for `key`, the placeholder when the key is not mapped.
    pub fn resolve(&self, key: &str) -> IconDescriptor {
        match self.icons.get(key) {
            Some(d) => d.clone(),
            None => {
                warn!("icon {key:?} not mapped, using placeholder");
                self.unknown.clone()
            }
        }
    }

    pub fn unknown(&self) -> &IconDescriptor {
        &self.unknown
    }

    pub fn len(&self) -> usize {
        self.icons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.icons.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> IconMap {
        IconMap::new(&IconConfig::default())
    }

    #[test]
    fn table_covers_the_key_families() {
        let m = map();
        for k in ["icon-0", "icon-47", "wind-12", "wind-NNW", "moon-8", "brolly", "Ferry",
                  "global", "volume-mute", "shuffle-2", "ram-metrics"] {
            assert!(m.get(k).is_some(), "{k} missing");
        }
        assert!(m.get("icon-48").is_none());
    }

    #[test]
    fn compass_rotations_match_the_arrow_asset() {
        let m = map();
        assert_eq!(m.get("wind-N").unwrap().rotate, 180.0);
        assert_eq!(m.get("wind-NNE").unwrap().rotate, 202.5);
        assert_eq!(m.get("wind-S").unwrap().rotate, 0.0);
        assert_eq!(m.get("wind-NNW").unwrap().rotate, 157.5);
        assert_eq!(m.get("wind-E").unwrap().asset, WIND_DEG_ASSET);
    }

    #[test]
    fn variants_follow_priority() {
        let m = map();
        assert_eq!(m.get("icon-32").unwrap().variant, RenderVariant::PopHighlight);
        assert_eq!(m.get("global").unwrap().variant, RenderVariant::Blurred);
        assert_eq!(m.get("icon-5").unwrap().variant, RenderVariant::Shadowed);
        assert_eq!(m.get("Ferry").unwrap().variant, RenderVariant::Plain);
        assert_eq!(m.get("corner-scroll").unwrap().variant, RenderVariant::Plain);
        assert_eq!(
            RenderVariant::select(false, false, false, 0.5, 0.0),
            RenderVariant::ScaledRotated
        );
    }

    #[test]
    fn overrides_scale_geometry_and_color() {
        let m = map();
        let base = m.get("icon-5").unwrap().clone();
        let d = base.clone().with_overrides(Some(0.5), Some("#ff0000"));
        assert_eq!(d.width, ((base.width as f32) * 0.5).round() as u32);
        assert_eq!(d.height, d.width);
        assert!((d.scale - base.scale * 0.5).abs() < 1e-6);
        assert_eq!(d.color, "#ff0000");
        let same = base.clone().with_overrides(None, Some(""));
        assert_eq!(same, base);
    }

    #[test]
    fn unknown_key_resolves_to_placeholder() {
        let m = map();
        let d = m.resolve("icon-999");
        assert_eq!(d.asset, "wi-alien");
        assert_eq!(d.color, "red");
    }
}
