/*
 *  icon_cache.rs
 *
 *  RGBClock - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  Last known good bitmap for one semantic icon slot
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

use log::{debug, error, warn};
use std::sync::{Arc, Mutex};

use crate::bitmap::Bitmap;
use crate::guard;
use crate::icons::IconMap;
use crate::rasterizer::Rasterizer;

#[derive(Default)]
struct Slot {
    key: String,
    bitmap: Arc<Bitmap>,
}

/// One icon slot (main weather icon, wind direction, volume glyph...).
///
/// The bitmap is always the full rendering of `key`, or both are empty.
/// Readers never see a half written pair: lookup, rasterize and commit all
/// happen under the one lock.
pub struct IconCache {
    name: &'static str,
    slot: Mutex<Slot>,
    map: Arc<IconMap>,
    rasterizer: Arc<dyn Rasterizer>,
}

impl IconCache {
    pub fn new(name: &'static str, map: Arc<IconMap>, rasterizer: Arc<dyn Rasterizer>) -> Self {
        Self {
            name,
            slot: Mutex::new(Slot::default()),
            map,
            rasterizer,
        }
    }

    /// Make the slot hold `key`, rendering only when the key changed.
    pub fn ensure(&self, key: &str, scale: Option<f32>, color: Option<&str>) -> Arc<Bitmap> {
        let mut slot = guard::lock(&self.slot);
        if !slot.key.is_empty() && slot.key == key {
            return slot.bitmap.clone();
        }

        let desc = self.map.resolve(key).with_overrides(scale, color);
        let bitmap = match self.rasterizer.rasterize(&desc) {
            Ok(b) => b,
            Err(e) => {
                warn!("{}: icon {key:?} failed ({e}), using placeholder", self.name);
                let fallback = self.map.unknown().clone().with_overrides(scale, None);
                match self.rasterizer.rasterize(&fallback) {
                    Ok(b) => b,
                    Err(e) => {
                        error!("{}: placeholder failed too: {e}", self.name);
                        Bitmap::new(desc.width, desc.height)
                    }
                }
            }
        };
        debug!("{}: {:?} -> {:?}", self.name, slot.key, key);
        slot.key = key.to_string();
        slot.bitmap = Arc::new(bitmap);
        slot.bitmap.clone()
    }

    /// Current bitmap, empty until the first `ensure`.
    pub fn image(&self) -> Arc<Bitmap> {
        guard::lock(&self.slot).bitmap.clone()
    }

    pub fn key(&self) -> String {
        guard::lock(&self.slot).key.clone()
    }

    /// Forget the key so the next `ensure` re-renders; the old bitmap stays
    /// visible until then.
    pub fn invalidate(&self) {
        guard::lock(&self.slot).key.clear();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::color::Rgba;
    use crate::icons::IconDescriptor;
    use crate::rasterizer::RasterError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts invocations, fills the canvas with a colour derived from the asset.
    #[derive(Default)]
    pub struct CountingRasterizer {
        pub calls: AtomicUsize,
        pub seen: Mutex<Vec<IconDescriptor>>,
        pub fail_assets: Vec<String>,
    }

    impl CountingRasterizer {
        pub fn failing(assets: &[&str]) -> Self {
            Self {
                fail_assets: assets.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Rasterizer for CountingRasterizer {
        fn rasterize(&self, d: &IconDescriptor) -> Result<Bitmap, RasterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(d.clone());
            if self.fail_assets.contains(&d.asset) {
                return Err(RasterError::Svg(format!("no {}", d.asset)));
            }
            let shade = d.asset.bytes().fold(0u8, |a, b| a.wrapping_add(b));
            Ok(Bitmap::filled(d.width, d.height, Rgba::rgb(shade, 255 - shade, 1)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::CountingRasterizer;
    use super::*;
    use crate::config::IconConfig;

    fn cache(r: Arc<CountingRasterizer>) -> IconCache {
        IconCache::new("test", Arc::new(IconMap::new(&IconConfig::default())), r)
    }

    #[test]
    fn ensure_is_idempotent_per_key() {
        let r = Arc::new(CountingRasterizer::default());
        let c = cache(r.clone());
        assert!(c.image().is_empty());
        let a = c.ensure("volume-3", None, None);
        let b = c.ensure("volume-3", None, None);
        assert_eq!(r.calls(), 1);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(c.key(), "volume-3");
    }

    #[test]
    fn key_switch_with_scale_override_renders_once() {
        let r = Arc::new(CountingRasterizer::default());
        let c = cache(r.clone());
        c.ensure("icon-32", None, None);
        let before = r.calls();
        let base = IconMap::new(&IconConfig::default()).get("icon-5").unwrap().clone();

        let img = c.ensure("icon-5", Some(0.5), Some(""));
        assert_eq!(r.calls(), before + 1);
        let seen = r.seen.lock().unwrap().last().unwrap().clone();
        assert_eq!(seen.width, (base.width as f32 * 0.5).round() as u32);
        assert_eq!(seen.height, (base.height as f32 * 0.5).round() as u32);
        assert_eq!(img.width(), seen.width);

        for _ in 0..5 {
            c.ensure("icon-5", Some(0.5), Some(""));
        }
        assert_eq!(r.calls(), before + 1);
    }

    #[test]
    fn failure_falls_back_to_placeholder_and_commits_key() {
        let r = Arc::new(CountingRasterizer::failing(&["wi-rain-mix"]));
        let c = cache(r.clone());
        let img = c.ensure("icon-5", None, None);
        assert_eq!(r.calls(), 2);
        assert_eq!(r.seen.lock().unwrap()[1].asset, "wi-alien");
        assert!(!img.is_empty());
        c.ensure("icon-5", None, None);
        assert_eq!(r.calls(), 2);
    }

    #[test]
    fn double_failure_stores_empty_canvas_of_descriptor_size() {
        let r = Arc::new(CountingRasterizer::failing(&["wi-rain-mix", "wi-alien"]));
        let c = cache(r.clone());
        let img = c.ensure("icon-5", None, None);
        assert_eq!(img.dimensions(), (27, 27));
        assert!(img.is_blank());
        assert_eq!(c.key(), "icon-5");
    }

    #[test]
    fn invalidate_forces_rerender_but_keeps_image() {
        let r = Arc::new(CountingRasterizer::default());
        let c = cache(r.clone());
        c.ensure("moon-4", None, None);
        c.invalidate();
        assert!(!c.image().is_empty());
        c.ensure("moon-4", None, None);
        assert_eq!(r.calls(), 2);
    }

    #[test]
    fn concurrent_readers_see_matching_key_and_bitmap() {
        let r = Arc::new(CountingRasterizer::default());
        let c = Arc::new(cache(r));
        let keys = ["volume-0", "icon-12", "moon-2"];
        let expect: Vec<(u32, u32)> = keys
            .iter()
            .map(|k| {
                let d = IconMap::new(&IconConfig::default()).resolve(k);
                (d.width, d.height)
            })
            .collect();

        let writer = {
            let c = c.clone();
            std::thread::spawn(move || {
                for i in 0..300 {
                    c.ensure(keys[i % 3], None, None);
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let c = c.clone();
                let expect = expect.clone();
                std::thread::spawn(move || {
                    for _ in 0..300 {
                        let img = c.image();
                        if !img.is_empty() {
                            assert!(expect.contains(&img.dimensions()));
                        }
                    }
                })
            })
            .collect();
        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
    }
}
