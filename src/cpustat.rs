/*
 *  cpustat.rs
 *
 *  RGBClock - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  CPU load, temperature and free memory glyphs
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
//! Machine metrics gathered from /proc and /sys.

use embedded_graphics::mono_font::MonoFont;
use log::debug;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::bitmap::{font_by_name, measure, Bitmap};
use crate::color::Rgba;
use crate::guard;
use crate::icon_cache::IconCache;
use crate::icons::IconMap;
use crate::rasterizer::Rasterizer;
use crate::source::{PeriodicSource, PollOutcome, SourceError};

pub const CPU_PERIOD: Duration = Duration::from_secs(2);

/// Where the numbers come from; tests point these at temp files.
#[derive(Debug, Clone)]
pub struct ProcPaths {
    pub stat: PathBuf,
    pub thermal: PathBuf,
    pub meminfo: PathBuf,
}

impl Default for ProcPaths {
    fn default() -> Self {
        Self {
            stat: "/proc/stat".into(),
            thermal: "/sys/class/thermal/thermal_zone0/temp".into(),
            meminfo: "/proc/meminfo".into(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct MachineMetrics {
    /// percent busy since the previous sample
    pub cpu_load: f64,
    pub cpu_temp: f64,
    pub mem_total_kib: u64,
    pub mem_free_kib: u64,
}

impl MachineMetrics {
    pub fn mem_free_pct(&self) -> f64 {
        if self.mem_total_kib == 0 {
            return 0.0;
        }
        100.0 * self.mem_free_kib as f64 / self.mem_total_kib as f64
    }
}

/// Idle and total jiffies off the aggregate `cpu` line.
pub fn parse_cpu_sample(stat: &str) -> Option<(u64, u64)> {
    let line = stat.lines().find(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line.split_whitespace().skip(1).filter_map(|v| v.parse().ok()).collect();
    let idle = *fields.get(3)?;
    Some((idle, fields.iter().sum()))
}

/// MemTotal and MemFree in KiB.
pub fn parse_meminfo(meminfo: &str) -> (u64, u64) {
    let mut total = 0;
    let mut free = 0;
    for line in meminfo.lines() {
        let mut parts = line.split_whitespace();
        let value = |v: Option<&str>| v.and_then(|v| v.parse().ok()).unwrap_or(0);
        match parts.next() {
            Some("MemTotal:") => total = value(parts.next()),
            Some("MemFree:") => free = value(parts.next()),
            _ => {}
        }
    }
    (total, free)
}

/// Icon at font height then the formatted value.
struct Glyph {
    icon: IconCache,
    key: &'static str,
    image: RwLock<Arc<Bitmap>>,
    drawn: Mutex<Option<String>>,
}

impl Glyph {
    fn new(key: &'static str, map: &Arc<IconMap>, rasterizer: &Arc<dyn Rasterizer>) -> Self {
        Self {
            icon: IconCache::new(key, map.clone(), rasterizer.clone()),
            key,
            image: RwLock::new(Arc::new(Bitmap::default())),
            drawn: Mutex::new(None),
        }
    }

    /// Redraw only when the text changed.
    fn update(&self, text: String, font: &MonoFont<'_>, color: Rgba) -> bool {
        let mut drawn = guard::lock(&self.drawn);
        if drawn.as_deref() == Some(text.as_str()) {
            return false;
        }
        let hc = (1.05 * font.character_size.height as f32) as u32;
        let size = hc.saturating_sub(2).max(1);
        let icon = self.icon.ensure(self.key, None, None).resize(size, size);
        let mut canvas = Bitmap::new(size + 1 + measure(&text, font), hc);
        canvas.draw_over(&icon, 0, 0);
        canvas.text(&text, font, color, size as i32 + 1, 0);
        *guard::write(&self.image) = Arc::new(canvas);
        *drawn = Some(text);
        true
    }
}

/// Latest metrics and their glyphs for the full layout.
pub struct CpuStats {
    metrics: RwLock<MachineMetrics>,
    temp: Glyph,
    usage: Glyph,
    ram: Glyph,
    font: &'static MonoFont<'static>,
    color: Rgba,
}

impl CpuStats {
    pub fn new(map: Arc<IconMap>, rasterizer: Arc<dyn Rasterizer>) -> Self {
        Self {
            metrics: RwLock::new(MachineMetrics::default()),
            temp: Glyph::new("cpu-temp", &map, &rasterizer),
            usage: Glyph::new("cpu-metrics", &map, &rasterizer),
            ram: Glyph::new("ram-metrics", &map, &rasterizer),
            font: font_by_name("5x8"),
            color: Rgba::from_hex_or_white("#ffcc00"),
        }
    }

    pub fn metrics(&self) -> MachineMetrics {
        *guard::read(&self.metrics)
    }

    pub fn temp_glyph(&self) -> Arc<Bitmap> {
        guard::read(&self.temp.image).clone()
    }

    pub fn usage_glyph(&self) -> Arc<Bitmap> {
        guard::read(&self.usage.image).clone()
    }

    pub fn ram_glyph(&self) -> Arc<Bitmap> {
        guard::read(&self.ram.image).clone()
    }

    fn replace(&self, m: MachineMetrics) -> PollOutcome {
        *guard::write(&self.metrics) = m;
        let t = self.temp.update(format!("{:.1}°C", m.cpu_temp), self.font, self.color);
        let u = self.usage.update(format!("{:.1}%", m.cpu_load), self.font, self.color);
        let r = self.ram.update(format!("{:.1}%", m.mem_free_pct()), self.font, self.color);
        if t || u || r {
            PollOutcome::Updated
        } else {
            PollOutcome::Unchanged
        }
    }
}

pub struct CpuSource {
    stats: Arc<CpuStats>,
    paths: ProcPaths,
    /// previous idle and total jiffies
    last: Mutex<(u64, u64)>,
}

impl CpuSource {
    pub fn new(stats: Arc<CpuStats>, paths: ProcPaths) -> Self {
        Self { stats, paths, last: Mutex::new((0, 0)) }
    }

    fn sample(&self) -> Result<MachineMetrics, SourceError> {
        let stat = fs::read_to_string(&self.paths.stat)?;
        let (idle, total) = parse_cpu_sample(&stat)
            .ok_or_else(|| SourceError::Decode("no cpu line in stat".into()))?;

        let mut m = self.stats.metrics();
        {
            let mut last = guard::lock(&self.last);
            let (d_idle, d_total) = (idle.saturating_sub(last.0), total.saturating_sub(last.1));
            m.cpu_load = if d_total == 0 { 0.0 } else { 100.0 * (d_total - d_idle.min(d_total)) as f64 / d_total as f64 };
            *last = (idle, total);
        }

        match fs::read_to_string(&self.paths.thermal) {
            Ok(raw) => match raw.trim().parse::<i64>() {
                Ok(milli) => m.cpu_temp = milli as f64 / 1000.0,
                Err(e) => debug!("thermal zone unreadable: {e}"),
            },
            Err(e) => debug!("no thermal zone: {e}"),
        }
        match fs::read_to_string(&self.paths.meminfo) {
            Ok(raw) => (m.mem_total_kib, m.mem_free_kib) = parse_meminfo(&raw),
            Err(e) => debug!("no meminfo: {e}"),
        }
        Ok(m)
    }
}

impl PeriodicSource for CpuSource {
    fn name(&self) -> &str {
        "cpu"
    }

    async fn poll(&self) -> Result<PollOutcome, SourceError> {
        let m = self.sample()?;
        Ok(self.stats.replace(m))
    }

    fn mark_unknown(&self) {
        *guard::write(&self.stats.metrics) = MachineMetrics::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IconConfig;
    use crate::icon_cache::testing::CountingRasterizer;

    const STAT: &str = "cpu  100 0 100 700 100 0 0 0 0 0\ncpu0 50 0 50 350 50 0 0 0 0 0\n";

    #[test]
    fn parses_proc_files() {
        assert_eq!(parse_cpu_sample(STAT), Some((700, 1000)));
        assert_eq!(parse_cpu_sample("intr 1 2"), None);
        let mem = "MemTotal:        8000000 kB\nMemFree:         2000000 kB\nMemAvailable: 1 kB\n";
        assert_eq!(parse_meminfo(mem), (8_000_000, 2_000_000));
        let m = MachineMetrics { mem_total_kib: 8, mem_free_kib: 2, ..Default::default() };
        assert_eq!(m.mem_free_pct(), 25.0);
    }

    #[tokio::test]
    async fn glyphs_redraw_only_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ProcPaths {
            stat: dir.path().join("stat"),
            thermal: dir.path().join("temp"),
            meminfo: dir.path().join("meminfo"),
        };
        fs::write(&paths.stat, STAT).unwrap();
        fs::write(&paths.thermal, "48250\n").unwrap();
        fs::write(&paths.meminfo, "MemTotal: 100 kB\nMemFree: 40 kB\n").unwrap();

        let r = Arc::new(CountingRasterizer::default());
        let stats = Arc::new(CpuStats::new(Arc::new(IconMap::new(&IconConfig::default())), r.clone()));
        let src = CpuSource::new(stats.clone(), paths.clone());

        assert_eq!(src.poll().await.unwrap(), PollOutcome::Updated);
        let m = stats.metrics();
        assert_eq!(m.cpu_temp, 48.25);
        assert_eq!(m.cpu_load, 30.0);
        assert_eq!(m.mem_free_pct(), 40.0);
        let glyph = stats.temp_glyph();
        assert_eq!(glyph.height(), 8);
        assert!(!glyph.is_blank());
        assert_eq!(r.calls(), 3);

        // same counters: zero delta, load drops to 0 and only that glyph moves
        assert_eq!(src.poll().await.unwrap(), PollOutcome::Updated);
        let ram = stats.ram_glyph();
        assert_eq!(src.poll().await.unwrap(), PollOutcome::Unchanged);
        assert!(Arc::ptr_eq(&ram, &stats.ram_glyph()));
        assert_eq!(r.calls(), 3);
    }

    #[tokio::test]
    async fn missing_stat_is_a_failure() {
        let stats = Arc::new(CpuStats::new(
            Arc::new(IconMap::new(&IconConfig::default())),
            Arc::new(CountingRasterizer::default()),
        ));
        let src = CpuSource::new(stats, ProcPaths { stat: "/nonexistent/stat".into(), ..Default::default() });
        assert!(matches!(src.poll().await, Err(SourceError::Io(_))));
    }
}
