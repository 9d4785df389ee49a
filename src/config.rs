use chrono::NaiveTime;
use clap::{ArgAction, Parser, ValueEnum, ValueHint};
use dirs_next::home_dir;
use log::warn;
use serde::{Deserialize, Serialize};
use std::{fs, path::{Path, PathBuf}};
use thiserror::Error;

pub const WEATHER_SERVER_URI: &str = "WEATHER_SERVER_URI";
const WEATHER_FALLBACK_URL: &str = "http://192.168.1.249:5000/weather/current";

/// Error type for config loading/validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// clock, weather and one content panel
    Compact,
    /// adds date, moon and instrumentation
    #[default]
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Mock,
    Framebuffer,
}

/// Top-level app configuration, every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub display: DisplayConfig,
    pub icons: IconConfig,
    pub weather: WeatherConfig,
    pub location: Option<LocationConfig>,
    pub lms: Option<LmsConfig>,
    pub transit: Option<TransitConfig>,
    pub news: Option<NewsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    pub layout: Layout,
    /// render 2W x H with the second half rotated 180°
    pub folding: bool,
    pub experiment: bool,
    pub instrument: bool,
    pub day_bright: i32,
    pub night_bright: i32,
    pub scroll_limit: usize,
    /// compositor delay between frames
    pub tick_ms: u64,
    pub gradient: [String; 2],
    pub sink: SinkKind,
    pub fb_device: PathBuf,
    pub capture: bool,
    pub capture_dir: PathBuf,
    pub capture_limit: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 128,
            height: 64,
            layout: Layout::Full,
            folding: false,
            experiment: false,
            instrument: false,
            day_bright: 20,
            night_bright: 5,
            scroll_limit: 22,
            tick_ms: 60,
            gradient: ["#00000f".into(), "#000000".into()],
            sink: SinkKind::Mock,
            fb_device: PathBuf::from("/dev/fb0"),
            capture: false,
            capture_dir: PathBuf::from("capture"),
            capture_limit: 500,
        }
    }
}

impl DisplayConfig {
    /// Validated (day, night) brightness.
    pub fn brightness(&self) -> (u8, u8) {
        let day = self.day_bright.clamp(0, 100) as u8;
        let night = self.night_bright.clamp(0, 100) as u8;
        (day, night)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IconSize {
    pub width: u32,
    pub scale: f32,
    pub alpha: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IconConfig {
    pub dir: PathBuf,
    pub main: IconSize,
    pub wind: IconSize,
    /// stroke attributes applied to every glyph
    pub style: Option<String>,
}

impl Default for IconConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("assets/svg"),
            main: IconSize { width: 27, scale: 0.9, alpha: 0.6 },
            wind: IconSize { width: 24, scale: 0.65, alpha: 0.95 },
            style: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    pub url: String,
    pub interval_secs: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        let url = std::env::var(WEATHER_SERVER_URI)
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| WEATHER_FALLBACK_URL.to_string());
        Self { url, interval_secs: 30 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LocationConfig {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LmsConfig {
    pub host: String,
    pub port: u16,
    /// player MAC
    pub player: String,
    pub interval_ms: u64,
    /// show time remaining rather than elapsed
    pub remaining: bool,
    pub cache_dir: PathBuf,
    pub art_ttl_secs: u64,
    pub art_capacity: usize,
    pub art_max_bytes: u64,
    pub meter: MeterConfig,
}

impl Default for LmsConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 9000,
            player: String::new(),
            interval_ms: 400,
            remaining: true,
            cache_dir: PathBuf::from("cache"),
            art_ttl_secs: 2 * 3600,
            art_capacity: 64,
            art_max_bytes: 10 * 1024 * 1024,
            meter: MeterConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    pub active: bool,
    pub host: String,
    pub port: u16,
    pub endpoint: String,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            active: false,
            host: "127.0.0.1".into(),
            port: 8022,
            endpoint: "stream".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitConfig {
    pub url: String,
    /// comma separated route ids
    pub route: String,
    pub stop: String,
    /// env var holding the api key
    pub api_env: String,
    /// minutes ahead to keep arrivals
    pub offset: i64,
    pub from: String,
    pub until: String,
    /// 0 = Sunday
    pub days: Vec<u32>,
    pub interval_secs: u64,
}

impl Default for TransitConfig {
    fn default() -> Self {
        Self {
            url: "https://api-v3.mbta.com/predictions".into(),
            route: String::new(),
            stop: String::new(),
            api_env: "MBTA_API_KEY".into(),
            offset: 30,
            from: "04:30 AM".into(),
            until: "09:30 AM".into(),
            days: vec![1, 2, 3, 4, 5],
            interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NewsConfig {
    pub feeds: Vec<String>,
    pub detail: bool,
    /// seed time of the first window, HH:MM
    pub time: String,
    /// window length, minutes
    pub duration: i64,
    /// minutes between windows
    pub repeat: i64,
    /// feed poll in seconds while in the window
    pub poll: u64,
    pub velocity: u32,
    /// tallest canvas shown without scrolling
    pub limit: u32,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            feeds: Vec::new(),
            detail: false,
            time: "07:00".into(),
            duration: 10,
            repeat: 60,
            poll: 300,
            velocity: 1,
            limit: 62,
        }
    }
}

/// CLI overrides, layered over YAML.
#[derive(Debug, Parser, Clone, Default)]
#[command(name = "rgbclock", about = "RGB matrix desk clock", version)]
pub struct Cli {
    /// Path to a YAML config file (overrides search)
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub log_level: Option<String>,
    #[arg(long)]
    pub width: Option<u32>,
    #[arg(long)]
    pub height: Option<u32>,
    #[arg(long, value_enum)]
    pub layout: Option<Layout>,
    #[arg(long, action = ArgAction::SetTrue)]
    pub folding: bool,
    #[arg(long, action = ArgAction::SetTrue)]
    pub experiment: bool,
    /// write frames as PNG
    #[arg(long, action = ArgAction::SetTrue)]
    pub capture: bool,
    #[arg(long, value_enum)]
    pub sink: Option<SinkKind>,
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub fb_device: Option<PathBuf>,
    /// dump fully merged config (after overrides) and exit
    #[arg(long, action = ArgAction::SetTrue)]
    pub dump_config: bool,
}

/// Read YAML (explicit path or search), apply `cli`, validate.
pub fn load(cli: &Cli) -> Result<Config, ConfigError> {
    let mut cfg = if let Some(p) = cli.config.as_ref() {
        if !p.exists() {
            return Err(ConfigError::Validation(format!(
                "Config file not found: {}",
                p.display()
            )));
        }
        read_yaml(p)?
    } else if let Some(p) = find_config_file() {
        read_yaml(&p)?
    } else {
        Config::default()
    };

    apply_cli_overrides(&mut cfg, cli);
    validate(&mut cfg)?;
    Ok(cfg)
}

/// Try common locations in order (first hit wins).
fn find_config_file() -> Option<PathBuf> {
    if let Some(home) = home_dir() {
        let p = home.join(".config/rgbclock/config.yaml");
        if p.exists() { return Some(p) }
        let p = home.join("rgbclock/config.yaml");
        if p.exists() { return Some(p) }
    }
    let p = PathBuf::from("config.yaml");
    if p.exists() { return Some(p) }
    None
}

fn read_yaml(path: &Path) -> Result<Config, ConfigError> {
    let s = fs::read_to_string(path)?;
    Config::from_yaml(&s)
}

impl Config {
    pub fn from_yaml(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(s)?)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

fn apply_cli_overrides(cfg: &mut Config, cli: &Cli) {
    if cli.log_level.is_some()  { cfg.log_level = cli.log_level.clone(); }
    let d = &mut cfg.display;
    if let Some(w) = cli.width  { d.width = w; }
    if let Some(h) = cli.height { d.height = h; }
    if let Some(l) = cli.layout { d.layout = l; }
    if cli.folding              { d.folding = true; }
    if cli.experiment           { d.experiment = true; }
    if cli.capture              { d.capture = true; }
    if let Some(s) = cli.sink   { d.sink = s; }
    if let Some(p) = cli.fb_device.as_ref() {
        d.fb_device = p.clone();
        d.sink = SinkKind::Framebuffer;
    }
}

/// "04:30 AM" or "16:30".
pub fn parse_clock_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%I:%M %p")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

/// Reject what cannot run, normalise what can.
fn validate(cfg: &mut Config) -> Result<(), ConfigError> {
    let d = &mut cfg.display;
    if d.width == 0 || d.height == 0 {
        return Err(ConfigError::Validation("display width/height must be > 0".into()));
    }
    if !(0..=100).contains(&d.day_bright) {
        warn!("day brightness {} out of range, using 20", d.day_bright);
        d.day_bright = 20;
    }
    if !(0..=100).contains(&d.night_bright) {
        warn!("night brightness {} out of range, using {}", d.night_bright, d.day_bright);
        d.night_bright = d.day_bright;
    }
    if let Some(t) = cfg.transit.as_ref() {
        for v in [&t.from, &t.until] {
            if parse_clock_time(v).is_none() {
                return Err(ConfigError::Validation(format!("transit time {v:?} is not HH:MM [AM|PM]")));
            }
        }
    }
    if let Some(n) = cfg.news.as_ref() {
        if parse_clock_time(&n.time).is_none() {
            return Err(ConfigError::Validation(format!("news time {:?} is not HH:MM", n.time)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checked(yaml: &str, cli: &Cli) -> Result<Config, ConfigError> {
        let mut cfg = Config::from_yaml(yaml)?;
        apply_cli_overrides(&mut cfg, cli);
        validate(&mut cfg)?;
        Ok(cfg)
    }

    #[test]
    fn empty_document_gives_defaults() {
        let cfg = checked("{}", &Cli::default()).unwrap();
        assert_eq!((cfg.display.width, cfg.display.height), (128, 64));
        assert_eq!(cfg.display.tick_ms, 60);
        assert_eq!(cfg.icons.main.width, 27);
        assert!(cfg.lms.is_none());
        assert!(!cfg.weather.url.is_empty());
    }

    #[test]
    fn brightness_is_normalised() {
        let cfg = checked("display: {day_bright: 140, night_bright: -3}", &Cli::default()).unwrap();
        assert_eq!(cfg.display.brightness(), (20, 20));
        let cfg = checked("display: {day_bright: 60, night_bright: 101}", &Cli::default()).unwrap();
        assert_eq!(cfg.display.brightness(), (60, 60));
    }

    #[test]
    fn cli_overrides_yaml() {
        let cli = Cli {
            width: Some(64),
            folding: true,
            fb_device: Some(PathBuf::from("/dev/fb1")),
            ..Cli::default()
        };
        let cfg = checked("display: {width: 128, layout: compact}", &cli).unwrap();
        assert_eq!(cfg.display.width, 64);
        assert_eq!(cfg.display.layout, Layout::Compact);
        assert!(cfg.display.folding);
        assert_eq!(cfg.display.sink, SinkKind::Framebuffer);
    }

    #[test]
    fn rejects_bad_geometry_and_times() {
        assert!(matches!(checked("display: {width: 0}", &Cli::default()), Err(ConfigError::Validation(_))));
        assert!(checked("transit: {from: '25:00'}", &Cli::default()).is_err());
        assert!(checked("transit: {from: '06:15 AM', until: '18:00'}", &Cli::default()).is_ok());
        assert!(checked("news: {time: 'noon'}", &Cli::default()).is_err());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let cli = Cli { config: Some(PathBuf::from("/nonexistent/rgbclock.yaml")), ..Cli::default() };
        assert!(matches!(load(&cli), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn clock_times() {
        assert_eq!(parse_clock_time("04:30 PM"), NaiveTime::from_hms_opt(16, 30, 0));
        assert_eq!(parse_clock_time("07:05"), NaiveTime::from_hms_opt(7, 5, 0));
        assert!(parse_clock_time("7").is_none());
    }
}
