/*
 *  main.rs
 *
 *  RGBClock - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  Startup, sink selection and graceful shutdown
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

use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use log::{error, info};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

use rgbclock::compositor::Compositor;
use rgbclock::config::{self, Cli, DisplayConfig, SinkKind};
use rgbclock::rasterizer::{Rasterizer, SvgRasterizer};
use rgbclock::sink::{CaptureSink, DisplaySink, FramebufferSink, MockSink};
use rgbclock::state::AppState;

include!(concat!(env!("OUT_DIR"), "/build_info.rs"));

/// Waits for SIGINT, SIGTERM or SIGHUP.
async fn signal_handler() -> Result<(), Box<dyn std::error::Error>> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT received. Initiating graceful shutdown.");
        }
        _ = sigterm.recv() => {
            info!("SIGTERM received. Initiating graceful shutdown.");
        }
        _ = sighup.recv() => {
            info!("SIGHUP received. Initiating graceful shutdown.");
        }
    }
    Ok(())
}

fn open_sink(d: &DisplayConfig) -> anyhow::Result<Box<dyn DisplaySink>> {
    let sink: Box<dyn DisplaySink> = match d.sink {
        SinkKind::Mock => {
            let width = if d.folding { d.width * 2 } else { d.width };
            Box::new(MockSink::new(width, d.height))
        }
        SinkKind::Framebuffer => Box::new(
            FramebufferSink::open(&d.fb_device)
                .with_context(|| format!("opening {}", d.fb_device.display()))?,
        ),
    };
    if !d.capture {
        return Ok(sink);
    }
    info!("capturing up to {} frames to {}", d.capture_limit, d.capture_dir.display());
    let capture = CaptureSink::new(sink, &d.capture_dir, d.capture_limit)
        .with_context(|| format!("capture directory {}", d.capture_dir.display()))?;
    Ok(Box::new(capture))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load(&cli).context("loading configuration")?;

    if cli.dump_config {
        print!("{}", cfg.to_yaml()?);
        return Ok(());
    }

    let level = cfg.log_level.clone().unwrap_or_else(|| "info".to_string());
    env_logger::Builder::from_env(Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();

    info!("This {} worth the Squeeze", env!("CARGO_PKG_NAME"));
    info!("v.{} built {}", env!("CARGO_PKG_VERSION"), BUILD_DATE);
    info!(
        "{}x{} {:?}{}",
        cfg.display.width,
        cfg.display.height,
        cfg.display.layout,
        if cfg.display.folding { " folded" } else { "" }
    );

    let mut svg = SvgRasterizer::new(&cfg.icons.dir);
    if let Some(style) = cfg.icons.style.as_deref() {
        svg = svg.with_style(style);
    }
    let rasterizer: Arc<dyn Rasterizer> = Arc::new(svg);

    let sink = open_sink(&cfg.display)?;
    let state = Arc::new(AppState::new(cfg, rasterizer).context("building application state")?);

    let token = CancellationToken::new();
    let running = state.spawn(&token).context("starting sources")?;

    let compositor = Compositor::new(state.clone(), sink);
    let render = tokio::spawn(compositor.run(token.child_token()));

    if let Err(e) = signal_handler().await {
        error!("signal handling failed: {e}");
    }

    token.cancel();
    running.stop().await;
    if let Err(e) = render.await {
        error!("compositor task failed to join: {e}");
    }

    info!("Shutdown complete");
    Ok(())
}
