/*
 *  tests/render_loop.rs
 *
 *  End to end: state, compositor and a mock sink
 *
 *  RGBClock - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 */

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rgbclock::bitmap::Bitmap;
use rgbclock::color::Rgba;
use rgbclock::compositor::Compositor;
use rgbclock::config::{Config, Layout};
use rgbclock::icons::IconDescriptor;
use rgbclock::rasterizer::{RasterError, Rasterizer};
use rgbclock::sink::{DisplaySink, MockSink};
use rgbclock::state::AppState;
use tokio_util::sync::CancellationToken;

/// Solid squares, no assets on disk needed.
#[derive(Default)]
struct SolidRasterizer {
    calls: AtomicUsize,
}

impl Rasterizer for SolidRasterizer {
    fn rasterize(&self, d: &IconDescriptor) -> Result<Bitmap, RasterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Bitmap::filled(d.width, d.height, Rgba::rgb(40, 80, 120)))
    }
}

fn state(cfg: Config) -> (Arc<AppState>, Arc<SolidRasterizer>) {
    let r = Arc::new(SolidRasterizer::default());
    (Arc::new(AppState::new(cfg, r.clone()).unwrap()), r)
}

#[tokio::test(start_paused = true)]
async fn frames_flow_until_cancelled() {
    let (state, r) = state(Config::default());
    let sink = MockSink::new(128, 64);
    let record = sink.record();
    let token = CancellationToken::new();

    let task = tokio::spawn(Compositor::new(state, sink).run(token.clone()));
    tokio::time::sleep(Duration::from_millis(60 * 10 + 30)).await;
    token.cancel();
    let sink = task.await.unwrap();

    let rec = record.lock().unwrap();
    assert!(rec.presents >= 10, "only {} frames", rec.presents);
    assert!(rec.closed);
    let frame = rec.last_frame.as_ref().unwrap();
    assert_eq!(frame.dimensions(), (128, 64));
    assert!(!frame.is_blank());
    assert_eq!(sink.bounds(), (128, 64));
    // background icons are rasterized once, not per frame
    assert!(r.calls.load(Ordering::SeqCst) < rec.presents as usize);
}

#[tokio::test(start_paused = true)]
async fn folded_output_is_twice_as_wide() {
    let mut cfg = Config::default();
    cfg.display.width = 64;
    cfg.display.height = 32;
    cfg.display.layout = Layout::Compact;
    cfg.display.folding = true;
    let (state, _) = state(cfg);
    let sink = MockSink::new(128, 32);
    let record = sink.record();
    let token = CancellationToken::new();

    let task = tokio::spawn(Compositor::new(state, sink).run(token.clone()));
    tokio::time::sleep(Duration::from_millis(200)).await;
    token.cancel();
    task.await.unwrap();

    let rec = record.lock().unwrap();
    assert_eq!(rec.last_frame.as_ref().unwrap().dimensions(), (128, 32));
}

#[tokio::test]
async fn sources_and_compositor_stop_together() {
    let mut cfg = Config::default();
    // refused at once, the poll fails and the loop carries on
    cfg.weather.url = "http://127.0.0.1:9/".into();
    let (state, _) = state(cfg);
    let token = CancellationToken::new();
    let running = state.spawn(&token).unwrap();
    assert!(!running.handles().is_empty());

    let sink = MockSink::new(128, 64);
    let record = sink.record();
    let task = tokio::spawn(Compositor::new(state.clone(), sink).run(token.child_token()));
    tokio::time::sleep(Duration::from_millis(300)).await;

    token.cancel();
    running.stop().await;
    task.await.unwrap();
    assert!(record.lock().unwrap().closed);
}
