/*
 *  sink.rs
 *
 *  RGBClock - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  Display sinks: mock, Linux framebuffer and PNG capture
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

use log::{info, warn};
use memmap2::{MmapMut, MmapOptions};
use std::error::Error;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::bitmap::Bitmap;
use crate::color::Rgba;
use crate::guard;

/// Unified error type for the sinks
#[derive(Debug)]
pub enum DisplayError {
    /// Device could not be opened or mapped
    InitializationFailed(String),

    /// Pixel format the sink cannot write
    UnsupportedFormat(u32),

    /// Sink was closed
    Closed,

    Io(std::io::Error),

    /// Generic error with message
    Other(String),
}

impl fmt::Display for DisplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayError::InitializationFailed(msg) =>
                write!(f, "Display initialization failed: {}", msg),
            DisplayError::UnsupportedFormat(bpp) =>
                write!(f, "Unsupported pixel format: {} bpp", bpp),
            DisplayError::Closed =>
                write!(f, "Display is closed"),
            DisplayError::Io(err) =>
                write!(f, "Display I/O error: {}", err),
            DisplayError::Other(msg) =>
                write!(f, "{}", msg),
        }
    }
}

impl Error for DisplayError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DisplayError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DisplayError {
    fn from(err: std::io::Error) -> Self {
        DisplayError::Io(err)
    }
}

/// Where finished frames go.
pub trait DisplaySink: Send {
    /// Show `frame` at `brightness` percent.
    fn present(&mut self, frame: &Bitmap, brightness: u8) -> Result<(), DisplayError>;

    /// Width and height of the device
    fn bounds(&self) -> (u32, u32);

    fn close(&mut self) -> Result<(), DisplayError>;
}

impl<S: DisplaySink + ?Sized> DisplaySink for Box<S> {
    fn present(&mut self, frame: &Bitmap, brightness: u8) -> Result<(), DisplayError> {
        (**self).present(frame, brightness)
    }

    fn bounds(&self) -> (u32, u32) {
        (**self).bounds()
    }

    fn close(&mut self) -> Result<(), DisplayError> {
        (**self).close()
    }
}

/// What a [`MockSink`] saw, shared with whoever holds the handle.
#[derive(Debug, Default)]
pub struct MockRecord {
    pub presents: u64,
    pub last_brightness: Option<u8>,
    pub last_frame: Option<Bitmap>,
    pub closed: bool,
    /// next presents fail while set
    pub fail: bool,
}

pub struct MockSink {
    bounds: (u32, u32),
    record: Arc<Mutex<MockRecord>>,
}

impl MockSink {
    pub fn new(width: u32, height: u32) -> Self {
        Self { bounds: (width, height), record: Arc::new(Mutex::new(MockRecord::default())) }
    }

    pub fn record(&self) -> Arc<Mutex<MockRecord>> {
        self.record.clone()
    }
}

impl DisplaySink for MockSink {
    fn present(&mut self, frame: &Bitmap, brightness: u8) -> Result<(), DisplayError> {
        let mut r = guard::lock(&self.record);
        if r.closed {
            return Err(DisplayError::Closed);
        }
        if r.fail {
            return Err(DisplayError::Other("mock present failure".into()));
        }
        r.presents += 1;
        r.last_brightness = Some(brightness);
        r.last_frame = Some(frame.clone());
        Ok(())
    }

    fn bounds(&self) -> (u32, u32) {
        self.bounds
    }

    fn close(&mut self) -> Result<(), DisplayError> {
        guard::lock(&self.record).closed = true;
        Ok(())
    }
}

const FBIOGET_VSCREENINFO: u32 = 0x4600;

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct FbBitfield {
    offset: u32,
    length: u32,
    msb_right: u32,
}

/// linux/fb.h `fb_var_screeninfo`
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct FbVarScreenInfo {
    xres: u32,
    yres: u32,
    xres_virtual: u32,
    yres_virtual: u32,
    xoffset: u32,
    yoffset: u32,
    bits_per_pixel: u32,
    grayscale: u32,
    red: FbBitfield,
    green: FbBitfield,
    blue: FbBitfield,
    transp: FbBitfield,
    nonstd: u32,
    activate: u32,
    height: u32,
    width: u32,
    accel_flags: u32,
    pixclock: u32,
    left_margin: u32,
    right_margin: u32,
    upper_margin: u32,
    lower_margin: u32,
    hsync_len: u32,
    vsync_len: u32,
    sync: u32,
    vmode: u32,
    rotate: u32,
    colorspace: u32,
    reserved: [u32; 4],
}

/// 16 bpp RGB565 or 32 bpp BGRA pixel packing.
fn pack(c: Rgba, brightness: u8, bpp: u32, out: &mut [u8]) {
    // flatten onto black, then dim
    let a = c.a as u32;
    let flat = Rgba::rgb(
        (c.r as u32 * a / 255) as u8,
        (c.g as u32 * a / 255) as u8,
        (c.b as u32 * a / 255) as u8,
    )
    .scaled(brightness);
    match bpp {
        32 => out[..4].copy_from_slice(&[flat.b, flat.g, flat.r, 0xff]),
        _ => {
            let v = ((flat.r as u16 >> 3) << 11) | ((flat.g as u16 >> 2) << 5) | (flat.b as u16 >> 3);
            out[..2].copy_from_slice(&v.to_le_bytes());
        }
    }
}

/// A Linux framebuffer device, mapped once.
pub struct FramebufferSink {
    path: PathBuf,
    map: Option<MmapMut>,
    width: u32,
    height: u32,
    bpp: u32,
    stride: usize,
}

impl FramebufferSink {
    pub fn open(path: &Path) -> Result<Self, DisplayError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| DisplayError::InitializationFailed(format!("{}: {}", path.display(), e)))?;

        let mut info = FbVarScreenInfo::default();
        // Safety: the kernel fills a struct of exactly this layout.
        let rc = unsafe { libc::ioctl(file.as_raw_fd(), FBIOGET_VSCREENINFO as _, &mut info as *mut FbVarScreenInfo) };
        if rc < 0 {
            return Err(DisplayError::InitializationFailed(format!(
                "FBIOGET_VSCREENINFO on {}: {}",
                path.display(),
                std::io::Error::last_os_error()
            )));
        }
        if info.bits_per_pixel != 32 && info.bits_per_pixel != 16 {
            return Err(DisplayError::UnsupportedFormat(info.bits_per_pixel));
        }

        let stride = info.xres_virtual as usize * (info.bits_per_pixel / 8) as usize;
        let len = stride * info.yres_virtual.max(info.yres) as usize;
        // Safety: the mapping is owned by this sink and only written through it.
        let map = unsafe { MmapOptions::new().len(len).map_mut(&file)? };
        info!(
            "framebuffer {} {}x{} {}bpp",
            path.display(),
            info.xres,
            info.yres,
            info.bits_per_pixel
        );
        Ok(Self {
            path: path.to_path_buf(),
            map: Some(map),
            width: info.xres,
            height: info.yres,
            bpp: info.bits_per_pixel,
            stride,
        })
    }
}

impl DisplaySink for FramebufferSink {
    fn present(&mut self, frame: &Bitmap, brightness: u8) -> Result<(), DisplayError> {
        let Some(map) = self.map.as_mut() else {
            return Err(DisplayError::Closed);
        };
        let bytes = (self.bpp / 8) as usize;
        let w = frame.width().min(self.width) as usize;
        let h = frame.height().min(self.height) as usize;
        for y in 0..h {
            let row = &mut map[y * self.stride..y * self.stride + w * bytes];
            for (x, px) in row.chunks_exact_mut(bytes).enumerate() {
                pack(frame.pixel(x as i32, y as i32), brightness, self.bpp, px);
            }
        }
        Ok(())
    }

    fn bounds(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn close(&mut self) -> Result<(), DisplayError> {
        if let Some(mut map) = self.map.take() {
            map.fill(0);
            map.flush()?;
            info!("framebuffer {} released", self.path.display());
        }
        Ok(())
    }
}

/// Writes the first `limit` frames as PNG, then just delegates.
pub struct CaptureSink<S: DisplaySink> {
    inner: S,
    dir: PathBuf,
    limit: usize,
    written: usize,
}

impl<S: DisplaySink> CaptureSink<S> {
    pub fn new(inner: S, dir: impl Into<PathBuf>, limit: usize) -> Result<Self, DisplayError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { inner, dir, limit, written: 0 })
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: DisplaySink> DisplaySink for CaptureSink<S> {
    fn present(&mut self, frame: &Bitmap, brightness: u8) -> Result<(), DisplayError> {
        if self.written < self.limit {
            let path = self.dir.join(format!("frame-{:04}.png", self.written));
            match frame.encode_png().map_err(|e| DisplayError::Other(e.to_string())) {
                Ok(png) => match fs::write(&path, png) {
                    Ok(()) => self.written += 1,
                    Err(e) => warn!("capture {} failed: {}", path.display(), e),
                },
                Err(e) => warn!("capture encode failed: {e}"),
            }
            if self.written == self.limit {
                info!("captured {} frames to {}", self.written, self.dir.display());
            }
        }
        self.inner.present(frame, brightness)
    }

    fn bounds(&self) -> (u32, u32) {
        self.inner.bounds()
    }

    fn close(&mut self) -> Result<(), DisplayError> {
        self.inner.close()
    }
}
