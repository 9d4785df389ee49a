/*
 *  rasterizer.rs
 *
 *  RGBClock - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  Icon descriptors to RGBA bitmaps via usvg/resvg
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

//! Each [`RenderVariant`] has its own composition routine producing an SVG
//! document; everything is then rendered the same way through `usvg` and
//! `resvg` into a `tiny_skia::Pixmap`.

use log::debug;
use resvg::{
    render,
    usvg::{Options as UsvgOptions, Transform, Tree},
};
use roxmltree::Document;
use std::fmt::Write as _;
use std::path::PathBuf;
use thiserror::Error;
use tiny_skia::Pixmap;

use crate::bitmap::Bitmap;
use crate::icons::{IconDescriptor, RenderVariant, WIND_DEG_ASSET};

#[derive(Debug, Error)]
pub enum RasterError {
    #[error("icon asset {path}: {source}")]
    Asset {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("icon document {0}: {1}")]
    Document(String, String),
    #[error("SVG parse error: {0}")]
    Svg(String),
    #[error("pixmap creation error {0}x{1}")]
    Pixmap(u32, u32),
}

/// Descriptor in, bitmap out. Must be deterministic for equal descriptors.
pub trait Rasterizer: Send + Sync {
    fn rasterize(&self, desc: &IconDescriptor) -> Result<Bitmap, RasterError>;
}

pub const DEFAULT_ICON_STYLE: &str =
    r#"fill-opacity="1.0" stroke-opacity="0.4" stroke="black" stroke-width="1""#;

const FILTERS: &str = concat!(
    r#"<filter id="BLUR" width="150%" height="150%"><feGaussianBlur stdDeviation="4"/></filter>"#,
    r#"<filter id="SHADOW" x="-15%" y="-15%" width="150%" height="150%">"#,
    r#"<feGaussianBlur stdDeviation="1"/><feOffset dx="2" dy="2"/></filter>"#,
);

/// Renders icon assets from `<dir>/<asset>.svg`.
#[derive(Debug, Clone)]
pub struct SvgRasterizer {
    dir: PathBuf,
    stroke_style: String,
}

impl SvgRasterizer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            stroke_style: DEFAULT_ICON_STYLE.to_string(),
        }
    }

    /// Override the stroke attributes applied to every icon group.
    pub fn with_style(mut self, style: &str) -> Self {
        self.stroke_style = style.to_string();
        self
    }

    pub fn asset_path(&self, asset: &str) -> PathBuf {
        self.dir.join(format!("{asset}.svg"))
    }

    fn read_asset(&self, asset: &str) -> Result<String, RasterError> {
        let path = self.asset_path(asset);
        std::fs::read_to_string(&path).map_err(|source| RasterError::Asset { path, source })
    }

    fn transform(d: &IconDescriptor) -> String {
        let mut t = String::new();
        if d.scale != 0.0 && (d.scale - 1.0).abs() > f32::EPSILON {
            let _ = write!(t, "scale({0} {0}) ", d.scale);
        }
        if d.rotate != 0.0 {
            let _ = write!(t, "rotate({} 15 15)", d.rotate);
        }
        let t = t.trim();
        if t.is_empty() {
            String::new()
        } else {
            format!(r#" transform="{t}""#)
        }
    }

    fn group(&self, d: &IconDescriptor, doc: &str, fill: &str, filter: Option<&str>) -> String {
        let filter = filter
            .map(|f| format!(r#" filter="url(#{f})""#))
            .unwrap_or_default();
        format!(
            r#"<g{}{} style="fill: {}" {}>{}</g>"#,
            Self::transform(d),
            filter,
            fill,
            self.stroke_style,
            doc
        )
    }

    fn plain(&self, d: &IconDescriptor, doc: &str) -> String {
        self.group(d, doc, &d.color, None)
    }

    fn scaled_rotated(&self, d: &IconDescriptor, doc: &str) -> String {
        self.group(d, doc, &d.color, None)
    }

    fn shadowed(&self, d: &IconDescriptor, doc: &str) -> String {
        let mut s = self.group(d, doc, "black", Some("SHADOW"));
        s.push_str(&self.plain(d, doc));
        s
    }

    fn blurred(&self, d: &IconDescriptor, doc: &str) -> String {
        let mut s = self.group(d, doc, "black", Some("SHADOW"));
        s.push_str(&self.group(d, doc, &d.color, Some("BLUR")));
        s.push_str(&self.plain(d, doc));
        s
    }

    fn pop_highlight(&self, d: &IconDescriptor, doc: &str) -> String {
        let pop = d.pop_color.as_deref().unwrap_or(&d.color);
        let r = (d.width as i32 / 3 - 6).max(1);
        let mut s = format!(
            r#"<circle cx="{}" cy="{}" r="{}" fill-opacity="0.15" style="fill: {}" filter="url(#BLUR)"/>"#,
            d.width / 2,
            d.height / 2,
            r,
            pop
        );
        s.push_str(&self.shadowed(d, doc));
        s
    }

    /// Compose the SVG document for `d` around the asset's inner markup.
    pub fn compose(&self, d: &IconDescriptor, inner: &str) -> String {
        let body = match d.variant {
            RenderVariant::Plain => self.plain(d, inner),
            RenderVariant::ScaledRotated => self.scaled_rotated(d, inner),
            RenderVariant::Shadowed => self.shadowed(d, inner),
            RenderVariant::Blurred => self.blurred(d, inner),
            RenderVariant::PopHighlight => self.pop_highlight(d, inner),
        };
        let disc = if d.asset == WIND_DEG_ASSET {
            format!(
                r##"<circle cx="{}" cy="{}" r="{}" style="fill: #0099FF" fill-opacity="0.4"/>"##,
                4 + d.width / 3,
                4 + d.height / 3,
                (d.width as i32 / 3 - 2).max(1)
            )
        } else {
            String::new()
        };
        format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}"><defs>{FILTERS}</defs>{disc}{body}</svg>"#,
            w = d.width,
            h = d.height,
        )
    }
}

/// Markup between the root element's tags.
pub fn inner_markup(text: &str) -> Result<&str, String> {
    let doc = Document::parse(text).map_err(|e| e.to_string())?;
    let root = doc.root_element();
    match (root.first_child(), root.last_child()) {
        (Some(first), Some(last)) => Ok(&text[first.range().start..last.range().end]),
        _ => Ok(""),
    }
}

impl Rasterizer for SvgRasterizer {
    fn rasterize(&self, d: &IconDescriptor) -> Result<Bitmap, RasterError> {
        let text = self.read_asset(&d.asset)?;
        let alpha = if d.alpha == 0.0 { 1.0 } else { d.alpha };
        if d.as_is {
            let text = if d.asset == WIND_DEG_ASSET && d.rotate != 0.0 {
                text.replace("rotate(0", &format!("rotate({}", d.rotate))
            } else {
                text
            };
            let s = if d.scale == 0.0 { 1.0 } else { d.scale };
            let w = ((d.width as f32 * s).round() as u32).max(1);
            let h = ((d.height as f32 * s).round() as u32).max(1);
            return render_svg_str(&text, w, h, alpha);
        }
        let inner = inner_markup(&text)
            .map_err(|e| RasterError::Document(d.asset.clone(), e))?;
        let svg = self.compose(d, inner);
        debug!("rasterizing {} {:?} {}x{}", d.asset, d.variant, d.width, d.height);
        render_svg_str(&svg, d.width, d.height, alpha)
    }
}

/// Render an SVG document fitted to `width` x `height`, scaling alpha by `opacity`.
pub fn render_svg_str(svg: &str, width: u32, height: u32, opacity: f32) -> Result<Bitmap, RasterError> {
    let tree = Tree::from_str(svg, &UsvgOptions::default())
        .map_err(|e| RasterError::Svg(format!("{e:?}")))?;
    let mut pixmap = Pixmap::new(width, height).ok_or(RasterError::Pixmap(width, height))?;

    let size = tree.size();
    let transform = Transform::from_scale(width as f32 / size.width(), height as f32 / size.height());
    render(&tree, transform, &mut pixmap.as_mut());

    let mut bmp = Bitmap::from_pixmap(&pixmap);
    if opacity < 1.0 {
        let o = opacity.clamp(0.0, 1.0);
        for p in bmp.as_mut_slice() {
            p.a = (p.a as f32 * o).round() as u8;
        }
    }
    Ok(bmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IconConfig;
    use crate::icons::IconMap;

    const SQUARE: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" width="30" height="30"><rect x="0" y="0" width="30" height="30"/></svg>"#;

    fn asset_dir(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, body) in files {
            std::fs::write(dir.path().join(format!("{name}.svg")), body).unwrap();
        }
        dir
    }

    #[test]
    fn inner_markup_strips_root() {
        assert_eq!(inner_markup(SQUARE).unwrap(), r#"<rect x="0" y="0" width="30" height="30"/>"#);
        assert_eq!(inner_markup("<svg/>").unwrap(), "");
        assert!(inner_markup("<svg").is_err());
    }

    #[test]
    fn composition_differs_per_variant() {
        let r = SvgRasterizer::new(".");
        let m = IconMap::new(&IconConfig::default());
        let pop = r.compose(m.get("icon-32").unwrap(), "<rect/>");
        assert!(pop.contains("fill-opacity=\"0.15\""));
        assert_eq!(pop.matches("<rect/>").count(), 2);
        let glow = r.compose(m.get("global").unwrap(), "<rect/>");
        assert_eq!(glow.matches("<rect/>").count(), 3);
        let plain = r.compose(m.get("Ferry").unwrap(), "<rect/>");
        assert_eq!(plain.matches("<rect/>").count(), 1);
        assert!(!plain.contains("transform"));
        let wind = r.compose(m.get("wind-N").unwrap(), "<rect/>");
        assert!(wind.contains("rotate(180 15 15)"));
        assert!(wind.contains("#0099FF"));
    }

    #[test]
    fn rasterizes_at_descriptor_size() {
        let dir = asset_dir(&[("mbta-ferry", SQUARE)]);
        let r = SvgRasterizer::new(dir.path());
        let m = IconMap::new(&IconConfig::default());
        let d = m.get("Ferry").unwrap();
        let bmp = r.rasterize(d).unwrap();
        assert_eq!(bmp.dimensions(), (30, 30));
        assert!(!bmp.is_blank());
        // deterministic
        assert_eq!(r.rasterize(d).unwrap(), bmp);
    }

    #[test]
    fn as_is_renders_scaled_canvas() {
        let dir = asset_dir(&[("blob", SQUARE)]);
        let r = SvgRasterizer::new(dir.path());
        let mut d = IconDescriptor::new("blob", "red", 20, 1.5, 1.0);
        d.as_is = true;
        assert_eq!(r.rasterize(&d).unwrap().dimensions(), (30, 30));
    }

    #[test]
    fn missing_asset_is_an_error() {
        let dir = asset_dir(&[]);
        let r = SvgRasterizer::new(dir.path());
        let d = IconDescriptor::new("nope", "red", 10, 1.0, 1.0);
        assert!(matches!(r.rasterize(&d), Err(RasterError::Asset { .. })));
    }
}
