//! Paints a terminal snapshot into a fixed-size RGBA raster.
//!
//! The window chrome (border, title bar, traffic lights) never changes between
//! frames, so it is painted once with tiny-skia and copied as the base of
//! every frame. Text is blended glyph by glyph on top of it.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, bail, Context, Result};
use fontdue::{Font, FontSettings};
use sha2::{Digest, Sha256};
use tiny_skia::{Color, FillRule, Paint, PathBuilder, Pixmap, Rect, Transform};
use tracing::{debug, warn};

use crate::config::{LayoutConfig, RenderConfig, Rgb, Theme};
use crate::scheduler::Frame;
use crate::terminal::{ColorTag, TerminalBuffer, TextMeasure};

/// Monospace fonts tried in order when no font is configured.
pub const SYSTEM_MONO_FONTS: [&str; 7] = [
    "/System/Library/Fonts/Menlo.ttc",
    "/System/Library/Fonts/SFNSMono.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf",
    "/usr/share/fonts/dejavu/DejaVuSansMono.ttf",
    "/usr/share/fonts/TTF/DejaVuSansMono.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationMono-Regular.ttf",
    "C:\\Windows\\Fonts\\consola.ttf",
];

const TITLE_X: u32 = 64;
const TITLE_Y: u32 = 13;
const DOT_RADIUS: f32 = 5.0;
const DOT_CENTERS_X: [f32; 3] = [17.0, 33.0, 49.0];
const DOT_CENTER_Y: f32 = 17.0;
const CURSOR_EXTRA_HEIGHT: f32 = 2.0;

/// Where the glyphs of a painter come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FontOrigin {
    File(PathBuf),
    /// No usable font; text is drawn as solid cells.
    Blocks { reason: String },
}

impl FontOrigin {
    pub fn describe(&self) -> String {
        match self {
            FontOrigin::File(path) => path.display().to_string(),
            FontOrigin::Blocks { reason } => format!("block glyphs ({reason})"),
        }
    }
}

#[derive(Debug)]
struct GlyphBitmap {
    x: i32,
    /// Offset of the bitmap top from the baseline, positive upwards.
    top: i32,
    width: usize,
    height: usize,
    bitmap: Vec<u8>,
}

/// One font at one size, with a shared glyph cache so painting can run on
/// several threads at once.
struct FontFace {
    font: Arc<Font>,
    size: f32,
    ascent: f32,
    cache: RwLock<HashMap<char, Arc<GlyphBitmap>>>,
}

impl FontFace {
    fn new(font: Arc<Font>, size: f32) -> Self {
        let ascent = font
            .horizontal_line_metrics(size)
            .map(|metrics| metrics.ascent)
            .unwrap_or(size * 0.8);
        let face = Self {
            font,
            size,
            ascent,
            cache: RwLock::new(HashMap::new()),
        };
        for ch in (0x21_u8..0x7f).map(char::from) {
            face.glyph(ch);
        }
        face
    }

    fn has_glyph(&self, ch: char) -> bool {
        self.font.lookup_glyph_index(ch) != 0
    }

    fn advance(&self, ch: char) -> f32 {
        self.font.metrics(ch, self.size).advance_width
    }

    fn glyph(&self, ch: char) -> Arc<GlyphBitmap> {
        if let Ok(cache) = self.cache.read() {
            if let Some(glyph) = cache.get(&ch) {
                return Arc::clone(glyph);
            }
        }
        let (metrics, bitmap) = self.font.rasterize(ch, self.size);
        let glyph = Arc::new(GlyphBitmap {
            x: metrics.xmin,
            top: metrics.ymin + metrics.height as i32,
            width: metrics.width,
            height: metrics.height,
            bitmap,
        });
        if let Ok(mut cache) = self.cache.write() {
            cache.entry(ch).or_insert_with(|| Arc::clone(&glyph));
        }
        glyph
    }
}

enum Face {
    Font(FontFace),
    Blocks { advance: f32, height: f32 },
}

impl Face {
    fn blocks(size: f32) -> Self {
        Face::Blocks {
            advance: (size * 0.6).round().max(1.0),
            height: (size * 0.75).round().max(1.0),
        }
    }

    fn block_advance(&self) -> f32 {
        match self {
            Face::Font(face) => face.advance('M').max(1.0),
            Face::Blocks { advance, .. } => *advance,
        }
    }

    fn char_width(&self, ch: char) -> f32 {
        match self {
            Face::Font(face) if face.has_glyph(ch) || ch.is_whitespace() => face.advance(ch),
            _ => self.block_advance(),
        }
    }

    fn width(&self, text: &str) -> f32 {
        text.chars().map(|ch| self.char_width(ch)).sum()
    }

    fn ascent(&self) -> f32 {
        match self {
            Face::Font(face) => face.ascent,
            Face::Blocks { height, .. } => *height,
        }
    }

    /// Draws `text` with its top edge at `top`, returning the pen position
    /// after the last character.
    fn draw(&self, canvas: &mut Canvas<'_>, x: f32, top: f32, text: &str, color: [u8; 4]) -> f32 {
        let baseline = top + self.ascent();
        let mut pen = x;
        for ch in text.chars() {
            let advance = self.char_width(ch);
            if !ch.is_whitespace() {
                match self {
                    Face::Font(face) if face.has_glyph(ch) => {
                        let glyph = face.glyph(ch);
                        canvas.blend_glyph(
                            pen.round() as i32 + glyph.x,
                            baseline.round() as i32 - glyph.top,
                            &glyph,
                            color,
                        );
                    }
                    _ => {
                        let height = match self {
                            Face::Blocks { height, .. } => *height,
                            Face::Font(face) => (face.size * 0.75).round(),
                        };
                        canvas.fill_rect(
                            pen.round() as i32,
                            (baseline - height).round() as i32,
                            (advance - 1.0).max(1.0) as u32,
                            height as u32,
                            color,
                        );
                    }
                }
            }
            pen += advance;
        }
        pen
    }
}

/// Mutable view over one RGBA frame. Every pixel is opaque.
struct Canvas<'a> {
    pixels: &'a mut [u8],
    width: u32,
    height: u32,
}

impl Canvas<'_> {
    fn fill_rect(&mut self, x: i32, y: i32, w: u32, h: u32, color: [u8; 4]) {
        let x0 = x.clamp(0, self.width as i32) as u32;
        let y0 = y.clamp(0, self.height as i32) as u32;
        let x1 = (x.saturating_add(w as i32)).clamp(0, self.width as i32) as u32;
        let y1 = (y.saturating_add(h as i32)).clamp(0, self.height as i32) as u32;

        for yy in y0..y1 {
            let row_start = (yy * self.width * 4) as usize;
            for xx in x0..x1 {
                let idx = row_start + (xx * 4) as usize;
                blend_pixel(self.pixels, idx, color);
            }
        }
    }

    fn blend_glyph(&mut self, x: i32, y: i32, glyph: &GlyphBitmap, color: [u8; 4]) {
        for row in 0..glyph.height {
            let py = y + row as i32;
            if py < 0 || py >= self.height as i32 {
                continue;
            }

            for col in 0..glyph.width {
                let px = x + col as i32;
                if px < 0 || px >= self.width as i32 {
                    continue;
                }

                let mask = glyph.bitmap[row * glyph.width + col];
                if mask == 0 {
                    continue;
                }

                let alpha = ((u16::from(mask) * u16::from(color[3])) / 255) as u8;
                let idx = ((py as u32 * self.width + px as u32) * 4) as usize;
                blend_pixel(self.pixels, idx, [color[0], color[1], color[2], alpha]);
            }
        }
    }
}

fn blend_pixel(frame: &mut [u8], idx: usize, src: [u8; 4]) {
    let alpha = u16::from(src[3]);
    if alpha == 0 {
        return;
    }

    let inv_alpha = 255_u16.saturating_sub(alpha);

    for channel in 0..3 {
        let dst = u16::from(frame[idx + channel]);
        let src_c = u16::from(src[channel]);
        frame[idx + channel] = ((src_c * alpha + dst * inv_alpha + 127) / 255) as u8;
    }
    frame[idx + 3] = 255;
}

/// Turns frames into rasters. Shareable across threads; painting the same
/// frame twice yields identical bytes.
pub struct TerminalPainter {
    width: u32,
    height: u32,
    layout: LayoutConfig,
    theme: Theme,
    body: Face,
    title: Face,
    chrome: Vec<u8>,
    origin: FontOrigin,
}

impl TerminalPainter {
    pub fn new(config: &RenderConfig) -> Result<Self> {
        let (font, origin) = match load_font(&config.layout) {
            Ok((font, path)) => (Some(Arc::new(font)), FontOrigin::File(path)),
            Err(error) => {
                let reason = format!("{error:#}");
                warn!(%reason, "no usable font; drawing text as blocks");
                (None, FontOrigin::Blocks { reason })
            }
        };
        Self::with_font(config, font, origin)
    }

    /// Painter that never touches the filesystem.
    pub fn with_block_glyphs(config: &RenderConfig) -> Result<Self> {
        Self::with_font(
            config,
            None,
            FontOrigin::Blocks {
                reason: "requested".to_owned(),
            },
        )
    }

    fn with_font(
        config: &RenderConfig,
        font: Option<Arc<Font>>,
        origin: FontOrigin,
    ) -> Result<Self> {
        let layout = config.layout.clone();
        let (body, title) = match font {
            Some(font) => (
                Face::Font(FontFace::new(Arc::clone(&font), layout.font_size)),
                Face::Font(FontFace::new(font, layout.title_size)),
            ),
            None => (Face::blocks(layout.font_size), Face::blocks(layout.title_size)),
        };
        let chrome = paint_chrome(config.width, config.height, &layout, &config.theme)?;
        debug!(
            font = %origin.describe(),
            width = config.width,
            height = config.height,
            "painter ready"
        );

        Ok(Self {
            width: config.width,
            height: config.height,
            layout,
            theme: config.theme,
            body,
            title,
            chrome,
            origin,
        })
    }

    pub fn origin(&self) -> &FontOrigin {
        &self.origin
    }

    pub fn frame_size(&self) -> usize {
        self.chrome.len()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Rows that fit below the title bar.
    pub fn visible_rows(&self) -> usize {
        let area = self
            .height
            .saturating_sub(self.layout.bar_height)
            .saturating_sub(self.layout.padding * 2);
        (area / self.layout.line_height.max(1)).max(1) as usize
    }

    pub fn render(&self, frame: &Frame) -> Vec<u8> {
        let mut pixels = self.chrome.clone();
        self.paint(&frame.snapshot, frame.cursor_drawn, &mut pixels);
        pixels
    }

    fn paint(&self, buffer: &TerminalBuffer, cursor_drawn: bool, pixels: &mut [u8]) {
        let mut canvas = Canvas {
            pixels,
            width: self.width,
            height: self.height,
        };

        self.title.draw(
            &mut canvas,
            TITLE_X as f32,
            TITLE_Y as f32,
            &buffer.title.to_uppercase(),
            self.theme.muted.rgba(),
        );

        // Older rows scroll off the top once the window is full.
        let first_row = buffer.lines.len().saturating_sub(self.visible_rows());
        let left = self.layout.padding as f32;
        let row_top = |row: usize| {
            (self.layout.bar_height + self.layout.padding) as f32
                + ((row - first_row) as u32 * self.layout.line_height) as f32
        };

        for (row, line) in buffer.lines.iter().enumerate().skip(first_row) {
            let top = row_top(row);
            let mut pen = left;
            for segment in &line.segments {
                let color = self.color_of(segment.color);
                pen = self.body.draw(&mut canvas, pen, top, &segment.text, color);
            }
        }

        if cursor_drawn && buffer.cursor_row >= first_row {
            let x = left + buffer.cursor_pixel_offset(self);
            let top = row_top(buffer.cursor_row);
            canvas.fill_rect(
                x.round() as i32,
                top.round() as i32,
                self.layout.cursor_width,
                (self.layout.font_size + CURSOR_EXTRA_HEIGHT).round() as u32,
                self.theme.accent.rgba(),
            );
        }
    }

    fn color_of(&self, tag: ColorTag) -> [u8; 4] {
        match tag {
            ColorTag::Text => self.theme.text.rgba(),
            ColorTag::Accent => self.theme.accent.rgba(),
            ColorTag::Muted => self.theme.muted.rgba(),
            ColorTag::Faint => self.theme.faint.rgba(),
        }
    }
}

impl TextMeasure for TerminalPainter {
    fn text_width(&self, text: &str) -> f32 {
        self.body.width(text)
    }
}

fn skia_color(color: Rgb) -> Color {
    Color::from_rgba8(color.0[0], color.0[1], color.0[2], 255)
}

fn paint_chrome(width: u32, height: u32, layout: &LayoutConfig, theme: &Theme) -> Result<Vec<u8>> {
    let mut pixmap = Pixmap::new(width, height)
        .ok_or_else(|| anyhow!("failed to allocate terminal pixmap {width}x{height}"))?;
    pixmap.fill(skia_color(theme.background));

    let w = width as f32;
    let bar = layout.bar_height as f32;
    let mut paint = Paint::default();

    paint.set_color(skia_color(theme.bar));
    if let Some(rect) = Rect::from_xywh(1.0, 1.0, w - 2.0, bar) {
        pixmap.fill_rect(rect, &paint, Transform::identity(), None);
    }

    paint.set_color(skia_color(theme.border));
    let edges = [
        (0.0, 0.0, w, 1.0),
        (0.0, height as f32 - 1.0, w, 1.0),
        (0.0, 0.0, 1.0, height as f32),
        (w - 1.0, 0.0, 1.0, height as f32),
        (1.0, bar, w - 2.0, 1.0),
    ];
    for (x, y, rect_w, rect_h) in edges {
        if let Some(rect) = Rect::from_xywh(x, y, rect_w, rect_h) {
            pixmap.fill_rect(rect, &paint, Transform::identity(), None);
        }
    }

    paint.anti_alias = true;
    for (center_x, color) in DOT_CENTERS_X
        .into_iter()
        .zip([theme.close, theme.minimize, theme.zoom])
    {
        paint.set_color(skia_color(color));
        if let Some(dot) = PathBuilder::from_circle(center_x, DOT_CENTER_Y, DOT_RADIUS) {
            pixmap.fill_path(&dot, &paint, FillRule::Winding, Transform::identity(), None);
        }
    }

    // Every pixel is opaque, so premultiplied bytes equal straight RGBA.
    Ok(pixmap.take())
}

fn load_font(layout: &LayoutConfig) -> Result<(Font, PathBuf)> {
    if let Some(path) = &layout.font_path {
        let font = read_font(path, layout.font_sha256.as_deref())?;
        return Ok((font, path.clone()));
    }

    for candidate in SYSTEM_MONO_FONTS {
        let path = Path::new(candidate);
        if !path.is_file() {
            continue;
        }
        match read_font(path, layout.font_sha256.as_deref()) {
            Ok(font) => return Ok((font, path.to_path_buf())),
            Err(error) => debug!(font = candidate, error = %format!("{error:#}"), "skipping font"),
        }
    }
    bail!("no font configured and none of the common monospace fonts were found")
}

fn read_font(path: &Path, expected_sha256: Option<&str>) -> Result<Font> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read font file '{}'", path.display()))?;
    if let Some(expected) = expected_sha256 {
        let actual = sha256_hex(&bytes);
        if !actual.eq_ignore_ascii_case(expected.trim()) {
            bail!(
                "font '{}' expected sha256={} actual sha256={}",
                path.display(),
                expected.trim(),
                actual
            );
        }
    }
    Font::from_bytes(bytes, FontSettings::default())
        .map_err(|error| anyhow!("failed to parse font '{}': {error}", path.display()))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, RowTarget};
    use crate::terminal::{Segment, StyledLine};

    fn config() -> RenderConfig {
        RenderConfig {
            width: 160,
            height: 120,
            ..RenderConfig::default()
        }
    }

    fn frame(buffer: TerminalBuffer, cursor_drawn: bool) -> Frame {
        Frame {
            index: 0,
            scene_index: 0,
            scene_frame: 0,
            time_ms: 0,
            snapshot: Arc::new(buffer),
            cursor_drawn,
        }
    }

    fn pixel(raster: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
        let idx = ((y * width + x) * 4) as usize;
        [raster[idx], raster[idx + 1], raster[idx + 2], raster[idx + 3]]
    }

    #[test]
    fn chrome_has_border_bar_and_dots() {
        let config = config();
        let painter = TerminalPainter::with_block_glyphs(&config).expect("painter");
        let raster = painter.render(&frame(TerminalBuffer::new(""), false));

        assert_eq!(raster.len(), 160 * 120 * 4);
        assert_eq!(pixel(&raster, 160, 0, 0), config.theme.border.rgba());
        assert_eq!(pixel(&raster, 160, 100, 10), config.theme.bar.rgba());
        assert_eq!(pixel(&raster, 160, 17, 17), config.theme.close.rgba());
        assert_eq!(pixel(&raster, 160, 80, 100), config.theme.background.rgba());
    }

    #[test]
    fn rendering_is_idempotent() {
        let painter = TerminalPainter::with_block_glyphs(&config()).expect("painter");
        let mut buffer = TerminalBuffer::new("demo");
        buffer.apply(&Action::TypeChar {
            row: RowTarget::Active,
            text: "ls".to_owned(),
        });
        let frame = frame(buffer, true);
        assert_eq!(painter.render(&frame), painter.render(&frame));
    }

    #[test]
    fn cursor_is_drawn_only_when_requested() {
        let config = config();
        let painter = TerminalPainter::with_block_glyphs(&config).expect("painter");
        let mut buffer = TerminalBuffer::new("demo");
        buffer.apply(&Action::TypeChar {
            row: RowTarget::Active,
            text: "ls".to_owned(),
        });

        let x = config.layout.padding + painter.text_width("$ ls").round() as u32 + 1;
        let y = config.layout.bar_height + config.layout.padding + 2;
        let lit = painter.render(&frame(buffer.clone(), true));
        let dark = painter.render(&frame(buffer, false));

        assert_eq!(pixel(&lit, 160, x, y), config.theme.accent.rgba());
        assert_eq!(pixel(&dark, 160, x, y), config.theme.background.rgba());
    }

    #[test]
    fn block_measure_matches_cursor_math() {
        let painter = TerminalPainter::with_block_glyphs(&config()).expect("painter");
        let advance = (14.0_f32 * 0.6).round();
        assert_eq!(painter.text_width("abc"), advance * 3.0);
    }

    #[test]
    fn overflowing_rows_scroll() {
        let config = config();
        let painter = TerminalPainter::with_block_glyphs(&config).expect("painter");
        // 120px tall: 44px of text area below the bar fits two 22px rows.
        assert_eq!(painter.visible_rows(), 2);

        let mut buffer = TerminalBuffer::new("");
        for index in 0..5 {
            buffer.lines.push(StyledLine::new(vec![Segment::new(
                format!("{index}"),
                ColorTag::Muted,
            )]));
        }
        buffer.cursor_visible = true;
        buffer.cursor_column = 1;

        // Rows 3 and 4 are on screen; row 4 sits at the bottom slot.
        let layout = &config.layout;
        let bottom_top = layout.bar_height + layout.padding + layout.line_height;
        let glyph_x = config.layout.padding + 2;
        let cursor_x = config.layout.padding + painter.text_width("4") as u32 + 2;

        buffer.cursor_row = 4;
        let with_cursor = painter.render(&frame(buffer.clone(), true));
        assert_eq!(with_cursor.len(), painter.frame_size());
        assert_eq!(
            pixel(&with_cursor, 160, glyph_x, bottom_top + 4),
            config.theme.muted.rgba()
        );
        assert_eq!(
            pixel(&with_cursor, 160, cursor_x, bottom_top + 2),
            config.theme.accent.rgba()
        );

        // A cursor on a row that scrolled away is not drawn anywhere.
        buffer.cursor_row = 0;
        let scrolled_lit = painter.render(&frame(buffer.clone(), true));
        let scrolled_dark = painter.render(&frame(buffer, false));
        assert_eq!(scrolled_lit, scrolled_dark);
        assert_eq!(
            pixel(&scrolled_lit, 160, cursor_x, bottom_top + 2),
            config.theme.background.rgba()
        );
    }

    #[test]
    fn missing_font_path_is_an_error_for_the_loader() {
        let layout = LayoutConfig {
            font_path: Some(PathBuf::from("/definitely/not/here.ttf")),
            ..LayoutConfig::default()
        };
        assert!(load_font(&layout).is_err());

        let config = RenderConfig {
            layout,
            ..config()
        };
        let painter = TerminalPainter::new(&config).expect("falls back to blocks");
        assert!(matches!(painter.origin(), FontOrigin::Blocks { .. }));
    }

    #[test]
    fn sha256_hex_matches_known_digest() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
