//! Grid composition
//!
//! Tiles batch results into a single contact sheet and labels each tile.

use std::path::Path;

use image::{imageops, DynamicImage, Rgba, RgbaImage};
use tracing::{debug, warn};

use crate::config::{RowPolicy, TextOverlay};
use crate::error::Result;
use crate::path_guard::PathGuard;

/// Offset of a label from its tile's top-left corner.
const LABEL_INSET: i32 = 8;

/// Font loading and glyph drawing, provided by the caller.
pub trait TextRenderer {
    type Font;

    fn load_font(&self, path: &Path, size: f32) -> Result<Self::Font>;

    /// The bundled font, if the renderer has one.
    fn default_font(&self, size: f32) -> Option<Self::Font>;

    /// Draws `text` with its top-left corner at `position`, clipped to the canvas.
    fn draw_text(
        &self,
        canvas: &mut RgbaImage,
        text: &str,
        position: (i32, i32),
        font: &Self::Font,
        color: Rgba<u8>,
    );
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    pub rows: usize,
    pub cols: usize,
}

impl GridLayout {
    /// Rows aim for a roughly 4:3 sheet under [`RowPolicy::Auto`].
    pub fn for_count(count: usize, policy: RowPolicy) -> Self {
        let count = count.max(1);
        let rows = match policy {
            RowPolicy::Auto => (3.0 * (count as f64 / 12.0).sqrt()).round_ties_even() as usize,
            RowPolicy::Fixed(rows) => rows.min(count),
        }
        .max(1);

        Self {
            rows,
            cols: count.div_ceil(rows),
        }
    }

    /// Top-left corner of cell `index`, row-major.
    pub fn cell_origin(&self, index: usize, tile: (u32, u32)) -> (u32, u32) {
        let col = (index % self.cols) as u32;
        let row = (index / self.cols) as u32;
        (col * tile.0, row * tile.1)
    }
}

#[derive(Debug, Clone)]
pub struct GridImage {
    pub image: DynamicImage,
    pub layout: GridLayout,
}

pub struct GridComposer<'a, T> {
    renderer: &'a T,
    guard: &'a PathGuard,
}

impl<'a, T: TextRenderer> GridComposer<'a, T> {
    pub fn new(renderer: &'a T, guard: &'a PathGuard) -> Self {
        Self { renderer, guard }
    }

    /// Composes `images` into one grid, labelling tile `i` with `labels[i]`.
    /// Returns `None` for fewer than two images. Tiles take the size of the
    /// first image.
    pub fn compose(
        &self,
        images: &[DynamicImage],
        labels: &[String],
        rows: RowPolicy,
        overlay: &TextOverlay,
    ) -> Option<GridImage> {
        if images.len() < 2 {
            return None;
        }

        let layout = GridLayout::for_count(images.len(), rows);
        let tile = (images[0].width(), images[0].height());
        let mut canvas = RgbaImage::new(layout.cols as u32 * tile.0, layout.rows as u32 * tile.1);
        debug!(
            "Composing {} images into {}x{} grid",
            images.len(),
            layout.cols,
            layout.rows
        );

        for (index, image) in images.iter().enumerate() {
            let (x, y) = layout.cell_origin(index, tile);
            imageops::overlay(&mut canvas, &image.to_rgba8(), x as i64, y as i64);
        }

        if overlay.enabled {
            if let Some(font) = self.font(overlay) {
                for (index, label) in labels.iter().enumerate().take(images.len()) {
                    if label.is_empty() {
                        continue;
                    }
                    let (x, y) = layout.cell_origin(index, tile);
                    let position = (x as i32 + LABEL_INSET, y as i32 + LABEL_INSET);
                    self.draw_stroked(&mut canvas, label, position, &font, overlay);
                }
            }
        }

        Some(GridImage {
            image: DynamicImage::ImageRgba8(canvas),
            layout,
        })
    }

    /// The configured font when it is inside the root and loads, else the default.
    fn font(&self, overlay: &TextOverlay) -> Option<T::Font> {
        if let Some(path) = &overlay.font_path {
            match self.guard.check(path) {
                Ok(path) => match self.renderer.load_font(&path, overlay.font_size) {
                    Ok(font) => return Some(font),
                    Err(err) => warn!("Falling back to default font: {}", err),
                },
                Err(err) => warn!("Falling back to default font: {}", err),
            }
        }

        let font = self.renderer.default_font(overlay.font_size);
        if font.is_none() {
            warn!("No default font available, skipping labels");
        }
        font
    }

    /// Outline first, at every offset within the stroke width, then the fill.
    fn draw_stroked(
        &self,
        canvas: &mut RgbaImage,
        text: &str,
        (x, y): (i32, i32),
        font: &T::Font,
        overlay: &TextOverlay,
    ) {
        let width = overlay.stroke_width as i32;
        let stroke = Rgba(overlay.stroke_color);
        for dy in (-width..=width).filter(|_| width > 0) {
            for dx in -width..=width {
                self.renderer
                    .draw_text(canvas, text, (x + dx, y + dy), font, stroke);
            }
        }
        self.renderer
            .draw_text(canvas, text, (x, y), font, Rgba(overlay.text_color));
    }
}
