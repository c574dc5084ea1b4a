use std::fs;
use std::path::{Path, PathBuf};

use ab_glyph::{point, Font, FontArc, GlyphId, PxScale, ScaleFont};
use image::{Rgba, RgbaImage};
use lora_queue_core::{Error, TextRenderer};
use tracing::{info, warn};

/// Fonts tried in order when no default font is given on the command line.
const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/TTF/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans-Bold.ttf",
    "/System/Library/Fonts/Supplemental/Arial Bold.ttf",
    "C:\\Windows\\Fonts\\arialbd.ttf",
];

pub struct LoadedFont {
    font: FontArc,
    scale: PxScale,
}

/// Rasterizes labels with ab_glyph.
pub struct GlyphRenderer {
    default_font: Option<FontArc>,
}

impl GlyphRenderer {
    pub fn new(default_font: Option<&Path>) -> Self {
        let candidates: Vec<PathBuf> = match default_font {
            Some(path) => vec![path.to_path_buf()],
            None => SYSTEM_FONTS.iter().map(PathBuf::from).collect(),
        };

        let default_font = candidates.iter().find_map(|path| {
            let font = FontArc::try_from_vec(fs::read(path).ok()?).ok()?;
            info!("Using {} as default label font", path.display());
            Some(font)
        });
        if default_font.is_none() {
            warn!("No default label font found; grid labels need a font path");
        }

        Self { default_font }
    }
}

impl TextRenderer for GlyphRenderer {
    type Font = LoadedFont;

    fn load_font(&self, path: &Path, size: f32) -> lora_queue_core::Result<LoadedFont> {
        let bytes = fs::read(path).map_err(|e| Error::FontLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let font = FontArc::try_from_vec(bytes).map_err(|e| Error::FontLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Ok(LoadedFont {
            font,
            scale: PxScale::from(size),
        })
    }

    fn default_font(&self, size: f32) -> Option<LoadedFont> {
        Some(LoadedFont {
            font: self.default_font.clone()?,
            scale: PxScale::from(size),
        })
    }

    fn draw_text(
        &self,
        canvas: &mut RgbaImage,
        text: &str,
        (x, y): (i32, i32),
        font: &LoadedFont,
        color: Rgba<u8>,
    ) {
        let scaled = font.font.as_scaled(font.scale);
        let mut caret = point(x as f32, y as f32 + scaled.ascent());
        let mut previous: Option<GlyphId> = None;

        for c in text.chars() {
            let id = scaled.glyph_id(c);
            if let Some(previous) = previous {
                caret.x += scaled.kern(previous, id);
            }
            let glyph = id.with_scale_and_position(font.scale, caret);
            caret.x += scaled.h_advance(id);
            previous = Some(id);

            let Some(outlined) = font.font.outline_glyph(glyph) else {
                continue;
            };
            let bounds = outlined.px_bounds();
            outlined.draw(|gx, gy, coverage| {
                let px = bounds.min.x as i32 + gx as i32;
                let py = bounds.min.y as i32 + gy as i32;
                if px < 0 || py < 0 || px as u32 >= canvas.width() || py as u32 >= canvas.height() {
                    return;
                }
                blend(canvas.get_pixel_mut(px as u32, py as u32), color, coverage);
            });
        }
    }
}

fn blend(pixel: &mut Rgba<u8>, color: Rgba<u8>, coverage: f32) {
    let alpha = coverage.clamp(0.0, 1.0) * color[3] as f32 / 255.0;
    for channel in 0..3 {
        let mixed = color[channel] as f32 * alpha + pixel[channel] as f32 * (1.0 - alpha);
        pixel[channel] = mixed.round() as u8;
    }
    let out_alpha = alpha * 255.0 + pixel[3] as f32 * (1.0 - alpha);
    pixel[3] = out_alpha.round() as u8;
}
