use std::io::Cursor;

use image::{DynamicImage, ImageFormat};

use crate::error::Result;

/// Encodes an image as PNG bytes.
pub fn image_to_png(img: &DynamicImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

/// Reduces a model name to characters safe in a file name.
pub fn file_tag(name: &str) -> String {
    let tag: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let tag = tag.trim_matches('.');

    if tag.is_empty() {
        "image".to_string()
    } else {
        tag.to_string()
    }
}
