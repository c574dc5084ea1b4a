use std::fs;
use std::path::{Path, PathBuf};

use image::DynamicImage;
use tracing::debug;

use crate::error::Result;
use crate::util::file_tag;

/// Where finished images go.
pub trait ImageSink: Send {
    fn save(&mut self, image: &DynamicImage, tag: &str, seed: Option<u64>) -> Result<PathBuf>;
}

/// Writes numbered PNG files into a directory.
#[derive(Debug)]
pub struct DiskSink {
    dir: PathBuf,
    next_index: usize,
}

impl DiskSink {
    /// Creates `dir` if needed and continues numbering after existing files.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let next_index = next_free_index(&dir)?;
        Ok(Self { dir, next_index })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ImageSink for DiskSink {
    fn save(&mut self, image: &DynamicImage, tag: &str, seed: Option<u64>) -> Result<PathBuf> {
        let seed = seed.map_or_else(|| "random".to_string(), |seed| seed.to_string());
        let path = self
            .dir
            .join(format!("{:05}-{}-{}.png", self.next_index, seed, file_tag(tag)));
        image.save_with_format(&path, image::ImageFormat::Png)?;
        self.next_index = self.next_index.saturating_add(1);
        debug!("Saved {}", path.display());
        Ok(path)
    }
}

fn next_free_index(dir: &Path) -> Result<usize> {
    let mut next = 0;
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name();
        let index = name
            .to_string_lossy()
            .split('-')
            .next()
            .and_then(|prefix| prefix.parse::<usize>().ok());
        if let Some(index) = index {
            next = next.max(index.saturating_add(1));
        }
    }
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_files_are_numbered_after_existing_ones() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("00007-1-old.png"), b"x").unwrap();
        fs::write(tmp.path().join("notes.txt"), b"x").unwrap();

        let mut sink = DiskSink::new(tmp.path().join(".")).unwrap();
        let image = DynamicImage::new_rgb8(2, 2);
        let first = sink.save(&image, "Ink Style", Some(42)).unwrap();
        let second = sink.save(&image, "grid", None).unwrap();

        assert!(first.ends_with("00008-42-Ink_Style.png"));
        assert!(second.ends_with("00009-random-grid.png"));
        assert_eq!(image::open(&first).unwrap().width(), 2);
    }

    #[test]
    fn test_largest_numeric_prefix_does_not_overflow() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(format!("{}-1-old.png", usize::MAX)), b"x").unwrap();

        let sink = DiskSink::new(tmp.path()).unwrap();
        assert_eq!(sink.next_index, usize::MAX);
    }

    #[test]
    fn test_creates_missing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = DiskSink::new(tmp.path().join("out/today")).unwrap();
        assert!(sink.dir().is_dir());
    }
}
