use image::{ImageReader, RgbImage};
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

use crate::core::segment::Segment;

#[derive(Debug, Error)]
pub enum ImageLoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Segment has no screenshot")]
    NoScreenshot,
}

/// Decode a screenshot into an RGB pixel buffer.
pub fn load_rgb(path: &Path) -> Result<RgbImage, ImageLoadError> {
    let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    Ok(image.to_rgb8())
}

/// Pixel buffers of segment screenshots, keyed by xpath.
///
/// A missing or undecodable screenshot is stored as `None`; callers treat it
/// as matching nothing.
#[derive(Debug, Default, Clone)]
pub struct ImageStore {
    images: HashMap<String, Option<RgbImage>>,
}

impl ImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every segment's screenshot in parallel.
    pub fn prefetch<'a, I>(segments: I) -> Self
    where
        I: IntoIterator<Item = &'a Segment>,
    {
        let segments: Vec<&Segment> = segments.into_iter().collect();
        let images = segments
            .par_iter()
            .map(|segment| (segment.xpath.clone(), load_segment_image(segment)))
            .collect();
        Self { images }
    }

    /// Load any segment not already present.
    pub fn ensure_loaded<'a, I>(&mut self, segments: I)
    where
        I: IntoIterator<Item = &'a Segment>,
    {
        let pending: Vec<&Segment> = segments
            .into_iter()
            .filter(|s| !self.images.contains_key(&s.xpath))
            .collect();
        if pending.is_empty() {
            return;
        }
        self.images.extend(Self::prefetch(pending).images);
    }

    pub fn insert(&mut self, xpath: impl Into<String>, image: Option<RgbImage>) {
        self.images.insert(xpath.into(), image);
    }

    /// The pixel buffer for `xpath`, or `None` when it is absent or unreadable.
    pub fn get(&self, xpath: &str) -> Option<&RgbImage> {
        self.images.get(xpath).and_then(Option::as_ref)
    }

    pub fn contains(&self, xpath: &str) -> bool {
        self.images.contains_key(xpath)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Number of entries that failed to load.
    pub fn unreadable(&self) -> usize {
        self.images.values().filter(|image| image.is_none()).count()
    }
}

fn load_segment_image(segment: &Segment) -> Option<RgbImage> {
    if !segment.has_screenshot() {
        return None;
    }
    match load_rgb(Path::new(&segment.screenshot)) {
        Ok(image) => Some(image),
        Err(e) => {
            log::warn!("Error loading {}: {}", segment.screenshot, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_prefetch_loads_and_marks_failures() {
        let temp_dir = TempDir::new().unwrap();
        let good_path = temp_dir.path().join("good.png");
        RgbImage::from_pixel(4, 3, Rgb([10, 20, 30]))
            .save(&good_path)
            .unwrap();
        let bad_path = temp_dir.path().join("bad.png");
        fs::write(&bad_path, b"definitely not a png").unwrap();

        let segments = vec![
            Segment::new("div", "/html[1]/div[1]", 0)
                .with_screenshot(good_path.to_string_lossy()),
            Segment::new("div", "/html[1]/div[2]", 1).with_screenshot(bad_path.to_string_lossy()),
            Segment::new("div", "/html[1]/div[3]", 2)
                .with_screenshot(temp_dir.path().join("missing.png").to_string_lossy()),
            Segment::new("div", "/html[1]/div[4]", 3),
        ];

        let store = ImageStore::prefetch(&segments);
        assert_eq!(store.len(), 4);
        assert_eq!(store.unreadable(), 3);

        let good = store.get("/html[1]/div[1]").unwrap();
        assert_eq!(good.dimensions(), (4, 3));
        assert_eq!(good.get_pixel(0, 0), &Rgb([10, 20, 30]));

        assert!(store.contains("/html[1]/div[2]"));
        assert!(store.get("/html[1]/div[2]").is_none());
        assert!(store.get("/html[1]/div[9]").is_none());
    }

    #[test]
    fn test_ensure_loaded_keeps_existing_entries() {
        let mut store = ImageStore::new();
        store.insert("/html[1]/div[1]", Some(RgbImage::new(2, 2)));

        let segments = vec![
            Segment::new("div", "/html[1]/div[1]", 0).with_screenshot("nowhere.png"),
            Segment::new("div", "/html[1]/div[2]", 1),
        ];
        store.ensure_loaded(&segments);

        assert_eq!(store.len(), 2);
        assert!(store.get("/html[1]/div[1]").is_some());
        assert!(store.get("/html[1]/div[2]").is_none());
    }

    #[test]
    fn test_load_rgb_drops_alpha() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("alpha.png");
        image::RgbaImage::from_pixel(2, 2, image::Rgba([1, 2, 3, 128]))
            .save(&path)
            .unwrap();

        let rgb = load_rgb(&path).unwrap();
        assert_eq!(rgb.get_pixel(1, 1), &Rgb([1, 2, 3]));
    }
}
