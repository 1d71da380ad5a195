use anyhow::{Context, Result};
use formflux_live::visual::{FrameSource, VideoFrame};
use image::RgbImage;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

/// Camera stand-in that loops over the images of a directory.
///
/// Files are read once, in name order. Anything that does not decode as an
/// image is skipped.
pub struct FrameDirectory {
    frames: Vec<RgbImage>,
    next: AtomicUsize,
    started: Instant,
}

impl FrameDirectory {
    pub fn open(dir: &Path) -> Result<Self> {
        let mut paths: Vec<_> = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read frame directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .collect();
        paths.sort();

        let mut frames = Vec::with_capacity(paths.len());
        for path in paths {
            match image::open(&path) {
                Ok(image) => frames.push(image.to_rgb8()),
                Err(e) => tracing::debug!("skipping {}: {}", path.display(), e),
            }
        }
        if frames.is_empty() {
            anyhow::bail!("No decodable frames in {}", dir.display());
        }
        tracing::info!("Loaded {} frames from {}", frames.len(), dir.display());

        Ok(Self {
            frames,
            next: AtomicUsize::new(0),
            started: Instant::now(),
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for FrameDirectory {
    fn is_active(&self) -> bool {
        !self.frames.is_empty()
    }

    fn current_frame(&self) -> Option<VideoFrame> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.frames.len();
        Some(VideoFrame {
            image: self.frames[index].clone(),
            timestamp_ms: self.started.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_cycle_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::from_pixel(8, 4, image::Rgb([255, 0, 0]))
            .save(dir.path().join("b.png"))
            .unwrap();
        RgbImage::from_pixel(4, 4, image::Rgb([0, 255, 0]))
            .save(dir.path().join("a.png"))
            .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a frame").unwrap();

        let source = FrameDirectory::open(dir.path()).unwrap();

        assert_eq!(source.len(), 2);
        assert!(source.is_active());
        let widths: Vec<u32> = (0..3)
            .map(|_| source.current_frame().unwrap().image.width())
            .collect();
        assert_eq!(widths, vec![4, 8, 4]);
    }

    #[test]
    fn test_empty_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();

        assert!(FrameDirectory::open(dir.path()).is_err());
    }
}
