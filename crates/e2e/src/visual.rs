//! Visual regression testing with screenshot comparison

use std::path::{Path, PathBuf};

use image::{GenericImageView, Pixel, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};

/// Result of a visual comparison
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualDiff {
    pub name: String,

    /// Whether the images match (within threshold)
    pub matches: bool,

    /// Percentage of pixels that differ
    pub diff_percent: f64,

    pub diff_pixels: u64,
    pub total_pixels: u64,

    /// Path to the diff image (if generated)
    pub diff_image_path: Option<PathBuf>,

    /// A baseline was created from this screenshot
    pub baseline_created: bool,
}

/// Compares screenshots against stored baselines
pub struct VisualTester {
    baseline_dir: PathBuf,
    diff_dir: PathBuf,

    /// Default threshold (0.0 - 100.0 percent)
    threshold: f64,

    /// Largest per-channel difference still counted as equal
    tolerance: u8,

    /// Create missing baselines from the actual screenshot
    auto_update: bool,
}

impl VisualTester {
    pub fn new(config: VisualConfig) -> E2eResult<Self> {
        std::fs::create_dir_all(&config.baseline_dir)?;
        std::fs::create_dir_all(&config.diff_dir)?;

        Ok(Self {
            baseline_dir: config.baseline_dir,
            diff_dir: config.diff_dir,
            threshold: config.threshold,
            tolerance: config.tolerance,
            auto_update: config.auto_update,
        })
    }

    fn baseline_path(&self, name: &str) -> PathBuf {
        self.baseline_dir.join(format!("{}.png", name))
    }

    /// Compare a screenshot against the baseline of the same file name
    pub fn compare(&self, actual_path: &Path, threshold: Option<f64>) -> E2eResult<VisualDiff> {
        let threshold = threshold.unwrap_or(self.threshold);
        let name = actual_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .ok_or_else(|| {
                E2eError::VisualRegression(format!("Not a screenshot: {}", actual_path.display()))
            })?;
        let baseline_path = self.baseline_path(&name);

        if !actual_path.exists() {
            return Err(E2eError::VisualRegression(format!(
                "Actual screenshot not found: {}",
                actual_path.display()
            )));
        }

        if !baseline_path.exists() {
            if !self.auto_update {
                return Err(E2eError::BaselineNotFound(
                    baseline_path.to_string_lossy().to_string(),
                ));
            }
            info!("Creating baseline for '{}'", name);
            std::fs::copy(actual_path, &baseline_path)?;
            return Ok(VisualDiff {
                name,
                matches: true,
                diff_percent: 0.0,
                diff_pixels: 0,
                total_pixels: 0,
                diff_image_path: None,
                baseline_created: true,
            });
        }

        // Identical files need no decoding
        if hash_file(actual_path)? == hash_file(&baseline_path)? {
            debug!("Screenshot '{}' matches its baseline byte for byte", name);
            let (width, height) = image::image_dimensions(actual_path)?;
            return Ok(VisualDiff {
                name,
                matches: true,
                diff_percent: 0.0,
                diff_pixels: 0,
                total_pixels: width as u64 * height as u64,
                diff_image_path: None,
                baseline_created: false,
            });
        }

        let actual = image::open(actual_path)?.to_rgba8();
        let baseline = image::open(&baseline_path)?.to_rgba8();

        if actual.dimensions() != baseline.dimensions() {
            warn!(
                "Screenshot '{}' dimensions differ: actual {:?} vs baseline {:?}",
                name,
                actual.dimensions(),
                baseline.dimensions()
            );
        }

        let (diff_img, diff_pixels, total_pixels) = self.diff_images(&actual, &baseline);
        let diff_percent = if total_pixels == 0 {
            0.0
        } else {
            (diff_pixels as f64 / total_pixels as f64) * 100.0
        };
        let matches = diff_percent <= threshold;

        let diff_image_path = if diff_pixels > 0 {
            let path = self.diff_dir.join(format!("{}-diff.png", name));
            diff_img.save(&path)?;
            Some(path)
        } else {
            None
        };

        if !matches {
            warn!(
                "Visual regression detected in '{}': {:.2}% pixels differ (threshold: {:.2}%)",
                name, diff_percent, threshold
            );
        }

        Ok(VisualDiff {
            name,
            matches,
            diff_percent,
            diff_pixels,
            total_pixels,
            diff_image_path,
            baseline_created: false,
        })
    }

    /// Pixels outside the overlapping region count as different
    fn diff_images(&self, actual: &RgbaImage, baseline: &RgbaImage) -> (RgbaImage, u64, u64) {
        let width = actual.width().max(baseline.width());
        let height = actual.height().max(baseline.height());
        let mut diff_img = RgbaImage::new(width, height);
        let mut diff_pixels = 0u64;

        for y in 0..height {
            for x in 0..width {
                let a = actual.in_bounds(x, y).then(|| actual.get_pixel(x, y));
                let b = baseline.in_bounds(x, y).then(|| baseline.get_pixel(x, y));

                match (a, b) {
                    (Some(a), Some(b)) if !self.pixels_differ(a, b) => {
                        // Keep original but dim it
                        let c = a.channels();
                        diff_img.put_pixel(x, y, Rgba([c[0] / 2, c[1] / 2, c[2] / 2, 128]));
                    }
                    _ => {
                        diff_pixels += 1;
                        diff_img.put_pixel(x, y, Rgba([255, 0, 0, 255]));
                    }
                }
            }
        }

        (diff_img, diff_pixels, width as u64 * height as u64)
    }

    fn pixels_differ(&self, a: &Rgba<u8>, b: &Rgba<u8>) -> bool {
        a.channels()
            .iter()
            .zip(b.channels())
            .any(|(x, y)| x.abs_diff(*y) > self.tolerance)
    }

    /// Replace the baseline with the actual screenshot
    pub fn update_baseline(&self, actual_path: &Path) -> E2eResult<()> {
        let name = actual_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .ok_or_else(|| {
                E2eError::VisualRegression(format!("Not a screenshot: {}", actual_path.display()))
            })?;

        if !actual_path.exists() {
            return Err(E2eError::VisualRegression(format!(
                "Cannot update baseline: actual screenshot not found: {}",
                actual_path.display()
            )));
        }

        std::fs::copy(actual_path, self.baseline_path(&name))?;
        info!("Updated baseline for '{}'", name);
        Ok(())
    }

    /// Remove diff images left by a previous run
    pub fn clean_diffs(&self) -> E2eResult<()> {
        for entry in std::fs::read_dir(&self.diff_dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "png").unwrap_or(false) {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

fn hash_file(path: &Path) -> E2eResult<String> {
    let data = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(hex::encode(hasher.finalize()))
}

/// Configuration for visual testing
#[derive(Debug, Clone)]
pub struct VisualConfig {
    pub baseline_dir: PathBuf,
    pub diff_dir: PathBuf,
    pub threshold: f64,
    pub tolerance: u8,
    pub auto_update: bool,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            baseline_dir: PathBuf::from("test-results/baselines"),
            diff_dir: PathBuf::from("test-results/diffs"),
            threshold: 0.5,
            tolerance: 5,
            auto_update: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tester(root: &Path, auto_update: bool) -> VisualTester {
        VisualTester::new(VisualConfig {
            baseline_dir: root.join("baselines"),
            diff_dir: root.join("diffs"),
            auto_update,
            ..Default::default()
        })
        .unwrap()
    }

    fn solid(path: &Path, width: u32, height: u32, color: [u8; 4]) {
        RgbaImage::from_pixel(width, height, Rgba(color)).save(path).unwrap();
    }

    #[test]
    fn test_missing_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let actual = dir.path().join("components-button.png");
        solid(&actual, 4, 4, [255, 255, 255, 255]);

        let strict = tester(dir.path(), false);
        assert!(matches!(strict.compare(&actual, None), Err(E2eError::BaselineNotFound(_))));

        let updating = tester(dir.path(), true);
        let diff = updating.compare(&actual, None).unwrap();
        assert!(diff.baseline_created);
        assert!(dir.path().join("baselines/components-button.png").exists());
    }

    #[test]
    fn test_small_channel_noise_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let visual = tester(dir.path(), false);
        let actual = dir.path().join("shot.png");
        solid(&actual, 10, 10, [100, 100, 100, 255]);
        solid(&dir.path().join("baselines/shot.png"), 10, 10, [103, 98, 100, 255]);

        let diff = visual.compare(&actual, None).unwrap();
        assert!(diff.matches);
        assert_eq!(diff.diff_pixels, 0);
        assert!(diff.diff_image_path.is_none());
    }

    #[test]
    fn test_changed_pixels_fail_and_write_diff() {
        let dir = tempfile::tempdir().unwrap();
        let visual = tester(dir.path(), false);
        let actual = dir.path().join("shot.png");
        solid(&actual, 10, 10, [0, 0, 0, 255]);
        solid(&dir.path().join("baselines/shot.png"), 10, 10, [255, 255, 255, 255]);

        let diff = visual.compare(&actual, Some(1.0)).unwrap();
        assert!(!diff.matches);
        assert_eq!(diff.diff_pixels, 100);
        assert_eq!(diff.diff_percent, 100.0);
        assert!(diff.diff_image_path.unwrap().exists());
    }

    #[test]
    fn test_size_change_counts_uncovered_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let visual = tester(dir.path(), false);
        let actual = dir.path().join("shot.png");
        solid(&actual, 10, 10, [0, 0, 0, 255]);
        solid(&dir.path().join("baselines/shot.png"), 10, 5, [0, 0, 0, 255]);

        let diff = visual.compare(&actual, None).unwrap();
        assert_eq!(diff.total_pixels, 100);
        assert_eq!(diff.diff_pixels, 50);
    }
}
