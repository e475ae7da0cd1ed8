use anyhow::{Context, Result};
use image::ImageFormat;
use std::path::Path;

use crate::analysis::coloc::ColocalisationTest;
use crate::analysis::threshold::ThresholdSelector;
use crate::analysis::{measure, particles, roiset, AnalysisEngine, Measurements, RoiSet};
use crate::conversion::{plane_to_gray8, Micrograph, Plane, MAX_CHANNELS};
use crate::state::{Configuration, MeasurementFlags};

/// Analysis engine backed by `image`/`imageproc`.
pub struct BuiltinEngine {
    threshold: ThresholdSelector,
    measurements: MeasurementFlags,
    coloc: ColocalisationTest,
}

impl BuiltinEngine {
    pub fn from_config(config: &Configuration) -> Self {
        let analysis = &config.analysis;
        BuiltinEngine {
            threshold: ThresholdSelector {
                mode: analysis.threshold_mode,
                fixed: analysis.fixed_threshold,
            },
            measurements: config.measurements,
            coloc: ColocalisationTest {
                iterations: analysis.coloc_iterations,
                max_shift: analysis.coloc_max_shift,
                seed: analysis.coloc_seed,
            },
        }
    }
}

impl AnalysisEngine for BuiltinEngine {
    type Image = Micrograph;
    type Plane = Plane;

    fn open(&mut self, path: &Path) -> Result<Micrograph> {
        let micrograph = Micrograph::open(path)?;
        debug!(
            "Opened {:?} with {} channel(s)",
            path,
            micrograph.num_channels()
        );
        Ok(micrograph)
    }

    fn max_channels(&self) -> Option<usize> {
        Some(MAX_CHANNELS)
    }

    fn threshold(&mut self, image: &Micrograph, channel: usize, channel_name: &str) -> Result<f64> {
        self.threshold.select(image.plane(channel)?, channel_name)
    }

    fn extract_channel_plane(&mut self, image: &Micrograph, channel: usize) -> Result<Plane> {
        Ok(image.plane(channel)?.clone())
    }

    fn detect_rois(&mut self, plane: &Plane, low: f64, high: f64, min_size: u32) -> Result<RoiSet> {
        Ok(particles::detect_rois(plane, low, high, min_size))
    }

    fn draw_outlines(&mut self, _plane: &Plane, rois: &RoiSet) -> Result<Plane> {
        Ok(particles::draw_outlines(rois))
    }

    fn measure(&mut self, plane: &Plane, rois: &RoiSet) -> Result<Measurements> {
        measure::measure_rois(plane, rois, &self.measurements)
    }

    fn colocalisation_headers(&self) -> Vec<String> {
        ColocalisationTest::headers()
    }

    fn colocalisation_test(&mut self, a: &Plane, b: &Plane, rois: &RoiSet, index: usize) -> Result<Vec<String>> {
        let roi = rois
            .rois
            .get(index)
            .with_context(|| format!("No ROI at index {}", index))?;
        let result = self.coloc.run(a, b, roi, index)?;
        Ok(self.coloc.row(index + 1, &result))
    }

    fn save_roi_set(&mut self, rois: &RoiSet, path: &Path) -> Result<()> {
        roiset::save_roi_set(rois, path)
    }

    fn save_image(&mut self, plane: &Plane, path: &Path) -> Result<()> {
        plane_to_gray8(plane)
            .save_with_format(path, ImageFormat::Tiff)
            .with_context(|| format!("Failed to save image {:?}", path))?;
        info!("Saved {:?}", path);
        Ok(())
    }
}
