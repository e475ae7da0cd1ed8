//! The image-analysis capabilities the batch pipeline drives, and the
//! built-in engine that provides them.

use anyhow::Result;
use std::path::Path;

pub mod builtin;
pub mod coloc;
pub mod measure;
pub mod particles;
pub mod roiset;
pub mod threshold;

/// Axis aligned pixel bounds, `right` and `bottom` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

/// A detected region.
#[derive(Debug, Clone, PartialEq)]
pub struct Roi {
    /// Member pixels in raster order
    pub pixels: Vec<(u32, u32)>,
    pub bounds: Bounds,
    /// Closed boundary polygon through the outermost member pixels
    pub outline: Vec<(u32, u32)>,
}

impl Roi {
    pub fn area(&self) -> usize {
        self.pixels.len()
    }
}

/// Regions detected on the reference channel of one image. Shared read-only
/// by every measurement and colocalisation step of that image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoiSet {
    pub width: u32,
    pub height: u32,
    pub rois: Vec<Roi>,
}

impl RoiSet {
    pub fn len(&self) -> usize {
        self.rois.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rois.is_empty()
    }
}

/// Column headers plus one row of values per ROI.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Measurements {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Everything the batch pipeline needs from an image-analysis backend.
///
/// Every call is synchronous. A call may block indefinitely (e.g. waiting on a
/// user to confirm a threshold); errors are not retried by the caller.
pub trait AnalysisEngine {
    /// A loaded multi-channel image
    type Image;
    /// A single channel plane, or a rendered overlay
    type Plane;

    fn open(&mut self, path: &Path) -> Result<Self::Image>;

    /// Most channels any opened image can provide, `None` when unbounded.
    fn max_channels(&self) -> Option<usize> {
        None
    }

    /// Threshold for `channel` (1-based), named `channel_name` for prompts.
    fn threshold(&mut self, image: &Self::Image, channel: usize, channel_name: &str) -> Result<f64>;

    fn extract_channel_plane(&mut self, image: &Self::Image, channel: usize) -> Result<Self::Plane>;

    /// Regions of pixels within `[low, high]` whose area is at least `min_size`.
    fn detect_rois(&mut self, plane: &Self::Plane, low: f64, high: f64, min_size: u32) -> Result<RoiSet>;

    /// Renders the ROI outlines.
    fn draw_outlines(&mut self, plane: &Self::Plane, rois: &RoiSet) -> Result<Self::Plane>;

    fn measure(&mut self, plane: &Self::Plane, rois: &RoiSet) -> Result<Measurements>;

    /// Headers shared by every `colocalisation_test` row.
    fn colocalisation_headers(&self) -> Vec<String>;

    fn colocalisation_test(
        &mut self,
        a: &Self::Plane,
        b: &Self::Plane,
        rois: &RoiSet,
        index: usize,
    ) -> Result<Vec<String>>;

    fn save_roi_set(&mut self, rois: &RoiSet, path: &Path) -> Result<()>;

    fn save_image(&mut self, plane: &Self::Plane, path: &Path) -> Result<()>;
}
