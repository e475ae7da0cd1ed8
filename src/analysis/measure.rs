use anyhow::{bail, Result};

use crate::analysis::{Measurements, Roi, RoiSet};
use crate::conversion::Plane;
use crate::state::MeasurementFlags;

/// Intensity statistics of one region on one plane.
#[derive(Debug, Clone, PartialEq)]
pub struct RoiStatistics {
    pub area: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: u16,
    pub max: u16,
    pub centroid_x: f64,
    pub centroid_y: f64,
    pub raw_integrated_density: u64,
}

impl RoiStatistics {
    pub fn of(plane: &Plane, roi: &Roi) -> Self {
        let area = roi.area();
        let mut sum = 0u64;
        let mut sum_sq = 0f64;
        let mut min = u16::MAX;
        let mut max = u16::MIN;
        let mut sx = 0f64;
        let mut sy = 0f64;

        for &(x, y) in &roi.pixels {
            let v = plane.get_pixel(x, y)[0];
            sum += v as u64;
            sum_sq += v as f64 * v as f64;
            min = min.min(v);
            max = max.max(v);
            sx += x as f64 + 0.5;
            sy += y as f64 + 0.5;
        }

        if area == 0 {
            return RoiStatistics {
                area,
                mean: 0.0,
                std_dev: 0.0,
                min: 0,
                max: 0,
                centroid_x: 0.0,
                centroid_y: 0.0,
                raw_integrated_density: 0,
            };
        }

        let n = area as f64;
        let mean = sum as f64 / n;
        // Sample standard deviation
        let std_dev = if area > 1 {
            ((sum_sq - n * mean * mean) / (n - 1.0)).max(0.0).sqrt()
        } else {
            0.0
        };

        RoiStatistics {
            area,
            mean,
            std_dev,
            min,
            max,
            centroid_x: sx / n,
            centroid_y: sy / n,
            raw_integrated_density: sum,
        }
    }
}

pub fn measurement_headers(flags: &MeasurementFlags) -> Vec<String> {
    let mut headers = vec!["ROI"];
    if flags.area {
        headers.push("Area");
    }
    if flags.mean {
        headers.push("Mean");
    }
    if flags.std_dev {
        headers.push("StdDev");
    }
    if flags.min_max {
        headers.extend(["Min", "Max"]);
    }
    if flags.centroid {
        headers.extend(["X", "Y"]);
    }
    if flags.integrated_density {
        headers.extend(["IntDen", "RawIntDen"]);
    }
    headers.into_iter().map(|h| h.to_owned()).collect()
}

fn measurement_row(number: usize, stats: &RoiStatistics, flags: &MeasurementFlags) -> Vec<String> {
    let mut row = vec![number.to_string()];
    if flags.area {
        row.push(stats.area.to_string());
    }
    if flags.mean {
        row.push(format!("{:.3}", stats.mean));
    }
    if flags.std_dev {
        row.push(format!("{:.3}", stats.std_dev));
    }
    if flags.min_max {
        row.push(stats.min.to_string());
        row.push(stats.max.to_string());
    }
    if flags.centroid {
        row.push(format!("{:.3}", stats.centroid_x));
        row.push(format!("{:.3}", stats.centroid_y));
    }
    if flags.integrated_density {
        row.push(format!("{:.3}", stats.area as f64 * stats.mean));
        row.push(stats.raw_integrated_density.to_string());
    }
    row
}

/// Measures every ROI on `plane`, one row per ROI in ROI order.
pub fn measure_rois(plane: &Plane, rois: &RoiSet, flags: &MeasurementFlags) -> Result<Measurements> {
    if plane.dimensions() != (rois.width, rois.height) {
        bail!(
            "Plane is {:?} but ROIs were detected on a {}x{} image",
            plane.dimensions(),
            rois.width,
            rois.height
        );
    }

    let rows = rois
        .rois
        .iter()
        .enumerate()
        .map(|(i, roi)| measurement_row(i + 1, &RoiStatistics::of(plane, roi), flags))
        .collect();

    Ok(Measurements {
        headers: measurement_headers(flags),
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::particles::detect_rois;
    use image::Luma;

    fn gradient_square() -> (Plane, RoiSet) {
        // 2x2 bright square with values 100, 200, 300, 400 on a dark field
        let mut plane = Plane::from_pixel(6, 6, Luma([0]));
        plane.put_pixel(2, 2, Luma([100]));
        plane.put_pixel(3, 2, Luma([200]));
        plane.put_pixel(2, 3, Luma([300]));
        plane.put_pixel(3, 3, Luma([400]));
        let rois = detect_rois(&plane, 50.0, 65535.0, 1);
        (plane, rois)
    }

    #[test]
    fn test_statistics() {
        let (plane, rois) = gradient_square();
        let stats = RoiStatistics::of(&plane, &rois.rois[0]);
        assert_eq!(stats.area, 4);
        assert_eq!(stats.mean, 250.0);
        assert_eq!(stats.min, 100);
        assert_eq!(stats.max, 400);
        assert_eq!(stats.raw_integrated_density, 1000);
        assert_eq!(stats.centroid_x, 3.0);
        assert_eq!(stats.centroid_y, 3.0);
        assert!((stats.std_dev - 129.099).abs() < 1e-3);
    }

    #[test]
    fn test_default_columns() {
        let (plane, rois) = gradient_square();
        let m = measure_rois(&plane, &rois, &MeasurementFlags::default()).unwrap();
        assert_eq!(m.headers, vec!["ROI", "Area", "Mean", "Min", "Max"]);
        assert_eq!(m.rows, vec![vec!["1", "4", "250.000", "100", "400"]]);
    }

    #[test]
    fn test_all_columns_share_header_width() {
        let (plane, rois) = gradient_square();
        let flags = MeasurementFlags {
            area: true,
            mean: true,
            std_dev: true,
            min_max: true,
            centroid: true,
            integrated_density: true,
        };
        let m = measure_rois(&plane, &rois, &flags).unwrap();
        assert_eq!(m.headers.len(), 10);
        assert_eq!(m.rows[0].len(), m.headers.len());
        assert_eq!(m.rows[0][8], "1000.000");
    }

    #[test]
    fn test_no_rois_gives_no_rows() {
        let plane = Plane::from_pixel(4, 4, Luma([0]));
        let rois = detect_rois(&plane, 50.0, 65535.0, 1);
        let m = measure_rois(&plane, &rois, &MeasurementFlags::default()).unwrap();
        assert!(m.rows.is_empty());
        assert!(!m.headers.is_empty());
    }

    #[test]
    fn test_size_mismatch_is_an_error() {
        let (_, rois) = gradient_square();
        let other = Plane::new(3, 3);
        assert!(measure_rois(&other, &rois, &MeasurementFlags::default()).is_err());
    }
}
