use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use itertools::iproduct;
use std::collections::HashMap;

use crate::analysis::{Bounds, Roi, RoiSet};
use crate::conversion::Plane;

/// Moore neighbourhood, clockwise starting west (y grows downward).
const NEIGHBOURS: [(i64, i64); 8] = [
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
];

/// Finds 8-connected regions of pixels within `[low, high]` with an area of
/// at least `min_size` pixels. Regions are ordered by the raster position of
/// their first pixel.
pub fn detect_rois(plane: &Plane, low: f64, high: f64, min_size: u32) -> RoiSet {
    let (width, height) = plane.dimensions();

    let mask = GrayImage::from_fn(width, height, |x, y| {
        let v = plane.get_pixel(x, y)[0] as f64;
        if v >= low && v <= high {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    });
    let labels = connected_components(&mask, Connectivity::Eight, Luma([0u8]));

    let mut order: HashMap<u32, usize> = HashMap::new();
    let mut groups: Vec<(u32, Vec<(u32, u32)>)> = vec![];
    iproduct!(0..height, 0..width).for_each(|(y, x)| {
        let label = labels.get_pixel(x, y)[0];
        if label == 0 {
            return;
        }
        let idx = *order.entry(label).or_insert_with(|| {
            groups.push((label, vec![]));
            groups.len() - 1
        });
        groups[idx].1.push((x, y));
    });

    let rois = groups
        .into_iter()
        .filter(|(_, pixels)| pixels.len() >= min_size as usize)
        .map(|(label, pixels)| {
            let is_member = |x: i64, y: i64| {
                x >= 0
                    && y >= 0
                    && x < width as i64
                    && y < height as i64
                    && labels.get_pixel(x as u32, y as u32)[0] == label
            };
            let outline = trace_outline(pixels[0], pixels.len(), is_member);
            Roi {
                bounds: bounds_of(&pixels),
                pixels,
                outline,
            }
        })
        .collect::<Vec<Roi>>();

    debug!(
        "detect_rois(): {} region(s) of at least {} px within [{}, {}]",
        rois.len(),
        min_size,
        low,
        high
    );

    RoiSet {
        width,
        height,
        rois,
    }
}

fn bounds_of(pixels: &[(u32, u32)]) -> Bounds {
    let mut bounds = Bounds {
        left: u32::MAX,
        top: u32::MAX,
        right: 0,
        bottom: 0,
    };
    for &(x, y) in pixels {
        bounds.left = bounds.left.min(x);
        bounds.top = bounds.top.min(y);
        bounds.right = bounds.right.max(x + 1);
        bounds.bottom = bounds.bottom.max(y + 1);
    }
    bounds
}

/// Moore-neighbour boundary tracing from `start`, which must be the first
/// member pixel in raster order. Stops on re-entering the start the way it
/// was first left.
pub fn trace_outline<F>(start: (u32, u32), area: usize, is_member: F) -> Vec<(u32, u32)>
where
    F: Fn(i64, i64) -> bool,
{
    let start = (start.0 as i64, start.1 as i64);
    let mut outline = vec![start];
    let mut current = start;
    let mut backtrack = (start.0 - 1, start.1);
    let limit = 8 * area + 8;

    while outline.len() <= limit {
        let offset = (backtrack.0 - current.0, backtrack.1 - current.1);
        let d = NEIGHBOURS.iter().position(|n| *n == offset).unwrap_or(0);

        let mut next = None;
        for k in 1..=8 {
            let i = (d + k) % 8;
            let p = (current.0 + NEIGHBOURS[i].0, current.1 + NEIGHBOURS[i].1);
            if is_member(p.0, p.1) {
                let prev = NEIGHBOURS[(i + 7) % 8];
                next = Some((p, (current.0 + prev.0, current.1 + prev.1)));
                break;
            }
        }

        // Isolated pixel
        let Some((p, b)) = next else { break };

        if current == start && outline.len() > 1 && p == outline[1] {
            outline.pop();
            break;
        }
        outline.push(p);
        current = p;
        backtrack = b;
    }

    outline
        .into_iter()
        .map(|(x, y)| (x as u32, y as u32))
        .collect()
}

/// White canvas with every ROI outline in black.
pub fn draw_outlines(rois: &RoiSet) -> Plane {
    let mut drawing = Plane::from_pixel(rois.width, rois.height, Luma([u16::MAX]));
    for roi in &rois.rois {
        for &(x, y) in &roi.outline {
            drawing.put_pixel(x, y, Luma([0]));
        }
    }
    drawing
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Background 10 with bright rectangles drawn at 1000
    fn plane_with(rects: &[(u32, u32, u32, u32)]) -> Plane {
        Plane::from_fn(40, 30, |x, y| {
            let inside = rects
                .iter()
                .any(|&(l, t, w, h)| x >= l && x < l + w && y >= t && y < t + h);
            if inside {
                Luma([1000])
            } else {
                Luma([10])
            }
        })
    }

    #[test]
    fn test_detects_regions_in_raster_order() {
        let plane = plane_with(&[(20, 2, 5, 5), (2, 10, 4, 4)]);
        let rois = detect_rois(&plane, 500.0, 65535.0, 1);

        assert_eq!(rois.len(), 2);
        assert_eq!(rois.rois[0].area(), 25);
        assert_eq!(
            rois.rois[0].bounds,
            Bounds {
                left: 20,
                top: 2,
                right: 25,
                bottom: 7
            }
        );
        assert_eq!(rois.rois[1].area(), 16);
        assert_eq!((rois.width, rois.height), (40, 30));
    }

    #[test]
    fn test_size_filter_drops_small_regions() {
        let plane = plane_with(&[(20, 2, 5, 5), (2, 10, 4, 4)]);
        let rois = detect_rois(&plane, 500.0, 65535.0, 20);
        assert_eq!(rois.len(), 1);
        assert_eq!(rois.rois[0].area(), 25);
    }

    #[test]
    fn test_diagonal_pixels_join() {
        let mut plane = Plane::from_pixel(5, 5, Luma([0]));
        plane.put_pixel(1, 1, Luma([100]));
        plane.put_pixel(2, 2, Luma([100]));
        let rois = detect_rois(&plane, 50.0, 200.0, 1);
        assert_eq!(rois.len(), 1);
        assert_eq!(rois.rois[0].area(), 2);
    }

    #[test]
    fn test_no_regions() {
        let plane = plane_with(&[]);
        let rois = detect_rois(&plane, 500.0, 65535.0, 1);
        assert!(rois.is_empty());
    }

    #[test]
    fn test_trace_square_outline() {
        let member = |x: i64, y: i64| (0..3).contains(&x) && (0..3).contains(&y);
        let outline = trace_outline((0, 0), 9, member);
        assert_eq!(
            outline,
            vec![
                (0, 0),
                (1, 0),
                (2, 0),
                (2, 1),
                (2, 2),
                (1, 2),
                (0, 2),
                (0, 1)
            ]
        );
    }

    #[test]
    fn test_trace_single_pixel() {
        let outline = trace_outline((4, 4), 1, |x, y| x == 4 && y == 4);
        assert_eq!(outline, vec![(4, 4)]);
    }

    #[test]
    fn test_trace_two_pixels() {
        let outline = trace_outline((1, 1), 2, |x, y| y == 1 && (x == 1 || x == 2));
        assert_eq!(outline, vec![(1, 1), (2, 1)]);
    }

    #[test]
    fn test_draw_outlines() {
        let plane = plane_with(&[(2, 2, 3, 3)]);
        let rois = detect_rois(&plane, 500.0, 65535.0, 1);
        let drawing = draw_outlines(&rois);
        assert_eq!(drawing.get_pixel(2, 2)[0], 0);
        // Interior and background stay white
        assert_eq!(drawing.get_pixel(3, 3)[0], u16::MAX);
        assert_eq!(drawing.get_pixel(10, 10)[0], u16::MAX);
    }
}
