//! ROI sets are written as zip archives of ImageJ `.roi` files, one polygon
//! per region, so they can be reopened in ImageJ's ROI manager.

use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::{Seek, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::analysis::{Roi, RoiSet};

const ROI_MAGIC: &[u8; 4] = b"Iout";
const ROI_VERSION: u16 = 228;
const ROI_TYPE_POLYGON: u8 = 0;
const HEADER_SIZE: usize = 64;

/// Encodes one region in the ImageJ binary ROI format (big endian).
pub fn encode_roi(roi: &Roi) -> Result<Vec<u8>> {
    let b = &roi.bounds;
    if b.right > i16::MAX as u32 || b.bottom > i16::MAX as u32 {
        bail!("ROI bounds {:?} exceed the ImageJ coordinate range", b);
    }
    if roi.outline.len() > u16::MAX as usize {
        bail!("ROI outline has too many vertices ({})", roi.outline.len());
    }

    let n = roi.outline.len();
    let mut bytes = vec![0u8; HEADER_SIZE + 4 * n];
    bytes[0..4].copy_from_slice(ROI_MAGIC);
    bytes[4..6].copy_from_slice(&ROI_VERSION.to_be_bytes());
    bytes[6] = ROI_TYPE_POLYGON;
    bytes[8..10].copy_from_slice(&(b.top as u16).to_be_bytes());
    bytes[10..12].copy_from_slice(&(b.left as u16).to_be_bytes());
    bytes[12..14].copy_from_slice(&(b.bottom as u16).to_be_bytes());
    bytes[14..16].copy_from_slice(&(b.right as u16).to_be_bytes());
    bytes[16..18].copy_from_slice(&(n as u16).to_be_bytes());

    // Vertex coordinates are relative to the bounds' top-left corner
    let xs = HEADER_SIZE;
    let ys = HEADER_SIZE + 2 * n;
    for (i, &(x, y)) in roi.outline.iter().enumerate() {
        bytes[xs + 2 * i..xs + 2 * i + 2].copy_from_slice(&((x - b.left) as u16).to_be_bytes());
        bytes[ys + 2 * i..ys + 2 * i + 2].copy_from_slice(&((y - b.top) as u16).to_be_bytes());
    }
    Ok(bytes)
}

/// Entry name in the ImageJ `index-yyyy-xxxx.roi` style, using the ROI centre.
pub fn roi_entry_name(index: usize, roi: &Roi) -> String {
    let b = &roi.bounds;
    let cx = (b.left + b.right) / 2;
    let cy = (b.top + b.bottom) / 2;
    format!("{:04}-{:04}-{:04}.roi", index + 1, cy, cx)
}

pub fn write_roi_set<W: Write + Seek>(rois: &RoiSet, writer: W) -> Result<W> {
    let mut zip = ZipWriter::new(writer);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for (i, roi) in rois.rois.iter().enumerate() {
        zip.start_file(roi_entry_name(i, roi), options)?;
        zip.write_all(&encode_roi(roi)?)?;
    }
    Ok(zip.finish()?)
}

pub fn save_roi_set(rois: &RoiSet, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create ROI set {:?}", path))?;
    write_roi_set(rois, file)?;
    info!("Saved {} ROI(s) to {:?}", rois.len(), path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Bounds;
    use std::io::{Cursor, Read};
    use tempfile::TempDir;
    use zip::ZipArchive;

    fn square_roi() -> Roi {
        Roi {
            pixels: vec![(10, 20), (11, 20), (10, 21), (11, 21)],
            bounds: Bounds {
                left: 10,
                top: 20,
                right: 12,
                bottom: 22,
            },
            outline: vec![(10, 20), (11, 20), (11, 21), (10, 21)],
        }
    }

    #[test]
    fn test_encode_header_and_coordinates() {
        let bytes = encode_roi(&square_roi()).unwrap();
        assert_eq!(bytes.len(), 64 + 16);
        assert_eq!(&bytes[0..4], b"Iout");
        assert_eq!(u16::from_be_bytes([bytes[4], bytes[5]]), 228);
        assert_eq!(bytes[6], 0);
        assert_eq!(u16::from_be_bytes([bytes[8], bytes[9]]), 20);
        assert_eq!(u16::from_be_bytes([bytes[10], bytes[11]]), 10);
        assert_eq!(u16::from_be_bytes([bytes[12], bytes[13]]), 22);
        assert_eq!(u16::from_be_bytes([bytes[14], bytes[15]]), 12);
        assert_eq!(u16::from_be_bytes([bytes[16], bytes[17]]), 4);
        // x of vertex 2, y of vertex 3
        assert_eq!(u16::from_be_bytes([bytes[66], bytes[67]]), 1);
        assert_eq!(u16::from_be_bytes([bytes[76], bytes[77]]), 1);
    }

    #[test]
    fn test_entry_name() {
        assert_eq!(roi_entry_name(0, &square_roi()), "0001-0021-0011.roi");
    }

    #[test]
    fn test_zip_contains_one_entry_per_roi() {
        let rois = RoiSet {
            width: 64,
            height: 64,
            rois: vec![square_roi(), square_roi()],
        };
        let cursor = write_roi_set(&rois, Cursor::new(Vec::new())).unwrap();

        let mut archive = ZipArchive::new(cursor).unwrap();
        assert_eq!(archive.len(), 2);
        let mut entry = archive.by_name("0002-0021-0011.roi").unwrap();
        let mut bytes = vec![];
        entry.read_to_end(&mut bytes).unwrap();
        assert_eq!(&bytes[0..4], b"Iout");
    }

    #[test]
    fn test_save_empty_set() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("empty_RoiSet.zip");
        save_roi_set(&RoiSet::default(), &path).unwrap();
        assert!(path.exists());
    }
}
