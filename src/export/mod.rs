use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::results::MeasurementTable;

/// UTF-8 byte order mark, so spreadsheet tools pick the right encoding.
pub const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// CSV writer with minimal quoting and CRLF terminators. Records may differ
/// in length since image name rows hold a single cell.
pub fn csv_writer<W: Write>(out: W) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .flexible(true)
        .terminator(csv::Terminator::CRLF)
        .from_writer(out)
}

/// Serialises a table: BOM, then `["", header...]`, then for every image in
/// name order a row with the image name followed by its measurement rows,
/// each shifted right by one empty cell.
pub fn write_table<W: Write>(mut out: W, table: &MeasurementTable) -> Result<()> {
    out.write_all(UTF8_BOM)?;
    let mut wtr = csv_writer(out);

    wtr.write_record(std::iter::once("").chain(table.header.iter().map(|h| h.as_str())))?;

    for (image_name, rows) in &table.images {
        wtr.write_record([image_name.as_str()])?;
        for row in rows {
            wtr.write_record(std::iter::once("").chain(row.iter().map(|v| v.as_str())))?;
        }
    }
    wtr.flush()?;
    Ok(())
}

pub fn export_table(table: &MeasurementTable, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    let mut out = BufWriter::new(file);
    write_table(&mut out, table).with_context(|| format!("Failed to write {:?}", path))?;
    out.flush()?;
    info!(
        "Wrote {} row(s) for {} image(s) to {:?}",
        table.row_count(),
        table.images.len(),
        path
    );
    Ok(())
}
