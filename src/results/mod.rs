use anyhow::{bail, Result};
use std::collections::BTreeMap;

use crate::analysis::Measurements;
use crate::state::{Configuration, HeaderPolicy};

/// Output category a measurement row belongs to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    /// Per-channel ROI measurements, keyed by channel index
    Channel(String),
    Colocalisation,
}

impl Category {
    /// Output CSV file name for this category.
    pub fn file_name(&self, config: &Configuration) -> Result<String> {
        match self {
            Category::Channel(index) => Ok(format!("{}_cells.csv", config.channel_name(index)?)),
            Category::Colocalisation => Ok("colocalisation.csv".to_owned()),
        }
    }
}

/// Measurement rows for one category, grouped by image name. Images iterate
/// in lexicographic order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasurementTable {
    pub header: Vec<String>,
    pub images: BTreeMap<String, Vec<Vec<String>>>,
}

impl MeasurementTable {
    pub fn row_count(&self) -> usize {
        self.images.values().map(|rows| rows.len()).sum()
    }
}

/// In-memory accumulation of every category's table across a batch run.
#[derive(Debug, Default)]
pub struct ResultSet {
    policy: HeaderPolicy,
    tables: BTreeMap<Category, MeasurementTable>,
}

impl ResultSet {
    pub fn new(policy: HeaderPolicy) -> Self {
        ResultSet {
            policy,
            tables: BTreeMap::new(),
        }
    }

    /// Stores the rows of one image under `category`. The category header is
    /// replaced by `measurements.headers`; under
    /// `HeaderPolicy::RequireConsistent` a differing header is an error
    /// instead. A repeated image name replaces the earlier rows.
    pub fn record(&mut self, category: Category, image_name: &str, measurements: Measurements) -> Result<()> {
        let table = self.tables.entry(category.clone()).or_default();

        let has_rows = !table.images.is_empty();
        if has_rows && table.header != measurements.headers {
            match self.policy {
                HeaderPolicy::RequireConsistent => bail!(
                    "Headers for {:?} changed at image '{}': {:?} -> {:?}",
                    category,
                    image_name,
                    table.header,
                    measurements.headers
                ),
                HeaderPolicy::LastWriteWins => warn!(
                    "Headers for {:?} changed at image '{}'; the latest headers will be exported",
                    category, image_name
                ),
            }
        }

        if let Some(row) = measurements.rows.iter().find(|r| r.len() != measurements.headers.len()) {
            warn!(
                "Image '{}' has a {:?} row of {} value(s) for {} header(s)",
                image_name,
                category,
                row.len(),
                measurements.headers.len()
            );
        }

        table.header = measurements.headers;
        if table
            .images
            .insert(image_name.to_owned(), measurements.rows)
            .is_some()
        {
            warn!(
                "Image name '{}' seen more than once; {:?} rows replaced by the latest image",
                image_name, category
            );
        }
        Ok(())
    }

    pub fn table(&self, category: &Category) -> Option<&MeasurementTable> {
        self.tables.get(category)
    }

    pub fn categories(&self) -> impl Iterator<Item = &Category> {
        self.tables.keys()
    }
}
