use anyhow::{anyhow, bail, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::analysis::{AnalysisEngine, Measurements};
use crate::export::export_table;
use crate::results::{Category, MeasurementTable, ResultSet};
use crate::state::Configuration;
use crate::taskstatus::*;

/// What a batch run produced.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RunSummary {
    pub images: usize,
    pub rois: usize,
    pub files_written: Vec<PathBuf>,
}

/// Lists every regular file under `dir`. A directory's own files come before
/// those of its subdirectories; entries are kept in the order the filesystem
/// yields them.
pub fn collect_image_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = vec![];
    let mut subdirs = vec![];

    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read directory {:?}", dir))? {
        let path = entry?.path();
        // Follows symlinks
        let metadata = fs::metadata(&path).with_context(|| format!("Failed to stat {:?}", path))?;
        if metadata.is_dir() {
            subdirs.push(path);
        } else if metadata.is_file() {
            files.push(path);
        }
    }

    for subdir in subdirs {
        files.extend(collect_image_files(&subdir)?);
    }
    Ok(files)
}

/// Logical image name: the file name without its extension.
pub fn image_name_of(path: &Path) -> Result<String> {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("Cannot derive an image name from {:?}", path))
}

fn channel_number(index: &str) -> Result<usize> {
    index
        .parse::<usize>()
        .with_context(|| format!("Invalid channel index '{}'", index))
}

/// Drives a batch run: every file under the input directory is analysed in
/// turn, results are aggregated in memory and exported once all images are
/// done. Any failure aborts the run; CSVs are only written at the very end.
pub struct ImageProcessor<'a, E: AnalysisEngine> {
    config: &'a Configuration,
    input_dir: PathBuf,
    output_dir: PathBuf,
    engine: E,
    results: ResultSet,
    summary: RunSummary,
}

impl<'a, E: AnalysisEngine> ImageProcessor<'a, E> {
    pub fn new(config: &'a Configuration, input_dir: &Path, output_dir: &Path, engine: E) -> Result<Self> {
        config.validate()?;
        if let Some(max) = engine.max_channels() {
            if config.channels.len() > max {
                bail!(
                    "{} channels are configured but images provide at most {}",
                    config.channels.len(),
                    max
                );
            }
        }
        Ok(ImageProcessor {
            config,
            input_dir: input_dir.to_owned(),
            output_dir: output_dir.to_owned(),
            engine,
            results: ResultSet::new(config.header_policy),
            summary: RunSummary::default(),
        })
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn results(&self) -> &ResultSet {
        &self.results
    }

    /// Walks the input directory, processes every file, then exports.
    pub fn run<F: FnMut(TaskStatusContainer)>(&mut self, mut sender: F) -> Result<RunSummary> {
        if !self.input_dir.is_dir() {
            bail!("Input directory {:?} does not exist", self.input_dir);
        }
        fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("Failed to create output directory {:?}", self.output_dir))?;

        let files = collect_image_files(&self.input_dir)?;
        let file_count = files.len();
        info!("Found {} file(s) under {:?}", file_count, self.input_dir);

        for (i, path) in files.iter().enumerate() {
            set_task_status(
                &mut sender,
                &format!("Processing {}", path.display()),
                file_count,
                i,
            );
            self.process_image(path)
                .with_context(|| format!("Failed to process {:?}", path))?;
        }

        set_task_status(&mut sender, "Exporting results", file_count, file_count);
        self.post_process_data()?;
        set_task_completed(&mut sender);

        Ok(std::mem::take(&mut self.summary))
    }

    /// Thresholds the main channel, detects ROIs on it, measures them on every
    /// channel and, when configured, runs the colocalisation test per ROI.
    pub fn process_image(&mut self, path: &Path) -> Result<()> {
        let config = self.config;
        let image_name = image_name_of(path)?;
        info!("Processing image {:?} as '{}'", path, image_name);

        let image = self.engine.open(path)?;
        let main_name = config.channel_name(&config.main_channel)?;
        let threshold = self
            .engine
            .threshold(&image, channel_number(&config.main_channel)?, main_name)?;
        info!("Threshold for {} ({}): {}", image_name, main_name, threshold);

        let mut planes: BTreeMap<String, E::Plane> = BTreeMap::new();
        for index in config.channel_indices() {
            let plane = self
                .engine
                .extract_channel_plane(&image, channel_number(&index)?)
                .with_context(|| format!("Failed to extract channel {}", index))?;
            planes.insert(index, plane);
        }
        drop(image);

        let plane_for = |index: &str| {
            planes
                .get(index)
                .ok_or_else(|| anyhow!("Channel {} was not extracted", index))
        };

        let reference = plane_for(config.main_channel.as_str())?;
        let rois = self.engine.detect_rois(
            reference,
            threshold,
            config.analysis.threshold_max,
            config.analysis.min_particle_size,
        )?;
        if rois.is_empty() {
            warn!("No ROIs detected in {}", image_name);
        } else {
            info!("{} ROI(s) detected in {}", rois.len(), image_name);
        }

        let drawing = self.engine.draw_outlines(reference, &rois)?;
        let drawing_path = self.output_dir.join(format!("Drawing of {}.tif", image_name));
        self.engine.save_image(&drawing, &drawing_path)?;
        drop(drawing);
        self.summary.files_written.push(drawing_path);

        let roi_set_path = self.output_dir.join(format!("{}_RoiSet.zip", image_name));
        self.engine.save_roi_set(&rois, &roi_set_path)?;
        self.summary.files_written.push(roi_set_path);

        for index in config.channel_indices() {
            let measurements = self.engine.measure(plane_for(index.as_str())?, &rois)?;
            self.results
                .record(Category::Channel(index), &image_name, measurements)?;
        }

        if let Some(coloc_index) = &config.coloc_channel {
            if config.channels.contains_key(coloc_index) {
                let a = plane_for("1")?;
                let b = plane_for(coloc_index.as_str())?;
                let headers = self.engine.colocalisation_headers();
                let rows = (0..rois.len())
                    .map(|i| self.engine.colocalisation_test(a, b, &rois, i))
                    .collect::<Result<Vec<Vec<String>>>>()?;
                debug!("Colocalisation rows for {}: {}", image_name, rows.len());
                self.results.record(
                    Category::Colocalisation,
                    &image_name,
                    Measurements { headers, rows },
                )?;
            }
        }

        self.summary.images += 1;
        self.summary.rois += rois.len();
        Ok(())
    }

    /// Writes one CSV per configured channel, plus the colocalisation CSV when
    /// colocalisation is enabled.
    pub fn post_process_data(&mut self) -> Result<()> {
        let config = self.config;
        debug!(
            "Recorded categories: {:?}",
            self.results.categories().collect::<Vec<_>>()
        );
        let mut categories: Vec<Category> = config
            .channel_indices()
            .into_iter()
            .map(Category::Channel)
            .collect();
        if config.colocalisation_enabled() {
            categories.push(Category::Colocalisation);
        }

        let empty = MeasurementTable::default();
        for category in categories {
            let path = self.output_dir.join(category.file_name(config)?);
            let table = self.results.table(&category).unwrap_or(&empty);
            export_table(table, &path)?;
            self.summary.files_written.push(path);
        }
        Ok(())
    }
}
