use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Channels every configuration must name. Images are assumed to carry at
/// least these three planes.
pub const REQUIRED_CHANNELS: [&str; 3] = ["1", "2", "3"];

/// How a per-image threshold on the main channel is chosen.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ThresholdMode {
    /// Otsu's method on the channel histogram
    Otsu,
    /// Otsu as a suggestion, confirmed or overridden on stdin per image
    Prompt,
    /// The configured `fixed_threshold` for every image
    Fixed,
}

/// What happens when a category receives measurement headers that differ
/// from the ones it already holds.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum HeaderPolicy {
    /// The most recently recorded headers are exported
    #[default]
    LastWriteWins,
    /// Differing headers abort the run
    RequireConsistent,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AnalysisParameters {
    pub threshold_mode: ThresholdMode,
    pub fixed_threshold: f64,
    pub threshold_max: f64,
    pub min_particle_size: u32,
    pub coloc_iterations: usize,
    pub coloc_max_shift: i32,
    pub coloc_seed: u64,
}

impl Default for AnalysisParameters {
    fn default() -> Self {
        Self {
            threshold_mode: ThresholdMode::Otsu,
            fixed_threshold: 1000.0,
            threshold_max: 65535.0,
            min_particle_size: 500,
            coloc_iterations: 100,
            coloc_max_shift: 2,
            coloc_seed: 1,
        }
    }
}

/// Measurement columns reported per ROI.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct MeasurementFlags {
    pub area: bool,
    pub mean: bool,
    pub std_dev: bool,
    pub min_max: bool,
    pub centroid: bool,
    pub integrated_density: bool,
}

impl Default for MeasurementFlags {
    fn default() -> Self {
        Self {
            area: true,
            mean: true,
            std_dev: false,
            min_max: true,
            centroid: false,
            integrated_density: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum MeasurementKind {
    Area,
    Mean,
    StdDev,
    MinMax,
    Centroid,
    IntegratedDensity,
}

impl MeasurementFlags {
    pub fn set(&mut self, kind: MeasurementKind, enabled: bool) {
        match kind {
            MeasurementKind::Area => self.area = enabled,
            MeasurementKind::Mean => self.mean = enabled,
            MeasurementKind::StdDev => self.std_dev = enabled,
            MeasurementKind::MinMax => self.min_max = enabled,
            MeasurementKind::Centroid => self.centroid = enabled,
            MeasurementKind::IntegratedDensity => self.integrated_density = enabled,
        }
    }
}

/// Describes the channel layout and analysis parameters of a batch run.
/// Loaded once before the run and read-only afterwards.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Configuration {
    pub main_channel: String,
    pub mask_channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coloc_channel: Option<String>,
    pub header_policy: HeaderPolicy,
    pub channels: BTreeMap<String, String>,
    pub analysis: AnalysisParameters,
    pub measurements: MeasurementFlags,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            main_channel: "1".to_owned(),
            mask_channel: "DAPI".to_owned(),
            coloc_channel: None,
            header_policy: HeaderPolicy::default(),
            channels: BTreeMap::from([
                ("1".to_owned(), "DAPI".to_owned()),
                ("2".to_owned(), "FOCI".to_owned()),
                ("3".to_owned(), "GFP".to_owned()),
            ]),
            analysis: AnalysisParameters::default(),
            measurements: MeasurementFlags::default(),
        }
    }
}

fn parse_index(index: &str) -> Result<usize> {
    match index.parse::<usize>() {
        Ok(i) if i > 0 && i.to_string() == index => Ok(i),
        _ => Err(anyhow!("Invalid channel index '{}'", index)),
    }
}

impl Configuration {
    pub fn default_config_path() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("Unable to locate home directory"))?;
        Ok(home.join(".cellquant/config.toml"))
    }

    pub fn load_from_userhome() -> Result<Self> {
        Configuration::load_from_file(&Configuration::default_config_path()?)
    }

    /// Loads the configuration at `path`, falling back to defaults when the
    /// file does not exist yet.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Configuration file exists at path: {:?}", path);
            let t = fs::read_to_string(path)
                .with_context(|| format!("Failed to read configuration {:?}", path))?;
            toml::from_str(&t).with_context(|| format!("Malformed configuration {:?}", path))
        } else {
            warn!(
                "Configuration file {:?} does not exist. Using defaults; it will be created on the next edit",
                path
            );
            Ok(Configuration::default())
        }
    }

    pub fn save_to_userhome(&self) -> Result<()> {
        self.save_to_file(&Configuration::default_config_path()?)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let toml_str = toml::to_string(&self)?;
        if let Some(config_dir) = path.parent() {
            if !config_dir.as_os_str().is_empty() && !config_dir.exists() {
                fs::create_dir_all(config_dir)?;
            }
        }
        let mut f = File::create(path)
            .with_context(|| format!("Failed to create configuration {:?}", path))?;
        f.write_all(toml_str.as_bytes())?;
        debug!("{}", toml_str);
        Ok(())
    }

    /// Checks the channel mapping and every reference into it.
    pub fn validate(&self) -> Result<()> {
        for required in REQUIRED_CHANNELS {
            if !self.channels.contains_key(required) {
                bail!("Channel {} is not configured", required);
            }
        }

        let mut sorted = self
            .channels
            .keys()
            .map(|k| parse_index(k))
            .collect::<Result<Vec<usize>>>()?;
        sorted.sort_unstable();
        if sorted.iter().enumerate().any(|(i, idx)| *idx != i + 1) {
            bail!("Channel indices must run contiguously from 1, found {:?}", sorted);
        }

        for (index, name) in &self.channels {
            if name.trim().is_empty() {
                bail!("Channel {} has no name", index);
            }
            if name.contains(['/', '\\']) {
                bail!("Channel {} name '{}' may not contain path separators", index, name);
            }
        }

        let mut names: Vec<&String> = self.channels.values().collect();
        names.sort();
        names.dedup();
        if names.len() != self.channels.len() {
            bail!("Channel names must be unique, they name the output files");
        }

        if !self.channels.contains_key(&self.main_channel) {
            bail!("Main channel {} is not a configured channel", self.main_channel);
        }

        if let Some(coloc) = &self.coloc_channel {
            if !self.channels.contains_key(coloc) {
                bail!("Colocalisation channel {} is not a configured channel", coloc);
            }
        }

        if !self.channels.values().any(|n| n == &self.mask_channel) {
            warn!(
                "Mask channel '{}' does not name a configured channel",
                self.mask_channel
            );
        }

        if self.analysis.threshold_max <= 0.0 {
            bail!("Threshold upper bound must be positive");
        }

        Ok(())
    }

    pub fn channel_name(&self, index: &str) -> Result<&str> {
        self.channels
            .get(index)
            .map(|s| s.as_str())
            .ok_or_else(|| anyhow!("Channel {} is not configured", index))
    }

    /// Channel indices in numeric order.
    pub fn channel_indices(&self) -> Vec<String> {
        let mut indices: Vec<String> = self.channels.keys().cloned().collect();
        indices.sort_by_key(|k| k.parse::<usize>().unwrap_or(usize::MAX));
        indices
    }

    /// True when a colocalisation channel is set and configured.
    pub fn colocalisation_enabled(&self) -> bool {
        match &self.coloc_channel {
            Some(c) => self.channels.contains_key(c),
            None => false,
        }
    }

    pub fn set_channel(&mut self, index: &str, name: &str) -> Result<()> {
        parse_index(index)?;
        if !self.channels.contains_key(index) {
            bail!("Channel {} does not exist. Use add-channel to append one", index);
        }
        self.channels.insert(index.to_owned(), name.to_owned());
        Ok(())
    }

    /// Appends a channel after the last one and returns its index.
    pub fn add_channel(&mut self, name: &str) -> String {
        let index = (self.channels.len() + 1).to_string();
        self.channels.insert(index.clone(), name.to_owned());
        index
    }

    /// Removes a channel. Later channels move down one index so the mapping
    /// stays contiguous, and main/colocalisation references follow them.
    pub fn remove_channel(&mut self, index: &str) -> Result<()> {
        let removed = parse_index(index)?;
        if !self.channels.contains_key(index) {
            bail!("Channel {} does not exist", index);
        }
        if self.main_channel == index {
            bail!("Channel {} is the main channel and cannot be removed", index);
        }
        if self.coloc_channel.as_deref() == Some(index) {
            info!("Removing colocalisation channel {}; colocalisation disabled", index);
            self.coloc_channel = None;
        }

        let shift = |i: &str| -> String {
            match i.parse::<usize>() {
                Ok(n) if n > removed => (n - 1).to_string(),
                _ => i.to_owned(),
            }
        };

        self.channels = self
            .channels
            .iter()
            .filter(|(k, _)| k.as_str() != index)
            .map(|(k, v)| (shift(k.as_str()), v.clone()))
            .collect();
        self.main_channel = shift(self.main_channel.as_str());
        self.coloc_channel = self.coloc_channel.as_deref().map(shift);
        Ok(())
    }

    pub fn set_mask_channel(&mut self, name: &str) {
        self.mask_channel = name.to_owned();
    }

    pub fn set_coloc_channel(&mut self, index: Option<&str>) -> Result<()> {
        if let Some(i) = index {
            if !self.channels.contains_key(i) {
                bail!("Channel {} does not exist", i);
            }
        }
        self.coloc_channel = index.map(|i| i.to_owned());
        Ok(())
    }

    pub fn set_main_channel(&mut self, index: &str) -> Result<()> {
        if !self.channels.contains_key(index) {
            bail!("Channel {} does not exist", index);
        }
        self.main_channel = index.to_owned();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_configuration_is_valid() {
        let config = Configuration::default();
        assert!(config.validate().is_ok());
        assert!(!config.colocalisation_enabled());
        assert_eq!(config.channel_name("2").unwrap(), "FOCI");
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/config.toml");

        let mut config = Configuration::default();
        config.set_coloc_channel(Some("2")).unwrap();
        config.analysis.threshold_mode = ThresholdMode::Fixed;
        config.measurements.set(MeasurementKind::Centroid, true);
        config.save_to_file(&path).unwrap();

        let loaded = Configuration::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let loaded = Configuration::load_from_file(&temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded, Configuration::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(
            &path,
            "main_channel = \"2\"\ncoloc_channel = \"3\"\n\n[channels]\n1 = \"A\"\n2 = \"B\"\n3 = \"C\"\n",
        )
        .unwrap();

        let loaded = Configuration::load_from_file(&path).unwrap();
        assert_eq!(loaded.main_channel, "2");
        assert_eq!(loaded.coloc_channel.as_deref(), Some("3"));
        assert_eq!(loaded.analysis.min_particle_size, 500);
        assert!(loaded.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_required_channel() {
        let mut config = Configuration::default();
        config.channels.remove("3");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_references() {
        let mut config = Configuration::default();
        config.main_channel = "7".to_owned();
        assert!(config.validate().is_err());

        let mut config = Configuration::default();
        config.coloc_channel = Some("4".to_owned());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_gaps_and_bad_names() {
        let mut config = Configuration::default();
        config.channels.insert("5".to_owned(), "RFP".to_owned());
        assert!(config.validate().is_err());

        let mut config = Configuration::default();
        config.channels.insert("2".to_owned(), "a/b".to_owned());
        assert!(config.validate().is_err());

        let mut config = Configuration::default();
        config.channels.insert("2".to_owned(), " ".to_owned());
        assert!(config.validate().is_err());

        let mut config = Configuration::default();
        config.channels.insert("3".to_owned(), "DAPI".to_owned());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_remove_channel_renumbers() {
        let mut config = Configuration::default();
        assert_eq!(config.add_channel("RFP"), "4");
        config.set_coloc_channel(Some("4")).unwrap();
        config.set_main_channel("3").unwrap();

        config.remove_channel("2").unwrap();

        assert_eq!(config.channel_indices(), vec!["1", "2", "3"]);
        assert_eq!(config.channel_name("2").unwrap(), "GFP");
        assert_eq!(config.channel_name("3").unwrap(), "RFP");
        assert_eq!(config.main_channel, "2");
        assert_eq!(config.coloc_channel.as_deref(), Some("3"));
    }

    #[test]
    fn test_remove_coloc_channel_disables_colocalisation() {
        let mut config = Configuration::default();
        config.add_channel("RFP");
        config.set_coloc_channel(Some("4")).unwrap();
        config.remove_channel("4").unwrap();
        assert!(config.coloc_channel.is_none());
    }

    #[test]
    fn test_remove_main_channel_is_rejected() {
        let mut config = Configuration::default();
        assert!(config.remove_channel("1").is_err());
        assert!(config.remove_channel("9").is_err());
    }

    #[test]
    fn test_channel_indices_numeric_order() {
        let mut config = Configuration::default();
        for name in ["D", "E", "F", "G", "H", "I", "J"] {
            config.add_channel(name);
        }
        let indices = config.channel_indices();
        assert_eq!(indices.first().unwrap(), "1");
        assert_eq!(indices.last().unwrap(), "10");
        assert!(config.validate().is_ok());
    }
}
