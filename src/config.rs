use crate::analysis::{default_peak_bins, default_pixel_bins};
use crate::spectrum::BackendKind;
use crate::stats::Bins;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{
    fmt::Debug,
    fs,
    ops::{Bound, RangeBounds},
    path::Path,
};

/// Comparison configuration parameters.
///
/// Loaded from a TOML file and validated before use.
/// Each statistic is enabled by the presence of its section.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Pixel value histogram.
    pub pixel_counts: Option<PixelCountsConfig>,
    /// Peak value histogram.
    pub peak_counts: Option<PeakCountsConfig>,
    /// 1D power spectrum.
    pub power_spectrum: Option<PowerSpectrumConfig>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PixelCountsConfig {
    /// Number of bins or bin edges.
    #[serde(default = "default_pixel_bins")]
    pub bins: Bins,
    /// Value range covered by a bin count.
    #[serde(default)]
    pub range: Option<(f64, f64)>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PeakCountsConfig {
    /// Number of bins or bin edges.
    #[serde(default = "default_peak_bins")]
    pub bins: Bins,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PowerSpectrumConfig {
    /// Physical size of the field along each axis.
    #[serde(default = "default_box_size")]
    pub box_size: (f64, f64),
    /// Lower edge of the first k bin.
    #[serde(default = "default_kmin")]
    pub kmin: f64,
    /// Upper limit of the k bins.
    #[serde(default = "default_kmax")]
    pub kmax: f64,
    /// Width of the k bins (backend default if omitted).
    #[serde(default)]
    pub dk: Option<f64>,
    /// Backends to try, in order.
    #[serde(default = "default_backends")]
    pub backends: Vec<BackendKind>,
}

fn default_box_size() -> (f64, f64) {
    (1000.0, 1000.0)
}

fn default_kmin() -> f64 {
    1e-5
}

fn default_kmax() -> f64 {
    0.3
}

fn default_backends() -> Vec<BackendKind> {
    vec![BackendKind::MeshFft, BackendKind::DirectDft]
}

impl Config {
    /// Load a [`Config`] from a file.
    ///
    /// Performs validation on all parameters before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;

        let config: Config = toml::from_str(&contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.pixel_counts.is_none() && self.peak_counts.is_none() && self.power_spectrum.is_none()
        {
            bail!("at least one statistic must be configured");
        }

        if let Some(power_cfg) = &self.power_spectrum {
            power_cfg
                .validate()
                .context("invalid power spectrum parameters")?;
        }

        Ok(())
    }
}

impl PowerSpectrumConfig {
    fn validate(&self) -> Result<()> {
        let (len_x, len_y) = self.box_size;
        check_num(len_x, f64::MIN_POSITIVE..f64::INFINITY).context("invalid box size")?;
        check_num(len_y, f64::MIN_POSITIVE..f64::INFINITY).context("invalid box size")?;

        check_num(self.kmin, 0.0..f64::INFINITY).context("invalid minimum wavenumber")?;
        check_num(self.kmax, (Bound::Excluded(self.kmin), Bound::Unbounded))
            .context("invalid maximum wavenumber")?;
        if let Some(dk) = self.dk {
            check_num(dk, f64::MIN_POSITIVE..f64::INFINITY).context("invalid bin width")?;
        }

        if self.backends.is_empty() {
            bail!("at least one spectral backend must be listed");
        }

        Ok(())
    }
}

fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_config() {
        let config: Config = toml::from_str(
            r#"
[pixel_counts]
bins = 20
range = [-1.0, 5.0]

[peak_counts]
bins = [-0.5, 0.0, 0.5, 1.0]

[power_spectrum]
box_size = [500.0, 250.0]
kmin = 0.01
kmax = 0.5
dk = 0.02
backends = ["direct_dft"]
"#,
        )
        .unwrap();
        config.validate().unwrap();

        let pixel_cfg = config.pixel_counts.unwrap();
        assert_eq!(pixel_cfg.bins, Bins::Count(20));
        assert_eq!(pixel_cfg.range, Some((-1.0, 5.0)));

        let peak_cfg = config.peak_counts.unwrap();
        assert_eq!(peak_cfg.bins, Bins::Edges(vec![-0.5, 0.0, 0.5, 1.0]));

        let power_cfg = config.power_spectrum.unwrap();
        assert_eq!(power_cfg.box_size, (500.0, 250.0));
        assert_eq!(power_cfg.dk, Some(0.02));
        assert_eq!(power_cfg.backends, vec![BackendKind::DirectDft]);
    }

    #[test]
    fn empty_sections_use_defaults() {
        let config: Config =
            toml::from_str("[pixel_counts]\n[peak_counts]\n[power_spectrum]\n").unwrap();
        config.validate().unwrap();

        assert_eq!(config.pixel_counts.unwrap().bins, default_pixel_bins());
        assert_eq!(config.peak_counts.unwrap().bins, default_peak_bins());

        let power_cfg = config.power_spectrum.unwrap();
        assert_eq!(power_cfg.box_size, (1000.0, 1000.0));
        assert_eq!(power_cfg.kmin, 1e-5);
        assert_eq!(power_cfg.kmax, 0.3);
        assert_eq!(power_cfg.dk, None);
        assert_eq!(power_cfg.backends, default_backends());
    }

    #[test]
    fn reject_invalid_config() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.validate().is_err());

        let config: Config = toml::from_str("[power_spectrum]\nkmin = 0.5\nkmax = 0.1\n").unwrap();
        assert!(config.validate().is_err());

        let config: Config = toml::from_str("[power_spectrum]\nbox_size = [0.0, 1.0]\n").unwrap();
        assert!(config.validate().is_err());

        let config: Config = toml::from_str("[power_spectrum]\nbackends = []\n").unwrap();
        assert!(config.validate().is_err());

        assert!(toml::from_str::<Config>("[pixel_count]\n").is_err());
        assert!(toml::from_str::<Config>("[power_spectrum]\nbackends = [\"nbodykit\"]\n").is_err());
    }
}
