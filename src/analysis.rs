use crate::config::{Config, PeakCountsConfig, PixelCountsConfig};
use crate::spectrum::PowerSpectrum;
use crate::stats::{Bins, Series, density_series, difference_series, expspace};
use anyhow::{Context, Result, bail};
use ndarray::ArrayView2;
use rmp_serde::{decode, encode};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// Computation turning a 2D field into a [`Series`].
///
/// Implementations hold only configuration and never mutate the field.
pub trait Statistic: Send + Sync {
    fn compute(&self, field: ArrayView2<f64>) -> Result<Series>;

    /// Label used in results, the type name by default.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
            .rsplit("::")
            .next()
            .unwrap_or_default()
    }
}

/// Default [`PixelCounts`] bin edges, centered so that near-zero and negative values are included.
pub fn default_pixel_bins() -> Bins {
    Bins::Edges(expspace(-2.0, 2.0, 50).into_iter().map(|e| e - 1.0).collect())
}

/// Default [`PeakCounts`] bin edges.
pub fn default_peak_bins() -> Bins {
    Bins::Edges(expspace(-0.5, 2.0, 50).into_iter().map(|e| e - 1.0).collect())
}

/// Statistic: histogram of the pixel values of a field.
pub struct PixelCounts {
    bins: Bins,
    data_range: Option<(f64, f64)>,
}

impl PixelCounts {
    pub fn new(cfg: &PixelCountsConfig) -> Self {
        Self {
            bins: cfg.bins.clone(),
            data_range: cfg.range,
        }
    }
}

impl Default for PixelCounts {
    fn default() -> Self {
        Self {
            bins: default_pixel_bins(),
            data_range: None,
        }
    }
}

impl Statistic for PixelCounts {
    fn compute(&self, field: ArrayView2<f64>) -> Result<Series> {
        density_series(field.iter().copied(), &self.bins, self.data_range)
    }
}

/// Statistic: histogram of the values of the local maxima of a field.
pub struct PeakCounts {
    bins: Bins,
}

impl PeakCounts {
    pub fn new(cfg: &PeakCountsConfig) -> Self {
        Self {
            bins: cfg.bins.clone(),
        }
    }
}

impl Default for PeakCounts {
    fn default() -> Self {
        Self {
            bins: default_peak_bins(),
        }
    }
}

impl Statistic for PeakCounts {
    fn compute(&self, field: ArrayView2<f64>) -> Result<Series> {
        let peak_vals = find_peaks(field);
        log::debug!("found {} peaks", peak_vals.len());
        density_series(peak_vals, &self.bins, None)
    }
}

const NEIGHBOR_OFFSETS: [(isize, isize); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Collect the values of all cells strictly greater than their 8 neighbors, in row-major order.
///
/// Both axes are periodic.
fn find_peaks(field: ArrayView2<f64>) -> Vec<f64> {
    let dim = field.dim();
    let mut peak_vals = Vec::new();
    for x in 0..dim.0 {
        for y in 0..dim.1 {
            let val = field[[x, y]];
            let mut peak = true;
            for &(dx, dy) in &NEIGHBOR_OFFSETS {
                let nbr = [wrap_index(x, dx, dim.0), wrap_index(y, dy, dim.1)];
                if val <= field[nbr] {
                    peak = false;
                    break;
                }
            }
            if peak {
                peak_vals.push(val);
            }
        }
    }
    peak_vals
}

fn wrap_index(idx: usize, offset: isize, extent: usize) -> usize {
    (idx as isize + offset).rem_euclid(extent as isize) as usize
}

/// Series computed by one statistic.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatisticResult {
    pub name: String,
    pub series: Series,
}

/// Relative difference of one statistic between a field and a reference.
#[derive(Debug, Serialize, Deserialize)]
pub struct Comparison {
    pub name: String,
    pub difference: Series,
    pub mean: f64,
    pub rms: f64,
    /// Largest absolute relative difference.
    pub max_abs: f64,
}

pub struct Analyzer {
    stat_ptr_vec: Vec<Box<dyn Statistic>>,
}

impl Analyzer {
    /// Create a new `Analyzer` with every statistic enabled in the configuration.
    pub fn new(cfg: &Config) -> Result<Self> {
        let mut stat_ptr_vec: Vec<Box<dyn Statistic>> = Vec::new();
        if let Some(pixel_cfg) = &cfg.pixel_counts {
            stat_ptr_vec.push(Box::new(PixelCounts::new(pixel_cfg)));
        }
        if let Some(peak_cfg) = &cfg.peak_counts {
            stat_ptr_vec.push(Box::new(PeakCounts::new(peak_cfg)));
        }
        if let Some(power_cfg) = &cfg.power_spectrum {
            let power =
                PowerSpectrum::new(power_cfg).context("failed to construct power spectrum")?;
            stat_ptr_vec.push(Box::new(power));
        }
        Ok(Self { stat_ptr_vec })
    }

    /// Compute every statistic of a field.
    pub fn analyze(&self, field: ArrayView2<f64>) -> Result<Vec<StatisticResult>> {
        let mut results = Vec::with_capacity(self.stat_ptr_vec.len());
        for stat in &self.stat_ptr_vec {
            let name = stat.name();
            let series = stat
                .compute(field)
                .with_context(|| format!("failed to compute {name}"))?;
            log::debug!("computed {name} with {} points", series.len());
            results.push(StatisticResult {
                name: name.to_string(),
                series,
            });
        }
        Ok(results)
    }

    /// Compare the results of a field against those of a reference field.
    pub fn compare(
        results: &[StatisticResult],
        ref_results: &[StatisticResult],
    ) -> Result<Vec<Comparison>> {
        let mut comparisons = Vec::with_capacity(results.len());
        for result in results {
            let name = &result.name;
            let Some(ref_result) = ref_results.iter().find(|r| &r.name == name) else {
                bail!("reference has no results for {name}");
            };
            let difference = difference_series(&result.series, &ref_result.series)
                .with_context(|| format!("failed to compare {name}"))?;
            let max_std = difference.y_std().iter().copied().fold(0.0, f64::max);
            log::debug!("{name}: {} points, max std = {max_std:.3e}", difference.len());
            comparisons.push(Comparison {
                name: name.clone(),
                mean: difference.mean(),
                rms: difference.rms(),
                max_abs: difference.y().iter().map(|val| val.abs()).fold(0.0, f64::max),
                difference,
            });
        }
        Ok(comparisons)
    }

    pub fn save_results<T, P>(results: &[T], file: P) -> Result<()>
    where
        T: Serialize,
        P: AsRef<Path>,
    {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        encode::write(&mut writer, results).context("failed to serialize results")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }

    pub fn load_results<P: AsRef<Path>>(file: P) -> Result<Vec<StatisticResult>> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);
        let results = decode::from_read(&mut reader).context("failed to deserialize results")?;
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn statistic_names() {
        assert_eq!(PixelCounts::default().name(), "PixelCounts");
        assert_eq!(PeakCounts::default().name(), "PeakCounts");

        let stat: Box<dyn Statistic> = Box::new(PeakCounts::default());
        assert_eq!(stat.name(), "PeakCounts");
    }

    #[test]
    fn default_bins() {
        let Bins::Edges(edges) = default_pixel_bins() else {
            panic!("expected bin edges");
        };
        assert_eq!(edges.len(), 50);
        assert!((edges[0] - ((-2.0_f64).exp() - 1.0)).abs() < 1e-12);
        assert!((edges[49] - (2.0_f64.exp() - 1.0)).abs() < 1e-12);

        let Bins::Edges(edges) = default_peak_bins() else {
            panic!("expected bin edges");
        };
        assert_eq!(edges.len(), 50);
        assert!(edges[0] < 0.0);
    }

    #[test]
    fn pixel_counts_total() {
        let field = Array2::from_shape_fn((16, 12), |(i, j)| (i as f64 - j as f64) * 0.1);
        let series = PixelCounts::default().compute(field.view()).unwrap();
        assert_eq!(series.len(), 49);
        let total: f64 = series.y().iter().sum();
        assert!(total <= field.len() as f64);

        let bins = Bins::Edges(vec![-10.0, 0.0, 10.0]);
        let stat = PixelCounts::new(&PixelCountsConfig { bins, range: None });
        let series = stat.compute(field.view()).unwrap();
        let total: f64 = series.y().iter().sum();
        assert_eq!(total, field.len() as f64);
    }

    #[test]
    fn constant_field_has_no_peaks() {
        let field = Array2::from_elem((8, 8), 0.7);
        assert!(find_peaks(field.view()).is_empty());

        let series = PeakCounts::default().compute(field.view()).unwrap();
        assert!(series.y().iter().all(|&count| count == 0.0));
    }

    #[test]
    fn single_peak() {
        let mut field = Array2::zeros((8, 8));
        field[[3, 4]] = 2.5;
        field[[3, 5]] = 1.0;
        assert_eq!(find_peaks(field.view()), vec![2.5]);
    }

    #[test]
    fn tie_is_not_a_peak() {
        let mut field = Array2::zeros((6, 6));
        field[[2, 2]] = 1.0;
        field[[2, 3]] = 1.0;
        assert!(find_peaks(field.view()).is_empty());
    }

    #[test]
    fn peaks_wrap_around_field_extent() {
        // Corner cell neighbors the opposite corner of a 5 x 7 field.
        let mut field = Array2::zeros((5, 7));
        field[[0, 0]] = 1.0;
        assert_eq!(find_peaks(field.view()), vec![1.0]);

        field[[4, 6]] = 2.0;
        assert_eq!(find_peaks(field.view()), vec![2.0]);
    }

    #[test]
    fn peaks_in_row_major_order() {
        let mut field = Array2::zeros((6, 6));
        field[[4, 1]] = 3.0;
        field[[1, 4]] = 2.0;
        field[[1, 1]] = 1.0;
        assert_eq!(find_peaks(field.view()), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn wrap_index_offsets() {
        assert_eq!(wrap_index(0, -1, 128), 127);
        assert_eq!(wrap_index(127, 1, 128), 0);
        assert_eq!(wrap_index(3, 1, 5), 4);
        assert_eq!(wrap_index(0, -1, 1), 0);
    }

    #[test]
    fn compare_against_reference() {
        let field = Array2::from_shape_fn((10, 10), |(i, j)| ((i * 3 + j * 7) % 10) as f64 * 0.5);
        let cfg: Config = toml::from_str("[pixel_counts]\n[peak_counts]\n").unwrap();
        let analyzer = Analyzer::new(&cfg).unwrap();

        let results = analyzer.analyze(field.view()).unwrap();
        assert_eq!(results.len(), 2);

        let comparisons = Analyzer::compare(&results, &results).unwrap();
        for comparison in &comparisons {
            assert!(comparison.difference.y().iter().all(|&val| val == 0.0));
            assert_eq!(comparison.mean, 0.0);
            assert_eq!(comparison.max_abs, 0.0);
        }

        assert!(Analyzer::compare(&results, &results[..1]).is_err());
    }

    #[test]
    fn reject_mismatched_stored_series() {
        let stored = vec![(
            "PixelCounts",
            (vec![0.0, 1.0, 2.0], vec![1.0], Vec::<f64>::new()),
        )];
        let bytes = rmp_serde::to_vec(&stored).unwrap();
        assert!(rmp_serde::from_slice::<Vec<StatisticResult>>(&bytes).is_err());

        let stored = vec![(
            "PixelCounts",
            (vec![0.0, 1.0, 2.0], vec![1.0, 2.0, 1.0], vec![0.0; 3]),
        )];
        let bytes = rmp_serde::to_vec(&stored).unwrap();
        let results: Vec<StatisticResult> = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(results[0].series.y(), &[1.0, 2.0, 1.0]);
    }
}
