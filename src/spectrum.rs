//! Power spectrum statistic and the spectral backends it delegates to.

use crate::analysis::Statistic;
use crate::config::PowerSpectrumConfig;
use crate::stats::Series;
use anyhow::{Context, Result, bail};
use ndarray::{Array2, ArrayView2};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

/// Spectral backends known to the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    MeshFft,
    DirectDft,
}

impl BackendKind {
    /// Try to open the backend, failing if it is unavailable in this build.
    pub fn open(self) -> Result<Box<dyn SpectralBackend>> {
        match self {
            Self::MeshFft => Ok(Box::new(MeshFftPower::open()?)),
            Self::DirectDft => Ok(Box::new(DirectPower)),
        }
    }
}

/// Wavenumber binning of a 1D power spectrum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KBinning {
    pub kmin: f64,
    pub kmax: f64,
    /// Bin width, or the backend default when `None`.
    pub dk: Option<f64>,
}

/// Backend estimating a 1D power spectrum of a 2D field.
pub trait SpectralBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Bin width used when none is configured.
    fn default_dk(&self, box_size: (f64, f64)) -> f64;

    /// Unnormalized forward discrete Fourier transform of the field.
    fn transform(&self, field: ArrayView2<f64>) -> Result<Array2<Complex64>>;

    /// Compute `(k, power)` pairs of equal length.
    fn power_1d(
        &self,
        field: ArrayView2<f64>,
        box_size: (f64, f64),
        binning: &KBinning,
    ) -> Result<(Vec<f64>, Vec<f64>)> {
        if field.is_empty() {
            bail!("field must not be empty");
        }
        let dk = binning.dk.unwrap_or_else(|| self.default_dk(box_size));
        let edges = arange(binning.kmin, binning.kmax, dk)?;
        let spec = self.transform(field).context("failed to transform field")?;
        bin_power(&spec, box_size, &edges)
    }
}

/// FFT backend built on `rustfft`.
///
/// Only available when compiled with the `fft` feature.
pub struct MeshFftPower {
    _priv: (),
}

impl MeshFftPower {
    pub fn open() -> Result<Self> {
        if !cfg!(feature = "fft") {
            bail!("mesh_fft backend requires the `fft` feature");
        }
        Ok(Self { _priv: () })
    }
}

impl SpectralBackend for MeshFftPower {
    fn name(&self) -> &'static str {
        "mesh_fft"
    }

    fn default_dk(&self, box_size: (f64, f64)) -> f64 {
        // Fundamental mode of the box.
        TAU / box_size.0.min(box_size.1)
    }

    fn transform(&self, field: ArrayView2<f64>) -> Result<Array2<Complex64>> {
        fft_2d(field)
    }
}

#[cfg(feature = "fft")]
fn fft_2d(field: ArrayView2<f64>) -> Result<Array2<Complex64>> {
    use rustfft::FftPlanner;

    let (n_rows, n_cols) = field.dim();
    let mut spec = field.mapv(|val| Complex64::new(val, 0.0));
    let mut planner = FftPlanner::<f64>::new();

    let row_fft = planner.plan_fft_forward(n_cols);
    let data = spec
        .as_slice_mut()
        .context("transform buffer is not contiguous")?;
    for row in data.chunks_exact_mut(n_cols) {
        row_fft.process(row);
    }

    let col_fft = planner.plan_fft_forward(n_rows);
    let mut buffer = Vec::with_capacity(n_rows);
    for mut col in spec.columns_mut() {
        buffer.clear();
        buffer.extend(col.iter().copied());
        col_fft.process(&mut buffer);
        for (dst, &src) in col.iter_mut().zip(&buffer) {
            *dst = src;
        }
    }

    Ok(spec)
}

#[cfg(not(feature = "fft"))]
fn fft_2d(_field: ArrayView2<f64>) -> Result<Array2<Complex64>> {
    bail!("compiled without the `fft` feature");
}

/// Direct DFT backend, always available.
///
/// Costs `O(n_rows * n_cols * (n_rows + n_cols))`.
pub struct DirectPower;

impl SpectralBackend for DirectPower {
    fn name(&self) -> &'static str {
        "direct_dft"
    }

    fn default_dk(&self, _box_size: (f64, f64)) -> f64 {
        1e-2
    }

    fn transform(&self, field: ArrayView2<f64>) -> Result<Array2<Complex64>> {
        let (n_rows, n_cols) = field.dim();

        let row_twiddles = twiddles(n_cols);
        let mut half = Array2::<Complex64>::zeros((n_rows, n_cols));
        for i_row in 0..n_rows {
            for i_freq in 0..n_cols {
                half[[i_row, i_freq]] = (0..n_cols)
                    .map(|i_col| field[[i_row, i_col]] * row_twiddles[(i_col * i_freq) % n_cols])
                    .sum();
            }
        }

        let col_twiddles = twiddles(n_rows);
        let mut spec = Array2::<Complex64>::zeros((n_rows, n_cols));
        for i_col in 0..n_cols {
            for i_freq in 0..n_rows {
                spec[[i_freq, i_col]] = (0..n_rows)
                    .map(|i_row| half[[i_row, i_col]] * col_twiddles[(i_row * i_freq) % n_rows])
                    .sum();
            }
        }

        Ok(spec)
    }
}

fn twiddles(n: usize) -> Vec<Complex64> {
    (0..n)
        .map(|idx| Complex64::from_polar(1.0, -TAU * idx as f64 / n as f64))
        .collect()
}

/// Signed frequency index of DFT output `idx` of length `n`.
fn fft_freq(idx: usize, n: usize) -> f64 {
    if idx < n.div_ceil(2) {
        idx as f64
    } else {
        idx as f64 - n as f64
    }
}

const MAX_N_EDGES: usize = 1 << 20;

fn arange(start: f64, stop: f64, step: f64) -> Result<Vec<f64>> {
    if step.is_nan() || step <= 0.0 {
        bail!("k bin width must be positive, but is {step}");
    }
    let n_vals = ((stop - start) / step).ceil();
    if n_vals.is_nan() || n_vals < 2.0 {
        bail!("k range [{start}, {stop}) with bin width {step} contains no bins");
    }
    if n_vals > MAX_N_EDGES as f64 {
        bail!("k range [{start}, {stop}) with bin width {step} exceeds {MAX_N_EDGES} bin edges");
    }
    Ok((0..n_vals as usize)
        .map(|idx| start + idx as f64 * step)
        .collect())
}

/// Average `|F|^2 V / N^2` over the modes in each k bin, dropping empty bins.
fn bin_power(
    spec: &Array2<Complex64>,
    box_size: (f64, f64),
    edges: &[f64],
) -> Result<(Vec<f64>, Vec<f64>)> {
    let (n_rows, n_cols) = spec.dim();
    let n_cells = (n_rows * n_cols) as f64;
    let norm = box_size.0 * box_size.1 / (n_cells * n_cells);

    let n_bins = edges.len() - 1;
    let mut k_sum = vec![0.0; n_bins];
    let mut power_sum = vec![0.0; n_bins];
    let mut n_modes = vec![0usize; n_bins];

    for ((i_row, i_col), val) in spec.indexed_iter() {
        let k_x = TAU * fft_freq(i_row, n_rows) / box_size.0;
        let k_y = TAU * fft_freq(i_col, n_cols) / box_size.1;
        let k = k_x.hypot(k_y);
        if k < edges[0] || k >= edges[n_bins] {
            continue;
        }
        let i_bin = edges.partition_point(|&edge| edge <= k) - 1;
        k_sum[i_bin] += k;
        power_sum[i_bin] += val.norm_sqr() * norm;
        n_modes[i_bin] += 1;
    }

    let mut k_vals = Vec::with_capacity(n_bins);
    let mut power_vals = Vec::with_capacity(n_bins);
    for i_bin in 0..n_bins {
        if n_modes[i_bin] == 0 {
            continue;
        }
        let n = n_modes[i_bin] as f64;
        k_vals.push(k_sum[i_bin] / n);
        power_vals.push(power_sum[i_bin] / n);
    }

    if k_vals.is_empty() {
        bail!("no Fourier modes fall inside the k range");
    }

    Ok((k_vals, power_vals))
}

/// Open the first available backend, trying candidates in order.
pub fn select_backend<I, F>(candidates: I) -> Result<Box<dyn SpectralBackend>>
where
    I: IntoIterator<Item = F>,
    F: FnOnce() -> Result<Box<dyn SpectralBackend>>,
{
    let mut failures = Vec::new();
    for open in candidates {
        match open() {
            Ok(backend) => {
                if !failures.is_empty() {
                    log::warn!("falling back to {} backend", backend.name());
                }
                return Ok(backend);
            }
            Err(error) => {
                log::warn!("spectral backend unavailable: {error:#}");
                failures.push(format!("{error:#}"));
            }
        }
    }
    bail!("no spectral backend available [{}]", failures.join("; "));
}

/// Statistic: 1D power spectrum of a field.
pub struct PowerSpectrum {
    box_size: (f64, f64),
    binning: KBinning,
    backend: Box<dyn SpectralBackend>,
}

impl PowerSpectrum {
    /// Create a new `PowerSpectrum` using the first available configured backend.
    pub fn new(cfg: &PowerSpectrumConfig) -> Result<Self> {
        let candidates = cfg.backends.iter().map(|&kind| move || kind.open());
        let backend = select_backend(candidates).context("failed to select spectral backend")?;
        log::debug!("using {} backend", backend.name());
        Ok(Self::with_backend(cfg, backend))
    }

    pub fn with_backend(cfg: &PowerSpectrumConfig, backend: Box<dyn SpectralBackend>) -> Self {
        Self {
            box_size: cfg.box_size,
            binning: KBinning {
                kmin: cfg.kmin,
                kmax: cfg.kmax,
                dk: cfg.dk,
            },
            backend,
        }
    }
}

impl Statistic for PowerSpectrum {
    fn compute(&self, field: ArrayView2<f64>) -> Result<Series> {
        let (k, power) = self
            .backend
            .power_1d(field, self.box_size, &self.binning)
            .with_context(|| format!("{} backend failed", self.backend.name()))?;
        Series::new(k, power)
    }
}
