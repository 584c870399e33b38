use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// Paired `(x, y)` data with a per-point uncertainty `y_std`.
///
/// All three vectors always have the same length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSeries")]
pub struct Series {
    x: Vec<f64>,
    y: Vec<f64>,
    y_std: Vec<f64>,
}

/// Unchecked wire form of a [`Series`].
#[derive(Serialize, Deserialize)]
struct RawSeries {
    x: Vec<f64>,
    y: Vec<f64>,
    y_std: Vec<f64>,
}

impl TryFrom<RawSeries> for Series {
    type Error = anyhow::Error;

    fn try_from(raw: RawSeries) -> Result<Self> {
        Self::with_std(raw.x, raw.y, raw.y_std)
    }
}

impl Series {
    /// Create a new `Series` with zero uncertainty.
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> Result<Self> {
        let y_std = vec![0.0; y.len()];
        Self::with_std(x, y, y_std)
    }

    /// Create a new `Series` with an explicit uncertainty per point.
    pub fn with_std(x: Vec<f64>, y: Vec<f64>, y_std: Vec<f64>) -> Result<Self> {
        let (n_x, n_y, n_std) = (x.len(), y.len(), y_std.len());
        if n_x != n_y || n_y != n_std {
            bail!("series lengths must match, but are x: {n_x}, y: {n_y}, y_std: {n_std}");
        }
        Ok(Self { x, y, y_std })
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn y(&self) -> &[f64] {
        &self.y
    }

    pub fn y_std(&self) -> &[f64] {
        &self.y_std
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Trapezoidal integral of `y` over `x` divided by the range of `x`.
    ///
    /// NaN when the range of `x` is zero.
    pub fn mean(&self) -> f64 {
        compute_mean(&self.x, &self.y)
    }

    /// Root mean square of `y`, using the same integral as [`Series::mean`].
    pub fn rms(&self) -> f64 {
        let y_2: Vec<_> = self.y.iter().map(|val| val * val).collect();
        compute_mean(&self.x, &y_2).sqrt()
    }
}

fn compute_mean(x: &[f64], y: &[f64]) -> f64 {
    compute_trapz(x, y) / compute_ptp(x)
}

fn compute_trapz(x: &[f64], y: &[f64]) -> f64 {
    x.windows(2)
        .zip(y.windows(2))
        .map(|(x, y)| (x[1] - x[0]) * (y[0] + y[1]) / 2.0)
        .sum()
}

fn compute_ptp(x: &[f64]) -> f64 {
    if x.is_empty() {
        return f64::NAN;
    }
    let max = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = x.iter().copied().fold(f64::INFINITY, f64::min);
    max - min
}

/// Bin specification of a histogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Bins {
    /// Number of equal-width bins spanning the data range.
    Count(usize),
    /// Explicit bin edges.
    Edges(Vec<f64>),
}

/// Build a [`Series`] of bin centers and counts from a histogram of `input`.
///
/// All bins are half-open except the last one, which also includes its right edge.
/// Values outside the bin range are ignored. `data_range` only applies to [`Bins::Count`].
pub fn density_series<I>(input: I, bins: &Bins, data_range: Option<(f64, f64)>) -> Result<Series>
where
    I: IntoIterator<Item = f64>,
{
    let vals: Vec<f64> = input.into_iter().collect();

    let edges = match bins {
        Bins::Count(n_bins) => {
            if *n_bins == 0 {
                bail!("number of bins must be positive");
            }
            let (min, max) = match data_range {
                Some(range) => range,
                None => compute_data_range(&vals),
            };
            check_range(min, max)?;
            let (min, max) = if min == max {
                (min - 0.5, max + 0.5)
            } else {
                (min, max)
            };
            linspace(min, max, n_bins + 1)
        }
        Bins::Edges(edges) => {
            if edges.len() < 2 {
                bail!("at least two bin edges are required, but got {}", edges.len());
            }
            if edges.windows(2).any(|pair| pair[0] > pair[1]) {
                bail!("bins must increase monotonically");
            }
            edges.clone()
        }
    };

    let n_bins = edges.len() - 1;
    let first = edges[0];
    let last = edges[n_bins];
    let mut counts = vec![0.0; n_bins];
    for val in vals {
        if !(first..=last).contains(&val) {
            continue;
        }
        let i_bin = if val == last {
            n_bins - 1
        } else {
            edges.partition_point(|&edge| edge <= val) - 1
        };
        counts[i_bin] += 1.0;
    }

    let centers = edges.windows(2).map(|pair| (pair[0] + pair[1]) / 2.0).collect();
    Series::new(centers, counts)
}

fn compute_data_range(vals: &[f64]) -> (f64, f64) {
    if vals.is_empty() {
        return (0.0, 1.0);
    }
    // NaN values poison the range so that `check_range` rejects it.
    let min = vals.iter().copied().fold(f64::INFINITY, |acc, val| {
        if acc.is_nan() || val.is_nan() { f64::NAN } else { acc.min(val) }
    });
    let max = vals.iter().copied().fold(f64::NEG_INFINITY, |acc, val| {
        if acc.is_nan() || val.is_nan() { f64::NAN } else { acc.max(val) }
    });
    (min, max)
}

fn check_range(min: f64, max: f64) -> Result<()> {
    if !min.is_finite() || !max.is_finite() {
        bail!("range of [{min}, {max}] is not finite");
    }
    if min > max {
        bail!("max must be larger than min in range, but range is [{min}, {max}]");
    }
    Ok(())
}

fn linspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (num - 1) as f64;
            let mut vals: Vec<_> = (0..num).map(|idx| start + idx as f64 * step).collect();
            vals[num - 1] = stop;
            vals
        }
    }
}

/// Exponentially spaced values: `exp(linspace(min, max, num))`.
pub fn expspace(min: f64, max: f64, num: usize) -> Vec<f64> {
    linspace(min, max, num).into_iter().map(f64::exp).collect()
}

/// Normalized point-wise relative difference between two series.
///
/// Both series are linearly interpolated onto the sorted union of their `x` values.
pub fn difference_series(series_1: &Series, series_2: &Series) -> Result<Series> {
    if series_1.is_empty() || series_2.is_empty() {
        bail!("cannot interpolate an empty series");
    }

    let mut combined_x: Vec<f64> = series_1.x.iter().chain(&series_2.x).copied().collect();
    combined_x.sort_by(f64::total_cmp);
    combined_x.dedup();

    let y_1 = interp(&combined_x, &series_1.x, &series_1.y);
    let y_2 = interp(&combined_x, &series_2.x, &series_2.y);
    let std_1 = interp(&combined_x, &series_1.x, &series_1.y_std);
    let std_2 = interp(&combined_x, &series_2.x, &series_2.y_std);

    let mut diff = Vec::with_capacity(combined_x.len());
    let mut diff_std = Vec::with_capacity(combined_x.len());
    for i_pnt in 0..combined_x.len() {
        let (p_1, p_2) = (y_1[i_pnt], y_2[i_pnt]);
        let (s_1, s_2) = (std_1[i_pnt], std_2[i_pnt]);
        diff.push(relative_diff(p_1, p_2));
        diff_std.push(relative_diff_std(p_1, p_2, s_1, s_2));
    }

    Series::with_std(combined_x, diff, diff_std)
}

fn relative_diff(p_1: f64, p_2: f64) -> f64 {
    if p_1 == 0.0 && p_2 == 0.0 {
        return 0.0;
    }
    (p_1 - p_2) / (p_1 * p_1 + p_2 * p_2).sqrt()
}

fn relative_diff_std(p_1: f64, p_2: f64, s_1: f64, s_2: f64) -> f64 {
    if (s_1 == 0.0 && s_2 == 0.0) || (p_1 == 0.0 && p_2 == 0.0) {
        return 0.0;
    }
    (p_1 + p_2).abs()
        * (p_1 * p_1 + p_2 * p_2).powi(-3).sqrt()
        * ((p_1 * s_2).powi(2) + (p_2 * s_1).powi(2)).sqrt()
}

/// Piecewise linear interpolation of `(xp, fp)` at `x`, clamped to the end values.
///
/// `xp` must be non-empty and increasing.
fn interp(x: &[f64], xp: &[f64], fp: &[f64]) -> Vec<f64> {
    let n_pnts = xp.len();
    x.iter()
        .map(|&val| {
            let idx = xp.partition_point(|&pnt| pnt <= val);
            if idx == 0 {
                return fp[0];
            }
            if idx == n_pnts {
                return fp[n_pnts - 1];
            }
            let (i_lo, i_hi) = (idx - 1, idx);
            if xp[i_lo] == val {
                return fp[i_lo];
            }
            let slope = (fp[i_hi] - fp[i_lo]) / (xp[i_hi] - xp[i_lo]);
            fp[i_lo] + slope * (val - xp[i_lo])
        })
        .collect()
}
