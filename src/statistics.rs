//! Output statistics: running mean/variance estimation and confidence
//! interval based stopping for the replication loop.

use serde::Serialize;

/// Welford running mean and variance estimator.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MeanEstimator {
    count: usize,
    mean: f64,
    m2: f64,
}

impl MeanEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn collect(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    pub fn estimate(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.mean
        }
    }

    /// Unbiased sample variance; zero until two observations are available.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn standard_deviation(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn size(&self) -> usize {
        self.count
    }
}

/// Minimum number of observations before an interval is trusted.
const MIN_SAMPLE_SIZE: usize = 2;
/// Observation budget after which an estimator that has not reached its
/// precision target declares itself unstable.
const DEFAULT_UNSTABLE_SAMPLE_LIMIT: usize = 1000;

/// Mean estimator with a two-sided Student-t confidence interval and a
/// relative-precision stopping rule.
#[derive(Debug, Clone, Serialize)]
pub struct CiMeanEstimator {
    name: String,
    level: f64,
    rel_precision: f64,
    unstable_sample_limit: usize,
    inner: MeanEstimator,
}

impl CiMeanEstimator {
    pub fn new(level: f64, rel_precision: f64) -> Self {
        Self {
            name: String::new(),
            level,
            rel_precision,
            unstable_sample_limit: DEFAULT_UNSTABLE_SAMPLE_LIMIT,
            inner: MeanEstimator::new(),
        }
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_unstable_sample_limit(&mut self, limit: usize) {
        self.unstable_sample_limit = limit;
    }

    pub fn reset(&mut self) {
        self.inner.reset();
    }

    pub fn collect(&mut self, x: f64) {
        self.inner.collect(x);
    }

    pub fn estimate(&self) -> f64 {
        self.inner.estimate()
    }

    pub fn standard_deviation(&self) -> f64 {
        self.inner.standard_deviation()
    }

    pub fn size(&self) -> usize {
        self.inner.size()
    }

    pub fn half_width(&self) -> f64 {
        let n = self.inner.size();
        if n < MIN_SAMPLE_SIZE {
            return f64::INFINITY;
        }
        let p = 1.0 - (1.0 - self.level) / 2.0;
        let t = student_t_quantile(p, (n - 1) as f64);
        t * self.inner.standard_deviation() / (n as f64).sqrt()
    }

    pub fn lower(&self) -> f64 {
        self.estimate() - self.half_width()
    }

    pub fn upper(&self) -> f64 {
        self.estimate() + self.half_width()
    }

    /// Achieved relative precision `half_width / |mean|`.
    pub fn relative_precision(&self) -> f64 {
        let mean = self.inner.estimate().abs();
        let hw = self.half_width();
        if hw == 0.0 {
            0.0
        } else {
            hw / mean
        }
    }

    /// The interval is tight enough relative to the mean magnitude.
    pub fn done(&self) -> bool {
        self.size() >= MIN_SAMPLE_SIZE
            && self.half_width() <= self.rel_precision * self.estimate().abs()
    }

    /// The precision target was not reached within the observation budget.
    pub fn unstable(&self) -> bool {
        !self.done() && self.size() >= self.unstable_sample_limit
    }
}

/// Inverse standard normal CDF (Acklam's rational approximation).
fn normal_quantile(p: f64) -> f64 {
    debug_assert!(p > 0.0 && p < 1.0);

    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const P_LOW: f64 = 0.02425;

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    }
}

/// Student-t quantile via the Cornish-Fisher expansion around the normal
/// quantile. Accurate to a few permille for the degrees of freedom produced
/// by replication counts.
fn student_t_quantile(p: f64, df: f64) -> f64 {
    let z = normal_quantile(p);
    if df >= 1000.0 {
        return z;
    }
    let z2 = z * z;
    let g1 = (z2 + 1.0) * z / 4.0;
    let g2 = ((5.0 * z2 + 16.0) * z2 + 3.0) * z / 96.0;
    let g3 = (((3.0 * z2 + 19.0) * z2 + 17.0) * z2 - 15.0) * z / 384.0;
    let g4 = ((((79.0 * z2 + 776.0) * z2 + 1482.0) * z2 - 1920.0) * z2 - 945.0) * z / 92160.0;
    z + g1 / df + g2 / (df * df) + g3 / (df * df * df) + g4 / (df * df * df * df)
}
