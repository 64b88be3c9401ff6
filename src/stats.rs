//! Hypothesis tests
//!
//! Two-sided pooled two-proportion z-test and equal-variance two-sample t-test,
//! with the normal and Student-t tail probabilities computed in closed form.

use crate::error::AnalysisError;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Test statistic and two-sided p-value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub statistic: f64,
    pub p_value: f64,
}

impl TestOutcome {
    /// Reject H0 at the given significance level
    pub fn is_significant(&self, alpha: f64) -> bool {
        self.p_value < alpha
    }
}

/// Two-sided pooled two-proportion z-test.
///
/// `z = (p_a - p_b) / sqrt(p (1 - p) (1/n_a + 1/n_b))` with the pooled
/// proportion `p = (x_a + x_b) / (n_a + n_b)`.
pub fn compare_proportions(
    successes_a: usize,
    n_a: usize,
    successes_b: usize,
    n_b: usize,
) -> Result<TestOutcome, AnalysisError> {
    if n_a < 2 || n_b < 2 {
        return Err(AnalysisError::DegenerateInput(format!(
            "proportion test needs at least 2 trials per sample (got {} and {})",
            n_a, n_b
        )));
    }
    if successes_a > n_a || successes_b > n_b {
        return Err(AnalysisError::DegenerateInput(
            "successes exceed number of trials".to_string(),
        ));
    }

    let (na, nb) = (n_a as f64, n_b as f64);
    let p_a = successes_a as f64 / na;
    let p_b = successes_b as f64 / nb;
    let pooled = (successes_a + successes_b) as f64 / (na + nb);
    let se = (pooled * (1.0 - pooled) * (1.0 / na + 1.0 / nb)).sqrt();

    if se == 0.0 || !se.is_finite() {
        return Err(AnalysisError::DegenerateInput(
            "pooled proportion is 0 or 1, standard error vanishes".to_string(),
        ));
    }

    let z = (p_a - p_b) / se;
    Ok(TestOutcome {
        statistic: z,
        p_value: two_sided_normal_p(z),
    })
}

/// Independent two-sample Student t-test, equal variances, two-sided.
pub fn compare_means(sample_a: &[f64], sample_b: &[f64]) -> Result<TestOutcome, AnalysisError> {
    if sample_a.len() < 2 || sample_b.len() < 2 {
        return Err(AnalysisError::DegenerateInput(format!(
            "t-test needs at least 2 observations per sample (got {} and {})",
            sample_a.len(),
            sample_b.len()
        )));
    }

    let (na, nb) = (sample_a.len() as f64, sample_b.len() as f64);
    let mean_a = mean(sample_a);
    let mean_b = mean(sample_b);
    let ss_a: f64 = sample_a.iter().map(|x| (x - mean_a).powi(2)).sum();
    let ss_b: f64 = sample_b.iter().map(|x| (x - mean_b).powi(2)).sum();

    let df = na + nb - 2.0;
    let pooled_var = (ss_a + ss_b) / df;
    let se = (pooled_var * (1.0 / na + 1.0 / nb)).sqrt();

    if se == 0.0 || !se.is_finite() {
        return Err(AnalysisError::DegenerateInput(
            "pooled variance is zero".to_string(),
        ));
    }

    let t = (mean_a - mean_b) / se;
    Ok(TestOutcome {
        statistic: t,
        p_value: two_sided_t_p(t, df)?,
    })
}

/// Arithmetic mean; callers guarantee a non-empty slice
pub(crate) fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// P(|Z| >= |z|) for a standard normal Z
fn two_sided_normal_p(z: f64) -> f64 {
    erfc(z.abs() / std::f64::consts::SQRT_2).min(1.0)
}

/// P(|T| >= |t|) for Student's t with `df` degrees of freedom
fn two_sided_t_p(t: f64, df: f64) -> Result<f64, AnalysisError> {
    let x = df / (df + t * t);
    regularized_incomplete_beta(df / 2.0, 0.5, x)
        .map(|p| p.clamp(0.0, 1.0))
        .ok_or_else(|| {
            AnalysisError::DegenerateInput(format!(
                "t distribution tail did not converge (t = {}, df = {})",
                t, df
            ))
        })
}

/// Complementary error function, fractional error below 1.2e-7
fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let ans = t
        * (-z * z - 1.265_512_23
            + t * (1.000_023_68
                + t * (0.374_091_96
                    + t * (0.096_784_18
                        + t * (-0.186_288_06
                            + t * (0.278_868_07
                                + t * (-1.135_203_98
                                    + t * (1.488_515_87
                                        + t * (-0.822_152_23 + t * 0.170_872_77)))))))))
            .exp();
    if x >= 0.0 {
        ans
    } else {
        2.0 - ans
    }
}

/// ln Γ(x) for x > 0 (Lanczos approximation)
fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 6] = [
        76.180_091_729_471_46,
        -86.505_320_329_416_77,
        24.014_098_240_830_91,
        -1.231_739_572_450_155,
        0.120_865_097_386_617_9e-2,
        -0.539_523_938_495_3e-5,
    ];

    let mut y = x;
    let tmp = x + 5.5;
    let tmp = tmp - (x + 0.5) * tmp.ln();
    let mut series = 1.000_000_000_190_015;
    for c in COEFFS {
        y += 1.0;
        series += c / y;
    }
    -tmp + (2.506_628_274_631_000_5 * series / x).ln()
}

/// Regularized incomplete beta function I_x(a, b), `None` if the continued
/// fraction does not converge
fn regularized_incomplete_beta(a: f64, b: f64, x: f64) -> Option<f64> {
    if x <= 0.0 {
        return Some(0.0);
    }
    if x >= 1.0 {
        return Some(1.0);
    }

    let front = (ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln())
        .exp();

    // The continued fraction converges fastest on this side of the mean
    if x < (a + 1.0) / (a + b + 2.0) {
        Some(front * beta_continued_fraction(a, b, x, MAX_ITERATIONS)? / a)
    } else {
        Some(1.0 - front * beta_continued_fraction(b, a, 1.0 - x, MAX_ITERATIONS)? / b)
    }
}

const MAX_ITERATIONS: usize = 300;

/// Continued fraction for the incomplete beta (modified Lentz).
///
/// Returns `None` when `max_iterations` pass without convergence.
fn beta_continued_fraction(a: f64, b: f64, x: f64, max_iterations: usize) -> Option<f64> {
    const EPS: f64 = 3.0e-14;
    const FPMIN: f64 = 1.0e-300;

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < FPMIN {
        d = FPMIN;
    }
    d = 1.0 / d;
    let mut h = d;

    for m in 1..=max_iterations {
        let m = m as f64;
        let m2 = 2.0 * m;

        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < FPMIN {
            d = FPMIN;
        }
        c = 1.0 + aa / c;
        if c.abs() < FPMIN {
            c = FPMIN;
        }
        d = 1.0 / d;
        h *= d * c;

        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < FPMIN {
            d = FPMIN;
        }
        c = 1.0 + aa / c;
        if c.abs() < FPMIN {
            c = FPMIN;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;

        if (delta - 1.0).abs() < EPS {
            return Some(h);
        }
    }

    warn!(a, b, x, max_iterations, "incomplete beta continued fraction did not converge");
    None
}
