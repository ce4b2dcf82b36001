//! Numeric routines for correlation significance.
//!
//! Pearson's r uses sample statistics (divide by `n - 1`). Its two-sided
//! p-value comes from Student's t with `n - 2` degrees of freedom:
//!
//! ```text
//! t = r * sqrt((n - 2) / (1 - r^2))
//! p = 2 * (1 - CDF_t(|t|, n - 2)) = I_{df / (df + t^2)}(df / 2, 1 / 2)
//! ```
//!
//! where `I_x(a, b)` is the regularized incomplete beta function.

use std::f64::consts::PI;

const LANCZOS_G: f64 = 7.0;
const LANCZOS_COEFFS: [f64; 9] = [
    0.999_999_999_999_809_9,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_1,
    -176.615_029_162_140_6,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_572e-6,
    1.505_632_735_149_311_6e-7,
];

const CF_MAX_ITERATIONS: usize = 300;
const CF_EPSILON: f64 = 1e-15;
const CF_TINY: f64 = 1e-300;

/// Arithmetic mean; `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample Pearson correlation of paired values.
///
/// Returns `None` when the slices differ in length, hold fewer than two
/// pairs, or either side has zero variance (r is undefined there).
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len();
    if n != y.len() || n < 2 {
        return None;
    }

    let mean_x = mean(x)?;
    let mean_y = mean(y)?;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (xv, yv) in x.iter().zip(y.iter()) {
        let dx = xv - mean_x;
        let dy = yv - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }

    if is_zero_spread(sxx, x) || is_zero_spread(syy, y) {
        return None;
    }

    let dof = (n - 1) as f64;
    let covariance = sxy / dof;
    let std_x = (sxx / dof).sqrt();
    let std_y = (syy / dof).sqrt();

    let r = covariance / (std_x * std_y);
    if !r.is_finite() {
        return None;
    }
    Some(r.clamp(-1.0, 1.0))
}

/// Sum of squared deviations indistinguishable from rounding noise.
fn is_zero_spread(sum_sq_dev: f64, values: &[f64]) -> bool {
    let max_abs = values.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    let noise = 8.0 * f64::EPSILON * max_abs;
    sum_sq_dev <= values.len() as f64 * noise * noise
}

/// Two-sided p-value for the null hypothesis `r = 0` over `n` pairs.
///
/// `None` when `n <= 2` (no degrees of freedom) or `r` is not finite.
pub fn correlation_p_value(r: f64, n: usize) -> Option<f64> {
    if n <= 2 || !r.is_finite() {
        return None;
    }
    let df = (n - 2) as f64;
    let r = r.clamp(-1.0, 1.0);
    let one_minus_r2 = 1.0 - r * r;
    if one_minus_r2 <= 0.0 {
        return Some(0.0);
    }
    let t = r * (df / one_minus_r2).sqrt();
    Some(student_t_two_sided(t, df))
}

/// `P(|T| >= |t|)` for Student's t with `df` degrees of freedom.
pub fn student_t_two_sided(t: f64, df: f64) -> f64 {
    if t.is_nan() || df <= 0.0 {
        return f64::NAN;
    }
    if t.is_infinite() {
        return 0.0;
    }
    let x = df / (df + t * t);
    regularized_incomplete_beta(df / 2.0, 0.5, x).clamp(0.0, 1.0)
}

/// Natural log of the gamma function (Lanczos approximation, g = 7).
pub fn ln_gamma(z: f64) -> f64 {
    if z <= 0.0 || !z.is_finite() {
        return f64::NAN;
    }

    if z < 0.5 {
        // Reflection formula
        return PI.ln() - (PI * z).sin().ln() - ln_gamma(1.0 - z);
    }

    let x = z - 1.0;
    let mut acc = LANCZOS_COEFFS[0];
    for (idx, coeff) in LANCZOS_COEFFS.iter().enumerate().skip(1) {
        acc += coeff / (x + idx as f64);
    }

    let t = x + LANCZOS_G + 0.5;
    0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + acc.ln()
}

/// Regularized incomplete beta function `I_x(a, b)`.
pub fn regularized_incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }

    let ln_front = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();

    // The continued fraction converges quickly only below the mean of the
    // distribution; use the symmetry I_x(a, b) = 1 - I_{1-x}(b, a) above it.
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(a, b, x) / a
    } else {
        1.0 - front * beta_continued_fraction(b, a, 1.0 - x) / b
    }
}

/// Continued fraction for the incomplete beta function (modified Lentz).
fn beta_continued_fraction(a: f64, b: f64, x: f64) -> f64 {
    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;

    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < CF_TINY {
        d = CF_TINY;
    }
    d = 1.0 / d;
    let mut h = d;

    for m in 1..=CF_MAX_ITERATIONS {
        let m = m as f64;
        let m2 = 2.0 * m;

        // Even step
        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < CF_TINY {
            d = CF_TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < CF_TINY {
            c = CF_TINY;
        }
        d = 1.0 / d;
        h *= d * c;

        // Odd step
        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < CF_TINY {
            d = CF_TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < CF_TINY {
            c = CF_TINY;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;

        if (delta - 1.0).abs() < CF_EPSILON {
            break;
        }
    }

    h
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() < tol,
            "expected {expected}, got {actual} (tol {tol})"
        );
    }

    #[test]
    fn test_ln_gamma_known_values() {
        assert_close(ln_gamma(1.0), 0.0, 1e-10);
        assert_close(ln_gamma(2.0), 0.0, 1e-10);
        assert_close(ln_gamma(5.0), 24.0_f64.ln(), 1e-10);
        assert_close(ln_gamma(0.5), PI.sqrt().ln(), 1e-10);
        assert!(ln_gamma(0.0).is_nan());
    }

    #[test]
    fn test_incomplete_beta_bounds_and_symmetry() {
        assert_eq!(regularized_incomplete_beta(2.0, 3.0, 0.0), 0.0);
        assert_eq!(regularized_incomplete_beta(2.0, 3.0, 1.0), 1.0);
        // I_x(1, 1) is the uniform CDF
        assert_close(regularized_incomplete_beta(1.0, 1.0, 0.37), 0.37, 1e-9);
        // I_x(a, b) = 1 - I_{1-x}(b, a)
        let lhs = regularized_incomplete_beta(2.5, 0.5, 0.3);
        let rhs = 1.0 - regularized_incomplete_beta(0.5, 2.5, 0.7);
        assert_close(lhs, rhs, 1e-9);
    }

    #[test]
    fn test_student_t_one_degree_matches_cauchy() {
        // With df = 1, P(|T| >= t) = 1 - (2 / pi) * atan(t)
        for t in [0.5, 1.0, 3.0] {
            let expected = 1.0 - 2.0 / PI * f64::atan(t);
            assert_close(student_t_two_sided(t, 1.0), expected, 1e-8);
        }
        assert_close(student_t_two_sided(0.0, 4.0), 1.0, 1e-12);
        assert_eq!(student_t_two_sided(f64::INFINITY, 4.0), 0.0);
    }

    #[test]
    fn test_correlation_p_value_reference_points() {
        // Reference values from the t distribution
        assert_close(correlation_p_value(0.5, 10).unwrap(), 0.141_113, 1e-5);
        assert_close(correlation_p_value(0.8, 5).unwrap(), 0.104_088, 1e-5);
        assert_close(correlation_p_value(0.3, 30).unwrap(), 0.107_246, 1e-5);
        assert_close(correlation_p_value(-0.9, 4).unwrap(), 0.1, 1e-6);
    }

    #[test]
    fn test_correlation_p_value_edges() {
        assert!(correlation_p_value(0.9, 2).is_none());
        assert!(correlation_p_value(f64::NAN, 10).is_none());
        assert_eq!(correlation_p_value(1.0, 5), Some(0.0));
        assert_eq!(correlation_p_value(-1.0, 5), Some(0.0));
        assert_close(correlation_p_value(0.0, 8).unwrap(), 1.0, 1e-12);
    }

    #[test]
    fn test_pearson_perfect_and_inverse() {
        let x = [8.0, 4.0, 9.0, 5.0, 7.0];
        let y = [7.0, 3.0, 8.0, 4.0, 6.0];
        assert_close(pearson(&x, &y).unwrap(), 1.0, 1e-12);

        let inverse: Vec<f64> = x.iter().map(|v| 20.0 - 2.0 * v).collect();
        assert_close(pearson(&x, &inverse).unwrap(), -1.0, 1e-12);
    }

    #[test]
    fn test_pearson_known_value() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [2.0, 1.0, 4.0, 3.0, 5.0];
        assert_close(pearson(&x, &y).unwrap(), 0.8, 1e-12);
    }

    #[test]
    fn test_pearson_is_symmetric() {
        let x = [1.0, 3.5, 2.0, 8.0, 6.5, 4.0];
        let y = [0.5, 2.0, 2.5, 6.0, 7.5, 3.0];
        assert_eq!(pearson(&x, &y), pearson(&y, &x));
    }

    #[test]
    fn test_pearson_zero_variance() {
        assert!(pearson(&[5.0, 5.0, 5.0], &[1.0, 2.0, 3.0]).is_none());
        assert!(pearson(&[1.0, 2.0, 3.0], &[0.1, 0.1, 0.1]).is_none());
    }

    #[test]
    fn test_pearson_large_offset_is_not_degenerate() {
        let x = [1e6 + 1.0, 1e6 + 2.0, 1e6 + 3.0];
        let y = [1.0, 2.0, 3.0];
        assert_close(pearson(&x, &y).unwrap(), 1.0, 1e-9);
    }

    #[test]
    fn test_pearson_rejects_mismatched_or_short_input() {
        assert!(pearson(&[1.0, 2.0], &[1.0]).is_none());
        assert!(pearson(&[1.0], &[1.0]).is_none());
        assert!(pearson(&[], &[]).is_none());
    }
}
