//! Statistical acceptance checks for RNG device output.
//!
//! A small battery aimed at catching broken devices and biased extraction,
//! not at certifying a generator. Each check returns a [`TestResult`] with
//! a p-value (where applicable), a pass/fail determination at `p >= 0.01`,
//! and a letter grade (A through F).

use statrs::distribution::{ChiSquared, ContinuousCDF, Normal};
use statrs::function::erf::erfc;

/// Significance threshold used by every check.
pub const ALPHA: f64 = 0.01;

// ═══════════════════════════════════════════════════════════════════════════════
// Core types
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of a single statistical check.
#[derive(Debug, Clone)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub p_value: Option<f64>,
    pub statistic: f64,
    pub details: String,
    pub grade: char,
}

impl TestResult {
    /// Assign a letter grade based on p-value.
    ///
    /// - A: p >= 0.1
    /// - B: p >= 0.01
    /// - C: p >= 0.001
    /// - D: p >= 0.0001
    /// - F: otherwise or None
    pub fn grade_from_p(p: Option<f64>) -> char {
        match p {
            Some(p) if p >= 0.1 => 'A',
            Some(p) if p >= 0.01 => 'B',
            Some(p) if p >= 0.001 => 'C',
            Some(p) if p >= 0.0001 => 'D',
            _ => 'F',
        }
    }

    /// Pass when `p >= threshold`.
    pub fn pass_from_p(p: Option<f64>, threshold: f64) -> bool {
        p.is_some_and(|p| p >= threshold)
    }

    fn from_p(name: &str, p: f64, statistic: f64, details: String) -> Self {
        Self {
            name: name.to_string(),
            passed: Self::pass_from_p(Some(p), ALPHA),
            p_value: Some(p),
            statistic,
            details,
            grade: Self::grade_from_p(Some(p)),
        }
    }
}

impl std::fmt::Display for TestResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let verdict = if self.passed { "PASS" } else { "FAIL" };
        match self.p_value {
            Some(p) => write!(f, "[{}] {verdict} {} p={p:.4} ({})", self.grade, self.name, self.details),
            None => write!(f, "[{}] {verdict} {} ({})", self.grade, self.name, self.details),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════════════════

/// Unpack bytes into bits, MSB first.
fn to_bits(data: &[u8]) -> Vec<u8> {
    data.iter()
        .flat_map(|&byte| (0..8).rev().map(move |shift| (byte >> shift) & 1))
        .collect()
}

fn insufficient(name: &str, needed: usize, got: usize) -> TestResult {
    TestResult {
        name: name.to_string(),
        passed: false,
        p_value: None,
        statistic: 0.0,
        details: format!("Insufficient data: need {needed}, got {got}"),
        grade: 'F',
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Distribution checks
// ═══════════════════════════════════════════════════════════════════════════════

/// Pearson chi-square against a uniform distribution over `counts.len()`
/// categories.
///
/// Needs at least two categories and an expected count of 5 per category.
pub fn chi_square_uniform(counts: &[u64]) -> TestResult {
    let name = "Chi-Square Uniformity";
    let k = counts.len();
    let total: u64 = counts.iter().sum();
    if k < 2 {
        return insufficient(name, 2, k);
    }
    let expected = total as f64 / k as f64;
    if expected < 5.0 {
        return insufficient(name, 5 * k, total as usize);
    }
    let chi2: f64 = counts
        .iter()
        .map(|&c| {
            let diff = c as f64 - expected;
            diff * diff / expected
        })
        .sum();
    let p = match ChiSquared::new((k - 1) as f64) {
        Ok(dist) => dist.sf(chi2),
        Err(_) => 0.0,
    };
    TestResult::from_p(name, p, chi2, format!("k={k}, n={total}, expected_per_bin={expected:.1}"))
}

/// Chi-square over the 256 byte values.
pub fn byte_frequency(data: &[u8]) -> TestResult {
    let n = data.len();
    if n < 256 * 5 {
        return insufficient("Byte Frequency", 256 * 5, n);
    }
    let mut hist = [0u64; 256];
    for &b in data {
        hist[b as usize] += 1;
    }
    let mut result = chi_square_uniform(&hist);
    result.name = "Byte Frequency".to_string();
    result
}

/// Sample mean of `values` compared with `expected` for a population of
/// known `variance`, as a two-sided z-test.
pub fn mean_within(values: &[i64], expected: f64, variance: f64) -> TestResult {
    let name = "Mean";
    let n = values.len();
    if n < 30 {
        return insufficient(name, 30, n);
    }
    let nf = n as f64;
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / nf;
    let z = (mean - expected).abs() / (variance / nf).sqrt();
    let p = 2.0 * Normal::standard().sf(z);
    TestResult::from_p(name, p, z, format!("mean={mean:.3} (exp {expected:.3}), n={n}"))
}

/// Variance of a discrete uniform distribution over `k` consecutive integers.
pub fn uniform_variance(k: u64) -> f64 {
    let k = k as f64;
    (k * k - 1.0) / 12.0
}

// ═══════════════════════════════════════════════════════════════════════════════
// Bit-level checks
// ═══════════════════════════════════════════════════════════════════════════════

/// Proportion of ones should be ~50%.
pub fn monobit_frequency(data: &[u8]) -> TestResult {
    let name = "Monobit Frequency";
    let n = data.len() * 8;
    if n < 100 {
        return insufficient(name, 100, n);
    }
    let ones: i64 = data.iter().map(|b| b.count_ones() as i64).sum();
    let s = 2 * ones - n as i64;
    let s_obs = (s as f64).abs() / (n as f64).sqrt();
    let p = erfc(s_obs / std::f64::consts::SQRT_2);
    TestResult::from_p(name, p, s_obs, format!("S={s}, n={n}"))
}

/// Number of uninterrupted runs of identical bits.
pub fn runs_test(data: &[u8]) -> TestResult {
    let name = "Runs";
    let bits = to_bits(data);
    let n = bits.len();
    if n < 100 {
        return insufficient(name, 100, n);
    }
    let nf = n as f64;
    let pi = bits.iter().filter(|&&b| b == 1).count() as f64 / nf;
    // Prerequisite: monobit must be roughly balanced.
    if (pi - 0.5).abs() >= 2.0 / nf.sqrt() {
        return TestResult {
            name: name.to_string(),
            passed: false,
            p_value: Some(0.0),
            statistic: pi,
            details: format!("pi={pi:.4} too far from 0.5"),
            grade: 'F',
        };
    }
    let runs = 1 + bits.windows(2).filter(|w| w[0] != w[1]).count();
    let num = (runs as f64 - 2.0 * nf * pi * (1.0 - pi)).abs();
    let den = 2.0 * (2.0 * nf).sqrt() * pi * (1.0 - pi);
    let p = erfc(num / den);
    TestResult::from_p(name, p, runs as f64, format!("runs={runs}, pi={pi:.4}"))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Battery
// ═══════════════════════════════════════════════════════════════════════════════

/// Run every byte-stream check.
pub fn run_all_tests(data: &[u8]) -> Vec<TestResult> {
    let tests: [(&str, fn(&[u8]) -> TestResult); 3] = [
        ("Monobit Frequency", monobit_frequency),
        ("Byte Frequency", byte_frequency),
        ("Runs", runs_test),
    ];
    tests
        .iter()
        .map(|(name, test_fn)| {
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| test_fn(data))).unwrap_or_else(|_| {
                TestResult {
                    name: name.to_string(),
                    passed: false,
                    p_value: None,
                    statistic: 0.0,
                    details: "Test panicked".to_string(),
                    grade: 'F',
                }
            })
        })
        .collect()
}
