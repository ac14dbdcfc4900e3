//! Distribution distance statistics

use std::collections::BTreeMap;

/// Two-sample Kolmogorov-Smirnov statistic: the largest gap between the
/// empirical CDFs. Inputs need not be sorted.
pub fn ks_statistic(reference: &[f64], current: &[f64]) -> f64 {
    if reference.is_empty() || current.is_empty() {
        return 0.0;
    }
    let mut a = reference.to_vec();
    let mut b = current.to_vec();
    a.sort_by(f64::total_cmp);
    b.sort_by(f64::total_cmp);

    let (n, m) = (a.len() as f64, b.len() as f64);
    let (mut i, mut j) = (0usize, 0usize);
    let mut d: f64 = 0.0;
    while i < a.len() && j < b.len() {
        let x = a[i].min(b[j]);
        while i < a.len() && a[i] <= x {
            i += 1;
        }
        while j < b.len() && b[j] <= x {
            j += 1;
        }
        d = d.max((i as f64 / n - j as f64 / m).abs());
    }
    d
}

/// Kolmogorov survival function Q(lambda), alternating series
fn kolmogorov_q(lambda: f64) -> f64 {
    const EPS1: f64 = 1e-3;
    const EPS2: f64 = 1e-8;

    let a2 = -2.0 * lambda * lambda;
    let mut fac = 2.0;
    let mut sum = 0.0;
    let mut previous = 0.0;
    for j in 1..=100 {
        let jf = j as f64;
        let term = fac * (a2 * jf * jf).exp();
        sum += term;
        if term.abs() <= EPS1 * previous || term.abs() <= EPS2 * sum {
            return sum.clamp(0.0, 1.0);
        }
        fac = -fac;
        previous = term.abs();
    }
    // Series failed to converge, which only happens for lambda near zero
    1.0
}

/// Asymptotic p-value of the two-sample KS test
pub fn ks_p_value(statistic: f64, n: usize, m: usize) -> f64 {
    if n == 0 || m == 0 {
        return 1.0;
    }
    let en = ((n * m) as f64 / (n + m) as f64).sqrt();
    kolmogorov_q((en + 0.12 + 0.11 / en) * statistic)
}

/// Relative frequency of each category
pub fn proportions<'a, I>(values: I) -> BTreeMap<&'a str, f64>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: BTreeMap<&str, f64> = BTreeMap::new();
    let mut total = 0.0;
    for v in values {
        *counts.entry(v).or_insert(0.0) += 1.0;
        total += 1.0;
    }
    if total > 0.0 {
        for count in counts.values_mut() {
            *count /= total;
        }
    }
    counts
}

/// Jensen-Shannon distance (natural log) between two categorical distributions
pub fn jensen_shannon_distance(p: &BTreeMap<&str, f64>, q: &BTreeMap<&str, f64>) -> f64 {
    let mut divergence = 0.0;
    let keys: std::collections::BTreeSet<&&str> = p.keys().chain(q.keys()).collect();
    for key in keys {
        let pi = p.get(*key).copied().unwrap_or(0.0);
        let qi = q.get(*key).copied().unwrap_or(0.0);
        let mi = 0.5 * (pi + qi);
        if pi > 0.0 {
            divergence += 0.5 * pi * (pi / mi).ln();
        }
        if qi > 0.0 {
            divergence += 0.5 * qi * (qi / mi).ln();
        }
    }
    divergence.max(0.0).sqrt()
}
