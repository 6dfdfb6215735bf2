use std::collections::BTreeMap;

use statrs::distribution::{Binomial, DiscreteCDF};
use statrs::function::gamma::ln_gamma;
use tracing::info;

const LENGTH_LIMIT: u64 = 20;

fn ln_beta(a: f64, b: f64) -> f64 {
    ln_gamma(a) + ln_gamma(b) - ln_gamma(a + b)
}

/// Beta binomial pmf computed through log gamma so large marker totals stay
/// finite.
fn beta_binomial_pmf(k: u64, n: u64, a: f64, b: f64) -> f64 {
    if k > n {
        return 0.0;
    }
    let n = n as f64;
    let k = k as f64;
    let ln_choose = ln_gamma(n + 1.0) - ln_gamma(k + 1.0) - ln_gamma(n - k + 1.0);
    (ln_choose + ln_beta(k + a, n - k + b) - ln_beta(a, b)).exp()
}

/// Picks the min markers cutoff with the best fit against a null model where
/// markers associate with taxa at random.
///
/// The per taxon marker count is modelled as beta binomial with the given
/// sample size and mean set to the average number of markers per taxon; for
/// each candidate cutoff the observed histogram, with everything at or above
/// the cutoff pooled into the zero markers bin, is scored with a multinomial
/// log likelihood. The best scoring cutoff wins, smallest on ties, and the
/// result is never below 2.
pub fn cutoff_fit_for_noise_model(
    taxon_counts_with_num_markers: &BTreeMap<u64, u64>,
    beta_sample_size: f64,
) -> u64 {
    let m = match taxon_counts_with_num_markers.keys().max() {
        Some(&m) => m,
        None => return 2,
    };
    if m < 2 {
        return 2;
    }

    let mut log_likelihoods: Vec<(u64, f64)> = Vec::new();
    for candidate_cutoff in candidate_cutoffs(taxon_counts_with_num_markers) {
        let ks = counts_as_list(taxon_counts_with_num_markers, candidate_cutoff, m);
        let ll = log_likelihood(&ks, beta_sample_size);
        info!(cutoff = candidate_cutoff, log_likelihood = ll, "Scored candidate cutoff");
        log_likelihoods.push((candidate_cutoff, ll));
    }

    let mut best = 2;
    let mut best_ll = f64::NEG_INFINITY;
    for (cutoff, ll) in log_likelihoods {
        if ll > best_ll {
            best_ll = ll;
            best = cutoff;
        }
    }
    best
}

/// For each value in the dataset, consider making that the last value below
/// the cutoff. 2 is always a candidate so the result has a floor.
fn candidate_cutoffs(taxon_counts_with_num_markers: &BTreeMap<u64, u64>) -> Vec<u64> {
    let mut result: Vec<u64> = taxon_counts_with_num_markers
        .keys()
        .filter(|&&k| k > 0)
        .map(|&k| k + 1)
        .collect();
    if !result.contains(&2) {
        result.push(2);
    }
    result.sort_unstable();
    result
}

/// Truncates the histogram into a dense counts vector: entries below the
/// cutoff keep their position, entries at or above it are pooled into
/// position 0 as if those taxa had no markers, and anything past the length
/// limit lands in one trailing bucket.
fn counts_as_list(
    taxon_counts_with_num_markers: &BTreeMap<u64, u64>,
    candidate_cutoff: u64,
    m: u64,
) -> Vec<u64> {
    let mut ks: Vec<u64> = Vec::new();
    for j in 0..LENGTH_LIMIT.min(m + 2) {
        match taxon_counts_with_num_markers.get(&j) {
            Some(&count) if j < candidate_cutoff => ks.push(count),
            Some(&count) => {
                ks[0] += count;
                ks.push(0);
            }
            None => ks.push(0),
        }
    }

    if m >= LENGTH_LIMIT {
        let mut k_last = 0;
        for jj in LENGTH_LIMIT..(m + 2) {
            if let Some(&count) = taxon_counts_with_num_markers.get(&jj) {
                if jj < candidate_cutoff {
                    k_last += count;
                } else {
                    ks[0] += count;
                }
            }
        }
        ks.push(k_last);
    }

    ks
}

/// Multinomial log likelihood of the counts vector against the beta binomial
/// pmf. The zero markers bin takes the leftover probability mass, so pooled
/// tails stay consistent; a NaN likelihood counts as minus infinity.
fn log_likelihood(ks: &[u64], beta_sample_size: f64) -> f64 {
    let total_num_markers: u64 = ks.iter().enumerate().map(|(j, &k)| j as u64 * k).sum();
    let num_taxa: u64 = ks.iter().sum();
    if num_taxa == 0 {
        return f64::NEG_INFINITY;
    }

    let p = 1.0 / num_taxa as f64;
    let shape_a = p * beta_sample_size;
    let shape_b = (1.0 - p) * beta_sample_size;

    let mut ps: Vec<f64> = (0..ks.len() as u64)
        .map(|k| beta_binomial_pmf(k, total_num_markers, shape_a, shape_b))
        .collect();
    ps[0] = 1.0 - ps[1..].iter().sum::<f64>();

    let mut ll = ln_gamma(num_taxa as f64 + 1.0);
    for (&k, &p) in ks.iter().zip(ps.iter()) {
        ll -= ln_gamma(k as f64 + 1.0);
        if k > 0 {
            ll += k as f64 * p.ln();
        }
    }

    if ll.is_nan() {
        f64::NEG_INFINITY
    } else {
        ll
    }
}

/// When running an alignment and treating each match as presence of a
/// marker, there are always some false positives; presence of multiple
/// markers is needed to identify a taxon. With enough false positive markers
/// we start to hit false positive taxa, and the number of markers required
/// goes up.
///
/// Returns, per observed k, the probability under the null of seeing at
/// least that many taxa with exactly k markers.
pub fn fit_noise_model(
    taxon_counts_with_num_markers: &BTreeMap<u64, u64>,
    beta_sample_size: f64,
) -> Vec<(u64, f64)> {
    let total_num_markers: u64 = taxon_counts_with_num_markers.iter().map(|(&k, &count)| k * count).sum();
    let num_taxa: u64 = taxon_counts_with_num_markers.values().sum();
    if num_taxa == 0 {
        return Vec::new();
    }

    // suppose, somewhat pessimistically, that there is no information content
    // between markers found and taxa present: each marker is independently
    // assigned to a taxon uniformly at random. Taxa in the reference have
    // different sizes, so model the per taxon count as beta binomial rather
    // than binomial, with the same mean.
    let p = 1.0 / num_taxa as f64;
    let shape_a = p * beta_sample_size;
    let shape_b = (1.0 - p) * beta_sample_size;

    let mut results = Vec::new();
    for (&num_markers, &taxon_count) in taxon_counts_with_num_markers {
        let pmf = beta_binomial_pmf(num_markers, total_num_markers, shape_a, shape_b);
        let probability =
            probability_at_least_taxon_count_num_markers_taxa(pmf, num_taxa, num_markers, taxon_count);
        results.push((num_markers, probability));
    }
    results
}

/// Chance of at least `taxon_count` taxa landing on exactly `num_markers`
/// markers, treating the count of such taxa as binomial. The counts are not
/// quite independent because the totals are fixed, but this is fine for
/// small `num_markers`.
fn probability_at_least_taxon_count_num_markers_taxa(
    num_markers_pmf: f64,
    num_taxa: u64,
    num_markers: u64,
    taxon_count: u64,
) -> f64 {
    if num_markers == 0 || taxon_count == 0 {
        return 1.0;
    }
    if num_taxa == 0 {
        return 0.0;
    }

    // P(C >= x) = 1 - cdf(x - 1) = sf(x - 1)
    match Binomial::new(num_markers_pmf, num_taxa) {
        Ok(distribution) => distribution.sf(taxon_count - 1),
        Err(_) => 1.0,
    }
}
