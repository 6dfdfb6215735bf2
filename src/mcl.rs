use std::collections::{BTreeSet, HashMap};

use ndarray::Array2;

const INFLATION: f64 = 2.0;
const PRUNING_THRESHOLD: f64 = 1e-3;
const MAX_ITERATIONS: usize = 100;

/// Markov clustering over weighted edges.
///
/// The adjacency is symmetric (a later duplicate edge overwrites an earlier
/// one) with self loops forced to 1, and column stochastic. Each round
/// squares the matrix (expansion), raises it elementwise to the inflation
/// power and renormalizes columns, then prunes small entries; iteration
/// stops once the matrix is stable. Rows with surviving diagonal mass are
/// the attractors, and their non zero supports are the clusters.
///
/// Clusters come back largest first, members in first seen vertex order.
/// Singletons are valid clusters.
pub fn clusters(edges: &[(String, String, f64)]) -> Vec<Vec<String>> {
    let mut names: Vec<&str> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for (a, b, _) in edges {
        for vertex in [a.as_str(), b.as_str()] {
            if !index.contains_key(vertex) {
                index.insert(vertex, names.len());
                names.push(vertex);
            }
        }
    }

    let n = names.len();
    if n == 0 {
        return Vec::new();
    }

    let mut matrix = Array2::<f64>::zeros((n, n));
    for (a, b, weight) in edges {
        let i = index[a.as_str()];
        let j = index[b.as_str()];
        matrix[[i, j]] = *weight;
        matrix[[j, i]] = *weight;
    }
    for i in 0..n {
        matrix[[i, i]] = 1.0;
    }
    normalize_columns(&mut matrix);

    for _ in 0..MAX_ITERATIONS {
        let last = matrix.clone();

        // expansion, then inflation
        matrix = matrix.dot(&matrix);
        matrix.mapv_inplace(|x| x.powf(INFLATION));
        normalize_columns(&mut matrix);
        prune(&mut matrix);

        if converged(&matrix, &last) {
            break;
        }
    }

    let mut seen = BTreeSet::new();
    for attractor in 0..n {
        if matrix[[attractor, attractor]] > 0.0 {
            let members: Vec<usize> = (0..n).filter(|&j| matrix[[attractor, j]] > 0.0).collect();
            seen.insert(members);
        }
    }

    let mut result: Vec<Vec<usize>> = seen.into_iter().collect();
    result.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    result
        .into_iter()
        .map(|members| members.into_iter().map(|j| names[j].to_string()).collect())
        .collect()
}

fn normalize_columns(matrix: &mut Array2<f64>) {
    let n = matrix.ncols();
    for j in 0..n {
        let total: f64 = matrix.column(j).sum();
        if total > 0.0 {
            matrix.column_mut(j).mapv_inplace(|x| x / total);
        }
    }
}

/// Zeroes entries below the pruning threshold, keeping each column's maximum
/// so no column empties out.
fn prune(matrix: &mut Array2<f64>) {
    let n = matrix.ncols();
    for j in 0..n {
        let mut max_row = 0;
        let mut max_value = f64::NEG_INFINITY;
        for i in 0..n {
            if matrix[[i, j]] > max_value {
                max_value = matrix[[i, j]];
                max_row = i;
            }
        }
        for i in 0..n {
            if i != max_row && matrix[[i, j]] < PRUNING_THRESHOLD {
                matrix[[i, j]] = 0.0;
            }
        }
    }
}

fn converged(current: &Array2<f64>, last: &Array2<f64>) -> bool {
    current
        .iter()
        .zip(last.iter())
        .all(|(a, b)| (a - b).abs() <= 1e-8 + 1e-5 * b.abs())
}
