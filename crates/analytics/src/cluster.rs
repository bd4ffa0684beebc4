//! Seeded k-means segmentation over the (recency, frequency, monetary)
//! components. Small-data implementation: fixed iteration cap, random
//! init from the data, empty clusters re-seeded. Deterministic for a given
//! seed; the seed is a required input and lands in the run's config hash.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use tracing::{debug, info};

use cuvee_core::{Store, TenantContext};
use cuvee_crm::{ClientRepository, Result, SqliteClientRepository};

pub const MAX_ITERATIONS: usize = 20;

pub struct ClusterService {
    store: Store,
    ctx: TenantContext,
    seed: u64,
    n_clusters: usize,
}

impl ClusterService {
    pub fn new(store: Store, ctx: TenantContext, seed: u64, n_clusters: usize) -> Self {
        Self {
            store,
            ctx,
            seed,
            n_clusters,
        }
    }

    /// Clusters every client with complete RFM components and stores the
    /// label (`c0`, `c1`, ...). Returns per-label counts.
    pub async fn recompute(&self) -> Result<BTreeMap<String, usize>> {
        let _guard = self.store.tenant_lock(self.ctx.tenant_id).await;
        let repo = SqliteClientRepository::new(self.store.pool().clone(), self.ctx.clone());
        let clients = repo.list().await?;

        let mut codes = Vec::new();
        let mut features = Vec::new();
        for client in &clients {
            if let (Some(r), Some(f), Some(m)) = (client.recency, client.frequency, client.monetary)
            {
                codes.push(client.client_code.clone());
                features.push([r, f, m]);
            }
        }
        if features.is_empty() {
            debug!(tenant_id = %self.ctx.tenant_id, "no clients with complete rfm, skipping clustering");
            return Ok(BTreeMap::new());
        }

        let k = self.n_clusters.min(features.len()).max(1);
        let normalized = min_max_normalize(&features);
        let mut rng = StdRng::seed_from_u64(self.seed);
        let labels = kmeans(&normalized, k, MAX_ITERATIONS, &mut rng);

        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for (code, label) in codes.iter().zip(labels.iter()) {
            let tag = format!("c{label}");
            repo.update_cluster(code, &tag).await?;
            *counts.entry(tag).or_insert(0) += 1;
        }

        info!(tenant_id = %self.ctx.tenant_id, clusters = counts.len(), "clustering finished");
        Ok(counts)
    }
}

/// Min-max scaling per column into [0, 1]; constant columns collapse to 0.
pub fn min_max_normalize(data: &[[f64; 3]]) -> Vec<[f64; 3]> {
    let mut mins = [f64::INFINITY; 3];
    let mut maxs = [f64::NEG_INFINITY; 3];
    for row in data {
        for c in 0..3 {
            mins[c] = mins[c].min(row[c]);
            maxs[c] = maxs[c].max(row[c]);
        }
    }
    data.iter()
        .map(|row| {
            let mut out = [0.0; 3];
            for c in 0..3 {
                let range = maxs[c] - mins[c];
                out[c] = if range == 0.0 {
                    0.0
                } else {
                    (row[c] - mins[c]) / range
                };
            }
            out
        })
        .collect()
}

/// Plain k-means: random init from the data, nearest-center assignment,
/// mean recompute, empty clusters re-seeded from a random point. Stops on
/// stable assignments or after `max_iter`.
pub fn kmeans(data: &[[f64; 3]], k: usize, max_iter: usize, rng: &mut StdRng) -> Vec<usize> {
    assert!(k >= 1 && k <= data.len(), "k must be in 1..=len(data)");

    let init = rand::seq::index::sample(rng, data.len(), k);
    let mut centers: Vec<[f64; 3]> = init.iter().map(|idx| data[idx]).collect();
    let mut labels = vec![0usize; data.len()];

    for _ in 0..max_iter {
        let new_labels: Vec<usize> = data
            .iter()
            .map(|point| nearest_center(point, &centers))
            .collect();
        if new_labels == labels {
            break;
        }
        labels = new_labels;

        for (center_idx, center) in centers.iter_mut().enumerate() {
            let members: Vec<&[f64; 3]> = data
                .iter()
                .zip(labels.iter())
                .filter(|(_, label)| **label == center_idx)
                .map(|(point, _)| point)
                .collect();
            if members.is_empty() {
                *center = data[rng.gen_range(0..data.len())];
                continue;
            }
            let mut mean = [0.0; 3];
            for point in &members {
                for c in 0..3 {
                    mean[c] += point[c];
                }
            }
            for value in &mut mean {
                *value /= members.len() as f64;
            }
            *center = mean;
        }
    }
    labels
}

fn nearest_center(point: &[f64; 3], centers: &[[f64; 3]]) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (idx, center) in centers.iter().enumerate() {
        let dist: f64 = point
            .iter()
            .zip(center.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum();
        if dist < best_dist {
            best_dist = dist;
            best = idx;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_blobs() -> Vec<[f64; 3]> {
        let mut data = Vec::new();
        for i in 0..5 {
            let jitter = i as f64 * 0.01;
            data.push([0.0 + jitter, 0.0, 0.0]);
            data.push([10.0 + jitter, 10.0, 10.0]);
        }
        data
    }

    #[test]
    fn same_seed_same_labels() {
        let data = min_max_normalize(&two_blobs());
        let mut rng_a = StdRng::seed_from_u64(42);
        let mut rng_b = StdRng::seed_from_u64(42);
        assert_eq!(
            kmeans(&data, 2, MAX_ITERATIONS, &mut rng_a),
            kmeans(&data, 2, MAX_ITERATIONS, &mut rng_b)
        );
    }

    #[test]
    fn separable_blobs_split_cleanly() {
        let data = min_max_normalize(&two_blobs());
        let mut rng = StdRng::seed_from_u64(7);
        let labels = kmeans(&data, 2, MAX_ITERATIONS, &mut rng);

        // Even indices are one blob, odd the other; each must be uniform.
        let blob_a: Vec<usize> = labels.iter().step_by(2).copied().collect();
        let blob_b: Vec<usize> = labels.iter().skip(1).step_by(2).copied().collect();
        assert!(blob_a.windows(2).all(|w| w[0] == w[1]));
        assert!(blob_b.windows(2).all(|w| w[0] == w[1]));
        assert_ne!(blob_a[0], blob_b[0]);
    }

    #[test]
    fn normalization_handles_constant_columns() {
        let data = vec![[1.0, 5.0, 3.0], [2.0, 5.0, 9.0]];
        let normalized = min_max_normalize(&data);
        assert_eq!(normalized[0], [0.0, 0.0, 0.0]);
        assert_eq!(normalized[1], [1.0, 0.0, 1.0]);
    }
}
