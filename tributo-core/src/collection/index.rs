//! Approximate nearest-neighbour index over a collection's vector column.
//!
//! The index is an inverted file (IVF-flat): vectors are clustered with
//! k-means and each query scans the members of the `nprobes` partitions
//! whose centroids are closest to it, widening to further partitions when
//! those hold too few candidates. Construction is deterministic, so an
//! index can be rebuilt from the same rows after a restart and come out
//! identical.

use super::distance::{normalized, DistanceMetric};
use serde::{Deserialize, Serialize};

/// Which index structure to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndexKind {
    /// No approximate structure; every search is an exact scan.
    Exact,
    /// Inverted file with k-means partitions. `None` picks `sqrt(rows)`.
    IvfFlat { num_partitions: Option<usize> },
}

impl Default for IndexKind {
    fn default() -> Self {
        IndexKind::IvfFlat {
            num_partitions: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexOptions {
    pub kind: IndexKind,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

fn default_max_iterations() -> usize {
    25
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            kind: IndexKind::default(),
            max_iterations: default_max_iterations(),
        }
    }
}

impl IndexOptions {
    pub fn exact() -> Self {
        Self {
            kind: IndexKind::Exact,
            ..Self::default()
        }
    }

    pub fn ivf_flat(num_partitions: Option<usize>) -> Self {
        Self {
            kind: IndexKind::IvfFlat { num_partitions },
            ..Self::default()
        }
    }
}

/// What was built, persisted so the index can be rebuilt on reopen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub metric: DistanceMetric,
    pub options: IndexOptions,
    /// Number of rows (by insertion order) covered by the index.
    pub indexed_rows: usize,
}

/// A built index. Row references are insertion positions.
#[derive(Debug, Clone)]
pub enum VectorIndex {
    Exact(IndexDescriptor),
    IvfFlat(IvfIndex),
}

impl VectorIndex {
    pub fn build(metric: DistanceMetric, options: IndexOptions, vectors: &[&[f32]]) -> Self {
        let descriptor = IndexDescriptor {
            metric,
            options,
            indexed_rows: vectors.len(),
        };
        match options.kind {
            IndexKind::Exact => VectorIndex::Exact(descriptor),
            IndexKind::IvfFlat { num_partitions } => {
                let k = num_partitions
                    .unwrap_or_else(|| (vectors.len() as f64).sqrt().round() as usize)
                    .clamp(1, vectors.len().max(1));
                VectorIndex::IvfFlat(IvfIndex::train(descriptor, vectors, k, options.max_iterations))
            }
        }
    }

    pub fn descriptor(&self) -> &IndexDescriptor {
        match self {
            VectorIndex::Exact(descriptor) => descriptor,
            VectorIndex::IvfFlat(ivf) => &ivf.descriptor,
        }
    }

    pub fn num_partitions(&self) -> usize {
        match self {
            VectorIndex::Exact(_) => 0,
            VectorIndex::IvfFlat(ivf) => ivf.centroids.len(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IvfIndex {
    descriptor: IndexDescriptor,
    centroids: Vec<Vec<f32>>,
    /// Row positions per partition, ascending.
    lists: Vec<Vec<usize>>,
}

impl IvfIndex {
    fn train(descriptor: IndexDescriptor, vectors: &[&[f32]], k: usize, max_iterations: usize) -> Self {
        let metric = descriptor.metric;
        // Spherical k-means for cosine: cluster directions, not magnitudes.
        let points: Vec<Vec<f32>> = vectors
            .iter()
            .map(|v| match metric {
                DistanceMetric::Cosine => normalized(v),
                _ => v.to_vec(),
            })
            .collect();

        let mut centroids = farthest_point_seeds(&points, k, metric);
        let mut assignments = assign(&points, &centroids, metric);

        for _ in 0..max_iterations {
            recompute_centroids(&points, &assignments, &mut centroids, metric);
            let next = assign(&points, &centroids, metric);
            if next == assignments {
                break;
            }
            assignments = next;
        }

        let mut lists = vec![Vec::new(); centroids.len()];
        for (row, partition) in assignments.into_iter().enumerate() {
            lists[partition].push(row);
        }

        Self {
            descriptor,
            centroids,
            lists,
        }
    }

    pub fn descriptor(&self) -> &IndexDescriptor {
        &self.descriptor
    }

    /// Row positions from the partitions closest to `query`, ascending.
    ///
    /// Probes the `nprobes` nearest partitions, then keeps going in centroid
    /// order until at least `min_candidates` probed rows satisfy `admits` or
    /// every partition has been probed.
    pub fn probe<F>(&self, query: &[f32], nprobes: usize, min_candidates: usize, admits: F) -> Vec<usize>
    where
        F: Fn(usize) -> bool,
    {
        let mut order: Vec<(usize, f32)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, self.descriptor.metric.distance(query, c)))
            .collect();
        order.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

        let nprobes = nprobes.max(1);
        let mut rows = Vec::new();
        let mut admitted = 0;
        for (probed, (partition, _)) in order.iter().enumerate() {
            if probed >= nprobes && admitted >= min_candidates {
                break;
            }
            let members = &self.lists[*partition];
            admitted += members.iter().filter(|&&row| admits(row)).count();
            rows.extend_from_slice(members);
        }
        rows.sort_unstable();
        rows
    }

    pub fn partition_sizes(&self) -> Vec<usize> {
        self.lists.iter().map(Vec::len).collect()
    }
}

/// Deterministic seeding: start from the first point, then repeatedly take
/// the point farthest from every chosen seed (ties go to the lowest row).
fn farthest_point_seeds(points: &[Vec<f32>], k: usize, metric: DistanceMetric) -> Vec<Vec<f32>> {
    let mut seeds: Vec<Vec<f32>> = Vec::with_capacity(k);
    let Some(first) = points.first() else {
        return seeds;
    };
    seeds.push(first.clone());
    let mut nearest: Vec<f32> = points.iter().map(|p| metric.distance(p, first)).collect();

    while seeds.len() < k {
        let mut best: Option<(usize, f32)> = None;
        for (row, d) in nearest.iter().enumerate() {
            if best.map_or(true, |(_, bd)| *d > bd) {
                best = Some((row, *d));
            }
        }
        match best {
            // Every remaining point coincides with a seed; more seeds would be empty.
            Some((_, d)) if d <= 0.0 => break,
            Some((row, _)) => {
                let seed = points[row].clone();
                for (i, p) in points.iter().enumerate() {
                    nearest[i] = nearest[i].min(metric.distance(p, &seed));
                }
                seeds.push(seed);
            }
            None => break,
        }
    }
    seeds
}

fn nearest_centroid(point: &[f32], centroids: &[Vec<f32>], metric: DistanceMetric) -> usize {
    let mut best = 0;
    let mut best_distance = f32::INFINITY;
    for (i, centroid) in centroids.iter().enumerate() {
        let d = metric.distance(point, centroid);
        if d < best_distance {
            best_distance = d;
            best = i;
        }
    }
    best
}

fn assign(points: &[Vec<f32>], centroids: &[Vec<f32>], metric: DistanceMetric) -> Vec<usize> {
    points
        .iter()
        .map(|p| nearest_centroid(p, centroids, metric))
        .collect()
}

fn recompute_centroids(
    points: &[Vec<f32>],
    assignments: &[usize],
    centroids: &mut [Vec<f32>],
    metric: DistanceMetric,
) {
    let dimension = centroids.first().map_or(0, Vec::len);
    let mut sums = vec![vec![0.0f32; dimension]; centroids.len()];
    let mut counts = vec![0usize; centroids.len()];

    for (point, &partition) in points.iter().zip(assignments) {
        for (s, x) in sums[partition].iter_mut().zip(point) {
            *s += x;
        }
        counts[partition] += 1;
    }

    for ((centroid, sum), count) in centroids.iter_mut().zip(sums).zip(counts) {
        // Empty partitions keep their previous centroid.
        if count == 0 {
            continue;
        }
        let mean: Vec<f32> = sum.iter().map(|s| s / count as f32).collect();
        *centroid = match metric {
            DistanceMetric::Cosine => normalized(&mean),
            _ => mean,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clustered() -> Vec<Vec<f32>> {
        vec![
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.95, 0.05, 0.0],
            vec![0.05, 0.95, 0.0],
            vec![0.0, 0.0, 1.0],
            vec![0.9, 0.1, 0.0],
            vec![0.0, 0.1, 0.9],
        ]
    }

    fn build(options: IndexOptions) -> VectorIndex {
        let vectors = clustered();
        let refs: Vec<&[f32]> = vectors.iter().map(Vec::as_slice).collect();
        VectorIndex::build(DistanceMetric::Cosine, options, &refs)
    }

    #[test]
    fn test_ivf_partitions_cover_every_row_once() {
        let index = build(IndexOptions::ivf_flat(Some(3)));
        let VectorIndex::IvfFlat(ivf) = &index else {
            panic!("expected an IVF index");
        };
        assert_eq!(ivf.partition_sizes().iter().sum::<usize>(), 7);
        assert_eq!(index.num_partitions(), 3);
        assert_eq!(ivf.probe(&[1.0, 0.0, 0.0], 3, 0, |_| true), (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn test_ivf_probe_finds_own_cluster() {
        let index = build(IndexOptions::ivf_flat(Some(3)));
        let VectorIndex::IvfFlat(ivf) = &index else {
            panic!("expected an IVF index");
        };
        assert_eq!(ivf.probe(&[1.0, 0.02, 0.0], 1, 0, |_| true), vec![0, 2, 5]);
        assert_eq!(ivf.probe(&[0.0, 1.0, 0.01], 1, 0, |_| true), vec![1, 3]);
    }

    #[test]
    fn test_partitions_widen_until_enough_candidates() {
        let index = build(IndexOptions::ivf_flat(Some(3)));
        let VectorIndex::IvfFlat(ivf) = &index else {
            panic!("expected an IVF index");
        };
        // The x cluster has three rows, the y cluster is next closest.
        assert_eq!(ivf.probe(&[1.0, 0.02, 0.0], 1, 3, |_| true), vec![0, 2, 5]);
        assert_eq!(ivf.probe(&[1.0, 0.02, 0.0], 1, 4, |_| true), vec![0, 1, 2, 3, 5]);
        // Only row 6 is admitted, so every partition gets probed.
        assert_eq!(ivf.probe(&[1.0, 0.02, 0.0], 1, 1, |row| row == 6), (0..7).collect::<Vec<_>>());
        assert_eq!(ivf.probe(&[1.0, 0.02, 0.0], 1, 100, |_| true).len(), 7);
    }

    #[test]
    fn test_build_is_deterministic() {
        let a = build(IndexOptions::ivf_flat(Some(3)));
        let b = build(IndexOptions::ivf_flat(Some(3)));
        let (VectorIndex::IvfFlat(a), VectorIndex::IvfFlat(b)) = (a, b) else {
            panic!("expected IVF indexes");
        };
        assert_eq!(a.centroids, b.centroids);
        assert_eq!(a.lists, b.lists);
    }

    #[test]
    fn test_partition_count_is_clamped() {
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let refs: Vec<&[f32]> = vectors.iter().map(Vec::as_slice).collect();
        let index = VectorIndex::build(DistanceMetric::L2, IndexOptions::ivf_flat(Some(50)), &refs);
        assert_eq!(index.num_partitions(), 2);
        assert_eq!(index.descriptor().indexed_rows, 2);
    }

    #[test]
    fn test_duplicate_points_do_not_create_empty_partitions() {
        let vectors = vec![vec![1.0, 0.0]; 4];
        let refs: Vec<&[f32]> = vectors.iter().map(Vec::as_slice).collect();
        let index = VectorIndex::build(DistanceMetric::Cosine, IndexOptions::ivf_flat(Some(3)), &refs);
        assert_eq!(index.num_partitions(), 1);
    }
}
