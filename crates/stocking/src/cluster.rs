//! Lloyd's k-means over buyer coordinates.
//!
//! Points are treated as planar (latitude, longitude) pairs. Initialization
//! is deterministic farthest-point seeding starting from the first point, so
//! the same input always yields the same partition.

use market_core::types::GeoPoint;

/// Result of a k-means run.
#[derive(Debug, Clone)]
pub struct Clustering {
    /// One centroid per cluster. May contain duplicates when there are fewer
    /// distinct points than clusters.
    pub centroids: Vec<GeoPoint>,
    /// Cluster index for every input point, in input order.
    pub labels: Vec<usize>,
    pub iterations: usize,
    /// Sum of squared distances from each point to its centroid.
    pub inertia: f64,
}

impl Clustering {
    /// Input indices assigned to `cluster`.
    pub fn members(&self, cluster: usize) -> Vec<usize> {
        self.labels
            .iter()
            .enumerate()
            .filter(|(_, &label)| label == cluster)
            .map(|(i, _)| i)
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct KMeans {
    n_clusters: usize,
    max_iter: usize,
    tol: f64,
}

impl KMeans {
    pub fn new(n_clusters: usize) -> Self {
        Self {
            n_clusters: n_clusters.max(1),
            max_iter: 300,
            tol: 1e-4,
        }
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter.max(1);
        self
    }

    pub fn with_tolerance(mut self, tol: f64) -> Self {
        self.tol = tol.max(0.0);
        self
    }

    /// `None` for empty input. Empty clusters keep their previous centroid.
    pub fn fit(&self, points: &[GeoPoint]) -> Option<Clustering> {
        if points.is_empty() {
            return None;
        }

        let mut centroids = self.farthest_point_init(points);
        let mut labels = assign(points, &centroids);
        let mut iterations = 0;

        for _ in 0..self.max_iter {
            iterations += 1;
            let updated = update(points, &labels, &centroids);
            let max_shift = centroids
                .iter()
                .zip(&updated)
                .map(|(a, b)| squared_distance(a, b))
                .fold(0.0_f64, f64::max);

            centroids = updated;
            labels = assign(points, &centroids);
            if max_shift <= self.tol * self.tol {
                break;
            }
        }

        let inertia = points
            .iter()
            .zip(&labels)
            .map(|(p, &label)| squared_distance(p, &centroids[label]))
            .sum();

        Some(Clustering {
            centroids,
            labels,
            iterations,
            inertia,
        })
    }

    fn farthest_point_init(&self, points: &[GeoPoint]) -> Vec<GeoPoint> {
        let mut centroids = Vec::with_capacity(self.n_clusters);
        centroids.push(points[0]);
        let mut nearest: Vec<f64> = points
            .iter()
            .map(|p| squared_distance(p, &points[0]))
            .collect();

        while centroids.len() < self.n_clusters {
            let mut pick = 0;
            for (i, &d) in nearest.iter().enumerate() {
                if d > nearest[pick] {
                    pick = i;
                }
            }
            let chosen = points[pick];
            centroids.push(chosen);
            for (d, p) in nearest.iter_mut().zip(points) {
                *d = d.min(squared_distance(p, &chosen));
            }
        }
        centroids
    }
}

fn squared_distance(a: &GeoPoint, b: &GeoPoint) -> f64 {
    (a.lat - b.lat).powi(2) + (a.lon - b.lon).powi(2)
}

/// Nearest centroid per point; ties go to the lower cluster index.
fn assign(points: &[GeoPoint], centroids: &[GeoPoint]) -> Vec<usize> {
    points
        .iter()
        .map(|p| {
            let mut best = 0;
            let mut best_distance = f64::INFINITY;
            for (k, c) in centroids.iter().enumerate() {
                let d = squared_distance(p, c);
                if d < best_distance {
                    best = k;
                    best_distance = d;
                }
            }
            best
        })
        .collect()
}

fn update(points: &[GeoPoint], labels: &[usize], previous: &[GeoPoint]) -> Vec<GeoPoint> {
    let mut sums = vec![(0.0_f64, 0.0_f64, 0_usize); previous.len()];
    for (p, &label) in points.iter().zip(labels) {
        let entry = &mut sums[label];
        entry.0 += p.lat;
        entry.1 += p.lon;
        entry.2 += 1;
    }
    sums.into_iter()
        .zip(previous)
        .map(|((lat, lon, count), old)| {
            if count == 0 {
                *old
            } else {
                GeoPoint::new(lat / count as f64, lon / count as f64)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_cities() -> Vec<GeoPoint> {
        vec![
            GeoPoint::new(40.71, -74.00),
            GeoPoint::new(34.05, -118.24),
            GeoPoint::new(40.73, -73.99),
            GeoPoint::new(34.06, -118.25),
            GeoPoint::new(40.70, -74.01),
        ]
    }

    #[test]
    fn test_empty_input() {
        assert!(KMeans::new(3).fit(&[]).is_none());
    }

    #[test]
    fn test_separates_distant_groups() {
        let clustering = KMeans::new(2).fit(&two_cities()).unwrap();
        assert_eq!(clustering.labels, vec![0, 1, 0, 1, 0]);
        assert!((clustering.centroids[0].lat - 40.713333).abs() < 1e-4);
        assert!((clustering.centroids[1].lon - (-118.245)).abs() < 1e-9);
        assert_eq!(clustering.members(1), vec![1, 3]);
    }

    #[test]
    fn test_more_clusters_than_points_is_tolerated() {
        let points = vec![GeoPoint::new(1.0, 1.0), GeoPoint::new(1.0, 1.0)];
        let clustering = KMeans::new(5).fit(&points).unwrap();
        assert_eq!(clustering.centroids.len(), 5);
        assert_eq!(clustering.labels, vec![0, 0]);
        assert_eq!(clustering.inertia, 0.0);
        assert!(clustering.members(3).is_empty());
    }

    #[test]
    fn test_deterministic() {
        let a = KMeans::new(3).fit(&two_cities()).unwrap();
        let b = KMeans::new(3).fit(&two_cities()).unwrap();
        assert_eq!(a.labels, b.labels);
        assert_eq!(a.centroids, b.centroids);
    }

    #[test]
    fn test_respects_iteration_cap() {
        let clustering = KMeans::new(2)
            .with_max_iter(1)
            .with_tolerance(0.0)
            .fit(&two_cities())
            .unwrap();
        assert_eq!(clustering.iterations, 1);
    }
}
