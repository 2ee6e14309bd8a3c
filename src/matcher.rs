//! Descriptor matching between two frames.
//!
//! Every query descriptor is paired with its nearest reference descriptor, then a
//! selection policy decides which pairs survive. The query side is the older
//! frame and the reference side the newer one.

use std::collections::HashSet;

use log::trace;
use space::{Knn, KnnFromBatch, LinearKnn, Metric};

use crate::{
    algorithms::kd_forest::{ForestParams, ForestPoint, KdForest},
    config::{MatcherConfig, SearchStrategy, SelectionPolicy},
    error::{Result, TrackError},
    features::{euclidean, hamming, BinaryDescriptor, DescriptorFormat, Descriptors, Match},
};

#[derive(Debug, Default)]
struct HammingMetric;

impl<'a> Metric<&'a BinaryDescriptor> for HammingMetric {
    type Unit = u32;

    fn distance(&self, a: &&'a BinaryDescriptor, b: &&'a BinaryDescriptor) -> u32 {
        hamming(a, b)
    }
}

#[derive(Debug, Default)]
struct L2Metric;

impl<'a> Metric<&'a Vec<f32>> for L2Metric {
    type Unit = u32;

    /// The bit pattern of a non-negative `f32` orders the same way as its value
    fn distance(&self, a: &&'a Vec<f32>, b: &&'a Vec<f32>) -> u32 {
        euclidean(a, b).to_bits()
    }
}

/// `k` nearest `(reference index, distance)` pairs for every query, closest first
type Candidates = Vec<Vec<(usize, f32)>>;

macro_rules! linear_knn {
    ($metric:ty, $query:expr, $reference:expr, $k:expr, $to_distance:expr) => {{
        let data = $reference.iter().map(|d| (d, 1u8)).collect::<Vec<_>>();
        let search: LinearKnn<$metric, _> = KnnFromBatch::from_batch(data.iter());
        $query
            .iter()
            .map(|descriptor| {
                search
                    .knn(&descriptor, $k)
                    .iter()
                    .map(|nearest| (nearest.0.index, $to_distance(nearest.0.distance)))
                    .collect::<Vec<_>>()
            })
            .collect::<Candidates>()
    }};
}

fn forest_knn<P: ForestPoint>(query: &[P], reference: &[P], k: usize, params: &ForestParams) -> Candidates {
    let forest = KdForest::build(reference, params);
    query.iter().map(|descriptor| forest.knn(descriptor, k)).collect()
}

/// Matches descriptor sets of one fixed format
#[derive(Debug, Clone)]
pub struct DescriptorMatcher {
    config: MatcherConfig,
    format: DescriptorFormat,
}

impl DescriptorMatcher {
    pub fn new(config: MatcherConfig, format: DescriptorFormat) -> Result<Self> {
        config.validate(format)?;
        Ok(Self { config, format })
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    pub fn format(&self) -> DescriptorFormat {
        self.format
    }

    /// Matches in ascending query order, at most one per query descriptor.
    ///
    /// An empty side yields no matches whatever the formats are.
    pub fn match_descriptors(&self, query: &Descriptors, reference: &Descriptors) -> Result<Vec<Match>> {
        if query.is_empty() || reference.is_empty() {
            return Ok(Vec::new());
        }
        if query.format() != reference.format() {
            return Err(TrackError::FormatMismatch {
                query: query.format(),
                reference: reference.format(),
            });
        }
        if query.format() != self.config.metric.format() {
            return Err(TrackError::IncompatibleMetric {
                metric: self.config.metric,
                format: query.format(),
            });
        }

        let k = match self.config.selection {
            SelectionPolicy::NearestNeighbor => 1,
            SelectionPolicy::RatioTest => 2,
        };

        let candidates = match (query, reference, self.config.search) {
            (Descriptors::Binary(q), Descriptors::Binary(r), SearchStrategy::Exhaustive) => {
                linear_knn!(HammingMetric, q, r, k, |d: u32| d as f32)
            }
            (Descriptors::Float(q), Descriptors::Float(r), SearchStrategy::Exhaustive) => {
                linear_knn!(L2Metric, q, r, k, f32::from_bits)
            }
            (Descriptors::Binary(q), Descriptors::Binary(r), SearchStrategy::Approximate) => {
                forest_knn(q, r, k, &self.config.forest)
            }
            (Descriptors::Float(q), Descriptors::Float(r), SearchStrategy::Approximate) => {
                forest_knn(q, r, k, &self.config.forest)
            }
            _ => {
                return Err(TrackError::FormatMismatch {
                    query: query.format(),
                    reference: reference.format(),
                })
            }
        };

        let matches = self.select(candidates);
        trace!(
            "{} of {} query descriptors matched against {}",
            matches.len(),
            query.len(),
            reference.len()
        );
        Ok(matches)
    }

    fn select(&self, candidates: Candidates) -> Vec<Match> {
        // enforce that each reference maps to only one query
        let mut claimed = HashSet::<usize>::new();

        candidates
            .into_iter()
            .enumerate()
            .filter_map(|(query_index, nearest)| {
                let &(reference_index, distance) = nearest.first()?;

                // Lowe's test: ambiguous nearest neighbours are likely noise.
                // A lone candidate has nothing to be ambiguous with.
                let accepted = match (self.config.selection, nearest.get(1)) {
                    (SelectionPolicy::RatioTest, Some(&(_, second))) => {
                        distance < self.config.ratio_threshold * second
                    }
                    _ => true,
                };

                if !accepted || (self.config.one_to_one && !claimed.insert(reference_index)) {
                    return None;
                }

                Some(Match {
                    query_index,
                    reference_index,
                    distance,
                })
            })
            .collect()
    }
}
