use image::RgbImage;
use image_hasher::{HashAlg, Hasher, HasherConfig, ImageHash};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::config::PipelineConfig;
use crate::core::image::ImageStore;
use crate::core::segment::Segment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    /// With DCT preprocessing this is a pHash.
    #[default]
    Median,
    Mean,
    Gradient,
    VertGradient,
    DoubleGradient,
    Blockhash,
}

impl From<HashAlgorithm> for HashAlg {
    fn from(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Median => HashAlg::Median,
            HashAlgorithm::Mean => HashAlg::Mean,
            HashAlgorithm::Gradient => HashAlg::Gradient,
            HashAlgorithm::VertGradient => HashAlg::VertGradient,
            HashAlgorithm::DoubleGradient => HashAlg::DoubleGradient,
            HashAlgorithm::Blockhash => HashAlg::Blockhash,
        }
    }
}

/// Perceptual fingerprint of one screenshot.
///
/// `Unreadable` never compares equal to anything, another `Unreadable`
/// included, so segments without pixels are never grouped.
#[derive(Debug, Clone)]
pub enum Fingerprint {
    Hashed(ImageHash),
    Unreadable,
}

impl Fingerprint {
    /// Hamming distance, or `None` if either side is unreadable.
    pub fn distance(&self, other: &Fingerprint) -> Option<u32> {
        match (self, other) {
            (Fingerprint::Hashed(a), Fingerprint::Hashed(b)) => Some(a.dist(b)),
            _ => None,
        }
    }

    pub fn is_identical(&self, other: &Fingerprint) -> bool {
        self.distance(other) == Some(0)
    }

    pub fn is_similar(&self, other: &Fingerprint, threshold: u32) -> bool {
        self.distance(other).is_some_and(|d| d < threshold)
    }

    /// Grouping key; equal keys mean distance 0.
    pub fn key(&self) -> Option<String> {
        match self {
            Fingerprint::Hashed(hash) => Some(hash.to_base64()),
            Fingerprint::Unreadable => None,
        }
    }
}

/// Segments whose screenshots hash identically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub hash: String,
    /// Shortest xpath of the group.
    pub kept: String,
    pub removed: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct HashDeduplication {
    pub groups: Vec<DuplicateGroup>,
    pub duplicates: BTreeSet<String>,
}

/// Computes perceptual fingerprints and exact-duplicate groups.
pub struct HashService {
    hasher: Hasher,
    similarity_threshold: u32,
}

impl HashService {
    pub fn new() -> Self {
        Self::from_config(&PipelineConfig::default())
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        let mut hasher_config = HasherConfig::new()
            .hash_size(config.hash_size, config.hash_size)
            .hash_alg(config.hash_algorithm.into());
        if config.hash_dct {
            hasher_config = hasher_config.preproc_dct();
        }
        Self {
            hasher: hasher_config.to_hasher(),
            similarity_threshold: config.similarity_threshold,
        }
    }

    /// Near-duplicate test using the configured Hamming threshold.
    pub fn are_similar(&self, a: &Fingerprint, b: &Fingerprint) -> bool {
        a.is_similar(b, self.similarity_threshold)
    }

    pub fn fingerprint(&self, image: Option<&RgbImage>) -> Fingerprint {
        match image {
            Some(image) => Fingerprint::Hashed(self.hasher.hash_image(image)),
            None => Fingerprint::Unreadable,
        }
    }

    /// Fingerprint every segment's screenshot in parallel.
    pub fn fingerprint_all(
        &self,
        segments: &[Segment],
        store: &ImageStore,
    ) -> HashMap<String, Fingerprint> {
        segments
            .par_iter()
            .map(|segment| {
                let fingerprint = self.fingerprint(store.get(&segment.xpath));
                (segment.xpath.clone(), fingerprint)
            })
            .collect()
    }

    /// First deduplication pass: drop every segment whose screenshot hashes
    /// identically to a segment with a shorter xpath.
    pub fn find_duplicates(&self, segments: &[Segment], store: &ImageStore) -> HashDeduplication {
        let fingerprints = self.fingerprint_all(segments, store);
        group_duplicates(segments, &fingerprints)
    }
}

impl Default for HashService {
    fn default() -> Self {
        Self::new()
    }
}

/// Partition segments by fingerprint and keep the shortest xpath of each group.
///
/// Ties on length go to the segment that appears first in `segments`.
pub fn group_duplicates(
    segments: &[Segment],
    fingerprints: &HashMap<String, Fingerprint>,
) -> HashDeduplication {
    let mut order: Vec<String> = Vec::new();
    let mut buckets: HashMap<String, Vec<&str>> = HashMap::new();

    for segment in segments {
        let Some(key) = fingerprints.get(&segment.xpath).and_then(Fingerprint::key) else {
            continue;
        };
        let bucket = buckets.entry(key.clone()).or_default();
        if bucket.is_empty() {
            order.push(key);
        }
        bucket.push(segment.xpath.as_str());
    }

    let mut result = HashDeduplication::default();
    for key in order {
        let Some(mut members) = buckets.remove(&key) else {
            continue;
        };
        if members.len() < 2 {
            continue;
        }
        members.sort_by_key(|xpath| xpath.len());

        let removed: Vec<String> = members[1..].iter().map(|s| s.to_string()).collect();
        result.duplicates.extend(removed.iter().cloned());
        result.groups.push(DuplicateGroup {
            hash: key,
            kept: members[0].to_string(),
            removed,
        });
    }
    result
}
