// Screenshot deduplication
// Pass 1 drops segments whose screenshots hash identically (shortest xpath wins).
// Pass 2 drops single children that equal their parent minus uniform padding.

use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};

use crate::config::PipelineConfig;
use crate::core::hash::{DuplicateGroup, HashService};
use crate::core::image::ImageStore;
use crate::core::padding::PaddingDetector;
use crate::core::segment::Segment;
use crate::core::tree::SegmentTree;

#[derive(Debug, Clone, Serialize)]
pub struct DedupReport {
    pub generated_at: String,
    pub eligible: usize,
    pub removed: usize,
    pub kept: Vec<Segment>,
    pub hash_groups: Vec<DuplicateGroup>,
    pub hash_duplicates: BTreeSet<String>,
    pub padding_duplicates: BTreeSet<String>,
}

impl DedupReport {
    pub fn kept_xpaths(&self) -> Vec<&str> {
        self.kept.iter().map(|s| s.xpath.as_str()).collect()
    }

    /// Union of both duplicate sets.
    pub fn removed_xpaths(&self) -> BTreeSet<&str> {
        self.hash_duplicates
            .iter()
            .chain(self.padding_duplicates.iter())
            .map(String::as_str)
            .collect()
    }
}

pub struct DuplicateDetector {
    config: PipelineConfig,
    hash_service: HashService,
}

impl DuplicateDetector {
    pub fn new(config: PipelineConfig) -> Self {
        let hash_service = HashService::from_config(&config);
        Self {
            config,
            hash_service,
        }
    }

    /// Segments under the document prefix that carry a screenshot, in input order.
    ///
    /// A repeated xpath keeps its first record; later ones are dropped.
    pub fn eligible(&self, segments: &[Segment]) -> Vec<Segment> {
        let mut seen: HashSet<&str> = HashSet::new();
        segments
            .iter()
            .filter(|s| s.xpath.starts_with(&self.config.document_prefix) && s.has_screenshot())
            .filter(|s| {
                let first = seen.insert(s.xpath.as_str());
                if !first {
                    log::warn!(
                        "Segment with xpath '{}' appears more than once; keeping the first",
                        s.xpath
                    );
                }
                first
            })
            .cloned()
            .collect()
    }

    /// Run both passes. Screenshots missing from `store` are loaded first.
    pub fn run(&self, segments: &[Segment], store: &mut ImageStore) -> DedupReport {
        let eligible = self.eligible(segments);
        if eligible.is_empty() {
            log::warn!("No segments with screenshots under '{}'", self.config.document_prefix);
        }

        store.ensure_loaded(&eligible);
        let unreadable = eligible.iter().filter(|s| store.get(&s.xpath).is_none()).count();
        if unreadable > 0 {
            log::warn!("{} of {} screenshots could not be read", unreadable, eligible.len());
        }

        log::info!("Computing image hashes for {} segments", eligible.len());
        let hashed = self.hash_service.find_duplicates(&eligible, store);
        log::info!("Found {} exact hash duplicates", hashed.duplicates.len());

        let remaining: Vec<Segment> = eligible
            .iter()
            .filter(|s| !hashed.duplicates.contains(&s.xpath))
            .cloned()
            .collect();
        let tree = SegmentTree::build(remaining);
        let padding_duplicates = PaddingDetector::new(&tree, store, self.config.allowed_deviation)
            .with_color_bin(self.config.color_bin)
            .find_duplicates();
        log::info!("Found {} padding duplicates", padding_duplicates.len());

        let kept: Vec<Segment> = eligible
            .iter()
            .filter(|s| {
                !hashed.duplicates.contains(&s.xpath) && !padding_duplicates.contains(&s.xpath)
            })
            .cloned()
            .collect();

        let removed = eligible.len() - kept.len();
        log::info!(
            "Deduplication complete. Kept {} of {} segments",
            kept.len(),
            eligible.len()
        );

        DedupReport {
            generated_at: Utc::now().to_rfc3339(),
            eligible: eligible.len(),
            removed,
            kept,
            hash_groups: hashed.groups,
            hash_duplicates: hashed.duplicates,
            padding_duplicates,
        }
    }
}

/// Deduplicate `segments`, loading screenshots from disk as needed.
pub fn deduplicate(segments: &[Segment], config: &PipelineConfig) -> DedupReport {
    let mut store = ImageStore::new();
    DuplicateDetector::new(config.clone()).run(segments, &mut store)
}
