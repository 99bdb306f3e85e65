// Segment tree reconstruction and analysis
// - xpath: structural path arithmetic
// - segment / tree: ingestion and the arena tree
// - image / hash / padding / duplicate: screenshot deduplication
// - psi: structural recurrence scoring

pub mod duplicate;
pub mod hash;
pub mod image;
pub mod padding;
pub mod psi;
pub mod segment;
pub mod tree;
pub mod xpath;
