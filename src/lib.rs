pub mod config;
pub mod core;

pub use config::{ConfigError, PipelineConfig};
pub use crate::core::duplicate::{DedupReport, deduplicate};
pub use crate::core::psi::{PsiScores, PsiVariant, ascii_tree, calculate_psi, gather_instances};
pub use crate::core::segment::{Segment, SegmentError, load_segments};
pub use crate::core::tree::{NodeId, SegmentTree};
