use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::core::tree::{NodeId, SegmentTree};

pub const DEFAULT_TAG_DEPTH: usize = 3;

/// How a node's structural distances to its siblings are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PsiVariant {
    /// Sum of distances; leaves are always instances.
    #[default]
    Sum,
    /// Mean distance.
    #[value(alias = "avg")]
    #[serde(alias = "avg")]
    Average,
}

/// Multiset of tag names in the first few levels of a subtree.
pub type TagMultiset = HashMap<String, usize>;

/// Tags of `id` and its descendants down to `depth` levels (the node itself
/// is level 1). A depth of 0 gives the empty multiset.
pub fn tag_multiset(tree: &SegmentTree, id: NodeId, depth: usize) -> TagMultiset {
    let mut bag = TagMultiset::new();
    collect_tags(tree, id, depth, &mut bag);
    bag
}

fn collect_tags(tree: &SegmentTree, id: NodeId, depth: usize, bag: &mut TagMultiset) {
    if depth == 0 {
        return;
    }
    *bag.entry(tree.node(id).tag().to_string()).or_default() += 1;
    for &child in tree.children(id) {
        collect_tags(tree, child, depth - 1, bag);
    }
}

/// `1 - |A ∩ B| / |A ∪ B|` over multisets; 0.0 when both are empty.
pub fn jaccard_distance(a: &TagMultiset, b: &TagMultiset) -> f64 {
    let mut intersection = 0usize;
    let mut union = 0usize;

    for (tag, &count_a) in a {
        let count_b = b.get(tag).copied().unwrap_or(0);
        intersection += count_a.min(count_b);
        union += count_a.max(count_b);
    }
    for (tag, &count_b) in b {
        if !a.contains_key(tag) {
            union += count_b;
        }
    }

    if union == 0 {
        0.0
    } else {
        1.0 - intersection as f64 / union as f64
    }
}

/// Structural distance between two nodes of the same tree.
pub fn structural_distance(tree: &SegmentTree, a: NodeId, b: NodeId, depth: usize) -> f64 {
    jaccard_distance(&tag_multiset(tree, a, depth), &tag_multiset(tree, b, depth))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NodeScore {
    /// Winning score for the subtree.
    pub psi: f64,
    pub is_instance: bool,
    /// `subtree size / (1 + sibling dispersion)`.
    pub psi_root: f64,
    /// Product of the children's resolved scores.
    pub psi_children: f64,
    pub dispersion: f64,
}

impl Default for NodeScore {
    fn default() -> Self {
        Self {
            psi: 0.0,
            is_instance: false,
            psi_root: 0.0,
            psi_children: 1.0,
            dispersion: 0.0,
        }
    }
}

/// PSI results for every node of a tree, indexed by [`NodeId`].
#[derive(Debug, Clone)]
pub struct PsiScores {
    scores: Vec<NodeScore>,
}

impl PsiScores {
    pub fn get(&self, id: NodeId) -> &NodeScore {
        &self.scores[id.index()]
    }

    pub fn psi(&self, id: NodeId) -> f64 {
        self.get(id).psi
    }

    pub fn is_instance(&self, id: NodeId) -> bool {
        self.get(id).is_instance
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

pub struct PsiScorer<'a> {
    tree: &'a SegmentTree,
    variant: PsiVariant,
    multisets: Vec<TagMultiset>,
    sizes: Vec<usize>,
}

impl<'a> PsiScorer<'a> {
    pub fn new(tree: &'a SegmentTree, variant: PsiVariant, depth: usize) -> Self {
        let multisets = tree.ids().map(|id| tag_multiset(tree, id, depth)).collect();
        Self {
            tree,
            variant,
            multisets,
            sizes: tree.subtree_sizes(),
        }
    }

    /// Score every node bottom-up; each parent sees its children's final values.
    pub fn score(&self) -> PsiScores {
        let mut scores = vec![NodeScore::default(); self.tree.len()];

        for id in self.tree.post_order() {
            let children = self.tree.children(id);
            let node = self.tree.node(id);

            if children.is_empty() && self.variant == PsiVariant::Sum && !node.is_root() {
                scores[id.index()] = NodeScore {
                    psi: 1.0,
                    is_instance: true,
                    psi_root: 1.0,
                    psi_children: 1.0,
                    dispersion: 0.0,
                };
                continue;
            }

            let psi_children: f64 = children.iter().map(|c| scores[c.index()].psi).product();

            if node.is_root() {
                scores[id.index()] = NodeScore {
                    psi: psi_children,
                    is_instance: false,
                    psi_root: 0.0,
                    psi_children,
                    dispersion: 0.0,
                };
                continue;
            }

            let dispersion = self.sibling_dispersion(id);
            let psi_root = self.sizes[id.index()] as f64 / (1.0 + dispersion);
            let is_instance = psi_root >= psi_children;

            scores[id.index()] = NodeScore {
                psi: if is_instance { psi_root } else { psi_children },
                is_instance,
                psi_root,
                psi_children,
                dispersion,
            };
        }

        PsiScores { scores }
    }

    fn sibling_dispersion(&self, id: NodeId) -> f64 {
        let Some(parent) = self.tree.parent(id) else {
            return 0.0;
        };
        let own = &self.multisets[id.index()];
        let distances: Vec<f64> = self
            .tree
            .children(parent)
            .iter()
            .filter(|&&sibling| sibling != id)
            .map(|sibling| jaccard_distance(own, &self.multisets[sibling.index()]))
            .collect();

        if distances.is_empty() {
            return 0.0;
        }
        let total: f64 = distances.iter().sum();
        match self.variant {
            PsiVariant::Sum => total,
            PsiVariant::Average => total / distances.len() as f64,
        }
    }
}

pub fn calculate_psi(tree: &SegmentTree, variant: PsiVariant, depth: usize) -> PsiScores {
    PsiScorer::new(tree, variant, depth).score()
}

/// Outermost instance nodes, mapped to their subtree size.
///
/// The walk stops at the first instance on every path from the root, so
/// instances nested inside another instance are not listed.
pub fn gather_instances(tree: &SegmentTree, scores: &PsiScores) -> BTreeMap<String, usize> {
    let mut instances = BTreeMap::new();
    let mut stack = vec![tree.root()];
    while let Some(id) = stack.pop() {
        let node = tree.node(id);
        if !node.is_root() && scores.is_instance(id) {
            instances.insert(node.xpath().to_string(), tree.subtree_size(id));
            continue;
        }
        stack.extend(tree.children(id).iter().rev());
    }
    instances
}

/// Indented rendering with `ψ` values; instance nodes are starred.
pub fn ascii_tree(tree: &SegmentTree, scores: &PsiScores) -> String {
    let mut out = String::new();
    render(tree, scores, tree.root(), "", true, &mut out);
    out
}

fn render(
    tree: &SegmentTree,
    scores: &PsiScores,
    id: NodeId,
    indent: &str,
    is_last: bool,
    out: &mut String,
) {
    let branch = if is_last { "└── " } else { "├── " };
    let star = if scores.is_instance(id) { " *" } else { "" };
    out.push_str(&format!(
        "{}{}{}  ψ={:.2}{}\n",
        indent,
        branch,
        tree.node(id).tag(),
        scores.psi(id),
        star
    ));

    let child_indent = format!("{}{}", indent, if is_last { "    " } else { "│   " });
    let children = tree.children(id);
    for (i, &child) in children.iter().enumerate() {
        render(tree, scores, child, &child_indent, i + 1 == children.len(), out);
    }
}
