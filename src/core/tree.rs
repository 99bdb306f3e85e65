use serde::Serialize;
use std::collections::HashMap;

use crate::core::segment::Segment;
use crate::core::xpath::parent_xpath;

pub const ROOT_TAG: &str = "root";

/// Index of a node inside its [`SegmentTree`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    /// `None` only for the synthetic root.
    pub segment: Option<Segment>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl Node {
    pub fn xpath(&self) -> &str {
        self.segment.as_ref().map_or("", |s| s.xpath.as_str())
    }

    pub fn tag(&self) -> &str {
        self.segment.as_ref().map_or(ROOT_TAG, |s| s.tag.as_str())
    }

    pub fn is_root(&self) -> bool {
        self.segment.is_none()
    }
}

/// What happened to each record while the tree was built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub inserted: usize,
    pub duplicates: usize,
    pub malformed: usize,
    /// Records whose path never shortened to a registered node; attached to root.
    pub orphaned: usize,
}

/// Rooted, ordered tree of segments reconstructed from their structural paths.
///
/// Nodes are owned by the arena; parent links are plain indices.
#[derive(Debug, Clone)]
pub struct SegmentTree {
    nodes: Vec<Node>,
    by_xpath: HashMap<String, NodeId>,
    report: BuildReport,
}

impl SegmentTree {
    pub fn new() -> Self {
        let root = Node {
            segment: None,
            parent: None,
            children: Vec::new(),
        };
        let mut by_xpath = HashMap::new();
        by_xpath.insert(String::new(), NodeId(0));

        Self {
            nodes: vec![root],
            by_xpath,
            report: BuildReport::default(),
        }
    }

    /// Build the tree from a flat list of segments.
    ///
    /// Segments are visited in ascending `index` order so ancestors tend to be
    /// registered before their descendants. Each segment hangs under its
    /// deepest already-registered ancestor.
    pub fn build<I>(segments: I) -> Self
    where
        I: IntoIterator<Item = Segment>,
    {
        let mut ordered: Vec<Segment> = segments.into_iter().collect();
        ordered.sort_by_key(|s| s.index);

        let mut tree = Self::new();
        for segment in ordered {
            tree.insert(segment);
        }

        log::debug!(
            "Built segment tree: {} inserted, {} duplicate, {} malformed, {} orphaned",
            tree.report.inserted,
            tree.report.duplicates,
            tree.report.malformed,
            tree.report.orphaned
        );
        tree
    }

    /// Insert one segment. Returns `None` when the segment was skipped.
    pub fn insert(&mut self, segment: Segment) -> Option<NodeId> {
        if segment.xpath.is_empty() {
            log::warn!("Segment '{}' has no xpath; skipping", segment.tag);
            self.report.malformed += 1;
            return None;
        }

        if self.by_xpath.contains_key(&segment.xpath) {
            log::warn!(
                "Node with xpath '{}' already exists; skipping duplicate segment for tag '{}'",
                segment.xpath,
                segment.tag
            );
            self.report.duplicates += 1;
            return None;
        }

        let parent = match self.find_registered_ancestor(&segment.xpath) {
            Some(parent) => parent,
            None => {
                log::warn!(
                    "Could not find existing parent for xpath '{}'; attaching to root",
                    segment.xpath
                );
                self.report.orphaned += 1;
                self.root()
            }
        };

        let id = NodeId(self.nodes.len());
        self.by_xpath.insert(segment.xpath.clone(), id);
        self.nodes.push(Node {
            segment: Some(segment),
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        self.report.inserted += 1;

        Some(id)
    }

    fn find_registered_ancestor(&self, xpath: &str) -> Option<NodeId> {
        let mut candidate = parent_xpath(xpath);
        while let Some(path) = candidate {
            if let Some(&id) = self.by_xpath.get(path) {
                return Some(id);
            }
            candidate = parent_xpath(path);
        }
        None
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn get(&self, xpath: &str) -> Option<NodeId> {
        self.by_xpath.get(xpath).copied()
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    /// Every node id in arena order; the root comes first.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + use<> {
        (0..self.nodes.len()).map(NodeId)
    }

    /// Number of nodes, the synthetic root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    pub fn report(&self) -> &BuildReport {
        &self.report
    }

    pub fn subtree_size(&self, id: NodeId) -> usize {
        1 + self
            .children(id)
            .iter()
            .map(|&child| self.subtree_size(child))
            .sum::<usize>()
    }

    /// Subtree size of every node at once, indexed by [`NodeId::index`].
    pub fn subtree_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![1; self.nodes.len()];
        for id in self.post_order() {
            for &child in self.children(id) {
                sizes[id.0] += sizes[child.0];
            }
        }
        sizes
    }

    /// All nodes, children before their parent, the root last.
    pub fn post_order(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(self.root(), false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            stack.push((id, true));
            for &child in self.children(id).iter().rev() {
                stack.push((child, false));
            }
        }
        order
    }

    /// Every segment in tree pre-order.
    pub fn segments(&self) -> Vec<&Segment> {
        let mut out = Vec::with_capacity(self.nodes.len() - 1);
        let mut stack = vec![self.root()];
        while let Some(id) = stack.pop() {
            if let Some(segment) = &self.nodes[id.0].segment {
                out.push(segment);
            }
            stack.extend(self.children(id).iter().rev());
        }
        out
    }
}

impl Default for SegmentTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::xpath::ancestor_chain;
    use std::collections::BTreeSet;

    fn seg(xpath: &str, index: i64) -> Segment {
        let tag = xpath
            .rsplit('/')
            .next()
            .and_then(|step| step.split('[').next())
            .unwrap_or("div");
        Segment::new(tag, xpath, index)
    }

    fn sample_segments() -> Vec<Segment> {
        vec![
            seg("//html[1]", 0),
            seg("//html[1]/body[1]", 1),
            seg("//html[1]/body[1]/div[1]", 2),
            seg("//html[1]/body[1]/div[1]/span[1]", 3),
            seg("//html[1]/body[1]/div[2]", 4),
            seg("//html[1]/body[1]/div[2]/a[1]", 5),
            seg("//html[1]/body[1]/div[2]/a[2]", 6),
        ]
    }

    fn edges(tree: &SegmentTree) -> BTreeSet<(String, String)> {
        tree.post_order()
            .into_iter()
            .filter_map(|id| {
                let parent = tree.parent(id)?;
                Some((
                    tree.node(parent).xpath().to_string(),
                    tree.node(id).xpath().to_string(),
                ))
            })
            .collect()
    }

    #[test]
    fn test_build_simple_tree() {
        let tree = SegmentTree::build(sample_segments());
        assert_eq!(tree.len(), 8);

        let root_children = tree.children(tree.root());
        assert_eq!(root_children.len(), 1);
        assert_eq!(tree.node(root_children[0]).xpath(), "//html[1]");

        let div2 = tree.get("//html[1]/body[1]/div[2]").unwrap();
        let links: Vec<&str> = tree
            .children(div2)
            .iter()
            .map(|&c| tree.node(c).xpath())
            .collect();
        assert_eq!(
            links,
            vec!["//html[1]/body[1]/div[2]/a[1]", "//html[1]/body[1]/div[2]/a[2]"]
        );
    }

    #[test]
    fn test_root_is_synthetic() {
        let tree = SegmentTree::build(sample_segments());
        let root = tree.node(tree.root());
        assert!(root.is_root());
        assert_eq!(root.xpath(), "");
        assert_eq!(root.tag(), ROOT_TAG);
        assert_eq!(tree.parent(tree.root()), None);
    }

    #[test]
    fn test_ancestors_follow_prefix_chain() {
        let tree = SegmentTree::build(sample_segments());
        let leaf = tree.get("//html[1]/body[1]/div[1]/span[1]").unwrap();

        let mut ancestors = Vec::new();
        let mut current = Some(leaf);
        while let Some(id) = current {
            if !tree.node(id).is_root() {
                ancestors.push(tree.node(id).xpath().to_string());
            }
            current = tree.parent(id);
        }
        ancestors.reverse();

        assert_eq!(ancestors, ancestor_chain("//html[1]/body[1]/div[1]/span[1]"));
    }

    #[test]
    fn test_missing_intermediate_attaches_to_nearest_ancestor() {
        let tree = SegmentTree::build(vec![
            seg("//html[1]", 0),
            seg("//html[1]/body[1]/div[1]/p[1]", 1),
        ]);

        let p = tree.get("//html[1]/body[1]/div[1]/p[1]").unwrap();
        let parent = tree.parent(p).unwrap();
        assert_eq!(tree.node(parent).xpath(), "//html[1]");
        assert_eq!(tree.report().orphaned, 0);
    }

    #[test]
    fn test_duplicate_xpath_first_wins() {
        let mut first = seg("//html[1]/body[1]", 1);
        first.text = "first".to_string();
        let mut second = seg("//html[1]/body[1]", 2);
        second.text = "second".to_string();

        let tree = SegmentTree::build(vec![seg("//html[1]", 0), second, first]);
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.report().duplicates, 1);

        let body = tree.get("//html[1]/body[1]").unwrap();
        let segment = tree.node(body).segment.as_ref().unwrap();
        assert_eq!(segment.text, "first");
    }

    #[test]
    fn test_empty_xpath_is_skipped() {
        let tree = SegmentTree::build(vec![seg("//html[1]", 0), Segment::new("div", "", 1)]);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.report().malformed, 1);
    }

    #[test]
    fn test_relative_single_step_falls_back_to_root() {
        let tree = SegmentTree::build(vec![seg("//html[1]", 0), seg("div[1]", 1)]);
        let orphan = tree.get("div[1]").unwrap();
        assert_eq!(tree.parent(orphan), Some(tree.root()));
        assert_eq!(tree.report().orphaned, 1);
    }

    #[test]
    fn test_children_follow_index_order() {
        let tree = SegmentTree::build(vec![
            seg("/html[1]/ul[1]/li[3]", 9),
            seg("/html[1]/ul[1]", 1),
            seg("/html[1]/ul[1]/li[1]", 4),
            seg("/html[1]/ul[1]/li[2]", 6),
        ]);

        let ul = tree.get("/html[1]/ul[1]").unwrap();
        let items: Vec<&str> = tree
            .children(ul)
            .iter()
            .map(|&c| tree.node(c).xpath())
            .collect();
        assert_eq!(
            items,
            vec!["/html[1]/ul[1]/li[1]", "/html[1]/ul[1]/li[2]", "/html[1]/ul[1]/li[3]"]
        );
    }

    #[test]
    fn test_structure_is_independent_of_input_order() {
        let forward = SegmentTree::build(sample_segments());
        let mut reversed_input = sample_segments();
        reversed_input.reverse();
        let reversed = SegmentTree::build(reversed_input);

        assert_eq!(edges(&forward), edges(&reversed));
    }

    #[test]
    fn test_repeated_indices_keep_edges_stable() {
        let tied = vec![
            seg("//html[1]/body[1]", 0),
            seg("//html[1]/body[1]/div[1]", 1),
            seg("//html[1]/body[1]/div[2]", 1),
            seg("//html[1]/body[1]/div[3]", 1),
            seg("//html[1]/body[1]/div[2]/p[1]", 2),
            seg("//html[1]/body[1]/div[3]/p[1]", 2),
        ];
        let mut shuffled = tied.clone();
        shuffled.swap(1, 3);
        shuffled.swap(4, 5);

        let first = SegmentTree::build(tied);
        let second = SegmentTree::build(shuffled);
        assert_eq!(edges(&first), edges(&second));

        // ties keep input order among siblings
        let body = first.get("//html[1]/body[1]").unwrap();
        let order: Vec<&str> = first
            .children(body)
            .iter()
            .map(|&id| first.node(id).xpath())
            .collect();
        assert_eq!(
            order,
            vec![
                "//html[1]/body[1]/div[1]",
                "//html[1]/body[1]/div[2]",
                "//html[1]/body[1]/div[3]",
            ]
        );
        let body = second.get("//html[1]/body[1]").unwrap();
        let order: Vec<&str> = second
            .children(body)
            .iter()
            .map(|&id| second.node(id).xpath())
            .collect();
        assert_eq!(
            order,
            vec![
                "//html[1]/body[1]/div[3]",
                "//html[1]/body[1]/div[2]",
                "//html[1]/body[1]/div[1]",
            ]
        );
    }

    #[test]
    fn test_subtree_size_invariants() {
        let segments = sample_segments();
        let count = segments.len();
        let tree = SegmentTree::build(segments);

        assert_eq!(tree.subtree_size(tree.root()), count + 1);

        let sizes = tree.subtree_sizes();
        for id in tree.post_order() {
            let expected = 1 + tree
                .children(id)
                .iter()
                .map(|&c| tree.subtree_size(c))
                .sum::<usize>();
            assert_eq!(tree.subtree_size(id), expected);
            assert_eq!(sizes[id.index()], expected);
        }
    }

    #[test]
    fn test_post_order_visits_children_first() {
        let tree = SegmentTree::build(sample_segments());
        let order = tree.post_order();
        assert_eq!(order.len(), tree.len());
        assert_eq!(*order.last().unwrap(), tree.root());

        let position: std::collections::HashMap<NodeId, usize> =
            order.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        for &id in &order {
            if let Some(parent) = tree.parent(id) {
                assert!(position[&id] < position[&parent]);
            }
        }
    }

    #[test]
    fn test_segments_in_pre_order() {
        let tree = SegmentTree::build(sample_segments());
        let paths: Vec<&str> = tree.segments().iter().map(|s| s.xpath.as_str()).collect();
        assert_eq!(paths.len(), 7);
        assert_eq!(paths[0], "//html[1]");
        assert_eq!(paths[3], "//html[1]/body[1]/div[1]/span[1]");
        assert_eq!(paths[4], "//html[1]/body[1]/div[2]");
    }
}
