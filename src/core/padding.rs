use image::{Rgb, RgbImage};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::core::image::ImageStore;
use crate::core::tree::{NodeId, SegmentTree};

/// Color statistics of a set of padding pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Flatness {
    pub dominant_color: [u8; 3],
    pub dominant_ratio: f64,
    pub non_dominant_ratio: f64,
}

/// Find the dominant color among `pixels` and the share of pixels that differ
/// from it. Colors are quantized to multiples of `bin_size` first; a bin size
/// of 1 compares exact colors. Returns `None` for an empty slice.
pub fn analyze_flatness(pixels: &[Rgb<u8>], bin_size: u8) -> Option<Flatness> {
    if pixels.is_empty() {
        return None;
    }
    let bin = bin_size.max(1);

    let mut counts: HashMap<[u8; 3], usize> = HashMap::new();
    for pixel in pixels {
        let [r, g, b] = pixel.0;
        *counts.entry([r / bin * bin, g / bin * bin, b / bin * bin]).or_default() += 1;
    }

    // ties go to the smallest color so the result does not depend on map order
    let (dominant_color, dominant_count) = counts
        .into_iter()
        .max_by(|(ca, na), (cb, nb)| na.cmp(nb).then_with(|| cb.cmp(ca)))?;

    let total = pixels.len() as f64;
    let dominant_ratio = dominant_count as f64 / total;
    Some(Flatness {
        dominant_color,
        dominant_ratio,
        non_dominant_ratio: (pixels.len() - dominant_count) as f64 / total,
    })
}

/// First offset `(y, x)`, in row-major order, at which `child` appears
/// byte-for-byte inside `parent`.
pub fn find_placement(parent: &RgbImage, child: &RgbImage) -> Option<(u32, u32)> {
    let (parent_w, parent_h) = parent.dimensions();
    let (child_w, child_h) = child.dimensions();
    if child_w > parent_w || child_h > parent_h || child_w == 0 || child_h == 0 {
        return None;
    }

    let parent_stride = parent_w as usize * 3;
    let child_stride = child_w as usize * 3;
    let parent_raw = parent.as_raw();
    let child_raw = child.as_raw();

    let matches_at = |sy: u32, sx: u32| {
        (0..child_h as usize).all(|row| {
            let start = (sy as usize + row) * parent_stride + sx as usize * 3;
            let child_start = row * child_stride;
            parent_raw[start..start + child_stride]
                == child_raw[child_start..child_start + child_stride]
        })
    };

    for sy in 0..=(parent_h - child_h) {
        for sx in 0..=(parent_w - child_w) {
            if matches_at(sy, sx) {
                return Some((sy, sx));
            }
        }
    }
    None
}

/// Pixels of `parent` outside the `width × height` rectangle at `(sy, sx)`.
pub fn padding_pixels(
    parent: &RgbImage,
    (sy, sx): (u32, u32),
    width: u32,
    height: u32,
) -> Vec<Rgb<u8>> {
    parent
        .enumerate_pixels()
        .filter(|(x, y, _)| !(*y >= sy && *y < sy + height && *x >= sx && *x < sx + width))
        .map(|(_, _, pixel)| *pixel)
        .collect()
}

/// Outcome of comparing a parent screenshot with its single child's.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PaddingCheck {
    /// A buffer is missing, or the child does not fit inside the parent.
    Incomparable,
    NoPlacement,
    /// The child fills the parent exactly; there is no padding to judge.
    NoPadding { offset: (u32, u32) },
    Uneven { offset: (u32, u32), flatness: Flatness },
    Duplicate { offset: (u32, u32), flatness: Flatness },
}

impl PaddingCheck {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, PaddingCheck::Duplicate { .. })
    }
}

/// Decide whether `parent` is `child` surrounded by near-uniform padding.
///
/// Only the first exact placement is considered. The padding passes when the
/// share of pixels off the dominant color is strictly below `allowed_deviation`.
pub fn check_padding(
    parent: Option<&RgbImage>,
    child: Option<&RgbImage>,
    allowed_deviation: f64,
    color_bin: u8,
) -> PaddingCheck {
    let (Some(parent), Some(child)) = (parent, child) else {
        return PaddingCheck::Incomparable;
    };
    if child.width() > parent.width() || child.height() > parent.height() {
        return PaddingCheck::Incomparable;
    }

    let Some(offset) = find_placement(parent, child) else {
        return PaddingCheck::NoPlacement;
    };

    let padding = padding_pixels(parent, offset, child.width(), child.height());
    let Some(flatness) = analyze_flatness(&padding, color_bin) else {
        return PaddingCheck::NoPadding { offset };
    };

    if flatness.non_dominant_ratio < allowed_deviation {
        PaddingCheck::Duplicate { offset, flatness }
    } else {
        PaddingCheck::Uneven { offset, flatness }
    }
}

/// Second deduplication pass over a tree of hash-distinct segments.
pub struct PaddingDetector<'a> {
    tree: &'a SegmentTree,
    images: &'a ImageStore,
    allowed_deviation: f64,
    color_bin: u8,
}

impl<'a> PaddingDetector<'a> {
    pub fn new(tree: &'a SegmentTree, images: &'a ImageStore, allowed_deviation: f64) -> Self {
        Self {
            tree,
            images,
            allowed_deviation,
            color_bin: 1,
        }
    }

    pub fn with_color_bin(mut self, color_bin: u8) -> Self {
        self.color_bin = color_bin;
        self
    }

    /// Xpaths of single children whose parent is the same picture plus padding.
    ///
    /// The padded parent is kept and the child is reported for removal.
    pub fn find_duplicates(&self) -> BTreeSet<String> {
        self.find_duplicates_in(self.tree.post_order())
    }

    /// Evaluate nodes in the given order; a node listed twice is evaluated once.
    pub fn find_duplicates_in<I>(&self, order: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = NodeId>,
    {
        let mut visited: HashSet<NodeId> = HashSet::new();
        order
            .into_iter()
            .filter(|&id| visited.insert(id))
            .filter_map(|id| self.evaluate(id))
            .collect()
    }

    fn evaluate(&self, id: NodeId) -> Option<String> {
        let node = self.tree.node(id);
        if node.is_root() {
            return None;
        }
        let [child_id] = node.children.as_slice() else {
            return None;
        };

        let parent_xpath = node.xpath();
        let child_xpath = self.tree.node(*child_id).xpath();
        let check = check_padding(
            self.images.get(parent_xpath),
            self.images.get(child_xpath),
            self.allowed_deviation,
            self.color_bin,
        );

        match check {
            PaddingCheck::Duplicate { offset, flatness } => {
                log::debug!(
                    "{} is {} plus padding at {:?} ({:.3} off-color)",
                    parent_xpath,
                    child_xpath,
                    offset,
                    flatness.non_dominant_ratio
                );
                Some(child_xpath.to_string())
            }
            _ => None,
        }
    }
}
