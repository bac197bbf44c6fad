//! 以节点数组（arena）表示的 VP 树（vantage-point tree）。
//!
//! 树的度量是候选锚定端 L 个碱基之间的严格 Levenshtein 距离，上限为
//! `metric_cap`；超过上限的距离统一记为 `metric_cap + 1`（"并列在上限之外"）。
//! 查询时用 guide 与锚定区的全局距离 `q` 做剪枝：候选的锚定距离不超过 d
//! 时，`q` 不超过 2d，因此以 `t = 2d` 为半径做范围搜索，命中后再用锚定距离确认。
//!
//! - 近子树（度量 <= r）：`q(pivot) <= t + r` 时访问；r 在上限之外时总是访问。
//! - 远子树（度量 > r）：`q(pivot) + t >= r` 时访问；guide 含简并碱基时总是访问。
//!
//! 构建与搜索都用显式栈，退化（链状）树不会耗尽调用栈。

use std::fmt::Write as _;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::align::{AlignmentEngine, EditBuffer};
use crate::error::{OffTargetError, Result};
use crate::genome::CandidateRecord;
use crate::util::dna;

use super::Hit;

/// How each node picks its vantage point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PivotRule {
    /// First member in insertion order; rebuilds are reproducible.
    #[default]
    First,
    /// Uniformly random member from a seeded generator.
    Random { seed: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeOptions {
    pub leaf_size: usize,
    pub metric_cap: u32,
    pub pivot: PivotRule,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum VpNode {
    Inner {
        pivot: u32,
        radius: u32,
        near: Option<u32>,
        far: Option<u32>,
    },
    Leaf {
        items: Vec<u32>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpTree {
    items: Vec<CandidateRecord>,
    nodes: Vec<VpNode>,
    root: Option<u32>,
    metric_cap: u32,
}

impl VpTree {
    pub fn build(items: Vec<CandidateRecord>, engine: &AlignmentEngine, opts: &TreeOptions) -> Self {
        let leaf_size = opts.leaf_size.max(1);
        let cap = opts.metric_cap;
        let beyond = cap.saturating_add(1);
        let mut rng = match opts.pivot {
            PivotRule::First => None,
            PivotRule::Random { seed } => Some(StdRng::seed_from_u64(seed)),
        };
        let mut buf = EditBuffer::new();
        let mut nodes: Vec<VpNode> = Vec::new();
        let mut root = None;

        // (成员下标, 父节点及是否为近子树)
        let mut stack: Vec<(Vec<u32>, Option<(u32, bool)>)> = Vec::new();
        if !items.is_empty() {
            stack.push(((0..items.len() as u32).collect(), None));
        }

        while let Some((mut members, parent)) = stack.pop() {
            let idx = nodes.len() as u32;
            match parent {
                None => root = Some(idx),
                Some((p, is_near)) => {
                    if let VpNode::Inner { near, far, .. } = &mut nodes[p as usize] {
                        if is_near {
                            *near = Some(idx);
                        } else {
                            *far = Some(idx);
                        }
                    }
                }
            }

            if members.len() <= leaf_size {
                nodes.push(VpNode::Leaf { items: members });
                continue;
            }

            let pick = rng.as_mut().map_or(0, |r| r.gen_range(0..members.len()));
            let pivot = members.remove(pick);
            let pivot_region = engine.anchored_region(&items[pivot as usize].sequence);

            let mut scored: Vec<(u32, u32)> = members
                .iter()
                .map(|&m| {
                    let region = engine.anchored_region(&items[m as usize].sequence);
                    (engine.metric(pivot_region, region, cap, &mut buf).unwrap_or(beyond), m)
                })
                .collect();
            scored.sort_by_key(|&(d, _)| d);
            let radius = scored[scored.len() / 2].0;
            let split = scored.partition_point(|&(d, _)| d <= radius);
            let near: Vec<u32> = scored[..split].iter().map(|&(_, m)| m).collect();
            let far: Vec<u32> = scored[split..].iter().map(|&(_, m)| m).collect();

            nodes.push(VpNode::Inner { pivot, radius, near: None, far: None });
            if !far.is_empty() {
                stack.push((far, Some((idx, false))));
            }
            stack.push((near, Some((idx, true))));
        }

        Self { items, nodes, root, metric_cap: cap }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn metric_cap(&self) -> u32 {
        self.metric_cap
    }

    /// Longest root-to-leaf path, counted in nodes.
    pub fn depth(&self) -> usize {
        let Some(root) = self.root else {
            return 0;
        };
        let mut best = 0;
        let mut stack = vec![(root, 1usize)];
        while let Some((n, level)) = stack.pop() {
            best = best.max(level);
            if let VpNode::Inner { near, far, .. } = &self.nodes[n as usize] {
                stack.extend(near.iter().chain(far.iter()).map(|&c| (c, level + 1)));
            }
        }
        best
    }

    /// Appends every item within anchored `distance` of the guide to `out`.
    pub fn search(
        &self,
        engine: &AlignmentEngine,
        guide: &[u8],
        distance: u32,
        buf: &mut EditBuffer,
        out: &mut Vec<Hit>,
    ) {
        let Some(root) = self.root else {
            return;
        };
        let t = distance * 2;
        let concrete = guide.iter().all(|&b| dna::is_concrete(b));

        let mut stack = vec![root];
        while let Some(n) = stack.pop() {
            match &self.nodes[n as usize] {
                VpNode::Leaf { items } => {
                    for &i in items {
                        let c = &self.items[i as usize];
                        if let Some(d) = engine.within(guide, &c.sequence, distance, buf) {
                            out.push(Hit::new(c, d));
                        }
                    }
                }
                VpNode::Inner { pivot, radius, near, far } => {
                    let p = &self.items[*pivot as usize];
                    if let Some(d) = engine.within(guide, &p.sequence, distance, buf) {
                        out.push(Hit::new(p, d));
                    }
                    let cap = t.saturating_add(*radius);
                    let q = engine
                        .region_distance(guide, engine.anchored_region(&p.sequence), cap, buf)
                        .unwrap_or_else(|| cap.saturating_add(1));
                    if let Some(f) = far {
                        if !concrete || q.saturating_add(t) >= *radius {
                            stack.push(*f);
                        }
                    }
                    if let Some(nr) = near {
                        if *radius > self.metric_cap || q <= cap {
                            stack.push(*nr);
                        }
                    }
                }
            }
        }
    }

    /// Structural check after loading: every index in range, children stored
    /// after their parent (so the node graph is a tree), every item reachable once.
    pub fn validate(&self) -> Result<()> {
        let corrupt = |what: String| Err(OffTargetError::CorruptDatabase(format!("vp-tree: {}", what)));
        let (n_nodes, n_items) = (self.nodes.len(), self.items.len());
        match self.root {
            None if n_nodes == 0 && n_items == 0 => return Ok(()),
            Some(0) if n_nodes > 0 => {}
            _ => return corrupt(format!("bad root for {} nodes", n_nodes)),
        }
        let mut linked = vec![false; n_nodes];
        let mut seen = vec![false; n_items];
        let mut mark = |i: u32| -> bool {
            match seen.get_mut(i as usize) {
                Some(s) if !*s => {
                    *s = true;
                    true
                }
                _ => false,
            }
        };
        for (idx, node) in self.nodes.iter().enumerate() {
            match node {
                VpNode::Leaf { items } => {
                    if !items.iter().all(|&i| mark(i)) {
                        return corrupt(format!("leaf {} has a bad item index", idx));
                    }
                }
                VpNode::Inner { pivot, radius, near, far } => {
                    if !mark(*pivot) || *radius > self.metric_cap.saturating_add(1) {
                        return corrupt(format!("inner node {} is inconsistent", idx));
                    }
                    for &c in near.iter().chain(far.iter()) {
                        if c as usize <= idx || c as usize >= n_nodes || linked[c as usize] {
                            return corrupt(format!("node {} links to node {}", idx, c));
                        }
                        linked[c as usize] = true;
                    }
                }
            }
        }
        if linked.iter().skip(1).any(|l| !l) || seen.iter().any(|s| !s) {
            return corrupt("nodes or items missing from the tree".to_string());
        }
        Ok(())
    }

    /// 缩进文本形式渲染前 `levels` 层。
    pub fn render(&self, levels: usize) -> String {
        let mut out = String::new();
        let Some(root) = self.root else {
            out.push_str("(empty)\n");
            return out;
        };
        let mut stack = vec![(root, 0usize, "root")];
        while let Some((n, level, label)) = stack.pop() {
            let indent = "  ".repeat(level);
            match &self.nodes[n as usize] {
                VpNode::Leaf { items } => {
                    let seqs: Vec<String> = items
                        .iter()
                        .map(|&i| String::from_utf8_lossy(&self.items[i as usize].sequence).into_owned())
                        .collect();
                    let _ = writeln!(out, "{}{}: leaf [{}]", indent, label, seqs.join(" "));
                }
                VpNode::Inner { pivot, radius, near, far } => {
                    let p = String::from_utf8_lossy(&self.items[*pivot as usize].sequence);
                    let shown = if *radius > self.metric_cap {
                        format!(">{}", self.metric_cap)
                    } else {
                        radius.to_string()
                    };
                    let _ = writeln!(
                        out,
                        "{}{}: pivot {} r={} near={} far={}",
                        indent,
                        label,
                        p,
                        shown,
                        near.map_or(0, |c| self.subtree_size(c)),
                        far.map_or(0, |c| self.subtree_size(c)),
                    );
                    if level + 1 < levels {
                        if let Some(f) = far {
                            stack.push((*f, level + 1, "far"));
                        }
                        if let Some(nr) = near {
                            stack.push((*nr, level + 1, "near"));
                        }
                    }
                }
            }
        }
        out
    }

    fn subtree_size(&self, node: u32) -> usize {
        let mut total = 0;
        let mut stack = vec![node];
        while let Some(n) = stack.pop() {
            match &self.nodes[n as usize] {
                VpNode::Leaf { items } => total += items.len(),
                VpNode::Inner { near, far, .. } => {
                    total += 1;
                    stack.extend(near.iter().chain(far.iter()).copied());
                }
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::Strand;
    use crate::motif::{ExtensionSide, MotifSpec};

    fn engine(ext: ExtensionSide, d: i32) -> AlignmentEngine {
        let m = MotifSpec::new("toy", "NNNNNNNNXXX", "XXXXXXXXNGG", true, true, d, ext).unwrap();
        AlignmentEngine::new(&m)
    }

    fn random_items(n: usize, len: usize, seed: u32) -> Vec<CandidateRecord> {
        let mut x = seed;
        (0..n)
            .map(|i| {
                let sequence = (0..len)
                    .map(|_| {
                        x = x.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                        dna::ACGT[(x >> 16) as usize % 4]
                    })
                    .collect();
                CandidateRecord { sequence, position: i as u64, strand: Strand::Forward, contig: 0 }
            })
            .collect()
    }

    fn brute_force(engine: &AlignmentEngine, items: &[CandidateRecord], guide: &[u8], d: u32) -> Vec<Hit> {
        let mut buf = EditBuffer::new();
        let mut hits: Vec<Hit> = items
            .iter()
            .filter_map(|c| engine.within(guide, &c.sequence, d, &mut buf).map(|dist| Hit::new(c, dist)))
            .collect();
        hits.sort();
        hits
    }

    #[test]
    fn agrees_with_brute_force() {
        for ext in [ExtensionSide::ThreePrime, ExtensionSide::FivePrime] {
            let e = engine(ext, 2);
            let mut items = random_items(300, 10, 11);
            // near-duplicates so that hits exist at every distance
            let base = items[0].sequence.clone();
            for k in 0..10 {
                let mut s = base.clone();
                s[k % 10] = b'A';
                s.rotate_left(k % 3);
                items.push(CandidateRecord { sequence: s, position: 1_000 + k as u64, strand: Strand::Reverse, contig: 1 });
            }
            for pivot in [PivotRule::First, PivotRule::Random { seed: 5 }] {
                let opts = TreeOptions { leaf_size: 4, metric_cap: 2, pivot };
                let tree = VpTree::build(items.clone(), &e, &opts);
                assert_eq!(tree.len(), items.len());
                let mut buf = EditBuffer::new();
                for guide in [&base[..8], b"NNACGTAC".as_slice(), &items[7].sequence[..8]] {
                    for d in 0..=2 {
                        let mut got = Vec::new();
                        tree.search(&e, guide, d, &mut buf, &mut got);
                        got.sort();
                        assert_eq!(got, brute_force(&e, &items, guide, d));
                    }
                }
            }
        }
    }

    #[test]
    fn flank_only_differences_stay_reachable() {
        // same anchored region, different extension bases
        let e = engine(ExtensionSide::ThreePrime, 2);
        let mk = |s: &[u8], p: u64| CandidateRecord { sequence: s.to_vec(), position: p, strand: Strand::Forward, contig: 0 };
        let items = vec![
            mk(b"ACGTACGTAA", 0),
            mk(b"ACGTACGTCC", 1),
            mk(b"TTTTACGTGG", 2),
            mk(b"GGGGCCCCAA", 3),
            mk(b"ACGTACGTTT", 4),
        ];
        let tree = VpTree::build(items, &e, &TreeOptions { leaf_size: 1, metric_cap: 2, pivot: PivotRule::First });
        let mut hits = Vec::new();
        tree.search(&e, b"ACGTACGT", 0, &mut EditBuffer::new(), &mut hits);
        let mut pos: Vec<u64> = hits.iter().map(|h| h.position).collect();
        pos.sort_unstable();
        assert_eq!(pos, vec![0, 1, 4]);
    }

    #[test]
    fn identical_items_build_a_chain_without_recursion() {
        let e = engine(ExtensionSide::ThreePrime, 1);
        let items: Vec<CandidateRecord> = (0..2_000)
            .map(|i| CandidateRecord { sequence: b"ACGTACGTA".to_vec(), position: i, strand: Strand::Forward, contig: 0 })
            .collect();
        let tree = VpTree::build(items, &e, &TreeOptions { leaf_size: 1, metric_cap: 1, pivot: PivotRule::First });
        assert!(tree.depth() > 1_000);
        let mut hits = Vec::new();
        tree.search(&e, b"ACGTACGT", 0, &mut EditBuffer::new(), &mut hits);
        assert_eq!(hits.len(), 2_000);
    }

    #[test]
    fn validate_rejects_broken_links() {
        let e = engine(ExtensionSide::ThreePrime, 1);
        let opts = TreeOptions { leaf_size: 2, metric_cap: 1, pivot: PivotRule::First };
        let tree = VpTree::build(random_items(30, 9, 4), &e, &opts);
        tree.validate().unwrap();
        VpTree::build(Vec::new(), &e, &opts).validate().unwrap();

        let mut bad_pivot = tree.clone();
        if let VpNode::Inner { pivot, .. } = &mut bad_pivot.nodes[0] {
            *pivot = 999;
        }
        assert!(matches!(bad_pivot.validate(), Err(OffTargetError::CorruptDatabase(_))));

        // a child pointing back at the root would loop forever
        let mut cycle = tree.clone();
        if let VpNode::Inner { near, .. } = &mut cycle.nodes[0] {
            *near = Some(0);
        }
        assert!(cycle.validate().is_err());

        let mut dangling = tree.clone();
        if let VpNode::Inner { far, .. } = &mut dangling.nodes[0] {
            *far = Some(10_000);
        }
        assert!(dangling.validate().is_err());

        let mut lost = tree;
        lost.items.push(lost.items[0].clone());
        assert!(lost.validate().is_err());
    }

    #[test]
    fn huge_metric_cap_does_not_overflow() {
        let e = engine(ExtensionSide::ThreePrime, 1);
        let items = random_items(50, 9, 8);
        let opts = TreeOptions { leaf_size: 2, metric_cap: u32::MAX, pivot: PivotRule::First };
        let tree = VpTree::build(items.clone(), &e, &opts);
        let mut got = Vec::new();
        tree.search(&e, &items[3].sequence[..8], 1, &mut EditBuffer::new(), &mut got);
        got.sort();
        assert_eq!(got, brute_force(&e, &items, &items[3].sequence[..8], 1));
    }

    #[test]
    fn render_lists_top_levels() {
        let e = engine(ExtensionSide::ThreePrime, 1);
        let tree = VpTree::build(random_items(40, 9, 3), &e, &TreeOptions { leaf_size: 4, metric_cap: 1, pivot: PivotRule::First });
        let text = tree.render(2);
        assert!(text.starts_with("root: pivot "));
        assert!(text.lines().count() <= 3);
        assert!(text.lines().skip(1).all(|l| l.starts_with("  ")));
        let empty = VpTree::build(Vec::new(), &e, &TreeOptions { leaf_size: 4, metric_cap: 1, pivot: PivotRule::First });
        assert_eq!(empty.render(3), "(empty)\n");
        assert_eq!(empty.depth(), 0);
    }
}
