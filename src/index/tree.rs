use std::path::Path;

use log::{debug, info};
use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::align::{AlignmentEngine, EditBuffer};
use crate::error::{OffTargetError, Result};
use crate::genome::CandidateRecord;

use super::prefix::PrefixPartitioner;
use super::vptree::{TreeOptions, VpTree};
use super::{storage, Hit};

/// 每个前缀桶一棵 VP 树。
#[derive(Debug, Clone)]
pub struct TreeIndex {
    partitioner: PrefixPartitioner,
    trees: FxHashMap<String, VpTree>,
}

impl TreeIndex {
    /// Builds one tree per bucket in parallel.
    pub fn build(
        partitioner: PrefixPartitioner,
        buckets: Vec<(String, Vec<CandidateRecord>)>,
        engine: &AlignmentEngine,
        opts: &TreeOptions,
    ) -> Self {
        let trees: FxHashMap<String, VpTree> = buckets
            .into_par_iter()
            .map(|(key, bucket)| {
                let tree = VpTree::build(bucket, engine, opts);
                debug!("tree bucket {}: {} items, depth {}", key, tree.len(), tree.depth());
                (key, tree)
            })
            .collect();
        Self { partitioner, trees }
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        let out = dir.join(storage::TREE_DIR);
        std::fs::create_dir_all(&out)?;
        self.trees
            .par_iter()
            .try_for_each(|(key, tree)| storage::save(&storage::bucket_file(&out, key), tree))?;
        info!("tree index: {} buckets written to {}", self.trees.len(), out.display());
        Ok(())
    }

    pub fn open(dir: &Path, partitioner: PrefixPartitioner) -> Result<Self> {
        let files = storage::list_buckets(&dir.join(storage::TREE_DIR), partitioner.len())?;
        let trees = files
            .par_iter()
            .map(|(key, path)| {
                let tree: VpTree = storage::load(path)?;
                tree.validate()?;
                Ok((key.clone(), tree))
            })
            .collect::<Result<FxHashMap<_, _>>>()?;
        Ok(Self { partitioner, trees })
    }

    pub fn bucket_count(&self) -> usize {
        self.trees.len()
    }

    pub fn candidate_count(&self) -> usize {
        self.trees.values().map(VpTree::len).sum()
    }

    pub fn tree(&self, key: &str) -> Option<&VpTree> {
        self.trees.get(key)
    }

    pub fn search(
        &self,
        engine: &AlignmentEngine,
        guide: &[u8],
        distance: u32,
        buf: &mut EditBuffer,
        out: &mut Vec<Hit>,
    ) {
        for key in self.partitioner.reachable_keys(guide, distance) {
            if let Some(tree) = self.trees.get(&key) {
                tree.search(engine, guide, distance, buf, out);
            }
        }
    }

    /// Renders the top `levels` of one bucket's tree, or of the first bucket
    /// in key order when `prefix` is `None`.
    pub fn inspect(&self, prefix: Option<&str>, levels: usize) -> Result<String> {
        let key = match prefix {
            Some(p) => p.to_ascii_uppercase(),
            None => self
                .trees
                .keys()
                .min()
                .cloned()
                .ok_or_else(|| OffTargetError::config("tree index has no buckets"))?,
        };
        if key.len() != self.partitioner.len() {
            return Err(OffTargetError::config(format!(
                "bucket prefix '{}' must have length {}",
                key,
                self.partitioner.len()
            )));
        }
        let tree = self
            .trees
            .get(&key)
            .ok_or_else(|| OffTargetError::config(format!("no bucket '{}' in this database", key)))?;
        Ok(format!(
            "bucket {}: {} items, {} nodes, depth {}\n{}",
            key,
            tree.len(),
            tree.node_count(),
            tree.depth(),
            tree.render(levels)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::Strand;
    use crate::index::linear::LinearIndex;
    use crate::index::vptree::PivotRule;
    use crate::motif::{ExtensionSide, MotifSpec};
    use crate::util::dna;

    fn candidates(n: usize, len: usize) -> Vec<CandidateRecord> {
        let mut x: u32 = 17;
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

    #[test]
    fn matches_linear_index() {
        let m = MotifSpec::new("toy", "NNNNNNXXX", "XXXXXXNGG", true, true, 2, ExtensionSide::FivePrime).unwrap();
        let engine = AlignmentEngine::new(&m);
        let part = PrefixPartitioner::new(2, &m).unwrap();
        let cands = candidates(2_000, 8);
        let opts = TreeOptions { leaf_size: 8, metric_cap: 2, pivot: PivotRule::First };
        let tree = TreeIndex::build(part, part.partition(cands.clone()), &engine, &opts);
        let linear = LinearIndex::from_buckets(part, part.partition(cands.clone()));
        assert_eq!(tree.candidate_count(), linear.candidate_count());

        let mut buf = EditBuffer::new();
        for c in cands.iter().step_by(97) {
            let guide = engine.anchored_region(&c.sequence).to_vec();
            for d in 0..=2 {
                let (mut a, mut b) = (Vec::new(), Vec::new());
                tree.search(&engine, &guide, d, &mut buf, &mut a);
                linear.search(&engine, &guide, d, &mut buf, &mut b);
                a.sort();
                b.sort();
                assert_eq!(a, b);
                assert!(a.iter().any(|h| h.position == c.position));
            }
        }
    }

    #[test]
    fn inspect_validates_prefix() {
        let m = MotifSpec::new("toy", "NNNNXXX", "XXXXNGG", true, true, 1, ExtensionSide::ThreePrime).unwrap();
        let engine = AlignmentEngine::new(&m);
        let part = PrefixPartitioner::new(2, &m).unwrap();
        let opts = TreeOptions { leaf_size: 2, metric_cap: 1, pivot: PivotRule::First };
        let tree = TreeIndex::build(part, part.partition(candidates(50, 5)), &engine, &opts);
        let first = tree.inspect(None, 2).unwrap();
        assert!(first.starts_with("bucket "));
        assert!(tree.inspect(Some("ACG"), 2).is_err());

        let dir = tempfile::tempdir().unwrap();
        tree.save(dir.path()).unwrap();
        let back = TreeIndex::open(dir.path(), part).unwrap();
        assert_eq!(back.bucket_count(), tree.bucket_count());
        assert_eq!(back.inspect(None, 2).unwrap(), first);
    }
}
