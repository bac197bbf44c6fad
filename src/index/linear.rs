use std::path::Path;

use log::{debug, info};
use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::align::{AlignmentEngine, EditBuffer};
use crate::error::Result;
use crate::genome::CandidateRecord;

use super::prefix::PrefixPartitioner;
use super::{storage, Hit};

/// 按前缀分桶的平铺候选存储；查询时对每个可达桶逐条比对。
#[derive(Debug, Clone)]
pub struct LinearIndex {
    partitioner: PrefixPartitioner,
    buckets: FxHashMap<String, Vec<CandidateRecord>>,
}

impl LinearIndex {
    /// In-memory index. Each bucket is sorted by sequence for locality.
    pub fn from_buckets(partitioner: PrefixPartitioner, buckets: Vec<(String, Vec<CandidateRecord>)>) -> Self {
        let buckets = buckets
            .into_iter()
            .map(|(key, mut bucket)| {
                sort_bucket(&mut bucket);
                (key, bucket)
            })
            .collect();
        Self { partitioner, buckets }
    }

    /// Writes one `linear/<KEY>.bin` file per bucket, in parallel.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let out = dir.join(storage::LINEAR_DIR);
        std::fs::create_dir_all(&out)?;
        self.buckets.par_iter().try_for_each(|(key, bucket)| {
            debug!("linear bucket {}: {} candidates", key, bucket.len());
            storage::save(&storage::bucket_file(&out, key), bucket)
        })?;
        info!("linear index: {} buckets written to {}", self.buckets.len(), out.display());
        Ok(())
    }

    pub fn open(dir: &Path, partitioner: PrefixPartitioner) -> Result<Self> {
        let files = storage::list_buckets(&dir.join(storage::LINEAR_DIR), partitioner.len())?;
        let buckets = files
            .par_iter()
            .map(|(key, path)| Ok((key.clone(), storage::load::<Vec<CandidateRecord>>(path)?)))
            .collect::<Result<FxHashMap<_, _>>>()?;
        Ok(Self { partitioner, buckets })
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn candidate_count(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn bucket(&self, key: &str) -> Option<&[CandidateRecord]> {
        self.buckets.get(key).map(Vec::as_slice)
    }

    /// Appends every candidate within `distance` of the guide to `out`.
    pub fn search(
        &self,
        engine: &AlignmentEngine,
        guide: &[u8],
        distance: u32,
        buf: &mut EditBuffer,
        out: &mut Vec<Hit>,
    ) {
        for key in self.partitioner.reachable_keys(guide, distance) {
            let Some(bucket) = self.buckets.get(&key) else {
                continue;
            };
            for c in bucket {
                if let Some(d) = engine.within(guide, &c.sequence, distance, buf) {
                    out.push(Hit::new(c, d));
                }
            }
        }
    }
}

fn sort_bucket(bucket: &mut [CandidateRecord]) {
    bucket.sort_unstable_by(|a, b| {
        a.sequence
            .cmp(&b.sequence)
            .then(a.contig.cmp(&b.contig))
            .then(a.position.cmp(&b.position))
            .then(a.strand.cmp(&b.strand))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::Strand;
    use crate::motif::{ExtensionSide, MotifSpec};

    fn setup() -> (AlignmentEngine, PrefixPartitioner) {
        let m = MotifSpec::new("toy", "NNNNNXXX", "XXXXXNGG", true, true, 1, ExtensionSide::ThreePrime).unwrap();
        (AlignmentEngine::new(&m), PrefixPartitioner::new(2, &m).unwrap())
    }

    fn rec(s: &[u8], position: u64) -> CandidateRecord {
        CandidateRecord { sequence: s.to_vec(), position, strand: Strand::Forward, contig: 0 }
    }

    #[test]
    fn finds_candidate_in_neighbouring_bucket() {
        let (engine, part) = setup();
        let idx = LinearIndex::from_buckets(part, part.partition(vec![rec(b"ACGTAC", 3), rec(b"TTTTTT", 9)]));
        let mut hits = Vec::new();
        // guide prefix "AG" differs from the bucket "AC" by one substitution
        idx.search(&engine, b"AGGTA", 1, &mut EditBuffer::new(), &mut hits);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].position, 3);
        assert_eq!(hits[0].distance, 1);

        hits.clear();
        idx.search(&engine, b"AGGTA", 0, &mut EditBuffer::new(), &mut hits);
        assert!(hits.is_empty());
    }

    #[test]
    fn save_and_open_answer_identically() {
        let (engine, part) = setup();
        let cands = vec![rec(b"ACGTAC", 0), rec(b"ACGTTC", 1), rec(b"GGGTAC", 2)];
        let idx = LinearIndex::from_buckets(part, part.partition(cands));
        let dir = tempfile::tempdir().unwrap();
        idx.save(dir.path()).unwrap();
        let back = LinearIndex::open(dir.path(), part).unwrap();
        assert_eq!(back.bucket_count(), 2);
        assert_eq!(back.candidate_count(), 3);

        let mut buf = EditBuffer::new();
        let (mut a, mut b) = (Vec::new(), Vec::new());
        idx.search(&engine, b"ACGTA", 1, &mut buf, &mut a);
        back.search(&engine, b"ACGTA", 1, &mut buf, &mut b);
        a.sort();
        b.sort();
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
    }
}
