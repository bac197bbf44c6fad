//! 计数草图（count-min sketch）索引。
//!
//! 每个候选以其锚定端 L 个碱基为 key 计数。估计值取 k 行计数器中的最小值，
//! 永远不小于真实次数（只可能因哈希碰撞而偏大），计数器在 `max_count` 处饱和。
//!
//! 尺寸：深度 `k = ceil(ln(1/p))`，宽度 `ceil(e * N)`（至少 64）；
//! 行内下标用 Kirsch–Mitzenmacher 双哈希 `h1 + r * h2` 生成。

use std::hash::Hasher;
use std::path::Path;

use log::{debug, info};
use rayon::prelude::*;
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};

use crate::error::{OffTargetError, Result};
use crate::genome::CandidateRecord;
use crate::motif::MotifSpec;
use crate::util::dna;

use super::prefix::edit_neighbourhood;
use super::storage;

const MIN_WIDTH: usize = 64;
const DEFAULT_SEEDS: [u64; 2] = [0x243f_6a88_85a3_08d3, 0x1319_8a2e_0370_7344];

/// Counter storage, sized by `max_count`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum Counters {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl Counters {
    fn zeroed(len: usize, max_count: u32) -> Self {
        if max_count <= u32::from(u8::MAX) {
            Counters::U8(vec![0; len])
        } else if max_count <= u32::from(u16::MAX) {
            Counters::U16(vec![0; len])
        } else {
            Counters::U32(vec![0; len])
        }
    }

    fn len(&self) -> usize {
        match self {
            Counters::U8(v) => v.len(),
            Counters::U16(v) => v.len(),
            Counters::U32(v) => v.len(),
        }
    }

    #[inline]
    fn get(&self, i: usize) -> u32 {
        match self {
            Counters::U8(v) => u32::from(v[i]),
            Counters::U16(v) => u32::from(v[i]),
            Counters::U32(v) => v[i],
        }
    }

    /// `max` always fits the variant chosen by [`zeroed`](Self::zeroed).
    #[inline]
    fn add(&mut self, i: usize, by: u32, max: u32) {
        let next = self.get(i).saturating_add(by).min(max);
        match self {
            Counters::U8(v) => v[i] = next as u8,
            Counters::U16(v) => v[i] = next as u16,
            Counters::U32(v) => v[i] = next,
        }
    }

    fn width_bits(&self) -> u32 {
        match self {
            Counters::U8(_) => 8,
            Counters::U16(_) => 16,
            Counters::U32(_) => 32,
        }
    }
}

/// 二维饱和计数表：`depth` 行 × `width` 列，按行展平存储。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SketchTable {
    depth: usize,
    width: usize,
    max_count: u32,
    seeds: [u64; 2],
    counters: Counters,
}

impl SketchTable {
    /// Sizes a table for `items` insertions at error probability `probability_of_error`.
    pub fn for_items(items: u64, probability_of_error: f64, max_count: u32) -> Result<Self> {
        if !(probability_of_error > 0.0 && probability_of_error < 1.0) {
            return Err(OffTargetError::config(format!(
                "probability of error must be in (0, 1), got {}",
                probability_of_error
            )));
        }
        let depth = ((1.0 / probability_of_error).ln().ceil() as usize).max(1);
        let width = ((std::f64::consts::E * items as f64).ceil() as usize).max(MIN_WIDTH);
        Self::with_dimensions(depth, width, max_count)
    }

    pub fn with_dimensions(depth: usize, width: usize, max_count: u32) -> Result<Self> {
        if max_count == 0 {
            return Err(OffTargetError::config("max_count must be at least 1"));
        }
        if depth == 0 || width == 0 {
            return Err(OffTargetError::config("sketch dimensions must be non-zero"));
        }
        let cells = depth
            .checked_mul(width)
            .ok_or_else(|| OffTargetError::config(format!("sketch of {} x {} counters is too large", depth, width)))?;
        Ok(Self {
            depth,
            width,
            max_count,
            seeds: DEFAULT_SEEDS,
            counters: Counters::zeroed(cells, max_count),
        })
    }

    /// An all-zero table with the same shape and hash family.
    pub fn empty_like(&self) -> Self {
        Self {
            depth: self.depth,
            width: self.width,
            max_count: self.max_count,
            seeds: self.seeds,
            counters: Counters::zeroed(self.counters.len(), self.max_count),
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn max_count(&self) -> u32 {
        self.max_count
    }

    pub fn counter_bits(&self) -> u32 {
        self.counters.width_bits()
    }

    fn hashes(&self, key: &[u8]) -> (u64, u64) {
        let h = |seed: u64| {
            let mut hasher = FxHasher::default();
            hasher.write_u64(seed);
            hasher.write(key);
            splitmix64(hasher.finish())
        };
        (h(self.seeds[0]), h(self.seeds[1]) | 1)
    }

    #[inline]
    fn slot(&self, row: usize, h1: u64, h2: u64) -> usize {
        let col = h1.wrapping_add((row as u64).wrapping_mul(h2)) % self.width as u64;
        row * self.width + col as usize
    }

    pub fn insert(&mut self, key: &[u8]) {
        self.add(key, 1);
    }

    /// 每一行对应的计数器加 `count`，在 `max_count` 处饱和。
    pub fn add(&mut self, key: &[u8], count: u32) {
        let (h1, h2) = self.hashes(key);
        for row in 0..self.depth {
            let i = self.slot(row, h1, h2);
            self.counters.add(i, count, self.max_count);
        }
    }

    /// Minimum over the key's counters: never below the true count, never above `max_count`.
    pub fn estimate(&self, key: &[u8]) -> u32 {
        let (h1, h2) = self.hashes(key);
        (0..self.depth)
            .map(|row| self.counters.get(self.slot(row, h1, h2)))
            .min()
            .unwrap_or(0)
    }

    /// Cell-wise saturating sum. Both tables must share shape and hash family.
    pub fn merge(&mut self, other: &SketchTable) -> Result<()> {
        if self.depth != other.depth || self.width != other.width || self.seeds != other.seeds {
            return Err(OffTargetError::config("cannot merge sketches of different shape"));
        }
        for i in 0..self.counters.len() {
            let v = other.counters.get(i);
            if v > 0 {
                self.counters.add(i, v, self.max_count);
            }
        }
        Ok(())
    }

    /// Number of counters stuck at `max_count`.
    pub fn saturated_counters(&self) -> usize {
        (0..self.counters.len()).filter(|&i| self.counters.get(i) >= self.max_count).count()
    }

    fn validate(&self) -> Result<()> {
        let cells = self.depth.checked_mul(self.width);
        if cells != Some(self.counters.len()) || self.max_count == 0 || self.width == 0 {
            return Err(OffTargetError::CorruptDatabase("sketch table shape does not match its counters".into()));
        }
        if Counters::zeroed(0, self.max_count).width_bits() != self.counters.width_bits() {
            return Err(OffTargetError::CorruptDatabase(format!(
                "{}-bit counters cannot hold max_count {}",
                self.counters.width_bits(),
                self.max_count
            )));
        }
        Ok(())
    }
}

/// splitmix64 终结函数，打散 FxHash 的低位。
#[inline]
fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Estimates reported for one guide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SketchEstimate {
    /// Distance-0 estimate.
    pub estimate: u64,
    /// Sum of estimates over every ACGT key within the requested distance; `None` for distance 0.
    pub neighbourhood: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct SketchIndex {
    table: SketchTable,
    guide_len: usize,
}

impl SketchIndex {
    pub fn from_table(table: SketchTable, guide_len: usize) -> Self {
        Self { table, guide_len }
    }

    /// Counts every candidate's anchored key, one parallel fold per group of buckets.
    pub fn build(
        buckets: &[(String, Vec<CandidateRecord>)],
        motif: &MotifSpec,
        probability_of_error: f64,
        max_count: u32,
    ) -> Result<Self> {
        let total: u64 = buckets.iter().map(|(_, b)| b.len() as u64).sum();
        let empty = SketchTable::for_items(total, probability_of_error, max_count)?;
        info!(
            "sketch: {} candidates, depth {}, width {}, {}-bit counters",
            total,
            empty.depth(),
            empty.width(),
            empty.counter_bits()
        );

        let partials: Vec<SketchTable> = buckets
            .par_iter()
            .fold(
                || empty.empty_like(),
                |mut table, (key, bucket)| {
                    debug!("sketch bucket {}: {} candidates", key, bucket.len());
                    for c in bucket {
                        table.insert(motif.guide_region(&c.sequence));
                    }
                    table
                },
            )
            .collect();

        let mut table = empty;
        for part in &partials {
            table.merge(part)?;
        }
        let saturated = table.saturated_counters();
        if saturated > 0 {
            info!("sketch: {} counters saturated at max_count {}", saturated, max_count);
        }
        Ok(Self { table, guide_len: motif.guide_len() })
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        storage::save(&dir.join(storage::SKETCH_FILE), &self.table)
    }

    pub fn open(dir: &Path, guide_len: usize) -> Result<Self> {
        let table: SketchTable = storage::load(&dir.join(storage::SKETCH_FILE))?;
        table.validate()?;
        Ok(Self { table, guide_len })
    }

    pub fn table(&self) -> &SketchTable {
        &self.table
    }

    /// Distance-0 estimate, never above `max_count`. A guide with IUPAC codes
    /// sums over its concrete expansions before the cap.
    pub fn estimate(&self, guide: &[u8]) -> u64 {
        if guide.iter().all(|&b| dna::is_concrete(b)) {
            return u64::from(self.table.estimate(guide));
        }
        self.neighbourhood_sum(guide, 0).min(u64::from(self.table.max_count()))
    }

    /// Sum of estimates over every ACGT key within `distance` edits of the guide.
    pub fn neighbourhood_sum(&self, guide: &[u8], distance: u32) -> u64 {
        let mut sum = 0u64;
        edit_neighbourhood(guide, self.guide_len, distance, false, |key| {
            sum += u64::from(self.table.estimate(key));
        });
        sum
    }

    pub fn search(&self, guide: &[u8], distance: u32) -> SketchEstimate {
        SketchEstimate {
            estimate: self.estimate(guide),
            neighbourhood: (distance > 0).then(|| self.neighbourhood_sum(guide, distance)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::Strand;
    use crate::motif::ExtensionSide;

    fn lcg_keys(n: usize, len: usize, seed: u32) -> Vec<Vec<u8>> {
        let mut x = seed;
        (0..n)
            .map(|_| {
                (0..len)
                    .map(|_| {
                        x = x.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                        dna::ACGT[(x >> 16) as usize % 4]
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn saturates_at_max_count() {
        let mut t = SketchTable::for_items(7, 0.001, 5).unwrap();
        for _ in 0..7 {
            t.insert(b"ACGTACGT");
        }
        assert_eq!(t.estimate(b"ACGTACGT"), 5);
        assert!(t.saturated_counters() >= t.depth());
    }

    #[test]
    fn never_undercounts() {
        let keys = lcg_keys(2_000, 8, 7);
        let mut t = SketchTable::for_items(keys.len() as u64, 0.01, 255).unwrap();
        let mut truth: rustc_hash::FxHashMap<&[u8], u32> = Default::default();
        for k in &keys {
            t.insert(k);
            *truth.entry(k.as_slice()).or_default() += 1;
        }
        for (k, n) in truth {
            assert!(t.estimate(k) >= n.min(255));
        }
    }

    #[test]
    fn counter_width_follows_max_count() {
        assert_eq!(SketchTable::with_dimensions(2, 64, 255).unwrap().counter_bits(), 8);
        assert_eq!(SketchTable::with_dimensions(2, 64, 256).unwrap().counter_bits(), 16);
        assert_eq!(SketchTable::with_dimensions(2, 64, 70_000).unwrap().counter_bits(), 32);
    }

    #[test]
    fn sizing_and_validation() {
        let t = SketchTable::for_items(1_000, 0.001, 255).unwrap();
        assert_eq!(t.depth(), 7);
        assert_eq!(t.width(), 2_719);
        assert!(SketchTable::for_items(10, 0.0, 255).is_err());
        assert!(SketchTable::for_items(10, 1.0, 255).is_err());
        assert!(SketchTable::for_items(10, 0.1, 0).is_err());
    }

    #[test]
    fn merge_is_saturating_sum() {
        let mut a = SketchTable::with_dimensions(3, 64, 5).unwrap();
        let mut b = a.empty_like();
        a.add(b"AC", 3);
        b.add(b"AC", 4);
        a.merge(&b).unwrap();
        assert_eq!(a.estimate(b"AC"), 5);
        let other = SketchTable::with_dimensions(2, 64, 5).unwrap();
        assert!(a.merge(&other).is_err());
    }

    #[test]
    fn index_counts_anchored_keys_and_expands_wildcards() {
        let motif = MotifSpec::new("toy", "NNNXXX", "XXXNGG", true, true, 1, ExtensionSide::ThreePrime).unwrap();
        let rec = |s: &[u8]| CandidateRecord {
            sequence: s.to_vec(),
            position: 0,
            strand: Strand::Forward,
            contig: 0,
        };
        let buckets = vec![
            ("AA".to_string(), vec![rec(b"AAAC"), rec(b"AAAG")]),
            ("CA".to_string(), vec![rec(b"CAAT")]),
        ];
        let idx = SketchIndex::build(&buckets, &motif, 0.001, 255).unwrap();
        assert!(idx.estimate(b"AAA") >= 2);
        assert!(idx.estimate(b"NAA") >= 3);
        let est = idx.search(b"AAA", 1);
        assert!(est.neighbourhood.unwrap() >= 3);
        assert_eq!(idx.search(b"AAA", 0).neighbourhood, None);

        // expansions add up past the ceiling, the reported estimate does not
        let capped = SketchIndex::build(&buckets, &motif, 0.001, 2).unwrap();
        assert_eq!(capped.estimate(b"AAA"), 2);
        assert_eq!(capped.estimate(b"NAA"), 2);
        assert!(capped.neighbourhood_sum(b"NAA", 0) >= 3);
    }

    #[test]
    fn save_and_open() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = SketchTable::with_dimensions(2, 64, 9).unwrap();
        t.insert(b"ACG");
        let idx = SketchIndex::from_table(t, 3);
        idx.save(dir.path()).unwrap();
        let back = SketchIndex::open(dir.path(), 3).unwrap();
        assert_eq!(back.table(), idx.table());
        assert_eq!(back.estimate(b"ACG"), 1);
    }
}
