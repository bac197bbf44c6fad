use log::warn;
use rustc_hash::FxHashMap;

use crate::error::{OffTargetError, Result};
use crate::genome::CandidateRecord;
use crate::motif::MotifSpec;
use crate::util::dna;

/// 前缀分桶：按锚定端的 P 个碱基（5'→3' 书写）把候选序列分组。
///
/// 构建时用 [`key_of`](Self::key_of) 决定每个候选所在的桶；查询时用
/// [`reachable_keys`](Self::reachable_keys) 枚举所有在 d 次编辑内可达的桶，
/// 保证不漏检。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefixPartitioner {
    len: usize,
    anchored_at_end: bool,
}

impl PrefixPartitioner {
    pub fn new(len: usize, motif: &MotifSpec) -> Result<Self> {
        if len == 0 || len > motif.guide_len() {
            return Err(OffTargetError::config(format!(
                "prefix length must be within 1..={}, got {}",
                motif.guide_len(),
                len
            )));
        }
        if len <= motif.distance() as usize {
            warn!(
                "prefix length {} is not larger than the distance {}; every guide will visit many buckets",
                len,
                motif.distance()
            );
        }
        Ok(Self { len, anchored_at_end: motif.anchored_at_end() })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bucket key of a candidate (or guide): its P anchored-end bases.
    pub fn key_of(&self, seq: &[u8]) -> String {
        let p = self.len.min(seq.len());
        let part = if self.anchored_at_end { &seq[seq.len() - p..] } else { &seq[..p] };
        String::from_utf8_lossy(part).into_owned()
    }

    /// Groups candidates by bucket key. Buckets come back sorted by key and keep
    /// the input order of their members.
    pub fn partition<I>(&self, candidates: I) -> Vec<(String, Vec<CandidateRecord>)>
    where
        I: IntoIterator<Item = CandidateRecord>,
    {
        let mut map: FxHashMap<String, Vec<CandidateRecord>> = FxHashMap::default();
        for c in candidates {
            map.entry(self.key_of(&c.sequence)).or_default().push(c);
        }
        let mut buckets: Vec<(String, Vec<CandidateRecord>)> = map.into_iter().collect();
        buckets.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        buckets
    }

    /// Every ACGT bucket key whose sequence lies within `distance` edits of some
    /// prefix of the guide's first P + `distance` anchored bases. Sorted.
    pub fn reachable_keys(&self, guide: &[u8], distance: u32) -> Vec<String> {
        let take = (self.len + distance as usize).min(guide.len());
        let oriented: Vec<u8> = if self.anchored_at_end {
            guide[guide.len() - take..].iter().rev().copied().collect()
        } else {
            guide[..take].to_vec()
        };

        let mut keys = Vec::new();
        edit_neighbourhood(&oriented, self.len, distance, true, |s| {
            let key: Vec<u8> = if self.anchored_at_end { s.iter().rev().copied().collect() } else { s.to_vec() };
            keys.push(String::from_utf8_lossy(&key).into_owned());
        });
        keys.sort_unstable();
        keys
    }
}

/// 在 ACGT 字母树上做深度优先搜索，对 `pattern` 维护一行编辑距离 DP 并剪枝，
/// 枚举所有长度为 `len` 且与 `pattern` 距离不超过 `max` 的字符串（每个只输出一次）。
///
/// `free_end` 为真时只要求与 `pattern` 的某个前缀足够接近（用于前缀桶），
/// 且 `pattern` 比对完之后剩余的位置不计代价；否则要求与整条 `pattern`
/// 足够接近（用于 sketch 邻域）。
/// `pattern` 中的 IUPAC 码按兼容规则计 0 代价。
pub fn edit_neighbourhood<F>(pattern: &[u8], len: usize, max: u32, free_end: bool, mut emit: F)
where
    F: FnMut(&[u8]),
{
    let row0: Vec<u32> = (0..=pattern.len() as u32).collect();
    let mut prefix = Vec::with_capacity(len);
    walk(pattern, len, max, free_end, &row0, &mut prefix, &mut emit);
}

fn walk<F>(
    pattern: &[u8],
    len: usize,
    max: u32,
    free_end: bool,
    row: &[u32],
    prefix: &mut Vec<u8>,
    emit: &mut F,
) where
    F: FnMut(&[u8]),
{
    if prefix.len() == len {
        let best = if free_end { row.iter().copied().min().unwrap_or(u32::MAX) } else { row[pattern.len()] };
        if best <= max {
            emit(prefix);
        }
        return;
    }
    // pattern fully aligned: the rest of the key lies past the free end
    if free_end && row[pattern.len()] <= max {
        complete(len, prefix, emit);
        return;
    }

    let depth = prefix.len() as u32 + 1;
    let mut next = vec![0u32; row.len()];
    for &c in &dna::ACGT {
        next[0] = depth;
        let mut row_min = depth;
        for j in 1..row.len() {
            let sub = row[j - 1] + u32::from(!dna::compatible(c, pattern[j - 1]));
            let v = sub.min(row[j] + 1).min(next[j - 1] + 1);
            next[j] = v;
            row_min = row_min.min(v);
        }
        if row_min > max {
            continue;
        }
        prefix.push(c);
        walk(pattern, len, max, free_end, &next, prefix, emit);
        prefix.pop();
    }
}

/// Emits every ACGT extension of `prefix` to length `len`.
fn complete<F>(len: usize, prefix: &mut Vec<u8>, emit: &mut F)
where
    F: FnMut(&[u8]),
{
    if prefix.len() == len {
        emit(prefix);
        return;
    }
    for &c in &dna::ACGT {
        prefix.push(c);
        complete(len, prefix, emit);
        prefix.pop();
    }
}
