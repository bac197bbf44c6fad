//! 有界编辑距离比对引擎。
//!
//! guide（长度 L）与候选序列（长度 L + D）之间的比对：
//! - 从延伸方向的另一端（锚定端）开始，起点必须对齐；
//! - 延伸端多出的候选碱基不计代价；
//! - 错配 / 插入 / 删除代价均为 1，IUPAC 兼容的碱基（如 `N`）代价为 0；
//! - 只计算宽度 2D+1 的对角带，结果超过上限时返回 `None`。

pub mod edit;

pub use edit::{ops_to_cigar, EditBuffer, EditOp};

use crate::error::{OffTargetError, Result};
use crate::motif::MotifSpec;
use crate::util::dna;

/// Gapped rendering of one guide/candidate alignment, 5'->3'.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alignment {
    pub distance: u32,
    pub guide: String,
    pub reference: String,
    pub cigar: String,
}

/// Shared comparator used by every index at build and query time.
#[derive(Debug, Clone, Copy)]
pub struct AlignmentEngine {
    guide_len: usize,
    max_distance: u32,
    anchored_at_end: bool,
}

impl AlignmentEngine {
    pub fn new(motif: &MotifSpec) -> Self {
        Self {
            guide_len: motif.guide_len(),
            max_distance: motif.distance(),
            anchored_at_end: motif.anchored_at_end(),
        }
    }

    pub fn guide_len(&self) -> usize {
        self.guide_len
    }

    pub fn max_distance(&self) -> u32 {
        self.max_distance
    }

    pub fn check_guide(&self, guide: &[u8]) -> Result<()> {
        if guide.len() != self.guide_len {
            return Err(OffTargetError::InvalidLength { expected: self.guide_len, actual: guide.len() });
        }
        Ok(())
    }

    /// Checked entry point: validates the guide length and the distance bound.
    pub fn distance(&self, guide: &[u8], candidate: &[u8], max: u32) -> Result<Option<u32>> {
        self.check_guide(guide)?;
        if max > self.max_distance {
            return Err(OffTargetError::DistanceExceedsBuild { requested: max, built: self.max_distance });
        }
        Ok(self.within(guide, candidate, max, &mut EditBuffer::new()))
    }

    /// Anchored, wildcard-aware distance bounded by `cap`. No argument checks.
    #[inline]
    pub fn within(&self, guide: &[u8], candidate: &[u8], cap: u32, buf: &mut EditBuffer) -> Option<u32> {
        let (m, n) = (guide.len(), candidate.len());
        if self.anchored_at_end {
            edit::bounded_distance(
                m,
                n,
                cap,
                true,
                |i, j| dna::compatible(guide[m - 1 - i], candidate[n - 1 - j]),
                buf,
            )
        } else {
            edit::bounded_distance(m, n, cap, true, |i, j| dna::compatible(guide[i], candidate[j]), buf)
        }
    }

    /// 候选序列之间的度量：严格相等的全局 Levenshtein 距离（满足三角不等式），
    /// 用于构建 VP 树；超过 `cap` 返回 `None`。
    #[inline]
    pub fn metric(&self, a: &[u8], b: &[u8], cap: u32, buf: &mut EditBuffer) -> Option<u32> {
        edit::bounded_distance(a.len(), b.len(), cap, false, |i, j| a[i] == b[j], buf)
    }

    /// The L candidate bases at the anchored end.
    #[inline]
    pub fn anchored_region<'a>(&self, candidate: &'a [u8]) -> &'a [u8] {
        let l = self.guide_len.min(candidate.len());
        if self.anchored_at_end {
            &candidate[candidate.len() - l..]
        } else {
            &candidate[..l]
        }
    }

    /// Global, wildcard-aware distance between a guide and an anchored region.
    ///
    /// Never more than twice [`within`](Self::within) for the region's candidate,
    /// and within one strict [`metric`](Self::metric) step of any other region.
    #[inline]
    pub fn region_distance(&self, guide: &[u8], region: &[u8], cap: u32, buf: &mut EditBuffer) -> Option<u32> {
        edit::bounded_distance(guide.len(), region.len(), cap, false, |i, j| dna::compatible(guide[i], region[j]), buf)
    }

    /// Traced alignment for detailed output.
    pub fn align(&self, guide: &[u8], candidate: &[u8], cap: u32) -> Option<Alignment> {
        let mut buf = EditBuffer::new();
        let oriented = |s: &[u8]| -> Vec<u8> {
            if self.anchored_at_end {
                s.iter().rev().copied().collect()
            } else {
                s.to_vec()
            }
        };
        let g = oriented(guide);
        let c = oriented(candidate);
        let (distance, _end, ops) =
            edit::bounded_alignment(g.len(), c.len(), cap, true, |i, j| dna::compatible(g[i], c[j]), &mut buf)?;

        let mut ga = Vec::with_capacity(ops.len());
        let mut ra = Vec::with_capacity(ops.len());
        let (mut i, mut j) = (0usize, 0usize);
        for &op in &ops {
            match op {
                EditOp::Match => {
                    ga.push(g[i]);
                    ra.push(c[j]);
                    i += 1;
                    j += 1;
                }
                EditOp::Insertion => {
                    ga.push(g[i]);
                    ra.push(b'-');
                    i += 1;
                }
                EditOp::Deletion => {
                    ga.push(b'-');
                    ra.push(c[j]);
                    j += 1;
                }
            }
        }

        let mut ops = ops;
        if self.anchored_at_end {
            ga.reverse();
            ra.reverse();
            ops.reverse();
        }
        Some(Alignment {
            distance,
            guide: String::from_utf8_lossy(&ga).into_owned(),
            reference: String::from_utf8_lossy(&ra).into_owned(),
            cigar: ops_to_cigar(&ops),
        })
    }
}
