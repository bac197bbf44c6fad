use std::fmt::Write as _;

const INF: u32 = u32::MAX / 4;

/// DP 工作缓冲区，可跨调用复用（每个 rayon 任务持有一份）
#[derive(Debug, Default)]
pub struct EditBuffer {
    prev: Vec<u32>,
    cur: Vec<u32>,
    full: Vec<u32>,
}

impl EditBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset_rows(&mut self, size: usize) {
        self.prev.clear();
        self.prev.resize(size, INF);
        self.cur.clear();
        self.cur.resize(size, INF);
    }

    fn reset_full(&mut self, size: usize) {
        self.full.clear();
        self.full.resize(size, INF);
    }
}

/// One traced alignment column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditOp {
    /// 对角线：匹配或错配
    Match,
    /// guide 多出一个碱基（参考上为 gap）
    Insertion,
    /// 参考多出一个碱基（guide 上为 gap）
    Deletion,
}

/// 带状有界编辑距离（两行滚动数组）。
///
/// `same(i, j)` 判断第 i 个 query 碱基与第 j 个 target 碱基是否视为相同（0 代价）。
/// 起点 (0, 0) 固定；`free_end` 为真时 target 末尾多余的碱基不计代价（半全局），
/// 否则两条序列都必须比对到底（全局）。
///
/// 只计算 |i - j| <= cap 的带内单元；任意一行全部超过 cap 时立即返回 `None`。
/// 返回值永远不会大于 `cap`。
pub fn bounded_distance<F>(
    m: usize,
    n: usize,
    cap: u32,
    free_end: bool,
    same: F,
    buf: &mut EditBuffer,
) -> Option<u32>
where
    F: Fn(usize, usize) -> bool,
{
    let k = cap as usize;
    if free_end {
        if n.saturating_add(k) < m {
            return None;
        }
    } else if m.abs_diff(n) > k {
        return None;
    }

    buf.reset_rows(n + 1);
    for j in 0..=n.min(k) {
        buf.prev[j] = j as u32;
    }

    // band of the last finished row
    let (mut band_lo, mut band_hi) = (0, n.min(k));
    for i in 1..=m {
        let lo = i.saturating_sub(k);
        let hi = i.saturating_add(k).min(n);
        if lo > hi {
            return None;
        }
        // only the band and its two neighbours are read by this row and the next
        buf.cur[lo.saturating_sub(1)..=(hi + 1).min(n)].fill(INF);

        let mut row_min = INF;
        if lo == 0 {
            buf.cur[0] = i as u32;
            row_min = i as u32;
        }
        for j in lo.max(1)..=hi {
            let sub = buf.prev[j - 1] + u32::from(!same(i - 1, j - 1));
            let del = buf.prev[j] + 1;
            let ins = buf.cur[j - 1] + 1;
            let v = sub.min(del).min(ins);
            buf.cur[j] = v;
            if v < row_min {
                row_min = v;
            }
        }
        if row_min > cap {
            return None;
        }
        std::mem::swap(&mut buf.prev, &mut buf.cur);
        (band_lo, band_hi) = (lo, hi);
    }

    let best = if free_end {
        buf.prev[band_lo..=band_hi].iter().copied().min().unwrap_or(INF)
    } else {
        buf.prev[n]
    };
    (best <= cap).then_some(best)
}

/// 带回溯的版本：保存整张 (m+1) x (n+1) 矩阵，返回距离与编辑操作序列。
/// 只用于输出明细，热路径使用 [`bounded_distance`]。
pub fn bounded_alignment<F>(
    m: usize,
    n: usize,
    cap: u32,
    free_end: bool,
    same: F,
    buf: &mut EditBuffer,
) -> Option<(u32, usize, Vec<EditOp>)>
where
    F: Fn(usize, usize) -> bool,
{
    // the cheap pass decides reachability first
    let distance = bounded_distance(m, n, cap, free_end, &same, buf)?;

    let k = cap as usize;
    let cols = n + 1;
    buf.reset_full((m + 1) * cols);
    let h = &mut buf.full;
    for j in 0..=n.min(k) {
        h[j] = j as u32;
    }
    for i in 1..=m {
        let lo = i.saturating_sub(k);
        let hi = i.saturating_add(k).min(n);
        if lo == 0 {
            h[i * cols] = i as u32;
        }
        for j in lo.max(1)..=hi {
            let sub = h[(i - 1) * cols + j - 1] + u32::from(!same(i - 1, j - 1));
            let del = h[(i - 1) * cols + j] + 1;
            let ins = h[i * cols + j - 1] + 1;
            h[i * cols + j] = sub.min(del).min(ins);
        }
    }

    // end column: exact corner for global, closest-to-diagonal minimum for free end
    let end_j = if free_end {
        let lo = m.saturating_sub(k);
        let hi = m.saturating_add(k).min(n);
        (lo..=hi)
            .filter(|&j| h[m * cols + j] == distance)
            .min_by_key(|&j| j.abs_diff(m))?
    } else {
        n
    };

    let mut ops = Vec::with_capacity(m + end_j);
    let (mut i, mut j) = (m, end_j);
    while i > 0 || j > 0 {
        let here = h[i * cols + j];
        if i > 0 && j > 0 && here == h[(i - 1) * cols + j - 1] + u32::from(!same(i - 1, j - 1)) {
            ops.push(EditOp::Match);
            i -= 1;
            j -= 1;
        } else if i > 0 && here == h[(i - 1) * cols + j] + 1 {
            ops.push(EditOp::Insertion);
            i -= 1;
        } else if j > 0 && here == h[i * cols + j - 1] + 1 {
            ops.push(EditOp::Deletion);
            j -= 1;
        } else {
            break;
        }
    }
    ops.reverse();
    Some((distance, end_j, ops))
}

pub fn ops_to_cigar(ops: &[EditOp]) -> String {
    let mut cigar = String::new();
    if ops.is_empty() {
        return cigar;
    }
    let code = |op: EditOp| match op {
        EditOp::Match => 'M',
        EditOp::Insertion => 'I',
        EditOp::Deletion => 'D',
    };
    let mut cur = ops[0];
    let mut len = 1usize;
    for &op in &ops[1..] {
        if op == cur {
            len += 1;
        } else {
            let _ = write!(&mut cigar, "{}{}", len, code(cur));
            cur = op;
            len = 1;
        }
    }
    let _ = write!(&mut cigar, "{}{}", len, code(cur));
    cigar
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lev(a: &[u8], b: &[u8], cap: u32, free_end: bool) -> Option<u32> {
        let mut buf = EditBuffer::new();
        bounded_distance(a.len(), b.len(), cap, free_end, |i, j| a[i] == b[j], &mut buf)
    }

    fn naive(a: &[u8], b: &[u8]) -> u32 {
        let mut prev: Vec<u32> = (0..=b.len() as u32).collect();
        for i in 1..=a.len() {
            let mut cur = vec![i as u32; b.len() + 1];
            for j in 1..=b.len() {
                let sub = prev[j - 1] + u32::from(a[i - 1] != b[j - 1]);
                cur[j] = sub.min(prev[j] + 1).min(cur[j - 1] + 1);
            }
            prev = cur;
        }
        prev[b.len()]
    }

    fn make_seq(seed: u32, len: usize) -> Vec<u8> {
        let mut x = seed;
        (0..len)
            .map(|_| {
                x = x.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                b"ACGT"[(x >> 16) as usize % 4]
            })
            .collect()
    }

    #[test]
    fn global_distance_basics() {
        assert_eq!(lev(b"ACGT", b"ACGT", 2, false), Some(0));
        assert_eq!(lev(b"ACGT", b"AGGT", 2, false), Some(1));
        assert_eq!(lev(b"ACGT", b"ACGGT", 2, false), Some(1));
        assert_eq!(lev(b"ACGT", b"TGCA", 2, false), None);
        assert_eq!(lev(b"", b"", 0, false), Some(0));
    }

    #[test]
    fn free_end_ignores_trailing_target() {
        assert_eq!(lev(b"AAA", b"AAAC", 1, true), Some(0));
        assert_eq!(lev(b"AAT", b"AAAC", 1, true), Some(1));
        // target shorter than the query by more than cap
        assert_eq!(lev(b"AAAA", b"AA", 1, true), None);
    }

    #[test]
    fn banded_matches_naive_when_within_cap() {
        for seed in 0..200u32 {
            let a = make_seq(seed, 12);
            let mut b = make_seq(seed.wrapping_add(7_777), 12);
            // keep half of the pairs close so the band is exercised
            if seed % 2 == 0 {
                b = a.clone();
                b[(seed as usize) % 12] = b'A';
                b.insert((seed as usize) % 7, b'C');
            }
            let truth = naive(&a, &b);
            for cap in 0..6u32 {
                let got = lev(&a, &b, cap, false);
                if truth <= cap {
                    assert_eq!(got, Some(truth), "seed={} cap={}", seed, cap);
                } else {
                    assert_eq!(got, None, "seed={} cap={}", seed, cap);
                }
            }
        }
    }

    #[test]
    fn reused_buffer_leaves_no_stale_cells() {
        // long targets first, so later short or shifted calls land on dirty rows
        let mut shared = EditBuffer::new();
        for seed in 0..300u32 {
            let a = make_seq(seed, 6 + (seed as usize % 9));
            let mut b = make_seq(seed.wrapping_mul(31), 4 + (seed as usize % 13));
            if seed % 3 == 0 {
                b = a.clone();
                b.insert(seed as usize % a.len(), b'G');
                b.extend_from_slice(b"TTT");
            }
            for cap in 0..5u32 {
                for free_end in [false, true] {
                    let fresh = lev(&a, &b, cap, free_end);
                    let reused = bounded_distance(a.len(), b.len(), cap, free_end, |i, j| a[i] == b[j], &mut shared);
                    assert_eq!(reused, fresh, "seed={} cap={} free_end={}", seed, cap, free_end);
                }
            }
        }
        assert_eq!(lev(b"ACGT", b"ACGT", u32::MAX, false), Some(0));
        assert_eq!(lev(b"ACGT", b"TTTTTTTT", u32::MAX, true), Some(3));
    }

    #[test]
    fn traceback_reports_ops() {
        let q = b"ACGGT";
        let r = b"ACGT";
        let mut buf = EditBuffer::new();
        let (d, end, ops) =
            bounded_alignment(q.len(), r.len(), 2, false, |i, j| q[i] == r[j], &mut buf).unwrap();
        assert_eq!(d, 1);
        assert_eq!(end, 4);
        assert_eq!(ops_to_cigar(&ops), "2M1I2M");
    }

    #[test]
    fn traceback_free_end_stops_before_extension() {
        let q = b"AAA";
        let r = b"AAAC";
        let mut buf = EditBuffer::new();
        let (d, end, ops) =
            bounded_alignment(q.len(), r.len(), 1, true, |i, j| q[i] == r[j], &mut buf).unwrap();
        assert_eq!(d, 0);
        assert_eq!(end, 3);
        assert_eq!(ops_to_cigar(&ops), "3M");
    }
}
