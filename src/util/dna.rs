use crate::error::{OffTargetError, Result};

/// 具体碱基字母表（DFS 枚举、哈希键都只用这四个字母）
pub const ACGT: [u8; 4] = [b'A', b'C', b'G', b'T'];

const fn build_iupac_table() -> [u8; 256] {
    let mut t = [0u8; 256];
    let codes: [(u8, u8); 16] = [
        (b'A', 0b0001),
        (b'C', 0b0010),
        (b'G', 0b0100),
        (b'T', 0b1000),
        (b'U', 0b1000),
        (b'R', 0b0101),
        (b'Y', 0b1010),
        (b'S', 0b0110),
        (b'W', 0b1001),
        (b'K', 0b1100),
        (b'M', 0b0011),
        (b'B', 0b1110),
        (b'D', 0b1101),
        (b'H', 0b1011),
        (b'V', 0b0111),
        (b'N', 0b1111),
    ];
    let mut i = 0;
    while i < codes.len() {
        let (c, m) = codes[i];
        t[c as usize] = m;
        t[c.to_ascii_lowercase() as usize] = m;
        i += 1;
    }
    t
}

static IUPAC: [u8; 256] = build_iupac_table();

/// IUPAC 码到 4 bit 掩码：A=1, C=2, G=4, T=8；非法字符返回 0。
#[inline]
pub fn iupac_mask(b: u8) -> u8 {
    IUPAC[b as usize]
}

#[inline]
pub fn is_concrete(b: u8) -> bool {
    matches!(b, b'A' | b'C' | b'G' | b'T')
}

/// Two bases are compatible when their IUPAC sets intersect, so `N` matches
/// anything and `R` matches `A` or `G`.
#[inline]
pub fn compatible(a: u8, b: u8) -> bool {
    iupac_mask(a) & iupac_mask(b) != 0
}

/// PAM 位点检查：`pam` 为模板碱基（可含 IUPAC），`genomic` 必须是被模板接受的具体碱基。
#[inline]
pub fn pam_accepts(pam: u8, genomic: u8) -> bool {
    is_concrete(genomic) && compatible(pam, genomic)
}

/// 参考序列规范化：大写、U→T，非 ACGT 一律视为 N。
pub fn normalize_seq(seq: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(seq.len());
    for &b in seq {
        let up = b.to_ascii_uppercase();
        let nb = match up {
            b'A' | b'C' | b'G' | b'T' | b'N' => up,
            b'U' => b'T',
            _ => b'N',
        };
        out.push(nb);
    }
    out
}

/// Parses a user supplied guide: uppercases, maps U to T and keeps IUPAC codes.
pub fn parse_guide(guide: &str) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(guide.len());
    for (pos, ch) in guide.trim().chars().enumerate() {
        let up = ch.to_ascii_uppercase();
        if !up.is_ascii() || iupac_mask(up as u8) == 0 {
            return Err(OffTargetError::InvalidBase { base: ch, pos });
        }
        out.push(if up == 'U' { b'T' } else { up as u8 });
    }
    Ok(out)
}

#[inline]
pub fn complement(base: u8) -> u8 {
    match base.to_ascii_uppercase() {
        b'A' => b'T',
        b'C' => b'G',
        b'G' => b'C',
        b'T' | b'U' => b'A',
        b'R' => b'Y',
        b'Y' => b'R',
        b'K' => b'M',
        b'M' => b'K',
        b'B' => b'V',
        b'V' => b'B',
        b'D' => b'H',
        b'H' => b'D',
        b'S' => b'S',
        b'W' => b'W',
        _ => b'N',
    }
}

pub fn revcomp(seq: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(seq.len());
    for &b in seq.iter().rev() {
        out.push(complement(b));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_compatibility() {
        assert!(compatible(b'N', b'A'));
        assert!(compatible(b'R', b'G'));
        assert!(!compatible(b'R', b'C'));
        assert!(!compatible(b'A', b'T'));
    }

    #[test]
    fn pam_rejects_ambiguous_genome_bases() {
        assert!(pam_accepts(b'N', b'C'));
        assert!(pam_accepts(b'G', b'G'));
        assert!(!pam_accepts(b'G', b'N'));
        assert!(!pam_accepts(b'V', b'T'));
    }

    #[test]
    fn parse_guide_accepts_iupac_and_rna() {
        assert_eq!(parse_guide("acgu").unwrap(), b"ACGT");
        assert_eq!(parse_guide("NRY").unwrap(), b"NRY");
        let err = parse_guide("AC-T").unwrap_err();
        assert!(matches!(err, OffTargetError::InvalidBase { base: '-', pos: 2 }));
    }

    #[test]
    fn revcomp_handles_iupac() {
        assert_eq!(revcomp(b"AACGR"), b"YCGTT");
        assert_eq!(normalize_seq(b"acgux"), b"ACGTN");
    }
}
