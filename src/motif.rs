use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{OffTargetError, Result};
use crate::util::dna;

/// Which end of the guide receives the extra `distance` flanking bases.
/// Alignment is anchored at the opposite end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtensionSide {
    FivePrime,
    ThreePrime,
}

/// 识别模式（motif）描述：哪些位置是 guide 可变区，哪些位置是 PAM。
///
/// 以两条等长模板给出：
/// - `fwdmotif`：`N` 表示 guide 位置，`X` 表示 PAM 位置，例如 Cas9 为 `N{20}XXX`
/// - `fwdpam`：`X` 表示 guide 位置，其余为 PAM 的 IUPAC 碱基，例如 Cas9 为 `X{20}NGG`
///
/// 构造时校验，之后不可变；反序列化同样经过校验。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MotifDef", into = "MotifDef")]
pub struct MotifSpec {
    alias: String,
    fwdmotif: String,
    fwdpam: String,
    forward_strand: bool,
    reverse_strand: bool,
    distance: u32,
    extension: ExtensionSide,
    guide_loci: Vec<usize>,
    pam_loci: Vec<usize>,
}

/// On-disk mirror of [`MotifSpec`] without the derived loci.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MotifDef {
    alias: String,
    fwdmotif: String,
    fwdpam: String,
    forward_strand: bool,
    reverse_strand: bool,
    distance: u32,
    extension: ExtensionSide,
}

impl TryFrom<MotifDef> for MotifSpec {
    type Error = OffTargetError;

    fn try_from(d: MotifDef) -> Result<Self> {
        let distance = i32::try_from(d.distance)
            .map_err(|_| OffTargetError::config(format!("distance {} is too large", d.distance)))?;
        MotifSpec::new(
            &d.alias,
            &d.fwdmotif,
            &d.fwdpam,
            d.forward_strand,
            d.reverse_strand,
            distance,
            d.extension,
        )
    }
}

impl From<MotifSpec> for MotifDef {
    fn from(m: MotifSpec) -> Self {
        Self {
            alias: m.alias,
            fwdmotif: m.fwdmotif,
            fwdpam: m.fwdpam,
            forward_strand: m.forward_strand,
            reverse_strand: m.reverse_strand,
            distance: m.distance,
            extension: m.extension,
        }
    }
}

impl MotifSpec {
    pub fn new(
        alias: &str,
        fwdmotif: &str,
        fwdpam: &str,
        forward_strand: bool,
        reverse_strand: bool,
        distance: i32,
        extension: ExtensionSide,
    ) -> Result<Self> {
        let fwdmotif = fwdmotif.trim().to_ascii_uppercase();
        let fwdpam = fwdpam.trim().to_ascii_uppercase();
        if fwdmotif.is_empty() {
            return Err(OffTargetError::config("motif template is empty"));
        }
        if fwdmotif.len() != fwdpam.len() {
            return Err(OffTargetError::config(format!(
                "motif template length {} differs from PAM template length {}",
                fwdmotif.len(),
                fwdpam.len()
            )));
        }
        if distance < 0 {
            return Err(OffTargetError::config(format!("distance must be >= 0, got {}", distance)));
        }
        if !forward_strand && !reverse_strand {
            return Err(OffTargetError::config("both strands are disabled"));
        }

        let mut guide_loci = Vec::new();
        let mut pam_loci = Vec::new();
        for (i, (m, p)) in fwdmotif.bytes().zip(fwdpam.bytes()).enumerate() {
            match (m, p) {
                (b'N', b'X') => guide_loci.push(i),
                (b'X', p) if p != b'X' && dna::iupac_mask(p) != 0 => pam_loci.push(i),
                _ => {
                    return Err(OffTargetError::config(format!(
                        "position {} is '{}' in the motif and '{}' in the PAM template; \
                         expected N/X for guide or X/<IUPAC> for PAM",
                        i, m as char, p as char
                    )))
                }
            }
        }
        if guide_loci.is_empty() {
            return Err(OffTargetError::config("motif has no variable guide positions"));
        }

        Ok(Self {
            alias: alias.to_string(),
            fwdmotif,
            fwdpam,
            forward_strand,
            reverse_strand,
            distance: distance as u32,
            extension,
            guide_loci,
            pam_loci,
        })
    }

    /// Built-in motifs. `Cas9` extends on the 5' side, `Cas12a` (`Cpf1`) on the 3' side.
    pub fn named(alias: &str) -> Result<Self> {
        match alias.to_ascii_lowercase().as_str() {
            "cas9" => Self::new(
                "Cas9",
                "NNNNNNNNNNNNNNNNNNNNXXX",
                "XXXXXXXXXXXXXXXXXXXXNGG",
                true,
                true,
                4,
                ExtensionSide::FivePrime,
            ),
            "cas12a" | "cpf1" => Self::new(
                "Cas12a",
                "XXXXNNNNNNNNNNNNNNNNNNNN",
                "TTTVXXXXXXXXXXXXXXXXXXXX",
                true,
                true,
                4,
                ExtensionSide::ThreePrime,
            ),
            _ => Err(OffTargetError::config(format!("unknown motif alias '{}'", alias))),
        }
    }

    /// Same motif with a different distance bound.
    pub fn with_distance(&self, distance: i32) -> Result<Self> {
        Self::new(
            &self.alias,
            &self.fwdmotif,
            &self.fwdpam,
            self.forward_strand,
            self.reverse_strand,
            distance,
            self.extension,
        )
    }

    /// Same motif restricted to the given strands.
    pub fn with_strands(&self, forward: bool, reverse: bool) -> Result<Self> {
        Self::new(
            &self.alias,
            &self.fwdmotif,
            &self.fwdpam,
            forward,
            reverse,
            self.distance as i32,
            self.extension,
        )
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Full pattern length (guide + PAM).
    pub fn pattern_len(&self) -> usize {
        self.fwdmotif.len()
    }

    /// Variable-region (guide) length L.
    pub fn guide_len(&self) -> usize {
        self.guide_loci.len()
    }

    pub fn pam_len(&self) -> usize {
        self.pam_loci.len()
    }

    /// PAM bases in pattern order.
    pub fn pam_mask(&self) -> Vec<u8> {
        let pam = self.fwdpam.as_bytes();
        self.pam_loci.iter().map(|&i| pam[i]).collect()
    }

    pub fn distance(&self) -> u32 {
        self.distance
    }

    pub fn extension(&self) -> ExtensionSide {
        self.extension
    }

    pub fn forward_strand(&self) -> bool {
        self.forward_strand
    }

    pub fn reverse_strand(&self) -> bool {
        self.reverse_strand
    }

    /// Length of a stored candidate: L + D.
    pub fn candidate_len(&self) -> usize {
        self.guide_len() + self.distance as usize
    }

    /// True when the 3' end is anchored, i.e. sequences are compared from their last base.
    #[inline]
    pub fn anchored_at_end(&self) -> bool {
        self.extension == ExtensionSide::FivePrime
    }

    /// Per-base PAM test on a pattern-length window in motif orientation.
    pub fn pam_matches(&self, window: &[u8]) -> bool {
        if window.len() != self.pattern_len() {
            return false;
        }
        let pam = self.fwdpam.as_bytes();
        self.pam_loci.iter().all(|&i| dna::pam_accepts(pam[i], window[i]))
    }

    /// Same test for the reverse strand, given the forward-strand bases of the window.
    pub fn pam_matches_revcomp(&self, forward: &[u8]) -> bool {
        let m = self.pattern_len();
        if forward.len() != m {
            return false;
        }
        let pam = self.fwdpam.as_bytes();
        self.pam_loci
            .iter()
            .all(|&i| dna::pam_accepts(pam[i], dna::complement(forward[m - 1 - i])))
    }

    /// 从带延伸的窗口（长度 pattern_len + D）中删除 PAM 位置，得到长度 L + D 的候选序列。
    pub fn strip_pam(&self, extended: &[u8]) -> Vec<u8> {
        let offset = match self.extension {
            ExtensionSide::FivePrime => extended.len().saturating_sub(self.pattern_len()),
            ExtensionSide::ThreePrime => 0,
        };
        let mut out = Vec::with_capacity(extended.len().saturating_sub(self.pam_len()));
        let mut pam = self.pam_loci.iter().map(|&i| i + offset).peekable();
        for (i, &b) in extended.iter().enumerate() {
            if pam.peek() == Some(&i) {
                pam.next();
                continue;
            }
            out.push(b);
        }
        out
    }

    /// The L bases of a candidate at the anchored end, i.e. its exact-match key.
    pub fn guide_region<'a>(&self, candidate: &'a [u8]) -> &'a [u8] {
        let l = self.guide_len().min(candidate.len());
        match self.extension {
            ExtensionSide::FivePrime => &candidate[candidate.len() - l..],
            ExtensionSide::ThreePrime => &candidate[..l],
        }
    }
}

impl fmt::Display for MotifSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} motif={} pam={} strands={}{} distance={} extends={}",
            self.alias,
            self.fwdmotif,
            self.fwdpam,
            if self.forward_strand { "+" } else { "" },
            if self.reverse_strand { "-" } else { "" },
            self.distance,
            match self.extension {
                ExtensionSide::FivePrime => "5'",
                ExtensionSide::ThreePrime => "3'",
            }
        )
    }
}
