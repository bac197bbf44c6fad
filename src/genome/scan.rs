use crate::motif::MotifSpec;
use crate::util::dna;

use super::{Genome, Strand};

/// One occurrence of the recognition pattern.
///
/// `window` is the pattern-length sequence read 5'->3' on `strand`;
/// `position` is the 0-based forward-strand start of the occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanHit {
    pub window: Vec<u8>,
    pub position: u64,
    pub strand: Strand,
    pub contig: u32,
}

/// 按 motif 的 PAM 掩码在基因组上线性扫描，正向/反向链由 motif 决定。
/// 输出顺序：contig → 位置 → 先正链后反链。
pub struct MotifScanner<'g> {
    genome: &'g Genome,
    motif: &'g MotifSpec,
    contig: usize,
    pos: usize,
    reverse_pending: bool,
}

impl<'g> MotifScanner<'g> {
    pub fn new(genome: &'g Genome, motif: &'g MotifSpec) -> Self {
        Self {
            genome,
            motif,
            contig: 0,
            pos: 0,
            reverse_pending: false,
        }
    }
}

impl Iterator for MotifScanner<'_> {
    type Item = ScanHit;

    fn next(&mut self) -> Option<ScanHit> {
        let m = self.motif.pattern_len();
        loop {
            let contig = self.genome.contigs().get(self.contig)?;
            let seq = &contig.seq;
            if self.pos + m > seq.len() {
                self.contig += 1;
                self.pos = 0;
                self.reverse_pending = false;
                continue;
            }
            let p = self.pos;
            let window = &seq[p..p + m];

            if !self.reverse_pending {
                self.reverse_pending = true;
                if self.motif.forward_strand() && self.motif.pam_matches(window) {
                    return Some(ScanHit {
                        window: window.to_vec(),
                        position: p as u64,
                        strand: Strand::Forward,
                        contig: self.contig as u32,
                    });
                }
            }

            self.reverse_pending = false;
            self.pos += 1;
            if self.motif.reverse_strand() && self.motif.pam_matches_revcomp(window) {
                return Some(ScanHit {
                    window: dna::revcomp(window),
                    position: p as u64,
                    strand: Strand::Reverse,
                    contig: self.contig as u32,
                });
            }
        }
    }
}
