use log::debug;
use serde::{Deserialize, Serialize};

use crate::motif::{ExtensionSide, MotifSpec};
use crate::util::dna;

use super::{Genome, ScanHit, Strand};

/// 候选位点：去掉 PAM、在延伸端补齐 D 个碱基后的序列（长度 L + D，5'→3'）。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub sequence: Vec<u8>,
    pub position: u64,
    pub strand: Strand,
    pub contig: u32,
}

/// Counters for occurrences that could not become candidates.
///
/// `boundary_skipped` counts occurrences too close to a contig end to take
/// the D extension bases; those sites are never reported by any index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionStats {
    pub emitted: u64,
    pub boundary_skipped: u64,
    pub ambiguous_skipped: u64,
    pub strand_skipped: u64,
}

/// Turns scan hits into [`CandidateRecord`]s using the motif's extension rule.
pub struct CandidateExtractor<'g> {
    genome: &'g Genome,
    motif: &'g MotifSpec,
    stats: ExtractionStats,
}

impl<'g> CandidateExtractor<'g> {
    pub fn new(genome: &'g Genome, motif: &'g MotifSpec) -> Self {
        Self { genome, motif, stats: ExtractionStats::default() }
    }

    pub fn stats(&self) -> ExtractionStats {
        self.stats
    }

    /// Lazily extracts every usable candidate from `hits`.
    pub fn extract<'e, I>(&'e mut self, hits: I) -> Candidates<'e, 'g, I::IntoIter>
    where
        I: IntoIterator<Item = ScanHit>,
    {
        Candidates { extractor: self, hits: hits.into_iter() }
    }

    pub fn extract_hit(&mut self, hit: &ScanHit) -> Option<CandidateRecord> {
        let enabled = match hit.strand {
            Strand::Forward => self.motif.forward_strand(),
            Strand::Reverse => self.motif.reverse_strand(),
        };
        if !enabled {
            self.stats.strand_skipped += 1;
            return None;
        }

        let Some(extended) = self.extended_window(hit) else {
            self.stats.boundary_skipped += 1;
            debug!(
                "boundary skip: contig {} position {} strand {}",
                hit.contig, hit.position, hit.strand
            );
            return None;
        };
        if !extended.iter().all(|&b| dna::is_concrete(b)) {
            self.stats.ambiguous_skipped += 1;
            return None;
        }

        self.stats.emitted += 1;
        Some(CandidateRecord {
            sequence: self.motif.strip_pam(&extended),
            position: hit.position,
            strand: hit.strand,
            contig: hit.contig,
        })
    }

    /// Pattern window plus D flanking bases on the extension side, read on the hit's strand.
    /// `None` when the flank runs past either contig end.
    fn extended_window(&self, hit: &ScanHit) -> Option<Vec<u8>> {
        let contig = self.genome.contig(hit.contig)?;
        let seq = &contig.seq;
        let m = self.motif.pattern_len();
        let d = self.motif.distance() as usize;
        let p = hit.position as usize;
        if hit.window.len() != m || p + m > seq.len() {
            return None;
        }

        // flank before or after the occurrence in forward coordinates
        let before = matches!(
            (hit.strand, self.motif.extension()),
            (Strand::Forward, ExtensionSide::FivePrime) | (Strand::Reverse, ExtensionSide::ThreePrime)
        );
        let flank_fwd = if before {
            if p < d {
                return None;
            }
            &seq[p - d..p]
        } else {
            if p + m + d > seq.len() {
                return None;
            }
            &seq[p + m..p + m + d]
        };
        let flank = match hit.strand {
            Strand::Forward => flank_fwd.to_vec(),
            Strand::Reverse => dna::revcomp(flank_fwd),
        };

        let mut out = Vec::with_capacity(m + d);
        match self.motif.extension() {
            ExtensionSide::FivePrime => {
                out.extend_from_slice(&flank);
                out.extend_from_slice(&hit.window);
            }
            ExtensionSide::ThreePrime => {
                out.extend_from_slice(&hit.window);
                out.extend_from_slice(&flank);
            }
        }
        Some(out)
    }
}

/// Iterator returned by [`CandidateExtractor::extract`].
pub struct Candidates<'e, 'g, I> {
    extractor: &'e mut CandidateExtractor<'g>,
    hits: I,
}

impl<I: Iterator<Item = ScanHit>> Iterator for Candidates<'_, '_, I> {
    type Item = CandidateRecord;

    fn next(&mut self) -> Option<CandidateRecord> {
        loop {
            let hit = self.hits.next()?;
            if let Some(c) = self.extractor.extract_hit(&hit) {
                return Some(c);
            }
        }
    }
}
