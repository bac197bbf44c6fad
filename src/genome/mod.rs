//! 基因组句柄与候选位点提取。
//!
//! 基因组文件的解码不在本 crate 的核心范围内：这里只提供一个只读的
//! [`Genome`] 句柄（构建时打开，提取结束后即可释放）、一个按 motif 扫描的
//! 线性生产者 [`scan::MotifScanner`]，以及把扫描命中规范化为候选记录的
//! [`extract::CandidateExtractor`]。

pub mod extract;
pub mod scan;

use std::fmt;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{OffTargetError, Result};
use crate::io::fasta::FastaReader;

pub use extract::{CandidateExtractor, CandidateRecord, ExtractionStats};
pub use scan::{MotifScanner, ScanHit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Strand {
    Forward,
    Reverse,
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Strand::Forward => "+",
            Strand::Reverse => "-",
        })
    }
}

#[derive(Debug, Clone)]
pub struct Contig {
    pub name: String,
    pub seq: Vec<u8>,
}

/// Read-only, externally owned genome.
#[derive(Debug, Clone, Default)]
pub struct Genome {
    contigs: Vec<Contig>,
}

impl Genome {
    pub fn new(contigs: Vec<Contig>) -> Self {
        Self { contigs }
    }

    /// Convenience for tests and small inputs: `(name, sequence)` pairs, normalised.
    pub fn from_pairs<S: AsRef<str>>(pairs: &[(S, &[u8])]) -> Self {
        let contigs = pairs
            .iter()
            .map(|(name, seq)| Contig {
                name: name.as_ref().to_string(),
                seq: crate::util::dna::normalize_seq(seq),
            })
            .collect();
        Self { contigs }
    }

    pub fn from_fasta(path: &Path) -> Result<Self> {
        let fh = std::fs::File::open(path)?;
        let reader = FastaReader::new(std::io::BufReader::new(fh));
        let mut contigs = Vec::new();
        for rec in reader {
            let rec = rec?;
            contigs.push(Contig { name: rec.id, seq: rec.seq });
        }
        if contigs.is_empty() {
            return Err(OffTargetError::config(format!(
                "genome '{}' contains no sequences",
                path.display()
            )));
        }
        let genome = Self { contigs };
        info!(
            "genome {}: {} contigs, {} bp",
            path.display(),
            genome.contigs.len(),
            genome.total_len()
        );
        Ok(genome)
    }

    pub fn contigs(&self) -> &[Contig] {
        &self.contigs
    }

    pub fn contig(&self, idx: u32) -> Option<&Contig> {
        self.contigs.get(idx as usize)
    }

    pub fn contig_names(&self) -> Vec<String> {
        self.contigs.iter().map(|c| c.name.clone()).collect()
    }

    pub fn total_len(&self) -> usize {
        self.contigs.iter().map(|c| c.seq.len()).sum()
    }
}
