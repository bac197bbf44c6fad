//! 脱靶数据库：元数据、构建分派与统一查询入口。
//!
//! 目录布局：
//!
//! ```text
//! <db>/meta.bin            DatabaseMeta（最后写入）
//! <db>/linear/<KEY>.bin    LinearIndex 每桶一个文件
//! <db>/tree/<KEY>.bin      TreeIndex 每桶一棵 VP 树
//! <db>/sketch.bin          SketchIndex 计数表
//! ```

pub mod linear;
pub mod prefix;
pub mod sketch;
pub mod storage;
pub mod tree;
pub mod vptree;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use log::info;
use serde::{Deserialize, Serialize};

use crate::align::{AlignmentEngine, EditBuffer};
use crate::error::{OffTargetError, Result};
use crate::genome::{CandidateExtractor, CandidateRecord, Genome, MotifScanner, Strand};
use crate::motif::MotifSpec;

pub use linear::LinearIndex;
pub use prefix::PrefixPartitioner;
pub use sketch::{SketchEstimate, SketchIndex, SketchTable};
pub use tree::TreeIndex;
pub use vptree::{PivotRule, TreeOptions, VpTree};

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexKind {
    Linear,
    Sketch,
    Tree,
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IndexKind::Linear => "linear",
            IndexKind::Sketch => "sketch",
            IndexKind::Tree => "tree",
        })
    }
}

impl FromStr for IndexKind {
    type Err = OffTargetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Ok(IndexKind::Linear),
            "sketch" => Ok(IndexKind::Sketch),
            "tree" | "vptree" => Ok(IndexKind::Tree),
            other => Err(OffTargetError::config(format!("unknown index kind '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SketchMeta {
    pub max_count: u32,
    pub probability_of_error: f64,
    pub depth: usize,
    pub width: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseMeta {
    pub format_version: u32,
    pub name: String,
    pub kind: IndexKind,
    pub motif: MotifSpec,
    pub prefix_len: usize,
    /// Hits refer to contigs by index into this list.
    pub contigs: Vec<String>,
    pub candidates: u64,
    pub sketch: Option<SketchMeta>,
    pub tree: Option<TreeOptions>,
    pub build_timestamp: Option<String>,
    pub build_args: Option<String>,
}

impl DatabaseMeta {
    /// Build distance D.
    pub fn distance(&self) -> u32 {
        self.motif.distance()
    }

    pub fn contig_name(&self, idx: u32) -> &str {
        self.contigs.get(idx as usize).map_or("?", String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildOptions {
    pub name: String,
    pub kind: IndexKind,
    pub prefix_len: usize,
    pub probability_of_error: f64,
    pub max_count: u32,
    pub leaf_size: usize,
    /// Tree metric cap; `None` means the build distance.
    pub metric_cap: Option<u32>,
    pub pivot: PivotRule,
    pub build_args: Option<String>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            name: "offtargets".to_string(),
            kind: IndexKind::Linear,
            prefix_len: 7,
            probability_of_error: 0.001,
            max_count: 255,
            leaf_size: 16,
            metric_cap: None,
            pivot: PivotRule::First,
            build_args: None,
        }
    }
}

/// One off-target: where it is, how far, and the stored candidate sequence.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hit {
    pub contig: u32,
    pub position: u64,
    pub strand: Strand,
    pub distance: u32,
    pub sequence: Vec<u8>,
}

impl Hit {
    pub(crate) fn new(c: &CandidateRecord, distance: u32) -> Self {
        Self {
            contig: c.contig,
            position: c.position,
            strand: c.strand,
            distance,
            sequence: c.sequence.clone(),
        }
    }
}

/// Result of searching one guide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Findings {
    /// Exact search: every hit, sorted.
    Hits(Vec<Hit>),
    /// Sketch triage: one-sided estimates only.
    Estimate(SketchEstimate),
}

#[derive(Debug, Clone)]
pub enum Index {
    Linear(LinearIndex),
    Sketch(SketchIndex),
    Tree(TreeIndex),
}

impl Index {
    pub fn kind(&self) -> IndexKind {
        match self {
            Index::Linear(_) => IndexKind::Linear,
            Index::Sketch(_) => IndexKind::Sketch,
            Index::Tree(_) => IndexKind::Tree,
        }
    }
}

/// Scans the genome, extracts candidates and builds a database in `dir`.
pub fn build_database(genome: &Genome, motif: &MotifSpec, opts: &BuildOptions, dir: &Path) -> Result<DatabaseMeta> {
    let mut extractor = CandidateExtractor::new(genome, motif);
    let candidates: Vec<CandidateRecord> = extractor.extract(MotifScanner::new(genome, motif)).collect();
    let stats = extractor.stats();
    info!(
        "extracted {} candidates ({} near contig ends, {} ambiguous skipped)",
        stats.emitted, stats.boundary_skipped, stats.ambiguous_skipped
    );
    build_from_candidates(candidates, genome.contig_names(), motif, opts, dir)
}

/// Builds a database from already extracted candidates.
pub fn build_from_candidates(
    candidates: Vec<CandidateRecord>,
    contigs: Vec<String>,
    motif: &MotifSpec,
    opts: &BuildOptions,
    dir: &Path,
) -> Result<DatabaseMeta> {
    let partitioner = PrefixPartitioner::new(opts.prefix_len, motif)?;
    match opts.kind {
        IndexKind::Tree if opts.leaf_size == 0 => return Err(OffTargetError::config("leaf size must be at least 1")),
        IndexKind::Tree if opts.metric_cap.is_some_and(|c| c as usize > motif.guide_len()) => {
            return Err(OffTargetError::config(format!(
                "metric cap must not exceed the guide length {}",
                motif.guide_len()
            )))
        }
        IndexKind::Sketch => {
            SketchTable::for_items(0, opts.probability_of_error, opts.max_count)?;
        }
        _ => {}
    }
    storage::prepare_dir(dir)?;

    let total = candidates.len() as u64;
    let buckets = partitioner.partition(candidates);
    info!("{} candidates in {} buckets (prefix length {})", total, buckets.len(), partitioner.len());

    let engine = AlignmentEngine::new(motif);
    let mut sketch = None;
    let mut tree = None;
    match opts.kind {
        IndexKind::Linear => LinearIndex::from_buckets(partitioner, buckets).save(dir)?,
        IndexKind::Sketch => {
            let idx = SketchIndex::build(&buckets, motif, opts.probability_of_error, opts.max_count)?;
            idx.save(dir)?;
            let t = idx.table();
            sketch = Some(SketchMeta {
                max_count: opts.max_count,
                probability_of_error: opts.probability_of_error,
                depth: t.depth(),
                width: t.width(),
            });
        }
        IndexKind::Tree => {
            let tree_opts = TreeOptions {
                leaf_size: opts.leaf_size,
                metric_cap: opts.metric_cap.unwrap_or_else(|| motif.distance()),
                pivot: opts.pivot,
            };
            TreeIndex::build(partitioner, buckets, &engine, &tree_opts).save(dir)?;
            tree = Some(tree_opts);
        }
    }

    let meta = DatabaseMeta {
        format_version: FORMAT_VERSION,
        name: opts.name.clone(),
        kind: opts.kind,
        motif: motif.clone(),
        prefix_len: partitioner.len(),
        contigs,
        candidates: total,
        sketch,
        tree,
        build_timestamp: Some(chrono::Utc::now().to_rfc3339()),
        build_args: opts.build_args.clone(),
    };
    storage::save(&dir.join(storage::META_FILE), &meta)?;
    info!("database '{}' ({}) written to {}", meta.name, meta.kind, dir.display());
    Ok(meta)
}

/// An opened, read-only database. Safe to share across search threads.
#[derive(Debug, Clone)]
pub struct Database {
    meta: DatabaseMeta,
    engine: AlignmentEngine,
    index: Index,
}

impl Database {
    pub fn open(dir: &Path) -> Result<Self> {
        let meta_path = dir.join(storage::META_FILE);
        if !meta_path.exists() {
            return Err(OffTargetError::CorruptDatabase(format!("no {} in {}", storage::META_FILE, dir.display())));
        }
        let meta: DatabaseMeta = storage::load(&meta_path)?;
        if meta.format_version != FORMAT_VERSION {
            return Err(OffTargetError::CorruptDatabase(format!(
                "format version {} is not supported (expected {})",
                meta.format_version, FORMAT_VERSION
            )));
        }
        let partitioner = PrefixPartitioner::new(meta.prefix_len, &meta.motif)
            .map_err(|e| OffTargetError::CorruptDatabase(e.to_string()))?;
        let (index, stored) = match meta.kind {
            IndexKind::Linear => {
                let idx = LinearIndex::open(dir, partitioner)?;
                let n = idx.candidate_count();
                (Index::Linear(idx), Some(n))
            }
            IndexKind::Sketch => (Index::Sketch(SketchIndex::open(dir, meta.motif.guide_len())?), None),
            IndexKind::Tree => {
                let idx = TreeIndex::open(dir, partitioner)?;
                let n = idx.candidate_count();
                (Index::Tree(idx), Some(n))
            }
        };
        // extra or missing bucket files
        if let Some(n) = stored.filter(|&n| n as u64 != meta.candidates) {
            return Err(OffTargetError::CorruptDatabase(format!(
                "{} candidates on disk, meta.bin records {}",
                n, meta.candidates
            )));
        }
        info!("opened database '{}' ({}, {} candidates, D={})", meta.name, meta.kind, meta.candidates, meta.distance());
        Ok(Self { engine: AlignmentEngine::new(&meta.motif), meta, index })
    }

    pub fn meta(&self) -> &DatabaseMeta {
        &self.meta
    }

    pub fn engine(&self) -> &AlignmentEngine {
        &self.engine
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn kind(&self) -> IndexKind {
        self.index.kind()
    }

    pub fn check_distance(&self, distance: u32) -> Result<()> {
        if distance > self.meta.distance() {
            return Err(OffTargetError::DistanceExceedsBuild { requested: distance, built: self.meta.distance() });
        }
        Ok(())
    }

    /// Searches one (already parsed) guide. Hits come back sorted.
    pub fn search(&self, guide: &[u8], distance: u32, buf: &mut EditBuffer) -> Result<Findings> {
        self.check_distance(distance)?;
        self.engine.check_guide(guide)?;
        let mut hits = Vec::new();
        match &self.index {
            Index::Linear(idx) => idx.search(&self.engine, guide, distance, buf, &mut hits),
            Index::Tree(idx) => idx.search(&self.engine, guide, distance, buf, &mut hits),
            Index::Sketch(idx) => return Ok(Findings::Estimate(idx.search(guide, distance))),
        }
        hits.sort_unstable();
        Ok(Findings::Hits(hits))
    }

    /// Text rendering of one tree bucket; `Configuration` for other index kinds.
    pub fn inspect(&self, prefix: Option<&str>, levels: usize) -> Result<String> {
        match &self.index {
            Index::Tree(idx) => idx.inspect(prefix, levels),
            Index::Linear(idx) => {
                let key = prefix.ok_or_else(|| OffTargetError::config("linear inspection needs a bucket prefix"))?;
                let bucket = idx.bucket(&key.to_ascii_uppercase()).unwrap_or(&[]);
                let mut out = format!("bucket {}: {} candidates\n", key, bucket.len());
                for c in bucket {
                    out.push_str(&format!(
                        "  {} {}:{}{}\n",
                        String::from_utf8_lossy(&c.sequence),
                        self.meta.contig_name(c.contig),
                        c.position,
                        c.strand
                    ));
                }
                Ok(out)
            }
            Index::Sketch(idx) => {
                let t = idx.table();
                Ok(format!(
                    "sketch: depth {}, width {}, {}-bit counters, max_count {}, {} saturated\n",
                    t.depth(),
                    t.width(),
                    t.counter_bits(),
                    t.max_count(),
                    t.saturated_counters()
                ))
            }
        }
    }
}
