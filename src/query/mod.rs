//! 批量查询：每条 guide 一个 rayon 任务，结果按输入顺序汇总。
//!
//! 请求明细时，每条 guide 先写自己的中间文件
//! `<GUIDE>_<序号>_<明细文件名>`（与明细文件同目录），全部完成后按输入顺序
//! 顺序拼接成最终文件并删除中间文件。取消或出错时只清理中间文件。

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::align::{AlignmentEngine, EditBuffer};
use crate::error::{OffTargetError, Result};
use crate::index::{Database, Findings, Hit, IndexKind, SketchEstimate};
use crate::util::dna;

const DETAIL_HEADER: &str = "guide\talignment_guide\talignment_ref\tdistance\tchromosome\tstart\tstrand";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub distance: u32,
    /// Merged per-hit output file.
    pub detail: Option<PathBuf>,
    /// Keep the hit lists in the report, not only the counts.
    pub keep_hits: bool,
}

impl SearchRequest {
    pub fn new(distance: u32) -> Self {
        Self { distance, detail: None, keep_hits: false }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuideSummary {
    /// `per_distance[k]` counts hits at exactly distance `k`.
    Exact { per_distance: Vec<u64>, hits: Vec<Hit> },
    Sketch(SketchEstimate),
}

impl GuideSummary {
    pub fn total(&self) -> u64 {
        match self {
            GuideSummary::Exact { per_distance, .. } => per_distance.iter().sum(),
            GuideSummary::Sketch(e) => e.estimate,
        }
    }
}

#[derive(Debug)]
pub struct GuideReport {
    pub guide: String,
    /// Per-guide failures (bad base, wrong length) do not abort the batch.
    pub outcome: Result<GuideSummary>,
}

#[derive(Debug)]
pub struct SearchReport {
    pub kind: IndexKind,
    pub distance: u32,
    pub guides: Vec<GuideReport>,
    pub detail: Option<PathBuf>,
}

impl SearchReport {
    pub fn failed(&self) -> usize {
        self.guides.iter().filter(|g| g.outcome.is_err()).count()
    }

    /// One row per guide, in input order.
    pub fn write_tsv<W: Write>(&self, mut w: W) -> std::io::Result<()> {
        let columns: Vec<String> = match self.kind {
            IndexKind::Sketch => vec!["estimate".into(), "neighbourhood_sum".into()],
            _ => (0..=self.distance)
                .map(|k| format!("D{}", k))
                .chain(std::iter::once("total".to_string()))
                .collect(),
        };
        writeln!(w, "guide\t{}\tnote", columns.join("\t"))?;

        for g in &self.guides {
            let cells: Vec<String> = match &g.outcome {
                Ok(GuideSummary::Exact { per_distance, .. }) => per_distance
                    .iter()
                    .map(u64::to_string)
                    .chain(std::iter::once(per_distance.iter().sum::<u64>().to_string()))
                    .collect(),
                Ok(GuideSummary::Sketch(e)) => vec![
                    e.estimate.to_string(),
                    e.neighbourhood.map_or_else(|| "NA".to_string(), |n| n.to_string()),
                ],
                Err(_) => vec!["NA".to_string(); columns.len()],
            };
            let note = match &g.outcome {
                Ok(_) => String::new(),
                Err(e) => e.to_string(),
            };
            writeln!(w, "{}\t{}\t{}", g.guide, cells.join("\t"), note)?;
        }
        w.flush()
    }
}

/// Reads guides one per line; blank lines, `#` comments and FASTA headers are skipped.
pub fn read_guides<R: BufRead>(reader: R) -> Result<Vec<String>> {
    let mut guides = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let t = line.trim();
        if t.is_empty() || t.starts_with('#') || t.starts_with('>') {
            continue;
        }
        guides.push(t.to_string());
    }
    Ok(guides)
}

pub fn read_guides_file(path: &Path) -> Result<Vec<String>> {
    read_guides(BufReader::new(File::open(path)?))
}

pub struct QueryEngine<'db> {
    db: &'db Database,
}

impl<'db> QueryEngine<'db> {
    pub fn new(db: &'db Database) -> Self {
        Self { db }
    }

    pub fn run(&self, guides: &[String], req: &SearchRequest) -> Result<SearchReport> {
        self.run_cancellable(guides, req, &AtomicBool::new(false))
    }

    /// Like [`run`](Self::run); setting `cancel` stops the batch between guides.
    pub fn run_cancellable(&self, guides: &[String], req: &SearchRequest, cancel: &AtomicBool) -> Result<SearchReport> {
        self.db.check_distance(req.distance)?;
        let kind = self.db.kind();
        let detail = match &req.detail {
            Some(_) if kind == IndexKind::Sketch => {
                return Err(OffTargetError::config(
                    "a sketch database reports estimates only; detail output needs a linear or tree database",
                ));
            }
            Some(path) => Some(DetailTarget::new(path)?),
            None => None,
        };
        info!("searching {} guides at distance {} ({} index)", guides.len(), req.distance, kind);

        let results: Result<Vec<GuideReport>> = guides
            .par_iter()
            .enumerate()
            .map_init(EditBuffer::new, |buf, (i, raw)| {
                if cancel.load(Ordering::Relaxed) {
                    return Err(OffTargetError::Cancelled);
                }
                self.search_one(i, raw, req, detail.as_ref(), buf)
            })
            .collect();

        let reports = match results {
            Ok(r) => r,
            Err(e) => {
                if let Some(d) = &detail {
                    d.discard(guides);
                }
                return Err(e);
            }
        };

        if let Some(d) = &detail {
            d.merge(&reports)?;
            info!("detail written to {}", d.path.display());
        }
        let report = SearchReport {
            kind,
            distance: req.distance,
            guides: reports,
            detail: req.detail.clone(),
        };
        if report.failed() > 0 {
            warn!("{} of {} guides failed", report.failed(), report.guides.len());
        }
        Ok(report)
    }

    fn search_one(
        &self,
        index: usize,
        raw: &str,
        req: &SearchRequest,
        detail: Option<&DetailTarget>,
        buf: &mut EditBuffer,
    ) -> Result<GuideReport> {
        let name = raw.trim().to_ascii_uppercase();
        let parsed = dna::parse_guide(raw).and_then(|g| self.db.search(&g, req.distance, buf).map(|f| (f, g)));
        let (findings, guide) = match parsed {
            Ok(v) => v,
            Err(e) => {
                debug!("guide {} ({}) skipped: {}", index, raw, e);
                return Ok(GuideReport { guide: name, outcome: Err(e) });
            }
        };

        let summary = match findings {
            Findings::Estimate(e) => GuideSummary::Sketch(e),
            Findings::Hits(hits) => {
                let mut per_distance = vec![0u64; req.distance as usize + 1];
                for h in &hits {
                    per_distance[h.distance as usize] += 1;
                }
                if let Some(d) = detail {
                    d.write_part(index, &name, &guide, &hits, self.db)?;
                }
                let hits = if req.keep_hits { hits } else { Vec::new() };
                GuideSummary::Exact { per_distance, hits }
            }
        };
        Ok(GuideReport { guide: name, outcome: Ok(summary) })
    }
}

/// Final detail file plus the naming scheme of its per-guide parts.
struct DetailTarget {
    path: PathBuf,
    dir: PathBuf,
    file_name: String,
}

impl DetailTarget {
    fn new(path: &Path) -> Result<Self> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| OffTargetError::config(format!("detail path '{}' has no file name", path.display())))?
            .to_string();
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;
        Ok(Self { path: path.to_path_buf(), dir, file_name })
    }

    fn part_path(&self, index: usize, guide: &str) -> PathBuf {
        self.dir.join(format!("{}_{}_{}", guide, index, self.file_name))
    }

    fn write_part(&self, index: usize, name: &str, guide: &[u8], hits: &[Hit], db: &Database) -> Result<()> {
        let mut w = BufWriter::new(File::create(self.part_path(index, name))?);
        let engine: &AlignmentEngine = db.engine();
        for h in hits {
            let (ag, ar) = match engine.align(guide, &h.sequence, h.distance) {
                Some(a) => (a.guide, a.reference),
                None => (
                    String::from_utf8_lossy(guide).into_owned(),
                    String::from_utf8_lossy(&h.sequence).into_owned(),
                ),
            };
            writeln!(
                w,
                "{}\t{}\t{}\t{}\t{}\t{}\t{}",
                name,
                ag,
                ar,
                h.distance,
                db.meta().contig_name(h.contig),
                h.position + 1,
                h.strand
            )?;
        }
        w.flush()?;
        Ok(())
    }

    /// 按输入顺序拼接中间文件，随后删除它们。
    fn merge(&self, reports: &[GuideReport]) -> Result<()> {
        let mut out = BufWriter::new(File::create(&self.path)?);
        writeln!(out, "{}", DETAIL_HEADER)?;
        let mut merged = 0usize;
        for (i, r) in reports.iter().enumerate() {
            if r.outcome.is_err() {
                continue;
            }
            let part = self.part_path(i, &r.guide);
            let mut f = File::open(&part)?;
            std::io::copy(&mut f, &mut out)?;
            std::fs::remove_file(&part)?;
            merged += 1;
        }
        out.flush()?;
        debug!("merged {} detail parts into {}", merged, self.path.display());
        Ok(())
    }

    /// Best-effort removal of every part a cancelled or failed run may have left.
    fn discard(&self, guides: &[String]) {
        for (i, g) in guides.iter().enumerate() {
            let part = self.part_path(i, &g.trim().to_ascii_uppercase());
            if part.exists() {
                if let Err(e) = std::fs::remove_file(&part) {
                    warn!("cannot remove {}: {}", part.display(), e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::Genome;
    use crate::index::{build_database, BuildOptions};
    use crate::motif::{ExtensionSide, MotifSpec};

    fn toy_db(kind: IndexKind, root: &Path) -> Database {
        let genome = Genome::from_pairs(&[("chr1", &b"AAATGGCACAAATGGTT"[..]), ("chr2", &b"GAATGGAA"[..])]);
        let motif = MotifSpec::new("toy", "NNNXXX", "XXXNGG", true, true, 1, ExtensionSide::ThreePrime).unwrap();
        let dir = root.join(format!("{}", kind));
        let opts = BuildOptions { kind, prefix_len: 2, ..BuildOptions::default() };
        build_database(&genome, &motif, &opts, &dir).unwrap();
        Database::open(&dir).unwrap()
    }

    fn guides(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn counts_per_distance_in_input_order() {
        let tmp = tempfile::tempdir().unwrap();
        let db = toy_db(IndexKind::Linear, tmp.path());
        let req = SearchRequest { keep_hits: true, ..SearchRequest::new(1) };
        let report = QueryEngine::new(&db).run(&guides(&["aaa", "GAA", "ACGT", "AXA"]), &req).unwrap();

        assert_eq!(report.guides.len(), 4);
        assert_eq!(report.guides[0].guide, "AAA");
        match report.guides[0].outcome.as_ref().unwrap() {
            GuideSummary::Exact { per_distance, hits } => {
                // AAAC at chr1:0 and AAAT at chr1:9 are exact; GAAA on chr2 is one edit away
                assert_eq!(per_distance, &vec![2, 1]);
                assert_eq!(hits.len(), 3);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(report.guides[2].outcome, Err(OffTargetError::InvalidLength { .. })));
        assert!(matches!(report.guides[3].outcome, Err(OffTargetError::InvalidBase { .. })));
        assert_eq!(report.failed(), 2);

        let mut tsv = Vec::new();
        report.write_tsv(&mut tsv).unwrap();
        let text = String::from_utf8(tsv).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "guide\tD0\tD1\ttotal\tnote");
        assert_eq!(lines[1], "AAA\t2\t1\t3\t");
        assert!(lines[3].starts_with("ACGT\tNA\tNA\tNA\t"));
    }

    #[test]
    fn detail_parts_are_merged_and_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let db = toy_db(IndexKind::Tree, tmp.path());
        let out = tmp.path().join("out");
        let detail = out.join("hits.tsv");
        let req = SearchRequest { detail: Some(detail.clone()), ..SearchRequest::new(1) };
        let report = QueryEngine::new(&db).run(&guides(&["GAA", "AAA", "TTTT"]), &req).unwrap();
        assert_eq!(report.failed(), 1);

        let text = std::fs::read_to_string(&detail).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 1 + 3 + 3);
        assert_eq!(lines[0], DETAIL_HEADER);
        assert!(lines[1..4].iter().all(|l| l.starts_with("GAA\t")));
        assert_eq!(lines[3], "GAA\tGAA\tGAA\t0\tchr2\t1\t+");
        assert!(lines[4..].iter().all(|l| l.starts_with("AAA\t")));

        let leftovers: Vec<_> = std::fs::read_dir(&out).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn fatal_checks_happen_before_any_work() {
        let tmp = tempfile::tempdir().unwrap();
        let sketch = toy_db(IndexKind::Sketch, tmp.path());
        let req = SearchRequest { detail: Some(tmp.path().join("d.tsv")), ..SearchRequest::new(1) };
        assert!(matches!(
            QueryEngine::new(&sketch).run(&guides(&["AAA"]), &req),
            Err(OffTargetError::Configuration(_))
        ));
        assert!(matches!(
            QueryEngine::new(&sketch).run(&guides(&["AAA"]), &SearchRequest::new(3)),
            Err(OffTargetError::DistanceExceedsBuild { requested: 3, built: 1 })
        ));

        let report = QueryEngine::new(&sketch).run(&guides(&["AAA"]), &SearchRequest::new(0)).unwrap();
        match report.guides[0].outcome.as_ref().unwrap() {
            GuideSummary::Sketch(e) => {
                assert!(e.estimate >= 2);
                assert_eq!(e.neighbourhood, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn cancelled_batch_leaves_no_parts() {
        let tmp = tempfile::tempdir().unwrap();
        let db = toy_db(IndexKind::Linear, tmp.path());
        let out = tmp.path().join("cancel");
        let req = SearchRequest { detail: Some(out.join("hits.tsv")), ..SearchRequest::new(1) };
        let cancel = AtomicBool::new(true);
        let res = QueryEngine::new(&db).run_cancellable(&guides(&["AAA", "GAT"]), &req, &cancel);
        assert!(matches!(res, Err(OffTargetError::Cancelled)));
        assert_eq!(std::fs::read_dir(&out).unwrap().count(), 0);
    }

    #[test]
    fn guide_file_skips_comments_and_headers() {
        let input = "# guides\n>g1\nACGT\n\n  ttga  \n";
        assert_eq!(read_guides(input.as_bytes()).unwrap(), vec!["ACGT".to_string(), "ttga".to_string()]);
    }
}
