//! # offtarget-hunter
//!
//! CRISPR guide 脱靶位点搜索引擎：在整条基因组上找出与 guide 在有界编辑距离内
//! 近似匹配、且满足 PAM 识别模式的所有位点。
//!
//! 本 crate 提供：
//!
//! - **候选提取**：按 motif 扫描基因组，去掉 PAM、在延伸端补齐 D 个碱基
//! - **有界比对**：带状、锚定、支持 IUPAC 简并碱基的编辑距离
//! - **三种索引**：前缀分桶线性索引、计数草图（只高估不低估）、每桶一棵 VP 树
//! - **批量查询**：按 guide 并行，按输入顺序汇总，可输出逐条比对明细
//!
//! ## 快速示例
//!
//! ```rust,no_run
//! use offtarget_hunter::genome::Genome;
//! use offtarget_hunter::index::{build_database, BuildOptions, Database, IndexKind};
//! use offtarget_hunter::motif::MotifSpec;
//! use offtarget_hunter::query::{QueryEngine, SearchRequest};
//!
//! # fn main() -> offtarget_hunter::error::Result<()> {
//! let genome = Genome::from_fasta("genome.fa".as_ref())?;
//! let motif = MotifSpec::named("Cas9")?.with_distance(3)?;
//! let opts = BuildOptions { kind: IndexKind::Tree, ..BuildOptions::default() };
//! build_database(&genome, &motif, &opts, "cas9_db".as_ref())?;
//!
//! let db = Database::open("cas9_db".as_ref())?;
//! let guides = vec!["GACGCATAAAGATGAGACGC".to_string()];
//! let report = QueryEngine::new(&db).run(&guides, &SearchRequest::new(2))?;
//! report.write_tsv(std::io::stdout())?;
//! # Ok(())
//! # }
//! ```
//!
//! ## 模块说明
//!
//! - [`motif`]：识别模式（guide 区 + PAM 掩码）与预置 Cas9 / Cas12a
//! - [`genome`]：只读基因组句柄、motif 扫描、候选提取
//! - [`align`]：有界编辑距离比对引擎
//! - [`index`]：前缀分桶与三种索引、数据库读写
//! - [`query`]：批量查询与结果输出
//! - [`io`]：FASTA 解析
//! - [`util`]：IUPAC / 反向互补等碱基工具

pub mod align;
pub mod error;
pub mod genome;
pub mod index;
pub mod io;
pub mod motif;
pub mod query;
pub mod util;
