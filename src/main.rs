use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use offtarget_hunter::genome::Genome;
use offtarget_hunter::index::{build_database, BuildOptions, Database, IndexKind, PivotRule};
use offtarget_hunter::motif::{ExtensionSide, MotifSpec};
use offtarget_hunter::query::{read_guides_file, QueryEngine, SearchRequest};

#[derive(Parser, Debug)]
#[command(
    name = "offtarget-hunter",
    author,
    version,
    about = "Off-target search for CRISPR guides under bounded edit distance",
    arg_required_else_help = true
)]
struct Cli {
    /// Log verbosity: -v info, -vv debug
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Worker threads (0 = all cores)
    #[arg(short = 't', long = "threads", default_value_t = 0, global = true)]
    threads: usize,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build an off-target database from a genome FASTA
    Build(BuildArgs),
    /// Search guides against a database
    Search(SearchArgs),
    /// Print database metadata and the top of one bucket
    Inspect {
        /// Database directory
        db: PathBuf,
        /// Bucket prefix (default: first bucket)
        #[arg(short, long)]
        prefix: Option<String>,
        /// Tree levels to print
        #[arg(short, long, default_value_t = 3)]
        levels: usize,
    },
}

#[derive(Args, Debug)]
struct BuildArgs {
    /// Genome FASTA
    genome: PathBuf,
    /// Output database directory (must not hold a database yet)
    #[arg(short, long)]
    out: PathBuf,
    /// Index kind: linear, sketch or tree
    #[arg(short, long, default_value = "linear")]
    kind: IndexKind,
    /// Preset motif (Cas9, Cas12a / Cpf1)
    #[arg(short, long, default_value = "Cas9", conflicts_with = "fwdmotif")]
    motif: String,
    /// Custom motif template, N = guide, X = PAM (needs --fwdpam)
    #[arg(long, requires = "fwdpam")]
    fwdmotif: Option<String>,
    /// Custom PAM template, X = guide, IUPAC = PAM base
    #[arg(long, requires = "fwdmotif")]
    fwdpam: Option<String>,
    /// Extension side of a custom motif: 5 or 3
    #[arg(long, default_value_t = 5)]
    extends: u8,
    /// Only scan the forward strand
    #[arg(long, conflicts_with = "reverse_only")]
    forward_only: bool,
    /// Only scan the reverse strand
    #[arg(long)]
    reverse_only: bool,
    /// Maximum distance supported by the database
    #[arg(short, long)]
    distance: Option<i32>,
    /// Database name
    #[arg(short, long, default_value = "offtargets")]
    name: String,
    #[arg(long = "prefix-len", default_value_t = 7)]
    prefix_len: usize,
    /// Sketch error probability
    #[arg(long = "probability-of-error", default_value_t = 0.001)]
    probability_of_error: f64,
    /// Sketch counter ceiling
    #[arg(long = "max-count", default_value_t = 255)]
    max_count: u32,
    #[arg(long = "leaf-size", default_value_t = 16)]
    leaf_size: usize,
    /// Tree metric cap (default: the build distance)
    #[arg(long = "metric-cap")]
    metric_cap: Option<u32>,
    /// Pick VP-tree pivots randomly with this seed
    #[arg(long = "random-pivot")]
    random_pivot: Option<u64>,
}

#[derive(Args, Debug)]
struct SearchArgs {
    /// Database directory
    db: PathBuf,
    /// Guides, one per line (no PAM)
    guides: PathBuf,
    /// Search distance (<= build distance)
    #[arg(short, long)]
    distance: u32,
    /// Write every hit with its alignment to this file
    #[arg(long)]
    detail: Option<PathBuf>,
    /// Summary output (stdout if omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .init();
    if cli.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(cli.threads)
            .build_global()
            .context("cannot configure the thread pool")?;
    }

    match cli.command {
        Commands::Build(args) => run_build(args),
        Commands::Search(args) => run_search(args),
        Commands::Inspect { db, prefix, levels } => run_inspect(&db, prefix.as_deref(), levels),
    }
}

fn motif_from_args(args: &BuildArgs) -> Result<MotifSpec> {
    let mut motif = match (&args.fwdmotif, &args.fwdpam) {
        (Some(fwdmotif), Some(fwdpam)) => {
            let extension = match args.extends {
                5 => ExtensionSide::FivePrime,
                3 => ExtensionSide::ThreePrime,
                other => anyhow::bail!("--extends must be 5 or 3, got {}", other),
            };
            MotifSpec::new("custom", fwdmotif, fwdpam, true, true, 4, extension)?
        }
        _ => MotifSpec::named(&args.motif)?,
    };
    if let Some(d) = args.distance {
        motif = motif.with_distance(d)?;
    }
    if args.forward_only || args.reverse_only {
        motif = motif.with_strands(!args.reverse_only, !args.forward_only)?;
    }
    Ok(motif)
}

fn run_build(args: BuildArgs) -> Result<()> {
    let motif = motif_from_args(&args)?;
    let genome = Genome::from_fasta(&args.genome)
        .with_context(|| format!("cannot read genome FASTA '{}'", args.genome.display()))?;

    let opts = BuildOptions {
        name: args.name.clone(),
        kind: args.kind,
        prefix_len: args.prefix_len,
        probability_of_error: args.probability_of_error,
        max_count: args.max_count,
        leaf_size: args.leaf_size,
        metric_cap: args.metric_cap,
        pivot: args.random_pivot.map_or(PivotRule::First, |seed| PivotRule::Random { seed }),
        build_args: Some(std::env::args().collect::<Vec<_>>().join(" ")),
    };
    let meta = build_database(&genome, &motif, &opts, &args.out)
        .with_context(|| format!("cannot build database in '{}'", args.out.display()))?;

    println!("database: {}", args.out.display());
    println!("kind: {}", meta.kind);
    println!("motif: {}", meta.motif);
    println!("contigs: {}", meta.contigs.len());
    println!("candidates: {}", meta.candidates);
    Ok(())
}

fn run_search(args: SearchArgs) -> Result<()> {
    let db = Database::open(&args.db).with_context(|| format!("cannot open database '{}'", args.db.display()))?;
    let guides = read_guides_file(&args.guides)
        .with_context(|| format!("cannot read guides '{}'", args.guides.display()))?;

    let req = SearchRequest {
        distance: args.distance,
        detail: args.detail.clone(),
        keep_hits: false,
    };
    let report = QueryEngine::new(&db).run(&guides, &req)?;

    let out: Box<dyn Write> = match &args.out {
        Some(p) => Box::new(std::io::BufWriter::new(
            std::fs::File::create(p).with_context(|| format!("cannot create '{}'", p.display()))?,
        )),
        None => Box::new(std::io::BufWriter::new(std::io::stdout())),
    };
    report.write_tsv(out)?;

    if report.failed() > 0 {
        eprintln!("{} of {} guides could not be searched", report.failed(), report.guides.len());
    }
    Ok(())
}

fn run_inspect(dir: &Path, prefix: Option<&str>, levels: usize) -> Result<()> {
    let db = Database::open(dir).with_context(|| format!("cannot open database '{}'", dir.display()))?;
    let meta = db.meta();
    println!("name: {}", meta.name);
    println!("kind: {}", meta.kind);
    println!("format: {}", meta.format_version);
    println!("motif: {}", meta.motif);
    println!("prefix length: {}", meta.prefix_len);
    println!("contigs: {}", meta.contigs.join(", "));
    println!("candidates: {}", meta.candidates);
    if let Some(ts) = &meta.build_timestamp {
        println!("built: {}", ts);
    }
    if let Some(args) = &meta.build_args {
        println!("command: {}", args);
    }
    if meta.kind == IndexKind::Linear && prefix.is_none() {
        return Ok(());
    }
    print!("{}", db.inspect(prefix, levels)?);
    Ok(())
}
