use std::fmt::Display;
use std::io::{stdout, BufWriter};
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use clap::{Parser, ValueEnum};
use log::info;
use nalgebra::RealField;
use num_traits::Float;

use convexpath::{
    Continuation, ConvexBiClustering, ConvexClustering, FusionAxis, FusionGraph, PathConfig,
    Penalty, SparseCholesky,
};

use crate::ops::{display_bipath, display_path, edges_from_file, from_file, observed_mask};

mod ops;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PenaltyArg {
    L1,
    L2,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Bisect every step to fuse one edge at a time
    Adaptive,
    /// Grow the strength by a fixed factor
    Fixed,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Precision {
    F32,
    F64,
}

#[derive(Parser, Debug)]
#[command(version, about = "Path-following convex clustering and bi-clustering")]
struct Args {
    /// Path to tab-delimited input file, one labelled observation per line
    #[arg(short, long)]
    input: PathBuf,
    /// Row edge list `i\tj[\tw]`, default=complete graph
    #[arg(short, long)]
    edges: Option<PathBuf>,
    /// Column edge list; runs bi-clustering when given
    #[arg(long)]
    col_edges: Option<PathBuf>,
    /// Run bi-clustering over the complete column graph
    #[arg(short, long)]
    bicluster: bool,
    #[arg(short, long, value_enum, default_value_t = PenaltyArg::L2)]
    penalty: PenaltyArg,
    #[arg(short, long, value_enum, default_value_t = Mode::Adaptive)]
    mode: Mode,
    /// Growth factor of fixed mode
    #[arg(short, long, default_value_t = 1.01)]
    step: f64,
    /// Initial penalty strength
    #[arg(short, long, default_value_t = 1e-4)]
    lambda: f64,
    #[arg(long, default_value_t = 1.0)]
    rho: f64,
    #[arg(long, default_value_t = 10_000)]
    max_iter: usize,
    /// Steps before fixed mode starts growing
    #[arg(long, default_value_t = 50)]
    burn_in: usize,
    /// Record every `keep` steps besides fusion events
    #[arg(short, long, default_value_t = 10)]
    keep: usize,
    #[arg(short, long, default_value_t = 4)]
    threads: usize,
    /// Iterate ADMM to convergence at every strength
    #[arg(long)]
    exact: bool,
    #[arg(long, default_value_t = 1e-6)]
    thresh: f64,
    #[arg(long, default_value_t = 1000)]
    max_inner_iter: usize,
    #[arg(short = 'r', long, value_enum, default_value_t = Precision::F32)]
    precision: Precision,
}

fn cast<F: Float>(x: f64, name: &str) -> Result<F> {
    num_traits::cast(x).ok_or_else(|| anyhow!("{} = {} does not fit the precision", name, x))
}

fn config<F: Float>(args: &Args) -> Result<PathConfig<F>> {
    let continuation = match args.mode {
        Mode::Adaptive => Continuation::adaptive(),
        Mode::Fixed => Continuation::fixed(cast(args.step, "step")?),
    };
    let config = PathConfig {
        lambda_init: cast(args.lambda, "lambda")?,
        rho: cast(args.rho, "rho")?,
        max_iter: args.max_iter,
        burn_in: args.burn_in,
        keep: args.keep,
        threads: args.threads,
        continuation,
        ..PathConfig::default()
    };
    Ok(if args.exact {
        config.exact(cast(args.thresh, "thresh")?, args.max_inner_iter)
    } else {
        config
    })
}

fn run<F>(args: &Args) -> Result<()>
where
    F: Float + RealField + Copy + Send + Sync + FromStr,
    <F as FromStr>::Err: Display,
{
    let config = config::<F>(args)?;
    let rho = config.rho;
    let penalty = match args.penalty {
        PenaltyArg::L1 => Penalty::L1,
        PenaltyArg::L2 => Penalty::L2,
    };
    let (x, labels) = from_file::<F>(&args.input)?;
    let (n, p) = x.dim();
    let mask = observed_mask(&x);
    info!(
        "loaded {} observations with {} features{}",
        n,
        p,
        if mask.is_some() { ", some missing" } else { "" }
    );
    let rows = match &args.edges {
        Some(path) => edges_from_file(path, n)?,
        None => FusionGraph::complete(n),
    };
    let row_inc = rows.incidence(p)?;
    let row_axis = FusionAxis::from_graph(&rows, p, SparseCholesky::for_incidence(&row_inc, rho)?)?;
    let mut writer = BufWriter::new(stdout());

    let cols = match &args.col_edges {
        Some(path) => Some(edges_from_file(path, p)?),
        None if args.bicluster => Some(FusionGraph::complete(p)),
        None => None,
    };
    match cols {
        Some(cols) => {
            let col_inc = cols.incidence(n)?;
            let col_axis =
                FusionAxis::from_graph(&cols, n, SparseCholesky::for_incidence(&col_inc, rho)?)?;
            let bicluster = ConvexBiClustering::new(config);
            let result = match &mask {
                Some(mask) => bicluster.fit_masked(&x, mask, &row_axis, &col_axis, penalty)?,
                None => bicluster.fit(&x, &row_axis, &col_axis, penalty)?,
            };
            display_bipath(&mut writer, &result, &rows, &cols, &labels)
        }
        None => {
            let cluster = ConvexClustering::new(config);
            let result = match &mask {
                Some(mask) => cluster.fit_masked(&x, mask, &row_axis, penalty)?,
                None => cluster.fit(&x, &row_axis, penalty)?,
            };
            display_path(&mut writer, &result, &rows, &labels)
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    match args.precision {
        Precision::F64 => run::<f64>(&args),
        Precision::F32 => run::<f32>(&args),
    }
}
