use std::fmt::Display;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, ensure, Context, Result};
use ndarray::{Array1, Array2};
use num_traits::Float;

use convexpath::{BiClusteringPath, ClusteringPath, FusionGraph, FusionIndicator};

/// Reads in a file formatted as (tab separated):
///     id1 val1 val2 val3
///     id2 val1 val2 val3
///
/// All rows should be same length. Missing values are written `NA` or left
/// empty and come back as NaN
pub(crate) fn from_file<F>(p: &Path) -> Result<(Array2<F>, Vec<String>)>
where
    F: Float + FromStr,
    <F as FromStr>::Err: Display,
{
    let reader = BufReader::new(
        File::open(p).with_context(|| format!("unable to open {}", p.display()))?,
    );
    let mut labels = Vec::new();
    let mut data: Vec<F> = Vec::new();
    let mut width = None;
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        ensure!(
            line.contains('\t'),
            "input file is not tab-delimited at line {}",
            idx + 1
        );
        let mut fields = line.split('\t');
        // ID as first col
        labels.push(fields.next().unwrap_or_default().to_string());
        let mut n = 0;
        for s in fields {
            match s.trim() {
                "" | "NA" => data.push(F::nan()),
                s => match s.parse::<F>() {
                    Ok(v) => data.push(v),
                    Err(e) => bail!("error parsing line {}: {}", idx + 1, e),
                },
            }
            n += 1;
        }
        match width {
            None => width = Some(n),
            Some(w) => ensure!(w == n, "input rows must all be same length (line {})", idx + 1),
        }
    }
    ensure!(
        labels.len() > 1,
        "data file is empty or only contains a single entry"
    );
    let out = Array2::from_shape_vec((labels.len(), width.unwrap_or(0)), data)?;
    Ok((out, labels))
}

/// 1 for observed entries, 0 for NaN; `None` when nothing is missing
pub(crate) fn observed_mask<F: Float>(x: &Array2<F>) -> Option<Array2<F>> {
    if x.iter().any(|v| v.is_nan()) {
        Some(x.mapv(|v| if v.is_nan() { F::zero() } else { F::one() }))
    } else {
        None
    }
}

/// Reads an edge list over `n_obs` observations (tab separated, 0-based):
///     i j [weight]
///
/// Missing weights default to 1
pub(crate) fn edges_from_file<F>(p: &Path, n_obs: usize) -> Result<FusionGraph<F>>
where
    F: Float + FromStr + Send + Sync,
    <F as FromStr>::Err: Display,
{
    let reader = BufReader::new(
        File::open(p).with_context(|| format!("unable to open {}", p.display()))?,
    );
    let mut edges = Vec::new();
    let mut weights = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
        ensure!(
            fields.len() == 2 || fields.len() == 3,
            "edge line {} must hold two endpoints and an optional weight",
            idx + 1
        );
        let i = fields[0]
            .parse::<usize>()
            .with_context(|| format!("bad endpoint on edge line {}", idx + 1))?;
        let j = fields[1]
            .parse::<usize>()
            .with_context(|| format!("bad endpoint on edge line {}", idx + 1))?;
        let w = match fields.get(2) {
            Some(s) => match s.parse::<F>() {
                Ok(w) => w,
                Err(e) => bail!("bad weight on edge line {}: {}", idx + 1, e),
            },
            None => F::one(),
        };
        edges.push((i, j));
        weights.push(w);
    }
    FusionGraph::new(n_obs, edges, Array1::from(weights))
        .with_context(|| format!("invalid edge list {}", p.display()))
}

fn n_clusters(labels: &[usize]) -> usize {
    labels.iter().max().map_or(0, |m| m + 1)
}

fn write_clusters<W, L>(writer: &mut W, header: &str, labels: &[usize], names: &[L]) -> Result<()>
where
    W: Write,
    L: Display,
{
    for k in 0..n_clusters(labels) {
        let members: Vec<String> = labels
            .iter()
            .zip(names)
            .filter(|(l, _)| **l == k)
            .map(|(_, name)| name.to_string())
            .collect();
        writeln!(writer, ">{}={} size={}", header, k + 1, members.len())?;
        writeln!(writer, "{}", members.join(","))?;
    }
    Ok(())
}

fn fused_summary(fused: &FusionIndicator) -> String {
    format!("{}/{}", fused.count(), fused.len())
}

/// One line per checkpoint, then the clusters of the last one
pub(crate) fn display_path<W, F, L>(
    writer: &mut W,
    result: &ClusteringPath<F>,
    graph: &FusionGraph<F>,
    labels: &[L],
) -> Result<()>
where
    W: Write,
    F: Float + Send + Sync,
    L: Display,
{
    writeln!(
        writer,
        "Termination={:?} nSteps={} nCheckpoints={}",
        result.termination,
        result.iterations,
        result.path.len()
    )?;
    for c in result.path.iter() {
        writeln!(
            writer,
            "lambda={:.6e}\tfused={}\tclusters={}",
            c.lambda.to_f64().unwrap_or(f64::NAN),
            fused_summary(&c.fused),
            n_clusters(&graph.cluster_labels(&c.fused))
        )?;
    }
    if let Some(last) = result.path.last() {
        write_clusters(writer, "Cluster", &graph.cluster_labels(&last.fused), labels)?;
    }
    writer.flush()?;
    Ok(())
}

pub(crate) fn display_bipath<W, F, L>(
    writer: &mut W,
    result: &BiClusteringPath<F>,
    rows: &FusionGraph<F>,
    cols: &FusionGraph<F>,
    labels: &[L],
) -> Result<()>
where
    W: Write,
    F: Float + Send + Sync,
    L: Display,
{
    writeln!(
        writer,
        "Termination={:?} nSteps={} nCheckpoints={}",
        result.termination,
        result.iterations,
        result.path.len()
    )?;
    for c in result.path.iter() {
        writeln!(
            writer,
            "lambda={:.6e}\trows={}\trowClusters={}\tcols={}\tcolClusters={}",
            c.lambda.to_f64().unwrap_or(f64::NAN),
            fused_summary(&c.fused_row),
            n_clusters(&rows.cluster_labels(&c.fused_row)),
            fused_summary(&c.fused_col),
            n_clusters(&cols.cluster_labels(&c.fused_col))
        )?;
    }
    if let Some(last) = result.path.last() {
        write_clusters(writer, "RowCluster", &rows.cluster_labels(&last.fused_row), labels)?;
        let columns: Vec<usize> = (0..cols.n_obs()).collect();
        write_clusters(writer, "ColCluster", &cols.cluster_labels(&last.fused_col), &columns)?;
    }
    writer.flush()?;
    Ok(())
}
