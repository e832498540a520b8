pub use admm::{AdmmState, FusionAxis};
pub use biclustering::{BiClusteringPath, BiState, ConvexBiClustering};
pub use clustering::{ClusteringPath, ConvexClustering};
pub use config::{Continuation, InnerSolve, PathConfig};
pub use continuation::{Bisection, Decision, FusionCount, StepSize};
pub use fusion::FusionIndicator;
pub use incidence::{FusionGraph, FusionIncidence};
pub use operator::{adjoint, difference};
pub use path::{BiCheckpoint, Checkpoint, HasLambda, PathRecord, Termination};
pub use prox::{ElementwiseL1, GroupL2, Penalty, Shrinkage};
pub use solve::{system_matrix, LinearSolve, SolveFn, SparseCholesky};

mod admm;
mod biclustering;
mod clustering;
mod config;
mod continuation;
mod fusion;
mod incidence;
mod operator;
mod path;
mod prox;
mod solve;
