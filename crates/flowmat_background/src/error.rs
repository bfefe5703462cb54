use thiserror::Error;

use flowmat_archive::ArchiveError;

use crate::solver::csc::CscError;

#[derive(Debug, Error)]
pub enum BackgroundError {
    /// The archive needs more traversal frames than the configured budget
    /// allows.  Fatal: raised before or during traversal, never recovered.
    #[error("database exceeds recursion budget ({required} frames required, limit {limit})")]
    RecursionBudgetExceeded { required: usize, limit: usize },

    /// A frozen matrix would have to be rebuilt.  Programming error: product
    /// flows must not be added once A*/B* exist if they grow the background.
    #[error("{matrix} matrix already assembled")]
    DoubleAssembly { matrix: &'static str },

    /// An entry was normalized twice.  Programming error in the drain logic.
    #[error("matrix entry (column {parent}) normalized twice")]
    RepeatAdjustment { parent: usize },

    #[error("unknown multi-termination strategy '{0}' (expected cutoff, mix, first or last)")]
    UnknownMultiTermStrategy(String),

    /// The foreground system (I - Af) could not be solved.  Valid archives
    /// have acyclic foregrounds, for which this cannot happen.
    #[error("foreground system is singular at column {col}")]
    SingularForeground { col: usize },

    #[error("product flow {0} is not known to the manager")]
    UnknownProductFlow(usize),

    #[error(transparent)]
    Csc(#[from] CscError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}
