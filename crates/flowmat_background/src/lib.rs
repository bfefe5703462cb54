pub mod background;
pub mod entry;
pub mod error;
pub mod fragment;
pub mod product_flow;
pub mod resolver;
pub mod solver;
pub mod tarjan;

pub use background::{
    BackgroundManager, ForegroundMatrices, InventoryRow, MAX_SAFE_RECURSION_LIMIT,
    TraversalOptions,
};
pub use error::BackgroundError;
pub use fragment::Fragment;
pub use product_flow::{EmIndex, Emission, PfIndex, ProductFlow, TermRef};
pub use resolver::MultiTermStrategy;
pub use solver::csc::{CscBuilder, CscMatrix};
pub use solver::lci::{DEFAULT_COUNT, DEFAULT_THRESHOLD};
