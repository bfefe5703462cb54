use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("duplicate {kind} uuid '{uuid}'")]
    DuplicateUuid { kind: &'static str, uuid: String },

    #[error("unknown {kind} uuid '{uuid}'")]
    UnknownUuid { kind: &'static str, uuid: String },

    #[error("allocation of process '{process}' by quantity '{quantity}' sums to zero")]
    EmptyAllocation { process: String, quantity: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
