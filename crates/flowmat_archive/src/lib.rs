mod archive;
mod characterization;
mod compartments;
mod entities;
mod error;
mod json;

pub use archive::Archive;
pub use characterization::CharacterizationDb;
pub use compartments::CompartmentClassifier;
pub use entities::{
    Direction, Exchange, Flow, FlowId, Process, ProcessId, Quantity, QuantityId,
};
pub use error::ArchiveError;
