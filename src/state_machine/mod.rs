mod policy;
mod stage;

pub use policy::{AutoTransition, StagePolicy};
pub use stage::{ApplicationId, DocumentTally, Role, Stage};
