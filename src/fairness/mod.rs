pub mod controller;
pub mod share;

pub use controller::FairnessController;
pub use share::{compute_revisions, JobUsage};
