pub mod analyzer;
pub mod api;
pub mod config;
pub mod events;
pub mod executor;
pub mod optimizer;
pub mod protocol;
pub mod recorder;
pub mod replay;
pub mod snapshot;
pub mod storage;
pub mod store;
pub mod target;

pub use api::Orchestrator;
pub use orbit_common::{action, envelope, modality, recording, result};
