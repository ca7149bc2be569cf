pub mod cache;
pub mod domain;
pub mod error;
pub mod orchestrator;
pub mod phase_engine;
pub mod ports;
pub mod reconciler;
pub mod settings;
pub mod store;
pub mod time;

pub use domain::*;
pub use error::ConductorError;
