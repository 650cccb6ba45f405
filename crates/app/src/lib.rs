/**
 * Configuration and on-disk layout of a tessera installation
 */
pub mod state;

/**
 * Builds the orchestrator, backends and download chain
 *  from a loaded installation
 */
pub mod service;

/**
 * Logging setup and process hooks for the binary
 */
pub mod process;

pub mod version;

pub use service::{Service, ServiceError};
pub use state::{AppConfig, AppState, StateError};
