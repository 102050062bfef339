//! Discovery role: registration, readiness and topic lookups, served by
//! whichever replica holds the coordination leader node.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod config;
mod error;
mod handler;
mod service;
mod snapshot;
mod state;

pub use config::DiscoveryConfig;
pub use error::Error;
pub use handler::DiscoveryHandler;
pub use service::DiscoveryService;
pub use snapshot::DiscoverySnapshot;
pub use state::DiscoveryState;
