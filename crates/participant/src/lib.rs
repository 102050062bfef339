//! Publishers, subscribers and the broker.
//!
//! Every role composes a [`Middleware`]: it registers through a
//! [`Directory`] (the discovery leader, or coordination nodes directly),
//! waits for readiness and then runs its event loop. Application code hooks
//! in through [`ParticipantHandler`].
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod broker;
mod client;
mod config;
mod directory;
mod error;
mod handler;
mod leader;
mod lifecycle;
mod middleware;
mod publisher;
mod subscriber;

pub use broker::Broker;
pub use client::DiscoveryClient;
pub use config::{ClientOptions, ParticipantConfig};
pub use directory::{CoordinatedDirectory, Directory};
pub use error::Error;
pub use handler::{NoopHandler, ParticipantHandler};
pub use leader::{LeaderChange, LeaderTracker};
pub use lifecycle::Lifecycle;
pub use middleware::{Middleware, Participant};
pub use publisher::Publisher;
pub use subscriber::Subscriber;
