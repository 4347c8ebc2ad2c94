//! AirDash backend.
//!
//! Two devices pair by each posting `{localCode, remoteCode, deviceKey}`.
//! Each request publishes an advertisement into a shared document collection
//! and waits for the counterpart's advertisement (its `remoteCode` equal to
//! our `localCode`). Adverts are single-use mailboxes: the first reader
//! deletes them. A scheduled job keeps WebRTC ICE server credentials fresh in
//! the app info document.

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod ice;
pub mod pairing;
pub mod server;
pub mod store;

pub use config::Config;
pub use error::{Error, ErrorKind};
pub use pairing::{PairingCoordinator, PairingRequest, PairingResult};
pub use store::{DocumentStore, InMemoryStore};
