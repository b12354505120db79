//! nodewarden-node: everything that talks to the VPN node itself.
//!
//! The node's filesystem (reached through `docker exec` or the host shell)
//! is the only source of truth: no module here keeps long-lived state, every
//! read re-fetches from the node, and every mutation rewrites the backing
//! file wholesale. There is no mutual exclusion across concurrent create or
//! delete operations on the same backend; delete is idempotent so concurrent
//! sweeps and API calls stay safe.

pub mod alloc;
pub mod amnezia;
pub mod clients;
pub mod error;
pub mod exec;
pub mod label;
pub mod server;
pub mod store;
pub mod wgconf;
pub mod xray;
