//! dtseed-lib: converge a Dependency-Track instance to a target project count
//!
//! The crate is organised leaf to root:
//! - `client`: the `InventoryService` boundary and its HTTP implementation
//! - `readiness`: wait for the service to accept connections and answer
//! - `bootstrap`: log in, rotate the initial password, provision an API key
//! - `manifest`: load CycloneDX BOMs and derive project identities from them
//! - `poll`: wait for an upload token to finish processing
//! - `dispatch`: bounded-concurrency BOM uploads
//! - `sweep`: sequential deletion of the oldest projects
//! - `reconcile`: compute the delta and route to `dispatch` or `sweep`

pub mod bootstrap;
pub mod client;
pub mod consts;
pub mod dispatch;
pub mod manifest;
pub mod poll;
pub mod readiness;
pub mod reconcile;
pub mod sweep;

#[cfg(test)]
pub(crate) mod testutil;
