//! Network access for the agent: request/response snapshots and the
//! `Network` seam the worker fetches through.

mod client;
#[cfg(test)]
pub mod mock;
mod types;

pub use client::{HttpNetwork, Network};
pub use types::{Destination, Request, Response};
