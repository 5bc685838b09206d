//! Request/response model and the network side of the shell.

mod client;
#[cfg(test)]
pub(crate) mod testing;
mod types;

pub use client::{Network, NetworkClient};
pub use types::{Destination, Request, Response, ResponseType};
