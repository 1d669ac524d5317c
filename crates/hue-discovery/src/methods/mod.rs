//! Discovery strategies.
//!
//! Each submodule exposes its protocol task and a `method` constructor that
//! wraps the task in a [`MethodSearch`](crate::method::MethodSearch).

pub mod ipscan;
pub mod mdns;
pub mod nupnp;
pub mod upnp;
