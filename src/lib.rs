//! Connection and polling core for the Xadow smartstrap
//!
//! Keeps a link to the strap alive, reads its battery, GPS and NFC
//! attributes in turn and hands decoded values to a presenter.

pub mod controller;
pub mod endpoints;
pub mod format;
pub mod link;
pub mod protocol;
pub mod runtime;
pub mod strap;
pub mod system;
pub mod types;

#[cfg(test)]
mod testing;

pub use controller::*;
pub use types::*;
