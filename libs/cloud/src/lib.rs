//! Cloud collaborators for kiln.
//!
//! The builder never talks HTTP itself. It drives narrow per-family traits
//! ([`ComputeApi`], [`NetworkApi`], [`AddressApi`], [`VolumeApi`],
//! [`ImageApi`]) bundled in a [`Cloud`]. [`SimulatedCloud`] implements all of
//! them in memory for local runs and tests.

mod api;
mod error;
pub mod models;
mod simulated;

pub use api::{
    AddressApi, Cloud, CloudResult, ComputeApi, ImageApi, NetworkApi, PasswordDecryptor,
    VolumeApi,
};
pub use error::CloudError;
pub use simulated::{Faults, ServerFault, SimulatedCloud, SimulatedDecryptor, SimulationSettings};
