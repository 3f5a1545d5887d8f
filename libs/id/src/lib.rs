//! # kiln-id
//!
//! Identifiers used across a kiln build.
//!
//! ## Build IDs
//!
//! Every pipeline run gets a prefixed ULID: `bld_01HV4Z2WQXKJNM8GPQY6VBKC3D`.
//! The ID is time-ordered, so logs and manifests from successive builds sort
//! naturally, and its random tail seeds the names of temporary cloud resources
//! (`kiln-vpc-3d9f1a`, `kiln_01HV4Z...` keypairs).
//!
//! ## Resource handles
//!
//! Cloud resources are identified by opaque strings chosen by the provider.
//! A [`ResourceHandle`] pairs that string with a [`ResourceKind`] tag. A handle
//! with an empty identifier means "not yet created" and is never live; cleanup
//! code relies on this to make rollback of a step that never created anything
//! a no-op.

mod handle;
mod types;

pub use handle::{ResourceHandle, ResourceKind};
pub use types::BuildId;
