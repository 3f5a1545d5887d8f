//! Typed ID definitions.

use std::fmt;

use ulid::Ulid;

/// Identifies one pipeline run, e.g. `bld_01HV4Z2WQXKJNM8GPQY6VBKC3D`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BuildId(Ulid);

impl BuildId {
    pub const PREFIX: &'static str = "bld";

    /// Creates a new ID with a fresh ULID.
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Returns the last `len` characters of the ULID, lowercased.
    ///
    /// These come from the random part of the ULID, so two IDs minted in the
    /// same millisecond still differ.
    fn short(&self, len: usize) -> String {
        let encoded = self.0.to_string().to_lowercase();
        let start = encoded.len().saturating_sub(len);
        encoded[start..].to_string()
    }

    /// Name for a temporary resource created by this build, e.g.
    /// `kiln-vpc-3d9f1a`.
    #[must_use]
    pub fn temp_name(&self, what: &str) -> String {
        format!("kiln-{}-{}", what, self.short(6))
    }

    /// Name for the temporary keypair registered by this build.
    ///
    /// Keypair names must be unique per project, so the full ULID is used.
    #[must_use]
    pub fn keypair_name(&self) -> String {
        format!("kiln_{}", self.0.to_string().to_lowercase())
    }
}

impl Default for BuildId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", Self::PREFIX, self.0)
    }
}

// =============================================================================
// Tests
// =============================================================================
