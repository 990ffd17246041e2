//! The identity-lookup collaborator seam.
//!
//! Implementations wrap an external profile service. Failures of any kind
//! (network, not-found, malformed input) must surface as `None`; the resolver
//! treats a missing answer as "no signal" and moves on, never aborting the
//! batch.

/// A remote profile discovered by email.
#[derive(Debug, Clone)]
pub struct RemoteIdentity {
  pub handle:       String,
  pub display_name: String,
}

pub trait IdentityLookup {
  /// Resolve an email to an external profile handle, if the service knows
  /// one.
  fn lookup_by_email(&self, email: &str) -> Option<RemoteIdentity>;

  /// Resolve a handle to a display name, if the service knows one.
  fn lookup_by_handle(&self, handle: &str) -> Option<String>;
}

/// A lookup that knows nothing, for offline runs and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLookup;

impl IdentityLookup for NullLookup {
  fn lookup_by_email(&self, _email: &str) -> Option<RemoteIdentity> {
    None
  }

  fn lookup_by_handle(&self, _handle: &str) -> Option<String> {
    None
  }
}
