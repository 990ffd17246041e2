//! Release windows and the boundary table records are assigned against.

use serde::{Deserialize, Serialize};

/// One release window: everything up to `end_date` (exclusive) belongs to
/// `release_name`. The final release in a table is open-ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
  pub release_name: String,
  pub end_date:     i64,
}

/// A sorted boundary table of release windows.
#[derive(Debug, Clone, Default)]
pub struct ReleaseTable {
  releases: Vec<Release>,
}

impl ReleaseTable {
  /// Build a table from seed entries; names are lowercased and windows
  /// sorted ascending by end date.
  pub fn new(mut releases: Vec<Release>) -> Self {
    for release in &mut releases {
      release.release_name = release.release_name.to_lowercase();
    }
    releases.sort_by_key(|r| r.end_date);
    Self { releases }
  }

  /// Assign a timestamp to the first release whose `end_date` exceeds it.
  /// A timestamp exactly on a boundary belongs to the following release;
  /// anything past the last boundary falls into the final, open-ended
  /// release.
  pub fn assign(&self, timestamp: i64) -> &str {
    for release in &self.releases {
      if timestamp < release.end_date {
        return &release.release_name;
      }
    }
    self
      .releases
      .last()
      .map(|r| r.release_name.as_str())
      .unwrap_or("unknown")
  }

  pub fn is_empty(&self) -> bool {
    self.releases.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn table() -> ReleaseTable {
    ReleaseTable::new(vec![
      Release {
        release_name: "Icehouse".to_string(),
        end_date:     2000,
      },
      Release {
        release_name: "prehistory".to_string(),
        end_date:     1000,
      },
    ])
  }

  #[test]
  fn boundary_is_exclusive_below() {
    let t = table();
    assert_eq!(t.assign(999), "prehistory");
    assert_eq!(t.assign(1000), "icehouse");
    assert_eq!(t.assign(1999), "icehouse");
  }

  #[test]
  fn past_last_boundary_falls_into_final_release() {
    let t = table();
    assert_eq!(t.assign(2000), "icehouse");
    assert_eq!(t.assign(9_999_999), "icehouse");
  }
}
