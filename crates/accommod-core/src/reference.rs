//! Reference tables offered as option lists to the UI.
//!
//! The table is chosen once, by parsing its name into [`ReferenceTable`];
//! backends then `match` on the variant.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoEnumIterator};

use crate::{accommodation::AccommodationDomain, subject::AssignmentKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum ReferenceTable {
  Services,
  AccommodationDomains,
  AssignmentKinds,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceOption {
  pub value:  String,
  pub label:  String,
  pub active: bool,
}

impl ReferenceTable {
  /// Options of tables backed by an enum rather than by stored rows.
  pub fn static_options(self) -> Option<Vec<ReferenceOption>> {
    let option = |value: &'static str| ReferenceOption {
      value:  value.to_string(),
      label:  value.replace('_', " "),
      active: true,
    };
    match self {
      Self::Services => None,
      Self::AccommodationDomains => Some(
        AccommodationDomain::iter()
          .map(|d| option(d.discriminant()))
          .collect(),
      ),
      Self::AssignmentKinds => {
        Some(AssignmentKind::iter().map(|k| option(k.discriminant())).collect())
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn table_names_parse() {
    assert_eq!(
      "accommodation-domains".parse::<ReferenceTable>().unwrap(),
      ReferenceTable::AccommodationDomains
    );
    assert!("accommodation_domains".parse::<ReferenceTable>().is_err());
    assert_eq!(ReferenceTable::AssignmentKinds.to_string(), "assignment-kinds");
  }

  #[test]
  fn static_tables_list_their_variants() {
    let domains = ReferenceTable::AccommodationDomains.static_options().unwrap();
    assert_eq!(domains.len(), 3);
    assert_eq!(domains[0].value, "exam");
    assert!(ReferenceTable::Services.static_options().is_none());
  }
}
