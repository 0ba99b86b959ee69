use core::str::FromStr;
use std::slice;
use std::vec::Vec;

use domain::base::name::FromStrError;

use crate::types::StoredName;

//------------ Zones ---------------------------------------------------------

/// The zones a plugin is authoritative for.
#[derive(Clone, Debug, Default)]
pub struct Zones(Vec<StoredName>);

impl Zones {
    pub fn new(zones: Vec<StoredName>) -> Self {
        Zones(zones)
    }

    /// Parses zones from their presentation format.
    ///
    /// A trailing dot is optional, all names are taken as absolute.
    pub fn from_strs<S: AsRef<str>>(zones: &[S]) -> Result<Self, FromStrError> {
        zones
            .iter()
            .map(|zone| StoredName::from_str(zone.as_ref()))
            .collect::<Result<Vec<_>, _>>()
            .map(Zones)
    }

    /// Returns the zone owning `qname`.
    ///
    /// If several zones contain `qname`, the longest one wins.
    pub fn matches(&self, qname: &StoredName) -> Option<&StoredName> {
        self.0
            .iter()
            .filter(|zone| qname.ends_with(*zone))
            .max_by_key(|zone| zone.label_count())
    }

    pub fn contains(&self, zone: &StoredName) -> bool {
        self.0.iter().any(|item| item == zone)
    }

    pub fn iter(&self) -> slice::Iter<'_, StoredName> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a Zones {
    type Item = &'a StoredName;
    type IntoIter = slice::Iter<'a, StoredName>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

//------------ Tests ---------------------------------------------------------
