//! Access control for outgoing zone transfers.

use std::error;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::string::String;
use std::vec::Vec;

/// The port assumed for entries that don't name one.
const DEFAULT_PORT: u16 = 53;

/// The entry that matches every client.
const ANY: &str = "*";

//------------ allowed() -----------------------------------------------------

/// Returns whether `remote` may receive a zone transfer.
///
/// Entries are either `*`, which allows everyone, or `host:port` pairs of
/// which only the host is compared. An empty list allows no one.
pub fn allowed(remote: IpAddr, allow_list: &[String]) -> bool {
    allow_list.iter().any(|entry| {
        if entry == ANY {
            return true;
        }
        match entry.parse::<SocketAddr>() {
            Ok(addr) => addr.ip() == remote,
            Err(_) => false,
        }
    })
}

//------------ normalize() ---------------------------------------------------

/// Normalizes an address entry into `host:port` form.
///
/// Accepts a bare address or an address with port. IPv6 addresses with a
/// port must be enclosed in brackets.
pub fn normalize(entry: &str) -> Result<String, AclError> {
    if let Ok(addr) = entry.parse::<SocketAddr>() {
        return Ok(addr.to_string());
    }
    let host = entry
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(entry);
    match host.parse::<IpAddr>() {
        Ok(addr) => Ok(SocketAddr::new(addr, DEFAULT_PORT).to_string()),
        Err(_) => Err(AclError::InvalidAddress(entry.into())),
    }
}

//------------ TransferAcl ---------------------------------------------------

/// The transfer peers of a zone.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TransferAcl {
    /// Who may transfer the zone from us.
    to: Vec<String>,

    /// Where we transfer the zone from.
    from: Vec<String>,
}

impl TransferAcl {
    /// Creates an ACL from `transfer to` and `transfer from` entries.
    ///
    /// `transfer from` only makes sense for secondaries and must list
    /// concrete addresses.
    pub fn new<S: AsRef<str>>(
        to: &[S],
        from: &[S],
        secondary: bool,
    ) -> Result<Self, AclError> {
        let to = to
            .iter()
            .map(|entry| match entry.as_ref() {
                ANY => Ok(ANY.into()),
                entry => normalize(entry),
            })
            .collect::<Result<Vec<_>, _>>()?;

        if !from.is_empty() && !secondary {
            return Err(AclError::FromWithoutSecondary);
        }
        let from = from
            .iter()
            .map(|entry| match entry.as_ref() {
                ANY => Err(AclError::WildcardFrom),
                entry => normalize(entry),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TransferAcl { to, from })
    }

    /// An ACL that allows everyone.
    pub fn any() -> Self {
        TransferAcl {
            to: vec![ANY.into()],
            from: Vec::new(),
        }
    }

    pub fn allows(&self, remote: IpAddr) -> bool {
        allowed(remote, &self.to)
    }

    pub fn transfer_to(&self) -> &[String] {
        &self.to
    }

    pub fn transfer_from(&self) -> &[String] {
        &self.from
    }
}

//------------ AclError ------------------------------------------------------

/// A transfer ACL entry could not be accepted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AclError {
    /// The entry is neither `*` nor an address.
    InvalidAddress(String),

    /// `*` was used in `transfer from`.
    WildcardFrom,

    /// `transfer from` was used for a zone we are primary for.
    FromWithoutSecondary,
}

//--- Display

impl fmt::Display for AclError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAddress(entry) => {
                write!(f, "invalid transfer address '{entry}'")
            }
            Self::WildcardFrom => f.write_str("can't use '*' in transfer from"),
            Self::FromWithoutSecondary => f.write_str(
                "can't use 'transfer from' when not being a secondary",
            ),
        }
    }
}

//--- Error

impl error::Error for AclError {}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn list(entries: &[&str]) -> Vec<String> {
        entries.iter().map(|entry| entry.to_string()).collect()
    }

    #[rstest]
    #[case(&["*"], "10.0.0.1", true)]
    #[case(&["10.0.0.2:53", "*"], "10.0.0.1", true)]
    #[case(&["10.0.0.1:53"], "10.0.0.1", true)]
    #[case(&["10.0.0.1:5353"], "10.0.0.1", true)]
    #[case(&["10.0.0.2:53"], "10.0.0.1", false)]
    #[case(&["[2001:db8::1]:53"], "2001:db8::1", true)]
    #[case(&["not-an-address"], "10.0.0.1", false)]
    #[case(&[], "10.0.0.1", false)]
    fn acl_matches(
        #[case] entries: &[&str],
        #[case] remote: &str,
        #[case] expected: bool,
    ) {
        assert_eq!(
            allowed(remote.parse().unwrap(), &list(entries)),
            expected
        );
    }

    #[rstest]
    #[case("10.0.0.1", "10.0.0.1:53")]
    #[case("10.0.0.1:5353", "10.0.0.1:5353")]
    #[case("2001:db8::1", "[2001:db8::1]:53")]
    #[case("[2001:db8::1]", "[2001:db8::1]:53")]
    #[case("[2001:db8::1]:5353", "[2001:db8::1]:5353")]
    fn entries_are_normalized(#[case] entry: &str, #[case] expected: &str) {
        assert_eq!(normalize(entry).unwrap(), expected);
    }

    #[test]
    fn bad_entries_are_rejected() {
        assert_eq!(
            normalize("ns.example.org"),
            Err(AclError::InvalidAddress("ns.example.org".into()))
        );
        assert_eq!(
            TransferAcl::new(&["10.0.0.1"], &["*"], true),
            Err(AclError::WildcardFrom)
        );
        assert_eq!(
            TransferAcl::new(&["10.0.0.1"], &["10.0.0.2"], false),
            Err(AclError::FromWithoutSecondary)
        );
    }

    #[test]
    fn acl_from_config_entries() {
        let acl = TransferAcl::new(&["*", "10.0.0.1"], &[], false).unwrap();
        assert_eq!(acl.transfer_to(), ["*", "10.0.0.1:53"]);
        assert!(acl.allows("192.0.2.1".parse().unwrap()));
        assert!(TransferAcl::default().transfer_to().is_empty());
        assert!(!TransferAcl::default().allows("10.0.0.1".parse().unwrap()));
    }
}
