//! Plugin configuration.
//!
//! [`Config`] is the configuration block of a backend plugin as read from
//! a configuration file. It is checked and turned into the typed values the
//! components run with: a [`ResolverConfig`] for the resolver, a
//! [`TransferAcl`] for zone transfer and, if present, a [`StoreConfig`] for
//! the key/value store client.

use std::error;
use std::fmt;
use std::string::String;
use std::time::Duration;
use std::vec::Vec;

use serde::Deserialize;

use crate::plugin::Zones;
use crate::transfer::{AclError, TransferAcl};

/// The default time a backend lookup may take.
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// The default interval between stub zone updates.
const STUB_REFRESH: Duration = Duration::from_secs(15);

//------------ ResolverConfig ------------------------------------------------

/// Configuration of a resolver.
#[derive(Clone, Debug)]
pub struct ResolverConfig {
    zones: Zones,
    fallthrough: bool,
    lookup_timeout: Duration,
}

impl ResolverConfig {
    /// Creates a new, default config.
    pub fn new() -> Self {
        Default::default()
    }

    pub fn zones(&self) -> &Zones {
        &self.zones
    }

    /// Sets the zones the resolver is authoritative for.
    ///
    /// There are no zones by default, i.e., all requests are passed on.
    ///
    /// # Reconfigure
    ///
    /// On [`Resolver::reconfigure`] any change to this setting will only
    /// affect requests arriving after the change.
    ///
    /// [`Resolver::reconfigure`]: crate::resolver::Resolver::reconfigure
    pub fn set_zones(&mut self, zones: Zones) {
        self.zones = zones;
    }

    pub fn fallthrough(&self) -> bool {
        self.fallthrough
    }

    /// Sets whether names that don't exist are passed on to the next
    /// plugin instead of being answered with NXDOMAIN.
    ///
    /// The default is false.
    pub fn set_fallthrough(&mut self, value: bool) {
        self.fallthrough = value;
    }

    pub fn lookup_timeout(&self) -> Duration {
        self.lookup_timeout
    }

    /// Sets the time all backend lookups for a single request may take.
    ///
    /// The default is five seconds. Running out of time results in
    /// SERVFAIL.
    pub fn set_lookup_timeout(&mut self, value: Duration) {
        self.lookup_timeout = value;
    }
}

//--- Default

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            zones: Zones::default(),
            fallthrough: false,
            lookup_timeout: LOOKUP_TIMEOUT,
        }
    }
}

//------------ Config --------------------------------------------------------

/// The configuration block of a backend plugin.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// The zones to be authoritative for.
    pub zones: Vec<String>,

    /// Pass requests for names that don't exist on to the next plugin.
    pub fallthrough: bool,

    /// Discover stub zones from the store.
    pub stubzones: bool,

    /// Seconds between two stub zone updates.
    pub stub_refresh: u64,

    /// Clients allowed to transfer the zones.
    pub transfer_to: Vec<String>,

    /// Servers to transfer zones from. Only allowed for secondaries.
    pub transfer_from: Vec<String>,

    /// Whether the plugin is a secondary.
    pub secondary: bool,

    /// Milliseconds the backend lookups of a request may take.
    pub lookup_timeout: u64,

    pub store: Option<StoreConfig>,
}

impl Config {
    /// Returns the resolver config described by this block.
    pub fn resolver_config(&self) -> Result<ResolverConfig, ConfigError> {
        if self.zones.is_empty() {
            return Err(ConfigError::NoZones);
        }
        let zones = Zones::from_strs(&self.zones).map_err(|_| {
            ConfigError::InvalidZone(self.zones.join(" "))
        })?;
        if self.lookup_timeout == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        let mut config = ResolverConfig::new();
        config.set_zones(zones);
        config.set_fallthrough(self.fallthrough);
        config.set_lookup_timeout(Duration::from_millis(self.lookup_timeout));
        Ok(config)
    }

    /// Returns the transfer ACL described by this block.
    pub fn transfer_acl(&self) -> Result<TransferAcl, ConfigError> {
        Ok(TransferAcl::new(
            &self.transfer_to,
            &self.transfer_from,
            self.secondary,
        )?)
    }

    /// Returns the interval for stub zone updates if they are enabled.
    pub fn stub_refresh(&self) -> Option<Duration> {
        match (self.stubzones, self.stub_refresh) {
            (false, _) => None,
            (true, 0) => Some(STUB_REFRESH),
            (true, secs) => Some(Duration::from_secs(secs)),
        }
    }

    /// Returns the store config after checking it.
    pub fn store(&self) -> Result<Option<&StoreConfig>, ConfigError> {
        let Some(store) = self.store.as_ref() else {
            return Ok(None);
        };
        if store.username.is_some() != store.password.is_some() {
            return Err(ConfigError::Credentials);
        }
        if store.endpoints.is_empty() {
            return Err(ConfigError::NoEndpoints);
        }
        Ok(Some(store))
    }
}

//--- Default

impl Default for Config {
    fn default() -> Self {
        Config {
            zones: Vec::new(),
            fallthrough: false,
            stubzones: false,
            stub_refresh: STUB_REFRESH.as_secs(),
            transfer_to: Vec::new(),
            transfer_from: Vec::new(),
            secondary: false,
            lookup_timeout: LOOKUP_TIMEOUT.as_millis() as u64,
            store: None,
        }
    }
}

//------------ StoreConfig ---------------------------------------------------

/// How to reach the key/value store.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub endpoints: Vec<String>,

    /// The first element of every key.
    pub path: String,

    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            endpoints: vec![DEFAULT_ENDPOINT.into()],
            path: DEFAULT_PATH.into(),
            username: None,
            password: None,
        }
    }
}

/// The endpoint used if none is configured.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:2379";

/// The key prefix used if none is configured.
pub const DEFAULT_PATH: &str = "skydns";

//------------ ConfigError ---------------------------------------------------

/// A configuration block is invalid.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    /// No zones were given.
    NoZones,

    /// A zone isn't a valid domain name.
    InvalidZone(String),

    /// The lookup timeout is zero.
    ZeroTimeout,

    /// The transfer configuration is invalid.
    Acl(AclError),

    /// Only one of username and password was given.
    Credentials,

    /// The store has no endpoints.
    NoEndpoints,
}

//--- From

impl From<AclError> for ConfigError {
    fn from(err: AclError) -> Self {
        Self::Acl(err)
    }
}

//--- Display

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoZones => f.write_str("no zones configured"),
            Self::InvalidZone(zones) => write!(f, "invalid zone in '{zones}'"),
            Self::ZeroTimeout => f.write_str("lookup timeout must not be 0"),
            Self::Acl(err) => write!(f, "transfer: {err}"),
            Self::Credentials => {
                f.write_str("username and password must be given together")
            }
            Self::NoEndpoints => f.write_str("store needs an endpoint"),
        }
    }
}

//--- Error

impl error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Acl(err) => Some(err),
            _ => None,
        }
    }
}

//------------ Tests ---------------------------------------------------------
