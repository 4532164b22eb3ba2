use std::path::PathBuf;

use crate::routing::DEFAULT_ROUTE_TABLE_PATH;

/// Overrides the Alarm Manager HTTP base URL verbatim
pub const MANAGER_URL_ENV: &str = "ALARM_MANAGER_URL";
/// Alarm Manager bus service host, used together with [`SERVICE_PORT_ENV`]
pub const SERVICE_NAME_ENV: &str = "ALARM_MANAGER_SERVICE_NAME";
/// Alarm Manager bus service port, used together with [`SERVICE_NAME_ENV`]
pub const SERVICE_PORT_ENV: &str = "ALARM_MANAGER_SERVICE_PORT";
/// When unset, test mode is enabled and loopback endpoints apply
pub const IF_RMR_ENV: &str = "ALARM_IF_RMR";
/// Platform namespace substituted into the default service names
pub const NAMESPACE_ENV: &str = "PLT_NAMESPACE";

/// Managed object ids that map to a local loopback bus endpoint in test mode
const LOOPBACK_ENDPOINTS: &[(&str, &str)] = &[
    ("my-pod", "127.0.0.1:4560"),
    ("my-pod-lib", "127.0.0.1:4588"),
];

/// Client configuration
///
/// Built from the process environment with [`AlarmConfig::from_env`], or
/// from a namespace with [`AlarmConfig::new`] and adjusted with the
/// `with_*` setters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmConfig {
    /// HTTP base URL used for fallback delivery
    pub manager_url: String,

    /// `host:port` of the Alarm Manager on the bus
    pub bus_endpoint: String,

    /// Where bootstrap writes the static routing table
    pub route_table_path: PathBuf,

    /// Map well-known test managed object ids to loopback bus endpoints
    pub test_mode: bool,

    /// Treat non-2xx HTTP responses as delivery failures
    pub strict_http_status: bool,
}

impl AlarmConfig {
    /// Defaults for the given platform namespace
    pub fn new(namespace: &str) -> Self {
        Self {
            manager_url: format!("http://service-{namespace}-alarmmanager-http.{namespace}:8080"),
            bus_endpoint: format!("service-{namespace}-alarmmanager-rmr.{namespace}:4560"),
            route_table_path: PathBuf::from(DEFAULT_ROUTE_TABLE_PATH),
            test_mode: false,
            strict_http_status: false,
        }
    }

    /// Resolve the configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve the configuration from an arbitrary variable source
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.is_empty());

        let namespace = get(NAMESPACE_ENV).unwrap_or_default();
        let mut config = Self::new(&namespace);

        if let Some(url) = get(MANAGER_URL_ENV) {
            config.manager_url = url;
        }

        if let (Some(name), Some(port)) = (get(SERVICE_NAME_ENV), get(SERVICE_PORT_ENV)) {
            config.bus_endpoint = format!("{name}:{port}");
        }

        config.test_mode = get(IF_RMR_ENV).is_none();
        config
    }

    pub fn with_manager_url(mut self, url: impl Into<String>) -> Self {
        self.manager_url = url.into();
        self
    }

    pub fn with_bus_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.bus_endpoint = endpoint.into();
        self
    }

    pub fn with_route_table_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.route_table_path = path.into();
        self
    }

    pub fn with_test_mode(mut self, enabled: bool) -> Self {
        self.test_mode = enabled;
        self
    }

    pub fn with_strict_http_status(mut self, enabled: bool) -> Self {
        self.strict_http_status = enabled;
        self
    }

    /// Bus endpoint to route alarms raised by `managed_object_id` to
    ///
    /// In test mode the well-known test identities resolve to loopback
    /// addresses; everything else uses the configured endpoint.
    pub fn resolve_bus_endpoint(&self, managed_object_id: &str) -> String {
        if self.test_mode {
            if let Some(endpoint) = loopback_endpoint(managed_object_id) {
                return endpoint.to_string();
            }
        }
        self.bus_endpoint.clone()
    }
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self::new("")
    }
}

fn loopback_endpoint(managed_object_id: &str) -> Option<&'static str> {
    LOOPBACK_ENDPOINTS
        .iter()
        .find(|(mo, _)| *mo == managed_object_id)
        .map(|(_, endpoint)| *endpoint)
}
