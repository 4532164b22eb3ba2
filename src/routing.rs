//! Static bus routing table.
//!
//! The bus runtime reads a small text document at startup that maps
//! message types to destination endpoints:
//!
//! ```text
//! newrt|start
//! rte|13111|service-ricplt-alarmmanager-rmr.ricplt:4560
//! newrt|end
//! ```

use std::fmt::{Display, Formatter};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tracing::debug;

use crate::errors::{AlarmError, Result};
use crate::types::RIC_ALARM_UPDATE;

/// Default location of the alarm routing table
pub const DEFAULT_ROUTE_TABLE_PATH: &str = "/tmp/alarm.rt";

/// Environment variable the bus runtime reads the routing table path from
pub const SEED_RT_ENV: &str = "RMR_SEED_RT";

/// Environment variable selecting the route manager service; `-1` disables it
pub const RTG_SVC_ENV: &str = "RMR_RTG_SVC";

const TABLE_START: &str = "newrt|start";
const TABLE_END: &str = "newrt|end";
const ROUTE_PREFIX: &str = "rte";

/// One `rte` line: a message type and where it goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub message_type: i32,
    pub endpoint: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    /// Table with the single alarm update route
    pub fn alarm(endpoint: &str) -> Self {
        Self {
            entries: vec![RouteEntry {
                message_type: RIC_ALARM_UPDATE,
                endpoint: endpoint.to_string(),
            }],
        }
    }

    pub fn with_route(mut self, message_type: i32, endpoint: impl Into<String>) -> Self {
        self.entries.push(RouteEntry {
            message_type,
            endpoint: endpoint.into(),
        });
        self
    }

    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First endpoint routed for a message type
    pub fn endpoint_for(&self, message_type: i32) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.message_type == message_type)
            .map(|entry| entry.endpoint.as_str())
    }

    /// Parse a routing table document
    ///
    /// Blank lines and `#` comments are ignored. Endpoint groups
    /// (`a,b;c`) resolve to their first endpoint.
    pub fn parse(document: &str) -> Result<Self> {
        let mut entries = Vec::new();
        let mut started = false;
        let mut ended = false;

        for (index, raw) in document.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match line {
                TABLE_START => {
                    started = true;
                    continue;
                }
                TABLE_END => {
                    if !started {
                        return Err(invalid(line_no, "table end before start"));
                    }
                    ended = true;
                    break;
                }
                _ => {}
            }

            if !started {
                return Err(invalid(line_no, "entry before table start"));
            }

            let fields: Vec<&str> = line.split('|').map(str::trim).collect();
            if fields.len() != 3 || fields[0] != ROUTE_PREFIX {
                return Err(invalid(line_no, &format!("unrecognised record '{line}'")));
            }

            let message_type = fields[1]
                .parse::<i32>()
                .map_err(|_| invalid(line_no, &format!("bad message type '{}'", fields[1])))?;

            let endpoint = fields[2]
                .split([',', ';'])
                .map(str::trim)
                .find(|endpoint| !endpoint.is_empty())
                .ok_or_else(|| invalid(line_no, "missing endpoint"))?;

            entries.push(RouteEntry {
                message_type,
                endpoint: endpoint.to_string(),
            });
        }

        if !ended {
            return Err(invalid(document.lines().count(), "missing table end"));
        }

        Ok(Self { entries })
    }

    /// Read and parse a routing table file
    pub async fn load(path: &Path) -> Result<Self> {
        let document = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| AlarmError::RouteFile {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse(&document)
    }

    /// Read the routing table published in the environment
    pub async fn load_from_env() -> Result<Self> {
        let path = std::env::var(SEED_RT_ENV)
            .map_err(|_| AlarmError::BusInit(format!("{SEED_RT_ENV} is not set")))?;
        Self::load(Path::new(&path)).await
    }
}

impl Display for RouteTable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{TABLE_START}")?;
        for entry in &self.entries {
            writeln!(f, "{ROUTE_PREFIX}|{}|{}", entry.message_type, entry.endpoint)?;
        }
        writeln!(f, "{TABLE_END}")
    }
}

fn invalid(line: usize, message: &str) -> AlarmError {
    AlarmError::RouteTable {
        line,
        message: message.to_string(),
    }
}

/// Write the routing table to `path` with mode `0644`
pub async fn write_route_table(path: &Path, table: &RouteTable) -> Result<()> {
    let file_error = |source| AlarmError::RouteFile {
        path: path.to_path_buf(),
        source,
    };

    tokio::fs::write(path, table.to_string())
        .await
        .map_err(file_error)?;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))
        .await
        .map_err(file_error)?;

    debug!(path = %path.display(), "Routing table written");
    Ok(())
}

/// Point the bus runtime at a static routing table
///
/// Disables the route manager so the runtime keeps the static table.
///
/// This mutates the process environment. Call it before other threads
/// may read the environment (resolver lookups included); the client does
/// so while it is being constructed, never from a spawned task.
pub fn publish_route_table_env(path: &Path) {
    std::env::set_var(SEED_RT_ENV, path);
    std::env::set_var(RTG_SVC_ENV, "-1");
}
