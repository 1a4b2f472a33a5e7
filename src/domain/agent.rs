use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// An agent stays dispatchable for this many heartbeat intervals after its last ping.
pub const LIVENESS_INTERVALS: i64 = 3;

/// Host-port range `[min, max)` an agent lets the broker hand out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub min: u16,
    pub max: u16,
}

impl PortRange {
    /// Zero bounds mean the range is not configured and the runtime picks ports itself.
    pub fn from_bounds(min: u16, max: u16) -> Option<Self> {
        if min == 0 || max == 0 || min >= max {
            return None;
        }
        Some(Self { min, max })
    }

    pub fn contains(&self, port: u16) -> bool {
        port >= self.min && port < self.max
    }

    pub fn len(&self) -> usize {
        usize::from(self.max - self.min)
    }

    pub fn is_empty(&self) -> bool {
        self.min >= self.max
    }
}

/// Heartbeat payload an agent posts to `/ping`.
///
/// Wire names follow the agent protocol; the snake_case aliases let the same
/// struct be read from an agent config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    #[serde(rename = "ServiceHost", alias = "service_host", default)]
    pub service_host: String,
    #[serde(rename = "DockerHost", alias = "docker_host")]
    pub docker_host: String,
    #[serde(rename = "DockerPort", alias = "docker_port")]
    pub docker_port: u16,
    #[serde(rename = "IsActive", alias = "is_active", default)]
    pub is_active: bool,
    #[serde(rename = "PerfFactor", alias = "perf_factor", default)]
    pub perf_factor: f64,
    /// Heartbeat interval in seconds
    #[serde(rename = "KeepAlive", alias = "keep_alive", default)]
    pub keep_alive: i64,
    #[serde(rename = "ExecCommand", alias = "exec_command", default)]
    pub exec_command: String,
    /// Comma-separated program prefix used to reach into containers
    #[serde(rename = "ExecArgs", alias = "exec_args", default)]
    pub exec_args: String,
    #[serde(rename = "Portbind_min", alias = "port_min", default)]
    pub port_min: u16,
    #[serde(rename = "Portbind_max", alias = "port_max", default)]
    pub port_max: u16,
}

/// A remote docker host registered through heartbeats.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Agent {
    /// Address applications use to reach services on this agent
    pub service_host: String,
    pub docker_host: String,
    pub docker_port: u16,
    pub is_active: bool,
    pub last_ping: DateTime<Utc>,
    pub ping_interval_secs: i64,
    /// Opaque load score, lower means more available
    pub perf_factor: f64,
    pub exec_command: String,
    pub exec_args: String,
    pub port_range: Option<PortRange>,
    pub allocated_ports: BTreeSet<u16>,
}

impl Agent {
    pub fn from_heartbeat(heartbeat: &Heartbeat, now: DateTime<Utc>) -> Self {
        Self {
            service_host: heartbeat.service_host.clone(),
            docker_host: heartbeat.docker_host.clone(),
            docker_port: heartbeat.docker_port,
            is_active: heartbeat.is_active,
            last_ping: now,
            ping_interval_secs: heartbeat.keep_alive,
            perf_factor: heartbeat.perf_factor,
            exec_command: heartbeat.exec_command.clone(),
            exec_args: heartbeat.exec_args.clone(),
            port_range: PortRange::from_bounds(heartbeat.port_min, heartbeat.port_max),
            allocated_ports: BTreeSet::new(),
        }
    }

    /// Refresh liveness and settings from a new heartbeat, keeping port allocations.
    pub fn apply_heartbeat(&mut self, heartbeat: &Heartbeat, now: DateTime<Utc>) {
        let allocated = std::mem::take(&mut self.allocated_ports);
        *self = Self::from_heartbeat(heartbeat, now);
        self.allocated_ports = allocated;
    }

    /// `now - last_ping < 3 × heartbeat interval`
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        let window = Duration::seconds(LIVENESS_INTERVALS.saturating_mul(self.ping_interval_secs));
        now.signed_duration_since(self.last_ping) < window
    }

    pub fn runtime_address(&self) -> String {
        format!("{}:{}", self.docker_host, self.docker_port)
    }

    /// Executor prefix arguments from the comma-separated `exec_args`.
    pub fn exec_prefix(&self) -> Vec<String> {
        self.exec_args
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Snapshot of an agent's host-port bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortAllocations {
    pub range: Option<PortRange>,
    pub allocated: BTreeSet<u16>,
}
