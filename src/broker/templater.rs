//! `$HOST` / `$PORT` / `$PORT_<n>` substitution in strategy responses.

use std::collections::BTreeMap;

use crate::domain::Credentials;
use crate::runtime::{container_port, PortMap};

const HOST_TOKEN: &str = "$HOST";
const PORT_TOKEN: &str = "$PORT";

/// Bind addresses that count as reachable through any host address.
const WILDCARD_ADDRS: [&str; 3] = ["0.0.0.0", "::", ""];

/// Host ports discovered for a container, as seen from the agent's service host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostBindings {
    /// container port -> host port
    pub ports: BTreeMap<u16, String>,
    /// Substituted for a bare `$PORT`
    pub default_port: Option<String>,
}

impl HostBindings {
    /// Keep bindings advertised on `service_host` or a wildcard address.
    /// The first such binding, in container-port order, becomes the default.
    pub fn from_port_map(ports: &PortMap, service_host: &str) -> Self {
        let mut bindings = Self::default();
        let mut specs: Vec<(u16, &String)> = ports
            .keys()
            .filter_map(|spec| container_port(spec).map(|port| (port, spec)))
            .collect();
        specs.sort();

        for (port, spec) in specs {
            let Some(Some(published)) = ports.get(spec) else {
                continue;
            };
            let reachable = published.iter().find(|b| {
                !b.host_port.is_empty()
                    && (b.host_ip == service_host || WILDCARD_ADDRS.contains(&b.host_ip.as_str()))
            });
            if let Some(binding) = reachable {
                bindings.ports.entry(port).or_insert_with(|| binding.host_port.clone());
                if bindings.default_port.is_none() {
                    bindings.default_port = Some(binding.host_port.clone());
                }
            }
        }
        bindings
    }

    pub fn host_port_for(&self, container_port: u16) -> Option<u16> {
        self.ports.get(&container_port).and_then(|p| p.parse().ok())
    }
}

/// Rewrite every value of `fields`. Unresolvable tokens are left as they are.
pub fn rewrite(fields: &Credentials, bindings: &HostBindings, service_host: &str) -> Credentials {
    fields
        .iter()
        .map(|(key, value)| (key.clone(), rewrite_value(value, bindings, service_host)))
        .collect()
}

fn rewrite_value(value: &str, bindings: &HostBindings, service_host: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(idx) = rest.find('$') {
        out.push_str(&rest[..idx]);
        let token = &rest[idx..];

        if let Some(after) = token.strip_prefix(HOST_TOKEN) {
            out.push_str(service_host);
            rest = after;
            continue;
        }

        if let Some(after) = token.strip_prefix(PORT_TOKEN) {
            if let Some(digits) = after.strip_prefix('_') {
                let len = digits.bytes().take_while(u8::is_ascii_digit).count();
                if len > 0 {
                    let resolved = digits[..len]
                        .parse::<u16>()
                        .ok()
                        .and_then(|port| bindings.ports.get(&port));
                    match resolved {
                        Some(host_port) => out.push_str(host_port),
                        None => out.push_str(&token[..PORT_TOKEN.len() + 1 + len]),
                    }
                    rest = &digits[len..];
                    continue;
                }
            }
            out.push_str(bindings.default_port.as_deref().unwrap_or(PORT_TOKEN));
            rest = after;
            continue;
        }

        out.push('$');
        rest = &token[1..];
    }

    out.push_str(rest);
    out
}
