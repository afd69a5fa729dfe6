use crate::config::model::PanelConfig;
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::time::Duration;

const CONNECT_PROBE_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Debug)]
pub struct PortConflict {
    pub service: String,
    pub port: u16,
    pub owner: Option<String>,
}

impl std::fmt::Display for PortConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.owner {
            Some(owner) => write!(
                f,
                "Port {} required by '{}' is already in use by {}",
                self.port, self.service, owner
            ),
            None => write!(
                f,
                "Port {} required by '{}' is already in use",
                self.port, self.service
            ),
        }
    }
}

/// Point-in-time check whether something on this host listens on `port`.
///
/// Uses the kernel socket table when it is readable and falls back to a short
/// loopback connect otherwise. Any probe failure reads as "not in use".
pub fn is_port_in_use(port: u16) -> bool {
    match crate::platform::listening_ports() {
        Some(ports) => ports.contains(&port),
        None => connect_probe(port),
    }
}

fn connect_probe(port: u16) -> bool {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    TcpStream::connect_timeout(&addr, CONNECT_PROBE_TIMEOUT).is_ok()
}

/// First port of `candidates`, in order, that is currently listening.
pub fn first_listening(candidates: &[u16]) -> Option<u16> {
    match crate::platform::listening_ports() {
        Some(ports) => candidates.iter().copied().find(|p| ports.contains(p)),
        None => candidates.iter().copied().find(|p| connect_probe(*p)),
    }
}

/// Identify which process owns a given port.
pub fn identify_port_owner(port: u16) -> Option<String> {
    crate::platform::identify_port_owner(port)
}

/// Check every configured service port for a listener that is already there.
pub fn check_all_ports(config: &PanelConfig) -> Vec<PortConflict> {
    config
        .ordered_service_names()
        .into_iter()
        .filter_map(|name| {
            let port = config.services[&name].port;
            is_port_in_use(port).then(|| PortConflict {
                owner: identify_port_owner(port),
                service: name,
                port,
            })
        })
        .collect()
}

pub fn format_port_conflicts(conflicts: &[PortConflict]) -> String {
    let mut msg = String::from("Port conflicts detected:\n");
    for conflict in conflicts {
        msg.push_str(&format!("  - {}\n", conflict));
    }
    msg.push_str("\nStop the other process or change the port in devpanel.toml.");
    msg
}
