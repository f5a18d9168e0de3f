//! Firewall/NAT rules for peer traffic
//!
//! Peers reach the outside world through masquerading on the uplink
//! interface, and the listen port must accept inbound UDP. Rules are
//! tracked as they are applied so shutdown can delete exactly what was
//! added; rule removal is best-effort.

use std::net::Ipv4Addr;
use std::sync::Arc;

use crate::command::CommandRunner;
use crate::error::Result;

/// Manager for the iptables rules backing one interface
pub struct Firewall {
    runner: Arc<dyn CommandRunner>,
    applied: Vec<Vec<String>>,
}

impl Firewall {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            applied: Vec::new(),
        }
    }

    /// The add-form rule set for an interface
    fn rule_set(
        server_address: Ipv4Addr,
        listen_port: u16,
        interface: &str,
        out_interface: &str,
    ) -> Vec<Vec<String>> {
        let source = format!("{}/24", server_address);
        let port = listen_port.to_string();
        vec![
            vec![
                "-t".into(), "nat".into(), "-A".into(), "POSTROUTING".into(),
                "-s".into(), source, "-o".into(), out_interface.into(),
                "-j".into(), "MASQUERADE".into(),
            ],
            vec![
                "-A".into(), "INPUT".into(), "-p".into(), "udp".into(),
                "-m".into(), "udp".into(), "--dport".into(), port,
                "-j".into(), "ACCEPT".into(),
            ],
            vec![
                "-A".into(), "FORWARD".into(), "-i".into(), interface.into(),
                "-j".into(), "ACCEPT".into(),
            ],
            vec![
                "-A".into(), "FORWARD".into(), "-o".into(), interface.into(),
                "-j".into(), "ACCEPT".into(),
            ],
        ]
    }

    /// Flip an add-form rule into its delete form
    fn delete_form(rule: &[String]) -> Vec<String> {
        let mut out = rule.to_vec();
        if let Some(flag) = out.iter_mut().find(|a| *a == "-A") {
            *flag = "-D".to_string();
        }
        out
    }

    /// Apply masquerade, input-accept and forward rules
    pub async fn apply(
        &mut self,
        server_address: Ipv4Addr,
        listen_port: u16,
        interface: &str,
        out_interface: &str,
    ) -> Result<()> {
        for rule in Self::rule_set(server_address, listen_port, interface, out_interface) {
            let args: Vec<&str> = rule.iter().map(String::as_str).collect();
            self.runner.run("iptables", &args, None).await?;
            self.applied.push(rule);
        }
        log::info!(
            "firewall rules applied for {} ({} via {})",
            interface,
            server_address,
            out_interface
        );
        Ok(())
    }

    /// Delete every applied rule, best-effort
    pub async fn remove(&mut self) {
        for rule in self.applied.drain(..) {
            let delete = Self::delete_form(&rule);
            let args: Vec<&str> = delete.iter().map(String::as_str).collect();
            if let Err(e) = self.runner.run("iptables", &args, None).await {
                log::warn!("failed to delete firewall rule {:?}: {}", delete, e);
            }
        }
    }
}
