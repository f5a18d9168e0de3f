//! Tunnel address allocation
//!
//! Addresses are drawn from a template with a single `x` host placeholder
//! (e.g. `10.8.0.x`). Host 1 belongs to the server; peers are allocated
//! from 2 up to 254, always taking the lowest free host.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use crate::error::{Error, Result};

/// Highest host identifier allocatable from a template
pub const MAX_HOST: u8 = 254;

/// An address-space template with one substitutable host token
#[derive(Debug, Clone)]
pub struct AddressTemplate {
    prefix: String,
    suffix: String,
}

impl AddressTemplate {
    /// Parse a template string containing exactly one `x` placeholder
    pub fn parse(template: &str) -> Result<Self> {
        let mut parts = template.split('x');
        let (prefix, suffix) = match (parts.next(), parts.next(), parts.next()) {
            (Some(prefix), Some(suffix), None) => (prefix, suffix),
            _ => {
                return Err(Error::Config(format!(
                    "address template \"{}\" must contain exactly one `x` placeholder",
                    template
                )))
            }
        };

        let parsed = Self {
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
        };

        // A degenerate template fails on the endpoints of the host range
        parsed.at(1)?;
        parsed.at(MAX_HOST)?;

        Ok(parsed)
    }

    /// Substitute a host identifier into the template
    pub fn at(&self, host: u8) -> Result<Ipv4Addr> {
        let candidate = format!("{}{}{}", self.prefix, host, self.suffix);
        candidate
            .parse()
            .map_err(|_| Error::InvalidAddress(candidate))
    }

    /// The server's own address: the template's first usable host
    pub fn server_address(&self) -> Result<Ipv4Addr> {
        self.at(1)
    }

    /// Recover the host identifier of an address within this template
    pub fn host_of(&self, address: Ipv4Addr) -> Option<u8> {
        let text = address.to_string();
        let host: u8 = text
            .strip_prefix(&self.prefix)?
            .strip_suffix(&self.suffix)?
            .parse()
            .ok()?;
        if host == 0 {
            return None;
        }
        // Round-trip guards against prefix/suffix overlaps like "25" + "4"
        (self.at(host).ok()? == address).then_some(host)
    }

    /// Find the lowest free address, starting at host 2
    pub fn allocate(&self, assigned: &BTreeSet<Ipv4Addr>) -> Result<Ipv4Addr> {
        for host in 2..=MAX_HOST {
            let candidate = self.at(host)?;
            if !assigned.contains(&candidate) {
                return Ok(candidate);
            }
        }
        Err(Error::AddressPoolExhausted)
    }
}
