// LabForge: Kathara lab compiler written in Rust
// Copyright (C) 2023 Tibor Schneider <sctibor@ethz.ch>
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Allocation of the management addresses.
//!
//! Every machine gets an address on its management interface (`eth0`), carved from a single
//! subnet (by default `10.0.0.0/24`). The allocation is a fold over the ordered list of machines,
//! so the same topology always yields the same addresses:
//!
//! - `collector` gets the second-to-last address of the subnet (`.254`), and `collectordb` the
//!   one before (`.253`).
//! - A machine that declares an address on its management interface keeps it. A missing prefix
//!   length is read as `/24`.
//! - Every other machine gets the next address of a counter starting at `.1`. The counter skips
//!   all addresses that are declared explicitly or reserved.

use std::{
    collections::{HashMap, HashSet},
    net::Ipv4Addr,
};

use ipnet::{Ipv4Net, PrefixLenError};
use thiserror::Error;

use crate::model::Machine;

/// Name of the machine that receives the collector address.
pub const COLLECTOR: &str = "collector";
/// Name of the machine that receives the collector database address.
pub const COLLECTOR_DB: &str = "collectordb";

/// Builder for the management addresses. The default subnet is `10.0.0.0/24`.
#[derive(Debug, Clone)]
pub struct ManagementAddressorBuilder {
    /// The subnet from which all management addresses are allocated.
    pub subnet: Ipv4Net,
}

impl Default for ManagementAddressorBuilder {
    fn default() -> Self {
        Self {
            subnet: "10.0.0.0/24".parse().unwrap(),
        }
    }
}

/// State threaded through the allocation.
#[derive(Debug, Default)]
struct Accumulator {
    /// Next counter value (host part).
    next: u32,
    /// Reserved names that were already handed out.
    reserved_used: HashSet<&'static str>,
    /// Allocated addresses, in the order of the machines.
    addrs: Vec<Ipv4Net>,
}

impl ManagementAddressorBuilder {
    /// Create a new builder with the default subnet.
    pub fn new() -> Self {
        Default::default()
    }

    /// Set the subnet from which management addresses are allocated.
    pub fn subnet(&mut self, x: Ipv4Net) -> &mut Self {
        self.subnet = x.trunc();
        self
    }

    /// The reserved address of the collector.
    pub fn collector_addr(&self) -> Result<Ipv4Net, AddressError> {
        self.reserved(1)
    }

    /// The reserved address of the collector database.
    pub fn collector_db_addr(&self) -> Result<Ipv4Net, AddressError> {
        self.reserved(2)
    }

    /// Compute the management address of every machine, in order.
    pub fn build(&self, machines: &[Machine]) -> Result<Vec<Ipv4Net>, AddressError> {
        if self.subnet.prefix_len() > 29 {
            return Err(AddressError::SubnetTooSmall(self.subnet));
        }
        let reserved: HashMap<&'static str, Ipv4Net> = [
            (COLLECTOR, self.collector_addr()?),
            (COLLECTOR_DB, self.collector_db_addr()?),
        ]
        .into_iter()
        .collect();

        // Explicit addresses. Only the first machine may claim an address.
        let mut taken: HashSet<Ipv4Addr> = reserved.values().map(|net| net.addr()).collect();
        let explicit: Vec<Option<Ipv4Net>> = machines
            .iter()
            .map(|m| {
                if reserved.contains_key(m.host_name().as_str()) {
                    return None;
                }
                let net = explicit_management_ip(m)?;
                if taken.insert(net.addr()) {
                    Some(net)
                } else {
                    log::warn!(
                        "[addressing] {} is already used, allocating a new address for {}",
                        net.addr(),
                        m.name
                    );
                    None
                }
            })
            .collect();

        let acc = machines.iter().zip(explicit).try_fold(
            Accumulator {
                next: 1,
                ..Default::default()
            },
            |mut acc, (m, explicit)| {
                let name = m.host_name();
                let reserved_addr = reserved
                    .get_key_value(name.as_str())
                    .filter(|(k, _)| !acc.reserved_used.contains(*k));
                let addr = if let Some((k, addr)) = reserved_addr {
                    acc.reserved_used.insert(*k);
                    *addr
                } else if let Some(addr) = explicit {
                    addr
                } else {
                    self.next_free(&mut acc.next, &taken)?
                };
                log::trace!("[addressing] {name}: {addr}");
                acc.addrs.push(addr);
                Ok::<_, AddressError>(acc)
            },
        )?;

        Ok(acc.addrs)
    }

    /// Assign the management address to every machine.
    pub fn assign(&self, mut machines: Vec<Machine>) -> Result<Vec<Machine>, AddressError> {
        let addrs = self.build(&machines)?;
        machines
            .iter_mut()
            .zip(addrs)
            .for_each(|(m, addr)| m.computed_eth0_ip = Some(addr));
        Ok(machines)
    }

    /// Address with the given offset below the broadcast address.
    fn reserved(&self, offset: u32) -> Result<Ipv4Net, AddressError> {
        let addr = Ipv4Addr::from(u32::from(self.subnet.broadcast()) - offset);
        Ok(Ipv4Net::new(addr, self.subnet.prefix_len())?)
    }

    fn next_free(&self, next: &mut u32, taken: &HashSet<Ipv4Addr>) -> Result<Ipv4Net, AddressError> {
        let network = u32::from(self.subnet.network());
        // the network address, the broadcast address and the two reserved addresses are excluded.
        let max = (1u32 << (32 - self.subnet.prefix_len())) - 4;
        while *next <= max {
            let addr = Ipv4Addr::from(network + *next);
            *next += 1;
            if !taken.contains(&addr) {
                return Ok(Ipv4Net::new(addr, self.subnet.prefix_len())?);
            }
        }
        Err(AddressError::NotEnoughAddresses(self.subnet))
    }
}

/// The address declared on `eth0`, if any and if it can be parsed.
fn explicit_management_ip(machine: &Machine) -> Option<Ipv4Net> {
    let ip = machine.management_interface()?.ip.as_deref()?.trim();
    if ip.is_empty() {
        return None;
    }
    let net = parse_with_default_prefix(ip);
    if net.is_none() {
        log::warn!(
            "[addressing] Cannot parse the eth0 address {ip:?} of {}, allocating a new one",
            machine.name
        );
    }
    net
}

/// Parse an address in CIDR notation. A bare address gets the prefix length `/24`.
pub fn parse_with_default_prefix(ip: &str) -> Option<Ipv4Net> {
    if ip.contains('/') {
        ip.parse().ok()
    } else {
        ip.parse::<Ipv4Addr>()
            .ok()
            .and_then(|addr| Ipv4Net::new(addr, 24).ok())
    }
}

/// Errors thrown while allocating management addresses.
#[derive(Debug, Error)]
pub enum AddressError {
    /// The subnet has no more free addresses.
    #[error("Not enough addresses in {0} for all machines")]
    NotEnoughAddresses(Ipv4Net),
    /// The subnet cannot hold the reserved addresses.
    #[error("The management subnet {0} is too small")]
    SubnetTooSmall(Ipv4Net),
    /// Invalid prefix length.
    #[error("{0}")]
    PrefixLen(#[from] PrefixLenError),
}
