//! Virtual Ethernets
//!
//! A vethernet is an isolated layer-2 network. Its address range, router
//! and DNS servers live on a separate `vdhcpd` record that points back at
//! the vethernet by name.

use super::{loose_u64, Endpoint};
use crate::nimbula::address::ResourceId;
use crate::nimbula::client::NimbulaClient;
use crate::nimbula::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::net::Ipv4Addr;

/// Only this account may create vethernets
const ADMIN_ACCOUNT: &str = "root";

/// Addresses kept free at the top of a new range
const RESERVED_TAIL: u32 = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VethernetRecord {
    pub name: String,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VdhcpdRecord {
    pub name: String,
    #[serde(default)]
    pub vethernet: Option<String>,
    #[serde(default)]
    pub iprange_start: Option<String>,
    #[serde(default)]
    pub iprange_stop: Option<String>,
    #[serde(default)]
    pub iprange_mask: Option<Value>,
    #[serde(default)]
    pub iprouter: Option<String>,
    #[serde(default)]
    pub dns_server: Option<String>,
    #[serde(default)]
    pub dns_server_standby: Option<String>,
}

#[derive(Serialize)]
struct NewVethernet<'a> {
    id: u32,
    description: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    uri: Option<String>,
    name: String,
}

#[derive(Serialize)]
struct NewVdhcpd<'a> {
    iprange_mask: u8,
    dns_server: Option<&'a str>,
    dns_server_standby: Option<&'a str>,
    iprange_start: String,
    iprange_stop: String,
    uri: Option<String>,
    vethernet: &'a str,
    name: String,
    iprouter: String,
}

/// Parse `a.b.c.d[/mask]`; a bare address is a /32
fn parse_cidr(cidr: &str) -> Result<(Ipv4Addr, u8)> {
    let invalid = || Error::InvalidInput(format!("invalid CIDR '{}'", cidr));
    let (addr, mask) = match cidr.split_once('/') {
        Some((addr, mask)) => (addr, mask.parse::<u8>().map_err(|_| invalid())?),
        None => (cidr, 32),
    };
    if mask > 32 {
        return Err(invalid());
    }
    Ok((addr.trim().parse().map_err(|_| invalid())?, mask))
}

/// Last address handed out for a range starting at `start`
fn range_stop(start: Ipv4Addr, mask: u8) -> Ipv4Addr {
    if mask >= 31 {
        return start;
    }
    let mut span = ((1u64 << (32 - mask)) - 1) as u32;
    if span > RESERVED_TAIL {
        span -= RESERVED_TAIL;
    }
    Ipv4Addr::from(u32::from(start).saturating_add(span))
}

/// Numeric ids already in use; ids outside `u32` cannot collide with ours
fn taken_ids(records: &[VethernetRecord]) -> HashSet<u32> {
    records
        .iter()
        .filter_map(|r| loose_u64(r.id.as_ref()))
        .filter_map(|id| u32::try_from(id).ok())
        .collect()
}

/// Smallest positive id not taken
fn first_free_id(taken: &HashSet<u32>) -> u32 {
    (1..).find(|id| !taken.contains(id)).unwrap_or(1)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Vlan {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub description: Option<String>,
    pub cidr: Option<String>,
    pub gateway: Option<String>,
    pub dns_servers: Vec<String>,
    pub region_id: Option<String>,
}

impl Vlan {
    pub fn from_record(record: VethernetRecord, dhcp: Option<&VdhcpdRecord>, region_id: Option<&str>) -> Result<Self> {
        let id = ResourceId::parse(&record.name)?;
        let cidr = dhcp.and_then(|d| {
            let start = d.iprange_start.as_deref()?;
            let mask = loose_u64(d.iprange_mask.as_ref())?;
            Some(format!("{}/{}", start, mask))
        });

        Ok(Self {
            name: id.name,
            owner: id.account,
            description: record.description,
            cidr,
            gateway: dhcp.and_then(|d| d.iprouter.clone()),
            dns_servers: dhcp
                .map(|d| {
                    [&d.dns_server, &d.dns_server_standby]
                        .into_iter()
                        .flatten()
                        .cloned()
                        .collect()
                })
                .unwrap_or_default(),
            region_id: region_id.map(str::to_string),
            id: record.name,
        })
    }
}

/// Virtual ethernet operations
#[derive(Clone)]
pub struct Vethernets {
    client: NimbulaClient,
}

impl Vethernets {
    pub fn new(client: NimbulaClient) -> Self {
        Self { client }
    }

    pub fn allows_creation(&self) -> bool {
        self.client.account() == ADMIN_ACCOUNT
    }

    async fn records(&self) -> Result<Vec<VethernetRecord>> {
        let mut method = self.client.method(Endpoint::Vethernet);
        method.list().await?;
        method.results()
    }

    async fn dhcp_records(&self) -> Result<Vec<VdhcpdRecord>> {
        let mut method = self.client.method(Endpoint::Vdhcpd);
        method.list().await?;
        method.results()
    }

    fn dhcp_for<'a>(dhcp: &'a [VdhcpdRecord], vethernet: &str) -> Option<&'a VdhcpdRecord> {
        dhcp.iter().find(|d| d.vethernet.as_deref() == Some(vethernet))
    }

    pub async fn list(&self) -> Result<Vec<Vlan>> {
        let (records, dhcp) = futures::try_join!(self.records(), self.dhcp_records())?;
        records
            .into_iter()
            .map(|r| {
                let network = Self::dhcp_for(&dhcp, &r.name);
                Vlan::from_record(r, network, self.client.region_id())
            })
            .collect()
    }

    pub async fn get(&self, id: &str) -> Result<Option<Vlan>> {
        let mut method = self.client.method(Endpoint::Vethernet);
        match method.get(id).await? {
            401 | 404 => Ok(None),
            _ => {
                let record: VethernetRecord = method.json()?;
                let dhcp = self.dhcp_records().await?;
                let network = Self::dhcp_for(&dhcp, &record.name);
                Vlan::from_record(record, network, self.client.region_id()).map(Some)
            }
        }
    }

    /// Create a vethernet and the DHCP range serving `cidr`
    pub async fn create(&self, cidr: &str, description: &str, dns_servers: &[String]) -> Result<Vlan> {
        if !self.allows_creation() {
            return Err(Error::InvalidInput(format!(
                "account {} may not create vethernets",
                self.client.account()
            )));
        }
        let (start, mask) = parse_cidr(cidr)?;

        let id = first_free_id(&taken_ids(&self.records().await?));
        let vethernet_name = self.client.namespace().qualify(&format!("vnet{}", id));

        tracing::info!("Creating vethernet {} for {}", vethernet_name, cidr);
        let mut method = self.client.method(Endpoint::Vethernet);
        method
            .post(&NewVethernet {
                id,
                description,
                kind: "vlan",
                uri: None,
                name: vethernet_name.clone(),
            })
            .await?;
        let record: VethernetRecord = method.json()?;

        let dhcp = NewVdhcpd {
            iprange_mask: mask,
            dns_server: dns_servers.first().map(String::as_str),
            dns_server_standby: dns_servers.get(1).map(String::as_str),
            iprange_start: start.to_string(),
            iprange_stop: range_stop(start, mask).to_string(),
            uri: None,
            vethernet: &vethernet_name,
            name: self.client.namespace().qualify(&format!("vdhcpd{}", id)),
            iprouter: start.to_string(),
        };
        let mut method = self.client.method(Endpoint::Vdhcpd);
        method.post(&dhcp).await?;
        let network: VdhcpdRecord = method.json()?;

        Vlan::from_record(record, Some(&network), self.client.region_id())
    }

    /// Delete a vethernet and then its DHCP range
    pub async fn remove(&self, id: &str) -> Result<()> {
        let mut method = self.client.method(Endpoint::Vethernet);
        method.delete(id).await?;

        let dhcp = self.dhcp_records().await?;
        if let Some(network) = Self::dhcp_for(&dhcp, id) {
            let mut method = self.client.method(Endpoint::Vdhcpd);
            method.delete(&network.name).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_cidr() {
        assert_eq!(parse_cidr("10.1.2.0/24").unwrap(), (Ipv4Addr::new(10, 1, 2, 0), 24));
        assert_eq!(parse_cidr("10.1.2.3").unwrap().1, 32);
        assert!(parse_cidr("10.1.2/24").is_err());
        assert!(parse_cidr("10.1.2.0/40").is_err());
    }

    #[test]
    fn test_range_stop() {
        assert_eq!(range_stop(Ipv4Addr::new(10, 1, 2, 0), 24), Ipv4Addr::new(10, 1, 2, 251));
        assert_eq!(range_stop(Ipv4Addr::new(10, 1, 0, 0), 16), Ipv4Addr::new(10, 1, 255, 251));
        assert_eq!(range_stop(Ipv4Addr::new(10, 1, 2, 8), 30), Ipv4Addr::new(10, 1, 2, 11));
        assert_eq!(range_stop(Ipv4Addr::new(10, 1, 2, 8), 31), Ipv4Addr::new(10, 1, 2, 8));
    }

    #[test]
    fn test_first_free_id() {
        assert_eq!(first_free_id(&HashSet::new()), 1);
        assert_eq!(first_free_id(&[1, 2, 4].into_iter().collect()), 3);
    }

    #[test]
    fn test_taken_ids_ignore_oversized_values() {
        let records: Vec<VethernetRecord> = serde_json::from_value(json!([
            {"name": "/root/admin/vnet1", "id": 1},
            {"name": "/root/admin/vnetx", "id": u64::from(u32::MAX) + 3},
            {"name": "/root/admin/vnet5", "id": "5"}
        ]))
        .unwrap();
        let taken = taken_ids(&records);
        assert_eq!(taken, [1, 5].into_iter().collect());
        assert_eq!(first_free_id(&taken), 2);
    }

    #[test]
    fn test_vlan_with_network() {
        let record: VethernetRecord = serde_json::from_value(json!({
            "name": "/root/admin/vnet2",
            "id": 2,
            "description": "backend",
            "type": "vlan"
        }))
        .unwrap();
        let dhcp: VdhcpdRecord = serde_json::from_value(json!({
            "name": "/root/admin/vdhcpd2",
            "vethernet": "/root/admin/vnet2",
            "iprange_start": "10.2.0.0",
            "iprange_mask": "24",
            "iprouter": "10.2.0.1",
            "dns_server": "8.8.8.8"
        }))
        .unwrap();

        let vlan = Vlan::from_record(record, Some(&dhcp), None).unwrap();
        assert_eq!(vlan.name, "vnet2");
        assert_eq!(vlan.owner, "root");
        assert_eq!(vlan.cidr.as_deref(), Some("10.2.0.0/24"));
        assert_eq!(vlan.gateway.as_deref(), Some("10.2.0.1"));
        assert_eq!(vlan.dns_servers, vec!["8.8.8.8".to_string()]);
    }
}
