//! Security Lists
//!
//! A security list is the backend's firewall. Traffic is admitted by rules
//! that connect a source (an IP list or another security list) to a
//! destination security list through a security application, which names
//! the protocol and port range.

use super::Endpoint;
use crate::nimbula::client::NimbulaClient;
use crate::nimbula::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const SECLIST_REF: &str = "seclist:";
const SECIPLIST_REF: &str = "seciplist:";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecListRecord {
    pub name: String,
    #[serde(default)]
    pub policy: Option<String>,
    #[serde(default)]
    pub outbound_cidr_policy: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecApplicationRecord {
    pub name: String,
    #[serde(default)]
    pub protocol: Option<String>,
    /// `"22"` or a range such as `"8000-8080"`
    #[serde(default)]
    pub dport: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecIpListRecord {
    pub name: String,
    #[serde(default)]
    pub secipentries: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecRuleRecord {
    pub name: String,
    #[serde(default)]
    pub dst_list: Option<String>,
    #[serde(default)]
    pub src_list: Option<String>,
    #[serde(default)]
    pub application: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub dst_is_ip: bool,
    #[serde(default)]
    pub src_is_ip: bool,
}

impl SecRuleRecord {
    /// Inbound rule targeting `firewall_id`
    fn protects(&self, firewall_id: &str) -> bool {
        !self.dst_is_ip && self.dst_list.as_deref() == Some(seclist_ref(firewall_id).as_str())
    }
}

#[derive(Serialize)]
struct NewSecList {
    policy: &'static str,
    uri: Option<String>,
    outbound_cidr_policy: &'static str,
    name: String,
}

#[derive(Serialize)]
struct NewApplication<'a> {
    protocol: &'a str,
    dport: &'a str,
    uri: Option<String>,
    name: String,
    icmptype: &'static str,
    icmpcode: &'static str,
}

#[derive(Serialize)]
struct NewIpList<'a> {
    secipentries: [&'a str; 1],
    uri: Option<String>,
    name: String,
}

#[derive(Serialize)]
struct NewRule<'a> {
    dst_list: String,
    src_list: String,
    uri: Option<String>,
    application: &'a str,
    action: &'static str,
    name: &'a str,
}

fn seclist_ref(id: &str) -> String {
    format!("{}{}", SECLIST_REF, id)
}

fn seciplist_ref(id: &str) -> String {
    format!("{}{}", SECIPLIST_REF, id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "icmp" => Ok(Protocol::Icmp),
            _ => Err(Error::InvalidInput(format!("unknown protocol '{}'", s))),
        }
    }
}

/// `dport` value for a port range
fn dport(start: u16, end: u16) -> String {
    if end > start {
        format!("{}-{}", start, end)
    } else {
        start.to_string()
    }
}

/// Inverse of [`dport`]; empty or malformed values carry no ports
fn parse_dport(value: &str) -> Option<(u16, u16)> {
    let value = value.trim();
    match value.split_once('-') {
        Some((start, end)) => Some((start.trim().parse().ok()?, end.trim().parse().ok()?)),
        None => {
            let port = value.parse().ok()?;
            Some((port, port))
        }
    }
}

/// Lowercase alphanumeric local name for a new security list
fn sanitize_name(raw: &str) -> Option<String> {
    let name: String = raw
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect();
    (!name.is_empty()).then_some(name)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Firewall {
    pub id: String,
    pub name: String,
    pub description: String,
    pub policy: Option<String>,
    pub outbound_policy: Option<String>,
    pub region_id: Option<String>,
}

impl Firewall {
    pub fn from_record(record: SecListRecord, region_id: Option<&str>) -> Self {
        let name = record
            .name
            .rsplit('/')
            .find(|s| !s.is_empty())
            .unwrap_or(&record.name)
            .to_string();
        Self {
            description: name.clone(),
            name,
            policy: record.policy,
            outbound_policy: record.outbound_cidr_policy,
            region_id: region_id.map(str::to_string),
            id: record.name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ingress,
    Egress,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FirewallRule {
    pub id: String,
    pub firewall_id: String,
    /// Source CIDR, when the source is an IP list
    pub cidr: Option<String>,
    /// Source reference, e.g. `seclist:/acct/user/web`
    pub source: Option<String>,
    pub protocol: Option<Protocol>,
    pub start_port: Option<u16>,
    pub end_port: Option<u16>,
    pub direction: Direction,
    pub allow: bool,
}

impl FirewallRule {
    /// Expand one rule into one entry per source CIDR
    fn expand(
        firewall_id: &str,
        rule: &SecRuleRecord,
        application: Option<&SecApplicationRecord>,
        sources: Option<&SecIpListRecord>,
    ) -> Vec<Self> {
        let protocol = application
            .and_then(|a| a.protocol.as_deref())
            .and_then(|p| p.parse().ok());
        let ports = application.and_then(|a| a.dport.as_deref()).and_then(parse_dport);
        let base = FirewallRule {
            id: rule.name.clone(),
            firewall_id: firewall_id.to_string(),
            cidr: None,
            source: rule.src_list.clone(),
            protocol,
            start_port: ports.map(|p| p.0),
            end_port: ports.map(|p| p.1),
            direction: if rule.dst_is_ip { Direction::Egress } else { Direction::Ingress },
            allow: rule.action.as_deref().map_or(true, |a| a.eq_ignore_ascii_case("permit")),
        };

        match sources {
            Some(list) => list
                .secipentries
                .iter()
                .map(|cidr| FirewallRule {
                    id: format!("{}:{}", base.id, cidr),
                    cidr: Some(cidr.clone()),
                    ..base.clone()
                })
                .collect(),
            None => vec![base],
        }
    }
}

/// Security list operations
#[derive(Clone)]
pub struct SecurityLists {
    client: NimbulaClient,
}

impl SecurityLists {
    pub fn new(client: NimbulaClient) -> Self {
        Self { client }
    }

    fn to_firewall(&self, record: SecListRecord) -> Firewall {
        Firewall::from_record(record, self.client.region_id())
    }

    pub async fn create(&self, name: &str) -> Result<Firewall> {
        let local = sanitize_name(name)
            .ok_or_else(|| Error::InvalidInput(format!("invalid security list name '{}'", name)))?;
        let body = NewSecList {
            policy: "",
            uri: None,
            outbound_cidr_policy: "",
            name: self.client.namespace().qualify(&local),
        };

        tracing::info!("Creating security list {}", body.name);
        let mut method = self.client.method(Endpoint::SecList);
        method.post(&body).await?;
        Ok(self.to_firewall(method.json()?))
    }

    pub async fn get(&self, id: &str) -> Result<Option<Firewall>> {
        let mut method = self.client.method(Endpoint::SecList);
        match method.get(id).await? {
            401 | 404 => Ok(None),
            _ => Ok(Some(self.to_firewall(method.json()?))),
        }
    }

    pub async fn list(&self) -> Result<Vec<Firewall>> {
        let mut method = self.client.method(Endpoint::SecList);
        method.list().await?;
        Ok(method
            .results::<SecListRecord>()?
            .into_iter()
            .map(|r| self.to_firewall(r))
            .collect())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut method = self.client.method(Endpoint::SecList);
        method.delete(id).await?;
        Ok(())
    }

    async fn application(&self, protocol: Protocol, ports: &str, create: bool) -> Result<Option<String>> {
        let mut method = self.client.method(Endpoint::SecApplication);
        method.list().await?;
        let existing = method.results::<SecApplicationRecord>()?.into_iter().find(|a| {
            a.protocol.as_deref() == Some(protocol.as_str()) && a.dport.as_deref() == Some(ports)
        });
        if let Some(app) = existing {
            return Ok(Some(app.name));
        }
        if !create {
            return Ok(None);
        }

        let body = NewApplication {
            protocol: protocol.as_str(),
            dport: ports,
            uri: None,
            name: format!(
                "{}/dsn_{}{}",
                self.client.name_prefix(),
                protocol,
                ports.replace('-', "_")
            ),
            icmptype: "",
            icmpcode: "",
        };
        method.post(&body).await?;
        Ok(Some(method.json::<SecApplicationRecord>()?.name))
    }

    async fn ip_list(&self, cidr: &str, create: bool) -> Result<Option<String>> {
        let mut method = self.client.method(Endpoint::SecIpList);
        method.list().await?;
        let existing = method
            .results::<SecIpListRecord>()?
            .into_iter()
            .find(|l| l.secipentries.len() == 1 && l.secipentries[0] == cidr);
        if let Some(list) = existing {
            return Ok(Some(list.name));
        }
        if !create {
            return Ok(None);
        }

        let body = NewIpList {
            secipentries: [cidr],
            uri: None,
            name: format!(
                "{}/dsn{}",
                self.client.name_prefix(),
                cidr.replace(['.', '/'], "_")
            ),
        };
        method.post(&body).await?;
        Ok(Some(method.json::<SecIpListRecord>()?.name))
    }

    /// Admit `cidr` to `firewall_id` on a port range; returns the new rule id
    pub async fn authorize(
        &self,
        firewall_id: &str,
        cidr: &str,
        protocol: Protocol,
        start_port: u16,
        end_port: u16,
    ) -> Result<String> {
        let ports = dport(start_port, end_port);
        let ip_list = self
            .ip_list(cidr, true)
            .await?
            .ok_or_else(|| Error::Unexpected(format!("no ip list for {}", cidr)))?;
        let application = self
            .application(protocol, &ports, true)
            .await?
            .ok_or_else(|| Error::Unexpected(format!("no application for {} {}", protocol, ports)))?;

        let rule_id = format!(
            "{}/dsn_{}_{}_{}_{}",
            self.client.name_prefix(),
            protocol.as_str().to_uppercase(),
            chrono::Utc::now().timestamp_millis(),
            start_port,
            end_port
        );
        tracing::info!("Authorizing {} {} {} on {}", cidr, protocol, ports, firewall_id);

        let mut method = self.client.method(Endpoint::SecRule);
        method
            .post(&NewRule {
                dst_list: seclist_ref(firewall_id),
                src_list: seciplist_ref(&ip_list),
                uri: None,
                application: &application,
                action: "PERMIT",
                name: &rule_id,
            })
            .await?;
        Ok(rule_id)
    }

    async fn rule_records(&self) -> Result<Vec<SecRuleRecord>> {
        let mut method = self.client.method(Endpoint::SecRule);
        method.list().await?;
        method.results()
    }

    /// Remove every rule admitting `cidr` to `firewall_id` on the port range
    pub async fn revoke(
        &self,
        firewall_id: &str,
        cidr: &str,
        protocol: Protocol,
        start_port: u16,
        end_port: u16,
    ) -> Result<()> {
        let ports = dport(start_port, end_port);
        let (Some(ip_list), Some(application)) = (
            self.ip_list(cidr, false).await?,
            self.application(protocol, &ports, false).await?,
        ) else {
            tracing::debug!("Nothing to revoke for {} on {}", cidr, firewall_id);
            return Ok(());
        };

        let source = seciplist_ref(&ip_list);
        let mut method = self.client.method(Endpoint::SecRule);
        for rule in self.rule_records().await? {
            if rule.protects(firewall_id)
                && rule.src_list.as_deref() == Some(source.as_str())
                && rule.application.as_deref() == Some(application.as_str())
            {
                tracing::info!("Revoking rule {}", rule.name);
                method.delete(&rule.name).await?;
            }
        }
        Ok(())
    }

    /// Inbound rules of a security list, one entry per source CIDR
    pub async fn rules(&self, firewall_id: &str) -> Result<Vec<FirewallRule>> {
        let mut rules = Vec::new();
        for rule in self.rule_records().await? {
            if !rule.protects(firewall_id) {
                continue;
            }
            let Some(app_id) = rule.application.as_deref() else {
                continue;
            };

            let mut method = self.client.method(Endpoint::SecApplication);
            let application = match method.get(app_id).await? {
                401 | 404 => {
                    tracing::debug!("Rule {} names missing application {}", rule.name, app_id);
                    continue;
                }
                _ => method.json::<SecApplicationRecord>()?,
            };

            let sources = match rule.src_list.as_deref().and_then(|s| s.strip_prefix(SECIPLIST_REF)) {
                Some(list_id) if rule.src_is_ip => {
                    let mut method = self.client.method(Endpoint::SecIpList);
                    match method.get(list_id).await? {
                        401 | 404 => continue,
                        _ => Some(method.json::<SecIpListRecord>()?),
                    }
                }
                _ => None,
            };

            rules.extend(FirewallRule::expand(
                firewall_id,
                &rule,
                Some(&application),
                sources.as_ref(),
            ));
        }
        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dport_round_trip() {
        assert_eq!(dport(22, 22), "22");
        assert_eq!(dport(8000, 8080), "8000-8080");
        assert_eq!(parse_dport("22"), Some((22, 22)));
        assert_eq!(parse_dport("8000-8080"), Some((8000, 8080)));
        assert_eq!(parse_dport(""), None);
        assert_eq!(parse_dport("any"), None);
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("Web Tier-1").as_deref(), Some("webtier1"));
        assert_eq!(sanitize_name("--"), None);
    }

    #[test]
    fn test_protocol_parse() {
        assert_eq!("TCP".parse::<Protocol>().unwrap(), Protocol::Tcp);
        assert!("gre".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_firewall_name_is_last_segment() {
        let fw = Firewall::from_record(
            SecListRecord {
                name: "/acct1/bob/web".to_string(),
                policy: Some("DENY".to_string()),
                outbound_cidr_policy: Some("PERMIT".to_string()),
            },
            None,
        );
        assert_eq!(fw.name, "web");
        assert_eq!(fw.description, "web");
        assert_eq!(fw.policy.as_deref(), Some("DENY"));
    }

    #[test]
    fn test_rule_expands_per_cidr() {
        let rule: SecRuleRecord = serde_json::from_value(json!({
            "name": "/acct1/bob/r1",
            "dst_list": "seclist:/acct1/bob/web",
            "src_list": "seciplist:/acct1/bob/office",
            "application": "/acct1/bob/dsn_tcp8000_8080",
            "action": "PERMIT",
            "src_is_ip": true
        }))
        .unwrap();
        assert!(rule.protects("/acct1/bob/web"));
        assert!(!rule.protects("/acct1/bob/db"));

        let app = SecApplicationRecord {
            name: "/acct1/bob/dsn_tcp8000_8080".to_string(),
            protocol: Some("tcp".to_string()),
            dport: Some("8000-8080".to_string()),
        };
        let ips = SecIpListRecord {
            name: "/acct1/bob/office".to_string(),
            secipentries: vec!["10.0.0.0/8".to_string(), "192.168.1.0/24".to_string()],
        };

        let rules = FirewallRule::expand("/acct1/bob/web", &rule, Some(&app), Some(&ips));
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].id, "/acct1/bob/r1:10.0.0.0/8");
        assert_eq!(rules[1].cidr.as_deref(), Some("192.168.1.0/24"));
        assert_eq!(rules[0].protocol, Some(Protocol::Tcp));
        assert_eq!((rules[0].start_port, rules[0].end_port), (Some(8000), Some(8080)));
        assert_eq!(rules[0].direction, Direction::Ingress);
        assert!(rules[0].allow);
    }

    #[test]
    fn test_new_rule_json() {
        let body = serde_json::to_value(NewRule {
            dst_list: seclist_ref("/acct1/bob/web"),
            src_list: seciplist_ref("/acct1/bob/dsn10_0_0_0_8"),
            uri: None,
            application: "/acct1/bob/dsn_tcp22",
            action: "PERMIT",
            name: "/acct1/bob/dsn_TCP_1_22_22",
        })
        .unwrap();
        assert_eq!(body["dst_list"], json!("seclist:/acct1/bob/web"));
        assert_eq!(body["src_list"], json!("seciplist:/acct1/bob/dsn10_0_0_0_8"));
        assert_eq!(body["uri"], json!(null));
    }
}
