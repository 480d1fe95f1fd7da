//! Resource layer
//!
//! Typed records for every backend endpoint and the services that turn them
//! into domain objects. Raw JSON never travels past this layer: each response
//! is validated into a [`ResourceRecord`] variant for its endpoint.
//!
//! # Architecture
//!
//! - [`instance`] - Instances, shapes and launch plans
//! - [`image`] - Machine images and image lists
//! - [`volume`] - Storage volumes and attachments
//! - [`seclist`] - Security lists and their rules
//! - [`vethernet`] - Virtual ethernets and DHCP ranges
//! - [`site`] - Sites from the global info catalog

pub mod image;
pub mod instance;
pub mod seclist;
pub mod site;
pub mod vethernet;
pub mod volume;

use crate::nimbula::error::{Error, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

pub use image::{ImageListRecord, Images, MachineImage, MachineImageRecord};
pub use instance::{InstanceRecord, Instances, LaunchOptions, Product, ShapeRecord, VirtualMachine, VmState};
pub use seclist::{Firewall, FirewallRule, Protocol, SecApplicationRecord, SecIpListRecord, SecListRecord, SecRuleRecord, SecurityLists};
pub use site::{DataCenter, Region, SiteRecord, Sites};
pub use vethernet::{VdhcpdRecord, Vethernets, VethernetRecord, Vlan};
pub use volume::{StorageAttachmentRecord, StoragePropertyRecord, StorageVolumeRecord, Volume, VolumeState, Volumes};

/// Format of creation and start timestamps
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Every endpoint the backend exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Authenticate,
    Info,
    Instance,
    LaunchPlan,
    Shape,
    ImageList,
    MachineImage,
    StorageVolume,
    StorageAttachment,
    StorageProperty,
    SecList,
    SecApplication,
    SecIpList,
    SecRule,
    Vethernet,
    Vdhcpd,
}

impl Endpoint {
    pub const ALL: [Endpoint; 16] = [
        Endpoint::Authenticate,
        Endpoint::Info,
        Endpoint::Instance,
        Endpoint::LaunchPlan,
        Endpoint::Shape,
        Endpoint::ImageList,
        Endpoint::MachineImage,
        Endpoint::StorageVolume,
        Endpoint::StorageAttachment,
        Endpoint::StorageProperty,
        Endpoint::SecList,
        Endpoint::SecApplication,
        Endpoint::SecIpList,
        Endpoint::SecRule,
        Endpoint::Vethernet,
        Endpoint::Vdhcpd,
    ];

    /// Path of the endpoint below the backend root
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::Authenticate => "authenticate",
            Endpoint::Info => "info",
            Endpoint::Instance => "instance",
            Endpoint::LaunchPlan => "launchplan",
            Endpoint::Shape => "shape",
            Endpoint::ImageList => "imagelist",
            Endpoint::MachineImage => "machineimage",
            Endpoint::StorageVolume => "storagevolume",
            Endpoint::StorageAttachment => "storageattachment",
            Endpoint::StorageProperty => "property/storage",
            Endpoint::SecList => "seclist",
            Endpoint::SecApplication => "secapplication",
            Endpoint::SecIpList => "seciplist",
            Endpoint::SecRule => "secrule",
            Endpoint::Vethernet => "vethernet",
            Endpoint::Vdhcpd => "vdhcpd",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim_matches('/');
        Endpoint::ALL
            .into_iter()
            .find(|e| e.path() == wanted)
            .ok_or_else(|| Error::Config(format!("unknown endpoint '{}'", s)))
    }
}

/// Body of every listing: `{"result": [...]}`
#[derive(Debug, Clone, Deserialize)]
pub struct ResultSet<T> {
    #[serde(default = "Vec::new")]
    pub result: Vec<T>,
}

/// A validated record of one of the known endpoint shapes
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceRecord {
    Site(SiteRecord),
    Instance(InstanceRecord),
    LaunchPlan(instance::LaunchPlanRecord),
    Shape(ShapeRecord),
    ImageList(ImageListRecord),
    MachineImage(MachineImageRecord),
    StorageVolume(StorageVolumeRecord),
    StorageAttachment(StorageAttachmentRecord),
    StorageProperty(StoragePropertyRecord),
    SecList(SecListRecord),
    SecApplication(SecApplicationRecord),
    SecIpList(SecIpListRecord),
    SecRule(SecRuleRecord),
    Vethernet(VethernetRecord),
    Vdhcpd(VdhcpdRecord),
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}

impl ResourceRecord {
    /// Validate one JSON object as the record type of `endpoint`
    pub fn from_json(endpoint: Endpoint, value: Value) -> Result<Self> {
        Ok(match endpoint {
            Endpoint::Authenticate => {
                return Err(Error::Unexpected("authenticate has no resource records".to_string()))
            }
            Endpoint::Info => Self::Site(decode(value)?),
            Endpoint::Instance => Self::Instance(decode(value)?),
            Endpoint::LaunchPlan => Self::LaunchPlan(decode(value)?),
            Endpoint::Shape => Self::Shape(decode(value)?),
            Endpoint::ImageList => Self::ImageList(decode(value)?),
            Endpoint::MachineImage => Self::MachineImage(decode(value)?),
            Endpoint::StorageVolume => Self::StorageVolume(decode(value)?),
            Endpoint::StorageAttachment => Self::StorageAttachment(decode(value)?),
            Endpoint::StorageProperty => Self::StorageProperty(decode(value)?),
            Endpoint::SecList => Self::SecList(decode(value)?),
            Endpoint::SecApplication => Self::SecApplication(decode(value)?),
            Endpoint::SecIpList => Self::SecIpList(decode(value)?),
            Endpoint::SecRule => Self::SecRule(decode(value)?),
            Endpoint::Vethernet => Self::Vethernet(decode(value)?),
            Endpoint::Vdhcpd => Self::Vdhcpd(decode(value)?),
        })
    }

    /// Validate every entry of a listing body
    pub fn from_listing(endpoint: Endpoint, value: Value) -> Result<Vec<Self>> {
        let set: ResultSet<Value> = decode(value)?;
        set.result
            .into_iter()
            .map(|item| Self::from_json(endpoint, item))
            .collect()
    }

    /// Fully-qualified name of the record, where it has one
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Site(r) => Some(&r.name),
            Self::Instance(r) => Some(&r.name),
            Self::LaunchPlan(_) => None,
            Self::Shape(r) => Some(&r.name),
            Self::ImageList(r) => Some(&r.name),
            Self::MachineImage(r) => Some(&r.name),
            Self::StorageVolume(r) => Some(&r.name),
            Self::StorageAttachment(r) => r.name.as_deref(),
            Self::StorageProperty(r) => Some(&r.name),
            Self::SecList(r) => Some(&r.name),
            Self::SecApplication(r) => Some(&r.name),
            Self::SecIpList(r) => Some(&r.name),
            Self::SecRule(r) => Some(&r.name),
            Self::Vethernet(r) => Some(&r.name),
            Self::Vdhcpd(r) => Some(&r.name),
        }
    }
}

/// Parse a `YYYY-MM-DDTHH:MM:SSZ` timestamp
///
/// Malformed values are logged and treated as unknown.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    match NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT) {
        Ok(ts) => Some(ts.and_utc()),
        Err(e) => {
            tracing::warn!("Unable to parse timestamp '{}': {}", value, e);
            None
        }
    }
}

/// Number carried either as a JSON number or a numeric string
pub(crate) fn loose_u64(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
