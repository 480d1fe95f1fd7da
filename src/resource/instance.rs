//! Instances
//!
//! Virtual machines, the shapes they run on, and the launch plans that create
//! them. Launch and terminate are asynchronous on the backend and are driven
//! to completion with the convergence poller.

use super::image::Images;
use super::{loose_u64, parse_timestamp, Endpoint};
use crate::nimbula::address::ResourceId;
use crate::nimbula::client::NimbulaClient;
use crate::nimbula::error::{Error, Result};
use crate::nimbula::poll::Check;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;

/// Smallest RAM size reported for a shape
const MIN_RAM_MB: u32 = 256;

/// Instance as returned by the `instance` endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub shape: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub imagelist: Option<String>,
    /// 1-based position in the image list; sent as number or string
    #[serde(default)]
    pub entry: Option<Value>,
    #[serde(default)]
    pub seclists: Vec<String>,
}

/// Shape (machine size) as returned by the `shape` endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeRecord {
    pub name: String,
    #[serde(default)]
    pub ram: u32,
    #[serde(default)]
    pub cpus: f64,
}

/// Response to a launch plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchPlanRecord {
    #[serde(default)]
    pub instances: Vec<InstanceRecord>,
}

#[derive(Serialize)]
struct LaunchPlan<'a> {
    relationships: Vec<String>,
    instances: Vec<PlannedInstance<'a>>,
}

#[derive(Serialize)]
struct PlannedInstance<'a> {
    label: &'a str,
    shape: &'a str,
    imagelist: &'a str,
    entry: u32,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    seclists: &'a [String],
}

/// Lifecycle state of an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmState {
    Pending,
    Running,
    Stopping,
    Terminated,
    Error,
    Unknown(String),
}

impl VmState {
    pub fn from_backend(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "running" => Self::Running,
            "queued" | "initializing" | "starting" | "pending" => Self::Pending,
            "terminating" | "stopping" => Self::Stopping,
            "terminated" | "stopped" => Self::Terminated,
            "error" | "node_disconnected" | "unreachable" => Self::Error,
            _ => {
                tracing::warn!("Unknown instance state: {}", value);
                Self::Unknown(value.to_string())
            }
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.pad("pending"),
            Self::Running => f.pad("running"),
            Self::Stopping => f.pad("stopping"),
            Self::Terminated => f.pad("terminated"),
            Self::Error => f.pad("error"),
            Self::Unknown(raw) => write!(f, "unknown ({})", raw),
        }
    }
}

/// Machine size offered by the backend
#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub ram_mb: u32,
    pub cpu_count: u32,
    pub disk_gb: u32,
}

impl From<ShapeRecord> for Product {
    fn from(shape: ShapeRecord) -> Self {
        Self {
            id: shape.name.clone(),
            name: shape.name,
            ram_mb: shape.ram.max(MIN_RAM_MB),
            cpu_count: shape.cpus as u32,
            disk_gb: 1,
        }
    }
}

/// Instance as seen by callers
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualMachine {
    pub id: String,
    pub name: String,
    pub description: String,
    pub owner: String,
    pub product_id: Option<String>,
    pub state: VmState,
    pub private_ips: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub image_list: Option<String>,
    pub image_entry: Option<u32>,
    pub firewalls: Vec<String>,
    pub region_id: Option<String>,
}

impl VirtualMachine {
    pub fn from_record(record: InstanceRecord, region_id: Option<&str>) -> Result<Self> {
        let id = ResourceId::parse(&record.name)?;
        let name = record.label.clone().unwrap_or_else(|| id.name.clone());
        let state = record
            .state
            .as_deref()
            .map(VmState::from_backend)
            .unwrap_or_else(|| VmState::Unknown(String::new()));

        Ok(Self {
            description: format!("{} [{}]", name, record.name),
            name,
            owner: id.account,
            product_id: record.shape,
            state,
            private_ips: record.ip.into_iter().collect(),
            created_at: record.start_time.as_deref().and_then(parse_timestamp),
            image_list: record.imagelist,
            image_entry: loose_u64(record.entry.as_ref()).and_then(|e| u32::try_from(e).ok()),
            firewalls: record.seclists,
            region_id: region_id.map(str::to_string),
            id: record.name,
        })
    }
}

/// Request to launch one instance
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub image_id: String,
    pub shape: String,
    pub label: String,
    pub seclists: Vec<String>,
}

/// Instance operations
#[derive(Clone)]
pub struct Instances {
    client: NimbulaClient,
}

impl Instances {
    pub fn new(client: NimbulaClient) -> Self {
        Self { client }
    }

    fn to_vm(&self, record: InstanceRecord) -> Result<VirtualMachine> {
        VirtualMachine::from_record(record, self.client.region_id())
    }

    pub async fn list(&self) -> Result<Vec<VirtualMachine>> {
        let mut method = self.client.method(Endpoint::Instance);
        method.list().await?;
        method
            .results::<InstanceRecord>()?
            .into_iter()
            .map(|r| self.to_vm(r))
            .collect()
    }

    /// Raw record, `None` if the instance does not exist
    pub async fn record(&self, id: &str) -> Result<Option<InstanceRecord>> {
        let mut method = self.client.method(Endpoint::Instance);
        match method.get(id).await? {
            401 | 404 => Ok(None),
            _ => Ok(Some(method.json()?)),
        }
    }

    pub async fn get(&self, id: &str) -> Result<Option<VirtualMachine>> {
        self.record(id).await?.map(|r| self.to_vm(r)).transpose()
    }

    /// Current lifecycle state, `None` if the instance is gone
    pub async fn state(&self, id: &str) -> Result<Option<VmState>> {
        Ok(self
            .record(id)
            .await?
            .map(|r| VmState::from_backend(r.state.as_deref().unwrap_or_default())))
    }

    pub async fn products(&self) -> Result<Vec<Product>> {
        let mut method = self.client.method(Endpoint::Shape);
        method.list().await?;
        Ok(method
            .results::<ShapeRecord>()?
            .into_iter()
            .map(Product::from)
            .collect())
    }

    pub async fn product(&self, shape: &str) -> Result<Option<Product>> {
        let mut method = self.client.method(Endpoint::Shape);
        let target = format!("/{}", shape.trim_start_matches('/'));
        match method.get(&target).await? {
            401 | 404 => Ok(None),
            _ => Ok(Some(method.json::<ShapeRecord>()?.into())),
        }
    }

    /// Security lists of an instance, `None` if it does not exist
    pub async fn firewalls(&self, id: &str) -> Result<Option<Vec<String>>> {
        Ok(self.record(id).await?.map(|r| r.seclists))
    }

    /// Launch an instance and wait until it leaves the pending states
    pub async fn launch<K>(&self, options: &LaunchOptions, cancel: K) -> Result<VirtualMachine>
    where
        K: Future<Output = ()>,
    {
        let images = Images::new(self.client.clone());
        let (imagelist, entry) = images
            .launch_info(&options.image_id)
            .await?
            .ok_or_else(|| Error::Unexpected(format!("no image list contains {}", options.image_id)))?;

        let plan = LaunchPlan {
            relationships: Vec::new(),
            instances: vec![PlannedInstance {
                label: &options.label,
                shape: &options.shape,
                imagelist: &imagelist,
                entry,
                seclists: &options.seclists,
            }],
        };

        tracing::info!("Launching {} from {} ({}#{})", options.label, options.image_id, imagelist, entry);
        let mut method = self.client.method(Endpoint::LaunchPlan);
        method.post(&plan).await?;
        let launched = method
            .json::<LaunchPlanRecord>()?
            .instances
            .into_iter()
            .next()
            .ok_or_else(|| Error::Unexpected("cloud failed to launch any instances without comment".to_string()))?;

        let id = launched.name.as_str();
        let converged = self
            .client
            .poller()
            .wait(id, "start", move || self.record(id), launch_check, cancel)
            .await?;

        self.to_vm(converged.observed.unwrap_or(launched))
    }

    /// Terminate an instance and wait until the backend confirms it
    pub async fn terminate<K>(&self, id: &str, cancel: K) -> Result<()>
    where
        K: Future<Output = ()>,
    {
        tokio::pin!(cancel);
        let poller = *self.client.poller();

        poller
            .wait(
                id,
                "leave pending",
                move || self.state(id),
                |state: Option<&VmState>| match state {
                    Some(VmState::Pending) => Check::Wait,
                    _ => Check::Done,
                },
                &mut cancel,
            )
            .await?;

        tracing::info!("Terminating {}", id);
        let mut method = self.client.method(Endpoint::Instance);
        if method.delete(id).await? == 404 {
            tracing::debug!("{} was already gone", id);
            return Ok(());
        }

        poller
            .wait(
                id,
                "terminate",
                move || self.state(id),
                |state: Option<&VmState>| match state {
                    None | Some(VmState::Terminated) => Check::Done,
                    _ => Check::Wait,
                },
                &mut cancel,
            )
            .await?;
        Ok(())
    }
}

fn launch_check(record: Option<&InstanceRecord>) -> Check {
    let Some(record) = record else {
        return Check::Fail("instance disappeared during launch".to_string());
    };
    let Some(state) = record.state.as_deref() else {
        return Check::Wait;
    };
    match VmState::from_backend(state) {
        VmState::Running => Check::Done,
        VmState::Pending | VmState::Unknown(_) => Check::Wait,
        VmState::Error => Check::Fail(format!("instance entered '{}' state", state)),
        VmState::Stopping | VmState::Terminated => Check::Fail("instance terminated during launch".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(state: &str) -> InstanceRecord {
        serde_json::from_value(json!({
            "name": "/acct1/bob/vm1",
            "label": "web",
            "shape": "small",
            "state": state,
            "ip": "10.0.0.5",
            "start_time": "2012-05-01T10:00:00Z",
            "imagelist": "/nimbula/public/default",
            "entry": "2",
            "seclists": ["/acct1/bob/default"]
        }))
        .unwrap()
    }

    #[test]
    fn test_state_mapping() {
        assert_eq!(VmState::from_backend("RUNNING"), VmState::Running);
        for s in ["queued", "initializing", "starting"] {
            assert!(VmState::from_backend(s).is_pending());
        }
        assert_eq!(VmState::from_backend("terminating"), VmState::Stopping);
        assert_eq!(VmState::from_backend("node_disconnected"), VmState::Error);
        assert_eq!(VmState::from_backend("weird"), VmState::Unknown("weird".to_string()));
    }

    #[test]
    fn test_vm_from_record() {
        let vm = VirtualMachine::from_record(record("running"), Some("site-a")).unwrap();
        assert_eq!(vm.id, "/acct1/bob/vm1");
        assert_eq!(vm.name, "web");
        assert_eq!(vm.owner, "acct1");
        assert_eq!(vm.description, "web [/acct1/bob/vm1]");
        assert_eq!(vm.state, VmState::Running);
        assert_eq!(vm.private_ips, vec!["10.0.0.5".to_string()]);
        assert_eq!(vm.image_entry, Some(2));
        assert!(vm.created_at.is_some());
        assert_eq!(vm.region_id.as_deref(), Some("site-a"));
    }

    #[test]
    fn test_vm_with_bad_timestamp_still_maps() {
        let mut r = record("running");
        r.start_time = Some("not a time".to_string());
        let vm = VirtualMachine::from_record(r, None).unwrap();
        assert_eq!(vm.created_at, None);
    }

    #[test]
    fn test_oversized_entry_is_dropped() {
        let mut r = record("running");
        r.entry = Some(serde_json::json!(u64::from(u32::MAX) + 2));
        let vm = VirtualMachine::from_record(r, None).unwrap();
        assert_eq!(vm.image_entry, None);
    }

    #[test]
    fn test_product_ram_floor() {
        let product = Product::from(ShapeRecord {
            name: "tiny".to_string(),
            ram: 128,
            cpus: 1.5,
        });
        assert_eq!(product.ram_mb, 256);
        assert_eq!(product.cpu_count, 1);
        assert_eq!(product.disk_gb, 1);
    }

    #[test]
    fn test_launch_plan_json() {
        let seclists = vec!["/acct1/bob/web".to_string()];
        let plan = LaunchPlan {
            relationships: Vec::new(),
            instances: vec![PlannedInstance {
                label: "web",
                shape: "small",
                imagelist: "/nimbula/public/default",
                entry: 1,
                seclists: &seclists,
            }],
        };
        let value = serde_json::to_value(&plan).unwrap();
        assert_eq!(value["relationships"], json!([]));
        assert_eq!(value["instances"][0]["entry"], json!(1));
        assert_eq!(value["instances"][0]["seclists"], json!(["/acct1/bob/web"]));

        let bare = PlannedInstance {
            label: "web",
            shape: "small",
            imagelist: "l",
            entry: 1,
            seclists: &[],
        };
        assert!(serde_json::to_value(&bare).unwrap().get("seclists").is_none());
    }

    #[test]
    fn test_launch_check() {
        assert!(matches!(launch_check(None), Check::Fail(_)));
        assert_eq!(launch_check(Some(&record("starting"))), Check::Wait);
        assert_eq!(launch_check(Some(&record("running"))), Check::Done);
        assert!(matches!(launch_check(Some(&record("error"))), Check::Fail(_)));
    }
}
