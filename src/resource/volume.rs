//! Storage Volumes
//!
//! Block volumes, the attachments binding them to instances, and the storage
//! properties a new volume may request.

use super::instance::Instances;
use super::{loose_u64, Endpoint};
use crate::nimbula::client::NimbulaClient;
use crate::nimbula::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Volume as returned by the `storagevolume` endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageVolumeRecord {
    pub name: String,
    #[serde(default)]
    pub size_mbytes: Option<Value>,
    #[serde(default)]
    pub status: Option<String>,
    /// A property name or a list of them
    #[serde(default)]
    pub properties: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageAttachmentRecord {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub storage_volume_name: Option<String>,
    #[serde(default)]
    pub instance_name: Option<String>,
    #[serde(default)]
    pub index: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoragePropertyRecord {
    pub name: String,
}

#[derive(Serialize)]
struct NewVolume<'a> {
    name: String,
    #[serde(rename = "size_Mbytes")]
    size_mbytes: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    properties: Option<&'a str>,
    status: &'static str,
}

#[derive(Serialize)]
struct NewAttachment<'a> {
    storage_volume_name: &'a str,
    instance_name: &'a str,
    index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeState {
    Pending,
    Available,
}

impl VolumeState {
    /// Status is either one word or a comma-separated set, e.g. `Online,Attached`
    pub fn from_backend(status: &str) -> Self {
        if status.eq_ignore_ascii_case("online") {
            return Self::Available;
        }
        for part in status.split(',').map(str::trim) {
            if part.eq_ignore_ascii_case("adding") {
                return Self::Pending;
            }
            if part.eq_ignore_ascii_case("attached") {
                return Self::Available;
            }
        }
        tracing::warn!("Unknown volume state: {}", status);
        Self::Pending
    }
}

/// Live binding of a volume to an instance
#[derive(Debug, Clone, PartialEq)]
struct Attachment {
    id: String,
    volume: String,
    instance: String,
    index: u32,
}

impl Attachment {
    fn from_record(record: &StorageAttachmentRecord) -> Option<Self> {
        Some(Self {
            id: record.name.clone()?,
            volume: record.storage_volume_name.clone()?,
            instance: record.instance_name.clone()?,
            index: loose_u64(record.index.as_ref())
                .and_then(|i| u32::try_from(i).ok())
                .unwrap_or(1),
        })
    }
}

fn attachment_for<'a>(attachments: &'a [Attachment], volume: &str) -> Option<&'a Attachment> {
    attachments.iter().find(|a| a.volume == volume)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    pub id: String,
    pub name: String,
    pub description: String,
    pub state: VolumeState,
    pub size_mb: Option<u64>,
    pub product_id: Option<String>,
    pub instance_id: Option<String>,
    pub device_id: Option<String>,
    pub region_id: Option<String>,
}

impl Volume {
    fn from_record(record: StorageVolumeRecord, attachments: &[Attachment], region_id: Option<&str>) -> Self {
        let state = record
            .status
            .as_deref()
            .map_or(VolumeState::Pending, VolumeState::from_backend);
        let attached = record
            .status
            .as_deref()
            .filter(|s| s.to_ascii_lowercase().contains("attached"))
            .and_then(|_| attachment_for(attachments, &record.name));
        let product_id = match record.properties {
            Some(Value::String(p)) => Some(p),
            Some(Value::Array(items)) => items.first().and_then(Value::as_str).map(str::to_string),
            _ => None,
        };

        Self {
            name: record.name.clone(),
            description: record.name.clone(),
            state,
            size_mb: loose_u64(record.size_mbytes.as_ref()),
            product_id,
            instance_id: attached.map(|a| a.instance.clone()),
            device_id: attached.map(|a| a.index.to_string()),
            region_id: region_id.map(str::to_string),
            id: record.name,
        }
    }
}

/// Storage volume operations
#[derive(Clone)]
pub struct Volumes {
    client: NimbulaClient,
}

impl Volumes {
    pub fn new(client: NimbulaClient) -> Self {
        Self { client }
    }

    async fn attachments(&self) -> Result<Vec<Attachment>> {
        let mut method = self.client.method(Endpoint::StorageAttachment);
        method.list().await?;
        Ok(method
            .results::<StorageAttachmentRecord>()?
            .iter()
            .filter_map(Attachment::from_record)
            .collect())
    }

    /// Create a volume of `size_mb` megabytes, optionally with a storage property
    pub async fn create(&self, size_mb: u64, property: Option<&str>) -> Result<Volume> {
        let volume = NewVolume {
            name: self.client.namespace().qualify(&uuid::Uuid::new_v4().to_string()),
            size_mbytes: size_mb.to_string(),
            properties: property,
            status: "Online",
        };
        tracing::info!("Creating volume {} ({} MB)", volume.name, size_mb);

        let mut method = self.client.method(Endpoint::StorageVolume);
        method.post(&volume).await?;
        let record: StorageVolumeRecord = method.json()?;
        let attachments = self.attachments().await?;
        Ok(Volume::from_record(record, &attachments, self.client.region_id()))
    }

    pub async fn get(&self, id: &str) -> Result<Option<Volume>> {
        let mut method = self.client.method(Endpoint::StorageVolume);
        match method.get(id).await? {
            401 | 404 => Ok(None),
            _ => {
                let record: StorageVolumeRecord = method.json()?;
                let attachments = self.attachments().await?;
                Ok(Some(Volume::from_record(record, &attachments, self.client.region_id())))
            }
        }
    }

    pub async fn list(&self) -> Result<Vec<Volume>> {
        let mut method = self.client.method(Endpoint::StorageVolume);
        method.list().await?;
        let records: Vec<StorageVolumeRecord> = method.results()?;
        let attachments = self.attachments().await?;
        Ok(records
            .into_iter()
            .map(|r| Volume::from_record(r, &attachments, self.client.region_id()))
            .collect())
    }

    /// Storage properties a volume can be created with
    pub async fn products(&self) -> Result<Vec<String>> {
        let mut method = self.client.method(Endpoint::StorageProperty);
        method.list().await?;
        Ok(method
            .results::<StoragePropertyRecord>()?
            .into_iter()
            .map(|p| p.name)
            .collect())
    }

    pub async fn attach(&self, volume_id: &str, instance_id: &str, index: u32) -> Result<()> {
        if Instances::new(self.client.clone()).record(instance_id).await?.is_none() {
            return Err(Error::InvalidInput(format!("no such instance: {}", instance_id)));
        }

        tracing::info!("Attaching {} to {} at index {}", volume_id, instance_id, index);
        let mut method = self.client.method(Endpoint::StorageAttachment);
        method
            .post(&NewAttachment {
                storage_volume_name: volume_id,
                instance_name: instance_id,
                index,
            })
            .await?;
        Ok(())
    }

    pub async fn detach(&self, volume_id: &str) -> Result<()> {
        let attachments = self.attachments().await?;
        let attachment = attachment_for(&attachments, volume_id)
            .ok_or_else(|| Error::InvalidInput(format!("volume {} is not attached", volume_id)))?;

        tracing::info!("Detaching {} from {}", volume_id, attachment.instance);
        let mut method = self.client.method(Endpoint::StorageAttachment);
        method.delete(&attachment.id).await?;
        Ok(())
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        let mut method = self.client.method(Endpoint::StorageVolume);
        method.delete(id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_volume_states() {
        assert_eq!(VolumeState::from_backend("Online"), VolumeState::Available);
        assert_eq!(VolumeState::from_backend("Online,Attached"), VolumeState::Available);
        assert_eq!(VolumeState::from_backend("Adding"), VolumeState::Pending);
        assert_eq!(VolumeState::from_backend("Deleting"), VolumeState::Pending);
    }

    #[test]
    fn test_attached_volume_resolves_instance() {
        let attachments: Vec<Attachment> = [json!({
            "name": "/acct1/bob/att1",
            "storage_volume_name": "/acct1/bob/vol1",
            "instance_name": "/acct1/bob/vm1",
            "index": "3"
        })]
        .into_iter()
        .map(|v| serde_json::from_value::<StorageAttachmentRecord>(v).unwrap())
        .filter_map(|r| Attachment::from_record(&r))
        .collect();

        let record: StorageVolumeRecord = serde_json::from_value(json!({
            "name": "/acct1/bob/vol1",
            "size_mbytes": 1024,
            "status": "Online,Attached",
            "properties": ["/oracle/public/storage/default"]
        }))
        .unwrap();

        let volume = Volume::from_record(record, &attachments, Some("site-a"));
        assert_eq!(volume.state, VolumeState::Available);
        assert_eq!(volume.size_mb, Some(1024));
        assert_eq!(volume.instance_id.as_deref(), Some("/acct1/bob/vm1"));
        assert_eq!(volume.device_id.as_deref(), Some("3"));
        assert_eq!(volume.product_id.as_deref(), Some("/oracle/public/storage/default"));
    }

    #[test]
    fn test_incomplete_attachment_is_ignored() {
        let record: StorageAttachmentRecord =
            serde_json::from_value(json!({"storage_volume_name": "/acct1/bob/vol1"})).unwrap();
        assert_eq!(Attachment::from_record(&record), None);
    }

    #[test]
    fn test_new_volume_json() {
        let body = serde_json::to_value(NewVolume {
            name: "/acct1/bob/x".to_string(),
            size_mbytes: 2048.to_string(),
            properties: None,
            status: "Online",
        })
        .unwrap();
        assert_eq!(body["size_Mbytes"], json!("2048"));
        assert_eq!(body["status"], json!("Online"));
        assert!(body.get("properties").is_none());
    }
}
