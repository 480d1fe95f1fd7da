//! Machine Images
//!
//! Machine images are launched through image lists: a launch plan names an
//! image list and the 1-based number of the entry holding the image.

use super::Endpoint;
use crate::nimbula::address::ResourceId;
use crate::nimbula::client::NimbulaClient;
use crate::nimbula::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Owner of the shared public image library
pub const PUBLIC_LIBRARY: &str = "/nimbula/public/";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineImageRecord {
    pub name: String,
    #[serde(default)]
    pub attributes: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageListEntry {
    #[serde(default)]
    pub machineimages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageListRecord {
    pub name: String,
    #[serde(default)]
    pub entries: Vec<ImageListEntry>,
}

impl ImageListRecord {
    /// 1-based number of the entry that holds `image_id`
    pub fn entry_of(&self, image_id: &str) -> Option<u32> {
        self.entries
            .iter()
            .position(|e| e.machineimages.iter().any(|m| m == image_id))
            .and_then(|i| u32::try_from(i + 1).ok())
    }

    /// First image of the 1-based entry `entry`
    pub fn image_at(&self, entry: u32) -> Option<&str> {
        let index = (entry as usize).checked_sub(1)?;
        self.entries.get(index)?.machineimages.first().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MachineImage {
    pub id: String,
    pub owner: String,
    pub name: String,
    pub description: String,
    /// Value of the `type` attribute, e.g. `linux`
    pub platform: Option<String>,
    pub public: bool,
    pub region_id: Option<String>,
}

impl MachineImage {
    pub fn from_record(record: MachineImageRecord, region_id: Option<&str>) -> Result<Self> {
        let id = ResourceId::parse(&record.name)?;
        let platform = record
            .attributes
            .as_ref()
            .and_then(|a| a.get("type"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let description = match platform.as_deref() {
            Some(kind) => format!("{} ({})", id.name, kind),
            None => id.name.clone(),
        };

        Ok(Self {
            public: is_public(&record.name),
            owner: id.account,
            name: id.name,
            description,
            platform,
            region_id: region_id.map(str::to_string),
            id: record.name,
        })
    }

    fn matches(&self, keyword: &str) -> bool {
        let keyword = keyword.to_lowercase();
        [&self.description, &self.name, &self.id]
            .iter()
            .any(|field| field.to_lowercase().contains(&keyword))
    }
}

/// Whether an image belongs to the public library
pub fn is_public(image_id: &str) -> bool {
    image_id.starts_with(PUBLIC_LIBRARY.trim_end_matches('/'))
}

/// Machine image operations
#[derive(Clone)]
pub struct Images {
    client: NimbulaClient,
}

impl Images {
    pub fn new(client: NimbulaClient) -> Self {
        Self { client }
    }

    fn to_images(&self, records: Vec<MachineImageRecord>) -> Result<Vec<MachineImage>> {
        records
            .into_iter()
            .map(|r| MachineImage::from_record(r, self.client.region_id()))
            .collect()
    }

    pub async fn get(&self, id: &str) -> Result<Option<MachineImage>> {
        let mut method = self.client.method(Endpoint::MachineImage);
        match method.get(id).await? {
            401 | 404 => Ok(None),
            _ => MachineImage::from_record(method.json()?, self.client.region_id()).map(Some),
        }
    }

    /// Images in the caller's account
    pub async fn list(&self) -> Result<Vec<MachineImage>> {
        let mut method = self.client.method(Endpoint::MachineImage);
        method.list().await?;
        self.to_images(method.results()?)
    }

    /// Images owned by another account, or the public library for `None`
    pub async fn list_owned_by(&self, owner: Option<&str>) -> Result<Vec<MachineImage>> {
        let target = match owner {
            Some(owner) => format!("/{}/", owner.trim_matches('/')),
            None => PUBLIC_LIBRARY.to_string(),
        };
        let mut method = self.client.method(Endpoint::MachineImage);
        match method.get(&target).await? {
            401 | 404 => Ok(Vec::new()),
            _ => self.to_images(method.results()?),
        }
    }

    /// Own and public images whose name, description or id contains `keyword`
    pub async fn search(&self, keyword: Option<&str>) -> Result<Vec<MachineImage>> {
        let (own, public) = futures::try_join!(self.list(), self.list_owned_by(None))?;

        let mut seen = HashSet::new();
        Ok(own
            .into_iter()
            .chain(public)
            .filter(|image| keyword.map_or(true, |k| image.matches(k)))
            .filter(|image| seen.insert(image.id.clone()))
            .collect())
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        let mut method = self.client.method(Endpoint::MachineImage);
        method.delete(id).await?;
        Ok(())
    }

    /// Image list and entry number to launch `image_id` from
    ///
    /// Scans the image lists filed under the image's own account and user.
    pub async fn launch_info(&self, image_id: &str) -> Result<Option<(String, u32)>> {
        let id = ResourceId::parse(image_id)?;
        let mut method = self.client.method(Endpoint::ImageList);
        match method.get(&format!("/{}/{}/", id.account, id.user)).await? {
            401 | 404 => return Ok(None),
            _ => {}
        }

        Ok(method
            .results::<ImageListRecord>()?
            .into_iter()
            .find_map(|list| list.entry_of(image_id).map(|entry| (list.name, entry))))
    }

    /// Image held by entry `entry` of `imagelist`
    pub async fn machine_image_id(&self, imagelist: &str, entry: u32) -> Result<Option<String>> {
        let mut method = self.client.method(Endpoint::ImageList);
        match method.get(imagelist).await? {
            401 | 404 => Ok(None),
            _ => Ok(method
                .json::<ImageListRecord>()?
                .image_at(entry)
                .map(str::to_string)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn image_list() -> ImageListRecord {
        serde_json::from_value(json!({
            "name": "/nimbula/public/default",
            "entries": [
                {"machineimages": ["/nimbula/public/centos"]},
                {"machineimages": ["/nimbula/public/ubuntu", "/nimbula/public/ubuntu-old"]}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_entry_lookup() {
        let list = image_list();
        assert_eq!(list.entry_of("/nimbula/public/centos"), Some(1));
        assert_eq!(list.entry_of("/nimbula/public/ubuntu-old"), Some(2));
        assert_eq!(list.entry_of("/nimbula/public/missing"), None);
        assert_eq!(list.image_at(2), Some("/nimbula/public/ubuntu"));
        assert_eq!(list.image_at(0), None);
        assert_eq!(list.image_at(3), None);
    }

    #[test]
    fn test_image_from_record() {
        let record = MachineImageRecord {
            name: "/nimbula/public/centos".to_string(),
            attributes: Some(json!({"type": "linux"})),
        };
        let image = MachineImage::from_record(record, None).unwrap();
        assert_eq!(image.owner, "nimbula");
        assert_eq!(image.name, "centos");
        assert_eq!(image.description, "centos (linux)");
        assert!(image.public);
        assert!(image.matches("LINUX"));
        assert!(!image.matches("windows"));
    }

    #[test]
    fn test_image_without_attributes() {
        let record = MachineImageRecord {
            name: "/acct1/bob/custom".to_string(),
            attributes: None,
        };
        let image = MachineImage::from_record(record, None).unwrap();
        assert_eq!(image.description, "custom");
        assert!(!image.public);
    }
}
