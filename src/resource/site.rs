//! Sites
//!
//! Sites come from the global `info` catalog. Each site is a region with a
//! single data center.

use super::Endpoint;
use crate::nimbula::client::NimbulaClient;
use crate::nimbula::error::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteRecord {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataCenter {
    pub id: String,
    pub name: String,
    pub region_id: String,
}

impl From<&Region> for DataCenter {
    fn from(region: &Region) -> Self {
        Self {
            id: region.id.clone(),
            name: format!("{} (DC)", region.name),
            region_id: region.id.clone(),
        }
    }
}

/// Site catalog
#[derive(Clone)]
pub struct Sites {
    client: NimbulaClient,
}

impl Sites {
    pub fn new(client: NimbulaClient) -> Self {
        Self { client }
    }

    pub async fn list_regions(&self) -> Result<Vec<Region>> {
        let mut method = self.client.method(Endpoint::Info);
        method.list().await?;
        Ok(method
            .results::<SiteRecord>()?
            .into_iter()
            .filter(|s| !s.name.is_empty())
            .map(|s| Region {
                id: s.name.clone(),
                name: s.name,
            })
            .collect())
    }

    pub async fn region(&self, id: &str) -> Result<Option<Region>> {
        Ok(self.list_regions().await?.into_iter().find(|r| r.id == id))
    }

    pub async fn list_data_centers(&self, region_id: &str) -> Result<Vec<DataCenter>> {
        let region = self
            .region(region_id)
            .await?
            .ok_or_else(|| Error::InvalidInput(format!("no such region: {}", region_id)))?;
        Ok(vec![DataCenter::from(&region)])
    }

    /// Data center in the client's own region
    pub async fn data_center(&self, id: &str) -> Result<Option<DataCenter>> {
        let region_id = self
            .client
            .region_id()
            .ok_or_else(|| Error::Config("no region configured".to_string()))?;
        Ok(self
            .list_data_centers(region_id)
            .await?
            .into_iter()
            .find(|dc| dc.id == id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_data_center_per_region() {
        let region = Region {
            id: "site-a".to_string(),
            name: "site-a".to_string(),
        };
        let dc = DataCenter::from(&region);
        assert_eq!(dc.name, "site-a (DC)");
        assert_eq!(dc.id, "site-a");
        assert_eq!(dc.region_id, "site-a");
    }
}
