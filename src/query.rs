use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::registry::Registry;
use crate::types::{CameraRecord, NetworkType};

/// Criteria for a filtered camera listing. Unset criteria match everything.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CameraFilter {
    /// Case-insensitive substring of name or location
    pub search: Option<String>,
    pub network_type: Option<NetworkType>,
    pub online: Option<bool>,
}

impl CameraFilter {
    pub fn search(term: &str) -> Self {
        Self {
            search: Some(term.to_string()),
            ..Default::default()
        }
    }

    fn matches(&self, camera: &CameraRecord, needle: Option<&str>) -> bool {
        if let Some(needle) = needle {
            let hit = camera.name.to_lowercase().contains(needle) || camera.location.to_lowercase().contains(needle);
            if !hit {
                return false;
            }
        }
        if let Some(network_type) = self.network_type {
            if camera.network_type != network_type {
                return false;
            }
        }
        if let Some(online) = self.online {
            if camera.is_online != online {
                return false;
            }
        }
        true
    }
}

/// Dashboard header counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FleetSummary {
    pub total: usize,
    pub online: usize,
    pub offline: usize,
    pub internal: usize,
    pub external: usize,
}

/// Read-only views over the registry. Every call works on its own snapshot.
#[derive(Clone)]
pub struct QueryFacade {
    registry: Arc<Registry>,
}

impl QueryFacade {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub async fn filter(&self, search: &str) -> Vec<CameraRecord> {
        self.query(&CameraFilter::search(search)).await
    }

    pub async fn query(&self, filter: &CameraFilter) -> Vec<CameraRecord> {
        let needle = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .map(str::to_lowercase);

        self.registry
            .list()
            .await
            .into_iter()
            .filter(|camera| filter.matches(camera, needle.as_deref()))
            .collect()
    }

    pub async fn count_online(&self) -> usize {
        self.registry.list().await.iter().filter(|c| c.is_online).count()
    }

    pub async fn count_by_network_type(&self, network_type: NetworkType) -> usize {
        self.registry
            .list()
            .await
            .iter()
            .filter(|c| c.network_type == network_type)
            .count()
    }

    /// All counters from a single snapshot, so they always add up
    pub async fn summary(&self) -> FleetSummary {
        let cameras = self.registry.list().await;
        let online = cameras.iter().filter(|c| c.is_online).count();
        let internal = cameras
            .iter()
            .filter(|c| c.network_type == NetworkType::Internal)
            .count();

        FleetSummary {
            total: cameras.len(),
            online,
            offline: cameras.len() - online,
            internal,
            external: cameras.len() - internal,
        }
    }
}
