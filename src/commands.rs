use std::sync::Arc;

use tracing::{debug, error, info};

use crate::error::CommandError;
use crate::persist::SnapshotStore;
use crate::registry::Registry;
use crate::types::{CameraId, CameraPatch, CameraRecord, NewCamera, Resolution};

/// Validating write surface over the registry
pub struct CommandHandlers {
    registry: Arc<Registry>,
    default_resolution: Resolution,
    snapshots: Option<SnapshotStore>,
}

impl CommandHandlers {
    pub fn new(registry: Arc<Registry>, default_resolution: Resolution, snapshots: Option<SnapshotStore>) -> Self {
        Self {
            registry,
            default_resolution,
            snapshots,
        }
    }

    pub async fn add_camera(&self, mut request: NewCamera) -> Result<CameraRecord, CommandError> {
        if request.resolution.is_none() {
            request.resolution = Some(self.default_resolution);
        }
        let missing_url = request.stream_url.as_deref().map_or(true, |url| url.trim().is_empty());
        if missing_url {
            request.stream_url = derive_stream_url(&request.ip_address, request.port);
        }

        let record = self.registry.create(request).await?;
        info!(
            "📝 Camera {} registered: {} at {} ({}:{})",
            record.id, record.name, record.location, record.ip_address, record.port
        );
        self.persist().await;
        Ok(record)
    }

    pub async fn update_camera(&self, id: &str, patch: CameraPatch) -> Result<CameraRecord, CommandError> {
        let id = parse_id(id)?;
        if patch.is_empty() {
            debug!(camera_id = %id, "empty patch, only refreshing lastSeen");
        }
        let record = self.registry.update(id, patch).await?;
        info!("✏️ Camera {} updated", record.id);
        self.persist().await;
        Ok(record)
    }

    pub async fn remove_camera(&self, id: &str) -> Result<(), CommandError> {
        let id = parse_id(id)?;
        let record = self.registry.remove(id).await?;
        info!("🗑️ Camera {} removed: {}", record.id, record.name);
        self.persist().await;
        Ok(())
    }

    pub async fn get_camera(&self, id: &str) -> Result<CameraRecord, CommandError> {
        let id = parse_id(id)?;
        Ok(self.registry.get(id).await?)
    }

    /// Write the current snapshot if persistence is configured. Failures are
    /// logged and never reach the caller.
    pub async fn persist(&self) {
        let Some(store) = &self.snapshots else {
            return;
        };
        if let Err(e) = store.save_with(|| self.registry.list()).await {
            error!("Failed to write snapshot {}: {}", store.path().display(), e);
        }
    }
}

fn parse_id(raw: &str) -> Result<CameraId, CommandError> {
    raw.parse::<CameraId>()
        .map_err(|_| CommandError::NotFound(raw.to_string()))
}

/// `rtsp://<ip>:<port>/stream`, when both parts are usable
fn derive_stream_url(ip_address: &str, port: Option<i64>) -> Option<String> {
    let ip = ip_address.trim();
    let port = port.filter(|p| (1..=65535).contains(p))?;
    if ip.is_empty() {
        return None;
    }
    Some(format!("rtsp://{}:{}/stream", ip, port))
}
