use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::RegistryError;
use crate::types::{CameraId, CameraPatch, CameraRecord, FieldViolation, NewCamera};

/// Time source for `lastSeen` stamps
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

struct RegistryState {
    // Ids are handed out in increasing order, so key order is insertion order.
    records: BTreeMap<CameraId, CameraRecord>,
    next_id: u64,
}

/// Sole owner of the camera records.
///
/// Every operation takes the lock once, so each call is atomic with respect
/// to the whole collection. Callers only ever receive clones.
pub struct Registry {
    state: RwLock<RegistryState>,
    clock: Arc<dyn Clock>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(RegistryState {
                records: BTreeMap::new(),
                next_id: 1,
            }),
            clock,
        }
    }

    /// `lastSeen` never moves backwards, even if the clock does.
    fn stamp(&self, previous: DateTime<Utc>) -> DateTime<Utc> {
        self.clock.now().max(previous)
    }

    /// Register a camera. Either every field is valid and the record is
    /// stored, or nothing changes and every violation is reported.
    pub async fn create(&self, fields: NewCamera) -> Result<CameraRecord, RegistryError> {
        let violations = validate_new(&fields);
        if !violations.is_empty() {
            return Err(RegistryError::Validation(violations));
        }

        // validate_new guarantees both are present and in range
        let (Some(port), Some(network_type)) = (fields.port.and_then(checked_port), fields.network_type) else {
            return Err(RegistryError::Validation(validate_new(&fields)));
        };

        let mut state = self.state.write().await;
        let id = CameraId(state.next_id);
        state.next_id = state.next_id.checked_add(1).ok_or(RegistryError::IdsExhausted)?;

        let record = CameraRecord {
            id,
            name: fields.name.trim().to_string(),
            location: fields.location.trim().to_string(),
            ip_address: fields.ip_address.trim().to_string(),
            port,
            stream_url: fields.stream_url.unwrap_or_default(),
            network_type,
            resolution: fields.resolution.unwrap_or_default(),
            brand: fields.brand.trim().to_string(),
            model: non_empty(fields.model),
            description: non_empty(fields.description),
            is_online: false,
            last_seen: self.clock.now(),
        };

        state.records.insert(id, record.clone());
        debug!(camera_id = %id, "camera record created");
        Ok(record)
    }

    /// Merge the supplied fields into an existing record. An empty patch
    /// only refreshes `lastSeen`.
    pub async fn update(&self, id: CameraId, patch: CameraPatch) -> Result<CameraRecord, RegistryError> {
        let mut state = self.state.write().await;
        let Some(current) = state.records.get(&id) else {
            return Err(RegistryError::NotFound(id));
        };

        let violations = validate_patch(&patch);
        if !violations.is_empty() {
            return Err(RegistryError::Validation(violations));
        }

        let mut updated = current.clone();
        if let Some(name) = patch.name {
            updated.name = name.trim().to_string();
        }
        if let Some(location) = patch.location {
            updated.location = location.trim().to_string();
        }
        if let Some(ip_address) = patch.ip_address {
            updated.ip_address = ip_address.trim().to_string();
        }
        if let Some(port) = patch.port.and_then(checked_port) {
            updated.port = port;
        }
        if let Some(stream_url) = patch.stream_url {
            updated.stream_url = stream_url;
        }
        if let Some(network_type) = patch.network_type {
            updated.network_type = network_type;
        }
        if let Some(resolution) = patch.resolution {
            updated.resolution = resolution;
        }
        if let Some(brand) = patch.brand {
            updated.brand = brand.trim().to_string();
        }
        if patch.model.is_some() {
            updated.model = non_empty(patch.model);
        }
        if patch.description.is_some() {
            updated.description = non_empty(patch.description);
        }
        updated.last_seen = self.stamp(updated.last_seen);

        state.records.insert(id, updated.clone());
        Ok(updated)
    }

    /// Delete permanently. A second removal of the same id fails.
    pub async fn remove(&self, id: CameraId) -> Result<CameraRecord, RegistryError> {
        let mut state = self.state.write().await;
        state.records.remove(&id).ok_or(RegistryError::NotFound(id))
    }

    pub async fn get(&self, id: CameraId) -> Result<CameraRecord, RegistryError> {
        let state = self.state.read().await;
        state.records.get(&id).cloned().ok_or(RegistryError::NotFound(id))
    }

    /// Point-in-time copy of every record, in insertion order
    pub async fn list(&self) -> Vec<CameraRecord> {
        let state = self.state.read().await;
        state.records.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    /// Record a liveness observation.
    ///
    /// Returns the previous `isOnline` value, or `None` when the camera no
    /// longer exists (removed while its probe was in flight).
    pub async fn set_liveness(&self, id: CameraId, is_online: bool) -> Option<bool> {
        let mut state = self.state.write().await;
        let record = state.records.get_mut(&id)?;
        let previous = record.is_online;
        record.is_online = is_online;
        record.last_seen = self.stamp(record.last_seen);
        Some(previous)
    }

    /// Replace the contents with a persisted snapshot, keeping ids.
    /// Invalid or duplicate entries are skipped. Returns the number loaded.
    pub async fn restore(&self, records: Vec<CameraRecord>) -> usize {
        let mut restored = BTreeMap::new();
        for record in records {
            let violations = validate_record(&record);
            if !violations.is_empty() {
                warn!(camera_id = %record.id, ?violations, "skipping invalid camera in snapshot");
                continue;
            }
            // The id after the highest restored one must still be allocatable
            if record.id.0 == u64::MAX {
                warn!(camera_id = %record.id, "skipping camera with reserved id in snapshot");
                continue;
            }
            if restored.contains_key(&record.id) {
                warn!(camera_id = %record.id, "skipping duplicate camera id in snapshot");
                continue;
            }
            restored.insert(record.id, record);
        }

        let mut state = self.state.write().await;
        let next = restored
            .keys()
            .next_back()
            .and_then(|id| id.0.checked_add(1))
            .unwrap_or(1);
        state.next_id = state.next_id.max(next);
        state.records = restored;
        state.records.len()
    }
}

const PORT_RANGE: &str = "must be between 1 and 65535";

fn checked_port(port: i64) -> Option<u16> {
    u16::try_from(port).ok().filter(|p| *p != 0)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn require_text(field: &str, value: &str, violations: &mut Vec<FieldViolation>) {
    if value.trim().is_empty() {
        violations.push(FieldViolation::new(field, "must not be empty"));
    }
}

fn require_port(port: i64, violations: &mut Vec<FieldViolation>) {
    if checked_port(port).is_none() {
        violations.push(FieldViolation::new("port", PORT_RANGE));
    }
}

fn validate_new(fields: &NewCamera) -> Vec<FieldViolation> {
    let mut violations = Vec::new();
    require_text("name", &fields.name, &mut violations);
    require_text("location", &fields.location, &mut violations);
    require_text("ipAddress", &fields.ip_address, &mut violations);
    match fields.port {
        Some(port) => require_port(port, &mut violations),
        None => violations.push(FieldViolation::new("port", "is required")),
    }
    if fields.network_type.is_none() {
        violations.push(FieldViolation::new("networkType", "is required"));
    }
    require_text("brand", &fields.brand, &mut violations);
    violations
}

fn validate_patch(patch: &CameraPatch) -> Vec<FieldViolation> {
    let mut violations = Vec::new();
    if let Some(name) = &patch.name {
        require_text("name", name, &mut violations);
    }
    if let Some(location) = &patch.location {
        require_text("location", location, &mut violations);
    }
    if let Some(ip_address) = &patch.ip_address {
        require_text("ipAddress", ip_address, &mut violations);
    }
    if let Some(port) = patch.port {
        require_port(port, &mut violations);
    }
    if let Some(brand) = &patch.brand {
        require_text("brand", brand, &mut violations);
    }
    violations
}

fn validate_record(record: &CameraRecord) -> Vec<FieldViolation> {
    let mut violations = Vec::new();
    require_text("name", &record.name, &mut violations);
    require_text("location", &record.location, &mut violations);
    require_text("ipAddress", &record.ip_address, &mut violations);
    require_port(i64::from(record.port), &mut violations);
    require_text("brand", &record.brand, &mut violations);
    violations
}
