use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registry-assigned camera identifier. Never reused, even after removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraId(pub u64);

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CameraId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(CameraId)
    }
}

/// Network reachability domain of a camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Internal,
    External,
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkType::Internal => write!(f, "internal"),
            NetworkType::External => write!(f, "external"),
        }
    }
}

/// Supported capture resolutions, serialized as `<width>x<height>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "1280x720")]
    Hd720,
    #[default]
    #[serde(rename = "1920x1080")]
    FullHd1080,
    #[serde(rename = "2560x1440")]
    Qhd1440,
    #[serde(rename = "3840x2160")]
    Uhd4k,
}

impl Resolution {
    pub const ALL: [Resolution; 4] = [
        Resolution::Hd720,
        Resolution::FullHd1080,
        Resolution::Qhd1440,
        Resolution::Uhd4k,
    ];

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Resolution::Hd720 => (1280, 720),
            Resolution::FullHd1080 => (1920, 1080),
            Resolution::Qhd1440 => (2560, 1440),
            Resolution::Uhd4k => (3840, 2160),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Resolution::Hd720 => "HD (720p)",
            Resolution::FullHd1080 => "Full HD (1080p)",
            Resolution::Qhd1440 => "QHD (1440p)",
            Resolution::Uhd4k => "4K (2160p)",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (width, height) = self.dimensions();
        write!(f, "{}x{}", width, height)
    }
}

/// Viewer stream quality preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamQuality {
    Low,
    #[default]
    Medium,
    High,
}

impl StreamQuality {
    pub const ALL: [StreamQuality; 3] = [StreamQuality::Low, StreamQuality::Medium, StreamQuality::High];

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamQuality::Low => "low",
            StreamQuality::Medium => "medium",
            StreamQuality::High => "high",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StreamQuality::Low => "Low (480p)",
            StreamQuality::Medium => "Medium (720p)",
            StreamQuality::High => "High (1080p)",
        }
    }
}

/// Brands offered to clients as suggestions. Any non-empty brand is accepted.
pub const BRAND_SUGGESTIONS: [&str; 7] = ["Hikvision", "Dahua", "Axis", "Bosch", "Sony", "Samsung", "Other"];

/// One monitored camera as stored by the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraRecord {
    pub id: CameraId,
    pub name: String,
    pub location: String,
    pub ip_address: String,
    pub port: u16,
    pub stream_url: String,
    pub network_type: NetworkType,
    pub resolution: Resolution,
    pub brand: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
}

/// Fields supplied when registering a camera.
///
/// Everything is optional at the wire level so that a request missing
/// several fields is reported as one validation failure listing all of
/// them, instead of failing on the first absent key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewCamera {
    pub name: String,
    pub location: String,
    pub ip_address: String,
    pub port: Option<i64>,
    pub stream_url: Option<String>,
    pub network_type: Option<NetworkType>,
    pub resolution: Option<Resolution>,
    pub brand: String,
    pub model: Option<String>,
    pub description: Option<String>,
}

/// Partial update. `None` leaves a field untouched; an empty `model` or
/// `description` clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CameraPatch {
    pub name: Option<String>,
    pub location: Option<String>,
    pub ip_address: Option<String>,
    pub port: Option<i64>,
    pub stream_url: Option<String>,
    pub network_type: Option<NetworkType>,
    pub resolution: Option<Resolution>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub description: Option<String>,
}

impl CameraPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.location.is_none()
            && self.ip_address.is_none()
            && self.port.is_none()
            && self.stream_url.is_none()
            && self.network_type.is_none()
            && self.resolution.is_none()
            && self.brand.is_none()
            && self.model.is_none()
            && self.description.is_none()
    }
}

/// A single field-level constraint violation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
