pub mod openigtlink;
pub mod optitrack;
pub mod virtual_device;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use nalgebra::Point3;
use nalgebra::UnitQuaternion;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::TrackingError;
use crate::navigation::data::NavigationData;

/// Lifecycle state every tracking device moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingState {
    /// Initial state, device is being configured.
    Setup,
    /// Connection to the hardware is established.
    Ready,
    /// Tool data is being acquired.
    Tracking,
}

impl Default for TrackingState {
    fn default() -> Self {
        TrackingState::Setup
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackingDeviceType {
    NdiPolaris,
    NdiAurora,
    ClaronMicron,
    Optitrack,
    OpenIgtLink,
    Virtual,
    Polhemus,
}

impl TrackingDeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingDeviceType::NdiPolaris => "NDIPolaris",
            TrackingDeviceType::NdiAurora => "NDIAurora",
            TrackingDeviceType::ClaronMicron => "ClaronMicron",
            TrackingDeviceType::Optitrack => "NPOptitrack",
            TrackingDeviceType::OpenIgtLink => "OpenIGTLink",
            TrackingDeviceType::Virtual => "Virtual",
            TrackingDeviceType::Polhemus => "Polhemus",
        }
    }
}

impl fmt::Display for TrackingDeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last known pose of one tool as reported by its device.
#[derive(Debug, Clone)]
pub struct ToolSnapshot {
    pub name: String,
    pub position: Point3<f64>,
    pub orientation: UnitQuaternion<f64>,
    pub data_valid: bool,
    pub timestamp_ms: f64,
}

impl ToolSnapshot {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            position: Point3::origin(),
            orientation: UnitQuaternion::identity(),
            data_valid: false,
            timestamp_ms: 0.0,
        }
    }

    pub fn to_navigation_data(&self) -> NavigationData {
        let mut data = NavigationData::new(&self.name);
        if self.data_valid {
            data.set_pose(self.position, self.orientation, self.timestamp_ms);
        }
        data
    }
}

/// Common contract of all tracking hardware.
///
/// Constructed in `Setup`, `open_connection` moves to `Ready`,
/// `start_tracking` to `Tracking`. Operations called from the wrong state
/// return `TrackingError::InvalidState` and leave the device untouched.
pub trait TrackingDevice: Send {
    fn device_type(&self) -> TrackingDeviceType;
    fn state(&self) -> TrackingState;

    fn open_connection(&mut self) -> Result<(), TrackingError>;
    fn close_connection(&mut self) -> Result<(), TrackingError>;
    fn start_tracking(&mut self) -> Result<(), TrackingError>;
    fn stop_tracking(&mut self) -> Result<(), TrackingError>;

    fn tool_count(&self) -> usize;
    fn tool(&self, index: usize) -> Option<ToolSnapshot>;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub type SharedTrackingDevice = Arc<Mutex<dyn TrackingDevice>>;

pub(crate) fn require_state(
    required: TrackingState,
    actual: TrackingState,
) -> Result<(), TrackingError> {
    if actual == required {
        Ok(())
    } else {
        Err(TrackingError::InvalidState { required, actual })
    }
}
