use std::path::PathBuf;
use std::sync::Arc;

use nalgebra::Point3;
use nalgebra::UnitQuaternion;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::device::TrackingDeviceType;

/// Pose of the renderable object attached to a tool. Shared between the
/// visualization filter and whoever draws the object.
#[derive(Debug, Clone, PartialEq)]
pub struct RepresentationPose {
    pub position: Point3<f64>,
    pub orientation: UnitQuaternion<f64>,
}

impl Default for RepresentationPose {
    fn default() -> Self {
        Self {
            position: Point3::origin(),
            orientation: UnitQuaternion::identity(),
        }
    }
}

pub type ToolRepresentation = Arc<Mutex<RepresentationPose>>;

pub fn new_tool_representation() -> ToolRepresentation {
    Arc::new(Mutex::new(RepresentationPose::default()))
}

/// Descriptor of one tracked instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationTool {
    pub identifier: String,
    pub name: String,
    pub device_type: TrackingDeviceType,
    pub calibration_file: Option<PathBuf>,
    pub serial_number: Option<String>,
    #[serde(skip)]
    pub representation: Option<ToolRepresentation>,
}

impl NavigationTool {
    pub fn new(identifier: &str, name: &str, device_type: TrackingDeviceType) -> Self {
        Self {
            identifier: identifier.to_string(),
            name: name.to_string(),
            device_type,
            calibration_file: None,
            serial_number: None,
            representation: None,
        }
    }

    pub fn with_calibration_file(mut self, path: PathBuf) -> Self {
        self.calibration_file = Some(path);
        self
    }

    pub fn with_representation(mut self) -> Self {
        self.representation = Some(new_tool_representation());
        self
    }
}
