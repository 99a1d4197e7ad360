use std::collections::HashMap;
use std::sync::Arc;

use crate::device::optitrack::OptitrackTrackingDevice;
use crate::device::virtual_device::VirtualTrackingDevice;
use crate::device::SharedTrackingDevice;
use crate::device::TrackingDeviceType;
use crate::navigation::storage::NavigationToolStorage;
use crate::pipeline::source::TrackingDeviceSource;

/// What a factory hands back: the source plus, per output index, the index
/// of the originating tool in the storage.
pub struct FactoryOutput {
    pub source: TrackingDeviceSource,
    pub correspondences: Vec<usize>,
}

/// Builds a tracking source for one device type, including whatever
/// device-specific preparation the type needs. Failures are reported as
/// plain messages, the configurator owns the soft error contract.
pub trait TrackingSourceFactory: Send + Sync {
    fn create_source(
        &self,
        device: SharedTrackingDevice,
        storage: &NavigationToolStorage,
    ) -> Result<FactoryOutput, String>;
}

/// Explicit device type to factory map. Built once at startup and passed to
/// every configurator, nothing global.
#[derive(Default)]
pub struct TrackingSourceRegistry {
    factories: HashMap<TrackingDeviceType, Box<dyn TrackingSourceFactory>>,
}

impl TrackingSourceRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with all device types this crate implements.
    pub fn with_defaults() -> Self {
        let mut registry = TrackingSourceRegistry::new();
        registry.register(TrackingDeviceType::Virtual, Box::new(VirtualSourceFactory));
        registry.register(
            TrackingDeviceType::OpenIgtLink,
            Box::new(OpenIgtLinkSourceFactory),
        );
        registry.register(
            TrackingDeviceType::Optitrack,
            Box::new(OptitrackSourceFactory),
        );
        registry
    }

    pub fn register(
        &mut self,
        device_type: TrackingDeviceType,
        factory: Box<dyn TrackingSourceFactory>,
    ) {
        self.factories.insert(device_type, factory);
    }

    pub fn factory(&self, device_type: TrackingDeviceType) -> Option<&dyn TrackingSourceFactory> {
        self.factories.get(&device_type).map(Box::as_ref)
    }
}

pub type SharedRegistry = Arc<TrackingSourceRegistry>;

/// Populates the virtual device with one tool per storage entry.
pub struct VirtualSourceFactory;

impl TrackingSourceFactory for VirtualSourceFactory {
    fn create_source(
        &self,
        device: SharedTrackingDevice,
        storage: &NavigationToolStorage,
    ) -> Result<FactoryOutput, String> {
        {
            let mut device = device.lock();
            let Some(virtual_device) =
                device.as_any_mut().downcast_mut::<VirtualTrackingDevice>()
            else {
                return Err("device is not a virtual tracking device".to_string());
            };
            for tool in storage.iter() {
                virtual_device
                    .add_tool(&tool.name)
                    .map_err(|e| format!("could not add tool '{}': {e}", tool.name))?;
            }
        }
        let source = TrackingDeviceSource::new(Arc::clone(&device));
        Ok(FactoryOutput {
            source,
            correspondences: (0..storage.tool_count()).collect(),
        })
    }
}

/// Matches the tools found on the network device against the storage by
/// name. A device tool without a storage entry fails the construction.
pub struct OpenIgtLinkSourceFactory;

impl TrackingSourceFactory for OpenIgtLinkSourceFactory {
    fn create_source(
        &self,
        device: SharedTrackingDevice,
        storage: &NavigationToolStorage,
    ) -> Result<FactoryOutput, String> {
        let correspondences = {
            let device = device.lock();
            if device.tool_count() == 0 {
                return Err(
                    "the device has no tools, run tool detection first".to_string()
                );
            }
            let mut correspondences = Vec::with_capacity(device.tool_count());
            for index in 0..device.tool_count() {
                let Some(snapshot) = device.tool(index) else {
                    return Err(format!("device tool {index} disappeared"));
                };
                let Some(storage_index) =
                    storage.iter().position(|tool| tool.name == snapshot.name)
                else {
                    return Err(format!(
                        "detected tool '{}' has no entry in the tool storage",
                        snapshot.name
                    ));
                };
                correspondences.push(storage_index);
            }
            correspondences
        };
        let source = TrackingDeviceSource::new(Arc::clone(&device));
        Ok(FactoryOutput {
            source,
            correspondences,
        })
    }
}

/// Registers every storage tool's definition file with the camera SDK.
pub struct OptitrackSourceFactory;

impl TrackingSourceFactory for OptitrackSourceFactory {
    fn create_source(
        &self,
        device: SharedTrackingDevice,
        storage: &NavigationToolStorage,
    ) -> Result<FactoryOutput, String> {
        {
            let mut device = device.lock();
            let Some(optitrack) =
                device.as_any_mut().downcast_mut::<OptitrackTrackingDevice>()
            else {
                return Err("device is not an optitrack tracking device".to_string());
            };
            for tool in storage.iter() {
                let Some(definition_file) = tool.calibration_file.as_ref() else {
                    return Err(format!("tool '{}' has no definition file", tool.name));
                };
                optitrack
                    .add_tool_by_definition_file(definition_file)
                    .map_err(|e| format!("could not add tool '{}': {e}", tool.name))?;
            }
        }
        let source = TrackingDeviceSource::new(Arc::clone(&device));
        Ok(FactoryOutput {
            source,
            correspondences: (0..storage.tool_count()).collect(),
        })
    }
}
