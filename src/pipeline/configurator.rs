use std::sync::Arc;

use log::warn;

use crate::device::SharedTrackingDevice;
use crate::navigation::storage::NavigationToolStorage;
use crate::pipeline::registry::SharedRegistry;
use crate::pipeline::source::TrackingDeviceSource;
use crate::pipeline::visualization::NavigationDataObjectVisualizationFilter;

/// Validates a tool storage against a tracking device and builds the
/// matching tracking source through the factory registry.
///
/// Construction failures never panic: the methods answer with `false` /
/// `None` and the reason is kept in `error_message`.
pub struct TrackingDeviceSourceConfigurator {
    storage: NavigationToolStorage,
    device: SharedTrackingDevice,
    registry: SharedRegistry,
    // output index -> index of the originating tool in the storage
    correspondences: Vec<usize>,
    error_message: String,
}

impl TrackingDeviceSourceConfigurator {
    pub fn new(
        storage: NavigationToolStorage,
        device: SharedTrackingDevice,
        registry: SharedRegistry,
    ) -> Self {
        Self {
            storage,
            device,
            registry,
            correspondences: vec![],
            error_message: String::new(),
        }
    }

    /// True iff every storage tool carries the device's type tag.
    pub fn is_create_tracking_device_source_possible(&mut self) -> bool {
        self.error_message.clear();
        let device_type = self.device.lock().device_type();
        for tool in self.storage.iter() {
            if tool.device_type != device_type {
                self.error_message = format!(
                    "tool '{}' is a {} tool and cannot be used with a {} device",
                    tool.identifier, tool.device_type, device_type
                );
                return false;
            }
        }
        true
    }

    pub fn create_tracking_device_source(&mut self) -> Option<TrackingDeviceSource> {
        if !self.is_create_tracking_device_source_possible() {
            warn!("cannot create tracking source: {}", self.error_message);
            return None;
        }
        let device_type = self.device.lock().device_type();
        let Some(factory) = self.registry.factory(device_type) else {
            self.error_message =
                format!("no source factory registered for device type {device_type}");
            warn!("cannot create tracking source: {}", self.error_message);
            return None;
        };
        match factory.create_source(Arc::clone(&self.device), &self.storage) {
            Ok(output) => {
                self.correspondences = output.correspondences;
                Some(output.source)
            }
            Err(message) => {
                self.error_message = message;
                warn!("cannot create tracking source: {}", self.error_message);
                None
            }
        }
    }

    /// Like `create_tracking_device_source`, additionally wiring each output
    /// to its tool's representation through the correspondence table.
    pub fn create_tracking_device_source_and_visualization(
        &mut self,
    ) -> Option<(TrackingDeviceSource, NavigationDataObjectVisualizationFilter)> {
        let source = self.create_tracking_device_source()?;
        let mut filter = NavigationDataObjectVisualizationFilter::new(source.output_count());
        for (output_index, storage_index) in self.correspondences.iter().enumerate() {
            let Some(tool) = self.storage.tool(*storage_index) else {
                continue;
            };
            if let Some(representation) = tool.representation.clone() {
                filter.set_representation(output_index, representation);
            }
        }
        Some((source, filter))
    }

    pub fn tool_number_in_tool_storage(&self, output_index: usize) -> Option<usize> {
        self.correspondences.get(output_index).copied()
    }

    pub fn tool_identifier_in_tool_storage(&self, output_index: usize) -> Option<String> {
        let storage_index = self.tool_number_in_tool_storage(output_index)?;
        self.storage
            .tool(storage_index)
            .map(|tool| tool.identifier.clone())
    }

    pub fn tool_numbers_in_tool_storage(&self) -> Vec<usize> {
        self.correspondences.clone()
    }

    pub fn tool_identifiers_in_tool_storage(&self) -> Vec<String> {
        (0..self.correspondences.len())
            .filter_map(|output_index| self.tool_identifier_in_tool_storage(output_index))
            .collect()
    }

    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    /// The tool storage reordered to pipeline output order. Tools without an
    /// output keep their relative order at the end.
    pub fn updated_navigation_tool_storage(&self) -> NavigationToolStorage {
        if self.correspondences.is_empty() {
            return self.storage.clone();
        }
        let mut reordered = NavigationToolStorage::new();
        for storage_index in &self.correspondences {
            if let Some(tool) = self.storage.tool(*storage_index) {
                if let Err(e) = reordered.add_tool(tool.clone()) {
                    warn!("skipping tool while reordering the storage: {e}");
                }
            }
        }
        for (storage_index, tool) in self.storage.iter().enumerate() {
            if !self.correspondences.contains(&storage_index) {
                if let Err(e) = reordered.add_tool(tool.clone()) {
                    warn!("skipping tool while reordering the storage: {e}");
                }
            }
        }
        reordered
    }
}
