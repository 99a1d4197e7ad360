use std::sync::Arc;

use crate::device::SharedTrackingDevice;
use crate::error::TrackingError;
use crate::navigation::data::NavigationData;

/// Pipeline stage turning a tracking device into one navigation data output
/// per tool. The output count is fixed at creation time.
pub struct TrackingDeviceSource {
    device: SharedTrackingDevice,
    outputs: Vec<NavigationData>,
}

impl TrackingDeviceSource {
    pub fn new(device: SharedTrackingDevice) -> Self {
        let outputs = {
            let device = device.lock();
            (0..device.tool_count())
                .map(|index| {
                    let name = device
                        .tool(index)
                        .map(|tool| tool.name)
                        .unwrap_or_default();
                    NavigationData::new(&name)
                })
                .collect()
        };
        Self { device, outputs }
    }

    pub fn connect(&mut self) -> Result<(), TrackingError> {
        self.device.lock().open_connection()
    }

    pub fn disconnect(&mut self) -> Result<(), TrackingError> {
        self.device.lock().close_connection()
    }

    pub fn start_tracking(&mut self) -> Result<(), TrackingError> {
        self.device.lock().start_tracking()
    }

    pub fn stop_tracking(&mut self) -> Result<(), TrackingError> {
        self.device.lock().stop_tracking()
    }

    /// Snapshots the current tool poses into the outputs.
    pub fn update(&mut self) {
        let device = self.device.lock();
        for (index, output) in self.outputs.iter_mut().enumerate() {
            match device.tool(index) {
                Some(tool) => *output = tool.to_navigation_data(),
                None => output.invalidate(),
            }
        }
    }

    pub fn output(&self, index: usize) -> Option<&NavigationData> {
        self.outputs.get(index)
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn device(&self) -> SharedTrackingDevice {
        Arc::clone(&self.device)
    }
}
