use crate::navigation::tool::ToolRepresentation;
use crate::pipeline::source::TrackingDeviceSource;

/// Moves renderable objects along with the navigation data of a tracking
/// source. One representation slot per source output.
pub struct NavigationDataObjectVisualizationFilter {
    representations: Vec<Option<ToolRepresentation>>,
}

impl NavigationDataObjectVisualizationFilter {
    pub fn new(output_count: usize) -> Self {
        Self {
            representations: vec![None; output_count],
        }
    }

    pub fn set_representation(&mut self, index: usize, representation: ToolRepresentation) {
        if let Some(slot) = self.representations.get_mut(index) {
            *slot = Some(representation);
        }
    }

    pub fn representation(&self, index: usize) -> Option<&ToolRepresentation> {
        self.representations.get(index)?.as_ref()
    }

    /// Applies the source's current poses. Invalid data leaves the
    /// representation where it is.
    pub fn update(&mut self, source: &TrackingDeviceSource) {
        for (index, slot) in self.representations.iter().enumerate() {
            let Some(representation) = slot else {
                continue;
            };
            let Some(data) = source.output(index) else {
                continue;
            };
            if !data.data_valid {
                continue;
            }
            let mut pose = representation.lock();
            pose.position = data.position;
            pose.orientation = data.orientation;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SharedTrackingDevice;
    use crate::device::ToolSnapshot;
    use crate::device::TrackingDevice;
    use crate::device::TrackingDeviceType;
    use crate::device::TrackingState;
    use crate::error::TrackingError;
    use crate::navigation::tool::new_tool_representation;
    use nalgebra::Point3;
    use parking_lot::Mutex;
    use std::any::Any;
    use std::sync::Arc;

    struct PoseDevice {
        tools: Vec<ToolSnapshot>,
    }

    impl TrackingDevice for PoseDevice {
        fn device_type(&self) -> TrackingDeviceType {
            TrackingDeviceType::Virtual
        }
        fn state(&self) -> TrackingState {
            TrackingState::Tracking
        }
        fn open_connection(&mut self) -> Result<(), TrackingError> {
            Ok(())
        }
        fn close_connection(&mut self) -> Result<(), TrackingError> {
            Ok(())
        }
        fn start_tracking(&mut self) -> Result<(), TrackingError> {
            Ok(())
        }
        fn stop_tracking(&mut self) -> Result<(), TrackingError> {
            Ok(())
        }
        fn tool_count(&self) -> usize {
            self.tools.len()
        }
        fn tool(&self, index: usize) -> Option<ToolSnapshot> {
            self.tools.get(index).cloned()
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn source_with_one_tool(data_valid: bool) -> TrackingDeviceSource {
        let mut tool = ToolSnapshot::new("Probe");
        tool.position = Point3::new(1.0, 2.0, 3.0);
        tool.data_valid = data_valid;
        let device =
            Arc::new(Mutex::new(PoseDevice { tools: vec![tool] })) as SharedTrackingDevice;
        TrackingDeviceSource::new(device)
    }

    #[test]
    fn valid_data_moves_the_representation() {
        let mut source = source_with_one_tool(true);
        source.update();

        let mut filter = NavigationDataObjectVisualizationFilter::new(source.output_count());
        let representation = new_tool_representation();
        filter.set_representation(0, Arc::clone(&representation));
        filter.update(&source);

        assert_eq!(representation.lock().position, Point3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn invalid_data_leaves_the_representation_in_place() {
        let mut source = source_with_one_tool(false);
        source.update();

        let mut filter = NavigationDataObjectVisualizationFilter::new(source.output_count());
        let representation = new_tool_representation();
        representation.lock().position = Point3::new(5.0, 5.0, 5.0);
        filter.set_representation(0, Arc::clone(&representation));

        filter.update(&source);
        assert_eq!(representation.lock().position, Point3::new(5.0, 5.0, 5.0));
    }

    #[test]
    fn unwired_outputs_are_skipped() {
        let mut source = source_with_one_tool(true);
        source.update();
        let mut filter = NavigationDataObjectVisualizationFilter::new(source.output_count());
        filter.update(&source);
        assert!(filter.representation(0).is_none());
    }
}
