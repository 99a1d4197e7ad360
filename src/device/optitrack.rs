use std::any::Any;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use log::info;
use log::warn;
use nalgebra::Point3;
use nalgebra::UnitQuaternion;
use nalgebra::Vector3;
use parking_lot::Mutex;

use crate::device::require_state;
use crate::device::ToolSnapshot;
use crate::device::TrackingDevice;
use crate::device::TrackingDeviceType;
use crate::device::TrackingState;
use crate::error::TrackingError;

const POLL_PERIOD: Duration = Duration::from_millis(10);
const DEFAULT_EXPOSURE: i32 = 4;
const DEFAULT_THRESHOLD: i32 = 200;
const DEFAULT_LED_INTENSITY: i32 = 15;
const MIN_MARKER_COUNT: usize = 3;

/// Marker geometry of one rigid body, read from a tool definition file.
///
/// File layout: tool name, marker count N, N lines of "X Y Z" marker
/// coordinates, one final "X Y Z" pivot line.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub markers: Vec<Point3<f64>>,
    pub pivot: Point3<f64>,
}

impl ToolDefinition {
    pub fn load(path: &Path) -> Result<Self, TrackingError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TrackingError::Config(format!(
                "unable to read tool definition file {}: {e}",
                path.display()
            ))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, TrackingError> {
        let mut lines = content.lines().map(str::trim).filter(|l| !l.is_empty());

        let name = lines
            .next()
            .ok_or_else(|| TrackingError::Config("tool definition file is empty".to_string()))?
            .to_string();

        let marker_count: usize = lines
            .next()
            .ok_or_else(|| {
                TrackingError::Config("tool definition file ends before the marker count".to_string())
            })?
            .parse()
            .map_err(|_| {
                TrackingError::Config("tool definition marker count is not a number".to_string())
            })?;
        if marker_count < MIN_MARKER_COUNT {
            return Err(TrackingError::Config(format!(
                "a rigid body needs at least {MIN_MARKER_COUNT} markers, file declares {marker_count}"
            )));
        }

        let mut markers = Vec::with_capacity(marker_count);
        for index in 0..marker_count {
            let line = lines.next().ok_or_else(|| {
                TrackingError::Config(format!(
                    "tool definition file ends at marker {} of {marker_count}",
                    index + 1
                ))
            })?;
            markers.push(parse_point(line)?);
        }

        let pivot_line = lines.next().ok_or_else(|| {
            TrackingError::Config("tool definition file has no pivot line".to_string())
        })?;
        let pivot = parse_point(pivot_line)?;

        Ok(Self {
            name,
            markers,
            pivot,
        })
    }
}

fn parse_point(line: &str) -> Result<Point3<f64>, TrackingError> {
    let mut values = line.split_whitespace().map(str::parse::<f64>);
    let mut next = || {
        values
            .next()
            .and_then(Result::ok)
            .ok_or_else(|| {
                TrackingError::Config(format!("'{line}' is not a X Y Z coordinate line"))
            })
    };
    Ok(Point3::new(next()?, next()?, next()?))
}

/// Seam to the vendor SDK. All calls fail fast with typed errors, no silent
/// degradation.
pub trait OptitrackSdk: Send {
    fn initialize(&mut self) -> Result<(), TrackingError>;
    fn shutdown(&mut self) -> Result<(), TrackingError>;
    fn load_calibration(&mut self, path: &Path) -> Result<(), TrackingError>;
    fn set_camera_params(
        &mut self,
        exposure: i32,
        threshold: i32,
        led_intensity: i32,
    ) -> Result<(), TrackingError>;
    fn add_trackable(&mut self, definition: &ToolDefinition) -> Result<(), TrackingError>;
    /// Processes the next camera frame.
    fn update(&mut self) -> Result<(), TrackingError>;
    /// Pose of a trackable, `None` while it is occluded.
    fn trackable_pose(&mut self, index: usize) -> Option<(Point3<f64>, UnitQuaternion<f64>)>;
}

/// Stand-in for machines without cameras: deterministic poses, one failure
/// injectable for tests.
pub struct SimulatedOptitrackSdk {
    initialized: bool,
    calibration: Option<PathBuf>,
    trackables: Vec<ToolDefinition>,
    frame: u64,
    fail_next: Option<String>,
}

impl SimulatedOptitrackSdk {
    pub fn new() -> Self {
        Self {
            initialized: false,
            calibration: None,
            trackables: vec![],
            frame: 0,
            fail_next: None,
        }
    }

    /// The next SDK call answers with a hardware error.
    pub fn fail_next_call(&mut self, message: &str) {
        self.fail_next = Some(message.to_string());
    }

    fn take_injected_failure(&mut self) -> Result<(), TrackingError> {
        match self.fail_next.take() {
            Some(message) => Err(TrackingError::Hardware(message)),
            None => Ok(()),
        }
    }
}

impl Default for SimulatedOptitrackSdk {
    fn default() -> Self {
        Self::new()
    }
}

impl OptitrackSdk for SimulatedOptitrackSdk {
    fn initialize(&mut self) -> Result<(), TrackingError> {
        self.take_injected_failure()?;
        self.initialized = true;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), TrackingError> {
        self.take_injected_failure()?;
        self.initialized = false;
        Ok(())
    }

    fn load_calibration(&mut self, path: &Path) -> Result<(), TrackingError> {
        self.take_injected_failure()?;
        if !self.initialized {
            return Err(TrackingError::Hardware(
                "cameras are not initialized".to_string(),
            ));
        }
        self.calibration = Some(path.to_path_buf());
        Ok(())
    }

    fn set_camera_params(
        &mut self,
        _exposure: i32,
        _threshold: i32,
        _led_intensity: i32,
    ) -> Result<(), TrackingError> {
        self.take_injected_failure()?;
        if !self.initialized {
            return Err(TrackingError::Hardware(
                "cameras are not initialized".to_string(),
            ));
        }
        Ok(())
    }

    fn add_trackable(&mut self, definition: &ToolDefinition) -> Result<(), TrackingError> {
        self.take_injected_failure()?;
        self.trackables.push(definition.clone());
        Ok(())
    }

    fn update(&mut self) -> Result<(), TrackingError> {
        self.take_injected_failure()?;
        self.frame += 1;
        Ok(())
    }

    fn trackable_pose(&mut self, index: usize) -> Option<(Point3<f64>, UnitQuaternion<f64>)> {
        if index >= self.trackables.len() {
            return None;
        }
        let time = self.frame as f64 * 0.01;
        let position = Point3::new(
            index as f64 * 50.0 + 10.0 * time.sin(),
            10.0 * time.cos(),
            100.0,
        );
        let orientation = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), time);
        Some((position, orientation))
    }
}

/// Camera-array tracking device backed by the vendor SDK.
pub struct OptitrackTrackingDevice {
    state: TrackingState,
    sdk: Arc<Mutex<Box<dyn OptitrackSdk>>>,
    cameras_initialized: bool,
    // written by the polling thread, deliberately separate from the rest
    tools: Arc<Mutex<Vec<ToolSnapshot>>>,
    calibration_file: Option<PathBuf>,
    exposure: i32,
    threshold: i32,
    led_intensity: i32,
    stop_flag: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
}

impl OptitrackTrackingDevice {
    pub fn new(sdk: Box<dyn OptitrackSdk>) -> Self {
        Self {
            state: TrackingState::Setup,
            sdk: Arc::new(Mutex::new(sdk)),
            cameras_initialized: false,
            tools: Arc::new(Mutex::new(vec![])),
            calibration_file: None,
            exposure: DEFAULT_EXPOSURE,
            threshold: DEFAULT_THRESHOLD,
            led_intensity: DEFAULT_LED_INTENSITY,
            stop_flag: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn simulated() -> Self {
        Self::new(Box::new(SimulatedOptitrackSdk::new()))
    }

    /// Brings the camera array up, once. `open_connection` calls it on demand.
    pub fn initialize_cameras(&mut self) -> Result<(), TrackingError> {
        require_state(TrackingState::Setup, self.state)?;
        if self.cameras_initialized {
            return Ok(());
        }
        self.sdk.lock().initialize()?;
        self.cameras_initialized = true;
        Ok(())
    }

    /// Records the calibration file for the next `open_connection`.
    pub fn load_calibration(&mut self, path: &Path) -> Result<(), TrackingError> {
        require_state(TrackingState::Setup, self.state)?;
        if !path.exists() {
            return Err(TrackingError::Config(format!(
                "calibration file {} does not exist",
                path.display()
            )));
        }
        self.calibration_file = Some(path.to_path_buf());
        Ok(())
    }

    /// Applies immediately when the cameras are up, otherwise the values are
    /// used on the next `open_connection`.
    pub fn set_camera_params(
        &mut self,
        exposure: i32,
        threshold: i32,
        led_intensity: i32,
    ) -> Result<(), TrackingError> {
        self.exposure = exposure;
        self.threshold = threshold;
        self.led_intensity = led_intensity;
        if self.state != TrackingState::Setup {
            self.sdk
                .lock()
                .set_camera_params(exposure, threshold, led_intensity)?;
        }
        Ok(())
    }

    pub fn add_tool_by_definition_file(&mut self, path: &Path) -> Result<(), TrackingError> {
        require_state(TrackingState::Setup, self.state)?;
        let definition = ToolDefinition::load(path)?;
        self.sdk.lock().add_trackable(&definition)?;
        self.tools.lock().push(ToolSnapshot::new(&definition.name));
        info!(
            "added tool '{}' with {} markers",
            definition.name,
            definition.markers.len()
        );
        Ok(())
    }

    fn stop_worker(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl TrackingDevice for OptitrackTrackingDevice {
    fn device_type(&self) -> TrackingDeviceType {
        TrackingDeviceType::Optitrack
    }

    fn state(&self) -> TrackingState {
        self.state
    }

    fn open_connection(&mut self) -> Result<(), TrackingError> {
        require_state(TrackingState::Setup, self.state)?;
        let Some(calibration_file) = self.calibration_file.clone() else {
            return Err(TrackingError::Config(
                "no calibration file loaded".to_string(),
            ));
        };

        self.initialize_cameras()?;
        let mut sdk = self.sdk.lock();
        sdk.load_calibration(&calibration_file)?;
        sdk.set_camera_params(self.exposure, self.threshold, self.led_intensity)?;
        drop(sdk);

        self.state = TrackingState::Ready;
        info!("optitrack cameras are up");
        Ok(())
    }

    fn close_connection(&mut self) -> Result<(), TrackingError> {
        if self.state == TrackingState::Setup {
            return Ok(());
        }
        require_state(TrackingState::Ready, self.state)?;
        self.sdk.lock().shutdown()?;
        self.cameras_initialized = false;
        self.state = TrackingState::Setup;
        Ok(())
    }

    fn start_tracking(&mut self) -> Result<(), TrackingError> {
        require_state(TrackingState::Ready, self.state)?;

        let sdk = Arc::clone(&self.sdk);
        let tools = Arc::clone(&self.tools);
        let stop_flag = Arc::clone(&self.stop_flag);
        stop_flag.store(false, Ordering::SeqCst);

        self.worker = Some(thread::spawn(move || {
            let started = Instant::now();
            while !stop_flag.load(Ordering::SeqCst) {
                let mut sdk = sdk.lock();
                if let Err(e) = sdk.update() {
                    warn!("camera frame update failed: {e}");
                    thread::sleep(POLL_PERIOD);
                    continue;
                }
                let timestamp_ms = started.elapsed().as_secs_f64() * 1000.0;
                let mut tools = tools.lock();
                for (index, tool) in tools.iter_mut().enumerate() {
                    match sdk.trackable_pose(index) {
                        Some((position, orientation)) => {
                            tool.position = position;
                            tool.orientation = orientation;
                            tool.data_valid = true;
                            tool.timestamp_ms = timestamp_ms;
                        }
                        None => tool.data_valid = false,
                    }
                }
                drop(tools);
                drop(sdk);
                thread::sleep(POLL_PERIOD);
            }
        }));

        self.state = TrackingState::Tracking;
        info!("optitrack tracking started");
        Ok(())
    }

    fn stop_tracking(&mut self) -> Result<(), TrackingError> {
        require_state(TrackingState::Tracking, self.state)?;
        self.stop_worker();
        self.state = TrackingState::Ready;
        info!("optitrack tracking stopped");
        Ok(())
    }

    fn tool_count(&self) -> usize {
        self.tools.lock().len()
    }

    fn tool(&self, index: usize) -> Option<ToolSnapshot> {
        self.tools.lock().get(index).cloned()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Drop for OptitrackTrackingDevice {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    const PROBE_DEFINITION: &str = "Probe\n3\n0 0 0\n10 0 0\n0 10 0\n3.3 3.3 0\n";

    fn write_definition(dir: &TempDir, file_name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(file_name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn ready_device(dir: &TempDir) -> OptitrackTrackingDevice {
        let calibration = write_definition(dir, "room.cal", "calibration data");
        let definition = write_definition(dir, "probe.txt", PROBE_DEFINITION);
        let mut device = OptitrackTrackingDevice::simulated();
        device.load_calibration(&calibration).unwrap();
        device.add_tool_by_definition_file(&definition).unwrap();
        device.open_connection().unwrap();
        device
    }

    #[test]
    fn definition_files_parse_name_markers_and_pivot() {
        let definition = ToolDefinition::parse(PROBE_DEFINITION).unwrap();
        assert_eq!(definition.name, "Probe");
        assert_eq!(definition.markers.len(), 3);
        assert_eq!(definition.markers[1], Point3::new(10.0, 0.0, 0.0));
        assert_eq!(definition.pivot, Point3::new(3.3, 3.3, 0.0));
    }

    #[test]
    fn malformed_definition_files_are_typed_config_errors() {
        // too few markers declared
        let result = ToolDefinition::parse("Probe\n2\n0 0 0\n1 0 0\n0 0 0\n");
        assert!(matches!(result, Err(TrackingError::Config(_))));

        // marker line missing
        let result = ToolDefinition::parse("Probe\n3\n0 0 0\n1 0 0\n");
        assert!(matches!(result, Err(TrackingError::Config(_))));

        // pivot missing
        let result = ToolDefinition::parse("Probe\n3\n0 0 0\n1 0 0\n0 1 0\n");
        assert!(matches!(result, Err(TrackingError::Config(_))));

        // garbage coordinates
        let result = ToolDefinition::parse("Probe\n3\n0 0 zero\n1 0 0\n0 1 0\n0 0 0\n");
        assert!(matches!(result, Err(TrackingError::Config(_))));
    }

    #[test]
    fn opening_without_a_calibration_file_fails() {
        let mut device = OptitrackTrackingDevice::simulated();
        assert!(matches!(
            device.open_connection(),
            Err(TrackingError::Config(_))
        ));
        assert_eq!(device.state(), TrackingState::Setup);
    }

    #[test]
    fn sdk_failures_surface_as_hardware_errors_and_leave_the_state() {
        let tmp_dir = TempDir::new("igtp-rs-test").unwrap();
        let calibration = write_definition(&tmp_dir, "room.cal", "calibration data");

        let mut sdk = SimulatedOptitrackSdk::new();
        sdk.fail_next_call("camera sync lost");
        let mut device = OptitrackTrackingDevice::new(Box::new(sdk));
        device.load_calibration(&calibration).unwrap();

        assert!(matches!(
            device.open_connection(),
            Err(TrackingError::Hardware(_))
        ));
        assert_eq!(device.state(), TrackingState::Setup);

        // the injected failure is consumed, the retry succeeds
        device.open_connection().unwrap();
        assert_eq!(device.state(), TrackingState::Ready);
    }

    #[test]
    fn cameras_come_up_once_and_again_after_a_shutdown() {
        let tmp_dir = TempDir::new("igtp-rs-test").unwrap();
        let calibration = write_definition(&tmp_dir, "room.cal", "calibration data");
        let mut device = OptitrackTrackingDevice::simulated();
        device.initialize_cameras().unwrap();
        device.initialize_cameras().unwrap();
        device.load_calibration(&calibration).unwrap();
        device.open_connection().unwrap();
        assert!(matches!(
            device.initialize_cameras(),
            Err(TrackingError::InvalidState { .. })
        ));
        device.close_connection().unwrap();
        device.initialize_cameras().unwrap();
    }

    #[test]
    fn tools_can_only_be_added_during_setup() {
        let tmp_dir = TempDir::new("igtp-rs-test").unwrap();
        let mut device = ready_device(&tmp_dir);
        let definition = write_definition(&tmp_dir, "needle.txt", "Needle\n3\n0 0 0\n5 0 0\n0 5 0\n0 0 0\n");
        assert!(matches!(
            device.add_tool_by_definition_file(&definition),
            Err(TrackingError::InvalidState { .. })
        ));
    }

    #[test]
    fn the_polling_thread_updates_the_tool_list() {
        let tmp_dir = TempDir::new("igtp-rs-test").unwrap();
        let mut device = ready_device(&tmp_dir);
        device.start_tracking().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let tool = device.tool(0).unwrap();
            if tool.data_valid {
                assert_eq!(tool.name, "Probe");
                break;
            }
            assert!(Instant::now() < deadline, "no pose arrived");
            thread::sleep(Duration::from_millis(10));
        }

        device.stop_tracking().unwrap();
        device.close_connection().unwrap();
        assert_eq!(device.state(), TrackingState::Setup);
    }
}
