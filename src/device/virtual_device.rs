use std::any::Any;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use log::info;
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

const DEFAULT_REFRESH_RATE_HZ: u32 = 100;
// tracking volume, mm: min x, max x, min y, max y, min z, max z
const DEFAULT_BOUNDS: [f64; 6] = [-400.0, 400.0, -400.0, 400.0, -400.0, 400.0];

/// Tracking device without hardware. Tools move on deterministic circular
/// orbits inside the configured volume, one phase-shifted orbit per tool.
pub struct VirtualTrackingDevice {
    state: TrackingState,
    tools: Arc<Mutex<Vec<ToolSnapshot>>>,
    bounds: [f64; 6],
    refresh_rate_hz: u32,
    stop_flag: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
}

impl VirtualTrackingDevice {
    pub fn new() -> Self {
        Self {
            state: TrackingState::Setup,
            tools: Arc::new(Mutex::new(vec![])),
            bounds: DEFAULT_BOUNDS,
            refresh_rate_hz: DEFAULT_REFRESH_RATE_HZ,
            stop_flag: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn add_tool(&mut self, name: &str) -> Result<(), TrackingError> {
        require_state(TrackingState::Setup, self.state)?;
        self.tools.lock().push(ToolSnapshot::new(name));
        Ok(())
    }

    pub fn set_refresh_rate(&mut self, refresh_rate_hz: u32) {
        self.refresh_rate_hz = refresh_rate_hz.max(1);
    }

    pub fn set_bounds(&mut self, bounds: [f64; 6]) {
        self.bounds = bounds;
    }

    pub fn bounds(&self) -> [f64; 6] {
        self.bounds
    }

    fn stop_worker(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Default for VirtualTrackingDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackingDevice for VirtualTrackingDevice {
    fn device_type(&self) -> TrackingDeviceType {
        TrackingDeviceType::Virtual
    }

    fn state(&self) -> TrackingState {
        self.state
    }

    fn open_connection(&mut self) -> Result<(), TrackingError> {
        require_state(TrackingState::Setup, self.state)?;
        self.state = TrackingState::Ready;
        Ok(())
    }

    fn close_connection(&mut self) -> Result<(), TrackingError> {
        if self.state == TrackingState::Setup {
            return Ok(());
        }
        require_state(TrackingState::Ready, self.state)?;
        self.state = TrackingState::Setup;
        Ok(())
    }

    fn start_tracking(&mut self) -> Result<(), TrackingError> {
        require_state(TrackingState::Ready, self.state)?;

        let tools = Arc::clone(&self.tools);
        let stop_flag = Arc::clone(&self.stop_flag);
        let bounds = self.bounds;
        let period = Duration::from_millis(1000 / self.refresh_rate_hz.max(1) as u64);
        stop_flag.store(false, Ordering::SeqCst);

        self.worker = Some(thread::spawn(move || {
            let started = Instant::now();
            let center = [
                (bounds[0] + bounds[1]) / 2.0,
                (bounds[2] + bounds[3]) / 2.0,
                (bounds[4] + bounds[5]) / 2.0,
            ];
            let radius = [
                (bounds[1] - bounds[0]) / 4.0,
                (bounds[3] - bounds[2]) / 4.0,
                (bounds[5] - bounds[4]) / 4.0,
            ];
            while !stop_flag.load(Ordering::SeqCst) {
                let elapsed = started.elapsed().as_secs_f64();
                let mut tools = tools.lock();
                for (index, tool) in tools.iter_mut().enumerate() {
                    let angle = elapsed * std::f64::consts::PI
                        + index as f64 * std::f64::consts::FRAC_PI_3;
                    tool.position = Point3::new(
                        center[0] + radius[0] * angle.cos(),
                        center[1] + radius[1] * angle.sin(),
                        center[2] + radius[2] * (angle / 2.0).sin(),
                    );
                    tool.orientation =
                        UnitQuaternion::from_axis_angle(&Vector3::z_axis(), angle);
                    tool.data_valid = true;
                    tool.timestamp_ms = elapsed * 1000.0;
                }
                drop(tools);
                thread::sleep(period);
            }
        }));

        self.state = TrackingState::Tracking;
        info!("virtual tracking started");
        Ok(())
    }

    fn stop_tracking(&mut self) -> Result<(), TrackingError> {
        require_state(TrackingState::Tracking, self.state)?;
        self.stop_worker();
        self.state = TrackingState::Ready;
        info!("virtual tracking stopped");
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

impl Drop for VirtualTrackingDevice {
    fn drop(&mut self) {
        self.stop_worker();
    }
}
