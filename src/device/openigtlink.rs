use std::any::Any;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use log::error;
use log::info;
use log::warn;
use parking_lot::Mutex;

use crate::device::require_state;
use crate::device::ToolSnapshot;
use crate::device::TrackingDevice;
use crate::device::TrackingDeviceType;
use crate::device::TrackingState;
use crate::error::TrackingError;
use crate::igtl::client::IgtlClient;
use crate::igtl::message::timestamp_to_millis;
use crate::igtl::message::IgtlMessage;
use crate::igtl::message::MessageContent;
use crate::igtl::message::MessageKind;
use crate::navigation::storage::NavigationToolStorage;
use crate::navigation::tool::NavigationTool;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const RECEIVE_POLL_TIMEOUT: Duration = Duration::from_millis(100);
// second chance window when the server was slow to start streaming
const DISCOVERY_RETRY_TIMEOUT: Duration = Duration::from_secs(10);
const DISCOVERY_SAMPLE_COUNT: usize = 50;
const DISCOVERY_SAMPLE_TIMEOUT: Duration = Duration::from_millis(20);
const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(2);

// state and tool list are shared with the message forwarding thread
struct DeviceShared {
    state: Mutex<TrackingState>,
    tools: Mutex<Vec<ToolSnapshot>>,
}

impl DeviceShared {
    /// Applies one data message to the tool list. Only legal while tracking,
    /// a message arriving in any other state is logged and discarded.
    ///
    /// Elements update the tool at the same index and only when the names
    /// match there. A name showing up at a different index is skipped.
    fn update_tools(&self, message: &IgtlMessage) {
        if *self.state.lock() != TrackingState::Tracking {
            error!("received tracking data while not tracking, discarding message");
            return;
        }
        let timestamp_ms = timestamp_to_millis(message.timestamp);
        let mut tools = self.tools.lock();
        match &message.content {
            MessageContent::Transform(transform) => {
                if let Some(tool) = tools.get_mut(0) {
                    if tool.name == message.device_name {
                        tool.position = transform.position();
                        tool.orientation = transform.orientation();
                        tool.data_valid = true;
                        tool.timestamp_ms = timestamp_ms;
                    }
                }
            }
            MessageContent::Tdata(elements) => {
                for (index, element) in elements.iter().enumerate() {
                    let Some(tool) = tools.get_mut(index) else {
                        break;
                    };
                    if tool.name == element.name {
                        tool.position = element.transform.position();
                        tool.orientation = element.transform.orientation();
                        tool.data_valid = true;
                        tool.timestamp_ms = timestamp_ms;
                    }
                }
            }
            MessageContent::Qtdata(elements) => {
                for (index, element) in elements.iter().enumerate() {
                    let Some(tool) = tools.get_mut(index) else {
                        break;
                    };
                    if tool.name == element.name {
                        tool.position = element.position();
                        tool.orientation = element.orientation();
                        tool.data_valid = true;
                        tool.timestamp_ms = timestamp_ms;
                    }
                }
            }
            _ => {}
        }
    }
}

/// Tracking device fed by an OpenIGTLink server.
///
/// Tools are found by asking the server to stream and collecting the
/// distinct instrument names that show up (`discover_tools`). Afterwards the
/// regular connect / start workflow applies and a forwarding thread keeps
/// the tool list current.
pub struct OpenIgtLinkTrackingDevice {
    shared: Arc<DeviceShared>,
    client: Arc<IgtlClient>,
    host: String,
    port: i32,
    stream_kind: MessageKind,
    stop_flag: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
}

impl OpenIgtLinkTrackingDevice {
    pub fn new(host: &str, port: i32) -> Result<Self, TrackingError> {
        Ok(Self {
            shared: Arc::new(DeviceShared {
                state: Mutex::new(TrackingState::Setup),
                tools: Mutex::new(vec![]),
            }),
            client: Arc::new(IgtlClient::new()?),
            host: host.to_string(),
            port,
            stream_kind: MessageKind::Unknown,
            stop_flag: Arc::new(AtomicBool::new(false)),
            worker: None,
        })
    }

    pub fn set_host(&mut self, host: &str) {
        if self.state() != TrackingState::Setup {
            return;
        }
        self.host = host.to_string();
    }

    pub fn set_port(&mut self, port: i32) {
        if self.state() != TrackingState::Setup {
            return;
        }
        self.port = port;
    }

    pub fn port(&self) -> i32 {
        self.port
    }

    fn checked_port(&self) -> Result<u16, TrackingError> {
        if self.port < 0 || self.port > u16::MAX as i32 {
            Err(TrackingError::Config(format!(
                "port {} is not a valid port number",
                self.port
            )))
        } else {
            Ok(self.port as u16)
        }
    }

    /// Connects, requests streaming and collects the instrument names seen
    /// on the wire. One tool per distinct name, in order of appearance, with
    /// identifiers `AutoDetectedTool-<n>`. The connection is closed again
    /// afterwards, the device ends up in `Setup` either way.
    pub fn discover_tools(
        &mut self,
        timeout: Duration,
    ) -> Result<NavigationToolStorage, TrackingError> {
        require_state(TrackingState::Setup, self.state())?;
        let port = self.checked_port().map_err(|e| {
            warn!("cannot discover tools: {e}");
            e
        })?;

        if let Err(e) = self.client.connect(&self.host, port, CONNECT_TIMEOUT) {
            warn!("cannot discover tools, connection failed: {e}");
            return Err(e);
        }
        self.client.start_communication();

        let result = self.run_discovery(timeout);

        self.client.stop_communication();
        self.client.disconnect();
        result
    }

    /// `discover_tools` with a default timeout and soft failure: problems
    /// are logged and an empty storage is returned.
    pub fn auto_detect_tools(&mut self) -> NavigationToolStorage {
        match self.discover_tools(DEFAULT_DISCOVERY_TIMEOUT) {
            Ok(storage) => storage,
            Err(e) => {
                warn!("automatic tool detection failed: {e}");
                NavigationToolStorage::new()
            }
        }
    }

    fn run_discovery(
        &mut self,
        timeout: Duration,
    ) -> Result<NavigationToolStorage, TrackingError> {
        // ask for both stream flavors, the server answers with the one it speaks
        self.client.send(IgtlMessage::start_qtdata(0))?;
        self.client.send(IgtlMessage::start_tdata(0, ""))?;

        let first = match self.receive_first_classifiable(timeout) {
            Some(message) => Some(message),
            None => self.receive_first_classifiable(DISCOVERY_RETRY_TIMEOUT),
        };
        let Some(first) = first else {
            return Err(TrackingError::Timeout(
                "no tracking data arrived during discovery".to_string(),
            ));
        };
        self.stream_kind = first.kind();
        info!("detected a {} stream", first.type_name());

        // count how often each instrument name shows up
        let mut name_counts: Vec<(String, usize)> = vec![];
        Self::collect_names(&first, &mut name_counts);
        for _ in 0..DISCOVERY_SAMPLE_COUNT {
            match self.client.receive(DISCOVERY_SAMPLE_TIMEOUT) {
                Ok(message) => Self::collect_names(&message, &mut name_counts),
                Err(TrackingError::Timeout(_)) => continue,
                Err(e) => {
                    warn!("discovery stream ended early: {e}");
                    break;
                }
            }
        }

        let mut storage = NavigationToolStorage::new();
        let mut tools = vec![];
        for (index, (name, count)) in name_counts.iter().enumerate() {
            info!("detected tool '{name}' ({count} samples)");
            let tool = NavigationTool::new(
                &format!("AutoDetectedTool-{index}"),
                name,
                TrackingDeviceType::OpenIgtLink,
            );
            if let Err(e) = storage.add_tool(tool) {
                warn!("skipping detected tool '{name}': {e}");
                continue;
            }
            tools.push(ToolSnapshot::new(name));
        }
        *self.shared.tools.lock() = tools;
        Ok(storage)
    }

    fn receive_first_classifiable(&self, timeout: Duration) -> Option<IgtlMessage> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            match self.client.receive(remaining.min(RECEIVE_POLL_TIMEOUT)) {
                Ok(message) => {
                    if message.kind() != MessageKind::Unknown {
                        return Some(message);
                    }
                }
                Err(TrackingError::Timeout(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    fn collect_names(message: &IgtlMessage, name_counts: &mut Vec<(String, usize)>) {
        let mut count = |name: &str| {
            if name.is_empty() {
                return;
            }
            match name_counts.iter_mut().find(|(known, _)| known == name) {
                Some((_, count)) => *count += 1,
                None => name_counts.push((name.to_string(), 1)),
            }
        };
        match &message.content {
            MessageContent::Transform(_) => count(&message.device_name),
            MessageContent::Tdata(elements) => {
                for element in elements {
                    count(&element.name);
                }
            }
            MessageContent::Qtdata(elements) => {
                for element in elements {
                    count(&element.name);
                }
            }
            _ => {}
        }
    }

    pub fn update_tools(&self, message: &IgtlMessage) {
        self.shared.update_tools(message);
    }

    fn send_stream_start(&self) -> Result<(), TrackingError> {
        match self.stream_kind {
            MessageKind::Qtdata => self.client.send(IgtlMessage::start_qtdata(0)),
            MessageKind::Tdata | MessageKind::Transform => {
                self.client.send(IgtlMessage::start_tdata(0, ""))
            }
            MessageKind::Unknown => {
                self.client.send(IgtlMessage::start_qtdata(0))?;
                self.client.send(IgtlMessage::start_tdata(0, ""))
            }
        }
    }

    fn stop_worker(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl TrackingDevice for OpenIgtLinkTrackingDevice {
    fn device_type(&self) -> TrackingDeviceType {
        TrackingDeviceType::OpenIgtLink
    }

    fn state(&self) -> TrackingState {
        *self.shared.state.lock()
    }

    fn open_connection(&mut self) -> Result<(), TrackingError> {
        require_state(TrackingState::Setup, self.state())?;
        let port = self.checked_port().map_err(|e| {
            warn!("cannot open connection: {e}");
            e
        })?;
        match self.client.connect(&self.host, port, CONNECT_TIMEOUT) {
            Ok(()) => {
                *self.shared.state.lock() = TrackingState::Ready;
                info!("connected to {}:{port}", self.host);
                Ok(())
            }
            Err(e) => {
                warn!("could not connect to {}:{port}: {e}", self.host);
                Err(e)
            }
        }
    }

    fn close_connection(&mut self) -> Result<(), TrackingError> {
        if self.state() == TrackingState::Setup {
            return Ok(());
        }
        require_state(TrackingState::Ready, self.state())?;
        self.client.disconnect();
        *self.shared.state.lock() = TrackingState::Setup;
        Ok(())
    }

    fn start_tracking(&mut self) -> Result<(), TrackingError> {
        require_state(TrackingState::Ready, self.state())?;
        if !self.client.start_communication() {
            return Err(TrackingError::Connection(
                "could not start communication".to_string(),
            ));
        }
        if let Err(e) = self.send_stream_start() {
            self.client.stop_communication();
            warn!("could not request the tracking stream: {e}");
            return Err(e);
        }

        self.stop_flag.store(false, Ordering::SeqCst);
        *self.shared.state.lock() = TrackingState::Tracking;

        let shared = Arc::clone(&self.shared);
        let client = Arc::clone(&self.client);
        let stop_flag = Arc::clone(&self.stop_flag);
        self.worker = Some(thread::spawn(move || {
            while !stop_flag.load(Ordering::SeqCst) {
                match client.receive(RECEIVE_POLL_TIMEOUT) {
                    Ok(message) => shared.update_tools(&message),
                    Err(TrackingError::Timeout(_)) => continue,
                    Err(e) => {
                        warn!("tracking stream interrupted: {e}");
                        break;
                    }
                }
            }
        }));

        info!("tracking started with {} tools", self.tool_count());
        Ok(())
    }

    fn stop_tracking(&mut self) -> Result<(), TrackingError> {
        require_state(TrackingState::Tracking, self.state())?;
        self.stop_worker();
        self.client.stop_communication();
        *self.shared.state.lock() = TrackingState::Ready;
        info!("tracking stopped");
        Ok(())
    }

    fn tool_count(&self) -> usize {
        self.shared.tools.lock().len()
    }

    fn tool(&self, index: usize) -> Option<ToolSnapshot> {
        self.shared.tools.lock().get(index).cloned()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Drop for OpenIgtLinkTrackingDevice {
    fn drop(&mut self) {
        self.stop_worker();
        self.client.disconnect();
    }
}
