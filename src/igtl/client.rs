use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures_util::SinkExt;
use futures_util::StreamExt;
use log::debug;
use log::warn;
use parking_lot::Mutex;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio_util::codec::FramedRead;
use tokio_util::codec::FramedWrite;

use crate::error::TrackingError;
use crate::igtl::codec::IgtlCodec;
use crate::igtl::message::IgtlMessage;

pub const DEFAULT_PORT: u16 = 18944;

const CHANNEL_CAPACITY: usize = 64;

struct Connection {
    writer: FramedWrite<OwnedWriteHalf, IgtlCodec>,
    incoming: tokio::sync::mpsc::Receiver<IgtlMessage>,
    reader_task: tokio::task::JoinHandle<()>,
}

/// Blocking OpenIGTLink client. Drives its own small tokio runtime so the
/// device layer can stay synchronous.
///
/// Received messages are dropped until `start_communication` opens the gate;
/// after that they queue up in a bounded channel consumed by `receive`.
pub struct IgtlClient {
    runtime: tokio::runtime::Runtime,
    communicating: Arc<AtomicBool>,
    connection: Mutex<Option<Connection>>,
}

impl IgtlClient {
    pub fn new() -> Result<Self, TrackingError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(|e| {
                TrackingError::Config(format!("unable to start network runtime: {e}"))
            })?;
        Ok(Self {
            runtime,
            communicating: Arc::new(AtomicBool::new(false)),
            connection: Mutex::new(None),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connection.lock().is_some()
    }

    pub fn connect(&self, host: &str, port: u16, timeout: Duration) -> Result<(), TrackingError> {
        let mut connection = self.connection.lock();
        if connection.is_some() {
            return Err(TrackingError::Connection("already connected".to_string()));
        }

        let address = format!("{host}:{port}");
        let stream = match self
            .runtime
            .block_on(async { tokio::time::timeout(timeout, TcpStream::connect(&address)).await })
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(TrackingError::Connection(format!(
                    "connect to {address} failed: {e}"
                )))
            }
            Err(_) => {
                return Err(TrackingError::Timeout(format!(
                    "connect to {address} timed out"
                )))
            }
        };

        let (read_half, write_half) = stream.into_split();
        let (message_tx, message_rx) = tokio::sync::mpsc::channel(CHANNEL_CAPACITY);
        let communicating = Arc::clone(&self.communicating);
        let reader_task = self.runtime.spawn(async move {
            let mut reader = FramedRead::new(read_half, IgtlCodec);
            while let Some(next) = reader.next().await {
                match next {
                    Ok(message) => {
                        if !communicating.load(Ordering::SeqCst) {
                            continue;
                        }
                        if message_tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("receiving tracking message failed: {e}");
                        break;
                    }
                }
            }
            debug!("message reader finished");
        });

        *connection = Some(Connection {
            writer: FramedWrite::new(write_half, IgtlCodec),
            incoming: message_rx,
            reader_task,
        });
        Ok(())
    }

    pub fn start_communication(&self) -> bool {
        let mut connection = self.connection.lock();
        let Some(connection) = connection.as_mut() else {
            warn!("cannot start communication without a connection");
            return false;
        };
        // stale messages from a previous session are of no use
        while connection.incoming.try_recv().is_ok() {}
        self.communicating.store(true, Ordering::SeqCst);
        true
    }

    pub fn stop_communication(&self) -> bool {
        self.communicating.store(false, Ordering::SeqCst);
        true
    }

    pub fn is_communicating(&self) -> bool {
        self.communicating.load(Ordering::SeqCst)
    }

    pub fn send(&self, message: IgtlMessage) -> Result<(), TrackingError> {
        let mut connection = self.connection.lock();
        let Some(connection) = connection.as_mut() else {
            return Err(TrackingError::Connection("not connected".to_string()));
        };
        self.runtime
            .block_on(connection.writer.send(message))
            .map_err(|e| TrackingError::Connection(format!("send failed: {e}")))
    }

    /// Blocks until a message passed the gate or the timeout elapsed.
    pub fn receive(&self, timeout: Duration) -> Result<IgtlMessage, TrackingError> {
        let mut connection = self.connection.lock();
        let Some(connection) = connection.as_mut() else {
            return Err(TrackingError::Connection("not connected".to_string()));
        };
        match self
            .runtime
            .block_on(async { tokio::time::timeout(timeout, connection.incoming.recv()).await })
        {
            Ok(Some(message)) => Ok(message),
            Ok(None) => Err(TrackingError::Connection(
                "connection closed by peer".to_string(),
            )),
            Err(_) => Err(TrackingError::Timeout(
                "no message within timeout".to_string(),
            )),
        }
    }

    pub fn disconnect(&self) {
        self.communicating.store(false, Ordering::SeqCst);
        if let Some(connection) = self.connection.lock().take() {
            connection.reader_task.abort();
        }
    }
}

impl Drop for IgtlClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::igtl::message::RigidTransform;
    use bytes::BytesMut;
    use std::io::Write;
    use std::net::TcpListener;
    use std::thread;

    // accepts one connection and streams the same message until the peer goes away
    fn spawn_streaming_server(message: IgtlMessage) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        thread::spawn(move || {
            let Ok((mut stream, _)) = listener.accept() else {
                return;
            };
            loop {
                let mut buffer = BytesMut::new();
                message.encode(&mut buffer);
                if stream.write_all(&buffer).is_err() {
                    return;
                }
                thread::sleep(Duration::from_millis(5));
            }
        });
        address
    }

    #[test]
    fn connecting_to_a_closed_port_is_a_recoverable_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let client = IgtlClient::new().unwrap();
        let result = client.connect("127.0.0.1", address.port(), Duration::from_secs(1));
        match result {
            Err(e) => assert!(e.is_recoverable()),
            Ok(_) => panic!("connect to a closed port should fail"),
        }
        assert!(!client.is_connected());
    }

    #[test]
    fn messages_are_dropped_until_communication_starts() {
        let message = IgtlMessage::transform("probe", RigidTransform::identity());
        let address = spawn_streaming_server(message);

        let client = IgtlClient::new().unwrap();
        client
            .connect("127.0.0.1", address.port(), Duration::from_secs(1))
            .unwrap();

        // the server is already streaming but the gate is still closed
        thread::sleep(Duration::from_millis(50));
        assert!(!client.is_communicating());
        assert!(matches!(
            client.receive(Duration::from_millis(50)),
            Err(TrackingError::Timeout(_))
        ));

        assert!(client.start_communication());
        assert!(client.is_communicating());
        let received = client.receive(Duration::from_secs(1)).unwrap();
        assert_eq!(received.device_name, "probe");

        assert!(client.stop_communication());
        assert!(!client.is_communicating());
        client.disconnect();
        assert!(!client.is_connected());
    }

    #[test]
    fn receive_without_a_connection_fails() {
        let client = IgtlClient::new().unwrap();
        assert!(matches!(
            client.receive(Duration::from_millis(10)),
            Err(TrackingError::Connection(_))
        ));
        assert!(!client.start_communication());
    }
}
