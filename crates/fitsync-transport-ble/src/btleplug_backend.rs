use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::Characteristic;
use crate::{DeviceHandle, GattLink, NotifyHandler, DEFAULT_WRITE_SETTLE};

#[derive(Debug, Clone)]
pub struct BtleplugLinkConfig {
    pub scan_timeout: Duration,
    pub connect_timeout: Duration,
    pub connect_attempts: u32,
    pub write_settle: Duration,
    pub request_queue_capacity: usize,
}

impl Default for BtleplugLinkConfig {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            connect_attempts: 3,
            write_settle: DEFAULT_WRITE_SETTLE,
            request_queue_capacity: 64,
        }
    }
}

#[derive(Debug, Error)]
pub enum BtleplugLinkError {
    #[error("bluetooth manager unavailable")]
    ManagerUnavailable,
    #[error("no bluetooth adapter found")]
    AdapterUnavailable,
    #[error("bluetooth worker stopped")]
    WorkerFailed,
    #[error("not connected")]
    NotConnected,
    #[error("device {0} was not discovered")]
    UnknownDevice(String),
    #[error("characteristic {0} not found on device")]
    CharacteristicMissing(Characteristic),
    #[error("connect timed out after {0} attempts")]
    ConnectTimeout(u32),
    #[error("ble: {0}")]
    Ble(String),
}

impl From<btleplug::Error> for BtleplugLinkError {
    fn from(err: btleplug::Error) -> Self {
        Self::Ble(err.to_string())
    }
}

type Reply<T> = oneshot::Sender<Result<T, BtleplugLinkError>>;

enum Request {
    Discover {
        target: String,
        reply: Reply<Option<DeviceHandle>>,
    },
    Connect {
        device: DeviceHandle,
        reply: Reply<()>,
    },
    Subscribe {
        characteristic: Characteristic,
        handler: NotifyHandler,
        reply: Reply<()>,
    },
    Write {
        characteristic: Characteristic,
        bytes: Vec<u8>,
        reply: Reply<()>,
    },
    Disconnect {
        reply: Reply<()>,
    },
}

/// Hardware link. Owns a worker thread running a single-threaded tokio
/// runtime; every `GattLink` call is a request/reply round trip to it.
pub struct BtleplugLink {
    requests: mpsc::Sender<Request>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<()>>,
    write_settle: Duration,
}

impl BtleplugLink {
    pub fn spawn(config: BtleplugLinkConfig) -> Result<Self, BtleplugLinkError> {
        let (requests, requests_rx) = mpsc::channel::<Request>(config.request_queue_capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), BtleplugLinkError>>();
        let write_settle = config.write_settle;

        let worker = thread::spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(_) => {
                    let _ = ready_tx.send(Err(BtleplugLinkError::WorkerFailed));
                    return;
                }
            };
            runtime.block_on(run_worker(config, requests_rx, shutdown_rx, ready_tx));
        });

        ready_rx
            .blocking_recv()
            .map_err(|_| BtleplugLinkError::WorkerFailed)??;

        Ok(Self {
            requests,
            shutdown_tx: Some(shutdown_tx),
            worker: Some(worker),
            write_settle,
        })
    }

    fn call<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Request,
    ) -> Result<T, BtleplugLinkError> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .blocking_send(build(reply))
            .map_err(|_| BtleplugLinkError::WorkerFailed)?;
        rx.blocking_recv()
            .map_err(|_| BtleplugLinkError::WorkerFailed)?
    }
}

impl GattLink for BtleplugLink {
    type Error = BtleplugLinkError;

    fn discover(&mut self, target: &str) -> Result<Option<DeviceHandle>, Self::Error> {
        let target = target.to_string();
        self.call(|reply| Request::Discover { target, reply })
    }

    fn connect(&mut self, device: &DeviceHandle) -> Result<(), Self::Error> {
        let device = device.clone();
        self.call(|reply| Request::Connect { device, reply })
    }

    fn subscribe(
        &mut self,
        characteristic: Characteristic,
        handler: NotifyHandler,
    ) -> Result<(), Self::Error> {
        self.call(|reply| Request::Subscribe {
            characteristic,
            handler,
            reply,
        })
    }

    fn write(&mut self, characteristic: Characteristic, bytes: &[u8]) -> Result<(), Self::Error> {
        let bytes = bytes.to_vec();
        self.call(|reply| Request::Write {
            characteristic,
            bytes,
            reply,
        })
    }

    fn disconnect(&mut self) -> Result<(), Self::Error> {
        self.call(|reply| Request::Disconnect { reply })
    }

    fn write_settle(&self) -> Duration {
        self.write_settle
    }
}

impl Drop for BtleplugLink {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

struct Worker {
    config: BtleplugLinkConfig,
    adapter: Adapter,
    discovered: HashMap<String, Peripheral>,
    connected: Option<Peripheral>,
    handlers: Arc<Mutex<HashMap<Characteristic, NotifyHandler>>>,
    notify_task: Option<tokio::task::JoinHandle<()>>,
}

async fn run_worker(
    config: BtleplugLinkConfig,
    mut requests: mpsc::Receiver<Request>,
    mut shutdown_rx: oneshot::Receiver<()>,
    ready_tx: oneshot::Sender<Result<(), BtleplugLinkError>>,
) {
    let manager = match Manager::new().await {
        Ok(m) => m,
        Err(_) => {
            let _ = ready_tx.send(Err(BtleplugLinkError::ManagerUnavailable));
            return;
        }
    };
    let adapter = match manager.adapters().await.ok().and_then(|a| a.into_iter().next()) {
        Some(a) => a,
        None => {
            let _ = ready_tx.send(Err(BtleplugLinkError::AdapterUnavailable));
            return;
        }
    };
    let _ = ready_tx.send(Ok(()));

    let mut worker = Worker {
        config,
        adapter,
        discovered: HashMap::new(),
        connected: None,
        handlers: Arc::new(Mutex::new(HashMap::new())),
        notify_task: None,
    };

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                break;
            }
            maybe_request = requests.recv() => {
                match maybe_request {
                    Some(request) => worker.handle(request).await,
                    None => break,
                }
            }
        }
    }

    let _ = worker.disconnect().await;
}

impl Worker {
    async fn handle(&mut self, request: Request) {
        match request {
            Request::Discover { target, reply } => {
                let _ = reply.send(self.discover(&target).await);
            }
            Request::Connect { device, reply } => {
                let _ = reply.send(self.connect(&device).await);
            }
            Request::Subscribe {
                characteristic,
                handler,
                reply,
            } => {
                let _ = reply.send(self.subscribe(characteristic, handler).await);
            }
            Request::Write {
                characteristic,
                bytes,
                reply,
            } => {
                let _ = reply.send(self.write(characteristic, &bytes).await);
            }
            Request::Disconnect { reply } => {
                let _ = reply.send(self.disconnect().await);
            }
        }
    }

    async fn discover(&mut self, target: &str) -> Result<Option<DeviceHandle>, BtleplugLinkError> {
        info!("scanning for {target} ({:?})", self.config.scan_timeout);
        self.adapter.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(self.config.scan_timeout).await;
        let peripherals = self.adapter.peripherals().await?;
        let _ = self.adapter.stop_scan().await;

        let mut found = None;
        for peripheral in peripherals {
            let name = peripheral
                .properties()
                .await
                .ok()
                .flatten()
                .and_then(|p| p.local_name);
            let handle = DeviceHandle {
                addr: peripheral.id().to_string(),
                name,
            };
            debug!("found device {handle}");
            if found.is_none() && handle.matches(target) {
                found = Some(handle.clone());
            }
            self.discovered.insert(handle.addr, peripheral);
        }
        Ok(found)
    }

    async fn connect(&mut self, device: &DeviceHandle) -> Result<(), BtleplugLinkError> {
        let peripheral = self
            .discovered
            .get(&device.addr)
            .cloned()
            .ok_or_else(|| BtleplugLinkError::UnknownDevice(device.addr.clone()))?;

        let attempts = self.config.connect_attempts.max(1);
        let mut connected = false;
        for attempt in 1..=attempts {
            match tokio::time::timeout(self.config.connect_timeout, peripheral.connect()).await {
                Ok(Ok(())) => {
                    connected = true;
                    break;
                }
                Ok(Err(err)) => warn!("connect attempt {attempt}/{attempts} failed: {err}"),
                Err(_) => warn!("connect attempt {attempt}/{attempts} timed out"),
            }
        }
        if !connected {
            return Err(BtleplugLinkError::ConnectTimeout(attempts));
        }
        peripheral.discover_services().await?;

        let mut notifications = peripheral.notifications().await?;
        let handlers = Arc::clone(&self.handlers);
        self.notify_task = Some(tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                let Some(characteristic) =
                    Characteristic::from_uuid_str(&notification.uuid.to_string())
                else {
                    continue;
                };
                let handler = handlers
                    .lock()
                    .ok()
                    .and_then(|h| h.get(&characteristic).cloned());
                if let Some(handler) = handler {
                    handler(characteristic, &notification.value);
                }
            }
        }));
        self.connected = Some(peripheral);
        Ok(())
    }

    fn find(
        &self,
        characteristic: Characteristic,
    ) -> Result<(Peripheral, btleplug::api::Characteristic), BtleplugLinkError> {
        let peripheral = self
            .connected
            .clone()
            .ok_or(BtleplugLinkError::NotConnected)?;
        let uuid = Uuid::parse_str(characteristic.uuid_str())
            .map_err(|_| BtleplugLinkError::CharacteristicMissing(characteristic))?;
        let ch = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(BtleplugLinkError::CharacteristicMissing(characteristic))?;
        Ok((peripheral, ch))
    }

    async fn subscribe(
        &mut self,
        characteristic: Characteristic,
        handler: NotifyHandler,
    ) -> Result<(), BtleplugLinkError> {
        let (peripheral, ch) = self.find(characteristic)?;
        if let Ok(mut handlers) = self.handlers.lock() {
            handlers.insert(characteristic, handler);
        }
        peripheral.subscribe(&ch).await?;
        Ok(())
    }

    async fn write(
        &mut self,
        characteristic: Characteristic,
        bytes: &[u8],
    ) -> Result<(), BtleplugLinkError> {
        let (peripheral, ch) = self.find(characteristic)?;
        debug!("write {characteristic}: {}", hex::encode(bytes));
        peripheral
            .write(&ch, bytes, WriteType::WithoutResponse)
            .await?;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), BtleplugLinkError> {
        if let Some(task) = self.notify_task.take() {
            task.abort();
        }
        if let Ok(mut handlers) = self.handlers.lock() {
            handlers.clear();
        }
        if let Some(peripheral) = self.connected.take() {
            peripheral.disconnect().await?;
        }
        Ok(())
    }
}
