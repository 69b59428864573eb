//! Scripted in-memory peripheral for tests

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc;
use psu_proto::prov::{
    AccessPoint, ConfigMessage, ConfigPayload, ScanMessage, ScanPayload, SessionMessage,
    StationState, StationStatus, Status,
};
use uuid::Uuid;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::config::GattConfig;
use crate::error::TransportError;
use crate::security::{CipherSession, derive_key};
use crate::transport::{EventStream, GattCharacteristic, GattTransport, TransportEvent};

/// What the peripheral does after a write
pub(crate) enum Reply {
    Nothing,
    Notify(Vec<u8>),
    NotifyAfter(Duration, Vec<u8>),
    DisconnectAfter(Duration),
    /// Notify, then drop the link before anything else happens
    NotifyThenDisconnect(Vec<u8>),
    /// Make the value readable on the written characteristic
    Readable(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MockOp {
    Connect,
    Disconnect,
    Subscribe(Uuid),
    Unsubscribe(Uuid),
    RequestMtu(u16),
    Write(Vec<u8>),
    WriteTo(Uuid, Vec<u8>),
    Notified(Vec<u8>),
}

type Handler = Box<dyn FnMut(Uuid, &[u8]) -> Reply + Send>;

struct Shared {
    ops: Mutex<Vec<MockOp>>,
    events: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    readable: Mutex<HashMap<Uuid, Vec<u8>>>,
}

impl Shared {
    fn record(&self, op: MockOp) {
        self.ops.lock().unwrap().push(op);
    }

    fn emit(&self, event: TransportEvent) {
        if let TransportEvent::Notification { value, .. } = &event {
            self.record(MockOp::Notified(value.clone()));
        }
        if let Some(tx) = self.events.lock().unwrap().as_ref() {
            let _ = tx.unbounded_send(event);
        }
    }
}

pub(crate) struct MockTransport {
    chars: Vec<GattCharacteristic>,
    response_uuid: Uuid,
    request_uuid: Uuid,
    handler: Mutex<Handler>,
    shared: Arc<Shared>,
    mtu_supported: bool,
    fail_subscribe: bool,
    connect_delay: Duration,
}

pub(crate) fn characteristic(uuid: Uuid, service_uuid: Uuid) -> GattCharacteristic {
    GattCharacteristic {
        uuid,
        service_uuid,
        read: true,
        write: true,
        notify: true,
    }
}

impl MockTransport {
    pub fn new(
        chars: Vec<GattCharacteristic>,
        handler: impl FnMut(Uuid, &[u8]) -> Reply + Send + 'static,
    ) -> Arc<Self> {
        let gatt = GattConfig::default();
        Arc::new(Self {
            chars,
            response_uuid: gatt.response().unwrap(),
            request_uuid: gatt.request().unwrap(),
            handler: Mutex::new(Box::new(handler)),
            shared: Arc::new(Shared {
                ops: Mutex::new(Vec::new()),
                events: Mutex::new(None),
                readable: Mutex::new(HashMap::new()),
            }),
            mtu_supported: false,
            fail_subscribe: false,
            connect_delay: Duration::ZERO,
        })
    }

    /// A PSU exposing the telemetry service; `handler` sees each request frame
    pub fn telemetry(mut handler: impl FnMut(&[u8]) -> Reply + Send + 'static) -> Arc<Self> {
        let gatt = GattConfig::default();
        let service = gatt.service().unwrap();
        let chars = vec![
            characteristic(gatt.request().unwrap(), service),
            characteristic(gatt.response().unwrap(), service),
        ];
        Self::new(chars, move |_, data| handler(data))
    }

    fn configure(self: Arc<Self>, f: impl FnOnce(&mut Self)) -> Arc<Self> {
        let mut this = Arc::try_unwrap(self).unwrap_or_else(|_| panic!("mock already shared"));
        f(&mut this);
        Arc::new(this)
    }

    pub fn with_mtu_support(self: Arc<Self>) -> Arc<Self> {
        self.configure(|m| m.mtu_supported = true)
    }

    pub fn with_failing_subscribe(self: Arc<Self>) -> Arc<Self> {
        self.configure(|m| m.fail_subscribe = true)
    }

    /// Make `connect` take `delay` to complete
    pub fn with_connect_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        self.configure(|m| m.connect_delay = delay)
    }

    /// A device exposing the provisioning endpoints, answering through `device`
    pub fn provisioning(device: Arc<Mutex<ProvDevice>>) -> Arc<Self> {
        let chars = device.lock().unwrap().characteristics();
        Self::new(chars, move |uuid, data| {
            Reply::Readable(device.lock().unwrap().handle(uuid, data))
        })
    }

    pub fn response_uuid(&self) -> Uuid {
        self.response_uuid
    }

    pub fn ops(&self) -> Vec<MockOp> {
        self.shared.ops.lock().unwrap().clone()
    }

    /// Frames written to the request characteristic
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                MockOp::Write(data) => Some(data),
                _ => None,
            })
            .collect()
    }

    /// Everything written to `uuid`, whichever characteristic it is
    pub fn writes_to(&self, uuid: Uuid) -> Vec<Vec<u8>> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                MockOp::WriteTo(u, data) if u == uuid => Some(data),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl GattTransport for MockTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.shared.record(MockOp::Connect);
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.shared.record(MockOp::Disconnect);
        self.shared.events.lock().unwrap().take();
        Ok(())
    }

    async fn discover(&self) -> Result<Vec<GattCharacteristic>, TransportError> {
        Ok(self.chars.clone())
    }

    async fn subscribe(&self, uuid: Uuid) -> Result<(), TransportError> {
        if self.fail_subscribe {
            return Err(TransportError::Unsupported("notifications"));
        }
        self.shared.record(MockOp::Subscribe(uuid));
        Ok(())
    }

    async fn unsubscribe(&self, uuid: Uuid) -> Result<(), TransportError> {
        self.shared.record(MockOp::Unsubscribe(uuid));
        Ok(())
    }

    async fn write(
        &self,
        uuid: Uuid,
        data: &[u8],
        _with_response: bool,
    ) -> Result<(), TransportError> {
        if uuid == self.request_uuid {
            self.shared.record(MockOp::Write(data.to_vec()));
        } else {
            self.shared.record(MockOp::WriteTo(uuid, data.to_vec()));
        }

        let reply = {
            let mut handler = self.handler.lock().unwrap();
            (*handler)(uuid, data)
        };
        let response_uuid = self.response_uuid;
        match reply {
            Reply::Nothing => {}
            Reply::Notify(value) => self.shared.emit(TransportEvent::Notification {
                uuid: response_uuid,
                value,
            }),
            Reply::NotifyAfter(delay, value) => {
                let shared = self.shared.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    shared.emit(TransportEvent::Notification {
                        uuid: response_uuid,
                        value,
                    });
                });
            }
            Reply::DisconnectAfter(delay) => {
                let shared = self.shared.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    shared.emit(TransportEvent::Disconnected);
                });
            }
            Reply::NotifyThenDisconnect(value) => {
                self.shared.emit(TransportEvent::Notification {
                    uuid: response_uuid,
                    value,
                });
                self.shared.emit(TransportEvent::Disconnected);
            }
            Reply::Readable(value) => {
                self.shared.readable.lock().unwrap().insert(uuid, value);
            }
        }
        Ok(())
    }

    async fn read(&self, uuid: Uuid) -> Result<Vec<u8>, TransportError> {
        Ok(self
            .shared
            .readable
            .lock()
            .unwrap()
            .remove(&uuid)
            .unwrap_or_default())
    }

    async fn events(&self) -> Result<EventStream, TransportError> {
        let (tx, rx) = mpsc::unbounded();
        *self.shared.events.lock().unwrap() = Some(tx);
        Ok(rx.boxed())
    }

    fn supports_mtu_negotiation(&self) -> bool {
        self.mtu_supported
    }

    async fn request_mtu(&self, mtu: u16) -> Result<u16, TransportError> {
        self.shared.record(MockOp::RequestMtu(mtu));
        Ok(mtu)
    }
}

/// Provisioning firmware model: Security1 session, Wi-Fi scan and station config
pub(crate) struct ProvDevice {
    secret: StaticSecret,
    pop: Option<String>,
    nonce: [u8; 16],
    session: Option<CipherSession>,
    client_pubkey: [u8; 32],
    verified: bool,
    pub service_uuid: Uuid,
    pub scan_uuid: Uuid,
    pub session_uuid: Uuid,
    pub config_uuid: Uuid,
    pub networks: Vec<AccessPoint>,
    /// Status polls answered with "not finished" before the scan completes
    pub scan_busy_polls: u32,
    pub set_config_status: Status,
    /// Answers to GetStatus in order; the last one repeats
    pub station: VecDeque<StationStatus>,
    pub received: Vec<ConfigMessage>,
    pub scan_started: bool,
}

pub(crate) fn station(state: StationState) -> StationStatus {
    StationStatus {
        status: Status::Success,
        state,
        fail_reason: None,
        connected: None,
    }
}

impl ProvDevice {
    pub fn new(pop: Option<&str>) -> Self {
        let secret: [u8; 32] = std::array::from_fn(|i| i as u8 + 101);
        let service_uuid = Uuid::parse_str(psu_proto::ble::provisioning::SERVICE_UUID).unwrap();
        let endpoint = |n: u16| {
            Uuid::parse_str(&format!("021a{n:04x}-0382-4aea-bff4-6b3f1c5adfb4")).unwrap()
        };
        Self {
            secret: StaticSecret::from(secret),
            pop: pop.map(str::to_owned),
            nonce: std::array::from_fn(|i| 0xA0 + i as u8),
            session: None,
            client_pubkey: [0; 32],
            verified: false,
            service_uuid,
            scan_uuid: endpoint(0xff50),
            session_uuid: endpoint(0xff51),
            config_uuid: endpoint(0xff52),
            networks: Vec::new(),
            scan_busy_polls: 0,
            set_config_status: Status::Success,
            station: VecDeque::from([station(StationState::Connected)]),
            received: Vec::new(),
            scan_started: false,
        }
    }

    pub fn shared(pop: Option<&str>) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::new(pop)))
    }

    pub fn characteristics(&self) -> Vec<GattCharacteristic> {
        [self.scan_uuid, self.session_uuid, self.config_uuid]
            .into_iter()
            .map(|uuid| characteristic(uuid, self.service_uuid))
            .collect()
    }

    pub fn session_established(&self) -> bool {
        self.verified
    }

    fn handle(&mut self, uuid: Uuid, data: &[u8]) -> Vec<u8> {
        if uuid == self.session_uuid {
            return self.handle_session(data);
        }
        let Some(session) = self.session.as_mut().filter(|_| self.verified) else {
            return Vec::new();
        };
        let plain = session.apply(data);
        let reply = if uuid == self.scan_uuid {
            self.handle_scan(&plain)
        } else if uuid == self.config_uuid {
            self.handle_config(&plain)
        } else {
            return Vec::new();
        };
        match self.session.as_mut() {
            Some(session) => session.apply(&reply),
            None => Vec::new(),
        }
    }

    fn handle_session(&mut self, data: &[u8]) -> Vec<u8> {
        match SessionMessage::from_bytes(data) {
            Some(SessionMessage::Command0 { client_pubkey }) => {
                self.client_pubkey = client_pubkey.try_into().unwrap();
                self.verified = false;
                let shared = self.secret.diffie_hellman(&PublicKey::from(self.client_pubkey));
                let key = derive_key(shared.as_bytes(), self.pop.as_deref().map(str::as_bytes));
                self.session = Some(CipherSession::new(key, self.nonce));
                SessionMessage::Response0 {
                    status: Status::Success,
                    device_pubkey: PublicKey::from(&self.secret).to_bytes().to_vec(),
                    device_random: self.nonce.to_vec(),
                }
                .to_bytes()
            }
            Some(SessionMessage::Command1 { client_verify_data }) => {
                let own = PublicKey::from(&self.secret).to_bytes();
                let session = self.session.as_mut().unwrap();
                if session.apply(&client_verify_data) != own {
                    return SessionMessage::Response1 {
                        status: Status::CryptoError,
                        device_verify_data: Vec::new(),
                    }
                    .to_bytes();
                }
                self.verified = true;
                SessionMessage::Response1 {
                    status: Status::Success,
                    device_verify_data: session.apply(&self.client_pubkey),
                }
                .to_bytes()
            }
            _ => Vec::new(),
        }
    }

    fn handle_scan(&mut self, plain: &[u8]) -> Vec<u8> {
        let message = match ScanPayload::from_bytes(plain).map(|p| p.message) {
            Some(ScanMessage::StartCommand { .. }) => {
                self.scan_started = true;
                ScanMessage::StartResponse
            }
            Some(ScanMessage::StatusCommand) => {
                let finished = self.scan_started && self.scan_busy_polls == 0;
                self.scan_busy_polls = self.scan_busy_polls.saturating_sub(1);
                ScanMessage::StatusResponse {
                    finished,
                    result_count: if finished { self.networks.len() as u32 } else { 0 },
                }
            }
            Some(ScanMessage::ResultCommand { start_index, count }) => {
                let start = start_index as usize;
                let end = (start + count as usize).min(self.networks.len());
                ScanMessage::ResultResponse {
                    entries: self.networks.get(start..end).unwrap_or_default().to_vec(),
                }
            }
            _ => {
                return ScanPayload {
                    status: Status::InvalidProto,
                    message: ScanMessage::StartResponse,
                }
                .to_bytes();
            }
        };
        ScanPayload::command(message).to_bytes()
    }

    fn handle_config(&mut self, plain: &[u8]) -> Vec<u8> {
        let Some(payload) = ConfigPayload::from_bytes(plain) else {
            return Vec::new();
        };
        let reply = match &payload.message {
            ConfigMessage::GetStatusCommand => {
                let status = if self.station.len() > 1 {
                    self.station.pop_front()
                } else {
                    self.station.front().cloned()
                };
                ConfigMessage::GetStatusResponse(
                    status.unwrap_or_else(|| station(StationState::Disconnected)),
                )
            }
            ConfigMessage::SetConfigCommand { .. } => ConfigMessage::SetConfigResponse {
                status: self.set_config_status,
            },
            ConfigMessage::ApplyCommand => ConfigMessage::ApplyResponse {
                status: Status::Success,
            },
            _ => return Vec::new(),
        };
        self.received.push(payload.message);
        ConfigPayload::new(reply).to_bytes()
    }
}
