//! Request/response transaction engine
//!
//! The peripheral answers one request at a time with exactly one
//! notification on the response characteristic. The engine enforces that:
//!
//! - callers pass through a FIFO gate, so at most one request is in flight
//! - each attempt arms a fresh single-slot rendezvous before writing
//! - a background task consumes transport events and only fulfils that slot
//! - a disconnect drops the slot, failing the waiting caller immediately

use std::sync::{Arc, Mutex, MutexGuard};

use futures::StreamExt;
use psu_proto::tlv::{self, TlvResponse};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::{EngineConfig, GattConfig};
use crate::error::{Error, TransportError};
use crate::transport::{
    Capability, EventStream, GattTransport, TransportEvent, find_characteristic,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Single pending-response slot shared with the event task
#[derive(Default)]
struct ResponseSlot {
    pending: Mutex<Option<oneshot::Sender<Vec<u8>>>>,
}

impl ResponseSlot {
    fn lock(&self) -> MutexGuard<'_, Option<oneshot::Sender<Vec<u8>>>> {
        // The guarded value stays consistent even if a holder panicked
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn arm(&self) -> oneshot::Receiver<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        *self.lock() = Some(tx);
        rx
    }

    /// Fulfil the pending request, if any. Returns false when nobody was waiting.
    fn fulfil(&self, value: Vec<u8>) -> bool {
        match self.lock().take() {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    /// Drop the pending sender; its receiver observes a disconnect
    fn cancel(&self) {
        self.lock().take();
    }
}

/// Transaction engine over one GATT transport
pub struct Engine<T: GattTransport> {
    transport: Arc<T>,
    config: EngineConfig,
    service_uuid: Uuid,
    request_uuid: Uuid,
    response_uuid: Uuid,
    state: Arc<watch::Sender<ConnectionState>>,
    slot: Arc<ResponseSlot>,
    gate: tokio::sync::Mutex<()>,
    event_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<T: GattTransport> Engine<T> {
    pub fn new(transport: Arc<T>, config: EngineConfig, gatt: &GattConfig) -> Result<Self, Error> {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Ok(Self {
            transport,
            config,
            service_uuid: gatt.service()?,
            request_uuid: gatt.request()?,
            response_uuid: gatt.response()?,
            state: Arc::new(state),
            slot: Arc::new(ResponseSlot::default()),
            gate: tokio::sync::Mutex::new(()),
            event_task: tokio::sync::Mutex::new(None),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch connection state changes
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Connect, discover, subscribe. On failure everything is unwound and the
    /// engine is left disconnected.
    pub async fn connect(&self) -> Result<(), Error> {
        let mut task = self.event_task.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        self.state.send_replace(ConnectionState::Connecting);
        match self.establish().await {
            Ok(events) => {
                *task = Some(tokio::spawn(run_events(
                    events,
                    self.response_uuid,
                    self.slot.clone(),
                    self.state.clone(),
                )));
                self.state.send_replace(ConnectionState::Connected);
                info!("connected");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "connect failed, unwinding");
                self.teardown().await;
                self.state.send_replace(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    async fn establish(&self) -> Result<EventStream, Error> {
        self.transport.connect().await?;

        let chars = self.transport.discover().await?;
        find_characteristic(&chars, self.service_uuid, self.request_uuid)?
            .require(Capability::Write)?;
        find_characteristic(&chars, self.service_uuid, self.response_uuid)?
            .require(Capability::Notify)?;
        debug!(count = chars.len(), "characteristics discovered");

        // Take the event stream before subscribing so no notification is missed
        let events = self.transport.events().await?;
        self.transport.subscribe(self.response_uuid).await?;

        if let Some(mtu) = self.config.mtu {
            if self.transport.supports_mtu_negotiation() {
                match self.transport.request_mtu(mtu).await {
                    Ok(negotiated) => debug!(negotiated, "MTU negotiated"),
                    Err(e) => warn!(error = %e, "MTU request failed, keeping default"),
                }
            } else {
                debug!("MTU negotiation not available on this platform");
            }
        }

        Ok(events)
    }

    async fn teardown(&self) {
        if let Err(e) = self.transport.unsubscribe(self.response_uuid).await {
            trace!(error = %e, "unsubscribe during teardown");
        }
        if let Err(e) = self.transport.disconnect().await {
            trace!(error = %e, "disconnect during teardown");
        }
    }

    /// Fail any pending request, drop subscriptions and disconnect
    pub async fn disconnect(&self) -> Result<(), Error> {
        let mut task = self.event_task.lock().await;
        self.state.send_replace(ConnectionState::Disconnected);
        self.slot.cancel();
        if let Some(handle) = task.take() {
            handle.abort();
        }
        self.teardown().await;
        info!("disconnected");
        Ok(())
    }

    /// Write one encoded TLV frame and wait for its response
    ///
    /// Timeouts and malformed responses are retried with the same frame up
    /// to `max_retries` attempts. An error-tag response is returned as
    /// [`Error::Peripheral`] without retrying.
    pub async fn send_request(&self, frame: &[u8]) -> Result<TlvResponse, Error> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected.into());
        }

        let _turn = self.gate.lock().await;
        if !self.is_connected() {
            return Err(TransportError::NotConnected.into());
        }

        let attempts = self.config.max_retries.max(1);
        let timeout = self.config.request_timeout();
        let tag = frame.get(1).copied().unwrap_or_default();

        for attempt in 1..=attempts {
            if attempt > 1 {
                // A disconnect that raced the timeout must land before we decide
                tokio::task::yield_now().await;
            }
            // The link may have dropped while the previous attempt was failing
            if !self.is_connected() {
                return Err(TransportError::Disconnected.into());
            }
            let response = self.slot.arm();
            trace!(tag, attempt, "writing request");
            if let Err(e) = self.transport.write(self.request_uuid, frame, true).await {
                self.slot.cancel();
                return Err(e.into());
            }

            match tokio::time::timeout(timeout, response).await {
                Err(_) => {
                    warn!(tag, attempt, "no response within {:?}", timeout);
                }
                Ok(Err(_)) => return Err(TransportError::Disconnected.into()),
                Ok(Ok(bytes)) => match tlv::decode_response(&bytes) {
                    Ok(resp) => {
                        if let Some(code) = resp.error_code() {
                            debug!(tag, %code, "peripheral rejected request");
                            return Err(Error::Peripheral(code));
                        }
                        return Ok(resp);
                    }
                    Err(e) => warn!(tag, attempt, error = %e, "malformed response"),
                },
            }
        }

        self.slot.cancel();
        Err(TransportError::NoResponse { attempts }.into())
    }
}

impl<T: GattTransport> Drop for Engine<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.event_task.get_mut().take() {
            handle.abort();
        }
    }
}

async fn run_events(
    mut events: EventStream,
    response_uuid: Uuid,
    slot: Arc<ResponseSlot>,
    state: Arc<watch::Sender<ConnectionState>>,
) {
    while let Some(event) = events.next().await {
        match event {
            TransportEvent::Notification { uuid, value } if uuid == response_uuid => {
                if !slot.fulfil(value) {
                    debug!("dropping unsolicited notification");
                }
            }
            TransportEvent::Notification { uuid, .. } => {
                trace!(%uuid, "ignoring notification");
            }
            TransportEvent::Disconnected => {
                warn!("peripheral disconnected");
                break;
            }
        }
    }

    slot.cancel();
    state.send_replace(ConnectionState::Disconnected);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockOp, MockTransport, Reply, characteristic};
    use psu_proto::{TAG_ERROR, TAG_OK, encode_frame, read_request};
    use std::time::Duration;

    fn engine(mock: &Arc<MockTransport>) -> Engine<MockTransport> {
        Engine::new(mock.clone(), EngineConfig::default(), &GattConfig::default()).unwrap()
    }

    fn voltage_reply() -> Vec<u8> {
        vec![0x15, 0x03, 0x04, 0xA8, 0x45, 0x43, 0x41, 0x6E, 0x87]
    }

    #[tokio::test]
    async fn request_requires_connection() {
        let mock = MockTransport::telemetry(|_| Reply::Nothing);
        let engine = engine(&mock);
        let err = engine.send_request(&read_request(0x03)).await.unwrap_err();
        assert!(matches!(err, Error::Transport(TransportError::NotConnected)));
        assert!(mock.writes().is_empty());
    }

    #[tokio::test]
    async fn request_response() {
        let mock = MockTransport::telemetry(|_| Reply::Notify(voltage_reply()));
        let engine = engine(&mock);
        engine.connect().await.unwrap();
        assert_eq!(engine.state(), ConnectionState::Connected);

        let resp = engine.send_request(&read_request(0x03)).await.unwrap();
        assert_eq!(resp.tag, 0x03);
        assert!((resp.as_f32().unwrap() - 12.205).abs() < 0.001);
        assert_eq!(mock.writes(), vec![read_request(0x03)]);
        assert!(mock.ops().contains(&MockOp::Subscribe(mock.response_uuid())));
    }

    #[tokio::test]
    async fn mtu_only_requested_when_supported() {
        let mock = MockTransport::telemetry(|_| Reply::Nothing);
        engine(&mock).connect().await.unwrap();
        assert!(!mock.ops().iter().any(|op| matches!(op, MockOp::RequestMtu(_))));

        let mock = MockTransport::telemetry(|_| Reply::Nothing).with_mtu_support();
        engine(&mock).connect().await.unwrap();
        assert!(mock.ops().contains(&MockOp::RequestMtu(247)));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peripheral_exhausts_retries() {
        let mock = MockTransport::telemetry(|_| Reply::Nothing);
        let engine = engine(&mock);
        engine.connect().await.unwrap();

        let started = tokio::time::Instant::now();
        let err = engine.send_request(&read_request(0x03)).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, Error::Transport(TransportError::NoResponse { attempts: 3 })));
        assert_eq!(mock.writes().len(), 3);
        assert!(elapsed >= Duration::from_secs(6), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(6100), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn corrupted_response_is_retried() {
        let mut calls = 0;
        let mock = MockTransport::telemetry(move |_| {
            calls += 1;
            let mut reply = voltage_reply();
            if calls == 1 {
                reply[4] ^= 0x01;
            }
            Reply::Notify(reply)
        });
        let engine = engine(&mock);
        engine.connect().await.unwrap();

        let resp = engine.send_request(&read_request(0x03)).await.unwrap();
        assert_eq!(resp.tag, 0x03);
        assert_eq!(mock.writes().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn peripheral_error_is_not_retried() {
        let mock = MockTransport::telemetry(|_| {
            Reply::Notify(encode_frame(TAG_ERROR, &[0x04]).unwrap())
        });
        let engine = engine(&mock);
        engine.connect().await.unwrap();

        let err = engine
            .send_request(&psu_proto::write_f32_request(0x10, 999.0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Peripheral(psu_proto::ErrorCode::OutOfRange)));
        assert_eq!(mock.writes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_requests_never_interleave() {
        let mock = MockTransport::telemetry(|frame| {
            let reply = encode_frame(TAG_OK, &[frame[1]]).unwrap();
            Reply::NotifyAfter(Duration::from_millis(300), reply)
        });
        let engine = Arc::new(engine(&mock));
        engine.connect().await.unwrap();

        let a = read_request(0x03);
        let b = read_request(0x04);
        let (ra, rb) = tokio::join!(engine.send_request(&a), engine.send_request(&b));
        assert_eq!(ra.unwrap().value, vec![0x03]);
        assert_eq!(rb.unwrap().value, vec![0x04]);

        let order: Vec<MockOp> = mock
            .ops()
            .into_iter()
            .filter(|op| matches!(op, MockOp::Write(_) | MockOp::Notified(_)))
            .collect();
        assert_eq!(
            order,
            vec![
                MockOp::Write(a),
                MockOp::Notified(encode_frame(TAG_OK, &[0x03]).unwrap()),
                MockOp::Write(b),
                MockOp::Notified(encode_frame(TAG_OK, &[0x04]).unwrap()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn second_caller_waits_for_first_timeout() {
        let mut calls = 0;
        let mock = MockTransport::telemetry(move |_| {
            calls += 1;
            // First request's three attempts go unanswered
            if calls <= 3 { Reply::Nothing } else { Reply::Notify(voltage_reply()) }
        });
        let engine = Arc::new(engine(&mock));
        engine.connect().await.unwrap();

        let started = tokio::time::Instant::now();
        let telemetry = read_request(0x01);
        let first = engine.send_request(&telemetry);
        let second = async {
            let r = engine.send_request(&read_request(0x03)).await;
            (r, started.elapsed())
        };
        let (r1, (r2, t2)) = tokio::join!(first, second);

        assert!(matches!(r1, Err(Error::Transport(TransportError::NoResponse { .. }))));
        assert_eq!(r2.unwrap().tag, 0x03);
        assert!(t2 >= Duration::from_secs(6));
        let writes = mock.writes();
        assert_eq!(writes.len(), 4);
        assert_eq!(writes[3], read_request(0x03));
    }

    #[tokio::test(start_paused = true)]
    async fn peer_disconnect_fails_pending_request() {
        let mock = MockTransport::telemetry(|_| Reply::DisconnectAfter(Duration::from_millis(100)));
        let engine = engine(&mock);
        engine.connect().await.unwrap();
        let mut state = engine.subscribe_state();

        let started = tokio::time::Instant::now();
        let err = engine.send_request(&read_request(0x03)).await.unwrap_err();
        assert!(matches!(err, Error::Transport(TransportError::Disconnected)));
        assert!(started.elapsed() < Duration::from_secs(1));

        state.wait_for(|s| *s == ConnectionState::Disconnected).await.unwrap();
        let err = engine.send_request(&read_request(0x03)).await.unwrap_err();
        assert!(matches!(err, Error::Transport(TransportError::NotConnected)));
    }

    #[tokio::test(start_paused = true)]
    async fn local_disconnect_fails_pending_request() {
        let mock = MockTransport::telemetry(|_| Reply::Nothing);
        let engine = Arc::new(engine(&mock));
        engine.connect().await.unwrap();

        let pending = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.send_request(&read_request(0x03)).await })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;
        engine.disconnect().await.unwrap();

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Transport(TransportError::Disconnected)));
        assert_eq!(engine.state(), ConnectionState::Disconnected);
        assert!(mock.ops().contains(&MockOp::Unsubscribe(mock.response_uuid())));
        assert!(mock.ops().contains(&MockOp::Disconnect));
    }

    #[tokio::test]
    async fn failed_subscribe_unwinds() {
        let mock = MockTransport::telemetry(|_| Reply::Nothing).with_failing_subscribe();
        let engine = engine(&mock);
        assert!(engine.connect().await.is_err());
        assert_eq!(engine.state(), ConnectionState::Disconnected);
        assert!(mock.ops().contains(&MockOp::Disconnect));
    }

    #[tokio::test]
    async fn missing_characteristic_fails_connect() {
        let mock = MockTransport::new(Vec::new(), |_, _| Reply::Nothing);
        let engine = engine(&mock);
        let err = engine.connect().await.unwrap_err();
        assert!(matches!(err, Error::Transport(TransportError::CharacteristicNotFound(_))));
        assert_eq!(engine.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn response_characteristic_must_notify() {
        let gatt = GattConfig::default();
        let service = gatt.service().unwrap();
        let mut response = characteristic(gatt.response().unwrap(), service);
        response.notify = false;
        let chars = vec![characteristic(gatt.request().unwrap(), service), response];
        let mock = MockTransport::new(chars, |_, _| Reply::Nothing);
        let engine = engine(&mock);

        let err = engine.connect().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Transport(TransportError::MissingCapability {
                capability: Capability::Notify,
                ..
            })
        ));
        assert_eq!(engine.state(), ConnectionState::Disconnected);
        assert!(!mock.ops().iter().any(|op| matches!(op, MockOp::Subscribe(_))));
    }

    #[tokio::test]
    async fn characteristics_of_another_service_are_ignored() {
        let gatt = GattConfig::default();
        let other = Uuid::from_u128(0x0000_180a_0000_1000_8000_0080_5f9b_34fb);
        let chars = vec![
            characteristic(gatt.request().unwrap(), other),
            characteristic(gatt.response().unwrap(), other),
        ];
        let mock = MockTransport::new(chars, |_, _| Reply::Nothing);
        let err = engine(&mock).connect().await.unwrap_err();
        assert!(matches!(err, Error::Transport(TransportError::CharacteristicNotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn state_passes_through_connecting() {
        let mock = MockTransport::telemetry(|_| Reply::Nothing)
            .with_connect_delay(Duration::from_millis(200));
        let engine = Arc::new(engine(&mock));
        let mut state = engine.subscribe_state();

        let connecting = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.connect().await })
        };
        state.wait_for(|s| *s == ConnectionState::Connecting).await.unwrap();
        assert_eq!(engine.state(), ConnectionState::Connecting);
        assert!(!engine.is_connected());

        connecting.await.unwrap().unwrap();
        state.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn no_retry_once_link_is_gone() {
        let mut corrupt = voltage_reply();
        corrupt[4] ^= 0x01;
        let mock = MockTransport::telemetry(move |_| Reply::NotifyThenDisconnect(corrupt.clone()));
        let engine = engine(&mock);
        engine.connect().await.unwrap();

        let err = engine.send_request(&read_request(0x03)).await.unwrap_err();
        assert!(matches!(err, Error::Transport(TransportError::Disconnected)));
        assert_eq!(mock.writes().len(), 1);
        assert_eq!(engine.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_at_timeout_boundary_stops_retrying() {
        let mock = MockTransport::telemetry(|_| Reply::DisconnectAfter(Duration::from_secs(2)));
        let engine = engine(&mock);
        engine.connect().await.unwrap();

        let err = engine.send_request(&read_request(0x03)).await.unwrap_err();
        assert!(matches!(err, Error::Transport(TransportError::Disconnected)));
        assert_eq!(mock.writes().len(), 1);
    }

    #[tokio::test]
    async fn reconnect_after_disconnect() {
        let mock = MockTransport::telemetry(|_| Reply::Notify(voltage_reply()));
        let engine = engine(&mock);
        engine.connect().await.unwrap();
        engine.disconnect().await.unwrap();
        engine.connect().await.unwrap();
        assert_eq!(engine.send_request(&read_request(0x03)).await.unwrap().tag, 0x03);
        let connects = mock.ops().iter().filter(|op| **op == MockOp::Connect).count();
        assert_eq!(connects, 2);
    }
}
