//! Wi-Fi provisioning over the encrypted Security1 channel

use std::collections::HashMap;
use std::sync::Arc;

use psu_proto::prov::{
    AccessPoint, ConfigMessage, ConfigPayload, ScanMessage, ScanPayload, StationState,
    StationStatus,
};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{GattConfig, ProvisioningConfig};
use crate::error::{Error, TransportError};
use crate::security::{CipherSession, Security1};
use crate::transport::{
    Capability, GattCharacteristic, GattTransport, match_characteristic, write_read,
};

pub const MAX_SSID_LEN: usize = 32;
pub const MAX_PASSPHRASE_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionResult {
    pub success: bool,
    pub message: String,
}

impl ProvisionResult {
    fn connected(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// The firmware has no provisioning session endpoint; nothing was sent
    Unsupported,
    Finished(ProvisionResult),
}

/// Provisioning endpoints found on the peripheral
#[derive(Debug, Clone, Copy)]
struct Endpoints {
    scan: Option<Uuid>,
    session: Uuid,
    config: Option<Uuid>,
}

impl Endpoints {
    /// Endpoints of the provisioning service that can be written and read
    /// back. `None` when there is no usable session endpoint.
    fn resolve(chars: &[GattCharacteristic], gatt: &GattConfig) -> Result<Option<Self>, Error> {
        let service = gatt.provisioning_service()?;
        let find = |pattern: &str| {
            match_characteristic(chars, service, pattern)
                .filter(|c| c.supports(Capability::Write) && c.supports(Capability::Read))
                .map(|c| c.uuid)
        };
        let Some(session) = find(&gatt.session_match) else {
            return Ok(None);
        };
        Ok(Some(Self {
            scan: find(&gatt.scan_match),
            session,
            config: find(&gatt.config_match),
        }))
    }
}

pub struct Provisioner<T: GattTransport> {
    transport: Arc<T>,
    config: ProvisioningConfig,
    gatt: GattConfig,
}

impl<T: GattTransport> Provisioner<T> {
    pub fn new(transport: Arc<T>, config: ProvisioningConfig, gatt: GattConfig) -> Self {
        Self { transport, config, gatt }
    }

    /// Hand Wi-Fi credentials to the device and wait for it to join
    ///
    /// Failures at any layer become a failed [`ProvisionResult`]. The
    /// connection and the session key are dropped before returning.
    pub async fn provision(&self, ssid: &str, passphrase: &str) -> ProvisionOutcome {
        if let Err(message) = check_credentials(ssid, passphrase) {
            return ProvisionOutcome::Finished(ProvisionResult::failed(message));
        }

        let outcome = match self.open().await {
            Ok(None) => {
                info!("device firmware does not support Wi-Fi provisioning");
                ProvisionOutcome::Unsupported
            }
            Ok(Some(mut channel)) => {
                let result = channel.submit(ssid, passphrase).await.unwrap_or_else(|e| {
                    warn!(error = %e, "provisioning failed");
                    ProvisionResult::failed(e.to_string())
                });
                ProvisionOutcome::Finished(result)
            }
            Err(e) => {
                warn!(error = %e, "could not open provisioning session");
                ProvisionOutcome::Finished(ProvisionResult::failed(e.to_string()))
            }
        };

        self.close().await;
        outcome
    }

    /// Ask the device which networks it can see, strongest first
    pub async fn scan_networks(&self) -> Result<Vec<AccessPoint>, Error> {
        let result = self.open_and_scan().await;
        self.close().await;
        result
    }

    async fn open_and_scan(&self) -> Result<Vec<AccessPoint>, Error> {
        let mut channel = self
            .open()
            .await?
            .ok_or(TransportError::Unsupported("Wi-Fi provisioning"))?;
        channel.scan().await
    }

    async fn open(&self) -> Result<Option<SecureChannel<'_, T>>, Error> {
        self.transport.connect().await?;
        let chars = self.transport.discover().await?;

        let Some(endpoints) = Endpoints::resolve(&chars, &self.gatt)? else {
            return Ok(None);
        };
        debug!(?endpoints, "provisioning endpoints");

        let session = Security1::new(self.config.pop.as_deref())
            .establish(self.transport.as_ref(), endpoints.session)
            .await?;

        Ok(Some(SecureChannel {
            transport: self.transport.as_ref(),
            session,
            endpoints,
            config: &self.config,
        }))
    }

    async fn close(&self) {
        if let Err(e) = self.transport.disconnect().await {
            debug!(error = %e, "disconnect after provisioning");
        }
    }
}

fn check_credentials(ssid: &str, passphrase: &str) -> Result<(), String> {
    if ssid.is_empty() {
        return Err("SSID must not be empty".to_string());
    }
    if ssid.len() > MAX_SSID_LEN {
        return Err(format!("SSID is longer than {MAX_SSID_LEN} bytes"));
    }
    if passphrase.len() > MAX_PASSPHRASE_LEN {
        return Err(format!("passphrase is longer than {MAX_PASSPHRASE_LEN} bytes"));
    }
    Ok(())
}

/// One authenticated provisioning connection
///
/// Requests and responses are encrypted whole with the session keystream,
/// in the order they cross the link.
struct SecureChannel<'a, T: GattTransport> {
    transport: &'a T,
    session: CipherSession,
    endpoints: Endpoints,
    config: &'a ProvisioningConfig,
}

impl<T: GattTransport> SecureChannel<'_, T> {
    async fn exchange(&mut self, endpoint: Uuid, plain: &[u8]) -> Result<Vec<u8>, Error> {
        let request = self.session.apply(plain);
        let reply = write_read(self.transport, endpoint, &request).await?;
        Ok(self.session.apply(&reply))
    }

    async fn scan_request(&mut self, message: ScanMessage) -> Result<ScanMessage, Error> {
        let endpoint = self
            .endpoints
            .scan
            .ok_or(TransportError::Unsupported("Wi-Fi scan"))?;
        let reply = self.exchange(endpoint, &ScanPayload::command(message).to_bytes()).await?;
        let payload = ScanPayload::from_bytes(&reply)
            .ok_or_else(|| Error::Provisioning("malformed scan response".to_string()))?;
        if !payload.status.is_success() {
            return Err(Error::Provisioning(format!("scan refused: {:?}", payload.status)));
        }
        Ok(payload.message)
    }

    async fn config_request(&mut self, message: ConfigMessage) -> Result<ConfigMessage, Error> {
        let endpoint = self
            .endpoints
            .config
            .ok_or(TransportError::Unsupported("Wi-Fi config"))?;
        let reply = self.exchange(endpoint, &ConfigPayload::new(message).to_bytes()).await?;
        ConfigPayload::from_bytes(&reply)
            .map(|p| p.message)
            .ok_or_else(|| Error::Provisioning("malformed config response".to_string()))
    }

    async fn scan(&mut self) -> Result<Vec<AccessPoint>, Error> {
        let start = ScanMessage::StartCommand {
            blocking: false,
            passive: self.config.scan_passive,
            group_channels: 0,
            period_ms: self.config.scan_period_ms,
        };
        match self.scan_request(start).await? {
            ScanMessage::StartResponse => {}
            other => return Err(unexpected("scan start", &other)),
        }

        let deadline = Instant::now() + self.config.scan_timeout();
        let count = loop {
            sleep(self.config.scan_poll_interval()).await;
            match self.scan_request(ScanMessage::StatusCommand).await? {
                ScanMessage::StatusResponse { finished: true, result_count } => break result_count,
                ScanMessage::StatusResponse { .. } => {}
                other => return Err(unexpected("scan status", &other)),
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout("Wi-Fi scan"));
            }
        };
        debug!(count, "scan finished");

        let batch = self.config.scan_batch_size.max(1);
        let mut found = Vec::new();
        let mut start_index = 0;
        while start_index < count {
            let request = ScanMessage::ResultCommand {
                start_index,
                count: batch.min(count - start_index),
            };
            let entries = match self.scan_request(request).await? {
                ScanMessage::ResultResponse { entries } => entries,
                other => return Err(unexpected("scan results", &other)),
            };
            if entries.is_empty() {
                break;
            }
            start_index += entries.len() as u32;
            found.extend(entries);
        }

        Ok(strongest_unique(found))
    }

    async fn submit(&mut self, ssid: &str, passphrase: &str) -> Result<ProvisionResult, Error> {
        let set = ConfigMessage::SetConfigCommand {
            ssid: ssid.to_string(),
            passphrase: passphrase.to_string(),
        };
        match self.config_request(set).await? {
            ConfigMessage::SetConfigResponse { status } if status.is_success() => {}
            ConfigMessage::SetConfigResponse { status } => {
                return Ok(ProvisionResult::failed(format!(
                    "device rejected the credentials ({status:?})"
                )));
            }
            other => return Err(unexpected("set config", &other)),
        }
        info!(ssid, "credentials accepted");

        if self.config.apply_config {
            match self.config_request(ConfigMessage::ApplyCommand).await? {
                ConfigMessage::ApplyResponse { status } if status.is_success() => {}
                ConfigMessage::ApplyResponse { status } => {
                    return Ok(ProvisionResult::failed(format!(
                        "device could not apply the config ({status:?})"
                    )));
                }
                other => return Err(unexpected("apply config", &other)),
            }
        }

        let deadline = Instant::now() + self.config.status_timeout();
        loop {
            let status = match self.config_request(ConfigMessage::GetStatusCommand).await? {
                ConfigMessage::GetStatusResponse(status) => status,
                other => return Err(unexpected("station status", &other)),
            };
            debug!(state = ?status.state, "station status");

            // The station state means nothing when the request itself failed
            if !status.status.is_success() {
                return Ok(ProvisionResult::failed(format!(
                    "device could not report its Wi-Fi status ({:?})",
                    status.status
                )));
            }

            match status.state {
                StationState::Connected => {
                    return Ok(ProvisionResult::connected(connected_message(ssid, &status)));
                }
                StationState::Connecting => {}
                _ => return Ok(ProvisionResult::failed(failure_message(&status))),
            }

            if Instant::now() >= deadline {
                return Ok(ProvisionResult::failed(format!(
                    "timed out waiting for the device to join {ssid}"
                )));
            }
            sleep(self.config.status_poll_interval()).await;
        }
    }
}

fn unexpected(step: &str, message: &impl std::fmt::Debug) -> Error {
    Error::Provisioning(format!("unexpected reply to {step}: {message:?}"))
}

fn connected_message(ssid: &str, status: &StationStatus) -> String {
    match &status.connected {
        Some(info) if !info.ip4_addr.is_empty() => {
            format!("connected to {ssid} ({})", info.ip4_addr)
        }
        _ => format!("connected to {ssid}"),
    }
}

fn failure_message(status: &StationStatus) -> String {
    match status.fail_reason {
        Some(reason) => reason.to_string(),
        None => format!("Wi-Fi connection failed ({:?})", status.state),
    }
}

/// One entry per SSID, keeping the strongest signal, sorted strongest first.
/// Hidden networks (empty SSID) are left out.
fn strongest_unique(found: Vec<AccessPoint>) -> Vec<AccessPoint> {
    let mut by_ssid: HashMap<String, AccessPoint> = HashMap::new();
    for ap in found.into_iter().filter(|ap| !ap.ssid.is_empty()) {
        match by_ssid.get(&ap.ssid) {
            Some(existing) if existing.rssi >= ap.rssi => {}
            _ => {
                by_ssid.insert(ap.ssid.clone(), ap);
            }
        }
    }
    let mut list: Vec<AccessPoint> = by_ssid.into_values().collect();
    list.sort_by(|a, b| b.rssi.cmp(&a.rssi).then_with(|| a.ssid.cmp(&b.ssid)));
    list
}
