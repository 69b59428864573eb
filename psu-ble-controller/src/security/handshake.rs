//! Security1 handshake over the provisioning session endpoint

use psu_proto::prov::SessionMessage;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use uuid::Uuid;
use x25519_dalek::{PublicKey, StaticSecret};

use super::cipher::{CipherSession, KEY_LEN, NONCE_LEN};
use crate::error::{CryptoError, Error};
use crate::transport::{GattTransport, write_read};

/// Session key: the X25519 shared secret XOR SHA-256 of the proof of possession
pub fn derive_key(shared: &[u8; KEY_LEN], pop: Option<&[u8]>) -> [u8; KEY_LEN] {
    let mut key = *shared;
    if let Some(pop) = pop.filter(|p| !p.is_empty()) {
        let digest = Sha256::digest(pop);
        for (k, d) in key.iter_mut().zip(digest.iter()) {
            *k ^= d;
        }
    }
    key
}

/// Client side of one Security1 handshake
pub struct Security1 {
    secret: StaticSecret,
    public: PublicKey,
    pop: Option<String>,
}

impl Security1 {
    /// Fresh ephemeral keypair
    pub fn new(pop: Option<&str>) -> Self {
        Self::with_secret(StaticSecret::random_from_rng(OsRng), pop)
    }

    pub fn with_secret(secret: StaticSecret, pop: Option<&str>) -> Self {
        let public = PublicKey::from(&secret);
        Self {
            secret,
            public,
            pop: pop.map(str::to_owned),
        }
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    pub fn session_key(&self, device_pubkey: &[u8; 32]) -> [u8; KEY_LEN] {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*device_pubkey));
        derive_key(shared.as_bytes(), self.pop.as_deref().map(str::as_bytes))
    }

    /// Run both handshake rounds on `endpoint` and return the live session
    pub async fn establish<T: GattTransport + ?Sized>(
        &self,
        transport: &T,
        endpoint: Uuid,
    ) -> Result<CipherSession, Error> {
        debug!("security handshake: sending client public key");
        let reply = write_read(transport, endpoint, &self.command0()).await?;
        let (mut session, command1) = self.on_response0(&reply)?;

        debug!("security handshake: sending client verify");
        let reply = write_read(transport, endpoint, &command1).await?;
        self.on_response1(&mut session, &reply)?;

        info!("secure session established");
        Ok(session)
    }

    fn command0(&self) -> Vec<u8> {
        SessionMessage::Command0 {
            client_pubkey: self.public_key().to_vec(),
        }
        .to_bytes()
    }

    fn on_response0(&self, reply: &[u8]) -> Result<(CipherSession, Vec<u8>), CryptoError> {
        let Some(SessionMessage::Response0 {
            status,
            device_pubkey,
            device_random,
        }) = SessionMessage::from_bytes(reply)
        else {
            return Err(CryptoError::handshake("malformed session response 0"));
        };
        if !status.is_success() {
            return Err(CryptoError::handshake(format!("device refused session: {status:?}")));
        }

        let device_pubkey: [u8; 32] = device_pubkey
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::handshake("device public key is not 32 bytes"))?;
        let nonce: [u8; NONCE_LEN] = device_random
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::handshake("device random is not 16 bytes"))?;

        let mut session = CipherSession::new(self.session_key(&device_pubkey), nonce);
        let command1 = SessionMessage::Command1 {
            client_verify_data: session.apply(&device_pubkey),
        };
        Ok((session, command1.to_bytes()))
    }

    fn on_response1(&self, session: &mut CipherSession, reply: &[u8]) -> Result<(), CryptoError> {
        let Some(SessionMessage::Response1 {
            status,
            device_verify_data,
        }) = SessionMessage::from_bytes(reply)
        else {
            return Err(CryptoError::handshake("malformed session response 1"));
        };
        if !status.is_success() {
            return Err(CryptoError::handshake(format!(
                "device rejected verification: {status:?}, check the proof of possession"
            )));
        }

        if session.apply(&device_verify_data) != self.public_key() {
            return Err(CryptoError::handshake("device verification mismatch"));
        }
        Ok(())
    }
}
