use std::{
    env, mem,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use bytes::{Bytes, BytesMut};
use rustls::quic::{HeaderProtectionKey, Keys, PacketKey, PacketKeySet, Secrets};
use thiserror::Error;

use super::{KeyError, KeyPhaseBit};
use crate::{
    error::{Error, ErrorKind},
    frame::FrameType,
};

/// Environment variable overriding the number of packets protected with one
/// key generation before a key update is initiated.
pub const KEY_UPDATE_ENV: &str = "QUIC_KEY_UPDATE_INTERVAL";

/// Packets sealed or opened under one key generation before we update keys.
pub const DEFAULT_KEY_UPDATE_INTERVAL: u64 = 100 * 1000;

/// Old receive keys are kept for this many PTOs after a key update.
const PREVIOUS_KEYS_PTO_FACTOR: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid {KEY_UPDATE_ENV} {value:?}: {source}")]
    InvalidKeyUpdateInterval {
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("{KEY_UPDATE_ENV} is not valid unicode")]
    NotUnicode,
}

/// Parse a key update interval setting, `None` or an empty value select the default.
pub fn parse_key_update_interval(value: Option<&str>) -> Result<u64, ConfigError> {
    match value.map(str::trim) {
        None | Some("") => Ok(DEFAULT_KEY_UPDATE_INTERVAL),
        Some(value) => value
            .parse()
            .map_err(|source| ConfigError::InvalidKeyUpdateInterval {
                value: value.to_owned(),
                source,
            }),
    }
}

/// Read the key update interval from [`KEY_UPDATE_ENV`].
pub fn key_update_interval_from_env() -> Result<u64, ConfigError> {
    match env::var(KEY_UPDATE_ENV) {
        Ok(value) => parse_key_update_interval(Some(&value)),
        Err(env::VarError::NotPresent) => parse_key_update_interval(None),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::NotUnicode),
    }
}

/// Source of the current probe timeout, which bounds how long the keys of the
/// previous key phase stay around.
pub trait ProbeTimeout: Send + Sync {
    fn pto(&self) -> Duration;
}

/// Derives the packet keys of the next key generation.
pub trait KeyRatchet: Send {
    fn next_packet_keys(&mut self) -> PacketKeySet;
}

impl KeyRatchet for Secrets {
    fn next_packet_keys(&mut self) -> PacketKeySet {
        Secrets::next_packet_keys(self)
    }
}

/// Header protection keys of both directions. They never change during key updates.
pub struct HeaderProtectionKeys {
    local: Box<dyn HeaderProtectionKey>,
    remote: Box<dyn HeaderProtectionKey>,
}

impl HeaderProtectionKeys {
    pub fn new(local: Box<dyn HeaderProtectionKey>, remote: Box<dyn HeaderProtectionKey>) -> Self {
        Self { local, remote }
    }

    /// Mask the low bits of the first byte and the packet number bytes of an
    /// outgoing packet. The top 3 bits of the first byte stay readable.
    pub fn seal_header(
        &self,
        sample: &[u8],
        first_byte: &mut u8,
        pn_bytes: &mut [u8],
    ) -> Result<(), KeyError> {
        let sample = take_sample(self.local.as_ref(), sample)?;
        self.local
            .encrypt_in_place(sample, first_byte, pn_bytes)
            .map_err(|_| KeyError::HeaderProtectionFailure)
    }

    /// Remove the header protection of an incoming packet.
    pub fn unseal_header(
        &self,
        sample: &[u8],
        first_byte: &mut u8,
        pn_bytes: &mut [u8],
    ) -> Result<(), KeyError> {
        let sample = take_sample(self.remote.as_ref(), sample)?;
        self.remote
            .decrypt_in_place(sample, first_byte, pn_bytes)
            .map_err(|_| KeyError::HeaderProtectionFailure)
    }
}

fn take_sample<'s>(key: &dyn HeaderProtectionKey, sample: &'s [u8]) -> Result<&'s [u8], KeyError> {
    sample
        .get(..key.sample_len())
        .ok_or(KeyError::UnderSampling(sample.len()))
}

/// 1-RTT packet keys and the key update state machine.
///
/// The key phase starts at 0. An update may be initiated once a packet sent
/// with the current keys has been acknowledged and the current keys have
/// protected [`DEFAULT_KEY_UPDATE_INTERVAL`] packets (or the configured interval)
/// in either direction. The peer updating keys is detected by a flipped key
/// phase bit that opens with the next generation's keys.
///
/// See [section-6](https://www.rfc-editor.org/rfc/rfc9001.html#section-6)
/// of [QUIC-TLS](https://www.rfc-editor.org/rfc/rfc9001.html).
pub struct OneRttPacketKeys {
    generation: u64,
    ratchet: Box<dyn KeyRatchet>,
    local: Box<dyn PacketKey>,
    remote: Box<dyn PacketKey>,
    next: PacketKeySet,
    prev_remote: Option<Box<dyn PacketKey>>,
    prev_remote_expiry: Option<Instant>,

    largest_acked: Option<u64>,
    first_sent_with_current: Option<u64>,
    first_rcvd_with_current: Option<u64>,
    num_sent_with_current: u64,
    num_rcvd_with_current: u64,
    invalid_packets: u64,

    key_update_interval: u64,
    pto: Arc<dyn ProbeTimeout>,
}

impl OneRttPacketKeys {
    pub fn new(
        keys: PacketKeySet,
        ratchet: impl KeyRatchet + 'static,
        pto: Arc<dyn ProbeTimeout>,
        key_update_interval: u64,
    ) -> Self {
        let mut ratchet: Box<dyn KeyRatchet> = Box::new(ratchet);
        let next = ratchet.next_packet_keys();
        Self {
            generation: 0,
            ratchet,
            local: keys.local,
            remote: keys.remote,
            next,
            prev_remote: None,
            prev_remote_expiry: None,
            largest_acked: None,
            first_sent_with_current: None,
            first_rcvd_with_current: None,
            num_sent_with_current: 0,
            num_rcvd_with_current: 0,
            invalid_packets: 0,
            key_update_interval,
            pto,
        }
    }

    fn current_phase(&self) -> KeyPhaseBit {
        KeyPhaseBit::from(self.generation)
    }

    fn roll_keys(&mut self) {
        self.generation += 1;
        self.first_sent_with_current = None;
        self.first_rcvd_with_current = None;
        self.num_sent_with_current = 0;
        self.num_rcvd_with_current = 0;

        let next = mem::replace(&mut self.next, self.ratchet.next_packet_keys());
        self.local = next.local;
        self.prev_remote = Some(mem::replace(&mut self.remote, next.remote));
        self.prev_remote_expiry = None;
    }

    fn drop_expired_keys(&mut self, now: Instant) {
        if self.prev_remote_expiry.is_some_and(|expiry| now > expiry) {
            let phase = !self.current_phase();
            tracing::debug!(%phase, "Dropping keys of the previous key phase");
            self.prev_remote = None;
            self.prev_remote_expiry = None;
        }
    }

    fn previous_keys_expiry(&self, now: Instant) -> Instant {
        now + self.pto.pto() * PREVIOUS_KEYS_PTO_FACTOR
    }

    /// Encrypt a packet payload with the current keys, the returned bytes
    /// carry the AEAD tag at the end.
    pub fn seal(&mut self, pn: u64, plaintext: &[u8], associated_data: &[u8]) -> Result<Bytes, Error> {
        self.first_sent_with_current.get_or_insert(pn);
        self.num_sent_with_current += 1;

        let mut buf = BytesMut::with_capacity(plaintext.len() + self.local.tag_len());
        buf.extend_from_slice(plaintext);
        let tag = self
            .local
            .encrypt_in_place(pn, associated_data, &mut buf)
            .map_err(|e| {
                Error::new(
                    ErrorKind::Internal,
                    FrameType::Padding,
                    format!("failed to seal packet {pn}: {e}"),
                )
            })?;
        buf.extend_from_slice(tag.as_ref());
        Ok(buf.freeze())
    }

    /// Decrypt a packet payload protected with the key phase `key_phase`.
    ///
    /// A packet with the next key phase that decrypts commits the peer's key
    /// update. Packets of the previous phase are opened with the old keys until
    /// 3 PTOs after the update, [`KeyError::KeysDropped`] afterwards.
    pub fn open(
        &mut self,
        now: Instant,
        pn: u64,
        ciphertext: &[u8],
        key_phase: KeyPhaseBit,
        associated_data: &[u8],
    ) -> Result<Bytes, KeyError> {
        self.drop_expired_keys(now);

        if key_phase != self.current_phase() {
            if self.first_rcvd_with_current.is_none_or(|first| pn < first) {
                if self.generation == 0 {
                    // keys may only be updated after the handshake is confirmed
                    return Err(
                        Error::protocol_violation(FrameType::Padding, "wrong initial keyphase").into(),
                    );
                }
                // the peer has not switched to the keys we updated to yet, or the packet was reordered
                let Some(prev_remote) = self.prev_remote.as_deref() else {
                    return Err(KeyError::KeysDropped);
                };
                return decrypt(prev_remote, pn, ciphertext, associated_data)
                    .inspect_err(|_| self.invalid_packets += 1);
            }

            let plaintext = decrypt(self.next.remote.as_ref(), pn, ciphertext, associated_data)
                .or_else(|e| self.on_decryption_failed(e))?;
            if self.first_sent_with_current.is_none() {
                return Err(
                    Error::protocol_violation(FrameType::Padding, "keys updated too quickly").into(),
                );
            }
            self.roll_keys();
            self.prev_remote_expiry = Some(self.previous_keys_expiry(now));
            self.first_rcvd_with_current = Some(pn);
            tracing::debug!(phase = %self.current_phase(), pn, "Peer updated keys");
            return Ok(plaintext);
        }

        let plaintext = decrypt(self.remote.as_ref(), pn, ciphertext, associated_data)
            .or_else(|e| self.on_decryption_failed(e))?;
        self.num_rcvd_with_current += 1;
        if self.first_rcvd_with_current.is_none() {
            // the first packet under keys we updated to proves the peer has them too
            if self.generation > 0 {
                tracing::debug!(phase = %self.current_phase(), pn, "Peer confirmed key update");
                self.prev_remote_expiry = Some(self.previous_keys_expiry(now));
            }
            self.first_rcvd_with_current = Some(pn);
        }
        Ok(plaintext)
    }

    fn on_decryption_failed(&mut self, error: KeyError) -> Result<Bytes, KeyError> {
        self.invalid_packets += 1;
        if self.invalid_packets > self.remote.integrity_limit() {
            return Err(Error::new(
                ErrorKind::AeadLimitReached,
                FrameType::Padding,
                "integrity limit of the AEAD reached",
            )
            .into());
        }
        Err(error)
    }

    /// Feed the largest packet number the peer acknowledged in the 1-RTT space.
    pub fn set_largest_acked(&mut self, pn: u64) {
        self.largest_acked = Some(self.largest_acked.map_or(pn, |largest| largest.max(pn)));
    }

    fn update_allowed(&self) -> bool {
        match (self.first_sent_with_current, self.largest_acked) {
            (Some(first_sent), Some(largest_acked)) => largest_acked >= first_sent,
            _ => false,
        }
    }

    fn should_initiate_key_update(&self) -> bool {
        self.update_allowed()
            && (self.num_rcvd_with_current >= self.key_update_interval
                || self.num_sent_with_current >= self.key_update_interval)
    }

    /// The key phase to mark the next outgoing packet with, initiating a key
    /// update first if one is due.
    pub fn key_phase(&mut self) -> KeyPhaseBit {
        if self.should_initiate_key_update() {
            let phase = !self.current_phase();
            tracing::debug!(
                sent = self.num_sent_with_current,
                received = self.num_rcvd_with_current,
                %phase,
                "Initiating key update"
            );
            self.roll_keys();
        }
        self.current_phase()
    }

    /// Number of key updates so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

fn decrypt(
    key: &dyn PacketKey,
    pn: u64,
    ciphertext: &[u8],
    associated_data: &[u8],
) -> Result<Bytes, KeyError> {
    let mut buf = BytesMut::from(ciphertext);
    let len = key
        .decrypt_in_place(pn, associated_data, &mut buf)
        .map_err(|_| KeyError::DecryptionFailed)?
        .len();
    buf.truncate(len);
    Ok(buf.freeze())
}

/// Shared 1-RTT keys.
///
/// Seal, open and key updates are serialized by one lock, so a packet is
/// always handled with a consistent key generation.
#[derive(Clone)]
pub struct ArcOneRttKeys {
    hpk: Arc<HeaderProtectionKeys>,
    pk: Arc<Mutex<OneRttPacketKeys>>,
}

impl ArcOneRttKeys {
    pub fn new(
        keys: Keys,
        next: impl KeyRatchet + 'static,
        pto: Arc<dyn ProbeTimeout>,
        key_update_interval: u64,
    ) -> Self {
        let hpk = HeaderProtectionKeys::new(keys.local.header, keys.remote.header);
        let packet_keys = PacketKeySet {
            local: keys.local.packet,
            remote: keys.remote.packet,
        };
        Self {
            hpk: Arc::new(hpk),
            pk: Arc::new(Mutex::new(OneRttPacketKeys::new(
                packet_keys,
                next,
                pto,
                key_update_interval,
            ))),
        }
    }

    /// Like [`ArcOneRttKeys::new`], with the interval read from [`KEY_UPDATE_ENV`].
    pub fn with_env_interval(
        keys: Keys,
        next: impl KeyRatchet + 'static,
        pto: Arc<dyn ProbeTimeout>,
    ) -> Result<Self, ConfigError> {
        let interval = key_update_interval_from_env()?;
        Ok(Self::new(keys, next, pto, interval))
    }

    pub fn header_protection(&self) -> &HeaderProtectionKeys {
        &self.hpk
    }

    pub fn seal(&self, pn: u64, plaintext: &[u8], associated_data: &[u8]) -> Result<Bytes, Error> {
        self.pk.lock().unwrap().seal(pn, plaintext, associated_data)
    }

    pub fn open(
        &self,
        now: Instant,
        pn: u64,
        ciphertext: &[u8],
        key_phase: KeyPhaseBit,
        associated_data: &[u8],
    ) -> Result<Bytes, KeyError> {
        self.pk
            .lock()
            .unwrap()
            .open(now, pn, ciphertext, key_phase, associated_data)
    }

    pub fn set_largest_acked(&self, pn: u64) {
        self.pk.lock().unwrap().set_largest_acked(pn);
    }

    pub fn key_phase(&self) -> KeyPhaseBit {
        self.pk.lock().unwrap().key_phase()
    }

    pub fn generation(&self) -> u64 {
        self.pk.lock().unwrap().generation()
    }
}
