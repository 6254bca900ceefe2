// Voice packet encryption (XSalsa20-Poly1305 secretbox).

use crypto_secretbox::aead::generic_array::GenericArray;
use crypto_secretbox::aead::{AeadInPlace, KeyInit};
use crypto_secretbox::XSalsa20Poly1305;

use crate::packet::{RtpHeader, RTP_HEADER_SIZE};
use crate::CryptoError;

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 24;
pub const TAG_SIZE: usize = 16;
const LITE_NONCE_SIZE: usize = 4;

/// How the per-packet nonce is derived and where it travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncryptionMode {
    /// Nonce is the RTP header zero-padded to 24 bytes; nothing appended.
    Normal,
    /// Random 24-byte nonce appended to the packet.
    Suffix,
    /// Incrementing 4-byte counter, zero-padded, with the 4 bytes appended.
    Lite,
}

impl EncryptionMode {
    /// Preferred first.
    pub const SUPPORTED: [EncryptionMode; 3] = [Self::Normal, Self::Suffix, Self::Lite];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "xsalsa20_poly1305",
            Self::Suffix => "xsalsa20_poly1305_suffix",
            Self::Lite => "xsalsa20_poly1305_lite",
        }
    }

    /// Pick the most preferred mode the server offers.
    pub fn select<S: AsRef<str>>(offered: &[S]) -> Option<Self> {
        Self::SUPPORTED
            .into_iter()
            .find(|mode| offered.iter().any(|o| o.as_ref() == mode.as_str()))
    }
}

impl std::str::FromStr for EncryptionMode {
    type Err = CryptoError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::SUPPORTED
            .into_iter()
            .find(|m| m.as_str() == name)
            .ok_or_else(|| CryptoError::UnknownMode(name.to_string()))
    }
}

impl std::fmt::Display for EncryptionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Seals audio payloads for one voice session. Built from the session
/// description's secret key and discarded when the session reconnects.
pub struct EncryptionContext {
    cipher: XSalsa20Poly1305,
    mode: EncryptionMode,
    lite_counter: u32,
}

impl EncryptionContext {
    pub fn new(mode: EncryptionMode, secret_key: &[u8]) -> Result<Self, CryptoError> {
        if secret_key.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength(secret_key.len()));
        }
        let cipher = XSalsa20Poly1305::new_from_slice(secret_key)
            .map_err(|_| CryptoError::InvalidKeyLength(secret_key.len()))?;
        Ok(Self {
            cipher,
            mode,
            lite_counter: 0,
        })
    }

    pub fn mode(&self) -> EncryptionMode {
        self.mode
    }

    /// Build a complete datagram: header, tag and ciphertext, plus the nonce
    /// suffix the mode requires.
    pub fn seal(&mut self, header: &RtpHeader, payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let header_bytes = header.to_bytes();
        let mut nonce = [0u8; NONCE_SIZE];
        let suffix: &[u8] = match self.mode {
            EncryptionMode::Normal => {
                nonce[..RTP_HEADER_SIZE].copy_from_slice(&header_bytes);
                &[]
            }
            EncryptionMode::Suffix => {
                rand::Rng::fill(&mut rand::thread_rng(), &mut nonce[..]);
                &nonce
            }
            EncryptionMode::Lite => {
                nonce[..LITE_NONCE_SIZE].copy_from_slice(&self.lite_counter.to_be_bytes());
                self.lite_counter = self.lite_counter.wrapping_add(1);
                &nonce[..LITE_NONCE_SIZE]
            }
        };

        let mut body = payload.to_vec();
        let tag = self
            .cipher
            .encrypt_in_place_detached(GenericArray::from_slice(&nonce), b"", &mut body)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut packet =
            Vec::with_capacity(RTP_HEADER_SIZE + TAG_SIZE + body.len() + suffix.len());
        packet.extend_from_slice(&header_bytes);
        packet.extend_from_slice(&tag);
        packet.extend_from_slice(&body);
        packet.extend_from_slice(suffix);
        Ok(packet)
    }

    /// Inverse of [`seal`](Self::seal): returns the header and plaintext.
    pub fn open(&self, packet: &[u8]) -> Result<(RtpHeader, Vec<u8>), CryptoError> {
        let suffix_len = match self.mode {
            EncryptionMode::Normal => 0,
            EncryptionMode::Suffix => NONCE_SIZE,
            EncryptionMode::Lite => LITE_NONCE_SIZE,
        };
        if packet.len() < RTP_HEADER_SIZE + TAG_SIZE + suffix_len {
            return Err(CryptoError::PacketTooShort(packet.len()));
        }
        let header =
            RtpHeader::decode(packet).ok_or(CryptoError::PacketTooShort(packet.len()))?;

        let (sealed, suffix) = packet.split_at(packet.len() - suffix_len);
        let mut nonce = [0u8; NONCE_SIZE];
        match self.mode {
            EncryptionMode::Normal => nonce[..RTP_HEADER_SIZE].copy_from_slice(&sealed[..RTP_HEADER_SIZE]),
            EncryptionMode::Suffix | EncryptionMode::Lite => nonce[..suffix_len].copy_from_slice(suffix),
        }

        let tag = GenericArray::clone_from_slice(&sealed[RTP_HEADER_SIZE..RTP_HEADER_SIZE + TAG_SIZE]);
        let mut body = sealed[RTP_HEADER_SIZE + TAG_SIZE..].to_vec();
        self.cipher
            .decrypt_in_place_detached(GenericArray::from_slice(&nonce), b"", &mut body, &tag)
            .map_err(|_| CryptoError::DecryptionFailed)?;
        Ok((header, body))
    }
}

impl std::fmt::Debug for EncryptionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionContext")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}
