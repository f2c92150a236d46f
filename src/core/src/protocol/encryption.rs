//! Login-time key exchange and the AES/CFB8 stream cipher.
//!
//! The server sends its RSA public key (X.509 DER) and a verify token; the
//! client answers with a random 16-byte shared secret and the token, both
//! encrypted with that key. From then on every byte in both directions goes
//! through AES-128 in CFB8 mode, keyed and IV'd with the shared secret.

use openssl::rand::rand_bytes;
use openssl::rsa::{Padding, Rsa};
use openssl::sha::Sha1;
use openssl::symm::{Cipher, Crypter, Mode};

use super::codec::{PacketBuilder, PacketReader};
use super::types::{v340, Packet};
use crate::error_handling::types::TransportError;

pub const SHARED_SECRET_LEN: usize = 16;
pub const VERIFY_TOKEN_LEN: usize = 4;
const RSA_BITS: u32 = 1024;

/// One direction of an encrypted connection.
pub struct Cfb8Stream {
    crypter: Crypter,
    scratch: Vec<u8>,
}

impl Cfb8Stream {
    pub fn encryptor(secret: &[u8]) -> Result<Self, TransportError> {
        Self::new(Mode::Encrypt, secret)
    }

    pub fn decryptor(secret: &[u8]) -> Result<Self, TransportError> {
        Self::new(Mode::Decrypt, secret)
    }

    fn new(mode: Mode, secret: &[u8]) -> Result<Self, TransportError> {
        if secret.len() != SHARED_SECRET_LEN {
            return Err(TransportError::Encryption(format!(
                "shared secret is {} byte(s), expected {}",
                secret.len(),
                SHARED_SECRET_LEN
            )));
        }
        let crypter = Crypter::new(Cipher::aes_128_cfb8(), mode, secret, Some(secret))?;
        Ok(Self {
            crypter,
            scratch: Vec::new(),
        })
    }

    /// Transforms `data` in place, continuing the stream where the last call stopped.
    pub fn apply(&mut self, data: &mut [u8]) -> Result<(), TransportError> {
        if data.is_empty() {
            return Ok(());
        }
        self.scratch.resize(data.len() + SHARED_SECRET_LEN, 0);
        let written = self.crypter.update(data, &mut self.scratch)?;
        if written != data.len() {
            return Err(TransportError::Encryption(format!(
                "cipher produced {} byte(s) for {}",
                written,
                data.len()
            )));
        }
        data.copy_from_slice(&self.scratch[..written]);
        Ok(())
    }
}

/// The hex digest both ends send to the session server.
///
/// SHA-1 over server id, shared secret and public key, printed as a signed
/// big-endian number: negative digests get a leading `-` and leading zeros are
/// dropped.
pub fn server_hash(server_id: &str, shared_secret: &[u8], public_key: &[u8]) -> String {
    let mut sha = Sha1::new();
    sha.update(server_id.as_bytes());
    sha.update(shared_secret);
    sha.update(public_key);
    let mut digest = sha.finish();

    let negative = digest[0] & 0x80 != 0;
    if negative {
        // two's complement
        let mut carry = true;
        for byte in digest.iter_mut().rev() {
            *byte = !*byte;
            if carry {
                let (sum, overflow) = byte.overflowing_add(1);
                *byte = sum;
                carry = overflow;
            }
        }
    }

    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    let trimmed = hex.trim_start_matches('0');
    format!("{}{}", if negative { "-" } else { "" }, trimmed)
}

pub fn random_bytes<const N: usize>() -> Result<[u8; N], TransportError> {
    let mut buf = [0u8; N];
    rand_bytes(&mut buf)?;
    Ok(buf)
}

/// Encrypts `data` for the holder of the DER-encoded public key.
pub fn encrypt_for(public_key: &[u8], data: &[u8]) -> Result<Vec<u8>, TransportError> {
    let rsa = Rsa::public_key_from_der(public_key)?;
    let mut out = vec![0u8; rsa.size() as usize];
    let len = rsa.public_encrypt(data, &mut out, Padding::PKCS1)?;
    out.truncate(len);
    Ok(out)
}

/// Server-side RSA key pair, generated once per process.
pub struct ServerKeyPair {
    rsa: Rsa<openssl::pkey::Private>,
    public_der: Vec<u8>,
}

impl ServerKeyPair {
    pub fn generate() -> Result<Self, TransportError> {
        let rsa = Rsa::generate(RSA_BITS)?;
        let public_der = rsa.public_key_to_der()?;
        Ok(Self { rsa, public_der })
    }

    pub fn public_der(&self) -> &[u8] {
        &self.public_der
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, TransportError> {
        let mut out = vec![0u8; self.rsa.size() as usize];
        let len = self.rsa.private_decrypt(data, &mut out, Padding::PKCS1)?;
        out.truncate(len);
        Ok(out)
    }
}

/// Clientbound login 0x01.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionRequest {
    pub server_id: String,
    pub public_key: Vec<u8>,
    pub verify_token: Vec<u8>,
}

impl EncryptionRequest {
    pub fn parse(packet: &Packet) -> Result<Self, TransportError> {
        let mut reader = PacketReader::new(packet);
        Ok(Self {
            server_id: reader.read_string()?,
            public_key: reader.read_byte_array()?,
            verify_token: reader.read_byte_array()?,
        })
    }

    pub fn to_packet(&self) -> Packet {
        PacketBuilder::new(v340::login::ENCRYPTION_REQUEST)
            .write_string(&self.server_id)
            .write_byte_array(&self.public_key)
            .write_byte_array(&self.verify_token)
            .build()
    }
}

/// Serverbound login 0x01; both fields RSA-encrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionResponse {
    pub shared_secret: Vec<u8>,
    pub verify_token: Vec<u8>,
}

impl EncryptionResponse {
    pub fn parse(packet: &Packet) -> Result<Self, TransportError> {
        let mut reader = PacketReader::new(packet);
        Ok(Self {
            shared_secret: reader.read_byte_array()?,
            verify_token: reader.read_byte_array()?,
        })
    }

    pub fn to_packet(&self) -> Packet {
        PacketBuilder::new(v340::login::ENCRYPTION_RESPONSE)
            .write_byte_array(&self.shared_secret)
            .write_byte_array(&self.verify_token)
            .build()
    }
}
