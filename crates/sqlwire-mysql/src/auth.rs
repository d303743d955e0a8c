//! MySQL authentication implementations.
//!
//! This module implements the MySQL authentication plugins:
//! - `mysql_native_password`: SHA1-based (legacy, MySQL < 8.0 default)
//! - `caching_sha2_password`: SHA256-based (MySQL 8.0+ default)
//! - `sha256_password`: RSA-encrypted password
//!
//! # mysql_native_password
//!
//! Password scramble algorithm:
//! ```text
//! SHA1(password) XOR SHA1(seed + SHA1(SHA1(password)))
//! ```
//!
//! # caching_sha2_password
//!
//! Fast auth (if cached on server):
//! ```text
//! XOR(SHA256(password), SHA256(SHA256(SHA256(password)) + seed))
//! ```
//!
//! Full auth runs over the RSA public key exchange, since this client
//! never speaks TLS.

use sha1::Sha1;
use sha2::{Digest, Sha256};

use rand::rngs::OsRng;

use rsa::RsaPublicKey;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;

use sqlwire_core::error::{ConnectionError, ConnectionErrorKind};
use sqlwire_core::{Error, Result};

/// Well-known authentication plugin names.
pub mod plugins {
    /// SHA1-based authentication (legacy default)
    pub const MYSQL_NATIVE_PASSWORD: &str = "mysql_native_password";
    /// SHA256-based authentication (MySQL 8.0+ default)
    pub const CACHING_SHA2_PASSWORD: &str = "caching_sha2_password";
    /// RSA-based SHA256 authentication
    pub const SHA256_PASSWORD: &str = "sha256_password";
    /// MySQL clear password
    pub const MYSQL_CLEAR_PASSWORD: &str = "mysql_clear_password";
}

/// Response codes for caching_sha2_password protocol.
pub mod caching_sha2 {
    /// Prefix of an "auth more data" packet
    pub const MORE_DATA: u8 = 0x01;
    /// Request for public key (client should send 0x02)
    pub const REQUEST_PUBLIC_KEY: u8 = 0x02;
    /// Fast auth success
    pub const FAST_AUTH_SUCCESS: u8 = 0x03;
    /// Full auth needed (switch to secure channel or RSA)
    pub const PERFORM_FULL_AUTH: u8 = 0x04;
}

/// `sha256_password` asks for the public key with this byte.
pub const SHA256_REQUEST_PUBLIC_KEY: u8 = 0x01;

/// Supported authentication plugins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPlugin {
    NativePassword,
    CachingSha2Password,
    Sha256Password,
    ClearPassword,
}

impl AuthPlugin {
    /// Look up a plugin by the name the server announces.
    ///
    /// An empty name (pre-plugin servers) means `mysql_native_password`.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "" | plugins::MYSQL_NATIVE_PASSWORD => Ok(AuthPlugin::NativePassword),
            plugins::CACHING_SHA2_PASSWORD => Ok(AuthPlugin::CachingSha2Password),
            plugins::SHA256_PASSWORD => Ok(AuthPlugin::Sha256Password),
            plugins::MYSQL_CLEAR_PASSWORD => Ok(AuthPlugin::ClearPassword),
            other => Err(auth_error(format!(
                "Unsupported authentication plugin: {}",
                other
            ))),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            AuthPlugin::NativePassword => plugins::MYSQL_NATIVE_PASSWORD,
            AuthPlugin::CachingSha2Password => plugins::CACHING_SHA2_PASSWORD,
            AuthPlugin::Sha256Password => plugins::SHA256_PASSWORD,
            AuthPlugin::ClearPassword => plugins::MYSQL_CLEAR_PASSWORD,
        }
    }

    /// First-round response for this plugin.
    ///
    /// `sha256_password` cannot answer without the server's public key, so
    /// its first round asks for it (an empty password is sent as a lone NUL).
    pub fn initial_response(self, password: &str, seed: &[u8]) -> Vec<u8> {
        match self {
            AuthPlugin::NativePassword => mysql_native_password(password, seed),
            AuthPlugin::CachingSha2Password => caching_sha2_password(password, seed),
            AuthPlugin::Sha256Password if password.is_empty() => vec![0],
            AuthPlugin::Sha256Password => vec![SHA256_REQUEST_PUBLIC_KEY],
            AuthPlugin::ClearPassword => {
                let mut result = password.as_bytes().to_vec();
                result.push(0);
                result
            }
        }
    }
}

pub(crate) fn auth_error(message: impl Into<String>) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Authentication,
        message: message.into(),
        source: None,
    })
}

/// Compute mysql_native_password authentication response.
///
/// Algorithm: `SHA1(password) XOR SHA1(seed + SHA1(SHA1(password)))`
///
/// Returns the 20-byte response, or an empty vec for an empty password.
pub fn mysql_native_password(password: &str, auth_data: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return vec![];
    }

    // Only the first 20 bytes of the scramble take part
    let seed = if auth_data.len() > 20 {
        &auth_data[..20]
    } else {
        auth_data
    };

    // Stage 1: SHA1(password)
    let stage1: [u8; 20] = Sha1::digest(password.as_bytes()).into();

    // Stage 2: SHA1(SHA1(password))
    let stage2: [u8; 20] = Sha1::digest(stage1).into();

    // Stage 3: SHA1(seed + stage2)
    let mut hasher = Sha1::new();
    hasher.update(seed);
    hasher.update(stage2);
    let stage3: [u8; 20] = hasher.finalize().into();

    stage1
        .iter()
        .zip(stage3.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

/// Compute caching_sha2_password fast authentication response.
///
/// Algorithm: `XOR(SHA256(password), SHA256(SHA256(SHA256(password)) + seed))`
///
/// Returns the 32-byte response, or an empty vec for an empty password.
pub fn caching_sha2_password(password: &str, auth_data: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return vec![];
    }

    // MySQL sends a 20-byte scramble + NUL
    let seed = if auth_data.len() == 21 && auth_data.last() == Some(&0) {
        &auth_data[..20]
    } else {
        auth_data
    };

    let password_hash: [u8; 32] = Sha256::digest(password.as_bytes()).into();
    let password_hash_hash: [u8; 32] = Sha256::digest(password_hash).into();

    let mut hasher = Sha256::new();
    hasher.update(password_hash_hash);
    hasher.update(seed);
    let scramble: [u8; 32] = hasher.finalize().into();

    password_hash
        .iter()
        .zip(scramble.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

/// XOR the NUL-terminated password with the rotating seed.
pub fn xor_password_with_seed(password: &str, seed: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(password.len() + 1);
    for (i, byte) in password.bytes().chain(std::iter::once(0)).enumerate() {
        let seed_byte = seed.get(i % seed.len().max(1)).copied().unwrap_or(0);
        result.push(byte ^ seed_byte);
    }
    result
}

/// Encrypt the password with the server's RSA public key.
///
/// MySQL expects `RSA_OAEP_encrypt(password_with_nul XOR seed_rotation)`.
/// The key arrives as PEM, either SPKI or PKCS#1.
pub fn sha256_password_rsa(
    password: &str,
    seed: &[u8],
    public_key_pem: &[u8],
) -> Result<Vec<u8>> {
    if seed.is_empty() {
        return Err(auth_error("Authentication seed is empty"));
    }
    let scrambled = xor_password_with_seed(password, seed);

    let pem = std::str::from_utf8(public_key_pem)
        .map_err(|e| auth_error(format!("Public key is not valid UTF-8 PEM: {e}")))?;

    let pub_key = RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| auth_error(format!("Failed to parse RSA public key PEM: {e}")))?;

    pub_key
        .encrypt(&mut OsRng, rsa::Oaep::new::<Sha1>(), &scrambled)
        .map_err(|e| auth_error(format!("RSA OAEP encryption failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::RsaPrivateKey;
    use rsa::pkcs8::{EncodePublicKey, LineEnding};

    fn fixed_salt() -> Vec<u8> {
        (1..=20).collect()
    }

    #[test]
    fn test_mysql_native_password_vector() {
        let expected: [u8; 20] = [
            0x37, 0x99, 0x01, 0x52, 0xfa, 0x5b, 0x70, 0xc7, 0xb6, 0x8c, 0x2e, 0xc7, 0xf8, 0xdf,
            0xf3, 0xa9, 0x43, 0xcc, 0xfe, 0x75,
        ];
        assert_eq!(mysql_native_password("test", &fixed_salt()), expected);
    }

    #[test]
    fn test_mysql_native_password_ignores_trailing_seed_bytes() {
        let mut seed = fixed_salt();
        seed.push(0);
        assert_eq!(
            mysql_native_password("test", &seed),
            mysql_native_password("test", &fixed_salt())
        );
    }

    #[test]
    fn test_empty_passwords() {
        assert!(mysql_native_password("", &[0; 20]).is_empty());
        assert!(caching_sha2_password("", &[0; 20]).is_empty());
    }

    #[test]
    fn test_caching_sha2_password_vector() {
        let expected: [u8; 32] = [
            0x57, 0xd5, 0x0e, 0x6c, 0x81, 0xb9, 0x4e, 0x99, 0x7b, 0x33, 0x6b, 0xdb, 0xd2, 0x50,
            0xfa, 0x35, 0x90, 0x06, 0xa4, 0x6e, 0xbc, 0x1a, 0xcb, 0xf3, 0xbd, 0xb2, 0xce, 0x17,
            0x18, 0xde, 0x1e, 0xf8,
        ];
        assert_eq!(caching_sha2_password("test", &fixed_salt()), expected);

        let mut seed = fixed_salt();
        seed.push(0);
        assert_eq!(caching_sha2_password("test", &seed), expected);
    }

    #[test]
    fn test_xor_password_with_seed() {
        let seed = [1, 2, 3, 4, 5, 6, 7, 8];
        let result = xor_password_with_seed("test", &seed);
        assert_eq!(result.len(), 5);
        // NUL terminator XOR seed byte
        assert_eq!(result[4], 5);
        let recovered: Vec<u8> = result[..4]
            .iter()
            .enumerate()
            .map(|(i, &b)| b ^ seed[i % seed.len()])
            .collect();
        assert_eq!(recovered, b"test");
    }

    #[test]
    fn test_rsa_password_roundtrip() {
        let private_key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let pem = private_key
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();
        let seed = fixed_salt();

        let encrypted = sha256_password_rsa("secret", &seed, pem.as_bytes()).unwrap();
        let decrypted = private_key
            .decrypt(rsa::Oaep::new::<Sha1>(), &encrypted)
            .unwrap();
        assert_eq!(decrypted, xor_password_with_seed("secret", &seed));
    }

    #[test]
    fn test_rsa_rejects_garbage_key() {
        let err = sha256_password_rsa("secret", &fixed_salt(), b"not a key").unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }

    #[test]
    fn test_plugin_lookup() {
        assert_eq!(
            AuthPlugin::from_name("caching_sha2_password").unwrap(),
            AuthPlugin::CachingSha2Password
        );
        assert_eq!(AuthPlugin::from_name("").unwrap(), AuthPlugin::NativePassword);
        assert!(AuthPlugin::from_name("authentication_ldap_sasl").is_err());
        assert_eq!(
            AuthPlugin::ClearPassword.initial_response("pw", &[]),
            b"pw\0".to_vec()
        );
        assert_eq!(
            AuthPlugin::Sha256Password.initial_response("pw", &[]),
            vec![0x01]
        );
    }
}
