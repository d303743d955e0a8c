//! Connection phase packets: the server greeting, the client login
//! response and auth switch requests.

#![allow(clippy::cast_possible_truncation)]

use sqlwire_core::{ByteCursor, Error, Result};

use super::capabilities;
use super::codec::WireCodec;
use super::payload_cursor;
use crate::auth::{AuthPlugin, plugins};
use crate::config::MySqlConfig;

/// Parsed Handshake V10 greeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeInfo {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    /// Server capability flags (both halves combined)
    pub capabilities: u32,
    /// Server default collation
    pub charset: u8,
    pub status_flags: u16,
    /// Plugin the server expects for the first auth round
    pub auth_plugin: String,
    /// Scramble (both parts, trailing NUL removed)
    pub auth_data: Vec<u8>,
}

impl HandshakeInfo {
    /// Parse the initial handshake packet.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut cursor = payload_cursor(payload);

        let protocol_version = cursor.read_u8()?;
        if protocol_version != 10 {
            return Err(Error::protocol_with_data(
                format!("Unsupported protocol version: {}", protocol_version),
                payload,
            ));
        }

        let server_version = String::from_utf8_lossy(cursor.read_bytes_nul()?).into_owned();
        let connection_id = cursor.read_u32_le()?;
        let mut auth_data = cursor.read(8)?.to_vec();
        cursor.skip(1)?;
        let caps_lower = cursor.read_u16_le()?;

        // Everything after the lower capability flags is optional
        if cursor.is_exhausted() {
            return Ok(Self {
                protocol_version,
                server_version,
                connection_id,
                capabilities: u32::from(caps_lower),
                charset: 0,
                status_flags: 0,
                auth_plugin: String::new(),
                auth_data,
            });
        }

        let charset = cursor.read_u8()?;
        let status_flags = cursor.read_u16_le()?;
        let caps_upper = cursor.read_u16_le()?;
        let server_caps = u32::from(caps_lower) | (u32::from(caps_upper) << 16);

        let auth_data_len = usize::from(cursor.read_u8()?);
        cursor.skip(10)?;

        if server_caps & capabilities::CLIENT_SECURE_CONNECTION != 0 {
            let len2 = auth_data_len.saturating_sub(8).max(13);
            let available = cursor.remaining().min(len2);
            let part2 = cursor.read(available)?;
            let part2 = part2.strip_suffix(&[0]).unwrap_or(part2);
            auth_data.extend_from_slice(part2);
        }

        let auth_plugin = if server_caps & capabilities::CLIENT_PLUGIN_AUTH != 0 {
            // Some servers omit the terminator on the plugin name
            let rest = cursor.read_rest();
            let name = rest.split(|&b| b == 0).next().unwrap_or(rest);
            String::from_utf8_lossy(name).into_owned()
        } else {
            String::new()
        };

        Ok(Self {
            protocol_version,
            server_version,
            connection_id,
            capabilities: server_caps,
            charset,
            status_flags,
            auth_plugin,
            auth_data,
        })
    }

    /// The plugin announced by the server, defaulting to native password.
    pub fn plugin(&self) -> Result<AuthPlugin> {
        AuthPlugin::from_name(&self.auth_plugin)
    }

    /// Flags actually in effect: what the client asks for and the server offers.
    pub fn negotiated_capabilities(&self, config: &MySqlConfig) -> u32 {
        config.capability_flags() & self.capabilities
    }
}

/// Build the HandshakeResponse41 payload.
///
/// The caller frames it with sequence id 1.
pub fn build_login_packet(
    info: &HandshakeInfo,
    config: &MySqlConfig,
    plugin: AuthPlugin,
    auth_response: &[u8],
) -> Vec<u8> {
    let client_caps = info.negotiated_capabilities(config);
    let mut cursor = ByteCursor::with_capacity(128);

    cursor.write(&client_caps.to_le_bytes());
    cursor.write(&config.max_packet_size.to_le_bytes());
    cursor.write_u8(config.charset.collation_id());
    cursor.write_zeros(23);
    cursor.write_string_nul(&config.user);

    if client_caps & capabilities::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
        cursor.write_lenenc_bytes(auth_response);
    } else if client_caps & capabilities::CLIENT_SECURE_CONNECTION != 0 {
        // Scrambles are at most 32 bytes
        cursor.write_u8(auth_response.len() as u8);
        cursor.write(auth_response);
    } else {
        cursor.write_bytes_nul(auth_response);
    }

    if client_caps & capabilities::CLIENT_CONNECT_WITH_DB != 0 {
        cursor.write_string_nul(config.database.as_deref().unwrap_or(""));
    }

    if client_caps & capabilities::CLIENT_PLUGIN_AUTH != 0 {
        cursor.write_string_nul(plugin.name());
    }

    cursor.into_vec()
}

/// Auth switch request (0xFE + plugin name + NUL + new scramble).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSwitchRequest {
    pub plugin: String,
    pub auth_data: Vec<u8>,
}

impl AuthSwitchRequest {
    /// Parse an auth switch request, including its 0xFE marker.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut cursor = payload_cursor(payload);
        if cursor.peek() == Some(0xFE) {
            cursor.skip(1)?;
        }
        // A bare 0xFE is the pre-4.1 "use old password" request
        if cursor.is_exhausted() {
            return Ok(Self {
                plugin: plugins::MYSQL_NATIVE_PASSWORD.to_string(),
                auth_data: Vec::new(),
            });
        }
        let plugin = String::from_utf8_lossy(cursor.read_bytes_nul()?).into_owned();
        let rest = cursor.read_rest();
        let auth_data = rest.strip_suffix(&[0]).unwrap_or(rest).to_vec();
        Ok(Self { plugin, auth_data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Handshake V10 as sent by a MySQL 8 server.
    fn sample_handshake(plugin: &str) -> Vec<u8> {
        let caps = capabilities::DEFAULT_CLIENT_FLAGS | capabilities::CLIENT_CONNECT_WITH_DB;
        let mut p = vec![10];
        p.extend_from_slice(b"8.0.36\0");
        p.extend_from_slice(&42u32.to_le_bytes());
        p.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        p.push(0);
        p.extend_from_slice(&((caps & 0xFFFF) as u16).to_le_bytes());
        p.push(45);
        p.extend_from_slice(&2u16.to_le_bytes());
        p.extend_from_slice(&((caps >> 16) as u16).to_le_bytes());
        p.push(21);
        p.extend_from_slice(&[0; 10]);
        p.extend_from_slice(&[9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 0]);
        p.extend_from_slice(plugin.as_bytes());
        p.push(0);
        p
    }

    #[test]
    fn test_parse_handshake() {
        let info = HandshakeInfo::parse(&sample_handshake("caching_sha2_password")).unwrap();
        assert_eq!(info.protocol_version, 10);
        assert_eq!(info.server_version, "8.0.36");
        assert_eq!(info.connection_id, 42);
        assert_eq!(info.charset, 45);
        assert_eq!(info.auth_data, (1..=20).collect::<Vec<u8>>());
        assert_eq!(info.auth_plugin, "caching_sha2_password");
        assert_eq!(info.plugin().unwrap(), AuthPlugin::CachingSha2Password);
    }

    #[test]
    fn test_parse_handshake_rejects_other_protocols() {
        let mut payload = sample_handshake("mysql_native_password");
        payload[0] = 9;
        assert!(HandshakeInfo::parse(&payload).is_err());
        assert!(HandshakeInfo::parse(&payload[..6]).is_err());
    }

    #[test]
    fn test_login_packet_layout() {
        let info = HandshakeInfo::parse(&sample_handshake("mysql_native_password")).unwrap();
        let config = MySqlConfig::new().user("app").database("shop");
        let auth = vec![0xAA; 20];
        let packet = build_login_packet(&info, &config, AuthPlugin::NativePassword, &auth);

        let mut cursor = payload_cursor(&packet);
        let caps = cursor.read_u32_le().unwrap();
        assert_ne!(caps & capabilities::CLIENT_PROTOCOL_41, 0);
        assert_ne!(caps & capabilities::CLIENT_CONNECT_WITH_DB, 0);
        assert_eq!(caps & capabilities::CLIENT_DEPRECATE_EOF, 0);
        assert_eq!(cursor.read_u32_le().unwrap(), config.max_packet_size);
        assert_eq!(cursor.read_u8().unwrap(), 45);
        assert!(cursor.read(23).unwrap().iter().all(|&b| b == 0));
        assert_eq!(cursor.read_bytes_nul().unwrap(), b"app");
        assert_eq!(cursor.read_lenenc_bytes().unwrap().unwrap(), auth);
        assert_eq!(cursor.read_bytes_nul().unwrap(), b"shop");
        assert_eq!(cursor.read_bytes_nul().unwrap(), b"mysql_native_password");
        assert!(cursor.is_exhausted());
    }

    #[test]
    fn test_login_packet_without_database() {
        let info = HandshakeInfo::parse(&sample_handshake("mysql_native_password")).unwrap();
        let config = MySqlConfig::new().user("root");
        let packet = build_login_packet(&info, &config, AuthPlugin::NativePassword, &[]);
        let caps = u32::from_le_bytes([packet[0], packet[1], packet[2], packet[3]]);
        assert_eq!(caps & capabilities::CLIENT_CONNECT_WITH_DB, 0);
        assert!(packet.ends_with(b"root\0\0mysql_native_password\0"));
    }

    #[test]
    fn test_auth_switch_request() {
        let mut payload = vec![0xFE];
        payload.extend_from_slice(b"mysql_native_password\0");
        payload.extend_from_slice(&[7; 20]);
        payload.push(0);
        let req = AuthSwitchRequest::parse(&payload).unwrap();
        assert_eq!(req.plugin, "mysql_native_password");
        assert_eq!(req.auth_data, vec![7; 20]);

        let bare = AuthSwitchRequest::parse(&[0xFE]).unwrap();
        assert_eq!(bare.plugin, "mysql_native_password");
    }
}
