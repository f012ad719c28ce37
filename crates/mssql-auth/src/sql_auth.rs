//! LOGIN7 payload construction for SQL and federated authentication.

use bytes::{BufMut, Bytes, BytesMut};
use tds_protocol::login7::{FeatureExtension, FeatureId, Login7};

use crate::credentials::Credentials;
use crate::error::AuthError;

/// Library type byte for the FEDAUTH feature extension: a bearer token
/// supplied directly by the caller, not acquired via an interactive flow.
const FEDAUTH_LIBRARY_SECURITYTOKEN: u8 = 0x01;

/// Builds LOGIN7 packets for SQL Server and Azure AD (FEDAUTH) authentication.
pub struct SqlAuthenticator;

impl SqlAuthenticator {
    /// Create a new SQL authenticator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Build the LOGIN7 packet payload for SQL Server username/password authentication.
    pub fn build_login_payload(
        &self,
        credentials: &Credentials,
        hostname: &str,
        app_name: &str,
        database: Option<&str>,
    ) -> Result<BytesMut, AuthError> {
        let (username, password) = match credentials {
            Credentials::SqlServer { username, password } => (username.as_ref(), password.as_ref()),
            _ => {
                return Err(AuthError::UnsupportedMethod(
                    "SqlAuthenticator only supports SQL Server credentials".into(),
                ));
            }
        };

        tracing::debug!(
            username,
            hostname,
            app_name,
            database,
            "building SQL authentication login payload"
        );

        let login = Login7::new()
            .with_hostname(hostname)
            .with_app_name(app_name)
            .with_sql_auth(username, password)
            .with_database(database.unwrap_or_default());

        let mut buf = BytesMut::with_capacity(512);
        buf.put_slice(&login.encode());
        Ok(buf)
    }

    /// Build the LOGIN7 packet payload for federated (Azure AD) authentication.
    ///
    /// The FEDAUTH feature extension carries the caller-supplied, already
    /// UTF-16LE encoded bearer token; no additional obfuscation is applied.
    pub fn build_fedauth_login_payload(
        &self,
        credentials: &Credentials,
        hostname: &str,
        app_name: &str,
        database: Option<&str>,
        nonce: Option<[u8; 32]>,
    ) -> Result<BytesMut, AuthError> {
        let token = match credentials {
            Credentials::AzureAccessToken { token } => token.as_ref(),
            _ => {
                return Err(AuthError::UnsupportedMethod(
                    "fedauth login requires an Azure access token".into(),
                ));
            }
        };

        tracing::debug!(hostname, app_name, database, "building FEDAUTH login payload");

        let feature_data = encode_fedauth_feature_data(token, nonce);

        let login = Login7::new()
            .with_hostname(hostname)
            .with_app_name(app_name)
            .with_database(database.unwrap_or_default())
            .with_feature(FeatureExtension {
                feature_id: FeatureId::FedAuth,
                data: feature_data,
            });

        let mut buf = BytesMut::with_capacity(512);
        buf.put_slice(&login.encode());
        Ok(buf)
    }

    /// Encode a password for SQL Server Login7 packet.
    ///
    /// SQL Server uses a simple XOR-based obfuscation for passwords
    /// in Login7 packets. This is NOT encryption - it's just obfuscation.
    /// The connection should always be encrypted via TLS.
    #[must_use]
    pub fn encode_password(password: &str) -> Vec<u8> {
        password
            .encode_utf16()
            .flat_map(|c| {
                let byte1 = (c & 0xFF) as u8;
                let byte2 = (c >> 8) as u8;

                // XOR with 0xA5 and swap nibbles
                let encoded1 = ((byte1 ^ 0xA5) << 4) | ((byte1 ^ 0xA5) >> 4);
                let encoded2 = ((byte2 ^ 0xA5) << 4) | ((byte2 ^ 0xA5) >> 4);

                [encoded1, encoded2]
            })
            .collect()
    }
}

/// Encode the FEDAUTH feature extension data per MS-TDS 2.2.6.4.
///
/// Layout: options byte (library type in low 7 bits, echo flag in bit 7),
/// then a 4-byte LE token length and the raw token bytes, then the 32-byte
/// nonce if the server's PRELOGIN response requested one. See DESIGN.md for
/// the reasoning behind this layout (an Open Question in the distilled spec).
fn encode_fedauth_feature_data(token: &str, nonce: Option<[u8; 32]>) -> Bytes {
    let token_bytes = token.as_bytes();
    let mut buf = BytesMut::with_capacity(1 + 4 + token_bytes.len() + 32);
    buf.put_u8(FEDAUTH_LIBRARY_SECURITYTOKEN);
    buf.put_u32_le(token_bytes.len() as u32);
    buf.put_slice(token_bytes);
    if let Some(nonce) = nonce {
        buf.put_slice(&nonce);
    }
    buf.freeze()
}

impl Default for SqlAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}
