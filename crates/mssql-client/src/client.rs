//! Connection state machine: the blocking socket, PRELOGIN/LOGIN7
//! handshake, and the token-reading loop that drives batch execution.
//!
//! A [`Client`] owns exactly one transport (plain TCP or TLS) and moves
//! through the states in [`crate::state::ConnectionState`] as it
//! authenticates, executes batches, and is cancelled. There is no
//! connection pooling or retry logic here — see `mssql-pool` for bounded
//! pooling and `mssql-client::transaction` for binding a connection to a
//! host-driven transaction.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use bytes::Bytes;
use mssql_auth::Credentials;
use mssql_codec::connection::Connection;
use mssql_pool::{ConnectionLifecycle, PoolError};
use mssql_tls::{SetReadTimeout as _, TlsConnector, TlsPreloginWrapper, TlsReadHalf, TlsWriteHalf, split_tls_stream};
use tds_protocol::login7::{FeatureExtension, FeatureId, Login7};
use tds_protocol::packet::PacketType;
use tds_protocol::prelogin::{EncryptionLevel, PreLogin};
use tds_protocol::sql_batch::encode_sql_batch_with_transaction;
use tds_protocol::token::{Done, DoneStatus, EnvChange, EnvChangeType, EnvChangeValue, Token, TokenParser};
use tds_protocol::version::TdsVersion;

use crate::cancel::CancelHandle;
use crate::config::Config;
use crate::error::{Error, Result, TimeoutKind};
use crate::state::{ConnectionState, ConnectionStateCell};
use crate::stream::{ResultStream, TokenSource};

/// FEDAUTH feature extension library type: a bearer token supplied
/// directly by the caller rather than acquired through an interactive flow.
///
/// See MS-TDS 2.2.6.4; mirrors the encoding `mssql-auth`'s `SqlAuthenticator`
/// uses, duplicated here because that helper always builds its `Login7` from
/// `Login7::default()` and so can't honor this client's negotiated TDS
/// version or packet size.
const FEDAUTH_LIBRARY_SECURITYTOKEN: u8 = 0x01;

/// The underlying socket, plain or TLS-wrapped.
///
/// Both variants wrap an `mssql_codec::Connection` with independently
/// owned read/write halves so an `ATTENTION` packet can be sent from
/// another thread while this thread is blocked reading a result set.
enum Transport {
    Plain(Connection<TcpStream, TcpStream>),
    Tls(Connection<TlsReadHalf<TcpStream>, TlsWriteHalf<TcpStream>>),
}

impl Transport {
    fn read_message(&mut self) -> Result<Option<mssql_codec::message::Message>> {
        match self {
            Self::Plain(c) => c.read_message().map_err(Error::from),
            Self::Tls(c) => c.read_message().map_err(Error::from),
        }
    }

    fn send_message(&mut self, packet_type: PacketType, payload: Bytes, max_packet_size: usize) -> Result<()> {
        match self {
            Self::Plain(c) => c.send_message(packet_type, payload, max_packet_size).map_err(Error::from),
            Self::Tls(c) => c.send_message(packet_type, payload, max_packet_size).map_err(Error::from),
        }
    }

    fn cancel_handle(&self) -> CancelHandle {
        match self {
            Self::Plain(c) => CancelHandle::from_plain(c.cancel_handle()),
            Self::Tls(c) => CancelHandle::from_tls(c.cancel_handle()),
        }
    }

    /// Bound every subsequent blocking read on this connection's read half
    /// by `timeout`, or let them block indefinitely if `None`.
    ///
    /// This is a socket-level deadline (`SO_RCVTIMEO`), not a loop-level
    /// one: it stays in effect across every `read_message` call until
    /// changed again, so it covers each individual wait for more data from
    /// the server, not the whole lifetime of a result stream.
    fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match self {
            Self::Plain(c) => c.transport_ref().set_read_timeout(timeout).map_err(Error::from),
            Self::Tls(c) => c.transport_ref().set_read_timeout(timeout).map_err(Error::from),
        }
    }
}

/// Convert a configured duration into an `Option` for the socket timeout
/// APIs, which reject `Some(Duration::ZERO)`. A zero configured duration
/// means "no deadline" per this crate's timeout configuration convention.
fn socket_deadline(timeout: Duration) -> Option<Duration> {
    if timeout.is_zero() { None } else { Some(timeout) }
}

/// Whether an I/O error is a configured deadline (connect or read) expiring
/// rather than a real connection failure. Platforms report this as either
/// `WouldBlock` (most Unixes, for a non-blocking-style `SO_RCVTIMEO`
/// expiry) or `TimedOut` (Windows, and `TcpStream::connect_timeout`
/// everywhere).
fn is_deadline_expired(e: &std::io::Error) -> bool {
    matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut)
}

/// A single blocking connection to SQL Server.
///
/// Every method here blocks the calling thread for the duration of its
/// network round trip. Cross-thread cancellation is available through
/// [`Client::cancel_handle`].
pub struct Client {
    config: Config,
    transport: Transport,
    state: ConnectionStateCell,
    /// Parser for the message currently being consumed; `None` between
    /// messages, recreated each time `read_message` hands back a new one.
    parser: Option<TokenParser>,
    /// TDS version the server acknowledged in `LOGINACK`.
    server_version: Option<u32>,
    /// Current database, tracked from `ENVCHANGE` (`Database`).
    current_database: Option<String>,
    /// Transaction descriptor from `ENVCHANGE` (`BeginTransaction`); zero
    /// means auto-commit. Included in every batch's `ALL_HEADERS`.
    transaction_descriptor: u64,
    /// Negotiated packet size, updated from `ENVCHANGE` (`PacketSize`).
    packet_size: usize,
    /// Nonce echoed by the server's PreLogin response when FEDAUTH was
    /// requested, folded into the FEDAUTH feature extension data.
    fedauth_nonce: Option<[u8; 32]>,
}

impl Client {
    /// Connect and authenticate.
    ///
    /// Establishes the TCP connection, negotiates TLS per
    /// [`Config::strict_mode`], and authenticates using the credentials in
    /// `config`.
    pub fn connect(config: Config) -> Result<Self> {
        tracing::info!(
            host = %config.host,
            port = config.port,
            database = ?config.database,
            "connecting to SQL Server"
        );

        let addr = (config.host.as_str(), config.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::Config(format!("could not resolve {}:{}", config.host, config.port)))?;

        let tcp = TcpStream::connect_timeout(&addr, config.timeouts.connect_timeout).map_err(|e| {
            if is_deadline_expired(&e) {
                Error::Timeout(TimeoutKind::Connect, config.timeouts.connect_timeout)
            } else {
                Error::from(e)
            }
        })?;
        tcp.set_nodelay(true)?;

        let mut client = if config.strict_mode {
            Self::connect_tds8(config, tcp)?
        } else {
            Self::connect_tds7x(config, tcp)?
        };

        match client.config.credentials.clone() {
            Credentials::SqlServer { .. } => client.authenticate_sql()?,
            Credentials::AzureAccessToken { .. } => client.authenticate_fedauth()?,
        }

        Ok(client)
    }

    /// TDS 8.0 strict mode: TLS is established before any TDS traffic, so
    /// both `PRELOGIN` and `LOGIN7` travel encrypted from the first byte.
    fn connect_tds8(config: Config, tcp: TcpStream) -> Result<Self> {
        tracing::debug!("using TDS 8.0 strict mode (TLS before any TDS traffic)");

        let tls_config = config
            .tls
            .clone()
            .strict_mode(true)
            .trust_server_certificate(config.trust_server_certificate);
        let connector = TlsConnector::new(tls_config)?;
        let tls_stream = connector.connect(tcp, &config.host)?;
        let (read_half, write_half) = split_tls_stream(tls_stream);
        let mut connection = Connection::new(read_half, write_half);

        let prelogin = Self::build_prelogin(&config, EncryptionLevel::Required, false);
        Self::send_prelogin(&mut connection, &prelogin)?;
        let _response = Self::receive_prelogin(&mut connection)?;

        Ok(Self::new_authenticating(config, Transport::Tls(connection)))
    }

    /// TDS 7.x flow: `PRELOGIN` is exchanged in cleartext, then the
    /// connection is upgraded to TLS (unless both sides negotiated no
    /// encryption) before `LOGIN7` is sent.
    fn connect_tds7x(config: Config, tcp: TcpStream) -> Result<Self> {
        tracing::debug!("using TDS 7.x flow (PreLogin first)");

        let requested_encryption = if config.encrypt {
            EncryptionLevel::On
        } else {
            EncryptionLevel::Off
        };
        let fed_auth = config.credentials.is_azure_ad();
        let prelogin = Self::build_prelogin(&config, requested_encryption, fed_auth);

        let plain_read = tcp.try_clone()?;
        let plain_write = tcp.try_clone()?;
        let mut plain_conn = Connection::new(plain_read, plain_write);
        Self::send_prelogin(&mut plain_conn, &prelogin)?;
        let response = Self::receive_prelogin(&mut plain_conn)?;
        drop(plain_conn);

        let transport = if response.encryption == EncryptionLevel::NotSupported {
            tracing::debug!("server does not support encryption; continuing in plaintext");
            let read = tcp.try_clone()?;
            Transport::Plain(Connection::new(read, tcp))
        } else {
            tracing::debug!("upgrading to TLS after PreLogin");
            let tls_config = config
                .tls
                .clone()
                .strict_mode(false)
                .trust_server_certificate(config.trust_server_certificate);
            let connector = TlsConnector::new(tls_config)?;
            let wrapper = TlsPreloginWrapper::new(tcp);
            let mut tls_stream = connector.connect(wrapper, &config.host)?;
            tls_stream.sock.handshake_complete();
            let (read_half, write_half) = split_tls_stream(tls_stream);
            Transport::Tls(Connection::new(read_half, write_half))
        };

        let mut client = Self::new_authenticating(config, transport);
        if fed_auth && response.fed_auth_required {
            client.fedauth_nonce = response.nonce;
        }
        Ok(client)
    }

    fn new_authenticating(config: Config, transport: Transport) -> Self {
        Self {
            packet_size: config.packet_size as usize,
            config,
            transport,
            state: ConnectionStateCell::new(ConnectionState::Authenticating),
            parser: None,
            server_version: None,
            current_database: None,
            transaction_descriptor: 0,
            fedauth_nonce: None,
        }
    }

    fn negotiated_version(config: &Config) -> TdsVersion {
        if config.strict_mode { TdsVersion::V8_0 } else { config.tds_version }
    }

    fn build_prelogin(config: &Config, encryption: EncryptionLevel, fed_auth: bool) -> PreLogin {
        let mut prelogin = PreLogin::new()
            .with_version(Self::negotiated_version(config))
            .with_encryption(encryption);
        if config.mars {
            prelogin = prelogin.with_mars(true);
        }
        if let Some(instance) = &config.instance {
            prelogin = prelogin.with_instance(instance);
        }
        prelogin.fed_auth_required = fed_auth;
        prelogin
    }

    fn build_login7(config: &Config) -> Login7 {
        let mut login = Login7::new()
            .with_tds_version(Self::negotiated_version(config))
            .with_packet_size(u32::from(config.packet_size))
            .with_app_name(&config.application_name)
            .with_server_name(&config.host)
            .with_hostname(&config.host);
        if let Some(database) = &config.database {
            login = login.with_database(database);
        }
        login
    }

    fn send_prelogin(connection: &mut Connection<impl std::io::Read, impl std::io::Write>, prelogin: &PreLogin) -> Result<()> {
        connection
            .send_message(PacketType::PreLogin, prelogin.encode(), tds_protocol::packet::MAX_PACKET_SIZE)
            .map_err(Error::from)
    }

    fn receive_prelogin(connection: &mut Connection<impl std::io::Read, impl std::io::Write>) -> Result<PreLogin> {
        let message = connection
            .read_message()
            .map_err(Error::from)?
            .ok_or(Error::Protocol("connection closed during PreLogin".to_string()))?;
        PreLogin::decode(message.payload).map_err(Error::from)
    }

    /// Authenticate with SQL Server username/password credentials.
    pub fn authenticate_sql(&mut self) -> Result<()> {
        let Credentials::SqlServer { username, password } = &self.config.credentials else {
            return Err(Error::Auth("authenticate_sql requires SQL Server credentials".to_string()));
        };
        let login = Self::build_login7(&self.config).with_sql_auth(username.as_ref(), password.as_ref());
        self.send_login7(&login)?;
        self.read_login_response()
    }

    /// Authenticate with an Azure AD access token via the FEDAUTH feature
    /// extension.
    pub fn authenticate_fedauth(&mut self) -> Result<()> {
        let Credentials::AzureAccessToken { token } = &self.config.credentials else {
            return Err(Error::Auth("authenticate_fedauth requires an Azure access token".to_string()));
        };
        let feature_data = encode_fedauth_feature_data(token.as_ref(), self.fedauth_nonce);
        let login = Self::build_login7(&self.config).with_feature(FeatureExtension {
            feature_id: FeatureId::FedAuth,
            data: feature_data,
        });
        self.send_login7(&login)?;
        self.read_login_response()
    }

    fn send_login7(&mut self, login: &Login7) -> Result<()> {
        self.transport.send_message(PacketType::Tds7Login, login.encode(), self.packet_size)
    }

    /// Read tokens until the login's final `DONE`, applying `LOGINACK`/
    /// `ENVCHANGE` as they arrive and failing on the first `ERROR` token.
    fn read_login_response(&mut self) -> Result<()> {
        loop {
            match self.next_token()? {
                Some(Token::Error(err)) => {
                    return Err(Error::Auth(format!("{} (error {})", err.message, err.number)));
                }
                Some(Token::Info(info)) => {
                    tracing::info!(number = info.number, message = %info.message, "server info");
                }
                Some(Token::Done(done)) if !done.status.more => {
                    if done.status.error {
                        return Err(Error::Auth("login failed".to_string()));
                    }
                    return Ok(());
                }
                Some(other) => {
                    return Err(Error::Protocol(format!("unexpected token during login: {other:?}")));
                }
                None => {
                    return Err(Error::Protocol("connection closed during login".to_string()));
                }
            }
        }
    }

    /// Send a SQL batch and return a stream over its result set.
    ///
    /// The connection must be [`ConnectionState::Idle`]; the returned
    /// stream borrows this client exclusively until it reaches
    /// [`crate::stream::StreamState::Complete`].
    pub fn execute_batch(&mut self, sql: &str) -> Result<ResultStream<'_, Self>> {
        let current = self.state.load();
        if current != ConnectionState::Idle {
            return Err(Error::State(current));
        }

        let payload = encode_sql_batch_with_transaction(sql, self.transaction_descriptor);
        self.transport.set_read_timeout(socket_deadline(self.config.timeouts.command_timeout))?;
        self.transport.send_message(PacketType::SqlBatch, payload, self.packet_size)?;
        self.state.store(ConnectionState::Executing);
        Ok(ResultStream::new(self))
    }

    /// Issue a trivial round trip (`SELECT 1`) to confirm the connection is
    /// alive and return it to `Idle`.
    pub fn ping(&mut self) -> Result<()> {
        let mut stream = self.execute_batch("select 1")?;
        while stream.next_row()?.is_some() {}
        Ok(())
    }

    /// Send a raw BCP (`BULK_LOAD`) payload and read the server's response
    /// through to its terminal `DONE`, returning the confirmed row count.
    ///
    /// Used by [`crate::bulk`] between `INSERT BULK` statements; row
    /// framing and the token stream itself are the bulk writer's
    /// responsibility, this just owns the transport and state transition.
    pub(crate) fn send_bulk_payload(&mut self, payload: Bytes) -> Result<u64> {
        let current = self.state.load();
        if current != ConnectionState::Idle {
            return Err(Error::State(current));
        }
        self.transport.set_read_timeout(socket_deadline(self.config.timeouts.command_timeout))?;
        self.transport.send_message(PacketType::BulkLoad, payload, self.packet_size)?;
        self.state.store(ConnectionState::Executing);

        loop {
            match self.next_token()? {
                Some(Token::Done(done)) if !done.status.more => return Ok(done.row_count),
                Some(Token::DoneProc(done) | Token::DoneInProc(done)) if !done.status.more => {
                    return Ok(done.row_count);
                }
                Some(Token::Error(server_error)) => {
                    return Err(Error::ServerError {
                        number: server_error.number,
                        class: server_error.class,
                        state: server_error.state,
                        message: server_error.message,
                        server: (!server_error.server.is_empty()).then_some(server_error.server),
                        procedure: (!server_error.procedure.is_empty()).then_some(server_error.procedure),
                        line: server_error.line.max(0) as u32,
                    });
                }
                Some(Token::Info(info)) => {
                    tracing::info!(number = info.number, message = %info.message, "server info");
                }
                Some(_) => {}
                None => return Err(Error::Protocol("connection closed during BCP response".to_string())),
            }
        }
    }

    /// A cloneable handle that sends an `ATTENTION` packet to interrupt the
    /// batch currently in flight, usable from another thread.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.transport.cancel_handle()
    }

    /// Send `ATTENTION` to interrupt the in-flight batch from this same
    /// thread. The caller is then responsible for calling
    /// [`Client::drain_to_idle`] (or resuming its `ResultStream`, which
    /// drains automatically) to consume the server's acknowledgement.
    pub fn send_attention(&mut self) -> Result<()> {
        let current = self.state.load();
        if current != ConnectionState::Executing {
            return Err(Error::State(current));
        }
        self.state.store(ConnectionState::Cancelling);
        self.transport.cancel_handle().cancel()
    }

    /// Discard tokens until the connection returns to `Idle`.
    ///
    /// Used to recover a connection whose `ResultStream` was dropped
    /// before being fully consumed.
    pub fn drain_to_idle(&mut self) -> Result<()> {
        self.transport.set_read_timeout(socket_deadline(self.config.timeouts.drain_timeout))?;
        while self.state.load().is_busy() {
            if self.next_token()?.is_none() {
                return Err(Error::Protocol("connection closed while draining".to_string()));
            }
        }
        Ok(())
    }

    /// Start a bulk-load (BCP) session inserting into `table`.
    ///
    /// The connection must be `Idle`; configure columns and options on the
    /// returned builder's `with_columns`/`with_options`, then call
    /// [`crate::bulk::BcpSession::start`] with it.
    #[must_use]
    pub fn bulk_insert(&mut self, table: impl Into<String>) -> crate::bulk::BulkInsertBuilder {
        crate::bulk::BulkInsertBuilder::new(table.into())
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.load()
    }

    /// TDS version the server acknowledged, if authenticated.
    #[must_use]
    pub fn server_version(&self) -> Option<u32> {
        self.server_version
    }

    /// Current database, tracked from `ENVCHANGE`.
    #[must_use]
    pub fn current_database(&self) -> Option<&str> {
        self.current_database.as_deref()
    }

    /// Transaction descriptor for the active explicit transaction, or zero
    /// in auto-commit mode.
    #[must_use]
    pub fn transaction_descriptor(&self) -> u64 {
        self.transaction_descriptor
    }

    /// Apply an `ENVCHANGE` token's effect on client-visible state.
    fn apply_env_change(&mut self, env: &EnvChange) {
        match env.env_type {
            EnvChangeType::Database => {
                if let EnvChangeValue::String(new_value) = &env.new_value {
                    tracing::debug!(database = %new_value, "database changed");
                    self.current_database = Some(new_value.clone());
                }
            }
            EnvChangeType::PacketSize => {
                if let EnvChangeValue::String(new_value) = &env.new_value {
                    if let Ok(size) = new_value.parse::<usize>() {
                        tracing::debug!(packet_size = size, "packet size changed");
                        self.packet_size = size;
                    }
                }
            }
            EnvChangeType::BeginTransaction => {
                if let EnvChangeValue::Binary(data) = &env.new_value {
                    if data.len() >= 8 {
                        let mut bytes = [0u8; 8];
                        bytes.copy_from_slice(&data[..8]);
                        self.transaction_descriptor = u64::from_le_bytes(bytes);
                        tracing::debug!(descriptor = self.transaction_descriptor, "transaction started");
                    }
                }
            }
            EnvChangeType::CommitTransaction | EnvChangeType::RollbackTransaction => {
                tracing::debug!(env_type = ?env.env_type, "transaction ended");
                self.transaction_descriptor = 0;
            }
            EnvChangeType::Routing => {
                // Azure SQL Gateway redirects are out of scope; log and
                // continue on the current connection.
                if let EnvChangeValue::Routing { host, port } = &env.new_value {
                    tracing::warn!(host = %host, port = port, "ignoring routing redirect");
                }
            }
            _ => {
                tracing::debug!(env_type = ?env.env_type, "environment change");
            }
        }
    }

    /// Consume a token that belongs to connection state rather than a
    /// result set (`ENVCHANGE`, `LOGINACK`, feature/session negotiation),
    /// or track a terminal `DONE` and return the token for the caller.
    ///
    /// Returns `None` for tokens consumed internally; the caller should
    /// keep looping for the next one.
    fn observe_token(&mut self, token: Token) -> Option<Token> {
        match &token {
            Token::EnvChange(env) => {
                self.apply_env_change(env);
                return None;
            }
            Token::LoginAck(ack) => {
                tracing::info!(version = ack.tds_version, prog_name = %ack.prog_name, "login acknowledged");
                self.server_version = Some(ack.tds_version);
                return None;
            }
            Token::FeatureExtAck(_) | Token::Order(_) | Token::Sspi(_) | Token::SessionState(_) | Token::FedAuthInfo(_) => {
                return None;
            }
            Token::Done(done) if !done.status.more => self.state.store(ConnectionState::Idle),
            Token::DoneProc(done) | Token::DoneInProc(done) if !done.status.more => {
                self.state.store(ConnectionState::Idle);
            }
            _ => {}
        }
        Some(token)
    }
}

impl TokenSource for Client {
    fn next_token(&mut self) -> std::result::Result<Option<Token>, Error> {
        loop {
            if let Some(parser) = self.parser.as_mut() {
                match parser.next_token()? {
                    Some(token) => {
                        if let Some(forwarded) = self.observe_token(token) {
                            return Ok(Some(forwarded));
                        }
                        continue;
                    }
                    None => self.parser = None,
                }
            }

            let message = match self.transport.read_message() {
                Ok(message) => message,
                Err(Error::Io(io_err)) if is_deadline_expired(&io_err) => {
                    return Err(if self.state.load() == ConnectionState::Cancelling {
                        Error::Timeout(TimeoutKind::Drain, self.config.timeouts.drain_timeout)
                    } else {
                        Error::Timeout(TimeoutKind::Query, self.config.timeouts.command_timeout)
                    });
                }
                Err(e) => return Err(e),
            };

            match message {
                Some(message) => self.parser = Some(TokenParser::new(message.payload)),
                None if self.state.load() == ConnectionState::Cancelling => {
                    // The codec's own cancellation drain swallowed the raw
                    // DONE_ATTN packet without parsing it; synthesize the
                    // token the caller expects to see at this boundary.
                    self.state.store(ConnectionState::Idle);
                    return Ok(Some(Token::Done(Done {
                        status: DoneStatus {
                            more: false,
                            error: false,
                            in_xact: false,
                            count: false,
                            attn: true,
                            srverror: false,
                        },
                        cur_cmd: 0,
                        row_count: 0,
                    })));
                }
                None => return Ok(None),
            }
        }
    }
}

impl ConnectionLifecycle for Client {
    /// Run `query` (`SELECT 1` by default, per the pool's health-check
    /// configuration) and confirm it completes without a server error.
    fn health_check(&mut self, query: &str) -> std::result::Result<(), PoolError> {
        let mut stream = self
            .execute_batch(query)
            .map_err(|e| PoolError::UnhealthyConnection(e.to_string()))?;
        loop {
            match stream.next_row() {
                Ok(Some(_)) => {}
                Ok(None) => return Ok(()),
                Err(e) => return Err(PoolError::UnhealthyConnection(e.to_string())),
            }
        }
    }

    /// Run `sp_reset_connection` to clear server-side session state
    /// (cursors, temp tables, SET options, transaction state) before the
    /// connection is reused by a different pool caller.
    fn reset(&mut self) -> std::result::Result<(), PoolError> {
        if self.state() != ConnectionState::Idle {
            return Err(PoolError::ResetFailed(format!(
                "connection left in non-idle state {:?}",
                self.state()
            )));
        }
        let mut stream = self
            .execute_batch("EXEC sp_reset_connection")
            .map_err(|e| PoolError::ResetFailed(e.to_string()))?;
        while stream.next_row().map_err(|e| PoolError::ResetFailed(e.to_string()))?.is_some() {}
        Ok(())
    }

    fn is_valid(&self) -> bool {
        self.state().is_usable()
    }
}

/// Encode the FEDAUTH feature extension data per MS-TDS 2.2.6.4: an options
/// byte (library type in the low 7 bits), a 4-byte LE token length, the raw
/// token bytes, and the server's echoed nonce if one was requested.
fn encode_fedauth_feature_data(token: &str, nonce: Option<[u8; 32]>) -> Bytes {
    use bytes::{BufMut, BytesMut};
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
