//
// meli - managesieve
//
// Copyright 2020 Emmanouil Pitsidianakis <manos@pitsidianak.is>
//
// This file is part of meli.
//
// meli is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// meli is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with meli. If not, see <http://www.gnu.org/licenses/>.
//
// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later

//! ManageSieve sessions.
//!
//! [`ManageSieveStream`] frames commands and reads logical response lines
//! (literal payloads included) off a [`Transport`]. [`ManageSieveConnection`]
//! is the session state machine on top of it:
//!
//! ```text
//! Disconnected -> Connected -> (Secured) -> Authenticated -> Disconnected
//! ```
//!
//! `NO` and `BYE` replies are returned as [`ServerResponse`] values. Errors
//! are reserved for malformed input ([`ErrorKind::Parse`]), commands issued
//! in the wrong state ([`ErrorKind::ProtocolError`]) and transport failures,
//! after which the session is disconnected.

use std::{
    borrow::Cow,
    io::{Read, Write},
    time::Duration,
};

use crate::{
    capabilities::ServerCapabilities,
    command::Command,
    conf::{ManageSieveConf, TlsPolicy},
    error::{Error, ErrorKind, NetworkErrorKind, Result, ResultIntoError},
    protocol_parser::{decode_string, encode_string, tokenize, trailing_literal_len, LiteralMode, Token},
    response::{ResponseCode, ResponseStatus, ResponseWithPayload, ServerResponse},
    sasl::{decode_payload, encode_payload, Credentials, SaslMechanism, SaslMechanisms},
    script::SieveScript,
    transport::{Connection, Transport},
};

macro_rules! sieve_log {
    ($fn:ident, $conn:expr, $fmt:literal, $($t:tt)*) => {
        log::$fn!(std::concat!("{} ", $fmt), $conn.id, $($t)*);
    };
    ($fn:ident, $conn:expr, $fmt:literal) => {
        log::$fn!(std::concat!("{} ", $fmt), $conn.id);
    };
}

const IO_BUF_SIZE: usize = 4096;

/// Low level line framing over a transport.
#[derive(Debug)]
pub struct ManageSieveStream {
    pub id: Cow<'static, str>,
    stream: Box<dyn Transport>,
    buf: Vec<u8>,
}

impl ManageSieveStream {
    pub fn new(stream: Box<dyn Transport>) -> Self {
        Self {
            id: Cow::Borrowed("managesieve"),
            stream,
            buf: Vec::with_capacity(IO_BUF_SIZE),
        }
    }

    pub fn with_id(mut self, id: impl Into<Cow<'static, str>>) -> Self {
        self.id = id.into();
        self
    }

    pub fn is_secure(&self) -> bool {
        self.stream.is_secure()
    }

    pub fn set_timeout(&mut self, dur: Option<Duration>) -> Result<()> {
        self.stream.set_timeout(dur)
    }

    pub fn set_trace(&mut self, val: bool) {
        self.stream.set_trace(val);
    }

    pub fn is_trace_enabled(&self) -> bool {
        self.stream.is_trace_enabled()
    }

    pub fn shutdown(&mut self) -> Result<()> {
        self.stream.shutdown()
    }

    /// Give up the transport. Bytes that were read but not consumed are
    /// discarded.
    pub fn into_transport(self) -> Box<dyn Transport> {
        if !self.buf.is_empty() {
            sieve_log!(
                warn,
                self,
                "discarding {} unread bytes: {:?}",
                self.buf.len(),
                String::from_utf8_lossy(&self.buf)
            );
        }
        self.stream
    }

    fn fill_buf(&mut self) -> Result<usize> {
        let mut chunk = [0; IO_BUF_SIZE];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(len) => {
                    self.buf.extend_from_slice(&chunk[..len]);
                    return Ok(len);
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    return Err(Error::from(err).set_summary("Could not read from server."));
                }
            }
        }
    }

    /// Read one logical line without its line ending.
    ///
    /// A line that ends in a literal prefix `{N}` continues after the `N`
    /// payload bytes, which are read verbatim and kept in the returned line.
    /// If the stream ends inside a literal, the bytes available are returned.
    pub fn read_line(&mut self) -> Result<Vec<u8>> {
        // Start of the current physical line within `buf`.
        let mut scan = 0;
        loop {
            if let Some(pos) = self.buf[scan..].iter().position(|&b| b == b'\n') {
                let lf = scan + pos;
                let content_end = if lf > scan && self.buf[lf - 1] == b'\r' {
                    lf - 1
                } else {
                    sieve_log!(
                        debug,
                        self,
                        "line without CR: {:?}",
                        String::from_utf8_lossy(&self.buf[scan..lf])
                    );
                    lf
                };
                if let Some(len) = trailing_literal_len(&self.buf[scan..content_end]) {
                    let Some(payload_end) = lf.checked_add(1).and_then(|n| n.checked_add(len))
                    else {
                        let line = self.buf.drain(..=lf).collect::<Vec<u8>>();
                        return Err(Error::new(format!(
                            "Literal length {} is out of range.",
                            len
                        ))
                        .set_details(String::from_utf8_lossy(&line).into_owned())
                        .set_kind(ErrorKind::Parse));
                    };
                    while self.buf.len() < payload_end {
                        if self.fill_buf()? == 0 {
                            sieve_log!(
                                warn,
                                self,
                                "connection closed {} octets into a {} octet literal",
                                self.buf.len() - (lf + 1),
                                len
                            );
                            return Ok(std::mem::take(&mut self.buf));
                        }
                    }
                    scan = payload_end;
                    continue;
                }
                let line = self.buf[..content_end].to_vec();
                self.buf.drain(..=lf);
                return Ok(line);
            }
            if self.fill_buf()? == 0 {
                if self.buf.is_empty() {
                    return Err(Error::new("Connection closed by server.")
                        .set_kind(ErrorKind::Network(NetworkErrorKind::ConnectionClosed)));
                }
                sieve_log!(
                    debug,
                    self,
                    "unterminated last line: {:?}",
                    String::from_utf8_lossy(&self.buf)
                );
                return Ok(std::mem::take(&mut self.buf));
            }
        }
    }

    /// Read lines up to and including a status line. Returns the lines
    /// before it and the parsed status.
    pub fn read_response(&mut self) -> Result<(Vec<Vec<u8>>, ServerResponse)> {
        let mut lines = vec![];
        loop {
            let line = self.read_line()?;
            if ResponseStatus::of_line(&line).is_some() {
                let response = ServerResponse::try_from(line.as_slice())?;
                sieve_log!(trace, self, "received: {}", response);
                return Ok((lines, response));
            }
            lines.push(line);
        }
    }

    pub fn send_command(&mut self, command: Command<'_>) -> Result<()> {
        sieve_log!(trace, self, "sent: {}", command.redacted());
        self.write_all(command.encode(LiteralMode::NonSync).as_bytes())
    }

    /// Send `line` followed by CRLF.
    pub fn send_raw(&mut self, line: &[u8]) -> Result<()> {
        let mut data = Vec::with_capacity(line.len() + 2);
        data.extend_from_slice(line);
        data.extend_from_slice(b"\r\n");
        self.write_all(&data)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.stream
            .write_all(data)
            .and_then(|()| self.stream.flush())
            .map_err(|err| Error::from(err).set_summary("Could not write to server."))
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connected,
    /// Connected over TLS, not authenticated.
    Secured,
    Authenticated,
}

/// A ManageSieve client session.
#[derive(Debug)]
pub struct ManageSieveConnection {
    stream: Option<ManageSieveStream>,
    state: SessionState,
    capabilities: Option<ServerCapabilities>,
    mechanisms: SaslMechanisms,
    server_hostname: String,
    tls_policy: TlsPolicy,
    allow_insecure_auth: bool,
    timeout: Option<Duration>,
    trace: bool,
}

impl Default for ManageSieveConnection {
    fn default() -> Self {
        Self::new()
    }
}

fn read_capabilities(
    stream: &mut ManageSieveStream,
) -> Result<(ServerCapabilities, ServerResponse)> {
    let (lines, response) = stream.read_response()?;
    let mut capabilities = ServerCapabilities::new();
    for line in lines {
        if let Err(err) = tokenize(&line).and_then(|tokens| capabilities.apply_tokens(&tokens)) {
            sieve_log!(
                warn,
                stream,
                "ignoring invalid capability line {:?}: {}",
                String::from_utf8_lossy(&line),
                err
            );
        }
    }
    Ok((capabilities, response))
}

fn sasl_exchange(
    stream: &mut ManageSieveStream,
    mechanism: &mut dyn SaslMechanism,
) -> Result<ServerResponse> {
    let initial_response = mechanism.initial_response()?.map(|ir| encode_payload(&ir));
    stream.send_command(Command::Authenticate {
        mechanism: mechanism.name(),
        initial_response: initial_response.as_deref(),
    })?;
    loop {
        let line = stream.read_line()?;
        if ResponseStatus::of_line(&line).is_some() {
            let response = ServerResponse::try_from(line.as_slice())?;
            if let (true, Some(ResponseCode::Sasl), Some(data)) =
                (response.is_ok(), response.code(), response.param())
            {
                mechanism.verify_final(&decode_payload(data)?)?;
            }
            return Ok(response);
        }
        let reply = decode_string(&line)
            .and_then(|challenge| decode_payload(&challenge))
            .and_then(|challenge| mechanism.respond(&challenge));
        match reply {
            Ok(reply) => {
                stream.send_raw(
                    encode_string(&encode_payload(&reply), LiteralMode::NonSync).as_bytes(),
                )?;
            }
            Err(err) => {
                sieve_log!(debug, stream, "aborting {} exchange: {}", mechanism.name(), err);
                stream.send_raw(b"\"*\"")?;
                let (_, response) = stream.read_response()?;
                return Err(err.set_details(format!("Server reply to abort: {}", response)));
            }
        }
    }
}

impl ManageSieveConnection {
    pub fn new() -> Self {
        Self {
            stream: None,
            state: SessionState::Disconnected,
            capabilities: None,
            mechanisms: SaslMechanisms::default(),
            server_hostname: String::new(),
            tls_policy: TlsPolicy::default(),
            allow_insecure_auth: false,
            timeout: None,
            trace: cfg!(feature = "managesieve-trace"),
        }
    }

    /// Connect, secure and authenticate according to `conf`.
    pub fn new_connection(conf: &ManageSieveConf) -> Result<Self> {
        conf.validate()?;
        let mut ret = Self::new();
        ret.set_tls_policy(conf.tls_policy())
            .set_allow_insecure_auth(conf.allow_insecure_auth);
        ret.trace = ret.trace || conf.trace;
        ret.timeout = conf.timeout();

        let mut conn = Connection::connect(&conf.server_hostname, conf.server_port, ret.timeout)?
            .trace(ret.trace);
        if conf.use_tls {
            conn = conn.into_tls(&conf.server_hostname, &ret.tls_policy)?;
        }
        let greeting = ret.connect_transport(Box::new(conn), &conf.server_hostname)?;
        log::debug!("{}: greeting {}", conf.server_hostname, greeting);

        if !conf.use_tls && conf.use_starttls {
            if ret.capabilities().map(ServerCapabilities::has_tls) == Some(true) {
                ret.starttls()?
                    .into_result()
                    .chain_err_summary(|| {
                        format!("STARTTLS to {} was refused.", conf.server_hostname)
                    })
                    .chain_err_kind(ErrorKind::Network(NetworkErrorKind::TLSConnectionFailed))?;
            } else if conf.allow_insecure_auth {
                log::warn!(
                    "{} does not offer STARTTLS, continuing unencrypted.",
                    conf.server_hostname
                );
            } else {
                _ = ret.logout();
                return Err(Error::new(format!(
                    "{} does not offer STARTTLS.",
                    conf.server_hostname
                ))
                .set_kind(ErrorKind::NotSupported));
            }
        }

        let Credentials {
            username, password, ..
        } = conf.credentials()?;
        ret.authenticate(&username, &password, Some(&conf.sasl_mechanism))?
            .into_result()
            .chain_err_summary(|| {
                format!(
                    "Could not authenticate as {} to {}.",
                    username, conf.server_hostname
                )
            })
            .chain_err_kind(ErrorKind::Authentication)?;
        Ok(ret)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state != SessionState::Disconnected
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }

    /// Whether the transport is encrypted.
    pub fn is_secured(&self) -> bool {
        self.stream
            .as_ref()
            .map(ManageSieveStream::is_secure)
            .unwrap_or(false)
    }

    /// Capabilities from the latest announcement, `None` before connecting.
    pub fn capabilities(&self) -> Option<&ServerCapabilities> {
        self.capabilities.as_ref()
    }

    pub fn mechanisms(&self) -> &SaslMechanisms {
        &self.mechanisms
    }

    pub fn mechanisms_mut(&mut self) -> &mut SaslMechanisms {
        &mut self.mechanisms
    }

    pub fn set_tls_policy(&mut self, policy: TlsPolicy) -> &mut Self {
        self.tls_policy = policy;
        self
    }

    pub fn set_allow_insecure_auth(&mut self, val: bool) -> &mut Self {
        self.allow_insecure_auth = val;
        self
    }

    pub fn set_trace(&mut self, val: bool) -> &mut Self {
        self.trace = val;
        if let Some(stream) = self.stream.as_mut() {
            stream.set_trace(val);
        }
        self
    }

    /// Bound every blocking read and write. A timeout is fatal to the
    /// session.
    pub fn set_timeout(&mut self, dur: Option<Duration>) -> Result<()> {
        self.timeout = dur;
        if let Some(stream) = self.stream.as_mut() {
            stream.set_timeout(dur)?;
        }
        Ok(())
    }

    /// Open a TCP connection and read the server greeting.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<ServerResponse> {
        self.require_disconnected()?;
        let conn = Connection::connect(host, port, self.timeout)?.trace(self.trace);
        self.connect_transport(Box::new(conn), host)
    }

    /// Start a session over an already open transport. `server_hostname` is
    /// used to verify the certificate if STARTTLS is negotiated later.
    pub fn connect_transport(
        &mut self,
        mut transport: Box<dyn Transport>,
        server_hostname: &str,
    ) -> Result<ServerResponse> {
        self.require_disconnected()?;
        transport.set_timeout(self.timeout)?;
        let mut stream = ManageSieveStream::new(transport).with_id(server_hostname.to_string());
        let (capabilities, response) = read_capabilities(&mut stream).map_err(|err| {
            _ = stream.shutdown();
            err
        })?;
        if !response.is_ok() {
            _ = stream.shutdown();
            return Err(Error::new(format!(
                "{} rejected the connection: {}",
                server_hostname, response
            ))
            .set_kind(ErrorKind::Network(NetworkErrorKind::ConnectionFailed)));
        }
        if !capabilities.is_valid() {
            log::debug!(
                "{}: incomplete capability announcement {:?}",
                server_hostname,
                capabilities
            );
        }
        self.state = if stream.is_secure() {
            SessionState::Secured
        } else {
            SessionState::Connected
        };
        debug!("{}: session state {:?}", server_hostname, self.state);
        self.server_hostname = server_hostname.to_string();
        self.capabilities = Some(capabilities);
        self.stream = Some(stream);
        Ok(response)
    }

    /// Upgrade the connection with `STARTTLS` and read the capabilities the
    /// server announces over TLS.
    ///
    /// A `NO` reply leaves the session unchanged. A failed handshake
    /// disconnects it.
    pub fn starttls(&mut self) -> Result<ServerResponse> {
        if self.state != SessionState::Connected {
            return Err(Error::new(format!(
                "STARTTLS is not allowed in state {:?}.",
                self.state
            ))
            .set_kind(ErrorKind::ProtocolError));
        }
        if !self.capabilities.as_ref().map(ServerCapabilities::has_tls).unwrap_or(false) {
            return Err(Error::new("Server does not announce STARTTLS.")
                .set_kind(ErrorKind::ProtocolError));
        }
        let response = self.simple_command(Command::StartTls)?;
        if !response.is_ok() {
            return Ok(response);
        }

        let Some(stream) = self.stream.take() else {
            return Err(Error::new("Transport missing after STARTTLS.").set_kind(ErrorKind::Bug));
        };
        let id = stream.id.clone();
        let transport = match stream
            .into_transport()
            .start_tls(&self.server_hostname, &self.tls_policy)
        {
            Ok(t) => t,
            Err(err) => {
                self.disconnect();
                return Err(err);
            }
        };
        self.stream = Some(ManageSieveStream::new(transport).with_id(id));
        // The transport is encrypted now, the old capabilities no longer apply.
        let (capabilities, cap_response) = match self.with_stream(read_capabilities) {
            Ok(ret) => ret,
            Err(err) => {
                self.disconnect();
                return Err(err);
            }
        };
        if !cap_response.is_ok() {
            log::debug!(
                "{}: no capabilities after STARTTLS: {}",
                self.server_hostname,
                cap_response
            );
            self.disconnect();
            return Ok(cap_response);
        }
        self.capabilities = Some(capabilities);
        self.state = SessionState::Secured;
        debug!("{}: session state {:?}", self.server_hostname, self.state);
        Ok(response)
    }

    /// Send `CAPABILITY` and replace the stored capabilities.
    pub fn capability(&mut self) -> Result<ServerResponse> {
        self.require_connected()?;
        let (capabilities, response) = self.with_stream(|stream| {
            stream.send_command(Command::Capability)?;
            read_capabilities(stream)
        })?;
        if response.is_ok() {
            self.capabilities = Some(capabilities);
        }
        self.check_bye(&response);
        Ok(response)
    }

    /// Authenticate with `mechanism`, or the first mechanism both sides
    /// support.
    pub fn authenticate(
        &mut self,
        username: &str,
        password: &str,
        mechanism: Option<&str>,
    ) -> Result<ServerResponse> {
        self.check_can_authenticate()?;
        let credentials = Credentials {
            authzid: None,
            username: username.to_string(),
            password: password.to_string(),
        };
        let capabilities = self.capabilities.as_ref().ok_or_else(|| {
            Error::new("Server capabilities are unknown.").set_kind(ErrorKind::ProtocolError)
        })?;
        let mechanism = self
            .mechanisms
            .select(capabilities, mechanism, &credentials)?;
        self.authenticate_with(mechanism)
    }

    /// Run a SASL exchange with `mechanism`.
    ///
    /// On `OK` the session is authenticated; a `NO` reply leaves it unchanged.
    /// If the mechanism cannot answer a challenge the exchange is aborted and
    /// its error returned.
    pub fn authenticate_with(
        &mut self,
        mut mechanism: Box<dyn SaslMechanism>,
    ) -> Result<ServerResponse> {
        self.check_can_authenticate()?;
        let trace = self
            .stream
            .as_ref()
            .map(ManageSieveStream::is_trace_enabled)
            .unwrap_or(false);
        if let Some(stream) = self.stream.as_mut() {
            stream.set_trace(false);
        }
        let result = self.with_stream(|stream| sasl_exchange(stream, mechanism.as_mut()));
        if let Some(stream) = self.stream.as_mut() {
            stream.set_trace(trace);
        }
        let response = result?;
        self.check_bye(&response);
        if response.is_ok() {
            self.state = SessionState::Authenticated;
            log::debug!(
                "{}: authenticated with {}",
                self.server_hostname,
                mechanism.name()
            );
        }
        Ok(response)
    }

    pub fn putscript(&mut self, name: &str, script: &str) -> Result<ServerResponse> {
        self.require_authenticated()?;
        self.simple_command(Command::PutScript { name, script })
    }

    /// Ask the server to validate `script` without storing it.
    pub fn checkscript(&mut self, script: &str) -> Result<ServerResponse> {
        self.require_authenticated()?;
        self.simple_command(Command::CheckScript { script })
    }

    /// Activate script `name`. An empty name deactivates all scripts.
    pub fn setactive(&mut self, name: &str) -> Result<ServerResponse> {
        self.require_authenticated()?;
        self.simple_command(Command::SetActive { name })
    }

    /// [`setactive`](Self::setactive) that also updates the `active` flag of
    /// `scripts` on success.
    pub fn activate_script(
        &mut self,
        scripts: &mut [SieveScript],
        name: &str,
    ) -> Result<ServerResponse> {
        let response = self.setactive(name)?;
        if response.is_ok() {
            for script in scripts.iter_mut() {
                let active = !name.is_empty() && script.name() == name;
                script.set_active(active);
            }
        }
        Ok(response)
    }

    /// List the stored scripts into `scripts`, replacing its contents.
    pub fn listscripts(&mut self, scripts: &mut Vec<SieveScript>) -> Result<ServerResponse> {
        self.require_authenticated()?;
        let (lines, response) = self.with_stream(|stream| {
            stream.send_command(Command::ListScripts)?;
            stream.read_response()
        })?;
        self.check_bye(&response);
        let mut listed = Vec::with_capacity(lines.len());
        for line in lines {
            let tokens = tokenize(&line)?;
            match tokens.as_slice() {
                [Token::String(name)] => listed.push(SieveScript::new(name.as_str(), None, false)),
                [Token::String(name), Token::Atom(active)]
                    if active.eq_ignore_ascii_case("ACTIVE") =>
                {
                    listed.push(SieveScript::new(name.as_str(), None, true))
                }
                _ => {
                    return Err(Error::new(format!(
                        "Invalid LISTSCRIPTS line {:?}.",
                        String::from_utf8_lossy(&line)
                    ))
                    .set_kind(ErrorKind::Parse));
                }
            }
        }
        *scripts = listed;
        Ok(response)
    }

    /// Download script `name`.
    pub fn getscript(&mut self, name: &str) -> Result<ResponseWithPayload> {
        self.require_authenticated()?;
        let (lines, response) = self.with_stream(|stream| {
            stream.send_command(Command::GetScript { name })?;
            stream.read_response()
        })?;
        self.check_bye(&response);
        let mut lines = lines.into_iter();
        let payload = lines.next().map(|l| decode_string(&l)).transpose()?;
        if lines.next().is_some() {
            log::debug!("{}: ignoring extra GETSCRIPT lines", self.server_hostname);
        }
        Ok(ResponseWithPayload::new(response, payload))
    }

    /// [`getscript`](Self::getscript) that stores the body in `script` on
    /// success.
    pub fn getscript_into(&mut self, script: &mut SieveScript) -> Result<ServerResponse> {
        let ResponseWithPayload { response, payload } = self.getscript(script.name())?;
        if response.is_ok() {
            script.set_body(payload);
        }
        Ok(response)
    }

    pub fn deletescript(&mut self, name: &str) -> Result<ServerResponse> {
        self.require_authenticated()?;
        self.simple_command(Command::DeleteScript { name })
    }

    pub fn renamescript(&mut self, old_name: &str, new_name: &str) -> Result<ServerResponse> {
        self.require_authenticated()?;
        self.simple_command(Command::RenameScript { old_name, new_name })
    }

    /// Ask whether a script `name` of `size` octets would fit.
    pub fn havespace(&mut self, name: &str, size: usize) -> Result<ServerResponse> {
        self.require_authenticated()?;
        self.simple_command(Command::HaveSpace { name, size })
    }

    pub fn noop(&mut self, tag: Option<&str>) -> Result<ServerResponse> {
        self.require_connected()?;
        self.simple_command(Command::Noop { tag })
    }

    /// End the session. The transport is closed even if `LOGOUT` fails.
    /// Returns `None` if there was no session.
    pub fn logout(&mut self) -> Result<Option<ServerResponse>> {
        if self.stream.is_none() {
            self.disconnect();
            return Ok(None);
        }
        let result = self.with_stream(|stream| {
            stream.send_command(Command::Logout)?;
            let (_, response) = stream.read_response()?;
            Ok(response)
        });
        self.disconnect();
        result.map(Some)
    }

    fn simple_command(&mut self, command: Command<'_>) -> Result<ServerResponse> {
        let (lines, response) = self.with_stream(|stream| {
            stream.send_command(command)?;
            stream.read_response()
        })?;
        if !lines.is_empty() {
            log::debug!(
                "{}: ignoring {} unexpected lines before {} reply",
                self.server_hostname,
                lines.len(),
                command.keyword()
            );
        }
        self.check_bye(&response);
        Ok(response)
    }

    /// Run `op` on the stream. Fatal errors disconnect the session.
    fn with_stream<T>(
        &mut self,
        op: impl FnOnce(&mut ManageSieveStream) -> Result<T>,
    ) -> Result<T> {
        let stream = self.stream.as_mut().ok_or_else(|| {
            Error::new("Not connected.").set_kind(ErrorKind::ProtocolError)
        })?;
        match op(stream) {
            Err(err) if err.is_fatal() => {
                log::debug!("{}: dropping session: {}", self.server_hostname, err);
                self.disconnect();
                Err(err)
            }
            other => other,
        }
    }

    fn check_bye(&mut self, response: &ServerResponse) {
        if response.is_bye() {
            log::debug!(
                "{}: server closed the session: {}",
                self.server_hostname,
                response
            );
            self.disconnect();
        }
    }

    fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(err) = stream.shutdown() {
                log::debug!("{}: shutdown failed: {}", self.server_hostname, err);
            }
        }
        self.capabilities = None;
        self.state = SessionState::Disconnected;
    }

    fn require_disconnected(&self) -> Result<()> {
        if self.state != SessionState::Disconnected {
            return Err(Error::new("Already connected.").set_kind(ErrorKind::ProtocolError));
        }
        Ok(())
    }

    fn require_connected(&self) -> Result<()> {
        if self.state == SessionState::Disconnected {
            return Err(Error::new("Not connected.").set_kind(ErrorKind::ProtocolError));
        }
        Ok(())
    }

    fn require_authenticated(&self) -> Result<()> {
        if self.state != SessionState::Authenticated {
            return Err(Error::new(format!(
                "Command requires an authenticated session, state is {:?}.",
                self.state
            ))
            .set_kind(ErrorKind::ProtocolError));
        }
        Ok(())
    }

    fn check_can_authenticate(&self) -> Result<()> {
        match self.state {
            SessionState::Disconnected => {
                return Err(Error::new("Cannot authenticate before connecting.")
                    .set_kind(ErrorKind::ProtocolError));
            }
            SessionState::Authenticated => {
                return Err(
                    Error::new("Already authenticated.").set_kind(ErrorKind::ProtocolError)
                );
            }
            SessionState::Connected | SessionState::Secured => {}
        }
        if self.capabilities.is_none() {
            return Err(
                Error::new("Server capabilities are unknown.").set_kind(ErrorKind::ProtocolError)
            );
        }
        if !self.is_secured() && !self.allow_insecure_auth {
            return Err(Error::new(
                "Refusing to authenticate over an unencrypted connection.",
            )
            .set_details("Use STARTTLS or set `allow_insecure_auth`.")
            .set_kind(ErrorKind::ProtocolError));
        }
        Ok(())
    }
}
