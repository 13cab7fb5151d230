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

//! Byte stream transports (TCP/TLS) a session runs over.

use std::{
    io::{Read, Write},
    net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs},
    time::Duration,
};

use crate::{
    conf::TlsPolicy,
    error::{Error, ErrorKind, NetworkErrorKind, Result, ResultIntoError},
};

/// A duplex byte stream owned by a session.
pub trait Transport: Read + Write + Send + std::fmt::Debug {
    /// Negotiate TLS over this stream and return the encrypted stream.
    fn start_tls(self: Box<Self>, domain: &str, policy: &TlsPolicy) -> Result<Box<dyn Transport>>;

    /// Bound blocking reads and writes. `None` blocks forever.
    fn set_timeout(&mut self, _dur: Option<Duration>) -> Result<()> {
        Ok(())
    }

    fn is_secure(&self) -> bool;

    fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }

    /// Toggle byte tracing, if the transport supports it.
    fn set_trace(&mut self, _val: bool) {}

    fn is_trace_enabled(&self) -> bool {
        false
    }
}

pub enum Connection {
    Tcp {
        inner: TcpStream,
        id: Option<&'static str>,
        trace: bool,
    },
    #[cfg(feature = "tls")]
    Tls {
        inner: native_tls::TlsStream<Self>,
        id: Option<&'static str>,
        trace: bool,
    },
}

use Connection::*;

impl std::fmt::Debug for Connection {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Tcp {
                ref trace,
                ref inner,
                ref id,
            } => fmt
                .debug_struct(stringify!(Connection))
                .field("variant", &stringify!(Tcp))
                .field(stringify!(trace), trace)
                .field(stringify!(id), id)
                .field(stringify!(inner), inner)
                .finish(),
            #[cfg(feature = "tls")]
            Tls {
                ref trace,
                ref inner,
                ref id,
            } => fmt
                .debug_struct(stringify!(Connection))
                .field("variant", &stringify!(Tls))
                .field(stringify!(trace), trace)
                .field(stringify!(id), id)
                .field(stringify!(inner), inner.get_ref())
                .finish(),
        }
    }
}

macro_rules! conn_trace {
    ($conn:expr, $fmt:literal, $($t:tt)*) => {{
        let id = $conn.id();
        log::trace!(
            std::concat!("{}{}{}", $fmt),
            if id.is_some() { "[" } else { "" },
            id.unwrap_or_default(),
            if id.is_some() { "]: " } else { "" },
            $($t)*
        );
    }};
}

/// Resolve addresses and order them to alternate between IPv6 and IPv4.
fn prepare_addresses(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    let resolved = (host, port).to_socket_addrs().map_err(|err| {
        Error::new(format!("Could not lookup address {}:{}", host, port))
            .set_details(err.to_string())
            .set_kind(ErrorKind::Network(NetworkErrorKind::HostLookupFailed))
    })?;
    let (addrs_v4, addrs_v6): (Vec<_>, Vec<_>) =
        resolved.partition(|a| matches!(a, SocketAddr::V4(_)));
    let mut addrs = Vec::with_capacity(addrs_v4.len() + addrs_v6.len());
    let (mut left, mut right) = (addrs_v6.into_iter(), addrs_v4.into_iter());
    while let Some(a) = left.next() {
        addrs.push(a);
        std::mem::swap(&mut left, &mut right);
    }
    addrs.extend(right);
    if addrs.is_empty() {
        return Err(
            Error::new(format!("Could not lookup address {}:{}", host, port))
                .set_kind(ErrorKind::Network(NetworkErrorKind::HostLookupFailed)),
        );
    }
    Ok(addrs)
}

impl Connection {
    /// Open a TCP connection to `host`, trying each resolved address in turn.
    pub fn connect(host: &str, port: u16, timeout: Option<Duration>) -> Result<Self> {
        let mut last_err = None;
        for addr in prepare_addresses(host, port)? {
            let attempt = match timeout {
                Some(dur) => TcpStream::connect_timeout(&addr, dur),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(inner) => {
                    log::debug!("Connected to {}:{} via {}", host, port, addr);
                    return Ok(Self::new_tcp(inner));
                }
                Err(err) => {
                    log::debug!("Could not connect to {}: {}", addr, err);
                    last_err = Some(err);
                }
            }
        }
        let err = last_err.map(Error::from).unwrap_or_else(|| {
            Error::new("Connection failed.")
                .set_kind(ErrorKind::Network(NetworkErrorKind::ConnectionFailed))
        });
        Err(err.set_summary(format!("Could not connect to {}:{}.", host, port)))
    }

    pub fn new_tcp(inner: TcpStream) -> Self {
        Self::Tcp {
            inner,
            id: None,
            trace: false,
        }
    }

    #[cfg(feature = "tls")]
    pub fn new_tls(mut inner: native_tls::TlsStream<Self>) -> Self {
        let trace = inner.get_ref().is_trace_enabled();
        let id = inner.get_ref().id();
        if trace {
            inner.get_mut().set_trace(false);
        }
        Self::Tls { inner, id, trace }
    }

    pub fn trace(mut self, val: bool) -> Self {
        self.set_trace(val);
        self
    }

    pub fn with_id(mut self, val: &'static str) -> Self {
        match self {
            Tcp { ref mut id, .. } => *id = Some(val),
            #[cfg(feature = "tls")]
            Tls { ref mut id, .. } => *id = Some(val),
        }
        self
    }

    fn tcp_stream(&self) -> &TcpStream {
        match self {
            Tcp { ref inner, .. } => inner,
            #[cfg(feature = "tls")]
            Tls { ref inner, .. } => inner.get_ref().tcp_stream(),
        }
    }

    fn id(&self) -> Option<&'static str> {
        match self {
            Tcp { id, .. } => *id,
            #[cfg(feature = "tls")]
            Tls { id, .. } => *id,
        }
    }

    #[cfg(feature = "tls")]
    fn tls_connector(policy: &TlsPolicy) -> Result<native_tls::TlsConnector> {
        let mut connector = native_tls::TlsConnector::builder();
        match policy {
            TlsPolicy::Verify => {}
            TlsPolicy::AcceptInvalidCerts => {
                connector.danger_accept_invalid_certs(true);
            }
            TlsPolicy::CustomRoot(path) => {
                let bytes = std::fs::read(path)
                    .chain_err_summary(|| {
                        format!("Could not read CA certificate {}", path.display())
                    })
                    .chain_err_kind(ErrorKind::Configuration)?;
                let cert = if bytes.starts_with(b"-----BEGIN") {
                    native_tls::Certificate::from_pem(&bytes)
                } else {
                    native_tls::Certificate::from_der(&bytes)
                }
                .chain_err_summary(|| format!("Invalid CA certificate {}", path.display()))
                .chain_err_kind(ErrorKind::Configuration)?;
                connector.add_root_certificate(cert);
            }
        }
        Ok(connector.build()?)
    }

    #[cfg(feature = "tls")]
    pub fn into_tls(self, domain: &str, policy: &TlsPolicy) -> Result<Self> {
        if matches!(self, Tls { .. }) {
            return Err(Error::new("Connection is already encrypted.")
                .set_kind(ErrorKind::Network(NetworkErrorKind::InvalidTLSConnection)));
        }
        let connector = Self::tls_connector(policy)?;
        let mut result = connector.connect(domain, self);
        loop {
            match result {
                Ok(stream) => return Ok(Self::new_tls(stream)),
                Err(native_tls::HandshakeError::WouldBlock(midhandshake_stream)) => {
                    result = midhandshake_stream.handshake();
                }
                Err(err) => {
                    return Err(Error::from(err)
                        .set_summary(format!("Could not initiate TLS negotiation to {}.", domain)));
                }
            }
        }
    }

    #[cfg(not(feature = "tls"))]
    pub fn into_tls(self, domain: &str, _policy: &TlsPolicy) -> Result<Self> {
        Err(Error::new(format!(
            "Could not initiate TLS negotiation to {}: this build has no TLS support.",
            domain
        ))
        .set_kind(ErrorKind::NotSupported))
    }
}

impl Transport for Connection {
    fn start_tls(self: Box<Self>, domain: &str, policy: &TlsPolicy) -> Result<Box<dyn Transport>> {
        Ok(Box::new((*self).into_tls(domain, policy)?))
    }

    fn set_timeout(&mut self, dur: Option<Duration>) -> Result<()> {
        if self.is_trace_enabled() {
            conn_trace!(self, "{:?} set_timeout({:?})", self, dur);
        }
        let tcp = self.tcp_stream();
        tcp.set_read_timeout(dur)?;
        tcp.set_write_timeout(dur)?;
        Ok(())
    }

    fn is_secure(&self) -> bool {
        match self {
            Tcp { .. } => false,
            #[cfg(feature = "tls")]
            Tls { .. } => true,
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.is_trace_enabled() {
            conn_trace!(self, "{:?} shutdown()", self);
        }
        match self {
            Tcp { ref inner, .. } => match inner.shutdown(Shutdown::Both) {
                Err(err) if err.kind() != std::io::ErrorKind::NotConnected => Err(err.into()),
                _ => Ok(()),
            },
            #[cfg(feature = "tls")]
            Tls { ref mut inner, .. } => {
                if let Err(err) = inner.shutdown() {
                    log::debug!("TLS close_notify failed: {}", err);
                }
                inner.get_mut().shutdown()
            }
        }
    }

    fn set_trace(&mut self, val: bool) {
        match self {
            Tcp { ref mut trace, .. } => *trace = val,
            #[cfg(feature = "tls")]
            Tls { ref mut trace, .. } => *trace = val,
        }
    }

    fn is_trace_enabled(&self) -> bool {
        match self {
            Tcp { trace, .. } => *trace,
            #[cfg(feature = "tls")]
            Tls { trace, .. } => *trace,
        }
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let res = match self {
            Tcp { ref mut inner, .. } => inner.read(buf),
            #[cfg(feature = "tls")]
            Tls { ref mut inner, .. } => inner.read(buf),
        };
        if self.is_trace_enabled() {
            match &res {
                Ok(0) => conn_trace!(self, "{:?} read EOF", self),
                Ok(len) => conn_trace!(
                    self,
                    "{:?} read {:?} bytes:{:?}",
                    self,
                    len,
                    String::from_utf8_lossy(&buf[..*len])
                ),
                Err(err) => conn_trace!(self, "{:?} could not read {:?}", self, err),
            }
        }
        res
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.is_trace_enabled() {
            if buf.len() >= 12 && buf[..12].eq_ignore_ascii_case(b"AUTHENTICATE") {
                conn_trace!(self, "{:?} writing {} bytes:AUTHENTICATE ..", self, buf.len());
            } else {
                conn_trace!(
                    self,
                    "{:?} writing {} bytes:{:?}",
                    self,
                    buf.len(),
                    String::from_utf8_lossy(buf)
                );
            }
        }
        match self {
            Tcp { ref mut inner, .. } => inner.write(buf),
            #[cfg(feature = "tls")]
            Tls { ref mut inner, .. } => inner.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Tcp { ref mut inner, .. } => inner.flush(),
            #[cfg(feature = "tls")]
            Tls { ref mut inner, .. } => inner.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    #[test]
    fn test_transport_tcp_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = [0; 6];
            sock.read_exact(&mut buf).unwrap();
            sock.write_all(b"OK\r\n").unwrap();
            buf
        });
        let mut conn = Connection::connect("127.0.0.1", port, Some(Duration::from_secs(5)))
            .unwrap()
            .trace(true)
            .with_id("test");
        assert!(!conn.is_secure());
        assert!(conn.is_trace_enabled());
        conn.set_timeout(Some(Duration::from_secs(5))).unwrap();
        conn.write_all(b"NOOP\r\n").unwrap();
        let mut buf = [0; 4];
        conn.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"OK\r\n");
        assert_eq!(&server.join().unwrap(), b"NOOP\r\n");
        conn.shutdown().unwrap();
    }

    #[test]
    fn test_transport_host_lookup_failure() {
        let err = Connection::connect("host.invalid", 4190, Some(Duration::from_secs(1)))
            .unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::Network(NetworkErrorKind::HostLookupFailed)
        );
    }

    #[test]
    fn test_transport_connection_refused() {
        // Bind then drop to get a port nothing listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = Connection::connect("127.0.0.1", port, Some(Duration::from_secs(1)))
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(err.kind.is_network());
    }
}
