//
// meli - managesieve
//
// Copyright 2024 Emmanouil Pitsidianakis <manos@pitsidianak.is>
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

//! Error kinds for network related errors.

use super::ErrorKind;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NetworkErrorKind {
    /// Unspecified
    None,
    /// Name lookup of host failed.
    HostLookupFailed,
    /// Bad server certificate
    BadServerCertificate,
    /// Connection failed
    ConnectionFailed,
    /// Connection was closed by the peer, or by us.
    ConnectionClosed,
    /// TLS Connection failed
    TLSConnectionFailed,
    /// Invalid TLS connection
    InvalidTLSConnection,
    /// IO Error
    Io,
}

impl NetworkErrorKind {
    pub const fn as_str(&self) -> &'static str {
        use NetworkErrorKind::*;
        match self {
            None => "Network",
            HostLookupFailed => "Host lookup failed",
            BadServerCertificate => "Bad server certificate",
            ConnectionFailed => "Connection failed",
            ConnectionClosed => "Connection closed",
            TLSConnectionFailed => "TLS connection failed",
            InvalidTLSConnection => "Invalid TLS connection",
            Io => "IO error",
        }
    }
}

impl From<NetworkErrorKind> for ErrorKind {
    fn from(kind: NetworkErrorKind) -> Self {
        Self::Network(kind)
    }
}
