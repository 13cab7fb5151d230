//
// meli - managesieve
//
// Copyright 2017 Emmanouil Pitsidianakis <manos@pitsidianak.is>
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

//! An error object for `managesieve`.
//!
//! Server rejections (`NO`/`BYE` replies) are *not* errors; they are returned
//! as [`ServerResponse`](crate::response::ServerResponse) values. An [`Error`]
//! is raised for malformed wire data ([`ErrorKind::Parse`]), for operations
//! attempted in the wrong session state ([`ErrorKind::ProtocolError`]) and for
//! transport failures ([`ErrorKind::Network`], [`ErrorKind::TimedOut`]).

use std::{borrow::Cow, io, result, str, string, sync::Arc};

pub mod network;

pub use network::NetworkErrorKind;

pub type Result<T> = result::Result<T, Error>;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ErrorKind {
    #[default]
    None,
    /// Malformed wire grammar. Fatal to the current read, not to the session.
    Parse,
    /// Operation attempted in an illegal session state.
    ProtocolError,
    /// Transport level failure. Fatal to the session.
    Network(NetworkErrorKind),
    /// A blocking read or write exceeded the configured timeout. Fatal to the
    /// session.
    TimedOut,
    Authentication,
    Configuration,
    NotSupported,
    External,
    Bug,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            fmt,
            "{}",
            match self {
                Self::None => "None",
                Self::Parse => "Parse error",
                Self::ProtocolError => "Protocol error",
                Self::Network(inner) => inner.as_str(),
                Self::TimedOut => "Timed out",
                Self::Authentication => "Authentication",
                Self::Configuration => "Configuration",
                Self::NotSupported => "Not supported",
                Self::External => "External error",
                Self::Bug => "Bug, please report this!",
            }
        )
    }
}

impl ErrorKind {
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut)
    }

    pub const fn is_parse(&self) -> bool {
        matches!(self, Self::Parse)
    }

    pub const fn is_protocol_error(&self) -> bool {
        matches!(self, Self::ProtocolError)
    }
}

#[derive(Clone, Debug)]
pub struct Error {
    pub summary: Cow<'static, str>,
    pub details: Option<Cow<'static, str>>,
    pub source: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
    pub kind: ErrorKind,
}

pub trait IntoError {
    fn set_err_summary<M>(self, msg: M) -> Error
    where
        M: Into<Cow<'static, str>>;

    fn set_err_details<M>(self, msg: M) -> Error
    where
        M: Into<Cow<'static, str>>;
    fn set_err_kind(self, kind: ErrorKind) -> Error;
}

pub trait ResultIntoError<T> {
    fn chain_err_summary<M, F>(self, msg_fn: F) -> Result<T>
    where
        F: Fn() -> M,
        M: Into<Cow<'static, str>>;

    fn chain_err_details<M, F>(self, msg_fn: F) -> Result<T>
    where
        F: Fn() -> M,
        M: Into<Cow<'static, str>>;

    fn chain_err_kind(self, kind: ErrorKind) -> Result<T>;
}

impl<I: Into<Error>> IntoError for I {
    #[inline]
    fn set_err_summary<M>(self, msg: M) -> Error
    where
        M: Into<Cow<'static, str>>,
    {
        let err: Error = self.into();
        err.set_summary(msg)
    }

    #[inline]
    fn set_err_details<M>(self, msg: M) -> Error
    where
        M: Into<Cow<'static, str>>,
    {
        let err: Error = self.into();
        err.set_details(msg)
    }

    #[inline]
    fn set_err_kind(self, kind: ErrorKind) -> Error {
        let err: Error = self.into();
        err.set_kind(kind)
    }
}

impl<T, I: Into<Error>> ResultIntoError<T> for std::result::Result<T, I> {
    #[inline]
    fn chain_err_summary<M, F>(self, msg_fn: F) -> Result<T>
    where
        F: Fn() -> M,
        M: Into<Cow<'static, str>>,
    {
        self.map_err(|err| err.set_err_summary(msg_fn()))
    }

    #[inline]
    fn chain_err_details<M, F>(self, msg_fn: F) -> Result<T>
    where
        F: Fn() -> M,
        M: Into<Cow<'static, str>>,
    {
        self.map_err(|err| err.set_err_details(msg_fn()))
    }

    #[inline]
    fn chain_err_kind(self, kind: ErrorKind) -> Result<T> {
        self.map_err(|err| err.set_err_kind(kind))
    }
}

impl Error {
    pub fn new<M>(msg: M) -> Self
    where
        M: Into<Cow<'static, str>>,
    {
        Self {
            summary: msg.into(),
            details: None,
            source: None,
            kind: ErrorKind::None,
        }
    }

    pub fn set_details<M>(mut self, details: M) -> Self
    where
        M: Into<Cow<'static, str>>,
    {
        if let Some(old_details) = self.details.as_ref() {
            self.details = Some(format!("{}. {}", old_details, details.into()).into());
        } else {
            self.details = Some(details.into());
        }
        self
    }

    pub fn set_summary<M>(mut self, summary: M) -> Self
    where
        M: Into<Cow<'static, str>>,
    {
        let old_summary = std::mem::replace(&mut self.summary, summary.into());
        self.set_details(old_summary)
    }

    pub fn set_source(
        mut self,
        new_val: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        self.source = new_val;
        self
    }

    pub fn set_kind(mut self, new_val: ErrorKind) -> Self {
        self.kind = new_val;
        self
    }

    /// The session that produced this error can no longer be used and must be
    /// reconnected.
    pub const fn is_fatal(&self) -> bool {
        matches!(self.kind, ErrorKind::Network(_) | ErrorKind::TimedOut)
    }

    pub const fn is_recoverable(&self) -> bool {
        !self.is_fatal()
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.summary)?;
        if let Some(details) = self.details.as_ref() {
            if !details.trim().is_empty() {
                write!(f, "\n{}", details)?;
            }
        }
        if let Some(source) = self.source.as_ref() {
            write!(f, "\nCaused by: {}", source)?;
        }
        if self.kind != ErrorKind::None {
            write!(f, "\nError kind: {}", self.kind)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|s| &(*(*s)) as &(dyn std::error::Error + 'static))
    }
}

impl From<io::Error> for Error {
    #[inline]
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ErrorKind::TimedOut,
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected => {
                ErrorKind::Network(NetworkErrorKind::ConnectionFailed)
            }
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => {
                ErrorKind::Network(NetworkErrorKind::ConnectionClosed)
            }
            _ => ErrorKind::Network(NetworkErrorKind::Io),
        };
        let s = err.to_string();
        Self::new(s)
            .set_details(format!("{:?}", err.kind()))
            .set_source(Some(Arc::new(err)))
            .set_kind(kind)
    }
}

impl<'a> From<Cow<'a, str>> for Error {
    #[inline]
    fn from(err: Cow<'_, str>) -> Self {
        Self::new(err.to_string())
    }
}

impl From<string::FromUtf8Error> for Error {
    #[inline]
    fn from(err: string::FromUtf8Error) -> Self {
        Self::new(err.to_string())
            .set_source(Some(Arc::new(err)))
            .set_kind(ErrorKind::Parse)
    }
}

impl From<str::Utf8Error> for Error {
    #[inline]
    fn from(err: str::Utf8Error) -> Self {
        Self::new(err.to_string())
            .set_source(Some(Arc::new(err)))
            .set_kind(ErrorKind::Parse)
    }
}

impl From<std::num::ParseIntError> for Error {
    #[inline]
    fn from(err: std::num::ParseIntError) -> Self {
        Self::new(err.to_string())
            .set_source(Some(Arc::new(err)))
            .set_kind(ErrorKind::Parse)
    }
}

impl From<base64::DecodeError> for Error {
    #[inline]
    fn from(err: base64::DecodeError) -> Self {
        Self::new("Could not decode base64 payload.")
            .set_source(Some(Arc::new(err)))
            .set_kind(ErrorKind::Parse)
    }
}

impl From<toml::de::Error> for Error {
    #[inline]
    fn from(err: toml::de::Error) -> Self {
        Self::new("Could not parse configuration.")
            .set_details(err.to_string())
            .set_source(Some(Arc::new(err)))
            .set_kind(ErrorKind::Configuration)
    }
}

impl<'a> From<nom::Err<nom::error::Error<&'a [u8]>>> for Error {
    #[inline]
    fn from(err: nom::Err<nom::error::Error<&'a [u8]>>) -> Self {
        let msg = match err {
            nom::Err::Incomplete(_) => "Incomplete input".to_string(),
            nom::Err::Error(ref inner) | nom::Err::Failure(ref inner) => format!(
                "{:?} at {:?}",
                inner.code,
                String::from_utf8_lossy(inner.input)
            ),
        };
        Self::new("Could not parse server response.")
            .set_details(msg)
            .set_kind(ErrorKind::Parse)
    }
}

#[cfg(feature = "tls")]
impl From<native_tls::Error> for Error {
    #[inline]
    fn from(err: native_tls::Error) -> Self {
        Self::new(err.to_string())
            .set_source(Some(Arc::new(err)))
            .set_kind(ErrorKind::Network(NetworkErrorKind::InvalidTLSConnection))
    }
}

#[cfg(feature = "tls")]
impl<S: std::fmt::Debug + 'static> From<native_tls::HandshakeError<S>> for Error {
    #[inline]
    fn from(err: native_tls::HandshakeError<S>) -> Self {
        let kind = match err {
            native_tls::HandshakeError::Failure(ref inner)
                if inner.to_string().to_ascii_lowercase().contains("certificate") =>
            {
                NetworkErrorKind::BadServerCertificate
            }
            _ => NetworkErrorKind::TLSConnectionFailed,
        };
        Self::new(err.to_string()).set_kind(ErrorKind::Network(kind))
    }
}

impl From<&str> for Error {
    #[inline]
    fn from(err: &str) -> Self {
        Self::new(err.to_string())
    }
}

impl From<String> for Error {
    #[inline]
    fn from(err: String) -> Self {
        Self::new(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_io_timeout_kind() {
        let err = Error::from(io::Error::new(io::ErrorKind::TimedOut, "read timed out"));
        assert_eq!(err.kind, ErrorKind::TimedOut);
        assert!(err.is_fatal());

        let err = Error::from(io::Error::new(io::ErrorKind::BrokenPipe, "pipe"));
        assert_eq!(
            err.kind,
            ErrorKind::Network(NetworkErrorKind::ConnectionClosed)
        );
        assert!(err.is_fatal());
    }

    #[test]
    fn test_error_chain_summary() {
        let res: Result<()> = Err(Error::new("inner").set_kind(ErrorKind::Parse));
        let err = res.chain_err_summary(|| "outer").unwrap_err();
        assert_eq!(err.summary, "outer");
        assert_eq!(err.details.as_deref(), Some("inner"));
        assert_eq!(err.kind, ErrorKind::Parse);
        assert!(err.is_recoverable());
    }
}
