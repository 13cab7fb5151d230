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

//! SASL mechanisms for `AUTHENTICATE`.
//!
//! A mechanism only transforms challenges into responses; framing, base64 and
//! the exchange loop live in [`ManageSieveConnection`](crate::ManageSieveConnection).

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use indexmap::IndexMap;

use crate::{
    capabilities::ServerCapabilities,
    error::{Error, ErrorKind, Result},
};

pub fn encode_payload(payload: &[u8]) -> String {
    BASE64.encode(payload)
}

pub fn decode_payload(payload: &str) -> Result<Vec<u8>> {
    Ok(BASE64.decode(payload.trim())?)
}

/// Credentials handed to mechanism factories.
#[derive(Clone, Default)]
pub struct Credentials {
    /// Identity to act as, if different from `username`.
    pub authzid: Option<String>,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct("Credentials")
            .field("authzid", &self.authzid)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One side of a SASL exchange.
pub trait SaslMechanism: std::fmt::Debug + Send {
    /// Registered mechanism name, eg `PLAIN`.
    fn name(&self) -> &str;

    /// Response sent along with `AUTHENTICATE`, if the mechanism has one.
    fn initial_response(&mut self) -> Result<Option<Vec<u8>>>;

    /// Answer a decoded server challenge. Returning an error aborts the
    /// exchange.
    fn respond(&mut self, challenge: &[u8]) -> Result<Vec<u8>>;

    /// Check the additional data of a successful `OK (SASL "...")` reply.
    fn verify_final(&mut self, _data: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// RFC 4616 The PLAIN SASL Mechanism
///
/// ```text
/// message   = [authzid] UTF8NUL authcid UTF8NUL passwd
/// ```
#[derive(Clone)]
pub struct Plain {
    credentials: Credentials,
}

impl Plain {
    pub const NAME: &'static str = "PLAIN";

    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    fn message(&self) -> Vec<u8> {
        let Credentials {
            authzid,
            username,
            password,
        } = &self.credentials;
        let authzid = authzid.as_deref().unwrap_or_default();
        let mut buf = Vec::with_capacity(2 + authzid.len() + username.len() + password.len());
        buf.extend_from_slice(authzid.as_bytes());
        buf.push(b'\0');
        buf.extend_from_slice(username.as_bytes());
        buf.push(b'\0');
        buf.extend_from_slice(password.as_bytes());
        buf
    }
}

impl std::fmt::Debug for Plain {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct(Self::NAME)
            .field("credentials", &self.credentials)
            .finish()
    }
}

impl SaslMechanism for Plain {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn initial_response(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(Some(self.message()))
    }

    fn respond(&mut self, challenge: &[u8]) -> Result<Vec<u8>> {
        Err(Error::new("Unexpected PLAIN challenge from server.")
            .set_details(String::from_utf8_lossy(challenge).into_owned())
            .set_kind(ErrorKind::Authentication))
    }
}

/// The non-standard `LOGIN` mechanism, which sends the username and the
/// password as answers to two challenges.
#[derive(Clone)]
pub struct Login {
    credentials: Credentials,
    step: u8,
}

impl Login {
    pub const NAME: &'static str = "LOGIN";

    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            step: 0,
        }
    }
}

impl std::fmt::Debug for Login {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct(Self::NAME)
            .field("credentials", &self.credentials)
            .field("step", &self.step)
            .finish()
    }
}

impl SaslMechanism for Login {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn initial_response(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn respond(&mut self, challenge: &[u8]) -> Result<Vec<u8>> {
        self.step += 1;
        match self.step {
            1 => Ok(self.credentials.username.as_bytes().to_vec()),
            2 => Ok(self.credentials.password.as_bytes().to_vec()),
            _ => Err(Error::new("Unexpected LOGIN challenge from server.")
                .set_details(String::from_utf8_lossy(challenge).into_owned())
                .set_kind(ErrorKind::Authentication)),
        }
    }
}

pub type MechanismFactory = fn(&Credentials) -> Box<dyn SaslMechanism>;

fn plain_factory(credentials: &Credentials) -> Box<dyn SaslMechanism> {
    Box::new(Plain::new(credentials.clone()))
}

fn login_factory(credentials: &Credentials) -> Box<dyn SaslMechanism> {
    Box::new(Login::new(credentials.clone()))
}

/// Mechanisms known to the client, keyed by upper case name, in order of
/// preference.
#[derive(Clone)]
pub struct SaslMechanisms {
    factories: IndexMap<String, MechanismFactory>,
}

impl std::fmt::Debug for SaslMechanisms {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_list().entries(self.factories.keys()).finish()
    }
}

impl Default for SaslMechanisms {
    fn default() -> Self {
        let mut ret = Self {
            factories: IndexMap::default(),
        };
        ret.register(Plain::NAME, plain_factory);
        ret.register(Login::NAME, login_factory);
        ret
    }
}

impl SaslMechanisms {
    /// Registry without any mechanisms.
    pub fn empty() -> Self {
        Self {
            factories: IndexMap::default(),
        }
    }

    /// Add or replace a mechanism.
    pub fn register(&mut self, name: &str, factory: MechanismFactory) -> &mut Self {
        self.factories.insert(name.to_ascii_uppercase(), factory);
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&name.to_ascii_uppercase())
    }

    pub fn get(&self, name: &str, credentials: &Credentials) -> Option<Box<dyn SaslMechanism>> {
        self.factories
            .get(&name.to_ascii_uppercase())
            .map(|f| f(credentials))
    }

    /// Pick `preferred` if given, otherwise the first registered mechanism the
    /// server announces.
    pub fn select(
        &self,
        capabilities: &ServerCapabilities,
        preferred: Option<&str>,
        credentials: &Credentials,
    ) -> Result<Box<dyn SaslMechanism>> {
        if let Some(name) = preferred {
            if !capabilities.has_sasl_method(name) {
                return Err(Error::new(format!(
                    "Server does not support SASL mechanism {}.",
                    name
                ))
                .set_details(format!(
                    "Supported mechanisms: {:?}",
                    capabilities.sasl_methods()
                ))
                .set_kind(ErrorKind::NotSupported));
            }
            return self.get(name, credentials).ok_or_else(|| {
                Error::new(format!("SASL mechanism {} is not implemented.", name))
                    .set_kind(ErrorKind::NotSupported)
            });
        }
        self.factories
            .iter()
            .find(|(name, _)| capabilities.has_sasl_method(name))
            .map(|(_, f)| f(credentials))
            .ok_or_else(|| {
                Error::new("No supported SASL mechanism offered by the server.")
                    .set_details(format!(
                        "Offered mechanisms: {:?}",
                        capabilities.sasl_methods()
                    ))
                    .set_kind(ErrorKind::NotSupported)
            })
    }
}
