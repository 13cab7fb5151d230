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

//! Server capabilities, as announced after connecting, after `STARTTLS` and
//! in reply to `CAPABILITY`.
//!
//! ```text
//! "IMPLEMENTATION" "Dovecot Pigeonhole"
//! "SIEVE" "fileinto reject envelope vacation"
//! "NOTIFY" "mailto"
//! "SASL" "PLAIN"
//! "STARTTLS"
//! "VERSION" "1.0"
//! OK "Dovecot ready."
//! ```

use indexmap::{IndexMap, IndexSet};

use crate::{
    error::{Error, ErrorKind, Result},
    protocol_parser::Token,
};

/// The only protocol version this client speaks.
pub const SUPPORTED_VERSION: &str = "1.0";

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ServerCapabilities {
    implementation: Option<String>,
    version: Option<String>,
    sasl_methods: IndexSet<String>,
    sieve_extensions: IndexSet<String>,
    notify_methods: IndexSet<String>,
    has_tls: bool,
    max_redirects: Option<u32>,
    language: Option<String>,
    owner: Option<String>,
    other: IndexMap<String, Option<String>>,
}

fn split_set(value: &str) -> IndexSet<String> {
    value.split_whitespace().map(str::to_string).collect()
}

fn contains_ignore_case(set: &IndexSet<String>, needle: &str) -> bool {
    set.iter().any(|s| s.eq_ignore_ascii_case(needle))
}

impl ServerCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn implementation(&self) -> Option<&str> {
        self.implementation.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn sasl_methods(&self) -> &IndexSet<String> {
        &self.sasl_methods
    }

    pub fn sieve_extensions(&self) -> &IndexSet<String> {
        &self.sieve_extensions
    }

    pub fn notify_methods(&self) -> &IndexSet<String> {
        &self.notify_methods
    }

    pub fn has_tls(&self) -> bool {
        self.has_tls
    }

    pub fn max_redirects(&self) -> Option<u32> {
        self.max_redirects
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Fields this client does not interpret, in announcement order.
    pub fn other(&self) -> &IndexMap<String, Option<String>> {
        &self.other
    }

    pub fn has_sasl_method(&self, method: &str) -> bool {
        contains_ignore_case(&self.sasl_methods, method)
    }

    pub fn has_sieve_extension(&self, extension: &str) -> bool {
        contains_ignore_case(&self.sieve_extensions, extension)
    }

    pub fn has_notify(&self, method: &str) -> bool {
        contains_ignore_case(&self.notify_methods, method)
    }

    pub fn set_implementation(&mut self, value: &str) {
        self.implementation = Some(value.to_string());
    }

    pub fn set_version(&mut self, value: &str) {
        self.version = Some(value.to_string());
    }

    /// Replace the SASL mechanisms with the whitespace separated list
    /// `value`.
    pub fn set_sasl_methods(&mut self, value: &str) {
        self.sasl_methods = split_set(value);
    }

    pub fn set_sieve_extensions(&mut self, value: &str) {
        self.sieve_extensions = split_set(value);
    }

    pub fn set_notify(&mut self, value: &str) {
        self.notify_methods = split_set(value);
    }

    pub fn set_has_tls(&mut self, value: bool) {
        self.has_tls = value;
    }

    pub fn set_max_redirects(&mut self, value: u32) {
        self.max_redirects = Some(value);
    }

    pub fn set_language(&mut self, value: &str) {
        self.language = Some(value.to_string());
    }

    pub fn set_owner(&mut self, value: &str) {
        self.owner = Some(value.to_string());
    }

    /// Apply one announced field. Field names are matched case-insensitively.
    pub fn apply(&mut self, name: &str, value: Option<&str>) {
        let v = value.unwrap_or_default();
        match name.to_ascii_uppercase().as_str() {
            "IMPLEMENTATION" => self.set_implementation(v),
            "SASL" => self.set_sasl_methods(v),
            "SIEVE" => self.set_sieve_extensions(v),
            "STARTTLS" => self.set_has_tls(true),
            "NOTIFY" => self.set_notify(v),
            "LANGUAGE" => self.set_language(v),
            "OWNER" => self.set_owner(v),
            "VERSION" => self.set_version(v),
            "MAXREDIRECTS" => match v.trim().parse::<u32>() {
                Ok(n) => self.set_max_redirects(n),
                Err(err) => {
                    log::warn!("Ignoring invalid MAXREDIRECTS value {:?}: {}", v, err);
                    self.other
                        .insert(name.to_string(), value.map(str::to_string));
                }
            },
            _ => {
                log::debug!("Unknown capability {:?} = {:?}", name, value);
                self.other
                    .insert(name.to_string(), value.map(str::to_string));
            }
        }
    }

    /// Apply a tokenized capability line: `string [SP string]`.
    pub fn apply_tokens(&mut self, tokens: &[Token]) -> Result<()> {
        match tokens {
            [Token::String(name)] => self.apply(name, None),
            [Token::String(name), Token::String(value)] => self.apply(name, Some(value.as_str())),
            _ => {
                return Err(Error::new("Invalid capability line.")
                    .set_details(format!("{:?}", tokens))
                    .set_kind(ErrorKind::Parse));
            }
        }
        Ok(())
    }

    /// True iff the version is [`SUPPORTED_VERSION`], the implementation name
    /// is not empty and at least one Sieve extension is announced.
    pub fn is_valid(&self) -> bool {
        self.version.as_deref() == Some(SUPPORTED_VERSION)
            && self
                .implementation
                .as_deref()
                .map(|i| !i.is_empty())
                .unwrap_or(false)
            && !self.sieve_extensions.is_empty()
    }
}
