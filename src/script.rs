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

use std::{
    borrow::Borrow,
    hash::{Hash, Hasher},
};

/// A Sieve script stored on the server.
///
/// Scripts are identified by their name: equality and hashing ignore `body`
/// and `active`, so a script can be looked up in a set by name while the
/// other fields are kept current by the session.
#[derive(Clone, Debug, Default)]
pub struct SieveScript {
    name: String,
    body: Option<String>,
    active: bool,
}

impl SieveScript {
    pub fn new(name: impl Into<String>, body: Option<String>, active: bool) -> Self {
        Self {
            name: name.into(),
            body,
            active,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Script content, if it has been fetched or set.
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = name.into();
        self
    }

    pub fn set_body(&mut self, body: Option<String>) -> &mut Self {
        self.body = body;
        self
    }

    pub fn set_active(&mut self, active: bool) -> &mut Self {
        self.active = active;
        self
    }
}

impl PartialEq for SieveScript {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for SieveScript {}

impl Hash for SieveScript {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl Borrow<str> for SieveScript {
    fn borrow(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for SieveScript {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.active {
            write!(fmt, "{} (active)", self.name)
        } else {
            write!(fmt, "{}", self.name)
        }
    }
}
