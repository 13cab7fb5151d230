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

#![deny(
    rustdoc::redundant_explicit_links,
    unsafe_op_in_unsafe_fn,
    /* groups */
    clippy::correctness,
    clippy::suspicious,
    clippy::complexity,
    clippy::perf,
    clippy::style,
    /* restriction */
    clippy::dbg_macro,
    clippy::rc_buffer,
    clippy::as_underscore,
    /* rustdoc */
    rustdoc::broken_intra_doc_links,
    /* pedantic */
    clippy::expect_fun_call,
    clippy::or_fun_call,
)]
#![allow(clippy::option_if_let_else, clippy::missing_const_for_fn)]
//! A client for the ManageSieve protocol ([RFC 5804](https://www.rfc-editor.org/rfc/rfc5804)),
//! used to upload, list, activate, download, rename, delete and check Sieve
//! mail filtering scripts on a server.
//!
//! - [`protocol_parser`]: quoted and literal string framing, tokenizing.
//! - [`response`]: `OK`/`NO`/`BYE` status lines and their response codes.
//! - [`capabilities`]: the server capability announcement.
//! - [`sasl`]: pluggable SASL mechanisms (`PLAIN`, `LOGIN`).
//! - [`connection`]: the session state machine, [`ManageSieveConnection`].
//! - [`conf`]: TOML server configuration.
//!
//! ```no_run
//! use managesieve::{conf::ManageSieveConf, ManageSieveConnection, SieveScript};
//!
//! # fn main() -> managesieve::Result<()> {
//! let conf = ManageSieveConf::from_path(std::path::Path::new("managesieve.toml"))?;
//! let mut conn = ManageSieveConnection::new_connection(&conf)?;
//! let mut scripts: Vec<SieveScript> = vec![];
//! conn.listscripts(&mut scripts)?;
//! for script in &scripts {
//!     println!("{}", script);
//! }
//! conn.logout()?;
//! # Ok(())
//! # }
//! ```
//!
//! Other exports are
//! - A `debug` macro that works like `std::dbg` but only logs with the
//!   `debug-tracing` feature. (see [`debug` macro](debug!))

#[macro_use]
pub mod dbg {

    #[allow(clippy::redundant_closure)]
    #[macro_export]
    macro_rules! debug {
        ($val:literal) => {
            {
                if cfg!(feature="debug-tracing") {
                    $crate::log::debug!($val);
                }
                $val
            }
        };
        ($val:expr) => {
            if cfg!(feature="debug-tracing") {
                let stringify = stringify!($val);
                // Use of `match` here is intentional because it affects the lifetimes
                // of temporaries - https://stackoverflow.com/a/48732525/1063961
                match $val {
                    tmp => {
                        $crate::log::debug!("{} = {:?}", stringify, tmp);
                        tmp
                    }
                }
            } else {
                $val
            }
        };
        ($fmt:literal, $($arg:tt)*) => {
            if cfg!(feature="debug-tracing") {
                $crate::log::debug!($fmt, $($arg)*);
            }
        };
    }
}

#[macro_use]
extern crate serde_derive;
pub extern crate log;
pub extern crate nom;
pub extern crate indexmap;
pub extern crate serde_path_to_error;

pub mod error;
pub use error::{Error, ErrorKind, NetworkErrorKind, Result};
pub mod protocol_parser;
pub mod command;
pub use command::Command;
pub mod response;
pub use response::{ResponseCode, ResponseStatus, ResponseWithPayload, ServerResponse};
pub mod capabilities;
pub use capabilities::ServerCapabilities;
pub mod script;
pub use script::SieveScript;
pub mod sasl;
pub use sasl::{SaslMechanism, SaslMechanisms};
pub mod transport;
pub use transport::{Connection, Transport};
pub mod connection;
pub use connection::{ManageSieveConnection, ManageSieveStream, SessionState};
pub mod conf;
pub use conf::{ManageSieveConf, Password, TlsPolicy};
pub mod logging;
pub use logging::{LogLevel, StderrLogger};
