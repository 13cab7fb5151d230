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

//! Server configuration.
//!
//! ```toml
//! server_hostname = "mail.example.com"
//! server_username = "user@example.com"
//! server_password = { type = "command_eval", value = "pass show mail" }
//! # server_port = 4190
//! # use_starttls = true
//! # timeout_secs = 60
//! ```

use std::{path::PathBuf, process::Stdio, sync::Arc, time::Duration};

use crate::{
    error::{Error, ErrorKind, Result, ResultIntoError},
    sasl::Credentials,
};

pub const DEFAULT_PORT: u16 = 4190;

pub fn true_val() -> bool {
    true
}

pub fn false_val() -> bool {
    false
}

pub fn none<T>() -> Option<T> {
    None
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_sasl_mechanism() -> String {
    "PLAIN".to_string()
}

/// Source of the user's password.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Password {
    #[serde(alias = "raw")]
    Raw(String),
    /// Shell command whose standard output is the password.
    #[serde(alias = "command_evaluation", alias = "command_eval")]
    CommandEval(String),
}

impl Password {
    pub fn evaluate(&self) -> Result<String> {
        match self {
            Self::Raw(p) => Ok(p.clone()),
            Self::CommandEval(command) => {
                let mut output = std::process::Command::new("sh")
                    .args(["-c", command.as_str()])
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .output()
                    .chain_err_summary(|| {
                        format!("Could not run password evaluation command `{}`", command)
                    })
                    .chain_err_kind(ErrorKind::External)?;
                if !output.status.success() {
                    return Err(Error::new(format!(
                        "Password evaluation command `{}` returned {}: {}",
                        command,
                        output.status,
                        String::from_utf8_lossy(&output.stderr)
                    ))
                    .set_kind(ErrorKind::External));
                }
                if output.stdout.ends_with(b"\n") {
                    output.stdout.pop();
                }
                String::from_utf8(output.stdout)
                    .chain_err_summary(|| {
                        format!("Output of password command `{}` is not UTF-8", command)
                    })
                    .chain_err_kind(ErrorKind::External)
            }
        }
    }
}

/// Certificate trust policy for TLS negotiation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum TlsPolicy {
    /// Validate against the system trust store.
    #[default]
    Verify,
    AcceptInvalidCerts,
    /// Trust the PEM or DER certificate at this path in addition to the
    /// system store.
    CustomRoot(PathBuf),
}

/// Server configuration for connecting the ManageSieve client.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManageSieveConf {
    pub server_hostname: String,
    #[serde(default = "default_port")]
    pub server_port: u16,
    pub server_username: String,
    pub server_password: Password,
    #[serde(default = "true_val")]
    pub use_starttls: bool,
    /// Implicit TLS from the first byte. Takes precedence over
    /// `use_starttls`.
    #[serde(default = "false_val")]
    pub use_tls: bool,
    #[serde(default = "false_val")]
    pub danger_accept_invalid_certs: bool,
    #[serde(default = "none")]
    pub ca_certificate: Option<PathBuf>,
    /// Read and write timeout in seconds, `0` to block forever.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Allow `AUTHENTICATE` over an unencrypted connection.
    #[serde(default = "false_val")]
    pub allow_insecure_auth: bool,
    #[serde(default = "default_sasl_mechanism")]
    pub sasl_mechanism: String,
    /// Log every byte sent and received at trace level.
    #[serde(default = "false_val")]
    pub trace: bool,
}

impl ManageSieveConf {
    pub fn new(server_hostname: &str, server_username: &str, server_password: Password) -> Self {
        Self {
            server_hostname: server_hostname.to_string(),
            server_port: DEFAULT_PORT,
            server_username: server_username.to_string(),
            server_password,
            use_starttls: true,
            use_tls: false,
            danger_accept_invalid_certs: false,
            ca_certificate: None,
            timeout_secs: default_timeout_secs(),
            allow_insecure_auth: false,
            sasl_mechanism: default_sasl_mechanism(),
            trace: false,
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let ret: Self = serde_path_to_error::deserialize(toml::Deserializer::new(s)).map_err(
            |err| {
                Error::new(format!("Configuration contains errors at `{}`.", err.path()))
                    .set_details(err.inner().to_string())
                    .set_source(Some(Arc::new(err)))
                    .set_kind(ErrorKind::Configuration)
            },
        )?;
        ret.validate()?;
        Ok(ret)
    }

    pub fn from_path(path: &std::path::Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .chain_err_summary(|| format!("Could not read configuration file {}", path.display()))
            .chain_err_kind(ErrorKind::Configuration)?;
        Self::from_toml_str(&s)
            .chain_err_summary(|| format!("Invalid configuration file {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.server_hostname.trim().is_empty() {
            return Err(Error::new("`server_hostname` must not be empty.")
                .set_kind(ErrorKind::Configuration));
        }
        if self.sasl_mechanism.trim().is_empty() {
            return Err(Error::new("`sasl_mechanism` must not be empty.")
                .set_kind(ErrorKind::Configuration));
        }
        if self.use_tls && self.use_starttls {
            log::debug!("`use_tls` is set, `use_starttls` is ignored.");
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        if self.timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.timeout_secs))
        }
    }

    pub fn tls_policy(&self) -> TlsPolicy {
        if let Some(path) = self.ca_certificate.as_ref() {
            TlsPolicy::CustomRoot(path.clone())
        } else if self.danger_accept_invalid_certs {
            TlsPolicy::AcceptInvalidCerts
        } else {
            TlsPolicy::Verify
        }
    }

    pub fn credentials(&self) -> Result<Credentials> {
        Ok(Credentials {
            authzid: None,
            username: self.server_username.clone(),
            password: self.server_password.evaluate()?,
        })
    }
}
