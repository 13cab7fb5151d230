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

//! Server responses.
//!
//! ```text
//! response-oknobye = ("OK" / "NO" / "BYE") [SP "(" resp-code ")"] [SP string] CRLF
//! resp-code        = "AUTH-TOO-WEAK" / "ENCRYPT-NEEDED" / "QUOTA" ["/" ("MAXSCRIPTS" / "MAXSIZE")] /
//!                    resp-code-sasl / resp-code-referral / "TRANSITION-NEEDED" / "TRYLATER" /
//!                    "ACTIVE" / "NONEXISTENT" / "ALREADYEXISTS" / "WARNINGS" / "TAG" SP string /
//!                    resp-code-ext
//! ```

use std::{convert::TryFrom, fmt, str::FromStr};

use nom::{
    bytes::complete::{tag, take_till},
    combinator::opt,
    sequence::preceded,
    IResult,
};

use crate::{
    error::{Error, ErrorKind, Result},
    protocol_parser::{atom, bytes_to_string, encode_quoted, string_token, ws0},
};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ResponseStatus {
    Ok,
    No,
    Bye,
}

impl ResponseStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::No => "NO",
            Self::Bye => "BYE",
        }
    }

    /// Status of `line` if it is a status line.
    pub fn of_line(line: &[u8]) -> Option<Self> {
        let end = line
            .iter()
            .position(|&b| matches!(b, b' ' | b'\t' | b'(' | b'\r' | b'\n'))
            .unwrap_or(line.len());
        std::str::from_utf8(&line[..end]).ok()?.parse().ok()
    }
}

impl FromStr for ResponseStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("OK") {
            Ok(Self::Ok)
        } else if s.eq_ignore_ascii_case("NO") {
            Ok(Self::No)
        } else if s.eq_ignore_ascii_case("BYE") {
            Ok(Self::Bye)
        } else {
            Err(Error::new(format!("Invalid response type: {:?}", s)).set_kind(ErrorKind::Parse))
        }
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.as_str())
    }
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum ResponseCode {
    /// The SASL mechanism is too weak for this user.
    AuthTooWeak,
    /// The mechanism or the command requires an encrypted connection.
    EncryptNeeded,
    /// Data returned from the server at the end of a successful SASL exchange.
    Sasl,
    /// The client should reconnect to the server given in the parameter.
    Referral,
    TransitionNeeded,
    TryLater,
    /// The script is active and cannot be deleted.
    Active,
    Nonexistent,
    AlreadyExists,
    /// Echo of the tag sent with `NOOP`.
    Tag,
    /// The script was stored but the server has warnings about it.
    Warnings,
    Quota,
    /// Any code not in the table above, with its raw token.
    Extension(String),
}

impl ResponseCode {
    /// Match the first `/` separated segment of `token` case-insensitively.
    pub fn from_token(token: &str) -> Self {
        let name = token.split('/').next().unwrap_or_default();
        match name.to_ascii_uppercase().as_str() {
            "AUTH-TOO-WEAK" => Self::AuthTooWeak,
            "ENCRYPT-NEEDED" => Self::EncryptNeeded,
            "SASL" => Self::Sasl,
            "REFERRAL" => Self::Referral,
            "TRANSITION-NEEDED" => Self::TransitionNeeded,
            "TRYLATER" => Self::TryLater,
            "ACTIVE" => Self::Active,
            "NONEXISTENT" => Self::Nonexistent,
            "ALREADYEXISTS" => Self::AlreadyExists,
            "TAG" => Self::Tag,
            "WARNINGS" => Self::Warnings,
            "QUOTA" => Self::Quota,
            _ => Self::Extension(token.to_string()),
        }
    }

    /// Canonical name, or the first segment of an extension's raw token.
    pub fn as_str(&self) -> &str {
        match self {
            Self::AuthTooWeak => "AUTH-TOO-WEAK",
            Self::EncryptNeeded => "ENCRYPT-NEEDED",
            Self::Sasl => "SASL",
            Self::Referral => "REFERRAL",
            Self::TransitionNeeded => "TRANSITION-NEEDED",
            Self::TryLater => "TRYLATER",
            Self::Active => "ACTIVE",
            Self::Nonexistent => "NONEXISTENT",
            Self::AlreadyExists => "ALREADYEXISTS",
            Self::Tag => "TAG",
            Self::Warnings => "WARNINGS",
            Self::Quota => "QUOTA",
            Self::Extension(raw) => raw.split('/').next().unwrap_or_default(),
        }
    }

    pub const fn has_param(&self) -> bool {
        matches!(self, Self::Sasl | Self::Referral | Self::Tag)
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.as_str())
    }
}

/// A parsed `OK`/`NO`/`BYE` line.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerResponse {
    status: ResponseStatus,
    code: Option<ResponseCode>,
    sub_codes: Vec<String>,
    param: Option<String>,
    message: Option<String>,
}

impl ServerResponse {
    pub fn new(status: ResponseStatus) -> Self {
        Self {
            status,
            code: None,
            sub_codes: vec![],
            param: None,
            message: None,
        }
    }

    pub fn status(&self) -> ResponseStatus {
        self.status
    }

    pub fn code(&self) -> Option<&ResponseCode> {
        self.code.as_ref()
    }

    /// The code token split on `/`. The first element is the code's name.
    pub fn sub_codes(&self) -> &[String] {
        &self.sub_codes
    }

    pub fn param(&self) -> Option<&str> {
        self.param.as_deref()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn set_status(&mut self, status: ResponseStatus) -> &mut Self {
        self.status = status;
        self
    }

    /// Set the code from its wire token, eg `QUOTA/MAXSIZE`.
    pub fn set_code(&mut self, token: &str) -> &mut Self {
        let code = ResponseCode::from_token(token);
        self.sub_codes = token.split('/').map(str::to_string).collect();
        if let Some(first) = self.sub_codes.first_mut() {
            *first = code.as_str().to_string();
        }
        self.code = Some(code);
        self
    }

    pub fn set_param(&mut self, param: Option<String>) -> &mut Self {
        self.param = param;
        self
    }

    pub fn set_message(&mut self, message: Option<String>) -> &mut Self {
        self.message = message;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }

    pub fn is_no(&self) -> bool {
        self.status == ResponseStatus::No
    }

    pub fn is_bye(&self) -> bool {
        self.status == ResponseStatus::Bye
    }

    pub fn has_code(&self, code: &ResponseCode) -> bool {
        self.code.as_ref() == Some(code)
    }

    /// Turn a `NO`/`BYE` reply into an [`Error`] of kind
    /// [`ErrorKind::External`].
    pub fn into_result(self) -> Result<Self> {
        if self.is_ok() {
            return Ok(self);
        }
        Err(Error::new(self.to_string()).set_kind(ErrorKind::External))
    }
}

impl fmt::Display for ServerResponse {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.status)?;
        if let Some(code) = self.code.as_ref() {
            if self.sub_codes.is_empty() {
                write!(fmt, " ({}", code)?;
            } else {
                write!(fmt, " ({}", self.sub_codes.join("/"))?;
            }
            if let Some(param) = self.param.as_ref() {
                write!(fmt, " {}", encode_quoted(param))?;
            }
            write!(fmt, ")")?;
        }
        if let Some(message) = self.message.as_ref() {
            write!(fmt, " {}", encode_quoted(message))?;
        }
        Ok(())
    }
}

// "(" code [SP string] *extension-data ")"
fn response_code(input: &[u8]) -> IResult<&[u8], (&[u8], Option<Vec<u8>>)> {
    let (input, _) = tag("(")(input)?;
    let (input, _) = ws0(input)?;
    let (input, code) = atom(input)?;
    let (input, param) = opt(preceded(ws0, string_token))(input)?;
    let (input, _) = take_till(|b| b == b')')(input)?;
    let (input, _) = tag(")")(input)?;
    Ok((input, (code, param)))
}

impl TryFrom<&[u8]> for ServerResponse {
    type Error = Error;

    fn try_from(val: &[u8]) -> Result<Self> {
        let (input, status) = atom(val)
            .map_err(|err| Error::from(err).set_summary("Missing response status."))?;
        let mut ret = Self::new(bytes_to_string(status.to_vec()).parse()?);
        let (input, _) = ws0(input)?;
        let input = if input.starts_with(b"(") {
            let (input, (code, param)) = response_code(input).map_err(|err| {
                Error::from(err).set_summary(format!(
                    "Invalid response code in {:?}.",
                    String::from_utf8_lossy(val)
                ))
            })?;
            ret.set_code(&String::from_utf8_lossy(code));
            match (ret.code.as_ref().map(ResponseCode::has_param), param) {
                (Some(true), param) => {
                    ret.param = param.map(bytes_to_string);
                }
                (_, Some(param)) => {
                    log::debug!(
                        "Ignoring parameter {:?} of response code {:?}",
                        String::from_utf8_lossy(&param),
                        ret.code
                    );
                }
                _ => {}
            }
            input
        } else {
            input
        };
        let (input, _) = ws0(input)?;
        let (input, message) = opt(string_token)(input)?;
        let rest = String::from_utf8_lossy(input);
        let rest = rest.trim();
        match message {
            Some(message) => {
                ret.message = Some(bytes_to_string(message));
                if !rest.is_empty() {
                    log::debug!("Ignoring trailing data after response message: {:?}", rest);
                }
            }
            None if !rest.is_empty() => {
                log::debug!("Unquoted response message: {:?}", rest);
                ret.message = Some(rest.to_string());
            }
            None => {}
        }
        Ok(ret)
    }
}

impl FromStr for ServerResponse {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::try_from(s.as_bytes())
    }
}

/// A response paired with the payload some commands return before it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResponseWithPayload {
    pub response: ServerResponse,
    pub payload: Option<String>,
}

impl ResponseWithPayload {
    pub fn new(response: ServerResponse, payload: Option<String>) -> Self {
        Self { response, payload }
    }

    pub fn is_ok(&self) -> bool {
        self.response.is_ok()
    }
}
