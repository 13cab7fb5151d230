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

//! Client commands and their wire encoding.

use crate::protocol_parser::{encode_literal, encode_quoted, encode_string, LiteralMode};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Command<'a> {
    Capability,
    StartTls,
    Authenticate {
        mechanism: &'a str,
        /// Base64 encoded initial response.
        initial_response: Option<&'a str>,
    },
    Logout,
    PutScript {
        name: &'a str,
        script: &'a str,
    },
    CheckScript {
        script: &'a str,
    },
    SetActive {
        name: &'a str,
    },
    GetScript {
        name: &'a str,
    },
    DeleteScript {
        name: &'a str,
    },
    RenameScript {
        old_name: &'a str,
        new_name: &'a str,
    },
    ListScripts,
    HaveSpace {
        name: &'a str,
        size: usize,
    },
    Noop {
        tag: Option<&'a str>,
    },
}

impl Command<'_> {
    pub const fn keyword(&self) -> &'static str {
        match self {
            Self::Capability => "CAPABILITY",
            Self::StartTls => "STARTTLS",
            Self::Authenticate { .. } => "AUTHENTICATE",
            Self::Logout => "LOGOUT",
            Self::PutScript { .. } => "PUTSCRIPT",
            Self::CheckScript { .. } => "CHECKSCRIPT",
            Self::SetActive { .. } => "SETACTIVE",
            Self::GetScript { .. } => "GETSCRIPT",
            Self::DeleteScript { .. } => "DELETESCRIPT",
            Self::RenameScript { .. } => "RENAMESCRIPT",
            Self::ListScripts => "LISTSCRIPTS",
            Self::HaveSpace { .. } => "HAVESPACE",
            Self::Noop { .. } => "NOOP",
        }
    }

    /// Full command including the trailing CRLF. String arguments that
    /// cannot be quoted are sent as literals of form `mode`.
    pub fn encode(&self, mode: LiteralMode) -> String {
        let mut ret = self.keyword().to_string();
        match self {
            Self::Capability | Self::StartTls | Self::Logout | Self::ListScripts => {}
            Self::Authenticate {
                mechanism,
                initial_response,
            } => {
                ret.push(' ');
                ret.push_str(&encode_quoted(mechanism));
                if let Some(ir) = initial_response {
                    ret.push(' ');
                    ret.push_str(&encode_quoted(ir));
                }
            }
            Self::PutScript { name, script } => {
                ret.push(' ');
                ret.push_str(&encode_string(name, mode));
                ret.push(' ');
                ret.push_str(&encode_literal(script, mode));
            }
            Self::CheckScript { script } => {
                ret.push(' ');
                ret.push_str(&encode_literal(script, mode));
            }
            Self::SetActive { name }
            | Self::GetScript { name }
            | Self::DeleteScript { name } => {
                ret.push(' ');
                ret.push_str(&encode_string(name, mode));
            }
            Self::RenameScript { old_name, new_name } => {
                ret.push(' ');
                ret.push_str(&encode_string(old_name, mode));
                ret.push(' ');
                ret.push_str(&encode_string(new_name, mode));
            }
            Self::HaveSpace { name, size } => {
                ret.push(' ');
                ret.push_str(&encode_string(name, mode));
                ret.push(' ');
                ret.push_str(&size.to_string());
            }
            Self::Noop { tag } => {
                if let Some(tag) = tag {
                    ret.push(' ');
                    ret.push_str(&encode_string(tag, mode));
                }
            }
        }
        ret.push_str("\r\n");
        ret
    }

    /// Text safe to write to logs.
    pub fn redacted(&self) -> String {
        match self {
            Self::Authenticate { mechanism, .. } => format!("AUTHENTICATE {:?} ..", mechanism),
            Self::PutScript { name, script } => {
                format!("PUTSCRIPT {:?} <{} octets>", name, script.len())
            }
            Self::CheckScript { script } => format!("CHECKSCRIPT <{} octets>", script.len()),
            other => other.encode(LiteralMode::NonSync).trim_end().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_encode() {
        let m = LiteralMode::NonSync;
        assert_eq!(Command::Capability.encode(m), "CAPABILITY\r\n");
        assert_eq!(Command::ListScripts.encode(m), "LISTSCRIPTS\r\n");
        assert_eq!(
            Command::Authenticate {
                mechanism: "PLAIN",
                initial_response: Some("AHVzZXIAcGFzcw=="),
            }
            .encode(m),
            "AUTHENTICATE \"PLAIN\" \"AHVzZXIAcGFzcw==\"\r\n"
        );
        assert_eq!(
            Command::PutScript {
                name: "vacation",
                script: "keep;\r\n",
            }
            .encode(m),
            "PUTSCRIPT \"vacation\" {7+}\r\nkeep;\r\n\r\n"
        );
        assert_eq!(
            Command::CheckScript { script: "keep;" }.encode(LiteralMode::Sync),
            "CHECKSCRIPT {5}\r\nkeep;\r\n"
        );
        assert_eq!(
            Command::SetActive { name: "" }.encode(m),
            "SETACTIVE \"\"\r\n"
        );
        assert_eq!(
            Command::RenameScript {
                old_name: "a \"b\"",
                new_name: "c",
            }
            .encode(m),
            "RENAMESCRIPT \"a \\\"b\\\"\" \"c\"\r\n"
        );
        assert_eq!(
            Command::HaveSpace {
                name: "myscript",
                size: 999_999,
            }
            .encode(m),
            "HAVESPACE \"myscript\" 999999\r\n"
        );
        assert_eq!(Command::Noop { tag: None }.encode(m), "NOOP\r\n");
        assert_eq!(
            Command::Noop { tag: Some("t1") }.encode(m),
            "NOOP \"t1\"\r\n"
        );
    }

    #[test]
    fn test_command_redacted() {
        let cmd = Command::Authenticate {
            mechanism: "PLAIN",
            initial_response: Some("AHVzZXIAcGFzcw=="),
        };
        assert!(!cmd.redacted().contains("AHVz"));
        assert_eq!(
            Command::DeleteScript { name: "old" }.redacted(),
            "DELETESCRIPT \"old\""
        );
    }
}
