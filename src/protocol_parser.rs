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

//! Wire codec: the two string forms of RFC 5804 and a line tokenizer.
//!
//! ```text
//! string         = quoted / literal-c2s / literal-s2c
//! quoted         = DQUOTE *QUOTED-CHAR DQUOTE
//! literal-c2s    = "{" number "+}" CRLF *OCTET
//! literal-s2c    = "{" number "}" CRLF *OCTET
//! ```
//!
//! A literal's length counts octets of the UTF-8 encoding, not characters.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::digit1,
    combinator::{map, map_opt, opt},
    error::{Error as NomError, ErrorKind as NomErrorKind},
    sequence::{delimited, pair},
    IResult,
};

use crate::error::{Error, ErrorKind, Result};


/// Strings longer than this are always sent as literals.
pub const MAX_QUOTED_LEN: usize = 1024;

/// Which literal form to emit when encoding a string as a literal.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LiteralMode {
    /// `{N}\r\n`, the form servers send.
    Sync,
    /// `{N+}\r\n`, the client to server form that does not wait for a
    /// continuation.
    #[default]
    NonSync,
}

/// A lexical token of a command or response line.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Token {
    Atom(String),
    Number(u64),
    /// Either a quoted or a literal string; the two forms are not
    /// distinguished after decoding.
    String(String),
    LParen,
    RParen,
}

impl Token {
    /// Text of an atom or string token.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Atom(s) | Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Self::String(_))
    }
}

fn is_atom_char(b: u8) -> bool {
    (b > 0x20 && b != 0x7f) && !matches!(b, b'(' | b')' | b'{' | b'"' | b'\\')
}

fn is_space(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

pub fn line_ending(input: &[u8]) -> IResult<&[u8], &[u8]> {
    alt((tag("\r\n"), tag("\n")))(input)
}

pub fn sp(input: &[u8]) -> IResult<&[u8], &[u8]> {
    take_while1(is_space)(input)
}

pub fn ws0(input: &[u8]) -> IResult<&[u8], &[u8]> {
    take_while(is_space)(input)
}

pub fn atom(input: &[u8]) -> IResult<&[u8], &[u8]> {
    take_while1(is_atom_char)(input)
}

// number = 1*DIGIT, must fit in a usize.
fn octet_count(input: &[u8]) -> IResult<&[u8], usize> {
    map_opt(digit1, |digits: &[u8]| {
        digits.iter().try_fold(0_usize, |acc, d| {
            acc.checked_mul(10)?.checked_add(usize::from(d - b'0'))
        })
    })(input)
}

/// `{N}` or `{N+}`, without the line ending.
pub fn literal_prefix(input: &[u8]) -> IResult<&[u8], usize> {
    delimited(tag("{"), octet_count, pair(opt(tag("+")), tag("}")))(input)
}

/// Read a literal, ie a byte sequence prefixed with its octet length
/// delimited in `{}`s.
///
/// If fewer than `N` bytes are available the available prefix is returned.
pub fn literal(input: &[u8]) -> IResult<&[u8], &[u8]> {
    let (input, len) = literal_prefix(input)?;
    let (input, _) = line_ending(input)?;
    if input.len() < len {
        log::debug!(
            "literal announced {} octets but only {} are available",
            len,
            input.len()
        );
        return Ok((&input[input.len()..], input));
    }
    Ok((&input[len..], &input[..len]))
}

/// Return the contents of a byte sequence surrounded by `"`s with backslash
/// escapes removed.
pub fn quoted(input: &[u8]) -> IResult<&[u8], Vec<u8>> {
    if input.first() != Some(&b'"') {
        return Err(nom::Err::Error(NomError::new(input, NomErrorKind::Char)));
    }
    let mut out = Vec::with_capacity(input.len());
    let mut escape_next = false;
    for (i, &b) in input.iter().enumerate().skip(1) {
        match (b, escape_next) {
            (b'\\', false) => {
                escape_next = true;
            }
            (b'"', false) => return Ok((&input[i + 1..], out)),
            (b, _) => {
                out.push(b);
                escape_next = false;
            }
        }
    }

    Err(nom::Err::Error(NomError::new(
        input,
        NomErrorKind::Escaped,
    )))
}

/// string = quoted / literal
pub fn string_token(input: &[u8]) -> IResult<&[u8], Vec<u8>> {
    alt((map(literal, <[u8]>::to_vec), quoted))(input)
}

/// If `line` (without its line ending) ends in a literal prefix, return the
/// announced octet count.
pub fn trailing_literal_len(line: &[u8]) -> Option<usize> {
    if !line.ends_with(b"}") {
        return None;
    }
    let start = line.iter().rposition(|&b| b == b'{')?;
    match literal_prefix(&line[start..]) {
        Ok((rest, len)) if rest.is_empty() => Some(len),
        _ => None,
    }
}

/// Convert decoded bytes to text. Invalid UTF-8 is replaced rather than
/// rejected.
pub fn bytes_to_string(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(err) => {
            log::warn!("Received string is not valid UTF-8: {}", err);
            String::from_utf8_lossy(err.as_bytes()).into_owned()
        }
    }
}

/// Decode a literal string such as `{3}\r\nabc`.
pub fn decode_literal(input: &[u8]) -> Result<String> {
    let (_, bytes) = literal(input)
        .map_err(|err| Error::from(err).set_summary("Could not decode literal string."))?;
    Ok(bytes_to_string(bytes.to_vec()))
}

/// Decode a quoted string such as `"a \"b\""`.
pub fn decode_quoted(input: &[u8]) -> Result<String> {
    let (_, bytes) = quoted(input)
        .map_err(|err| Error::from(err).set_summary("Could not decode quoted string."))?;
    Ok(bytes_to_string(bytes))
}

/// Decode either string form.
pub fn decode_string(input: &[u8]) -> Result<String> {
    let (_, bytes) = string_token(input)
        .map_err(|err| Error::from(err).set_summary("Could not decode string."))?;
    Ok(bytes_to_string(bytes))
}

pub fn encode_quoted(s: &str) -> String {
    let mut ret = String::with_capacity(s.len() + 2);
    ret.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            ret.push('\\');
        }
        ret.push(c);
    }
    ret.push('"');
    ret
}

pub fn encode_literal(s: &str, mode: LiteralMode) -> String {
    let plus = match mode {
        LiteralMode::Sync => "",
        LiteralMode::NonSync => "+",
    };
    format!("{{{}{}}}\r\n{}", s.len(), plus, s)
}

/// Whether `s` cannot be sent as a quoted string.
pub fn needs_literal(s: &str) -> bool {
    s.len() > MAX_QUOTED_LEN || s.bytes().any(|b| matches!(b, b'\r' | b'\n' | b'\0'))
}

/// Encode `s` in whichever string form it fits.
pub fn encode_string(s: &str, mode: LiteralMode) -> String {
    if needs_literal(s) {
        encode_literal(s, mode)
    } else {
        encode_quoted(s)
    }
}

/// Split a logical line (literal payloads included) into tokens.
pub fn tokenize(line: &[u8]) -> Result<Vec<Token>> {
    let mut ret = vec![];
    let mut input = line;
    loop {
        let start = input
            .iter()
            .position(|&b| !matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
            .unwrap_or(input.len());
        input = &input[start..];
        let Some(&first) = input.first() else {
            break;
        };
        match first {
            b'(' => {
                ret.push(Token::LParen);
                input = &input[1..];
            }
            b')' => {
                ret.push(Token::RParen);
                input = &input[1..];
            }
            b'"' | b'{' => {
                let (rest, bytes) = string_token(input).map_err(|err| {
                    Error::from(err)
                        .set_summary(format!(
                            "Could not tokenize line {:?}.",
                            String::from_utf8_lossy(line)
                        ))
                        .set_kind(ErrorKind::Parse)
                })?;
                ret.push(Token::String(bytes_to_string(bytes)));
                input = rest;
            }
            _ => {
                let (rest, word) = atom(input).map_err(|err| {
                    Error::from(err)
                        .set_summary(format!(
                            "Unexpected character {:?} in line {:?}.",
                            char::from(first),
                            String::from_utf8_lossy(line)
                        ))
                        .set_kind(ErrorKind::Parse)
                })?;
                let word = String::from_utf8_lossy(word).into_owned();
                ret.push(match word.parse::<u64>() {
                    Ok(n) if word.bytes().all(|b| b.is_ascii_digit()) => Token::Number(n),
                    _ => Token::Atom(word),
                });
                input = rest;
            }
        }
    }
    Ok(ret)
}
