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
    io::{BufRead, BufReader, Cursor, Read, Write},
    net::TcpListener,
    sync::{Arc, Mutex},
};

use managesieve::{
    conf::{ManageSieveConf, Password, TlsPolicy},
    ErrorKind, ManageSieveConnection, NetworkErrorKind, ResponseCode, Result, SessionState,
    SieveScript, Transport,
};
use rusty_fork::rusty_fork_test;

/// In-memory transport that replays canned server output and records what
/// the client writes. `start_tls` switches to `tls_input` and reports the
/// stream as secure.
#[derive(Debug)]
struct ScriptedTransport {
    input: Cursor<Vec<u8>>,
    tls_input: Vec<u8>,
    sent: Arc<Mutex<Vec<u8>>>,
    secure: bool,
}

impl Read for ScriptedTransport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for ScriptedTransport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.sent.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Transport for ScriptedTransport {
    fn start_tls(self: Box<Self>, _domain: &str, _policy: &TlsPolicy) -> Result<Box<dyn Transport>> {
        Ok(Box::new(Self {
            input: Cursor::new(self.tls_input),
            tls_input: vec![],
            sent: self.sent,
            secure: true,
        }))
    }

    fn is_secure(&self) -> bool {
        self.secure
    }
}

const GREETING: &str = "\"IMPLEMENTATION\" \"Dovecot Pigeonhole\"\r\n\"SIEVE\" \"fileinto \
                        vacation\"\r\n\"SASL\" \"PLAIN LOGIN\"\r\n\"STARTTLS\"\r\n\"VERSION\" \
                        \"1.0\"\r\nOK \"Dovecot ready.\"\r\n";

const TLS_GREETING: &str = "\"IMPLEMENTATION\" \"Dovecot Pigeonhole\"\r\n\"SIEVE\" \"fileinto \
                            vacation imap4flags\"\r\n\"SASL\" \"PLAIN\"\r\n\"VERSION\" \
                            \"1.0\"\r\nOK \"TLS negotiation successful.\"\r\n";

struct Session {
    conn: ManageSieveConnection,
    sent: Arc<Mutex<Vec<u8>>>,
}

impl Session {
    fn new(server: &str, tls_server: &str, allow_insecure_auth: bool) -> Self {
        let sent = Arc::new(Mutex::new(vec![]));
        let transport = ScriptedTransport {
            input: Cursor::new(format!("{}{}", GREETING, server).into_bytes()),
            tls_input: tls_server.as_bytes().to_vec(),
            sent: Arc::clone(&sent),
            secure: false,
        };
        let mut conn = ManageSieveConnection::new();
        conn.set_allow_insecure_auth(allow_insecure_auth);
        let greeting = conn
            .connect_transport(Box::new(transport), "sieve.example.com")
            .unwrap();
        assert_eq!(greeting.message(), Some("Dovecot ready."));
        Self { conn, sent }
    }

    /// A session that has authenticated with PLAIN, with the record of sent
    /// bytes cleared.
    fn authenticated(server: &str) -> Self {
        let mut ret = Self::new(&format!("OK \"Logged in.\"\r\n{}", server), "", true);
        assert!(ret.conn.authenticate("user", "pass", None).unwrap().is_ok());
        ret.take_sent();
        ret
    }

    fn take_sent(&mut self) -> String {
        String::from_utf8(std::mem::take(&mut *self.sent.lock().unwrap())).unwrap()
    }
}

#[test]
fn test_authenticate_before_connect() {
    let mut conn = ManageSieveConnection::new();
    assert_eq!(
        conn.authenticate("user", "pass", None).unwrap_err().kind,
        ErrorKind::ProtocolError
    );
    assert_eq!(conn.state(), SessionState::Disconnected);
}

#[test]
fn test_greeting_capabilities() {
    let s = Session::new("", "", false);
    assert_eq!(s.conn.state(), SessionState::Connected);
    assert!(!s.conn.is_secured());
    let caps = s.conn.capabilities().unwrap();
    assert!(caps.is_valid());
    assert!(caps.has_tls());
    assert!(caps.has_sasl_method("plain"));
    assert!(caps.has_sieve_extension("VACATION"));
    assert_eq!(caps.implementation(), Some("Dovecot Pigeonhole"));
}

#[test]
fn test_connect_twice() {
    let mut s = Session::new("", "", false);
    let transport = ScriptedTransport {
        input: Cursor::new(GREETING.as_bytes().to_vec()),
        tls_input: vec![],
        sent: Arc::new(Mutex::new(vec![])),
        secure: false,
    };
    assert_eq!(
        s.conn
            .connect_transport(Box::new(transport), "sieve.example.com")
            .unwrap_err()
            .kind,
        ErrorKind::ProtocolError
    );
}

#[test]
fn test_insecure_auth_refused() {
    let mut s = Session::new("OK\r\n", "", false);
    assert_eq!(
        s.conn.authenticate("user", "pass", None).unwrap_err().kind,
        ErrorKind::ProtocolError
    );
    assert_eq!(s.take_sent(), "");
    assert_eq!(s.conn.state(), SessionState::Connected);
}

#[test]
fn test_authenticate_plain() {
    let mut s = Session::new("OK \"Logged in.\"\r\n", "", true);
    let response = s.conn.authenticate("user", "pass", None).unwrap();
    assert!(response.is_ok());
    assert_eq!(s.conn.state(), SessionState::Authenticated);
    assert_eq!(s.take_sent(), "AUTHENTICATE \"PLAIN\" \"AHVzZXIAcGFzcw==\"\r\n");

    assert_eq!(
        s.conn.authenticate("user", "pass", None).unwrap_err().kind,
        ErrorKind::ProtocolError
    );
    assert_eq!(s.take_sent(), "");
}

#[test]
fn test_authenticate_rejected() {
    let mut s = Session::new(
        "NO \"Authentication failed.\"\r\nOK (SASL \"\") \"Logged in.\"\r\n",
        "",
        true,
    );
    let response = s.conn.authenticate("user", "wrong", None).unwrap();
    assert!(response.is_no());
    assert_eq!(response.message(), Some("Authentication failed."));
    assert_eq!(s.conn.state(), SessionState::Connected);

    assert!(s.conn.authenticate("user", "pass", None).unwrap().is_ok());
    assert!(s.conn.is_authenticated());
}

#[test]
fn test_authenticate_login_challenges() {
    let mut s = Session::new(
        "\"VXNlcm5hbWU6\"\r\n{12}\r\nUGFzc3dvcmQ6\r\nOK\r\n",
        "",
        true,
    );
    assert!(s
        .conn
        .authenticate("user", "pass", Some("LOGIN"))
        .unwrap()
        .is_ok());
    assert_eq!(
        s.take_sent(),
        "AUTHENTICATE \"LOGIN\"\r\n\"dXNlcg==\"\r\n\"cGFzcw==\"\r\n"
    );
}

#[test]
fn test_authenticate_abort() {
    // PLAIN has nothing to say after its initial response.
    let mut s = Session::new("\"Zm9v\"\r\nNO \"Authentication aborted\"\r\n", "", true);
    let err = s.conn.authenticate("user", "pass", Some("PLAIN")).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Authentication);
    assert!(s.take_sent().ends_with("\r\n\"*\"\r\n"));
    assert_eq!(s.conn.state(), SessionState::Connected);
}

#[test]
fn test_authenticate_unsupported_mechanism() {
    let mut s = Session::new("", "", true);
    assert_eq!(
        s.conn
            .authenticate("user", "pass", Some("GSSAPI"))
            .unwrap_err()
            .kind,
        ErrorKind::NotSupported
    );
}

#[test]
fn test_starttls() {
    let mut s = Session::new(
        "OK \"Begin TLS negotiation now.\"\r\n",
        &format!("{}OK\r\n", TLS_GREETING),
        false,
    );
    assert!(s.conn.starttls().unwrap().is_ok());
    assert_eq!(s.conn.state(), SessionState::Secured);
    assert!(s.conn.is_secured());
    let caps = s.conn.capabilities().unwrap();
    assert!(caps.has_sieve_extension("imap4flags"));
    assert!(!caps.has_tls());
    assert!(!caps.has_sasl_method("LOGIN"));

    assert_eq!(
        s.conn.starttls().unwrap_err().kind,
        ErrorKind::ProtocolError
    );
    assert!(s.conn.authenticate("user", "pass", None).unwrap().is_ok());
    assert_eq!(
        s.take_sent(),
        "STARTTLS\r\nAUTHENTICATE \"PLAIN\" \"AHVzZXIAcGFzcw==\"\r\n"
    );
}

#[test]
fn test_starttls_refused() {
    let mut s = Session::new("NO \"TLS unavailable\"\r\n", "", false);
    assert!(s.conn.starttls().unwrap().is_no());
    assert_eq!(s.conn.state(), SessionState::Connected);
    assert!(!s.conn.is_secured());
}

#[test]
fn test_listscripts() {
    let mut s = Session::authenticated(
        "\"summer_script\"\r\n\"vacation\" ACTIVE\r\n{13}\r\nclever\"script\r\nOK\r\n",
    );
    let mut scripts = vec![SieveScript::new("stale", None, true)];
    assert!(s.conn.listscripts(&mut scripts).unwrap().is_ok());
    assert_eq!(s.take_sent(), "LISTSCRIPTS\r\n");
    assert_eq!(
        scripts
            .iter()
            .map(|s| (s.name(), s.is_active()))
            .collect::<Vec<_>>(),
        vec![
            ("summer_script", false),
            ("vacation", true),
            ("clever\"script", false)
        ]
    );
}

#[test]
fn test_getscript() {
    let mut s = Session::authenticated(
        "{54}\r\n#this is my wonderful script\r\nreject \"I reject all\";\r\n\r\nOK\r\nNO \
         (NONEXISTENT) \"There is no script by that name\"\r\n",
    );
    let result = s.conn.getscript("myscript").unwrap();
    assert!(result.is_ok());
    assert_eq!(
        result.payload.as_deref(),
        Some("#this is my wonderful script\r\nreject \"I reject all\";\r\n")
    );
    assert_eq!(s.take_sent(), "GETSCRIPT \"myscript\"\r\n");

    let mut script = SieveScript::new("missing", Some("old".into()), false);
    let response = s.conn.getscript_into(&mut script).unwrap();
    assert!(response.has_code(&ResponseCode::Nonexistent));
    assert_eq!(script.body(), Some("old"));
}

#[test]
fn test_putscript_literal() {
    let mut s = Session::authenticated(
        "OK (WARNINGS) \"line 2: vacation without :days\"\r\n",
    );
    let body = "require \"vacation\";\r\nvacation \"Je suis en congé\";\r\n";
    let response = s.conn.putscript("vacation", body).unwrap();
    assert!(response.is_ok());
    assert!(response.has_code(&ResponseCode::Warnings));
    assert_eq!(
        s.take_sent(),
        format!("PUTSCRIPT \"vacation\" {{52+}}\r\n{}\r\n", body)
    );
}

#[test]
fn test_setactive() {
    let mut s = Session::authenticated("OK\r\nOK\r\n");
    let mut scripts = vec![
        SieveScript::new("a", None, true),
        SieveScript::new("b", None, false),
    ];
    assert!(s.conn.activate_script(&mut scripts, "b").unwrap().is_ok());
    assert!(!scripts[0].is_active());
    assert!(scripts[1].is_active());
    assert!(s.conn.setactive("").unwrap().is_ok());
    assert_eq!(s.take_sent(), "SETACTIVE \"b\"\r\nSETACTIVE \"\"\r\n");
}

#[test]
fn test_script_management_replies() {
    let mut s = Session::authenticated(
        "OK\r\nNO (ACTIVE) \"You may not delete an active script\"\r\nNO (QUOTA/MAXSIZE) \
         \"Quota exceeded\"\r\nNO \"line 2: Syntax error\"\r\n",
    );
    assert!(s.conn.renamescript("old", "new").unwrap().is_ok());
    let response = s.conn.deletescript("new").unwrap();
    assert!(response.has_code(&ResponseCode::Active));
    let response = s.conn.havespace("big", 999_999).unwrap();
    assert!(response.has_code(&ResponseCode::Quota));
    assert_eq!(response.sub_codes(), ["QUOTA", "MAXSIZE"]);
    assert_eq!(response.to_string(), "NO (QUOTA/MAXSIZE) \"Quota exceeded\"");
    let response = s.conn.checkscript("keep").unwrap();
    assert!(response.is_no());
    assert_eq!(
        s.take_sent(),
        "RENAMESCRIPT \"old\" \"new\"\r\nDELETESCRIPT \"new\"\r\nHAVESPACE \"big\" \
         999999\r\nCHECKSCRIPT {4+}\r\nkeep\r\n"
    );
    assert!(s.conn.is_authenticated());
}

#[test]
fn test_commands_require_authentication() {
    let mut s = Session::new("", "", true);
    for err in [
        s.conn.putscript("a", "keep;").unwrap_err(),
        s.conn.getscript("a").unwrap_err(),
        s.conn.setactive("a").unwrap_err(),
        s.conn.deletescript("a").unwrap_err(),
        s.conn.renamescript("a", "b").unwrap_err(),
        s.conn.checkscript("keep;").unwrap_err(),
        s.conn.havespace("a", 1).unwrap_err(),
        s.conn.listscripts(&mut vec![]).unwrap_err(),
    ] {
        assert_eq!(err.kind, ErrorKind::ProtocolError);
    }
    assert_eq!(s.take_sent(), "");
}

#[test]
fn test_bye_disconnects() {
    let mut s = Session::authenticated(
        "BYE (REFERRAL \"sieve://backup.example.com\") \"Try another server\"\r\n",
    );
    let mut scripts = vec![];
    let response = s.conn.listscripts(&mut scripts).unwrap();
    assert!(response.is_bye());
    assert!(response.has_code(&ResponseCode::Referral));
    assert_eq!(response.param(), Some("sieve://backup.example.com"));
    assert_eq!(s.conn.state(), SessionState::Disconnected);
    assert!(s.conn.capabilities().is_none());
    assert_eq!(
        s.conn.putscript("a", "keep;").unwrap_err().kind,
        ErrorKind::ProtocolError
    );
}

#[test]
fn test_connection_closed_is_fatal() {
    let mut s = Session::authenticated("");
    let err = s.conn.noop(None).unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(
        err.kind,
        ErrorKind::Network(NetworkErrorKind::ConnectionClosed)
    );
    assert_eq!(s.conn.state(), SessionState::Disconnected);
}

#[test]
fn test_noop_and_capability() {
    let mut s = Session::authenticated(&format!(
        "OK (TAG {{16}}\r\nSTARTTLS-SYNC-42) \"Done\"\r\n{}",
        TLS_GREETING
    ));
    let response = s.conn.noop(Some("STARTTLS-SYNC-42")).unwrap();
    assert!(response.has_code(&ResponseCode::Tag));
    assert_eq!(response.param(), Some("STARTTLS-SYNC-42"));

    assert!(s.conn.capability().unwrap().is_ok());
    assert!(s
        .conn
        .capabilities()
        .unwrap()
        .has_sieve_extension("imap4flags"));
    assert_eq!(
        s.take_sent(),
        "NOOP \"STARTTLS-SYNC-42\"\r\nCAPABILITY\r\n"
    );
}

#[test]
fn test_logout() {
    let mut s = Session::authenticated("OK \"Logout Complete\"\r\n");
    let response = s.conn.logout().unwrap().unwrap();
    assert_eq!(response.message(), Some("Logout Complete"));
    assert_eq!(s.conn.state(), SessionState::Disconnected);
    assert_eq!(s.take_sent(), "LOGOUT\r\n");
    assert_eq!(s.conn.logout().unwrap(), None);
}

#[test]
fn test_starttls_invalid_capabilities_disconnects() {
    let mut s = Session::new("OK\r\n", &format!("{{{}}}\r\n", usize::MAX), false);
    let err = s.conn.starttls().unwrap_err();
    assert_eq!(err.kind, ErrorKind::Parse);
    assert_eq!(s.conn.state(), SessionState::Disconnected);
    assert!(s.conn.capabilities().is_none());
    assert!(!s.conn.is_secured());

    let mut s = Session::new("OK\r\n", "NO \"TLS setup failed\"\r\n", false);
    assert!(s.conn.starttls().unwrap().is_no());
    assert_eq!(s.conn.state(), SessionState::Disconnected);
    assert!(s.conn.capabilities().is_none());
}

#[test]
fn test_invalid_capability_lines_skipped() {
    let transport = ScriptedTransport {
        input: Cursor::new(
            format!("UNQUOTED\r\n\"X-ODD\" \"a\" \"b\"\r\n{}", GREETING).into_bytes(),
        ),
        tls_input: vec![],
        sent: Arc::new(Mutex::new(vec![])),
        secure: false,
    };
    let mut conn = ManageSieveConnection::new();
    assert!(conn
        .connect_transport(Box::new(transport), "sieve.example.com")
        .unwrap()
        .is_ok());
    assert_eq!(conn.state(), SessionState::Connected);
    let caps = conn.capabilities().unwrap();
    assert!(caps.is_valid());
    assert!(caps.has_tls());
    assert!(caps.other().is_empty());
}

#[test]
fn test_parse_error_keeps_session() {
    let mut s = Session::authenticated("bogus line\r\nOK\r\nOK \"NOOP completed\"\r\n");
    let mut scripts = vec![SieveScript::new("kept", None, false)];
    let err = s.conn.listscripts(&mut scripts).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Parse);
    assert!(!err.is_fatal());
    assert_eq!(s.conn.state(), SessionState::Authenticated);
    assert_eq!(scripts.len(), 1);

    let response = s.conn.noop(None).unwrap();
    assert_eq!(response.message(), Some("NOOP completed"));
    assert_eq!(s.take_sent(), "LISTSCRIPTS\r\nNOOP\r\n");
}

/// Transport whose reads time out once its input is used up, like a socket
/// with a read timeout.
#[derive(Debug)]
struct StallingTransport(Cursor<Vec<u8>>);

impl Read for StallingTransport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.0.read(buf)? {
            0 => Err(std::io::ErrorKind::WouldBlock.into()),
            len => Ok(len),
        }
    }
}

impl Write for StallingTransport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Transport for StallingTransport {
    fn start_tls(self: Box<Self>, _domain: &str, _policy: &TlsPolicy) -> Result<Box<dyn Transport>> {
        Ok(self)
    }

    fn is_secure(&self) -> bool {
        false
    }
}

#[test]
fn test_read_timeout_is_fatal() {
    let transport = StallingTransport(Cursor::new(
        format!("{}OK\r\n\"summer_script\"\r\n", GREETING).into_bytes(),
    ));
    let mut conn = ManageSieveConnection::new();
    conn.set_allow_insecure_auth(true);
    conn.connect_transport(Box::new(transport), "sieve.example.com")
        .unwrap();
    assert!(conn.authenticate("user", "pass", None).unwrap().is_ok());

    let mut scripts = vec![];
    let err = conn.listscripts(&mut scripts).unwrap_err();
    assert_eq!(err.kind, ErrorKind::TimedOut);
    assert!(err.is_fatal());
    assert!(scripts.is_empty());
    assert_eq!(conn.state(), SessionState::Disconnected);
    assert!(conn.capabilities().is_none());
    assert_eq!(
        conn.noop(None).unwrap_err().kind,
        ErrorKind::ProtocolError
    );
}

/// Serve one connection from `listener`, answering each expected client line
/// in `exchange` with its reply. Returns the lines the client sent.
fn serve(
    listener: TcpListener,
    greeting: &'static str,
    exchange: &'static [&'static str],
) -> std::thread::JoinHandle<Vec<String>> {
    std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        stream.write_all(greeting.as_bytes()).unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut received = vec![];
        for reply in exchange {
            let mut line = String::new();
            if reader.read_line(&mut line).unwrap() == 0 {
                break;
            }
            received.push(line);
            stream.write_all(reply.as_bytes()).unwrap();
        }
        received
    })
}

#[test]
fn test_connect_rejected_greeting() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = serve(listener, "BYE \"Too many connections\"\r\n", &[]);
    let mut conn = ManageSieveConnection::new();
    let err = conn.connect("127.0.0.1", port).unwrap_err();
    assert_eq!(
        err.kind,
        ErrorKind::Network(NetworkErrorKind::ConnectionFailed)
    );
    assert_eq!(conn.state(), SessionState::Disconnected);
    server.join().unwrap();
}

rusty_fork_test! {
    #[test]
    fn test_new_connection_over_tcp() {
        managesieve::StderrLogger::init(managesieve::LogLevel::TRACE).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = serve(
            listener,
            "\"IMPLEMENTATION\" \"mock\"\r\n\"SASL\" \"PLAIN\"\r\n\"SIEVE\" \
             \"fileinto\"\r\n\"VERSION\" \"1.0\"\r\nOK\r\n",
            &[
                "OK \"Logged in.\"\r\n",
                "\"a\" ACTIVE\r\n\"b\"\r\nOK\r\n",
                "OK\r\n",
            ],
        );

        let mut conf = ManageSieveConf::new("127.0.0.1", "user", Password::Raw("pass".into()));
        conf.server_port = port;
        conf.use_starttls = false;
        conf.allow_insecure_auth = true;
        conf.timeout_secs = 10;
        conf.trace = true;
        let mut conn = ManageSieveConnection::new_connection(&conf).unwrap();
        assert!(conn.is_authenticated());

        let mut scripts = vec![];
        assert!(conn.listscripts(&mut scripts).unwrap().is_ok());
        assert_eq!(scripts.len(), 2);
        assert!(scripts[0].is_active());
        assert!(conn.logout().unwrap().unwrap().is_ok());

        assert_eq!(
            server.join().unwrap(),
            vec![
                "AUTHENTICATE \"PLAIN\" \"AHVzZXIAcGFzcw==\"\r\n".to_string(),
                "LISTSCRIPTS\r\n".to_string(),
                "LOGOUT\r\n".to_string(),
            ]
        );
    }

    #[test]
    fn test_new_connection_requires_starttls() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = serve(
            listener,
            "\"IMPLEMENTATION\" \"mock\"\r\n\"SASL\" \"PLAIN\"\r\n\"SIEVE\" \
             \"fileinto\"\r\n\"VERSION\" \"1.0\"\r\nOK\r\n",
            &["OK\r\n"],
        );

        let mut conf = ManageSieveConf::new("127.0.0.1", "user", Password::Raw("pass".into()));
        conf.server_port = port;
        let err = ManageSieveConnection::new_connection(&conf).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotSupported);
        assert_eq!(server.join().unwrap(), vec!["LOGOUT\r\n".to_string()]);
    }
}
