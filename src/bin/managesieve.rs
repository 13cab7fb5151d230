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

use std::io::{self, Write};

use managesieve::{
    conf::ManageSieveConf,
    error::{ErrorKind, ResultIntoError},
    LogLevel, ManageSieveConnection, Result, ServerResponse, SieveScript, StderrLogger,
};

const AVAILABLE_COMMANDS: &[&str] = &[
    "help",
    "logout",
    "capability",
    "noop",
    "listscripts",
    "checkscript",
    "putscript",
    "setactive",
    "getscript",
    "deletescript",
    "renamescript",
    "havespace",
];

const COMMANDS_HELP: &[&str] = &[
    "help [COMMAND]",
    "logout and exit",
    "show server capabilities",
    "noop [TAG]: keep the session alive",
    "listscripts and whether they are active",
    "checkscript PATH: check a script file for validity without uploading it",
    "putscript NAME PATH: upload a script file",
    "setactive NAME: set a script as active, with no NAME deactivate all scripts",
    "getscript NAME: print a script by its name",
    "deletescript NAME: delete a script by its name",
    "renamescript OLD NEW: rename a script",
    "havespace NAME SIZE: check whether a script of SIZE octets would fit",
];

fn read_script(path: &str) -> Result<String> {
    std::fs::read_to_string(path)
        .chain_err_summary(|| format!("Could not read script file {}", path))
        .chain_err_kind(ErrorKind::External)
}

fn print_response(response: &ServerResponse) {
    println!("{}", response);
}

fn run_command(conn: &mut ManageSieveConnection, input: &str) -> Result<()> {
    let mut words = input.split_whitespace();
    let Some(cmd) = words.next() else {
        return Ok(());
    };
    let args = words.collect::<Vec<&str>>();
    match (cmd.to_ascii_lowercase().as_str(), args.as_slice()) {
        ("help", []) => {
            println!("available commands: [{}]", AVAILABLE_COMMANDS.join(", "));
        }
        ("help", [name]) => {
            if let Some(i) = AVAILABLE_COMMANDS
                .iter()
                .position(|cmd| cmd.eq_ignore_ascii_case(name))
            {
                println!("{}", COMMANDS_HELP[i]);
            } else {
                println!("invalid command `{}`", name);
            }
        }
        ("capability", []) => {
            print_response(&conn.capability()?);
            if let Some(caps) = conn.capabilities() {
                println!("{:#?}", caps);
            }
        }
        ("noop", []) => print_response(&conn.noop(None)?),
        ("noop", [tag]) => print_response(&conn.noop(Some(*tag))?),
        ("listscripts", []) => {
            let mut scripts: Vec<SieveScript> = vec![];
            let response = conn.listscripts(&mut scripts)?;
            println!("Got {} scripts:", scripts.len());
            for script in scripts {
                println!(
                    "{}active: {}",
                    if script.is_active() { "" } else { "in" },
                    script.name()
                );
            }
            print_response(&response);
        }
        ("checkscript", [path]) => {
            let content = read_script(path)?;
            print_response(&conn.checkscript(&content)?);
        }
        ("putscript", [name, path]) => {
            let content = read_script(path)?;
            print_response(&conn.putscript(name, &content)?);
        }
        ("setactive", []) => print_response(&conn.setactive("")?),
        ("setactive", [name]) => print_response(&conn.setactive(name)?),
        ("getscript", [name]) => {
            let result = conn.getscript(name)?;
            if let Some(payload) = result.payload.as_ref() {
                println!("{}", payload);
            }
            print_response(&result.response);
        }
        ("deletescript", [name]) => print_response(&conn.deletescript(name)?),
        ("renamescript", [old_name, new_name]) => {
            print_response(&conn.renamescript(old_name, new_name)?)
        }
        ("havespace", [name, size]) => {
            print_response(&conn.havespace(name, size.parse::<usize>()?)?)
        }
        (other, _) => {
            if AVAILABLE_COMMANDS.contains(&other) {
                println!("invalid arguments, usage: `help {}`", other);
            } else {
                println!("invalid command `{}`", input);
            }
        }
    }
    Ok(())
}

/// Opens an interactive shell on a managesieve server. Suggested use is with
/// rlwrap(1)
///
/// # Example invocation:
/// ```sh
/// ./managesieve managesieve.toml
/// ```
///
/// The log level is read from `MANAGESIEVE_LOG_LEVEL` (`OFF`, `ERROR`,
/// `WARN`, `INFO`, `DEBUG`, `TRACE`) and defaults to `WARN`.
fn main() -> Result<()> {
    let args = std::env::args().skip(1).collect::<Vec<String>>();
    if args.len() != 1 {
        eprintln!("Usage: managesieve CONFIG_PATH");
        std::process::exit(1);
    }
    let level = match std::env::var("MANAGESIEVE_LOG_LEVEL") {
        Ok(val) => val.parse::<LogLevel>()?,
        Err(_) => LogLevel::WARN,
    };
    StderrLogger::init(level)?;

    let conf = ManageSieveConf::from_path(std::path::Path::new(&args[0]))?;
    let mut conn = ManageSieveConnection::new_connection(&conf)?;

    println!("managesieve shell: use 'help' for available commands");
    let mut input = String::new();
    loop {
        input.clear();
        print!("> ");
        io::stdout().flush()?;
        match io::stdin().read_line(&mut input) {
            Ok(0) => break,
            Ok(_) => {
                let input = input.trim();
                if input.eq_ignore_ascii_case("logout") {
                    break;
                }
                if let Err(err) = run_command(&mut conn, input) {
                    println!("error: {}", err);
                    if err.is_fatal() {
                        return Err(err);
                    }
                }
                if !conn.is_connected() {
                    println!("server closed the connection");
                    return Ok(());
                }
            }
            Err(error) => println!("error: {}", error),
        }
    }

    if let Some(response) = conn.logout()? {
        print_response(&response);
    }
    Ok(())
}
