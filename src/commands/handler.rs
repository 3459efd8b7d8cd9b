//! Command Dispatch
//!
//! Turns a decoded [`Command`] into a [`RespValue`] by running it against the
//! [`Keyspace`]. The dispatcher keeps no per-connection state, so one
//! `CommandHandler` can be cloned into every connection task.
//!
//! ## Supported Commands
//!
//! - `PING [message]`
//! - `ECHO message`
//! - `SET key value [PX milliseconds]`
//! - `GET key`
//! - `CONFIG GET parameter`
//! - `KEYS [pattern]`
//!
//! Argument problems and unknown commands become `-ERR ...` replies; they
//! never end the connection.

use crate::protocol::{Command, RespValue};
use crate::storage::Keyspace;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors a single command can produce. Each one is sent back to the client
/// as an error reply.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),

    #[error("ERR syntax error")]
    Syntax,

    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    #[error("ERR invalid expire time in '{0}' command")]
    InvalidExpireTime(&'static str),

    #[error("ERR unknown subcommand '{subcommand}'. Try {command} HELP.")]
    UnknownSubcommand {
        command: &'static str,
        subcommand: String,
    },

    #[error("ERR unknown command '{name}', with args beginning with: {args}")]
    UnknownCommand { name: String, args: String },
}

/// Result type for command execution.
pub type CommandResult = Result<RespValue, CommandError>;

/// Executes commands against a shared keyspace.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    keyspace: Arc<Keyspace>,
}

impl CommandHandler {
    pub fn new(keyspace: Arc<Keyspace>) -> Self {
        Self { keyspace }
    }

    pub fn keyspace(&self) -> &Arc<Keyspace> {
        &self.keyspace
    }

    /// Executes a command and returns the reply to send.
    pub fn execute(&self, command: Command) -> RespValue {
        match self.dispatch(&command) {
            Ok(reply) => reply,
            Err(e) => {
                debug!(command = %command.name_upper(), error = %e, "Command failed");
                RespValue::error(e.to_string())
            }
        }
    }

    fn dispatch(&self, command: &Command) -> CommandResult {
        let args = command.args();
        match command.name_upper().as_str() {
            "PING" => self.cmd_ping(args),
            "ECHO" => self.cmd_echo(args),
            "SET" => self.cmd_set(args),
            "GET" => self.cmd_get(args),
            "CONFIG" => self.cmd_config(args),
            "KEYS" => self.cmd_keys(args),
            _ => Err(unknown_command(command)),
        }
    }

    /// PING [message]
    fn cmd_ping(&self, args: &[Bytes]) -> CommandResult {
        match args {
            [] => Ok(RespValue::pong()),
            [message] => Ok(RespValue::bulk_string(message.clone())),
            _ => Err(CommandError::WrongArity("ping")),
        }
    }

    /// ECHO message
    fn cmd_echo(&self, args: &[Bytes]) -> CommandResult {
        match args {
            [message] => Ok(RespValue::bulk_string(message.clone())),
            _ => Err(CommandError::WrongArity("echo")),
        }
    }

    /// SET key value [PX milliseconds]
    fn cmd_set(&self, args: &[Bytes]) -> CommandResult {
        let (key, value, options) = match args {
            [key, value, options @ ..] => (key, value, options),
            _ => return Err(CommandError::WrongArity("set")),
        };

        let ttl = match options {
            [] => None,
            [option, millis] if option.eq_ignore_ascii_case(b"PX") => {
                Some(parse_expire_millis(millis)?)
            }
            _ => return Err(CommandError::Syntax),
        };

        self.keyspace.set(key.clone(), value.clone(), ttl);
        Ok(RespValue::ok())
    }

    /// GET key
    fn cmd_get(&self, args: &[Bytes]) -> CommandResult {
        let [key] = args else {
            return Err(CommandError::WrongArity("get"));
        };

        Ok(match self.keyspace.get(key) {
            Some(value) => RespValue::bulk_string(value),
            None => RespValue::null(),
        })
    }

    /// CONFIG GET parameter
    fn cmd_config(&self, args: &[Bytes]) -> CommandResult {
        let Some((subcommand, rest)) = args.split_first() else {
            return Err(CommandError::WrongArity("config"));
        };

        if !subcommand.eq_ignore_ascii_case(b"GET") {
            return Err(CommandError::UnknownSubcommand {
                command: "CONFIG",
                subcommand: reply_text(subcommand),
            });
        }

        let [parameter] = rest else {
            return Err(CommandError::WrongArity("config|get"));
        };

        // Unknown parameters still produce a two-element reply
        let value = std::str::from_utf8(parameter)
            .ok()
            .and_then(|name| self.keyspace.config_get(name))
            .map(|v| Bytes::copy_from_slice(v.as_bytes()))
            .unwrap_or_default();

        Ok(RespValue::bulk_array([parameter.clone(), value]))
    }

    /// KEYS [pattern]
    fn cmd_keys(&self, args: &[Bytes]) -> CommandResult {
        let pattern: &[u8] = match args {
            [] => b"*",
            [pattern] => &pattern[..],
            _ => return Err(CommandError::WrongArity("keys")),
        };

        Ok(RespValue::bulk_array(self.keyspace.keys(pattern)))
    }
}

/// Parses a `PX` argument into a positive duration.
///
/// Only an optional `-` and ASCII digits are accepted; a leading `+` is not.
fn parse_expire_millis(raw: &[u8]) -> Result<Duration, CommandError> {
    if raw.first() == Some(&b'+') {
        return Err(CommandError::NotAnInteger);
    }
    let millis: i64 = std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CommandError::NotAnInteger)?;

    if millis <= 0 {
        return Err(CommandError::InvalidExpireTime("set"));
    }
    Ok(Duration::from_millis(millis as u64))
}

/// Longest slice of a client argument quoted back in an error reply
const MAX_QUOTED_ARG: usize = 128;

/// Renders client bytes for an error line: at most [`MAX_QUOTED_ARG`] bytes,
/// with CR and LF turned into spaces so the reply stays a single frame.
fn reply_text(raw: &[u8]) -> String {
    let raw = &raw[..raw.len().min(MAX_QUOTED_ARG)];
    String::from_utf8_lossy(raw)
        .chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect()
}

fn unknown_command(command: &Command) -> CommandError {
    let args = command
        .args()
        .iter()
        .map(|a| format!("'{}' ", reply_text(a)))
        .collect::<String>();

    CommandError::UnknownCommand {
        name: reply_text(command.name()),
        args,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::parse_message;
    use crate::storage::KeyspaceConfig;

    fn create_handler() -> CommandHandler {
        CommandHandler::new(Arc::new(Keyspace::new()))
    }

    fn make_command(args: &[&str]) -> Command {
        Command::from_parts(args).unwrap()
    }

    fn bulk(s: &str) -> RespValue {
        RespValue::bulk_string(Bytes::from(s.to_string()))
    }

    #[test]
    fn test_ping() {
        let handler = create_handler();

        assert_eq!(handler.execute(make_command(&["PING"])), RespValue::pong());
        assert_eq!(handler.execute(make_command(&["ping", "hello"])), bulk("hello"));
        assert!(handler.execute(make_command(&["PING", "a", "b"])).is_error());
    }

    #[test]
    fn test_echo() {
        let handler = create_handler();

        assert_eq!(handler.execute(make_command(&["ECHO", "hey"])), bulk("hey"));
        assert_eq!(
            handler.execute(make_command(&["ECHO"])),
            RespValue::error("ERR wrong number of arguments for 'echo' command")
        );
    }

    #[test]
    fn test_set_get() {
        let handler = create_handler();

        assert_eq!(handler.execute(make_command(&["SET", "foo", "bar"])), RespValue::ok());
        assert_eq!(handler.execute(make_command(&["GET", "foo"])), bulk("bar"));
        assert_eq!(handler.execute(make_command(&["get", "missing"])), RespValue::null());
    }

    #[test]
    fn test_set_px_expires() {
        let handler = create_handler();

        assert_eq!(
            handler.execute(make_command(&["SET", "foo", "bar", "px", "50"])),
            RespValue::ok()
        );
        assert_eq!(handler.execute(make_command(&["GET", "foo"])), bulk("bar"));

        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(handler.execute(make_command(&["GET", "foo"])), RespValue::null());
    }

    #[test]
    fn test_set_argument_errors() {
        let handler = create_handler();
        let syntax = RespValue::error("ERR syntax error");

        assert_eq!(
            handler.execute(make_command(&["SET", "foo"])),
            RespValue::error("ERR wrong number of arguments for 'set' command")
        );
        assert_eq!(handler.execute(make_command(&["SET", "k", "v", "EX", "10"])), syntax);
        assert_eq!(handler.execute(make_command(&["SET", "k", "v", "PX"])), syntax);
        assert_eq!(
            handler.execute(make_command(&["SET", "k", "v", "PX", "10", "NX"])),
            syntax
        );
        assert_eq!(
            handler.execute(make_command(&["SET", "k", "v", "PX", "soon"])),
            RespValue::error("ERR value is not an integer or out of range")
        );
        assert_eq!(
            handler.execute(make_command(&["SET", "k", "v", "PX", "+100"])),
            RespValue::error("ERR value is not an integer or out of range")
        );
        assert_eq!(
            handler.execute(make_command(&["SET", "k", "v", "PX", " 100"])),
            RespValue::error("ERR value is not an integer or out of range")
        );
        assert_eq!(
            handler.execute(make_command(&["SET", "k", "v", "PX", "0"])),
            RespValue::error("ERR invalid expire time in 'set' command")
        );

        // None of the failed SETs touched the keyspace
        assert_eq!(handler.execute(make_command(&["GET", "k"])), RespValue::null());
    }

    #[test]
    fn test_get_arity() {
        let handler = create_handler();
        assert_eq!(
            handler.execute(make_command(&["GET"])),
            RespValue::error("ERR wrong number of arguments for 'get' command")
        );
    }

    #[test]
    fn test_config_get() {
        let keyspace = Keyspace::with_config(KeyspaceConfig {
            dir: "/tmp".to_string(),
            dbfilename: "snap.rdb".to_string(),
        });
        let handler = CommandHandler::new(Arc::new(keyspace));

        let reply = handler.execute(make_command(&["CONFIG", "GET", "dir"]));
        assert_eq!(reply.serialize(), b"*2\r\n$3\r\ndir\r\n$4\r\n/tmp\r\n");

        let reply = handler.execute(make_command(&["config", "get", "dbfilename"]));
        assert_eq!(reply, RespValue::array(vec![bulk("dbfilename"), bulk("snap.rdb")]));

        let reply = handler.execute(make_command(&["CONFIG", "GET", "maxmemory"]));
        assert_eq!(reply, RespValue::array(vec![bulk("maxmemory"), bulk("")]));
    }

    #[test]
    fn test_config_errors() {
        let handler = create_handler();

        assert!(handler.execute(make_command(&["CONFIG"])).is_error());
        assert!(handler.execute(make_command(&["CONFIG", "GET"])).is_error());
        assert_eq!(
            handler.execute(make_command(&["CONFIG", "SET", "dir", "/"])),
            RespValue::error("ERR unknown subcommand 'SET'. Try CONFIG HELP.")
        );
    }

    #[test]
    fn test_keys() {
        let handler = create_handler();
        for k in ["abc", "ac", "abbc"] {
            handler.execute(make_command(&["SET", k, "1"]));
        }

        assert_eq!(
            handler.execute(make_command(&["KEYS", "a?c"])),
            RespValue::array(vec![bulk("abc")])
        );
        assert_eq!(
            handler.execute(make_command(&["KEYS"])),
            RespValue::array(vec![bulk("abbc"), bulk("abc"), bulk("ac")])
        );
        assert_eq!(
            handler.execute(make_command(&["KEYS", "nope*"])).serialize(),
            b"*0\r\n"
        );
    }

    #[test]
    fn test_unknown_command() {
        let handler = create_handler();

        let response = handler.execute(make_command(&["FOO", "bar"]));
        assert_eq!(
            response,
            RespValue::error("ERR unknown command 'FOO', with args beginning with: 'bar' ")
        );

        // Handler still works afterwards
        assert_eq!(handler.execute(make_command(&["PING"])), RespValue::pong());
    }

    #[test]
    fn test_error_reply_with_crlf_is_one_frame() {
        let handler = create_handler();

        for command in [
            make_command(&["FOO", "x\r\n+OK"]),
            make_command(&["B\r\nAD", "a"]),
            make_command(&["CONFIG", "S\r\n:1"]),
        ] {
            let wire = handler.execute(command).serialize();
            let (reply, used) = parse_message(&wire).unwrap().unwrap();
            assert_eq!(used, wire.len(), "{:?}", String::from_utf8_lossy(&wire));
            assert!(reply.is_error());
        }

        assert_eq!(
            handler.execute(make_command(&["FOO", "x\r\n+OK"])),
            RespValue::error("ERR unknown command 'FOO', with args beginning with: 'x  +OK' ")
        );
    }

    #[test]
    fn test_unknown_command_truncates_long_args() {
        let handler = create_handler();
        let long = "a".repeat(1000);

        let reply = handler.execute(make_command(&["FOO", long.as_str()]));
        let expected = format!(
            "ERR unknown command 'FOO', with args beginning with: '{}' ",
            "a".repeat(MAX_QUOTED_ARG)
        );
        assert_eq!(reply, RespValue::error(expected));
    }
}
