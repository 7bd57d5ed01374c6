//! Thin whitespace-tokenized line protocol (spec §6.1): SET, GET, DEL,
//! EXPIRE, PING, STATS, QUIT. This is the external-collaborator surface
//! spec.md places out of the core storage engine's scope; it exists only so
//! the engine has a real caller over TCP.

use bytes::Bytes;

/// A parsed client request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Set { key: Bytes, value: Bytes },
    Get { key: Bytes },
    Del { key: Bytes },
    Expire { key: Bytes, ttl_millis: i64 },
    Ping,
    Stats,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Empty,
    UnknownCommand(String),
    WrongArity { command: &'static str },
    BadInteger(String),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Empty => write!(f, "empty command"),
            ParseError::UnknownCommand(cmd) => write!(f, "unknown command '{cmd}'"),
            ParseError::WrongArity { command } => write!(f, "wrong number of arguments for '{command}'"),
            ParseError::BadInteger(raw) => write!(f, "not an integer: '{raw}'"),
        }
    }
}

/// Splits a line into whitespace-delimited tokens and parses a [`Request`].
/// Keys and values are taken verbatim (no quoting or escaping); a value may
/// itself contain spaces only if it is the final token, since `SET` takes
/// everything after the key as the value.
pub fn parse_line(line: &str) -> Result<Request, ParseError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut parts = line.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or("").trim();
    if command.is_empty() {
        return Err(ParseError::Empty);
    }
    let rest = parts.next().unwrap_or("").trim_start();

    match command.to_ascii_uppercase().as_str() {
        "SET" => {
            let mut args = rest.splitn(2, char::is_whitespace);
            let key = args.next().unwrap_or("");
            let value = args.next().unwrap_or("").trim_start();
            if key.is_empty() {
                return Err(ParseError::WrongArity { command: "SET" });
            }
            Ok(Request::Set {
                key: Bytes::copy_from_slice(key.as_bytes()),
                value: Bytes::copy_from_slice(value.as_bytes()),
            })
        }
        "GET" => {
            let key = rest.trim();
            if key.is_empty() {
                return Err(ParseError::WrongArity { command: "GET" });
            }
            Ok(Request::Get {
                key: Bytes::copy_from_slice(key.as_bytes()),
            })
        }
        "DEL" => {
            let key = rest.trim();
            if key.is_empty() {
                return Err(ParseError::WrongArity { command: "DEL" });
            }
            Ok(Request::Del {
                key: Bytes::copy_from_slice(key.as_bytes()),
            })
        }
        "EXPIRE" => {
            let mut args = rest.split_whitespace();
            let key = args.next().unwrap_or("");
            let ttl_raw = args.next().unwrap_or("");
            if key.is_empty() || ttl_raw.is_empty() || args.next().is_some() {
                return Err(ParseError::WrongArity { command: "EXPIRE" });
            }
            let ttl_millis = ttl_raw
                .parse::<i64>()
                .map_err(|_| ParseError::BadInteger(ttl_raw.to_string()))?;
            Ok(Request::Expire {
                key: Bytes::copy_from_slice(key.as_bytes()),
                ttl_millis,
            })
        }
        "PING" => Ok(Request::Ping),
        "STATS" => Ok(Request::Stats),
        "QUIT" => Ok(Request::Quit),
        other => Err(ParseError::UnknownCommand(other.to_string())),
    }
}

/// A response line, not yet terminated by CRLF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok,
    Pong,
    Value(Bytes),
    Nil,
    Integer(i64),
    Bool(bool),
    /// One `STAT name value` line per entry; rendered terminated by `END`.
    Stats(Vec<String>),
    Error(String),
    Bye,
}

impl Response {
    /// Renders the response, CRLF-terminated. `Stats` is the one multi-line
    /// reply: one `STAT name value` line per counter, terminated by `END`,
    /// so a client can read lines until it sees the sentinel rather than
    /// assuming a single line.
    pub fn render(&self) -> String {
        if let Response::Stats(lines) = self {
            let mut out = String::new();
            for line in lines {
                out.push_str(line);
                out.push_str("\r\n");
            }
            out.push_str("END\r\n");
            return out;
        }

        let body = match self {
            Response::Ok => "OK".to_string(),
            Response::Pong => "PONG".to_string(),
            Response::Value(bytes) => format!("VALUE {}", String::from_utf8_lossy(bytes)),
            Response::Nil => "NIL".to_string(),
            Response::Integer(n) => n.to_string(),
            Response::Bool(b) => if *b { "1".to_string() } else { "0".to_string() },
            Response::Stats(_) => unreachable!("handled above"),
            Response::Error(msg) => format!("ERR {msg}"),
            Response::Bye => "BYE".to_string(),
        };
        format!("{body}\r\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_set_with_spaces_in_value() {
        let req = parse_line("SET mykey hello world\r\n").unwrap();
        assert_eq!(
            req,
            Request::Set {
                key: Bytes::from_static(b"mykey"),
                value: Bytes::from_static(b"hello world"),
            }
        );
    }

    #[test]
    fn parses_commands_case_insensitively() {
        assert_eq!(parse_line("ping").unwrap(), Request::Ping);
        assert_eq!(parse_line("Ping").unwrap(), Request::Ping);
    }

    #[test]
    fn get_requires_a_key() {
        assert_eq!(parse_line("GET"), Err(ParseError::WrongArity { command: "GET" }));
    }

    #[test]
    fn expire_requires_integer_ttl() {
        assert_eq!(
            parse_line("EXPIRE k notanumber"),
            Err(ParseError::BadInteger("notanumber".to_string()))
        );
    }

    #[test]
    fn unknown_command_is_reported() {
        assert_eq!(
            parse_line("FROB x"),
            Err(ParseError::UnknownCommand("FROB".to_string()))
        );
    }

    #[test]
    fn empty_line_is_rejected() {
        assert_eq!(parse_line(""), Err(ParseError::Empty));
        assert_eq!(parse_line("   "), Err(ParseError::Empty));
    }

    #[test]
    fn response_render_terminates_with_crlf() {
        assert_eq!(Response::Ok.render(), "OK\r\n");
        assert_eq!(Response::Integer(42).render(), "42\r\n");
    }

    #[test]
    fn stats_render_is_multi_line_terminated_by_end() {
        let rendered = Response::Stats(vec!["STAT gets 3".to_string(), "STAT hits 2".to_string()]).render();
        assert_eq!(rendered, "STAT gets 3\r\nSTAT hits 2\r\nEND\r\n");
    }
}
