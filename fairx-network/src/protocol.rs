/*!
textual control messages of the exchange protocol

Every control message is a keyword optionally followed by arguments, all
joined with the configured separator (`:` by default):

| command                           | response                          |
|-----------------------------------|-----------------------------------|
| `ENCRYPT_FILE:<name>:<size>`      | `READY` then `ENCRYPTED_FILE:<name>:<size>` |
| `REQUEST_FILE:<name>`             | `FILE_INFO:<name>:<size>`         |
| `EXCHANGE_FILE:<name>:<size>`     | `READY` then `INCOMING_FILE:<name>:<size>`  |
| `DISCONNECT`                      | none                              |

Any failure is reported with `ERROR:<message>`.
*/

use crate::Error;
use std::{
    fmt::{self, Display, Formatter},
    time::Duration,
};

const ENCRYPT_FILE: &str = "ENCRYPT_FILE";
const REQUEST_FILE: &str = "REQUEST_FILE";
const EXCHANGE_FILE: &str = "EXCHANGE_FILE";
const DISCONNECT: &str = "DISCONNECT";

const READY: &str = "READY";
const ENCRYPTED_FILE: &str = "ENCRYPTED_FILE";
const FILE_INFO: &str = "FILE_INFO";
const INCOMING_FILE: &str = "INCOMING_FILE";
const ERROR: &str = "ERROR";

/// parameters shared by both ends of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// size of the chunks file bodies are streamed with, also the
    /// largest control message accepted
    pub buffer_size: usize,
    pub separator: char,
    /// width of the length header preceding every control message
    pub header_size: usize,
    /// deadline applied to every individual read or write
    pub io_timeout: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            buffer_size: 4096,
            separator: ':',
            header_size: 10,
            io_timeout: Duration::from_secs(30),
        }
    }
}

/// why a command line was not understood
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Malformation {
    UnknownCommand,
    InvalidFormat,
    InvalidFileName,
    InvalidFileSize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    EncryptFile { name: String, size: u64 },
    RequestFile { name: String },
    ExchangeFile { name: String, size: u64 },
    Disconnect,
    Malformed { line: String, reason: Malformation },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ready,
    EncryptedFile { name: String, size: u64 },
    FileInfo { name: String, size: u64 },
    IncomingFile { name: String, size: u64 },
    Error(String),
}

/// a file name received from a peer must be a plain name, no path
/// components and no separator
pub fn is_valid_file_name(name: &str, separator: char) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(|c: char| c == '/' || c == '\\' || c == '\0' || c == separator)
}

fn name_and_size(
    arguments: Option<&str>,
    separator: char,
) -> Result<(String, u64), Malformation> {
    let arguments = arguments.ok_or(Malformation::InvalidFormat)?;
    let (name, size) = arguments
        .split_once(separator)
        .ok_or(Malformation::InvalidFormat)?;

    if !is_valid_file_name(name, separator) {
        return Err(Malformation::InvalidFileName);
    }
    let size = size
        .parse::<u64>()
        .map_err(|_| Malformation::InvalidFileSize)?;

    Ok((name.to_owned(), size))
}

impl Command {
    /// parse a control line, this never fails: lines that cannot be
    /// understood become [`Command::Malformed`]
    pub fn parse(line: &str, separator: char) -> Self {
        let line = line.trim();
        let mut parts = line.splitn(2, separator);
        let keyword = parts.next().unwrap_or_default();
        let arguments = parts.next();

        let parsed = match keyword {
            ENCRYPT_FILE => name_and_size(arguments, separator)
                .map(|(name, size)| Self::EncryptFile { name, size }),
            EXCHANGE_FILE => name_and_size(arguments, separator)
                .map(|(name, size)| Self::ExchangeFile { name, size }),
            REQUEST_FILE => match arguments {
                None => Err(Malformation::InvalidFormat),
                Some(name) if !is_valid_file_name(name, separator) => {
                    Err(Malformation::InvalidFileName)
                }
                Some(name) => Ok(Self::RequestFile {
                    name: name.to_owned(),
                }),
            },
            DISCONNECT if arguments.is_none() => Ok(Self::Disconnect),
            DISCONNECT => Err(Malformation::InvalidFormat),
            _ => Err(Malformation::UnknownCommand),
        };

        parsed.unwrap_or_else(|reason| Self::Malformed {
            line: line.to_owned(),
            reason,
        })
    }

    pub fn to_line(&self, separator: char) -> String {
        match self {
            Self::EncryptFile { name, size } => {
                format!("{}{s}{}{s}{}", ENCRYPT_FILE, name, size, s = separator)
            }
            Self::RequestFile { name } => format!("{}{}{}", REQUEST_FILE, separator, name),
            Self::ExchangeFile { name, size } => {
                format!("{}{s}{}{s}{}", EXCHANGE_FILE, name, size, s = separator)
            }
            Self::Disconnect => DISCONNECT.to_owned(),
            Self::Malformed { line, .. } => line.clone(),
        }
    }
}

impl Response {
    pub fn parse(line: &str, separator: char) -> Result<Self, Error> {
        let line = line.trim();
        let mut parts = line.splitn(2, separator);
        let keyword = parts.next().unwrap_or_default();
        let arguments = parts.next();

        let file = |arguments: Option<&str>| {
            name_and_size(arguments, separator)
                .map_err(|reason| Error::protocol(format!("{}: {}", reason, line)))
        };

        match keyword {
            READY if arguments.is_none() => Ok(Self::Ready),
            ENCRYPTED_FILE => file(arguments).map(|(name, size)| Self::EncryptedFile { name, size }),
            FILE_INFO => file(arguments).map(|(name, size)| Self::FileInfo { name, size }),
            INCOMING_FILE => file(arguments).map(|(name, size)| Self::IncomingFile { name, size }),
            ERROR => Ok(Self::Error(arguments.unwrap_or_default().to_owned())),
            _ => Err(Error::protocol(format!("Unexpected response: {}", line))),
        }
    }

    pub fn to_line(&self, separator: char) -> String {
        let file = |keyword: &str, name: &str, size: u64| {
            format!("{}{s}{}{s}{}", keyword, name, size, s = separator)
        };
        match self {
            Self::Ready => READY.to_owned(),
            Self::EncryptedFile { name, size } => file(ENCRYPTED_FILE, name, *size),
            Self::FileInfo { name, size } => file(FILE_INFO, name, *size),
            Self::IncomingFile { name, size } => file(INCOMING_FILE, name, *size),
            Self::Error(message) => format!("{}{}{}", ERROR, separator, message),
        }
    }
}

impl Display for Malformation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownCommand => f.write_str("Unknown command"),
            Self::InvalidFormat => f.write_str("Invalid command format"),
            Self::InvalidFileName => f.write_str("Invalid file name"),
            Self::InvalidFileSize => f.write_str("Invalid file size"),
        }
    }
}
