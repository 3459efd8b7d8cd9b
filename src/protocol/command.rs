//! Decoded client requests.

use bytes::Bytes;

/// A single client request: a command name and its arguments, in order.
///
/// The name is kept exactly as the client sent it; dispatch compares it
/// case-insensitively via [`Command::name_upper`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: Bytes,
    args: Vec<Bytes>,
}

impl Command {
    pub fn new(name: impl Into<Bytes>, args: Vec<Bytes>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Builds a command from string parts, e.g. `["SET", "foo", "bar"]`.
    ///
    /// Returns `None` for an empty slice.
    pub fn from_parts<S: AsRef<[u8]>>(parts: &[S]) -> Option<Self> {
        let (name, rest) = parts.split_first()?;
        Some(Self::new(
            Bytes::copy_from_slice(name.as_ref()),
            rest.iter()
                .map(|a| Bytes::copy_from_slice(a.as_ref()))
                .collect(),
        ))
    }

    /// The command name as sent by the client.
    pub fn name(&self) -> &Bytes {
        &self.name
    }

    /// The command name upper-cased for dispatch. Non-UTF-8 bytes are replaced.
    pub fn name_upper(&self) -> String {
        String::from_utf8_lossy(&self.name).to_ascii_uppercase()
    }

    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    /// Encodes the command as a RESP array of bulk strings.
    pub fn to_frame(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(format!("*{}\r\n", self.args.len() + 1).as_bytes());
        for part in std::iter::once(&self.name).chain(self.args.iter()) {
            buf.extend_from_slice(format!("${}\r\n", part.len()).as_bytes());
            buf.extend_from_slice(part);
            buf.extend_from_slice(b"\r\n");
        }
        buf
    }
}
