//! Wire envelope for the line-oriented protocol
//!
//! Each protocol line carries an optional session token and a message body,
//! encoded as `token|body`. Decoding splits on the FIRST `|` only, so
//! message bodies may themselves contain `|` characters. A line without a
//! separator is a bare message with no token.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// One line of the wire protocol: optional token plus message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub token: Option<String>,
    pub body: String,
}

impl Envelope {
    /// A bare message with no token attached.
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            token: None,
            body: body.into(),
        }
    }

    /// A message carrying a session token.
    pub fn with_token(token: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            body: body.into(),
        }
    }

    /// Encode into a single protocol line (without trailing newline).
    pub fn encode(&self) -> String {
        match &self.token {
            Some(token) => format!("{}|{}", token, self.body),
            None => self.body.clone(),
        }
    }

    /// Decode a protocol line.
    ///
    /// Only the first `|` is structural; everything after it belongs to the
    /// body. An empty token segment decodes as no token.
    pub fn decode(line: &str) -> Self {
        match line.split_once('|') {
            Some(("", body)) => Self::new(body),
            Some((token, body)) => Self::with_token(token, body),
            None => Self::new(line),
        }
    }
}

/// Read the next envelope from a buffered line stream.
///
/// Returns `Ok(None)` at end of stream — the distinguished "connection
/// closed" result, never an empty message.
pub async fn read_envelope<R>(reader: &mut R) -> std::io::Result<Option<Envelope>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    let trimmed = line.trim_end_matches(['\r', '\n']);
    Ok(Some(Envelope::decode(trimmed)))
}
