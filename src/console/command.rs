//! Command input to the server process.

use std::fmt;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::supervisor::SupervisorError;

/// The command that asks the server to save and exit.
pub const STOP_COMMAND: &str = "stop";

/// Writes line-delimited commands to a child's input stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandChannel;

impl CommandChannel {
    /// Strip the trailing line terminator from a command.
    ///
    /// Returns `None` when nothing would be sent. Embedded line breaks are
    /// left in place and rejected by [`CommandChannel::write`].
    #[must_use]
    pub fn normalize(text: &str) -> Option<&str> {
        let line = text.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            None
        } else {
            Some(line)
        }
    }

    /// Write `text` followed by a newline, then flush.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::InvalidCommand` if `text` holds a line
    /// break, and `SupervisorError::WriteFailed` if the stream is closed or
    /// the write fails.
    pub async fn write<W>(stdin: &mut W, text: &str) -> Result<(), SupervisorError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        if text.contains(['\r', '\n']) {
            return Err(SupervisorError::InvalidCommand);
        }

        let mut line = String::with_capacity(text.len() + 1);
        line.push_str(text);
        line.push('\n');

        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(SupervisorError::WriteFailed)?;
        stdin.flush().await.map_err(SupervisorError::WriteFailed)?;
        tracing::trace!(command = %text, "Command written");
        Ok(())
    }
}

/// Administrative commands understood by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerCommand {
    Stop,
    Kick(String),
    Op(String),
    Deop(String),
    BanAdd(String),
    BanRemove(String),
    BanIpAdd(String),
    BanIpRemove(String),
    WhitelistAdd(String),
    WhitelistRemove(String),
    /// Anything else, forwarded verbatim.
    Raw(String),
}

impl fmt::Display for ServerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stop => f.write_str(STOP_COMMAND),
            Self::Kick(player) => write!(f, "kick {player}"),
            Self::Op(player) => write!(f, "op {player}"),
            Self::Deop(player) => write!(f, "deop {player}"),
            Self::BanAdd(player) => write!(f, "ban add {player}"),
            Self::BanRemove(player) => write!(f, "ban remove {player}"),
            Self::BanIpAdd(target) => write!(f, "banip add {target}"),
            Self::BanIpRemove(target) => write!(f, "banip remove {target}"),
            Self::WhitelistAdd(player) => write!(f, "whitelist add {player}"),
            Self::WhitelistRemove(player) => write!(f, "whitelist remove {player}"),
            Self::Raw(text) => f.write_str(text),
        }
    }
}

impl From<ServerCommand> for String {
    fn from(command: ServerCommand) -> Self {
        command.to_string()
    }
}
