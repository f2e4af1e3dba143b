use std::io;

use chrono::NaiveTime;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Sent once when a connection opens. No trailing newline.
pub const NICKNAME_PROMPT: &str = "Enter your nickname: ";
/// A client line equal to this ends the session.
pub const QUIT_COMMAND: &str = "/quit";
/// Display name used when the client sends an empty or blank nickname.
pub const DEFAULT_NAME: &str = "Anonymous";

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Trims the raw nickname line and falls back to [`DEFAULT_NAME`].
pub fn display_name(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        DEFAULT_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn join_notice(name: &str) -> String {
    format!(">>> {name} has joined the chat!")
}

pub fn departure_notice(name: &str) -> String {
    format!("<<< {name} has left the chat.")
}

/// `[HH:MM] [name]: text`, stamped with local wall-clock time.
pub fn chat_line(at: NaiveTime, name: &str, text: &str) -> String {
    format!("[{}] [{name}]: {text}", at.format("%H:%M"))
}

/// Reads one newline-terminated line, without its line ending.
///
/// Returns `Ok(None)` once the peer has closed the stream. A final line with
/// no terminator is still returned. Blank lines are returned as empty strings.
/// Bytes that are not valid UTF-8 become U+FFFD instead of failing the read.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let bytes = reader.read_until(b'\n', &mut buf).await?;
    if bytes == 0 {
        return Ok(None);
    }

    let line = String::from_utf8_lossy(&buf);
    Ok(Some(line.trim_end_matches(LINE_ENDINGS).to_string()))
}

pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

pub async fn write_prompt<W>(writer: &mut W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(NICKNAME_PROMPT.as_bytes()).await?;
    writer.flush().await
}
