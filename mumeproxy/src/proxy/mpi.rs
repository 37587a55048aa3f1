//! The remote editing sub-protocol ("MPI").
//!
//! Frames are line-anchored in the server stream: a `~$#E` escape directly
//! after a newline, a header line naming the command and body length, then
//! the body itself. The decoder deframes; completed frames are handed to a
//! [`Worker`] that talks to the session sockets directly, so no frame byte
//! ever reaches the client output path.

use std::env;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn, Level};

use tokio_util::bytes::Bytes;

use crate::error::{Error, ErrorKind};
use crate::CRATE_NAME;

use super::SharedWriter;

/// The frame escape, recognized only directly after a newline.
pub(crate) const ESCAPE: &[u8] = b"~$#E";

/// Declared body lengths above this abort the frame as a protocol anomaly.
pub(crate) const MAX_BODY_LEN: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    Edit,
    View,
}

impl Command {
    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'E' => Some(Command::Edit),
            b'V' => Some(Command::View),
            _ => None,
        }
    }
}

/// A complete deframed MPI message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Frame {
    pub(crate) command: Command,
    pub(crate) body: Bytes,
}

/// Parse a header line: a command byte followed by the ASCII decimal body
/// length. Returns `None` for anything malformed, including an empty line.
pub(crate) fn parse_header(header: &[u8]) -> Option<(Command, usize)> {
    let (&command, digits) = header.split_first()?;
    let command = Command::from_byte(command)?;
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let len = std::str::from_utf8(digits).ok()?.parse::<usize>().ok()?;
    (len <= MAX_BODY_LEN).then_some((command, len))
}

/// Everything a worker needs to act on a frame.
pub(crate) struct Session<C, S> {
    pub(crate) client: SharedWriter<C>,
    pub(crate) server: SharedWriter<S>,

    /// In tintin output format the client drives the editor itself; we only
    /// tell it where the scratch file is.
    pub(crate) tintin: bool,

    pub(crate) editor: String,
    pub(crate) pager: String,
}

/// A spawned handler for one MPI frame. Runs to completion; the session
/// driver joins every worker before tearing the session down.
pub(crate) struct Worker {
    handle: JoinHandle<()>,
}

impl Worker {
    pub(crate) fn spawn<C, S>(frame: Frame, session: Session<C, S>) -> Self
    where
        C: AsyncWrite + Unpin + Send + 'static,
        S: AsyncWrite + Unpin + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let command = frame.command;
            if let Err(err) = run(frame, session).await {
                warn!(?command, "MPI worker failed: {err}");
            }
        });
        Self { handle }
    }

    pub(crate) async fn join(self) {
        let _ = self.handle.await;
    }
}

#[instrument(level = Level::DEBUG, skip(frame, session), fields(command = ?frame.command, len = frame.body.len()))]
async fn run<C, S>(frame: Frame, session: Session<C, S>) -> Result<(), Error>
where
    C: AsyncWrite + Unpin + Send + 'static,
    S: AsyncWrite + Unpin + Send + 'static,
{
    match frame.command {
        Command::View => view(&frame.body, &session).await,
        Command::Edit => edit(&frame.body, &session).await,
    }
}

async fn view<C, S>(body: &[u8], session: &Session<C, S>) -> Result<(), Error>
where
    C: AsyncWrite + Unpin + Send + 'static,
    S: AsyncWrite + Unpin + Send + 'static,
{
    let path = scratch_path("view");
    fs::write(&path, body).await?;

    if session.tintin {
        // The file is left in place for the client to page and clean up.
        notify_client(session, &session.pager, &path.display().to_string()).await?;
        return Ok(());
    }

    let status = spawn_tool(&session.pager, &path.display().to_string()).await?;
    if !status {
        warn!(pager = %session.pager, "pager exited with failure");
    }
    let _ = fs::remove_file(&path).await;
    Ok(())
}

async fn edit<C, S>(body: &[u8], session: &Session<C, S>) -> Result<(), Error>
where
    C: AsyncWrite + Unpin + Send + 'static,
    S: AsyncWrite + Unpin + Send + 'static,
{
    // Malformed edit bodies are a protocol anomaly: drop the frame.
    let Some(request) = EditRequest::parse(body) else {
        warn!("malformed MPI edit body, dropping frame");
        return Ok(());
    };

    let path = scratch_path("edit");
    fs::write(&path, &request.text).await?;

    if session.tintin {
        // Editing happens out-of-band on the client side; the server gets a
        // cancel so the session is not left holding the edit open.
        notify_client(session, &session.editor, &path.display().to_string()).await?;
        send_reply(session, &request.cancel()).await?;
        return Ok(());
    }

    let status = spawn_tool(&session.editor, &path.display().to_string()).await?;
    let edited = fs::read(&path).await?;
    let _ = fs::remove_file(&path).await;

    let reply = match status && edited != request.text {
        true => request.save(&edited),
        false => request.cancel(),
    };
    send_reply(session, &reply).await
}

/// An `E` frame body: an `M<session>` line, a title line, then the text to
/// edit.
#[derive(Debug, Clone, PartialEq, Eq)]
struct EditRequest {
    session: Vec<u8>,
    title: Vec<u8>,
    text: Vec<u8>,
}

impl EditRequest {
    fn parse(body: &[u8]) -> Option<Self> {
        let at = body.iter().position(|&b| b == b'\n')?;
        let (first, rest) = (&body[..at], &body[at + 1..]);
        let session = first.strip_prefix(b"M")?.to_vec();

        let (title, text) = match rest.iter().position(|&b| b == b'\n') {
            Some(at) => (&rest[..at], &rest[at + 1..]),
            None => (rest, &rest[rest.len()..]),
        };

        Some(Self {
            session,
            title: title.to_vec(),
            text: text.to_vec(),
        })
    }

    /// Reply payload for an abandoned edit.
    fn cancel(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(self.session.len() + 2);
        payload.push(b'C');
        payload.extend_from_slice(&self.session);
        payload.push(b'\n');
        frame_reply(&payload)
    }

    /// Reply payload carrying the edited text.
    fn save(&self, text: &[u8]) -> Vec<u8> {
        let mut payload = Vec::with_capacity(self.session.len() + text.len() + 2);
        payload.push(b'E');
        payload.extend_from_slice(&self.session);
        payload.push(b'\n');
        payload.extend_from_slice(text);
        frame_reply(&payload)
    }
}

/// Wrap a reply payload in the MPI edit-response frame.
fn frame_reply(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(ESCAPE.len() + 8 + payload.len());
    frame.extend_from_slice(ESCAPE);
    frame.push(b'E');
    frame.extend_from_slice(payload.len().to_string().as_bytes());
    frame.push(b'\n');
    frame.extend_from_slice(payload);
    frame
}

async fn send_reply<C, S>(session: &Session<C, S>, reply: &[u8]) -> Result<(), Error>
where
    C: AsyncWrite + Unpin + Send + 'static,
    S: AsyncWrite + Unpin + Send + 'static,
{
    let mut server = session.server.lock().await;
    server.write_all(reply).await?;
    server.flush().await?;
    Ok(())
}

async fn notify_client<C, S>(
    session: &Session<C, S>,
    tool: &str,
    path: &str,
) -> Result<(), Error>
where
    C: AsyncWrite + Unpin + Send + 'static,
    S: AsyncWrite + Unpin + Send + 'static,
{
    let mut client = session.client.lock().await;
    client
        .write_all(format!("MPICOMMAND:{tool} {path}\r\n").as_bytes())
        .await?;
    client.flush().await?;
    Ok(())
}

/// Run the configured pager/editor to completion with inherited stdio.
async fn spawn_tool(tool: &str, path: &str) -> Result<bool, Error> {
    let mut parts = tool.split_whitespace();
    let Some(program) = parts.next() else {
        return Err(ErrorKind::Internal("empty MPI tool command".into()).into());
    };

    debug!(tool, path, "running MPI tool");
    let status = tokio::process::Command::new(program)
        .args(parts)
        .arg(path)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await?;
    Ok(status.success())
}

fn scratch_path(kind: &str) -> std::path::PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let serial = COUNTER.fetch_add(1, Ordering::Relaxed);
    env::temp_dir().join(format!(
        "{CRATE_NAME}-{kind}-{}-{serial}.txt",
        std::process::id()
    ))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn header_parsing() {
        assert_eq!(parse_header(b"E12"), Some((Command::Edit, 12)));
        assert_eq!(parse_header(b"V0"), Some((Command::View, 0)));
        assert_eq!(parse_header(b"E007"), Some((Command::Edit, 7)));

        // Unknown command, missing digits, junk digits, empty line.
        assert_eq!(parse_header(b"X12"), None);
        assert_eq!(parse_header(b"E"), None);
        assert_eq!(parse_header(b"E12x"), None);
        assert_eq!(parse_header(b""), None);

        // Declared lengths beyond the cap are rejected outright.
        assert_eq!(parse_header(b"E2097153"), None);
        assert_eq!(parse_header(b"E99999999999999999999"), None);
    }

    #[test]
    fn edit_request_parsing() {
        let request = EditRequest::parse(b"M123\nA letter\nDear sir,").unwrap();
        assert_eq!(request.session, b"123");
        assert_eq!(request.title, b"A letter");
        assert_eq!(request.text, b"Dear sir,");

        // A body without text still parses.
        let request = EditRequest::parse(b"M7\ntitle only").unwrap();
        assert_eq!(request.title, b"title only");
        assert_eq!(request.text, b"");

        // No M line, no newline at all.
        assert!(EditRequest::parse(b"123\ntitle\ntext").is_none());
        assert!(EditRequest::parse(b"M123").is_none());
    }

    #[test]
    fn replies_are_framed() {
        let request = EditRequest::parse(b"M9\nnote\nold").unwrap();
        assert_eq!(request.cancel(), b"~$#EE3\nC9\n");
        assert_eq!(request.save(b"new text"), b"~$#EE11\nE9\nnew text");
    }
}
