//! The client→server forwarder.
//!
//! Mostly a verbatim relay. Payloads whose first token is a registered
//! mapper command are diverted onto the event queue instead of being sent
//! to the game.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tokio_util::bytes::Bytes;
use tracing::{debug, instrument, trace, Level};

use crate::event::{Event, EventSender};

use super::{SharedWriter, READ_SIZE};

#[instrument(level = Level::TRACE, skip_all)]
pub(crate) async fn run<R, W>(
    mut client: R,
    server: SharedWriter<W>,
    events: EventSender,
    commands: HashSet<Vec<u8>>,
    read_timeout: Duration,
    alive: Arc<AtomicBool>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; READ_SIZE];
    while alive.load(Ordering::SeqCst) {
        let read = match timeout(read_timeout, client.read(&mut buf)).await {
            // Read timeouts only exist so the liveness flag gets re-checked.
            Err(_elapsed) => continue,
            Ok(Ok(0)) => {
                debug!("client closed the connection");
                break;
            }
            Ok(Ok(read)) => read,
            Ok(Err(err)) => {
                debug!("client read failed: {err}");
                break;
            }
        };

        let data = &buf[..read];
        match first_token(data) {
            Some(token) if commands.contains(token) => {
                let _ = events.send(Event::UserData(Bytes::copy_from_slice(data)));
            }
            _ => {
                let mut server = server.lock().await;
                let write = async {
                    server.write_all(data).await?;
                    server.flush().await
                };
                if let Err(err) = write.await {
                    debug!("server write failed: {err}");
                    break;
                }
            }
        }
    }
    alive.store(false, Ordering::SeqCst);
    trace!("forwarder finished");
}

/// The first whitespace-delimited token of a payload, if any.
pub(crate) fn first_token(data: &[u8]) -> Option<&[u8]> {
    data.split(u8::is_ascii_whitespace)
        .find(|token| !token.is_empty())
}
