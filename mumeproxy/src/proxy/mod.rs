//! The proxy session driver.
//!
//! Owns the listener and the two sockets, and runs the three concurrent
//! flows of a session: the server→client decoder (this module's
//! [`decoder`]), the client→server [`forward`]er, and the mapper. Remote
//! editing frames spawn short-lived [`mpi`] workers which are joined before
//! the mapper is.

pub(crate) mod decoder;
pub(crate) mod forward;
pub(crate) mod mpi;
pub(crate) mod xml;

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{self, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::bytes::Bytes;
use tracing::{debug, info, instrument, trace, warn, Level};

use crate::config::{Config, GlobalConfig, OutputFormat};
use crate::error::Error;
use crate::event::{self, Event, EventSender};
use crate::mapper::Mapper;
use crate::net::stream::{configure_keepalive, Stream};

use decoder::Decoder;

/// Maximum bytes consumed from either socket per read.
pub(crate) const READ_SIZE: usize = 4096;

/// A socket write half shared between tasks. Writes are atomic at message
/// granularity: whoever holds the lock writes a complete message.
pub type SharedWriter<W> = Arc<Mutex<W>>;

/// Zero-length file signalling that the listener is up. External
/// supervisors poll for it.
const READY_FILE: &str = "mapper_ready.ignore";

/// Accept one client, connect to the game, and run the session to
/// completion.
#[instrument(level = Level::DEBUG, skip(config))]
pub async fn run(config: &GlobalConfig) -> Result<(), Error> {
    let settings = config.snapshot();

    let listener =
        TcpListener::bind((settings.local_host.as_str(), settings.local_port)).await?;
    info!(
        host = %settings.local_host,
        port = settings.local_port,
        "listening"
    );
    let ready = ReadyFile::create()?;

    let (client_stream, peer) = match listener.accept().await {
        Ok(accepted) => accepted,
        Err(err) => {
            ready.remove();
            return Err(err.into());
        }
    };
    info!(%peer, "client connected");

    let result = session(client_stream, &settings, config).await;
    ready.remove();
    result
}

async fn session(
    client_stream: TcpStream,
    settings: &Config,
    config: &GlobalConfig,
) -> Result<(), Error> {
    client_stream.set_nodelay(true)?;
    let mut client_stream = configure_keepalive(client_stream)?;

    let server_stream = match Stream::connect(settings).await {
        Ok(stream) => stream,
        Err(err) => {
            // Pre-data failures are reported to the client in plain text.
            let _ = client_stream
                .write_all(b"\r\nError: server connection failed!\r\n\r\n")
                .await;
            let _ = client_stream.shutdown().await;
            return Err(err);
        }
    };

    let (client_read, client_write) = client_stream.into_split();
    let client_write = Arc::new(Mutex::new(client_write));
    let (server_read, server_write) = io::split(server_stream);
    let server_write = Arc::new(Mutex::new(server_write));

    let (event_tx, event_rx) = event::channel();
    let mapper = Mapper::new(event_rx, client_write.clone(), config.clone());
    let commands = mapper.command_names();
    let mapper_task = tokio::spawn(mapper.run());

    let alive = Arc::new(AtomicBool::new(true));
    let forward_task = tokio::spawn(forward::run(
        client_read,
        server_write.clone(),
        event_tx.clone(),
        commands,
        Duration::from_secs(settings.client_timeout_secs),
        alive.clone(),
    ));

    let decoder = Decoder::new(
        settings.output_format,
        settings.prompt_terminator(),
        Bytes::copy_from_slice(settings.charset.as_bytes()),
        event_tx.clone(),
    );
    decode_flow(
        server_read,
        client_write.clone(),
        server_write.clone(),
        decoder,
        settings,
        &event_tx,
        &alive,
    )
    .await;

    // The server stream is done: unwind the session. The decoder flow has
    // already joined its MPI workers and queued the shutdown event, so the
    // mapper drains first, then the forwarder notices the cleared flag.
    {
        let mut server = server_write.lock().await;
        let _ = server.shutdown().await;
    }
    let _ = mapper_task.await;
    {
        let mut client = client_write.lock().await;
        let _ = client.write_all(b"\r\n").await;
        let _ = client.shutdown().await;
    }
    let _ = forward_task.await;
    info!("session finished");
    Ok(())
}

/// The server→client flow: read, decode, flush, spawn workers for any
/// completed remote-editing frames.
#[allow(clippy::too_many_arguments)]
async fn decode_flow<C, S>(
    mut server_read: ReadHalf<Stream>,
    client: SharedWriter<C>,
    server: SharedWriter<S>,
    mut decoder: Decoder,
    settings: &Config,
    events: &EventSender,
    alive: &AtomicBool,
) where
    C: AsyncWrite + Unpin + Send + 'static,
    S: AsyncWrite + Unpin + Send + 'static,
{
    let tintin = settings.output_format == OutputFormat::Tintin;
    let editor = settings.editor();
    let pager = settings.pager();

    let mut workers = Vec::new();
    let mut buf = [0u8; READ_SIZE];
    loop {
        let read = match server_read.read(&mut buf).await {
            Ok(0) => {
                debug!("server closed the connection");
                break;
            }
            Ok(read) => read,
            Err(err) => {
                warn!("server read failed: {err}");
                break;
            }
        };

        let output = decoder.advance(&buf[..read]);
        if !output.server.is_empty() {
            if let Err(err) = write_guarded(&server, &output.server).await {
                warn!("server write failed: {err}");
                break;
            }
        }
        for frame in output.frames {
            workers.push(mpi::Worker::spawn(
                frame,
                mpi::Session {
                    client: client.clone(),
                    server: server.clone(),
                    tintin,
                    editor: editor.clone(),
                    pager: pager.clone(),
                },
            ));
        }
        if !output.client.is_empty() {
            if let Err(err) = write_guarded(&client, &output.client).await {
                debug!("client write failed: {err}");
                break;
            }
        }
    }
    alive.store(false, Ordering::SeqCst);

    trace!(workers = workers.len(), "joining MPI workers");
    for worker in workers {
        worker.join().await;
    }
    let _ = events.send(Event::Shutdown);
}

async fn write_guarded<W>(writer: &SharedWriter<W>, data: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut guard = writer.lock().await;
    guard.write_all(data).await?;
    guard.flush().await
}

/// The listening-ready sentinel. Removal is an explicit shutdown step, not
/// a Drop impl.
struct ReadyFile(PathBuf);

impl ReadyFile {
    fn create() -> Result<Self, Error> {
        let path = PathBuf::from(READY_FILE);
        fs::File::create(&path)?;
        Ok(Self(path))
    }

    fn remove(self) {
        if let Err(err) = fs::remove_file(&self.0) {
            debug!("removing ready file: {err}");
        }
    }
}
