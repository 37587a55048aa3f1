//! The mapper task.
//!
//! Consumes the decoder's event stream, keeps the most recently seen room,
//! and answers user commands intercepted by the forwarder. Commands are
//! registered in an explicit table at construction time; the forwarder uses
//! the same table to decide what to divert.

use std::collections::{HashMap, HashSet};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::bytes::Bytes;
use tracing::{debug, instrument, trace, Level};

use crate::config::GlobalConfig;
use crate::event::{Event, EventReceiver};
use crate::proxy::forward::first_token;
use crate::proxy::SharedWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UserCommand {
    /// Report the most recently seen room.
    RoomInfo,
    /// List the registered commands.
    Help,
    /// Forget the held room state.
    Sync,
}

/// The most recent room block and prompt, as raw stream bytes.
#[derive(Debug, Default, Clone)]
struct Room {
    name: Bytes,
    description: Bytes,
    exits: Bytes,
    prompt: Bytes,
    dynamic: Bytes,
}

pub struct Mapper<W> {
    events: EventReceiver,
    client: SharedWriter<W>,
    config: GlobalConfig,
    commands: HashMap<&'static [u8], UserCommand>,
    room: Room,
    lines_seen: u64,
}

impl<W> Mapper<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(events: EventReceiver, client: SharedWriter<W>, config: GlobalConfig) -> Self {
        Self {
            events,
            client,
            config,
            commands: HashMap::from([
                (b"rinfo".as_slice(), UserCommand::RoomInfo),
                (b"maphelp".as_slice(), UserCommand::Help),
                (b"sync".as_slice(), UserCommand::Sync),
            ]),
            room: Room::default(),
            lines_seen: 0,
        }
    }

    /// The command names the forwarder should divert onto the event queue.
    #[must_use]
    pub fn command_names(&self) -> HashSet<Vec<u8>> {
        self.commands.keys().map(|name| name.to_vec()).collect()
    }

    #[instrument(level = Level::TRACE, skip(self))]
    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            match event {
                Event::Shutdown => break,
                Event::UserData(data) => self.user_command(&data).await,
                event => self.observe(event),
            }
        }
        trace!(lines = self.lines_seen, "mapper finished");
    }

    fn observe(&mut self, event: Event) {
        match event {
            Event::Line(_) => self.lines_seen += 1,
            Event::Movement(direction) => {
                debug!(direction = %String::from_utf8_lossy(&direction), "movement");
            }
            Event::Name(name) => self.room.name = name,
            Event::Description(description) => self.room.description = description,
            Event::Exits(exits) => self.room.exits = exits,
            Event::Prompt(prompt) => self.room.prompt = prompt,
            Event::Dynamic(dynamic) => self.room.dynamic = dynamic,
            Event::IacGa => trace!("prompt boundary"),
            // Handled by the run loop.
            Event::UserData(_) | Event::Shutdown => {}
        }
    }

    async fn user_command(&mut self, data: &[u8]) {
        let Some(token) = first_token(data) else {
            return;
        };
        let Some(command) = self.commands.get(token).copied() else {
            debug!(token = %String::from_utf8_lossy(token), "unregistered command");
            return;
        };

        match command {
            UserCommand::RoomInfo => self.room_info().await,
            UserCommand::Help => self.help().await,
            UserCommand::Sync => {
                self.room = Room::default();
                self.reply("room state cleared".into()).await;
            }
        }
    }

    async fn room_info(&self) {
        let (template, gag_prompts) = self.config.lookup(
            |config| (config.find_format.clone(), config.gag_prompts),
            (String::new(), false),
        );

        let mut report = template
            .replace("{name}", &String::from_utf8_lossy(&self.room.name))
            .replace("{desc}", &String::from_utf8_lossy(&self.room.description))
            .replace("{dynamic}", &String::from_utf8_lossy(&self.room.dynamic))
            .replace("{exits}", &String::from_utf8_lossy(&self.room.exits));
        report = match gag_prompts {
            true => report.replace("{prompt}", ""),
            false => report.replace("{prompt}", &String::from_utf8_lossy(&self.room.prompt)),
        };
        self.reply(report).await;
    }

    async fn help(&self) {
        let mut names: Vec<&str> = self
            .commands
            .keys()
            .filter_map(|name| std::str::from_utf8(name).ok())
            .collect();
        names.sort_unstable();
        self.reply(format!("commands: {}", names.join(", "))).await;
    }

    async fn reply(&self, text: String) {
        let mut client = self.client.lock().await;
        let write = async {
            client
                .write_all(format!("\r\n{text}\r\n").as_bytes())
                .await?;
            client.flush().await
        };
        if let Err(err) = write.await {
            debug!("client write failed: {err}");
        }
    }
}
