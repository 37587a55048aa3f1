//! The server→client stream decoder.
//!
//! A single state machine advanced one byte at a time over everything the
//! game sends: telnet negotiation (including the CHARSET handshake and
//! IAC-GA prompt substitution), the `~$#E` remote-editing frames, and the
//! inline markup layer carrying room/name/description/exits/prompt/movement
//! structure. Each network read window is fed through [`Decoder::advance`],
//! which is purely computational: the returned [`Output`] tells the session
//! driver what to write where, and structured [`Event`]s are posted to the
//! mapper queue in byte order.

use std::mem;

use tokio_util::bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::config::OutputFormat;
use crate::event::{Event, EventSender};
use crate::net::telnet::{charset, command, option};

use super::mpi::{self, Frame};
use super::xml::{self, XmlMode};

/// The first bytes the game sends on connect: IAC DO TTYPE IAC DO NAWS.
/// Seeing them means the login screen is coming and it is time to greet the
/// server.
const WELCOME_PREFIX: &[u8] = &[
    command::IAC,
    command::DO,
    option::TTYPE,
    command::IAC,
    command::DO,
    option::NAWS,
];

/// NUL and XON are forwarded without entering line or markup handling.
const IGNORED: [u8; 2] = [0x00, 0x11];

/// Tag names longer than this are truncated; dispatch is by prefix so the
/// result is unchanged for any real tag.
const TAG_MAX: usize = 64;

/// What one call to [`Decoder::advance`] produced.
#[derive(Debug, Default)]
pub(crate) struct Output {
    /// Bytes for the mud client, already entity-decoded unless the output
    /// format is raw.
    pub(crate) client: Bytes,

    /// Negotiation replies for the game server.
    pub(crate) server: Bytes,

    /// Completed remote-editing frames, in arrival order.
    pub(crate) frames: Vec<Frame>,
}

#[derive(Debug, Default)]
enum CharsetPhase {
    #[default]
    Idle,

    /// IAC WILL CHARSET has been sent; the server's DO or subnegotiation
    /// response is expected.
    Offered,

    /// Inside an IAC SB CHARSET … IAC SE response. None of it reaches the
    /// client.
    Response { code: Option<u8>, buffer: BytesMut },
}

pub(crate) struct Decoder {
    format: OutputFormat,
    prompt_terminator: Bytes,
    charset_name: Bytes,
    events: EventSender,

    in_iac: bool,
    in_suboption: bool,
    charset: CharsetPhase,

    mpi_counter: u8,
    in_mpi: bool,
    mpi_command: Option<mpi::Command>,
    mpi_len: Option<usize>,
    mpi_buffer: BytesMut,

    reading_tag: bool,
    tag_overflowed: bool,
    in_gratuitous: bool,
    xml_mode: XmlMode,
    saw_initial_output: bool,

    tag_buffer: BytesMut,
    text_buffer: BytesMut,
    /// Start offset of the current child element's text within
    /// `text_buffer`. The buffer spans the whole room block so the dynamic
    /// event can carry all of it.
    text_mark: usize,
    line_buffer: BytesMut,
    client_buffer: BytesMut,
    server_buffer: BytesMut,
    frames: Vec<Frame>,
}

impl Decoder {
    pub(crate) fn new(
        format: OutputFormat,
        prompt_terminator: Bytes,
        charset_name: Bytes,
        events: EventSender,
    ) -> Self {
        Self {
            format,
            prompt_terminator,
            charset_name,
            events,
            in_iac: false,
            in_suboption: false,
            charset: CharsetPhase::Idle,
            mpi_counter: 0,
            in_mpi: false,
            mpi_command: None,
            mpi_len: None,
            mpi_buffer: BytesMut::new(),
            reading_tag: false,
            tag_overflowed: false,
            in_gratuitous: false,
            xml_mode: XmlMode::None,
            saw_initial_output: false,
            tag_buffer: BytesMut::new(),
            text_buffer: BytesMut::new(),
            text_mark: 0,
            line_buffer: BytesMut::new(),
            client_buffer: BytesMut::with_capacity(4096),
            server_buffer: BytesMut::new(),
            frames: Vec::new(),
        }
    }

    /// Process one network read window. The client buffer starts empty and
    /// is drained into the returned [`Output`].
    pub(crate) fn advance(&mut self, data: &[u8]) -> Output {
        if !self.saw_initial_output && data.starts_with(WELCOME_PREFIX) {
            self.greet_server();
        }

        for &byte in data {
            self.feed(byte);
        }

        let client = match self.format {
            OutputFormat::Raw => self.client_buffer.split().freeze(),
            OutputFormat::Normal | OutputFormat::Tintin => {
                let raw = self.client_buffer.split();
                xml::unescape(&raw)
            }
        };
        Output {
            client,
            server: self.server_buffer.split().freeze(),
            frames: mem::take(&mut self.frames),
        }
    }

    /// The game has shown its login screen: identify for remote editing,
    /// enable the markup stream, ask for IAC-GA terminated prompts, and
    /// offer CHARSET negotiation.
    fn greet_server(&mut self) {
        debug!("login screen detected, greeting server");
        self.server_buffer.put_slice(b"~$#EI\n");
        self.server_buffer.put_slice(b"~$#EX2\n3G\n");
        self.server_buffer.put_slice(b"~$#EP2\nG\n");
        self.server_buffer
            .put_slice(&[command::IAC, command::WILL, option::CHARSET]);
        self.charset = CharsetPhase::Offered;
        self.saw_initial_output = true;
    }

    /// Classify one byte. The first matching rule consumes it.
    fn feed(&mut self, byte: u8) {
        if self.in_iac {
            self.iac_command(byte);
        } else if byte == command::IAC {
            self.client_buffer.put_u8(byte);
            self.in_iac = true;
        } else if self.in_suboption || IGNORED.contains(&byte) {
            self.suboption_byte(byte);
        } else if self.in_mpi {
            self.mpi_byte(byte);
        } else if self.mpi_escape(byte) {
            // Byte withheld while the line-anchored escape is in progress.
        } else if self.reading_tag {
            self.tag_byte(byte);
        } else if byte == b'<' {
            self.mpi_counter = 0;
            self.reading_tag = true;
            if self.format == OutputFormat::Raw {
                self.client_buffer.put_u8(byte);
            }
        } else {
            self.text_byte(byte);
        }
    }

    /// Handle the byte following an IAC, or a later byte of the same
    /// command sequence.
    fn iac_command(&mut self, byte: u8) {
        self.client_buffer.put_u8(byte);
        if matches!(
            byte,
            command::WILL | command::WONT | command::DO | command::DONT
        ) {
            // The negotiation verb of a 3-byte sequence; the option byte is
            // still pending.
            return;
        }

        self.in_iac = false;
        if byte == command::SB {
            self.in_suboption = true;
        } else if byte == command::SE {
            if matches!(self.charset, CharsetPhase::Response { .. }) {
                // IAC SE was forwarded above; the charset response is not
                // for the client.
                self.strip_client(2);
                if let CharsetPhase::Response { code, buffer } = mem::take(&mut self.charset) {
                    debug!(
                        accepted = (code == Some(charset::ACCEPTED)),
                        response = ?buffer,
                        "charset negotiation finished"
                    );
                }
            }
            self.in_suboption = false;
        } else if self.in_suboption {
            // Option byte of a subnegotiation; already forwarded.
        } else if byte == command::IAC {
            // Escaped literal 0xFF data byte.
            self.mpi_counter = 0;
            if self.in_mpi {
                self.mpi_buffer.put_u8(byte);
                // Both IAC bytes were forwarded; remote-editing data must
                // not reach the client.
                self.strip_client(2);
                self.mpi_complete();
            } else if self.xml_mode == XmlMode::None {
                self.line_buffer.put_u8(byte);
            }
        } else if byte == option::CHARSET
            && !matches!(self.charset, CharsetPhase::Idle)
            && self.client_buffer.ends_with(&[
                command::IAC,
                command::DO,
                option::CHARSET,
            ])
        {
            // The server accepts charset negotiation: request ours, and
            // keep the acknowledgement away from the client.
            self.server_buffer.put_slice(&[
                command::IAC,
                command::SB,
                option::CHARSET,
                charset::REQUEST,
            ]);
            self.server_buffer.put_u8(b';');
            self.server_buffer.put_slice(&self.charset_name);
            self.server_buffer
                .put_slice(&[command::IAC, command::SE]);
            self.strip_client(3);
        } else if byte == command::GA {
            // Swap the prompt terminator in for IAC-GA.
            self.strip_client(2);
            self.client_buffer.put_slice(&self.prompt_terminator);
            self.emit(Event::IacGa);
            if self.xml_mode == XmlMode::None {
                self.line_buffer.put_slice(b"\r\n");
            }
        }
    }

    /// A byte inside an SB…SE block, or an ignored control byte.
    fn suboption_byte(&mut self, byte: u8) {
        if byte == option::CHARSET
            && !matches!(self.charset, CharsetPhase::Idle)
            && self
                .client_buffer
                .ends_with(&[command::IAC, command::SB])
        {
            // A charset subnegotiation response begins; pull back the
            // forwarded IAC SB.
            self.strip_client(2);
            self.charset = CharsetPhase::Response {
                code: None,
                buffer: BytesMut::new(),
            };
        } else if let CharsetPhase::Response { code, buffer } = &mut self.charset {
            if IGNORED.contains(&byte) {
                self.client_buffer.put_u8(byte);
            } else {
                match code {
                    None => *code = Some(byte),
                    Some(_) => buffer.put_u8(byte),
                }
            }
        } else {
            self.client_buffer.put_u8(byte);
        }
    }

    /// A header or body byte of a remote-editing frame.
    fn mpi_byte(&mut self, byte: u8) {
        if byte == b'\n' && self.mpi_command.is_none() && self.mpi_len.is_none() {
            let header = self.mpi_buffer.split();
            match mpi::parse_header(&header) {
                Some((command, len)) => {
                    self.mpi_command = Some(command);
                    self.mpi_len = Some(len);
                    self.mpi_complete();
                }
                None => {
                    debug!(header = ?header, "invalid MPI header, aborting frame");
                    self.in_mpi = false;
                }
            }
        } else {
            self.mpi_buffer.put_u8(byte);
            self.mpi_complete();
        }
    }

    /// Hand a frame off once the declared body length has accumulated.
    fn mpi_complete(&mut self) {
        let (Some(command), Some(len)) = (self.mpi_command, self.mpi_len) else {
            return;
        };
        if self.mpi_buffer.len() >= len {
            self.frames.push(Frame {
                command,
                body: self.mpi_buffer.split().freeze(),
            });
            self.mpi_command = None;
            self.mpi_len = None;
            self.in_mpi = false;
        }
    }

    /// Advance through the `~$#E` escape. Only matches directly after a
    /// newline; a mismatched byte falls through to ordinary handling, which
    /// resets the counter.
    fn mpi_escape(&mut self, byte: u8) -> bool {
        match (byte, self.mpi_counter) {
            (b'~', 0) if self.client_buffer.ends_with(b"\n") => {
                self.mpi_counter = 1;
                true
            }
            (b'$', 1) => {
                self.mpi_counter = 2;
                true
            }
            (b'#', 2) => {
                self.mpi_counter = 3;
                true
            }
            (b'E', 3) => {
                self.in_mpi = true;
                self.mpi_counter = 0;
                true
            }
            _ => false,
        }
    }

    /// A byte between `<` and `>`.
    fn tag_byte(&mut self, byte: u8) {
        self.mpi_counter = 0;
        if byte == b'>' {
            self.tag_end();
        } else if self.tag_buffer.len() < TAG_MAX {
            self.tag_buffer.put_u8(byte);
        } else if !self.tag_overflowed {
            debug!("tag exceeds {TAG_MAX} bytes, dropping excess");
            self.tag_overflowed = true;
        }
        if self.format == OutputFormat::Raw {
            self.client_buffer.put_u8(byte);
        }
    }

    /// A complete tag name: drive the markup state machine.
    fn tag_end(&mut self) {
        match self.xml_mode {
            XmlMode::None => {
                if self.tag_buffer.starts_with(b"exits") {
                    self.xml_mode = XmlMode::Exits { nested: false };
                    self.text_mark = self.text_buffer.len();
                } else if self.tag_buffer.starts_with(b"prompt") {
                    self.xml_mode = XmlMode::Prompt;
                    self.text_mark = self.text_buffer.len();
                } else if self.tag_buffer.starts_with(b"room") {
                    self.xml_mode = XmlMode::Room;
                    self.text_buffer.clear();
                    self.text_mark = 0;
                } else if self.tag_buffer.starts_with(b"movement") {
                    let direction = xml::movement_direction(&self.tag_buffer);
                    self.emit(Event::Movement(direction));
                }
            }
            XmlMode::Room => {
                if self.tag_buffer.starts_with(b"name") {
                    self.xml_mode = XmlMode::Name;
                    self.text_mark = self.text_buffer.len();
                } else if self.tag_buffer.starts_with(b"description") {
                    self.xml_mode = XmlMode::Description;
                    self.text_mark = self.text_buffer.len();
                } else if self.tag_buffer.starts_with(b"terrain") {
                    // Terrain only comes up in blindness or fog.
                    self.xml_mode = XmlMode::Terrain;
                    self.text_mark = self.text_buffer.len();
                } else if self.tag_buffer.starts_with(b"gratuitous") {
                    self.in_gratuitous = true;
                } else if self.tag_buffer.starts_with(b"/gratuitous") {
                    self.in_gratuitous = false;
                } else if self.tag_buffer.starts_with(b"exits") {
                    self.xml_mode = XmlMode::Exits { nested: true };
                    self.text_mark = self.text_buffer.len();
                } else if self.tag_buffer.starts_with(b"/room") {
                    let text = self.text_buffer.split().freeze();
                    self.text_mark = 0;
                    self.emit(Event::Dynamic(text));
                    self.xml_mode = XmlMode::None;
                }
            }
            XmlMode::Name => {
                if self.tag_buffer.starts_with(b"/name") {
                    let text = self.marked_text();
                    self.emit(Event::Name(text));
                    self.xml_mode = XmlMode::Room;
                }
            }
            XmlMode::Description => {
                if self.tag_buffer.starts_with(b"/description") {
                    let text = self.marked_text();
                    self.emit(Event::Description(text));
                    self.xml_mode = XmlMode::Room;
                }
            }
            XmlMode::Terrain => {
                if self.tag_buffer.starts_with(b"/terrain") {
                    self.xml_mode = XmlMode::Room;
                }
            }
            XmlMode::Exits { nested } => {
                if self.tag_buffer.starts_with(b"/exits") {
                    let text = self.marked_text();
                    self.emit(Event::Exits(text));
                    self.xml_mode = match nested {
                        true => XmlMode::Room,
                        false => {
                            self.text_buffer.clear();
                            self.text_mark = 0;
                            XmlMode::None
                        }
                    };
                }
            }
            XmlMode::Prompt => {
                if self.tag_buffer.starts_with(b"/prompt") {
                    let text = self.marked_text();
                    self.emit(Event::Prompt(text));
                    self.text_buffer.clear();
                    self.text_mark = 0;
                    self.xml_mode = XmlMode::None;
                }
            }
        }

        if self.format == OutputFormat::Tintin {
            if let Some(replacement) = xml::tag_replacement(&self.tag_buffer) {
                self.client_buffer.put_slice(replacement);
            }
        }
        self.tag_buffer.clear();
        self.tag_overflowed = false;
        self.reading_tag = false;
    }

    /// An ordinary text byte.
    fn text_byte(&mut self, byte: u8) {
        self.mpi_counter = 0;
        if self.xml_mode == XmlMode::None {
            if byte == b'\n' && !self.line_buffer.is_empty() {
                self.flush_lines();
            } else {
                self.line_buffer.put_u8(byte);
            }
        } else {
            self.text_buffer.put_u8(byte);
        }
        if self.format == OutputFormat::Raw || !self.in_gratuitous {
            self.client_buffer.put_u8(byte);
        }
    }

    /// Emit one line event per non-blank segment of the line buffer.
    fn flush_lines(&mut self) {
        let buffer = self.line_buffer.split().freeze();
        for line in split_lines(&buffer) {
            if !line.iter().all(u8::is_ascii_whitespace) {
                self.emit(Event::Line(buffer.slice_ref(line)));
            }
        }
    }

    /// The current element's text: everything buffered since its open tag.
    fn marked_text(&self) -> Bytes {
        Bytes::copy_from_slice(self.text_buffer.get(self.text_mark..).unwrap_or_default())
    }

    fn strip_client(&mut self, count: usize) {
        let len = self.client_buffer.len().saturating_sub(count);
        self.client_buffer.truncate(len);
    }

    fn emit(&self, event: Event) {
        if self.events.send(event).is_err() {
            debug!("event channel closed, dropping event");
        }
    }
}

/// Split on `\n`, `\r` and `\r\n` without keeping the line breaks. A
/// trailing break does not produce an empty final segment.
fn split_lines(data: &[u8]) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut at = 0;
    while at < data.len() {
        match data[at] {
            b'\n' => {
                lines.push(&data[start..at]);
                at += 1;
                start = at;
            }
            b'\r' => {
                lines.push(&data[start..at]);
                at += 1;
                if data.get(at) == Some(&b'\n') {
                    at += 1;
                }
                start = at;
            }
            _ => at += 1,
        }
    }
    if start < data.len() {
        lines.push(&data[start..]);
    }
    lines
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::event::{self, EventReceiver};
    use crate::net::telnet::option;

    use super::super::mpi::Command;
    use super::*;

    fn decoder(format: OutputFormat) -> (Decoder, EventReceiver) {
        let (events, rx) = event::channel();
        (
            Decoder::new(
                format,
                Bytes::from_static(&[command::IAC, command::GA]),
                Bytes::from_static(b"US-ASCII"),
                events,
            ),
            rx,
        )
    }

    fn drain(rx: &mut EventReceiver) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn plain_line() {
        let (mut decoder, mut rx) = decoder(OutputFormat::Normal);
        let out = decoder.advance(b"Hello world\n");
        assert_eq!(out.client, Bytes::from_static(b"Hello world\n"));
        assert!(out.server.is_empty());
        assert!(out.frames.is_empty());
        assert_eq!(
            drain(&mut rx),
            vec![Event::Line(Bytes::from_static(b"Hello world"))]
        );
    }

    #[test]
    fn room_block() {
        let (mut decoder, mut rx) = decoder(OutputFormat::Normal);
        let out = decoder.advance(
            b"<room><name>A Path</name><description>Trees.</description>\
              <exits>north</exits></room>Plain\n",
        );
        assert_eq!(out.client, Bytes::from_static(b"A PathTrees.northPlain\n"));
        assert_eq!(
            drain(&mut rx),
            vec![
                Event::Name(Bytes::from_static(b"A Path")),
                Event::Description(Bytes::from_static(b"Trees.")),
                Event::Exits(Bytes::from_static(b"north")),
                Event::Dynamic(Bytes::from_static(b"A PathTrees.north")),
                Event::Line(Bytes::from_static(b"Plain")),
            ]
        );
        // A complete room block leaves no markup state behind.
        assert_eq!(decoder.xml_mode, XmlMode::None);
        assert!(decoder.text_buffer.is_empty());
        assert!(decoder.tag_buffer.is_empty());
    }

    #[test]
    fn top_level_exits_and_prompt() {
        let (mut decoder, mut rx) = decoder(OutputFormat::Normal);
        let out = decoder.advance(b"<exits>north, east</exits><prompt>hp> </prompt>");
        assert_eq!(out.client, Bytes::from_static(b"north, easthp> "));
        assert_eq!(
            drain(&mut rx),
            vec![
                Event::Exits(Bytes::from_static(b"north, east")),
                Event::Prompt(Bytes::from_static(b"hp> ")),
            ]
        );
    }

    #[test]
    fn gratuitous_text_is_parsed_but_not_shown() {
        let (mut decoder, mut rx) = decoder(OutputFormat::Normal);
        let out =
            decoder.advance(b"<room><gratuitous>hidden</gratuitous>shown</room>");
        assert_eq!(out.client, Bytes::from_static(b"shown"));
        assert_eq!(
            drain(&mut rx),
            vec![Event::Dynamic(Bytes::from_static(b"hiddenshown"))]
        );
    }

    #[test]
    fn gratuitous_text_shows_in_raw() {
        let (mut decoder, _rx) = decoder(OutputFormat::Raw);
        let input = b"<room><gratuitous>hidden</gratuitous>shown</room>";
        let out = decoder.advance(input);
        assert_eq!(out.client, Bytes::copy_from_slice(input));
    }

    #[test]
    fn movement_tag() {
        let (mut decoder, mut rx) = decoder(OutputFormat::Normal);
        let out = decoder.advance(b"<movement dir=north/>");
        assert!(out.client.is_empty());
        assert_eq!(
            drain(&mut rx),
            vec![Event::Movement(Bytes::from_static(b"north"))]
        );
    }

    #[test]
    fn mpi_frame() {
        let (mut decoder, mut rx) = decoder(OutputFormat::Normal);
        let out = decoder.advance(b"\n~$#EE13\nHello, world!");
        assert_eq!(out.client, Bytes::from_static(b"\n"));
        assert_eq!(
            out.frames,
            vec![Frame {
                command: Command::Edit,
                body: Bytes::from_static(b"Hello, world!"),
            }]
        );
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn mpi_frame_consumes_only_declared_length() {
        let (mut decoder, _rx) = decoder(OutputFormat::Normal);
        let out = decoder.advance(b"\n~$#EV5\nHelloX");
        assert_eq!(
            out.frames,
            vec![Frame {
                command: Command::View,
                body: Bytes::from_static(b"Hello"),
            }]
        );
        // The surplus byte is ordinary text again.
        assert_eq!(out.client, Bytes::from_static(b"\nX"));
    }

    #[test]
    fn mpi_zero_length_body() {
        let (mut decoder, _rx) = decoder(OutputFormat::Normal);
        let out = decoder.advance(b"\n~$#EV0\n");
        assert_eq!(
            out.frames,
            vec![Frame {
                command: Command::View,
                body: Bytes::new(),
            }]
        );
        assert!(!decoder.in_mpi);
    }

    #[test]
    fn mpi_invalid_header_aborts() {
        let (mut decoder, mut rx) = decoder(OutputFormat::Normal);
        let out = decoder.advance(b"\n~$#EX5\nhello\n");
        assert!(out.frames.is_empty());
        assert!(!decoder.in_mpi);
        // The stream recovers: bytes after the bad header flow as text.
        assert_eq!(out.client, Bytes::from_static(b"\nhello\n"));
        assert_eq!(
            drain(&mut rx),
            vec![Event::Line(Bytes::from_static(b"hello"))]
        );
    }

    #[test]
    fn mpi_escaped_iac_in_body() {
        let (mut decoder, _rx) = decoder(OutputFormat::Normal);
        let out = decoder.advance(b"\n~$#EE3\nA\xff\xffB");
        assert_eq!(
            out.frames,
            vec![Frame {
                command: Command::Edit,
                body: Bytes::from_static(&[b'A', 0xFF, b'B']),
            }]
        );
        assert_eq!(out.client, Bytes::from_static(b"\n"));
    }

    #[test]
    fn mpi_escape_requires_line_anchor() {
        let (mut decoder, _rx) = decoder(OutputFormat::Normal);
        let out = decoder.advance(b"a~$#Eb\n");
        assert!(out.frames.is_empty());
        assert_eq!(out.client, Bytes::from_static(b"a~$#Eb\n"));
    }

    #[test]
    fn mpi_partial_escape_resets() {
        let (mut decoder, _rx) = decoder(OutputFormat::Normal);
        let out = decoder.advance(b"\n~$x");
        assert!(out.frames.is_empty());
        // The withheld escape prefix does not reach the client.
        assert_eq!(out.client, Bytes::from_static(b"\nx"));
        assert_eq!(decoder.mpi_counter, 0);
    }

    #[test]
    fn negotiation_passes_through() {
        let (mut decoder, mut rx) = decoder(OutputFormat::Normal);
        let out = decoder.advance(&[command::IAC, command::WILL, 0x01]);
        assert_eq!(
            out.client,
            Bytes::from_static(&[command::IAC, command::WILL, 0x01])
        );
        assert!(out.server.is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn suboption_passes_through() {
        let (mut decoder, _rx) = decoder(OutputFormat::Normal);
        let input = [
            command::IAC,
            command::SB,
            option::TTYPE,
            0x01,
            command::IAC,
            command::SE,
        ];
        let out = decoder.advance(&input);
        assert_eq!(out.client, Bytes::copy_from_slice(&input));
        assert!(!decoder.in_suboption);
    }

    #[test]
    fn iac_ga_substitutes_prompt_terminator() {
        let (events, mut rx) = event::channel();
        let mut decoder = Decoder::new(
            OutputFormat::Normal,
            Bytes::from_static(b">"),
            Bytes::from_static(b"US-ASCII"),
            events,
        );
        let out = decoder.advance(b"\xff\xf9");
        assert_eq!(out.client, Bytes::from_static(b">"));
        assert_eq!(drain(&mut rx), vec![Event::IacGa]);
        assert_eq!(decoder.line_buffer.as_ref(), b"\r\n");
    }

    #[test]
    fn iac_ga_default_terminator() {
        let (mut decoder, mut rx) = decoder(OutputFormat::Normal);
        let out = decoder.advance(b"\xff\xf9");
        assert_eq!(out.client, Bytes::from_static(&[command::IAC, command::GA]));
        assert_eq!(drain(&mut rx), vec![Event::IacGa]);
    }

    #[test]
    fn prompt_flushed_as_line_after_ga() {
        let (mut decoder, mut rx) = decoder(OutputFormat::Normal);
        decoder.advance(b"HP:100 ");
        decoder.advance(b"\xff\xf9");
        drain(&mut rx);
        decoder.advance(b"more\n");
        assert_eq!(
            drain(&mut rx),
            vec![
                Event::Line(Bytes::from_static(b"HP:100 ")),
                Event::Line(Bytes::from_static(b"more")),
            ]
        );
    }

    #[test]
    fn escaped_iac_outside_mpi_joins_line() {
        let (mut decoder, mut rx) = decoder(OutputFormat::Normal);
        let out = decoder.advance(b"a\xff\xffb\n");
        // Both bytes of the escape are forwarded; the line records one.
        assert_eq!(out.client, Bytes::from_static(b"a\xff\xffb\n"));
        assert_eq!(
            drain(&mut rx),
            vec![Event::Line(Bytes::from_static(b"a\xffb"))]
        );
    }

    #[test]
    fn welcome_triggers_greeting() {
        let (mut decoder, _rx) = decoder(OutputFormat::Normal);
        let out = decoder.advance(WELCOME_PREFIX);
        // The negotiation itself still reaches the client.
        assert_eq!(out.client, Bytes::copy_from_slice(WELCOME_PREFIX));
        let mut expected = BytesMut::new();
        expected.put_slice(b"~$#EI\n");
        expected.put_slice(b"~$#EX2\n3G\n");
        expected.put_slice(b"~$#EP2\nG\n");
        expected.put_slice(&[command::IAC, command::WILL, option::CHARSET]);
        assert_eq!(out.server, expected.freeze());
        assert!(decoder.saw_initial_output);

        // Only the first window is checked for the welcome prefix.
        let out = decoder.advance(WELCOME_PREFIX);
        assert!(out.server.is_empty());
    }

    #[test]
    fn charset_request_after_do() {
        let (mut decoder, _rx) = decoder(OutputFormat::Normal);
        decoder.advance(WELCOME_PREFIX);

        let out = decoder.advance(&[command::IAC, command::DO, option::CHARSET]);
        // The acknowledgement is consumed, not forwarded.
        assert!(out.client.is_empty());
        let mut expected = BytesMut::new();
        expected.put_slice(&[
            command::IAC,
            command::SB,
            option::CHARSET,
            charset::REQUEST,
        ]);
        expected.put_slice(b";US-ASCII");
        expected.put_slice(&[command::IAC, command::SE]);
        assert_eq!(out.server, expected.freeze());
    }

    #[test]
    fn charset_response_not_forwarded() {
        let (mut decoder, _rx) = decoder(OutputFormat::Normal);
        decoder.advance(WELCOME_PREFIX);
        decoder.advance(&[command::IAC, command::DO, option::CHARSET]);

        let mut input = vec![command::IAC, command::SB, option::CHARSET, charset::ACCEPTED];
        input.extend_from_slice(b"US-ASCII");
        input.extend_from_slice(&[command::IAC, command::SE]);
        let out = decoder.advance(&input);
        assert!(out.client.is_empty());
        assert!(matches!(decoder.charset, CharsetPhase::Idle));
        assert!(!decoder.in_suboption);
    }

    #[test]
    fn entities_decoded_in_normal_mode() {
        let (mut decoder, _rx) = decoder(OutputFormat::Normal);
        let out = decoder.advance(b"&lt;tag&gt;\n");
        assert_eq!(out.client, Bytes::from_static(b"<tag>\n"));
    }

    #[test]
    fn entities_untouched_in_raw_mode() {
        let (mut decoder, _rx) = decoder(OutputFormat::Raw);
        let out = decoder.advance(b"&lt;tag&gt;\n");
        assert_eq!(out.client, Bytes::from_static(b"&lt;tag&gt;\n"));
    }

    #[test]
    fn tintin_tag_markers() {
        let (mut decoder, mut rx) = decoder(OutputFormat::Tintin);
        let out = decoder.advance(b"<prompt>hp&gt; </prompt>");
        assert_eq!(out.client, Bytes::from_static(b"PROMPT:hp> :PROMPT"));
        // The event carries the text before entity decoding.
        assert_eq!(
            drain(&mut rx),
            vec![Event::Prompt(Bytes::from_static(b"hp&gt; "))]
        );
    }

    #[test]
    fn raw_mode_keeps_tags() {
        let (mut decoder, mut rx) = decoder(OutputFormat::Raw);
        let input = b"<room><name>A Path</name></room>";
        let out = decoder.advance(input);
        assert_eq!(out.client, Bytes::copy_from_slice(input));
        // Raw output still produces mapper events.
        assert_eq!(
            drain(&mut rx),
            vec![
                Event::Name(Bytes::from_static(b"A Path")),
                Event::Dynamic(Bytes::from_static(b"A Path")),
            ]
        );
    }

    #[test]
    fn oversized_tag_is_truncated() {
        let (mut decoder, mut rx) = decoder(OutputFormat::Normal);
        let mut input = Vec::from(&b"<movement dir=north"[..]);
        input.extend(std::iter::repeat(b'x').take(200));
        input.extend_from_slice(b"/>after\n");
        let out = decoder.advance(&input);
        // Dispatch still sees the recognizable prefix.
        let events = drain(&mut rx);
        assert!(matches!(events[0], Event::Movement(_)));
        assert_eq!(out.client, Bytes::from_static(b"after\n"));
        assert!(decoder.tag_buffer.is_empty());
    }

    #[test]
    fn byte_at_a_time_matches_whole_window() {
        let input = b"<room><name>A Path</name><description>Trees.</description>\
                      <exits>north</exits></room>Plain\n";

        let (mut whole, mut whole_rx) = decoder(OutputFormat::Normal);
        let mut whole_client = Vec::new();
        whole_client.extend_from_slice(&whole.advance(input).client);

        let (mut split, mut split_rx) = decoder(OutputFormat::Normal);
        let mut split_client = Vec::new();
        for &byte in input.iter() {
            split_client.extend_from_slice(&split.advance(&[byte]).client);
        }

        assert_eq!(whole_client, split_client);
        assert_eq!(drain(&mut whole_rx), drain(&mut split_rx));
    }

    #[test]
    fn blank_lines_are_not_reported() {
        let (mut decoder, mut rx) = decoder(OutputFormat::Normal);
        let out = decoder.advance(b"one\r\n   \r\ntwo\n");
        assert_eq!(out.client, Bytes::from_static(b"one\r\n   \r\ntwo\n"));
        assert_eq!(
            drain(&mut rx),
            vec![
                Event::Line(Bytes::from_static(b"one")),
                Event::Line(Bytes::from_static(b"two")),
            ]
        );
    }

    #[test]
    fn split_lines_variants() {
        assert_eq!(split_lines(b"a\nb"), vec![&b"a"[..], &b"b"[..]]);
        assert_eq!(split_lines(b"a\r\nb\n"), vec![&b"a"[..], &b"b"[..]]);
        assert_eq!(split_lines(b"a\rb"), vec![&b"a"[..], &b"b"[..]]);
        assert_eq!(split_lines(b"\n"), vec![&b""[..]]);
        assert!(split_lines(b"").is_empty());
    }
}
