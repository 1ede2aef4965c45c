//! Harbor input: a socket-fed, buffer-bounded source.
//!
//! One input owns one mountpoint. When the server hands it an accepted
//! connection, `relay` spawns a feeding thread that runs the negotiated
//! decoder against the socket; decoded samples land in a bounded generator
//! that the clock-driven side drains one frame at a time. A slow consumer
//! first stalls the feeder briefly, then costs the oldest samples, never
//! the connection.

use std::fs::File;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};

use tidecast_core::commands;
use tidecast_core::{Frame, Generator, Metadata};
use tidecast_engine::clock_var::ClockVar;
use tidecast_engine::source::{Source, SourceType};

use crate::decoders::{self, DecoderFactory, StreamDecoder, StreamSink};
use crate::error::HarborError;

pub type AuthCheck = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;
pub type ConnectHook = Arc<dyn Fn(&Metadata) + Send + Sync>;
pub type DisconnectHook = Arc<dyn Fn() + Send + Sync>;

/// Options for one mountpoint's input source.
#[derive(Clone)]
pub struct HarborInputOptions {
    pub mount: String,
    /// Seconds of audio the generator may buffer.
    pub max_buffer_secs: f64,
    pub sample_rate: u32,
    /// Mirror every byte read from the socket into this file.
    pub dump_path: Option<PathBuf>,
    /// Required source username, if any.
    pub user: Option<String>,
    pub auth: Option<AuthCheck>,
    pub on_connect: Option<ConnectHook>,
    pub on_disconnect: Option<DisconnectHook>,
}

impl HarborInputOptions {
    pub fn new(mount: impl Into<String>) -> Self {
        Self {
            mount: mount.into(),
            max_buffer_secs: 10.0,
            sample_rate: 44_100,
            dump_path: None,
            user: None,
            auth: None,
            on_connect: None,
            on_disconnect: None,
        }
    }
}

/// Per-connection state, all behind one mutex.
struct ConnState {
    relaying: bool,
    stype: Option<String>,
    decoder: Option<DecoderFactory>,
    dump: Option<File>,
    /// Clone of the live socket, kept so `kick` can shut it down.
    socket: Option<TcpStream>,
}

pub struct HarborInput {
    id: String,
    mount: String,
    clock_var: ClockVar,
    max_len: usize,
    max_buffer_secs: f64,
    dump_path: Option<PathBuf>,
    user: Option<String>,
    auth: Option<AuthCheck>,
    on_connect: Option<ConnectHook>,
    on_disconnect: Option<DisconnectHook>,
    /// Fast-path mirror of `ConnState::relaying` for `put`.
    relaying: AtomicBool,
    conn: Mutex<ConnState>,
    generator: Mutex<Generator>,
    commands_registered: AtomicBool,
    self_ref: Weak<HarborInput>,
}

impl HarborInput {
    pub fn new(options: HarborInputOptions) -> Arc<Self> {
        let mount = options.mount.trim_start_matches('/').to_string();
        let max_len = (options.sample_rate as f64 * options.max_buffer_secs).max(1.0) as usize;
        Arc::new_cyclic(|self_ref| Self {
            id: format!("harbor/{mount}"),
            mount,
            clock_var: ClockVar::unknown(),
            max_len,
            max_buffer_secs: options.max_buffer_secs,
            dump_path: options.dump_path,
            user: options.user,
            auth: options.auth,
            on_connect: options.on_connect,
            on_disconnect: options.on_disconnect,
            relaying: AtomicBool::new(false),
            conn: Mutex::new(ConnState {
                relaying: false,
                stype: None,
                decoder: None,
                dump: None,
                socket: None,
            }),
            generator: Mutex::new(Generator::new(max_len)),
            commands_registered: AtomicBool::new(false),
            self_ref: self_ref.clone(),
        })
    }

    pub fn mount(&self) -> &str {
        &self.mount
    }

    pub fn is_relaying(&self) -> bool {
        self.relaying.load(Ordering::SeqCst)
    }

    /// Negotiated codec name, if a client connected with one.
    pub fn stype(&self) -> Option<String> {
        self.conn().stype.clone()
    }

    fn conn(&self) -> MutexGuard<'_, ConnState> {
        self.conn.lock().expect("harbor connection state poisoned")
    }

    fn generator(&self) -> MutexGuard<'_, Generator> {
        self.generator.lock().expect("harbor generator poisoned")
    }

    /// Check source credentials against the configured login.
    pub fn authenticate(&self, user: &str, password: &str) -> Result<(), HarborError> {
        if let Some(expected) = &self.user {
            if user != expected {
                return Err(HarborError::Auth);
            }
        }
        match &self.auth {
            Some(check) if !check(user, password) => Err(HarborError::Auth),
            _ => Ok(()),
        }
    }

    /// Register the telemetry commands for this input. Idempotent.
    pub fn wake_up(&self) {
        if self.commands_registered.swap(true, Ordering::SeqCst) {
            return;
        }
        let registry = commands::registry();
        let weak = self.self_ref.clone();
        registry.register(
            &self.id,
            "status",
            "report whether a source client is connected",
            Arc::new(move |_| match weak.upgrade() {
                Some(input) if input.is_relaying() => "source client connected".to_string(),
                Some(_) => "no source client connected".to_string(),
                None => "source is gone".to_string(),
            }),
        );
        for name in ["stop", "kick"] {
            let weak = self.self_ref.clone();
            registry.register(
                &self.id,
                name,
                "disconnect the current source client",
                Arc::new(move |_| match weak.upgrade() {
                    Some(input) => {
                        input.kick_client();
                        "Done".to_string()
                    },
                    None => "source is gone".to_string(),
                }),
            );
        }
    }

    /// Pick the decoder for `codec` from the registry.
    pub fn register_decoder(&self, codec: &str) -> Result<(), HarborError> {
        let factory = decoders::registry()
            .get(codec)
            .ok_or_else(|| HarborError::UnknownCodec {
                codec: codec.to_string(),
            })?;
        let mut conn = self.conn();
        conn.decoder = Some(factory);
        conn.stype = Some(codec.to_string());
        Ok(())
    }

    /// Take over an accepted connection and start feeding from it. The
    /// transport passes along whatever credentials the client offered;
    /// an input with a configured login refuses anonymous clients.
    pub fn relay(
        &self,
        socket: TcpStream,
        credentials: Option<(&str, &str)>,
    ) -> Result<(), HarborError> {
        match credentials {
            Some((user, password)) => self.authenticate(user, password)?,
            None if self.user.is_some() || self.auth.is_some() => {
                warn!(source = %self.id, "rejecting client without credentials");
                return Err(HarborError::Auth);
            },
            None => {},
        }
        let decoder = {
            let mut conn = self.conn();
            if conn.relaying {
                return Err(HarborError::AlreadyConnected);
            }
            let factory = conn.decoder.clone().ok_or(HarborError::NoDecoder)?;
            conn.relaying = true;
            self.relaying.store(true, Ordering::SeqCst);
            if let Some(path) = &self.dump_path {
                match File::create(path) {
                    Ok(file) => conn.dump = Some(file),
                    Err(error) => {
                        warn!(source = %self.id, %error, "cannot open dump file");
                    },
                }
            }
            conn.socket = socket.try_clone().ok();
            factory
        };

        info!(source = %self.id, "source client connected");
        if let Some(hook) = &self.on_connect {
            hook(&Metadata::new());
        }

        let input = self.self_ref.upgrade().expect("relay on a dropped input");
        let spawned = thread::Builder::new()
            .name(format!("harbor-{}", self.mount))
            .spawn(move || input.feed(socket, decoder()));
        if let Err(error) = spawned {
            self.disconnect();
            return Err(HarborError::Io(error));
        }
        Ok(())
    }

    /// Feeding loop, one thread per connection.
    fn feed(self: Arc<Self>, socket: TcpStream, mut decoder: Box<dyn StreamDecoder>) {
        let result = {
            let mut sink = FeedSink {
                input: &self,
                socket: &socket,
            };
            decoder.decode(&mut sink)
        };
        match result {
            Ok(()) | Err(HarborError::EndOfFile) => {
                info!(source = %self.id, "end of stream");
            },
            Err(HarborError::RelayingStopped) => {
                info!(source = %self.id, "relaying stopped while feeding");
            },
            Err(error) => {
                error!(source = %self.id, %error, "feeding stopped");
            },
        }
        self.disconnect();
        let _ = socket.shutdown(Shutdown::Both);
    }

    /// Tear down the current connection state. Idempotent.
    pub fn disconnect(&self) {
        {
            let mut conn = self.conn();
            if !conn.relaying {
                return;
            }
            conn.relaying = false;
            self.relaying.store(false, Ordering::SeqCst);
            conn.dump.take();
            conn.socket.take();
        }
        info!(source = %self.id, "source client disconnected");
        if let Some(hook) = &self.on_disconnect {
            hook();
        }
    }

    /// Shut the live socket down; the feeding thread notices and runs the
    /// normal disconnect path.
    pub fn kick_client(&self) {
        let conn = self.conn();
        if let Some(socket) = &conn.socket {
            let _ = socket.shutdown(Shutdown::Both);
        }
    }

    /// Unregister telemetry and drop the current client, for mount removal.
    pub fn retire(&self) {
        self.kick_client();
        commands::registry().unregister_namespace(&self.id);
    }

    fn mirror_to_dump(&self, bytes: &[u8]) {
        let mut conn = self.conn();
        if let Some(dump) = conn.dump.as_mut() {
            if let Err(error) = dump.write_all(bytes) {
                warn!(source = %self.id, %error, "dump write failed, closing dump file");
                conn.dump = None;
            }
        }
    }

    /// Buffer decoded samples, applying the bounded-buffer policy: when the
    /// generator is full, stall once to let the consumer catch up, then
    /// drop the oldest samples rather than the connection.
    pub fn put(&self, _sample_rate: u32, samples: &[f32]) -> Result<(), HarborError> {
        if !self.is_relaying() {
            return Err(HarborError::RelayingStopped);
        }
        let mut generator = self.generator();
        if generator.len() >= self.max_len {
            // Released around the sleep on purpose: the consumer needs the
            // lock to make progress.
            drop(generator);
            thread::sleep(Duration::from_secs_f64(self.max_buffer_secs / 3.0));
            generator = self.generator();
        }
        generator.put(samples);
        let over = generator.len().saturating_sub(self.max_len);
        if over > 0 {
            generator.drop_oldest(over);
        }
        Ok(())
    }

    /// Log and buffer stream metadata.
    pub fn insert_metadata(&self, metadata: Metadata) {
        let artist = metadata.get("artist").map(String::as_str).unwrap_or("?");
        let title = metadata.get("title").map(String::as_str).unwrap_or("?");
        info!(source = %self.id, artist, title, "new metadata");
        self.generator().add_metadata_at(0, metadata);
    }

    /// Samples currently buffered.
    pub fn buffered(&self) -> usize {
        self.generator().len()
    }

    /// Whether the clock-driven side has something to pull.
    pub fn is_ready(&self) -> bool {
        !self.generator().is_empty()
    }

    /// Drain buffered samples into `frame`. Returns how many moved.
    pub fn get_frame(&self, frame: &mut Frame) -> usize {
        self.generator().fill_frame(frame)
    }
}

impl Source for HarborInput {
    fn id(&self) -> &str {
        &self.id
    }

    fn clock_var(&self) -> &ClockVar {
        &self.clock_var
    }

    fn source_type(&self) -> SourceType {
        SourceType::Fallible
    }
}

/// The sink handed to the decoder for one connection.
struct FeedSink<'a> {
    input: &'a HarborInput,
    socket: &'a TcpStream,
}

impl StreamSink for FeedSink<'_> {
    fn read(&mut self, len: usize) -> Result<Vec<u8>, HarborError> {
        let mut buf = vec![0u8; len.max(1)];
        let mut reader = self.socket;
        let n = reader.read(&mut buf)?;
        if n == 0 {
            return Err(HarborError::EndOfFile);
        }
        buf.truncate(n);
        self.input.mirror_to_dump(&buf);
        Ok(buf)
    }

    fn put(&mut self, sample_rate: u32, samples: &[f32]) -> Result<(), HarborError> {
        self.input.put(sample_rate, samples)
    }

    fn insert_metadata(&mut self, metadata: Metadata) {
        self.input.insert_metadata(metadata);
    }

    fn close(&mut self) {
        let _ = self.socket.shutdown(Shutdown::Both);
    }
}
