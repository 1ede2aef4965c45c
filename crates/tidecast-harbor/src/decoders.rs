//! Stream-decoder registry.
//!
//! A stream decoder turns the bytes of one live connection into PCM pushed
//! through a [`StreamSink`]. Real codec wrappers register themselves by
//! codec name; `pcm16` ships built in for raw relays and tests.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use tidecast_core::Metadata;

use crate::error::HarborError;

/// Where a decoder reads its bytes from and pushes its samples to.
///
/// `read` pulls from the connection (raising [`HarborError::EndOfFile`]
/// once the peer is done), `put` hands decoded PCM to the buffered
/// generator and may block for backpressure.
pub trait StreamSink {
    fn read(&mut self, len: usize) -> Result<Vec<u8>, HarborError>;
    fn put(&mut self, sample_rate: u32, samples: &[f32]) -> Result<(), HarborError>;
    fn insert_metadata(&mut self, metadata: Metadata);
    fn close(&mut self);
}

/// Decoder for one connection; consumed by the feeding thread.
pub trait StreamDecoder: Send {
    /// Run until the stream ends. Returning [`HarborError::EndOfFile`] is
    /// the normal way out.
    fn decode(&mut self, sink: &mut dyn StreamSink) -> Result<(), HarborError>;
}

pub type DecoderFactory = Arc<dyn Fn() -> Box<dyn StreamDecoder> + Send + Sync>;

#[derive(Default)]
pub struct DecoderRegistry {
    inner: RwLock<HashMap<String, DecoderFactory>>,
}

impl DecoderRegistry {
    pub fn register(&self, codec: &str, factory: DecoderFactory) {
        let Ok(mut map) = self.inner.write() else {
            return;
        };
        map.insert(codec.to_string(), factory);
    }

    pub fn get(&self, codec: &str) -> Option<DecoderFactory> {
        let map = self.inner.read().ok()?;
        map.get(codec).cloned()
    }

    pub fn codecs(&self) -> Vec<String> {
        let Ok(map) = self.inner.read() else {
            return Vec::new();
        };
        let mut codecs: Vec<String> = map.keys().cloned().collect();
        codecs.sort();
        codecs
    }
}

/// Process-wide registry, pre-seeded with the built-in decoders.
pub fn registry() -> &'static DecoderRegistry {
    static REGISTRY: OnceLock<DecoderRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let registry = DecoderRegistry::default();
        registry.register("pcm16", Arc::new(|| Box::new(Pcm16Decoder::new(44_100))));
        registry
    })
}

/// Raw signed 16-bit little-endian PCM.
pub struct Pcm16Decoder {
    sample_rate: u32,
    pending: Vec<u8>,
}

impl Pcm16Decoder {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            pending: Vec::new(),
        }
    }
}

impl StreamDecoder for Pcm16Decoder {
    fn decode(&mut self, sink: &mut dyn StreamSink) -> Result<(), HarborError> {
        loop {
            let bytes = sink.read(4096)?;
            self.pending.extend_from_slice(&bytes);
            // keep a trailing odd byte until its other half arrives
            let usable = self.pending.len() & !1;
            if usable == 0 {
                continue;
            }
            let mut samples = Vec::with_capacity(usable / 2);
            for pair in self.pending[..usable].chunks_exact(2) {
                let value = i16::from_le_bytes([pair[0], pair[1]]);
                samples.push(f32::from(value) / 32_768.0);
            }
            self.pending.drain(..usable);
            sink.put(self.sample_rate, &samples)?;
        }
    }
}
