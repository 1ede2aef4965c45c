#![deny(clippy::wildcard_imports)]

pub mod decoders;
mod error;
pub mod input;
pub mod mounts;

pub use decoders::{StreamDecoder, StreamSink};
pub use error::HarborError;
pub use input::{HarborInput, HarborInputOptions};
