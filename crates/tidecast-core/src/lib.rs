#![deny(clippy::wildcard_imports)]

pub mod commands;
pub mod frame;
pub mod generator;
pub mod settings;

pub use frame::{Frame, Metadata};
pub use generator::Generator;
pub use settings::Settings;
