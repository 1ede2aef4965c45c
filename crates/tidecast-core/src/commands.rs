//! Telemetry command registry.
//!
//! Components expose runtime commands ("harbor/live.status", …) by
//! registering handlers under a namespace derived from their id. The
//! registry is process-wide; a server front-end routes operator input to
//! [`CommandRegistry::run`].

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use thiserror::Error;

pub type CommandHandler = Arc<dyn Fn(&str) -> String + Send + Sync>;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown command `{command}`")]
    Unknown { command: String },
}

struct RegisteredCommand {
    describe: String,
    handler: CommandHandler,
}

/// Registry of named commands, keyed `namespace.name`.
#[derive(Default)]
pub struct CommandRegistry {
    inner: RwLock<HashMap<String, RegisteredCommand>>,
}

impl CommandRegistry {
    /// Register (or replace) a command. Replacement keeps re-registration
    /// idempotent for components that may wake up more than once.
    pub fn register(
        &self,
        namespace: &str,
        name: &str,
        describe: impl Into<String>,
        handler: CommandHandler,
    ) {
        let Ok(mut map) = self.inner.write() else {
            return;
        };
        map.insert(
            format!("{namespace}.{name}"),
            RegisteredCommand {
                describe: describe.into(),
                handler,
            },
        );
    }

    /// Drop every command registered under `namespace`.
    pub fn unregister_namespace(&self, namespace: &str) {
        let Ok(mut map) = self.inner.write() else {
            return;
        };
        let prefix = format!("{namespace}.");
        map.retain(|key, _| !key.starts_with(&prefix));
    }

    /// Run a command line of the form `namespace.name [args]`.
    pub fn run(&self, line: &str) -> Result<String, CommandError> {
        let line = line.trim();
        let (command, args) = match line.split_once(' ') {
            Some((command, args)) => (command, args.trim()),
            None => (line, ""),
        };
        let handler = {
            let Ok(map) = self.inner.read() else {
                return Err(CommandError::Unknown {
                    command: command.to_string(),
                });
            };
            match map.get(command) {
                Some(registered) => Arc::clone(&registered.handler),
                None => {
                    return Err(CommandError::Unknown {
                        command: command.to_string(),
                    });
                },
            }
        };
        Ok(handler(args))
    }

    /// Command names with their one-line descriptions, sorted by name.
    pub fn list(&self) -> Vec<(String, String)> {
        let Ok(map) = self.inner.read() else {
            return Vec::new();
        };
        let mut out: Vec<_> = map
            .iter()
            .map(|(key, registered)| (key.clone(), registered.describe.clone()))
            .collect();
        out.sort();
        out
    }
}

/// Process-wide registry instance.
pub fn registry() -> &'static CommandRegistry {
    static REGISTRY: OnceLock<CommandRegistry> = OnceLock::new();
    REGISTRY.get_or_init(CommandRegistry::default)
}
