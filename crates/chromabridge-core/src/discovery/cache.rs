//! Persisted port cache
//!
//! A single positive integer stored as a decimal string in the data
//! directory. Written only on successful discovery; an invalid or stale
//! value is discarded on next use.

use std::path::PathBuf;

use tracing::{debug, warn};

use crate::Result;

pub struct PortCache {
    path: PathBuf,
}

impl PortCache {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Read the cached port, clearing the entry if its content is not a
    /// positive integer.
    pub fn load(&self) -> Option<u16> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        match parse_port(&content) {
            Some(port) => Some(port),
            None => {
                debug!(path = %self.path.display(), "discarding malformed port cache entry");
                self.clear();
                None
            }
        }
    }

    /// Persist a discovered port
    pub fn store(&self, port: u16) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, port.to_string())?;
        Ok(())
    }

    /// Remove the cache entry; missing files are not an error
    pub fn clear(&self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), "failed to clear port cache: {e}");
            }
        }
    }
}

/// Parse a plain-text port body, accepting only positive integers
pub fn parse_port(text: &str) -> Option<u16> {
    text.trim().parse::<u16>().ok().filter(|port| *port > 0)
}
