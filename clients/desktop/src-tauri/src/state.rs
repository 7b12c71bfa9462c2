//! Application state management.

use std::path::{Path, PathBuf};
use tracing::{info, warn};

use openvault_vault::{CommandFacade, VaultOptions};

/// Name of the optional settings file in the data directory.
pub const SETTINGS_FILENAME: &str = "settings.json";

/// Global application state.
pub struct AppState {
    /// The single open-vault slot and its commands.
    pub facade: CommandFacade,
    /// Application data directory.
    pub data_dir: PathBuf,
}

impl AppState {
    pub fn new(data_dir: PathBuf) -> Self {
        let options = load_options(&data_dir);
        Self {
            facade: CommandFacade::new(options),
            data_dir,
        }
    }
}

/// Read vault creation options from `settings.json`.
///
/// A missing file means defaults. An unreadable or invalid file is logged
/// and ignored.
pub fn load_options(data_dir: &Path) -> VaultOptions {
    let path = data_dir.join(SETTINGS_FILENAME);
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return VaultOptions::default(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not read settings, using defaults");
            return VaultOptions::default();
        }
    };

    let options = match serde_json::from_str::<VaultOptions>(&text) {
        Ok(options) => options,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Settings are malformed, using defaults");
            return VaultOptions::default();
        }
    };

    match options.validate() {
        Ok(()) => {
            info!(path = %path.display(), "Loaded settings");
            options
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Settings are invalid, using defaults");
            VaultOptions::default()
        }
    }
}
