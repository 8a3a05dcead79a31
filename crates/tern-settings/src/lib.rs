//! # tern-settings
//!
//! Layered configuration for the tern runtime.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`TernSettings::default()`]
//! 2. **User file**: `~/.tern/settings.json`, deep-merged over defaults
//! 3. **Environment variables**: `TERN_*` overrides
//!
//! # Usage
//!
//! ```no_run
//! let settings = tern_settings::load_settings().unwrap();
//! println!("listening on {}:{}", settings.server.host, settings.server.port);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, load_with_env, settings_path, tern_dir,
    validate,
};
pub use types::*;
