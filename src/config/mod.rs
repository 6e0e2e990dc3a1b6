//! Layered configuration: defaults, then an optional `config/default.*`
//! file, then `FORUMLIVE_*` environment variables (`__` between sections).

mod settings;

use config::{Config, Environment, File};

pub use settings::{
    LogSettings, PartialSettings, PresenceSettings, ServerSettings, Settings, SocketSettings,
};

use crate::utils::Result;

/// Loads the configuration from `config/default` and the environment.
pub fn load_config() -> Result<Settings> {
    load_config_from("config/default")
}

/// Same as [`load_config`] with an explicit file stem (extension is probed).
pub fn load_config_from(file_stem: &str) -> Result<Settings> {
    let builder = Config::builder()
        .add_source(File::with_name(file_stem).required(false))
        .add_source(
            Environment::with_prefix("FORUMLIVE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge_with(Settings::default()))
}
