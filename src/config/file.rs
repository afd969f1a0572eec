use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::default_config_file;
use crate::error::{ConfigError, Error, ErrorKind};

/// The operator-editable configuration file.
///
/// Recognises `key=value` lines (with `#` comments), per the grammar documented
/// for the `config` crate's `Ini` format. Any key the file omits falls back to
/// its built-in default -- an empty or missing file is a perfectly valid
/// configuration, not an error.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the legacy Kermit helper. Ignored: this client drives its own
    /// embedded Kermit engine, but the key is accepted for compatibility with
    /// existing config files.
    pub kermit: Option<PathBuf>,

    /// Path to the local ZMODEM/YMODEM/XMODEM sender binary.
    pub send_zmodem: Option<PathBuf>,

    /// Path to the local ZMODEM/YMODEM/XMODEM receiver binary.
    pub receive_zmodem: Option<PathBuf>,

    /// Enable the hex+ASCII session log.
    pub log: bool,

    /// Path for the session log, when `log` is enabled.
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from `path`, or the default config file location if
    /// `path` is `None`. A missing file is not an error; its absence just means
    /// every key takes its default.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but isn't valid `key=value` content,
    /// or if a directory required by a configured path can't be created.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let path = path.map_or_else(default_config_file, Path::to_path_buf);

        if !path.exists() {
            debug!(path = %path.display(), "no configuration file found, using defaults");
        }

        let builder = config::Config::builder().add_source(
            config::File::from(path.as_path())
                .format(config::FileFormat::Ini)
                .required(false),
        );

        let cfg: Self = builder
            .build()
            .map_err(|e| ErrorKind::Config(ConfigError::General(e)))?
            .try_deserialize()
            .map_err(|e| ErrorKind::Config(ConfigError::General(e)))?;

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.log {
            let Some(log_file) = &self.log_file else {
                warn!("LOG=true but no LOG_FILE configured; session log is disabled");
                return Ok(());
            };
            if let Some(parent) = log_file.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|e| {
                    ErrorKind::Config(ConfigError::CreateDir(parent.to_path_buf(), e))
                })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;
    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn defaults_with_no_file() {
        let cfg = Config::load(Some(Path::new("/nonexistent/otelnet.conf"))).unwrap();
        assert_eq!(cfg.kermit, None);
        assert!(!cfg.log);
    }

    #[test]
    fn parses_key_value_with_comments() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "# a comment\nSEND_ZMODEM=/usr/bin/sz\nRECEIVE_ZMODEM=/usr/bin/rz\nLOG=true\nLOG_FILE=/tmp/otelnet.log\n"
        )
        .unwrap();

        let cfg = Config::load(Some(file.path())).unwrap();
        assert_eq!(cfg.send_zmodem, Some(PathBuf::from("/usr/bin/sz")));
        assert_eq!(cfg.receive_zmodem, Some(PathBuf::from("/usr/bin/rz")));
        assert!(cfg.log);
        assert_eq!(cfg.log_file, Some(PathBuf::from("/tmp/otelnet.log")));
    }
}
