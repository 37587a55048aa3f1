//! File-backed configuration merged under CLI overrides.
//!
//! Settings come from three places, lowest priority first: built-in defaults,
//! a TOML config file, and command line flags. The merged result is held
//! behind a process-wide lock with scoped read and commit operations so no
//! part of the proxy needs a singleton.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::{env, fmt};

use config as config_crate;
use directories::ProjectDirs;
use serde::Deserialize;
use tokio_util::bytes::Bytes;
use tracing::warn;

use crate::cli;
use crate::error::{ConfigError, Error};
use crate::net::telnet::command;
use crate::CRATE_NAME;

/// A [`Config`] shared by every task of the proxy session.
#[derive(Debug, Clone)]
#[allow(clippy::module_name_repetitions)]
pub struct GlobalConfig(Arc<RwLock<Config>>);

impl GlobalConfig {
    /// Load the config file (if any) and apply CLI overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but is invalid.
    pub fn new(args: &cli::Args) -> crate::Result<Self> {
        let mut config = Config::load(args.config.as_deref())?;
        config.apply_cli(args);
        config.normalize();
        Ok(Self(Arc::new(RwLock::new(config))))
    }

    /// Scoped read access: the lock is held only for the duration of `f`.
    pub fn lookup<T>(&self, f: impl FnOnce(RwLockReadGuard<'_, Config>) -> T, default: T) -> T {
        let Ok(config) = self.0.read() else {
            return default;
        };
        f(config)
    }

    /// Scoped write access.
    pub fn commit(&self, f: impl FnOnce(RwLockWriteGuard<'_, Config>)) {
        if let Ok(config) = self.0.write() {
            f(config);
        }
    }

    /// A point-in-time copy, taken once per session at startup.
    #[must_use]
    pub fn snapshot(&self) -> Config {
        self.lookup(|config| config.clone(), Config::default())
    }
}

impl From<Config> for GlobalConfig {
    fn from(config: Config) -> Self {
        Self(Arc::new(RwLock::new(config)))
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub output_format: OutputFormat,
    pub interface: Interface,

    /// Bytes substituted for IAC-GA at the end of prompts. `None` keeps
    /// IAC-GA itself.
    pub prompt_terminator: Option<String>,

    pub gag_prompts: bool,

    /// Template used by the mapper when reporting rooms. `{name}`, `{desc}`,
    /// `{dynamic}`, `{exits}` and `{prompt}` are substituted.
    pub find_format: String,

    pub local_host: String,
    pub local_port: u16,
    pub remote_host: String,
    pub remote_port: u16,

    pub no_ssl: bool,

    /// Host name the server certificate must identify as.
    pub tls_host: String,

    /// Character set requested during telnet CHARSET negotiation.
    pub charset: String,

    /// Editor and pager used for remote editing. Fall back to `$VISUAL` /
    /// `$EDITOR` / `$PAGER`, then to `nano` / `less`.
    pub editor: Option<String>,
    pub pager: Option<String>,

    /// Client socket read timeout in seconds. Clamped to 1..=30.
    pub client_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_format: OutputFormat::Normal,
            interface: Interface::Text,
            prompt_terminator: None,
            gag_prompts: false,
            find_format: "{name} | {exits}".into(),
            local_host: "127.0.0.1".into(),
            local_port: 4000,
            remote_host: "mume.org".into(),
            remote_port: 4242,
            no_ssl: false,
            tls_host: "mume.org".into(),
            charset: "US-ASCII".into(),
            editor: None,
            pager: None,
            client_timeout_secs: 1,
        }
    }
}

impl Config {
    const TIMEOUT_RANGE: std::ops::RangeInclusive<u64> = 1..=30;

    fn load(path: Option<&Path>) -> Result<Self, Error> {
        let file = match path {
            Some(path) => PathBuf::from(path),
            None => config_file(),
        };

        let loaded = config_crate::Config::builder()
            .add_source(config_crate::File::from(file).required(false))
            .add_source(config_crate::Environment::with_prefix(
                &CRATE_NAME.to_uppercase(),
            ))
            .build()
            .map_err(ConfigError::from)?;

        Ok(loaded
            .try_deserialize::<Config>()
            .map_err(ConfigError::from)?)
    }

    fn apply_cli(&mut self, args: &cli::Args) {
        if let Some(host) = &args.local_host {
            self.local_host.clone_from(host);
        }
        if let Some(port) = args.local_port {
            self.local_port = port;
        }
        if let Some(host) = &args.remote_host {
            self.remote_host.clone_from(host);
        }
        if let Some(port) = args.remote_port {
            self.remote_port = port;
        }
        if let Some(format) = args.format {
            self.output_format = format;
        }
        if let Some(interface) = args.interface {
            self.interface = interface;
        }
        if let Some(terminator) = &args.prompt_terminator {
            self.prompt_terminator = Some(terminator.clone());
        }
        if let Some(template) = &args.find_format {
            self.find_format.clone_from(template);
        }
        if args.gag_prompts {
            self.gag_prompts = true;
        }
        if args.no_ssl {
            self.no_ssl = true;
        }
    }

    /// Clamp out-of-range values rather than refusing to start.
    fn normalize(&mut self) {
        if !Self::TIMEOUT_RANGE.contains(&self.client_timeout_secs) {
            let clamped = self
                .client_timeout_secs
                .clamp(*Self::TIMEOUT_RANGE.start(), *Self::TIMEOUT_RANGE.end());
            warn!(
                configured = self.client_timeout_secs,
                clamped, "client_timeout_secs out of range"
            );
            self.client_timeout_secs = clamped;
        }

        if self.charset.is_empty() {
            warn!("empty charset, using US-ASCII");
            self.charset = "US-ASCII".into();
        }

        if self.interface == Interface::Gui {
            // The map view is an optional component that this build does not
            // carry.
            warn!("no GUI available, falling back to the text interface");
            self.interface = Interface::Text;
        }
    }

    /// The byte sequence written to the client in place of IAC-GA.
    #[must_use]
    pub fn prompt_terminator(&self) -> Bytes {
        match &self.prompt_terminator {
            Some(terminator) if !terminator.is_empty() => {
                Bytes::copy_from_slice(terminator.as_bytes())
            }
            _ => Bytes::from_static(&[command::IAC, command::GA]),
        }
    }

    #[must_use]
    pub fn editor(&self) -> String {
        self.editor
            .clone()
            .or_else(|| env::var("VISUAL").ok())
            .or_else(|| env::var("EDITOR").ok())
            .unwrap_or_else(|| "nano".into())
    }

    #[must_use]
    pub fn pager(&self) -> String {
        self.pager
            .clone()
            .or_else(|| env::var("PAGER").ok())
            .unwrap_or_else(|| "less".into())
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Forward every received byte unchanged.
    Raw,

    /// Strip markup, decode entities.
    #[default]
    Normal,

    /// Strip markup, decode entities, insert TinTin++ friendly tag markers.
    Tintin,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputFormat::Raw => "raw",
            OutputFormat::Normal => "normal",
            OutputFormat::Tintin => "tintin",
        })
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Interface {
    #[default]
    Text,
    Gui,
}

#[must_use]
#[allow(clippy::module_name_repetitions)]
pub fn config_file() -> PathBuf {
    config_dir().join(format!("{CRATE_NAME}.toml"))
}

#[must_use]
#[allow(clippy::module_name_repetitions)]
pub fn config_dir() -> &'static Path {
    static CONFIG_DIR: OnceLock<PathBuf> = OnceLock::new();
    lazy_overridable_dir(
        &format!("{}_CONFIG", CRATE_NAME.to_uppercase()),
        DirType::Config,
        &CONFIG_DIR,
    )
}

#[must_use]
pub fn data_dir() -> &'static Path {
    static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();
    lazy_overridable_dir(
        &format!("{}_DATA", CRATE_NAME.to_uppercase()),
        DirType::Data,
        &DATA_DIR,
    )
}

fn project_directory() -> Option<&'static ProjectDirs> {
    static PROJECT_DIR: OnceLock<Option<ProjectDirs>> = OnceLock::new();
    PROJECT_DIR
        .get_or_init(|| ProjectDirs::from("net.binaryparadox", CRATE_NAME, CRATE_NAME))
        .as_ref()
}

fn lazy_overridable_dir(
    env_var: &str,
    r#type: DirType,
    lock: &'static OnceLock<PathBuf>,
) -> &'static Path {
    lock.get_or_init(|| {
        match env::var(env_var).ok() {
            // User env var specified path is the first priority.
            Some(custom_path) => PathBuf::from(custom_path),
            None => match (project_directory(), r#type) {
                // Otherwise fall back to ProjectDirs.
                (Some(proj_dirs), DirType::Data) => proj_dirs.data_local_dir().into(),
                (Some(proj_dirs), DirType::Config) => proj_dirs.config_local_dir().into(),
                // And as a last resort, pwd and a subdir.
                (None, DirType::Data) => PathBuf::from(".").join(".data"),
                (None, DirType::Config) => PathBuf::from(".").join(".config"),
            },
        }
    })
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum DirType {
    Data,
    Config,
}
