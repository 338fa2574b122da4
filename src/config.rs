use crate::services::process_service::ArgumentTemplate;
use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

const DEFAULT_SETTINGS_FILE: &str = "appsettings.json";
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 30_000_000;

/// Centralized application configuration.
/// Combines a JSON settings file, environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub temp_root: PathBuf,
    pub max_upload_bytes: usize,
    pub max_concurrent_conversions: Option<usize>,
    pub conversion: ConversionConfig,
}

/// What to run for each upload. Constant for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct ConversionConfig {
    pub output_extension: String,
    pub command: String,
    pub arguments: ArgumentTemplate,
    pub timeout: Duration,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "HTTP proxy in front of a command-line file converter")]
pub struct Args {
    /// Host to bind to (overrides CONVERT_PROXY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides CONVERT_PROXY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// JSON settings file (overrides CONVERT_PROXY_CONFIG, default ./appsettings.json)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Extension of the converted file, e.g. `.pdf` (overrides OutputExtension)
    #[arg(long)]
    pub output_extension: Option<String>,

    /// Converter executable (overrides Command)
    #[arg(long)]
    pub command: Option<String>,

    /// Argument template with {0} = input path and {1} = output path (overrides Arguments)
    #[arg(long, allow_hyphen_values = true)]
    pub arguments: Option<String>,

    /// Maximum time to wait for the converter (overrides TimeoutInMs)
    #[arg(long)]
    pub timeout_in_ms: Option<u64>,

    /// Largest accepted request body in bytes (overrides MaxUploadBytes)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Cap on converters running at once (overrides MaxConcurrentConversions)
    #[arg(long)]
    pub max_concurrent_conversions: Option<usize>,

    /// Directory under which per-request workspaces are created (overrides TempRoot)
    #[arg(long)]
    pub temp_root: Option<PathBuf>,
}

/// Shape of `appsettings.json`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SettingsFile {
    output_extension: Option<String>,
    command: Option<String>,
    arguments: Option<String>,
    timeout_in_ms: Option<u64>,
    max_upload_bytes: Option<usize>,
    max_concurrent_conversions: Option<usize>,
    temp_root: Option<PathBuf>,
}

impl AppConfig {
    /// Parse CLI args and the real process environment into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        let args = Args::parse();
        Self::resolve(args, |key| env::var(key).ok())
    }

    /// Merge settings file < environment < CLI, then validate.
    ///
    /// `lookup` is injected so the merge can be exercised without touching the
    /// process environment.
    pub fn resolve<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = load_settings_file(args.config.clone().or_else(|| {
            lookup("CONVERT_PROXY_CONFIG").map(PathBuf::from)
        }))?;

        let host = args
            .host
            .or_else(|| lookup("CONVERT_PROXY_HOST"))
            .unwrap_or_else(|| "0.0.0.0".into());
        let port = match args.port {
            Some(port) => port,
            None => env_parse(&lookup, "CONVERT_PROXY_PORT")?.unwrap_or(3000),
        };

        let command = args
            .command
            .or_else(|| lookup("Command"))
            .or(file.command)
            .filter(|c| !c.trim().is_empty())
            .context("`Command` must be configured")?;
        let raw_arguments = args
            .arguments
            .or_else(|| lookup("Arguments"))
            .or(file.arguments)
            .context("`Arguments` must be configured")?;
        let arguments = ArgumentTemplate::parse(&raw_arguments)
            .with_context(|| format!("parsing Arguments template `{}`", raw_arguments))?;
        let output_extension = args
            .output_extension
            .or_else(|| lookup("OutputExtension"))
            .or(file.output_extension)
            .unwrap_or_default();

        let timeout_ms = match args.timeout_in_ms {
            Some(ms) => ms,
            None => env_parse(&lookup, "TimeoutInMs")?
                .or(file.timeout_in_ms)
                .unwrap_or(DEFAULT_TIMEOUT_MS),
        };
        if timeout_ms == 0 {
            bail!("`TimeoutInMs` must be greater than zero");
        }

        let max_upload_bytes = match args.max_upload_bytes {
            Some(bytes) => bytes,
            None => env_parse(&lookup, "MaxUploadBytes")?
                .or(file.max_upload_bytes)
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
        };

        let max_concurrent_conversions = match args.max_concurrent_conversions {
            Some(limit) => Some(limit),
            None => {
                env_parse(&lookup, "MaxConcurrentConversions")?.or(file.max_concurrent_conversions)
            }
        };
        if max_concurrent_conversions == Some(0) {
            bail!("`MaxConcurrentConversions` must be greater than zero when set");
        }

        let temp_root = args
            .temp_root
            .or_else(|| lookup("TempRoot").map(PathBuf::from))
            .or(file.temp_root)
            .unwrap_or_else(env::temp_dir);

        Ok(Self {
            host,
            port,
            temp_root,
            max_upload_bytes,
            max_concurrent_conversions,
            conversion: ConversionConfig {
                output_extension,
                command,
                arguments,
                timeout: Duration::from_millis(timeout_ms),
            },
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read the settings file. An explicitly named file must exist; the default
/// `appsettings.json` is optional.
fn load_settings_file(explicit: Option<PathBuf>) -> Result<SettingsFile> {
    let path = match explicit {
        Some(path) => path,
        None if Path::new(DEFAULT_SETTINGS_FILE).is_file() => PathBuf::from(DEFAULT_SETTINGS_FILE),
        None => return Ok(SettingsFile::default()),
    };

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("reading settings file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing settings file {}", path.display()))
}

fn env_parse<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        None => Ok(None),
    }
}
