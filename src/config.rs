//! config.rs
//!
//! Run configuration. Precedence: CLI flag > environment > config file > default.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;

use crate::llm::client::{Provider, ProviderConfig};
use crate::testgen::parse::FenceMode;

const DEFAULT_MAIN_SRC_DIR: &str = "src/main";
const DEFAULT_TEST_ROOT: &str = "src/test/java";
const DEFAULT_EXTENSION: &str = "java";
const DEFAULT_ENTRY_POINT: &str = "Application.java";
const DEFAULT_BUILD_TOOL: &str = "gradlew";
const DEFAULT_BUILD_TIMEOUT_SECS: u64 = 120;
const DEFAULT_REQUEST_DELAY_MS: u64 = 1000;

#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "testsmith",
    version,
    about = "Generate tests for source classes with an LLM, build them, and repair compile failures once."
)]
pub struct Args {
    #[arg(long, help = "Project root (or set PROJECT_DIR)")]
    pub project_dir: Option<PathBuf>,

    #[arg(long, help = "Generation service key (or set API_KEY / GEMINI_API_KEY)")]
    pub api_key: Option<String>,

    #[arg(long = "class", help = "Only process the source unit with this name")]
    pub class: Option<String>,

    #[arg(long, value_enum, help = "Generation service provider [default: gemini]")]
    pub provider: Option<Provider>,

    #[arg(long, help = "Model name (provider default if omitted)")]
    pub model: Option<String>,

    #[arg(long, help = "Override the provider endpoint")]
    pub base_url: Option<String>,

    #[arg(long, help = "Kill the build tool after this many seconds [default: 120]")]
    pub build_timeout_secs: Option<u64>,

    #[arg(long, help = "Minimum spacing between generation calls [default: 1000]")]
    pub request_delay_ms: Option<u64>,

    #[arg(long, help = "Stop starting new units after this many seconds")]
    pub deadline_secs: Option<u64>,

    #[arg(long, value_enum, help = "Artifacts taken from one response: first | all [default: first]")]
    pub fence_mode: Option<FenceMode>,

    #[arg(long, help = "Write the JSON run report to this file")]
    pub report: Option<PathBuf>,

    #[arg(long, help = "Config file (default: <config dir>/testsmith/config.toml)")]
    pub config: Option<PathBuf>,

    #[arg(long, default_value_t = false, help = "Do not echo log lines to stderr")]
    pub quiet: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub project_dir: Option<PathBuf>,
    pub api_key: Option<String>,
    pub provider: Option<Provider>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub main_src_dir: Option<PathBuf>,
    pub test_root: Option<PathBuf>,
    pub source_extension: Option<String>,
    pub artifact_extension: Option<String>,
    pub exclude: Option<Vec<String>>,
    pub build_tool: Option<String>,
    pub build_timeout_secs: Option<u64>,
    pub request_delay_ms: Option<u64>,
    pub deadline_secs: Option<u64>,
    pub fence_mode: Option<FenceMode>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no project directory given (use --project-dir or PROJECT_DIR)")]
    MissingProjectRoot,

    #[error("project directory not found: {0}")]
    ProjectRootNotFound(PathBuf),

    #[error("no API key given (use --api-key or API_KEY)")]
    MissingCredential,

    #[error("invalid config file {path}: {reason}")]
    InvalidConfigFile { path: PathBuf, reason: String },

    #[error("invalid exclude pattern `{0}`")]
    InvalidPattern(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub project_root: PathBuf,
    pub llm: ProviderConfig,
    pub class_filter: Option<String>,
    pub main_src_dir: PathBuf,
    pub test_root: PathBuf,
    pub source_extension: String,
    pub artifact_extension: String,
    pub exclude: Vec<glob::Pattern>,
    pub build_tool: String,
    pub build_timeout: Duration,
    pub request_delay: Duration,
    pub deadline: Option<Duration>,
    pub fence_mode: FenceMode,
    pub report: Option<PathBuf>,
    pub echo: bool,
}

impl Config {
    /// Resolve against the real environment and config file.
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let path = args.config.clone().unwrap_or_else(config_path);
        let file = load_file(&path)?;
        Self::resolve(args, |k| env::var(k).ok(), file)
    }

    pub fn resolve(
        args: &Args,
        env: impl Fn(&str) -> Option<String>,
        file: FileConfig,
    ) -> Result<Self, ConfigError> {
        let project_dir = args
            .project_dir
            .clone()
            .or_else(|| env("PROJECT_DIR").filter(|s| !s.trim().is_empty()).map(PathBuf::from))
            .or(file.project_dir)
            .ok_or(ConfigError::MissingProjectRoot)?;

        let project_root = fs::canonicalize(&project_dir)
            .ok()
            .filter(|p| p.is_dir())
            .ok_or_else(|| ConfigError::ProjectRootNotFound(project_dir.clone()))?;

        let api_key = args
            .api_key
            .clone()
            .or_else(|| env("API_KEY").filter(|s| !s.trim().is_empty()))
            .or_else(|| env("GEMINI_API_KEY").filter(|s| !s.trim().is_empty()))
            .or(file.api_key)
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::MissingCredential)?;

        let provider = args.provider.or(file.provider).unwrap_or(Provider::Gemini);
        let model = args
            .model
            .clone()
            .or(file.model)
            .unwrap_or_else(|| provider.default_model().to_string());

        let exclude = file
            .exclude
            .unwrap_or_else(|| vec![DEFAULT_ENTRY_POINT.to_string()])
            .into_iter()
            .map(|p| glob::Pattern::new(&p).map_err(|_| ConfigError::InvalidPattern(p)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Config {
            project_root,
            llm: ProviderConfig {
                provider,
                model,
                api_key,
                base_url: args.base_url.clone().or(file.base_url),
            },
            class_filter: args
                .class
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            main_src_dir: file.main_src_dir.unwrap_or_else(|| DEFAULT_MAIN_SRC_DIR.into()),
            test_root: file.test_root.unwrap_or_else(|| DEFAULT_TEST_ROOT.into()),
            source_extension: file
                .source_extension
                .unwrap_or_else(|| DEFAULT_EXTENSION.into()),
            artifact_extension: file
                .artifact_extension
                .unwrap_or_else(|| DEFAULT_EXTENSION.into()),
            exclude,
            build_tool: file.build_tool.unwrap_or_else(|| DEFAULT_BUILD_TOOL.into()),
            build_timeout: Duration::from_secs(
                args.build_timeout_secs
                    .or(file.build_timeout_secs)
                    .unwrap_or(DEFAULT_BUILD_TIMEOUT_SECS),
            ),
            request_delay: Duration::from_millis(
                args.request_delay_ms
                    .or(file.request_delay_ms)
                    .unwrap_or(DEFAULT_REQUEST_DELAY_MS),
            ),
            deadline: args
                .deadline_secs
                .or(file.deadline_secs)
                .map(Duration::from_secs),
            fence_mode: args.fence_mode.or(file.fence_mode).unwrap_or_default(),
            report: args.report.clone(),
            echo: !args.quiet,
        })
    }

    pub fn source_root(&self) -> PathBuf {
        self.project_root.join(&self.main_src_dir)
    }
}

pub fn config_path() -> PathBuf {
    let mut dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    dir.push("testsmith");
    dir.push("config.toml");
    dir
}

/// A missing file is an empty config; an unreadable or invalid one is fatal.
pub fn load_file(path: &Path) -> Result<FileConfig, ConfigError> {
    if !path.exists() {
        return Ok(FileConfig::default());
    }

    let invalid = |reason: String| ConfigError::InvalidConfigFile {
        path: path.to_path_buf(),
        reason,
    };

    let raw = fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
    toml::from_str(&raw).map_err(|e| invalid(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn missing_project_root_is_fatal() {
        let err = Config::resolve(&Args::default(), env_of(&[("API_KEY", "k")]), FileConfig::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingProjectRoot));
    }

    #[test]
    fn nonexistent_project_root_is_fatal() {
        let args = Args {
            project_dir: Some("/definitely/not/here".into()),
            ..Args::default()
        };
        let err = Config::resolve(&args, env_of(&[("API_KEY", "k")]), FileConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::ProjectRootNotFound(_)));
    }

    #[test]
    fn blank_credential_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let args = Args {
            project_dir: Some(dir.path().into()),
            api_key: Some("   ".into()),
            ..Args::default()
        };
        let err = Config::resolve(&args, env_of(&[]), FileConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredential));
    }

    #[test]
    fn cli_beats_env_beats_file() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().to_string_lossy().into_owned();

        let file = FileConfig {
            api_key: Some("from-file".into()),
            request_delay_ms: Some(5),
            build_timeout_secs: Some(7),
            ..FileConfig::default()
        };
        let args = Args {
            build_timeout_secs: Some(9),
            ..Args::default()
        };

        let cfg = Config::resolve(
            &args,
            env_of(&[("PROJECT_DIR", project.as_str()), ("API_KEY", "from-env")]),
            file,
        )
        .unwrap();

        assert_eq!(cfg.llm.api_key, "from-env");
        assert_eq!(cfg.request_delay, Duration::from_millis(5));
        assert_eq!(cfg.build_timeout, Duration::from_secs(9));
        assert_eq!(cfg.llm.provider, Provider::Gemini);
        assert_eq!(cfg.llm.model, "gemini-1.5-flash");
        assert_eq!(cfg.fence_mode, FenceMode::First);
        assert!(cfg.exclude[0].matches("Application.java"));
    }

    #[test]
    fn blank_env_key_falls_through_to_the_next_source() {
        let dir = tempfile::tempdir().unwrap();
        let args = Args {
            project_dir: Some(dir.path().into()),
            ..Args::default()
        };

        let cfg = Config::resolve(
            &args,
            env_of(&[("API_KEY", ""), ("GEMINI_API_KEY", "real")]),
            FileConfig::default(),
        )
        .unwrap();
        assert_eq!(cfg.llm.api_key, "real");

        let file = FileConfig {
            api_key: Some("from-file".into()),
            ..FileConfig::default()
        };
        let cfg = Config::resolve(&args, env_of(&[("API_KEY", "  "), ("GEMINI_API_KEY", "")]), file).unwrap();
        assert_eq!(cfg.llm.api_key, "from-file");
    }

    #[test]
    fn empty_class_filter_means_all() {
        let dir = tempfile::tempdir().unwrap();
        let args = Args {
            project_dir: Some(dir.path().into()),
            api_key: Some("k".into()),
            class: Some("  ".into()),
            ..Args::default()
        };
        let cfg = Config::resolve(&args, env_of(&[]), FileConfig::default()).unwrap();
        assert_eq!(cfg.class_filter, None);
    }

    #[test]
    fn config_file_parses_and_rejects_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        fs::write(&path, "provider = \"openai\"\nfence_mode = \"all\"\nexclude = [\"*Main.java\"]\n").unwrap();
        let file = load_file(&path).unwrap();
        assert_eq!(file.provider, Some(Provider::OpenAI));
        assert_eq!(file.fence_mode, Some(FenceMode::All));

        fs::write(&path, "colour = \"blue\"\n").unwrap();
        assert!(matches!(load_file(&path), Err(ConfigError::InvalidConfigFile { .. })));

        assert!(load_file(&dir.path().join("absent.toml")).unwrap().project_dir.is_none());
    }
}
