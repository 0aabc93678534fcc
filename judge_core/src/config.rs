use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs, path::Path, path::PathBuf, time::Duration};

use crate::{
    compare::{ComparisonMode, LineCompare, StandardCompare},
    compile::LanguageDescriptor,
    error::{Error, Result},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonModeConfig {
    Standard,
    Line,
}

impl ComparisonModeConfig {
    pub fn build(&self, strip_markup: bool) -> Box<dyn ComparisonMode> {
        match self {
            ComparisonModeConfig::Standard => Box::new(StandardCompare { strip_markup }),
            ComparisonModeConfig::Line => Box::new(LineCompare { strip_markup }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Additional case-insensitive regex patterns, keyed by language id.
    #[serde(default)]
    pub extra: HashMap<String, Vec<String>>,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            extra: HashMap::new(),
        }
    }
}

/// Deployment settings of the judge. Every field has a default so an empty
/// file is a valid config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    /// Size of the worker pool. Hard ceiling on concurrent executions.
    pub workers: usize,
    /// Parent directory of the per-submission workspaces.
    #[serde(rename = "workspaceRoot")]
    pub workspace_root: Option<PathBuf>,
    /// Seconds.
    #[serde(rename = "compileTimeout")]
    pub compile_timeout: u64,
    /// MB.
    #[serde(rename = "compileMemoryLimit")]
    pub compile_memory_limit: u64,
    /// Milliseconds between two resource samples.
    #[serde(rename = "pollInterval")]
    pub poll_interval: u64,
    #[serde(rename = "maxSourceBytes")]
    pub max_source_bytes: usize,
    #[serde(rename = "maxMessageChars")]
    pub max_message_chars: usize,
    #[serde(rename = "maxOutputBytes")]
    pub max_output_bytes: usize,
    #[serde(rename = "stripMarkup")]
    pub strip_markup: bool,
    #[serde(rename = "compareMode")]
    pub compare_mode: ComparisonModeConfig,
    #[serde(rename = "cpuRlimit")]
    pub cpu_rlimit: bool,
    pub languages: Vec<LanguageDescriptor>,
    pub screen: ScreenConfig,
}

fn default_true() -> bool {
    true
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            workspace_root: None,
            compile_timeout: 10,
            compile_memory_limit: 512,
            poll_interval: 10,
            max_source_bytes: 100_000,
            max_message_chars: 2000,
            max_output_bytes: 64 << 20,
            strip_markup: true,
            compare_mode: ComparisonModeConfig::Standard,
            cpu_rlimit: true,
            languages: Vec::new(),
            screen: ScreenConfig::default(),
        }
    }
}

impl JudgeConfig {
    pub fn from_string(content: &str) -> Result<Self> {
        let v: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(content)?
        };
        v.check_valid()?;
        Ok(v)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|_| Error::NotFound(path.to_string_lossy().to_string()))?;
        Self::from_string(&content)
    }

    pub fn check_valid(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".into()));
        }
        if self.compile_timeout == 0 {
            return Err(Error::Config("compileTimeout must be positive".into()));
        }
        if self.poll_interval == 0 || self.poll_interval > 1000 {
            return Err(Error::Config(
                "pollInterval must be within 1..=1000 ms".into(),
            ));
        }
        if self.max_message_chars == 0 {
            return Err(Error::Config("maxMessageChars must be positive".into()));
        }
        Ok(())
    }

    pub fn compile_timeout(&self) -> Duration {
        Duration::from_secs(self.compile_timeout)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval)
    }

    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}
