//! Run-level configuration: the `.ptrconfig` defaults file and its coercions

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::core::outcome::StepName;

/// Defaults file looked up from the invocation (and project) directory upward.
pub const CONFIG_FILE_NAME: &str = ".ptrconfig";

/// Section every recognized configuration surface uses.
pub const TOOL_SECTION: &str = "ptr";

pub const DEFAULT_PYPI_URL: &str = "https://pypi.org/simple/";
pub const DEFAULT_VENV_PKGS: &str = "black coverage flake8 mypy pip pylint setuptools";
pub const DEFAULT_EXCLUDE_PATTERNS: &str = "build* yocto";
pub const DEFAULT_VENV_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_ATONCE: usize = 6;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: {reason}")]
    Syntax { line: usize, reason: String },

    #[error("bad value `{value}` for `{key}`: expected {expected}")]
    Coerce {
        key: String,
        value: String,
        expected: &'static str,
    },
}

/// Minimal INI reader covering the subset the manifests use: `[section]`
/// headers, `key = value` entries, `#`/`;` comments, and indented
/// continuation lines which extend the previous value with a newline.
#[derive(Debug, Clone, Default)]
pub struct IniFile {
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl IniFile {
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut sections: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        let mut current_section: Option<String> = None;
        let mut current_key: Option<String> = None;

        for (idx, raw_line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw_line.trim_end();

            if line.trim().is_empty() {
                current_key = None;
                continue;
            }

            let continuation = line.starts_with(' ') || line.starts_with('\t');
            let trimmed = line.trim();

            if !continuation && (trimmed.starts_with('#') || trimmed.starts_with(';')) {
                continue;
            }

            if !continuation && trimmed.starts_with('[') {
                let name = trimmed
                    .strip_prefix('[')
                    .and_then(|s| s.strip_suffix(']'))
                    .ok_or_else(|| ConfigError::Syntax {
                        line: line_no,
                        reason: format!("malformed section header `{trimmed}`"),
                    })?;
                sections.entry(name.trim().to_string()).or_default();
                current_section = Some(name.trim().to_string());
                current_key = None;
                continue;
            }

            if continuation {
                match (&current_section, &current_key) {
                    (Some(section), Some(key)) => {
                        let value = sections
                            .get_mut(section)
                            .and_then(|s| s.get_mut(key))
                            .expect("continuation for a key that was just inserted");
                        if !value.is_empty() {
                            value.push('\n');
                        }
                        value.push_str(trimmed);
                        continue;
                    }
                    _ => {
                        return Err(ConfigError::Syntax {
                            line: line_no,
                            reason: "continuation line without a preceding key".to_string(),
                        })
                    }
                }
            }

            let section = current_section.as_ref().ok_or_else(|| ConfigError::Syntax {
                line: line_no,
                reason: format!("entry `{trimmed}` outside of any section"),
            })?;

            let (key, value) = trimmed.split_once('=').ok_or_else(|| ConfigError::Syntax {
                line: line_no,
                reason: format!("expected `key = value`, got `{trimmed}`"),
            })?;
            let key = key.trim().to_string();
            if key.is_empty() {
                return Err(ConfigError::Syntax {
                    line: line_no,
                    reason: "empty key".to_string(),
                });
            }
            sections
                .get_mut(section)
                .expect("current section always present")
                .insert(key.clone(), value.trim().to_string());
            current_key = Some(key);
        }

        Ok(Self { sections })
    }

    pub fn section(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        self.sections.get(name)
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.sections.contains_key(name)
    }
}

/// Parse a boolean from the accepted literal set, case-insensitively.
pub fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(ConfigError::Coerce {
            key: key.to_string(),
            value: raw.to_string(),
            expected: "one of true/false/yes/no/1/0",
        }),
    }
}

pub fn parse_int(key: &str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Coerce {
        key: key.to_string(),
        value: raw.to_string(),
        expected: "a decimal integer",
    })
}

/// Whitespace-separated token list.
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

/// Newline-separated `path = number` pairs; numbers may be int or float.
pub fn parse_coverage_map(key: &str, raw: &str) -> Result<BTreeMap<String, f64>, ConfigError> {
    let mut map = BTreeMap::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (path, number) = line.split_once('=').ok_or_else(|| ConfigError::Coerce {
            key: key.to_string(),
            value: line.to_string(),
            expected: "`path = number` pairs",
        })?;
        let pct: f64 = number.trim().parse().map_err(|_| ConfigError::Coerce {
            key: key.to_string(),
            value: number.trim().to_string(),
            expected: "an integer or floating-point percent",
        })?;
        map.insert(path.trim().to_string(), pct);
    }
    Ok(map)
}

/// Walk from `start` to the filesystem root looking for the defaults file.
pub fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(current) = dir {
        let candidate = current.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        dir = current.parent();
    }
    None
}

/// Run-wide settings resolved once at startup.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Concurrency cap for the scheduler
    pub atonce: usize,
    /// Index URL handed to the installer
    pub pypi_url: String,
    /// Baseline package set installed into the shared environment
    pub venv_pkgs: Vec<String>,
    /// Directory-name globs skipped during discovery
    pub exclude_patterns: Vec<String>,
    /// Timeout for environment provisioning subprocesses, in seconds
    pub venv_timeout: u64,
    /// Extra arguments appended to a step's argv for every project
    pub step_args: BTreeMap<StepName, Vec<String>>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            atonce: DEFAULT_ATONCE,
            pypi_url: DEFAULT_PYPI_URL.to_string(),
            venv_pkgs: parse_list(DEFAULT_VENV_PKGS),
            exclude_patterns: parse_list(DEFAULT_EXCLUDE_PATTERNS),
            venv_timeout: DEFAULT_VENV_TIMEOUT_SECS,
            step_args: BTreeMap::new(),
        }
    }
}

impl RunConfig {
    /// Load the nearest defaults file above `start_dir`, falling back to the
    /// builtin defaults. A malformed file is warned about, not fatal.
    pub fn load(start_dir: &Path) -> Self {
        let Some(path) = find_config_file(start_dir) else {
            info!("Using default config settings");
            return Self::default();
        };

        match IniFile::read(&path) {
            Ok(ini) => {
                info!("Loading found config @ {}", path.display());
                Self::from_ini(&ini)
            }
            Err(err) => {
                warn!("Ignoring config {}: {}", path.display(), err);
                Self::default()
            }
        }
    }

    pub fn from_ini(ini: &IniFile) -> Self {
        let mut config = Self::default();
        let Some(section) = ini.section(TOOL_SECTION) else {
            return config;
        };

        if let Some(raw) = section.get("atonce") {
            match parse_int("atonce", raw) {
                Ok(n) if n > 0 => config.atonce = n as usize,
                Ok(_) => warn!("atonce must be positive, keeping {}", config.atonce),
                Err(err) => warn!("{err}"),
            }
        }
        if let Some(raw) = section.get("pypi_url") {
            config.pypi_url = raw.clone();
        }
        if let Some(raw) = section.get("venv_pkgs") {
            config.venv_pkgs = parse_list(raw);
        }
        if let Some(raw) = section.get("exclude_patterns") {
            config.exclude_patterns = parse_list(raw);
        }
        if let Some(raw) = section.get("venv_timeout") {
            match parse_int("venv_timeout", raw) {
                Ok(n) => config.venv_timeout = n,
                Err(err) => warn!("{err}"),
            }
        }
        for step in StepName::ALL {
            if let Some(raw) = section.get(&format!("{step}_args")) {
                config.step_args.insert(step, parse_list(raw));
            }
        }
        config
    }
}
