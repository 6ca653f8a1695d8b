//! Manifest loader: turns candidate files into Project records
//!
//! Two manifest kinds are recognized per directory: a declarative INI form
//! (`setup.cfg` with a `[ptr]` section) and a programmatic form (`setup.py`
//! assigning a literal mapping to `ptr_params`). When both carry the tool's
//! parameters the declarative form wins. A repository-level `.ptrconfig`
//! found above the project supplies defaults; per-project keys override.
//! Every failure mode here is warn-and-skip, never fatal.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::core::config::{
    self, find_config_file, parse_bool, parse_coverage_map, parse_int, parse_list, ConfigError,
    IniFile, TOOL_SECTION,
};
use crate::core::project::{Project, DEFAULT_SUITE_TIMEOUT_SECS};
use crate::core::pyliteral::{self, PyLiteralError, Value};

/// Declarative manifest file name.
pub const DECLARATIVE_MANIFEST: &str = "setup.cfg";

/// Programmatic manifest file name.
pub const PROGRAMMATIC_MANIFEST: &str = "setup.py";

/// Identifier the programmatic form assigns its parameters to.
pub const PARAMS_VARIABLE: &str = "ptr_params";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("`ptr_params` must be a mapping of literal values: {reason}")]
    BadParams { reason: String },

    #[error(transparent)]
    Literal(#[from] PyLiteralError),
}

/// What the loader found in one candidate directory.
#[derive(Debug)]
pub enum ManifestOutcome {
    /// A valid, configured project
    Project(Project),
    /// A candidate manifest with no tool section/variable
    NotConfigured(PathBuf),
    /// A candidate that failed to parse; already warned about
    Skipped,
}

/// Parameters as read from one manifest source, before defaults merge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManifestParams {
    pub entry_point_module: Option<String>,
    pub test_suite: Option<String>,
    pub test_suite_timeout: Option<u64>,
    pub required_coverage: Option<BTreeMap<String, f64>>,
    pub required_coverage_pct: Option<f64>,
    pub run_black: Option<bool>,
    pub run_mypy: Option<bool>,
    pub run_flake8: Option<bool>,
    pub run_pylint: Option<bool>,
    pub run_pyre: Option<bool>,
    pub run_usort: Option<bool>,
    pub run_pip_update: Option<bool>,
    pub disabled: Option<bool>,
    pub venv_pkgs: Option<Vec<String>>,
}

impl ManifestParams {
    /// Apply one string-typed entry. Returns false for keys outside the
    /// recognized set.
    pub fn set_from_str(&mut self, key: &str, raw: &str) -> Result<bool, ConfigError> {
        match key {
            "entry_point_module" => self.entry_point_module = Some(raw.to_string()),
            "test_suite" => self.test_suite = Some(raw.to_string()),
            "test_suite_timeout" => self.test_suite_timeout = Some(parse_int(key, raw)?),
            "required_coverage" => self.required_coverage = Some(parse_coverage_map(key, raw)?),
            "required_coverage_pct" => {
                let pct: f64 = raw.trim().parse().map_err(|_| ConfigError::Coerce {
                    key: key.to_string(),
                    value: raw.to_string(),
                    expected: "an integer or floating-point percent",
                })?;
                self.required_coverage_pct = Some(pct);
            }
            "run_black" => self.run_black = Some(parse_bool(key, raw)?),
            "run_mypy" => self.run_mypy = Some(parse_bool(key, raw)?),
            "run_flake8" => self.run_flake8 = Some(parse_bool(key, raw)?),
            "run_pylint" => self.run_pylint = Some(parse_bool(key, raw)?),
            "run_pyre" => self.run_pyre = Some(parse_bool(key, raw)?),
            "run_usort" => self.run_usort = Some(parse_bool(key, raw)?),
            "run_pip_update" => self.run_pip_update = Some(parse_bool(key, raw)?),
            "disabled" => self.disabled = Some(parse_bool(key, raw)?),
            "venv_pkgs" => self.venv_pkgs = Some(parse_list(raw)),
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Apply one entry from a parsed literal mapping.
    pub fn set_from_value(&mut self, key: &str, value: &Value) -> Result<bool, ManifestError> {
        fn want<T>(key: &str, got: Option<T>, expected: &str) -> Result<T, ManifestError> {
            got.ok_or_else(|| ManifestError::BadParams {
                reason: format!("`{key}` must be {expected}"),
            })
        }

        match key {
            "entry_point_module" => {
                self.entry_point_module =
                    Some(want(key, value.as_str(), "a string")?.to_string());
            }
            "test_suite" => {
                self.test_suite = Some(want(key, value.as_str(), "a string")?.to_string());
            }
            "test_suite_timeout" => {
                self.test_suite_timeout =
                    Some(want(key, value.as_u64(), "a non-negative integer")?);
            }
            "required_coverage" => {
                let Value::Dict(entries) = value else {
                    return Err(ManifestError::BadParams {
                        reason: format!("`{key}` must be a mapping"),
                    });
                };
                let mut map = BTreeMap::new();
                for (k, v) in entries {
                    let path = want(key, k.as_str(), "keyed by string paths")?;
                    let pct = want(key, v.as_f64(), "numeric percents")?;
                    map.insert(path.to_string(), pct);
                }
                self.required_coverage = Some(map);
            }
            "required_coverage_pct" => {
                self.required_coverage_pct = Some(want(key, value.as_f64(), "a number")?);
            }
            "run_black" => self.run_black = Some(want(key, value.as_bool(), "a boolean")?),
            "run_mypy" => self.run_mypy = Some(want(key, value.as_bool(), "a boolean")?),
            "run_flake8" => self.run_flake8 = Some(want(key, value.as_bool(), "a boolean")?),
            "run_pylint" => self.run_pylint = Some(want(key, value.as_bool(), "a boolean")?),
            "run_pyre" => self.run_pyre = Some(want(key, value.as_bool(), "a boolean")?),
            "run_usort" => self.run_usort = Some(want(key, value.as_bool(), "a boolean")?),
            "run_pip_update" => {
                self.run_pip_update = Some(want(key, value.as_bool(), "a boolean")?);
            }
            "disabled" => self.disabled = Some(want(key, value.as_bool(), "a boolean")?),
            "venv_pkgs" => {
                let Value::List(items) = value else {
                    return Err(ManifestError::BadParams {
                        reason: format!("`{key}` must be a list of strings"),
                    });
                };
                let mut pkgs = Vec::with_capacity(items.len());
                for item in items {
                    pkgs.push(want(key, item.as_str(), "a list of strings")?.to_string());
                }
                self.venv_pkgs = Some(pkgs);
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Fill unset keys from a lower-precedence source.
    pub fn merge_defaults(&mut self, defaults: &ManifestParams) {
        macro_rules! fill {
            ($field:ident) => {
                if self.$field.is_none() {
                    self.$field = defaults.$field.clone();
                }
            };
        }
        fill!(entry_point_module);
        fill!(test_suite);
        fill!(test_suite_timeout);
        fill!(required_coverage);
        fill!(required_coverage_pct);
        fill!(run_black);
        fill!(run_mypy);
        fill!(run_flake8);
        fill!(run_pylint);
        fill!(run_pyre);
        fill!(run_usort);
        fill!(run_pip_update);
        fill!(disabled);
        fill!(venv_pkgs);
    }

    /// Finalize into an immutable Project record.
    pub fn into_project(self, manifest_path: PathBuf) -> Project {
        let working_dir = Project::manifest_dir(&manifest_path);
        // The explicit map wins over the back-compat total-only alias.
        let required_coverage = match (self.required_coverage, self.required_coverage_pct) {
            (Some(map), _) => map,
            (None, Some(pct)) => BTreeMap::from([("TOTAL".to_string(), pct)]),
            (None, None) => BTreeMap::new(),
        };
        Project {
            manifest_path,
            working_dir,
            entry_point_module: self.entry_point_module,
            test_suite: self.test_suite,
            test_suite_timeout: self.test_suite_timeout.unwrap_or(DEFAULT_SUITE_TIMEOUT_SECS),
            required_coverage,
            run_black: self.run_black.unwrap_or(false),
            run_mypy: self.run_mypy.unwrap_or(false),
            run_flake8: self.run_flake8.unwrap_or(false),
            run_pylint: self.run_pylint.unwrap_or(false),
            run_pyre: self.run_pyre.unwrap_or(false),
            run_usort: self.run_usort.unwrap_or(false),
            run_pip_update: self.run_pip_update.unwrap_or(false),
            disabled: self.disabled.unwrap_or(false),
            venv_pkgs: self.venv_pkgs.unwrap_or_default(),
        }
    }

    fn from_entries(entries: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let mut params = Self::default();
        for (key, raw) in entries {
            if !params.set_from_str(key, raw)? {
                debug!("Ignoring unrecognized manifest key `{key}`");
            }
        }
        Ok(params)
    }
}

/// Load zero-or-one project from a candidate directory.
pub fn load_dir(dir: &Path) -> ManifestOutcome {
    let cfg_path = dir.join(DECLARATIVE_MANIFEST);
    let py_path = dir.join(PROGRAMMATIC_MANIFEST);

    let mut loaded: Option<(PathBuf, ManifestParams)> = None;

    if cfg_path.is_file() {
        match load_declarative(&cfg_path) {
            Ok(Some(params)) => loaded = Some((cfg_path.clone(), params)),
            Ok(None) => {}
            Err(err) => {
                warn!("Skipping {}: {}", cfg_path.display(), err);
                return ManifestOutcome::Skipped;
            }
        }
    }

    if loaded.is_none() && py_path.is_file() {
        match load_programmatic(&py_path) {
            Ok(Some(params)) => loaded = Some((py_path.clone(), params)),
            Ok(None) => {}
            Err(err) => {
                warn!("Ignoring {}: {}", py_path.display(), err);
                return ManifestOutcome::Skipped;
            }
        }
    }

    let Some((manifest_path, mut params)) = loaded else {
        let witness = if cfg_path.is_file() { cfg_path } else { py_path };
        debug!(
            "{} does not carry `{TOOL_SECTION}` parameters. Nothing to run",
            witness.display()
        );
        return ManifestOutcome::NotConfigured(witness);
    };

    if let Some(defaults) = load_defaults(dir) {
        params.merge_defaults(&defaults);
    }

    if params.run_usort == Some(true) {
        debug!(
            "{}: `run_usort` is accepted but has no pipeline step",
            manifest_path.display()
        );
    }

    ManifestOutcome::Project(params.into_project(manifest_path))
}

/// Parse the declarative form; `Ok(None)` when the tool section is absent.
pub fn load_declarative(path: &Path) -> Result<Option<ManifestParams>, ManifestError> {
    let ini = IniFile::read(path)?;
    let Some(section) = ini.section(TOOL_SECTION) else {
        return Ok(None);
    };
    Ok(Some(ManifestParams::from_entries(section)?))
}

/// Parse the programmatic form; `Ok(None)` when the variable is absent.
pub fn load_programmatic(path: &Path) -> Result<Option<ManifestParams>, ManifestError> {
    let source = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let Some(value) = pyliteral::extract_assignment(&source, PARAMS_VARIABLE)? else {
        return Ok(None);
    };
    let Value::Dict(entries) = value else {
        return Err(ManifestError::BadParams {
            reason: "top-level value is not a mapping".to_string(),
        });
    };

    let mut params = ManifestParams::default();
    for (key, val) in &entries {
        let Some(key) = key.as_str() else {
            return Err(ManifestError::BadParams {
                reason: "mapping keys must be strings".to_string(),
            });
        };
        if !params.set_from_value(key, val)? {
            debug!("Ignoring unrecognized manifest key `{key}`");
        }
    }
    Ok(Some(params))
}

/// Defaults from the nearest `.ptrconfig` above the project directory.
/// Malformed defaults are warned about and dropped, never fatal.
fn load_defaults(project_dir: &Path) -> Option<ManifestParams> {
    let path = find_config_file(project_dir)?;
    let ini = match IniFile::read(&path) {
        Ok(ini) => ini,
        Err(err) => {
            warn!("Ignoring defaults {}: {}", path.display(), err);
            return None;
        }
    };
    let section = ini.section(config::TOOL_SECTION)?;
    match ManifestParams::from_entries(section) {
        Ok(params) => Some(params),
        Err(err) => {
            warn!("Ignoring defaults {}: {}", path.display(), err);
            None
        }
    }
}
