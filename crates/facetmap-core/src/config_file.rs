use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{ApiFlavor, Config, ConfigError, FacetSet, SectionOrder};

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub provider: Option<ProviderConfig>,
    pub pipeline: Option<PipelineConfig>,
    pub reduction: Option<ReductionConfig>,
    pub paths: Option<PathsConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// `openai` or `azure`.
    pub flavor: Option<String>,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub api_version: Option<String>,
    pub embedding_model: Option<String>,
    pub completion_model: Option<String>,
    pub max_retries: Option<u32>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub token_budget: Option<usize>,
    pub system_prompt: Option<String>,
    pub facets: Option<Vec<String>>,
    /// `lexical` or `numeric`.
    pub section_order: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReductionConfig {
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsConfig {
    pub sections_root: Option<String>,
    pub embeddings_dir: Option<String>,
    pub plots_dir: Option<String>,
    pub grobid_url: Option<String>,
}

/// Platform config directory path: `<config_dir>/facetmap/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("facetmap").join("config.toml"))
}

/// Load config by cascading CWD `.facetmap.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".facetmap.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. Returns `None` if the file doesn't
/// exist or can't be parsed.
pub fn load_from_path(path: &Path) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unparseable config file");
            None
        }
    }
}

fn pick<S, T>(overlay: &Option<S>, base: &Option<S>, field: impl Fn(&S) -> Option<T>) -> Option<T> {
    overlay
        .as_ref()
        .and_then(&field)
        .or_else(|| base.as_ref().and_then(&field))
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    let (bp, op) = (&base.provider, &overlay.provider);
    let (bl, ol) = (&base.pipeline, &overlay.pipeline);
    let (br, or) = (&base.reduction, &overlay.reduction);
    let (bx, ox) = (&base.paths, &overlay.paths);
    ConfigFile {
        provider: Some(ProviderConfig {
            flavor: pick(op, bp, |p| p.flavor.clone()),
            endpoint: pick(op, bp, |p| p.endpoint.clone()),
            api_key: pick(op, bp, |p| p.api_key.clone()),
            api_version: pick(op, bp, |p| p.api_version.clone()),
            embedding_model: pick(op, bp, |p| p.embedding_model.clone()),
            completion_model: pick(op, bp, |p| p.completion_model.clone()),
            max_retries: pick(op, bp, |p| p.max_retries),
            request_timeout_secs: pick(op, bp, |p| p.request_timeout_secs),
        }),
        pipeline: Some(PipelineConfig {
            token_budget: pick(ol, bl, |p| p.token_budget),
            system_prompt: pick(ol, bl, |p| p.system_prompt.clone()),
            facets: pick(ol, bl, |p| p.facets.clone()),
            section_order: pick(ol, bl, |p| p.section_order.clone()),
        }),
        reduction: Some(ReductionConfig {
            seed: pick(or, br, |r| r.seed),
        }),
        paths: Some(PathsConfig {
            sections_root: pick(ox, bx, |p| p.sections_root.clone()),
            embeddings_dir: pick(ox, bx, |p| p.embeddings_dir.clone()),
            plots_dir: pick(ox, bx, |p| p.plots_dir.clone()),
            grobid_url: pick(ox, bx, |p| p.grobid_url.clone()),
        }),
    }
}

impl ConfigFile {
    /// Overwrite the fields of `config` that this file sets.
    pub fn apply_to(&self, config: &mut Config) -> Result<(), ConfigError> {
        if let Some(p) = &self.provider {
            if let Some(flavor) = &p.flavor {
                config.api_flavor = flavor.parse::<ApiFlavor>()?;
            }
            if let Some(v) = &p.endpoint {
                config.api_endpoint = v.clone();
            }
            if let Some(v) = &p.api_key {
                config.api_key = Some(v.clone());
            }
            if let Some(v) = &p.api_version {
                config.api_version = v.clone();
            }
            if let Some(v) = &p.embedding_model {
                config.embedding_model = v.clone();
            }
            if let Some(v) = &p.completion_model {
                config.completion_model = v.clone();
            }
            if let Some(v) = p.max_retries {
                config.max_retries = v;
            }
            if let Some(v) = p.request_timeout_secs {
                config.request_timeout_secs = Some(v);
            }
        }
        if let Some(p) = &self.pipeline {
            if let Some(v) = p.token_budget {
                config.token_budget = v;
            }
            if let Some(v) = &p.system_prompt {
                config.system_prompt = v.clone();
            }
            if let Some(v) = &p.facets {
                config.facets = FacetSet::new(v.iter().cloned())?;
            }
            if let Some(v) = &p.section_order {
                config.section_order = v.parse::<SectionOrder>()?;
            }
        }
        if let Some(seed) = self.reduction.as_ref().and_then(|r| r.seed) {
            config.seed = seed;
        }
        Ok(())
    }

    pub fn paths(&self) -> PathsConfig {
        self.paths.clone().unwrap_or_default()
    }
}
