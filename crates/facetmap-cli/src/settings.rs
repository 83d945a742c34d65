use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use facetmap_core::config_file::{self, ConfigFile};
use facetmap_core::corpus::SectionOrder;
use facetmap_core::{ApiFlavor, Config, FacetSet};
use facetmap_ingest::grobid::DEFAULT_GROBID_URL;

/// Model and pipeline options shared by `embed` and `run`.
#[derive(Args, Debug, Default, Clone)]
pub struct ModelArgs {
    /// Provider wire dialect: openai or azure
    #[arg(long)]
    pub flavor: Option<String>,

    /// Provider base URL
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Provider API key
    #[arg(long)]
    pub api_key: Option<String>,

    /// Azure api-version query parameter
    #[arg(long)]
    pub api_version: Option<String>,

    /// Embedding model (Azure: deployment name)
    #[arg(long)]
    pub embedding_model: Option<String>,

    /// Completion model (Azure: deployment name)
    #[arg(long)]
    pub completion_model: Option<String>,

    /// Token budget for the text sent to the completion model
    #[arg(long)]
    pub token_budget: Option<usize>,

    /// Comma-separated facet names, in output order
    #[arg(long, value_delimiter = ',')]
    pub facets: Vec<String>,

    /// Section file order: lexical or numeric
    #[arg(long)]
    pub section_order: Option<String>,

    /// Retries on 429 / 5xx responses (0 disables)
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Per-request timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

/// Directory and service locations. Global so they can follow any subcommand.
#[derive(Args, Debug, Default, Clone)]
pub struct PathArgs {
    /// Folder holding the `*_sections` directories
    #[arg(long, global = true)]
    pub sections_root: Option<PathBuf>,

    /// Folder for the per-paper embedding cache
    #[arg(long, global = true)]
    pub embeddings_dir: Option<PathBuf>,

    /// Folder the plots are written to
    #[arg(long, global = true)]
    pub plots_dir: Option<PathBuf>,

    /// GROBID base URL
    #[arg(long, global = true)]
    pub grobid_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub sections_root: PathBuf,
    pub embeddings_dir: PathBuf,
    pub plots_dir: PathBuf,
    pub grobid_url: String,
}

/// `--config PATH` replaces the platform/CWD cascade; a missing or
/// unparseable explicit file is an error.
pub fn load_config_file(explicit: Option<&PathBuf>) -> anyhow::Result<ConfigFile> {
    match explicit {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            config_file::load_from_path(path)
                .with_context(|| format!("Could not parse config file {}", path.display()))
        }
        None => Ok(config_file::load_config()),
    }
}

/// Build the pipeline [`Config`]: CLI flags > environment > config file > defaults.
pub fn resolve_config<E>(
    file: &ConfigFile,
    env: E,
    args: &ModelArgs,
    seed: Option<u64>,
) -> anyhow::Result<Config>
where
    E: Fn(&str) -> Option<String>,
{
    let mut config = Config::default();
    file.apply_to(&mut config)?;
    apply_env(&mut config, &env)?;

    if let Some(flavor) = &args.flavor {
        config.api_flavor = flavor.parse::<ApiFlavor>()?;
    }
    if let Some(v) = &args.endpoint {
        config.api_endpoint = v.clone();
    }
    if let Some(v) = &args.api_key {
        config.api_key = Some(v.clone());
    }
    if let Some(v) = &args.api_version {
        config.api_version = v.clone();
    }
    if let Some(v) = &args.embedding_model {
        config.embedding_model = v.clone();
    }
    if let Some(v) = &args.completion_model {
        config.completion_model = v.clone();
    }
    if let Some(v) = args.token_budget {
        config.token_budget = v;
    }
    if !args.facets.is_empty() {
        let names = args.facets.iter().map(|f| f.trim()).filter(|f| !f.is_empty());
        config.facets = FacetSet::new(names)?;
    }
    if let Some(v) = &args.section_order {
        config.section_order = v.parse::<SectionOrder>()?;
    }
    if let Some(v) = args.max_retries {
        config.max_retries = v;
    }
    if let Some(v) = args.timeout {
        config.request_timeout_secs = Some(v);
    }
    if let Some(v) = seed {
        config.seed = v;
    }
    Ok(config)
}

/// `FACETMAP_*` variables win over the Azure names. Reading the endpoint from
/// `AZURE_EMBEDDING_ENDPOINT` also selects the Azure flavor unless
/// `FACETMAP_API_FLAVOR` says otherwise.
fn apply_env<E>(config: &mut Config, env: &E) -> anyhow::Result<()>
where
    E: Fn(&str) -> Option<String>,
{
    let get = |name: &str| env(name).filter(|v| !v.trim().is_empty());
    let first = |names: &[&str]| names.iter().find_map(|&n| get(n));

    if let Some(v) = first(&["FACETMAP_API_KEY", "AZURE_EMBEDDING_API_KEY"]) {
        config.api_key = Some(v);
    }
    if let Some(v) = get("FACETMAP_API_ENDPOINT") {
        config.api_endpoint = v;
    } else if let Some(v) = get("AZURE_EMBEDDING_ENDPOINT") {
        config.api_endpoint = v;
        config.api_flavor = ApiFlavor::Azure;
    }
    if let Some(v) = get("FACETMAP_API_FLAVOR") {
        config.api_flavor = v.parse::<ApiFlavor>()?;
    }
    if let Some(v) = get("FACETMAP_API_VERSION") {
        config.api_version = v;
    }
    if let Some(v) = first(&["FACETMAP_EMBEDDING_MODEL", "AZURE_EMBEDDING_MODEL"]) {
        config.embedding_model = v;
    }
    if let Some(v) = first(&["FACETMAP_COMPLETION_MODEL", "AZURE_OPENAI_DEPLOYMENT"]) {
        config.completion_model = v;
    }
    Ok(())
}

/// Locations: CLI flags > config file > `./outputs`, `./embeddings`,
/// `./plots/facets`, local GROBID.
pub fn resolve_paths(file: &ConfigFile, args: &PathArgs) -> Paths {
    let from_file = file.paths();
    let pick = |cli: &Option<PathBuf>, file: &Option<String>, default: &str| {
        cli.clone()
            .or_else(|| file.as_ref().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(default))
    };
    Paths {
        sections_root: pick(&args.sections_root, &from_file.sections_root, "./outputs"),
        embeddings_dir: pick(&args.embeddings_dir, &from_file.embeddings_dir, "./embeddings"),
        plots_dir: pick(&args.plots_dir, &from_file.plots_dir, "./plots/facets"),
        grobid_url: args
            .grobid_url
            .clone()
            .or(from_file.grobid_url)
            .unwrap_or_else(|| DEFAULT_GROBID_URL.to_string()),
    }
}
