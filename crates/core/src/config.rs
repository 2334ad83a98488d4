use providers::openai::GROQ_BASE_URL;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub search: SearchConfig,
    pub classifier: ClassifierConfig,
    pub pipeline: PipelineConfig,
    pub monitor: MonitorConfig,
    pub scan: ScanConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: data_dir().join("smartdir.db").to_string_lossy().into_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub provider: String,
    pub host: String,
    pub api_key: Option<String>,
    pub index: String,
    pub task_timeout_secs: u64,
    /// Directory of the on-disk keyword index.
    pub path: Option<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: "meilisearch".into(),
            host: "http://localhost:7700".into(),
            api_key: None,
            index: "files".into(),
            task_timeout_secs: 30,
            path: None,
        }
    }
}

impl SearchConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir().join("index"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub provider: String,
    pub base_url: Option<String>,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            provider: "groq".into(),
            base_url: None,
            model: "llama-3.1-8b-instant".into(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

impl ClassifierConfig {
    /// Configured key, else the provider's conventional environment variable.
    pub fn resolved_api_key(&self) -> Option<String> {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.trim().is_empty()) {
            return Some(key.clone());
        }
        let var = match self.provider.to_lowercase().as_str() {
            "openai" => "OPENAI_API_KEY",
            _ => "GROQ_API_KEY",
        };
        std::env::var(var).ok().filter(|k| !k.trim().is_empty())
    }

    pub fn resolved_base_url(&self) -> String {
        if let Some(url) = &self.base_url {
            return url.trim_end_matches('/').to_string();
        }
        match self.provider.to_lowercase().as_str() {
            "openai" => "https://api.openai.com".into(),
            _ => GROQ_BASE_URL.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Worker count; defaults to the available parallelism.
    pub workers: Option<usize>,
    pub queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: None,
            queue_capacity: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub settle_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self { settle_secs: 5 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub exclude: Vec<String>,
}

/// `$HOME/.smartdir`, or `.smartdir` in the working directory without a home.
pub fn data_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(".smartdir")
}

/// Layers `config/default`, `~/.smartdir/config`, the explicit file (which
/// must exist) and `SMARTDIR_*` environment variables, later sources winning.
pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let user = data_dir().join("config");
    let mut settings = config::Config::builder()
        .add_source(config::File::with_name("config/default").required(false))
        .add_source(config::File::with_name(&user.to_string_lossy()).required(false));
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    }
    let cfg = settings
        .add_source(
            config::Environment::with_prefix("SMARTDIR")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;
    Ok(cfg.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_every_section() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.search.index, "files");
        assert_eq!(cfg.search.task_timeout_secs, 30);
        assert_eq!(cfg.pipeline.queue_capacity, 100);
        assert_eq!(cfg.monitor.settle_secs, 5);
        assert!(cfg.database.path.ends_with("smartdir.db"));
    }

    #[test]
    fn explicit_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("smartdir.toml");
        std::fs::write(
            &file,
            "[search]\nprovider = \"memory\"\n\n[pipeline]\nworkers = 2\n",
        )
        .unwrap();
        let cfg = load(Some(file.to_str().unwrap())).unwrap();
        assert_eq!(cfg.search.provider, "memory");
        assert_eq!(cfg.pipeline.workers, Some(2));
        assert_eq!(cfg.search.host, "http://localhost:7700");
    }

    #[test]
    fn base_url_follows_provider() {
        let mut c = ClassifierConfig::default();
        assert_eq!(c.resolved_base_url(), GROQ_BASE_URL);
        c.provider = "openai".into();
        assert_eq!(c.resolved_base_url(), "https://api.openai.com");
        c.base_url = Some("http://localhost:1234/".into());
        assert_eq!(c.resolved_base_url(), "http://localhost:1234");
    }
}
