//! Configuration management.
//!
//! Values are layered, later sources overriding earlier ones:
//!
//! 1. Built-in defaults (`Config::default`)
//! 2. YAML file (`-f/--config`, `RECEIPTS_CONFIG`, default `receipts.yaml`; a missing file is skipped)
//! 3. `RECEIPTS_`-prefixed environment variables, nested with `__`
//! 4. Well-known unprefixed variables
//!
//! ```bash
//! RECEIPTS_PORT=9000
//! RECEIPTS_OCR__PROVIDER=textract
//! RECEIPTS_AUTH__TOKEN_TTL=12h
//!
//! # Unprefixed
//! OPENAI_API_KEY=sk-...
//! JWT_SECRET=change-me
//! DATABASE_URL=sqlite://receipts.db
//! ALLOWED_ORIGINS=http://localhost:8501,https://receipts.example.com
//! ```

use anyhow::{anyhow, bail};
use clap::Parser;
use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// CLI args for the server - just the config file
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "RECEIPTS_CONFIG", default_value = "receipts.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server
    #[arg(long)]
    pub validate: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Address to bind to
    pub host: String,
    pub port: u16,
    /// SQLite database file
    pub database_path: PathBuf,
    /// CORS origins allowed to call the API (list or comma-separated string)
    #[serde(deserialize_with = "string_or_list")]
    pub allowed_origins: Vec<String>,
    /// Largest accepted upload body, in bytes
    pub max_upload_bytes: usize,
    /// Used when neither the document nor the categorizer names a currency
    pub default_currency: String,
    pub auth: AuthConfig,
    pub ocr: OcrConfig,
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 signing secret, required to serve
    pub jwt_secret: Option<String>,
    #[serde(with = "humantime_serde")]
    pub token_ttl: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrProviderKind {
    Tesseract,
    Textract,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OcrConfig {
    pub provider: OcrProviderKind,
    /// Text at or below this confidence (0.0 - 1.0) is discarded
    pub min_confidence: f32,
    pub tesseract_bin: String,
    /// Tesseract language pack(s), e.g. "eng" or "eng+ara"
    pub language: String,
    /// Region for Textract; falls back to the AWS environment
    pub aws_region: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Without a key the rule-based categorizer is used
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// JSON keyword rules for the rule-based categorizer; built-in rules when unset
    pub rules_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "0.0.0.0".to_string(),
            port: 8000,
            database_path: PathBuf::from("receipts.db"),
            allowed_origins: vec!["http://localhost:8501".to_string()],
            max_upload_bytes: 10 * 1024 * 1024,
            default_currency: "BHD".to_string(),
            auth: AuthConfig::default(),
            ocr: OcrConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            jwt_secret: None,
            token_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        OcrConfig {
            provider: OcrProviderKind::Tesseract,
            min_confidence: 0.5,
            tesseract_bin: "tesseract".to_string(),
            language: "eng".to_string(),
            aws_region: None,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        LlmConfig {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout: Duration::from_secs(30),
            rules_path: None,
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let mut config: Self = Self::figment(args).extract()?;

        // DATABASE_URL may carry a sqlite:// scheme
        let path = config.database_path.to_string_lossy().to_string();
        if let Some(stripped) = path.strip_prefix("sqlite://").or_else(|| path.strip_prefix("sqlite:")) {
            config.database_path = PathBuf::from(stripped);
        }

        config.default_currency = config.default_currency.trim().to_uppercase();

        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            .merge(Env::prefixed("RECEIPTS_").ignore(&["CONFIG"]).split("__"))
            .merge(Env::raw().only(&["HOST", "PORT", "ALLOWED_ORIGINS"]))
            .merge(Env::raw().only(&["DATABASE_URL"]).map(|_| "database_path".into()))
            .merge(Env::raw().only(&["OPENAI_API_KEY"]).map(|_| "llm.api_key".into()))
            .merge(Env::raw().only(&["JWT_SECRET"]).map(|_| "auth.jwt_secret".into()))
    }

    /// Check the configuration for consistency
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.port == 0 {
            bail!("Config validation: port must not be 0");
        }
        if !(self.ocr.min_confidence > 0.0 && self.ocr.min_confidence < 1.0) {
            bail!(
                "Config validation: ocr.min_confidence ({}) must be between 0 and 1",
                self.ocr.min_confidence
            );
        }
        if self.max_upload_bytes == 0 {
            bail!("Config validation: max_upload_bytes must be greater than 0");
        }
        if self.default_currency.len() != 3 || !self.default_currency.chars().all(|c| c.is_ascii_alphabetic()) {
            bail!(
                "Config validation: default_currency ({:?}) must be a 3 letter code",
                self.default_currency
            );
        }
        if self.auth.token_ttl.is_zero() {
            bail!("Config validation: auth.token_ttl must be greater than 0");
        }
        Ok(())
    }

    /// The signing secret; serving without one is refused
    pub fn jwt_secret(&self) -> anyhow::Result<&str> {
        self.auth
            .jwt_secret
            .as_deref()
            .filter(|secret| !secret.trim().is_empty())
            .ok_or_else(|| {
                anyhow!("auth.jwt_secret is not configured. Set JWT_SECRET or RECEIPTS_AUTH__JWT_SECRET.")
            })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Accept `["a", "b"]` or `"a,b"`
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrList {
        One(String),
        Many(Vec<String>),
    }

    let values = match StringOrList::deserialize(deserializer)? {
        StringOrList::One(value) => value.split(',').map(str::to_string).collect(),
        StringOrList::Many(values) => values,
    };

    Ok(values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect())
}
