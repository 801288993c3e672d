use crate::adapters::tariff_api::TariffApiConfig;
use crate::utils::error::{HelpdeskError, Result};
use crate::utils::validation::{
    validate_aws_region, validate_non_empty_string, validate_path, validate_range,
    validate_s3_bucket_name, validate_url, Validate,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;

static ENV_VAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").unwrap());

pub const DEFAULT_TARIFF_API_URL: &str = "https://www.trade-tariff.service.gov.uk/api/v2/";
const REGIONS: [&str; 2] = ["UK", "EU"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub nomenclature: NomenclatureConfig,
    pub tariff_api: TariffApiConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "./tariff-helpdesk.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NomenclatureConfig {
    pub region: String,
    /// End-dated trees kept by `clear_old_data`
    pub keep_trees: usize,
}

impl Default for NomenclatureConfig {
    fn default() -> Self {
        Self {
            region: "UK".to_string(),
            keep_trees: 1,
        }
    }
}

impl Default for TariffApiConfig {
    fn default() -> Self {
        TariffApiConfig::new(DEFAULT_TARIFF_API_URL)
    }
}

/// Where rules of origin XML files and API snapshots live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    Local {
        path: String,
    },
    S3 {
        bucket: String,
        region: Option<String>,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Local {
            path: "./data".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| HelpdeskError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Replaces `${VAR}` with the environment value; unset variables stay as written.
    fn substitute_env_vars(content: &str) -> String {
        ENV_VAR_RE
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
            })
            .to_string()
    }
}

impl Validate for AppConfig {
    fn validate(&self) -> Result<()> {
        validate_path("database.path", &self.database.path)?;

        validate_non_empty_string("nomenclature.region", &self.nomenclature.region)?;
        if !REGIONS.contains(&self.nomenclature.region.as_str()) {
            return Err(HelpdeskError::InvalidConfigValueError {
                field: "nomenclature.region".to_string(),
                value: self.nomenclature.region.clone(),
                reason: format!("Valid regions: {}", REGIONS.join(", ")),
            });
        }
        validate_range("nomenclature.keep_trees", self.nomenclature.keep_trees, 0, 100)?;

        validate_url("tariff_api.base_url", &self.tariff_api.base_url)?;
        if let Some(timeout) = self.tariff_api.timeout_seconds {
            validate_range("tariff_api.timeout_seconds", timeout, 1, 300)?;
        }

        match &self.storage {
            StorageConfig::Local { path } => validate_path("storage.path", path)?,
            StorageConfig::S3 { bucket, region } => {
                validate_s3_bucket_name("storage.bucket", bucket)?;
                if let Some(region) = region {
                    validate_aws_region("storage.region", region)?;
                }
            }
        }

        tracing::debug!("✅ Configuration validation passed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_full_config() {
        let toml_content = r#"
[database]
path = "/var/lib/helpdesk/roo.db"

[nomenclature]
region = "EU"
keep_trees = 2

[tariff_api]
base_url = "https://api.example.com/api/v2/"
timeout_seconds = 30

[tariff_api.headers]
Accept = "application/json"

[storage]
type = "s3"
bucket = "trade-helpdesk-roo"
region = "eu-west-2"
"#;

        let config = AppConfig::from_toml_str(toml_content).unwrap();

        assert_eq!(config.database.path, "/var/lib/helpdesk/roo.db");
        assert_eq!(config.nomenclature.region, "EU");
        assert_eq!(config.nomenclature.keep_trees, 2);
        assert_eq!(config.tariff_api.timeout_seconds, Some(30));
        assert_eq!(
            config.storage,
            StorageConfig::S3 {
                bucket: "trade-helpdesk-roo".to_string(),
                region: Some("eu-west-2".to_string()),
            }
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();

        assert_eq!(config.nomenclature.region, "UK");
        assert_eq!(config.tariff_api.base_url, DEFAULT_TARIFF_API_URL);
        assert!(matches!(config.storage, StorageConfig::Local { .. }));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("HELPDESK_TEST_API_URL", "https://staging.example.com/api/v2/");

        let toml_content = r#"
[tariff_api]
base_url = "${HELPDESK_TEST_API_URL}"
"#;

        let config = AppConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.tariff_api.base_url, "https://staging.example.com/api/v2/");

        std::env::remove_var("HELPDESK_TEST_API_URL");
    }

    #[test]
    fn test_config_validation() {
        let bad_url = AppConfig::from_toml_str("[tariff_api]\nbase_url = \"invalid-url\"\n").unwrap();
        assert!(bad_url.validate().is_err());

        let bad_region = AppConfig::from_toml_str("[nomenclature]\nregion = \"US\"\n").unwrap();
        assert!(bad_region.validate().is_err());

        let bad_bucket =
            AppConfig::from_toml_str("[storage]\ntype = \"s3\"\nbucket = \"Bad_Bucket\"\n").unwrap();
        assert!(bad_bucket.validate().is_err());
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[storage]\ntype = \"local\"\npath = \"./roo-files\"\n")
            .unwrap();

        let config = AppConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(
            config.storage,
            StorageConfig::Local {
                path: "./roo-files".to_string()
            }
        );
    }
}
