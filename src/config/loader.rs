use std::path::Path;

use config::{Config, File, FileFormat};
use eyre::{Context, Result};

use crate::config::{models::ServerConfig, validation::ServerConfigValidator};

/// Configuration written by `switchyard init`. Matches [`ServerConfig::sample`].
pub const SAMPLE_CONFIG: &str = r#"# switchyard configuration

# The address to listen on
listen_addr = "127.0.0.1:3000"

# Largest request body handlers may buffer, in bytes
max_body_bytes = 2097152

# Chunks in flight between a connection and a handler
stream_capacity = 16

# Time in-flight connections get after SIGINT/SIGTERM
shutdown_timeout = "30s"

# Session cookie attributes
[session]
path = "/"
http_only = true
secure = false
same_site = "lax"
# max_age = "1h"

# Routes are matched in declaration order; the first match wins.
# Modules are resolved by name on first use.
[[mounts]]
prefix = "/"

[[mounts.routes]]
methods = ["GET"]
pattern = "/health"
module = "health"

[[mounts.routes]]
methods = ["GET"]
pattern = "/visits"
module = "session-counter"

[[mounts]]
prefix = "/api"

# No methods means every method. The wildcard also matches a bare /api/echo.
[[mounts.routes]]
pattern = "/echo/*rest"
module = "echo"
"#;

/// Load and validate configuration from a file.
/// Supports YAML, JSON, TOML and INI, picked by extension.
pub async fn load_config(config_path: &str) -> Result<ServerConfig> {
    let config = load_config_sync(config_path)?;
    ServerConfigValidator::validate(&config)
        .map_err(|e| eyre::eyre!("Invalid configuration in {config_path}: {e}"))?;
    Ok(config)
}

/// Load configuration synchronously, without validation
pub fn load_config_sync(config_path: &str) -> Result<ServerConfig> {
    let config_path = Path::new(config_path);

    let format = match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Yaml,
    };

    let settings = Config::builder()
        .add_source(File::new(
            config_path
                .to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?,
            format,
        ))
        .build()
        .with_context(|| format!("Failed to build config from {}", config_path.display()))?;

    let server_config: ServerConfig = settings.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize config from {}",
            config_path.display()
        )
    })?;

    Ok(server_config)
}

/// Load configuration without validation (used for validation command)
pub async fn load_config_unchecked(config_path: &str) -> Result<ServerConfig> {
    load_config_sync(config_path)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[tokio::test]
    async fn test_load_yaml_config() {
        let yaml_content = r#"
listen_addr: "127.0.0.1:4000"
shutdown_timeout: "5s"
session:
  secure: true
  max_age: "2h"
mounts:
  - prefix: "/api"
    routes:
      - methods: ["GET", "POST"]
        pattern: "/echo/:id"
        module: "echo"
      - pattern: "/health"
        module: "health"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", yaml_content).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:4000");
        assert_eq!(config.mounts.len(), 1);
        assert_eq!(config.mounts[0].routes[0].methods, vec!["GET", "POST"]);
        assert!(config.mounts[0].routes[1].methods.is_empty());
        assert!(config.session.secure);
        assert!(config.session.http_only);
        assert_eq!(
            config.server_settings().unwrap().cookie.max_age,
            Some(7200)
        );
    }

    #[tokio::test]
    async fn test_load_json_config() {
        let json_content = r#"
{
  "listen_addr": "127.0.0.1:3000",
  "max_body_bytes": 1024,
  "mounts": [
    {
      "prefix": "/",
      "routes": [
        { "methods": ["GET"], "pattern": "/visits", "module": "session-counter" }
      ]
    }
  ]
}
"#;

        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        write!(temp_file, "{}", json_content).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(config.max_body_bytes, 1024);
        assert_eq!(config.stream_capacity, 16);
        assert_eq!(config.mounts[0].routes[0].module, "session-counter");
    }

    #[tokio::test]
    async fn test_sample_config_matches_model() {
        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        write!(temp_file, "{}", SAMPLE_CONFIG).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(config, ServerConfig::sample());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_but_loads_unchecked() {
        let yaml_content = r#"
listen_addr: "not-an-address"
mounts:
  - prefix: "/"
    routes:
      - pattern: "no-leading-slash"
        module: "echo"
"#;

        let mut temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
        write!(temp_file, "{}", yaml_content).unwrap();
        let path = temp_file.path().to_str().unwrap();

        assert!(load_config(path).await.is_err());
        let unchecked = load_config_unchecked(path).await.unwrap();
        assert_eq!(unchecked.listen_addr, "not-an-address");
    }
}
