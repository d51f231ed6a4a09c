use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub assets: AssetConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port the default HTTP listener binds when no listener flag is given.
    pub http_port: u16,
    /// Value reported in the `Stub-Api-Version` response header. Defaults
    /// to the crate version.
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetConfig {
    /// Path to an OpenAPI document to serve instead of the embedded one.
    pub spec_path: Option<String>,
    /// Path to a fixture document to serve instead of the embedded one.
    pub fixtures_path: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            assets: AssetConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 12111,
            version: None,
        }
    }
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            spec_path: None,
            fixtures_path: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, an optional config file, and
    /// environment variables.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = config::Config::builder();

        config = config.add_source(config::Config::try_from(&AppConfig::default())?);

        config = config.add_source(config::File::with_name("config").required(false));

        config = config.add_source(
            config::Environment::with_prefix("STUB")
                .separator("__")
                .prefix_separator("_"),
        );

        let config = config.build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        Ok(app_config)
    }

    /// The version string advertised on every response.
    pub fn version(&self) -> String {
        self.server
            .version
            .clone()
            .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string())
    }
}
