use super::Config;
use anyhow::{Context, Result};
use directories::UserDirs;
use std::fs;
use std::path::Path;

impl Config {
    pub fn load_or_init() -> Result<Self> {
        let home = UserDirs::new()
            .map(|u| u.home_dir().to_path_buf())
            .context("Could not find home directory")?;
        Self::load_or_init_in(&home.join(".axgate"))
    }

    /// Loads `<dir>/config.toml`, writing defaults on first run, then applies
    /// env overrides and validates.
    pub fn load_or_init_in(data_dir: &Path) -> Result<Self> {
        let config_path = data_dir.join("config.toml");

        if !data_dir.exists() {
            fs::create_dir_all(data_dir).context("Failed to create .axgate directory")?;
        }

        let mut config = if config_path.exists() {
            let contents =
                fs::read_to_string(&config_path).context("Failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            config.config_path.clone_from(&config_path);
            config.data_dir = data_dir.to_path_buf();
            config
        } else {
            let config = Self {
                config_path: config_path.clone(),
                data_dir: data_dir.to_path_buf(),
                ..Self::default()
            };
            config.save()?;
            config
        };

        config.apply_env_overrides();
        config.validate()?;

        let workspace = config.workspace_dir();
        if !workspace.exists() {
            fs::create_dir_all(&workspace).context("Failed to create workspace directory")?;
        }
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&self.config_path, toml_str).context("Failed to write config file")?;
        Ok(())
    }
}
