use anyhow::{Context, Result, anyhow};
use dotenvy::dotenv;
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::fs;
use url::Url;

pub const KEYRING_API_KEY_SERVICE: &str = "sitepush-indexnow-key";
pub const KEYRING_PASSWORD_SERVICE: &str = "sitepush-sftp-password";
pub const KEYRING_USER: &str = "sitepush";

pub const DEFAULT_INDEXNOW_ENDPOINT: &str = "https://api.indexnow.org/indexnow";

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    pub indexnow_endpoint: Option<Url>,
}

#[derive(Debug, Deserialize, Default)]
struct ConfigEnv {
    indexnow_endpoint: Option<Url>,
    indexnow_key: Option<String>,
    sftp_password: Option<String>,
}

pub struct Config {
    pub indexnow_endpoint: Url,
    indexnow_key: Option<String>,
    sftp_password: Option<String>,
}

impl Config {
    /// The IndexNow key: `INDEXNOW_KEY` if set, otherwise the OS keyring.
    pub fn indexnow_key(&self) -> Result<String> {
        if let Some(key) = &self.indexnow_key {
            return Ok(key.clone());
        }
        let entry = Entry::new(KEYRING_API_KEY_SERVICE, KEYRING_USER)?;
        let key = entry.get_secret().context(
            "IndexNow key not specified via INDEXNOW_KEY nor present in OS keyring \
             (run `sitepush set-api-key` or `sitepush gen-key`)",
        )?;
        Ok(String::from_utf8(key)?)
    }

    /// The SFTP password: `SFTP_PASSWORD` if set, otherwise the OS keyring.
    pub fn sftp_password(&self) -> Result<String> {
        if let Some(password) = &self.sftp_password {
            return Ok(password.clone());
        }
        let entry = Entry::new(KEYRING_PASSWORD_SERVICE, KEYRING_USER)?;
        let password = entry.get_secret().context(
            "SFTP password not specified via SFTP_PASSWORD nor present in OS keyring \
             (run `sitepush set-password`)",
        )?;
        Ok(String::from_utf8(password)?)
    }
}

fn merge_config(base: ConfigFile, override_config: ConfigEnv) -> Config {
    let indexnow_endpoint = override_config
        .indexnow_endpoint
        .or(base.indexnow_endpoint)
        .unwrap_or_else(|| {
            Url::parse(DEFAULT_INDEXNOW_ENDPOINT).expect("Default endpoint must parse")
        });

    Config {
        indexnow_endpoint,
        indexnow_key: override_config.indexnow_key,
        sftp_password: override_config.sftp_password,
    }
}

fn config_path() -> Result<std::path::PathBuf> {
    let project_dirs = directories::ProjectDirs::from("com", "sitepush", "sitepush")
        .ok_or(anyhow!("Unable to determine home directory"))?;
    Ok(project_dirs.config_dir().join("config.toml"))
}

pub fn read_config() -> Result<Config> {
    let _ = dotenv();
    let env_config = envy::from_env::<ConfigEnv>().unwrap_or_default();

    let file_config = if let Ok(config) = fs::read_to_string(config_path()?) {
        toml::from_str(&config)?
    } else {
        ConfigFile::default()
    };

    Ok(merge_config(file_config, env_config))
}

pub fn write_config(config_file: ConfigFile) -> Result<()> {
    let path = config_path()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create config directory")?;
    }
    let content = toml::to_string_pretty(&config_file)?;
    fs::write(&path, content).context("Failed to write config.toml")?;
    Ok(())
}

pub fn set_api_key_keyring(api_key: String) -> Result<()> {
    let entry = Entry::new(KEYRING_API_KEY_SERVICE, KEYRING_USER)?;
    entry.set_secret(api_key.as_bytes())?;
    println!("IndexNow key stored for use with sitepush");
    Ok(())
}

pub fn set_sftp_password_keyring(password: String) -> Result<()> {
    let entry = Entry::new(KEYRING_PASSWORD_SERVICE, KEYRING_USER)?;
    entry.set_secret(password.as_bytes())?;
    println!("SFTP password stored for use with sitepush");
    Ok(())
}
