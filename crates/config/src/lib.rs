use anyhow::{Context, Result};
use gateway::ChannelFlags;
use serde::{Deserialize, Serialize};

const APP_NAME: &str = "gre-dispatch";
const KEYCHAIN_SERVICE: &str = "gre.dispatch.credentials";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub company: CompanyConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CompanyConfig {
    /// Taxpayer registration number.
    pub number: String,
    pub sol_username: String,
}

/// Gateway selection flags plus endpoints. The selection fields mirror the
/// tenant record; they are re-read on every send/poll so a change takes
/// effect on the next call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub pse_send_enabled: bool,
    pub pse_provider_id: Option<u32>,
    #[serde(default)]
    pub soap_send_id: String,
    pub authority_url: Option<String>,
    pub pse_base_url: Option<String>,
    pub ose_base_url: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            pse_send_enabled: false,
            pse_provider_id: None,
            soap_send_id: "01".to_string(),
            authority_url: None,
            pse_base_url: None,
            ose_base_url: None,
        }
    }
}

impl ProviderConfig {
    pub fn channel_flags(&self) -> ChannelFlags {
        ChannelFlags {
            pse_send_enabled: self.pse_send_enabled,
            pse_provider_id: self.pse_provider_id,
            soap_send_id: self.soap_send_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of the document store (signed XMLs, CDRs).
    pub documents_dir: String,
    /// sled database holding the dispatch rows.
    pub database_dir: String,
    /// Public base URL the download links are built against.
    pub links_base_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            documents_dir: "documents".to_string(),
            database_dir: ".gre_dispatch".to_string(),
            links_base_url: "http://localhost:8080".to_string(),
        }
    }
}

pub fn load() -> Result<AppConfig> {
    let cfg: AppConfig = confy::load(APP_NAME, None).context("Failed to load app config")?;
    Ok(cfg)
}

pub fn store(cfg: &AppConfig) -> Result<()> {
    confy::store(APP_NAME, None, cfg).context("Failed to store app config")?;
    Ok(())
}

/// Store a secret (SOL password, gateway API keys) in the OS keychain
pub fn store_secret(key: &str, value: &str) -> Result<()> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, key)?;
    entry.set_password(value)?;
    Ok(())
}

/// Retrieve a secret from the OS keychain
pub fn get_secret(key: &str) -> Result<String> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, key)?;
    let password = entry.get_password()?;
    Ok(password)
}

/// Delete a secret from the OS keychain
pub fn delete_secret(key: &str) -> Result<()> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, key)?;
    entry.delete_password()?;
    Ok(())
}
