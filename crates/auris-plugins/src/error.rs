use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin type '{0}' is not registered")]
    NotRegistered(String),

    #[error("plugin config invalid: {0}")]
    InvalidConfig(String),

    #[error("plugin config decryption failed: {0}")]
    Vault(#[from] auris_vault::VaultError),

    #[error("plugin lifecycle error: {0}")]
    Lifecycle(String),
}

impl PluginError {
    pub fn code(&self) -> &'static str {
        match self {
            PluginError::NotRegistered(_) => "PLUGIN_NOT_REGISTERED",
            PluginError::InvalidConfig(_) => "PLUGIN_INVALID_CONFIG",
            PluginError::Vault(_) => "PLUGIN_VAULT_ERROR",
            PluginError::Lifecycle(_) => "PLUGIN_LIFECYCLE_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, PluginError>;
