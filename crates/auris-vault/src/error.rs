use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
}

impl VaultError {
    pub fn code(&self) -> &'static str {
        match self {
            VaultError::EncryptionFailed(_) => "VAULT_ENCRYPTION_FAILED",
            VaultError::DecryptionFailed(_) => "VAULT_DECRYPTION_FAILED",
        }
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;
