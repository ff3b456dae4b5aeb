use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::Path;
use zeroize::Zeroize;

type HmacSha256 = Hmac<Sha256>;

const KEY_LEN: usize = 32;

/// Device-bound signing identity. The key never leaves the process and is
/// wiped on drop.
pub struct DeviceSigner {
    device_id: String,
    key: [u8; KEY_LEN],
}

impl DeviceSigner {
    pub fn new(host: &str, key: [u8; KEY_LEN]) -> Self {
        let fingerprint = hex::encode(Sha256::digest(key));
        Self {
            device_id: format!("{host}:{}", &fingerprint[..12]),
            key,
        }
    }

    /// Load the hex key file at `path`, creating a fresh random key with
    /// owner-only permissions when it does not exist yet.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        let mut key = [0u8; KEY_LEN];
        if path.exists() {
            let hex_key = fs::read_to_string(path).context("failed to read device key file")?;
            let mut bytes = hex::decode(hex_key.trim()).context("invalid hex in device key file")?;
            if bytes.len() != KEY_LEN {
                bytes.zeroize();
                anyhow::bail!("device key file has invalid length (expected {KEY_LEN} bytes)");
            }
            key.copy_from_slice(&bytes);
            bytes.zeroize();
        } else {
            rand::rng().fill_bytes(&mut key);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).context("failed to create device key directory")?;
            }
            write_new_key_file(path, &key)?;
            tracing::info!(path = %path.display(), "generated new device signing key");
        }

        let signer = Self::new(&local_hostname(), key);
        key.zeroize();
        Ok(signer)
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Hex HMAC-SHA256 over `message`.
    pub fn sign(&self, message: &[u8]) -> Result<String> {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).context("initialise device signing key")?;
        mac.update(message);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Constant-time check of a hex signature.
    pub fn verify(&self, message: &[u8], signature_hex: &str) -> bool {
        let Ok(expected) = hex::decode(signature_hex) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.key) else {
            return false;
        };
        mac.update(message);
        mac.verify_slice(&expected).is_ok()
    }
}

impl Drop for DeviceSigner {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl std::fmt::Debug for DeviceSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSigner")
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

fn local_hostname() -> String {
    hostname::get().map_or_else(|_| "unknown".into(), |h| h.to_string_lossy().into_owned())
}

fn write_new_key_file(path: &Path, key: &[u8]) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(path)
            .context("failed to create device key file")?;
        file.write_all(hex::encode(key).as_bytes())
            .context("failed to write device key file")?;
        file.sync_all().context("failed to sync device key file")?;
    }

    #[cfg(not(unix))]
    {
        let mut file = fs::File::create(path).context("failed to create device key file")?;
        file.write_all(hex::encode(key).as_bytes())
            .context("failed to write device key file")?;
    }

    Ok(())
}
