//! Coprocessor provisioning file

use std::path::Path;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use purse_core::sha::reformat_for_ds1961s;
use purse_core::types::hex_vec;
use purse_core::{ServiceInfo, TokenAddress};

use crate::emulator::EmulatedCoprocessor;
use crate::error::Result;

/// Everything needed to stand up an emulated coprocessor
///
/// Binary fields are hex strings in the TOML file. Secret material is wiped
/// when the config is dropped.
#[derive(Clone, Serialize, Deserialize)]
pub struct CoprocessorConfig {
    /// 1-Wire address of the coprocessor
    pub address: TokenAddress,

    /// Material installed as the signing secret
    #[serde(with = "hex_vec")]
    pub signing_secret: Vec<u8>,

    /// Material installed as the authentication master secret
    #[serde(with = "hex_vec")]
    pub auth_secret: Vec<u8>,

    /// Mask the authentication secret so DS1961S tokens can be provisioned
    #[serde(default)]
    pub reformat_for_ds1961s: bool,

    pub service: ServiceInfo,
}

impl std::fmt::Debug for CoprocessorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoprocessorConfig")
            .field("address", &self.address)
            .field("signing_secret", &"[REDACTED]")
            .field("auth_secret", &"[REDACTED]")
            .field("reformat_for_ds1961s", &self.reformat_for_ds1961s)
            .field("service", &self.service)
            .finish()
    }
}

impl Drop for CoprocessorConfig {
    fn drop(&mut self) {
        self.signing_secret.zeroize();
        self.auth_secret.zeroize();
    }
}

impl CoprocessorConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.service.validate()?;
        Ok(config)
    }

    /// Authentication material as it will be installed
    pub fn effective_auth_secret(&self) -> Vec<u8> {
        if self.reformat_for_ds1961s {
            reformat_for_ds1961s(&self.auth_secret)
        } else {
            self.auth_secret.clone()
        }
    }

    pub fn build_emulator(&self, rng: impl RngCore + Send + 'static) -> Result<EmulatedCoprocessor> {
        let mut auth = self.effective_auth_secret();
        let emulator = EmulatedCoprocessor::new(
            self.service.clone(),
            self.address,
            &self.signing_secret,
            &auth,
            rng,
        );
        auth.zeroize();
        emulator
    }

    pub fn build_emulator_with_entropy(&self) -> Result<EmulatedCoprocessor> {
        let mut auth = self.effective_auth_secret();
        let emulator = EmulatedCoprocessor::with_entropy(
            self.service.clone(),
            self.address,
            &self.signing_secret,
            &auth,
        );
        auth.zeroize();
        emulator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoprError;
    use purse_core::CoprocessorIdentity;
    use rand_chacha::rand_core::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn config() -> CoprocessorConfig {
        CoprocessorConfig {
            address: TokenAddress::new([0x18, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07]),
            signing_secret: b"signing".to_vec(),
            auth_secret: b"authentication".to_vec(),
            reformat_for_ds1961s: false,
            service: ServiceInfo::default(),
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("copr.toml");
        config().save(&path).unwrap();

        let loaded = CoprocessorConfig::load(&path).unwrap();
        assert_eq!(loaded.address, config().address);
        assert_eq!(loaded.signing_secret, b"signing");
        assert_eq!(loaded.service, ServiceInfo::default());
    }

    #[test]
    fn test_parse_hex_fields() {
        let text = r#"
            address = "1801020304050607"
            signing_secret = "00112233"
            auth_secret = "44556677"

            [service]
            filename = "44534c4d"
            extension = 102
            sign_page = 0
            auth_page = 7
            workspace_page = 9
            version = 1
            date = "0101007e"
            bind_data = "0000000000000000000000000000000000000000000000000000000000000000"
            bind_code = "00000000000000"
            signing_challenge = "030a0f"
            provider_name = "test"
            initial_signature = "0000000000000000000000000000000000000000"
            encryption_code = 0
            ds1961s_compatible = false
        "#;
        let config = CoprocessorConfig::from_toml_str(text).unwrap();
        assert_eq!(config.signing_secret, vec![0x00, 0x11, 0x22, 0x33]);
        assert_eq!(config.service.sign_page, 0);
        assert!(config.service.aux_data.is_empty());
        assert!(!config.reformat_for_ds1961s);
    }

    #[test]
    fn test_invalid_sign_page_rejected() {
        let mut bad = config();
        bad.service.sign_page = 3;
        let text = toml::to_string(&bad).unwrap();
        assert!(matches!(
            CoprocessorConfig::from_toml_str(&text),
            Err(CoprError::Core(_))
        ));
    }

    #[test]
    fn test_reformat_sets_compatibility() {
        let mut cfg = config();
        let plain = cfg.build_emulator(ChaCha20Rng::seed_from_u64(1)).unwrap();
        assert!(!plain.service().ds1961s_compatible);

        cfg.reformat_for_ds1961s = true;
        let compatible = cfg.build_emulator(ChaCha20Rng::seed_from_u64(1)).unwrap();
        assert!(compatible.service().ds1961s_compatible);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let rendered = format!("{:?}", config());
        assert!(!rendered.contains("signing\""));
        assert!(rendered.contains("[REDACTED]"));
    }
}
