use std::sync::Arc;
use tracing::info;

use crate::error::{ClientError, ClientResult};
use crate::models::AiSettings;
use crate::storage::{self, KvStore, SETTINGS_KEY};

pub const TEMPERATURE_RANGE: (f32, f32) = (0.0, 2.0);
pub const MAX_TOKENS_RANGE: (u32, u32) = (1, 4096);

impl AiSettings {
    pub fn validate(&self) -> ClientResult<()> {
        if self.api_key.trim().is_empty() {
            return Err(ClientError::Validation("API key is required".to_string()));
        }
        if self.model_name.trim().is_empty() {
            return Err(ClientError::Validation("model name is required".to_string()));
        }
        let (t_min, t_max) = TEMPERATURE_RANGE;
        if !self.temperature.is_finite() || self.temperature < t_min || self.temperature > t_max {
            return Err(ClientError::Validation(format!(
                "temperature must be between {t_min} and {t_max}"
            )));
        }
        let (m_min, m_max) = MAX_TOKENS_RANGE;
        if self.max_tokens < m_min || self.max_tokens > m_max {
            return Err(ClientError::Validation(format!(
                "max tokens must be between {m_min} and {m_max}"
            )));
        }
        Ok(())
    }

    pub fn masked_api_key(&self) -> String {
        storage::mask_api_key(&self.api_key)
    }
}

#[derive(Clone)]
pub struct SettingsService {
    store: Arc<dyn KvStore>,
}

impl SettingsService {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub fn load(&self) -> ClientResult<AiSettings> {
        Ok(storage::read_json(self.store.as_ref(), SETTINGS_KEY)?.unwrap_or_default())
    }

    /// Invalid settings are rejected before anything is written.
    pub fn save(&self, settings: &AiSettings) -> ClientResult<()> {
        settings.validate()?;
        storage::write_json(self.store.as_ref(), SETTINGS_KEY, settings)?;
        info!(
            sdk = %settings.sdk,
            model = %settings.model_name,
            api_key = %settings.masked_api_key(),
            "saved AI settings"
        );
        Ok(())
    }

    pub fn reset(&self) -> ClientResult<AiSettings> {
        self.store.remove(SETTINGS_KEY)?;
        Ok(AiSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn valid() -> AiSettings {
        AiSettings {
            api_key: "sk-test-0000".into(),
            ..AiSettings::default()
        }
    }

    #[test]
    fn accepts_range_edges() {
        let mut settings = valid();
        settings.temperature = 0.0;
        settings.max_tokens = 1;
        assert!(settings.validate().is_ok());
        settings.temperature = 2.0;
        settings.max_tokens = 4096;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_values() {
        for temperature in [-0.1, 2.01, f32::NAN] {
            let settings = AiSettings { temperature, ..valid() };
            assert!(matches!(settings.validate(), Err(ClientError::Validation(_))));
        }
        for max_tokens in [0, 4097] {
            let settings = AiSettings { max_tokens, ..valid() };
            assert!(matches!(settings.validate(), Err(ClientError::Validation(_))));
        }
    }

    #[test]
    fn rejects_blank_key_and_model() {
        assert!(AiSettings::default().validate().is_err());
        let settings = AiSettings { model_name: "  ".into(), ..valid() };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn invalid_settings_never_reach_the_store() {
        let store = Arc::new(MemoryStore::new());
        let service = SettingsService::new(store.clone());

        let bad = AiSettings { temperature: 3.0, ..valid() };
        assert!(service.save(&bad).is_err());
        assert!(store.get(SETTINGS_KEY).unwrap().is_none());

        service.save(&valid()).unwrap();
        assert_eq!(service.load().unwrap(), valid());
    }

    #[test]
    fn reset_restores_defaults() {
        let store = Arc::new(MemoryStore::new());
        let service = SettingsService::new(store);
        service.save(&valid()).unwrap();
        assert_eq!(service.reset().unwrap(), AiSettings::default());
        assert_eq!(service.load().unwrap(), AiSettings::default());
    }
}
