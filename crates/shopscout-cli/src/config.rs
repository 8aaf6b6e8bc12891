use shopscout_core::{Error, GenerationParams, Result};

fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_flag(key: &str, default: bool) -> bool {
    match env(key) {
        None => default,
        Some(v) => matches!(
            v.to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
    }
}

/// A named endpoint/model pairing. Endpoints and keys stay in the
/// environment; the profile only records which variables to read.
#[derive(Debug, Clone, Copy)]
pub struct ModelProfile {
    pub name: &'static str,
    pub endpoint_env: &'static str,
    pub api_key_env: &'static str,
    pub model: &'static str,
}

pub const PROFILES: &[ModelProfile] = &[
    ModelProfile {
        name: "openai-gpt4",
        endpoint_env: "SHOPSCOUT_OPENAI_ENDPOINT",
        api_key_env: "SHOPSCOUT_OPENAI_API_KEY",
        model: "chatgpt-4o-latest",
    },
    ModelProfile {
        name: "mistral-7b-instruct",
        endpoint_env: "SHOPSCOUT_MISTRAL_7B_INSTRUCT_ENDPOINT",
        api_key_env: "SHOPSCOUT_RUNPOD_API_KEY",
        model: "mistralai/Mistral-7B-Instruct-v0.3",
    },
    ModelProfile {
        name: "mistral-7b",
        endpoint_env: "SHOPSCOUT_MISTRAL_7B_ENDPOINT",
        api_key_env: "SHOPSCOUT_RUNPOD_API_KEY",
        model: "mistralai/Mistral-7B-v0.1",
    },
];

pub fn profile(name: &str) -> Result<&'static ModelProfile> {
    PROFILES
        .iter()
        .find(|p| p.name == name)
        .ok_or_else(|| Error::NotConfigured(format!("unknown model profile: {name}")))
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub generation: GenerationParams,
    pub enable_system_prompt: bool,
    pub enable_product_context: bool,
}

impl AppConfig {
    /// Resolve a runnable configuration from a profile plus CLI overrides.
    ///
    /// Model precedence: explicit override, then SHOPSCOUT_OPENAI_COMPAT_MODEL,
    /// then the profile default. The two feature switches default to on.
    pub fn resolve(
        profile_name: &str,
        model_override: Option<String>,
        temperature: f64,
        max_tokens: u64,
    ) -> Result<Self> {
        let profile = profile(profile_name)?;
        let base_url = env(profile.endpoint_env).ok_or_else(|| {
            Error::NotConfigured(format!(
                "profile {} requires {}",
                profile.name, profile.endpoint_env
            ))
        })?;
        let api_key = env(profile.api_key_env);

        let model = model_override
            .or_else(|| env("SHOPSCOUT_OPENAI_COMPAT_MODEL"))
            .unwrap_or_else(|| profile.model.to_string());

        Ok(Self {
            base_url,
            api_key,
            generation: GenerationParams {
                model,
                temperature,
                max_tokens,
            },
            enable_system_prompt: env_flag("SHOPSCOUT_ENABLE_SYSTEM_PROMPT", true),
            enable_product_context: env_flag("SHOPSCOUT_ENABLE_PRODUCT_CONTEXT", true),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Env vars are process-global; serialize tests that mutate them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct EnvGuard {
        k: &'static str,
        prev: Option<String>,
    }

    impl EnvGuard {
        fn set(k: &'static str, v: &str) -> Self {
            let prev = std::env::var(k).ok();
            std::env::set_var(k, v);
            Self { k, prev }
        }

        fn unset(k: &'static str) -> Self {
            let prev = std::env::var(k).ok();
            std::env::remove_var(k);
            Self { k, prev }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(v) = self.prev.take() {
                std::env::set_var(self.k, v);
            } else {
                std::env::remove_var(self.k);
            }
        }
    }

    #[test]
    fn unknown_profile_is_rejected() {
        let err = profile("gpt-12").unwrap_err();
        assert!(err.to_string().contains("unknown model profile"));
    }

    #[test]
    fn resolve_reads_profile_endpoint_and_key() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _g1 = EnvGuard::set("SHOPSCOUT_OPENAI_ENDPOINT", "https://api.example.com");
        let _g2 = EnvGuard::set("SHOPSCOUT_OPENAI_API_KEY", "sk-test");
        let _g3 = EnvGuard::unset("SHOPSCOUT_OPENAI_COMPAT_MODEL");

        let cfg = AppConfig::resolve("openai-gpt4", None, 0.3, 500).unwrap();
        assert_eq!(cfg.base_url, "https://api.example.com");
        assert_eq!(cfg.api_key.as_deref(), Some("sk-test"));
        assert_eq!(cfg.generation.model, "chatgpt-4o-latest");
        assert!(cfg.enable_system_prompt);
        assert!(cfg.enable_product_context);
    }

    #[test]
    fn resolve_fails_without_endpoint() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _g = EnvGuard::unset("SHOPSCOUT_MISTRAL_7B_ENDPOINT");

        let err = AppConfig::resolve("mistral-7b", None, 0.3, 500).unwrap_err();
        assert!(err.to_string().contains("SHOPSCOUT_MISTRAL_7B_ENDPOINT"));
    }

    #[test]
    fn model_override_beats_env_and_profile() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _g1 = EnvGuard::set("SHOPSCOUT_OPENAI_ENDPOINT", "https://api.example.com");
        let _g2 = EnvGuard::set("SHOPSCOUT_OPENAI_COMPAT_MODEL", "from-env");

        let cfg =
            AppConfig::resolve("openai-gpt4", Some("from-flag".to_string()), 0.3, 500).unwrap();
        assert_eq!(cfg.generation.model, "from-flag");

        let cfg = AppConfig::resolve("openai-gpt4", None, 0.3, 500).unwrap();
        assert_eq!(cfg.generation.model, "from-env");
    }

    #[test]
    fn feature_switches_parse_common_spellings() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _g1 = EnvGuard::set("SHOPSCOUT_OPENAI_ENDPOINT", "https://api.example.com");

        let _g2 = EnvGuard::set("SHOPSCOUT_ENABLE_PRODUCT_CONTEXT", "off");
        let cfg = AppConfig::resolve("openai-gpt4", None, 0.3, 500).unwrap();
        assert!(!cfg.enable_product_context);

        let _g3 = EnvGuard::set("SHOPSCOUT_ENABLE_PRODUCT_CONTEXT", "YES");
        let cfg = AppConfig::resolve("openai-gpt4", None, 0.3, 500).unwrap();
        assert!(cfg.enable_product_context);
    }
}
