//! Built-in presets for common OpenAI-compatible upstream providers.
//!
//! Each preset defines the base URL and the conventional environment
//! variable for the API key, so a config can name a provider instead of
//! spelling out the endpoint.

#[derive(Debug, Clone)]
pub struct ProviderPreset {
    pub name: &'static str,
    pub base_url: &'static str,
    pub default_api_key_env: &'static str,
}

const PRESETS: &[ProviderPreset] = &[
    ProviderPreset {
        name: "openai",
        base_url: "https://api.openai.com/v1",
        default_api_key_env: "OPENAI_API_KEY",
    },
    ProviderPreset {
        name: "openrouter",
        base_url: "https://openrouter.ai/api/v1",
        default_api_key_env: "OPENROUTER_API_KEY",
    },
    ProviderPreset {
        name: "fireworks",
        base_url: "https://api.fireworks.ai/inference/v1",
        default_api_key_env: "FIREWORKS_API_KEY",
    },
    ProviderPreset {
        name: "grok",
        base_url: "https://api.x.ai/v1",
        default_api_key_env: "XAI_API_KEY",
    },
    ProviderPreset {
        name: "together",
        base_url: "https://api.together.xyz/v1",
        default_api_key_env: "TOGETHER_API_KEY",
    },
    ProviderPreset {
        name: "groq",
        base_url: "https://api.groq.com/openai/v1",
        default_api_key_env: "GROQ_API_KEY",
    },
    ProviderPreset {
        name: "deepseek",
        base_url: "https://api.deepseek.com/v1",
        default_api_key_env: "DEEPSEEK_API_KEY",
    },
];

impl ProviderPreset {
    #[must_use]
    pub fn from_name(name: &str) -> Option<&'static ProviderPreset> {
        PRESETS.iter().find(|p| p.name == name.to_lowercase())
    }

    #[must_use]
    pub fn all() -> &'static [ProviderPreset] {
        PRESETS
    }

    #[must_use]
    pub fn names() -> Vec<&'static str> {
        PRESETS.iter().map(|p| p.name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_providers() {
        assert!(ProviderPreset::from_name("openai").is_some());
        assert!(ProviderPreset::from_name("fireworks").is_some());
        assert!(ProviderPreset::from_name("OpenRouter").is_some()); // case-insensitive
        assert!(ProviderPreset::from_name("unknown_provider").is_none());
    }

    #[test]
    fn test_every_preset_has_chat_completions_base() {
        for preset in ProviderPreset::all() {
            assert!(
                preset.base_url.starts_with("https://"),
                "Provider {} should have an https base URL",
                preset.name
            );
            assert!(!preset.default_api_key_env.is_empty());
        }
    }
}
