use std::sync::Arc;

use parley_agents::{AnthropicAdapter, OpenAiAdapter, ProviderRegistry};
use parley_config::ProvidersConfig;

/// Adapters for every supported provider, pointed at the configured endpoints.
pub fn build_provider_registry(config: &ProvidersConfig) -> ProviderRegistry {
    let anthropic = AnthropicAdapter::new(Some(config.anthropic_base_url.clone()))
        .with_version(config.anthropic_version.clone());

    ProviderRegistry::new()
        .with_adapter(Arc::new(OpenAiAdapter::new(Some(config.openai_base_url.clone()))))
        .with_adapter(Arc::new(anthropic))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_agents::{ProviderAdapter, ProviderKind};

    #[test]
    fn registers_both_providers() {
        let registry = build_provider_registry(&ProvidersConfig::default());
        let openai = registry.get(ProviderKind::OpenAi).unwrap();
        assert_eq!(openai.provider(), ProviderKind::OpenAi);
        let anthropic = registry.get(ProviderKind::Anthropic).unwrap();
        assert_eq!(anthropic.provider(), ProviderKind::Anthropic);
    }
}
