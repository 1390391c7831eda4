pub mod agent_engine;
pub mod config;
pub mod device;
pub mod errors;
pub mod executor;
pub mod gateway;
pub mod llm;
pub mod suite;
pub mod vision;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

use crate::agent_engine::engine::Orchestrator;
use crate::config::AppConfig;
use crate::device::DeviceChannel;
use crate::errors::QaResult;
use crate::gateway::{ProviderGateway, RateLimiter};
use crate::llm::registry::ProviderRegistry;
use crate::vision::ScreenVision;

/// Installs the global `tracing` subscriber. `RUST_LOG` wins over `default_filter`.
pub fn init_tracing(default_filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .try_init();
}

/// Wires gateway, vision and orchestrator for one device from the loaded config.
/// `limiter` should be shared by every orchestrator in the process.
pub fn build_orchestrator(
    config: &AppConfig,
    device: Arc<dyn DeviceChannel>,
    limiter: Arc<RateLimiter>,
) -> QaResult<Orchestrator> {
    let registry = ProviderRegistry::from_config(config);
    let gateway = Arc::new(ProviderGateway::from_registry(&registry, &config.gateway, limiter)?);
    tracing::info!(
        chain = ?config.llm.chain,
        active = gateway.active_provider().unwrap_or("<none>"),
        "provider gateway ready"
    );
    let vision = Arc::new(ScreenVision::new(gateway.clone(), config.vision.clone()));
    Ok(Orchestrator::new(gateway, device, vision, config.agent.clone()).with_output(config.output.clone()))
}
