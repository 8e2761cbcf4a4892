use std::time::Duration;

use opentelemetry::trace::TraceError;
use opentelemetry::{KeyValue, Value};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{BatchConfig, RandomIdGenerator, Sampler, Tracer};
use opentelemetry_sdk::{runtime, Resource};
use tokio::time::Instant;

use crate::config::Config;
use crate::error::ShutdownError;

const OTLP_EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

/// Handle to the installed span pipeline. Owned by the orchestrator;
/// release is a bounded flush of the global tracer provider.
pub struct TelemetryHandle {
    active: bool,
}

/// Install the OTLP batch span pipeline when an endpoint is configured,
/// otherwise hand back a disabled handle so shutdown stays a no-op.
pub fn setup(config: &Config) -> Result<TelemetryHandle, TraceError> {
    let Some(endpoint) = config.otel_url.as_deref() else {
        return Ok(TelemetryHandle { active: false });
    };

    init_tracer(endpoint, config.otel_sampling_rate, &config.otel_service_name)?;
    Ok(TelemetryHandle { active: true })
}

fn init_tracer(endpoint: &str, sampling_rate: f64, service_name: &str) -> Result<Tracer, TraceError> {
    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_trace_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
                    sampling_rate,
                ))))
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![KeyValue::new(
                    "service.name",
                    Value::from(service_name.to_string()),
                )])),
        )
        .with_batch_config(BatchConfig::default())
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .with_timeout(OTLP_EXPORT_TIMEOUT),
        )
        .install_batch(runtime::Tokio)
}

impl TelemetryHandle {
    pub fn active(&self) -> bool {
        self.active
    }

    /// Flush and shut down the tracer provider, bounded by the shared
    /// shutdown deadline. The provider flush blocks, so it runs on a
    /// blocking thread and is abandoned on overrun.
    pub async fn shutdown(self, deadline: Instant) -> Result<(), ShutdownError> {
        if !self.active {
            return Ok(());
        }

        let flush = tokio::task::spawn_blocking(opentelemetry::global::shutdown_tracer_provider);
        match tokio::time::timeout_at(deadline, flush).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(join_error)) => Err(ShutdownError::TelemetryShutdown(join_error)),
            Err(_elapsed) => Err(ShutdownError::TelemetryDeadline),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use envconfig::Envconfig;

    use super::*;

    #[tokio::test]
    async fn disabled_pipeline_shuts_down_instantly() {
        let config =
            Config::init_from_hashmap(&HashMap::new()).expect("default config should parse");
        assert_eq!(config.otel_url, None);

        let handle = setup(&config).expect("disabled setup cannot fail");
        assert!(!handle.active());

        let deadline = Instant::now() + Duration::from_millis(10);
        handle
            .shutdown(deadline)
            .await
            .expect("disabled shutdown is a no-op");
    }

    #[tokio::test]
    async fn active_handle_respects_the_deadline() {
        // No pipeline was installed, so flushing the global (noop)
        // provider returns quickly and well within the budget.
        let handle = TelemetryHandle { active: true };

        let deadline = Instant::now() + Duration::from_secs(2);
        handle
            .shutdown(deadline)
            .await
            .expect("noop provider flush should beat the deadline");
    }
}
