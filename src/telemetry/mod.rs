//! # Módulo de Telemetria OpenTelemetry
//!
//! Integra o runner com OpenTelemetry para observabilidade
//! distribuída: cada execução de plano vira uma árvore de spans que dá
//! para inspecionar em Jaeger, Grafana Tempo ou similar.
//!
//! ## Para todos entenderem:
//!
//! Um reparo de laboratório pode levar minutos e passar por dezenas de
//! actions. Telemetria é a gravação dessa história: quando cada action
//! começou, quanto demorou, onde falhou. Sem isso, depurar um reparo
//! que aconteceu de madrugada é adivinhação.
//!
//! ## O que identifica uma execução
//!
//! Além de `service.name`, cada span desta execução carrega atributos
//! de recurso próprios do runner, os mesmos campos que os eventos de
//! métrica usam:
//!
//! | Atributo              | Origem                       |
//! |-----------------------|------------------------------|
//! | `runner.execution_id` | UUID da invocação da CLI     |
//! | `runner.dut`          | recurso alvo (nome do DUT)   |
//!
//! Com eles dá para filtrar no backend todos os spans de um reparo
//! específico, ou todos os reparos de um DUT problemático.
//!
//! ## Configuração via variáveis de ambiente:
//!
//! - `OTEL_SERVICE_NAME`: nome do serviço nos traces
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: URL do coletor OTLP (gRPC)
//! - `OTEL_TRACES_SAMPLER_ARG`: taxa de sampling (0.0-1.0)
//!
//! Sem endpoint configurado, o runner cai para logging de console via
//! `tracing-subscriber`, filtrado por `RUST_LOG`.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::runtime::Tokio;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, Tracer, TracerProvider};
use opentelemetry_sdk::{trace as sdktrace, Resource};
use tracing::Level;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

// ============================================================================
// CONFIGURAÇÃO
// ============================================================================

/// Configuração do sistema de telemetria.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Nome do serviço para identificação nos traces.
    pub service_name: String,

    /// Endpoint OTLP para envio de traces (ex: "http://localhost:4317").
    /// Se None, apenas loga para console.
    pub otlp_endpoint: Option<String>,

    /// Taxa de sampling (0.0 a 1.0).
    pub sampling_ratio: f64,

    /// Se deve habilitar logging para console.
    pub enable_console_logging: bool,

    /// Nível de log mínimo.
    pub log_level: Level,

    /// UUID da execução, anexado como `runner.execution_id`.
    pub execution_id: Option<String>,

    /// Recurso alvo da execução, anexado como `runner.dut`.
    pub resource_name: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "recovery-runner".to_string(),
            otlp_endpoint: None,
            sampling_ratio: 1.0,
            enable_console_logging: true,
            log_level: Level::INFO,
            execution_id: None,
            resource_name: None,
        }
    }
}

impl TelemetryConfig {
    /// Cria configuração a partir de variáveis de ambiente.
    ///
    /// Os nomes seguem a convenção `OTEL_*` padrão, então o mesmo
    /// deploy que configura o coletor para outros serviços também
    /// configura o runner. Valores ausentes caem nos padrões; a taxa
    /// de sampling é limitada ao intervalo [0.0, 1.0].
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(name) = std::env::var("OTEL_SERVICE_NAME") {
            config.service_name = name;
        }
        if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
            config.otlp_endpoint = Some(endpoint);
        }
        if let Ok(ratio) = std::env::var("OTEL_TRACES_SAMPLER_ARG") {
            if let Ok(parsed) = ratio.parse::<f64>() {
                config.sampling_ratio = parsed.clamp(0.0, 1.0);
            }
        }

        config
    }

    /// Atributos de recurso desta execução: o serviço mais os campos
    /// que identificam o reparo (execution id e DUT), quando
    /// conhecidos.
    fn execution_resource(&self) -> Resource {
        let mut attributes = vec![KeyValue::new(
            "service.name",
            self.service_name.clone(),
        )];
        if let Some(execution_id) = &self.execution_id {
            attributes.push(KeyValue::new("runner.execution_id", execution_id.clone()));
        }
        if let Some(resource_name) = &self.resource_name {
            attributes.push(KeyValue::new("runner.dut", resource_name.clone()));
        }
        Resource::new(attributes)
    }
}

// ============================================================================
// INICIALIZAÇÃO
// ============================================================================

/// Inicializa logging estruturado e, se configurado, o exporter OTLP.
///
/// O subscriber é montado por composição de camadas opcionais: filtro
/// de nível sempre, camada OTEL quando há endpoint, camada de console
/// quando habilitada.
///
/// ## Retorno:
/// - `Ok(Some(Tracer))`: OTLP configurado, tracer retornado
/// - `Ok(None)`: apenas console logging (sem OTLP)
/// - `Err`: erro ao montar a infraestrutura
pub fn init_telemetry(config: TelemetryConfig) -> anyhow::Result<Option<Tracer>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    let tracer = match &config.otlp_endpoint {
        Some(endpoint) => Some(init_otlp_tracer(&config, endpoint)?),
        None => None,
    };

    let otel_layer = tracer.clone().map(OpenTelemetryLayer::new);
    let console_layer = config
        .enable_console_logging
        .then(|| tracing_subscriber::fmt::layer().compact());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_layer)
        .with(console_layer)
        .init();

    match (&config.otlp_endpoint, &config.resource_name) {
        (Some(endpoint), resource_name) => tracing::info!(
            service_name = %config.service_name,
            endpoint = %endpoint,
            sampling_ratio = config.sampling_ratio,
            dut = resource_name.as_deref().unwrap_or(""),
            "Telemetria OTEL inicializada"
        ),
        (None, _) => tracing::info!("Telemetria inicializada (apenas console, sem OTLP)"),
    }

    Ok(tracer)
}

// ============================================================================
// TRACER OTLP
// ============================================================================

/// Decide o sampler a partir da taxa configurada.
fn sampler_for(ratio: f64) -> Sampler {
    if ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        // Baseado no trace ID: spans da mesma execução são coletados
        // juntos.
        Sampler::TraceIdRatioBased(ratio)
    }
}

/// Monta o tracer com exporter OTLP em lote sobre gRPC, carregando os
/// atributos de recurso da execução.
fn init_otlp_tracer(config: &TelemetryConfig, endpoint: &str) -> anyhow::Result<Tracer> {
    let tracer_provider = TracerProvider::builder()
        .with_batch_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .build_span_exporter()?,
            Tokio,
        )
        .with_config(
            sdktrace::Config::default()
                .with_sampler(sampler_for(config.sampling_ratio))
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(config.execution_resource()),
        )
        .build();

    let tracer = tracer_provider.tracer(config.service_name.clone());
    global::set_tracer_provider(tracer_provider);

    Ok(tracer)
}

// ============================================================================
// ENCERRAMENTO
// ============================================================================

/// Encerra a telemetria, garantindo o flush dos spans em lote.
///
/// Deve ser chamado antes do processo terminar; sem o flush, os spans
/// acumulados na memória são perdidos.
pub fn shutdown_telemetry() {
    global::shutdown_tracer_provider();
    tracing::info!("Telemetria OTEL encerrada");
}
