//! # Recovery Runner - Motor de Planos de Recuperação
//!
//! Este é o **ponto de entrada principal** do runner, o orquestrador
//! que executa planos declarativos de diagnóstico e reparo contra
//! dispositivos de laboratório (DUT, servo host, tomada RPM).
//!
//! ## O que este arquivo faz?
//!
//! 1. **Processa argumentos da linha de comando** (CLI) usando `clap`
//! 2. **Carrega e valida** o documento de planos (JSON)
//! 3. **Inicializa a telemetria** (tracing + OpenTelemetry)
//! 4. **Executa os planos** pedidos contra o recurso alvo
//! 5. **Gera um relatório** com o desfecho de cada plano
//!
//! ## Exemplo de uso:
//!
//! ```bash
//! # Executar um plano de reparo com recuperação ligada
//! recovery-runner run --config plans.json --resource dut-1 \
//!     --plan dut_repair --enable-recovery
//!
//! # Só validar o documento
//! recovery-runner validate --config plans.json
//! ```
//!
//! ## Arquitetura do Runner
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           main.rs                               │
//! │  (CLI, orquestração, relatórios)                                │
//! └─────────────────────────────────────────────────────────────────┘
//!                                 │
//!          ┌──────────────────────┼──────────────────────┐
//!          ▼                      ▼                      ▼
//!    ┌──────────┐          ┌──────────┐           ┌──────────┐
//!    │ loader/  │          │ engine/  │           │  execs/  │
//!    │ (JSON)   │          │ (plano)  │           │ (device) │
//!    └──────────┘          └──────────┘           └──────────┘
//!                                                       │
//!                                                 ┌──────────┐
//!                                                 │ access/  │
//!                                                 │ (fachada)│
//!                                                 └──────────┘
//! ```

// ============================================================================
// DECLARAÇÃO DE MÓDULOS
// ============================================================================

/// Fachada de acesso ao device e suas implementações.
mod access;

/// Motor de planos: travessia recursiva, caches, reinícios.
mod engine;

/// Códigos de erro estruturados (E1xxx, E2xxx, etc.).
mod errors;

/// Registro de execs e as famílias embutidas.
mod execs;

/// Guarda-corpos da execução (reinícios, profundidade).
mod limits;

/// Carregamento e ligação de documentos de planos.
mod loader;

/// Eventos de métrica em volta de planos e actions.
mod metrics;

/// Estruturas de dados de plano (documento e grafo interno).
mod protocol;

/// Laços de retry usados pelos execs.
mod retry;

/// Integração tracing + OpenTelemetry.
mod telemetry;

/// Invariantes estruturais dos planos.
mod validation;

// ============================================================================
// IMPORTS
// ============================================================================

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use uuid::Uuid;

use access::shell::ShellAccess;
use access::Dut;
use engine::RunArgs;
use limits::ExecutionLimits;
use metrics::{LogSink, MetricSink, NoopSink};
use protocol::{PlanOutcome, PlanStatus, RunReport};
use telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig};

// ============================================================================
// DEFINIÇÃO DA CLI
// ============================================================================

/// Estrutura principal da CLI.
#[derive(Parser)]
#[command(name = "recovery-runner")]
#[command(about = "Motor de planos de recuperação para devices de laboratório", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Subcomandos disponíveis.
#[derive(Subcommand)]
enum Commands {
    /// Executa planos de recuperação contra um recurso.
    Run {
        /// Caminho para o documento de planos (JSON).
        #[arg(short, long)]
        config: PathBuf,

        /// Recurso alvo (nome do DUT).
        #[arg(short, long)]
        resource: String,

        /// Planos a executar, em ordem. Sem `--plan`, executa todos os
        /// planos do documento em ordem alfabética.
        #[arg(long = "plan")]
        plans: Vec<String>,

        /// Liga as cadeias de recuperação das critical actions.
        #[arg(long, default_value = "false")]
        enable_recovery: bool,

        /// Loga cada passo da travessia no nível info.
        #[arg(long, default_value = "false")]
        show_steps: bool,

        /// Caminho para salvar o relatório de execução (opcional).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Habilita exportação de traces para OpenTelemetry.
        #[arg(long, default_value = "false")]
        otel: bool,

        /// Endpoint do coletor OTEL (senão usa variável de ambiente).
        #[arg(long)]
        otel_endpoint: Option<String>,

        /// Modo silencioso: apenas erros críticos no stderr.
        #[arg(long, short = 's', default_value = "false")]
        silent: bool,

        /// Modo verbose: logs detalhados de debug.
        #[arg(long, short = 'v', default_value = "false")]
        verbose: bool,

        /// ID de execução customizado (UUID).
        #[arg(long)]
        execution_id: Option<String>,
    },

    /// Carrega e valida o documento de planos, sem executar nada.
    Validate {
        /// Caminho para o documento de planos (JSON).
        #[arg(short, long)]
        config: PathBuf,

        /// Planos a validar. Sem `--plan`, valida todos.
        #[arg(long = "plan")]
        plans: Vec<String>,
    },
}

// ============================================================================
// FUNÇÃO PRINCIPAL
// ============================================================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Run {
            config,
            resource,
            plans,
            enable_recovery,
            show_steps,
            output,
            otel,
            otel_endpoint,
            silent,
            verbose,
            execution_id,
        } => {
            let exec_id = execution_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string());

            let mut telemetry_config = TelemetryConfig::from_env();
            telemetry_config.log_level = if *silent {
                Level::ERROR
            } else if *verbose {
                Level::DEBUG
            } else {
                Level::INFO
            };
            // Identidade da execução nos atributos de recurso OTEL.
            telemetry_config.execution_id = Some(exec_id.clone());
            telemetry_config.resource_name = Some(resource.clone());

            if *otel {
                if let Some(endpoint) = otel_endpoint {
                    telemetry_config.otlp_endpoint = Some(endpoint.clone());
                } else if telemetry_config.otlp_endpoint.is_none() {
                    telemetry_config.otlp_endpoint = Some("http://localhost:4317".to_string());
                }
            }

            // Se a telemetria falhar, cai para logging simples.
            if let Err(e) = init_telemetry(telemetry_config) {
                if !*silent {
                    eprintln!("Warning: Failed to initialize telemetry: {}", e);
                }
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                    .try_init();
            }

            let options = RunOptions {
                config: config.clone(),
                resource: resource.clone(),
                plans: plans.clone(),
                enable_recovery: *enable_recovery,
                show_steps: *show_steps,
                output: output.clone(),
                execution_id: exec_id,
                silent: *silent,
            };
            run_plans(options).await;

            shutdown_telemetry();
        }

        Commands::Validate { config, plans } => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .try_init();
            validate_document(config, plans);
        }
    }
}

// ============================================================================
// EXECUÇÃO DE PLANOS
// ============================================================================

/// Opções do subcomando `run`, já resolvidas pela CLI.
struct RunOptions {
    config: PathBuf,
    resource: String,
    plans: Vec<String>,
    enable_recovery: bool,
    show_steps: bool,
    output: Option<PathBuf>,
    execution_id: String,
    silent: bool,
}

/// Executa os planos pedidos, em ordem, contra o recurso.
///
/// ## Etapas:
/// 1. **Load**: carrega o documento JSON do disco
/// 2. **Link**: instancia os planos (padrões materializados, validação)
/// 3. **Execute**: roda cada plano pelo motor
/// 4. **Report**: gera e salva o relatório
async fn run_plans(options: RunOptions) {
    let RunOptions {
        config: config_path,
        resource,
        plans: plan_names,
        enable_recovery,
        show_steps,
        output: output_path,
        execution_id,
        silent,
    } = options;

    if !silent {
        info!(execution_id = %execution_id, resource = %resource, "Runner initializing");
    }
    let start_time = Utc::now();

    // 1. Carrega o documento.
    let doc = match loader::load_document_from_file(&config_path) {
        Ok(doc) => doc,
        Err(e) => {
            error!(error = %e, code = %errors::ErrorCode::CONFIG_FILE_NOT_FOUND, "Failed to load plan document");
            std::process::exit(1);
        }
    };

    // 2. Resolve e instancia os planos pedidos.
    let requested: Vec<String> = if plan_names.is_empty() {
        loader::plan_names(&doc)
    } else {
        plan_names
    };

    let plans = match loader::load_plans(&doc, &requested) {
        Ok(plans) => plans,
        Err(validation_errors) => {
            error!(
                "Plan document failed validation with {} error(s):",
                validation_errors.len()
            );
            for err in &validation_errors {
                error!("  - [{}] {}", err.code(), err);
            }
            std::process::exit(1);
        }
    };
    if !silent {
        info!(plans = plans.len(), "Plans loaded and linked");
    }

    // 3. Monta a infraestrutura da execução.
    let access = Arc::new(ShellAccess::with_inventory(vec![Dut {
        name: resource.clone(),
        state: "needs_repair".to_string(),
        ..Dut::default()
    }]));
    let registry = execs::global_registry();
    let sink: Arc<dyn MetricSink> = if silent {
        Arc::new(NoopSink)
    } else {
        Arc::new(LogSink)
    };
    let limits = ExecutionLimits::from_env();

    // Ctrl-C cancela a execução cooperativamente.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupção recebida, cancelando execução");
                cancel.cancel();
            }
        });
    }

    // 4. Executa cada plano, em ordem.
    let mut outcomes: Vec<PlanOutcome> = Vec::new();
    for plan in &plans {
        let plan_started = std::time::Instant::now();
        let mut args = RunArgs::new(
            access.clone(),
            registry.clone(),
            sink.clone(),
            resource.clone(),
        );
        args.enable_recovery = enable_recovery;
        args.show_steps = show_steps;
        args.limits = limits.clone();
        args.cancel = cancel.clone();

        let result = engine::run_plan(plan, args).await;
        let duration_ms = plan_started.elapsed().as_millis() as u64;

        match result {
            Ok(()) => outcomes.push(PlanOutcome {
                plan: plan.name.clone(),
                status: PlanStatus::Passed,
                error: None,
                duration_ms,
            }),
            Err(err) => {
                error!(plan = %plan.name, code = %err.code(), error = %err, "Plan failed");
                outcomes.push(PlanOutcome {
                    plan: plan.name.clone(),
                    status: PlanStatus::Failed,
                    error: Some(format!("[{}] {}", err.code(), err)),
                    duration_ms,
                });
            }
        }
    }

    let all_passed = outcomes.iter().all(|o| o.status == PlanStatus::Passed);
    let end_time = Utc::now();
    if !silent {
        info!("Execution finished");
    }

    // 5. Gera o relatório.
    let report = RunReport {
        execution_id,
        resource,
        status: if all_passed {
            "passed".to_string()
        } else {
            "failed".to_string()
        },
        start_time: start_time.to_rfc3339(),
        end_time: end_time.to_rfc3339(),
        plans: outcomes,
    };

    let json = match serde_json::to_string_pretty(&report) {
        Ok(json) => json,
        Err(e) => {
            error!(error = %e, "Failed to serialize report");
            std::process::exit(1);
        }
    };

    if let Some(path) = output_path {
        if let Err(e) = fs::write(&path, json) {
            eprintln!("❌ Failed to write report: {}", e);
        } else if !silent {
            println!("📄 Report saved to: {:?}", path);
        }
    } else if !silent {
        println!("\n--- Run Report ---\n{}", json);
    }

    if !all_passed {
        std::process::exit(1);
    }
}

// ============================================================================
// VALIDAÇÃO DE DOCUMENTO
// ============================================================================

/// Carrega e valida o documento, reportando cada defeito com o seu
/// código estruturado. Também confere que todo exec referenciado está
/// registrado. Não executa nada.
fn validate_document(config_path: &PathBuf, plan_names: &[String]) {
    let doc = match loader::load_document_from_file(config_path) {
        Ok(doc) => doc,
        Err(e) => {
            eprintln!("❌ [{}] {}", errors::ErrorCode::CONFIG_FILE_NOT_FOUND, e);
            std::process::exit(1);
        }
    };

    let requested: Vec<String> = if plan_names.is_empty() {
        loader::plan_names(&doc)
    } else {
        plan_names.to_vec()
    };

    let registry = execs::global_registry();
    let mut failed = false;
    for name in &requested {
        match loader::load_plan(&doc, name) {
            Ok(plan) => {
                let mut missing: Vec<&str> = plan
                    .actions
                    .values()
                    .filter(|a| !registry.contains(&a.exec_name))
                    .map(|a| a.exec_name.as_str())
                    .collect();
                missing.sort();
                missing.dedup();

                if missing.is_empty() {
                    println!(
                        "✅ {}: {} action(s), {} critical",
                        name,
                        plan.actions.len(),
                        plan.critical_actions.len()
                    );
                } else {
                    failed = true;
                    for exec_name in missing {
                        eprintln!(
                            "❌ {}: [{}] exec '{}' não está registrado",
                            name,
                            errors::ErrorCode::REGISTRY_MISS,
                            exec_name
                        );
                    }
                }
            }
            Err(validation_errors) => {
                failed = true;
                for err in &validation_errors {
                    eprintln!("❌ {}: [{}] {}", name, err.code(), err);
                }
            }
        }
    }

    if failed {
        std::process::exit(1);
    }
}
