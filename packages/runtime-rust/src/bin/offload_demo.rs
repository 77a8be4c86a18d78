//! offload-demo: runs a few scenarios against an in-process worker.
//!
//! Usage: `offload-demo --scenario all --ticks 5`
//! Logging honours `RUST_LOG`; `--json-logs` switches to JSON lines.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use offload_runtime::host::{DataSink, ErrorSink, ProgressSink};
use offload_runtime::{
    InProcessConnector, OperationRequest, Orchestrator, OrchestratorConfig, WorkerConfig,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "offload-demo")]
struct Args {
    /// Scenario to run.
    #[arg(long, value_enum, default_value_t = Scenario::All)]
    scenario: Scenario,

    /// Number of stream events to wait for in the ticker scenario.
    #[arg(long, default_value_t = 5)]
    ticks: usize,

    /// Interval between ticker events in milliseconds.
    #[arg(long, default_value_t = 100)]
    tick_interval_ms: u64,

    /// Default handler timeout in milliseconds.
    #[arg(long, env = "OFFLOAD_OPERATION_TIMEOUT_MS", default_value_t = 30_000)]
    operation_timeout_ms: u64,

    /// Maximum concurrently running handlers.
    #[arg(long, env = "OFFLOAD_MAX_CONCURRENT", default_value_t = 1000)]
    max_concurrent: u32,

    /// Emit logs as JSON lines.
    #[arg(long, env = "OFFLOAD_JSON_LOGS")]
    json_logs: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Scenario {
    Task,
    Ticker,
    Health,
    All,
}

// ---------------------------------------------------------------------------
// Demo modules
// ---------------------------------------------------------------------------

mod background {
    use std::sync::Arc;
    use std::time::Duration;

    use offload_runtime::worker::parse_payload;
    use offload_runtime::{HandlerResult, HandlerTable, ModuleError, OperationHandle, WorkerModule};
    use serde::Deserialize;
    use serde_json::{json, Value};

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct TaskInput {
        steps: u8,
        #[serde(default = "default_step_ms")]
        step_ms: u64,
    }

    fn default_step_ms() -> u64 {
        50
    }

    /// Splits a fake task into steps and reports progress after each.
    pub struct Background;

    impl Background {
        async fn execute_task(self: Arc<Self>, data: Value, ctx: OperationHandle) -> HandlerResult {
            let input: TaskInput = parse_payload(data)?;
            if input.steps == 0 {
                return Err(ModuleError::new("steps must be positive").with_status(400));
            }
            for step in 1..=input.steps {
                tokio::time::sleep(Duration::from_millis(input.step_ms)).await;
                let percent = u16::from(step) * 100 / u16::from(input.steps);
                ctx.progress(u8::try_from(percent).unwrap_or(100)).await;
            }
            Ok(json!({ "completedSteps": input.steps }))
        }
    }

    impl WorkerModule for Background {
        fn module_name(&self) -> &str {
            "BackgroundModule"
        }

        fn handlers() -> HandlerTable<Self> {
            HandlerTable::new().on("executeTask", Self::execute_task)
        }
    }
}

mod ticker {
    use std::sync::Arc;
    use std::time::Duration;

    use dashmap::DashMap;
    use offload_runtime::worker::parse_payload;
    use offload_runtime::{HandlerResult, HandlerTable, ModuleError, OperationHandle, WorkerModule};
    use serde::Deserialize;
    use serde_json::{json, Value};
    use tokio_util::sync::CancellationToken;

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct StartInput {
        interval_ms: u64,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct StopInput {
        subscription_id: String,
    }

    /// Streams an increasing counter until stopped.
    #[derive(Default)]
    pub struct Ticker {
        subscriptions: DashMap<String, CancellationToken>,
    }

    impl Ticker {
        async fn start(self: Arc<Self>, data: Value, ctx: OperationHandle) -> HandlerResult {
            let input: StartInput = parse_payload(data)?;
            let subscription_id = ctx.id().to_string();
            let stop = ctx.cancellation().child_token();
            self.subscriptions.insert(subscription_id.clone(), stop.clone());

            let interval = Duration::from_millis(input.interval_ms.max(1));
            tokio::spawn(async move {
                let mut tick = 0u64;
                loop {
                    tokio::select! {
                        () = stop.cancelled() => break,
                        () = tokio::time::sleep(interval) => {}
                    }
                    tick += 1;
                    if !ctx.stream_data(json!({ "tick": tick })).await {
                        break;
                    }
                }
            });

            Ok(json!({ "subscriptionId": subscription_id }))
        }

        async fn stop(self: Arc<Self>, data: Value, _ctx: OperationHandle) -> HandlerResult {
            let input: StopInput = parse_payload(data)?;
            match self.subscriptions.remove(&input.subscription_id) {
                Some((_, token)) => {
                    token.cancel();
                    Ok(json!({ "stopped": true }))
                }
                None => Err(ModuleError::new(format!(
                    "no subscription '{}'",
                    input.subscription_id
                ))
                .with_code("UNKNOWN_SUBSCRIPTION")
                .with_status(404)),
            }
        }
    }

    impl WorkerModule for Ticker {
        fn module_name(&self) -> &str {
            "TickerModule"
        }

        fn handlers() -> HandlerTable<Self> {
            HandlerTable::new()
                .on("start", Self::start)
                .on("stop", Self::stop)
        }
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

async fn run_task(orchestrator: &Orchestrator) -> anyhow::Result<()> {
    let on_progress: ProgressSink = Arc::new(|pct| info!(pct, "task progress"));
    let request = OperationRequest::background("executeTask", json!({ "steps": 4 }));
    let result: Value = orchestrator.execute(request, Some(on_progress), None).await?;
    println!("task result: {result}");
    Ok(())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Started {
    subscription_id: String,
}

async fn run_ticker(
    orchestrator: &Orchestrator,
    ticks: usize,
    interval_ms: u64,
) -> anyhow::Result<()> {
    let received = Arc::new(AtomicUsize::new(0));
    let enough = CancellationToken::new();

    let on_data: DataSink = {
        let received = Arc::clone(&received);
        let enough = enough.clone();
        Arc::new(move |event| {
            let n = received.fetch_add(1, Ordering::SeqCst) + 1;
            println!("tick event: {event}");
            if n >= ticks {
                enough.cancel();
            }
        })
    };
    let on_error: ErrorSink = Arc::new(|err| warn!(error = %err, "ticker stream error"));

    let request =
        OperationRequest::new("ticker", "start").with_data(json!({ "intervalMs": interval_ms }));
    let started = orchestrator
        .execute_streaming::<Started>(request, Some(on_data), Some(on_error), None)
        .await?;
    info!(subscription = %started.value.subscription_id, "ticker started");

    enough.cancelled().await;
    started.subscription.close();

    let stop = OperationRequest::new("ticker", "stop")
        .with_data(json!({ "subscriptionId": started.value.subscription_id }));
    let stopped: Value = orchestrator.execute(stop, None, None).await?;
    println!(
        "ticker stopped after {} events: {stopped}",
        received.load(Ordering::SeqCst)
    );
    Ok(())
}

async fn run_health(orchestrator: &Orchestrator) -> anyhow::Result<()> {
    let health = orchestrator.get_health().await;
    println!(
        "health: healthy={} active={} modules={:?} total={} uptime_ms={}",
        health.is_healthy,
        health.active_operations,
        health.registered_modules,
        health.total_operations,
        health.uptime_ms
    );
    for module in orchestrator.list_modules().await? {
        println!("module: {} ({})", module.name, module.module_name);
    }
    Ok(())
}

fn init_tracing(json_logs: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let worker = WorkerConfig {
        default_operation_timeout_ms: args.operation_timeout_ms,
        max_concurrent_operations: args.max_concurrent,
        ..WorkerConfig::default()
    };
    let connector = InProcessConnector::new(worker, |dispatcher| {
        dispatcher.register_module("background", background::Background);
        dispatcher.register_module("ticker", ticker::Ticker::default());
    });
    let orchestrator = Orchestrator::new(OrchestratorConfig::default(), Arc::new(connector));
    orchestrator.initialize().await?;

    let outcome = match args.scenario {
        Scenario::Task => run_task(&orchestrator).await,
        Scenario::Ticker => run_ticker(&orchestrator, args.ticks, args.tick_interval_ms).await,
        Scenario::Health => run_health(&orchestrator).await,
        Scenario::All => async {
            run_health(&orchestrator).await?;
            run_task(&orchestrator).await?;
            run_ticker(&orchestrator, args.ticks, args.tick_interval_ms).await
        }
        .await,
    };

    orchestrator.dispose();
    outcome
}
