//! Top-level orchestrator wiring (spec §2/§6): connects the substrate,
//! provisions every stream/bucket, builds each processor component, and
//! drives them all concurrently alongside the HTTP surface until ctrl-c,
//! mirroring the teacher's `factory::server::start_server` shape.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use planloop_types::ReviewKind;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::{self, AppState};
use crate::events::EventRouter;
use crate::focus::{FocusCoordinator, FocusCoordinatorConfig};
use crate::graph::GraphIngester;
use crate::model::{CapabilityRegistry, HttpModelClient, ModelCaller, ModelClient};
use crate::notify::NotificationDispatcher;
use crate::plan::PlanManager;
use crate::questions::{QuestionEscalator, QuestionStore};
use crate::review::subjects;
use crate::review::{LoopStateStore, PhaseProducer, PlanProducer, ReviewConsumer, ReviewLoopEngine, Reviewer, TaskProducer};
use crate::substrate::{StreamSpec, Substrate};

/// How often the question escalator sweeps the question store for overdue
/// answers (spec §6: bounded by `QuestionEscalator::DEFAULT_SLA`, not by
/// this interval, which just controls how promptly an overdue question is
/// noticed).
const ESCALATOR_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Everything `serve` needs that isn't hardcoded, resolved the way the
/// teacher's `Config` resolves paths: environment first, sensible default
/// second, canonicalized once at startup.
pub struct ServeConfig {
    pub nats_url: String,
    pub bind_addr: String,
    pub mirror_root: PathBuf,
    pub llm_api_url: Option<String>,
}

impl ServeConfig {
    /// Reads `NATS_URL`, `SEMSPEC_BIND_ADDR`, `SEMSPEC_REPO_PATH`, and
    /// `LLM_API_URL` from the environment, falling back to the current
    /// directory for the mirror root the way the teacher's `Config::new`
    /// falls back to the project directory it was invoked in.
    pub fn from_env() -> Result<Self> {
        let nats_url = std::env::var("NATS_URL").unwrap_or_else(|_| "nats://127.0.0.1:4222".to_string());
        let bind_addr = std::env::var("SEMSPEC_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let mirror_root = match std::env::var("SEMSPEC_REPO_PATH") {
            Ok(path) => PathBuf::from(path),
            Err(_) => std::env::current_dir().context("failed to read current directory")?,
        }
        .canonicalize()
        .context("failed to resolve mirror root")?;
        let llm_api_url = std::env::var("LLM_API_URL").ok();

        Ok(Self {
            nats_url,
            bind_addr,
            mirror_root,
            llm_api_url,
        })
    }
}

/// Start every processor component and the HTTP listener, running until
/// ctrl-c, then wait for every background task to drain before returning.
pub async fn serve(config: ServeConfig) -> Result<()> {
    let substrate = Arc::new(
        Substrate::connect(&config.nats_url)
            .await
            .context("failed to connect to NATS")?,
    );

    let workflow_stream = substrate
        .stream(&StreamSpec::new(
            subjects::WORKFLOW_STREAM,
            vec!["workflow.>".to_string()],
        ))
        .await
        .context("failed to provision WORKFLOW stream")?;
    let user_signal_stream = substrate
        .stream(&StreamSpec::new(
            subjects::USER_SIGNAL_STREAM,
            vec!["user.signal.>".to_string()],
        ))
        .await
        .context("failed to provision USER_SIGNAL stream")?;

    let plan_manager = Arc::new(PlanManager::new(Arc::clone(&substrate), config.mirror_root.clone()));
    let question_store = Arc::new(QuestionStore::new(Arc::clone(&substrate)));

    let registry = CapabilityRegistry::from_pairs([], config.llm_api_url.clone());
    let model_client: Arc<dyn ModelClient> = Arc::new(HttpModelClient::new());
    let model = Arc::new(ModelCaller::new(registry, model_client, Arc::clone(&substrate)));

    let focus = Arc::new(FocusCoordinator::new(Arc::clone(&model), FocusCoordinatorConfig::default()));

    let plan_producer = Arc::new(PlanProducer::new(Arc::clone(&focus)));
    let phase_producer = Arc::new(PhaseProducer::new(Arc::clone(&model)));
    let task_producer = Arc::new(TaskProducer::new(Arc::clone(&model)));

    let reviewer = Reviewer::new(Arc::clone(&model));
    let state_store = LoopStateStore::new(Arc::clone(&substrate));

    let engine = Arc::new(ReviewLoopEngine::new(
        Arc::clone(&substrate),
        Arc::clone(&plan_manager),
        state_store,
        reviewer,
        plan_producer,
        phase_producer,
        task_producer,
        Arc::clone(&question_store),
    ));

    let plan_consumer = ReviewConsumer::new(&substrate, Arc::clone(&engine), &workflow_stream, ReviewKind::Plan)
        .await
        .context("failed to start plan review consumer")?;
    let phase_consumer = ReviewConsumer::new(&substrate, Arc::clone(&engine), &workflow_stream, ReviewKind::Phase)
        .await
        .context("failed to start phase review consumer")?;
    let task_consumer = ReviewConsumer::new(&substrate, Arc::clone(&engine), &workflow_stream, ReviewKind::Task)
        .await
        .context("failed to start task review consumer")?;

    let event_router = EventRouter::new(
        Arc::clone(&substrate),
        Arc::clone(&plan_manager),
        &workflow_stream,
        &user_signal_stream,
    )
    .await
    .context("failed to start event router")?;

    let graph_ingester = GraphIngester::new(Arc::clone(&substrate), &workflow_stream)
        .await
        .context("failed to start graph ingester")?;
    let notification_dispatcher = NotificationDispatcher::new(Arc::clone(&substrate), &user_signal_stream)
        .await
        .context("failed to start notification dispatcher")?;

    let escalator = Arc::new(QuestionEscalator::new(Arc::clone(&substrate), Arc::clone(&question_store)));

    let state = Arc::new(AppState {
        plan_manager,
        substrate: Arc::clone(&substrate),
        workflow_stream,
        question_store,
    });
    let app = api::router(state);

    let cancel = CancellationToken::new();
    let mut tasks = JoinSet::new();

    spawn_component(&mut tasks, "plan-review-consumer", cancel.clone(), move |cancel| async move {
        plan_consumer.run(&cancel).await.map_err(anyhow::Error::from)
    });
    spawn_component(&mut tasks, "phase-review-consumer", cancel.clone(), move |cancel| async move {
        phase_consumer.run(&cancel).await.map_err(anyhow::Error::from)
    });
    spawn_component(&mut tasks, "task-review-consumer", cancel.clone(), move |cancel| async move {
        task_consumer.run(&cancel).await.map_err(anyhow::Error::from)
    });
    spawn_component(&mut tasks, "event-router", cancel.clone(), move |cancel| async move {
        event_router.run(&cancel).await.map_err(anyhow::Error::from)
    });
    spawn_component(&mut tasks, "graph-ingester", cancel.clone(), move |cancel| async move {
        graph_ingester.run(&cancel).await.map_err(anyhow::Error::from)
    });
    spawn_component(&mut tasks, "notification-dispatcher", cancel.clone(), move |cancel| async move {
        notification_dispatcher.run(&cancel).await.map_err(anyhow::Error::from)
    });
    spawn_component(&mut tasks, "question-escalator", cancel.clone(), move |cancel| async move {
        run_escalator_sweep(escalator, cancel).await
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "planloop orchestrator listening");

    let server_cancel = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(server_cancel))
        .await
        .context("HTTP server error")?;

    cancel.cancel();
    while let Some(result) = tasks.join_next().await {
        if let Err(err) = result.context("background task panicked").and_then(|inner| inner) {
            warn!(error = %err, "background component exited with error");
        }
    }

    info!("planloop orchestrator shut down");
    Ok(())
}

/// Run `body` until `cancel` fires, logging if it returns an error rather
/// than propagating — one component failing to start back up never takes
/// the process down, it just stops contributing until the next restart.
fn spawn_component<F, Fut>(tasks: &mut JoinSet<Result<()>>, name: &'static str, cancel: CancellationToken, body: F)
where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    tasks.spawn(async move {
        info!(component = name, "starting");
        let result = body(cancel).await;
        if let Err(ref err) = result {
            warn!(component = name, error = %err, "component stopped");
        } else {
            info!(component = name, "stopped");
        }
        result
    });
}

async fn run_escalator_sweep(escalator: Arc<QuestionEscalator>, cancel: CancellationToken) -> Result<()> {
    while !cancel.is_cancelled() {
        match escalator.sweep().await {
            Ok(n) if n > 0 => info!(escalated = n, "question escalator sweep"),
            Ok(_) => {}
            Err(err) => warn!(error = %err, "question escalator sweep failed"),
        }
        tokio::select! {
            _ = tokio::time::sleep(ESCALATOR_SWEEP_INTERVAL) => {}
            _ = cancel.cancelled() => {}
        }
    }
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    info!("ctrl-c received, shutting down");
    cancel.cancel();
}

/// Installs the `tracing-subscriber` registry the way the teacher's sibling
/// orchestrators do: an `EnvFilter` defaulting to `info`, human-readable
/// `fmt` output, honoring `RUST_LOG` when set.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}
