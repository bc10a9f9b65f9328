//! Assembly of the coordinator: store, panes, spawner, tool server, captain
//! loop, supervisor, HTTP surface. `main.rs` parses flags and calls `run`.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use flotilla_captain::{
    CaptainHandle, CaptainLoop, CaptainLoopConfig, Dispatcher, DispatcherConfig, FileTaskSource,
    JsonFileMemory, ReconRunner, SubprocessRecon, TracingNotifier,
};
use flotilla_core::CoordinatorConfig;
use flotilla_panes::{HeadlessPanes, PaneController, RpcGate, TmuxPanes};
use flotilla_spawn::{Spawner, SpawnerConfig};
use flotilla_state::{spawn_persister, StateStore};
use flotilla_toolserver::{
    register_builtin_tools, SessionRegistry, ToolRegistry, ToolServerState,
};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::api::{self, ApiState};
use crate::supervisor::{CaptainSupervisor, SupervisorConfig};

pub struct Coordinator {
    pub store: Arc<StateStore>,
    pub panes: Arc<dyn PaneController>,
    pub spawner: Arc<Spawner>,
    pub sessions: Arc<SessionRegistry>,
    pub captain: CaptainHandle,
    pub supervisor: Option<Arc<CaptainSupervisor>>,
    pub api_state: Arc<ApiState>,
    pub toolserver_state: Arc<ToolServerState>,
    pub cancel: CancellationToken,
}

/// Build every component from the config. Nothing is running yet except the
/// persister and the state broadcaster.
pub async fn build(
    config: &CoordinatorConfig,
    with_captain_agent: bool,
) -> anyhow::Result<Coordinator> {
    let cancel = CancellationToken::new();
    let server_url = format!("http://{}:{}", config.bind, config.port);

    let store = StateStore::load(config.snapshot_path());
    spawn_persister(store.clone(), cancel.child_token());

    let gate = Arc::new(RpcGate::default());
    let panes: Arc<dyn PaneController> = if config.tmux {
        Arc::new(TmuxPanes::new(gate, std::time::Duration::from_secs(5)))
    } else {
        Arc::new(HeadlessPanes::new(gate))
    };

    let (pane_tx, pane_rx) = watch::channel(None);

    let registry_cfg = config.registry();
    let spawner = Arc::new(Spawner::new(
        store.clone(),
        panes.clone(),
        registry_cfg,
        SpawnerConfig {
            server_url: server_url.clone(),
            transport_config_dir: config.transport_config_dir(),
            ..SpawnerConfig::default()
        },
        pane_rx,
    ));

    let sessions = Arc::new(SessionRegistry::new());
    spawner.set_signaller(sessions.clone()).await;

    let (captain_tx, captain_rx) = mpsc::channel(256);
    let mut tools = ToolRegistry::new();
    register_builtin_tools(&mut tools, store.clone(), panes.clone(), captain_tx);
    let toolserver_state = Arc::new(ToolServerState {
        sessions: sessions.clone(),
        registry: Arc::new(tools),
    });

    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        spawner.clone(),
        DispatcherConfig::default(),
    ));
    let captain = CaptainLoop::new(
        store.clone(),
        panes.clone(),
        dispatcher,
        ReconRunner::new(
            Arc::new(SubprocessRecon::default()),
            flotilla_captain::recon::RECON_TIMEOUT,
        ),
        Arc::new(JsonFileMemory::load(config.memory_path())),
        Arc::new(FileTaskSource::new(config.task_file())),
        Arc::new(TracingNotifier),
        captain_rx,
        CaptainLoopConfig {
            cycle_interval: std::time::Duration::from_secs(config.cycle_interval_secs),
            ..CaptainLoopConfig::default()
        },
    );

    let supervisor = if with_captain_agent {
        let supervisor_config = SupervisorConfig {
            transport_config_dir: config.transport_config_dir(),
            server_url: server_url.clone(),
            home_pane: std::env::var("TMUX_PANE").ok().filter(|_| config.tmux),
            ..SupervisorConfig::default()
        };
        let (supervisor, _shutdown_rx) = CaptainSupervisor::new(
            panes.clone(),
            store.clone(),
            supervisor_config,
            pane_tx,
        );
        Some(supervisor)
    } else {
        None
    };

    let (updates, _) = broadcast::channel(256);
    api::ws::spawn_state_broadcaster(store.clone(), updates.clone(), cancel.child_token());

    let api_state = Arc::new(ApiState {
        store: store.clone(),
        captain: captain.clone(),
        spawner: spawner.clone(),
        supervisor: supervisor.clone(),
        sessions: sessions.clone(),
        updates,
        started_at: Instant::now(),
    });

    Ok(Coordinator {
        store,
        panes,
        spawner,
        sessions,
        captain,
        supervisor,
        api_state,
        toolserver_state,
        cancel,
    })
}

/// Run the coordinator until the cancellation token fires.
pub async fn run(coordinator: Coordinator, config: &CoordinatorConfig) -> anyhow::Result<()> {
    let Coordinator {
        captain,
        supervisor,
        api_state,
        toolserver_state,
        cancel,
        ..
    } = coordinator;

    tokio::spawn(captain.clone().run(cancel.child_token()));
    if let Some(supervisor) = &supervisor {
        supervisor
            .start(cancel.child_token())
            .await
            .context("starting captain supervisor")?;
    }

    let app = api::router(api_state).merge(flotilla_toolserver::router(toolserver_state));
    let bind_addr = format!("{}:{}", config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;

    info!("flotilla v{} listening on {}", env!("CARGO_PKG_VERSION"), bind_addr);
    info!("  dashboard api: http://{bind_addr}/api/state");
    info!("  tool stream:   http://{bind_addr}/toolcall/stream");
    info!("  websocket:     ws://{bind_addr}/ws");

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    // Final flush happens in the persister's cancel branch.
    cancel.cancel();
    Ok(())
}
