//! The restartable part of the demo
//!
//! Everything in [`DemoApp::launch`] runs once per generation. Edit
//! `greeting.txt` in the first watched directory and the next generation
//! greets differently while keeping the same gateway session.

use crate::gateway::{GatewayEvent, SimulatedGateway};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use warmstart_cache::{
    Activity, ActivityKind, ContinuityContext, EventSink, Intents, ListenerSink, OnlineStatus,
};
use warmstart_core::Config;
use warmstart_restart::{LaunchContext, WatchSettings};

pub const GREETING_FILE: &str = "greeting.txt";
const DEFAULT_GREETING: &str = "Hello";
const IDENTITY: &str = "demo-token";

pub struct DemoApp {
    config: Config,
    context: ContinuityContext<SimulatedGateway>,
    heartbeat: Duration,
}

impl DemoApp {
    pub fn new(config: Config, heartbeat: Duration) -> Self {
        Self {
            config,
            context: ContinuityContext::new(),
            heartbeat,
        }
    }

    pub fn context(&self) -> &ContinuityContext<SimulatedGateway> {
        &self.context
    }

    /// Start one generation.
    pub fn launch(&self, ctx: LaunchContext) -> Result<()> {
        let session = ctx.session();
        self.context.attach(session);

        let watch = WatchSettings::from_config(&self.config.restart)
            .context("Invalid [restart] configuration")?;
        let greeting = read_greeting(watch.roots.first().map(PathBuf::as_path));
        let generation = ctx.generation();
        info!("{greeting} from generation {generation}");

        let sink = Arc::new(ListenerSink::new());
        sink.register(Arc::new(move |event: &GatewayEvent| match event {
            GatewayEvent::Ready { session_id } => {
                info!("[gen {generation}] gateway session {session_id} ready")
            }
            GatewayEvent::Heartbeat { sequence } => {
                info!("[gen {generation}] heartbeat #{sequence}")
            }
        }))?;
        let sink: Arc<dyn EventSink<GatewayEvent>> = sink;

        let heartbeat = self.heartbeat;
        let connection = self
            .context
            .builder(self.config.cache.key.as_deref(), IDENTITY, Intents::ALL)
            .status(OnlineStatus::Online)
            .activity(Some(Activity::new(ActivityKind::Watching, "the sources")))
            .event_sink(sink)
            .build(|_, sink| Ok(SimulatedGateway::connect(sink, heartbeat)?))?;

        if connection.was_reused() {
            info!("Reusing gateway session {}", connection.session_id());
        } else {
            info!("Connected gateway session {}", connection.session_id());
        }

        let gateway = Arc::clone(connection.resource());
        session.add_listener(move || {
            connection.shutdown(move || gateway.disconnect());
        });

        if self.config.restart.is_enabled() {
            session.watch(watch).context("Failed to watch sources")?;
        } else {
            info!("Restarts on change are disabled");
        }
        Ok(())
    }
}

/// Contents of the greeting file under `root`, or a default.
pub fn read_greeting(root: Option<&Path>) -> String {
    let Some(root) = root else {
        return DEFAULT_GREETING.to_string();
    };
    let path = root.join(GREETING_FILE);
    match std::fs::read_to_string(&path) {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => DEFAULT_GREETING.to_string(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => DEFAULT_GREETING.to_string(),
        Err(e) => {
            warn!("Could not read {}: {e}", path.display());
            DEFAULT_GREETING.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use warmstart_core::{CacheConfig, RestartConfig};
    use warmstart_restart::{FnEntryPoint, RestartError, Restarter};

    #[test]
    fn test_read_greeting() {
        let dir = TempDir::new().unwrap();
        assert_eq!(read_greeting(None), "Hello");
        assert_eq!(read_greeting(Some(dir.path())), "Hello");

        std::fs::write(dir.path().join(GREETING_FILE), "  Bonjour\n").unwrap();
        assert_eq!(read_greeting(Some(dir.path())), "Bonjour");

        std::fs::write(dir.path().join(GREETING_FILE), "\n").unwrap();
        assert_eq!(read_greeting(Some(dir.path())), "Hello");
    }

    #[test]
    fn test_restart_keeps_gateway_session() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            restart: RestartConfig {
                enabled: Some(false),
                watch_roots: vec![dir.path().to_path_buf()],
                ..Default::default()
            },
            cache: CacheConfig {
                key: Some("demo".to_string()),
            },
        };
        let app = Arc::new(DemoApp::new(config, Duration::from_secs(60)));

        let restarter = Restarter::with_fatal_handler(Arc::new(|message: &str| {
            panic!("fatal: {message}")
        }));
        let a = Arc::clone(&app);
        let result = restarter.initialize(
            Vec::new(),
            FnEntryPoint::new("demo", move |ctx: LaunchContext| a.launch(ctx)),
        );
        assert!(matches!(result, Err(RestartError::ImmediateRestart { .. })));
        assert!(app.context().is_attached());

        restarter.restart().unwrap();
        let record = app.context().get_session("demo").unwrap();
        assert_eq!(record.attempts, 2);
        assert_eq!(record.reused, 1);

        let session = restarter.session().unwrap();
        session.request_exit();
        assert!(app.context().cache().is_empty());
    }
}
