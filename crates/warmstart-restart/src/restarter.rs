//! Process entry into restartable mode

use crate::entry::EntryPoint;
use crate::error::RestartError;
use crate::executor::{FatalHandler, LeakSafeExecutor};
use crate::session::RestartSession;
use std::process::ExitCode;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tracing::{debug, error};

/// Creates the restart session exactly once and performs the first launch.
///
/// Create one per process and pass it by reference; tests create their own.
pub struct Restarter {
    session: OnceLock<RestartSession>,
    init_lock: Mutex<()>,
    on_fatal: Option<FatalHandler>,
}

impl Restarter {
    pub fn new() -> Self {
        Self {
            session: OnceLock::new(),
            init_lock: Mutex::new(()),
            on_fatal: None,
        }
    }

    /// Use `on_fatal` instead of exiting the process when a leak-safe task panics.
    pub fn with_fatal_handler(on_fatal: FatalHandler) -> Self {
        Self {
            on_fatal: Some(on_fatal),
            ..Self::new()
        }
    }

    /// Establish the session and launch the first generation.
    ///
    /// On success this returns [`RestartError::ImmediateRestart`]: the
    /// application now runs on its own thread and the caller must stop
    /// executing application code, normally by returning the error through
    /// [`finish`]. A failed first launch returns the launch error instead.
    /// Calls after the first one return `Ok(())` and do nothing.
    pub fn initialize<I, E>(&self, args: I, entry: E) -> Result<(), RestartError>
    where
        I: IntoIterator<Item = String>,
        E: EntryPoint + 'static,
    {
        let _guard = self.init_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.session.get().is_some() {
            debug!("Restarter already initialized");
            return Ok(());
        }

        let executor = match &self.on_fatal {
            Some(handler) => LeakSafeExecutor::with_fatal_handler(Arc::clone(handler)),
            None => LeakSafeExecutor::new(),
        };
        let args: Arc<[String]> = args.into_iter().collect();
        let session = RestartSession::new(Arc::new(entry), args, executor);
        let session = self.session.get_or_init(|| session).clone();

        session.launch_initial()?;
        Err(RestartError::ImmediateRestart { session })
    }

    /// The session, once [`Restarter::initialize`] ran.
    pub fn session(&self) -> Option<RestartSession> {
        self.session.get().cloned()
    }

    /// Trigger a restart of the running application.
    pub fn restart(&self) -> Result<(), RestartError> {
        self.session
            .get()
            .ok_or(RestartError::NotInitialized)?
            .restart()
    }
}

impl Default for Restarter {
    fn default() -> Self {
        Self::new()
    }
}

/// Turn the result of the original `main` into a process exit code.
///
/// [`RestartError::ImmediateRestart`] is the only error swallowed: the
/// calling thread then parks until exit is requested on the session. Every
/// other error is logged and reported as a failure.
pub fn finish<E>(result: Result<(), E>) -> ExitCode
where
    E: Into<anyhow::Error>,
{
    let err = match result {
        Ok(()) => return ExitCode::SUCCESS,
        Err(e) => e.into(),
    };

    match err.downcast::<RestartError>() {
        Ok(RestartError::ImmediateRestart { session }) => {
            debug!("Original entry thread parked until exit");
            session.await_exit();
            ExitCode::SUCCESS
        }
        Ok(other) => {
            error!("{other}");
            ExitCode::FAILURE
        }
        Err(other) => {
            error!("{other:#}");
            ExitCode::FAILURE
        }
    }
}
