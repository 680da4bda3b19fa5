#![forbid(unsafe_code)]

//! Elm-style runtime for form models.
//!
//! A [`Model`] owns state and reacts to messages; side effects are returned
//! as [`Cmd`] values and executed by the runtime. [`Program`] runs one model
//! on the calling thread, runs [`Cmd::Task`] closures on worker threads, and
//! feeds their results back as messages through an `mpsc` channel.
//!
//! # Example
//!
//! ```ignore
//! use formflow_runtime::program::{Cmd, Model, Program, ProgramConfig};
//!
//! struct Counter { count: i32 }
//!
//! enum Msg { Increment, Done }
//!
//! impl Model for Counter {
//!     type Message = Msg;
//!
//!     fn update(&mut self, msg: Msg) -> Cmd<Msg> {
//!         match msg {
//!             Msg::Increment => { self.count += 1; Cmd::none() }
//!             Msg::Done => Cmd::quit(),
//!         }
//!     }
//! }
//!
//! let mut program = Program::new(Counter { count: 0 }, ProgramConfig::default());
//! program.dispatch(Msg::Increment);
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use formflow_core::PageId;
use tracing::{debug, debug_span, warn};

use crate::error_sink::{ErrorSink, TracingErrorSink};
use crate::view_cache::ViewCache;

/// Application state and behavior.
pub trait Model: Sized {
    /// Messages this model reacts to.
    type Message: Send + 'static;

    /// Startup commands, run once before the first message.
    fn init(&mut self) -> Cmd<Self::Message> {
        Cmd::none()
    }

    /// The state transition function.
    fn update(&mut self, msg: Self::Message) -> Cmd<Self::Message>;
}

/// Diagnostics metadata for background tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskSpec {
    pub name: Option<String>,
}

impl TaskSpec {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }
}

/// Callback turning a restored page (if any) into a message.
pub type RestoreCallback<M> = Box<dyn FnOnce(Option<PageId>) -> M + Send>;

/// Side effects executed by the runtime.
#[derive(Default)]
pub enum Cmd<M> {
    /// No operation.
    #[default]
    None,
    /// Stop the program loop.
    Quit,
    /// Execute commands in order.
    Batch(Vec<Cmd<M>>),
    /// Run a blocking closure off the model thread; its return value is
    /// delivered back as a message.
    Task(TaskSpec, Box<dyn FnOnce() -> M + Send>),
    /// Ask the save subsystem to persist pending form data.
    ///
    /// The save subsystem answers with a completion message, either through
    /// the configured [`SaveHook`] or directly from the host.
    RequestSave,
    /// Record the last viewed page for a view-cache key.
    PersistView { key: String, page: PageId },
    /// Read the last viewed page for a view-cache key and hand it to the
    /// callback.
    RestoreView {
        key: String,
        on_restore: RestoreCallback<M>,
    },
    /// Deliver an unexpected failure to the process-wide error sink.
    ReportError {
        message: String,
        error: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl<M: std::fmt::Debug> std::fmt::Debug for Cmd<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Quit => write!(f, "Quit"),
            Self::Batch(cmds) => f.debug_tuple("Batch").field(cmds).finish(),
            Self::Task(spec, _) => f.debug_struct("Task").field("spec", spec).finish(),
            Self::RequestSave => write!(f, "RequestSave"),
            Self::PersistView { key, page } => f
                .debug_struct("PersistView")
                .field("key", key)
                .field("page", page)
                .finish(),
            Self::RestoreView { key, .. } => {
                f.debug_struct("RestoreView").field("key", key).finish()
            }
            Self::ReportError { message, error } => f
                .debug_struct("ReportError")
                .field("message", message)
                .field("error", &error.to_string())
                .finish(),
        }
    }
}

impl<M> Cmd<M> {
    #[inline]
    pub fn none() -> Self {
        Self::None
    }

    #[inline]
    pub fn quit() -> Self {
        Self::Quit
    }

    /// Combine commands, collapsing empty and single-element lists.
    pub fn batch(cmds: Vec<Self>) -> Self {
        let mut cmds: Vec<Self> = cmds
            .into_iter()
            .filter(|c| !matches!(c, Self::None))
            .collect();
        match cmds.len() {
            0 => Self::None,
            1 => cmds.pop().unwrap_or(Self::None),
            _ => Self::Batch(cmds),
        }
    }

    /// Background task with a diagnostic name.
    pub fn task_named<F>(name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce() -> M + Send + 'static,
    {
        Self::Task(TaskSpec::named(name), Box::new(f))
    }

    #[inline]
    pub fn request_save() -> Self {
        Self::RequestSave
    }

    pub fn persist_view(key: impl Into<String>, page: PageId) -> Self {
        Self::PersistView {
            key: key.into(),
            page,
        }
    }

    pub fn restore_view<F>(key: impl Into<String>, on_restore: F) -> Self
    where
        F: FnOnce(Option<PageId>) -> M + Send + 'static,
    {
        Self::RestoreView {
            key: key.into(),
            on_restore: Box::new(on_restore),
        }
    }

    pub fn report_error<E>(message: impl Into<String>, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::ReportError {
            message: message.into(),
            error: Box::new(error),
        }
    }
}

/// Performs a save when the model emits [`Cmd::RequestSave`].
///
/// Runs on a worker thread; the returned message is delivered to the model
/// once the save finished.
pub trait SaveHook<M>: Send + Sync {
    fn save(&self) -> M;
}

impl<M, F> SaveHook<M> for F
where
    F: Fn() -> M + Send + Sync,
{
    fn save(&self) -> M {
        self()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Environment variable: validation request timeout in milliseconds.
pub const ENV_VALIDATION_TIMEOUT_MS: &str = "FORMFLOW_VALIDATION_TIMEOUT_MS";
/// Environment variable: path of the file-backed view cache.
pub const ENV_VIEW_CACHE_PATH: &str = "FORMFLOW_VIEW_CACHE_PATH";

const DEFAULT_VALIDATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramConfig {
    /// Upper bound for one remote validation request.
    pub validation_timeout: Duration,
    /// Write the view cache to its backend after every persisted view.
    pub flush_on_persist: bool,
    /// File for the view cache; in-memory when `None` or when the
    /// `state-persistence` feature is off.
    pub view_cache_path: Option<PathBuf>,
}

impl Default for ProgramConfig {
    fn default() -> Self {
        Self {
            validation_timeout: DEFAULT_VALIDATION_TIMEOUT,
            flush_on_persist: true,
            view_cache_path: None,
        }
    }
}

impl ProgramConfig {
    /// Defaults overridden by `FORMFLOW_*` environment variables.
    ///
    /// Unparseable values are logged and ignored.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    #[must_use]
    pub fn from_env_with<F>(mut get: F) -> Self
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(value) = get(ENV_VALIDATION_TIMEOUT_MS) {
            match value.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => config.validation_timeout = Duration::from_millis(ms),
                _ => warn!(
                    var = ENV_VALIDATION_TIMEOUT_MS,
                    value = %value,
                    "expected positive integer milliseconds, keeping default"
                ),
            }
        }
        if let Some(value) = get(ENV_VIEW_CACHE_PATH).filter(|v| !v.trim().is_empty()) {
            config.view_cache_path = Some(PathBuf::from(value));
        }
        config
    }

    #[must_use]
    pub fn with_validation_timeout(mut self, timeout: Duration) -> Self {
        self.validation_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_flush_on_persist(mut self, enabled: bool) -> Self {
        self.flush_on_persist = enabled;
        self
    }

    #[must_use]
    pub fn with_view_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.view_cache_path = Some(path.into());
        self
    }

    /// Build the view cache this configuration describes.
    #[must_use]
    pub fn build_view_cache(&self) -> ViewCache {
        self.view_cache_path
            .as_deref()
            .and_then(file_view_cache)
            .unwrap_or_else(ViewCache::in_memory)
    }
}

#[cfg(feature = "state-persistence")]
fn file_view_cache(path: &Path) -> Option<ViewCache> {
    Some(ViewCache::with_file(path))
}

#[cfg(not(feature = "state-persistence"))]
fn file_view_cache(path: &Path) -> Option<ViewCache> {
    warn!(path = %path.display(), "view cache path ignored without state-persistence");
    None
}

// ─────────────────────────────────────────────────────────────────────────────
// Program
// ─────────────────────────────────────────────────────────────────────────────

/// Runs a [`Model`] with real side effects.
///
/// The model lives on the thread that drives the program. Tasks and save
/// hooks run on spawned threads and report back through the task channel;
/// the host can feed messages through [`sender`](Self::sender).
pub struct Program<M: Model> {
    model: M,
    config: ProgramConfig,
    view_cache: Arc<ViewCache>,
    error_sink: Arc<dyn ErrorSink>,
    save_hook: Option<Arc<dyn SaveHook<M::Message>>>,
    task_sender: mpsc::Sender<M::Message>,
    task_receiver: mpsc::Receiver<M::Message>,
    task_handles: Vec<JoinHandle<()>>,
    running: bool,
    initialized: bool,
}

impl<M: Model> Program<M> {
    /// Create a program; the view cache comes from `config`.
    pub fn new(model: M, config: ProgramConfig) -> Self {
        let view_cache = Arc::new(config.build_view_cache());
        let (task_sender, task_receiver) = mpsc::channel();
        Self {
            model,
            config,
            view_cache,
            error_sink: Arc::new(TracingErrorSink),
            save_hook: None,
            task_sender,
            task_receiver,
            task_handles: Vec::new(),
            running: true,
            initialized: false,
        }
    }

    /// Use a shared view cache instead of the configured one.
    #[must_use]
    pub fn with_view_cache(mut self, cache: Arc<ViewCache>) -> Self {
        self.view_cache = cache;
        self
    }

    #[must_use]
    pub fn with_error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.error_sink = sink;
        self
    }

    #[must_use]
    pub fn with_save_hook(mut self, hook: impl SaveHook<M::Message> + 'static) -> Self {
        self.save_hook = Some(Arc::new(hook));
        self
    }

    /// Channel for messages from other threads.
    #[must_use]
    pub fn sender(&self) -> mpsc::Sender<M::Message> {
        self.task_sender.clone()
    }

    /// Load the view cache and run `Model::init`. Idempotent.
    pub fn init(&mut self) {
        if self.initialized {
            return;
        }
        self.initialized = true;
        if let Err(error) = self.view_cache.load() {
            warn!(backend = %self.view_cache.backend_name(), %error, "failed to load view cache");
        }
        let cmd = self.model.init();
        self.execute_cmd(cmd);
    }

    /// Deliver one message and execute the resulting commands.
    pub fn dispatch(&mut self, msg: M::Message) {
        self.init();
        if !self.running {
            return;
        }
        let cmd = {
            let _span = debug_span!("formflow.program.update").entered();
            self.model.update(msg)
        };
        self.execute_cmd(cmd);
    }

    /// Process every queued message without blocking. Returns the count.
    pub fn pump(&mut self) -> usize {
        self.init();
        let mut processed = 0;
        while self.running {
            let Ok(msg) = self.task_receiver.try_recv() else {
                break;
            };
            self.dispatch(msg);
            processed += 1;
        }
        self.reap_finished_tasks();
        processed
    }

    /// Process messages until `done` holds for the model or `timeout` passes.
    ///
    /// Returns `true` if the condition was met.
    pub fn run_until<F>(&mut self, mut done: F, timeout: Duration) -> bool
    where
        F: FnMut(&M) -> bool,
    {
        self.init();
        let deadline = Instant::now() + timeout;
        loop {
            self.pump();
            if done(&self.model) {
                return true;
            }
            if !self.running {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match self.task_receiver.recv_timeout(remaining) {
                Ok(msg) => self.dispatch(msg),
                Err(mpsc::RecvTimeoutError::Timeout) => return done(&self.model),
                Err(mpsc::RecvTimeoutError::Disconnected) => return false,
            }
        }
    }

    /// Process messages until the model quits.
    pub fn run(&mut self) {
        self.init();
        while self.running {
            match self.task_receiver.recv() {
                Ok(msg) => self.dispatch(msg),
                Err(_) => break,
            }
            self.reap_finished_tasks();
        }
        self.shutdown();
    }

    #[must_use]
    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    #[must_use]
    pub fn config(&self) -> &ProgramConfig {
        &self.config
    }

    #[must_use]
    pub fn view_cache(&self) -> &Arc<ViewCache> {
        &self.view_cache
    }

    fn execute_cmd(&mut self, cmd: Cmd<M::Message>) {
        match cmd {
            Cmd::None => {}
            Cmd::Quit => self.running = false,
            Cmd::Batch(cmds) => {
                for c in cmds {
                    self.execute_cmd(c);
                    if !self.running {
                        break;
                    }
                }
            }
            Cmd::Task(spec, f) => {
                let sender = self.task_sender.clone();
                debug!(task = spec.name.as_deref().unwrap_or("anonymous"), "spawning task");
                let handle = std::thread::spawn(move || {
                    let msg = f();
                    let _ = sender.send(msg);
                });
                self.task_handles.push(handle);
            }
            Cmd::RequestSave => match &self.save_hook {
                Some(hook) => {
                    let hook = Arc::clone(hook);
                    let sender = self.task_sender.clone();
                    let handle = std::thread::spawn(move || {
                        let _ = sender.send(hook.save());
                    });
                    self.task_handles.push(handle);
                }
                None => debug!("save requested without a save hook; waiting for host"),
            },
            Cmd::PersistView { key, page } => {
                self.view_cache.set(key, page);
                if self.config.flush_on_persist
                    && let Err(error) = self.view_cache.flush()
                {
                    warn!(backend = %self.view_cache.backend_name(), %error, "failed to flush view cache");
                }
            }
            Cmd::RestoreView { key, on_restore } => {
                let page = self.view_cache.get(&key);
                let cmd = self.model.update(on_restore(page));
                self.execute_cmd(cmd);
            }
            Cmd::ReportError { message, error } => {
                self.error_sink.report(&message, error.as_ref());
            }
        }
    }

    fn reap_finished_tasks(&mut self) {
        if self.task_handles.is_empty() {
            return;
        }
        let mut remaining = Vec::with_capacity(self.task_handles.len());
        for handle in self.task_handles.drain(..) {
            if !handle.is_finished() {
                remaining.push(handle);
                continue;
            }
            if let Err(payload) = handle.join() {
                let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                    (*s).to_owned()
                } else if let Some(s) = payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic payload".to_owned()
                };
                tracing::error!("spawned task panicked: {msg}");
            }
        }
        self.task_handles = remaining;
    }

    fn shutdown(&mut self) {
        if let Err(error) = self.view_cache.flush() {
            warn!(%error, "failed to flush view cache on shutdown");
        }
        for handle in self.task_handles.drain(..) {
            let _ = handle.join();
        }
    }
}
