#![forbid(unsafe_code)]

//! Deterministic program simulator for testing.
//!
//! `ProgramSimulator` runs a [`Model`] on the calling thread with no worker
//! threads. Tasks either run inline or, with
//! [`defer_tasks`](ProgramSimulator::defer_tasks), wait in a queue until the
//! test releases them, which makes interleavings reproducible.
//!
//! # Example
//!
//! ```ignore
//! use formflow_runtime::simulator::ProgramSimulator;
//!
//! let mut sim = ProgramSimulator::new(model);
//! sim.init();
//! sim.send(FormMsg::Navigate(NavigationRequest::to("p3")));
//! assert_eq!(sim.model().current_view(), Some(&"p3".into()));
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use formflow_core::PageId;
use tracing::warn;

use crate::error_sink::ErrorReport;
use crate::program::{Cmd, Model, SaveHook, TaskSpec};
use crate::view_cache::ViewCache;

/// Record of a command executed during simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CmdRecord {
    None,
    Quit,
    Batch(usize),
    /// Background task, executed inline or queued.
    Task(Option<String>),
    RequestSave,
    PersistView { key: String, page: PageId },
    RestoreView { key: String, found: bool },
    ReportError(String),
}

type PendingTask<M> = (TaskSpec, Box<dyn FnOnce() -> M + Send>);

/// Deterministic simulator for [`Model`] testing.
pub struct ProgramSimulator<M: Model> {
    model: M,
    command_log: Vec<CmdRecord>,
    running: bool,
    errors: Vec<ErrorReport>,
    storage_failures: Vec<String>,
    view_cache: Arc<ViewCache>,
    save_hook: Option<Arc<dyn SaveHook<M::Message>>>,
    defer_tasks: bool,
    pending_tasks: VecDeque<PendingTask<M::Message>>,
}

impl<M: Model> ProgramSimulator<M> {
    /// Simulator with an in-memory view cache. Call [`init`](Self::init) next.
    pub fn new(model: M) -> Self {
        Self {
            model,
            command_log: Vec::new(),
            running: true,
            errors: Vec::new(),
            storage_failures: Vec::new(),
            view_cache: Arc::new(ViewCache::in_memory()),
            save_hook: None,
            defer_tasks: false,
            pending_tasks: VecDeque::new(),
        }
    }

    /// Use a shared view cache.
    #[must_use]
    pub fn with_view_cache(mut self, cache: Arc<ViewCache>) -> Self {
        self.view_cache = cache;
        self
    }

    /// Answer `Cmd::RequestSave` inline through `hook`.
    #[must_use]
    pub fn with_save_hook(mut self, hook: impl SaveHook<M::Message> + 'static) -> Self {
        self.save_hook = Some(Arc::new(hook));
        self
    }

    /// Queue tasks instead of running them inline.
    #[must_use]
    pub fn defer_tasks(mut self) -> Self {
        self.defer_tasks = true;
        self
    }

    /// Run `Model::init` and its commands.
    pub fn init(&mut self) {
        let cmd = self.model.init();
        self.execute_cmd(cmd);
    }

    /// Send a message through `Model::update`.
    pub fn send(&mut self, msg: M::Message) {
        if !self.running {
            return;
        }
        let cmd = self.model.update(msg);
        self.execute_cmd(cmd);
    }

    /// Run the oldest queued task. Returns `false` if none was queued.
    pub fn run_next_task(&mut self) -> bool {
        let Some((_, f)) = self.pending_tasks.pop_front() else {
            return false;
        };
        self.send(f());
        true
    }

    /// Run queued tasks, including ones they queue, until none remain.
    pub fn run_pending_tasks(&mut self) -> usize {
        let mut ran = 0;
        while self.run_next_task() {
            ran += 1;
        }
        ran
    }

    /// Take the oldest queued task without running it.
    ///
    /// The test decides when (and whether) to deliver its result.
    pub fn take_next_task(&mut self) -> Option<Box<dyn FnOnce() -> M::Message + Send>> {
        self.pending_tasks.pop_front().map(|(_, f)| f)
    }

    #[must_use]
    pub fn pending_task_count(&self) -> usize {
        self.pending_tasks.len()
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Errors delivered through `Cmd::ReportError`.
    pub fn errors(&self) -> &[ErrorReport] {
        &self.errors
    }

    /// View-cache flush failures, in order.
    pub fn storage_failures(&self) -> &[String] {
        &self.storage_failures
    }

    pub fn command_log(&self) -> &[CmdRecord] {
        &self.command_log
    }

    /// Number of logged commands matching `pred`.
    pub fn count_commands(&self, pred: impl Fn(&CmdRecord) -> bool) -> usize {
        self.command_log.iter().filter(|r| pred(r)).count()
    }

    pub fn clear_command_log(&mut self) {
        self.command_log.clear();
    }

    pub fn view_cache(&self) -> &Arc<ViewCache> {
        &self.view_cache
    }

    fn execute_cmd(&mut self, cmd: Cmd<M::Message>) {
        match cmd {
            Cmd::None => self.command_log.push(CmdRecord::None),
            Cmd::Quit => {
                self.running = false;
                self.command_log.push(CmdRecord::Quit);
            }
            Cmd::Batch(cmds) => {
                self.command_log.push(CmdRecord::Batch(cmds.len()));
                for c in cmds {
                    self.execute_cmd(c);
                    if !self.running {
                        break;
                    }
                }
            }
            Cmd::Task(spec, f) => {
                self.command_log.push(CmdRecord::Task(spec.name.clone()));
                if self.defer_tasks {
                    self.pending_tasks.push_back((spec, f));
                } else {
                    let cmd = self.model.update(f());
                    self.execute_cmd(cmd);
                }
            }
            Cmd::RequestSave => {
                self.command_log.push(CmdRecord::RequestSave);
                if let Some(hook) = self.save_hook.clone() {
                    let cmd = self.model.update(hook.save());
                    self.execute_cmd(cmd);
                }
            }
            Cmd::PersistView { key, page } => {
                self.command_log.push(CmdRecord::PersistView {
                    key: key.clone(),
                    page: page.clone(),
                });
                self.view_cache.set(key, page);
                if let Err(error) = self.view_cache.flush() {
                    warn!(backend = %self.view_cache.backend_name(), %error, "failed to flush view cache");
                    self.storage_failures.push(error.to_string());
                }
            }
            Cmd::RestoreView { key, on_restore } => {
                let page = self.view_cache.get(&key);
                self.command_log.push(CmdRecord::RestoreView {
                    key,
                    found: page.is_some(),
                });
                let cmd = self.model.update(on_restore(page));
                self.execute_cmd(cmd);
            }
            Cmd::ReportError { message, error } => {
                self.command_log.push(CmdRecord::ReportError(message.clone()));
                self.errors.push(ErrorReport {
                    message,
                    error: error.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view_cache::{StorageError, StorageResult, ViewEntries, ViewStorage};

    #[derive(Default)]
    struct Tally {
        total: u32,
        saved: u32,
    }

    #[derive(Debug)]
    enum TallyMsg {
        Add(u32),
        AddLater(u32),
        Save,
        Saved,
        Visit(&'static str),
        Stop,
    }

    impl Model for Tally {
        type Message = TallyMsg;

        fn update(&mut self, msg: TallyMsg) -> Cmd<TallyMsg> {
            match msg {
                TallyMsg::Add(n) => {
                    self.total += n;
                    Cmd::none()
                }
                TallyMsg::AddLater(n) => Cmd::task_named("add", move || TallyMsg::Add(n)),
                TallyMsg::Save => Cmd::request_save(),
                TallyMsg::Saved => {
                    self.saved += 1;
                    Cmd::none()
                }
                TallyMsg::Visit(page) => Cmd::persist_view("tally", PageId::from(page)),
                TallyMsg::Stop => Cmd::quit(),
            }
        }
    }

    #[test]
    fn tasks_run_inline_by_default() {
        let mut sim = ProgramSimulator::new(Tally::default());
        sim.send(TallyMsg::AddLater(3));
        assert_eq!(sim.model().total, 3);
        assert_eq!(sim.command_log(), &[CmdRecord::Task(Some("add".into())), CmdRecord::None]);
    }

    #[test]
    fn deferred_tasks_wait_for_release() {
        let mut sim = ProgramSimulator::new(Tally::default()).defer_tasks();
        sim.send(TallyMsg::AddLater(1));
        sim.send(TallyMsg::AddLater(2));
        assert_eq!(sim.model().total, 0);
        assert_eq!(sim.pending_task_count(), 2);
        assert_eq!(sim.run_pending_tasks(), 2);
        assert_eq!(sim.model().total, 3);
    }

    #[test]
    fn save_requests_are_recorded_and_answered_by_hook() {
        let mut sim = ProgramSimulator::new(Tally::default());
        sim.send(TallyMsg::Save);
        assert_eq!(sim.model().saved, 0);
        assert_eq!(sim.count_commands(|r| *r == CmdRecord::RequestSave), 1);

        let mut sim = ProgramSimulator::new(Tally::default()).with_save_hook(|| TallyMsg::Saved);
        sim.send(TallyMsg::Save);
        assert_eq!(sim.model().saved, 1);
    }

    #[test]
    fn quit_stops_message_delivery() {
        let mut sim = ProgramSimulator::new(Tally::default());
        sim.send(TallyMsg::Stop);
        sim.send(TallyMsg::Add(5));
        assert!(!sim.is_running());
        assert_eq!(sim.model().total, 0);
    }

    /// Backend whose writes always fail.
    struct ReadOnlyStorage;

    impl ViewStorage for ReadOnlyStorage {
        fn name(&self) -> &str {
            "ReadOnlyStorage"
        }

        fn load_all(&self) -> StorageResult<ViewEntries> {
            Ok(ViewEntries::new())
        }

        fn save_all(&self, _entries: &ViewEntries) -> StorageResult<()> {
            Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only",
            )))
        }

        fn clear(&self) -> StorageResult<()> {
            Ok(())
        }
    }

    #[test]
    fn flush_failures_are_recorded() {
        let cache = Arc::new(ViewCache::new(Box::new(ReadOnlyStorage)));
        let mut sim = ProgramSimulator::new(Tally::default()).with_view_cache(cache);
        sim.send(TallyMsg::Visit("p1"));

        assert_eq!(sim.storage_failures().len(), 1);
        assert!(sim.storage_failures()[0].contains("read-only"));
        // The in-memory entry survives the failed write.
        assert_eq!(sim.view_cache().get("tally"), Some(PageId::from("p1")));
        assert!(sim.view_cache().is_dirty());
    }
}
