//! The control surface a host drives, plus the worker that runs sweeps.
//!
//! Sweeps and login checks run on a dedicated thread that owns a tokio
//! runtime. The walk state lives behind one mutex; admitting a sweep is a
//! single `update` call under that lock, so the timer and on-demand callers
//! can never both start one.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use updater_core::{
    update, Effect, Msg, RejectReason, StatusView, SweepPlan, SweepRequest, WalkState,
};
use updater_logging::{walk_debug, walk_error, walk_info};

use crate::events::{EventSink, SweepReport, WalkEvent};
use crate::fetch::FetchSettings;
use crate::host::Host;
use crate::registry::HandlerRegistry;
use crate::session::{CookieMap, SessionStore};
use crate::settings::{
    sync_site_settings, HandlerDescriptor, SettingsStore, SettingsUpdate, UpdaterSettings,
};
use crate::walker::{WalkContext, Walker};
use crate::ItemId;

pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

#[derive(Clone)]
pub struct UpdaterConfig {
    /// How often the timer checks whether a scheduled sweep is due.
    pub tick_interval: Duration,
    pub fetch: FetchSettings,
    /// Current Unix time in seconds.
    pub clock: Clock,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            fetch: FetchSettings::default(),
            clock: Arc::new(|| chrono::Utc::now().timestamp()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("unable to start the sweep runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Enrolment counts over every item the host manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnrollmentSummary {
    pub enrolled: usize,
    pub not_enrolled: usize,
    pub total: usize,
}

enum EngineCommand {
    RunSweep(SweepPlan),
    TestLogin {
        site_id: String,
        login: String,
        password: String,
        reply: mpsc::Sender<bool>,
    },
    Shutdown,
}

#[derive(Default)]
struct SharedState {
    walk: WalkState,
    sites: BTreeMap<String, HandlerDescriptor>,
}

struct Inner {
    state: Mutex<SharedState>,
    store: Arc<dyn SettingsStore>,
    registry: Arc<HandlerRegistry>,
    sessions: SessionStore,
    host: Arc<dyn Host>,
    events: Arc<dyn EventSink>,
    walker: Walker,
    fetch: FetchSettings,
    clock: Clock,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, SharedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now(&self) -> i64 {
        (self.clock)()
    }

    fn apply(shared: &mut SharedState, msg: Msg) -> Vec<Effect> {
        let (walk, effects) = update(std::mem::take(&mut shared.walk), msg);
        shared.walk = walk;
        effects
    }

    /// Applies `msg` and saves when it changed persisted state.
    fn dispatch(&self, msg: Msg) {
        let mut shared = self.lock();
        let effects = Self::apply(&mut shared, msg);
        if effects.contains(&Effect::PersistSettings) {
            self.save_locked(&mut shared);
        }
    }

    fn settings_locked(&self, shared: &mut SharedState) -> UpdaterSettings {
        sync_site_settings(&mut shared.sites, &self.registry.list_sites());
        UpdaterSettings {
            site_settings: shared.sites.clone(),
            ..UpdaterSettings::default()
        }
        .with_schedule(shared.walk.snapshot())
    }

    fn save_locked(&self, shared: &mut SharedState) {
        let settings = self.settings_locked(shared);
        match self.store.save(&settings) {
            Ok(()) => walk_debug!("Settings saved"),
            Err(err) => walk_error!("Unable to save settings: {}", err),
        }
    }

    fn save(&self) {
        let mut shared = self.lock();
        self.save_locked(&mut shared);
    }

    /// Admits a sweep if the scheduler allows it. Check and transition
    /// happen under one lock.
    fn try_start(&self, request: SweepRequest) -> Option<SweepPlan> {
        let now = self.now();
        let mut shared = self.lock();
        let mut plan = None;
        for effect in Self::apply(&mut shared, Msg::SweepRequested { request, now }) {
            match effect {
                Effect::StartSweep(admitted) => plan = Some(admitted),
                Effect::SweepRejected {
                    reason: RejectReason::AlreadyWalking,
                } => walk_debug!("Sweep request ignored: a sweep is already running"),
                Effect::SweepRejected {
                    reason: RejectReason::NotDue,
                } => {}
                Effect::PersistSettings => self.save_locked(&mut shared),
            }
        }
        drop(shared);

        if let Some(plan) = &plan {
            walk_info!(
                "Sweep started ({} item(s){})",
                plan.items.len(),
                if plan.forced { ", forced" } else { "" }
            );
            self.events.emit(WalkEvent::SweepStarted {
                forced: plan.forced,
                item_count: plan.items.len(),
            });
        }
        plan
    }

    fn finish(&self, report: SweepReport) {
        self.dispatch(Msg::SweepFinished {
            forced: report.forced,
            productive: report.productive,
            finished_at: self.now(),
        });
        walk_info!(
            "Sweep finished: {} updated, {} up to date, {} skipped, {} failed",
            report.updated,
            report.up_to_date,
            report.skipped,
            report.failed
        );
        self.events.emit(WalkEvent::SweepFinished(report));
    }

    /// Returns the scheduler to idle for a plan that could not be run.
    fn abandon(&self, plan: &SweepPlan) {
        walk_error!("Sweep worker is gone; sweep abandoned");
        self.finish(SweepReport {
            forced: plan.forced,
            ..SweepReport::default()
        });
    }

    fn seed_sessions(&self, sites: &BTreeMap<String, HandlerDescriptor>) {
        for (site_id, descriptor) in sites {
            if let Some(cookies) = &descriptor.cookies {
                self.sessions.replace_all(site_id, cookies.clone());
            }
        }
    }

    async fn test_login(&self, site_id: &str, login: &str, password: &str) -> bool {
        let Some(mut handler) = self
            .registry
            .handler_for_site(site_id, &self.sessions, &self.fetch)
        else {
            walk_info!("Unable to find site handler for {}", site_id);
            return false;
        };
        let ok = handler.login(Some(login), Some(password)).await;
        if !ok {
            walk_info!("Login check for {} failed: {}", site_id, handler.error_text());
        }
        ok
    }
}

impl WalkContext for Inner {
    fn site_settings(&self, site_id: &str) -> Option<HandlerDescriptor> {
        self.lock().sites.get(site_id).cloned()
    }

    fn store_site_cookies(&self, site_id: &str, cookies: CookieMap) {
        let requires_login = self
            .registry
            .list_sites()
            .into_iter()
            .find(|(id, _)| id == site_id)
            .is_some_and(|(_, requires_login)| requires_login);
        self.lock()
            .sites
            .entry(site_id.to_string())
            .or_insert_with(|| HandlerDescriptor::new(requires_login))
            .cookies = Some(cookies);
    }

    fn item_replaced(&self, old_item_id: &str, new_item_id: &str) {
        self.dispatch(Msg::ItemReplaced {
            old_item_id: old_item_id.to_string(),
            new_item_id: new_item_id.to_string(),
        });
    }
}

async fn run_sweep(inner: Arc<Inner>, plan: SweepPlan) {
    let outcome = AssertUnwindSafe(inner.walker.run(&plan, inner.as_ref()))
        .catch_unwind()
        .await;
    let report = outcome.unwrap_or_else(|_| {
        walk_error!("Sweep aborted by a panic");
        SweepReport {
            forced: plan.forced,
            ..SweepReport::default()
        }
    });
    inner.finish(report);
}

async fn run_timer(
    inner: Arc<Inner>,
    cmd_tx: mpsc::Sender<EngineCommand>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                if let Some(plan) = inner.try_start(SweepRequest::Scheduled) {
                    if let Err(mpsc::SendError(EngineCommand::RunSweep(plan))) =
                        cmd_tx.send(EngineCommand::RunSweep(plan))
                    {
                        inner.abandon(&plan);
                    }
                }
            }
        }
    }
}

fn run_worker(
    runtime: Runtime,
    inner: Arc<Inner>,
    cmd_rx: mpsc::Receiver<EngineCommand>,
    cmd_tx: mpsc::Sender<EngineCommand>,
    tick_interval: Duration,
) {
    let cancel = CancellationToken::new();
    runtime.spawn(run_timer(
        Arc::clone(&inner),
        cmd_tx,
        tick_interval,
        cancel.clone(),
    ));

    let mut sweep: Option<JoinHandle<()>> = None;
    while let Ok(command) = cmd_rx.recv() {
        match command {
            EngineCommand::RunSweep(plan) => {
                sweep = Some(runtime.spawn(run_sweep(Arc::clone(&inner), plan)));
            }
            EngineCommand::TestLogin {
                site_id,
                login,
                password,
                reply,
            } => {
                let inner = Arc::clone(&inner);
                runtime.spawn(async move {
                    let ok = inner.test_login(&site_id, &login, &password).await;
                    let _ = reply.send(ok);
                });
            }
            EngineCommand::Shutdown => break,
        }
    }

    cancel.cancel();
    if let Some(sweep) = sweep {
        if !sweep.is_finished() {
            walk_info!("Waiting for the running sweep to finish");
        }
        if let Err(err) = runtime.block_on(sweep) {
            walk_error!("Sweep task failed: {}", err);
        }
    }
    inner.save();
    walk_debug!("Updater worker stopped");
}

/// Keeps tracked items current by periodically walking their source pages.
///
/// Dropping an `Updater` stops the timer without waiting; call
/// [`Updater::shutdown`] to let a running sweep finish and save settings.
pub struct Updater {
    inner: Arc<Inner>,
    cmd_tx: mpsc::Sender<EngineCommand>,
    worker: Option<thread::JoinHandle<()>>,
}

impl Updater {
    /// Loads settings, seeds site sessions from them and starts the timer.
    pub fn start(
        registry: HandlerRegistry,
        host: Arc<dyn Host>,
        events: Arc<dyn EventSink>,
        store: Arc<dyn SettingsStore>,
        config: UpdaterConfig,
    ) -> Result<Self, StartError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("updater-sweep")
            .build()?;

        let registry = Arc::new(registry);
        let sessions = SessionStore::new();
        let walker = Walker::new(
            Arc::clone(&registry),
            sessions.clone(),
            Arc::clone(&host),
            Arc::clone(&events),
            config.fetch.clone(),
        );

        let mut settings = store.load();
        sync_site_settings(&mut settings.site_settings, &registry.list_sites());
        let mut shared = SharedState {
            sites: settings.site_settings.clone(),
            ..SharedState::default()
        };
        Inner::apply(&mut shared, Msg::RestoreSchedule(settings.schedule()));

        let inner = Arc::new(Inner {
            state: Mutex::new(shared),
            store,
            registry,
            sessions,
            host,
            events,
            walker,
            fetch: config.fetch,
            clock: config.clock,
        });
        inner.seed_sessions(&settings.site_settings);
        walk_info!(
            "Updater started: {} site(s), {} tracked item(s)",
            inner.registry.len(),
            settings.tracked_item_ids.len()
        );

        let (cmd_tx, cmd_rx) = mpsc::channel();
        let worker = {
            let inner = Arc::clone(&inner);
            let cmd_tx = cmd_tx.clone();
            let tick_interval = config.tick_interval;
            thread::Builder::new()
                .name("updater-worker".to_string())
                .spawn(move || run_worker(runtime, inner, cmd_rx, cmd_tx, tick_interval))?
        };

        Ok(Self {
            inner,
            cmd_tx,
            worker: Some(worker),
        })
    }

    pub fn status(&self) -> StatusView {
        self.inner.lock().walk.view()
    }

    pub fn is_walking(&self) -> bool {
        self.inner.lock().walk.is_walking()
    }

    /// Starts a sweep unless one is running or, for scheduled requests, none is due.
    pub fn request_sweep(&self, request: SweepRequest) -> bool {
        let Some(plan) = self.inner.try_start(request) else {
            return false;
        };
        if let Err(mpsc::SendError(EngineCommand::RunSweep(plan))) =
            self.cmd_tx.send(EngineCommand::RunSweep(plan))
        {
            self.inner.abandon(&plan);
            return false;
        }
        true
    }

    pub fn set_tracked(&self, item_id: impl Into<ItemId>, tracked: bool) {
        self.inner.dispatch(Msg::TrackedChanged {
            item_id: item_id.into(),
            tracked,
        });
    }

    pub fn is_tracked(&self, item_id: &str) -> bool {
        self.inner.lock().walk.is_tracked(item_id)
    }

    pub fn list_tracked(&self) -> Vec<ItemId> {
        self.inner.lock().walk.tracked().to_vec()
    }

    /// `"On"` for enrolled items, `"Off"` otherwise.
    pub fn status_label(&self, item_id: &str) -> &'static str {
        if self.is_tracked(item_id) {
            "On"
        } else {
            "Off"
        }
    }

    pub fn enrollment_summary(&self) -> EnrollmentSummary {
        let items = self.inner.host.enumerate_items();
        let shared = self.inner.lock();
        let enrolled = items
            .iter()
            .filter(|item_id| shared.walk.is_tracked(item_id))
            .count();
        EnrollmentSummary {
            enrolled,
            not_enrolled: items.len() - enrolled,
            total: items.len(),
        }
    }

    /// Runs `site_id`'s login flow with the given credentials. Blocks until
    /// the worker answers.
    pub fn test_login(&self, site_id: &str, login: &str, password: &str) -> bool {
        let (reply, answer) = mpsc::channel();
        let command = EngineCommand::TestLogin {
            site_id: site_id.to_string(),
            login: login.to_string(),
            password: password.to_string(),
            reply,
        };
        if self.cmd_tx.send(command).is_err() {
            return false;
        }
        answer.recv().unwrap_or(false)
    }

    pub fn settings(&self) -> UpdaterSettings {
        let mut shared = self.inner.lock();
        self.inner.settings_locked(&mut shared)
    }

    /// Applies `update` and saves. New site descriptors replace the live
    /// cookie sessions of the sites that carry cookies.
    pub fn set_settings(&self, update: SettingsUpdate) {
        let mut shared = self.inner.lock();
        if let Some(hours) = update.walk_period_hours {
            Inner::apply(&mut shared, Msg::PeriodChanged { hours });
        }
        if let Some(sites) = update.site_settings {
            self.inner.seed_sessions(&sites);
            shared.sites = sites;
        }
        self.inner.save_locked(&mut shared);
    }

    /// Stops the timer, waits for a running sweep and saves settings.
    pub fn shutdown(mut self) {
        let _ = self.cmd_tx.send(EngineCommand::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                walk_error!("Updater worker panicked");
            }
        }
    }
}

impl Drop for Updater {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.cmd_tx.send(EngineCommand::Shutdown);
        }
    }
}
