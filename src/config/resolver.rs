//! Configuration Resolver
//!
//! Holds the resolved sections and keeps them current while the backing
//! file changes. A reload builds a complete new [`Sections`] outside the
//! lock and publishes it with a single swap, so readers always see one
//! resolution pass.

use super::env::{EnvSource, ProcessEnv};
use super::error::{ConfigError, ConfigResult};
use super::loader::{ConfigLoader, ConfigSource};
use super::log_writers::{open_log_writers, LogWriter, LogWritersError};
use super::types::Sections;
use notify::event::ModifyKind;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info, warn};

const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(100);
const EVENT_CAPACITY: usize = 16;

/// What a failed reload does
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReloadPolicy {
    /// The failure is fatal: publish [`ReloadEvent::Fatal`] so the owner can
    /// terminate. With no subscriber the process exits with status 1.
    #[default]
    Escalate,
    /// Log the failure, publish [`ReloadEvent::Rejected`] and keep serving
    /// the previous values.
    KeepCurrent,
}

/// Outcome of a reload triggered by a file change
#[derive(Debug, Clone)]
pub enum ReloadEvent {
    Applied {
        sections: Arc<Sections>,
        file_path: PathBuf,
        timestamp: SystemTime,
    },
    Rejected {
        error: Arc<ConfigError>,
        file_path: PathBuf,
        timestamp: SystemTime,
    },
    Fatal {
        error: Arc<ConfigError>,
        file_path: PathBuf,
        timestamp: SystemTime,
    },
}

impl ReloadEvent {
    pub fn file_path(&self) -> &Path {
        match self {
            Self::Applied { file_path, .. }
            | Self::Rejected { file_path, .. }
            | Self::Fatal { file_path, .. } => file_path,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }
}

struct Shared {
    path: PathBuf,
    current: RwLock<Arc<Sections>>,
    /// Held for a whole pass so swaps land in the order files were read
    reload_lock: Mutex<()>,
    env: Box<dyn EnvSource + Send + Sync>,
    policy: ReloadPolicy,
    settle_delay: Duration,
    faulted: AtomicBool,
    closed: AtomicBool,
    events: broadcast::Sender<ReloadEvent>,
}

impl Shared {
    fn snapshot(&self) -> Arc<Sections> {
        self.current.read().clone()
    }

    /// Full resolution pass; publishes only if every section resolved
    fn reload(&self) -> ConfigResult<Arc<Sections>> {
        let _pass = self.reload_lock.lock();
        let sections = Arc::new(ConfigLoader::load(&self.path, self.env.as_ref())?);
        *self.current.write() = sections.clone();

        let event = ReloadEvent::Applied {
            sections: sections.clone(),
            file_path: self.path.clone(),
            timestamp: SystemTime::now(),
        };
        if self.events.send(event).is_err() {
            debug!("No subscribers for config change event");
        }

        info!("Configuration reloaded successfully");
        Ok(sections)
    }

    /// Reload and hand any failure to the reload policy
    fn refresh(&self) {
        if let Err(e) = self.reload() {
            self.reload_failed(e);
        }
    }

    fn reload_failed(&self, error: ConfigError) {
        let error = Arc::new(error);
        let file_path = self.path.clone();
        let timestamp = SystemTime::now();

        match self.policy {
            ReloadPolicy::KeepCurrent => {
                error!("Failed to reload configuration, keeping current config: {}", error);
                let event = ReloadEvent::Rejected {
                    error,
                    file_path,
                    timestamp,
                };
                if self.events.send(event).is_err() {
                    debug!("No subscribers for config rejection event");
                }
            }
            ReloadPolicy::Escalate => {
                error!("Configuration reload failed, escalating: {}", error);
                self.faulted.store(true, Ordering::SeqCst);
                let event = ReloadEvent::Fatal {
                    error,
                    file_path,
                    timestamp,
                };
                if self.events.send(event).is_err() {
                    if self.closed.load(Ordering::SeqCst) {
                        debug!("Resolver dropped, ignoring reload fault");
                        return;
                    }
                    error!("No subscriber to handle the reload fault, terminating");
                    std::process::exit(1);
                }
            }
        }
    }

    fn handle_file_event(&self, event: Event) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        debug!("File event: {:?}", event);

        let affects_config = event
            .paths
            .iter()
            .any(|path| path.file_name() == self.path.file_name());
        if !affects_config {
            return;
        }

        match event.kind {
            EventKind::Modify(ModifyKind::Metadata(_)) => {
                debug!("Ignoring metadata change on {}", self.path.display());
            }
            EventKind::Modify(_) | EventKind::Create(_) => {
                info!("Config file changed, reloading {}", self.path.display());
                // let the writer finish before reading
                std::thread::sleep(self.settle_delay);
                self.refresh();
            }
            EventKind::Remove(_) => {
                warn!("Configuration file was removed: {}", self.path.display());
            }
            _ => {
                debug!("Ignoring file event type: {:?}", event.kind);
            }
        }
    }
}

/// Builder for [`ConfigResolver`]
pub struct ResolverBuilder {
    source: ConfigSource,
    env: Box<dyn EnvSource + Send + Sync>,
    policy: ReloadPolicy,
    settle_delay: Duration,
    watch: bool,
}

impl Default for ResolverBuilder {
    fn default() -> Self {
        Self {
            source: ConfigSource::default(),
            env: Box::new(ProcessEnv),
            policy: ReloadPolicy::default(),
            settle_delay: DEFAULT_SETTLE_DELAY,
            watch: true,
        }
    }
}

impl ResolverBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Search these directories, in order, instead of the defaults
    pub fn search_paths<I, P>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.source = ConfigSource::Search(dirs.into_iter().map(Into::into).collect());
        self
    }

    /// Use exactly this file
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.source = ConfigSource::File(path.into());
        self
    }

    /// Read overrides from `env` instead of the process environment
    pub fn env(mut self, env: impl EnvSource + Send + Sync + 'static) -> Self {
        self.env = Box::new(env);
        self
    }

    pub fn policy(mut self, policy: ReloadPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Pause between a change notification and re-reading the file
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Whether to watch the file for changes (default: true)
    pub fn watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    /// Locate the file, resolve every section and start watching
    pub fn build(self) -> ConfigResult<ConfigResolver> {
        let located = ConfigLoader::locate(&self.source)?;
        let path = std::fs::canonicalize(&located).map_err(|source| ConfigError::Read {
            path: located.clone(),
            source,
        })?;

        let sections = ConfigLoader::load(&path, self.env.as_ref())?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let shared = Arc::new(Shared {
            path,
            current: RwLock::new(Arc::new(sections)),
            reload_lock: Mutex::new(()),
            env: self.env,
            policy: self.policy,
            settle_delay: self.settle_delay,
            faulted: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            events,
        });

        let watcher = if self.watch {
            Some(Self::start_watcher(&shared)?)
        } else {
            None
        };

        Ok(ConfigResolver {
            shared,
            _watcher: watcher,
        })
    }

    fn start_watcher(shared: &Arc<Shared>) -> ConfigResult<RecommendedWatcher> {
        let handler = shared.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => handler.handle_file_event(event),
                Err(e) => error!("File watcher error: {}", e),
            },
            NotifyConfig::default(),
        )?;

        // Watch the directory: editors often replace the file instead of
        // writing it in place.
        let dir = shared.path.parent().unwrap_or(Path::new("/"));
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        info!("Started watching configuration directory: {}", dir.display());

        Ok(watcher)
    }
}

/// Typed, live view of the layered configuration
pub struct ConfigResolver {
    shared: Arc<Shared>,
    _watcher: Option<RecommendedWatcher>,
}

impl std::fmt::Debug for ConfigResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigResolver")
            .field("path", &self.shared.path)
            .field("policy", &self.shared.policy)
            .field("watching", &self._watcher.is_some())
            .finish()
    }
}

impl Drop for ConfigResolver {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::SeqCst);
    }
}

impl ConfigResolver {
    /// Resolve from the default search paths and the process environment
    pub fn new() -> ConfigResult<Self> {
        ResolverBuilder::new().build()
    }

    pub fn builder() -> ResolverBuilder {
        ResolverBuilder::new()
    }

    /// Resolved path of the configuration file
    pub fn config_path(&self) -> &Path {
        &self.shared.path
    }

    pub fn policy(&self) -> ReloadPolicy {
        self.shared.policy
    }

    /// Every section from the latest successful pass
    pub fn snapshot(&self) -> Arc<Sections> {
        self.shared.snapshot()
    }

    /// Subscribe to reload outcomes
    pub fn subscribe(&self) -> BroadcastStream<ReloadEvent> {
        BroadcastStream::new(self.shared.events.subscribe())
    }

    /// Whether an escalated reload failure has occurred
    pub fn is_faulted(&self) -> bool {
        self.shared.faulted.load(Ordering::SeqCst)
    }

    /// Re-resolve now and return any failure to the caller.
    ///
    /// On error the previous values stay in place and the reload policy is
    /// not consulted.
    pub fn reload(&self) -> ConfigResult<Arc<Sections>> {
        info!("Force reloading configuration from: {}", self.shared.path.display());
        self.shared.reload()
    }

    /// Re-resolve as a change notification would, applying the reload
    /// policy on failure
    pub fn refresh(&self) {
        self.shared.refresh();
    }

    /// Application cycle wait
    pub fn delta(&self) -> i64 {
        self.snapshot().core.delta
    }

    /// Standard output, then one append-mode handle per configured path.
    /// Opens the files on every call.
    pub fn log_writers(&self) -> Result<Vec<LogWriter>, LogWritersError> {
        open_log_writers(&self.snapshot().log.path)
    }

    pub fn log_level(&self) -> u64 {
        self.snapshot().log.level
    }

    /// Whether log lines carry a timestamp
    pub fn log_time(&self) -> bool {
        self.snapshot().log.time
    }

    /// Postgres connection string
    pub fn database_url(&self) -> String {
        self.snapshot().database.url()
    }

    /// `host:port` of the IMAP server
    pub fn imap_server(&self) -> String {
        self.snapshot().imap.server()
    }

    pub fn imap_user(&self) -> String {
        self.snapshot().imap.user.clone()
    }

    pub fn imap_pass(&self) -> String {
        self.snapshot().imap.pass.clone()
    }

    /// Messages fetched per cycle
    pub fn imap_msg(&self) -> i64 {
        self.snapshot().imap.msg
    }

    /// Mailboxes processed at a time
    pub fn emailbot_proc(&self) -> i64 {
        self.snapshot().emailbot.proc
    }
}
