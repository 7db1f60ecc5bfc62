//! Launching and supervising the wrapped application.
//!
//! The supervisor starts the application, then once per frame follows its
//! process tree: descendants are adopted, dead processes dropped, and the
//! session is asked to shut down when the application is gone.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::{LaunchConfig, LaunchKind};
use crate::error::{LaunchError, LaunchResult};

/// One entry of the OS process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub parent_pid: u32,
    /// Image name, e.g. `game.exe`.
    pub name: String,
}

/// The OS side of process supervision.
pub trait ProcessHost {
    /// Creates a process without inheriting handles. `elevated` goes
    /// through the shell's elevation prompt instead.
    fn launch_native(&mut self, path: &str, args: &str, elevated: bool) -> LaunchResult<u32>;

    /// Hands a URL to the shell. Returns the pid of the handling process
    /// when the shell reports one.
    fn open_url(&mut self, url: &str, args: &str, elevated: bool) -> LaunchResult<Option<u32>>;

    /// Activates a platform package. May return before the pid is known;
    /// the pid is then reported through [`SharedPids::resolve_pending`].
    fn activate_package(&mut self, app_id: &str, args: &str, pids: SharedPids) -> LaunchResult<()>;

    /// Zero-timeout liveness check.
    fn is_alive(&mut self, pid: u32) -> bool;

    /// The current process table.
    fn snapshot(&mut self) -> Vec<ProcessInfo>;

    /// Releases OS handles retained from the launch.
    fn release(&mut self) {}
}

/// A supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedProcess {
    /// `0` while a package activation hasn't reported its pid yet.
    pub pid: u32,
    pub name: String,
    /// Started by the launch itself rather than adopted as a descendant.
    pub root: bool,
}

impl TrackedProcess {
    pub fn is_pending(&self) -> bool {
        self.pid == 0
    }
}

#[derive(Debug, Default)]
struct LauncherPolicy {
    names: Vec<String>,
    ignore: bool,
    kill: bool,
}

impl LauncherPolicy {
    fn matches(&self, name: &str) -> bool {
        self.names.iter().any(|n| n.eq_ignore_ascii_case(name))
    }
}

/// The managed process set, shared with the control endpoint thread.
///
/// The lock is held only to copy or mutate the list.
#[derive(Debug, Clone, Default)]
pub struct SharedPids {
    processes: Arc<Mutex<Vec<TrackedProcess>>>,
    policy: Arc<LauncherPolicy>,
}

impl SharedPids {
    pub fn new(config: &LaunchConfig) -> Self {
        Self {
            processes: Arc::default(),
            policy: Arc::new(LauncherPolicy {
                names: config.launcher_processes.clone(),
                ignore: config.ignore_launcher,
                kill: config.kill_launcher,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TrackedProcess>> {
        self.processes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Live supervised pids. Launcher processes are left out when
    /// launchers are ignored, unless they are to be killed as well.
    pub fn launched_pids(&self) -> Vec<u32> {
        let filter = self.policy.ignore && !self.policy.kill;
        self.lock()
            .iter()
            .filter(|p| !p.is_pending())
            .filter(|p| !(filter && self.policy.matches(&p.name)))
            .map(|p| p.pid)
            .collect()
    }

    /// Every tracked entry, the pending sentinel included.
    pub fn all(&self) -> Vec<TrackedProcess> {
        self.lock().clone()
    }

    pub fn contains(&self, pid: u32) -> bool {
        pid != 0 && self.lock().iter().any(|p| p.pid == pid)
    }

    /// Fills in the pid of a pending package activation.
    pub fn resolve_pending(&self, pid: u32, name: &str) {
        let mut processes = self.lock();
        if let Some(pending) = processes.iter_mut().find(|p| p.is_pending()) {
            tracing::info!("Package activation reported pid {pid}");
            pending.pid = pid;
            pending.name = name.to_string();
        }
    }

    /// Drops the pending entry of an activation that failed.
    pub fn abandon_pending(&self) {
        self.lock().retain(|p| !p.is_pending());
    }

    fn push(&self, process: TrackedProcess) {
        self.lock().push(process);
    }

    fn is_launcher(&self, name: &str) -> bool {
        self.policy.matches(name)
    }

    fn has_launchers(&self) -> bool {
        !self.policy.names.is_empty()
    }
}

pub struct ProcessSupervisor {
    host: Box<dyn ProcessHost + Send>,
    config: LaunchConfig,
    pids: SharedPids,
    kind: Option<LaunchKind>,
    /// The non-launcher set was non-empty at some point.
    saw_game: bool,
    /// Something was tracked at some point. An empty set only means
    /// "exited" after that; a pid-less URL launch starts out empty.
    ever_tracked: bool,
    shutdown: bool,
}

impl ProcessSupervisor {
    pub fn new(host: Box<dyn ProcessHost + Send>, config: &LaunchConfig) -> Self {
        Self {
            host,
            pids: SharedPids::new(config),
            config: config.clone(),
            kind: None,
            saw_game: false,
            ever_tracked: false,
            shutdown: false,
        }
    }

    /// Handle to the managed set for other threads.
    pub fn shared(&self) -> SharedPids {
        self.pids.clone()
    }

    pub fn launched_pids(&self) -> Vec<u32> {
        self.pids.launched_pids()
    }

    /// Set once the supervised application is considered gone.
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown
    }

    /// Starts `path` as a native executable, a URL or a package,
    /// depending on its shape.
    pub fn launch(&mut self, path: &str, args: &str) -> LaunchResult<()> {
        let kind = LaunchKind::from_path(path);
        self.kind = Some(kind);
        tracing::info!("Launching {kind:?} target {path}");

        match kind {
            LaunchKind::Native => {
                let pid = match self.host.launch_native(path, args, false) {
                    Err(LaunchError::ElevationRequired) => {
                        tracing::info!("Launch requires elevation; retrying elevated");
                        self.host.launch_native(path, args, true)?
                    }
                    other => other?,
                };
                self.track_root(pid, image_name(path));
            }
            LaunchKind::Url => {
                let pid = match self.host.open_url(path, args, false) {
                    Err(LaunchError::AccessDenied) => {
                        tracing::info!("Opening URL was denied; retrying elevated");
                        self.host.open_url(path, args, true)?
                    }
                    other => other?,
                };
                match pid {
                    Some(pid) => {
                        let name = self
                            .host
                            .snapshot()
                            .into_iter()
                            .find(|p| p.pid == pid)
                            .map(|p| p.name)
                            .unwrap_or_default();
                        self.track_root(pid, name);
                    }
                    None => tracing::info!("URL handler reported no process; waiting for a launcher"),
                }
            }
            LaunchKind::Package => {
                self.pids.push(TrackedProcess {
                    pid: 0,
                    name: String::new(),
                    root: true,
                });
                self.ever_tracked = true;
                if let Err(e) = self.host.activate_package(path, args, self.pids.clone()) {
                    self.pids.abandon_pending();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn track_root(&mut self, pid: u32, name: String) {
        tracing::info!("Launched {name} with pid {pid}");
        self.ever_tracked = true;
        self.pids.push(TrackedProcess {
            pid,
            name,
            root: true,
        });
    }

    /// One supervision pass. Called once per frame.
    pub fn update(&mut self) {
        if self.kind.is_none() {
            return;
        }

        for root in self.pids.all().iter().filter(|p| p.root && !p.is_pending()) {
            if self.host.is_alive(root.pid) {
                continue;
            }
            tracing::info!("Launched app with pid {} died", root.pid);
            self.pids.lock().retain(|p| p.pid != root.pid);
            if self.config.close_on_exit && !self.config.wait_for_child_processes {
                self.request_shutdown("Configured to close on exit");
            }
        }

        if !self.config.wait_for_child_processes {
            return;
        }

        let table = self.host.snapshot();
        if self.kind == Some(LaunchKind::Url) && self.pids.all().is_empty() {
            self.adopt_launchers(&table);
        }
        self.adopt_descendants(&table);
        self.prune_dead();
        self.check_exit();
    }

    /// Releases OS handles retained from the launch.
    pub fn close(&mut self) {
        self.host.release();
    }

    /// A URL launch doesn't always yield a pid; the launcher that handled
    /// it is the root of the tree instead.
    fn adopt_launchers(&mut self, table: &[ProcessInfo]) {
        for process in table.iter().filter(|p| self.pids.is_launcher(&p.name)) {
            tracing::debug!("Tracking launcher {} ({})", process.name, process.pid);
            self.pids.push(TrackedProcess {
                pid: process.pid,
                name: process.name.clone(),
                root: true,
            });
        }
    }

    fn adopt_descendants(&mut self, table: &[ProcessInfo]) {
        let mut known: HashSet<u32> = self
            .pids
            .all()
            .iter()
            .filter(|p| !p.is_pending())
            .map(|p| p.pid)
            .collect();
        let mut frontier: Vec<u32> = known.iter().copied().collect();

        while let Some(parent) = frontier.pop() {
            for child in table.iter().filter(|p| p.parent_pid == parent && p.pid != 0) {
                if known.insert(child.pid) {
                    tracing::debug!("Tracking child {} ({}) of {parent}", child.name, child.pid);
                    self.pids.push(TrackedProcess {
                        pid: child.pid,
                        name: child.name.clone(),
                        root: false,
                    });
                    frontier.push(child.pid);
                }
            }
        }
    }

    fn prune_dead(&mut self) {
        let dead: Vec<u32> = self
            .pids
            .all()
            .iter()
            .filter(|p| !p.is_pending())
            .map(|p| p.pid)
            .filter(|&pid| !self.host.is_alive(pid))
            .collect();
        if dead.is_empty() {
            return;
        }
        tracing::debug!("Processes exited: {dead:?}");
        self.pids.lock().retain(|p| !dead.contains(&p.pid));
    }

    /// Once anything was tracked, an empty set means everything exited.
    /// Before that (a URL launch whose handler hasn't shown up yet) the
    /// session keeps waiting.
    fn check_exit(&mut self) {
        let tracked = self.pids.all();
        let games = tracked
            .iter()
            .filter(|p| !p.is_pending() && !self.pids.is_launcher(&p.name))
            .count();
        let launchers = tracked.len() - games - tracked.iter().filter(|p| p.is_pending()).count();

        if games > 0 {
            self.saw_game = true;
        } else if self.saw_game && launchers > 0 && self.pids.has_launchers() {
            tracing::info!("Game exited; only launcher processes remain");
            self.saw_game = false;
            if self.config.close_on_exit {
                self.request_shutdown("Configured to close on exit");
            }
        }

        if !tracked.is_empty() {
            self.ever_tracked = true;
        } else if self.ever_tracked && self.config.close_on_exit {
            self.request_shutdown("All launched processes exited");
        }
    }

    fn request_shutdown(&mut self, reason: &str) {
        if !self.shutdown {
            tracing::info!("{reason}; shutting down");
            self.shutdown = true;
        }
    }
}

fn image_name(path: &str) -> String {
    Path::new(&path.replace('\\', "/"))
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
