//! # Launch Orchestration
//!
//! One launch attempt, start to finish:
//!
//! 1. Resolve the UWPHook executable.
//! 2. Spawn `UWPHook.exe <aumid> <exe> [flags...]`, detached.
//! 3. Poll the process table until the game executable shows up, or give up
//!    after the launch timeout (45 s by default).
//! 4. Apply the affinity mask and priority class to every instance.
//! 5. Format the presence payload.
//!
//! Nothing here retries. A failed attempt is reported once and the user launches again.

use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::GameProfile;
use crate::hook::HookLocator;
use crate::mask;
use crate::presence::{self, PresenceFields, PresencePayload, PresenceTemplates};
use crate::process_list::find_process_ids;
use crate::system::ProcessController;
use crate::tuning::{self, TuningReport};

/// Everything needed for one launch: the profile plus this session's toggles.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub profile: GameProfile,
    pub use_flags: bool,
    pub mask_hex: String,
    pub apply_affinity: bool,
    pub apply_priority: bool,
    /// Appended after the profile's flags; never saved.
    pub extra_flags: Vec<String>,
    pub hook_override: Option<PathBuf>,
    pub presence_templates: PresenceTemplates,
}

impl LaunchRequest {
    /// A request that uses the profile's own toggles.
    pub fn from_profile(profile: GameProfile, presence_templates: PresenceTemplates) -> Self {
        Self {
            use_flags: profile.use_flags,
            mask_hex: profile.affinity_mask_hex.clone(),
            apply_affinity: profile.apply_affinity,
            apply_priority: profile.apply_high_priority,
            extra_flags: Vec::new(),
            hook_override: None,
            presence_templates,
            profile,
        }
    }

    pub fn effective_flags(&self) -> Vec<String> {
        let base: &[String] = if self.use_flags {
            self.profile.flags.as_slice()
        } else {
            &[]
        };
        base.iter().chain(&self.extra_flags).cloned().collect()
    }

    /// `[hook, aumid, exe, flags...]`
    pub fn argv(&self, hook: &std::path::Path) -> Vec<OsString> {
        let mut argv = vec![
            hook.as_os_str().to_os_string(),
            OsString::from(&self.profile.launch_target),
            OsString::from(&self.profile.process_name),
        ];
        argv.extend(self.effective_flags().into_iter().map(OsString::from));
        argv
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchTiming {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for LaunchTiming {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(45),
            poll_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("UWPHook.exe not found. Please locate it.")]
    NoHook,
    #[error("Failed to start hook: {0}")]
    Spawn(#[source] io::Error),
    #[error("Could not find process: {exe}")]
    Timeout { exe: String, waited: Duration },
    #[error("Launch cancelled.")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct LaunchReport {
    pub hook_pid: u32,
    pub tuning: TuningReport,
    /// `None` when the templates could not be formatted.
    pub presence: Option<PresencePayload>,
}

pub struct Launcher<P> {
    processes: Arc<P>,
    hooks: Arc<HookLocator>,
    timing: LaunchTiming,
    cpu_count: Option<usize>,
}

impl<P: ProcessController> Launcher<P> {
    pub fn new(processes: Arc<P>, hooks: HookLocator, timing: LaunchTiming) -> Self {
        Self {
            processes,
            hooks: Arc::new(hooks),
            timing,
            cpu_count: mask::logical_cpus(),
        }
    }

    /// Pretend the machine has `cpu_count` logical CPUs when computing the automatic mask.
    #[cfg(test)]
    pub fn with_cpu_count(mut self, cpu_count: Option<usize>) -> Self {
        self.cpu_count = cpu_count;
        self
    }

    pub async fn launch<F>(
        &self,
        request: &LaunchRequest,
        progress: F,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<LaunchReport, LaunchError>
    where
        F: Fn(String) + Sync,
    {
        let hook = self.locate_hook(request, cancel).await?;
        // A cancel that raced the lookup must still keep the hook from starting.
        if *cancel.borrow() {
            return Err(LaunchError::Cancelled);
        }

        let argv = request.argv(&hook);
        progress(format!(
            "Launching: {}",
            argv.iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        ));
        let hook_pid = self
            .processes
            .spawn_detached(&argv)
            .map_err(LaunchError::Spawn)?;
        debug!("Hook started as pid {}", hook_pid);

        let exe = &request.profile.process_name;
        self.wait_for_process(exe, cancel).await?;

        let mask_used = mask::resolve_with(&request.mask_hex, self.cpu_count);
        let tuning = tuning::apply_mask(
            &*self.processes,
            exe,
            mask_used,
            request.apply_affinity,
            request.apply_priority,
        );
        progress(format!(
            "Applied settings to {} process(es). Mask={} High={} Affinity={}",
            tuning.processes_changed, tuning.mask_used, request.apply_priority, request.apply_affinity
        ));

        let flags = request.effective_flags();
        let fields = PresenceFields {
            name: &request.profile.name,
            high: request.apply_priority,
            aff: request.apply_affinity,
            flags: &flags,
        };
        let presence = match presence::format(&request.presence_templates, &fields) {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!("Discord presence formatting failed: {}", e);
                progress(format!("Discord presence formatting failed: {}", e));
                None
            }
        };

        Ok(LaunchReport {
            hook_pid,
            tuning,
            presence,
        })
    }

    /// The lookup may prompt on stdin, so it runs on the blocking pool and a
    /// cancel abandons it.
    async fn locate_hook(
        &self,
        request: &LaunchRequest,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<PathBuf, LaunchError> {
        let hooks = Arc::clone(&self.hooks);
        let override_path = request.hook_override.clone();
        let lookup = tokio::task::spawn_blocking(move || hooks.resolve(override_path.as_deref()));

        let found = tokio::select! {
            biased;
            _ = cancelled(cancel) => return Err(LaunchError::Cancelled),
            joined = lookup => joined.unwrap_or_else(|e| {
                warn!("Hook lookup did not finish: {}", e);
                None
            }),
        };
        found.ok_or(LaunchError::NoHook)
    }

    /// Polls until `exe` is running. The first sighting ends the wait.
    async fn wait_for_process(
        &self,
        exe: &str,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(), LaunchError> {
        let started = Instant::now();
        while started.elapsed() < self.timing.timeout {
            if let Some(found) = find_process_ids(&*self.processes, exe).next() {
                info!(
                    "Found {} (pid {}) after {:.1}s",
                    found.exe_name,
                    found.pid,
                    started.elapsed().as_secs_f32()
                );
                return Ok(());
            }
            tokio::select! {
                _ = tokio::time::sleep(self.timing.poll_interval) => {}
                _ = cancelled(cancel) => return Err(LaunchError::Cancelled),
            }
        }
        Err(LaunchError::Timeout {
            exe: exe.to_string(),
            waited: started.elapsed(),
        })
    }
}

/// Resolves once cancellation is requested. Never resolves if the sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::HookPrompt;
    use crate::hook::mock::{FixedPrompt, MemorySettings};
    use crate::system::mock::{Call, MockProcesses};
    use std::sync::{Mutex, mpsc};

    fn game() -> GameProfile {
        let mut profile = GameProfile::new("Gears 5", "Microsoft.Halifax!Game", "game.exe");
        profile.flags = vec!["-dx12".into()];
        profile
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        hooks: HookLocator,
    }

    fn with_hook() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let hook = dir.path().join("UWPHook.exe");
        std::fs::write(&hook, b"MZ").unwrap();
        let hooks = HookLocator::new(
            Box::new(MemorySettings::with_path(hook)),
            Box::new(FixedPrompt(None)),
        )
        .with_local_candidate(None);
        Fixture { _dir: dir, hooks }
    }

    fn without_hook() -> HookLocator {
        HookLocator::new(Box::new(MemorySettings::default()), Box::new(FixedPrompt(None)))
            .with_local_candidate(None)
    }

    fn launcher(processes: &Arc<MockProcesses>, hooks: HookLocator) -> Launcher<MockProcesses> {
        Launcher::new(Arc::clone(processes), hooks, LaunchTiming::default()).with_cpu_count(Some(8))
    }

    async fn run(
        launcher: &Launcher<MockProcesses>,
        request: &LaunchRequest,
    ) -> (Result<LaunchReport, LaunchError>, Vec<String>) {
        let messages = Mutex::new(Vec::new());
        let (_tx, mut rx) = watch::channel(false);
        let result = launcher
            .launch(request, |m| messages.lock().unwrap().push(m), &mut rx)
            .await;
        (result, messages.into_inner().unwrap())
    }

    #[test]
    fn argv_appends_extra_flags_after_profile_flags() {
        let mut request = LaunchRequest::from_profile(game(), PresenceTemplates::default());
        request.extra_flags = vec!["-windowed".into()];

        let argv = request.argv(std::path::Path::new("C:/hook/UWPHook.exe"));

        assert_eq!(
            argv,
            vec!["C:/hook/UWPHook.exe", "Microsoft.Halifax!Game", "game.exe", "-dx12", "-windowed"]
                .into_iter()
                .map(OsString::from)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn disabled_profile_flags_keep_extra_flags() {
        let mut request = LaunchRequest::from_profile(game(), PresenceTemplates::default());
        request.use_flags = false;
        request.extra_flags = vec!["-windowed".into()];
        assert_eq!(request.effective_flags(), vec!["-windowed"]);
    }

    #[tokio::test(start_paused = true)]
    async fn game_found_is_tuned_and_reported() {
        let fixture = with_hook();
        let processes = Arc::new(MockProcesses::default().arrive_after(3, 100, "game.exe"));
        let launcher = launcher(&processes, fixture.hooks);
        let request = LaunchRequest::from_profile(game(), PresenceTemplates::default());

        let (result, messages) = run(&launcher, &request).await;
        let report = result.unwrap();

        assert_eq!(report.tuning.mask_used.bits(), 0xFE);
        assert_eq!(report.tuning.processes_changed, 1);
        let presence = report.presence.unwrap();
        assert_eq!(presence.details, "Gears 5");
        assert!(presence.state.contains("HighPrio=true"));
        assert!(presence.state.contains("Affinity=true"));
        assert!(processes.calls().contains(&Call::Affinity(100, 0xFE)));
        assert!(processes.calls().contains(&Call::HighPriority(100)));
        assert!(messages[0].starts_with("Launching: "));
        assert!(messages[0].ends_with("Microsoft.Halifax!Game game.exe -dx12"));
        assert_eq!(
            messages[1],
            "Applied settings to 1 process(es). Mask=0xFE High=true Affinity=true"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn missing_hook_stops_before_anything_runs() {
        let processes = Arc::new(MockProcesses::with_processes(&[(1, "game.exe")]));
        let launcher = launcher(&processes, without_hook());
        let request = LaunchRequest::from_profile(game(), PresenceTemplates::default());

        let (result, messages) = run(&launcher, &request).await;

        assert!(matches!(result, Err(LaunchError::NoHook)));
        assert!(messages.is_empty());
        assert_eq!(processes.snapshot_count(), 0);
        assert!(processes.spawned.lock().unwrap().is_empty());
        assert!(processes.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_failure_is_reported_without_polling() {
        let fixture = with_hook();
        let processes = Arc::new(MockProcesses::default());
        *processes.fail_spawn.lock().unwrap() = true;
        let launcher = launcher(&processes, fixture.hooks);
        let request = LaunchRequest::from_profile(game(), PresenceTemplates::default());

        let (result, _) = run(&launcher, &request).await;

        assert!(matches!(result, Err(LaunchError::Spawn(_))));
        assert_eq!(processes.snapshot_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_the_timeout() {
        let fixture = with_hook();
        let processes = Arc::new(MockProcesses::default());
        let launcher = launcher(&processes, fixture.hooks);
        let request = LaunchRequest::from_profile(game(), PresenceTemplates::default());

        let started = Instant::now();
        let (result, _) = run(&launcher, &request).await;
        let elapsed = started.elapsed();

        match result {
            Err(LaunchError::Timeout { exe, .. }) => assert_eq!(exe, "game.exe"),
            other => panic!("expected a timeout, got {other:?}"),
        }
        assert!(elapsed >= Duration::from_secs(45));
        assert!(elapsed <= Duration::from_millis(45_500));

        let snapshots = processes.snapshots.lock().unwrap().clone();
        let first = snapshots.first().unwrap().duration_since(started);
        let last = snapshots.last().unwrap().duration_since(started);
        assert!(first < Duration::from_millis(500));
        assert!(last >= Duration::from_millis(44_000));
        assert!(last < Duration::from_secs(45));
        assert!(processes.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn bad_template_does_not_fail_the_launch() {
        let fixture = with_hook();
        let processes = Arc::new(MockProcesses::with_processes(&[(7, "game.exe")]));
        let launcher = launcher(&processes, fixture.hooks);
        let templates = PresenceTemplates {
            details: "{nme}".into(),
            state: "{high}".into(),
        };
        let request = LaunchRequest::from_profile(game(), templates);

        let (result, messages) = run(&launcher, &request).await;
        let report = result.unwrap();

        assert!(report.presence.is_none());
        assert_eq!(report.tuning.processes_changed, 1);
        assert!(messages.last().unwrap().starts_with("Discord presence formatting failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_ends_the_wait() {
        let fixture = with_hook();
        let processes = Arc::new(MockProcesses::default());
        let launcher = launcher(&processes, fixture.hooks);
        let request = LaunchRequest::from_profile(game(), PresenceTemplates::default());
        let (tx, mut rx) = watch::channel(false);

        let started = Instant::now();
        let cancel_later = async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            tx.send(true).unwrap();
        };
        let (result, ()) = tokio::join!(launcher.launch(&request, |_| {}, &mut rx), cancel_later);

        assert!(matches!(result, Err(LaunchError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_spawn_never_starts_the_hook() {
        let fixture = with_hook();
        let processes = Arc::new(MockProcesses::with_processes(&[(1, "game.exe")]));
        let launcher = launcher(&processes, fixture.hooks);
        let request = LaunchRequest::from_profile(game(), PresenceTemplates::default());
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();

        let result = launcher.launch(&request, |_| {}, &mut rx).await;

        assert!(matches!(result, Err(LaunchError::Cancelled)));
        assert!(processes.spawned.lock().unwrap().is_empty());
        assert_eq!(processes.snapshot_count(), 0);
        assert!(processes.calls().is_empty());
    }

    /// Blocks like a console prompt until the test hands it an answer.
    struct HeldPrompt(Mutex<mpsc::Receiver<PathBuf>>);

    impl HookPrompt for HeldPrompt {
        fn locate(&self) -> Option<PathBuf> {
            self.0.lock().unwrap().recv().ok()
        }
    }

    #[tokio::test]
    async fn cancel_while_prompting_never_starts_the_hook() {
        let dir = tempfile::tempdir().unwrap();
        let hook = dir.path().join("UWPHook.exe");
        std::fs::write(&hook, b"MZ").unwrap();
        let (answer_tx, answer_rx) = mpsc::channel();
        let hooks = HookLocator::new(
            Box::new(MemorySettings::default()),
            Box::new(HeldPrompt(Mutex::new(answer_rx))),
        )
        .with_local_candidate(None);
        let processes = Arc::new(MockProcesses::with_processes(&[(1, "game.exe")]));
        let launcher = launcher(&processes, hooks);
        let request = LaunchRequest::from_profile(game(), PresenceTemplates::default());
        let (tx, mut rx) = watch::channel(false);

        let cancel_soon = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send(true).unwrap();
        };
        let (result, ()) = tokio::join!(launcher.launch(&request, |_| {}, &mut rx), cancel_soon);

        // The prompt answers only after the launch has given up.
        answer_tx.send(hook).unwrap();
        assert!(matches!(result, Err(LaunchError::Cancelled)));
        assert!(processes.spawned.lock().unwrap().is_empty());
    }
}
