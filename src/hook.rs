//! # Hook Executable Resolution
//!
//! UWPHook performs the actual UWP activation on our behalf. Before a launch we
//! need a path to it, tried in this order:
//!
//! 1. A one-shot override (`launch --hook`).
//! 2. The path stored in `settings.json`.
//! 3. `UWPHook.exe` next to our own executable.
//! 4. Asking the user.
//!
//! The first candidate that is an existing file wins and is remembered in the
//! settings so the next launch skips the search.

use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use log::{debug, warn};

pub const HOOK_EXE_NAME: &str = "UWPHook.exe";

/// Read-only view of the persisted hook path, plus the one write we need.
pub trait SettingsProvider: Send + Sync {
    fn hook_path(&self) -> Option<PathBuf>;
    fn remember_hook_path(&self, path: &Path) -> Result<()>;
}

/// Asks the user where the hook lives. Returns `None` if they decline.
pub trait HookPrompt: Send + Sync {
    fn locate(&self) -> Option<PathBuf>;
}

/// Never prompts. Used for non-interactive runs.
pub struct NoPrompt;

impl HookPrompt for NoPrompt {
    fn locate(&self) -> Option<PathBuf> {
        None
    }
}

/// Reads a path from stdin, but only when a person is on the other end of it.
pub struct ConsolePrompt;

impl HookPrompt for ConsolePrompt {
    fn locate(&self) -> Option<PathBuf> {
        if !io::stdin().is_terminal() {
            return None;
        }
        eprint!("Locate {} (full path, blank to cancel): ", HOOK_EXE_NAME);
        let _ = io::stderr().flush();

        let mut line = String::new();
        io::stdin().lock().read_line(&mut line).ok()?;
        let answer = line.trim().trim_matches('"');
        (!answer.is_empty()).then(|| PathBuf::from(answer))
    }
}

pub struct HookLocator {
    settings: Box<dyn SettingsProvider>,
    prompt: Box<dyn HookPrompt>,
    local_candidate: Option<PathBuf>,
}

impl HookLocator {
    pub fn new(settings: Box<dyn SettingsProvider>, prompt: Box<dyn HookPrompt>) -> Self {
        let local_candidate = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(HOOK_EXE_NAME)));
        Self {
            settings,
            prompt,
            local_candidate,
        }
    }

    /// Replace the "next to our executable" candidate.
    #[cfg(test)]
    pub fn with_local_candidate(mut self, path: Option<PathBuf>) -> Self {
        self.local_candidate = path;
        self
    }

    pub fn resolve(&self, override_path: Option<&Path>) -> Option<PathBuf> {
        let stored = self.settings.hook_path();

        let candidates = override_path
            .map(Path::to_path_buf)
            .into_iter()
            .chain(stored.clone())
            .chain(self.local_candidate.clone());

        for candidate in candidates {
            if candidate.is_file() {
                self.remember_if_new(&candidate, stored.as_deref());
                return Some(candidate);
            }
            debug!("Hook candidate missing: {}", candidate.display());
        }

        let picked = self.prompt.locate()?;
        if is_hook_exe(&picked) && picked.is_file() {
            self.remember_if_new(&picked, stored.as_deref());
            Some(picked)
        } else {
            warn!("{} is not a {}", picked.display(), HOOK_EXE_NAME);
            None
        }
    }

    fn remember_if_new(&self, path: &Path, stored: Option<&Path>) {
        if stored == Some(path) {
            return;
        }
        if let Err(e) = self.settings.remember_hook_path(path) {
            warn!("Could not save hook path: {}", e);
        }
    }
}

fn is_hook_exe(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.eq_ignore_ascii_case(HOOK_EXE_NAME))
}

/// In-memory settings for tests.
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default, Clone)]
    pub struct MemorySettings {
        pub stored: Arc<Mutex<Option<PathBuf>>>,
        pub fail_writes: bool,
    }

    impl MemorySettings {
        pub fn with_path(path: impl Into<PathBuf>) -> Self {
            Self {
                stored: Arc::new(Mutex::new(Some(path.into()))),
                fail_writes: false,
            }
        }

        pub fn current(&self) -> Option<PathBuf> {
            self.stored.lock().unwrap().clone()
        }
    }

    impl SettingsProvider for MemorySettings {
        fn hook_path(&self) -> Option<PathBuf> {
            self.current()
        }

        fn remember_hook_path(&self, path: &Path) -> Result<()> {
            if self.fail_writes {
                anyhow::bail!("read-only settings");
            }
            *self.stored.lock().unwrap() = Some(path.to_path_buf());
            Ok(())
        }
    }

    pub struct FixedPrompt(pub Option<PathBuf>);

    impl HookPrompt for FixedPrompt {
        fn locate(&self) -> Option<PathBuf> {
            self.0.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{FixedPrompt, MemorySettings};
    use super::*;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"MZ").unwrap();
        path
    }

    fn locator(settings: &MemorySettings, prompt: Option<PathBuf>, local: Option<PathBuf>) -> HookLocator {
        HookLocator::new(Box::new(settings.clone()), Box::new(FixedPrompt(prompt)))
            .with_local_candidate(local)
    }

    #[test]
    fn stored_path_wins_over_local() {
        let dir = tempfile::tempdir().unwrap();
        let stored = touch(dir.path(), "stored.exe");
        let local = touch(dir.path(), HOOK_EXE_NAME);
        let settings = MemorySettings::with_path(&stored);

        assert_eq!(locator(&settings, None, Some(local)).resolve(None), Some(stored));
    }

    #[test]
    fn override_wins_and_is_remembered() {
        let dir = tempfile::tempdir().unwrap();
        let stored = touch(dir.path(), "stored.exe");
        let manual = touch(dir.path(), "manual.exe");
        let settings = MemorySettings::with_path(&stored);

        let found = locator(&settings, None, None).resolve(Some(&manual));

        assert_eq!(found, Some(manual.clone()));
        assert_eq!(settings.current(), Some(manual));
    }

    #[test]
    fn stale_setting_falls_back_to_local_and_persists_it() {
        let dir = tempfile::tempdir().unwrap();
        let local = touch(dir.path(), HOOK_EXE_NAME);
        let settings = MemorySettings::with_path(dir.path().join("gone.exe"));

        let found = locator(&settings, None, Some(local.clone())).resolve(None);

        assert_eq!(found, Some(local.clone()));
        assert_eq!(settings.current(), Some(local));
    }

    #[test]
    fn prompt_must_name_the_hook() {
        let dir = tempfile::tempdir().unwrap();
        let wrong = touch(dir.path(), "notepad.exe");
        let settings = MemorySettings::default();

        assert_eq!(locator(&settings, Some(wrong), None).resolve(None), None);
        assert_eq!(settings.current(), None);
    }

    #[test]
    fn prompted_hook_is_accepted_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        let picked = touch(dir.path(), "uwphook.EXE");
        let settings = MemorySettings::default();

        let found = locator(&settings, Some(picked.clone()), None).resolve(None);

        assert_eq!(found, Some(picked.clone()));
        assert_eq!(settings.current(), Some(picked));
    }

    #[test]
    fn nothing_found_is_none() {
        let settings = MemorySettings::default();
        assert_eq!(locator(&settings, None, None).resolve(None), None);
    }

    #[test]
    fn save_failure_still_returns_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let local = touch(dir.path(), HOOK_EXE_NAME);
        let settings = MemorySettings {
            fail_writes: true,
            ..Default::default()
        };

        assert_eq!(locator(&settings, None, Some(local.clone())).resolve(None), Some(local));
    }
}
