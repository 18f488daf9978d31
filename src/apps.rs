//! # Installed UWP Apps
//!
//! Lists the Start menu apps through PowerShell's `Get-StartApps`, which is the
//! quickest way to find the AUMID a new game profile needs.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::Value;

use crate::config::GameProfile;

#[cfg_attr(not(windows), allow(dead_code))]
const START_APPS_SCRIPT: &str = "[Console]::OutputEncoding = [Text.Encoding]::UTF8; \
     Get-StartApps | Select-Object Name,AppID | ConvertTo-Json -Depth 3";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartApp {
    pub name: String,
    /// The application user model id.
    pub app_id: String,
}

#[derive(Deserialize)]
struct RawApp {
    #[serde(rename = "Name")]
    name: Option<String>,
    #[serde(rename = "AppID")]
    app_id: Option<String>,
}

impl StartApp {
    /// Case-insensitive substring match on the name or the AUMID.
    pub fn matches(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        query.is_empty()
            || self.name.to_lowercase().contains(&query)
            || self.app_id.to_lowercase().contains(&query)
    }

    /// A profile for this app. The caller supplies the executable the hook will start.
    pub fn to_profile(&self, process_name: &str) -> GameProfile {
        GameProfile::new(&self.name, &self.app_id, process_name)
    }
}

/// Parses `ConvertTo-Json` output. One app serialises as a bare object, several
/// as an array, none as nothing. Entries without both a name and an AUMID are dropped.
#[cfg_attr(not(windows), allow(dead_code))]
pub fn parse_start_apps(json: &str) -> Result<Vec<StartApp>> {
    let json = json.trim_start_matches('\u{feff}').trim();
    if json.is_empty() {
        return Ok(Vec::new());
    }
    let items = match serde_json::from_str::<Value>(json).context("Get-StartApps output is not JSON")? {
        Value::Array(items) => items,
        item @ Value::Object(_) => vec![item],
        _ => Vec::new(),
    };

    Ok(items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<RawApp>(item).ok())
        .filter_map(|raw| {
            let name = raw.name?.trim().to_string();
            let app_id = raw.app_id?.trim().to_string();
            (!name.is_empty() && !app_id.is_empty()).then_some(StartApp { name, app_id })
        })
        .collect())
}

/// The single app `query` picks: an exact name match, or else the only partial match.
pub fn pick<'a>(apps: &'a [StartApp], query: &str) -> Result<&'a StartApp> {
    if let Some(exact) = apps.iter().find(|a| a.name.eq_ignore_ascii_case(query.trim())) {
        return Ok(exact);
    }
    let mut matching = apps.iter().filter(|a| a.matches(query));
    match (matching.next(), matching.next()) {
        (Some(only), None) => Ok(only),
        (None, _) => bail!("no installed app matches '{}'", query),
        (Some(_), Some(_)) => bail!("'{}' matches several apps; be more specific", query),
    }
}

/// Runs `Get-StartApps` and parses its output.
#[cfg(windows)]
pub fn list_start_apps() -> Result<Vec<StartApp>> {
    use std::os::windows::process::CommandExt;
    use windows::Win32::System::Threading::CREATE_NO_WINDOW;

    let output = std::process::Command::new(powershell_exe())
        .args(["-NoProfile", "-ExecutionPolicy", "Bypass", "-Command", START_APPS_SCRIPT])
        .creation_flags(CREATE_NO_WINDOW.0)
        .output()
        .context("could not run PowerShell")?;
    if !output.status.success() {
        bail!(
            "Get-StartApps failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    parse_start_apps(&String::from_utf8_lossy(&output.stdout))
}

#[cfg(not(windows))]
pub fn list_start_apps() -> Result<Vec<StartApp>> {
    bail!("listing UWP apps needs Windows PowerShell (Get-StartApps)")
}

/// Windows PowerShell from the system directory, or whatever `powershell` is on PATH.
#[cfg(windows)]
fn powershell_exe() -> std::path::PathBuf {
    let root = std::env::var_os("SystemRoot").unwrap_or_else(|| r"C:\Windows".into());
    let exe = std::path::Path::new(&root).join(r"System32\WindowsPowerShell\v1.0\powershell.exe");
    if exe.is_file() { exe } else { "powershell".into() }
}
