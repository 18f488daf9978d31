//! # uwplaunch: The Main Entry Point
//!
//! Parses the command line, initialises logging, loads the config directory and
//! dispatches to the launch, tuning and profile sub-commands.
//!
//! A launch runs on a background worker; this thread only prints what the
//! worker reports, forwards Ctrl-C as a cancellation and drives the Discord
//! presence connection.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::{LevelFilter, debug, error, info, warn};
use simplelog::{Config, SimpleLogger};

mod apps;
mod config;
mod discord;
mod elevation;
mod hook;
mod launcher;
mod mask;
mod presence;
mod process_list;
mod system;
mod tuning;
mod worker;

use config::{GameProfile, JsonSettings, ProfileStore, Settings};
use hook::{ConsolePrompt, HookLocator, HookPrompt, NoPrompt};
use launcher::{LaunchRequest, LaunchTiming, Launcher};
use worker::WorkerEvent;

#[derive(Parser)]
#[command(name = "uwplaunch")]
#[command(about = "Launch UWP games through UWPHook with CPU affinity and priority tweaks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Turn on verbose logging.
    ///
    /// - `-v`: Debug
    /// - `-vv`: Trace
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Directory holding settings.json and games.json.
    #[arg(long, global = true, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    /// Relaunch elevated (UAC) if not already running as administrator.
    #[arg(long, global = true)]
    elevate: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch a game profile and tune its process once it appears.
    Launch {
        /// Profile name, as shown by `list`.
        name: String,
        /// Extra flag for this launch only (repeatable).
        #[arg(long = "extra", value_name = "FLAG", allow_hyphen_values = true)]
        extra: Vec<String>,
        /// Affinity mask in hex, overriding the profile's.
        #[arg(long, value_name = "HEX")]
        mask: Option<String>,
        /// Do not pass the profile's flags to the hook.
        #[arg(long)]
        no_flags: bool,
        /// Leave CPU affinity alone.
        #[arg(long)]
        no_affinity: bool,
        /// Leave the priority class alone.
        #[arg(long)]
        no_priority: bool,
        /// Use this UWPHook.exe for this launch (remembered if valid).
        #[arg(long, value_name = "PATH")]
        hook: Option<PathBuf>,
        /// Never prompt for the hook location.
        #[arg(long)]
        no_prompt: bool,
        /// Exit right after tuning instead of holding the Discord presence until Ctrl-C.
        #[arg(long)]
        no_hold: bool,
    },
    /// List game profiles.
    List,
    /// Add or replace a game profile.
    Add {
        #[arg(long)]
        name: String,
        /// Application user model id, e.g. `Microsoft.Foo_8wekyb3d8bbwe!App`.
        #[arg(long)]
        aumid: String,
        /// Executable to wait for, e.g. `Game.exe`.
        #[arg(long)]
        exe: String,
        /// Hook flags, whitespace separated.
        #[arg(long, default_value = "", allow_hyphen_values = true)]
        flags: String,
        /// Affinity mask in hex; blank means all CPUs except CPU0.
        #[arg(long, default_value = "")]
        mask: String,
        #[arg(long)]
        no_flags: bool,
        #[arg(long)]
        no_affinity: bool,
        #[arg(long)]
        no_priority: bool,
    },
    /// Remove a game profile.
    Remove { name: String },
    /// List process ids running an executable.
    Find { exe: String },
    /// Apply affinity/priority to an executable that is already running.
    Tune {
        exe: String,
        #[arg(long, default_value = "", value_name = "HEX")]
        mask: String,
        #[arg(long)]
        no_affinity: bool,
        #[arg(long)]
        no_priority: bool,
    },
    /// List installed UWP apps and their AUMIDs, optionally adding one as a profile.
    Apps {
        /// Filter by name or AUMID (case-insensitive).
        query: Option<String>,
        /// Add the app QUERY picks as a game profile.
        #[arg(long, requires = "exe")]
        add: bool,
        /// Executable the new profile waits for, e.g. `Game.exe`.
        #[arg(long)]
        exe: Option<String>,
    },
    /// Print the affinity mask that would be used.
    Mask { hex: Option<String> },
    /// Remember the location of UWPHook.exe.
    SetHook { path: PathBuf },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    // Logging failure shouldn't stop a launch.
    let _ = SimpleLogger::init(log_level, Config::default());

    if cli.elevate && !elevation::is_elevated() {
        if elevation::relaunch_as_admin() {
            return;
        }
        error!("Failed to elevate. Continuing with current privileges...");
    }

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let Some(command) = cli.command else {
        use clap::CommandFactory;
        let _ = Cli::command().print_help();
        return Ok(());
    };

    let dir = config::config_dir(cli.config_dir.as_deref())?;

    match command {
        Commands::Launch {
            name,
            extra,
            mask,
            no_flags,
            no_affinity,
            no_priority,
            hook,
            no_prompt,
            no_hold,
        } => {
            let settings = Settings::load(&dir)?;
            let store = ProfileStore::load(&dir)?;
            let profile = store
                .find(&name)
                .cloned()
                .with_context(|| format!("no game profile named '{}'", name))?;

            let mut request = LaunchRequest::from_profile(profile, settings.presence_templates());
            request.use_flags &= !no_flags;
            request.apply_affinity &= !no_affinity;
            request.apply_priority &= !no_priority;
            request.extra_flags = extra;
            request.hook_override = hook;
            if let Some(mask) = mask.filter(|m| !m.trim().is_empty()) {
                request.mask_hex = mask;
            }

            let prompt: Box<dyn HookPrompt> = if no_prompt {
                Box::new(NoPrompt)
            } else {
                Box::new(ConsolePrompt)
            };
            launch(&dir, &settings, request, prompt, !no_hold).await
        }
        Commands::List => {
            let store = ProfileStore::load(&dir)?;
            for p in &store.profiles {
                let mask = if p.affinity_mask_hex.is_empty() {
                    "auto"
                } else {
                    p.affinity_mask_hex.as_str()
                };
                println!(
                    "{:<28} {:<24} mask={:<6} flags={} high={} aff={}",
                    p.name,
                    p.process_name,
                    mask,
                    if p.use_flags { p.flags.join(" ") } else { "(off)".to_string() },
                    p.apply_high_priority,
                    p.apply_affinity
                );
            }
            Ok(())
        }
        Commands::Add {
            name,
            aumid,
            exe,
            flags,
            mask,
            no_flags,
            no_affinity,
            no_priority,
        } => {
            let mut store = ProfileStore::load(&dir)?;
            let mut profile = GameProfile::new(&name, &aumid, &exe);
            profile.flags = flags.split_whitespace().map(str::to_string).collect();
            profile.affinity_mask_hex = mask.trim().to_string();
            profile.use_flags = !no_flags;
            profile.apply_affinity = !no_affinity;
            profile.apply_high_priority = !no_priority;
            store.upsert(profile);
            store.save()?;
            info!("Saved profile '{}'", name);
            Ok(())
        }
        Commands::Remove { name } => {
            let mut store = ProfileStore::load(&dir)?;
            if !store.remove(&name) {
                bail!("no game profile named '{}'", name);
            }
            store.save()?;
            info!("Removed profile '{}'", name);
            Ok(())
        }
        Commands::Find { exe } => {
            let processes = system::native();
            let found: Vec<_> = process_list::find_process_ids(&processes, &exe).collect();
            if found.is_empty() {
                info!("No running process named {}", exe);
            }
            for m in found {
                println!("{:>8}  {}", m.pid, m.exe_name);
            }
            Ok(())
        }
        Commands::Tune {
            exe,
            mask,
            no_affinity,
            no_priority,
        } => {
            let processes = system::native();
            let report = tuning::apply(&processes, &exe, &mask, !no_affinity, !no_priority);
            info!(
                "Applied settings to {} of {} process(es). Mask={}",
                report.processes_changed, report.processes_seen, report.mask_used
            );
            hint_elevation(&report);
            Ok(())
        }
        Commands::Apps { query, add, exe } => {
            if add && query.is_none() {
                bail!("--add needs a QUERY naming the app");
            }
            let installed = apps::list_start_apps()?;
            let query = query.unwrap_or_default();
            if add {
                let app = apps::pick(&installed, &query)?;
                let exe = exe.unwrap_or_default();
                let mut store = ProfileStore::load(&dir)?;
                store.upsert(app.to_profile(exe.trim()));
                store.save()?;
                info!("Saved profile '{}' ({})", app.name, app.app_id);
                return Ok(());
            }
            let shown: Vec<_> = installed.iter().filter(|a| a.matches(&query)).collect();
            if shown.is_empty() {
                info!("No installed app matches '{}'", query);
            }
            for app in shown {
                println!("{:<40} {}", app.name, app.app_id);
            }
            Ok(())
        }
        Commands::Mask { hex } => {
            let hex = hex.unwrap_or_default();
            println!("{}", mask::resolve(&hex));
            Ok(())
        }
        Commands::SetHook { path } => {
            if !path.is_file() {
                bail!("{} does not exist", path.display());
            }
            let mut settings = Settings::load(&dir)?;
            settings.hook_path = path.to_string_lossy().into_owned();
            settings.save(&dir)?;
            info!("Hook path set to {}", path.display());
            Ok(())
        }
    }
}

async fn launch(
    dir: &std::path::Path,
    settings: &Settings,
    request: LaunchRequest,
    prompt: Box<dyn HookPrompt>,
    hold_presence: bool,
) -> Result<()> {
    let hooks = HookLocator::new(Box::new(JsonSettings::new(dir, settings)), prompt);
    let timing = LaunchTiming {
        timeout: settings.launch_timeout(),
        poll_interval: settings.poll_interval(),
    };

    let flags = request.effective_flags();
    let shown_hook = request
        .hook_override
        .clone()
        .or_else(|| settings.stored_hook_path())
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(not set)".to_string());
    info!("UWPHook: {}", shown_hook);
    info!("AUMID:   {}", request.profile.launch_target);
    info!("EXE:     {}", request.profile.process_name);
    info!("Flags:   {}", if flags.is_empty() { "(none)".to_string() } else { flags.join(" ") });
    info!(
        "Mask:    {}",
        if request.mask_hex.is_empty() { "(auto: all CPUs except CPU0)" } else { request.mask_hex.as_str() }
    );
    info!("HighPrio:{}  Affinity:{}", request.apply_priority, request.apply_affinity);

    let mut rpc = discord::connect_if_enabled(settings.discord_enabled, &settings.discord_client_id);

    let launcher = Arc::new(Launcher::new(Arc::new(system::native()), hooks, timing));
    let mut handle = worker::spawn(launcher, request);

    let mut ctrl_c = std::pin::pin!(tokio::signal::ctrl_c());
    let mut cancel_sent = false;
    let result = loop {
        let event = tokio::select! {
            event = handle.next_event() => event,
            _ = &mut ctrl_c, if !cancel_sent => {
                warn!("Cancelling launch...");
                handle.cancel();
                cancel_sent = true;
                continue;
            }
        };

        match event {
            Some(WorkerEvent::Progress(line)) => info!("{}", line),
            Some(WorkerEvent::Presence(payload)) => {
                debug!("Presence: {}", serde_json::to_string(&payload)?);
                if let Some(session) = rpc.as_mut() {
                    session.set(&payload);
                }
            }
            Some(WorkerEvent::Done(result)) => break result,
            None => bail!("launch worker stopped without a result"),
        }
    };
    handle.join().await;

    if let Some(report) = &result.tuning {
        hint_elevation(report);
    }
    if result.success() {
        info!("{}", result.message);
    }

    if let Some(mut session) = rpc {
        let shown = session.is_connected() && result.success() && result.presence.is_some();
        if shown && hold_presence && !cancel_sent {
            info!("Showing Discord presence. Press Ctrl-C to clear it and exit.");
            let _ = ctrl_c.await;
        }
        session.clear();
        session.close();
    }

    if result.success() {
        Ok(())
    } else {
        bail!("{}", result.message)
    }
}

/// Some matches could not be opened; higher-integrity processes need an elevated tuner.
fn hint_elevation(report: &tuning::TuningReport) {
    if report.processes_changed < report.processes_seen && !elevation::is_elevated() {
        warn!(
            "{} process(es) could not be opened. Try again with --elevate.",
            report.processes_seen - report.processes_changed
        );
    }
}
