//! # Elevation Module
//!
//! Opening a game process with `PROCESS_SET_INFORMATION` normally works from a
//! standard user session, because the game runs as the same user. Anti-cheat
//! launchers and games started from an elevated hook are the exception: they
//! run at high integrity and refuse the open.
//!
//! This module checks the current token and, on request, relaunches us through
//! the UAC "runas" verb so tuning can reach those processes too.

#[cfg(windows)]
use log::info;

/// Checks if the current process has administrative privileges.
///
/// Opens the current process token and queries `TokenElevation`.
#[cfg(windows)]
pub fn is_elevated() -> bool {
    use windows::Win32::Foundation::{CloseHandle, HANDLE};
    use windows::Win32::Security::{GetTokenInformation, TOKEN_ELEVATION, TOKEN_QUERY, TokenElevation};
    use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

    let mut token = HANDLE::default();
    unsafe {
        if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token).is_err() {
            return false;
        }
        let mut elevation = TOKEN_ELEVATION::default();
        let mut size = 0;
        let queried = GetTokenInformation(
            token,
            TokenElevation,
            Some(&mut elevation as *mut _ as *mut _),
            std::mem::size_of::<TOKEN_ELEVATION>() as u32,
            &mut size,
        );
        let _ = CloseHandle(token);
        queried.is_ok() && elevation.TokenIsElevated != 0
    }
}

#[cfg(not(windows))]
pub fn is_elevated() -> bool {
    false
}

/// Relaunches the current executable with the same arguments via `ShellExecuteW("runas")`.
///
/// The elevated copy starts in our working directory so relative paths still
/// resolve. Returns `true` if it was started; the caller should then exit.
/// Returns `false` if the user declined the prompt or the call failed.
#[cfg(windows)]
pub fn relaunch_as_admin() -> bool {
    use windows::Win32::UI::Shell::ShellExecuteW;
    use windows::Win32::UI::WindowsAndMessaging::SW_SHOW;
    use windows::core::{HSTRING, PCWSTR, w};

    let Ok(exe_path) = std::env::current_exe() else {
        return false;
    };
    let cwd = std::env::current_dir().ok();

    // `--elevate` is dropped so the elevated copy does not try again.
    let args: Vec<String> = std::env::args_os()
        .skip(1)
        .map(|a| a.to_string_lossy().into_owned())
        .filter(|a| a != "--elevate")
        .collect();
    let params = command_line(&args);
    info!("Relaunching as admin: {} {}", exe_path.display(), params);

    let file = HSTRING::from(exe_path.as_os_str());
    let params = HSTRING::from(params);
    let directory = cwd.as_deref().map(|d| HSTRING::from(d.as_os_str()));

    let result = unsafe {
        ShellExecuteW(
            None,
            w!("runas"),
            PCWSTR(file.as_ptr()),
            PCWSTR(params.as_ptr()),
            directory
                .as_ref()
                .map_or(PCWSTR::null(), |d| PCWSTR(d.as_ptr())),
            SW_SHOW,
        )
    };

    // ShellExecute returns an HINSTANCE > 32 on success.
    result.0 as isize > 32
}

/// Joins arguments into one command line that `CommandLineToArgvW` splits back
/// into the same arguments.
#[cfg_attr(not(windows), allow(dead_code))]
fn command_line(args: &[String]) -> String {
    args.iter().map(|a| quote_arg(a)).collect::<Vec<_>>().join(" ")
}

/// Backslashes are literal unless they precede a quote, so only those runs
/// (and a run before the closing quote) are doubled.
#[cfg_attr(not(windows), allow(dead_code))]
fn quote_arg(arg: &str) -> String {
    let needs_quotes = arg.is_empty() || arg.contains([' ', '\t', '\n', '\u{b}', '"']);
    if !needs_quotes {
        return arg.to_string();
    }

    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    let mut backslashes = 0;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                quoted.extend(std::iter::repeat_n('\\', backslashes * 2 + 1));
                quoted.push('"');
                backslashes = 0;
            }
            _ => {
                quoted.extend(std::iter::repeat_n('\\', backslashes));
                quoted.push(c);
                backslashes = 0;
            }
        }
    }
    quoted.extend(std::iter::repeat_n('\\', backslashes * 2));
    quoted.push('"');
    quoted
}

#[cfg(not(windows))]
pub fn relaunch_as_admin() -> bool {
    false
}
