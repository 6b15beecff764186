//! Terminal IPC backends.
//!
//! Each cognitive room is bound at startup to exactly one backend. The iTerm,
//! Terminal, kitty, and wezterm backends read the terminal buffer without
//! focus changes or clipboard use; only `system-events` takes focus and goes
//! through the clipboard arbiter.

use sovereign_clipboard::ClipboardArbiter;
use sovereign_core::config::RoomConfig;
use sovereign_core::types::IpcBackend;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{CaptureError, Result};
use crate::shell::{sh_quote, ShellExecutor};

/// Settle delay between synthesized copy keystrokes and the clipboard read.
const COPY_SETTLE_MS: u64 = 300;

/// Read the current visible text of the room's terminal.
pub(crate) async fn read_room(
    shell: &dyn ShellExecutor,
    arbiter: &Arc<ClipboardArbiter>,
    room: &RoomConfig,
) -> Result<String> {
    match room.backend {
        IpcBackend::Iterm => read_iterm(shell, room).await,
        IpcBackend::Terminal => read_terminal(shell, room).await,
        IpcBackend::Kitty => read_kitty(shell, room).await,
        IpcBackend::Wezterm => read_wezterm(shell, room).await,
        IpcBackend::SystemEvents => read_system_events(shell, arbiter, room).await,
    }
}

/// Type `text` into the room's terminal followed by a newline.
pub(crate) async fn write_room(
    shell: &dyn ShellExecutor,
    arbiter: &Arc<ClipboardArbiter>,
    room: &RoomConfig,
    text: &str,
) -> Result<()> {
    match room.backend {
        IpcBackend::Iterm => write_iterm(shell, room, text).await,
        IpcBackend::Terminal => write_terminal(shell, room, text).await,
        IpcBackend::Kitty => write_kitty(shell, room, text).await,
        IpcBackend::Wezterm => write_wezterm(shell, room, text).await,
        IpcBackend::SystemEvents => write_system_events(shell, arbiter, room, text).await,
    }
}

// ---------------------------------------------------------------------------
// iTerm2 / Terminal.app — UI scripting, no focus, no clipboard
// ---------------------------------------------------------------------------

async fn read_iterm(shell: &dyn ShellExecutor, room: &RoomConfig) -> Result<String> {
    let script = format!(
        r#"tell application "iTerm2"
  repeat with w in windows
    if name of w contains "{hint}" then
      return contents of current session of w
    end if
  end repeat
end tell"#,
        hint = applescript_quote(room.hint())
    );
    run_osascript(shell, room, &script).await
}

async fn write_iterm(shell: &dyn ShellExecutor, room: &RoomConfig, text: &str) -> Result<()> {
    let script = format!(
        r#"tell application "iTerm2"
  repeat with w in windows
    if name of w contains "{hint}" then
      tell current session of w to write text "{text}"
      return
    end if
  end repeat
end tell"#,
        hint = applescript_quote(room.hint()),
        text = applescript_quote(text)
    );
    run_osascript(shell, room, &script).await.map(|_| ())
}

async fn read_terminal(shell: &dyn ShellExecutor, room: &RoomConfig) -> Result<String> {
    let script = format!(
        r#"tell application "Terminal"
  repeat with w in windows
    if name of w contains "{hint}" then
      return history of selected tab of w
    end if
  end repeat
end tell"#,
        hint = applescript_quote(room.hint())
    );
    run_osascript(shell, room, &script).await
}

async fn write_terminal(shell: &dyn ShellExecutor, room: &RoomConfig, text: &str) -> Result<()> {
    let script = format!(
        r#"tell application "Terminal"
  repeat with w in windows
    if name of w contains "{hint}" then
      do script "{text}" in selected tab of w
      return
    end if
  end repeat
end tell"#,
        hint = applescript_quote(room.hint()),
        text = applescript_quote(text)
    );
    run_osascript(shell, room, &script).await.map(|_| ())
}

// ---------------------------------------------------------------------------
// kitty — control socket, title match with whole-pane fallback
// ---------------------------------------------------------------------------

async fn read_kitty(shell: &dyn ShellExecutor, room: &RoomConfig) -> Result<String> {
    let matched = format!(
        "kitty @ get-text --match title:{}",
        sh_quote(room.hint())
    );
    let out = shell.exec(&matched).await?;
    if out.exit_code == 0 {
        return Ok(out.stdout);
    }

    debug!(room = %room.name, "kitty title match failed, falling back to whole pane");
    let fallback = shell.exec("kitty @ get-text").await?;
    if fallback.exit_code != 0 {
        return Err(CaptureError::Backend {
            room: room.name.clone(),
            reason: fallback.stderr.trim().to_string(),
        });
    }
    Ok(fallback.stdout)
}

async fn write_kitty(shell: &dyn ShellExecutor, room: &RoomConfig, text: &str) -> Result<()> {
    let cmd = format!(
        "printf '%s\\r' {} | kitty @ send-text --match title:{} --stdin",
        sh_quote(text),
        sh_quote(room.hint())
    );
    let out = shell.exec(&cmd).await?;
    if out.exit_code != 0 {
        return Err(CaptureError::Dispatch {
            room: room.name.clone(),
            reason: out.stderr.trim().to_string(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// wezterm — list panes, pick by title, read by pane id
// ---------------------------------------------------------------------------

#[derive(serde::Deserialize)]
struct WeztermPane {
    pane_id: u64,
    title: String,
}

async fn wezterm_pane_id(shell: &dyn ShellExecutor, room: &RoomConfig) -> Result<u64> {
    let out = shell.exec("wezterm cli list --format json").await?;
    if out.exit_code != 0 {
        return Err(CaptureError::Backend {
            room: room.name.clone(),
            reason: out.stderr.trim().to_string(),
        });
    }

    let panes: Vec<WeztermPane> =
        serde_json::from_str(&out.stdout).map_err(|e| CaptureError::Backend {
            room: room.name.clone(),
            reason: format!("bad pane list: {e}"),
        })?;

    panes
        .iter()
        .find(|p| p.title.contains(room.hint()))
        .or_else(|| panes.first())
        .map(|p| p.pane_id)
        .ok_or_else(|| CaptureError::Backend {
            room: room.name.clone(),
            reason: "no panes listed".to_string(),
        })
}

async fn read_wezterm(shell: &dyn ShellExecutor, room: &RoomConfig) -> Result<String> {
    let pane_id = wezterm_pane_id(shell, room).await?;
    let out = shell
        .exec(&format!("wezterm cli get-text --pane-id {pane_id}"))
        .await?;
    if out.exit_code != 0 {
        return Err(CaptureError::Backend {
            room: room.name.clone(),
            reason: out.stderr.trim().to_string(),
        });
    }
    Ok(out.stdout)
}

async fn write_wezterm(shell: &dyn ShellExecutor, room: &RoomConfig, text: &str) -> Result<()> {
    let pane_id = wezterm_pane_id(shell, room).await?;
    let cmd = format!(
        "printf '%s\\r' {} | wezterm cli send-text --pane-id {pane_id} --no-paste",
        sh_quote(text)
    );
    let out = shell.exec(&cmd).await?;
    if out.exit_code != 0 {
        return Err(CaptureError::Dispatch {
            room: room.name.clone(),
            reason: out.stderr.trim().to_string(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// system-events — focus + select-all/copy through the clipboard arbiter
// ---------------------------------------------------------------------------

async fn read_system_events(
    shell: &dyn ShellExecutor,
    arbiter: &Arc<ClipboardArbiter>,
    room: &RoomConfig,
) -> Result<String> {
    let app = room.app_name.as_deref().unwrap_or(room.hint());

    // The guard releases the arbiter on every exit path, including errors.
    let _guard = arbiter.scoped(&room.name).await;

    activate_app(shell, room, app).await?;
    keystroke(shell, room, "a").await?;
    keystroke(shell, room, "c").await?;
    tokio::time::sleep(Duration::from_millis(COPY_SETTLE_MS)).await;

    let out = shell.exec("pbpaste").await?;
    if out.exit_code != 0 {
        return Err(CaptureError::Backend {
            room: room.name.clone(),
            reason: out.stderr.trim().to_string(),
        });
    }
    if out.stdout.is_empty() {
        // An empty clipboard read means the copy did not land (or another
        // holder was auto-released past us); callers treat this as a failed
        // capture, never as a successful empty one.
        return Err(CaptureError::Backend {
            room: room.name.clone(),
            reason: "empty clipboard read".to_string(),
        });
    }
    Ok(out.stdout)
}

async fn write_system_events(
    shell: &dyn ShellExecutor,
    arbiter: &Arc<ClipboardArbiter>,
    room: &RoomConfig,
    text: &str,
) -> Result<()> {
    let app = room.app_name.as_deref().unwrap_or(room.hint());

    let _guard = arbiter.scoped(&room.name).await;

    let copy = format!("printf '%s' {} | pbcopy", sh_quote(text));
    let out = shell.exec(&copy).await?;
    if out.exit_code != 0 {
        return Err(CaptureError::Dispatch {
            room: room.name.clone(),
            reason: out.stderr.trim().to_string(),
        });
    }

    activate_app(shell, room, app).await?;
    keystroke(shell, room, "v").await?;
    // key code 36 = return
    let ret = shell
        .exec(r#"osascript -e 'tell application "System Events" to key code 36'"#)
        .await?;
    if ret.exit_code != 0 {
        return Err(CaptureError::Dispatch {
            room: room.name.clone(),
            reason: ret.stderr.trim().to_string(),
        });
    }
    Ok(())
}

async fn activate_app(shell: &dyn ShellExecutor, room: &RoomConfig, app: &str) -> Result<()> {
    let cmd = format!(
        r#"osascript -e 'tell application "{}" to activate'"#,
        applescript_quote(app)
    );
    let out = shell.exec(&cmd).await?;
    if out.exit_code != 0 {
        return Err(CaptureError::Backend {
            room: room.name.clone(),
            reason: format!("activate failed: {}", out.stderr.trim()),
        });
    }
    Ok(())
}

async fn keystroke(shell: &dyn ShellExecutor, room: &RoomConfig, key: &str) -> Result<()> {
    let cmd = format!(
        r#"osascript -e 'tell application "System Events" to keystroke "{key}" using command down'"#
    );
    let out = shell.exec(&cmd).await?;
    if out.exit_code != 0 {
        return Err(CaptureError::Backend {
            room: room.name.clone(),
            reason: format!("keystroke {key} failed: {}", out.stderr.trim()),
        });
    }
    Ok(())
}

async fn run_osascript(
    shell: &dyn ShellExecutor,
    room: &RoomConfig,
    script: &str,
) -> Result<String> {
    let cmd = format!("osascript -e {}", sh_quote(script));
    let out = shell.exec(&cmd).await?;
    if out.exit_code != 0 {
        return Err(CaptureError::Backend {
            room: room.name.clone(),
            reason: out.stderr.trim().to_string(),
        });
    }
    Ok(out.stdout)
}

/// Escape a string for embedding in an AppleScript double-quoted literal.
fn applescript_quote(s: &str) -> String {
    s.replace('\\', r"\\").replace('"', r#"\""#)
}
