//! `presenced run`: drive presence for the user in the identity slot.
//!
//! Lines on stdin are lifecycle signals (`hidden`, `visible`, `focus`,
//! `blur`, `pageshow`, `pagehide`, `unload`) or backend simulation
//! commands (`drop`, `restore`, `show`, `quit`).

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use presence_core::LifecycleSignal;
use presence_runtime::bridge::is_going_inactive;
use presence_runtime::{FileSlot, LifecycleBridge, MemoryLink, PresenceContext, PresenceHandle};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cli::RunOpts;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConsoleInput {
    Signal(LifecycleSignal),
    DropConnection,
    RestoreConnection,
    Show,
    Quit,
}

fn parse_console_line(line: &str) -> Option<ConsoleInput> {
    match line.trim().to_ascii_lowercase().as_str() {
        "" => None,
        "drop" => Some(ConsoleInput::DropConnection),
        "restore" => Some(ConsoleInput::RestoreConnection),
        "show" => Some(ConsoleInput::Show),
        "quit" | "exit" => Some(ConsoleInput::Quit),
        other => match other.parse::<LifecycleSignal>() {
            Ok(signal) => Some(ConsoleInput::Signal(signal)),
            Err(e) => {
                tracing::warn!("ignoring input: {e}");
                None
            }
        },
    }
}

pub async fn cmd_run(opts: &RunOpts, identity_path: &Path) -> anyhow::Result<()> {
    let config = opts.to_config();
    config.validate()?;

    let link = if opts.start_disconnected {
        MemoryLink::disconnected()
    } else {
        MemoryLink::new()
    };
    let slot = FileSlot::new(identity_path);
    tracing::info!(slot = %identity_path.display(), "presence starting");

    let cancel = CancellationToken::new();
    let (handle, task) = PresenceContext::spawn(
        config,
        Arc::new(link.clone()),
        Arc::new(slot),
        cancel.clone(),
    );
    handle.ensure_started()?;
    let bridge = LifecycleBridge::new(handle.clone());

    let stdin = BufReader::new(tokio::io::stdin());
    drive_console(stdin, shutdown_signal(), &bridge, &handle, &link).await;

    teardown(&bridge, &handle, &cancel, task).await?;
    tracing::info!("presence stopped");
    Ok(())
}

/// Feed console lines to the bridge until end of input, `unload`/`quit`,
/// a read error, or `shutdown`. Never returns early on a bad line, so the
/// caller's teardown always runs.
async fn drive_console<R, S>(
    mut input: R,
    shutdown: S,
    bridge: &LifecycleBridge,
    handle: &PresenceHandle,
    link: &MemoryLink,
) where
    R: AsyncBufRead + Unpin,
    S: Future<Output = anyhow::Result<()>>,
{
    tokio::pin!(shutdown);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = tokio::select! {
            res = &mut shutdown => {
                if let Err(e) = res {
                    tracing::warn!("shutdown signal unavailable: {e:#}");
                }
                break;
            }
            read = input.read_until(b'\n', &mut buf) => read,
        };

        match read {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("console input failed: {e}");
                break;
            }
        }

        let line = String::from_utf8_lossy(&buf);
        match parse_console_line(&line) {
            Some(ConsoleInput::Signal(LifecycleSignal::Unload)) | Some(ConsoleInput::Quit) => break,
            Some(ConsoleInput::Signal(signal)) => {
                bridge.dispatch(signal);
                if is_going_inactive(signal) && handle.flush().await.is_err() {
                    tracing::warn!("presence context gone, leaving console loop");
                    break;
                }
            }
            Some(ConsoleInput::DropConnection) => link.drop_connection(),
            Some(ConsoleInput::RestoreConnection) => link.restore_connection(),
            Some(ConsoleInput::Show) => {
                if let Err(e) = show(handle, link).await {
                    tracing::warn!("show failed: {e:#}");
                }
            }
            None => {}
        }
    }
}

/// Unload: the offline record must reach the link before the context stops.
async fn teardown(
    bridge: &LifecycleBridge,
    handle: &PresenceHandle,
    cancel: &CancellationToken,
    task: JoinHandle<()>,
) -> anyhow::Result<()> {
    bridge.dispatch(LifecycleSignal::Unload);
    if let Err(e) = handle.flush().await {
        tracing::warn!("offline write not confirmed: {e}");
    }
    cancel.cancel();
    task.await?;
    Ok(())
}

async fn show(handle: &PresenceHandle, link: &MemoryLink) -> anyhow::Result<()> {
    let snapshot = handle.snapshot().await?;
    let record = snapshot
        .presence_key
        .as_deref()
        .and_then(|key| link.get(key));
    let out = serde_json::json!({
        "state": snapshot,
        "record": record,
        "transport_connected": link.is_connected(),
        "session": link.session(),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

/// Wait for ctrl-c or SIGTERM.
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res?;
                tracing::info!("received ctrl-c, shutting down");
            }
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("received ctrl-c, shutting down");
    }

    Ok(())
}
