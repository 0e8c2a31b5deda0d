// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Restart Trigger
//!
//! Issues the full-machine restart that loads the host GPU driver. This is
//! always `shutdown.exe /r`; restarting only the WSL VM (`wsl --shutdown`)
//! would leave the driver unloaded.

use std::io::{self, IsTerminal, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

use colored::Colorize;
use inquire::error::InquireError;
use inquire::Confirm;

use crate::exec::CommandRunner;

const SHUTDOWN_EXE: &str = "shutdown.exe";
const RESTART_REASON: &str = "wslsetup: restarting to finish installation";

static CANCEL_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

/// Ctrl+C flag, installed once per process.
fn cancel_flag() -> Arc<AtomicBool> {
    CANCEL_FLAG
        .get_or_init(|| {
            let flag = Arc::new(AtomicBool::new(false));
            let handler_flag = Arc::clone(&flag);
            if let Err(e) = ctrlc::set_handler(move || handler_flag.store(true, Ordering::SeqCst)) {
                tracing::warn!(error = %e, "could not install Ctrl+C handler; countdown cannot be cancelled");
            }
            flag
        })
        .clone()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartOutcome {
    /// Restart command accepted; the OS will end this process
    Issued,
    /// Operator cancelled during the prompt or countdown
    Cancelled,
    /// `--defer-restart`: the caller restarts the machine
    Deferred,
    /// Restart command failed (policy, permissions)
    Failed(String),
}

pub struct RestartTrigger<'a> {
    runner: &'a dyn CommandRunner,
    countdown: Duration,
}

impl<'a> RestartTrigger<'a> {
    pub fn new(runner: &'a dyn CommandRunner, countdown: Duration) -> Self {
        Self { runner, countdown }
    }

    /// Warn, optionally confirm, count down, restart.
    ///
    /// The confirmation only appears with a terminal attached. Its answer
    /// does not skip the countdown; Esc at the prompt or Ctrl+C during the
    /// countdown cancels.
    pub fn request_restart(&self, interactive: bool, defer: bool) -> RestartOutcome {
        if defer {
            tracing::info!("restart deferred to caller");
            return RestartOutcome::Deferred;
        }

        println!();
        println!(
            "{} {}",
            "[!]".yellow(),
            "A full restart of Windows is required to activate the graphics driver.".bold()
        );
        println!("    Save your work in other applications. Installation resumes after you sign in again.");

        if interactive && io::stdin().is_terminal() {
            match Confirm::new("Restart now?").with_default(true).prompt() {
                Ok(answer) => tracing::info!(answer, "restart confirmation"),
                Err(InquireError::OperationCanceled) | Err(InquireError::OperationInterrupted) => {
                    tracing::info!("restart cancelled at prompt");
                    return RestartOutcome::Cancelled;
                }
                Err(e) => tracing::debug!(error = %e, "confirmation prompt unavailable"),
            }
        }

        if !self.count_down() {
            println!();
            println!("{} Restart cancelled.", "[!]".yellow());
            tracing::info!("restart cancelled during countdown");
            return RestartOutcome::Cancelled;
        }

        self.issue()
    }

    /// Returns false when cancelled.
    fn count_down(&self) -> bool {
        let seconds = self.countdown.as_secs();
        if seconds == 0 {
            return true;
        }
        let cancel = cancel_flag();
        cancel.store(false, Ordering::SeqCst);

        for remaining in (1..=seconds).rev() {
            print!("\r    Restarting in {:>2}s (Ctrl+C to cancel) ", remaining);
            let _ = io::stdout().flush();
            // check ten times a second so Ctrl+C feels immediate
            for _ in 0..10 {
                if cancel.load(Ordering::SeqCst) {
                    return false;
                }
                thread::sleep(Duration::from_millis(100));
            }
        }
        println!();
        !cancel.load(Ordering::SeqCst)
    }

    fn issue(&self) -> RestartOutcome {
        let args = ["/r", "/t", "0", "/c", RESTART_REASON];
        match self.runner.run(SHUTDOWN_EXE, &args, None) {
            Ok(out) if out.success() => {
                tracing::info!("full restart issued");
                RestartOutcome::Issued
            }
            Ok(out) => {
                let reason = format!("shutdown.exe exited with {}: {}", out.status, out.stderr_lossy().trim());
                tracing::error!(%reason, "restart failed");
                RestartOutcome::Failed(reason)
            }
            Err(e) => {
                tracing::error!(error = %e, "restart failed");
                RestartOutcome::Failed(e.to_string())
            }
        }
    }
}
