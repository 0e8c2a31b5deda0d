// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Cross-restart installation orchestrator.
//!
//! One process runs one of two paths:
//!
//! ```text
//! fresh:   Detecting → Provisioning → RunningHardwareSetup → InstallingPackage
//!          → PersistingContinuation → AwaitingRestart → (OS restart)
//! resumed: Resumed → Complete
//! ```
//!
//! Which path is decided by [`ContinuationCoordinator::detect_and_disarm`],
//! called before anything else. Nothing in memory crosses the restart; the
//! resumed process rebuilds its parameters from the descriptor.

use std::path::PathBuf;

use crate::config::{DataLayout, InstallerConfig};
use crate::continuation::{AutostartHook, ContinuationCoordinator, DescriptorStore, ResumeCommand};
use crate::detect::{self, HardwareProfile};
use crate::environment::{wslconfig, EnvironmentProvisioner};
use crate::error::Result;
use crate::exec::CommandRunner;
use crate::install::PackageInstaller;
use crate::report::Reporter;
use crate::restart::{RestartOutcome, RestartTrigger};
use crate::setup::{SetupOutcome, SetupRunner};
use crate::types::{InstallPhase, PhaseTracker, SessionParameters};
use crate::wsl::Wsl;

/// Per-invocation switches that are not part of the session.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Prompt before restarting (only honoured with a terminal attached)
    pub interactive: bool,
    /// Arm the continuation but leave the restart to the caller
    pub defer_restart: bool,
    /// Executable the logon hook launches
    pub resume_program: PathBuf,
    /// `.wslconfig` receiving the memory limit; `None` leaves it alone
    pub wslconfig_path: Option<PathBuf>,
}

/// How a run ended without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Pre-restart phases done and the continuation is armed
    RestartPending {
        restart: RestartOutcome,
        profile: HardwareProfile,
        setup: SetupOutcome,
    },
    /// Resumed after the restart and finished
    Completed { service_ready: bool },
}

impl RunOutcome {
    pub fn requires_reboot(&self) -> bool {
        matches!(self, Self::RestartPending { .. })
    }
}

pub struct Orchestrator<'a> {
    runner: &'a dyn CommandRunner,
    hook: &'a dyn AutostartHook,
    config: &'a InstallerConfig,
    layout: &'a DataLayout,
    reporter: &'a Reporter,
    options: RunOptions,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        hook: &'a dyn AutostartHook,
        config: &'a InstallerConfig,
        layout: &'a DataLayout,
        reporter: &'a Reporter,
        options: RunOptions,
    ) -> Self {
        Self {
            runner,
            hook,
            config,
            layout,
            reporter,
            options,
        }
    }

    fn coordinator(&self) -> ContinuationCoordinator<'a> {
        ContinuationCoordinator::new(DescriptorStore::new(self.layout.continuation_dir()), self.hook)
    }

    fn wsl(&self) -> Wsl<'a> {
        Wsl::new(self.runner)
    }

    /// Entry point for `install`.
    ///
    /// A pending continuation always wins over `params`: the hook launches
    /// `install` with the saved arguments, and a manual re-run while a
    /// restart is pending finishes that session instead of starting another.
    pub fn run(&self, params: &SessionParameters) -> Result<RunOutcome> {
        match self.coordinator().detect_and_disarm()? {
            Some(saved) => {
                if &saved != params {
                    tracing::info!("using parameters from the pending continuation");
                }
                self.resumed(&saved)
            }
            None => {
                params.validate()?;
                self.fresh(params)
            }
        }
    }

    /// Entry point for `resume`. `None` when nothing was pending.
    pub fn resume(&self) -> Result<Option<RunOutcome>> {
        match self.coordinator().detect_and_disarm()? {
            Some(saved) => self.resumed(&saved).map(Some),
            None => Ok(None),
        }
    }

    fn fresh(&self, params: &SessionParameters) -> Result<RunOutcome> {
        let mut tracker = PhaseTracker::fresh();
        let wsl = self.wsl();

        self.reporter.phase(tracker.current(), "Detecting graphics hardware");
        let detection = detect::detect_profile(self.runner);
        for adapter in &detection.adapters {
            self.reporter.info(&format!("Adapter: {}", adapter));
        }
        self.reporter.ok(&format!("Hardware profile: {}", detection.profile));

        tracker.advance(InstallPhase::Provisioning)?;
        self.reporter.phase(
            tracker.current(),
            &format!("Preparing WSL environment '{}'", params.environment_name),
        );
        if let Some(path) = &self.options.wslconfig_path {
            if wslconfig::apply_memory_limit(path, params.memory)? {
                self.reporter
                    .info(&format!("WSL memory limit set to {} (takes effect after restart)", params.memory));
            }
        }
        let provisioner = EnvironmentProvisioner::new(wsl, self.config, self.layout);
        let spinner = self.reporter.spinner("Checking environment");
        let env = match provisioner.ensure_ready(&params.environment_name) {
            Ok(env) => {
                self.reporter.finish_spinner(&spinner, true, "Environment is ready");
                env
            }
            Err(e) => {
                spinner.finish_and_clear();
                return Err(e);
            }
        };

        tracker.advance(InstallPhase::RunningHardwareSetup)?;
        self.reporter.phase(tracker.current(), "Configuring graphics acceleration");
        let setup = SetupRunner::new(wsl, self.reporter).run(&env, detection.profile)?;

        tracker.advance(InstallPhase::InstallingPackage)?;
        self.reporter
            .phase(tracker.current(), &format!("Installing {}", self.config.package_name));
        PackageInstaller::new(wsl, self.config, self.layout, self.reporter).install(&env, params)?;

        tracker.advance(InstallPhase::PersistingContinuation)?;
        self.reporter.phase(tracker.current(), "Scheduling post-restart completion");
        let resume = ResumeCommand::for_session(&self.options.resume_program, params);
        self.coordinator().persist_and_arm(params, resume)?;
        self.reporter.ok("Installation will finish automatically after the restart");

        tracker.advance(InstallPhase::AwaitingRestart)?;
        self.reporter.phase(tracker.current(), "Restart required");
        let restart = RestartTrigger::new(self.runner, self.config.restart_countdown())
            .request_restart(self.options.interactive, self.options.defer_restart);

        Ok(RunOutcome::RestartPending {
            restart,
            profile: detection.profile,
            setup,
        })
    }

    fn resumed(&self, params: &SessionParameters) -> Result<RunOutcome> {
        let mut tracker = PhaseTracker::resumed();
        self.reporter.phase(
            tracker.current(),
            &format!("Resuming installation in '{}'", params.environment_name),
        );

        // the WSL service can lag behind logon right after boot
        let env = EnvironmentProvisioner::new(self.wsl(), self.config, self.layout)
            .require_ready(&params.environment_name)?;
        let service_ready =
            PackageInstaller::new(self.wsl(), self.config, self.layout, self.reporter).start_service(&env)?;

        tracker.advance(InstallPhase::Complete)?;
        self.reporter.phase(tracker.current(), "Installation complete");
        Ok(RunOutcome::Completed { service_ready })
    }
}
