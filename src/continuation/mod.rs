// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Continuation Coordinator
//!
//! Carries an installation across the mandatory restart:
//!
//! - [`ContinuationCoordinator::persist_and_arm`] writes the descriptor and
//!   registers the logon hook, in that order. If the hook cannot be
//!   registered the descriptor is removed again, so there is never an armed
//!   descriptor that nothing will pick up.
//! - [`ContinuationCoordinator::detect_and_disarm`] is the first thing every
//!   run does. It removes the hook and the descriptor *before* returning the
//!   saved parameters, which makes resumption at-most-once: a crash after
//!   disarming leaves nothing armed, never a loop.

pub mod autostart;
pub mod descriptor;

pub use autostart::{AutostartHook, RunOnceHook, RUN_ONCE_KEY, RUN_ONCE_VALUE};
pub use descriptor::{ContinuationDescriptor, DescriptorStore, ResumeCommand, StoredDescriptor};

use crate::error::{InstallError, Result};
use crate::types::SessionParameters;

pub struct ContinuationCoordinator<'a> {
    store: DescriptorStore,
    hook: &'a dyn AutostartHook,
}

impl<'a> ContinuationCoordinator<'a> {
    pub fn new(store: DescriptorStore, hook: &'a dyn AutostartHook) -> Self {
        Self { store, hook }
    }

    pub fn store(&self) -> &DescriptorStore {
        &self.store
    }

    /// Persist `params` and arm the logon hook to run `resume`.
    pub fn persist_and_arm(
        &self,
        params: &SessionParameters,
        resume: ResumeCommand,
    ) -> Result<ContinuationDescriptor> {
        if let StoredDescriptor::Valid(existing) = self.store.read()? {
            return Err(InstallError::Continuation(format!(
                "a continuation armed at {} is already pending",
                existing.created_at.to_rfc3339()
            )));
        }

        let descriptor = ContinuationDescriptor::new(params.clone(), resume);
        self.store.write(&descriptor)?;

        let command_line = descriptor.resume_command.to_command_line();
        if let Err(e) = self.hook.register(&command_line) {
            tracing::error!(error = %e, "hook registration failed, removing descriptor");
            if let Err(cleanup) = self.store.remove() {
                tracing::warn!(error = %cleanup, "could not remove descriptor after failed arm");
            }
            return Err(e);
        }

        tracing::info!(environment = %params.environment_name, "continuation armed");
        Ok(descriptor)
    }

    /// Consume a pending continuation, if any.
    ///
    /// Returns the saved parameters only for a valid descriptor. A corrupt
    /// descriptor is disarmed and reported as "nothing pending".
    pub fn detect_and_disarm(&self) -> Result<Option<SessionParameters>> {
        match self.store.read()? {
            StoredDescriptor::Absent => {
                self.hook.unregister()?;
                Ok(None)
            }
            StoredDescriptor::Corrupt(reason) => {
                tracing::warn!(%reason, "discarding corrupt continuation descriptor");
                self.disarm()?;
                Ok(None)
            }
            StoredDescriptor::Valid(descriptor) => {
                self.disarm()?;
                tracing::info!(
                    armed_at = %descriptor.created_at.to_rfc3339(),
                    environment = %descriptor.params.environment_name,
                    "continuation consumed"
                );
                Ok(Some(descriptor.params))
            }
        }
    }

    fn disarm(&self) -> Result<()> {
        self.hook.unregister()?;
        self.store.remove()
    }

    /// Read-only view for `status`.
    pub fn pending(&self) -> Result<StoredDescriptor> {
        self.store.read()
    }
}
