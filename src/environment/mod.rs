// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Environment Provisioner
//!
//! Makes sure the named WSL distribution exists and answers a liveness probe.
//! If it is missing it is imported from the base image and bootstrapped.
//!
//! # Algorithm
//!
//! ```text
//! list ──▶ present? ──yes──▶ poll liveness ──▶ Ready | Unreachable
//!             │
//!             no
//!             ▼
//!   obtain image ──▶ import ──▶ poll ──▶ bootstrap ──▶ terminate ──▶ poll ──▶ Ready | Unreachable
//! ```
//!
//! Calling [`EnvironmentProvisioner::ensure_ready`] on a ready environment
//! costs one `--list` and one probe, nothing else. A failing `--list` is
//! retried under the liveness policy and never taken to mean "absent".
//! After a restart [`EnvironmentProvisioner::require_ready`] is used
//! instead: it never imports.

pub mod image;
pub mod wslconfig;

use std::fs;

use crate::config::{DataLayout, InstallerConfig};
use crate::error::{InstallError, Result};
use crate::retry::{poll_until, retry};
use crate::types::{EnvironmentInstance, EnvironmentState};
use crate::utils::shell_quote;
use crate::wsl::Wsl;

/// Written to `/etc/wsl.conf` during bootstrap so the package's systemd unit
/// can run.
const WSL_CONF: &str = "[boot]\nsystemd=true\n\n[interop]\nappendWindowsPath=false\n";

pub struct EnvironmentProvisioner<'a> {
    wsl: Wsl<'a>,
    config: &'a InstallerConfig,
    layout: &'a DataLayout,
}

impl<'a> EnvironmentProvisioner<'a> {
    pub fn new(wsl: Wsl<'a>, config: &'a InstallerConfig, layout: &'a DataLayout) -> Self {
        Self { wsl, config, layout }
    }

    /// Return a verified-reachable environment named `name`, creating it if needed.
    pub fn ensure_ready(&self, name: &str) -> Result<EnvironmentInstance> {
        let mut instance = EnvironmentInstance {
            name: name.to_string(),
            state: EnvironmentState::Absent,
            storage_path: self.layout.environment_dir(name),
        };

        if self.is_registered(name)? {
            tracing::info!(name, "environment already registered, probing");
            return self.probe(instance);
        }

        instance.state = EnvironmentState::Provisioning;
        tracing::info!(name, "environment absent, provisioning");

        let image = image::obtain_base_image(self.config, self.layout, name)?;
        fs::create_dir_all(&instance.storage_path)
            .map_err(|e| InstallError::io(&instance.storage_path, e))?;
        self.wsl.import(name, &instance.storage_path, &image)?;

        let instance = self.probe(instance)?;
        self.bootstrap(name)?;

        // wsl.conf is read at distribution start
        self.wsl.terminate(name)?;
        self.probe(EnvironmentInstance {
            state: EnvironmentState::Provisioning,
            ..instance
        })
    }

    /// Return the existing environment `name` once it answers the liveness
    /// probe. A missing environment is an error.
    pub fn require_ready(&self, name: &str) -> Result<EnvironmentInstance> {
        if !self.is_registered(name)? {
            return Err(InstallError::Provisioning {
                name: name.to_string(),
                reason: "the environment is no longer registered with WSL".to_string(),
            });
        }
        self.probe(EnvironmentInstance {
            name: name.to_string(),
            state: EnvironmentState::Provisioning,
            storage_path: self.layout.environment_dir(name),
        })
    }

    fn is_registered(&self, name: &str) -> Result<bool> {
        retry(&self.config.liveness_poll, |attempt| {
            self.wsl.exists(name).inspect_err(|e| {
                tracing::debug!(name, attempt, error = %e, "distribution list unavailable");
            })
        })
    }

    fn probe(&self, mut instance: EnvironmentInstance) -> Result<EnvironmentInstance> {
        let policy = &self.config.liveness_poll;
        let alive = poll_until(policy, |attempt| {
            let ok = self.wsl.is_responsive(&instance.name);
            if !ok {
                tracing::debug!(name = %instance.name, attempt, "environment not responding yet");
            }
            ok
        });

        if alive {
            instance.state = EnvironmentState::Ready;
            Ok(instance)
        } else {
            instance.state = EnvironmentState::Unreachable;
            tracing::error!(name = %instance.name, attempts = policy.attempts, "environment unreachable");
            Err(InstallError::Unreachable {
                name: instance.name,
                attempts: policy.attempts.max(1),
            })
        }
    }

    fn bootstrap(&self, name: &str) -> Result<()> {
        let packages: Vec<String> = self
            .config
            .bootstrap_packages
            .iter()
            .map(|p| shell_quote(p))
            .collect();

        let script = format!(
            "export DEBIAN_FRONTEND=noninteractive && apt-get update -q && apt-get install -y -q {}",
            packages.join(" ")
        );
        let output = self.wsl.exec(name, &script)?;
        if !output.success() {
            return Err(InstallError::Provisioning {
                name: name.to_string(),
                reason: format!(
                    "bootstrap packages failed to install (exit {}): {}",
                    output.status,
                    output.stderr_lossy().trim()
                ),
            });
        }

        let output = self.wsl.exec_with_stdin(name, "cat > /etc/wsl.conf", WSL_CONF.as_bytes())?;
        if !output.success() {
            return Err(InstallError::Provisioning {
                name: name.to_string(),
                reason: "could not write /etc/wsl.conf".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::test_support::FakeHost;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn setup() -> (TempDir, InstallerConfig, DataLayout) {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("rootfs.tar.gz");
        fs::write(&image, b"rootfs").unwrap();
        let config = InstallerConfig {
            base_image: image.display().to_string(),
            liveness_poll: RetryPolicy::fixed(3, Duration::from_millis(1)),
            ..Default::default()
        };
        let layout = DataLayout::new(dir.path().join("data"));
        (dir, config, layout)
    }

    #[test]
    fn test_absent_environment_is_imported_and_bootstrapped() {
        let (_dir, config, layout) = setup();
        let host = FakeHost::new();
        let provisioner = EnvironmentProvisioner::new(Wsl::new(&host), &config, &layout);

        let instance = provisioner.ensure_ready("edge").unwrap();
        assert!(instance.is_ready());
        assert_eq!(instance.storage_path, layout.environment_dir("edge"));
        assert_eq!(host.count_calls("--import edge"), 1);
        assert_eq!(host.count_calls("apt-get install -y -q ca-certificates"), 1);
        let conf = host.distro_file("edge", "/etc/wsl.conf").unwrap();
        assert!(String::from_utf8(conf).unwrap().contains("systemd=true"));
    }

    #[test]
    fn test_ensure_ready_is_idempotent() {
        let (_dir, config, layout) = setup();
        let host = FakeHost::new();
        let provisioner = EnvironmentProvisioner::new(Wsl::new(&host), &config, &layout);

        let first = provisioner.ensure_ready("edge").unwrap();
        let calls_after_first = host.calls().len();

        let second = provisioner.ensure_ready("edge").unwrap();
        let new_calls: Vec<String> = host.calls()[calls_after_first..].to_vec();

        assert_eq!(first, second);
        assert_eq!(new_calls.len(), 2, "expected one list and one probe, got {:?}", new_calls);
        assert!(new_calls[0].contains("--list"));
        assert!(new_calls[1].contains("wslsetup-alive"));
        assert_eq!(host.count_calls("--import"), 1);
    }

    #[test]
    fn test_existing_environment_is_not_reimported() {
        let (_dir, config, layout) = setup();
        let host = FakeHost::new();
        host.add_distro("edge");
        let provisioner = EnvironmentProvisioner::new(Wsl::new(&host), &config, &layout);

        assert!(provisioner.ensure_ready("edge").unwrap().is_ready());
        assert_eq!(host.count_calls("--import"), 0);
    }

    #[test]
    fn test_transient_list_failure_does_not_reimport() {
        let (_dir, config, layout) = setup();
        let host = FakeHost::new();
        host.add_distro("edge");
        host.fail_list(1);
        let provisioner = EnvironmentProvisioner::new(Wsl::new(&host), &config, &layout);

        assert!(provisioner.ensure_ready("edge").unwrap().is_ready());
        assert_eq!(host.count_calls("--list"), 2);
        assert_eq!(host.count_calls("--import"), 0);
    }

    #[test]
    fn test_persistent_list_failure_is_an_error() {
        let (_dir, config, layout) = setup();
        let host = FakeHost::new();
        host.fail_list(10);
        let provisioner = EnvironmentProvisioner::new(Wsl::new(&host), &config, &layout);

        let err = provisioner.ensure_ready("edge").unwrap_err();
        assert!(matches!(err, InstallError::WslUnavailable { .. }));
        assert_eq!(host.count_calls("--list"), 3);
        assert_eq!(host.count_calls("--import"), 0);
    }

    #[test]
    fn test_require_ready_never_imports() {
        let (_dir, config, layout) = setup();
        let host = FakeHost::new();
        let provisioner = EnvironmentProvisioner::new(Wsl::new(&host), &config, &layout);

        assert!(matches!(
            provisioner.require_ready("edge"),
            Err(InstallError::Provisioning { .. })
        ));
        assert_eq!(host.count_calls("--import"), 0);

        host.add_distro("edge");
        host.fail_list(2);
        assert!(provisioner.require_ready("edge").unwrap().is_ready());
    }

    #[test]
    fn test_unresponsive_environment_is_unreachable_within_bound() {
        let (_dir, config, layout) = setup();
        let host = FakeHost::new();
        host.add_unresponsive_distro("edge");
        let provisioner = EnvironmentProvisioner::new(Wsl::new(&host), &config, &layout);

        let start = Instant::now();
        let err = provisioner.ensure_ready("edge").unwrap_err();
        assert!(matches!(err, InstallError::Unreachable { attempts: 3, .. }));
        assert_eq!(host.count_calls("wslsetup-alive"), 3);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_unresponsive_after_import_is_error() {
        let (_dir, config, layout) = setup();
        let host = FakeHost::new();
        host.unresponsive_after_import();
        let provisioner = EnvironmentProvisioner::new(Wsl::new(&host), &config, &layout);

        assert!(matches!(
            provisioner.ensure_ready("edge"),
            Err(InstallError::Unreachable { .. })
        ));
    }

    #[test]
    fn test_import_failure_is_provisioning_error() {
        let (_dir, config, layout) = setup();
        let host = FakeHost::new();
        host.fail_import();
        let provisioner = EnvironmentProvisioner::new(Wsl::new(&host), &config, &layout);

        assert!(matches!(
            provisioner.ensure_ready("edge"),
            Err(InstallError::Provisioning { .. })
        ));
    }
}
