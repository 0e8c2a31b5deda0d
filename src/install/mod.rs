// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Package Installer
//!
//! Downloads the `.deb` into the environment, pre-answers its debconf
//! questions from the session parameters, and installs it with apt in
//! non-interactive mode. Install output is streamed to the console and to
//! two logs: `/var/log/wslsetup/install.log` inside the environment and
//! `<data dir>/logs/package-install.log` on the host.
//!
//! After the restart the same module starts the package's service and
//! waits (bounded) for it to report active.

pub mod preseed;

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use crate::config::{DataLayout, InstallerConfig};
use crate::error::{InstallError, Result};
use crate::report::Reporter;
use crate::retry::{poll_until, retry};
use crate::types::{EnvironmentInstance, SessionParameters};
use crate::utils::{shell_quote, tail_lines};
use crate::wsl::Wsl;

pub use preseed::{Preseed, PACKAGE_QUESTIONS};

/// Download directory inside the environment.
pub const PACKAGE_CACHE_DIR: &str = "/var/cache/wslsetup";
/// Environment-side install log.
pub const ENVIRONMENT_LOG: &str = "/var/log/wslsetup/install.log";

pub struct PackageInstaller<'a> {
    wsl: Wsl<'a>,
    config: &'a InstallerConfig,
    layout: &'a DataLayout,
    reporter: &'a Reporter,
}

impl<'a> PackageInstaller<'a> {
    pub fn new(wsl: Wsl<'a>, config: &'a InstallerConfig, layout: &'a DataLayout, reporter: &'a Reporter) -> Self {
        Self {
            wsl,
            config,
            layout,
            reporter,
        }
    }

    fn package_path(&self) -> String {
        format!("{}/{}.deb", PACKAGE_CACHE_DIR, self.config.package_name)
    }

    /// Host-side copy of the install log.
    pub fn host_log_path(&self) -> PathBuf {
        self.layout.logs_dir().join("package-install.log")
    }

    /// Download, preseed and install. Any failure is fatal to the run.
    pub fn install(&self, env: &EnvironmentInstance, params: &SessionParameters) -> Result<()> {
        self.download(env)?;
        self.preseed(env, params)?;
        self.run_install(env)
    }

    fn download(&self, env: &EnvironmentInstance) -> Result<()> {
        let url = &self.config.package_url;
        let policy = &self.config.download_retry;
        let script = format!(
            "mkdir -p {} && curl -fsSL --retry 0 --max-time {} -o {} {}",
            PACKAGE_CACHE_DIR,
            self.config.download_timeout_secs,
            self.package_path(),
            shell_quote(url)
        );

        let spinner = self.reporter.spinner(&format!("Downloading {}", url));
        let result = retry(policy, |attempt| {
            tracing::info!(url = %url, attempt, "downloading package");
            let output = self.wsl.exec(&env.name, &script).map_err(|e| e.to_string())?;
            if output.success() {
                Ok(())
            } else {
                let reason = format!("curl exited with {}: {}", output.status, output.stderr_lossy().trim());
                tracing::warn!(attempt, %reason, "package download attempt failed");
                Err(reason)
            }
        });

        match result {
            Ok(()) => {
                self.reporter.finish_spinner(&spinner, true, "Package downloaded");
                Ok(())
            }
            Err(last_error) => {
                spinner.finish_and_clear();
                Err(InstallError::Download {
                    url: url.clone(),
                    attempts: policy.attempts.max(1),
                    last_error,
                })
            }
        }
    }

    fn preseed(&self, env: &EnvironmentInstance, params: &SessionParameters) -> Result<()> {
        let preseed = Preseed::from_params(&self.config.package_name, params);
        tracing::debug!(selections = %preseed.render_masked(), "preseeding debconf");

        let output = self
            .wsl
            .exec_with_stdin(&env.name, "debconf-set-selections", preseed.render().as_bytes())?;
        if !output.success() {
            return Err(InstallError::PackageInstall {
                code: output.status,
                log_tail: tail_lines(&output.stderr_lossy(), self.config.log_tail_lines),
            });
        }
        Ok(())
    }

    fn run_install(&self, env: &EnvironmentInstance) -> Result<()> {
        let script = format!(
            "mkdir -p /var/log/wslsetup && DEBIAN_FRONTEND=noninteractive apt-get install -y -q \
             -o Dpkg::Options::=--force-confdef -o Dpkg::Options::=--force-confold {} 2>&1 \
             | tee -a {}; exit ${{PIPESTATUS[0]}}",
            self.package_path(),
            ENVIRONMENT_LOG
        );

        let mut host_log = self.open_host_log();
        let code = self.wsl.stream(&env.name, &script, &mut |line| {
            self.reporter.output_line("apt", line);
            append_host_line(&mut host_log, line);
        })?;

        if code == 0 {
            self.reporter.ok(&format!("Installed {}", self.config.package_name));
            return Ok(());
        }

        let log_tail = self.environment_log_tail(env);
        tracing::error!(code, tail = ?log_tail, "package installation failed");
        Err(InstallError::PackageInstall { code, log_tail })
    }

    fn open_host_log(&self) -> Option<File> {
        let path = self.host_log_path();
        let opened = path
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|_| OpenOptions::new().create(true).append(true).open(&path));
        match opened {
            Ok(file) => Some(file),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "host copy of install log unavailable");
                None
            }
        }
    }

    fn environment_log_tail(&self, env: &EnvironmentInstance) -> Vec<String> {
        let n = self.config.log_tail_lines;
        match self.wsl.exec(&env.name, &format!("tail -n {} {}", n, ENVIRONMENT_LOG)) {
            Ok(output) if output.success() => tail_lines(&output.stdout_lossy(), n),
            _ => Vec::new(),
        }
    }

    /// Enable and start the service, then wait for it to report active.
    ///
    /// Returns whether the service became ready within the configured bound.
    /// Never fails the run: a slow service is reported, not fatal.
    pub fn start_service(&self, env: &EnvironmentInstance) -> Result<bool> {
        let service = shell_quote(&self.config.service_name);
        let output = self.wsl.exec(&env.name, &format!("systemctl enable --now {}", service))?;
        if !output.success() {
            self.reporter.warn(&format!(
                "Could not start {}: {}",
                self.config.service_name,
                output.stderr_lossy().trim()
            ));
            return Ok(false);
        }

        let spinner = self
            .reporter
            .spinner(&format!("Waiting for {} to become ready", self.config.service_name));
        let check = format!("systemctl is-active --quiet {}", service);
        let ready = poll_until(&self.config.readiness_poll, |attempt| {
            let active = matches!(self.wsl.exec(&env.name, &check), Ok(out) if out.success());
            tracing::debug!(attempt, active, "service readiness check");
            active
        });

        if ready {
            self.reporter
                .finish_spinner(&spinner, true, &format!("{} is running", self.config.service_name));
        } else {
            self.reporter.finish_spinner(
                &spinner,
                false,
                &format!(
                    "{} did not report ready after {} checks. Check it with: wsl -d {} -- systemctl status {}",
                    self.config.service_name, self.config.readiness_poll.attempts, env.name, self.config.service_name
                ),
            );
        }
        Ok(ready)
    }
}

/// Append to the host copy of the install log. The first failed write
/// drops the sink.
fn append_host_line<W: Write>(sink: &mut Option<W>, line: &str) {
    if let Some(writer) = sink.as_mut() {
        if let Err(e) = writeln!(writer, "{}", line) {
            tracing::warn!(error = %e, "host copy of install log stopped");
            *sink = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::test_support::FakeHost;
    use crate::types::{EnvironmentState, InstallMode, MemorySize};
    use std::time::Duration;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, InstallerConfig, DataLayout) {
        let dir = TempDir::new().unwrap();
        let config = InstallerConfig {
            download_retry: RetryPolicy::fixed(3, Duration::from_millis(1)),
            readiness_poll: RetryPolicy::fixed(3, Duration::from_millis(1)),
            ..Default::default()
        };
        let layout = DataLayout::new(dir.path());
        (dir, config, layout)
    }

    fn env() -> EnvironmentInstance {
        EnvironmentInstance {
            name: "edge".to_string(),
            state: EnvironmentState::Ready,
            storage_path: PathBuf::from("/data/distros/edge"),
        }
    }

    fn params() -> SessionParameters {
        SessionParameters {
            memory: MemorySize::from_gb(8).unwrap(),
            email: "ops@example.com".to_string(),
            license_key: "KEY-1".to_string(),
            usage_reporting: true,
            mode: InstallMode::Full,
            environment_name: "edge".to_string(),
            debug: false,
        }
    }

    #[test]
    fn test_install_preseeds_before_installing() {
        let (_dir, config, layout) = fixture();
        let host = FakeHost::new();
        host.add_distro("edge");
        let reporter = Reporter::quiet();
        let installer = PackageInstaller::new(Wsl::new(&host), &config, &layout, &reporter);

        installer.install(&env(), &params()).unwrap();

        assert!(host.package_installed("edge"));
        assert!(host.preseed("edge").contains("edge-engine/email string ops@example.com"));

        let calls = host.calls();
        let preseed_at = calls.iter().position(|c| c.contains("debconf-set-selections")).unwrap();
        let install_at = calls.iter().position(|c| c.contains("apt-get install")).unwrap();
        assert!(preseed_at < install_at);
        assert!(calls[install_at].contains("DEBIAN_FRONTEND=noninteractive"));

        let host_log = fs::read_to_string(installer.host_log_path()).unwrap();
        assert!(host_log.contains("Setting up edge-engine"));
    }

    #[test]
    fn test_download_retries_then_succeeds() {
        let (_dir, config, layout) = fixture();
        let host = FakeHost::new();
        host.add_distro("edge");
        host.fail_downloads(2);
        let reporter = Reporter::quiet();
        let installer = PackageInstaller::new(Wsl::new(&host), &config, &layout, &reporter);

        installer.install(&env(), &params()).unwrap();
        assert_eq!(host.download_attempts(), 3);
    }

    #[test]
    fn test_download_exhaustion_is_fatal_and_skips_install() {
        let (_dir, config, layout) = fixture();
        let host = FakeHost::new();
        host.add_distro("edge");
        host.fail_downloads(3);
        let reporter = Reporter::quiet();
        let installer = PackageInstaller::new(Wsl::new(&host), &config, &layout, &reporter);

        let err = installer.install(&env(), &params()).unwrap_err();
        assert!(matches!(err, InstallError::Download { attempts: 3, .. }));
        assert_eq!(host.download_attempts(), 3);
        assert_eq!(host.count_calls("apt-get install"), 0);
        assert!(!host.package_installed("edge"));
    }

    #[test]
    fn test_install_failure_surfaces_log_tail() {
        let (_dir, config, layout) = fixture();
        let host = FakeHost::new();
        host.add_distro("edge");
        host.set_install_exit(100);
        let reporter = Reporter::quiet();
        let installer = PackageInstaller::new(Wsl::new(&host), &config, &layout, &reporter);

        match installer.install(&env(), &params()) {
            Err(InstallError::PackageInstall { code, log_tail }) => {
                assert_eq!(code, 100);
                assert!(log_tail.iter().any(|l| l.contains("dpkg returned an error code")));
            }
            other => panic!("expected PackageInstall error, got {:?}", other),
        }
    }

    #[test]
    fn test_service_ready_within_bound() {
        let (_dir, config, layout) = fixture();
        let host = FakeHost::new();
        host.add_distro("edge");
        host.service_ready_after(Some(2));
        let reporter = Reporter::quiet();
        let installer = PackageInstaller::new(Wsl::new(&host), &config, &layout, &reporter);

        assert!(installer.start_service(&env()).unwrap());
        assert!(host.service_started("edge"));
        assert_eq!(host.count_calls("systemctl is-active"), 2);
    }

    #[test]
    fn test_service_never_ready_is_not_an_error() {
        let (_dir, config, layout) = fixture();
        let host = FakeHost::new();
        host.add_distro("edge");
        host.service_ready_after(None);
        let reporter = Reporter::quiet();
        let installer = PackageInstaller::new(Wsl::new(&host), &config, &layout, &reporter);

        assert!(!installer.start_service(&env()).unwrap());
        assert_eq!(host.count_calls("systemctl is-active"), 3);
    }

    #[test]
    fn test_failing_host_log_is_dropped_after_first_error() {
        struct Broken<'a>(&'a std::cell::Cell<u32>);
        impl Write for Broken<'_> {
            fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
                self.0.set(self.0.get() + 1);
                Err(std::io::Error::other("disk full"))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let writes = std::cell::Cell::new(0);
        let mut sink = Some(Broken(&writes));
        append_host_line(&mut sink, "Reading package lists...");
        append_host_line(&mut sink, "Setting up edge-engine ...");

        assert!(sink.is_none());
        assert_eq!(writes.get(), 1);
    }
}
