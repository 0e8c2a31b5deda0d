//! Scripted Windows host for unit tests.
//!
//! `FakeHost` answers the handful of `wsl.exe`, `powershell.exe`, `reg.exe`
//! and `shutdown.exe` invocations the installer makes, keeping just enough
//! state (distributions, files, registry values) to exercise whole runs.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

use crate::error::{InstallError, Result};
use crate::exec::{CommandOutput, CommandRunner};
use crate::wsl::ALIVE_MARKER;

#[derive(Debug, Default)]
struct FakeDistro {
    responsive: bool,
    files: HashMap<String, Vec<u8>>,
    preseed: String,
    package_installed: bool,
    service_started: bool,
}

#[derive(Debug)]
struct HostState {
    distros: BTreeMap<String, FakeDistro>,
    adapters: Option<Vec<String>>,
    registry: BTreeMap<String, String>,
    calls: Vec<String>,
    import_fails: bool,
    list_failures: u32,
    responsive_after_import: bool,
    download_failures: u32,
    download_attempts: u32,
    install_exit: i32,
    setup_exit: i32,
    service_ready_after: Option<u32>,
    readiness_checks: u32,
    restart_exit: i32,
    restarts: u32,
}

impl Default for HostState {
    fn default() -> Self {
        Self {
            distros: BTreeMap::new(),
            adapters: Some(Vec::new()),
            registry: BTreeMap::new(),
            calls: Vec::new(),
            import_fails: false,
            list_failures: 0,
            responsive_after_import: true,
            download_failures: 0,
            download_attempts: 0,
            install_exit: 0,
            setup_exit: 0,
            service_ready_after: Some(1),
            readiness_checks: 0,
            restart_exit: 0,
            restarts: 0,
        }
    }
}

#[derive(Debug, Default)]
pub struct FakeHost {
    state: RefCell<HostState>,
}

fn ok(stdout: impl Into<Vec<u8>>) -> CommandOutput {
    CommandOutput {
        status: 0,
        stdout: stdout.into(),
        stderr: Vec::new(),
    }
}

fn fail(status: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        status,
        stdout: Vec::new(),
        stderr: stderr.as_bytes().to_vec(),
    }
}

fn utf16(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_distro(&self, name: &str) {
        self.state.borrow_mut().distros.insert(
            name.to_string(),
            FakeDistro {
                responsive: true,
                ..Default::default()
            },
        );
    }

    pub fn add_unresponsive_distro(&self, name: &str) {
        self.state
            .borrow_mut()
            .distros
            .insert(name.to_string(), FakeDistro::default());
    }

    pub fn set_adapters(&self, adapters: &[&str]) {
        self.state.borrow_mut().adapters = Some(adapters.iter().map(|s| s.to_string()).collect());
    }

    pub fn fail_adapter_query(&self) {
        self.state.borrow_mut().adapters = None;
    }

    /// Make the next `count` `wsl --list` calls fail as if the service were still starting.
    pub fn fail_list(&self, count: u32) {
        self.state.borrow_mut().list_failures = count;
    }

    pub fn fail_import(&self) {
        self.state.borrow_mut().import_fails = true;
    }

    pub fn unresponsive_after_import(&self) {
        self.state.borrow_mut().responsive_after_import = false;
    }

    pub fn fail_downloads(&self, count: u32) {
        self.state.borrow_mut().download_failures = count;
    }

    pub fn set_install_exit(&self, code: i32) {
        self.state.borrow_mut().install_exit = code;
    }

    pub fn set_setup_exit(&self, code: i32) {
        self.state.borrow_mut().setup_exit = code;
    }

    pub fn service_ready_after(&self, checks: Option<u32>) {
        self.state.borrow_mut().service_ready_after = checks;
    }

    pub fn fail_restart(&self) {
        self.state.borrow_mut().restart_exit = 1190;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    pub fn count_calls(&self, needle: &str) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|c| c.contains(needle))
            .count()
    }

    pub fn restarts(&self) -> u32 {
        self.state.borrow().restarts
    }

    pub fn download_attempts(&self) -> u32 {
        self.state.borrow().download_attempts
    }

    pub fn registry_value(&self, name: &str) -> Option<String> {
        self.state.borrow().registry.get(name).cloned()
    }

    pub fn distro_file(&self, distro: &str, path: &str) -> Option<Vec<u8>> {
        self.state
            .borrow()
            .distros
            .get(distro)
            .and_then(|d| d.files.get(path).cloned())
    }

    pub fn preseed(&self, distro: &str) -> String {
        self.state
            .borrow()
            .distros
            .get(distro)
            .map(|d| d.preseed.clone())
            .unwrap_or_default()
    }

    pub fn package_installed(&self, distro: &str) -> bool {
        self.state
            .borrow()
            .distros
            .get(distro)
            .map(|d| d.package_installed)
            .unwrap_or(false)
    }

    pub fn service_started(&self, distro: &str) -> bool {
        self.state
            .borrow()
            .distros
            .get(distro)
            .map(|d| d.service_started)
            .unwrap_or(false)
    }

    fn record(&self, program: &str, args: &[&str]) {
        let mut line = program.to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        self.state.borrow_mut().calls.push(line);
    }

    fn wsl(&self, args: &[&str], stdin: Option<&[u8]>) -> CommandOutput {
        let mut state = self.state.borrow_mut();
        match args.first().copied() {
            Some("--list") => {
                if state.list_failures > 0 {
                    state.list_failures -= 1;
                    return CommandOutput {
                        status: -1,
                        stdout: utf16("The Windows Subsystem for Linux service is starting.\r\n"),
                        stderr: Vec::new(),
                    };
                }
                if state.distros.is_empty() {
                    return CommandOutput {
                        status: -1,
                        stdout: utf16("Windows Subsystem for Linux has no installed distributions.\r\n"),
                        stderr: Vec::new(),
                    };
                }
                let names: Vec<&str> = state.distros.keys().map(|s| s.as_str()).collect();
                ok(utf16(&format!("{}\r\n", names.join("\r\n"))))
            }
            Some("--import") => {
                if state.import_fails {
                    return fail(1, "The operation could not be started");
                }
                if state.distros.contains_key(args[1]) {
                    return fail(-1, "A distribution with the supplied name already exists.");
                }
                let responsive = state.responsive_after_import;
                state.distros.insert(
                    args[1].to_string(),
                    FakeDistro {
                        responsive,
                        ..Default::default()
                    },
                );
                ok(Vec::new())
            }
            Some("--terminate") => ok(Vec::new()),
            Some("-d") => {
                let name = args[1];
                let script = args.last().copied().unwrap_or_default();
                let HostState {
                    distros,
                    download_failures,
                    download_attempts,
                    service_ready_after,
                    readiness_checks,
                    ..
                } = &mut *state;
                let Some(distro) = distros.get_mut(name) else {
                    return fail(-1, "There is no distribution with the supplied name.");
                };
                if !distro.responsive {
                    return fail(1, "timed out");
                }

                if script.contains(ALIVE_MARKER) {
                    ok(format!("{}\n", ALIVE_MARKER))
                } else if script.contains("debconf-set-selections") {
                    distro.preseed = String::from_utf8_lossy(stdin.unwrap_or_default()).into_owned();
                    ok(Vec::new())
                } else if let Some(idx) = script.rfind("cat > ") {
                    let path = script[idx + "cat > ".len()..].trim().to_string();
                    distro.files.insert(path, stdin.unwrap_or_default().to_vec());
                    ok(Vec::new())
                } else if script.contains("curl") && script.contains("/var/cache/wslsetup/") {
                    *download_attempts += 1;
                    if *download_failures > 0 {
                        *download_failures -= 1;
                        return fail(6, "curl: (6) Could not resolve host");
                    }
                    ok(Vec::new())
                } else if script.starts_with("tail -n") {
                    ok("Unpacking edge-engine ...\nE: Sub-process /usr/bin/dpkg returned an error code (1)\n")
                } else if script.contains("systemctl enable") {
                    distro.service_started = true;
                    ok(Vec::new())
                } else if script.contains("systemctl is-active") {
                    *readiness_checks += 1;
                    let ready = distro.service_started
                        && matches!(service_ready_after, Some(n) if *readiness_checks >= *n);
                    if ready {
                        ok("active\n")
                    } else {
                        fail(3, "")
                    }
                } else {
                    ok(Vec::new())
                }
            }
            _ => fail(1, "unsupported wsl invocation"),
        }
    }

    fn reg(&self, args: &[&str]) -> CommandOutput {
        let mut state = self.state.borrow_mut();
        let value_name = args
            .iter()
            .position(|a| *a == "/v")
            .and_then(|i| args.get(i + 1))
            .map(|s| s.to_string())
            .unwrap_or_default();
        match args.first().copied() {
            Some("add") => {
                let data = args
                    .iter()
                    .position(|a| *a == "/d")
                    .and_then(|i| args.get(i + 1))
                    .map(|s| s.to_string())
                    .unwrap_or_default();
                state.registry.insert(value_name, data);
                ok("The operation completed successfully.\r\n")
            }
            Some("delete") => match state.registry.remove(&value_name) {
                Some(_) => ok("The operation completed successfully.\r\n"),
                None => fail(1, "ERROR: The system was unable to find the specified registry key or value."),
            },
            Some("query") => match state.registry.get(&value_name) {
                Some(data) => ok(format!("    {}    REG_SZ    {}\r\n", value_name, data)),
                None => fail(1, "ERROR: The system was unable to find the specified registry key or value."),
            },
            _ => fail(1, "ERROR: Invalid syntax."),
        }
    }
}

impl CommandRunner for FakeHost {
    fn run(&self, program: &str, args: &[&str], stdin: Option<&[u8]>) -> Result<CommandOutput> {
        self.record(program, args);
        match program {
            "wsl.exe" => Ok(self.wsl(args, stdin)),
            "reg.exe" => Ok(self.reg(args)),
            "powershell.exe" => {
                let state = self.state.borrow();
                Ok(match &state.adapters {
                    Some(list) => ok(list.join("\r\n")),
                    None => fail(1, "Get-CimInstance : Access denied"),
                })
            }
            "shutdown.exe" => {
                let mut state = self.state.borrow_mut();
                state.restarts += 1;
                Ok(CommandOutput {
                    status: state.restart_exit,
                    ..Default::default()
                })
            }
            other => Err(InstallError::Spawn {
                program: other.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
            }),
        }
    }

    fn stream(&self, program: &str, args: &[&str], on_line: &mut dyn FnMut(&str)) -> Result<i32> {
        self.record(program, args);
        if program != "wsl.exe" || args.first() != Some(&"-d") {
            return Ok(1);
        }
        let name = args[1];
        let script = args.last().copied().unwrap_or_default();
        let mut state = self.state.borrow_mut();
        let setup_exit = state.setup_exit;
        let install_exit = state.install_exit;
        let Some(distro) = state.distros.get_mut(name) else {
            return Ok(-1);
        };

        if script.contains("/opt/wslsetup/setup-") {
            let copied = distro.files.keys().any(|p| script.contains(p.as_str()));
            if !copied {
                on_line("bash: /opt/wslsetup/setup.sh: No such file or directory");
                return Ok(127);
            }
            on_line("[setup] installing userland");
            on_line("[setup] done");
            Ok(setup_exit)
        } else if script.contains("apt-get install") && script.contains(".deb") {
            on_line("Reading package lists...");
            on_line("Setting up edge-engine (2.4.1) ...");
            if install_exit == 0 {
                distro.package_installed = true;
            }
            Ok(install_exit)
        } else {
            Ok(0)
        }
    }
}
