// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Continuation descriptor and its on-disk store.
//!
//! The descriptor is written atomically (temp file, fsync, rename) while an
//! exclusive lock is held on a sibling `.lock` file, so a reader never sees a
//! half-written descriptor and two installer instances never interleave.
//! A SHA-256 over the payload detects anything the rename cannot: manual
//! edits, truncation by a failing disk, a different installer version.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{InstallError, Result};
use crate::types::SessionParameters;
use crate::utils::windows_quote;

/// Bumped when the descriptor layout changes incompatibly.
pub const DESCRIPTOR_VERSION: u32 = 1;

const DESCRIPTOR_FILE: &str = "descriptor.json";
const MARKER_FILE: &str = "restart-pending";
const LOCK_FILE: &str = "descriptor.lock";

/// Default timeout for acquiring the store lock
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Retry interval when waiting for lock acquisition
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// The program and arguments the autostart hook launches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ResumeCommand {
    /// Resume command that re-runs `install` with the session's parameters.
    pub fn for_session(program: impl Into<PathBuf>, params: &SessionParameters) -> Self {
        Self {
            program: program.into(),
            args: params.to_args(),
        }
    }

    /// Single command line suitable for a registry `REG_SZ` value.
    pub fn to_command_line(&self) -> String {
        let mut parts = vec![windows_quote(&self.program.to_string_lossy())];
        parts.extend(self.args.iter().map(|a| windows_quote(a)));
        parts.join(" ")
    }
}

#[derive(Serialize)]
struct Payload<'a> {
    version: u32,
    created_at: &'a DateTime<Utc>,
    params: &'a SessionParameters,
    resume_command: &'a ResumeCommand,
}

/// Everything needed to finish the installation after the restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuationDescriptor {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub params: SessionParameters,
    pub resume_command: ResumeCommand,
    /// Hex SHA-256 of the other fields
    pub checksum: String,
}

impl ContinuationDescriptor {
    pub fn new(params: SessionParameters, resume_command: ResumeCommand) -> Self {
        let mut descriptor = Self {
            version: DESCRIPTOR_VERSION,
            created_at: Utc::now(),
            params,
            resume_command,
            checksum: String::new(),
        };
        descriptor.checksum = descriptor.compute_checksum();
        descriptor
    }

    fn compute_checksum(&self) -> String {
        let payload = Payload {
            version: self.version,
            created_at: &self.created_at,
            params: &self.params,
            resume_command: &self.resume_command,
        };
        // serializing plain data into a Vec cannot fail
        let bytes = serde_json::to_vec(&payload).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }

    pub fn verify(&self) -> std::result::Result<(), String> {
        if self.version != DESCRIPTOR_VERSION {
            return Err(format!(
                "unsupported descriptor version {} (expected {})",
                self.version, DESCRIPTOR_VERSION
            ));
        }
        if self.compute_checksum() != self.checksum {
            return Err("checksum mismatch".to_string());
        }
        Ok(())
    }
}

/// Result of reading the store.
#[derive(Debug)]
pub enum StoredDescriptor {
    Absent,
    Valid(ContinuationDescriptor),
    Corrupt(String),
}

/// Descriptor, marker and lock files under one directory.
#[derive(Debug, Clone)]
pub struct DescriptorStore {
    dir: PathBuf,
}

impl DescriptorStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn descriptor_path(&self) -> PathBuf {
        self.dir.join(DESCRIPTOR_FILE)
    }

    /// The "restart expected" flag file. Its content tells the operator how
    /// to resume by hand.
    pub fn marker_path(&self) -> PathBuf {
        self.dir.join(MARKER_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    fn acquire_lock(&self, exclusive: bool) -> Result<File> {
        fs::create_dir_all(&self.dir).map_err(|e| InstallError::io(&self.dir, e))?;
        let path = self.lock_path();
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| InstallError::io(&path, e))?;

        let start = Instant::now();
        loop {
            // fs2's trait methods, not the inherent `File` locks of the same name
            let attempt = if exclusive {
                FileExt::try_lock_exclusive(&lock_file)
            } else {
                FileExt::try_lock_shared(&lock_file)
            };
            match attempt {
                Ok(()) => return Ok(lock_file),
                Err(e) if is_contended(&e) => {
                    if start.elapsed() >= LOCK_TIMEOUT {
                        return Err(InstallError::Continuation(format!(
                            "timed out waiting for lock on {} after {:?}; another installer may be running",
                            path.display(),
                            LOCK_TIMEOUT
                        )));
                    }
                    thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(e) => return Err(InstallError::io(&path, e)),
            }
        }
    }

    /// Atomically write the descriptor, then the marker.
    pub fn write(&self, descriptor: &ContinuationDescriptor) -> Result<()> {
        let _guard = self.acquire_lock(true)?;

        let path = self.descriptor_path();
        let temp_path = path.with_extension("tmp");
        let content = serde_json::to_string_pretty(descriptor)
            .map_err(|e| InstallError::Continuation(format!("failed to serialize descriptor: {}", e)))?;

        {
            let mut temp_file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)
                .map_err(|e| InstallError::io(&temp_path, e))?;
            temp_file
                .write_all(content.as_bytes())
                .map_err(|e| InstallError::io(&temp_path, e))?;
            temp_file.sync_all().map_err(|e| InstallError::io(&temp_path, e))?;
        }
        fs::rename(&temp_path, &path).map_err(|e| InstallError::io(&path, e))?;

        let marker = self.marker_path();
        fs::write(&marker, marker_text(descriptor)).map_err(|e| InstallError::io(&marker, e))?;
        tracing::info!(path = %path.display(), "continuation descriptor written");
        Ok(())
    }

    pub fn read(&self) -> Result<StoredDescriptor> {
        let path = self.descriptor_path();
        if !path.exists() {
            return Ok(StoredDescriptor::Absent);
        }

        let _guard = self.acquire_lock(false)?;
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(StoredDescriptor::Absent),
            Err(e) => return Err(InstallError::io(&path, e)),
        };

        let descriptor: ContinuationDescriptor = match serde_json::from_str(&content) {
            Ok(d) => d,
            Err(e) => return Ok(StoredDescriptor::Corrupt(format!("unreadable descriptor: {}", e))),
        };
        match descriptor.verify() {
            Ok(()) => Ok(StoredDescriptor::Valid(descriptor)),
            Err(reason) => Ok(StoredDescriptor::Corrupt(reason)),
        }
    }

    /// Delete descriptor and marker. Missing files are fine.
    pub fn remove(&self) -> Result<()> {
        let _guard = self.acquire_lock(true)?;
        for path in [self.descriptor_path(), self.marker_path()] {
            remove_if_present(&path)?;
        }
        Ok(())
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(InstallError::io(path, e)),
    }
}

fn marker_text(descriptor: &ContinuationDescriptor) -> String {
    format!(
        "A restart is required to finish installing into '{env}'.\r\n\
         Armed at {at}.\r\n\
         \r\n\
         Installation resumes automatically the next time you sign in.\r\n\
         If it does not, open a terminal and run:\r\n\
         \r\n\
         \x20   {cmd}\r\n\
         \r\n\
         or, to resume without restarting:\r\n\
         \r\n\
         \x20   {program} resume\r\n",
        env = descriptor.params.environment_name,
        at = descriptor.created_at.to_rfc3339(),
        cmd = descriptor.resume_command.to_command_line(),
        program = windows_quote(&descriptor.resume_command.program.to_string_lossy()),
    )
}

/// Windows reports a held lock as `ERROR_LOCK_VIOLATION`, not `WouldBlock`.
fn is_contended(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
