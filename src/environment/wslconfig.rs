// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-user `.wslconfig` handling.
//!
//! Only the `memory=` key of the `[wsl2]` section is touched. Everything
//! else in the file, comments included, is preserved verbatim.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{InstallError, Result};
use crate::types::MemorySize;

/// `%USERPROFILE%\.wslconfig`
pub fn default_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".wslconfig")
}

/// Return `existing` with `[wsl2] memory=` set to `memory`, keeping its
/// line endings.
pub fn with_memory(existing: &str, memory: MemorySize) -> String {
    let setting = format!("memory={}", memory);
    let mut out: Vec<String> = Vec::new();
    let mut in_wsl2 = false;
    let mut saw_wsl2 = false;
    let mut written = false;

    for line in existing.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('[') && trimmed.ends_with(']') {
            if in_wsl2 && !written {
                out.push(setting.clone());
                written = true;
            }
            in_wsl2 = trimmed.eq_ignore_ascii_case("[wsl2]");
            saw_wsl2 |= in_wsl2;
            out.push(line.to_string());
            continue;
        }

        let is_memory_key = trimmed
            .split_once('=')
            .map(|(k, _)| k.trim().eq_ignore_ascii_case("memory"))
            .unwrap_or(false);
        if in_wsl2 && is_memory_key {
            if !written {
                out.push(setting.clone());
                written = true;
            }
            continue;
        }
        out.push(line.to_string());
    }

    if in_wsl2 && !written {
        out.push(setting);
    } else if !saw_wsl2 {
        if out.last().is_some_and(|l| !l.trim().is_empty()) {
            out.push(String::new());
        }
        out.push("[wsl2]".to_string());
        out.push(setting);
    }

    let eol = if existing.contains("\r\n") { "\r\n" } else { "\n" };
    let mut text = out.join(eol);
    text.push_str(eol);
    text
}

/// Write the memory limit. Returns whether the file changed.
pub fn apply_memory_limit(path: &Path, memory: MemorySize) -> Result<bool> {
    let existing = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(InstallError::io(path, e)),
    };
    let updated = with_memory(&existing, memory);
    if updated == existing {
        return Ok(false);
    }
    fs::write(path, updated).map_err(|e| InstallError::io(path, e))?;
    tracing::info!(path = %path.display(), %memory, "wrote WSL memory limit");
    Ok(true)
}
