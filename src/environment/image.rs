// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Base root filesystem acquisition.
//!
//! The image is either a local tarball or an http(s) URL. Downloads land in
//! the image cache under a `.part` name and are renamed only after the
//! checksum (when configured) matches, so a cached file is always complete.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::config::{DataLayout, InstallerConfig};
use crate::error::{InstallError, Result};
use crate::retry::retry;

/// Return a path to a complete, verified base image.
pub fn obtain_base_image(config: &InstallerConfig, layout: &DataLayout, name: &str) -> Result<PathBuf> {
    let source = config.base_image.trim();
    let provisioning = |reason: String| InstallError::Provisioning {
        name: name.to_string(),
        reason,
    };

    if !is_remote(source) {
        let path = PathBuf::from(source);
        if !path.is_file() {
            return Err(provisioning(format!("base image {} does not exist", path.display())));
        }
        verify(&path, config.base_image_sha256.as_deref()).map_err(provisioning)?;
        return Ok(path);
    }

    let cache_dir = layout.image_cache_dir();
    fs::create_dir_all(&cache_dir).map_err(|e| InstallError::io(&cache_dir, e))?;
    let target = cache_dir.join(file_name_for(source));

    if target.is_file() && verify(&target, config.base_image_sha256.as_deref()).is_ok() {
        tracing::info!(path = %target.display(), "reusing cached base image");
        return Ok(target);
    }

    let partial = target.with_extension("part");
    let client = reqwest::blocking::Client::builder()
        .timeout(config.download_timeout())
        .build()
        .map_err(|e| provisioning(format!("http client: {}", e)))?;

    retry(&config.download_retry, |attempt| {
        tracing::info!(url = source, attempt, "downloading base image");
        download_to(&client, source, &partial)?;
        verify(&partial, config.base_image_sha256.as_deref())?;
        Ok::<(), String>(())
    })
    .map_err(|last_error| InstallError::Download {
        url: source.to_string(),
        attempts: config.download_retry.attempts.max(1),
        last_error,
    })?;

    fs::rename(&partial, &target).map_err(|e| InstallError::io(&target, e))?;
    Ok(target)
}

fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

fn file_name_for(url: &str) -> String {
    url.rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(|s| s.split('?').next().unwrap_or(s).to_string())
        .unwrap_or_else(|| "base-image.tar.gz".to_string())
}

fn download_to(client: &reqwest::blocking::Client, url: &str, dest: &Path) -> std::result::Result<(), String> {
    let mut response = client
        .get(url)
        .send()
        .and_then(|r| r.error_for_status())
        .map_err(|e| e.to_string())?;

    let mut file = File::create(dest).map_err(|e| format!("{}: {}", dest.display(), e))?;
    io::copy(&mut response, &mut file).map_err(|e| format!("{}: {}", dest.display(), e))?;
    file.flush().map_err(|e| e.to_string())?;
    file.sync_all().map_err(|e| e.to_string())?;
    Ok(())
}

/// Hex SHA-256 of a file.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn verify(path: &Path, expected: Option<&str>) -> std::result::Result<(), String> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let actual = sha256_file(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(format!(
            "checksum mismatch for {}: expected {}, got {}",
            path.display(),
            expected,
            actual
        ))
    }
}
