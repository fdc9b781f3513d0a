//! QR artifacts for pairing codes.

use std::{
    io,
    path::{Path, PathBuf},
};

use {
    image::Luma,
    qrcode::{QrCode, render::unicode::Dense1x2},
    tracing::{debug, warn},
};

use crate::error::{Error, Result};

const MIN_DIMENSION: u32 = 256;

/// Writes `scan-<account_id>-<unix_secs>.png` files under one directory.
#[derive(Debug, Clone)]
pub struct QrRenderer {
    dir: PathBuf,
}

impl QrRenderer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn render(&self, account_id: &str, code: &str) -> Result<PathBuf> {
        let qr = QrCode::new(code.as_bytes()).map_err(|e| Error::Render(e.to_string()))?;
        let image = qr
            .render::<Luma<u8>>()
            .min_dimensions(MIN_DIMENSION, MIN_DIMENSION)
            .build();

        std::fs::create_dir_all(&self.dir)
            .map_err(|e| Error::Render(format!("create {}: {e}", self.dir.display())))?;
        let path = self.dir.join(format!(
            "scan-{account_id}-{}.png",
            chrono::Utc::now().timestamp()
        ));
        image
            .save(&path)
            .map_err(|e| Error::Render(format!("write {}: {e}", path.display())))?;
        debug!(account_id, path = %path.display(), "qr code rendered");
        Ok(path)
    }

    /// Remove this account's QR files. Returns how many were deleted.
    pub fn cleanup(&self, account_id: &str) -> io::Result<usize> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !is_account_artifact(name, account_id) {
                continue;
            }
            match std::fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => warn!(account_id, file = name, error = %e, "failed to remove qr file"),
            }
        }
        Ok(removed)
    }
}

fn is_account_artifact(name: &str, account_id: &str) -> bool {
    name.strip_prefix("scan-")
        .and_then(|rest| rest.strip_prefix(account_id))
        .and_then(|rest| rest.strip_prefix('-'))
        .and_then(|rest| rest.strip_suffix(".png"))
        .is_some_and(|ts| !ts.is_empty() && ts.bytes().all(|b| b.is_ascii_digit()))
}

/// Render a code as unicode half-blocks for a terminal.
pub fn render_terminal(code: &str) -> Result<String> {
    let qr = QrCode::new(code.as_bytes()).map_err(|e| Error::Render(e.to_string()))?;
    Ok(qr
        .render::<Dense1x2>()
        .dark_color(Dense1x2::Light)
        .light_color(Dense1x2::Dark)
        .quiet_zone(true)
        .build())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn artifact_pattern_is_exact() {
        assert!(is_account_artifact("scan-a1-1700000000.png", "a1"));
        assert!(!is_account_artifact("scan-a1-b-1700000000.png", "a1"));
        assert!(!is_account_artifact("scan-a1-.png", "a1"));
        assert!(!is_account_artifact("scan-a1-1700000000.jpg", "a1"));
        assert!(!is_account_artifact("scan-a10-1700000000.png", "a1"));
    }

    #[test]
    fn render_then_cleanup() {
        let tmp = tempfile::tempdir().unwrap();
        let renderer = QrRenderer::new(tmp.path().join("qrcode"));

        let path = renderer.render("a1", "2@abcdef,ghijkl").unwrap();
        assert!(path.exists());
        let other = tmp.path().join("qrcode").join("scan-a1-b-1700000000.png");
        std::fs::write(&other, b"x").unwrap();

        assert_eq!(renderer.cleanup("a1").unwrap(), 1);
        assert!(!path.exists());
        assert!(other.exists());
    }

    #[test]
    fn cleanup_without_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let renderer = QrRenderer::new(tmp.path().join("missing"));
        assert_eq!(renderer.cleanup("a1").unwrap(), 0);
    }

    #[test]
    fn terminal_rendering_has_rows() {
        let text = render_terminal("hello").unwrap();
        assert!(text.lines().count() > 5);
    }
}
