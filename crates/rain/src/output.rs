//! Saving a manifest to disk.

use std::path::Path;

use rain_core::{CollectionManifest, RainError};
use tracing::debug;

use crate::render;

/// Write the manifest to `path`: pretty JSON for a `.json` extension,
/// the plain rendering otherwise. The confirmation goes to stderr so
/// stdout stays clean under `--json`.
pub fn save_manifest(manifest: &CollectionManifest, path: &Path) -> Result<(), RainError> {
    let body = if wants_json(path) {
        let mut body = serde_json::to_string_pretty(&manifest.to_json())
            .map_err(|err| RainError::Unavailable(format!("cannot encode report: {err}")))?;
        body.push('\n');
        body
    } else {
        render::render_plain(manifest)
    };
    std::fs::write(path, &body)
        .map_err(|err| RainError::Unavailable(format!("cannot write {}: {err}", path.display())))?;
    debug!(path = %path.display(), bytes = body.len(), "report saved");
    eprintln!(
        "Saved {} section(s) to {}",
        manifest.requested_sections().len(),
        path.display()
    );
    Ok(())
}

fn wants_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}
