//! Volume name normalization.

use crate::error::{Result, VolumeError};

/// Normalize a requested volume identifier into its canonical absolute path.
///
/// Surrounding whitespace and every leading `/` are stripped, then a single
/// `/` is prepended. Internal slashes are kept, so nested names such as
/// `team/cache` are legal. The result is used verbatim as the registry key,
/// as the directory path inside CephFS, and as the mountpoint suffix, so a
/// `..` segment is rejected: it would resolve outside the local root.
pub fn canonical_path(raw: &str) -> Result<String> {
    let stripped = raw.trim().trim_start_matches('/');
    if stripped.trim().is_empty() || stripped.split('/').any(|seg| seg == "..") {
        return Err(VolumeError::InvalidName(raw.to_string()));
    }
    Ok(format!("/{stripped}"))
}

/// Display name stored in a registry record: the canonical path without its
/// surrounding slashes.
pub fn display_name(path: &str) -> String {
    path.trim_matches('/').to_string()
}
