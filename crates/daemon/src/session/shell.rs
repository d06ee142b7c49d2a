//! Interactive shell selection.

use std::io::ErrorKind;
use std::path::Path;

/// Shells tried in order of preference.
pub const DEFAULT_SHELL_CANDIDATES: &[&str] = &["/bin/zsh", "/bin/bash", "/bin/sh"];

/// Command used when no candidate exists; resolved through `PATH` at spawn.
pub const FALLBACK_SHELL: &str = "sh";

/// Returns the first candidate present on the filesystem, or `fallback`.
///
/// A candidate only counts as absent when the lookup reports "not found";
/// any other metadata error (permission denied, ...) still selects it, and
/// spawning will surface the real problem.
pub fn resolve_shell<S: AsRef<str>>(candidates: &[S], fallback: &str) -> String {
    for candidate in candidates {
        let candidate = candidate.as_ref();
        match std::fs::metadata(Path::new(candidate)) {
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            _ => {
                tracing::debug!(shell = %candidate, "Resolved shell");
                return candidate.to_string();
            }
        }
    }

    tracing::debug!(shell = %fallback, "No shell candidate found, using fallback");
    fallback.to_string()
}
