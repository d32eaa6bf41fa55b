use std::path::PathBuf;

/// Returns the per-user configuration directory for modelcheck.
/// Uses `dirs::config_dir()` + "modelcheck" (e.g., %APPDATA%/modelcheck or ~/.config/modelcheck).
/// Unlike the hub cache, nothing is created here; the directory is only read.
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir()
        .or_else(|| std::env::var("APPDATA").ok().map(PathBuf::from))
        .map(|p| p.join("modelcheck"))
}
