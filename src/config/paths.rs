//! Platform-specific data directory paths.
//!
//!   Windows: %APPDATA%/ai-interviewer/data
//!   macOS:   ~/Library/Application Support/ai-interviewer/data
//!   Linux:   $XDG_CONFIG_HOME/ai-interviewer/data (default ~/.config)

use std::path::PathBuf;

const APP_DIR: &str = "ai-interviewer";

/// Get the interviewer data directory (cross-platform).
pub fn get_data_dir() -> PathBuf {
    get_config_base().join(APP_DIR).join("data")
}

/// Directory for rolling log files.
pub fn get_log_dir() -> PathBuf {
    get_data_dir().join("logs")
}

/// Get the platform-appropriate base config directory.
fn get_config_base() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata);
        }
        dirs::config_dir().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("AppData")
                .join("Roaming")
        })
    }

    #[cfg(target_os = "macos")]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Library")
            .join("Application Support")
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_dir_layout() {
        let dir = get_data_dir();
        assert!(dir.ends_with("ai-interviewer/data"));
        assert!(get_log_dir().starts_with(&dir));
    }
}
