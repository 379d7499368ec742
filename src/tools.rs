//! External tool detection.

use std::path::{Path, PathBuf};
use std::process::Command;

/// Information about an external tool.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    /// Name the tool was looked up by.
    pub name: String,
    /// Whether the tool runs.
    pub available: bool,
    /// First line of its version output.
    pub version: Option<String>,
    /// Resolved executable path.
    pub path: Option<PathBuf>,
}

/// Check whether `program` runs, using `version_arg` to query its version.
///
/// `program` may be a bare name resolved through `PATH` or an explicit path.
pub fn check_tool_with_arg(program: &Path, version_arg: &str) -> ToolInfo {
    let name = program.to_string_lossy().to_string();
    let path = which::which(program).ok();

    let Some(ref resolved) = path else {
        return ToolInfo {
            name,
            available: false,
            version: None,
            path: None,
        };
    };

    match Command::new(resolved).arg(version_arg).output() {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .map(|s| s.to_string());

            ToolInfo {
                name,
                available: true,
                version,
                path,
            }
        }
        _ => ToolInfo {
            name,
            available: false,
            version: None,
            path,
        },
    }
}

/// Check the configured transcoder.
pub fn check_transcoder(command: &Path) -> ToolInfo {
    check_tool_with_arg(command, "-version")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_tool_not_found() {
        let info = check_transcoder(Path::new("nonexistent_tool_12345"));
        assert!(!info.available);
        assert!(info.version.is_none());
        assert!(info.path.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_check_tool_found_on_path() {
        let info = check_tool_with_arg(Path::new("true"), "-version");
        assert!(info.available);
        assert!(info.path.is_some());
    }
}
