mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Highest frame rate accepted for keyframe alignment.
const MAX_FRAME_RATE: u32 = 240;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    // Try default locations
    let default_paths = [
        "./liveforged.toml",
        "./config.toml",
        "~/.config/liveforged/config.toml",
        "/etc/liveforged/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    // Return default config if no file found
    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    if config.output.root.as_os_str().is_empty() {
        anyhow::bail!("Output root cannot be empty");
    }

    if config.output.manifest_name.is_empty() || config.output.manifest_name.contains('/') {
        anyhow::bail!(
            "Manifest name must be a plain file name, got {:?}",
            config.output.manifest_name
        );
    }

    if config.transcode.command.as_os_str().is_empty() {
        anyhow::bail!("Transcode command cannot be empty");
    }

    if config.transcode.segment_duration_secs == 0 {
        anyhow::bail!("Segment duration must be at least 1 second");
    }

    if config.transcode.frame_rate == 0 || config.transcode.frame_rate > MAX_FRAME_RATE {
        anyhow::bail!(
            "Frame rate must be between 1 and {}, got {}",
            MAX_FRAME_RATE,
            config.transcode.frame_rate
        );
    }

    if config.transcode.playlist_size == 0 {
        anyhow::bail!("Playlist size must be at least 1");
    }

    if let Some(ref res) = config.transcode.resolution {
        let valid = res
            .split_once('x')
            .map(|(w, h)| w.parse::<u32>().is_ok() && h.parse::<u32>().is_ok())
            .unwrap_or(false);
        if !valid {
            anyhow::bail!("Resolution must look like 1280x720, got {:?}", res);
        }
    }

    if !config.ingest.base_url.contains("://") {
        tracing::warn!(
            "Ingest base URL has no scheme: {:?}",
            config.ingest.base_url
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.ingest.base_url, "rtmp://127.0.0.1:1935/live");
        assert_eq!(config.output.manifest_name, "index.m3u8");
        assert!(!config.output.retain_segments);
        assert!(config.output.retain_on_failure);
        assert_eq!(config.transcode.command, std::path::PathBuf::from("ffmpeg"));
        assert_eq!(config.transcode.segment_duration_secs, 2);
        assert_eq!(config.transcode.playlist_size, 6);
        assert!(config.transcode.delete_segments);
        assert_eq!(config.supervisor.grace_timeout_secs, 5);
        assert_eq!(config.supervisor.shutdown_timeout_secs, 15);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [output]
            root = "/srv/hls"
            retain_segments = true

            [transcode]
            video_bitrate = "4000k"
            resolution = "1920x1080"
            "#,
        )
        .unwrap();

        assert_eq!(config.output.root, std::path::PathBuf::from("/srv/hls"));
        assert!(config.output.retain_segments);
        assert_eq!(config.output.segment_pattern, "segment_%05d.ts");
        assert_eq!(config.transcode.video_bitrate, "4000k");
        assert_eq!(config.transcode.resolution.as_deref(), Some("1920x1080"));
        assert_eq!(config.transcode.audio_codec, "aac");
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.transcode.segment_duration_secs = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.transcode.frame_rate = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.transcode.frame_rate = u32::MAX;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.transcode.resolution = Some("720p".to_string());
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.output.manifest_name = "../index.m3u8".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_locator_trims_trailing_slash() {
        let ingest = IngestConfig {
            base_url: "rtmp://ingest:1935/live/".to_string(),
        };
        assert_eq!(ingest.locator("cam1"), "rtmp://ingest:1935/live/cam1");
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("liveforged.toml");
        std::fs::write(&path, "[server]\nport = 9090\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.server.port, 9090);

        let config = load_config_or_default(Some(&path)).unwrap();
        assert_eq!(config.server.port, 9090);
    }
}
