//! Transcoder command line construction.

use crate::config::{Config, IngestConfig, TranscodeConfig};
use liveforged_common::StreamId;
use std::path::{Path, PathBuf};

/// Everything needed to build a transcoder invocation for any stream.
#[derive(Debug, Clone)]
pub struct TranscodeSettings {
    pub transcode: TranscodeConfig,
    pub ingest: IngestConfig,
    pub manifest_name: String,
    pub segment_pattern: String,
}

impl TranscodeSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            transcode: config.transcode.clone(),
            ingest: config.ingest.clone(),
            manifest_name: config.output.manifest_name.clone(),
            segment_pattern: config.output.segment_pattern.clone(),
        }
    }

    /// Input locator for one stream.
    pub fn input_locator(&self, id: &StreamId) -> String {
        self.ingest.locator(id.as_str())
    }

    /// Build the invocation for `id` writing into `output_dir`.
    pub fn command(&self, id: &StreamId, output_dir: &Path) -> TranscodeCommand {
        let cfg = &self.transcode;
        let manifest_path = output_dir.join(&self.manifest_name);

        let mut args = cfg.command_args.clone();
        args.extend([
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-loglevel".to_string(),
            "info".to_string(),
            "-i".to_string(),
            self.input_locator(id),
        ]);

        // Video settings
        args.extend(["-c:v".to_string(), cfg.video_codec.clone()]);
        if cfg.video_codec != "copy" {
            if cfg.video_codec == "libx264" {
                args.extend([
                    "-preset".to_string(),
                    cfg.video_preset.clone(),
                    "-tune".to_string(),
                    "zerolatency".to_string(),
                ]);
            }
            args.extend(["-b:v".to_string(), cfg.video_bitrate.clone()]);
            if let Some(ref resolution) = cfg.resolution {
                args.extend(["-s".to_string(), resolution.clone()]);
            }
            // A keyframe at every segment boundary keeps segments uniform.
            let gop = cfg.frame_rate.saturating_mul(cfg.segment_duration_secs).max(1);
            args.extend([
                "-g".to_string(),
                gop.to_string(),
                "-keyint_min".to_string(),
                gop.to_string(),
                "-sc_threshold".to_string(),
                "0".to_string(),
            ]);
        }

        // Audio settings
        args.extend(["-c:a".to_string(), cfg.audio_codec.clone()]);
        if cfg.audio_codec != "copy" {
            args.extend([
                "-b:a".to_string(),
                cfg.audio_bitrate.clone(),
                "-ar".to_string(),
                cfg.audio_sample_rate.to_string(),
            ]);
        }

        args.extend(cfg.extra_args.iter().cloned());

        // HLS muxer
        args.extend([
            "-f".to_string(),
            "hls".to_string(),
            "-hls_time".to_string(),
            cfg.segment_duration_secs.to_string(),
            "-hls_list_size".to_string(),
            cfg.playlist_size.to_string(),
        ]);
        if cfg.delete_segments {
            args.extend(["-hls_flags".to_string(), "delete_segments".to_string()]);
        }
        args.extend([
            "-hls_segment_filename".to_string(),
            output_dir
                .join(&self.segment_pattern)
                .to_string_lossy()
                .to_string(),
        ]);

        // Output
        args.push(manifest_path.to_string_lossy().to_string());

        TranscodeCommand {
            program: cfg.command.clone(),
            args,
            manifest_path,
        }
    }
}

/// A fully resolved transcoder invocation. The manifest path is always the
/// last argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub manifest_path: PathBuf,
}

impl TranscodeCommand {
    pub fn program_name(&self) -> String {
        self.program.to_string_lossy().to_string()
    }
}
