use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub transcode: TranscodeConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,

    #[serde(default)]
    pub registry: RegistryConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestConfig {
    /// Base address of the ingest server; the stream id is appended as the
    /// last path segment to form the transcoder input.
    #[serde(default = "default_ingest_base_url")]
    pub base_url: String,
}

fn default_ingest_base_url() -> String {
    "rtmp://127.0.0.1:1935/live".to_string()
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            base_url: default_ingest_base_url(),
        }
    }
}

impl IngestConfig {
    /// Input locator for one stream.
    pub fn locator(&self, stream_id: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), stream_id)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Directory holding one sub-directory per stream.
    #[serde(default = "default_output_root")]
    pub root: PathBuf,

    #[serde(default = "default_manifest_name")]
    pub manifest_name: String,

    /// ffmpeg `-hls_segment_filename` pattern, relative to the stream directory.
    #[serde(default = "default_segment_pattern")]
    pub segment_pattern: String,

    /// Keep playlist and segments after a stream is unpublished (default: false)
    #[serde(default)]
    pub retain_segments: bool,

    /// Keep output of a job that exited abnormally, for diagnostics (default: true)
    #[serde(default = "default_retain_on_failure")]
    pub retain_on_failure: bool,
}

fn default_output_root() -> PathBuf {
    PathBuf::from("./media/live")
}

fn default_manifest_name() -> String {
    "index.m3u8".to_string()
}

fn default_segment_pattern() -> String {
    "segment_%05d.ts".to_string()
}

fn default_retain_on_failure() -> bool {
    true
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: default_output_root(),
            manifest_name: default_manifest_name(),
            segment_pattern: default_segment_pattern(),
            retain_segments: false,
            retain_on_failure: default_retain_on_failure(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranscodeConfig {
    /// Transcoder executable (default: ffmpeg, resolved through PATH)
    #[serde(default = "default_command")]
    pub command: PathBuf,

    /// Arguments placed before the generated ones, e.g. a wrapper script.
    #[serde(default)]
    pub command_args: Vec<String>,

    #[serde(default = "default_video_codec")]
    pub video_codec: String,

    #[serde(default = "default_video_preset")]
    pub video_preset: String,

    #[serde(default = "default_video_bitrate")]
    pub video_bitrate: String,

    /// Output size as `WIDTHxHEIGHT`; source size when unset.
    #[serde(default)]
    pub resolution: Option<String>,

    /// Frame rate used to align keyframes with segment boundaries (default: 30)
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,

    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,

    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,

    #[serde(default = "default_audio_sample_rate")]
    pub audio_sample_rate: u32,

    /// Target segment length in seconds (default: 2)
    #[serde(default = "default_segment_duration")]
    pub segment_duration_secs: u32,

    /// Number of segments kept in the live playlist (default: 6)
    #[serde(default = "default_playlist_size")]
    pub playlist_size: u32,

    /// Let the transcoder delete segments that fall out of the playlist (default: true)
    #[serde(default = "default_delete_segments")]
    pub delete_segments: bool,

    /// Extra encoder arguments, inserted before the HLS muxer options.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_command() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_video_codec() -> String {
    "libx264".to_string()
}

fn default_video_preset() -> String {
    "veryfast".to_string()
}

fn default_video_bitrate() -> String {
    "2500k".to_string()
}

fn default_frame_rate() -> u32 {
    30
}

fn default_audio_codec() -> String {
    "aac".to_string()
}

fn default_audio_bitrate() -> String {
    "128k".to_string()
}

fn default_audio_sample_rate() -> u32 {
    44100
}

fn default_segment_duration() -> u32 {
    2
}

fn default_playlist_size() -> u32 {
    6
}

fn default_delete_segments() -> bool {
    true
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            command_args: Vec::new(),
            video_codec: default_video_codec(),
            video_preset: default_video_preset(),
            video_bitrate: default_video_bitrate(),
            resolution: None,
            frame_rate: default_frame_rate(),
            audio_codec: default_audio_codec(),
            audio_bitrate: default_audio_bitrate(),
            audio_sample_rate: default_audio_sample_rate(),
            segment_duration_secs: default_segment_duration(),
            playlist_size: default_playlist_size(),
            delete_segments: default_delete_segments(),
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SupervisorConfig {
    /// Time a job gets to exit after SIGTERM before it is killed (default: 5)
    #[serde(default = "default_grace_timeout")]
    pub grace_timeout_secs: u64,

    /// Upper bound on waiting for all jobs during service shutdown (default: 15)
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_grace_timeout() -> u64 {
    5
}

fn default_shutdown_timeout() -> u64 {
    15
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            grace_timeout_secs: default_grace_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl SupervisorConfig {
    pub fn grace_timeout(&self) -> Duration {
        Duration::from_secs(self.grace_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    /// Seconds an Idle record is kept for diagnostics; 0 keeps it forever (default: 300)
    #[serde(default = "default_idle_retention")]
    pub idle_retention_secs: u64,
}

fn default_idle_retention() -> u64 {
    300
}

impl RegistryConfig {
    /// Retention window, or `None` when idle records are kept forever.
    pub fn idle_retention(&self) -> Option<Duration> {
        (self.idle_retention_secs > 0).then(|| Duration::from_secs(self.idle_retention_secs))
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            idle_retention_secs: default_idle_retention(),
        }
    }
}
