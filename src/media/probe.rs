//! Media inspection via ffprobe.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::process::ProcessRunner;
use super::MediaError;

/// Intrinsic properties of the first video stream
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub width: u32,
    pub height: u32,
    pub duration_secs: f64,
}

#[derive(Debug, Deserialize)]
struct ProbeDocument {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    /// ffprobe reports durations as strings ("12.345000")
    #[serde(default)]
    duration: Option<serde_json::Value>,
}

/// Extracts pixel dimensions and duration with an external probing tool
#[derive(Clone)]
pub struct MediaInspector {
    runner: Arc<dyn ProcessRunner>,
    ffprobe_path: String,
    timeout: Duration,
}

impl MediaInspector {
    pub fn new(runner: Arc<dyn ProcessRunner>, ffprobe_path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            runner,
            ffprobe_path: ffprobe_path.into(),
            timeout,
        }
    }

    /// Probe `path` for its first video stream.
    ///
    /// `Ok(None)` means the file has no video stream, which is a normal
    /// outcome for still images.
    pub async fn inspect(&self, path: &Path) -> Result<Option<MediaInfo>, MediaError> {
        let args = vec![
            "-v".to_string(),
            "error".to_string(),
            "-select_streams".to_string(),
            "v:0".to_string(),
            "-show_entries".to_string(),
            "stream=width,height,duration".to_string(),
            "-of".to_string(),
            "json".to_string(),
            path.to_string_lossy().into_owned(),
        ];

        let output = self.runner.run(&self.ffprobe_path, &args, self.timeout).await;
        if !output.success() {
            return Err(MediaError::Probe(format!(
                "{} failed for {}: {}",
                self.ffprobe_path,
                path.display(),
                output.stderr.trim()
            )));
        }

        parse_probe_output(&output.stdout)
    }
}

/// Parse ffprobe's JSON document.
pub fn parse_probe_output(stdout: &str) -> Result<Option<MediaInfo>, MediaError> {
    if stdout.trim().is_empty() {
        return Ok(None);
    }
    let doc: ProbeDocument =
        serde_json::from_str(stdout).map_err(|e| MediaError::Probe(format!("invalid probe output: {e}")))?;

    let Some(stream) = doc.streams.into_iter().next() else {
        return Ok(None);
    };

    let duration_secs = match stream.duration {
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    };

    Ok(Some(MediaInfo {
        width: stream.width.unwrap_or(0),
        height: stream.height.unwrap_or(0),
        duration_secs,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::process::ProcessOutput;
    use async_trait::async_trait;

    struct CannedRunner(ProcessOutput);

    #[async_trait]
    impl ProcessRunner for CannedRunner {
        async fn run(&self, _program: &str, _args: &[String], _limit: Duration) -> ProcessOutput {
            self.0.clone()
        }
    }

    #[test]
    fn test_parse_video_stream() {
        let json = r#"{"programs":[],"streams":[{"width":1280,"height":720,"duration":"12.500000"}]}"#;
        let info = parse_probe_output(json).unwrap().unwrap();
        assert_eq!(info.width, 1280);
        assert_eq!(info.height, 720);
        assert_eq!(info.duration_secs, 12.5);
    }

    #[test]
    fn test_parse_no_streams_is_not_applicable() {
        assert_eq!(parse_probe_output(r#"{"streams":[]}"#).unwrap(), None);
        assert_eq!(parse_probe_output("{}").unwrap(), None);
        assert_eq!(parse_probe_output("").unwrap(), None);
    }

    #[test]
    fn test_parse_missing_duration() {
        let info = parse_probe_output(r#"{"streams":[{"width":640,"height":480}]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(info.duration_secs, 0.0);
    }

    #[test]
    fn test_parse_garbage_is_error() {
        assert!(matches!(parse_probe_output("not json"), Err(MediaError::Probe(_))));
    }

    #[tokio::test]
    async fn test_inspect_reports_tool_failure() {
        let inspector = MediaInspector::new(
            Arc::new(CannedRunner(ProcessOutput {
                status_code: Some(1),
                stderr: "No such file".to_string(),
                ..Default::default()
            })),
            "ffprobe",
            Duration::from_secs(5),
        );
        let err = inspector.inspect(Path::new("/missing.mp4")).await.unwrap_err();
        assert!(err.to_string().contains("No such file"));
    }

    #[tokio::test]
    async fn test_inspect_parses_stdout() {
        let inspector = MediaInspector::new(
            Arc::new(CannedRunner(ProcessOutput {
                status_code: Some(0),
                stdout: r#"{"streams":[{"width":320,"height":240,"duration":"3.0"}]}"#.to_string(),
                ..Default::default()
            })),
            "ffprobe",
            Duration::from_secs(5),
        );
        let info = inspector.inspect(Path::new("clip.mp4")).await.unwrap().unwrap();
        assert_eq!((info.width, info.height), (320, 240));
    }
}
