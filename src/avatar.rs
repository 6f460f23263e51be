use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use indicatif::ProgressBar;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::config::HeyGenSettings;
use crate::error::ApiError;
use crate::http;

const SERVICE: &str = "heygen";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Dimension {
    pub width: u32,
    pub height: u32,
}

impl Default for Dimension {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Where a render job stands, as reported by the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoStatus {
    Completed { video_url: String },
    Failed { error: String },
    Pending { status: String },
}

/// HeyGen avatar-video client: upload audio, start a render, poll it,
/// download the result.
pub struct AvatarStudio {
    client: Client,
    api_key: String,
    api_base: String,
    upload_url: String,
    dimension: Dimension,
    test_mode: bool,
    poll_interval: Duration,
    max_attempts: u32,
}

impl AvatarStudio {
    pub fn new(client: Client, api_key: String, settings: &HeyGenSettings) -> Self {
        Self {
            client,
            api_key,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            upload_url: settings.upload_url.clone(),
            dimension: Dimension {
                width: settings.width,
                height: settings.height,
            },
            test_mode: settings.test_mode,
            poll_interval: Duration::from_secs(settings.poll_interval_secs),
            max_attempts: settings.max_attempts,
        }
    }

    /// Upload an MP3 as a HeyGen asset and return its hosted URL.
    pub async fn upload_audio(&self, audio_path: &Path) -> Result<String, ApiError> {
        let bytes = tokio::fs::read(audio_path)
            .await
            .map_err(|e| ApiError::io(format!("reading audio {}", audio_path.display()), e))?;
        info!("Uploading {} ({} bytes)", audio_path.display(), bytes.len());

        let resp = http::send_checked(
            SERVICE,
            self.client
                .post(&self.upload_url)
                .header("X-Api-Key", self.api_key.trim())
                .header(CONTENT_TYPE, "audio/mpeg")
                .body(bytes),
        )
        .await?;

        let asset: UploadedAsset = read_data(resp).await?;
        Ok(asset.url)
    }

    /// Upload the audio and start a render of `avatar_id` speaking it.
    /// Returns the job id.
    pub async fn generate_video(
        &self,
        avatar_id: &str,
        audio_path: &Path,
        dimension: Option<Dimension>,
    ) -> Result<String, ApiError> {
        let audio_url = self.upload_audio(audio_path).await?;
        info!("Audio uploaded: {}", audio_url);

        let payload = video_payload(
            avatar_id,
            &audio_url,
            dimension.unwrap_or(self.dimension),
            self.test_mode,
        );
        let resp = http::send_checked(
            SERVICE,
            self.client
                .post(format!("{}/v2/video/generate", self.api_base))
                .header("X-Api-Key", self.api_key.trim())
                .json(&payload),
        )
        .await?;

        let job: VideoJob = read_data(resp).await?;
        info!("Video generation started: {}", job.video_id);
        Ok(job.video_id)
    }

    /// Check the job every `poll_interval` until it completes, fails, or
    /// `max_attempts` checks have been made.
    pub async fn poll_video_status(&self, video_id: &str) -> Result<String, ApiError> {
        let url = format!("{}/v1/video_status.get", self.api_base);
        let url = url.as_str();
        poll_until_ready(self.poll_interval, self.max_attempts, move || async move {
            let resp = http::send_checked(
                SERVICE,
                self.client
                    .get(url)
                    .query(&[("video_id", video_id)])
                    .header("X-Api-Key", self.api_key.trim()),
            )
            .await?;
            let body = resp
                .text()
                .await
                .map_err(|e| ApiError::from_reqwest(SERVICE, e))?;
            parse_status(&body)
        })
        .await
    }

    /// Stream the finished video to `<output_dir>/podcast_<unix seconds>.mp4`.
    pub async fn download_video(&self, video_url: &str, output_dir: &Path) -> Result<PathBuf, ApiError> {
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| ApiError::io(format!("creating {}", output_dir.display()), e))?;
        let path = output_dir.join(video_file_name(chrono::Utc::now().timestamp()));
        info!("Downloading video to {}", path.display());

        let mut resp = http::send_checked(SERVICE, self.client.get(video_url)).await?;
        let written = save_stream(&mut resp, &path).await?;

        info!("Download complete: {} ({} bytes)", path.display(), written);
        Ok(path)
    }

    /// Full round trip: upload, render, wait, download.
    pub async fn render(&self, avatar_id: &str, audio_path: &Path, output_dir: &Path) -> Result<PathBuf, ApiError> {
        let video_id = self.generate_video(avatar_id, audio_path, None).await?;
        let video_url = self.poll_video_status(&video_id).await?;
        info!("Video ready: {}", video_url);
        self.download_video(&video_url, output_dir).await
    }
}

/// A body that arrives in pieces.
#[async_trait]
trait ChunkSource: Send {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, ApiError>;
}

#[async_trait]
impl ChunkSource for reqwest::Response {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, ApiError> {
        self.chunk()
            .await
            .map(|c| c.map(|bytes| bytes.to_vec()))
            .map_err(|e| ApiError::from_reqwest(SERVICE, e))
    }
}

/// Write the body to `<path>.part` and rename it into place once complete.
/// On any error the partial file is removed and `path` is never created.
async fn save_stream(source: &mut dyn ChunkSource, path: &Path) -> Result<usize, ApiError> {
    let partial = path.with_extension("mp4.part");
    match write_chunks(source, &partial).await {
        Ok(written) => {
            tokio::fs::rename(&partial, path)
                .await
                .map_err(|e| ApiError::io(format!("renaming to {}", path.display()), e))?;
            Ok(written)
        }
        Err(e) => {
            if let Err(rm) = tokio::fs::remove_file(&partial).await {
                warn!("Could not remove {}: {}", partial.display(), rm);
            }
            Err(e)
        }
    }
}

async fn write_chunks(source: &mut dyn ChunkSource, path: &Path) -> Result<usize, ApiError> {
    let io_err = |e| ApiError::io(format!("writing {}", path.display()), e);
    let mut file = tokio::fs::File::create(path).await.map_err(io_err)?;
    let mut written = 0usize;
    while let Some(chunk) = source.next_chunk().await? {
        file.write_all(&chunk).await.map_err(io_err)?;
        written += chunk.len();
    }
    file.flush().await.map_err(io_err)?;
    Ok(written)
}

/// Fixed-interval polling. A failed job ends the loop at once; any other
/// error is logged and the check repeated.
async fn poll_until_ready<F, Fut>(interval: Duration, max_attempts: u32, mut check: F) -> Result<String, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<VideoStatus, ApiError>>,
{
    let spinner = ProgressBar::new_spinner();
    spinner.enable_steady_tick(Duration::from_millis(200));

    for attempt in 1..=max_attempts {
        match check().await {
            Ok(VideoStatus::Completed { video_url }) => {
                spinner.finish_and_clear();
                return Ok(video_url);
            }
            Ok(VideoStatus::Failed { error }) => {
                spinner.finish_and_clear();
                return Err(ApiError::VideoFailed(error));
            }
            Ok(VideoStatus::Pending { status }) => {
                spinner.set_message(format!("{} (attempt {}/{})", status, attempt, max_attempts));
            }
            Err(e) => warn!("Status check {}/{} failed, retrying: {}", attempt, max_attempts, e),
        }
        if attempt < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }

    spinner.finish_and_clear();
    Err(ApiError::Timeout { service: SERVICE })
}

#[derive(Debug, Serialize)]
struct VideoRequest<'a> {
    video_inputs: Vec<VideoInput<'a>>,
    dimension: Dimension,
    test: bool,
}

#[derive(Debug, Serialize)]
struct VideoInput<'a> {
    character: Character<'a>,
    voice: Voice<'a>,
}

#[derive(Debug, Serialize)]
struct Character<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    avatar_id: &'a str,
    avatar_style: &'static str,
}

#[derive(Debug, Serialize)]
struct Voice<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    audio_url: &'a str,
}

fn video_payload<'a>(avatar_id: &'a str, audio_url: &'a str, dimension: Dimension, test: bool) -> VideoRequest<'a> {
    VideoRequest {
        video_inputs: vec![VideoInput {
            character: Character {
                kind: "avatar",
                avatar_id,
                avatar_style: "normal",
            },
            voice: Voice {
                kind: "audio",
                audio_url,
            },
        }],
        dimension,
        test,
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadedAsset {
    url: String,
}

#[derive(Debug, Deserialize)]
struct VideoJob {
    video_id: String,
}

#[derive(Debug, Deserialize)]
struct StatusData {
    status: String,
    #[serde(default)]
    video_url: Option<String>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

async fn read_data<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ApiError> {
    let envelope: Envelope<T> = http::read_json(SERVICE, resp).await?;
    unwrap_envelope(envelope)
}

fn unwrap_envelope<T>(envelope: Envelope<T>) -> Result<T, ApiError> {
    envelope.data.ok_or_else(|| {
        let detail = envelope.message.unwrap_or_else(|| "response has no data".to_string());
        ApiError::malformed(SERVICE, detail)
    })
}

/// Decode a `video_status.get` body.
fn parse_status(body: &str) -> Result<VideoStatus, ApiError> {
    let envelope: Envelope<StatusData> =
        serde_json::from_str(body).map_err(|e| ApiError::malformed(SERVICE, e.to_string()))?;
    let data = unwrap_envelope(envelope)?;

    match data.status.as_str() {
        "completed" => data
            .video_url
            .filter(|u| !u.is_empty())
            .map(|video_url| VideoStatus::Completed { video_url })
            .ok_or_else(|| ApiError::malformed(SERVICE, "completed without video_url")),
        "failed" | "error" => Ok(VideoStatus::Failed {
            error: describe_error(data.error.as_ref()),
        }),
        _ => Ok(VideoStatus::Pending { status: data.status }),
    }
}

fn describe_error(error: Option<&serde_json::Value>) -> String {
    match error {
        Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
        Some(serde_json::Value::Object(map)) => ["message", "detail", "code"]
            .iter()
            .find_map(|k| map.get(*k).filter(|v| !v.is_null()))
            .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
            .unwrap_or_else(|| serde_json::Value::Object(map.clone()).to_string()),
        _ => "Unknown error".to_string(),
    }
}

fn video_file_name(unix_secs: i64) -> String {
    format!("podcast_{}.mp4", unix_secs)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn payload_matches_generate_endpoint() {
        let payload = video_payload("avatar-1", "https://cdn/a.mp3", Dimension::default(), true);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "video_inputs": [{
                    "character": {"type": "avatar", "avatar_id": "avatar-1", "avatar_style": "normal"},
                    "voice": {"type": "audio", "audio_url": "https://cdn/a.mp3"}
                }],
                "dimension": {"width": 1280, "height": 720},
                "test": true
            })
        );
    }

    #[test]
    fn status_completed_carries_url() {
        let body = r#"{"code":100,"data":{"status":"completed","video_url":"https://v/x.mp4"},"message":"Success"}"#;
        assert_eq!(
            parse_status(body).unwrap(),
            VideoStatus::Completed {
                video_url: "https://v/x.mp4".into()
            }
        );
    }

    #[test]
    fn status_failed_reports_error_detail() {
        let body = r#"{"data":{"status":"failed","error":{"code":40001,"message":"avatar not found"}}}"#;
        assert_eq!(
            parse_status(body).unwrap(),
            VideoStatus::Failed {
                error: "avatar not found".into()
            }
        );

        let body = r#"{"data":{"status":"error","error":"bad audio"}}"#;
        assert_eq!(
            parse_status(body).unwrap(),
            VideoStatus::Failed {
                error: "bad audio".into()
            }
        );

        let body = r#"{"data":{"status":"failed"}}"#;
        assert_eq!(
            parse_status(body).unwrap(),
            VideoStatus::Failed {
                error: "Unknown error".into()
            }
        );
    }

    #[test]
    fn other_statuses_are_pending() {
        for s in ["pending", "processing", "waiting"] {
            let body = format!(r#"{{"data":{{"status":"{}"}}}}"#, s);
            assert_eq!(parse_status(&body).unwrap(), VideoStatus::Pending { status: s.into() });
        }
    }

    #[test]
    fn malformed_status_bodies() {
        for body in ["not json", r#"{"data":null,"message":"bad id"}"#, r#"{"data":{"status":"completed"}}"#] {
            assert!(matches!(parse_status(body), Err(ApiError::MalformedResponse { .. })), "{body}");
        }
    }

    #[test]
    fn envelope_message_becomes_detail() {
        let env: Envelope<VideoJob> = serde_json::from_str(r#"{"data":null,"message":"quota exceeded"}"#).unwrap();
        let err = unwrap_envelope(env).unwrap_err();
        assert_eq!(err.to_string(), "malformed response from heygen: quota exceeded");
    }

    #[tokio::test]
    async fn poll_returns_url_once_completed() {
        let calls = &AtomicU32::new(0);
        let got = poll_until_ready(Duration::ZERO, 10, move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Ok(if n < 2 {
                VideoStatus::Pending {
                    status: "processing".into(),
                }
            } else {
                VideoStatus::Completed {
                    video_url: "https://v/x.mp4".into(),
                }
            })
        })
        .await
        .unwrap();
        assert_eq!(got, "https://v/x.mp4");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failed_job_is_not_retried() {
        let calls = &AtomicU32::new(0);
        let err = poll_until_ready(Duration::ZERO, 10, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(VideoStatus::Failed {
                error: "avatar not found".into(),
            })
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::VideoFailed(ref m) if m == "avatar not found"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let calls = &AtomicU32::new(0);
        let got = poll_until_ready(Duration::ZERO, 5, move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ApiError::malformed(SERVICE, "gateway hiccup"))
            } else {
                Ok(VideoStatus::Completed {
                    video_url: "u".into(),
                })
            }
        })
        .await
        .unwrap();
        assert_eq!(got, "u");
    }

    #[tokio::test]
    async fn exhausted_attempts_time_out() {
        let calls = &AtomicU32::new(0);
        let err = poll_until_ready(Duration::ZERO, 4, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(VideoStatus::Pending {
                status: "processing".into(),
            })
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Timeout { service: "heygen" }));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn missing_audio_file_fails_before_upload() {
        let tmp = tempfile::tempdir().unwrap();
        let studio = AvatarStudio::new(Client::new(), "key".into(), &HeyGenSettings::default());
        let err = studio
            .upload_audio(&tmp.path().join("missing.mp3"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Io { .. }));
    }

    #[test]
    fn settings_drive_client() {
        let settings = HeyGenSettings {
            width: 720,
            height: 1280,
            poll_interval_secs: 2,
            ..HeyGenSettings::default()
        };
        let studio = AvatarStudio::new(Client::new(), "key".into(), &settings);
        assert_eq!(studio.dimension, Dimension { width: 720, height: 1280 });
        assert_eq!(studio.poll_interval, Duration::from_secs(2));
        assert_eq!(studio.max_attempts, 60);
        assert!(studio.test_mode);
    }

    /// Replays scripted chunks, then ends the body.
    struct ScriptedBody(std::collections::VecDeque<Result<Vec<u8>, ApiError>>);

    #[async_trait]
    impl ChunkSource for ScriptedBody {
        async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, ApiError> {
            self.0.pop_front().transpose()
        }
    }

    #[tokio::test]
    async fn complete_body_is_renamed_into_place() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("podcast_1.mp4");
        let mut body = ScriptedBody(vec![Ok(b"abc".to_vec()), Ok(b"def".to_vec())].into());
        let written = save_stream(&mut body, &path).await.unwrap();
        assert_eq!(written, 6);
        assert_eq!(std::fs::read(&path).unwrap(), b"abcdef");
        assert!(!tmp.path().join("podcast_1.mp4.part").exists());
    }

    #[tokio::test]
    async fn broken_body_leaves_no_file_behind() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("podcast_2.mp4");
        let mut body = ScriptedBody(
            vec![
                Ok(b"abc".to_vec()),
                Err(ApiError::Timeout { service: SERVICE }),
                Ok(b"never".to_vec()),
            ]
            .into(),
        );
        let err = save_stream(&mut body, &path).await.unwrap_err();
        assert!(matches!(err, ApiError::Timeout { .. }));
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn video_names_use_unix_seconds() {
        assert_eq!(video_file_name(1_700_000_000), "podcast_1700000000.mp4");
    }
}
