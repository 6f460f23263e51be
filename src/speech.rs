use std::path::{Path, PathBuf};

use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::Serialize;
use tracing::info;

use crate::config::ElevenLabsSettings;
use crate::error::ApiError;
use crate::http;

const SERVICE: &str = "elevenlabs";
const AUDIO_FILE: &str = "podcast_audio.mp3";

/// ElevenLabs text-to-speech client bound to one voice.
pub struct Synthesizer {
    client: Client,
    api_key: String,
    voice_id: String,
    model_id: String,
    base_url: String,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
}

impl Synthesizer {
    pub fn new(client: Client, api_key: String, voice_id: String, settings: &ElevenLabsSettings) -> Self {
        Self {
            client,
            api_key,
            voice_id,
            model_id: settings.model_id.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Speak `text` and save the MP3 as `<output_dir>/podcast_audio.mp3`.
    pub async fn synthesize(&self, text: &str, output_dir: &Path) -> Result<PathBuf, ApiError> {
        let endpoint = format!("{}/v1/text-to-speech/{}", self.base_url, self.voice_id);
        info!("Synthesizing {} chars with voice {}", text.chars().count(), self.voice_id);

        let resp = http::send_checked(
            SERVICE,
            self.client
                .post(&endpoint)
                .header("xi-api-key", self.api_key.trim())
                .header(ACCEPT, "audio/mpeg")
                .json(&SpeechRequest {
                    text,
                    model_id: &self.model_id,
                }),
        )
        .await?;

        let audio = resp
            .bytes()
            .await
            .map_err(|e| ApiError::from_reqwest(SERVICE, e))?;
        if audio.is_empty() {
            return Err(ApiError::malformed(SERVICE, "empty audio body"));
        }

        let path = write_audio(output_dir, &audio).await?;
        info!("Audio saved to {} ({} bytes)", path.display(), audio.len());
        Ok(path)
    }
}

/// Write the narration text next to the audio, as `podcast_script.txt`.
pub async fn save_script(output_dir: &Path, script: &str) -> Result<PathBuf, ApiError> {
    save_file(output_dir, "podcast_script.txt", script.as_bytes()).await
}

async fn write_audio(output_dir: &Path, audio: &[u8]) -> Result<PathBuf, ApiError> {
    save_file(output_dir, AUDIO_FILE, audio).await
}

async fn save_file(dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf, ApiError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| ApiError::io(format!("creating {}", dir.display()), e))?;
    let path = dir.join(name);
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| ApiError::io(format!("writing {}", path.display()), e))?;
    Ok(path)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn audio_lands_in_created_output_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("nested").join("output");
        let path = write_audio(&out, b"ID3fake").await.unwrap();
        assert_eq!(path, out.join("podcast_audio.mp3"));
        assert_eq!(std::fs::read(&path).unwrap(), b"ID3fake");
    }

    #[tokio::test]
    async fn audio_is_overwritten_on_rerun() {
        let tmp = tempfile::tempdir().unwrap();
        write_audio(tmp.path(), b"first").await.unwrap();
        let path = write_audio(tmp.path(), b"second").await.unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"second");
    }

    #[tokio::test]
    async fn script_text_is_saved() {
        let tmp = tempfile::tempdir().unwrap();
        let path = save_script(tmp.path(), "Imagine a headset.").await.unwrap();
        assert!(path.ends_with("podcast_script.txt"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "Imagine a headset.");
    }

    #[tokio::test]
    async fn unwritable_dir_is_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("not_a_dir");
        std::fs::write(&file, "x").unwrap();
        let err = write_audio(&file, b"x").await.unwrap_err();
        assert!(matches!(err, ApiError::Io { .. }));
    }

    #[test]
    fn request_body_has_text_and_model() {
        let body = serde_json::to_value(SpeechRequest {
            text: "hello",
            model_id: "eleven_monolingual_v1",
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"text": "hello", "model_id": "eleven_monolingual_v1"}));
    }

    #[test]
    fn endpoint_base_is_trimmed() {
        let settings = ElevenLabsSettings {
            base_url: "https://api.elevenlabs.io/".into(),
            ..ElevenLabsSettings::default()
        };
        let s = Synthesizer::new(Client::new(), "k".into(), "voice".into(), &settings);
        assert_eq!(s.base_url, "https://api.elevenlabs.io");
        assert_eq!(s.voice_id, "voice");
    }
}
