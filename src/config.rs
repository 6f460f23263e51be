use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use ::config::{Config, Environment, File};
use serde::Deserialize;

use crate::parser::sections::BoundaryPolicy;

const ENV_PREFIX: &str = "PAPER_REELS";
const CONFIG_FILE: &str = "paper_reels";

/// Everything the commands need, loaded once in `main` and handed to each
/// client's constructor.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub openai: OpenAiSettings,
    pub elevenlabs: ElevenLabsSettings,
    pub heygen: HeyGenSettings,
    pub pipeline: PipelineSettings,
    pub http: HttpSettings,
    pub output_dir: PathBuf,
    pub pdf_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OpenAiSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    /// Model used to sharpen search queries.
    pub refine_model: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ElevenLabsSettings {
    pub api_key: Option<String>,
    pub voice_id: Option<String>,
    pub model_id: String,
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeyGenSettings {
    pub api_key: Option<String>,
    pub avatar_id: Option<String>,
    pub api_base: String,
    pub upload_url: String,
    pub width: u32,
    pub height: u32,
    /// Render watermarked test videos (no credits consumed).
    pub test_mode: bool,
    pub poll_interval_secs: u64,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Distinct headings to see before the front matter is considered done.
    pub section_limit: usize,
    pub boundary_policy: BoundaryPolicy,
    pub script_temperature: f32,
    pub script_max_tokens: u32,
    pub max_chunk_chars: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            openai: OpenAiSettings::default(),
            elevenlabs: ElevenLabsSettings::default(),
            heygen: HeyGenSettings::default(),
            pipeline: PipelineSettings::default(),
            http: HttpSettings::default(),
            output_dir: PathBuf::from("./output"),
            pdf_dir: PathBuf::from("./output/pdf"),
        }
    }
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            refine_model: "gpt-4".to_string(),
        }
    }
}

impl Default for ElevenLabsSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            voice_id: None,
            model_id: "eleven_monolingual_v1".to_string(),
            base_url: "https://api.elevenlabs.io".to_string(),
        }
    }
}

impl Default for HeyGenSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            avatar_id: None,
            api_base: "https://api.heygen.com".to_string(),
            upload_url: "https://upload.heygen.com/v1/asset".to_string(),
            width: 1280,
            height: 720,
            test_mode: true,
            poll_interval_secs: 5,
            max_attempts: 60,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            section_limit: 4,
            boundary_policy: BoundaryPolicy::default(),
            script_temperature: 0.3,
            script_max_tokens: 450,
            max_chunk_chars: 2000,
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self { timeout_secs: 120 }
    }
}

impl Settings {
    /// Load from `paper_reels.toml` (optional) and `PAPER_REELS__*` variables,
    /// then fill credentials from the conventional provider variables.
    pub fn load() -> Result<Self> {
        let settings: Settings = Config::builder()
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")?;

        let settings = settings.with_fallbacks(|key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    fn with_fallbacks(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        fill(&mut self.openai.api_key, lookup("OPENAI_API_KEY"));
        fill(&mut self.elevenlabs.api_key, lookup("ELEVENLABS_API_KEY"));
        fill(&mut self.elevenlabs.voice_id, lookup("VOICE_ID"));
        fill(&mut self.heygen.api_key, lookup("HEYGEN_API_KEY"));
        fill(&mut self.heygen.avatar_id, lookup("TALKING_PHOTO_ID"));
        if let Some(dir) = lookup("OUTPUT_DIR").filter(|d| !d.trim().is_empty()) {
            if self.output_dir == Settings::default().output_dir {
                self.output_dir = PathBuf::from(dir);
            }
        }
        self
    }

    fn validate(&self) -> Result<()> {
        if self.pipeline.section_limit == 0 {
            bail!("pipeline.section_limit must be at least 1");
        }
        if self.heygen.max_attempts == 0 {
            bail!("heygen.max_attempts must be at least 1");
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }

    pub fn require_openai_key(&self) -> Result<String> {
        require(&self.openai.api_key, "OPENAI_API_KEY")
    }

    pub fn require_elevenlabs(&self) -> Result<(String, String)> {
        Ok((
            require(&self.elevenlabs.api_key, "ELEVENLABS_API_KEY")?,
            require(&self.elevenlabs.voice_id, "VOICE_ID")?,
        ))
    }

    pub fn require_heygen(&self) -> Result<(String, String)> {
        Ok((
            require(&self.heygen.api_key, "HEYGEN_API_KEY")?,
            require(&self.heygen.avatar_id, "TALKING_PHOTO_ID")?,
        ))
    }
}

fn fill(slot: &mut Option<String>, fallback: Option<String>) {
    if slot.as_deref().map_or(true, |s| s.trim().is_empty()) {
        *slot = fallback.filter(|v| !v.trim().is_empty());
    }
}

fn require(value: &Option<String>, env_name: &str) -> Result<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => bail!("{} is not set (environment variable or {} config)", env_name, CONFIG_FILE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let owned: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| owned.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
    }

    #[test]
    fn defaults_match_pipeline_constants() {
        let s = Settings::default();
        assert_eq!(s.pipeline.section_limit, 4);
        assert_eq!(s.pipeline.boundary_policy, BoundaryPolicy::AfterDistinctLimit);
        assert_eq!(s.pipeline.script_max_tokens, 450);
        assert_eq!(s.openai.model, "gpt-4o-mini");
        assert_eq!(s.heygen.poll_interval_secs, 5);
        assert_eq!(s.heygen.max_attempts, 60);
        assert_eq!((s.heygen.width, s.heygen.height), (1280, 720));
    }

    #[test]
    fn provider_variables_fill_missing_credentials() {
        let s = Settings::default().with_fallbacks(env(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("VOICE_ID", "voice-1"),
            ("OUTPUT_DIR", "/tmp/reels"),
        ]));
        assert_eq!(s.require_openai_key().unwrap(), "sk-test");
        assert_eq!(s.elevenlabs.voice_id.as_deref(), Some("voice-1"));
        assert_eq!(s.output_dir, PathBuf::from("/tmp/reels"));
        assert!(s.require_heygen().is_err());
    }

    #[test]
    fn configured_credentials_win_over_fallbacks() {
        let mut s = Settings::default();
        s.openai.api_key = Some("from-config".into());
        let s = s.with_fallbacks(env(&[("OPENAI_API_KEY", "from-env")]));
        assert_eq!(s.require_openai_key().unwrap(), "from-config");
    }

    #[test]
    fn blank_credentials_are_missing() {
        let mut s = Settings::default();
        s.openai.api_key = Some("   ".into());
        let err = s.require_openai_key().unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn zero_section_limit_is_rejected() {
        let mut s = Settings::default();
        s.pipeline.section_limit = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn nested_values_deserialize_from_config() {
        let s: Settings = Config::builder()
            .set_override("pipeline.section_limit", 3)
            .unwrap()
            .set_override("pipeline.boundary_policy", "at_nth_distinct")
            .unwrap()
            .set_override("heygen.test_mode", false)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(s.pipeline.section_limit, 3);
        assert_eq!(s.pipeline.boundary_policy, BoundaryPolicy::AtNthDistinct);
        assert!(!s.heygen.test_mode);
        assert_eq!(s.openai.model, "gpt-4o-mini");
    }
}
