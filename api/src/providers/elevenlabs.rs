//! ElevenLabs text-to-speech as speech synthesizer. Audio is written to the
//! audio directory under a content-addressed name and served from `/audio`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use callflow_core::collaborators::{AudioRef, SpeechSynthesizer};
use callflow_core::error::CollaboratorError;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;

use super::{ensure_success, transport};

const TTS_URL: &str = "https://api.elevenlabs.io/v1/text-to-speech";
const MODEL_ID: &str = "eleven_monolingual_v1";
const FILE_PREFIX: &str = "speech_";

pub struct ElevenLabs {
    api_key: String,
    voice_id: String,
    audio_dir: PathBuf,
    base_url: String,
    http: reqwest::Client,
}

impl ElevenLabs {
    pub fn new(
        api_key: String,
        voice_id: String,
        audio_dir: PathBuf,
        base_url: String,
        http: reqwest::Client,
    ) -> Self {
        Self {
            api_key,
            voice_id,
            audio_dir,
            base_url,
            http,
        }
    }

    async fn fetch_audio(&self, text: &str) -> Result<Vec<u8>, CollaboratorError> {
        let body = serde_json::json!({
            "text": text,
            "model_id": MODEL_ID,
            "voice_settings": { "stability": 0.5, "similarity_boost": 0.5 },
        });
        let response = self
            .http
            .post(format!("{TTS_URL}/{}", self.voice_id))
            .header("xi-api-key", &self.api_key)
            .header(reqwest::header::ACCEPT, "audio/mpeg")
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        let bytes = ensure_success(response)
            .await?
            .bytes()
            .await
            .map_err(transport)?;
        if bytes.is_empty() {
            return Err(CollaboratorError::Malformed("empty audio body".to_string()));
        }
        Ok(bytes.to_vec())
    }
}

/// Identical (voice, text) pairs map to the same file.
pub fn audio_file_name(voice_id: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(voice_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{FILE_PREFIX}{}.mp3", &digest[..16])
}

fn io_error(err: std::io::Error) -> CollaboratorError {
    CollaboratorError::Transport(format!("audio storage: {err}"))
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabs {
    async fn synthesize(&self, text: &str) -> Result<AudioRef, CollaboratorError> {
        let file_name = audio_file_name(&self.voice_id, text);
        let url = format!("{}/audio/{file_name}", self.base_url);
        let path = self.audio_dir.join(&file_name);

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::debug!(file = %file_name, "Reusing synthesized audio");
            return Ok(AudioRef { url });
        }

        let audio = self.fetch_audio(text).await?;
        tokio::fs::create_dir_all(&self.audio_dir)
            .await
            .map_err(io_error)?;
        // Write then rename, so a concurrent reader never serves half a file.
        let partial = self
            .audio_dir
            .join(format!("{file_name}.{}.part", uuid::Uuid::now_v7()));
        tokio::fs::write(&partial, &audio).await.map_err(io_error)?;
        tokio::fs::rename(&partial, &path).await.map_err(io_error)?;

        tracing::info!(file = %file_name, bytes = audio.len(), "Synthesized speech");
        Ok(AudioRef { url })
    }
}

/// Deletes synthesized audio older than `max_age`. Returns how many files went.
pub async fn remove_stale_audio(dir: &Path, max_age: Duration) -> std::io::Result<usize> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err),
    };

    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(FILE_PREFIX) {
            continue;
        }
        let modified = entry.metadata().await?.modified()?;
        let age = modified.elapsed().unwrap_or_default();
        if age > max_age {
            tokio::fs::remove_file(entry.path()).await?;
            removed += 1;
        }
    }
    Ok(removed)
}

pub fn spawn_audio_cleanup(dir: PathBuf, max_age: Duration, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            match remove_stale_audio(&dir, max_age).await {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "Removed stale audio files"),
                Err(err) => tracing::warn!(error = %err, dir = %dir.display(), "Audio cleanup failed"),
            }
        }
    })
}
