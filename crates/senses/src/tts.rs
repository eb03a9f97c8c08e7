//! Streaming text-to-speech client.
//!
//! Synthesis is an HTTP call; playback goes through the [`AudioPlayer`]
//! boundary. After playback starts, [`StreamTts::speak`] holds the caller
//! for an estimated speech duration so successive utterances (and engine
//! retries) do not talk over each other.

use std::time::Duration;

use ha_domain::config::VoiceConfig;
use ha_domain::error::{Error, Result};

/// Plays raw synthesized audio. External blocking boundary.
pub trait AudioPlayer: Send + Sync {
    fn play(&self, audio: &[u8]) -> Result<()>;
}

/// Anything that can voice a line of text.
#[async_trait::async_trait]
pub trait Speaker: Send + Sync {
    async fn speak(&self, text: &str) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// StreamTts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// HTTP streaming-synthesis client.
pub struct StreamTts {
    base_url: String,
    api_key: String,
    voice_id: String,
    model_id: String,
    speed: f32,
    client: reqwest::Client,
    player: Box<dyn AudioPlayer>,
}

impl StreamTts {
    pub fn from_config(cfg: &VoiceConfig, player: Box<dyn AudioPlayer>) -> Result<Self> {
        let api_key = std::env::var(&cfg.api_key_env)
            .map_err(|_| Error::Auth(format!("env var '{}' not set", cfg.api_key_env)))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            voice_id: cfg.voice_id.clone(),
            model_id: cfg.model_id.clone(),
            speed: cfg.speed,
            client,
            player,
        })
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let url = format!(
            "{}/v1/text-to-speech/{}/stream",
            self.base_url, self.voice_id
        );
        let body = serde_json::json!({
            "text": text,
            "model_id": self.model_id,
            "voice_settings": {"speed": self.speed, "stability": 0.3},
        });

        let resp = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body_text = resp.text().await.unwrap_or_default();
            return Err(Error::Http(format!("TTS HTTP {status}: {body_text}")));
        }
        let audio = resp
            .bytes()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(audio.to_vec())
    }
}

/// Estimate how long a line takes to say: ~0.4 s per word, at least 2 s.
pub fn speech_pause(text: &str) -> Duration {
    let words = text.split_whitespace().count() as f32;
    Duration::from_secs_f32((words * 0.4).max(2.0))
}

#[async_trait::async_trait]
impl Speaker for StreamTts {
    async fn speak(&self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Ok(());
        }
        let audio = self.synthesize(text).await?;
        self.player.play(&audio)?;
        // Let the audio land before the caller proceeds.
        tokio::time::sleep(speech_pause(text)).await;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speech_pause_minimum_two_seconds() {
        assert_eq!(speech_pause("hi"), Duration::from_secs(2));
        assert_eq!(speech_pause(""), Duration::from_secs(2));
    }

    #[test]
    fn speech_pause_scales_with_word_count() {
        // 10 words × 0.4 s = 4 s.
        let text = "one two three four five six seven eight nine ten";
        assert_eq!(speech_pause(text), Duration::from_secs_f32(4.0));
    }
}
