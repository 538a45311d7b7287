//! Translation Gateway
//!
//! Finalized transcript segments are translated through a [`Translator`]
//! provider. Callers never see provider failures: [`TranslationGateway`]
//! bounds every call with a timeout and substitutes
//! [`TRANSLATION_UNAVAILABLE`] for errors, timeouts and empty results.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};

/// Published in place of a translation that could not be obtained.
pub const TRANSLATION_UNAVAILABLE: &str = "[Translation unavailable]";

/// A text-in/text-out translation provider.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translates `text` from `source_lang` to `target_lang` (ISO 639-1 codes).
    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String>;
}

/// Google Cloud Translation (v2 REST API) authenticated with an API key.
pub struct GoogleTranslator {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[derive(Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'static str,
}

#[derive(Deserialize)]
struct TranslateResponse {
    data: TranslateData,
}

#[derive(Deserialize)]
struct TranslateData {
    translations: Vec<Translation>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Translation {
    translated_text: String,
}

impl GoogleTranslator {
    pub const DEFAULT_BASE_URL: &'static str = "https://translation.googleapis.com";

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: Self::DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Points the client at another host, e.g. a regional endpoint or a test server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl Translator for GoogleTranslator {
    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String> {
        let url = format!("{}/language/translate/v2", self.base_url);
        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&TranslateRequest {
                q: text,
                source: source_lang,
                target: target_lang,
                format: "text",
            })
            .send()
            .await
            .context("Translation request failed")?
            .error_for_status()
            .context("Translation provider returned an error status")?;

        let body: TranslateResponse = response
            .json()
            .await
            .context("Failed to decode translation response")?;

        body.data
            .translations
            .into_iter()
            .next()
            .map(|t| t.translated_text)
            .context("Translation response contained no translations")
    }
}

/// Stands in when no provider credentials are configured.
pub struct UnconfiguredTranslator;

#[async_trait]
impl Translator for UnconfiguredTranslator {
    async fn translate(&self, _text: &str, _source_lang: &str, _target_lang: &str) -> Result<String> {
        Err(anyhow!("no translation provider is configured"))
    }
}

/// Fixed-language-pair front door to a [`Translator`] that never fails.
#[derive(Clone)]
pub struct TranslationGateway {
    translator: Arc<dyn Translator>,
    source_lang: String,
    target_lang: String,
    timeout: Duration,
}

impl TranslationGateway {
    pub fn new(
        translator: Arc<dyn Translator>,
        source_lang: impl Into<String>,
        target_lang: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            translator,
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
            timeout,
        }
    }

    pub fn source_lang(&self) -> &str {
        &self.source_lang
    }

    pub fn target_lang(&self) -> &str {
        &self.target_lang
    }

    /// Best-effort translation; returns [`TRANSLATION_UNAVAILABLE`] on any failure.
    pub async fn translate(&self, text: &str) -> String {
        let call = self
            .translator
            .translate(text, &self.source_lang, &self.target_lang);
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(translated)) if !translated.trim().is_empty() => {
                debug!(chars = text.chars().count(), "Translated segment");
                translated
            }
            Ok(Ok(_)) => {
                warn!("Translation provider returned empty text");
                TRANSLATION_UNAVAILABLE.to_string()
            }
            Ok(Err(e)) => {
                warn!(error = ?e, "Translation failed");
                TRANSLATION_UNAVAILABLE.to_string()
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "Translation timed out");
                TRANSLATION_UNAVAILABLE.to_string()
            }
        }
    }
}
