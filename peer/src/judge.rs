//! Client for the external semantic-similarity service.
//!
//! The service is treated as unreliable: timeouts, non-2xx responses and
//! malformed bodies all degrade to the local heuristic without surfacing an
//! error to the caller. `evaluate` therefore never fails.

use log::{debug, warn};
use protocol::scoring::{self, Verdict};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateRequest<'a> {
    actual_word: &'a str,
    guess: &'a str,
}

#[derive(Debug, Deserialize)]
struct EvaluateResponse {
    similarity: f64,
    /// Older service revisions return points alongside the similarity.
    points: Option<u32>,
    error: Option<String>,
}

/// Scores guesses, preferring the external service when configured.
pub struct Judge {
    client: reqwest::Client,
    url: Option<String>,
}

impl Judge {
    /// `url` is the service's `/evaluate-guess` endpoint; `None` means
    /// local-only scoring.
    pub fn new(url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client, url }
    }

    /// Scores `guess` against `word`. Always returns a verdict: the local
    /// heuristic covers every service failure mode.
    pub async fn evaluate(&self, word: &str, guess: &str) -> Verdict {
        if let Some(url) = &self.url {
            match self.evaluate_remote(url, word, guess).await {
                Ok(verdict) => {
                    debug!(
                        "service scored {:?} vs {:?}: similarity {:.4}",
                        guess, word, verdict.similarity
                    );
                    return verdict;
                }
                Err(e) => {
                    warn!("similarity service unavailable, using local heuristic: {}", e);
                }
            }
        }
        scoring::evaluate_locally(word, guess)
    }

    async fn evaluate_remote(
        &self,
        url: &str,
        word: &str,
        guess: &str,
    ) -> Result<Verdict, Box<dyn std::error::Error + Send + Sync>> {
        let response = self
            .client
            .post(url)
            .json(&EvaluateRequest {
                actual_word: word,
                guess,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(format!("service returned {}", response.status()).into());
        }

        let body: EvaluateResponse = response.json().await?;
        if let Some(error) = body.error {
            return Err(error.into());
        }

        let similarity = body.similarity.clamp(0.0, 1.0);
        let points = body
            .points
            .unwrap_or_else(|| scoring::calculate_points(similarity))
            .min(3);
        Ok(Verdict { similarity, points })
    }
}
