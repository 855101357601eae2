use super::scanner::StreamScanner;
use super::types::{GenerationParams, GenerationResult, SeedSpec};
use crate::{Error, Result, config::UpstreamConfig};
use async_trait::async_trait;
use rand::{Rng, distributions::Alphanumeric};
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::Serialize;
use tracing::debug;

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Runs exactly one generation attempt and returns its result, or a
    /// typed failure if the upstream rejects the join, the stream, or closes
    /// without producing one.
    async fn generate(&self, params: &GenerationParams, seed: SeedSpec)
    -> Result<GenerationResult>;
}

/// Client for a Gradio space speaking the queue-join / event-stream protocol.
pub struct GradioClient {
    http: reqwest::Client,
    config: UpstreamConfig,
}

/// Body of the queue join call. `data` is the upstream pipeline's positional
/// argument list; the trailing `false` is a fixed pipeline flag.
#[derive(Debug, Serialize)]
struct JoinRequest<'a> {
    data: (&'a str, u32, u32, u32, i64, bool),
    fn_index: u32,
    trigger_id: u32,
    session_hash: &'a str,
}

impl GradioClient {
    pub fn new(config: UpstreamConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Opaque token correlating a join call with its event stream. Collision
    /// avoidance only, no security property.
    fn new_session_hash() -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(10)
            .map(char::from)
            .collect::<String>()
            .to_lowercase()
    }

    fn resolve_seed(seed: SeedSpec) -> i64 {
        match seed {
            SeedSpec::Fixed(seed) => seed,
            SeedSpec::Randomized => rand::thread_rng().gen_range(0..1_000_000_000),
        }
    }
}

#[async_trait]
impl GenerationBackend for GradioClient {
    async fn generate(
        &self,
        params: &GenerationParams,
        seed: SeedSpec,
    ) -> Result<GenerationResult> {
        let session_hash = Self::new_session_hash();
        let seed = Self::resolve_seed(seed);

        debug!(%session_hash, seed, "joining upstream queue");

        let join_url = format!("{}/gradio_api/queue/join", self.config.origin);
        let join = self
            .http
            .post(&join_url)
            .header(USER_AGENT, &self.config.user_agent)
            .json(&JoinRequest {
                data: (
                    params.prompt.as_str(),
                    params.width,
                    params.height,
                    params.steps,
                    seed,
                    false,
                ),
                fn_index: self.config.fn_index,
                trigger_id: self.config.trigger_id,
                session_hash: &session_hash,
            })
            .send()
            .await?;

        if !join.status().is_success() {
            return Err(Error::JoinFailed {
                status: join.status().as_u16(),
            });
        }

        let data_url = format!(
            "{}/gradio_api/queue/data?session_hash={}",
            self.config.origin, session_hash
        );
        let mut stream = self
            .http
            .get(&data_url)
            .header(ACCEPT, "text/event-stream")
            .header(USER_AGENT, &self.config.user_agent)
            .send()
            .await?;

        if !stream.status().is_success() {
            return Err(Error::StreamOpenFailed {
                status: stream.status().as_u16(),
            });
        }

        let mut scanner = StreamScanner::new();
        while let Some(chunk) = stream.chunk().await? {
            if let Some(completion) = scanner.push(&chunk) {
                debug!(%session_hash, url = %completion.media_url, "generation completed");
                return Ok(GenerationResult {
                    media_url: completion.media_url,
                    seed,
                    duration: completion.duration,
                });
            }
        }

        // The terminal record can arrive in the same chunk as stream close
        if let Some(completion) = scanner.finish() {
            return Ok(GenerationResult {
                media_url: completion.media_url,
                seed,
                duration: completion.duration,
            });
        }

        Err(Error::StreamExhausted)
    }
}
