//! OpenAI provider.
//!
//! Chat completions via `/v1/chat/completions` (one-shot and SSE streamed) and
//! the assistants thread/run protocol via `/v1/threads`. Works with any
//! OpenAI-compatible base URL.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use futures::Stream;
use serde_json::json;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use crate::sse::{SseEvent, parse_sse_stream};
use crate::threads::{MessageList, Run, Thread, ThreadsApi, ToolOutput};
use crate::{ChatChunk, ChatCompletion, ChatProvider, ChatRequest, ChunkStream};

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const ASSISTANTS_BETA: &str = "assistants=v2";

pub struct OpenAiProvider {
    pub base_url: String,
    api_key: String,
    provider_id: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>, base_url: Option<&str>) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(OPENAI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key: api_key.into(),
            provider_id: "openai".into(),
            client: reqwest::Client::new(),
        }
    }

    /// Provider against an OpenAI-compatible endpoint under a different id.
    pub fn compatible(
        id: impl Into<String>,
        api_key: impl Into<String>,
        base_url: &str,
    ) -> Self {
        Self {
            provider_id: id.into(),
            ..Self::new(api_key, Some(base_url))
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> anyhow::Result<T> {
        let response = self.authed(builder).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI API error {status}: {body}");
        }

        Ok(response.json::<T>().await?)
    }

    async fn threads_post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> anyhow::Result<T> {
        let builder = self
            .client
            .post(self.url(path))
            .header("OpenAI-Beta", ASSISTANTS_BETA)
            .json(body);
        self.send_json(builder).await
    }

    async fn threads_get<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        let builder = self
            .client
            .get(self.url(path))
            .header("OpenAI-Beta", ASSISTANTS_BETA);
        self.send_json(builder).await
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn id(&self) -> &str {
        &self.provider_id
    }

    async fn complete(&self, request: &ChatRequest) -> anyhow::Result<ChatCompletion> {
        let mut body = request.clone();
        body.stream = false;

        debug!(model = %body.model, base_url = %self.base_url, "OpenAI chat completion");

        let builder = self.client.post(self.url("chat/completions")).json(&body);
        self.send_json(builder).await
    }

    async fn stream(&self, request: &ChatRequest) -> anyhow::Result<ChunkStream> {
        let mut body = request.clone();
        body.stream = true;

        debug!(model = %body.model, base_url = %self.base_url, "Streaming OpenAI chat completion");

        let response = self
            .authed(self.client.post(self.url("chat/completions")))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI API error {status}: {body}");
        }

        Ok(chat_chunks(parse_sse_stream(response)))
    }
}

/// Decode SSE events into chat chunks, ending at `[DONE]`.
/// Events that are not valid chunks are logged and skipped.
fn chat_chunks<S>(events: S) -> ChunkStream
where
    S: Stream<Item = anyhow::Result<SseEvent>> + Send + 'static,
{
    let sse = Box::pin(events);

    let chunks = futures::stream::unfold(sse, |mut sse| async move {
        loop {
            match sse.next().await {
                Some(Ok(event)) => {
                    let data = event.data.trim();

                    // OpenAI terminates with "data: [DONE]"
                    if data == "[DONE]" {
                        return None;
                    }

                    match serde_json::from_str::<ChatChunk>(data) {
                        Ok(chunk) => return Some((Ok(chunk), sse)),
                        Err(e) => {
                            warn!(%e, data, "Skipping unparsable OpenAI chunk");
                            continue;
                        }
                    }
                }
                Some(Err(e)) => return Some((Err(e), sse)),
                None => return None,
            }
        }
    });

    Box::pin(chunks)
}

#[async_trait]
impl ThreadsApi for OpenAiProvider {
    async fn create_thread(&self) -> anyhow::Result<Thread> {
        self.threads_post("threads", &json!({})).await
    }

    async fn create_message(
        &self,
        thread_id: &str,
        role: &str,
        content: &str,
    ) -> anyhow::Result<()> {
        let _: serde_json::Value = self
            .threads_post(
                &format!("threads/{thread_id}/messages"),
                &json!({ "role": role, "content": content }),
            )
            .await?;
        Ok(())
    }

    async fn create_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
        instructions: Option<&str>,
    ) -> anyhow::Result<Run> {
        let mut body = json!({ "assistant_id": assistant_id });
        if let Some(instructions) = instructions {
            body["instructions"] = json!(instructions);
        }
        debug!(thread_id, assistant_id, "Creating run");
        self.threads_post(&format!("threads/{thread_id}/runs"), &body)
            .await
    }

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> anyhow::Result<Run> {
        self.threads_get(&format!("threads/{thread_id}/runs/{run_id}"))
            .await
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> anyhow::Result<Run> {
        self.threads_post(
            &format!("threads/{thread_id}/runs/{run_id}/submit_tool_outputs"),
            &json!({ "tool_outputs": outputs }),
        )
        .await
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> anyhow::Result<Run> {
        self.threads_post(
            &format!("threads/{thread_id}/runs/{run_id}/cancel"),
            &json!({}),
        )
        .await
    }

    async fn list_messages(&self, thread_id: &str) -> anyhow::Result<MessageList> {
        self.threads_get(&format!("threads/{thread_id}/messages"))
            .await
    }
}
