use super::types::*;
use crate::relay;
use crate::upstream::GenerationResult;

/// Markdown gallery embedded in chat-style responses: one image per result,
/// in slot order, every URL rewritten through the relay.
pub fn markdown_gallery(results: &[GenerationResult], public_origin: &str) -> String {
    let mut out = String::new();
    for (i, result) in results.iter().enumerate() {
        let url = relay::relay_url(public_origin, &result.media_url);
        out.push_str(&format!("![Image {}]({})\n", i + 1, url));
        out.push_str(&format!(
            "> Seed: `{}` | Time: `{:.1}s`\n\n",
            result.seed, result.duration
        ));
    }
    out
}

pub fn chat_response(id: &str, model: &str, content: String) -> ChatCompletionResponse {
    ChatCompletionResponse {
        id: id.to_string(),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: model.to_string(),
        choices: vec![ChatChoice {
            index: 0,
            message: AssistantMessage {
                role: "assistant".to_string(),
                content,
            },
            finish_reason: "stop".to_string(),
        }],
    }
}

pub fn chat_chunk(id: &str, model: &str, content: String) -> ChatCompletionChunk {
    ChatCompletionChunk {
        id: id.to_string(),
        object: "chat.completion.chunk".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: model.to_string(),
        choices: vec![ChunkChoice {
            index: 0,
            delta: ChunkDelta { content },
            finish_reason: None,
        }],
    }
}

pub fn image_list(results: &[GenerationResult], public_origin: &str) -> ImageGenerationResponse {
    ImageGenerationResponse {
        created: chrono::Utc::now().timestamp(),
        data: results
            .iter()
            .map(|result| ImageData {
                url: relay::relay_url(public_origin, &result.media_url),
                revised_prompt: format!("Seed: {}", result.seed),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn results() -> Vec<GenerationResult> {
        vec![
            GenerationResult {
                media_url: "https://upstream.host/a.png".to_string(),
                seed: 5,
                duration: 2.34,
            },
            GenerationResult {
                media_url: "https://upstream.host/b.png".to_string(),
                seed: 6,
                duration: 3.0,
            },
        ]
    }

    #[test]
    fn test_gallery_rewrites_through_relay_in_order() {
        let md = markdown_gallery(&results(), "http://api.test");

        let first = md.find("![Image 1]").unwrap();
        let second = md.find("![Image 2]").unwrap();
        assert!(first < second);
        assert!(md.contains("http://api.test/proxy/image?url=https%3A%2F%2Fupstream.host%2Fa.png"));
        assert!(md.contains("> Seed: `5` | Time: `2.3s`"));
        assert!(md.contains("> Seed: `6` | Time: `3.0s`"));
        assert!(!md.contains("](https://upstream.host/"));
    }

    #[test]
    fn test_chat_chunk_shape() {
        let chunk = chat_chunk("req-1", "z-image-turbo-2048", "hello".to_string());
        let json = serde_json::to_value(&chunk).unwrap();

        assert_eq!(json["object"], "chat.completion.chunk");
        assert_eq!(json["choices"][0]["delta"]["content"], "hello");
        assert_eq!(json["choices"][0]["finish_reason"], serde_json::Value::Null);
    }

    #[test]
    fn test_image_list_carries_seed_annotation() {
        let response = image_list(&results(), "http://api.test");

        assert_eq!(response.data.len(), 2);
        assert_eq!(response.data[0].revised_prompt, "Seed: 5");
        assert!(response.data[1].url.starts_with("http://api.test/proxy/image?url="));
    }
}
