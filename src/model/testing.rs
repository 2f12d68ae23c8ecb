//! A scripted [`ModelClient`](super::ModelClient) for tests of components
//! downstream of the model caller (focus coordinator, review loop engine).

use std::sync::Mutex;

use async_trait::async_trait;

use super::{CompletionRequest, ModelClient};
use crate::errors::ModelError;

/// Returns queued responses in order, one per call; panics if exhausted.
/// Records every request it was given so tests can assert on prompts sent.
pub struct MockModelClient {
    responses: Mutex<Vec<Result<(String, u32), ModelError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockModelClient {
    pub fn new(responses: Vec<(String, u32)>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Ok).rev().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_failure(mut self, at_index: usize, err: ModelError) -> Self {
        let mut responses = self.responses.into_inner().unwrap();
        let insert_at = responses.len().saturating_sub(at_index + 1);
        responses.insert(insert_at, Err(err));
        self.responses = Mutex::new(responses);
        self
    }

    pub fn requests_seen(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelClient for MockModelClient {
    async fn complete(
        &self,
        _endpoint: &str,
        request: &CompletionRequest,
    ) -> Result<(String, u32), ModelError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop()
            .expect("MockModelClient exhausted its scripted responses")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Message;

    #[tokio::test]
    async fn returns_responses_in_order() {
        let client = MockModelClient::new(vec![
            ("first".to_string(), 10),
            ("second".to_string(), 20),
        ]);
        let req = CompletionRequest::new("planning", vec![Message::user("hi")]);
        let (content, tokens) = client.complete("endpoint", &req).await.unwrap();
        assert_eq!(content, "first");
        assert_eq!(tokens, 10);
        let (content, _) = client.complete("endpoint", &req).await.unwrap();
        assert_eq!(content, "second");
        assert_eq!(client.requests_seen(), 2);
    }
}
