//! In-memory [`LlmProvider`] test double.
//!
//! Replays a scripted event sequence regardless of the request it
//! receives, so turn-controller and scheduler tests can drive a
//! deterministic conversation without a live provider.

use crate::traits::{LlmProvider, TurnRequest};
use al_domain::cancel::CancelToken;
use al_domain::error::{Error, Result};
use al_domain::stream::{BoxStream, StreamEvent};
use futures_util::stream;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Replays one scripted turn per call to [`stream_turn`], in call order.
pub struct ScriptedProvider {
    id: String,
    turns: Mutex<VecDeque<Vec<StreamEvent>>>,
}

impl ScriptedProvider {
    pub fn new(id: impl Into<String>, turns: Vec<Vec<StreamEvent>>) -> Self {
        Self { id: id.into(), turns: Mutex::new(turns.into()) }
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }

    async fn stream_turn(
        &self,
        _req: &TurnRequest,
        cancel: &CancelToken,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        if cancel.is_canceled() {
            return Err(Error::Canceled("canceled before request sent".into()));
        }
        let next = self
            .turns
            .lock()
            .pop_front()
            .ok_or_else(|| Error::Other("ScriptedProvider: no more scripted turns".into()))?;
        let events: Vec<Result<StreamEvent>> = next.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(events)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::aggregate_turn;
    use al_domain::stream::FinishReason;
    use al_domain::tool::Message;

    #[tokio::test]
    async fn replays_scripted_turns_in_order() {
        let provider = ScriptedProvider::new(
            "scripted",
            vec![
                vec![
                    StreamEvent::TextDelta { text: "hi".into() },
                    StreamEvent::FinishReason { reason: FinishReason::Stop },
                ],
                vec![
                    StreamEvent::TextDelta { text: "bye".into() },
                    StreamEvent::FinishReason { reason: FinishReason::Stop },
                ],
            ],
        );
        let cancel = CancelToken::new();
        let req = TurnRequest::new("test-model", vec![Message::user("hello")], vec![]);

        let first = aggregate_turn(provider.stream_turn(&req, &cancel).await.unwrap()).await.unwrap();
        assert_eq!(first.text, "hi");

        let second = aggregate_turn(provider.stream_turn(&req, &cancel).await.unwrap()).await.unwrap();
        assert_eq!(second.text, "bye");
    }

    #[tokio::test]
    async fn exhausted_script_errors() {
        let provider = ScriptedProvider::new("scripted", vec![]);
        let cancel = CancelToken::new();
        let req = TurnRequest::new("test-model", vec![Message::user("hello")], vec![]);
        assert!(provider.stream_turn(&req, &cancel).await.is_err());
    }

    #[tokio::test]
    async fn canceled_token_short_circuits() {
        let provider = ScriptedProvider::new("scripted", vec![vec![StreamEvent::FinishReason { reason: FinishReason::Stop }]]);
        let cancel = CancelToken::new();
        cancel.cancel(al_domain::cancel::CancelReason::Canceled);
        let req = TurnRequest::new("test-model", vec![Message::user("hello")], vec![]);
        assert!(provider.stream_turn(&req, &cancel).await.is_err());
    }
}
