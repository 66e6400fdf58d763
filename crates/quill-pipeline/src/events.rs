use crate::message::{Artifact, Message};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum RunEvent {
    Message(Message),
    Artifact(Artifact),
}

pub trait RunEventObserver: Send + Sync {
    fn on_event(&self, event: &RunEvent);
}

impl<F> RunEventObserver for F
where
    F: Fn(&RunEvent) + Send + Sync,
{
    fn on_event(&self, event: &RunEvent) {
        self(event);
    }
}

pub type SharedRunEventObserver = Arc<dyn RunEventObserver>;
pub type RunEventSender = mpsc::UnboundedSender<RunEvent>;
pub type RunEventReceiver = mpsc::UnboundedReceiver<RunEvent>;

#[derive(Clone, Default)]
pub struct RunEventSink {
    observer: Option<SharedRunEventObserver>,
    sender: Option<RunEventSender>,
}

impl RunEventSink {
    pub fn with_observer(observer: SharedRunEventObserver) -> Self {
        Self {
            observer: Some(observer),
            sender: None,
        }
    }

    pub fn with_sender(sender: RunEventSender) -> Self {
        Self {
            observer: None,
            sender: Some(sender),
        }
    }

    pub fn observer(mut self, observer: SharedRunEventObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn sender(mut self, sender: RunEventSender) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.observer.is_some() || self.sender.is_some()
    }

    pub fn emit(&self, event: RunEvent) {
        if let Some(observer) = self.observer.as_ref() {
            observer.on_event(&event);
        }
        if let Some(sender) = self.sender.as_ref() {
            let _ = sender.send(event);
        }
    }
}

impl std::fmt::Debug for RunEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunEventSink")
            .field("observer", &self.observer.is_some())
            .field("sender", &self.sender.is_some())
            .finish()
    }
}

pub fn run_event_channel() -> (RunEventSender, RunEventReceiver) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Channel;
    use std::sync::Mutex;

    #[test]
    fn run_event_sink_observer_and_sender_expected_both_receive_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let observer_seen = Arc::clone(&seen);
        let observer: SharedRunEventObserver = Arc::new(move |event: &RunEvent| {
            if let RunEvent::Message(message) = event {
                observer_seen
                    .lock()
                    .expect("observer mutex should lock")
                    .push(message.text.clone());
            }
        });
        let (tx, mut rx) = run_event_channel();
        let sink = RunEventSink::with_observer(observer).sender(tx);
        sink.emit(RunEvent::Message(Message::new(Channel::Information, "hello")));

        let streamed = rx.try_recv().expect("channel should receive one event");
        assert!(matches!(streamed, RunEvent::Message(message) if message.text == "hello"));
        assert_eq!(
            seen.lock().expect("observer mutex should lock").as_slice(),
            &["hello".to_string()]
        );
    }

    #[test]
    fn run_event_serialization_expected_category_tag() {
        let event = RunEvent::Artifact(Artifact {
            uri: "out.json".to_string(),
            artifact_type: "swagger-document".to_string(),
            content: "{}".to_string(),
            source_map: Vec::new(),
        });
        let value = serde_json::to_value(&event).expect("event should serialize");
        assert_eq!(value["category"], "artifact");
        assert_eq!(value["type"], "swagger-document");
    }
}
