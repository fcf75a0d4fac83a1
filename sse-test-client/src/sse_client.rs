use anyhow::Result;
use eventsource_client::{self as es, Client};
use futures_util::stream::StreamExt;
use log::*;
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// One decoded broker frame: the selector and its JSON payload, split off
/// the single `data:` line.
#[derive(Debug, Clone)]
pub struct Event {
    pub selector: String,
    pub payload: Value,
    pub timestamp: Instant,
}

pub struct Connection {
    pub label: String,
    event_rx: mpsc::UnboundedReceiver<Event>,
    handle: tokio::task::JoinHandle<()>,
}

impl Connection {
    pub async fn establish(base_url: &str, channel: &str, label: String) -> Result<Self> {
        let url = format!("{}/event-stream?channel={}", base_url, channel);
        let (tx, rx) = mpsc::unbounded_channel();

        let client = es::ClientBuilder::for_url(&url)?.build();

        let task_label = label.clone();
        let handle = tokio::spawn(async move {
            let mut stream = client.stream();

            loop {
                match stream.next().await {
                    Some(Ok(es::SSE::Event(event))) => {
                        let (selector, json) = match event.data.split_once(' ') {
                            Some(parts) => parts,
                            None => (event.data.as_str(), ""),
                        };
                        let payload = if json.is_empty() {
                            Value::Null
                        } else {
                            serde_json::from_str(json).unwrap_or(Value::Null)
                        };
                        let event = Event {
                            selector: selector.to_string(),
                            payload,
                            timestamp: Instant::now(),
                        };

                        if tx.send(event).is_err() {
                            debug!("SSE receiver dropped for {}", task_label);
                            break;
                        }
                    }
                    Some(Ok(es::SSE::Comment(_))) => {
                        // Ignore comments (keep-alive)
                    }
                    Some(Err(e)) => {
                        warn!("SSE error for {}: {}", task_label, e);
                    }
                    None => {
                        debug!("SSE stream ended for {}", task_label);
                        break;
                    }
                }
            }
        });

        Ok(Self {
            label,
            event_rx: rx,
            handle,
        })
    }

    pub async fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<Event> {
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                anyhow::bail!("Timeout waiting for selector: {}", selector);
            }

            match tokio::time::timeout(remaining, self.event_rx.recv()).await {
                Ok(Some(event)) if event.selector == selector => {
                    return Ok(event);
                }
                Ok(Some(_)) => {
                    // Wrong selector, keep waiting
                    continue;
                }
                Ok(None) => {
                    anyhow::bail!("SSE connection closed");
                }
                Err(_) => {
                    anyhow::bail!("Timeout waiting for selector: {}", selector);
                }
            }
        }
    }

    /// Tear the TCP stream down without telling the server; the broker only
    /// notices on its next write to this subscription.
    pub fn disconnect(self) {
        self.handle.abort();
    }
}
