use futures::stream::{self, BoxStream};
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use url::Url;

use super::{EventTransport, TransportEvent};

/// Server-sent events transport. Each `open` is a single connection attempt;
/// retry policy belongs to the hub, so the event source is closed on its first
/// error instead of reconnecting on its own.
pub struct SseTransport {
    client: reqwest::Client,
    url: Url,
    auth_token: Option<String>,
}

impl SseTransport {
    pub fn new(client: reqwest::Client, url: Url, auth_token: Option<String>) -> Self {
        Self {
            client,
            url,
            auth_token,
        }
    }
}

impl EventTransport for SseTransport {
    fn open(&self) -> BoxStream<'static, TransportEvent> {
        let mut request = self.client.get(self.url.clone());
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        match EventSource::new(request) {
            Ok(source) => stream::unfold(Some(source), |state| async move {
                let mut source = state?;
                match source.next().await {
                    Some(Ok(Event::Open)) => Some((TransportEvent::Open, Some(source))),
                    Some(Ok(Event::Message(message))) => Some((
                        TransportEvent::Message {
                            event: message.event,
                            data: message.data,
                        },
                        Some(source),
                    )),
                    Some(Err(err)) => {
                        source.close();
                        Some((TransportEvent::Error(err.to_string()), None))
                    }
                    None => None,
                }
            })
            .boxed(),
            Err(err) => {
                let message = format!("cannot open event stream: {err}");
                stream::once(async move { TransportEvent::Error(message) }).boxed()
            }
        }
    }
}
