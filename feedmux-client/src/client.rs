//! HTTP client for the feedmux daemon
//!
//! A view must be subscribed before it is started, otherwise the initial
//! `ItemsAdded` batch is missed:
//!
//! ```no_run
//! # async fn demo() -> feedmux_client::Result<()> {
//! use feedmux_client::{follow, Client, ClientMirror};
//! use feedmux_common::Params;
//!
//! let client = Client::new("http://127.0.0.1:5790").with_peer_name("demo");
//! let view = client.open_view("dummy", None, &Params::new()).await?;
//! let events = view.subscribe().await?;
//! view.start().await?;
//!
//! let mut mirror = ClientMirror::new();
//! follow(events, &mut mirror, |event, mirror| {
//!     println!("{} -> {} items", event.event_type(), mirror.len());
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{ClientError, Result};
use crate::mirror::ClientMirror;
use crate::sse::SseDecoder;
use feedmux_common::events::ViewEvent;
use feedmux_common::Params;
use futures::stream::{BoxStream, StreamExt};
use reqwest::{Method, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

/// Header naming the calling peer
const PEER_HEADER: &str = "x-feedmux-client";

/// Ordered notification stream of one view
pub type EventStream = BoxStream<'static, Result<ViewEvent>>;

/// One entry of the daemon's service list
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    #[serde(default)]
    pub static_caps: Vec<String>,
    #[serde(default)]
    pub dynamic_caps: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OpenViewResponse {
    id: Uuid,
    path: String,
}

#[derive(Debug, Deserialize)]
struct HideResponse {
    hidden: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Connection to one daemon
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    peer: Option<String>,
}

impl Client {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            peer: None,
        }
    }

    /// Name this client so the daemon can reclaim its views when it goes away
    pub fn with_peer_name(mut self, name: impl Into<String>) -> Self {
        self.peer = Some(name.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET /services
    pub async fn services(&self) -> Result<Vec<ServiceInfo>> {
        let response = self.send(self.request(Method::GET, "/services")).await?;
        Ok(response.json().await?)
    }

    /// Open an idle view of `query` on `service`
    pub async fn open_view(
        &self,
        service: &str,
        query: Option<&str>,
        params: &Params,
    ) -> Result<RemoteView> {
        let body = json!({ "query": query, "params": params });
        let response = self
            .send(
                self.request(Method::POST, &format!("/services/{}/views", service))
                    .json(&body),
            )
            .await?;
        let opened: OpenViewResponse = response.json().await?;

        info!(view = %opened.id, service, "Opened remote view");
        Ok(RemoteView {
            client: self.clone(),
            id: opened.id,
            path: opened.path,
        })
    }

    /// Hide an item everywhere; returns false if it was already hidden
    pub async fn hide_item(&self, uid: &str) -> Result<bool> {
        let response = self
            .send(self.request(Method::POST, "/items/hide").json(&json!({ "uid": uid })))
            .await?;
        let hidden: HideResponse = response.json().await?;
        Ok(hidden.hidden)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .http
            .request(method, format!("{}{}", self.base_url, path));
        match &self.peer {
            Some(peer) => builder.header(PEER_HEADER, peer),
            None => builder,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let (code, message) = match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => (body.error.code, body.error.message),
            Err(_) => ("UNKNOWN".to_string(), text),
        };
        Err(ClientError::Api {
            status: status.as_u16(),
            code,
            message,
        })
    }
}

/// Proxy for one view on the daemon
#[derive(Debug, Clone)]
pub struct RemoteView {
    client: Client,
    id: Uuid,
    path: String,
}

impl RemoteView {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Bus address, e.g. `/views/<uuid>`
    pub fn path(&self) -> &str {
        &self.path
    }

    pub async fn start(&self) -> Result<()> {
        self.command("start").await
    }

    pub async fn refresh(&self) -> Result<()> {
        self.command("refresh").await
    }

    pub async fn stop(&self) -> Result<()> {
        self.command("stop").await
    }

    pub async fn close(&self) -> Result<()> {
        self.command("close").await
    }

    async fn command(&self, op: &str) -> Result<()> {
        debug!(view = %self.id, op, "View command");
        self.client
            .send(self.client.request(Method::POST, &format!("{}/{}", self.path, op)))
            .await?;
        Ok(())
    }

    /// Subscribe to the view's notifications
    ///
    /// The subscription is live once this returns.
    pub async fn subscribe(&self) -> Result<EventStream> {
        let response = self
            .client
            .send(self.client.request(Method::GET, &format!("{}/events", self.path)))
            .await?;
        let mut bytes = response.bytes_stream();

        let stream = async_stream::try_stream! {
            let mut decoder = SseDecoder::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(ClientError::from)?;
                for frame in decoder.push(&chunk) {
                    if let Some(event) = frame.view_event().map_err(ClientError::from)? {
                        yield event;
                    }
                }
            }
        };
        Ok(stream.boxed())
    }

    /// Subscribe and feed `mirror` until the stream ends
    pub async fn follow<F>(&self, mirror: &mut ClientMirror, on_event: F) -> Result<()>
    where
        F: FnMut(&ViewEvent, &ClientMirror),
    {
        let events = self.subscribe().await?;
        follow(events, mirror, on_event).await
    }
}

/// Apply every notification of `events` to `mirror`
///
/// `on_event` runs after each batch has been applied. When the stream ends
/// or fails the publisher is considered gone and the mirror is torn down.
pub async fn follow<F>(
    mut events: EventStream,
    mirror: &mut ClientMirror,
    mut on_event: F,
) -> Result<()>
where
    F: FnMut(&ViewEvent, &ClientMirror),
{
    let result = loop {
        match events.next().await {
            Some(Ok(event)) => {
                mirror.apply(&event);
                on_event(&event, mirror);
            }
            Some(Err(e)) => break Err(e),
            None => break Ok(()),
        }
    };

    mirror.teardown();
    result
}
