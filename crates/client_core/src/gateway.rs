//! Session transport over a protocol gateway: session events arrive as JSON frames
//! on a websocket, outbound operations are plain HTTP calls.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::{stream::SplitSink, SinkExt, StreamExt};
use reqwest::{Client, RequestBuilder, Response};
use shared::{
    domain::{Jid, MessageId},
    error::{ApiError, GatewayException},
    protocol::{
        AuthMaterial, ConnectionUpdate, DisconnectReason, GroupMetadata, OutboundMessage,
        SendMessageRequest, SendMessageResponse, SessionEvent,
    },
};
use tokio::{
    net::TcpStream,
    sync::{mpsc, Mutex},
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        self,
        client::IntoClientRequest,
        http::{header::AUTHORIZATION, HeaderValue},
        protocol::CloseFrame,
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, warn};
use url::Url;

use crate::{
    error::ConnectError,
    transport::{Session, SessionConnector, SessionHandle},
};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Application close codes carry the network's disconnect status as `4000 + status`.
const APP_CLOSE_BASE: u16 = 4000;

pub struct GatewayConnector {
    base_url: Url,
    http: Client,
    event_buffer: usize,
}

impl GatewayConnector {
    pub fn new(base_url: &str, event_buffer: usize) -> Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("invalid gateway url '{base_url}'"))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            bail!("gateway url must start with http:// or https://");
        }
        Ok(Self {
            base_url,
            http: Client::new(),
            event_buffer: event_buffer.max(1),
        })
    }

    fn websocket_url(&self) -> Result<Url> {
        let mut url = self.base_url.clone();
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| anyhow!("cannot derive websocket url from {}", self.base_url))?;
        let path = format!("{}/ws", url.path().trim_end_matches('/'));
        url.set_path(&path);
        Ok(url)
    }
}

#[async_trait]
impl SessionConnector for GatewayConnector {
    async fn connect(&self, auth: Option<AuthMaterial>) -> Result<SessionHandle, ConnectError> {
        let ws_url = self.websocket_url()?;
        let mut request = ws_url
            .as_str()
            .into_client_request()
            .with_context(|| format!("invalid websocket url {ws_url}"))?;
        let token = auth
            .as_ref()
            .filter(|auth| auth.is_registered())
            .map(|auth| auth.token.clone());
        if let Some(token) = &token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .context("credential token is not a valid header value")?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws_stream, _) = match connect_async(request).await {
            Ok(connected) => connected,
            Err(tungstenite::Error::Http(response)) => {
                let status = response.status().as_u16();
                if status == 401 {
                    return Err(ConnectError::InvalidSession);
                }
                let body = response
                    .body()
                    .as_deref()
                    .and_then(|raw| serde_json::from_slice::<ApiError>(raw).ok());
                return Err(ConnectError::Rejected(GatewayException::new(status, body)));
            }
            Err(err) => {
                return Err(anyhow!(err)
                    .context(format!("failed to connect websocket: {ws_url}"))
                    .into())
            }
        };
        debug!(url = %ws_url, "gateway websocket connected");

        let (writer, mut reader) = ws_stream.split();
        let (events_tx, events_rx) = mpsc::channel(self.event_buffer);
        tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                let event = match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<SessionEvent>(&text) {
                        Ok(event) => event,
                        Err(err) => {
                            warn!(error = %err, "invalid session event from gateway");
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        let reason = close_reason(frame.as_ref());
                        let _ = events_tx
                            .send(SessionEvent::ConnectionUpdate(ConnectionUpdate::close(reason)))
                            .await;
                        break;
                    }
                    Ok(_) => continue,
                    Err(err) => {
                        warn!(error = %err, "gateway websocket receive failed");
                        let _ = events_tx
                            .send(SessionEvent::ConnectionUpdate(ConnectionUpdate::close(
                                DisconnectReason::ConnectionLost,
                            )))
                            .await;
                        break;
                    }
                };
                if events_tx.send(event).await.is_err() {
                    break;
                }
            }
            debug!("gateway event reader stopped");
        });

        let session = GatewaySession {
            base_url: self.base_url.clone(),
            http: self.http.clone(),
            token,
            writer: Mutex::new(Some(writer)),
        };
        Ok(SessionHandle {
            session: Arc::new(session),
            events: events_rx,
        })
    }
}

/// Maps a websocket close frame onto the network's disconnect catalogue.
pub fn close_reason(frame: Option<&CloseFrame<'_>>) -> DisconnectReason {
    let Some(frame) = frame else {
        return DisconnectReason::ConnectionClosed;
    };
    match u16::from(frame.code) {
        code @ 4100..=4599 => DisconnectReason::from_status_code(code - APP_CLOSE_BASE),
        1000 | 1001 => DisconnectReason::ConnectionClosed,
        1006 => DisconnectReason::ConnectionLost,
        1008 => DisconnectReason::Forbidden,
        1011 => DisconnectReason::BadSession,
        1012 | 1013 => DisconnectReason::UnavailableService,
        other => DisconnectReason::Unknown(other),
    }
}

pub struct GatewaySession {
    base_url: Url,
    http: Client,
    token: Option<String>,
    writer: Mutex<Option<WsSink>>,
}

impl GatewaySession {
    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.as_str().trim_end_matches('/'))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl Session for GatewaySession {
    async fn send_message(&self, to: &Jid, message: OutboundMessage) -> Result<MessageId> {
        let request = SendMessageRequest {
            to: to.clone(),
            message,
        };
        let response = self
            .authorized(self.http.post(self.endpoint("messages")))
            .json(&request)
            .send()
            .await
            .with_context(|| format!("failed to send message to {to}"))?;
        let body: SendMessageResponse = check(response).await?.json().await?;
        Ok(body.message_id)
    }

    async fn fetch_group_metadata(&self, group: &Jid) -> Result<GroupMetadata> {
        let response = self
            .authorized(self.http.get(self.endpoint(&format!("groups/{group}"))))
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn fetch_all_groups(&self) -> Result<Vec<GroupMetadata>> {
        let response = self
            .authorized(self.http.get(self.endpoint("groups")))
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn close(&self) -> Result<()> {
        let Some(mut writer) = self.writer.lock().await.take() else {
            return Ok(());
        };
        writer
            .close()
            .await
            .context("failed to close gateway websocket")?;
        Ok(())
    }
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.json::<ApiError>().await.ok();
    Err(GatewayException::new(status.as_u16(), body).into())
}

#[cfg(test)]
#[path = "tests/gateway_tests.rs"]
mod tests;
