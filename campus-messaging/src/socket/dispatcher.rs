use std::sync::Arc;

use campus_shared::{AppError, AppResult, ErrorCode, JwtKeys};
use tokio::sync::mpsc;

use crate::realtime::{ClientEvent, ConnectionId, ServerEvent};
use crate::service::{ImageAttachment, MessageDraft, Messaging, Transport};

/// What the socket glue feeds into a connection's actor.
#[derive(Debug)]
pub enum Inbound {
    Frame {
        event: String,
        payload: serde_json::Value,
    },
    Closed,
}

pub type InboundTx = mpsc::UnboundedSender<Inbound>;
pub type InboundRx = mpsc::UnboundedReceiver<Inbound>;

/// Processes one connection's events strictly in arrival order. Failures are
/// reported to that connection as `error` events and never end the loop.
pub struct ConnectionActor {
    conn: ConnectionId,
    messaging: Arc<Messaging>,
    jwt: JwtKeys,
}

impl ConnectionActor {
    pub fn new(conn: ConnectionId, messaging: Arc<Messaging>, jwt: JwtKeys) -> Self {
        Self { conn, messaging, jwt }
    }

    pub async fn run(self, mut inbound: InboundRx) {
        while let Some(frame) = inbound.recv().await {
            match frame {
                Inbound::Frame { event, payload } => {
                    if let Err(err) = self.handle(&event, &payload).await {
                        tracing::warn!(conn = %self.conn, event = %event, code = err.code().code(), error = %err, "socket event rejected");
                        self.messaging.hub().send_to_connection(self.conn, ServerEvent::error(&err));
                    }
                }
                Inbound::Closed => break,
            }
        }
        self.messaging.disconnect(self.conn).await;
    }

    async fn handle(&self, name: &str, payload: &serde_json::Value) -> AppResult<()> {
        let user_id = self.messaging.hub().user_of(self.conn);
        if ClientEvent::requires_identity(name) && user_id.is_none() {
            return Err(AppError::new(ErrorCode::Unauthenticated, "authenticate before sending events"));
        }

        let Some(event) = ClientEvent::decode(name, payload)? else {
            tracing::debug!(conn = %self.conn, event = name, "ignoring unknown socket event");
            return Ok(());
        };

        // Only `authenticate` can reach here without a user.
        let user = user_id.unwrap_or_default();
        match event {
            ClientEvent::Authenticate { token } => {
                let claims = self.jwt.verify(&token)?;
                self.messaging.authenticate(self.conn, claims.sub).await?;
            }
            ClientEvent::JoinConversation { conversation_id } => {
                self.messaging.join_conversation(self.conn, user, conversation_id).await?;
            }
            ClientEvent::LeaveConversation { conversation_id } => {
                self.messaging.leave_conversation(self.conn, conversation_id);
            }
            ClientEvent::SendMessage { conversation_id, content, image } => {
                let image = image
                    .map(|url| ImageAttachment::from_data_url(&url, self.messaging.max_image_bytes()))
                    .transpose()?;
                let draft = MessageDraft::new(conversation_id, &content, image)?;
                self.messaging
                    .send_message(user, Some(self.conn), draft, Transport::Socket)
                    .await?;
            }
            ClientEvent::MarkAsRead { conversation_id } => {
                self.messaging.mark_as_read(user, conversation_id).await?;
            }
            ClientEvent::Typing { conversation_id } => {
                self.messaging.typing(self.conn, user, conversation_id, true);
            }
            ClientEvent::StopTyping { conversation_id } => {
                self.messaging.typing(self.conn, user, conversation_id, false);
            }
        }
        Ok(())
    }
}
