use async_trait::async_trait;
use campus_shared::clients::db::DbPool;
use campus_shared::UserId;
use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;

use super::{ConversationStore, StoreError, StoreResult};
use crate::models::{Conversation, ConversationId, Message, NewConversation, NewMessage};
use crate::schema::{conversations, messages};

impl From<diesel::result::Error> for StoreError {
    fn from(err: diesel::result::Error) -> Self {
        match err {
            diesel::result::Error::NotFound => StoreError::NotFound,
            diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                StoreError::Conflict(info.message().to_string())
            }
            diesel::result::Error::DatabaseError(DatabaseErrorKind::ClosedConnection, info) => {
                StoreError::Unavailable(info.message().to_string())
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}

impl From<diesel::r2d2::PoolError> for StoreError {
    fn from(err: diesel::r2d2::PoolError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Postgres backend. Diesel is synchronous, so every call runs on the
/// blocking thread pool with a pooled connection.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn run<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> StoreResult<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("blocking task failed: {e}")))?
    }

    /// Probe every mapped column once. A missing table or column fails here
    /// instead of surfacing on the first user request.
    pub async fn verify_schema(&self) -> StoreResult<()> {
        self.run(|conn| {
            conversations::table
                .select(Conversation::as_select())
                .limit(0)
                .load::<Conversation>(conn)?;
            messages::table
                .select(Message::as_select())
                .limit(0)
                .load::<Message>(conn)?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl ConversationStore for PgStore {
    async fn find_conversation(&self, id: ConversationId) -> StoreResult<Option<Conversation>> {
        self.run(move |conn| {
            Ok(conversations::table
                .find(id)
                .select(Conversation::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    async fn find_conversation_between(&self, a: UserId, b: UserId) -> StoreResult<Option<Conversation>> {
        self.run(move |conn| {
            Ok(conversations::table
                .filter(
                    conversations::user1_id
                        .eq(a)
                        .and(conversations::user2_id.eq(b))
                        .or(conversations::user1_id.eq(b).and(conversations::user2_id.eq(a))),
                )
                .select(Conversation::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    async fn insert_conversation(&self, user1_id: UserId, user2_id: UserId) -> StoreResult<Conversation> {
        self.run(move |conn| {
            Ok(diesel::insert_into(conversations::table)
                .values(&NewConversation { user1_id, user2_id })
                .returning(Conversation::as_returning())
                .get_result(conn)?)
        })
        .await
    }

    async fn conversations_for(&self, user_id: UserId) -> StoreResult<Vec<Conversation>> {
        self.run(move |conn| {
            Ok(conversations::table
                .filter(conversations::user1_id.eq(user_id).or(conversations::user2_id.eq(user_id)))
                .order(conversations::updated_at.desc())
                .select(Conversation::as_select())
                .load(conn)?)
        })
        .await
    }

    async fn latest_message(&self, id: ConversationId) -> StoreResult<Option<Message>> {
        self.run(move |conn| {
            Ok(messages::table
                .filter(messages::conversation_id.eq(id))
                .order((messages::created_at.desc(), messages::message_id.desc()))
                .select(Message::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    async fn unread_count(&self, id: ConversationId, reader: UserId) -> StoreResult<i64> {
        self.run(move |conn| {
            Ok(messages::table
                .filter(messages::conversation_id.eq(id))
                .filter(messages::sender_id.ne(reader))
                .filter(messages::is_read.eq(false))
                .count()
                .get_result(conn)?)
        })
        .await
    }

    async fn total_unread(&self, reader: UserId) -> StoreResult<i64> {
        self.run(move |conn| {
            Ok(messages::table
                .inner_join(conversations::table)
                .filter(conversations::user1_id.eq(reader).or(conversations::user2_id.eq(reader)))
                .filter(messages::sender_id.ne(reader))
                .filter(messages::is_read.eq(false))
                .count()
                .get_result(conn)?)
        })
        .await
    }

    async fn messages(&self, id: ConversationId) -> StoreResult<Vec<Message>> {
        self.run(move |conn| {
            Ok(messages::table
                .filter(messages::conversation_id.eq(id))
                .order((messages::created_at.asc(), messages::message_id.asc()))
                .select(Message::as_select())
                .load(conn)?)
        })
        .await
    }

    async fn insert_message(&self, message: NewMessage) -> StoreResult<Message> {
        self.run(move |conn| {
            conn.transaction::<_, StoreError, _>(|conn| {
                let inserted: Message = diesel::insert_into(messages::table)
                    .values(&message)
                    .returning(Message::as_returning())
                    .get_result(conn)?;

                diesel::update(conversations::table.find(message.conversation_id))
                    .set(conversations::updated_at.eq(Utc::now()))
                    .execute(conn)?;

                Ok(inserted)
            })
        })
        .await
    }

    async fn mark_read(&self, id: ConversationId, reader: UserId) -> StoreResult<usize> {
        self.run(move |conn| {
            Ok(diesel::update(
                messages::table
                    .filter(messages::conversation_id.eq(id))
                    .filter(messages::sender_id.ne(reader))
                    .filter(messages::is_read.eq(false)),
            )
            .set(messages::is_read.eq(true))
            .execute(conn)?)
        })
        .await
    }

    async fn delete_conversation(&self, id: ConversationId) -> StoreResult<usize> {
        self.run(move |conn| {
            conn.transaction::<_, StoreError, _>(|conn| {
                conversations::table
                    .find(id)
                    .select(conversations::conversation_id)
                    .for_update()
                    .first::<ConversationId>(conn)
                    .optional()?
                    .ok_or(StoreError::NotFound)?;

                let removed = diesel::delete(messages::table.filter(messages::conversation_id.eq(id)))
                    .execute(conn)?;
                diesel::delete(conversations::table.find(id)).execute(conn)?;

                Ok(removed)
            })
        })
        .await
    }

    async fn peer_ids(&self, user_id: UserId) -> StoreResult<Vec<UserId>> {
        let convs = self.conversations_for(user_id).await?;
        let mut peers: Vec<UserId> = convs.iter().map(|c| c.other_participant(user_id)).collect();
        peers.sort_unstable();
        peers.dedup();
        Ok(peers)
    }

    async fn ping(&self) -> StoreResult<()> {
        self.run(|conn| {
            diesel::sql_query("SELECT 1").execute(conn)?;
            Ok(())
        })
        .await
    }
}
