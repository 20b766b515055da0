use std::collections::{HashMap, HashSet};

use chrono::Utc;
use courier_types::error::ChatError;
use courier_types::models::{
    ChatId, ImageId, ImageRef, MessageContent, MessageId, MessageStatus, NewMessageContent,
    ReadSelector, UserId,
};
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, Row, params, params_from_iter};

use crate::badge::ChatSnapshot;
use crate::models::{
    ChatListRow, ChatRow, ChatUserRow, ImageRow, MessageFilter, MessageMeta, MessageRow,
    ReadOutcome, UserRow, encode_ts, parse_ts,
};
use crate::{Database, StoreResult};

const MESSAGE_COLUMNS: &str = "m.id, m.chat_id, m.creator_id, m.created_at, m.message_type, m.text,
     i.id, i.path, i.compact_path, m.status, m.is_active";

impl Database {
    // -- Users --

    pub fn create_user(&self, username: &str, password_hash: &str) -> StoreResult<UserId> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (username, password, created_at) VALUES (?1, ?2, ?3)",
                params![username, password_hash, encode_ts(Utc::now())],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> StoreResult<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", &Value::Text(username.to_string())))
    }

    pub fn get_user_by_id(&self, id: UserId) -> StoreResult<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", &Value::Integer(id)))
    }

    /// Block or unblock a user. Blocked users count as inactive everywhere.
    pub fn set_user_blocked(&self, id: UserId, blocked: bool) -> StoreResult<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET is_blocked = ?1 WHERE id = ?2",
                params![blocked, id],
            )?;
            if changed == 0 {
                return Err(ChatError::UserNotFound(id).into());
            }
            Ok(())
        })
    }

    // -- Media --

    pub fn create_image(
        &self,
        owner_id: UserId,
        path: &str,
        compact_path: Option<&str>,
    ) -> StoreResult<ImageRow> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO images (owner_id, path, compact_path, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![owner_id, path, compact_path, encode_ts(Utc::now())],
            )?;
            let id = conn.last_insert_rowid();
            query_image(conn, id)?.ok_or_else(|| ChatError::ImageNotFound(id).into())
        })
    }

    pub fn get_image(&self, id: ImageId) -> StoreResult<Option<ImageRow>> {
        self.with_conn(|conn| query_image(conn, id))
    }

    // -- Devices --

    /// Register (or re-activate) a device token for a user.
    pub fn register_device(&self, user_id: UserId, device_token: &str) -> StoreResult<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO devices (user_id, device_token, is_active, is_verified, created_at)
                 VALUES (?1, ?2, 1, 1, ?3)
                 ON CONFLICT(device_token) DO UPDATE
                 SET user_id = excluded.user_id, is_active = 1, is_verified = 1",
                params![user_id, device_token, encode_ts(Utc::now())],
            )?;
            Ok(())
        })
    }

    pub fn active_device_tokens(&self, user_id: UserId) -> StoreResult<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT device_token FROM devices
                 WHERE user_id = ?1 AND is_active = 1 AND is_verified = 1
                 ORDER BY id",
            )?;
            let tokens = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(tokens)
        })
    }

    // -- Chats --

    /// Create a chat with the creator as first member. Opponents are
    /// de-duplicated; the creator is never added twice.
    pub fn create_chat(&self, creator_id: UserId, opponent_ids: &[UserId]) -> StoreResult<ChatRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            match query_user(&tx, "id", &Value::Integer(creator_id))? {
                Some(user) if user.can_chat() => {}
                _ => return Err(ChatError::UserNotFound(creator_id).into()),
            }

            let mut opponents: Vec<UserId> = Vec::with_capacity(opponent_ids.len());
            for &id in opponent_ids {
                if id != creator_id && !opponents.contains(&id) {
                    opponents.push(id);
                }
            }
            if opponents.is_empty() {
                return Err(ChatError::InvalidParticipants(
                    "chat needs at least one opponent besides the creator".into(),
                )
                .into());
            }
            for &id in &opponents {
                match query_user(&tx, "id", &Value::Integer(id))? {
                    Some(user) if user.can_chat() => {}
                    _ => {
                        return Err(ChatError::InvalidParticipants(format!(
                            "Can't find user with given id {}",
                            id
                        ))
                        .into());
                    }
                }
            }

            let now = encode_ts(Utc::now());
            tx.execute("INSERT INTO chats (created_at) VALUES (?1)", [&now])?;
            let chat_id = tx.last_insert_rowid();

            for user_id in std::iter::once(creator_id).chain(opponents) {
                tx.execute(
                    "INSERT INTO chat_users (chat_id, user_id, is_active, last_read_message_id, joined_at)
                     VALUES (?1, ?2, 1, 0, ?3)",
                    params![chat_id, user_id, now],
                )?;
            }

            let chat = query_chat(&tx, chat_id)?.ok_or(ChatError::ChatNotFound(chat_id))?;
            tx.commit()?;
            Ok(chat)
        })
    }

    pub fn get_chat(&self, chat_id: ChatId) -> StoreResult<Option<ChatRow>> {
        self.with_conn(|conn| query_chat(conn, chat_id))
    }

    /// The chat, provided `user_id` is one of its active members.
    pub fn get_chat_for_member(&self, chat_id: ChatId, user_id: UserId) -> StoreResult<ChatRow> {
        self.with_conn(|conn| {
            let chat = query_chat(conn, chat_id)?.ok_or(ChatError::ChatNotFound(chat_id))?;
            if chat.active_member(user_id).is_none() {
                return Err(ChatError::NotAMember { chat_id, user_id }.into());
            }
            Ok(chat)
        })
    }

    pub fn chat_member(&self, chat_id: ChatId, user_id: UserId) -> StoreResult<Option<ChatUserRow>> {
        self.with_conn(|conn| query_member(conn, chat_id, user_id))
    }

    /// Ids of every chat where the user is an active member.
    pub fn active_chat_ids_for_user(&self, user_id: UserId) -> StoreResult<Vec<ChatId>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT chat_id FROM chat_users WHERE user_id = ?1 AND is_active = 1 ORDER BY chat_id",
            )?;
            let ids = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<Result<Vec<ChatId>, _>>()?;
            Ok(ids)
        })
    }

    /// Chats where the user is an active member, most recent activity first.
    /// Chats without messages sort last. Returns the page and the total count.
    pub fn list_chats_for_user(
        &self,
        user_id: UserId,
        offset: u32,
        limit: u32,
    ) -> StoreResult<(Vec<ChatListRow>, u64)> {
        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM chat_users WHERE user_id = ?1 AND is_active = 1",
                [user_id],
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare(
                "SELECT c.id
                 FROM chats c
                 JOIN chat_users cu ON cu.chat_id = c.id AND cu.user_id = ?1 AND cu.is_active = 1
                 LEFT JOIN messages lm ON lm.id = c.last_message_id
                 ORDER BY (lm.created_at IS NULL), lm.created_at DESC, c.id DESC
                 LIMIT ?2 OFFSET ?3",
            )?;
            let chat_ids = stmt
                .query_map(params![user_id, limit, offset], |row| row.get(0))?
                .collect::<Result<Vec<ChatId>, _>>()?;

            let mut rows = Vec::with_capacity(chat_ids.len());
            for chat_id in chat_ids {
                let Some(chat) = query_chat(conn, chat_id)? else {
                    continue;
                };
                let last_message = match chat.last_message_id {
                    Some(id) => query_message(conn, id)?,
                    None => None,
                };
                rows.push(ChatListRow { chat, last_message });
            }

            Ok((rows, total as u64))
        })
    }

    // -- Messages --

    /// Persist a message and move the chat's last-message pointer, atomically.
    pub fn append_message(
        &self,
        chat_id: ChatId,
        author_id: UserId,
        content: &NewMessageContent,
    ) -> StoreResult<MessageRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let chat_exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM chats WHERE id = ?1)",
                [chat_id],
                |row| row.get(0),
            )?;
            if !chat_exists {
                return Err(ChatError::ChatNotFound(chat_id).into());
            }

            let is_member: bool = tx.query_row(
                "SELECT EXISTS(
                    SELECT 1 FROM chat_users cu JOIN users u ON u.id = cu.user_id
                    WHERE cu.chat_id = ?1 AND cu.user_id = ?2 AND cu.is_active = 1
                      AND u.is_active = 1 AND u.is_blocked = 0)",
                params![chat_id, author_id],
                |row| row.get(0),
            )?;
            if !is_member {
                return Err(ChatError::NotAMember { chat_id, user_id: author_id }.into());
            }

            let (message_type, text, image_id) = match content {
                NewMessageContent::Text(text) => {
                    let text = text.trim();
                    if text.is_empty() {
                        return Err(ChatError::InvalidMessageContent.into());
                    }
                    ("Text", Some(text.to_string()), None)
                }
                NewMessageContent::Image(image_id) => {
                    match query_image(&tx, *image_id)? {
                        Some(image) if image.is_active => {}
                        _ => return Err(ChatError::ImageNotFound(*image_id).into()),
                    }
                    ("Image", None, Some(*image_id))
                }
            };

            tx.execute(
                "INSERT INTO messages (chat_id, creator_id, created_at, message_type, text, image_id, status, is_active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1)",
                params![
                    chat_id,
                    author_id,
                    encode_ts(Utc::now()),
                    message_type,
                    text,
                    image_id,
                    MessageStatus::Sent.as_str()
                ],
            )?;
            let message_id = tx.last_insert_rowid();

            // last_message_id only ever moves forward
            tx.execute(
                "UPDATE chats SET last_message_id = ?1
                 WHERE id = ?2 AND (last_message_id IS NULL OR last_message_id < ?1)",
                params![message_id, chat_id],
            )?;

            let message = query_message(&tx, message_id)?.ok_or_else(|| {
                ChatError::Storage(format!("message {} vanished after insert", message_id))
            })?;
            tx.commit()?;
            Ok(message)
        })
    }

    pub fn get_message(&self, message_id: MessageId) -> StoreResult<Option<MessageRow>> {
        self.with_conn(|conn| query_message(conn, message_id))
    }

    /// One page of a chat's messages plus the number of messages matching the
    /// filter. With `start_date` the page is ascending (incremental sync),
    /// otherwise newest first.
    pub fn list_messages(
        &self,
        chat_id: ChatId,
        filter: &MessageFilter,
    ) -> StoreResult<(Vec<MessageRow>, u64)> {
        self.with_conn(|conn| {
            let mut clause = String::from("m.chat_id = ?1 AND m.is_active = 1");
            let mut values = vec![Value::Integer(chat_id)];

            let order = if let Some(start) = filter.start_date {
                values.push(Value::Text(encode_ts(start)));
                clause.push_str(&format!(" AND m.created_at > ?{}", values.len()));
                "m.created_at ASC, m.id ASC"
            } else {
                if let Some(last_id) = filter.last_id {
                    values.push(Value::Integer(last_id));
                    clause.push_str(&format!(" AND m.id < ?{}", values.len()));
                }
                "m.created_at DESC, m.id DESC"
            };

            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM messages m WHERE {}", clause),
                params_from_iter(values.iter()),
                |row| row.get(0),
            )?;

            let limit_idx = values.len() + 1;
            values.push(Value::Integer(filter.limit as i64));
            values.push(Value::Integer(filter.offset as i64));

            let sql = format!(
                "SELECT {} FROM messages m LEFT JOIN images i ON i.id = m.image_id
                 WHERE {} ORDER BY {} LIMIT ?{} OFFSET ?{}",
                MESSAGE_COLUMNS,
                clause,
                order,
                limit_idx,
                limit_idx + 1
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(values.iter()), map_message)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok((rows, total as u64))
        })
    }

    /// Advance a member's read cursor over messages written by others.
    ///
    /// Only messages past the current cursor that match `selector` are
    /// touched; their legacy status becomes `Read` and the cursor moves to the
    /// highest id among them. Nothing qualifying is a no-op, not an error.
    pub fn advance_read_cursor(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        selector: &ReadSelector,
    ) -> StoreResult<ReadOutcome> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let member = match query_member(&tx, chat_id, user_id)? {
                Some(member) if member.is_active => member,
                _ => {
                    let chat_exists: bool = tx.query_row(
                        "SELECT EXISTS(SELECT 1 FROM chats WHERE id = ?1)",
                        [chat_id],
                        |row| row.get(0),
                    )?;
                    return Err(if chat_exists {
                        ChatError::NotAMember { chat_id, user_id }
                    } else {
                        ChatError::ChatNotFound(chat_id)
                    }
                    .into());
                }
            };
            let previous_cursor = member.last_read_message_id;

            let mut stmt = tx.prepare(
                "SELECT id, creator_id FROM messages
                 WHERE chat_id = ?1 AND creator_id <> ?2 AND id > ?3 AND is_active = 1
                 ORDER BY id",
            )?;
            let candidates = stmt
                .query_map(params![chat_id, user_id, previous_cursor], |row| {
                    Ok(MessageMeta {
                        id: row.get(0)?,
                        creator_id: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            drop(stmt);

            let newly_read: Vec<MessageMeta> = match selector {
                ReadSelector::Ids(ids) => {
                    let wanted: HashSet<MessageId> = ids.iter().copied().collect();
                    candidates.into_iter().filter(|m| wanted.contains(&m.id)).collect()
                }
                ReadSelector::UpTo(bound) => {
                    candidates.into_iter().filter(|m| m.id <= *bound).collect()
                }
            };

            let Some(cursor) = newly_read.iter().map(|m| m.id).max() else {
                return Ok(ReadOutcome {
                    previous_cursor,
                    cursor: previous_cursor,
                    newly_read,
                });
            };

            {
                let mut mark = tx.prepare(
                    "UPDATE messages SET status = ?1 WHERE id = ?2 AND status <> ?1",
                )?;
                for m in &newly_read {
                    mark.execute(params![MessageStatus::Read.as_str(), m.id])?;
                }
            }

            // Cursor is monotonic: never write a smaller value
            tx.execute(
                "UPDATE chat_users SET last_read_message_id = MAX(last_read_message_id, ?1)
                 WHERE chat_id = ?2 AND user_id = ?3",
                params![cursor, chat_id, user_id],
            )?;

            tx.commit()?;
            Ok(ReadOutcome {
                previous_cursor,
                cursor,
                newly_read,
            })
        })
    }

    // -- Badge snapshots --

    /// Cursors of all active members plus every message any of them has not
    /// read yet.
    pub fn chat_snapshot(&self, chat_id: ChatId) -> StoreResult<ChatSnapshot> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT cu.user_id, cu.last_read_message_id
                 FROM chat_users cu JOIN users u ON u.id = cu.user_id
                 WHERE cu.chat_id = ?1 AND cu.is_active = 1
                   AND u.is_active = 1 AND u.is_blocked = 0",
            )?;
            let cursors = stmt
                .query_map([chat_id], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<HashMap<UserId, MessageId>, _>>()?;

            let floor = cursors.values().copied().min().unwrap_or(0);
            let mut stmt = conn.prepare(
                "SELECT id, creator_id FROM messages
                 WHERE chat_id = ?1 AND id > ?2 AND is_active = 1
                 ORDER BY id",
            )?;
            let messages = stmt
                .query_map(params![chat_id, floor], |row| {
                    Ok(MessageMeta {
                        id: row.get(0)?,
                        creator_id: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(ChatSnapshot {
                chat_id,
                cursors,
                messages,
            })
        })
    }

    /// One snapshot per chat where the user is an active member, restricted
    /// to that user's cursor and the messages past it.
    pub fn user_snapshots(&self, user_id: UserId) -> StoreResult<Vec<ChatSnapshot>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT cu.chat_id, cu.last_read_message_id
                 FROM chat_users cu JOIN users u ON u.id = cu.user_id
                 WHERE cu.user_id = ?1 AND cu.is_active = 1
                   AND u.is_active = 1 AND u.is_blocked = 0
                 ORDER BY cu.chat_id",
            )?;
            let mut snapshots: Vec<ChatSnapshot> = stmt
                .query_map([user_id], |row| {
                    let chat_id: ChatId = row.get(0)?;
                    let cursor: MessageId = row.get(1)?;
                    Ok(ChatSnapshot {
                        chat_id,
                        cursors: HashMap::from([(user_id, cursor)]),
                        messages: Vec::new(),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let index: HashMap<ChatId, usize> = snapshots
                .iter()
                .enumerate()
                .map(|(i, s)| (s.chat_id, i))
                .collect();

            let mut stmt = conn.prepare(
                "SELECT m.chat_id, m.id, m.creator_id
                 FROM messages m
                 JOIN chat_users cu ON cu.chat_id = m.chat_id AND cu.user_id = ?1 AND cu.is_active = 1
                 WHERE m.id > cu.last_read_message_id AND m.is_active = 1
                 ORDER BY m.chat_id, m.id",
            )?;
            let mut rows = stmt.query([user_id])?;
            while let Some(row) = rows.next()? {
                let chat_id: ChatId = row.get(0)?;
                if let Some(&i) = index.get(&chat_id) {
                    snapshots[i].messages.push(MessageMeta {
                        id: row.get(1)?,
                        creator_id: row.get(2)?,
                    });
                }
            }

            Ok(snapshots)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &Value) -> StoreResult<Option<UserRow>> {
    let sql = format!(
        "SELECT id, username, password, is_active, is_blocked, created_at FROM users WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                is_active: row.get(3)?,
                is_blocked: row.get(4)?,
                created_at: row.get(5)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_image(conn: &Connection, id: ImageId) -> StoreResult<Option<ImageRow>> {
    let row = conn
        .query_row(
            "SELECT id, owner_id, path, compact_path, is_active FROM images WHERE id = ?1",
            [id],
            |row| {
                Ok(ImageRow {
                    id: row.get(0)?,
                    owner_id: row.get(1)?,
                    path: row.get(2)?,
                    compact_path: row.get(3)?,
                    is_active: row.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

fn query_member(conn: &Connection, chat_id: ChatId, user_id: UserId) -> StoreResult<Option<ChatUserRow>> {
    let row = conn
        .query_row(
            "SELECT cu.chat_id, cu.user_id, u.username, cu.is_active AND u.is_active AND NOT u.is_blocked,
                    cu.last_read_message_id
             FROM chat_users cu JOIN users u ON u.id = cu.user_id
             WHERE cu.chat_id = ?1 AND cu.user_id = ?2",
            params![chat_id, user_id],
            map_member,
        )
        .optional()?;
    Ok(row)
}

fn query_chat(conn: &Connection, chat_id: ChatId) -> StoreResult<Option<ChatRow>> {
    let head = conn
        .query_row(
            "SELECT id, last_message_id, created_at FROM chats WHERE id = ?1",
            [chat_id],
            |row| Ok((row.get::<_, ChatId>(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    let Some((id, last_message_id, created_at)) = head else {
        return Ok(None);
    };

    // rowid preserves insertion order: creator first
    let mut stmt = conn.prepare(
        "SELECT cu.chat_id, cu.user_id, u.username, cu.is_active AND u.is_active AND NOT u.is_blocked,
                cu.last_read_message_id
         FROM chat_users cu JOIN users u ON u.id = cu.user_id
         WHERE cu.chat_id = ?1
         ORDER BY cu.rowid",
    )?;
    let members = stmt
        .query_map([id], map_member)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(ChatRow {
        id,
        last_message_id,
        created_at,
        members,
    }))
}

fn query_message(conn: &Connection, message_id: MessageId) -> StoreResult<Option<MessageRow>> {
    let sql = format!(
        "SELECT {} FROM messages m LEFT JOIN images i ON i.id = m.image_id WHERE m.id = ?1",
        MESSAGE_COLUMNS
    );
    let row = conn.query_row(&sql, [message_id], map_message).optional()?;
    Ok(row)
}

fn map_member(row: &Row<'_>) -> rusqlite::Result<ChatUserRow> {
    Ok(ChatUserRow {
        chat_id: row.get(0)?,
        user_id: row.get(1)?,
        username: row.get(2)?,
        is_active: row.get(3)?,
        last_read_message_id: row.get(4)?,
    })
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    let raw_created: String = row.get(3)?;
    let created_at = parse_ts(&raw_created).ok_or_else(|| {
        conversion_error(3, format!("corrupt created_at '{}'", raw_created))
    })?;

    let message_type: String = row.get(4)?;
    let content = match message_type.as_str() {
        "Text" => MessageContent::Text {
            text: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        },
        "Image" => {
            let image_id: Option<ImageId> = row.get(6)?;
            let image_id =
                image_id.ok_or_else(|| conversion_error(6, "image message without image".into()))?;
            MessageContent::Image {
                image: ImageRef {
                    id: image_id,
                    path: row.get(7)?,
                    compact_path: row.get(8)?,
                },
            }
        }
        other => return Err(conversion_error(4, format!("unknown message type '{}'", other))),
    };

    let raw_status: String = row.get(9)?;
    let status = MessageStatus::parse(&raw_status)
        .ok_or_else(|| conversion_error(9, format!("unknown status '{}'", raw_status)))?;

    Ok(MessageRow {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        creator_id: row.get(2)?,
        created_at,
        content,
        status,
        is_active: row.get(10)?,
    })
}

fn conversion_error(column: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, msg.into())
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> rusqlite::Result<Option<T>>;
}

impl<T> OptionalExt<T> for rusqlite::Result<T> {
    fn optional(self) -> rusqlite::Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::badge::total_badge;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn user(db: &Database, name: &str) -> UserId {
        db.create_user(name, "hash").unwrap()
    }

    fn text(s: &str) -> NewMessageContent {
        NewMessageContent::Text(s.to_string())
    }

    fn chat_error(err: crate::StoreError) -> ChatError {
        err.into()
    }

    #[test]
    fn create_chat_puts_creator_first_with_zero_cursors() {
        let db = db();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");

        let chat = db.create_chat(alice, &[bob, bob, alice]).unwrap();

        let ids: Vec<UserId> = chat.members.iter().map(|m| m.user_id).collect();
        assert_eq!(ids, vec![alice, bob]);
        assert!(chat.members.iter().all(|m| m.is_active && m.last_read_message_id == 0));
        assert_eq!(chat.last_message_id, None);
    }

    #[test]
    fn create_chat_rejects_bad_participants() {
        let db = db();
        let alice = user(&db, "alice");
        let carol = user(&db, "carol");
        db.with_conn_mut(|conn| {
            conn.execute("UPDATE users SET is_blocked = 1 WHERE id = ?1", [carol])?;
            Ok(())
        })
        .unwrap();

        for opponents in [vec![], vec![alice], vec![999], vec![carol]] {
            let err = chat_error(db.create_chat(alice, &opponents).unwrap_err());
            assert!(matches!(err, ChatError::InvalidParticipants(_)), "{:?}", opponents);
        }

        let count: i64 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM chats", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn append_updates_last_message() {
        let db = db();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let chat = db.create_chat(alice, &[bob]).unwrap();

        let first = db.append_message(chat.id, alice, &text(" hi ")).unwrap();
        let second = db.append_message(chat.id, bob, &text("hey")).unwrap();

        assert!(second.id > first.id);
        assert_eq!(first.content, MessageContent::Text { text: "hi".into() });
        assert_eq!(first.status, MessageStatus::Sent);
        assert_eq!(db.get_chat(chat.id).unwrap().unwrap().last_message_id, Some(second.id));
    }

    #[test]
    fn append_rejects_outsiders_and_bad_content() {
        let db = db();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let mallory = user(&db, "mallory");
        let chat = db.create_chat(alice, &[bob]).unwrap();

        let err = chat_error(db.append_message(chat.id, mallory, &text("x")).unwrap_err());
        assert!(matches!(err, ChatError::NotAMember { .. }));

        let err = chat_error(db.append_message(chat.id + 100, alice, &text("x")).unwrap_err());
        assert!(matches!(err, ChatError::ChatNotFound(_)));

        let err = chat_error(db.append_message(chat.id, alice, &text("   ")).unwrap_err());
        assert!(matches!(err, ChatError::InvalidMessageContent));

        let err = chat_error(
            db.append_message(chat.id, alice, &NewMessageContent::Image(42)).unwrap_err(),
        );
        assert!(matches!(err, ChatError::ImageNotFound(42)));

        let (messages, total) = db
            .list_messages(chat.id, &MessageFilter { limit: 10, ..Default::default() })
            .unwrap();
        assert!(messages.is_empty());
        assert_eq!(total, 0);
    }

    #[test]
    fn image_messages_carry_the_reference() {
        let db = db();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let chat = db.create_chat(alice, &[bob]).unwrap();
        let image = db.create_image(alice, "uploads/cat.png", Some("uploads/cat_s.png")).unwrap();

        let msg = db
            .append_message(chat.id, alice, &NewMessageContent::Image(image.id))
            .unwrap();
        match msg.content {
            MessageContent::Image { image: r } => assert_eq!(r, image.to_ref()),
            other => panic!("unexpected content {:?}", other),
        }
    }

    #[test]
    fn read_cursor_is_monotonic_and_idempotent() {
        let db = db();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let chat = db.create_chat(alice, &[bob]).unwrap();
        let m1 = db.append_message(chat.id, alice, &text("1")).unwrap();
        let m2 = db.append_message(chat.id, alice, &text("2")).unwrap();
        let m3 = db.append_message(chat.id, alice, &text("3")).unwrap();

        let out = db.advance_read_cursor(chat.id, bob, &ReadSelector::UpTo(m2.id)).unwrap();
        assert_eq!(out.cursor, m2.id);
        assert_eq!(out.newly_read.iter().map(|m| m.id).collect::<Vec<_>>(), vec![m1.id, m2.id]);
        assert_eq!(db.get_message(m1.id).unwrap().unwrap().status, MessageStatus::Read);
        assert_eq!(db.get_message(m3.id).unwrap().unwrap().status, MessageStatus::Sent);

        // Lower bound and repeated ids do nothing
        let out = db.advance_read_cursor(chat.id, bob, &ReadSelector::UpTo(m1.id)).unwrap();
        assert!(out.newly_read.is_empty());
        assert_eq!(out.cursor, m2.id);
        let out = db.advance_read_cursor(chat.id, bob, &ReadSelector::Ids(vec![m1.id, m2.id])).unwrap();
        assert!(out.newly_read.is_empty());

        assert_eq!(db.chat_member(chat.id, bob).unwrap().unwrap().last_read_message_id, m2.id);
    }

    #[test]
    fn own_messages_are_never_read_targets() {
        let db = db();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let chat = db.create_chat(alice, &[bob]).unwrap();
        let mine = db.append_message(chat.id, alice, &text("mine")).unwrap();

        let out = db.advance_read_cursor(chat.id, alice, &ReadSelector::Ids(vec![mine.id])).unwrap();
        assert!(out.newly_read.is_empty());
        assert_eq!(out.cursor, 0);
    }

    #[test]
    fn read_by_outsider_looks_like_missing_chat() {
        let db = db();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let eve = user(&db, "eve");
        let chat = db.create_chat(alice, &[bob]).unwrap();

        let hidden = chat_error(db.advance_read_cursor(chat.id, eve, &ReadSelector::UpTo(10)).unwrap_err());
        let missing = chat_error(db.advance_read_cursor(999, eve, &ReadSelector::UpTo(10)).unwrap_err());
        assert_eq!(hidden.public_message(), ChatError::ChatNotFound(chat.id).public_message());
        assert!(matches!(missing, ChatError::ChatNotFound(999)));
    }

    #[test]
    fn chat_list_puts_messageless_chats_last() {
        let db = db();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let carol = user(&db, "carol");
        let quiet = db.create_chat(alice, &[bob]).unwrap();
        let busy = db.create_chat(alice, &[carol]).unwrap();
        db.append_message(busy.id, carol, &text("ping")).unwrap();

        let (rows, total) = db.list_chats_for_user(alice, 0, 10).unwrap();
        assert_eq!(total, 2);
        assert_eq!(rows.iter().map(|r| r.chat.id).collect::<Vec<_>>(), vec![busy.id, quiet.id]);
        assert!(rows[0].last_message.is_some());
        assert!(rows[1].last_message.is_none());

        let (page, _) = db.list_chats_for_user(alice, 1, 1).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].chat.id, quiet.id);
    }

    #[test]
    fn message_listing_modes() {
        let db = db();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let chat = db.create_chat(alice, &[bob]).unwrap();
        let m1 = db.append_message(chat.id, alice, &text("1")).unwrap();
        let m2 = db.append_message(chat.id, bob, &text("2")).unwrap();
        let m3 = db.append_message(chat.id, alice, &text("3")).unwrap();

        let ids = |rows: Vec<MessageRow>| rows.into_iter().map(|m| m.id).collect::<Vec<_>>();

        let (rows, total) = db
            .list_messages(chat.id, &MessageFilter { limit: 10, ..Default::default() })
            .unwrap();
        assert_eq!(ids(rows), vec![m3.id, m2.id, m1.id]);
        assert_eq!(total, 3);

        let (rows, total) = db
            .list_messages(
                chat.id,
                &MessageFilter { limit: 10, last_id: Some(m3.id), ..Default::default() },
            )
            .unwrap();
        assert_eq!(ids(rows), vec![m2.id, m1.id]);
        assert_eq!(total, 2);

        let (rows, _) = db
            .list_messages(
                chat.id,
                &MessageFilter { limit: 10, start_date: Some(m1.created_at), ..Default::default() },
            )
            .unwrap();
        let rows = ids(rows);
        assert!(!rows.contains(&m1.id));
        assert!(rows.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn snapshots_agree_with_badge_rule() {
        let db = db();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let carol = user(&db, "carol");
        let group = db.create_chat(alice, &[bob, carol]).unwrap();
        let direct = db.create_chat(bob, &[alice]).unwrap();

        let g1 = db.append_message(group.id, bob, &text("g1")).unwrap();
        db.append_message(group.id, carol, &text("g2")).unwrap();
        db.append_message(group.id, alice, &text("g3")).unwrap();
        db.append_message(direct.id, bob, &text("d1")).unwrap();

        let snap = db.chat_snapshot(group.id).unwrap();
        assert_eq!(snap.badge(alice), 2);
        assert_eq!(snap.badge(bob), 2);
        assert_eq!(snap.badge(carol), 2);

        assert_eq!(total_badge(&db.user_snapshots(alice).unwrap(), alice), 3);

        db.advance_read_cursor(group.id, alice, &ReadSelector::UpTo(g1.id)).unwrap();
        assert_eq!(db.chat_snapshot(group.id).unwrap().badge(alice), 1);
        assert_eq!(total_badge(&db.user_snapshots(alice).unwrap(), alice), 2);
    }

    #[test]
    fn blocked_members_drop_out_of_snapshots() {
        let db = db();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let chat = db.create_chat(alice, &[bob]).unwrap();
        db.append_message(chat.id, alice, &text("hi")).unwrap();

        db.set_user_blocked(bob, true).unwrap();
        let snap = db.chat_snapshot(chat.id).unwrap();
        assert!(snap.cursor(bob).is_none());
        assert!(snap.cursor(alice).is_some());
        assert!(db.user_snapshots(bob).unwrap().is_empty());

        db.set_user_blocked(bob, false).unwrap();
        assert_eq!(db.chat_snapshot(chat.id).unwrap().badge(bob), 1);
        assert!(matches!(
            chat_error(db.set_user_blocked(9_999, true).unwrap_err()),
            ChatError::UserNotFound(9_999)
        ));
    }

    #[test]
    fn devices_are_listed_once_per_token() {
        let db = db();
        let alice = user(&db, "alice");
        db.register_device(alice, "tok-1").unwrap();
        db.register_device(alice, "tok-1").unwrap();
        db.register_device(alice, "tok-2").unwrap();

        assert_eq!(db.active_device_tokens(alice).unwrap(), vec!["tok-1", "tok-2"]);
    }
}
