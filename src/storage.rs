//! SQLite persistence for conversations.
//!
//! Messages are stored position-ordered per conversation and written
//! wholesale on save (delete then reinsert inside one transaction), so
//! the stored transcript always matches the in-memory one exactly.

use crate::error::Result;
use crate::models::{Conversation, Message, ToolCall};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub status: String,
    pub updated_at: String,
    pub message_count: i64,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub conversation_id: String,
    pub title: String,
    pub snippet: String,
}

pub struct ChatStorage {
    conn: Connection,
}

impl ChatStorage {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let storage = ChatStorage { conn };
        storage.init_schema()?;
        Ok(storage)
    }

    pub fn in_memory() -> Result<Self> {
        let storage = ChatStorage {
            conn: Connection::open_in_memory()?,
        };
        storage.init_schema()?;
        Ok(storage)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS conversations (
                id          TEXT PRIMARY KEY,
                title       TEXT NOT NULL,
                status      TEXT NOT NULL DEFAULT 'active',
                created_at  TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE TABLE IF NOT EXISTS messages (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                role            TEXT NOT NULL,
                content         TEXT,
                reasoning       TEXT,
                tool_calls      TEXT,
                tool_call_id    TEXT,
                position        INTEGER NOT NULL,
                created_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_messages_conversation
                ON messages(conversation_id, position);",
        )?;
        Ok(())
    }

    /// Upsert the conversation row and rewrite its messages.
    pub fn save_conversation(&mut self, conversation: &Conversation) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO conversations (id, title, status) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                status = excluded.status,
                updated_at = datetime('now')",
            params![conversation.id, conversation.title, conversation.status],
        )?;
        tx.execute(
            "DELETE FROM messages WHERE conversation_id = ?1",
            params![conversation.id],
        )?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO messages
                    (conversation_id, role, content, reasoning, tool_calls, tool_call_id, position)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for (position, message) in conversation.messages.iter().enumerate() {
                let tool_calls = match &message.tool_calls {
                    Some(calls) => Some(serde_json::to_string(calls)?),
                    None => None,
                };
                insert.execute(params![
                    conversation.id,
                    message.role,
                    message.content,
                    message.reasoning,
                    tool_calls,
                    message.tool_call_id,
                    position as i64,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, title, status FROM conversations WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        let (id, title, status) = match row {
            Some(row) => row,
            None => return Ok(None),
        };
        let messages = self.get_messages(&id)?;
        Ok(Some(Conversation {
            id,
            title,
            status,
            messages,
        }))
    }

    pub fn get_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let mut stmt = self.conn.prepare(
            "SELECT role, content, reasoning, tool_calls, tool_call_id
             FROM messages WHERE conversation_id = ?1 ORDER BY position",
        )?;
        let rows = stmt.query_map(params![conversation_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (role, content, reasoning, tool_calls_json, tool_call_id) = row?;
            let tool_calls: Option<Vec<ToolCall>> = match tool_calls_json {
                Some(json) => Some(serde_json::from_str(&json)?),
                None => None,
            };
            messages.push(Message {
                role,
                content,
                reasoning,
                images: None,
                tool_calls,
                tool_call_id,
            });
        }
        Ok(messages)
    }

    pub fn has_conversation(&self, id: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM conversations WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.id, c.title, c.status, c.updated_at,
                    (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id)
             FROM conversations c
             ORDER BY c.updated_at DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ConversationSummary {
                id: row.get(0)?,
                title: row.get(1)?,
                status: row.get(2)?,
                updated_at: row.get(3)?,
                message_count: row.get(4)?,
            })
        })?;
        let mut summaries = Vec::new();
        for row in rows {
            summaries.push(row?);
        }
        Ok(summaries)
    }

    pub fn delete_conversation(&self, id: &str) -> Result<bool> {
        self.conn
            .execute("DELETE FROM messages WHERE conversation_id = ?1", params![id])?;
        let deleted = self
            .conn
            .execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    pub fn clear(&self) -> Result<()> {
        self.conn.execute_batch(
            "DELETE FROM messages;
             DELETE FROM conversations;",
        )?;
        Ok(())
    }

    /// Substring search over message content and reasoning. One hit per
    /// conversation, carrying the first matching line as a snippet.
    pub fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let pattern = format!("%{}%", query.replace('%', "\\%").replace('_', "\\_"));
        let mut stmt = self.conn.prepare(
            "SELECT c.id, c.title, MIN(m.position),
                    COALESCE(m.content, m.reasoning, '')
             FROM messages m
             JOIN conversations c ON c.id = m.conversation_id
             WHERE m.content LIKE ?1 ESCAPE '\\'
                OR m.reasoning LIKE ?1 ESCAPE '\\'
             GROUP BY c.id
             ORDER BY c.updated_at DESC",
        )?;
        let rows = stmt.query_map(params![pattern], |row| {
            Ok(SearchHit {
                conversation_id: row.get(0)?,
                title: row.get(1)?,
                snippet: snippet_around(&row.get::<_, String>(3)?, 120),
            })
        })?;
        let mut hits = Vec::new();
        for row in rows {
            hits.push(row?);
        }
        Ok(hits)
    }
}

fn snippet_around(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}
