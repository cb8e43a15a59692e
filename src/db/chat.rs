use rusqlite::{params, Connection, Result as SqlResult, Row};

use crate::models::{ChatRole, ConversationEntry};

fn role_str(role: ChatRole) -> &'static str {
    match role {
        ChatRole::User => "user",
        ChatRole::Ai => "ai",
    }
}

fn row_to_entry(row: &Row<'_>) -> SqlResult<ConversationEntry> {
    let role: String = row.get(0)?;
    Ok(ConversationEntry {
        role: if role == "user" { ChatRole::User } else { ChatRole::Ai },
        content: row.get(1)?,
        timestamp: row.get(2)?,
        tool_name: row.get(3)?,
        receipt_id: row.get(4)?,
    })
}

pub fn insert_message(
    conn: &Connection,
    project_id: &str,
    vendor_id: &str,
    entry: &ConversationEntry,
) -> SqlResult<()> {
    conn.execute(
        "INSERT INTO chat_messages (project_id, vendor_id, role, content, timestamp, tool_name, receipt_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            project_id,
            vendor_id,
            role_str(entry.role),
            entry.content,
            entry.timestamp,
            entry.tool_name,
            entry.receipt_id
        ],
    )?;
    Ok(())
}

/// Deletes everything but the newest `keep` messages of the ledger. Returns the number removed.
pub fn trim_history(conn: &Connection, project_id: &str, vendor_id: &str, keep: usize) -> SqlResult<usize> {
    conn.execute(
        "DELETE FROM chat_messages
         WHERE project_id = ?1 AND vendor_id = ?2 AND id NOT IN (
             SELECT id FROM chat_messages
             WHERE project_id = ?1 AND vendor_id = ?2
             ORDER BY id DESC LIMIT ?3
         )",
        params![project_id, vendor_id, keep as i64],
    )
}

/// Oldest first. With a limit, only the newest `limit` messages are returned.
pub fn list_messages(
    conn: &Connection,
    project_id: &str,
    vendor_id: &str,
    limit: Option<usize>,
) -> SqlResult<Vec<ConversationEntry>> {
    let limit = limit.map(|l| l as i64).unwrap_or(-1);
    let mut stmt = conn.prepare(
        "SELECT role, content, timestamp, tool_name, receipt_id FROM (
             SELECT id, role, content, timestamp, tool_name, receipt_id FROM chat_messages
             WHERE project_id = ?1 AND vendor_id = ?2
             ORDER BY id DESC LIMIT ?3
         ) ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![project_id, vendor_id, limit], row_to_entry)?;
    rows.collect()
}
