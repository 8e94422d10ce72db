use async_trait::async_trait;
use parley_common::{Agent, AgentId, Error, OwnerId, Result};
use rusqlite::{OptionalExtension, Row, params};

use crate::sqlite::SqliteStore;
use crate::traits::AgentStore;

const AGENT_COLUMNS: &str = "id, owner_id, name, model, system_prompt, temperature, max_tokens";

fn agent_from_row(row: &Row<'_>) -> rusqlite::Result<Agent> {
    Ok(Agent {
        id: AgentId::from(row.get::<_, String>(0)?),
        owner_id: OwnerId::from(row.get::<_, String>(1)?),
        name: row.get(2)?,
        model: row.get(3)?,
        system_prompt: row.get(4)?,
        temperature: row.get(5)?,
        max_tokens: row.get(6)?,
    })
}

#[async_trait]
impl AgentStore for SqliteStore {
    async fn get_agent(&self, agent_id: &AgentId, owner_id: &OwnerId) -> Result<Option<Agent>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = ?1 AND owner_id = ?2"),
                params![agent_id.as_str(), owner_id.as_str()],
                agent_from_row,
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to load agent: {e}")))
        })
    }

    async fn create_agent(&self, agent: &Agent) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO agents (id, owner_id, name, model, system_prompt, temperature, max_tokens)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    agent.id.as_str(),
                    agent.owner_id.as_str(),
                    agent.name,
                    agent.model,
                    agent.system_prompt,
                    agent.temperature,
                    agent.max_tokens,
                ],
            )
            .map_err(|e| Error::Database(format!("failed to create agent: {e}")))?;
            Ok(())
        })
    }

    async fn list_agents(&self, owner_id: &OwnerId) -> Result<Vec<Agent>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {AGENT_COLUMNS} FROM agents WHERE owner_id = ?1 ORDER BY rowid ASC"
                ))
                .map_err(|e| Error::Database(format!("failed to prepare agent query: {e}")))?;

            let rows = stmt
                .query_map(params![owner_id.as_str()], agent_from_row)
                .map_err(|e| Error::Database(format!("failed to list agents: {e}")))?;

            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| Error::Database(format!("failed to read agent row: {e}")))
        })
    }
}
