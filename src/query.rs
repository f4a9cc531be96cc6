// src/query.rs
use std::sync::{Arc, Mutex};

use eyre::{eyre, Result};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::task;
use tracing::{error, info};

use crate::db::{self, StoredCounts};
use crate::llm::{ChatTurn, TextGenerator};
use crate::models::WalletSnapshot;

/// Shared handle to the queryable database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open the database and make sure the wallet schema exists.
    pub fn open(path: &str) -> Result<Self> {
        let conn = db::connect(path)?;
        db::run_migrations(&conn)?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run `f` on the connection off the async runtime.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| eyre!("database mutex poisoned"))?;
            f(&guard)
        })
        .await?
    }

    pub async fn schema(&self) -> Result<(Vec<String>, String)> {
        self.with_conn(|c| Ok((db::table_names(c)?, db::table_info(c)?)))
            .await
    }

    pub async fn store_snapshot(&self, snapshot: WalletSnapshot) -> Result<StoredCounts> {
        self.with_conn(move |c| db::store_snapshot(c, &snapshot)).await
    }

    pub async fn execute(&self, sql: String) -> Result<Vec<Map<String, Value>>> {
        self.with_conn(move |c| db::execute(c, &sql)).await
    }
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub success: bool,
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Vec<Map<String, Value>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DatabaseInfo {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dialect: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tables: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Drop markdown code fences the model tends to wrap SQL in.
pub fn strip_code_fences(raw: &str) -> String {
    raw.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn render_rows(rows: &[Map<String, Value>]) -> String {
    if rows.is_empty() {
        return "(no rows)".to_string();
    }
    rows.iter()
        .map(|r| Value::Object(r.clone()).to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Natural language → SQL → rows → natural language answer.
pub struct NlQueryService {
    db: Database,
    llm: Arc<dyn TextGenerator>,
}

impl NlQueryService {
    pub fn new(db: Database, llm: Arc<dyn TextGenerator>) -> Self {
        Self { db, llm }
    }

    pub async fn generate_sql(&self, question: &str) -> Result<String> {
        let (tables, table_info) = self.db.schema().await?;
        let prompt = format!(
            "Available Tables: {tables:?}\nTable Info:\n{table_info}\n\n\
             Generate a **valid SQLite SQL query only** (no markdown, no explanations)\n\
             for the following request:\n{question}"
        );
        let raw = self.llm.generate(None, &[ChatTurn::user(prompt)]).await?;
        let sql = strip_code_fences(&raw);
        info!(question, sql = %sql, "generated SQL");
        Ok(sql)
    }

    pub async fn rephrase(&self, question: &str, sql: &str, rows: &[Map<String, Value>]) -> Result<String> {
        let prompt = format!(
            "Given the user question, SQL query, and SQL result, provide a clear and concise \
             natural language answer.\n\nQuestion: {question}\nSQL Query: {sql}\nSQL Result:\n{}\n\nAnswer:",
            render_rows(rows)
        );
        let answer = self.llm.generate(None, &[ChatTurn::user(prompt)]).await?;
        Ok(answer.trim().to_string())
    }

    async fn run(&self, question: &str) -> Result<(String, Vec<Map<String, Value>>, String)> {
        let sql = self.generate_sql(question).await?;
        db::ensure_single_statement(&sql)?;
        let rows = self
            .db
            .execute(sql.clone())
            .await
            .map_err(|e| eyre!("Database query execution failed: {e}"))?;
        let answer = self.rephrase(question, &sql, &rows).await?;
        Ok((sql, rows, answer))
    }

    /// Full pipeline. Failures are reported in the response body, not raised.
    pub async fn answer(&self, question: &str) -> QueryResponse {
        match self.run(question).await {
            Ok((sql, rows, answer)) => QueryResponse {
                success: true,
                question: question.to_string(),
                sql_query: Some(sql),
                result: Some(rows),
                answer: Some(answer),
                error: None,
            },
            Err(e) => {
                error!(question, error = %e, "query pipeline failed");
                QueryResponse {
                    success: false,
                    question: question.to_string(),
                    sql_query: None,
                    result: None,
                    answer: None,
                    error: Some(format!("{e:#}")),
                }
            }
        }
    }
}

pub async fn database_info(db: &Database) -> DatabaseInfo {
    match db.schema().await {
        Ok((tables, _)) => DatabaseInfo {
            connected: true,
            dialect: Some("sqlite".to_string()),
            tables: Some(tables),
            error: None,
        },
        Err(e) => DatabaseInfo {
            connected: false,
            dialect: None,
            tables: None,
            error: Some(e.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{migrated, sample, sample_snapshot, SNAPSHOT_WALLET};
    use crate::llm::tests::ScriptedLlm;

    fn service(answers: &[&str]) -> (NlQueryService, Arc<ScriptedLlm>) {
        let llm = Arc::new(ScriptedLlm::new(answers));
        let svc = NlQueryService::new(Database::from_connection(sample()), llm.clone());
        (svc, llm)
    }

    #[test]
    fn strips_fences() {
        assert_eq!(
            strip_code_fences("```sql\nSELECT * FROM wallets;\n```"),
            "SELECT * FROM wallets;"
        );
        assert_eq!(strip_code_fences("  SELECT 1  "), "SELECT 1");
    }

    #[tokio::test]
    async fn answers_question_end_to_end() {
        let (svc, llm) = service(&[
            "```sql\nSELECT address FROM wallets WHERE label = 'treasury'\n```",
            "The treasury wallet is 0xabc.",
        ]);
        let resp = svc.answer("Which wallet is the treasury?").await;

        assert!(resp.success, "{:?}", resp.error);
        assert_eq!(
            resp.sql_query.as_deref(),
            Some("SELECT address FROM wallets WHERE label = 'treasury'")
        );
        let rows = resp.result.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["address"], "0xabc");
        assert_eq!(resp.answer.as_deref(), Some("The treasury wallet is 0xabc."));

        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[0][0].content.contains("CREATE TABLE wallets"));
        assert!(prompts[1][0].content.contains("0xabc"));
    }

    #[tokio::test]
    async fn loaded_snapshot_is_queryable() {
        let db = Database::from_connection(migrated());
        db.store_snapshot(sample_snapshot("0x0f")).await.unwrap();

        let sql = format!(
            "SELECT contract_address, raw_balance FROM token_balances WHERE wallet_address = '{SNAPSHOT_WALLET}'"
        );
        let llm = Arc::new(ScriptedLlm::new(&[sql.as_str(), "The wallet holds one USDC position."]));
        let svc = NlQueryService::new(db, llm.clone());

        let resp = svc.answer("What tokens does the wallet hold?").await;
        assert!(resp.success, "{:?}", resp.error);
        let rows = resp.result.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["contract_address"], "0xusdc");
        assert_eq!(rows[0]["raw_balance"], "0x0f");

        // schema context offered to the model is the wallet schema
        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[0][0].content.contains("raw_balance"));
        assert!(prompts[0][0].content.contains("\"nfts\""));
    }

    #[tokio::test]
    async fn bad_sql_is_reported_not_raised() {
        let (svc, _) = service(&["SELECT nope FROM missing_table"]);
        let resp = svc.answer("anything").await;
        assert!(!resp.success);
        assert!(resp.error.unwrap().contains("Database query execution failed"));
        assert!(resp.sql_query.is_none());
    }

    #[tokio::test]
    async fn database_info_lists_tables() {
        let info = database_info(&Database::from_connection(sample())).await;
        assert!(info.connected);
        assert_eq!(info.dialect.as_deref(), Some("sqlite"));
        assert_eq!(info.tables.unwrap(), vec!["transfers", "wallets"]);
    }
}
