// PostgREST-backed session store (Supabase-compatible `sessions` table)

use super::{ChangeFeed, Datastore, DatastoreError, SessionSubscription};
use crate::models::{NewSession, Session, SessionPatch, WorkflowState};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::Mutex;

const REST_PATH: &str = "rest/v1";

/// Row inserted for a new session; the database assigns the id
#[derive(Debug, Serialize)]
struct InsertRow<'a> {
    user_id: &'a str,
    chat_history: Vec<()>,
    current_state: WorkflowState,
    research_results: Vec<()>,
    research_counter: u32,
    company_info: &'a str,
    report_final: &'a str,
}

/// Session store talking to a PostgREST endpoint
///
/// Change notifications are published locally after every successful write
/// made through this handle.
pub struct PostgrestDatastore {
    client: Client,
    base_url: String,
    api_key: String,
    table: String,
    write_lock: Mutex<()>,
    feed: ChangeFeed,
}

impl PostgrestDatastore {
    /// Create a store for `base_url` (e.g. `https://abc.supabase.co`)
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        table: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DatastoreError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DatastoreError::Backend(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            table: table.into(),
            write_lock: Mutex::new(()),
            feed: ChangeFeed::new(),
        })
    }

    /// URL of the table endpoint
    pub fn table_url(&self) -> String {
        format!(
            "{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            REST_PATH,
            self.table
        )
    }

    /// Request against the single row with the given id. The filter goes
    /// through `query` so ids are percent-encoded.
    fn row_request(&self, method: Method, id: &str) -> RequestBuilder {
        self.client
            .request(method, self.table_url())
            .query(&[("id", format!("eq.{}", id))])
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Accept", "application/json")
    }

    /// Decode a `return=representation` response into exactly one row
    async fn single_row(&self, response: Response, id: &str) -> Result<Session, DatastoreError> {
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(DatastoreError::Backend(format!(
                "PostgREST error ({}): {}",
                status, text
            )));
        }

        let mut rows: Vec<Session> = response
            .json()
            .await
            .map_err(|e| DatastoreError::Serialization(format!("Failed to parse rows: {}", e)))?;

        match rows.len() {
            0 => Err(DatastoreError::NotFound(id.to_string())),
            1 => Ok(rows.remove(0)),
            n => Err(DatastoreError::Backend(format!(
                "Expected one row for id {}, got {}",
                id, n
            ))),
        }
    }
}

#[async_trait]
impl Datastore for PostgrestDatastore {
    async fn read_session(&self, id: &str) -> Result<Session, DatastoreError> {
        let response = self
            .authorized(self.row_request(Method::GET, id).query(&[("select", "*")]))
            .send()
            .await
            .map_err(|e| DatastoreError::Backend(format!("Failed to read session: {}", e)))?;

        self.single_row(response, id).await
    }

    async fn update_session(
        &self,
        id: &str,
        patch: &SessionPatch,
    ) -> Result<Session, DatastoreError> {
        let _guard = self.write_lock.lock().await;

        let response = self
            .authorized(self.row_request(Method::PATCH, id))
            .header("Prefer", "return=representation")
            .json(patch)
            .send()
            .await
            .map_err(|e| DatastoreError::Backend(format!("Failed to update session: {}", e)))?;

        let session = self.single_row(response, id).await?;
        self.feed.publish(&session);
        Ok(session)
    }

    async fn insert_session(&self, new_session: &NewSession) -> Result<Session, DatastoreError> {
        let row = InsertRow {
            user_id: &new_session.user_id,
            chat_history: Vec::new(),
            current_state: WorkflowState::WaitingForInfo,
            research_results: Vec::new(),
            research_counter: 0,
            company_info: "",
            report_final: "",
        };

        let response = self
            .authorized(self.client.post(self.table_url()))
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await
            .map_err(|e| DatastoreError::Backend(format!("Failed to insert session: {}", e)))?;

        let session = self.single_row(response, "<new>").await?;
        log::info!("Inserted session {} into {}", session.id, self.table);
        Ok(session)
    }

    fn subscribe(&self, id: &str) -> SessionSubscription {
        self.feed.subscribe(id)
    }
}
