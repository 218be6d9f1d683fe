//! Supabase / PostgREST backend
//!
//! Uses a long-lived reqwest::Client for connection pooling.

use super::{escape_like, procedures, FinancialGateway};
use crate::error::AssistantError;
use crate::models::{
    ConversationLogEntry, FinancialSummaryRow, OverspentPackageRow, ProjectBudgetRow,
    ProjectRef, TradeBudgetRow, TradePackageRow,
};
use crate::Result;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error};
use uuid::Uuid;

pub struct RestGateway {
    client: Client,
    base_url: String,
    service_key: String,
}

impl RestGateway {
    pub fn new(base_url: String, service_key: String) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
        })
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    async fn rpc<T: DeserializeOwned>(&self, procedure: &str, params: Value) -> Result<Vec<T>> {
        let url = format!("{}/rest/v1/rpc/{}", self.base_url, procedure);
        debug!(procedure, "Calling data service RPC");

        let response = self
            .authorized(self.client.post(url))
            .json(&params)
            .send()
            .await
            .map_err(|e| {
                error!(procedure, error = %e, "Data service request failed");
                AssistantError::GatewayError(format!("Request to {} failed: {}", procedure, e))
            })?;

        let body = Self::checked_body(procedure, response).await?;

        // A function returning a single composite yields an object, not an array
        let rows = match body {
            Value::Null => Vec::new(),
            Value::Array(_) => serde_json::from_value(body)?,
            single => vec![serde_json::from_value(single)?],
        };

        Ok(rows)
    }

    async fn checked_body(context: &str, response: Response) -> Result<Value> {
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| format!("Data service returned {} for {}", status, context));
            error!(context, %status, "Data service error: {}", text);
            return Err(AssistantError::GatewayError(message));
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }

        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl FinancialGateway for RestGateway {
    async fn budget_by_trade(
        &self,
        org_id: Uuid,
        project_id: Option<Uuid>,
    ) -> Result<Vec<TradeBudgetRow>> {
        self.rpc(
            procedures::BUDGET_BY_TRADE,
            json!({ "p_org_id": org_id, "p_project_id": project_id }),
        )
        .await
    }

    async fn budget_by_project(&self, org_id: Uuid) -> Result<Vec<ProjectBudgetRow>> {
        self.rpc(procedures::BUDGET_BY_PROJECT, json!({ "p_org_id": org_id }))
            .await
    }

    async fn overspent_packages(
        &self,
        org_id: Uuid,
        project_id: Option<Uuid>,
    ) -> Result<Vec<OverspentPackageRow>> {
        self.rpc(
            procedures::OVERSPENT_PACKAGES,
            json!({ "p_org_id": org_id, "p_project_id": project_id }),
        )
        .await
    }

    async fn financial_summary(
        &self,
        org_id: Uuid,
        project_id: Option<Uuid>,
    ) -> Result<Vec<FinancialSummaryRow>> {
        self.rpc(
            procedures::FINANCIAL_SUMMARY,
            json!({ "p_org_id": org_id, "p_project_id": project_id }),
        )
        .await
    }

    async fn packages_by_trade(
        &self,
        org_id: Uuid,
        trade_name: &str,
        project_id: Option<Uuid>,
    ) -> Result<Vec<TradePackageRow>> {
        self.rpc(
            procedures::PACKAGES_BY_TRADE,
            json!({
                "p_org_id": org_id,
                "p_trade_name": trade_name,
                "p_project_id": project_id,
            }),
        )
        .await
    }

    async fn resolve_project(&self, org_id: Uuid, fragment: &str) -> Result<Option<Uuid>> {
        let url = format!("{}/rest/v1/projects", self.base_url);
        let org_filter = format!("eq.{}", org_id);
        let name_filter = format!("ilike.*{}*", escape_like(fragment));

        let response = self
            .authorized(self.client.get(url))
            .query(&[
                ("select", "id,name"),
                ("org_id", org_filter.as_str()),
                ("name", name_filter.as_str()),
                ("limit", "1"),
            ])
            .send()
            .await
            .map_err(|e| AssistantError::GatewayError(format!("Project lookup failed: {}", e)))?;

        let body = Self::checked_body("projects", response).await?;
        let projects: Vec<ProjectRef> = match body {
            Value::Null => Vec::new(),
            other => serde_json::from_value(other)?,
        };

        Ok(projects.into_iter().next().map(|p| p.id))
    }

    async fn append_chat_log(&self, entry: &ConversationLogEntry) -> Result<()> {
        let url = format!("{}/rest/v1/chat_logs", self.base_url);

        let response = self
            .authorized(self.client.post(url))
            .header("Prefer", "return=minimal")
            .json(entry)
            .send()
            .await
            .map_err(|e| AssistantError::GatewayError(format!("Chat log insert failed: {}", e)))?;

        Self::checked_body("chat_logs", response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use httpmock::prelude::*;

    const ORG: Uuid = Uuid::from_u128(0xa1b2c3d4_0000_0000_0000_000000000001);

    fn gateway(server: &MockServer) -> RestGateway {
        RestGateway::new(server.base_url(), "service-key".to_string()).unwrap()
    }

    #[tokio::test]
    async fn test_rpc_sends_tenant_and_null_project() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/rest/v1/rpc/get_budget_by_trade")
                    .header("apikey", "service-key")
                    .header("authorization", "Bearer service-key")
                    .json_body(json!({ "p_org_id": ORG, "p_project_id": null }));
                then.status(200).json_body(json!([{
                    "trade_name": "Masonry",
                    "csi_code": "04",
                    "package_count": 2,
                    "original_budget": 1000000,
                    "approved_changes": 25000,
                    "revised_budget": 1025000,
                    "committed": 900000,
                    "invoiced": 400000,
                    "paid": 350000,
                    "remaining": 125000
                }]));
            })
            .await;

        let rows = gateway(&server).budget_by_trade(ORG, None).await.unwrap();

        mock.assert_async().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].trade_name, "Masonry");
        assert_eq!(rows[0].remaining, 125_000.0);
    }

    #[tokio::test]
    async fn test_rpc_error_carries_service_message() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/rest/v1/rpc/get_overspent_packages");
                then.status(404).json_body(json!({
                    "code": "PGRST202",
                    "message": "Could not find the function public.get_overspent_packages"
                }));
            })
            .await;

        let err = gateway(&server)
            .overspent_packages(ORG, None)
            .await
            .unwrap_err();

        assert_eq!(
            err.payload_message(),
            "Could not find the function public.get_overspent_packages"
        );
    }

    #[tokio::test]
    async fn test_single_object_summary_is_wrapped() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/rest/v1/rpc/get_financial_summary");
                then.status(200).json_body(json!({
                    "total_original_budget": 78700000,
                    "total_approved_changes": 1200000,
                    "total_revised_budget": 79900000,
                    "total_committed": 61000000,
                    "total_invoiced": 30000000,
                    "total_paid": 25000000,
                    "total_remaining": 18900000,
                    "pct_committed": 76.3,
                    "pct_invoiced": 37.5,
                    "pct_paid": 31.3,
                    "open_packages": 12,
                    "overspent_packages": 2
                }));
            })
            .await;

        let rows = gateway(&server).financial_summary(ORG, None).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].open_packages, 12);
    }

    #[tokio::test]
    async fn test_resolve_project_uses_ilike_filter() {
        let server = MockServer::start_async().await;
        let project_id = Uuid::new_v4();
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/rest/v1/projects")
                    .query_param("select", "id,name")
                    .query_param("org_id", format!("eq.{}", ORG))
                    .query_param("name", "ilike.*Downtown*")
                    .query_param("limit", "1");
                then.status(200)
                    .json_body(json!([{ "id": project_id, "name": "Downtown Office Tower" }]));
            })
            .await;

        let resolved = gateway(&server)
            .resolve_project(ORG, "Downtown")
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(resolved, Some(project_id));
    }

    #[tokio::test]
    async fn test_resolve_project_no_match() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/rest/v1/projects");
                then.status(200).json_body(json!([]));
            })
            .await;

        let resolved = gateway(&server).resolve_project(ORG, "airport").await.unwrap();
        assert_eq!(resolved, None);
    }

    #[tokio::test]
    async fn test_append_chat_log_posts_entry() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/rest/v1/chat_logs")
                    .header("prefer", "return=minimal")
                    .body_contains("\"question\":\"Which packages are overspent?\"");
                then.status(201);
            })
            .await;

        let entry = ConversationLogEntry {
            org_id: ORG,
            question: "Which packages are overspent?".into(),
            tool_calls: vec![],
            response: "None are overspent.".into(),
            model: "anthropic/claude-sonnet-4".into(),
            created_at: Utc::now(),
        };

        gateway(&server).append_chat_log(&entry).await.unwrap();
        mock.assert_async().await;
    }
}
