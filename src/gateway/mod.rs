//! Financial Data Gateway
//!
//! Narrow client to the remote data service. Five read-only aggregate
//! queries, one project-name lookup and one append-only log write. All
//! budget math is done by the service; rows are relayed as-is.

use crate::config::GatewayConfig;
use crate::models::{
    ConversationLogEntry, FinancialSummaryRow, OverspentPackageRow, ProjectBudgetRow,
    TradeBudgetRow, TradePackageRow,
};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub mod memory;
pub mod postgres;
pub mod rest;

pub use memory::InMemoryGateway;
pub use postgres::PostgresGateway;
pub use rest::RestGateway;

/// Stored procedures exposed by the data service.
pub mod procedures {
    pub const BUDGET_BY_TRADE: &str = "get_budget_by_trade";
    pub const BUDGET_BY_PROJECT: &str = "get_budget_by_project";
    pub const OVERSPENT_PACKAGES: &str = "get_overspent_packages";
    pub const FINANCIAL_SUMMARY: &str = "get_financial_summary";
    pub const PACKAGES_BY_TRADE: &str = "get_packages_by_trade";
}

/// Trait for the data service boundary
#[async_trait]
pub trait FinancialGateway: Send + Sync {
    async fn budget_by_trade(
        &self,
        org_id: Uuid,
        project_id: Option<Uuid>,
    ) -> Result<Vec<TradeBudgetRow>>;

    async fn budget_by_project(&self, org_id: Uuid) -> Result<Vec<ProjectBudgetRow>>;

    async fn overspent_packages(
        &self,
        org_id: Uuid,
        project_id: Option<Uuid>,
    ) -> Result<Vec<OverspentPackageRow>>;

    async fn financial_summary(
        &self,
        org_id: Uuid,
        project_id: Option<Uuid>,
    ) -> Result<Vec<FinancialSummaryRow>>;

    async fn packages_by_trade(
        &self,
        org_id: Uuid,
        trade_name: &str,
        project_id: Option<Uuid>,
    ) -> Result<Vec<TradePackageRow>>;

    /// Case-insensitive substring match on project name, first match wins.
    async fn resolve_project(&self, org_id: Uuid, fragment: &str) -> Result<Option<Uuid>>;

    async fn append_chat_log(&self, entry: &ConversationLogEntry) -> Result<()>;
}

/// Build the gateway selected by configuration.
pub fn from_config(config: &GatewayConfig) -> Result<Arc<dyn FinancialGateway>> {
    match config {
        GatewayConfig::Rest { url, service_key } => {
            info!(url = %url, "Financial gateway backend: rest");
            Ok(Arc::new(RestGateway::new(url.clone(), service_key.clone())?))
        }
        GatewayConfig::Postgres { database_url } => {
            info!("Financial gateway backend: postgres");
            Ok(Arc::new(PostgresGateway::connect_lazy(database_url)?))
        }
        GatewayConfig::Demo => {
            info!("Financial gateway backend: in-memory demo data");
            Ok(Arc::new(InMemoryGateway::with_demo_data()))
        }
    }
}

/// Escape `%`, `_` and `\` so a user fragment is matched literally by ILIKE.
pub(crate) fn escape_like(fragment: &str) -> String {
    let mut out = String::with_capacity(fragment.len());
    for ch in fragment.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}
