//! Direct Postgres backend
//!
//! Calls the same stored functions the REST backend reaches through
//! PostgREST. Numeric columns are cast to float8 so rows decode without a
//! decimal crate.

use super::{escape_like, procedures, FinancialGateway};
use crate::error::AssistantError;
use crate::models::{
    ConversationLogEntry, FinancialSummaryRow, OverspentPackageRow, ProjectBudgetRow,
    ProjectRef, TradeBudgetRow, TradePackageRow,
};
use crate::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

pub struct PostgresGateway {
    pool: PgPool,
}

impl PostgresGateway {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build a pool that connects on first query.
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)
            .map_err(|e| {
                AssistantError::ConfigError(format!("Invalid DATABASE_URL: {}", e))
            })?;

        Ok(Self::new(pool))
    }
}

fn query_error(procedure: &str, e: sqlx::Error) -> AssistantError {
    AssistantError::GatewayError(format!("{} failed: {}", procedure, e))
}

fn budget_by_trade_sql() -> String {
    format!(
        r#"
        SELECT trade_name, csi_code, package_count::int8 AS package_count,
               original_budget::float8 AS original_budget,
               approved_changes::float8 AS approved_changes,
               revised_budget::float8 AS revised_budget,
               committed::float8 AS committed,
               invoiced::float8 AS invoiced,
               paid::float8 AS paid,
               remaining::float8 AS remaining
        FROM {}($1, $2)
        "#,
        procedures::BUDGET_BY_TRADE
    )
}

fn budget_by_project_sql() -> String {
    format!(
        r#"
        SELECT project_name, project_code, project_status,
               original_budget::float8 AS original_budget,
               approved_changes::float8 AS approved_changes,
               revised_budget::float8 AS revised_budget,
               committed::float8 AS committed,
               invoiced::float8 AS invoiced,
               paid::float8 AS paid,
               remaining::float8 AS remaining,
               pct_spent::float8 AS pct_spent
        FROM {}($1)
        "#,
        procedures::BUDGET_BY_PROJECT
    )
}

fn overspent_packages_sql() -> String {
    format!(
        r#"
        SELECT project_name, trade_name, package_name,
               revised_budget::float8 AS revised_budget,
               committed::float8 AS committed,
               overspent_amount::float8 AS overspent_amount,
               overspent_pct::float8 AS overspent_pct
        FROM {}($1, $2)
        "#,
        procedures::OVERSPENT_PACKAGES
    )
}

fn financial_summary_sql() -> String {
    format!(
        r#"
        SELECT total_original_budget::float8 AS total_original_budget,
               total_approved_changes::float8 AS total_approved_changes,
               total_revised_budget::float8 AS total_revised_budget,
               total_committed::float8 AS total_committed,
               total_invoiced::float8 AS total_invoiced,
               total_paid::float8 AS total_paid,
               total_remaining::float8 AS total_remaining,
               pct_committed::float8 AS pct_committed,
               pct_invoiced::float8 AS pct_invoiced,
               pct_paid::float8 AS pct_paid,
               open_packages::int8 AS open_packages,
               overspent_packages::int8 AS overspent_packages
        FROM {}($1, $2)
        "#,
        procedures::FINANCIAL_SUMMARY
    )
}

fn packages_by_trade_sql() -> String {
    format!(
        r#"
        SELECT project_name, package_name, description,
               original_budget::float8 AS original_budget,
               approved_changes::float8 AS approved_changes,
               revised_budget::float8 AS revised_budget,
               committed::float8 AS committed,
               invoiced::float8 AS invoiced,
               paid::float8 AS paid,
               remaining::float8 AS remaining,
               status
        FROM {}(p_org_id => $1, p_trade_name => $2, p_project_id => $3)
        "#,
        procedures::PACKAGES_BY_TRADE
    )
}

const RESOLVE_PROJECT_SQL: &str = r#"
    SELECT id, name
    FROM projects
    WHERE org_id = $1 AND name ILIKE $2
    LIMIT 1
"#;

const INSERT_CHAT_LOG_SQL: &str = r#"
    INSERT INTO chat_logs (org_id, question, tool_calls, response, model, created_at)
    VALUES ($1, $2, $3, $4, $5, $6)
"#;

#[async_trait]
impl FinancialGateway for PostgresGateway {
    async fn budget_by_trade(
        &self,
        org_id: Uuid,
        project_id: Option<Uuid>,
    ) -> Result<Vec<TradeBudgetRow>> {
        sqlx::query_as::<_, TradeBudgetRow>(&budget_by_trade_sql())
            .bind(org_id)
            .bind(project_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_error(procedures::BUDGET_BY_TRADE, e))
    }

    async fn budget_by_project(&self, org_id: Uuid) -> Result<Vec<ProjectBudgetRow>> {
        sqlx::query_as::<_, ProjectBudgetRow>(&budget_by_project_sql())
            .bind(org_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_error(procedures::BUDGET_BY_PROJECT, e))
    }

    async fn overspent_packages(
        &self,
        org_id: Uuid,
        project_id: Option<Uuid>,
    ) -> Result<Vec<OverspentPackageRow>> {
        sqlx::query_as::<_, OverspentPackageRow>(&overspent_packages_sql())
            .bind(org_id)
            .bind(project_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_error(procedures::OVERSPENT_PACKAGES, e))
    }

    async fn financial_summary(
        &self,
        org_id: Uuid,
        project_id: Option<Uuid>,
    ) -> Result<Vec<FinancialSummaryRow>> {
        sqlx::query_as::<_, FinancialSummaryRow>(&financial_summary_sql())
            .bind(org_id)
            .bind(project_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_error(procedures::FINANCIAL_SUMMARY, e))
    }

    async fn packages_by_trade(
        &self,
        org_id: Uuid,
        trade_name: &str,
        project_id: Option<Uuid>,
    ) -> Result<Vec<TradePackageRow>> {
        sqlx::query_as::<_, TradePackageRow>(&packages_by_trade_sql())
            .bind(org_id)
            .bind(trade_name)
            .bind(project_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_error(procedures::PACKAGES_BY_TRADE, e))
    }

    async fn resolve_project(&self, org_id: Uuid, fragment: &str) -> Result<Option<Uuid>> {
        let pattern = format!("%{}%", escape_like(fragment));

        let project = sqlx::query_as::<_, ProjectRef>(RESOLVE_PROJECT_SQL)
            .bind(org_id)
            .bind(pattern)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| query_error("project lookup", e))?;

        Ok(project.map(|p| p.id))
    }

    async fn append_chat_log(&self, entry: &ConversationLogEntry) -> Result<()> {
        let tool_calls = serde_json::to_value(&entry.tool_calls)?;

        sqlx::query(INSERT_CHAT_LOG_SQL)
            .bind(entry.org_id)
            .bind(&entry.question)
            .bind(tool_calls)
            .bind(&entry.response)
            .bind(&entry.model)
            .bind(entry.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| query_error("chat log insert", e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queries_call_stored_functions() {
        assert!(budget_by_trade_sql().contains("FROM get_budget_by_trade($1, $2)"));
        assert!(budget_by_project_sql().contains("FROM get_budget_by_project($1)"));
        assert!(overspent_packages_sql().contains("FROM get_overspent_packages($1, $2)"));
        assert!(financial_summary_sql().contains("FROM get_financial_summary($1, $2)"));
        assert!(packages_by_trade_sql().contains("p_trade_name => $2"));
    }

    #[test]
    fn test_money_columns_are_cast_to_float8() {
        let sql = budget_by_trade_sql();
        for column in ["original_budget", "committed", "remaining"] {
            assert!(sql.contains(&format!("{}::float8 AS {}", column, column)));
        }
    }

    #[tokio::test]
    async fn test_connect_lazy_rejects_bad_url() {
        assert!(PostgresGateway::connect_lazy("not a url").is_err());
    }
}
