//! The five construction-finance tools
//!
//! Each binds validated arguments to exactly one gateway query and shapes
//! the rows for the model: currency strings for money, `"<n>%"` for
//! percentages, a message object instead of an empty list.

use super::{parse_arguments, Tool, ToolContext};
use crate::format::{format_currency as fmt, format_percent};
use crate::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

pub const KNOWN_TRADES: &[&str] = &[
    "Concrete",
    "Masonry",
    "Metals",
    "Electrical",
    "Plumbing",
    "HVAC",
    "Finishes",
    "Roofing",
    "Fire Protection",
    "Elevators",
];

const ALL_PROJECTS: &str = "All Projects";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProjectFilterArgs {
    #[serde(default)]
    project_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NoArgs {}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TradeDrilldownArgs {
    trade_name: String,
    #[serde(default)]
    project_name: Option<String>,
}

/// Outcome of turning a free-text project name into a filter.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectFilter {
    pub project_id: Option<Uuid>,
    /// Value reported back as `filter`.
    pub label: String,
    /// Set when a name was given but nothing matched.
    pub note: Option<String>,
}

/// Resolve an optional project name. An unmatched name, or a failed lookup,
/// falls back to no filter.
pub async fn resolve_project_filter(ctx: &ToolContext, project_name: Option<&str>) -> ProjectFilter {
    let Some(name) = project_name.map(str::trim).filter(|n| !n.is_empty()) else {
        return ProjectFilter {
            project_id: None,
            label: ALL_PROJECTS.to_string(),
            note: None,
        };
    };

    let resolved = match ctx.gateway.resolve_project(ctx.org_id, name).await {
        Ok(id) => id,
        Err(e) => {
            warn!(project_name = %name, error = %e, "Project lookup failed; using no filter");
            None
        }
    };

    match resolved {
        Some(id) => ProjectFilter {
            project_id: Some(id),
            label: name.to_string(),
            note: None,
        },
        None => {
            info!(project_name = %name, "No project matched; using no filter");
            ProjectFilter {
                project_id: None,
                label: ALL_PROJECTS.to_string(),
                note: Some(format!(
                    "No project matched \"{}\"; showing data for all projects.",
                    name
                )),
            }
        }
    }
}

fn project_name_schema(description: &str) -> Value {
    json!({ "type": "string", "description": description })
}

fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

/// Attach `filter` and, when present, the unmatched-project `note`.
fn with_filter(mut body: Value, filter: &ProjectFilter) -> Value {
    body["filter"] = json!(filter.label);
    if let Some(note) = &filter.note {
        body["note"] = json!(note);
    }
    body
}

fn error_payload(e: crate::error::AssistantError) -> Value {
    json!({ "error": e.payload_message() })
}

//
// ================= Budget by trade =================
//

pub struct BudgetByTradeTool;

#[async_trait::async_trait]
impl Tool for BudgetByTradeTool {
    fn name(&self) -> &'static str {
        "get_budget_by_trade"
    }

    fn description(&self) -> &'static str {
        "Get remaining budget breakdown by trade (e.g. masonry, electrical). Shows original budget, changes, committed, invoiced, paid, and remaining amounts. Use this when the user asks about money remaining for a specific trade or all trades."
    }

    fn parameters(&self) -> Value {
        object_schema(
            json!({
                "project_name": project_name_schema(
                    "Optional project name to filter by (e.g. 'Downtown Office Tower'). Leave empty for all projects."
                )
            }),
            &[],
        )
    }

    async fn execute(&self, ctx: &ToolContext, arguments: Value) -> Result<Value> {
        let args: ProjectFilterArgs = parse_arguments(self.name(), arguments)?;
        let filter = resolve_project_filter(ctx, args.project_name.as_deref()).await;

        let rows = match ctx.gateway.budget_by_trade(ctx.org_id, filter.project_id).await {
            Ok(rows) => rows,
            Err(e) => return Ok(error_payload(e)),
        };

        if rows.is_empty() {
            return Ok(json!({ "message": "No data found." }));
        }

        let trades: Vec<Value> = rows
            .iter()
            .map(|row| {
                json!({
                    "trade": row.trade_name,
                    "csi_code": row.csi_code,
                    "packages": row.package_count,
                    "original_budget": fmt(row.original_budget),
                    "approved_changes": fmt(row.approved_changes),
                    "revised_budget": fmt(row.revised_budget),
                    "committed": fmt(row.committed),
                    "invoiced": fmt(row.invoiced),
                    "paid": fmt(row.paid),
                    "remaining": fmt(row.remaining),
                    "remaining_raw": row.remaining,
                })
            })
            .collect();

        Ok(with_filter(json!({ "trades": trades }), &filter))
    }
}

//
// ================= Budget by project =================
//

pub struct BudgetByProjectTool;

#[async_trait::async_trait]
impl Tool for BudgetByProjectTool {
    fn name(&self) -> &'static str {
        "get_budget_by_project"
    }

    fn description(&self) -> &'static str {
        "Get remaining budget summary for each project. Shows total budget, committed, invoiced, paid, remaining, and percent spent. Use when the user asks about project-level finances."
    }

    fn parameters(&self) -> Value {
        object_schema(json!({}), &[])
    }

    async fn execute(&self, ctx: &ToolContext, arguments: Value) -> Result<Value> {
        let _: NoArgs = parse_arguments(self.name(), arguments)?;

        let rows = match ctx.gateway.budget_by_project(ctx.org_id).await {
            Ok(rows) => rows,
            Err(e) => return Ok(error_payload(e)),
        };

        if rows.is_empty() {
            return Ok(json!({ "message": "No projects found." }));
        }

        let projects: Vec<Value> = rows
            .iter()
            .map(|row| {
                json!({
                    "name": row.project_name,
                    "code": row.project_code,
                    "status": row.project_status,
                    "original_budget": fmt(row.original_budget),
                    "approved_changes": fmt(row.approved_changes),
                    "revised_budget": fmt(row.revised_budget),
                    "committed": fmt(row.committed),
                    "invoiced": fmt(row.invoiced),
                    "paid": fmt(row.paid),
                    "remaining": fmt(row.remaining),
                    "pct_committed": format_percent(row.pct_spent),
                })
            })
            .collect();

        Ok(json!({ "projects": projects }))
    }
}

//
// ================= Overspent packages =================
//

pub struct OverspentPackagesTool;

#[async_trait::async_trait]
impl Tool for OverspentPackagesTool {
    fn name(&self) -> &'static str {
        "get_overspent_packages"
    }

    fn description(&self) -> &'static str {
        "Find all packages where committed amount exceeds the revised budget (overspent). Shows the overspent amount and percentage. Use when the user asks about overspending, over-budget items, or cost overruns."
    }

    fn parameters(&self) -> Value {
        object_schema(
            json!({ "project_name": project_name_schema("Optional project name to filter by.") }),
            &[],
        )
    }

    async fn execute(&self, ctx: &ToolContext, arguments: Value) -> Result<Value> {
        let args: ProjectFilterArgs = parse_arguments(self.name(), arguments)?;
        let filter = resolve_project_filter(ctx, args.project_name.as_deref()).await;

        let rows = match ctx.gateway.overspent_packages(ctx.org_id, filter.project_id).await {
            Ok(rows) => rows,
            Err(e) => return Ok(error_payload(e)),
        };

        if rows.is_empty() {
            return Ok(json!({
                "message": "No overspent packages found. All packages are within budget."
            }));
        }

        let total_overspent: f64 = rows.iter().map(|row| row.overspent_amount).sum();
        let packages: Vec<Value> = rows
            .iter()
            .map(|row| {
                json!({
                    "project": row.project_name,
                    "trade": row.trade_name,
                    "package": row.package_name,
                    "revised_budget": fmt(row.revised_budget),
                    "committed": fmt(row.committed),
                    "overspent_by": fmt(row.overspent_amount),
                    "overspent_pct": format_percent(row.overspent_pct),
                })
            })
            .collect();

        Ok(with_filter(
            json!({
                "overspent_packages": packages,
                "total_overspent": fmt(total_overspent),
                "count": rows.len(),
            }),
            &filter,
        ))
    }
}

//
// ================= Financial summary =================
//

pub struct FinancialSummaryTool;

#[async_trait::async_trait]
impl Tool for FinancialSummaryTool {
    fn name(&self) -> &'static str {
        "get_financial_summary"
    }

    fn description(&self) -> &'static str {
        "Get a high-level financial summary showing committed vs invoiced vs paid vs remaining. Use when the user asks for an overview, total budget status, or committed vs spent vs remaining."
    }

    fn parameters(&self) -> Value {
        object_schema(
            json!({ "project_name": project_name_schema("Optional project name to filter by.") }),
            &[],
        )
    }

    async fn execute(&self, ctx: &ToolContext, arguments: Value) -> Result<Value> {
        let args: ProjectFilterArgs = parse_arguments(self.name(), arguments)?;
        let filter = resolve_project_filter(ctx, args.project_name.as_deref()).await;

        let rows = match ctx.gateway.financial_summary(ctx.org_id, filter.project_id).await {
            Ok(rows) => rows,
            Err(e) => return Ok(error_payload(e)),
        };

        let Some(row) = rows.first() else {
            return Ok(json!({ "message": "No data found." }));
        };

        Ok(with_filter(
            json!({
                "summary": {
                    "original_budget": fmt(row.total_original_budget),
                    "approved_changes": fmt(row.total_approved_changes),
                    "revised_budget": fmt(row.total_revised_budget),
                    "committed": fmt(row.total_committed),
                    "invoiced": fmt(row.total_invoiced),
                    "paid": fmt(row.total_paid),
                    "remaining": fmt(row.total_remaining),
                    "pct_committed": format_percent(row.pct_committed),
                    "pct_invoiced": format_percent(row.pct_invoiced),
                    "pct_paid": format_percent(row.pct_paid),
                    "open_packages": row.open_packages,
                    "overspent_packages": row.overspent_packages,
                }
            }),
            &filter,
        ))
    }
}

//
// ================= Packages by trade =================
//

pub struct PackagesByTradeTool;

#[async_trait::async_trait]
impl Tool for PackagesByTradeTool {
    fn name(&self) -> &'static str {
        "get_packages_by_trade"
    }

    fn description(&self) -> &'static str {
        "Get detailed list of all packages for a specific trade. Shows each package's budget, committed, invoiced, paid, remaining, and status. Use when the user wants to drill down into a specific trade like masonry or electrical."
    }

    fn parameters(&self) -> Value {
        object_schema(
            json!({
                "trade_name": {
                    "type": "string",
                    "description": "The trade name to look up (e.g. 'Masonry', 'Electrical', 'HVAC', 'Concrete')"
                },
                "project_name": project_name_schema("Optional project name to filter by."),
            }),
            &["trade_name"],
        )
    }

    async fn execute(&self, ctx: &ToolContext, arguments: Value) -> Result<Value> {
        let args: TradeDrilldownArgs = parse_arguments(self.name(), arguments)?;
        let filter = resolve_project_filter(ctx, args.project_name.as_deref()).await;

        let rows = match ctx
            .gateway
            .packages_by_trade(ctx.org_id, &args.trade_name, filter.project_id)
            .await
        {
            Ok(rows) => rows,
            Err(e) => return Ok(error_payload(e)),
        };

        if rows.is_empty() {
            return Ok(json!({
                "message": format!(
                    "No packages found for trade \"{}\". Check spelling or try: {}.",
                    args.trade_name,
                    KNOWN_TRADES.join(", ")
                )
            }));
        }

        let packages: Vec<Value> = rows
            .iter()
            .map(|row| {
                json!({
                    "project": row.project_name,
                    "package": row.package_name,
                    "description": row.description,
                    "original_budget": fmt(row.original_budget),
                    "approved_changes": fmt(row.approved_changes),
                    "revised_budget": fmt(row.revised_budget),
                    "committed": fmt(row.committed),
                    "invoiced": fmt(row.invoiced),
                    "paid": fmt(row.paid),
                    "remaining": fmt(row.remaining),
                    "status": row.status,
                })
            })
            .collect();

        Ok(with_filter(
            json!({
                "trade": args.trade_name,
                "packages": packages,
                "total_packages": rows.len(),
            }),
            &filter,
        ))
    }
}
