//! In-memory gateway for development and tests
//!
//! Holds package-level demo data and computes the same aggregates the data
//! service's stored functions return.

use super::FinancialGateway;
use crate::error::AssistantError;
use crate::models::{
    ConversationLogEntry, FinancialSummaryRow, OverspentPackageRow, ProjectBudgetRow,
    TradeBudgetRow, TradePackageRow,
};
use crate::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct DemoProject {
    pub id: Uuid,
    pub org_id: Uuid,
    pub code: String,
    pub name: String,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct DemoPackage {
    pub project_id: Uuid,
    pub trade_name: String,
    pub csi_code: String,
    pub name: String,
    pub description: String,
    pub original_budget: f64,
    pub approved_changes: f64,
    pub committed: f64,
    pub invoiced: f64,
    pub paid: f64,
    pub status: String,
}

impl DemoPackage {
    fn revised_budget(&self) -> f64 {
        self.original_budget + self.approved_changes
    }

    fn remaining(&self) -> f64 {
        self.revised_budget() - self.committed
    }

    fn is_overspent(&self) -> bool {
        self.committed > self.revised_budget()
    }
}

#[derive(Default)]
struct Totals {
    count: i64,
    original_budget: f64,
    approved_changes: f64,
    committed: f64,
    invoiced: f64,
    paid: f64,
}

impl Totals {
    fn add(&mut self, p: &DemoPackage) {
        self.count += 1;
        self.original_budget += p.original_budget;
        self.approved_changes += p.approved_changes;
        self.committed += p.committed;
        self.invoiced += p.invoiced;
        self.paid += p.paid;
    }

    fn revised_budget(&self) -> f64 {
        self.original_budget + self.approved_changes
    }
}

/// Percentage with one decimal place; zero when the base is zero.
fn pct(part: f64, whole: f64) -> f64 {
    if whole == 0.0 {
        0.0
    } else {
        (part / whole * 1000.0).round() / 10.0
    }
}

pub struct InMemoryGateway {
    projects: Vec<DemoProject>,
    packages: Vec<DemoPackage>,
    chat_logs: Arc<RwLock<Vec<ConversationLogEntry>>>,
    query_failure: Option<String>,
    log_failure: Option<String>,
}

impl InMemoryGateway {
    pub fn new(projects: Vec<DemoProject>, packages: Vec<DemoPackage>) -> Self {
        Self {
            projects,
            packages,
            chat_logs: Arc::new(RwLock::new(Vec::new())),
            query_failure: None,
            log_failure: None,
        }
    }

    /// Make every aggregate query fail with `message`.
    pub fn with_query_failure(mut self, message: impl Into<String>) -> Self {
        self.query_failure = Some(message.into());
        self
    }

    /// Make chat log writes fail with `message`.
    pub fn with_log_failure(mut self, message: impl Into<String>) -> Self {
        self.log_failure = Some(message.into());
        self
    }

    pub fn projects(&self) -> &[DemoProject] {
        &self.projects
    }

    /// Snapshot of every log entry written so far.
    pub async fn chat_logs(&self) -> Vec<ConversationLogEntry> {
        self.chat_logs.read().await.clone()
    }

    fn check_failure(&self) -> Result<()> {
        match &self.query_failure {
            Some(message) => Err(AssistantError::GatewayError(message.clone())),
            None => Ok(()),
        }
    }

    fn project(&self, id: Uuid) -> Option<&DemoProject> {
        self.projects.iter().find(|p| p.id == id)
    }

    fn project_name(&self, id: Uuid) -> String {
        self.project(id).map(|p| p.name.clone()).unwrap_or_default()
    }

    fn scoped_packages(
        &self,
        org_id: Uuid,
        project_id: Option<Uuid>,
    ) -> impl Iterator<Item = &DemoPackage> {
        self.packages.iter().filter(move |pkg| {
            let in_org = self
                .project(pkg.project_id)
                .map(|p| p.org_id == org_id)
                .unwrap_or(false);
            in_org && project_id.map_or(true, |id| pkg.project_id == id)
        })
    }

    /// Three-project demo portfolio for the default tenant.
    pub fn with_demo_data() -> Self {
        let org_id = crate::config::DEFAULT_TENANT_ID;
        let tower = Uuid::from_u128(0x0000_0001);
        let medical = Uuid::from_u128(0x0000_0002);
        let school = Uuid::from_u128(0x0000_0003);

        let project = |id: Uuid, code: &str, name: &str| DemoProject {
            id,
            org_id,
            code: code.to_string(),
            name: name.to_string(),
            status: "active".to_string(),
        };

        let projects = vec![
            project(tower, "PRJ-001", "Downtown Office Tower"),
            project(medical, "PRJ-002", "Riverside Medical Center"),
            project(school, "PRJ-003", "Lakewood Elementary Renovation"),
        ];

        #[allow(clippy::too_many_arguments)]
        fn package(
            project_id: Uuid,
            trade: (&str, &str),
            name: &str,
            description: &str,
            budget: (f64, f64),
            committed: f64,
            invoiced: f64,
            paid: f64,
            status: &str,
        ) -> DemoPackage {
            DemoPackage {
                project_id,
                trade_name: trade.0.to_string(),
                csi_code: trade.1.to_string(),
                name: name.to_string(),
                description: description.to_string(),
                original_budget: budget.0,
                approved_changes: budget.1,
                committed,
                invoiced,
                paid,
                status: status.to_string(),
            }
        }

        const CONCRETE: (&str, &str) = ("Concrete", "03");
        const MASONRY: (&str, &str) = ("Masonry", "04");
        const METALS: (&str, &str) = ("Metals", "05");
        const ROOFING: (&str, &str) = ("Roofing", "07");
        const FINISHES: (&str, &str) = ("Finishes", "09");
        const ELEVATORS: (&str, &str) = ("Elevators", "14");
        const FIRE: (&str, &str) = ("Fire Protection", "21");
        const PLUMBING: (&str, &str) = ("Plumbing", "22");
        const HVAC: (&str, &str) = ("HVAC", "23");
        const ELECTRICAL: (&str, &str) = ("Electrical", "26");

        let packages = vec![
            package(tower, CONCRETE, "Foundations & Structure", "Cast-in-place concrete frame", (4_800_000.0, 150_000.0), 4_900_000.0, 3_100_000.0, 2_800_000.0, "active"),
            package(tower, MASONRY, "Exterior Masonry Veneer", "Brick veneer levels 1-3", (1_200_000.0, 0.0), 1_310_000.0, 600_000.0, 540_000.0, "active"),
            package(tower, METALS, "Structural Steel", "Steel framing levels 4-18", (3_600_000.0, 220_000.0), 3_700_000.0, 2_900_000.0, 2_600_000.0, "active"),
            package(tower, ELECTRICAL, "Electrical Rough-In", "Power distribution and lighting", (2_900_000.0, 80_000.0), 2_400_000.0, 900_000.0, 850_000.0, "active"),
            package(tower, ELEVATORS, "Passenger Elevators", "Six traction elevators", (1_650_000.0, 0.0), 1_600_000.0, 400_000.0, 400_000.0, "pending"),
            package(tower, HVAC, "HVAC Systems", "Central plant and VAV distribution", (3_100_000.0, 0.0), 2_750_000.0, 1_200_000.0, 1_000_000.0, "active"),
            package(medical, CONCRETE, "Podium & Slabs", "Podium structure and elevated slabs", (6_200_000.0, 300_000.0), 6_350_000.0, 4_000_000.0, 3_700_000.0, "active"),
            package(medical, PLUMBING, "Medical Gas & Plumbing", "Domestic water and medical gas", (3_400_000.0, 120_000.0), 3_800_000.0, 1_500_000.0, 1_300_000.0, "active"),
            package(medical, FIRE, "Fire Suppression", "Wet and pre-action sprinklers", (1_100_000.0, 0.0), 950_000.0, 300_000.0, 250_000.0, "active"),
            package(medical, ELECTRICAL, "Emergency Power", "Generators and critical branch", (4_300_000.0, 250_000.0), 4_100_000.0, 1_900_000.0, 1_700_000.0, "active"),
            package(medical, MASONRY, "Interior CMU Walls", "Shaft and stair CMU", (900_000.0, 0.0), 720_000.0, 300_000.0, 300_000.0, "closed"),
            package(school, ROOFING, "Roof Replacement", "TPO roof over existing deck", (850_000.0, 40_000.0), 870_000.0, 870_000.0, 820_000.0, "closed"),
            package(school, FINISHES, "Classroom Finishes", "Flooring, ceilings and paint", (1_300_000.0, 0.0), 1_050_000.0, 400_000.0, 380_000.0, "active"),
            package(school, MASONRY, "Masonry Restoration", "Repointing and brick repair", (420_000.0, 15_000.0), 380_000.0, 120_000.0, 100_000.0, "active"),
            package(school, HVAC, "Rooftop Units", "RTU replacement", (1_150_000.0, 0.0), 0.0, 0.0, 0.0, "pending"),
        ];

        Self::new(projects, packages)
    }
}

#[async_trait]
impl FinancialGateway for InMemoryGateway {
    async fn budget_by_trade(
        &self,
        org_id: Uuid,
        project_id: Option<Uuid>,
    ) -> Result<Vec<TradeBudgetRow>> {
        self.check_failure()?;

        // Keyed by CSI code so rows come back in MasterFormat division order
        let mut by_trade: BTreeMap<(String, String), Totals> = BTreeMap::new();
        for pkg in self.scoped_packages(org_id, project_id) {
            by_trade
                .entry((pkg.csi_code.clone(), pkg.trade_name.clone()))
                .or_default()
                .add(pkg);
        }

        Ok(by_trade
            .into_iter()
            .map(|((csi_code, trade_name), t)| TradeBudgetRow {
                trade_name,
                csi_code,
                package_count: t.count,
                original_budget: t.original_budget,
                approved_changes: t.approved_changes,
                revised_budget: t.revised_budget(),
                committed: t.committed,
                invoiced: t.invoiced,
                paid: t.paid,
                remaining: t.revised_budget() - t.committed,
            })
            .collect())
    }

    async fn budget_by_project(&self, org_id: Uuid) -> Result<Vec<ProjectBudgetRow>> {
        self.check_failure()?;

        Ok(self
            .projects
            .iter()
            .filter(|p| p.org_id == org_id)
            .map(|project| {
                let mut t = Totals::default();
                for pkg in self.scoped_packages(org_id, Some(project.id)) {
                    t.add(pkg);
                }

                ProjectBudgetRow {
                    project_name: project.name.clone(),
                    project_code: project.code.clone(),
                    project_status: project.status.clone(),
                    original_budget: t.original_budget,
                    approved_changes: t.approved_changes,
                    revised_budget: t.revised_budget(),
                    committed: t.committed,
                    invoiced: t.invoiced,
                    paid: t.paid,
                    remaining: t.revised_budget() - t.committed,
                    pct_spent: pct(t.committed, t.revised_budget()),
                }
            })
            .collect())
    }

    async fn overspent_packages(
        &self,
        org_id: Uuid,
        project_id: Option<Uuid>,
    ) -> Result<Vec<OverspentPackageRow>> {
        self.check_failure()?;

        let mut rows: Vec<OverspentPackageRow> = self
            .scoped_packages(org_id, project_id)
            .filter(|pkg| pkg.is_overspent())
            .map(|pkg| {
                let overspent_amount = pkg.committed - pkg.revised_budget();
                OverspentPackageRow {
                    project_name: self.project_name(pkg.project_id),
                    trade_name: pkg.trade_name.clone(),
                    package_name: pkg.name.clone(),
                    revised_budget: pkg.revised_budget(),
                    committed: pkg.committed,
                    overspent_amount,
                    overspent_pct: pct(overspent_amount, pkg.revised_budget()),
                }
            })
            .collect();

        rows.sort_by(|a, b| b.overspent_amount.total_cmp(&a.overspent_amount));
        Ok(rows)
    }

    async fn financial_summary(
        &self,
        org_id: Uuid,
        project_id: Option<Uuid>,
    ) -> Result<Vec<FinancialSummaryRow>> {
        self.check_failure()?;

        let mut t = Totals::default();
        let mut open_packages = 0;
        let mut overspent_packages = 0;
        for pkg in self.scoped_packages(org_id, project_id) {
            t.add(pkg);
            if pkg.status != "closed" {
                open_packages += 1;
            }
            if pkg.is_overspent() {
                overspent_packages += 1;
            }
        }

        let revised = t.revised_budget();
        Ok(vec![FinancialSummaryRow {
            total_original_budget: t.original_budget,
            total_approved_changes: t.approved_changes,
            total_revised_budget: revised,
            total_committed: t.committed,
            total_invoiced: t.invoiced,
            total_paid: t.paid,
            total_remaining: revised - t.committed,
            pct_committed: pct(t.committed, revised),
            pct_invoiced: pct(t.invoiced, revised),
            pct_paid: pct(t.paid, revised),
            open_packages,
            overspent_packages,
        }])
    }

    async fn packages_by_trade(
        &self,
        org_id: Uuid,
        trade_name: &str,
        project_id: Option<Uuid>,
    ) -> Result<Vec<TradePackageRow>> {
        self.check_failure()?;

        let wanted = trade_name.trim().to_lowercase();
        Ok(self
            .scoped_packages(org_id, project_id)
            .filter(|pkg| pkg.trade_name.to_lowercase() == wanted)
            .map(|pkg| TradePackageRow {
                project_name: self.project_name(pkg.project_id),
                package_name: pkg.name.clone(),
                description: Some(pkg.description.clone()),
                original_budget: pkg.original_budget,
                approved_changes: pkg.approved_changes,
                revised_budget: pkg.revised_budget(),
                committed: pkg.committed,
                invoiced: pkg.invoiced,
                paid: pkg.paid,
                remaining: pkg.remaining(),
                status: pkg.status.clone(),
            })
            .collect())
    }

    async fn resolve_project(&self, org_id: Uuid, fragment: &str) -> Result<Option<Uuid>> {
        let needle = fragment.to_lowercase();
        Ok(self
            .projects
            .iter()
            .filter(|p| p.org_id == org_id)
            .find(|p| p.name.to_lowercase().contains(&needle))
            .map(|p| p.id))
    }

    async fn append_chat_log(&self, entry: &ConversationLogEntry) -> Result<()> {
        if let Some(message) = &self.log_failure {
            return Err(AssistantError::GatewayError(message.clone()));
        }

        self.chat_logs.write().await.push(entry.clone());
        Ok(())
    }
}
