use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::DateTime;

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use serde::Serialize;
use thiserror::Error;

use remessa_core::plan::triple_fingerprint;
use remessa_core::{
    load_remessa_config, ApplyConfig, BracketedSchedule, ListEntry, OrderDocumentAdapter,
    ParsedOrder, PassEngine, PassOutcome, PassReport, PlanCompatibility, PlannerConfig,
    PlannerEvent, RemessaConfig, SavingsSummary, SplitPlanner, SqlitePlanStore,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] remessa_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("plan error: {0}")]
    Plan(#[from] remessa_core::PlanError),
    #[error("document error: {0}")]
    Document(#[from] remessa_core::DocumentError),
    #[error("apply error: {0}")]
    Apply(#[from] remessa_core::ApplyError),
    #[error("required resource missing: {0}")]
    MissingResource(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(
        "persisted plan no longer matches this cart (stored {stored}, current {current}); \
         recompute with `plan` or rerun with --force"
    )]
    PlanDrift { stored: String, current: String },
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Order split planning and cart rehearsal", long_about = None)]
pub struct Cli {
    /// Path to remessa.toml; built-in defaults apply when omitted
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Override the plan database path
    #[arg(long)]
    pub plan_db: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compute a split plan from a captured checkout document
    Plan(PlanArgs),
    /// Show the persisted plan
    Show,
    /// Check a captured document against the persisted plan
    Verify(VerifyArgs),
    /// Rehearse one checkout pass against a cart list snapshot
    Apply(ApplyArgs),
    /// Inspect the plan store record
    Status,
    /// Drop the persisted plan
    Clear,
    /// Emit shell completions
    Completions(CompletionsArgs),
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Captured checkout document (JSON)
    #[arg(long)]
    pub document: PathBuf,
    /// Compute and render without persisting
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Captured checkout document (JSON)
    #[arg(long)]
    pub document: PathBuf,
}

#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Pass number to rehearse, starting at 1
    #[arg(long, default_value_t = 1)]
    pub pass: usize,
    /// Cart list snapshot (JSON array of entries)
    #[arg(long)]
    pub list: PathBuf,
    /// Proceed even when the snapshot drifted from the plan
    #[arg(long, default_value_t = false)]
    pub force: bool,
    /// Entries rendered per reveal in the replayed list
    #[arg(long, default_value_t = 8)]
    pub window: usize,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}

pub fn run(cli: Cli) -> Result<()> {
    let context = AppContext::new(&cli)?;
    match &cli.command {
        Commands::Plan(args) => render(&context.plan(args)?, cli.format),
        Commands::Show => render(&context.show()?, cli.format),
        Commands::Verify(args) => render(&context.verify(args)?, cli.format),
        Commands::Apply(args) => render(&context.apply(args)?, cli.format),
        Commands::Status => render(&context.status()?, cli.format),
        Commands::Clear => render(&context.clear()?, cli.format),
        Commands::Completions(args) => {
            let mut command = Cli::command();
            clap_complete::generate(args.shell, &mut command, "remessactl", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
pub struct AppContext {
    config: RemessaConfig,
    plan_db: PathBuf,
}

impl AppContext {
    pub fn new(cli: &Cli) -> Result<Self> {
        let config = match &cli.config {
            Some(path) => load_remessa_config(path)?,
            None => RemessaConfig::default(),
        };
        let plan_db = cli
            .plan_db
            .clone()
            .unwrap_or_else(|| PathBuf::from(&config.store.path));
        Ok(Self { config, plan_db })
    }

    fn store(&self) -> Result<SqlitePlanStore> {
        let store = SqlitePlanStore::builder().path(&self.plan_db).build()?;
        store.initialize()?;
        Ok(store)
    }

    fn load_document(&self, path: &Path) -> Result<ParsedOrder> {
        let raw = fs::read_to_string(path)?;
        let value: serde_json::Value = serde_json::from_str(&raw)?;
        Ok(OrderDocumentAdapter::new().parse(&value)?)
    }

    pub fn plan(&self, args: &PlanArgs) -> Result<PlanView> {
        let order = self.load_document(&args.document)?;
        let schedule = Arc::new(BracketedSchedule::from_section(&self.config.tax));
        let planner = SplitPlanner::new(PlannerConfig::from_section(&self.config.planner), schedule);
        match planner.plan(&order.sellers, order.reference_tax) {
            PlannerEvent::NoSplit { reason } => {
                // A plan that stops being worthwhile must not linger.
                if !args.dry_run {
                    self.store()?.clear()?;
                }
                Ok(PlanView {
                    outcome: "no_split".to_string(),
                    reason: Some(reason.to_string()),
                    plan: None,
                })
            }
            PlannerEvent::Planned(plan) => {
                if !args.dry_run {
                    self.store()?.save(&plan)?;
                }
                Ok(PlanView {
                    outcome: "planned".to_string(),
                    reason: None,
                    plan: Some(PlanDetails::from_plan(&plan)),
                })
            }
        }
    }

    pub fn show(&self) -> Result<PlanView> {
        let plan = self
            .store()?
            .load()?
            .ok_or_else(|| AppError::MissingResource("no persisted plan".to_string()))?;
        Ok(PlanView {
            outcome: "planned".to_string(),
            reason: None,
            plan: Some(PlanDetails::from_plan(&plan)),
        })
    }

    pub fn verify(&self, args: &VerifyArgs) -> Result<VerifyView> {
        let order = self.load_document(&args.document)?;
        let current = order.fingerprint();
        let view = match self.store()?.drift_check(&current)? {
            None => VerifyView {
                status: "absent".to_string(),
                stored: None,
                current,
            },
            Some(PlanCompatibility::Match) => VerifyView {
                status: "match".to_string(),
                stored: Some(current.clone()),
                current,
            },
            Some(PlanCompatibility::Drifted { stored, current }) => VerifyView {
                status: "drift".to_string(),
                stored: Some(stored),
                current,
            },
        };
        Ok(view)
    }

    pub fn apply(&self, args: &ApplyArgs) -> Result<ApplyView> {
        if args.pass == 0 {
            return Err(AppError::InvalidArgument(
                "pass numbering starts at 1".to_string(),
            ));
        }
        let plan = self
            .store()?
            .load()?
            .ok_or_else(|| AppError::MissingResource("no persisted plan".to_string()))?;

        let raw = fs::read_to_string(&args.list)?;
        let entries: Vec<ListEntry> = serde_json::from_str(&raw)?;

        let snapshot = triple_fingerprint(entries.iter().map(|entry| {
            (
                entry.seller_id.as_str(),
                entry.item_id.as_str(),
                entry.current_quantity,
            )
        }));
        if snapshot != plan.fingerprint && !args.force {
            // Expected when rehearsing a sub-order of a larger plan;
            // the caller confirms that with --force.
            return Err(AppError::PlanDrift {
                stored: plan.fingerprint.clone(),
                current: snapshot,
            });
        }

        let pass = plan.pass(args.pass - 1)?;
        let engine = PassEngine::new(ApplyConfig::from_section(&self.config.apply));
        let mut provider = remessa_core::ReplayListProvider::new(entries, args.window);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let report = runtime.block_on(engine.apply(&mut provider, pass))?;
        Ok(ApplyView::from_report(args.pass, &report))
    }

    pub fn status(&self) -> Result<StatusView> {
        if !self.plan_db.exists() {
            return Ok(StatusView {
                store_path: self.plan_db.display().to_string(),
                record: None,
            });
        }
        let conn = Connection::open_with_flags(&self.plan_db, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let record = conn
            .query_row(
                "SELECT fingerprint, saved_at FROM plan_record LIMIT 1",
                [],
                |row| {
                    Ok(StoreRecord {
                        fingerprint: row.get(0)?,
                        saved_at: row.get::<_, Option<String>>(1)?,
                    })
                },
            )
            .optional()?;
        Ok(StatusView {
            store_path: self.plan_db.display().to_string(),
            record,
        })
    }

    pub fn clear(&self) -> Result<ClearView> {
        self.store()?.clear()?;
        Ok(ClearView { cleared: true })
    }
}

#[derive(Debug, Serialize)]
pub struct PlanView {
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanDetails>,
}

#[derive(Debug, Serialize)]
pub struct PlanDetails {
    pub plan_id: String,
    pub strategy_id: String,
    pub summary: SavingsSummary,
    pub passes: Vec<PassDetails>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub quantity_notes: Vec<String>,
}

impl PlanDetails {
    fn from_plan(plan: &remessa_core::Plan) -> Self {
        let passes = plan
            .passes
            .iter()
            .enumerate()
            .map(|(index, pass)| PassDetails {
                pass: index + 1,
                splits: pass
                    .splits
                    .iter()
                    .map(|split| SplitDetails {
                        seller_id: split.seller_id.clone(),
                        subtotal: split.subtotal,
                        estimated_tax: split.estimated_tax,
                        items: split
                            .items
                            .iter()
                            .map(|item| format!("{} × {}", item.quantity, item.display_name))
                            .collect(),
                    })
                    .collect(),
            })
            .collect();
        let quantity_notes = plan
            .spanning_items()
            .into_iter()
            .map(|entry| {
                let spread: Vec<String> = entry
                    .placements
                    .iter()
                    .map(|placement| format!("pass {}: {}x", placement.pass + 1, placement.quantity))
                    .collect();
                format!(
                    "{} splits its {} units across orders ({})",
                    entry.display_name,
                    entry.total_quantity,
                    spread.join(", ")
                )
            })
            .collect();
        Self {
            plan_id: plan.plan_id.clone(),
            strategy_id: plan.strategy_id.clone(),
            summary: plan.summary(),
            passes,
            quantity_notes,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PassDetails {
    pub pass: usize,
    pub splits: Vec<SplitDetails>,
}

#[derive(Debug, Serialize)]
pub struct SplitDetails {
    pub seller_id: String,
    pub subtotal: f64,
    pub estimated_tax: f64,
    pub items: Vec<String>,
}

impl DisplayFallback for PlanView {
    fn display(&self) -> String {
        let Some(details) = &self.plan else {
            return format!(
                "No split plan: {}",
                self.reason.as_deref().unwrap_or("unknown reason")
            );
        };
        let mut lines = vec![
            format!("Plan {} ({})", details.plan_id, details.strategy_id),
            format!(
                "Current tax: {:.2} | Est. tax with splits: {:.2} | Savings: {:.2}",
                details.summary.original_tax,
                details.summary.total_estimated_tax,
                details.summary.savings
            ),
        ];
        for pass in &details.passes {
            lines.push(format!("Pass {}:", pass.pass));
            for split in &pass.splits {
                lines.push(format!(
                    "  - seller {} | subtotal {:.2} | est. tax {:.2}",
                    split.seller_id, split.subtotal, split.estimated_tax
                ));
                for item in &split.items {
                    lines.push(format!("      {item}"));
                }
            }
        }
        for note in &details.quantity_notes {
            lines.push(format!("note: {note}"));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct VerifyView {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored: Option<String>,
    pub current: String,
}

impl DisplayFallback for VerifyView {
    fn display(&self) -> String {
        match self.status.as_str() {
            "match" => "Persisted plan matches this cart".to_string(),
            "absent" => "No persisted plan to compare against".to_string(),
            _ => format!(
                "Cart drifted since planning\n  stored:  {}\n  current: {}",
                self.stored.as_deref().unwrap_or("-"),
                self.current
            ),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApplyView {
    pub pass: usize,
    pub state: String,
    pub units_selected: u32,
    pub iterations: usize,
    pub settle_timeouts: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<MissingView>,
}

#[derive(Debug, Serialize)]
pub struct MissingView {
    pub item_id: String,
    pub needed_quantity: u32,
    pub display_name: String,
    pub url: String,
}

impl ApplyView {
    fn from_report(pass: usize, report: &PassReport) -> Self {
        let (units_selected, missing) = match &report.outcome {
            PassOutcome::Done { units_selected } => (*units_selected, Vec::new()),
            PassOutcome::PartialFailure {
                units_selected,
                missing,
            } => (
                *units_selected,
                missing
                    .iter()
                    .map(|item| MissingView {
                        item_id: item.item_id.clone(),
                        needed_quantity: item.needed_quantity,
                        display_name: item.display_name.clone(),
                        url: item.url.clone(),
                    })
                    .collect(),
            ),
        };
        Self {
            pass,
            state: report.final_state().to_string(),
            units_selected,
            iterations: report.iterations,
            settle_timeouts: report.settle_timeouts,
            missing,
        }
    }
}

impl DisplayFallback for ApplyView {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "Pass {}: {} | selected {} unit(s) in {} iteration(s)",
            self.pass, self.state, self.units_selected, self.iterations
        )];
        if self.settle_timeouts > 0 {
            lines.push(format!(
                "  {} settle wait(s) timed out; proceeded optimistically",
                self.settle_timeouts
            ));
        }
        if !self.missing.is_empty() {
            lines.push("Missing items:".to_string());
            for item in &self.missing {
                let link = if item.url.is_empty() {
                    String::new()
                } else {
                    format!(" -> {}", item.url)
                };
                lines.push(format!(
                    "  - {} × {}{}",
                    item.needed_quantity, item.display_name, link
                ));
            }
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct StatusView {
    pub store_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<StoreRecord>,
}

#[derive(Debug, Serialize)]
pub struct StoreRecord {
    pub fingerprint: String,
    pub saved_at: Option<String>,
}

impl DisplayFallback for StatusView {
    fn display(&self) -> String {
        match &self.record {
            Some(record) => {
                let saved_at = record
                    .saved_at
                    .as_deref()
                    .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                    .map(|ts| ts.format("%Y-%m-%d %H:%M:%S %z").to_string())
                    .unwrap_or_else(|| "-".to_string());
                format!(
                    "Store {}\n  fingerprint: {}\n  saved at: {}",
                    self.store_path, record.fingerprint, saved_at
                )
            }
            None => format!("Store {} holds no plan", self.store_path),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ClearView {
    pub cleared: bool,
}

impl DisplayFallback for ClearView {
    fn display(&self) -> String {
        "Persisted plan cleared".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(dir: &tempfile::TempDir) -> AppContext {
        AppContext {
            config: RemessaConfig::default(),
            plan_db: dir.path().join("plans.sqlite"),
        }
    }

    fn write_json(dir: &tempfile::TempDir, name: &str, value: serde_json::Value) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, serde_json::to_string(&value).unwrap()).unwrap();
        path
    }

    fn sample_document() -> serde_json::Value {
        json!({
            "items": [
                {"seller_id": "s1", "title": "Widget", "sku": "red", "unit_price": 10.0, "quantity": 5, "shipping": "Free", "url": "https://shop.example/widget"},
                {"seller_id": "s1", "title": "Gadget", "sku": "", "unit_price": 45.0, "quantity": 1, "shipping": 0, "url": "https://shop.example/gadget"}
            ],
            "summary": {
                "total": 140.0,
                "lines": [{"title": "Import duty", "amount": "US $45.00"}]
            }
        })
    }

    #[test]
    fn plan_show_verify_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let context = context(&dir);
        let document = write_json(&dir, "checkout.json", sample_document());

        let view = context
            .plan(&PlanArgs {
                document: document.clone(),
                dry_run: false,
            })
            .unwrap();
        assert_eq!(view.outcome, "planned");
        // threshold 49: 4 widgets, then the fifth widget, then the gadget
        let details = view.plan.unwrap();
        assert_eq!(details.summary.splits, 3);
        assert_eq!(details.passes.len(), 3);

        let shown = context.show().unwrap();
        assert_eq!(shown.plan.unwrap().plan_id, details.plan_id);

        let verified = context.verify(&VerifyArgs { document }).unwrap();
        assert_eq!(verified.status, "match");
    }

    #[test]
    fn verify_reports_drift_after_quantity_change() {
        let dir = tempfile::tempdir().unwrap();
        let context = context(&dir);
        let document = write_json(&dir, "checkout.json", sample_document());
        context
            .plan(&PlanArgs {
                document,
                dry_run: false,
            })
            .unwrap();

        let mut changed = sample_document();
        changed["items"][0]["quantity"] = json!(4);
        let drifted = write_json(&dir, "changed.json", changed);
        let verified = context.verify(&VerifyArgs { document: drifted }).unwrap();
        assert_eq!(verified.status, "drift");
    }

    #[test]
    fn apply_rehearses_pass_against_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let context = context(&dir);
        let document = write_json(&dir, "checkout.json", sample_document());
        context
            .plan(&PlanArgs {
                document,
                dry_run: false,
            })
            .unwrap();

        let snapshot = json!([
            {"entry_id": "e1", "seller_id": "s1", "item_id": "Widget (red)", "current_quantity": 5, "selected": false},
            {"entry_id": "e2", "seller_id": "s1", "item_id": "Gadget", "current_quantity": 1, "selected": false}
        ]);
        let list = write_json(&dir, "cart.json", snapshot);

        let view = context
            .apply(&ApplyArgs {
                pass: 1,
                list,
                force: false,
                window: 8,
            })
            .unwrap();
        assert_eq!(view.state, "done");
        // pass 1 holds four of the five widgets
        assert_eq!(view.units_selected, 4);
        assert!(view.missing.is_empty());
    }

    #[test]
    fn apply_rejects_drifted_snapshot_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let context = context(&dir);
        let document = write_json(&dir, "checkout.json", sample_document());
        context
            .plan(&PlanArgs {
                document,
                dry_run: false,
            })
            .unwrap();

        let snapshot = json!([
            {"entry_id": "e1", "seller_id": "s1", "item_id": "Widget (red)", "current_quantity": 2, "selected": false}
        ]);
        let list = write_json(&dir, "cart.json", snapshot);

        let err = context
            .apply(&ApplyArgs {
                pass: 1,
                list,
                force: false,
                window: 8,
            })
            .unwrap_err();
        assert!(matches!(err, AppError::PlanDrift { .. }));
    }
}
