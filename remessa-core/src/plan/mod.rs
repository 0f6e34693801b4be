pub mod error;
pub mod models;
pub mod planner;
pub mod store;
pub mod tax;

pub use error::{PlanError, PlanResult};
pub use models::{
    cart_fingerprint, grouped_fingerprint, triple_fingerprint, CheckoutPass, LineItem, Plan,
    SavingsSummary, SellerItems, SpanningItem, Split, SplitItem, SplitPlacement,
};
pub use planner::{NoSplitReason, PlannerConfig, PlannerEvent, SplitPlanner};
pub use store::{PlanCompatibility, SqlitePlanStore, SqlitePlanStoreBuilder};
pub use tax::{BracketedSchedule, FlatSchedule, TaxBreakdown, TaxSchedule};
