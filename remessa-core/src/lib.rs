pub mod apply;
pub mod config;
pub mod document;
pub mod error;
pub mod plan;
pub mod sqlite;

pub use apply::{
    ApplyConfig, ApplyError, ApplyResult, ListEntry, LiveListProvider, MissingItem, PassEngine,
    PassHooks, PassOutcome, PassReport, PassState, ReplayListProvider,
};
pub use config::{
    load_remessa_config, ApplySection, PlannerSection, RemessaConfig, StoreSection, TaxSection,
};
pub use document::{DocumentError, DocumentResult, DocumentShape, OrderDocumentAdapter, ParsedOrder};
pub use error::{ConfigError, Result};
pub use plan::{
    cart_fingerprint, grouped_fingerprint, triple_fingerprint, BracketedSchedule, CheckoutPass,
    FlatSchedule, LineItem,
    NoSplitReason, Plan, PlanCompatibility, PlanError, PlanResult, PlannerConfig, PlannerEvent,
    SavingsSummary, SellerItems, Split, SplitItem, SplitPlanner, SqlitePlanStore,
    SqlitePlanStoreBuilder, TaxBreakdown, TaxSchedule,
};
