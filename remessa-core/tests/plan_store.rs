use std::sync::Arc;

use rusqlite::Connection;

use remessa_core::{
    FlatSchedule, LineItem, PlanCompatibility, PlannerConfig, PlannerEvent, SellerItems,
    SplitPlanner, SqlitePlanStore,
};

fn setup_store() -> (tempfile::TempDir, SqlitePlanStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqlitePlanStore::builder()
        .path(dir.path().join("plans.sqlite"))
        .create_if_missing(true)
        .build()
        .unwrap();
    store.initialize().unwrap();
    (dir, store)
}

fn sample_groups() -> Vec<SellerItems> {
    let items = vec![
        LineItem {
            item_id: "widget".to_string(),
            display_name: "Widget".to_string(),
            sku: "red".to_string(),
            seller_id: "s1".to_string(),
            unit_price: 10.0,
            effective_unit_price: 10.0,
            quantity: 5,
            url: "https://shop.example/widget".to_string(),
        },
        LineItem {
            item_id: "gadget".to_string(),
            display_name: "Gadget".to_string(),
            sku: String::new(),
            seller_id: "s1".to_string(),
            unit_price: 45.0,
            effective_unit_price: 45.0,
            quantity: 1,
            url: "https://shop.example/gadget".to_string(),
        },
    ];
    vec![SellerItems {
        seller_id: "s1".to_string(),
        items,
    }]
}

fn sample_plan() -> remessa_core::Plan {
    let config = PlannerConfig {
        threshold: 50.0,
        min_savings: 0.01,
        always_plan: true,
    };
    let planner = SplitPlanner::new(config, Arc::new(FlatSchedule::new(0.45)));
    match planner.plan(&sample_groups(), 42.0) {
        PlannerEvent::Planned(plan) => plan,
        PlannerEvent::NoSplit { reason } => panic!("sample cart should split: {reason}"),
    }
}

#[test]
fn round_trips_a_plan() {
    let (_dir, store) = setup_store();
    let plan = sample_plan();
    store.save(&plan).unwrap();

    let loaded = store.load().unwrap().expect("plan present");
    assert_eq!(loaded, plan);
    assert_eq!(loaded.total_estimated_tax, plan.total_estimated_tax);
    assert_eq!(loaded.summary(), plan.summary());
}

#[test]
fn load_returns_none_when_nothing_saved() {
    let (_dir, store) = setup_store();
    assert!(store.load().unwrap().is_none());
    assert!(store.stored_fingerprint().unwrap().is_none());
}

#[test]
fn save_overwrites_previous_record() {
    let (_dir, store) = setup_store();
    let first = sample_plan();
    store.save(&first).unwrap();

    let mut second = sample_plan();
    second.fingerprint = "different".to_string();
    store.save(&second).unwrap();

    let loaded = store.load().unwrap().expect("plan present");
    assert_eq!(loaded.plan_id, second.plan_id);
    assert_eq!(
        store.stored_fingerprint().unwrap().as_deref(),
        Some("different")
    );
}

#[test]
fn clear_removes_the_record() {
    let (_dir, store) = setup_store();
    store.save(&sample_plan()).unwrap();
    store.clear().unwrap();
    assert!(store.load().unwrap().is_none());
}

#[test]
fn corrupt_payload_is_treated_as_absent_and_dropped() {
    let (dir, store) = setup_store();
    store.save(&sample_plan()).unwrap();

    let conn = Connection::open(dir.path().join("plans.sqlite")).unwrap();
    conn.execute("UPDATE plan_record SET payload = 'not json'", [])
        .unwrap();
    drop(conn);

    assert!(store.load().unwrap().is_none());
    // The broken record is gone, not just skipped.
    assert!(store.stored_fingerprint().unwrap().is_none());
}

#[test]
fn drift_check_surfaces_mismatch_without_touching_the_plan() {
    let (_dir, store) = setup_store();
    let plan = sample_plan();
    store.save(&plan).unwrap();

    assert_eq!(
        store.drift_check(&plan.fingerprint).unwrap(),
        Some(PlanCompatibility::Match)
    );

    let drifted = store.drift_check("something-else").unwrap();
    match drifted {
        Some(PlanCompatibility::Drifted { stored, current }) => {
            assert_eq!(stored, plan.fingerprint);
            assert_eq!(current, "something-else");
        }
        other => panic!("expected drift, got {other:?}"),
    }
    // Drift never auto-clears the plan; the caller decides.
    assert!(store.load().unwrap().is_some());
}

#[test]
fn drift_check_reports_nothing_when_store_is_empty() {
    let (_dir, store) = setup_store();
    assert!(store.drift_check("anything").unwrap().is_none());
}
