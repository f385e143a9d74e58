//! Integration tests for centime-core
//!
//! These tests exercise the full confirm → learn → sweep workflow and the
//! detect → auto-match → pattern-learn workflow end to end.

use centime_core::{
    categorize::Categorizer,
    db::{Database, NewTransfer},
    models::{AccountType, DetectionMethod, NewTransaction},
    transfer_learning::PatternLearner,
    transfers::{TransferDetector, TransferSettings},
    Error,
};
use chrono::Utc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn insert_tx(db: &Database, account: i64, days_ago: i64, amount: f64, desc: &str) -> i64 {
    db.insert_transaction(&NewTransaction {
        date: Utc::now().date_naive() - chrono::Duration::days(days_ago),
        amount,
        description: desc.to_string(),
        account_id: Some(account),
    })
    .expect("Failed to insert transaction")
}

// =============================================================================
// Categorization Workflow Tests
// =============================================================================

#[test]
fn test_on_disk_database_persists_across_reopen() {
    init_tracing();
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("centime.db");
    let path = path.to_str().expect("Temp path is not valid UTF-8");

    {
        let db = Database::new(path).expect("Failed to create on-disk database");
        db.seed_default_categories().unwrap();
        db.insert_account("Main Checking", AccountType::Checking, Some("ZKB"))
            .unwrap();
    }

    let db = Database::new(path).expect("Failed to reopen database");
    assert_eq!(db.path(), path);
    assert!(!db.list_categories().unwrap().is_empty());
    assert_eq!(db.list_accounts(true).unwrap().len(), 1);
}

#[test]
fn test_confirm_learn_sweep_then_automatch_workflow() {
    init_tracing();
    let db = Database::in_memory().expect("Failed to create in-memory database");
    db.seed_default_categories().unwrap();
    let account = db
        .insert_account("Main Checking", AccountType::Checking, Some("ZKB"))
        .unwrap();
    let groceries = db
        .list_categories()
        .unwrap()
        .into_iter()
        .find(|c| c.name == "Groceries")
        .unwrap()
        .id;

    // A month of Lidl visits plus unrelated noise
    let first_visit = insert_tx(
        &db,
        account,
        20,
        -34.50,
        "Purchase Visa Debit xxxx 7693, Lidl Zuerich 0800 Zuerich",
    );
    let second_visit = insert_tx(&db, account, 12, -18.20, "Card, Lidl Zuerich 0800");
    let pharmacy = insert_tx(&db, account, 10, -12.00, "Card, Amavita Apotheke Bern");

    // Nothing learned yet: first pass marks everything for review
    let categorizer = Categorizer::new(&db);
    let summary = categorizer.categorize_new(0.8).unwrap();
    assert_eq!(summary.auto_categorized, 0);
    assert_eq!(summary.needs_review, 3);

    // Human confirms one Lidl visit; the other is swept along
    let outcome = categorizer.confirm(first_visit, groceries, None).unwrap();
    assert!(outcome.learning_applied);
    assert!(outcome.vendor_created);
    assert_eq!(outcome.pattern_learned.as_deref(), Some("LIDLZUERICH"));
    assert_eq!(outcome.similar_categorized, 1);

    let swept = db.get_transaction(second_visit).unwrap().unwrap();
    assert_eq!(swept.category_id, Some(groceries));
    assert_eq!(swept.confidence_score, Some(0.95));
    assert!(!swept.needs_review);

    // The pharmacy visit was untouched
    let untouched = db.get_transaction(pharmacy).unwrap().unwrap();
    assert!(untouched.category_id.is_none());

    // A fresh Lidl transaction now auto-categorizes through the learned pattern
    let third_visit = insert_tx(&db, account, 1, -22.80, "Card, Lidl Zuerich 0800 Zuerich");
    let summary = categorizer.categorize_new(0.8).unwrap();
    assert_eq!(summary.auto_categorized, 1);

    let auto = db.get_transaction(third_visit).unwrap().unwrap();
    assert_eq!(auto.category_id, Some(groceries));
    assert_eq!(auto.vendor_id, outcome.vendor_id);
    assert!(!auto.needs_review);
}

#[test]
fn test_manual_review_bucket_never_grows_vendor_library() {
    let db = Database::in_memory().expect("Failed to create in-memory database");
    db.seed_default_categories().unwrap();
    let account = db
        .insert_account("Main", AccountType::Checking, None)
        .unwrap();

    let twint = insert_tx(&db, account, 3, -40.0, "TWINT Payment, Kebab Haus");
    let categorizer = Categorizer::new(&db);

    // Routed to the TWINT bucket by the keyword pre-check
    let summary = categorizer.categorize_new(0.8).unwrap();
    assert_eq!(summary.sent_to_manual_review, 1);

    // Human later files it under Restaurants; no vendor may be minted from a
    // triage bucket
    let restaurants = db
        .list_categories()
        .unwrap()
        .into_iter()
        .find(|c| c.name == "Restaurants")
        .unwrap()
        .id;
    let outcome = categorizer.confirm(twint, restaurants, None).unwrap();
    assert!(!outcome.learning_applied);
    assert!(db.list_vendors(false).unwrap().is_empty());

    let tx = db.get_transaction(twint).unwrap().unwrap();
    assert_eq!(tx.category_id, Some(restaurants));
    assert_eq!(tx.confidence_score, Some(1.0));
}

// =============================================================================
// Transfer Workflow Tests
// =============================================================================

#[test]
fn test_detect_automatch_and_pattern_learning_workflow() {
    init_tracing();
    let db = Database::in_memory().expect("Failed to create in-memory database");
    let checking = db
        .insert_account("Main Checking", AccountType::Checking, Some("ZKB"))
        .unwrap();
    let savings = db
        .insert_account("Savings", AccountType::Savings, Some("ZKB"))
        .unwrap();

    let out = insert_tx(&db, checking, 1, -500.0, "Transfer to savings account");
    let inc = insert_tx(&db, savings, 1, 500.0, "Transfer from checking");
    let groceries_noise = insert_tx(&db, checking, 1, -55.30, "Card, Coop Pronto");

    let detector = TransferDetector::new(&db);
    let outcome = detector.detect(&TransferSettings::default()).unwrap();
    assert_eq!(outcome.auto_matched.len(), 1);

    let transfer_id = outcome.auto_matched[0];
    let transfer = db.get_transfer(transfer_id).unwrap().unwrap();
    assert_eq!(transfer.from_account_id, checking);
    assert_eq!(transfer.to_account_id, savings);

    // Both legs left the pool; noise did not
    assert!(db.get_transaction(out).unwrap().unwrap().transfer_id.is_some());
    assert!(db.get_transaction(inc).unwrap().unwrap().transfer_id.is_some());
    assert!(db
        .get_transaction(groceries_noise)
        .unwrap()
        .unwrap()
        .transfer_id
        .is_none());

    // Learn the flow, then next month's instance matches the pattern
    let learner = PatternLearner::new(&db);
    let pattern_id = learner.learn_from_transfer(transfer_id, None).unwrap();

    let next_out = insert_tx(&db, checking, 0, -500.0, "Transfer to savings account");
    let next_inc = insert_tx(&db, savings, 0, 500.0, "Transfer from checking");

    let matches = learner.find_matches(30).unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].pattern_id, pattern_id);
    assert_eq!(matches[0].from_transaction_id, next_out);
    assert_eq!(matches[0].to_transaction_id, next_inc);
    assert!(matches[0].confidence >= 0.8);

    // A second detection run re-claims the new pair; the old one stays put
    let outcome = detector.detect(&TransferSettings::default()).unwrap();
    assert_eq!(outcome.auto_matched.len(), 1);
    assert_eq!(db.list_transfers(None).unwrap().len(), 2);
}

#[test]
fn test_delete_transfer_releases_pair_for_redetection() {
    let db = Database::in_memory().expect("Failed to create in-memory database");
    let checking = db
        .insert_account("Checking", AccountType::Checking, None)
        .unwrap();
    let savings = db
        .insert_account("Savings", AccountType::Savings, None)
        .unwrap();

    let out = insert_tx(&db, checking, 0, -250.0, "Transfer to savings");
    let inc = insert_tx(&db, savings, 0, 250.0, "Transfer received");

    let detector = TransferDetector::new(&db);
    let outcome = detector.detect(&TransferSettings::default()).unwrap();
    assert_eq!(outcome.auto_matched.len(), 1);

    detector.delete_transfer(outcome.auto_matched[0]).unwrap();
    assert!(db.get_transaction(out).unwrap().unwrap().transfer_id.is_none());
    assert!(db.get_transaction(inc).unwrap().unwrap().transfer_id.is_none());

    // The released pair is found again on the next run
    let outcome = detector.detect(&TransferSettings::default()).unwrap();
    assert_eq!(outcome.auto_matched.len(), 1);
}

#[test]
fn test_failed_transfer_creation_leaves_no_partial_state() {
    init_tracing();
    let db = Database::in_memory().expect("Failed to create in-memory database");
    let checking = db
        .insert_account("Checking", AccountType::Checking, None)
        .unwrap();
    let savings = db
        .insert_account("Savings", AccountType::Savings, None)
        .unwrap();

    let out = insert_tx(&db, checking, 0, -250.0, "Transfer to savings");
    let inc = insert_tx(&db, savings, 0, 250.0, "Transfer received");
    let second_out = insert_tx(&db, checking, 1, -250.0, "Transfer to savings again");

    let detector = TransferDetector::new(&db);
    let transfer_id = detector.create_manual_transfer(out, inc).unwrap();

    // The incoming leg is already claimed; pairing it again must fail without
    // linking the new outgoing leg or adding a transfer row
    let err = db
        .create_transfer(&NewTransfer {
            from_transaction_id: second_out,
            to_transaction_id: inc,
            confidence_score: None,
            matched_rule: None,
            detection_method: DetectionMethod::Manual,
        })
        .unwrap_err();
    assert!(matches!(err, Error::InvalidData(_)));

    // Same for a to-transaction that does not exist at all
    let err = db
        .create_transfer(&NewTransfer {
            from_transaction_id: second_out,
            to_transaction_id: 9999,
            confidence_score: None,
            matched_rule: None,
            detection_method: DetectionMethod::Manual,
        })
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    assert!(db
        .get_transaction(second_out)
        .unwrap()
        .unwrap()
        .transfer_id
        .is_none());
    let transfers = db.list_transfers(None).unwrap();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].id, transfer_id);
}
