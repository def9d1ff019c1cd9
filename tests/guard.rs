use std::sync::Arc;

use hashguard::{
    Config, Database, HashguardError, IntegrityKey, IntegrityStore, MissingDigestPolicy,
    RecordType, Row, TableStore, ValidationContext,
};

fn invoices() -> RecordType {
    RecordType::new("Invoice", "invoices", "number", ["number", "customer", "total"])
}

fn invoice(number: &str, total: i64) -> Row {
    Row::new()
        .with("number", number)
        .with("customer", "acme")
        .with("total", total)
}

// ── Tamper detection ────────────────────────────────────────────────

#[test]
fn insert_load_tamper_reload() {
    let ctx = ValidationContext::new(Config::default()).unwrap();
    let db = Database::new("main");
    db.register_type(invoices()).unwrap();
    let guard = ctx
        .component("billing")
        .guard(&db, "inv", "Invoice integrity", "invoices")
        .unwrap();

    db.insert("invoices", invoice("A-1", 100)).unwrap();
    let key = IntegrityKey::new("inv.invoices", "invoices", "A-1");
    let d = ctx.guards().store().get(&key).unwrap().unwrap();

    let loaded = db.load("invoices", "A-1").unwrap().unwrap();
    assert_eq!(loaded, invoice("A-1", 100));

    db.write_unobserved("invoices", invoice("A-1", 1)).unwrap();
    match db.load("invoices", "A-1").unwrap_err() {
        HashguardError::Validation {
            key: failed_key,
            stored,
            computed,
        } => {
            assert_eq!(failed_key, key.to_string());
            assert_eq!(stored, d);
            assert_eq!(computed, guard.validator().hash(&invoice("A-1", 1)).unwrap());
            assert_ne!(stored, computed);
        }
        other => panic!("expected validation error, got: {other}"),
    }
}

#[test]
fn guarded_update_is_not_tampering() {
    let ctx = ValidationContext::new(Config::default()).unwrap();
    let db = Database::new("main");
    db.register_type(invoices()).unwrap();
    ctx.activate_guards(&db).unwrap();

    db.insert("invoices", invoice("A-1", 100)).unwrap();
    db.update("invoices", invoice("A-1", 250)).unwrap();
    let rows = db.load_all("invoices").unwrap();
    assert_eq!(rows, [invoice("A-1", 250)]);
}

#[test]
fn tampering_one_row_leaves_others_valid() {
    let ctx = ValidationContext::new(Config::default()).unwrap();
    let db = Database::new("main");
    db.register_type(invoices()).unwrap();
    ctx.activate_guards(&db).unwrap();

    db.insert("invoices", invoice("A-1", 100)).unwrap();
    db.insert("invoices", invoice("A-2", 200)).unwrap();
    db.write_unobserved("invoices", invoice("A-2", 0)).unwrap();

    assert!(db.load("invoices", "A-1").is_ok());
    assert!(db.load("invoices", "A-2").is_err());
    assert!(db.load_all("invoices").is_err());
}

#[test]
fn deleted_row_keeps_its_digest() {
    let ctx = ValidationContext::new(Config::default()).unwrap();
    let db = Database::new("main");
    db.register_type(invoices()).unwrap();
    ctx.activate_guards(&db).unwrap();

    db.insert("invoices", invoice("A-1", 100)).unwrap();
    assert!(db.delete("invoices", "A-1").unwrap());
    assert_eq!(ctx.guards().store().len().unwrap(), 1);
}

// ── Bootstrap ───────────────────────────────────────────────────────

#[test]
fn types_before_and_after_activation_are_guarded() {
    let ctx = ValidationContext::new(Config::default()).unwrap();
    let db = Database::new("main");
    db.register_type(invoices()).unwrap();
    ctx.activate_guards(&db).unwrap();
    db.register_type(RecordType::new("Payment", "payments", "id", ["id", "amount"]))
        .unwrap();

    db.insert("payments", Row::new().with("id", 1).with("amount", 5))
        .unwrap();
    db.write_unobserved("payments", Row::new().with("id", 1).with("amount", 500))
        .unwrap();
    assert!(matches!(
        db.load("payments", "1"),
        Err(HashguardError::Validation { .. })
    ));
    assert_eq!(ctx.guards().len(), 2);
}

#[test]
fn table_backed_store_in_same_database() {
    let db = Arc::new(Database::new("hash_db"));
    let store = Arc::new(TableStore::new(&db).unwrap());
    let ctx = ValidationContext::with_store(Config::default(), store).unwrap();
    db.register_type(invoices()).unwrap();
    assert_eq!(ctx.activate_guards(&db).unwrap(), 1);

    db.insert("invoices", invoice("A-1", 100)).unwrap();
    assert!(db.load("invoices", "A-1").is_ok());
    assert_eq!(db.load_all("hashes").unwrap().len(), 1);

    db.write_unobserved("invoices", invoice("A-1", 7)).unwrap();
    assert!(db.load("invoices", "A-1").is_err());
}

// ── Missing baseline ────────────────────────────────────────────────

#[test]
fn preexisting_rows_are_trusted_on_first_load() {
    let ctx = ValidationContext::new(Config::default()).unwrap();
    let db = Database::new("main");
    db.register_type(invoices()).unwrap();
    db.write_unobserved("invoices", invoice("A-1", 100)).unwrap();
    ctx.activate_guards(&db).unwrap();

    assert!(db.load("invoices", "A-1").is_ok());
    db.write_unobserved("invoices", invoice("A-1", 9)).unwrap();
    assert!(db.load("invoices", "A-1").is_err());
}

#[test]
fn reject_policy_fails_rows_without_baseline() {
    let config = Config {
        missing_digest: MissingDigestPolicy::Reject,
        ..Config::default()
    };
    let ctx = ValidationContext::new(config).unwrap();
    let db = Database::new("main");
    db.register_type(invoices()).unwrap();
    db.write_unobserved("invoices", invoice("A-1", 100)).unwrap();
    ctx.activate_guards(&db).unwrap();

    assert!(matches!(
        db.load("invoices", "A-1"),
        Err(HashguardError::MissingDigest { .. })
    ));
    db.insert("invoices", invoice("A-2", 1)).unwrap();
    assert!(db.load("invoices", "A-2").is_ok());
}
