// End-to-end: parsed file → ingest → human edits on disk → reconcile

use ledger_curator::{
    ingest, read_parsed_rows, ChangedStore, Project, Provenance, ReconciliationEngine, StoreKey,
};
use std::fs;
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, content: &str) {
    fs::write(dir.path().join(name), content).unwrap();
}

fn ingest_file(project: &Project, account: &str, file: &str) -> ledger_curator::IngestReport {
    let config = project.load_config().unwrap();
    let mut stores = project.load().unwrap();
    let rows = read_parsed_rows(&project.path(file)).unwrap();
    let report = ingest(&mut stores, account, file, rows, &config).unwrap();
    project.save(&stores, "ingest", false).unwrap();
    project.audit_log().unwrap().record_ingest(&report).unwrap();
    report
}

fn reconcile(project: &Project, changed: ChangedStore) -> ledger_curator::ReconciliationReport {
    let mut stores = project.load().unwrap();
    let report = ReconciliationEngine::new().reconcile(changed, &mut stores).unwrap();
    project.save(&stores, "reconcile", false).unwrap();
    project.audit_log().unwrap().record_reconciliation(&report).unwrap();
    report
}

#[test]
fn test_review_cycle_on_disk() {
    let dir = TempDir::new().unwrap();
    let project = Project::init(dir.path()).unwrap();

    write(&dir, "confirmed.csv", "label,account,category\ncoffee shop,acc1,dining\n");
    write(
        &dir,
        "january.csv",
        "timestamp,raw_label,amount,balance\n\
         2025-01-02,Coffee  Shop ,-3.20,996.80\n\
         2025-01-03,Coffe Shp,-2.90,993.90\n\
         2025-01-04,Council Tax,-140.00,853.90\n",
    );

    // 1. ingest
    let report = ingest_file(&project, "acc1", "january.csv");
    assert_eq!(report.appended, vec![101, 102, 103]);
    assert!(report.balance_breaks.is_empty());

    let stores = project.load().unwrap();
    let ledger = stores.ledger.entries();
    assert_eq!((ledger[0].category.as_str(), ledger[0].provenance), ("dining", Provenance::Known));
    assert_eq!((ledger[1].category.as_str(), ledger[1].provenance), ("dining", Provenance::NewFuzzy));
    assert_eq!((ledger[2].category.as_str(), ledger[2].provenance), ("unknown", Provenance::NewUnknown));
    assert!(stores.pending.contains(&StoreKey::new("coffe shp", "acc1")));
    assert!(stores.unresolved.contains(&StoreKey::new("council tax", "acc1")));

    // 2. same file again: nothing new
    let again = ingest_file(&project, "acc1", "january.csv");
    assert!(again.resubmitted());
    assert_eq!(project.load().unwrap().ledger.len(), 3);

    // 3. human rejects the fuzzy match and categorises the unknown label
    write(
        &dir,
        "pending.csv",
        "label,account,tentative_category,status,override_category\n\
         coffe shp,acc1,dining,rejected,\n",
    );
    write(&dir, "unresolved.csv", "label,account,category\ncouncil tax,acc1,tax\n");

    let before = project.load().unwrap().exception_len();
    let rejected = reconcile(&project, ChangedStore::Pending);
    let promoted = reconcile(&project, ChangedStore::Unresolved);
    assert_eq!(rejected.reconciled.len(), 1);
    assert_eq!(promoted.reconciled.len(), 1);

    let stores = project.load().unwrap();
    assert_eq!(stores.exception_len(), before);
    assert!(stores.pending.is_empty());
    assert!(stores.confirmed.contains_key(&StoreKey::new("council tax", "acc1")));

    let ledger = stores.ledger.entries();
    assert_eq!((ledger[1].category.as_str(), ledger[1].provenance), ("unknown", Provenance::RejectedFuzzy));
    assert_eq!((ledger[2].category.as_str(), ledger[2].provenance), ("tax", Provenance::OverwrittenUnknown));

    // the rejected label moved to the unresolved set, still unknown
    let moved = stores
        .unresolved
        .rows()
        .iter()
        .find(|row| row.label == "coffe shp")
        .unwrap();
    assert_eq!(moved.category, "unknown");

    // 4. reconciling again changes nothing
    assert!(reconcile(&project, ChangedStore::Pending).is_noop());
    assert!(reconcile(&project, ChangedStore::Unresolved).is_noop());
    assert_eq!(project.load().unwrap(), stores);

    // 5. a later statement picks up the decisions
    write(
        &dir,
        "february.csv",
        "timestamp,raw_label,amount\n\
         2025-02-03,COFFE SHP,-2.90\n\
         2025-02-04,council tax,-140.00\n",
    );
    let february = ingest_file(&project, "acc1", "february.csv");
    assert_eq!(february.appended, vec![104, 105]);
    assert_eq!(february.count(Provenance::OldUnknown), 1);
    assert_eq!(february.count(Provenance::Known), 1);

    // 6. audit trail per key
    let audit = project.audit_log().unwrap();
    let events = audit.events_for_key(&StoreKey::new("coffe shp", "acc1")).unwrap();
    let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(types, vec!["pending_match_added", "fuzzy_rejected"]);
}
