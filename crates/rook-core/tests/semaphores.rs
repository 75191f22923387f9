//! Semaphore scenarios.

use rook_core::ErrorKind;
use rook_core::ShardCore;
use rook_core::semaphores::*;
use rook_core::types::NamespaceTimestampedId;
use rook_store::Store;

const MINUTE: i64 = 60 * 1_000_000_000;
const HOUR: i64 = 60 * MINUTE;
const T0: i64 = 1_700_000_000_000_000_000;

fn semaphores_core() -> SemaphoresCore {
    SemaphoresCore::new(Store::in_memory().unwrap(), &[0x1d, 0x36, 0x00, 0x00], &[0x00; 4], &[0xff; 4])
}

fn namespace_id(account_id: u64, namespace: &str) -> NamespaceTimestampedId {
    NamespaceTimestampedId {
        account_id,
        namespace_name: namespace.to_string(),
        namespace_created_at: T0,
    }
}

fn semaphore_id(account_id: u64, namespace: &str, name: &str) -> SemaphoreId {
    SemaphoreId {
        account_id,
        namespace_name: namespace.to_string(),
        namespace_created_at: T0,
        semaphore_name: name.to_string(),
    }
}

fn create(
    core: &SemaphoresCore,
    account_id: u64,
    namespace: &str,
    name: &str,
    permits: u64,
    now: i64,
) -> Semaphore {
    core.create_semaphore(CreateSemaphoreRequest {
        namespace_timestamped_id: namespace_id(account_id, namespace),
        name: name.to_string(),
        description: "test description".to_string(),
        permits,
        now,
        max_number_of_semaphores_per_namespace: 100,
    })
    .unwrap()
    .semaphore
}

fn acquire(
    core: &SemaphoresCore,
    id: &SemaphoreId,
    process_id: &str,
    expires_at: i64,
    now: i64,
) -> AcquireSemaphoreResponse {
    core.acquire_semaphore(AcquireSemaphoreRequest {
        semaphore_id: id.clone(),
        process_id: process_id.to_string(),
        expires_at,
        now,
    })
    .unwrap()
}

fn release(core: &SemaphoresCore, id: &SemaphoreId, process_id: &str, now: i64) -> Semaphore {
    core.release_semaphore(ReleaseSemaphoreRequest {
        semaphore_id: id.clone(),
        process_id: process_id.to_string(),
        now,
    })
    .unwrap()
    .semaphore
}

fn get(core: &SemaphoresCore, id: &SemaphoreId, now: i64) -> Semaphore {
    core.get_semaphore(GetSemaphoreRequest { semaphore_id: id.clone(), now }).unwrap().semaphore
}

fn run_gc(core: &SemaphoresCore, now: i64, max_visited: i64) {
    core.run_semaphores_garbage_collection(RunSemaphoresGarbageCollectionRequest {
        now,
        gc_records_page_size: 100,
        gc_record_semaphores_page_size: 100,
        max_visited_semaphores: max_visited,
    })
    .unwrap();
}

#[test]
fn acquire_seat_and_expire() {
    let core = semaphores_core();
    let account_id = rand::random();
    create(&core, account_id, "test_namespace", "test_semaphore", 1, T0);
    let id = semaphore_id(account_id, "test_namespace", "test_semaphore");

    let response = acquire(&core, &id, "process_1", T0 + MINUTE + HOUR, T0 + MINUTE);
    assert!(response.success);
    assert_eq!(response.semaphore.holders.len(), 1);
    assert_eq!(response.semaphore.holders[0].process_id, "process_1");
    assert_eq!(response.semaphore.holders[0].expires_at, T0 + MINUTE + HOUR);

    // The seat frees itself after expiration; the row persists.
    let semaphore = get(&core, &id, T0 + 2 * HOUR);
    assert!(semaphore.holders.is_empty());
    assert_eq!(semaphore.permits, 1);
}

#[test]
fn repeated_acquire_extends_the_seat() {
    let core = semaphores_core();
    let account_id = rand::random();
    create(&core, account_id, "test_namespace", "test_semaphore", 1, T0);
    let id = semaphore_id(account_id, "test_namespace", "test_semaphore");

    assert!(acquire(&core, &id, "process_1", T0 + MINUTE + HOUR, T0 + MINUTE).success);

    let response = acquire(&core, &id, "process_1", T0 + 2 * MINUTE + HOUR, T0 + 2 * MINUTE);
    assert!(response.success);
    assert_eq!(response.semaphore.holders.len(), 1);
    assert_eq!(response.semaphore.holders[0].expires_at, T0 + 2 * MINUTE + HOUR);
    assert_eq!(response.semaphore.holders[0].locked_at, T0 + 2 * MINUTE);
}

#[test]
fn permits_bound_concurrent_holders() {
    let core = semaphores_core();
    let account_id = rand::random();
    create(&core, account_id, "test_namespace", "test_semaphore", 2, T0);
    let id = semaphore_id(account_id, "test_namespace", "test_semaphore");

    assert!(acquire(&core, &id, "process_1", T0 + MINUTE + HOUR, T0 + MINUTE).success);
    assert!(acquire(&core, &id, "process_2", T0 + 2 * MINUTE + HOUR, T0 + 2 * MINUTE).success);

    // Third seat denied; state returned unchanged.
    let response = acquire(&core, &id, "process_3", T0 + 3 * MINUTE + HOUR, T0 + 3 * MINUTE);
    assert!(!response.success);
    assert_eq!(response.semaphore.holders.len(), 2);

    // A seat opens after one holder expires.
    let response = acquire(&core, &id, "process_3", T0 + MINUTE + 2 * HOUR, T0 + MINUTE + HOUR + 1);
    assert!(response.success);
    let holders: Vec<&str> =
        response.semaphore.holders.iter().map(|holder| holder.process_id.as_str()).collect();
    assert_eq!(holders, vec!["process_2", "process_3"]);
}

#[test]
fn release_frees_a_seat() {
    let core = semaphores_core();
    let account_id = rand::random();
    create(&core, account_id, "test_namespace", "test_semaphore", 1, T0);
    let id = semaphore_id(account_id, "test_namespace", "test_semaphore");

    assert!(acquire(&core, &id, "process_1", T0 + MINUTE + HOUR, T0 + MINUTE).success);
    assert!(!acquire(&core, &id, "process_2", T0 + MINUTE + HOUR, T0 + MINUTE).success);

    let semaphore = release(&core, &id, "process_1", T0 + 2 * MINUTE);
    assert!(semaphore.holders.is_empty());

    assert!(acquire(&core, &id, "process_2", T0 + 3 * MINUTE + HOUR, T0 + 3 * MINUTE).success);
}

#[test]
fn release_of_non_holder_is_a_silent_noop() {
    let core = semaphores_core();
    let account_id = rand::random();
    create(&core, account_id, "test_namespace", "test_semaphore", 1, T0);
    let id = semaphore_id(account_id, "test_namespace", "test_semaphore");

    assert!(acquire(&core, &id, "process_1", T0 + MINUTE + HOUR, T0 + MINUTE).success);

    let semaphore = release(&core, &id, "process_2", T0 + 2 * MINUTE);
    assert_eq!(semaphore.holders.len(), 1);
    assert_eq!(semaphore.holders[0].process_id, "process_1");
}

#[test]
fn update_changes_description_and_permits() {
    let core = semaphores_core();
    let account_id = rand::random();
    create(&core, account_id, "test_namespace", "test_semaphore", 1, T0);
    let id = semaphore_id(account_id, "test_namespace", "test_semaphore");

    let response = core
        .update_semaphore(UpdateSemaphoreRequest {
            semaphore_id: id.clone(),
            description: "updated".to_string(),
            permits: 5,
            now: T0 + MINUTE,
        })
        .unwrap();
    assert_eq!(response.semaphore.permits, 5);
    assert_eq!(response.semaphore.description, "updated");
    assert_eq!(response.semaphore.updated_at, T0 + MINUTE);
    assert_eq!(response.semaphore.created_at, T0);
}

#[test]
fn update_rejects_permits_below_live_holders() {
    let core = semaphores_core();
    let account_id = rand::random();
    create(&core, account_id, "test_namespace", "test_semaphore", 3, T0);
    let id = semaphore_id(account_id, "test_namespace", "test_semaphore");

    for process in ["p1", "p2", "p3"] {
        assert!(acquire(&core, &id, process, T0 + MINUTE + HOUR, T0 + MINUTE).success);
    }

    let err = core
        .update_semaphore(UpdateSemaphoreRequest {
            semaphore_id: id.clone(),
            description: String::new(),
            permits: 2,
            now: T0 + 2 * MINUTE,
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    // State unchanged.
    let semaphore = get(&core, &id, T0 + 3 * MINUTE);
    assert_eq!(semaphore.permits, 3);
    assert_eq!(semaphore.holders.len(), 3);

    // Expired holders do not count against the new permit total: all three
    // are gone by T+2h, so the same shrink succeeds.
    let response = core
        .update_semaphore(UpdateSemaphoreRequest {
            semaphore_id: id,
            description: String::new(),
            permits: 2,
            now: T0 + 2 * HOUR,
        })
        .unwrap();
    assert_eq!(response.semaphore.permits, 2);
    assert!(response.semaphore.holders.is_empty());
}

#[test]
fn missing_semaphores_are_not_found() {
    let core = semaphores_core();
    let id = semaphore_id(rand::random(), "test_namespace", "missing");

    let err = core.get_semaphore(GetSemaphoreRequest { semaphore_id: id.clone(), now: T0 }).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = core
        .acquire_semaphore(AcquireSemaphoreRequest {
            semaphore_id: id.clone(),
            process_id: "p1".to_string(),
            expires_at: T0 + HOUR,
            now: T0,
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = core
        .release_semaphore(ReleaseSemaphoreRequest {
            semaphore_id: id.clone(),
            process_id: "p1".to_string(),
            now: T0,
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = core
        .update_semaphore(UpdateSemaphoreRequest {
            semaphore_id: id,
            description: String::new(),
            permits: 1,
            now: T0,
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn duplicate_name_is_rejected() {
    let core = semaphores_core();
    let account_id = rand::random();
    create(&core, account_id, "test_namespace", "test_semaphore", 1, T0);

    let err = core
        .create_semaphore(CreateSemaphoreRequest {
            namespace_timestamped_id: namespace_id(account_id, "test_namespace"),
            name: "test_semaphore".to_string(),
            description: String::new(),
            permits: 5,
            now: T0 + MINUTE,
            max_number_of_semaphores_per_namespace: 100,
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
}

#[test]
fn create_honors_namespace_limit() {
    let core = semaphores_core();
    let account_id = rand::random();

    for index in 0..3 {
        core.create_semaphore(CreateSemaphoreRequest {
            namespace_timestamped_id: namespace_id(account_id, "test_namespace"),
            name: format!("semaphore_{index}"),
            description: String::new(),
            permits: 1,
            now: T0,
            max_number_of_semaphores_per_namespace: 3,
        })
        .unwrap();
    }

    let err = core
        .create_semaphore(CreateSemaphoreRequest {
            namespace_timestamped_id: namespace_id(account_id, "test_namespace"),
            name: "one_too_many".to_string(),
            description: String::new(),
            permits: 1,
            now: T0,
            max_number_of_semaphores_per_namespace: 3,
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    assert_eq!(err.context().get("limit").map(String::as_str), Some("3"));

    // Deleting one frees a slot.
    core.delete_semaphore(DeleteSemaphoreRequest {
        semaphore_id: semaphore_id(account_id, "test_namespace", "semaphore_0"),
    })
    .unwrap();
    core.create_semaphore(CreateSemaphoreRequest {
        namespace_timestamped_id: namespace_id(account_id, "test_namespace"),
        name: "replacement".to_string(),
        description: String::new(),
        permits: 1,
        now: T0 + MINUTE,
        max_number_of_semaphores_per_namespace: 3,
    })
    .unwrap();
}

#[test]
fn delete_is_idempotent_and_removes_state() {
    let core = semaphores_core();
    let account_id = rand::random();
    create(&core, account_id, "test_namespace", "test_semaphore", 1, T0);
    let id = semaphore_id(account_id, "test_namespace", "test_semaphore");

    assert!(acquire(&core, &id, "process_1", T0 + MINUTE + HOUR, T0 + MINUTE).success);

    core.delete_semaphore(DeleteSemaphoreRequest { semaphore_id: id.clone() }).unwrap();
    let err = core.get_semaphore(GetSemaphoreRequest { semaphore_id: id.clone(), now: T0 }).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // Second delete is a no-op, and a later GC pass finds a clean index
    // (the held semaphore's expiration entry went away with the row).
    core.delete_semaphore(DeleteSemaphoreRequest { semaphore_id: id }).unwrap();
    run_gc(&core, T0 + 2 * HOUR, 1000);
}

#[test]
fn list_semaphores_pages_by_name() {
    let core = semaphores_core();
    let account_id = rand::random();

    for name in ["sem_a", "sem_b", "sem_c"] {
        create(&core, account_id, "test_namespace", name, 1, T0);
    }

    let response = core
        .list_semaphores(ListSemaphoresRequest {
            namespace_timestamped_id: namespace_id(account_id, "test_namespace"),
            pagination_token: None,
            limit: 2,
        })
        .unwrap();
    assert_eq!(response.semaphores.len(), 2);
    assert_eq!(response.semaphores[0].id.semaphore_name, "sem_a");
    let token = response.next_pagination_token.expect("second page exists");

    let response = core
        .list_semaphores(ListSemaphoresRequest {
            namespace_timestamped_id: namespace_id(account_id, "test_namespace"),
            pagination_token: Some(token),
            limit: 2,
        })
        .unwrap();
    assert_eq!(response.semaphores.len(), 1);
    assert_eq!(response.semaphores[0].id.semaphore_name, "sem_c");
    assert!(response.next_pagination_token.is_none());
}

#[test]
fn namespace_delete_gc_removes_rows_and_counter() {
    let core = semaphores_core();
    let account_id = rand::random();

    for index in 0..5 {
        create(&core, account_id, "doomed_namespace", &format!("semaphore_{index}"), 2, T0);
        let id = semaphore_id(account_id, "doomed_namespace", &format!("semaphore_{index}"));
        assert!(acquire(&core, &id, "holder", T0 + HOUR, T0).success);
    }
    create(&core, account_id, "other_namespace", "survivor", 1, T0);

    core.semaphores_delete_namespace(SemaphoresDeleteNamespaceRequest {
        namespace_timestamped_id: namespace_id(account_id, "doomed_namespace"),
        record_id: rand::random(),
        now: T0,
    })
    .unwrap();

    run_gc(&core, T0, 1000);

    for index in 0..5 {
        let id = semaphore_id(account_id, "doomed_namespace", &format!("semaphore_{index}"));
        let err = core.get_semaphore(GetSemaphoreRequest { semaphore_id: id, now: T0 }).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
    let survivor = semaphore_id(account_id, "other_namespace", "survivor");
    assert_eq!(get(&core, &survivor, T0).permits, 1);

    // Counter gone with the namespace: a recreated namespace has the full
    // limit available.
    core.create_semaphore(CreateSemaphoreRequest {
        namespace_timestamped_id: namespace_id(account_id, "doomed_namespace"),
        name: "reborn".to_string(),
        description: String::new(),
        permits: 1,
        now: T0 + MINUTE,
        max_number_of_semaphores_per_namespace: 1,
    })
    .unwrap();
}

#[test]
fn bounded_namespace_gc_resumes() {
    let core = semaphores_core();
    let account_id = rand::random();

    for index in 0..15 {
        create(&core, account_id, "doomed_namespace", &format!("semaphore_{index:02}"), 1, T0);
    }

    core.semaphores_delete_namespace(SemaphoresDeleteNamespaceRequest {
        namespace_timestamped_id: namespace_id(account_id, "doomed_namespace"),
        record_id: rand::random(),
        now: T0,
    })
    .unwrap();

    run_gc(&core, T0, 10);
    let response = core
        .list_semaphores(ListSemaphoresRequest {
            namespace_timestamped_id: namespace_id(account_id, "doomed_namespace"),
            pagination_token: None,
            limit: 100,
        })
        .unwrap();
    assert_eq!(response.semaphores.len(), 5);

    run_gc(&core, T0, 10);
    let response = core
        .list_semaphores(ListSemaphoresRequest {
            namespace_timestamped_id: namespace_id(account_id, "doomed_namespace"),
            pagination_token: None,
            limit: 100,
        })
        .unwrap();
    assert!(response.semaphores.is_empty());
}

#[test]
fn gc_rewrites_expired_holders_but_keeps_rows() {
    let core = semaphores_core();
    let account_id = rand::random();
    create(&core, account_id, "test_namespace", "expiring", 2, T0);
    create(&core, account_id, "test_namespace", "steady", 2, T0);

    let expiring = semaphore_id(account_id, "test_namespace", "expiring");
    let alive = semaphore_id(account_id, "test_namespace", "steady");

    assert!(acquire(&core, &expiring, "p1", T0 + 30 * MINUTE, T0).success);
    assert!(acquire(&core, &expiring, "p2", T0 + 2 * HOUR, T0).success);
    assert!(acquire(&core, &alive, "p3", T0 + 2 * HOUR, T0).success);

    run_gc(&core, T0 + 31 * MINUTE, 1000);

    // The expired seat is gone but the semaphore row survives.
    let semaphore = get(&core, &expiring, T0 + 31 * MINUTE);
    assert_eq!(semaphore.holders.len(), 1);
    assert_eq!(semaphore.holders[0].process_id, "p2");

    let semaphore = get(&core, &alive, T0 + 31 * MINUTE);
    assert_eq!(semaphore.holders.len(), 1);

    // Fully-expired semaphores keep their row with zero holders.
    run_gc(&core, T0 + 3 * HOUR, 1000);
    let semaphore = get(&core, &expiring, T0 + 3 * HOUR);
    assert!(semaphore.holders.is_empty());
    assert_eq!(semaphore.permits, 2);
}

#[test]
fn snapshot_restore_preserves_holders() {
    let source = semaphores_core();
    let target = semaphores_core();
    let account_id = rand::random();

    create(&source, account_id, "test_namespace", "test_semaphore", 2, T0);
    let id = semaphore_id(account_id, "test_namespace", "test_semaphore");
    assert!(acquire(&source, &id, "process_1", T0 + HOUR, T0).success);

    let mut stream = Vec::new();
    source.snapshot(&mut stream).unwrap();

    // Post-snapshot mutations stay on the source.
    release(&source, &id, "process_1", T0 + MINUTE);
    assert!(acquire(&source, &id, "process_2", T0 + HOUR, T0 + MINUTE).success);

    target.restore(&mut stream.as_slice()).unwrap();

    let semaphore = get(&target, &id, T0 + 2 * MINUTE);
    assert_eq!(semaphore.holders.len(), 1);
    assert_eq!(semaphore.holders[0].process_id, "process_1");

    let semaphore = get(&source, &id, T0 + 2 * MINUTE);
    assert_eq!(semaphore.holders.len(), 1);
    assert_eq!(semaphore.holders[0].process_id, "process_2");
}

#[test]
fn mutating_get_persists_expired_holder_cleanup() {
    let core = semaphores_core();
    let account_id = rand::random();
    create(&core, account_id, "test_namespace", "test_semaphore", 1, T0);
    let id = semaphore_id(account_id, "test_namespace", "test_semaphore");

    assert!(acquire(&core, &id, "process_1", T0 + 30 * MINUTE, T0).success);

    // The read drops the expired holder and persists that; a following GC
    // pass at the same instant finds a clean expiration index.
    let semaphore = get(&core, &id, T0 + HOUR);
    assert!(semaphore.holders.is_empty());
    run_gc(&core, T0 + HOUR, 1000);
}
