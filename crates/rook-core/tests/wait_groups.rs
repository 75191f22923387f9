//! Wait-group scenarios.

use rook_core::ErrorKind;
use rook_core::ShardCore;
use rook_core::types::NamespaceTimestampedId;
use rook_core::wait_groups::*;
use rook_store::Store;

const MINUTE: i64 = 60 * 1_000_000_000;
const HOUR: i64 = 60 * MINUTE;
const T0: i64 = 1_700_000_000_000_000_000;

fn wait_groups_core() -> WaitGroupsCore {
    WaitGroupsCore::new(Store::in_memory().unwrap(), &[0x1d, 0x36, 0x00, 0x00], &[0x00; 4], &[0xff; 4])
}

fn namespace_id(account_id: u64, namespace: &str) -> NamespaceTimestampedId {
    NamespaceTimestampedId {
        account_id,
        namespace_name: namespace.to_string(),
        namespace_created_at: T0,
    }
}

fn wait_group_id(account_id: u64, namespace: &str, name: &str) -> WaitGroupId {
    WaitGroupId {
        account_id,
        namespace_name: namespace.to_string(),
        namespace_created_at: T0,
        wait_group_name: name.to_string(),
    }
}

fn create(
    core: &WaitGroupsCore,
    account_id: u64,
    namespace: &str,
    name: &str,
    counter: u64,
    now: i64,
) -> WaitGroup {
    core.create_wait_group(CreateWaitGroupRequest {
        namespace_timestamped_id: namespace_id(account_id, namespace),
        name: name.to_string(),
        description: "test description".to_string(),
        counter,
        expires_at: now + HOUR,
        now,
        max_number_of_wait_groups_per_namespace: 100,
    })
    .unwrap()
    .wait_group
}

fn complete(
    core: &WaitGroupsCore,
    id: &WaitGroupId,
    process_ids: &[&str],
    now: i64,
) -> WaitGroup {
    core.complete_jobs_from_wait_group(CompleteJobsFromWaitGroupRequest {
        wait_group_id: id.clone(),
        process_ids: process_ids.iter().map(|process| process.to_string()).collect(),
        now,
    })
    .unwrap()
    .wait_group
}

fn get(core: &WaitGroupsCore, id: &WaitGroupId) -> Result<WaitGroup, rook_core::CoreError> {
    core.get_wait_group(GetWaitGroupRequest { wait_group_id: id.clone() })
        .map(|response| response.wait_group)
}

fn run_gc(core: &WaitGroupsCore, max_deleted: i64) {
    core.run_wait_groups_garbage_collection(RunWaitGroupsGarbageCollectionRequest {
        now: T0,
        gc_records_page_size: 100,
        gc_record_wait_groups_page_size: 1000,
        max_deleted_objects: max_deleted,
    })
    .unwrap();
}

#[test]
fn create_and_get_wait_group() {
    let core = wait_groups_core();
    let account_id = rand::random();

    let created = create(&core, account_id, "test_namespace", "test_wait_group", 10, T0);
    assert_eq!(created.counter, 10);
    assert_eq!(created.completed, 0);
    assert_eq!(created.created_at, T0);
    assert_eq!(created.expires_at, T0 + HOUR);

    let id = wait_group_id(account_id, "test_namespace", "test_wait_group");
    let fetched = get(&core, &id).unwrap();
    assert_eq!(fetched, created);
}

#[test]
fn duplicate_name_is_rejected() {
    let core = wait_groups_core();
    let account_id = rand::random();
    create(&core, account_id, "test_namespace", "test_wait_group", 10, T0);

    let err = core
        .create_wait_group(CreateWaitGroupRequest {
            namespace_timestamped_id: namespace_id(account_id, "test_namespace"),
            name: "test_wait_group".to_string(),
            description: String::new(),
            counter: 5,
            expires_at: T0 + HOUR,
            now: T0 + MINUTE,
            max_number_of_wait_groups_per_namespace: 100,
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
}

#[test]
fn add_jobs_raises_the_target() {
    let core = wait_groups_core();
    let account_id = rand::random();
    create(&core, account_id, "test_namespace", "test_wait_group", 10, T0);
    let id = wait_group_id(account_id, "test_namespace", "test_wait_group");

    let wait_group = core
        .add_jobs_to_wait_group(AddJobsToWaitGroupRequest {
            wait_group_id: id.clone(),
            counter: 5,
            now: T0 + MINUTE,
            max_wait_group_size: 1000,
        })
        .unwrap()
        .wait_group;
    assert_eq!(wait_group.counter, 15);
    assert_eq!(wait_group.updated_at, T0 + MINUTE);
}

#[test]
fn add_jobs_to_missing_wait_group_is_not_found() {
    let core = wait_groups_core();
    let id = wait_group_id(rand::random(), "test_namespace", "missing");

    let err = core
        .add_jobs_to_wait_group(AddJobsToWaitGroupRequest {
            wait_group_id: id,
            counter: 5,
            now: T0,
            max_wait_group_size: 1000,
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn add_jobs_honors_max_wait_group_size() {
    let core = wait_groups_core();
    let account_id = rand::random();
    create(&core, account_id, "test_namespace", "test_wait_group", 900, T0);
    let id = wait_group_id(account_id, "test_namespace", "test_wait_group");

    let err = core
        .add_jobs_to_wait_group(AddJobsToWaitGroupRequest {
            wait_group_id: id.clone(),
            counter: 200,
            now: T0 + MINUTE,
            max_wait_group_size: 1000,
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    assert_eq!(err.context().get("limit").map(String::as_str), Some("1000"));

    // The rejected delta left the counter untouched.
    assert_eq!(get(&core, &id).unwrap().counter, 900);

    let wait_group = core
        .add_jobs_to_wait_group(AddJobsToWaitGroupRequest {
            wait_group_id: id,
            counter: 100,
            now: T0 + MINUTE,
            max_wait_group_size: 1000,
        })
        .unwrap()
        .wait_group;
    assert_eq!(wait_group.counter, 1000);
}

#[test]
fn completions_deduplicate_by_process_id() {
    let core = wait_groups_core();
    let account_id = rand::random();
    create(&core, account_id, "test_namespace", "test_wait_group", 10, T0);
    let id = wait_group_id(account_id, "test_namespace", "test_wait_group");

    let wait_group = complete(&core, &id, &["p1", "p2", "p3"], T0 + MINUTE);
    assert_eq!(wait_group.completed, 3);

    // Repeats are silent no-ops.
    let wait_group = complete(&core, &id, &["p1", "p2"], T0 + 2 * MINUTE);
    assert_eq!(wait_group.completed, 3);
    assert_eq!(wait_group.updated_at, T0 + 2 * MINUTE);

    // A mixed batch counts only the new process.
    let wait_group = complete(&core, &id, &["p3", "p4"], T0 + 3 * MINUTE);
    assert_eq!(wait_group.completed, 4);
}

#[test]
fn duplicate_process_ids_within_one_batch_count_once() {
    let core = wait_groups_core();
    let account_id = rand::random();
    create(&core, account_id, "test_namespace", "test_wait_group", 10, T0);
    let id = wait_group_id(account_id, "test_namespace", "test_wait_group");

    let wait_group = complete(&core, &id, &["p1", "p1", "p1"], T0 + MINUTE);
    assert_eq!(wait_group.completed, 1);
}

#[test]
fn complete_jobs_on_missing_wait_group_is_not_found() {
    let core = wait_groups_core();
    let id = wait_group_id(rand::random(), "test_namespace", "missing");

    let err = core
        .complete_jobs_from_wait_group(CompleteJobsFromWaitGroupRequest {
            wait_group_id: id,
            process_ids: vec!["p1".to_string()],
            now: T0,
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn list_wait_groups_pages_by_name() {
    let core = wait_groups_core();
    let account_id = rand::random();

    for name in ["wg_a", "wg_b", "wg_c"] {
        create(&core, account_id, "test_namespace", name, 1, T0);
    }

    let response = core
        .list_wait_groups(ListWaitGroupsRequest {
            namespace_timestamped_id: namespace_id(account_id, "test_namespace"),
            pagination_token: None,
            limit: 2,
        })
        .unwrap();
    assert_eq!(response.wait_groups.len(), 2);
    assert_eq!(response.wait_groups[0].id.wait_group_name, "wg_a");
    let token = response.next_pagination_token.expect("second page exists");

    let response = core
        .list_wait_groups(ListWaitGroupsRequest {
            namespace_timestamped_id: namespace_id(account_id, "test_namespace"),
            pagination_token: Some(token),
            limit: 2,
        })
        .unwrap();
    assert_eq!(response.wait_groups.len(), 1);
    assert_eq!(response.wait_groups[0].id.wait_group_name, "wg_c");
    assert!(response.next_pagination_token.is_none());
}

#[test]
fn delete_removes_the_group_and_queues_job_cleanup() {
    let core = wait_groups_core();
    let account_id = rand::random();
    create(&core, account_id, "test_namespace", "test_wait_group", 10, T0);
    let id = wait_group_id(account_id, "test_namespace", "test_wait_group");
    complete(&core, &id, &["p1", "p2", "p3"], T0 + MINUTE);

    core.delete_wait_group(DeleteWaitGroupRequest {
        wait_group_id: id.clone(),
        record_id: rand::random(),
    })
    .unwrap();

    assert_eq!(get(&core, &id).unwrap_err().kind(), ErrorKind::NotFound);

    // The job rows are reaped by GC; afterwards a recreated group with the
    // same name starts from a clean dedup slate.
    run_gc(&core, 1000);
    create(&core, account_id, "test_namespace", "test_wait_group", 10, T0 + 2 * MINUTE);
    let wait_group = complete(&core, &id, &["p1"], T0 + 3 * MINUTE);
    assert_eq!(wait_group.completed, 1);
}

#[test]
fn delete_of_missing_wait_group_is_idempotent() {
    let core = wait_groups_core();
    let id = wait_group_id(rand::random(), "test_namespace", "missing");

    core.delete_wait_group(DeleteWaitGroupRequest { wait_group_id: id, record_id: rand::random() })
        .unwrap();
}

#[test]
fn create_honors_namespace_limit() {
    let core = wait_groups_core();
    let account_id = rand::random();

    for index in 0..3 {
        core.create_wait_group(CreateWaitGroupRequest {
            namespace_timestamped_id: namespace_id(account_id, "test_namespace"),
            name: format!("wg_{index}"),
            description: String::new(),
            counter: 1,
            expires_at: T0 + HOUR,
            now: T0,
            max_number_of_wait_groups_per_namespace: 3,
        })
        .unwrap();
    }

    let err = core
        .create_wait_group(CreateWaitGroupRequest {
            namespace_timestamped_id: namespace_id(account_id, "test_namespace"),
            name: "one_too_many".to_string(),
            description: String::new(),
            counter: 1,
            expires_at: T0 + HOUR,
            now: T0,
            max_number_of_wait_groups_per_namespace: 3,
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    assert_eq!(err.context().get("limit").map(String::as_str), Some("3"));
}

#[test]
fn large_wait_group_completes_in_batches() {
    let core = wait_groups_core();
    let account_id = rand::random();
    create(&core, account_id, "test_namespace", "big", 2000, T0);
    let id = wait_group_id(account_id, "test_namespace", "big");

    for batch in 0..4u64 {
        let process_ids: Vec<String> =
            (0..500).map(|index| format!("process_{batch}_{index}")).collect();
        let refs: Vec<&str> = process_ids.iter().map(String::as_str).collect();
        let wait_group = complete(&core, &id, &refs, T0 + MINUTE);
        assert_eq!(wait_group.completed, (batch + 1) * 500);
    }

    let wait_group = get(&core, &id).unwrap();
    assert_eq!(wait_group.counter, 2000);
    assert_eq!(wait_group.completed, 2000);
}

#[test]
fn gc_reaps_deleted_group_jobs_across_bounded_passes() {
    let core = wait_groups_core();
    let account_id = rand::random();
    create(&core, account_id, "test_namespace", "doomed", 1500, T0);
    create(&core, account_id, "test_namespace", "kept", 10, T0);
    let doomed = wait_group_id(account_id, "test_namespace", "doomed");
    let kept = wait_group_id(account_id, "test_namespace", "kept");

    let process_ids: Vec<String> = (0..1500).map(|index| format!("process_{index}")).collect();
    let refs: Vec<&str> = process_ids.iter().map(String::as_str).collect();
    complete(&core, &doomed, &refs, T0 + MINUTE);
    complete(&core, &kept, &["p1"], T0 + MINUTE);

    core.delete_wait_group(DeleteWaitGroupRequest {
        wait_group_id: doomed.clone(),
        record_id: rand::random(),
    })
    .unwrap();

    // 1500 job rows against a budget of 1000 per pass: the first pass leaves
    // the record queued, the second finishes it, the third proves the queue
    // is empty (and touches nothing else).
    run_gc(&core, 1000);
    run_gc(&core, 1000);
    run_gc(&core, 1000);

    assert_eq!(get(&core, &doomed).unwrap_err().kind(), ErrorKind::NotFound);
    let wait_group = get(&core, &kept).unwrap();
    assert_eq!(wait_group.completed, 1);
}

#[test]
fn namespace_gc_sweeps_groups_jobs_and_counter() {
    let core = wait_groups_core();
    let account_id = rand::random();

    for index in 0..3 {
        let name = format!("wg_{index}");
        create(&core, account_id, "doomed_namespace", &name, 300, T0);
        let id = wait_group_id(account_id, "doomed_namespace", &name);
        let process_ids: Vec<String> = (0..300).map(|job| format!("process_{index}_{job}")).collect();
        let refs: Vec<&str> = process_ids.iter().map(String::as_str).collect();
        complete(&core, &id, &refs, T0 + MINUTE);
    }
    create(&core, account_id, "other_namespace", "survivor", 5, T0);

    core.wait_groups_delete_namespace(WaitGroupsDeleteNamespaceRequest {
        namespace_timestamped_id: namespace_id(account_id, "doomed_namespace"),
        record_id: rand::random(),
        now: T0,
    })
    .unwrap();

    // 900 jobs plus 3 bookkeeping objects per group plus the counter fit one
    // 1000-object pass, so the record completes immediately.
    run_gc(&core, 1000);

    for index in 0..3 {
        let id = wait_group_id(account_id, "doomed_namespace", &format!("wg_{index}"));
        assert_eq!(get(&core, &id).unwrap_err().kind(), ErrorKind::NotFound);
    }
    assert!(get(&core, &wait_group_id(account_id, "other_namespace", "survivor")).is_ok());

    // Counter went with the namespace: recreation has the full limit.
    core.create_wait_group(CreateWaitGroupRequest {
        namespace_timestamped_id: namespace_id(account_id, "doomed_namespace"),
        name: "reborn".to_string(),
        description: String::new(),
        counter: 1,
        expires_at: T0 + HOUR,
        now: T0 + MINUTE,
        max_number_of_wait_groups_per_namespace: 1,
    })
    .unwrap();
}

#[test]
fn snapshot_restore_preserves_counters_and_dedup() {
    let source = wait_groups_core();
    let target = wait_groups_core();
    let account_id = rand::random();

    create(&source, account_id, "test_namespace", "test_wait_group", 10, T0);
    let id = wait_group_id(account_id, "test_namespace", "test_wait_group");
    complete(&source, &id, &["p1", "p2"], T0 + MINUTE);

    let mut stream = Vec::new();
    source.snapshot(&mut stream).unwrap();

    // Post-snapshot completion stays on the source only.
    complete(&source, &id, &["p3"], T0 + 2 * MINUTE);

    target.restore(&mut stream.as_slice()).unwrap();

    let restored = get(&target, &id).unwrap();
    assert_eq!(restored.completed, 2);

    // Dedup state was transferred too: completing p1 again changes nothing,
    // while p3 is new on the restored core.
    let wait_group = complete(&target, &id, &["p1", "p3"], T0 + 3 * MINUTE);
    assert_eq!(wait_group.completed, 3);

    assert_eq!(get(&source, &id).unwrap().completed, 3);
}
