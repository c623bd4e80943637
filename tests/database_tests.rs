use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use kickoff::config::MAX_LIST_TASKS;
use kickoff::db::{TaskCreateInfo, TaskDatabase, TaskId, TaskSchedule, TaskState};
use kickoff::error::KickoffError;

fn create_info(command: &str, require: &[&str], want: &[&str]) -> TaskCreateInfo {
    TaskCreateInfo {
        command: command.to_string(),
        schedule: TaskSchedule {
            required_resources: require.iter().map(|tag| tag.to_string()).collect(),
            optional_resources: want.iter().map(|tag| tag.to_string()).collect(),
        },
    }
}

fn tags(list: &[&str]) -> HashSet<String> {
    list.iter().map(|tag| tag.to_string()).collect()
}

fn states(list: &[TaskState]) -> HashSet<TaskState> {
    list.iter().copied().collect()
}

#[test]
fn test_created_task_is_pending() {
    let mut db = TaskDatabase::new();
    let id = db.create_task(create_info("echo hi", &["CPU"], &[])).id();

    let task = db.get_task(id).expect("task exists");
    assert_eq!(task.state(), TaskState::Pending);
    assert_eq!(task.command(), "echo hi");
    assert!(task.status().run_status.is_none());

    let stats = db.stats();
    assert_eq!(stats.num_pending, 1);
    assert_eq!(stats.num_running, 0);
    assert_eq!(stats.num_canceling, 0);
    assert_eq!(stats.num_finished, 0);
}

#[test]
fn test_task_ids_are_unique() {
    let mut db = TaskDatabase::new();
    let mut ids = HashSet::new();
    for _ in 0..200 {
        assert!(ids.insert(db.create_task(create_info("true", &[], &[])).id()));
    }
}

#[test]
fn test_hex_id_renders_and_parses() {
    let id = TaskId(0x0000_00ab_cdef_0123);
    let hex = id.to_string();
    assert_eq!(hex.len(), 16);
    assert_eq!(TaskId::from_hex(&hex), Some(id));

    assert_eq!(TaskId::from_hex(""), None);
    assert_eq!(TaskId::from_hex("zz"), None);
    assert_eq!(TaskId::from_hex("0123456789abcdef0"), None);
}

#[test]
fn test_take_requires_all_required_resources() {
    let mut db = TaskDatabase::new();
    db.create_task(create_info("train", &["CPU", "GPU"], &[]));

    assert!(db.take_task_to_run(&tags(&["CPU"])).is_none());
    assert_eq!(db.stats().num_pending, 1);

    let task = db.take_task_to_run(&tags(&["CPU", "GPU", "SSD"]));
    assert!(task.is_some());
    assert_eq!(db.stats().num_pending, 0);
    assert_eq!(db.stats().num_running, 1);
}

#[test]
fn test_take_prefers_higher_optional_score() {
    let mut db = TaskDatabase::new();
    let task_a = db.create_task(create_info("a", &[], &["X", "Y"])).id();
    let task_b = db.create_task(create_info("b", &[], &["X"])).id();

    // The worker has only X: B scores 1.0, A scores 0.5.
    let first = db.take_task_to_run(&tags(&["X"])).expect("dispatch").id();
    assert_eq!(first, task_b);
    let second = db.take_task_to_run(&tags(&["X"])).expect("dispatch").id();
    assert_eq!(second, task_a);
}

#[test]
fn test_take_breaks_ties_toward_first_created() {
    let mut db = TaskDatabase::new();
    let first_created = db.create_task(create_info("a", &[], &[])).id();
    db.create_task(create_info("b", &[], &[]));
    db.create_task(create_info("c", &[], &[]));

    let picked = db.take_task_to_run(&tags(&["CPU"])).expect("dispatch").id();
    assert_eq!(picked, first_created);
}

#[test]
fn test_take_is_exclusive() {
    let mut db = TaskDatabase::new();
    db.create_task(create_info("only", &[], &[]));

    let first = db.take_task_to_run(&HashSet::new()).map(|task| task.id());
    assert!(first.is_some());
    // The task left the pending set before the first call returned.
    assert!(db.take_task_to_run(&HashSet::new()).is_none());
}

#[test]
fn test_take_stamps_start_and_heartbeat_from_same_clock() {
    let mut db = TaskDatabase::new();
    db.create_task(create_info("a", &[], &[]));

    let task = db.take_task_to_run(&HashSet::new()).expect("dispatch");
    let run_status = task.status().run_status.expect("running");
    assert_eq!(run_status.heartbeat_time, run_status.start_time);
    assert!(!run_status.was_canceled);
}

#[test]
fn test_heartbeat_updates_and_reports_cancel_flag() {
    let mut db = TaskDatabase::new();
    db.create_task(create_info("a", &[], &[]));
    let id = db.take_task_to_run(&HashSet::new()).expect("dispatch").id();

    assert_eq!(db.heartbeat_task(id), Some(false));
    assert!(db.mark_task_should_cancel(id));
    assert_eq!(db.heartbeat_task(id), Some(true));

    // Heartbeats never clear the cancel flag.
    assert_eq!(db.heartbeat_task(id), Some(true));
    assert_eq!(db.get_task(id).expect("live").state(), TaskState::Canceling);

    assert_eq!(db.heartbeat_task(TaskId(0xbad)), None);
}

#[test]
fn test_heartbeat_time_never_precedes_start_time() {
    let mut db = TaskDatabase::new();
    db.create_task(create_info("a", &[], &[]));
    let id = db.take_task_to_run(&HashSet::new()).expect("dispatch").id();
    db.heartbeat_task(id);

    let run_status = db.get_task(id).expect("live").status().run_status.expect("running");
    assert!(run_status.heartbeat_time >= run_status.start_time);
}

#[test]
fn test_cancel_running_task_shifts_counters() {
    let mut db = TaskDatabase::new();
    db.create_task(create_info("a", &[], &[]));
    let id = db.take_task_to_run(&HashSet::new()).expect("dispatch").id();

    assert!(db.mark_task_should_cancel(id));
    let stats = db.stats();
    assert_eq!(stats.num_running, 0);
    assert_eq!(stats.num_canceling, 1);
    assert_eq!(stats.num_finished, 0);

    // A second cancel must not shift the counters again.
    assert!(db.mark_task_should_cancel(id));
    let stats = db.stats();
    assert_eq!(stats.num_running, 0);
    assert_eq!(stats.num_canceling, 1);
}

#[test]
fn test_cancel_pending_task_removes_it() {
    let mut db = TaskDatabase::new();
    let id = db.create_task(create_info("a", &[], &[])).id();

    assert!(db.mark_task_should_cancel(id));
    assert!(db.get_task(id).is_none());
    let stats = db.stats();
    assert_eq!(stats.num_pending, 0);
    assert_eq!(stats.num_finished, 1);

    // And it can no longer be dispatched.
    assert!(db.take_task_to_run(&HashSet::new()).is_none());
}

#[test]
fn test_cancel_missing_task_returns_false() {
    let mut db = TaskDatabase::new();
    assert!(!db.mark_task_should_cancel(TaskId(1)));
}

#[test]
fn test_finish_counts_by_state() {
    let mut db = TaskDatabase::new();

    let pending = db.create_task(create_info("a", &[], &[])).id();
    assert!(db.mark_task_finished(pending));
    assert_eq!(db.stats().num_finished, 1);
    assert_eq!(db.stats().num_pending, 0);

    db.create_task(create_info("b", &[], &[]));
    let running = db.take_task_to_run(&HashSet::new()).expect("dispatch").id();
    assert!(db.mark_task_finished(running));
    assert_eq!(db.stats().num_finished, 2);
    assert_eq!(db.stats().num_running, 0);

    db.create_task(create_info("c", &[], &[]));
    let canceling = db.take_task_to_run(&HashSet::new()).expect("dispatch").id();
    db.mark_task_should_cancel(canceling);
    assert!(db.mark_task_finished(canceling));
    assert_eq!(db.stats().num_finished, 3);
    assert_eq!(db.stats().num_canceling, 0);

    assert!(!db.mark_task_finished(TaskId(0xbad)));
    assert_eq!(db.stats().num_finished, 3);
}

#[test]
fn test_zombie_cleanup_reaps_dispatched_tasks() {
    let mut db = TaskDatabase::new();
    db.create_task(create_info("a", &[], &[]));
    db.create_task(create_info("b", &[], &[]));
    let running = db.take_task_to_run(&HashSet::new()).expect("dispatch").id();

    // With a zero timeout every dispatched task is immediately a zombie;
    // pending tasks are untouched.
    let reaped = db.cleanup_zombie_tasks(0);
    assert_eq!(reaped, 1);
    assert!(db.get_task(running).is_none());
    let stats = db.stats();
    assert_eq!(stats.num_pending, 1);
    assert_eq!(stats.num_running, 0);
    assert_eq!(stats.num_finished, 1);
}

#[test]
fn test_zombie_cleanup_spares_fresh_heartbeats() {
    let mut db = TaskDatabase::new();
    db.create_task(create_info("a", &[], &[]));
    let id = db.take_task_to_run(&HashSet::new()).expect("dispatch").id();

    assert_eq!(db.cleanup_zombie_tasks(3600), 0);
    assert!(db.get_task(id).is_some());
    assert_eq!(db.stats().num_finished, 0);
}

#[test]
fn test_tasks_by_states_filters() {
    let mut db = TaskDatabase::new();
    db.create_task(create_info("a", &[], &[]));
    db.create_task(create_info("b", &[], &[]));
    let running = db.take_task_to_run(&HashSet::new()).expect("dispatch").id();

    let pending = db.tasks_by_states(&states(&[TaskState::Pending])).unwrap();
    assert_eq!(pending.len(), 1);

    let dispatched = db
        .tasks_by_states(&states(&[TaskState::Running, TaskState::Canceling]))
        .unwrap();
    assert_eq!(dispatched.len(), 1);
    assert_eq!(dispatched[0].id(), running);

    let everything = db
        .tasks_by_states(&states(&[
            TaskState::Pending,
            TaskState::Running,
            TaskState::Canceling,
        ]))
        .unwrap();
    assert_eq!(everything.len(), 2);
}

#[test]
fn test_tasks_by_states_refuses_past_threshold() {
    let mut db = TaskDatabase::new();
    for _ in 0..MAX_LIST_TASKS {
        db.create_task(create_info("true", &[], &[]));
    }
    assert!(db.tasks_by_states(&states(&[TaskState::Pending])).is_ok());

    db.create_task(create_info("true", &[], &[]));
    assert!(matches!(
        db.tasks_by_states(&states(&[TaskState::Pending])),
        Err(KickoffError::TooManyTasks)
    ));
}

/// Randomized operation sequence; after every step the counters must agree
/// with the actual population and the observed number of removals.
#[test]
fn test_counters_stay_consistent_under_random_ops() {
    let mut db = TaskDatabase::new();
    let mut rng = StdRng::seed_from_u64(7);
    let mut known_ids: Vec<TaskId> = Vec::new();
    let mut expected_finished = 0u64;

    let resource_pool = ["CPU", "GPU", "SSD"];

    for _ in 0..500 {
        match rng.gen_range(0..6) {
            0 | 1 => {
                let require = &resource_pool[..rng.gen_range(0..=2)];
                let want = &resource_pool[rng.gen_range(0..=2)..];
                let id = db.create_task(create_info("true", require, want)).id();
                known_ids.push(id);
            }
            2 => {
                let have = tags(&resource_pool[..rng.gen_range(0..=3)]);
                let _ = db.take_task_to_run(&have);
            }
            3 => {
                if let Some(&id) = pick(&mut rng, &known_ids) {
                    let was_pending = db
                        .get_task(id)
                        .map(|task| task.state() == TaskState::Pending)
                        .unwrap_or(false);
                    if db.mark_task_should_cancel(id) && was_pending {
                        expected_finished += 1;
                    }
                }
            }
            4 => {
                if let Some(&id) = pick(&mut rng, &known_ids) {
                    if db.mark_task_finished(id) {
                        expected_finished += 1;
                    }
                }
            }
            _ => {
                if let Some(&id) = pick(&mut rng, &known_ids) {
                    let _ = db.heartbeat_task(id);
                }
            }
        }

        let stats = db.stats();
        let pending = db.tasks_by_states(&states(&[TaskState::Pending])).unwrap().len() as u64;
        let running = db.tasks_by_states(&states(&[TaskState::Running])).unwrap().len() as u64;
        let canceling = db
            .tasks_by_states(&states(&[TaskState::Canceling]))
            .unwrap()
            .len() as u64;
        assert_eq!(stats.num_pending, pending);
        assert_eq!(stats.num_running, running);
        assert_eq!(stats.num_canceling, canceling);
        assert_eq!(stats.num_finished, expected_finished);
        assert_eq!(db.task_count() as u64, pending + running + canceling);
    }
}

fn pick<'a>(rng: &mut StdRng, ids: &'a [TaskId]) -> Option<&'a TaskId> {
    if ids.is_empty() {
        None
    } else {
        ids.get(rng.gen_range(0..ids.len()))
    }
}
