//! End-to-end tests for sequence execution.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use stagger::{ErrorPolicy, Sequence, SequenceConfig, SequenceError, TaskDescriptor, TaskStatus};

fn config(max_concurrency: usize) -> SequenceConfig {
    SequenceConfig {
        max_concurrency,
        verbose: false,
    }
}

fn outcome_of<'a>(
    report: &'a stagger::SequenceReport,
    id: &str,
) -> &'a stagger::TaskOutcome {
    report
        .outcomes
        .iter()
        .find(|outcome| outcome.id == id)
        .unwrap_or_else(|| panic!("no outcome for task '{id}'"))
}

#[tokio::test]
async fn empty_sequence_resolves_immediately() {
    let mut sequence = Sequence::new(config(2));
    let report = sequence.run().await.unwrap();
    assert!(report.ok);
    assert_eq!(report.failed, 0);
    assert!(report.outcomes.is_empty());
}

#[tokio::test]
async fn linear_chain_accumulates_artifacts() {
    let mut sequence = Sequence::new(config(2));
    sequence
        .add_task(TaskDescriptor::from_fn("a", |_| async {
            anyhow::Ok(json!("a"))
        }))
        .add_task(
            TaskDescriptor::from_fn("b", |inputs| async move {
                let prev = inputs[0].as_str().unwrap_or_default();
                anyhow::Ok(json!(format!("{prev}b")))
            })
            .with_parent("a"),
        )
        .add_task(
            TaskDescriptor::from_fn("c", |inputs| async move {
                let prev = inputs[0].as_str().unwrap_or_default();
                anyhow::Ok(json!(format!("{prev}c")))
            })
            .with_parent("b"),
        );

    let report = sequence.run().await.unwrap();
    assert!(report.ok);
    assert_eq!(sequence.artifact_of("a"), Some(json!("a")));
    assert_eq!(sequence.artifact_of("b"), Some(json!("ab")));
    assert_eq!(sequence.artifact_of("c"), Some(json!("abc")));

    let a = outcome_of(&report, "a").metrics.unwrap();
    let b = outcome_of(&report, "b").metrics.unwrap();
    let c = outcome_of(&report, "c").metrics.unwrap();
    assert!(a.end_ms <= b.start_ms);
    assert!(b.end_ms <= c.start_ms);
}

#[tokio::test]
async fn diamond_joins_both_parents_in_declaration_order() {
    let mut sequence = Sequence::new(config(2));
    sequence
        .add_task(TaskDescriptor::from_fn("a", |_| async { anyhow::Ok(json!(1)) }))
        .add_task(
            TaskDescriptor::from_fn("b", |inputs| async move {
                anyhow::Ok(json!(inputs[0].as_i64().unwrap() + 1))
            })
            .with_parent("a"),
        )
        .add_task(
            TaskDescriptor::from_fn("c", |inputs| async move {
                anyhow::Ok(json!(inputs[0].as_i64().unwrap() * 10))
            })
            .with_parent("a"),
        )
        .add_task(
            TaskDescriptor::from_fn("d", |inputs| async move {
                anyhow::Ok(json!(
                    inputs[0].as_i64().unwrap() + inputs[1].as_i64().unwrap()
                ))
            })
            .with_parents(["b", "c"]),
        );

    let report = sequence.run().await.unwrap();
    assert!(report.ok);
    assert_eq!(sequence.artifact_of("b"), Some(json!(2)));
    assert_eq!(sequence.artifact_of("c"), Some(json!(10)));
    assert_eq!(sequence.artifact_of("d"), Some(json!(12)));

    let b = outcome_of(&report, "b").metrics.unwrap();
    let c = outcome_of(&report, "c").metrics.unwrap();
    let d = outcome_of(&report, "d").metrics.unwrap();
    assert!(d.start_ms >= b.end_ms.max(c.end_ms));
}

#[tokio::test]
async fn retry_then_succeed_records_all_attempts() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);

    let mut sequence = Sequence::new(config(1));
    sequence.add_task(
        TaskDescriptor::from_fn("flaky", move |_| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(anyhow::anyhow!("not yet"))
                } else {
                    Ok(json!("ok"))
                }
            }
        })
        .with_retries(2)
        .with_retry_delay(Duration::from_millis(10)),
    );

    let report = sequence.run().await.unwrap();
    assert!(report.ok);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(sequence.artifact_of("flaky"), Some(json!("ok")));

    let outcome = outcome_of(&report, "flaky");
    assert_eq!(outcome.status, TaskStatus::Succeeded);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(outcome.retry_messages.len(), 2);
    // The duration spans the retry delays.
    assert!(outcome.metrics.unwrap().duration_ms >= 20);
}

#[tokio::test]
async fn retries_are_exhausted_before_failing() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);

    let mut sequence = Sequence::new(config(1));
    sequence.add_task(
        TaskDescriptor::from_fn("doomed", move |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<Value, _>(anyhow::anyhow!("always fails"))
            }
        })
        .with_retries(1),
    );

    let report = sequence.run().await.unwrap();
    assert!(report.ok);
    assert_eq!(report.failed, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let outcome = outcome_of(&report, "doomed");
    assert_eq!(outcome.status, TaskStatus::Failed);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.error.as_deref(), Some("always fails"));
    assert_eq!(sequence.artifact_of("doomed"), None);
}

#[tokio::test]
async fn continue_policy_runs_children_with_null_input() {
    let mut sequence = Sequence::new(config(2));
    sequence
        .add_task(TaskDescriptor::from_fn("a", |_| async {
            Err::<Value, _>(anyhow::anyhow!("boom"))
        }))
        .add_task(TaskDescriptor::from_fn("b", |_| async {
            anyhow::Ok(json!("b"))
        }))
        .add_task(
            TaskDescriptor::from_fn("c", |inputs| async move {
                anyhow::Ok(json!(inputs[0].is_null()))
            })
            .with_parent("a"),
        );

    let report = sequence.run().await.unwrap();
    assert!(report.ok);
    assert_eq!(report.failed, 1);
    assert_eq!(outcome_of(&report, "a").status, TaskStatus::Failed);
    assert_eq!(outcome_of(&report, "b").status, TaskStatus::Succeeded);
    assert_eq!(outcome_of(&report, "c").status, TaskStatus::Succeeded);
    // The failed parent's slot arrived as null.
    assert_eq!(sequence.artifact_of("c"), Some(json!(true)));
    assert_eq!(sequence.artifact_of("a"), None);
}

#[tokio::test]
async fn abort_policy_rejects_and_skips_descendants() {
    let child_ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&child_ran);

    let mut sequence = Sequence::new(config(2));
    sequence
        .add_task(
            TaskDescriptor::from_fn("a", |_| async {
                Err::<Value, _>(anyhow::anyhow!("fatal"))
            })
            .with_error_policy(ErrorPolicy::Abort),
        )
        .add_task(
            TaskDescriptor::from_fn("b", move |_| {
                let flag = Arc::clone(&flag);
                async move {
                    flag.store(true, Ordering::SeqCst);
                    Ok(json!("b"))
                }
            })
            .with_parent("a"),
        )
        .add_task(TaskDescriptor::from_fn("c", |_| async {
            anyhow::Ok(json!("c"))
        }));

    let err = sequence.run().await.unwrap_err();
    match err {
        SequenceError::Aborted { at } => assert_eq!(at, "a"),
        other => panic!("unexpected error: {other}"),
    }
    // Nothing at a deeper level started after the abort decision.
    assert!(!child_ran.load(Ordering::SeqCst));
    assert_eq!(sequence.artifact_of("b"), None);
}

#[tokio::test]
async fn priority_orders_launches_under_serial_execution() {
    let launched: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let record = |id: &'static str, launched: &Arc<Mutex<Vec<String>>>| {
        let launched = Arc::clone(launched);
        TaskDescriptor::from_fn(id, move |_| {
            let launched = Arc::clone(&launched);
            async move {
                launched.lock().unwrap().push(id.to_string());
                Ok(Value::Null)
            }
        })
    };

    let mut sequence = Sequence::new(config(1));
    sequence
        .add_task(record("a", &launched).with_priority(1))
        .add_task(record("b", &launched).with_priority(5))
        .add_task(record("c", &launched).with_priority(3));

    let report = sequence.run().await.unwrap();
    assert!(report.ok);
    assert_eq!(*launched.lock().unwrap(), vec!["b", "c", "a"]);
}

#[tokio::test]
async fn in_flight_actions_never_exceed_the_bound() {
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut sequence = Sequence::new(config(2));
    for id in ["w", "x", "y", "z"] {
        let current = Arc::clone(&current);
        let peak = Arc::clone(&peak);
        sequence.add_task(TaskDescriptor::from_fn(id, move |_| {
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        }));
    }

    let report = sequence.run().await.unwrap();
    assert!(report.ok);
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn cycle_is_rejected_before_any_action_runs() {
    let ran = Arc::new(AtomicBool::new(false));

    let mut sequence = Sequence::new(config(1));
    for (id, parent) in [("a", "b"), ("b", "a")] {
        let ran = Arc::clone(&ran);
        sequence.add_task(
            TaskDescriptor::from_fn(id, move |_| {
                let ran = Arc::clone(&ran);
                async move {
                    ran.store(true, Ordering::SeqCst);
                    Ok(Value::Null)
                }
            })
            .with_parent(parent),
        );
    }

    let err = sequence.run().await.unwrap_err();
    assert!(matches!(err, SequenceError::CycleDetected));
    assert!(!ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn duplicate_id_is_rejected() {
    let mut sequence = Sequence::new(config(1));
    sequence
        .add_task(TaskDescriptor::from_fn("same", |_| async {
            anyhow::Ok(Value::Null)
        }))
        .add_task(TaskDescriptor::from_fn("same", |_| async {
            anyhow::Ok(Value::Null)
        }));

    let err = sequence.run().await.unwrap_err();
    assert!(matches!(err, SequenceError::DuplicateTaskId(id) if id == "same"));
}

#[tokio::test]
async fn unknown_dependency_names_both_ends() {
    let mut sequence = Sequence::new(config(1));
    sequence.add_task(
        TaskDescriptor::from_fn("child", |_| async { anyhow::Ok(Value::Null) })
            .with_parent("missing"),
    );

    match sequence.run().await.unwrap_err() {
        SequenceError::UnknownDependency { parent, child } => {
            assert_eq!(parent, "missing");
            assert_eq!(child, "child");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn zero_concurrency_is_an_invalid_config() {
    let mut sequence = Sequence::new(config(0));
    sequence.add_task(TaskDescriptor::from_fn("a", |_| async {
        anyhow::Ok(Value::Null)
    }));
    let err = sequence.run().await.unwrap_err();
    assert!(matches!(err, SequenceError::InvalidConfig(_)));
}

#[tokio::test]
async fn planning_is_deterministic() {
    let mut sequence = Sequence::new(config(2));
    sequence
        .add_task(TaskDescriptor::from_fn("a", |_| async { anyhow::Ok(Value::Null) }))
        .add_task(
            TaskDescriptor::from_fn("b", |_| async { anyhow::Ok(Value::Null) })
                .with_parent("a")
                .with_priority(2),
        )
        .add_task(
            TaskDescriptor::from_fn("c", |_| async { anyhow::Ok(Value::Null) })
                .with_parent("a")
                .with_priority(7),
        )
        .add_task(
            TaskDescriptor::from_fn("d", |_| async { anyhow::Ok(Value::Null) })
                .with_parents(["b", "c"]),
        );

    let first = sequence.plan().unwrap();
    let second = sequence.plan().unwrap();
    assert_eq!(first, second);

    assert_eq!(first.level["a"], 0);
    assert_eq!(first.level["b"], 1);
    assert_eq!(first.level["c"], 1);
    assert_eq!(first.level["d"], 2);
    assert_eq!(first.max_level, 2);
    // Higher priority first among the level-1 siblings.
    assert_eq!(first.order, vec!["a", "c", "b", "d"]);
}

#[tokio::test]
async fn rerunning_pure_actions_yields_identical_artifacts() {
    let mut sequence = Sequence::new(config(2));
    sequence
        .add_task(TaskDescriptor::from_fn("base", |_| async {
            anyhow::Ok(json!([1, 2, 3]))
        }))
        .add_task(
            TaskDescriptor::from_fn("sum", |inputs| async move {
                let total: i64 = inputs[0]
                    .as_array()
                    .map(|items| items.iter().filter_map(Value::as_i64).sum())
                    .unwrap_or(0);
                anyhow::Ok(json!(total))
            })
            .with_parent("base"),
        );

    let first = sequence.run().await.unwrap();
    let first_artifact = sequence.artifact_of("sum");
    let second = sequence.run().await.unwrap();
    assert!(first.ok && second.ok);
    assert_eq!(first_artifact, sequence.artifact_of("sum"));
    assert_eq!(sequence.artifact_of("sum"), Some(json!(6)));
}

#[tokio::test]
async fn panicking_action_is_contained_as_a_failure() {
    let mut sequence = Sequence::new(config(2));
    sequence
        .add_task(TaskDescriptor::from_fn("boom", |inputs| async move {
            if inputs.is_empty() {
                panic!("action blew up");
            }
            anyhow::Ok(Value::Null)
        }))
        .add_task(TaskDescriptor::from_fn("calm", |_| async {
            anyhow::Ok(json!("fine"))
        }));

    let report = sequence.run().await.unwrap();
    assert!(report.ok);
    assert_eq!(report.failed, 1);
    assert_eq!(outcome_of(&report, "boom").status, TaskStatus::Failed);
    assert_eq!(outcome_of(&report, "calm").status, TaskStatus::Succeeded);
}
