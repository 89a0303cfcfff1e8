//! # Integration Tests
//!
//! End-to-end scenarios over the full pipeline, driven by the mock and
//! simulated adapters (no external services needed).

#[cfg(test)]
mod contract_tests {
    #[test]
    fn test_contracts_compile() {
        let _ = contracts::ConfigVersion::V1;
    }

    #[test]
    fn test_default_blueprint_is_valid() {
        let blueprint = contracts::PipelineBlueprint::default();
        assert!(config_loader::ConfigLoader::validate(&blueprint).is_ok());
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::HashSet;
    use std::time::{Duration, Instant};

    use adapters::{ConcurrencyProbe, MockAnalyze, MockFetch, MockTransfer};
    use contracts::{
        ErrorKind, PipelineBlueprint, RecordView, RetryConfig, Stage, StageError, StageKind,
        TaskId,
    };
    use controller::PipelineController;
    use task_registry::TaskRegistry;

    fn blueprint() -> PipelineBlueprint {
        let mut bp = PipelineBlueprint::default();
        for kind in StageKind::ALL {
            bp.stages.get_mut(kind).retry = RetryConfig::immediate(3);
        }
        bp.poll.interval_ms = 10;
        bp.pipeline.shutdown_grace_ms = 1000;
        bp
    }

    fn ids(names: &[&str]) -> Vec<TaskId> {
        names.iter().map(|n| TaskId::from(*n)).collect()
    }

    fn numbered(prefix: &str, n: usize) -> Vec<TaskId> {
        (0..n).map(|i| TaskId::from(format!("{prefix}{i}"))).collect()
    }

    /// Sample the registry every few milliseconds until `done` returns true
    async fn watch(registry: &TaskRegistry, mut done: impl FnMut(&[RecordView]) -> bool) {
        let sampling = async {
            loop {
                if done(&registry.snapshot()) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(3)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(10), sampling)
            .await
            .expect("registry never reached the expected state");
    }

    /// Scenario A: every id succeeds
    #[tokio::test]
    async fn test_all_ids_succeed() {
        let controller = PipelineController::new(
            blueprint(),
            MockFetch::new(),
            MockTransfer::new(),
            MockAnalyze::new(),
        );
        let registry = controller.registry();

        let batch = controller.run(ids(&["a", "b", "c"])).await.unwrap();

        assert_eq!(batch.total, 3);
        assert_eq!(batch.succeeded, ids(&["a", "b", "c"]));
        assert!(batch.failed.is_empty());

        let snapshot = registry.snapshot();
        assert!(snapshot.iter().all(|r| r.stage == Stage::Succeeded));
        for record in &snapshot {
            let result = record.payload.as_ref().and_then(|p| p.as_result()).unwrap();
            assert_eq!(result.reference, format!("result-{}", record.id));
            assert_eq!(record.history.len(), 3);
        }
    }

    /// Scenario B: one id keeps failing transiently on fetch
    #[tokio::test]
    async fn test_retry_limit_on_fetch() {
        let mut bp = blueprint();
        bp.stages.fetch.retry = RetryConfig::immediate(2);

        let controller = PipelineController::new(
            bp,
            MockFetch::new().fail_always("X", StageError::transient("connection reset")),
            MockTransfer::new(),
            MockAnalyze::new(),
        );
        let registry = controller.registry();

        let batch = controller.run(ids(&["a", "X", "b"])).await.unwrap();

        assert_eq!(batch.succeeded, ids(&["a", "b"]));
        let cause = batch.error_for("X").unwrap();
        assert_eq!(cause.kind, ErrorKind::TransientIo);
        assert_eq!(cause.stage, Some(StageKind::Fetch));
        assert_eq!(cause.attempts, 2);

        let record = registry.get("X").unwrap();
        assert_eq!(record.attempts(StageKind::Fetch), 2);
        assert_eq!(record.attempts(StageKind::Transfer), 0);
    }

    #[tokio::test]
    async fn test_transient_failures_recover_with_backoff() {
        let mut bp = blueprint();
        bp.stages.transfer.retry = RetryConfig {
            max_attempts: 3,
            backoff_ms: 20,
            max_backoff_ms: 100,
            jitter: false,
        };

        let controller = PipelineController::new(
            bp,
            MockFetch::new(),
            MockTransfer::new().fail_times("a", 2, StageError::transient("503")),
            MockAnalyze::new(),
        );
        let registry = controller.registry();

        let started = Instant::now();
        let batch = controller.run(ids(&["a"])).await.unwrap();

        assert!(batch.all_succeeded());
        assert_eq!(registry.get("a").unwrap().attempts(StageKind::Transfer), 3);
        // 20ms + 40ms of backoff
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    /// Scenario C: a job answers InProgress three times, then succeeds
    #[tokio::test]
    async fn test_polling_does_not_hold_a_worker() {
        let mut bp = blueprint();
        bp.poll.interval_ms = 40;

        let controller = PipelineController::new(
            bp,
            MockFetch::new(),
            MockTransfer::new(),
            MockAnalyze::new().with_polls_until_done(3),
        )
        .with_concurrency(StageKind::Analyze, 1);
        let registry = controller.registry();
        let run = tokio::spawn(controller.run(ids(&["c1", "c2"])));

        let mut both_polling = false;
        let mut polling_polls = Vec::new();
        watch(&registry, |records| {
            if !records.is_empty() && records.iter().all(|r| r.stage == Stage::Polling) {
                both_polling = true;
            }
            if let Some(c1) = records.iter().find(|r| r.id == "c1") {
                if c1.stage == Stage::Polling {
                    polling_polls.push(c1.polls);
                }
            }
            !records.is_empty() && records.iter().all(|r| r.is_terminal())
        })
        .await;

        let batch = run.await.unwrap().unwrap();
        assert!(batch.all_succeeded());
        // the single analyze worker submitted c2 while c1 was still polling
        assert!(both_polling);
        assert!(polling_polls.len() > 1);
        assert!(polling_polls.iter().all(|&polls| polls < 4));
        assert_eq!(registry.get("c1").unwrap().polls, 4);
    }

    #[tokio::test]
    async fn test_cancellation_fails_the_rest_promptly() {
        let controller = PipelineController::new(
            blueprint(),
            MockFetch::new().with_delay(Duration::from_millis(150)),
            MockTransfer::new(),
            MockAnalyze::new(),
        );
        let registry = controller.registry();
        let cancel = controller.cancel_token();
        let run = tokio::spawn(controller.run(numbered("slow-", 10)));

        watch(&registry, |records| {
            records.iter().any(|r| r.stage == Stage::Succeeded)
        })
        .await;
        let cancelled_at = Instant::now();
        cancel.cancel();

        let batch = tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert!(cancelled_at.elapsed() < Duration::from_secs(1));
        assert!(batch.cancelled);
        assert_eq!(batch.succeeded, ids(&["slow-0"]));
        assert_eq!(batch.failed_with(ErrorKind::Cancelled).len(), 9);
        assert!(registry.is_drained());
    }

    #[tokio::test]
    async fn test_stage_concurrency_is_bounded() {
        let fetch_probe = ConcurrencyProbe::new();
        let transfer_probe = ConcurrencyProbe::new();

        let controller = PipelineController::new(
            blueprint(),
            MockFetch::new()
                .with_delay(Duration::from_millis(30))
                .with_probe(fetch_probe.clone()),
            MockTransfer::new()
                .with_delay(Duration::from_millis(30))
                .with_probe(transfer_probe.clone()),
            MockAnalyze::new(),
        )
        .with_concurrency(StageKind::Fetch, 3)
        .with_concurrency(StageKind::Transfer, 2);

        let batch = controller.run(numbered("t", 12)).await.unwrap();

        assert!(batch.all_succeeded());
        assert_eq!(fetch_probe.calls(), 12);
        assert_eq!(fetch_probe.peak(), 3);
        assert!(transfer_probe.peak() <= 2);
    }

    #[tokio::test]
    async fn test_slow_analysis_applies_backpressure() {
        let mut bp = blueprint();
        bp.pipeline.queue_capacity = 1;

        let controller = PipelineController::new(
            bp,
            MockFetch::new(),
            MockTransfer::new(),
            MockAnalyze::new().with_delay(Duration::from_millis(60)),
        )
        .with_concurrency(StageKind::Analyze, 1);
        let registry = controller.registry();
        let run = tokio::spawn(controller.run(numbered("bp", 8)));

        let mut max_between = 0;
        let mut saw_pending_backlog = false;
        watch(&registry, |records| {
            let between = records
                .iter()
                .filter(|r| matches!(r.stage, Stage::Transferring | Stage::Submitting))
                .count();
            max_between = max_between.max(between);
            if records.iter().filter(|r| r.stage == Stage::Pending).count() >= 2 {
                saw_pending_backlog = true;
            }
            !records.is_empty() && records.iter().all(|r| r.is_terminal())
        })
        .await;

        let batch = run.await.unwrap().unwrap();
        assert!(batch.all_succeeded());
        // one blocked fetch worker, two queue slots, two busy workers
        assert!(max_between <= 5, "buffered {max_between} records past fetch");
        assert!(saw_pending_backlog);
    }

    #[tokio::test]
    async fn test_terminal_errors_are_not_retried() {
        let controller = PipelineController::new(
            blueprint(),
            MockFetch::new().fail_always("missing", StageError::invalid_input("no such video")),
            MockTransfer::new(),
            MockAnalyze::new().fail_job("rejected", "unsupported codec"),
        );
        let registry = controller.registry();

        let batch = controller
            .run(ids(&["ok", "missing", "rejected"]))
            .await
            .unwrap();

        assert_eq!(batch.succeeded, ids(&["ok"]));

        let missing = batch.error_for("missing").unwrap();
        assert_eq!(missing.kind, ErrorKind::InvalidInput);
        assert_eq!(registry.get("missing").unwrap().attempts(StageKind::Fetch), 1);

        let rejected = batch.error_for("rejected").unwrap();
        assert_eq!(rejected.kind, ErrorKind::ExternalService);
        assert!(rejected.message.contains("unsupported codec"));
        assert_eq!(registry.get("rejected").unwrap().attempts(StageKind::Analyze), 1);
    }

    #[tokio::test]
    async fn test_stuck_job_times_out() {
        let mut bp = blueprint();
        bp.poll.interval_ms = 50;
        bp.poll.timeout_secs = 1;

        let controller = PipelineController::new(
            bp,
            MockFetch::new(),
            MockTransfer::new(),
            MockAnalyze::new().with_polls_until_done(u32::MAX),
        );

        let batch = controller.run(ids(&["stuck"])).await.unwrap();
        let cause = batch.error_for("stuck").unwrap();
        assert_eq!(cause.kind, ErrorKind::JobTimeout);
        assert!(!batch.cancelled);
    }

    #[tokio::test]
    async fn test_every_id_lands_exactly_once() {
        let batch_ids = numbered("p", 30);
        let mut fetch = MockFetch::new();
        let mut transfer = MockTransfer::new();
        let mut analyze = MockAnalyze::new().with_polls_until_done(1);
        for (i, id) in batch_ids.iter().enumerate() {
            if i % 7 == 0 {
                fetch = fetch.fail_always(id, StageError::invalid_input("bad id"));
            }
            if i % 5 == 0 {
                transfer = transfer.fail_times(id, 1, StageError::transient("timeout"));
            }
            if i % 4 == 0 {
                analyze = analyze.fail_job(id, "analysis failed");
            }
        }

        let controller = PipelineController::new(blueprint(), fetch, transfer, analyze)
            .with_concurrency(StageKind::Fetch, 4)
            .with_concurrency(StageKind::Transfer, 3);
        let batch = controller.run(batch_ids.clone()).await.unwrap();

        assert_eq!(batch.total, 30);
        assert_eq!(batch.succeeded_count() + batch.failed_count(), 30);

        let succeeded: HashSet<&TaskId> = batch.succeeded.iter().collect();
        let failed: HashSet<&TaskId> = batch.failed.keys().collect();
        assert_eq!(succeeded.len(), batch.succeeded_count());
        assert!(succeeded.is_disjoint(&failed));
        let all: HashSet<&TaskId> = succeeded.union(&failed).copied().collect();
        assert_eq!(all, batch_ids.iter().collect());

        for (i, id) in batch_ids.iter().enumerate() {
            let expected = if i % 7 == 0 {
                Some(ErrorKind::InvalidInput)
            } else if i % 4 == 0 {
                Some(ErrorKind::ExternalService)
            } else {
                None
            };
            assert_eq!(batch.error_for(id).map(|e| e.kind), expected, "id {id}");
        }
        assert!(batch.conflicts().is_empty());
    }
}

#[cfg(test)]
mod simulated_tests {
    use adapters::build_adapters;
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{ErrorKind, Stage, TaskId};
    use controller::PipelineController;

    const SIMULATED_TOML: &str = r#"
[pipeline]
queue_capacity = 2

[stages.analyze]
workers = 2

[poll]
interval_ms = 10

[adapters]
kind = "simulated"

[adapters.simulated]
latency_ms = 1
polls_until_done = 2
fail_ids = ["s3"]
"#;

    #[tokio::test]
    async fn test_simulated_batch_from_config() {
        let blueprint = ConfigLoader::load_from_str(SIMULATED_TOML, ConfigFormat::Toml).unwrap();
        let adapters = build_adapters(&blueprint.adapters).await.unwrap();

        let controller = PipelineController::new(
            blueprint,
            adapters.fetch,
            adapters.transfer,
            adapters.analyze,
        );
        let registry = controller.registry();
        let ids: Vec<TaskId> = (1..=5).map(|i| TaskId::from(format!("s{i}"))).collect();

        let batch = controller.run(ids).await.unwrap();

        assert_eq!(batch.succeeded_count(), 4);
        assert_eq!(batch.error_for("s3").unwrap().kind, ErrorKind::ExternalService);

        let s1 = registry.get("s1").unwrap();
        assert_eq!(s1.stage, Stage::Succeeded);
        assert_eq!(s1.polls, 3);
        let result = s1.payload.as_ref().and_then(|p| p.as_result()).unwrap();
        assert_eq!(result.reference, "sim://results/s1.json");
    }
}
