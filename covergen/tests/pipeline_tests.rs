//! Integration tests for the pipeline executor.
//!
//! The executor runs against a real SQLite store and the scripted
//! `FakeRunner`; no external tools are involved.

mod common;

use std::sync::Arc;

use common::{FakeRunner, TestEnv};
use covergen::database::models::{JobStage, JobStatus};
use covergen::database::repositories::JobRepository;
use covergen::pipeline::{PipelineConfig, PipelineExecutor, RunOutcome};

fn executor(env: &TestEnv, runner: Arc<FakeRunner>) -> PipelineExecutor {
    PipelineExecutor::new(
        env.job_repo(),
        runner,
        env.layout.clone(),
        PipelineConfig::default(),
    )
}

mod success_tests {
    use super::*;

    #[tokio::test]
    async fn test_run_succeeds_with_monotonic_progress() {
        let env = TestEnv::new().await;
        let runner = Arc::new(FakeRunner::new());
        let id = env
            .create_job_with(|job| job.with_model_id(Some("alto".into())).with_pitch_shift(-3))
            .await;

        let outcome = executor(&env, runner.clone()).run(&id).await.unwrap();
        assert_eq!(outcome, RunOutcome::Succeeded);

        assert_eq!(
            env.repo.progress_trail(),
            vec![
                (JobStage::Preprocess, 5),
                (JobStage::Separate, 35),
                (JobStage::Infer, 70),
                (JobStage::Mix, 90),
                (JobStage::Finalize, 100),
            ]
        );
        assert_eq!(
            runner.calls(),
            vec!["preprocess", "separate", "infer:alto:-3", "mix"]
        );

        let job = env.job(&id).await;
        assert_eq!(job.status, "succeeded");
        assert_eq!(job.stage, "finalize");
        assert_eq!(job.progress, 100);
        assert!(job.error_message.is_none());

        let paths = env.layout.work_paths(&id);
        assert_eq!(job.output_mix_path.as_deref(), paths.mix.to_str());
        assert_eq!(job.output_vocal_path.as_deref(), paths.vocal.to_str());
        assert_eq!(job.output_inst_path.as_deref(), paths.instrumental.to_str());
        assert_eq!(std::fs::read(&paths.mix).unwrap(), common::MIX_BYTES);
    }

    #[tokio::test]
    async fn test_default_model_is_used_when_unset() {
        let env = TestEnv::new().await;
        let runner = Arc::new(FakeRunner::new());
        let id = env.create_job().await;

        executor(&env, runner.clone()).run(&id).await.unwrap();

        assert!(runner.calls().contains(&"infer:default:0".to_string()));
    }

    #[tokio::test]
    async fn test_success_clears_stale_error_message() {
        let env = TestEnv::new().await;
        let id = env.create_job().await;
        env.repo
            .update(
                &id.to_string(),
                &covergen::database::models::JobUpdate::new()
                    .with_error_message(Some("left over".into())),
            )
            .await
            .unwrap();

        executor(&env, Arc::new(FakeRunner::new())).run(&id).await.unwrap();

        let job = env.job(&id).await;
        assert_eq!(job.status, "succeeded");
        assert!(job.error_message.is_none());
    }
}

mod failure_tests {
    use super::*;

    #[tokio::test]
    async fn test_duration_exceeded_fails_job() {
        let env = TestEnv::new().await;
        let runner = Arc::new(FakeRunner::new().with_duration(600.0));
        let id = env.create_job().await;

        let outcome = executor(&env, runner.clone()).run(&id).await.unwrap();
        assert_eq!(outcome, RunOutcome::Failed);
        assert_eq!(runner.calls(), vec!["preprocess"]);

        let job = env.job(&id).await;
        assert_eq!(job.status, "failed");
        assert_eq!(job.stage, "finalize");
        assert_eq!(job.progress, 100);
        assert!(job.output_mix_path.is_none());
        let message = job.error_message.unwrap();
        assert!(message.contains("duration limit"), "{message}");
        assert!(message.contains("480"), "{message}");
    }

    #[tokio::test]
    async fn test_stage_failure_aborts_remaining_stages() {
        let env = TestEnv::new().await;
        let runner = Arc::new(FakeRunner::new().failing_at(JobStage::Separate));
        let id = env.create_job().await;

        let outcome = executor(&env, runner.clone()).run(&id).await.unwrap();
        assert_eq!(outcome, RunOutcome::Failed);
        assert_eq!(runner.calls(), vec!["preprocess", "separate"]);

        let job = env.job(&id).await;
        assert_eq!(job.status, "failed");
        assert!(job.output_mix_path.is_none());
        let message = job.error_message.unwrap();
        assert!(message.starts_with("separate failed"), "{message}");
        assert!(message.contains("simulated failure"), "{message}");
    }

    #[tokio::test]
    async fn test_missing_artifact_fails_stage() {
        let env = TestEnv::new().await;
        let runner = Arc::new(FakeRunner::new().omitting_output_at(JobStage::Infer));
        let id = env.create_job().await;

        let outcome = executor(&env, runner.clone()).run(&id).await.unwrap();
        assert_eq!(outcome, RunOutcome::Failed);
        assert!(!runner.calls().contains(&"mix".to_string()));

        let message = env.job(&id).await.error_message.unwrap();
        assert!(message.contains("converted vocal is missing"), "{message}");
    }

    #[tokio::test]
    async fn test_failed_job_is_not_rerun() {
        let env = TestEnv::new().await;
        let id = env.create_job().await;
        executor(&env, Arc::new(FakeRunner::new().with_duration(900.0)))
            .run(&id)
            .await
            .unwrap();

        let runner = Arc::new(FakeRunner::new());
        let outcome = executor(&env, runner.clone()).run(&id).await.unwrap();

        assert_eq!(outcome, RunOutcome::AlreadyFinished);
        assert!(runner.calls().is_empty());
        assert_eq!(env.job(&id).await.status, "failed");
    }
}

mod cancellation_tests {
    use super::*;

    #[tokio::test]
    async fn test_canceled_before_start_does_no_work() {
        let env = TestEnv::new().await;
        let runner = Arc::new(FakeRunner::new());
        let id = env.create_job().await;
        env.repo.cancel(&id.to_string()).await.unwrap().unwrap();

        let outcome = executor(&env, runner.clone()).run(&id).await.unwrap();

        assert_eq!(outcome, RunOutcome::Canceled);
        assert!(runner.calls().is_empty());
        assert!(!env.layout.work_paths(&id).preprocessed_song.exists());
        let job = env.job(&id).await;
        assert_eq!(job.status, "canceled");
        assert_eq!(job.stage, "finalize");
        assert_eq!(job.progress, 100);
    }

    #[tokio::test]
    async fn test_cancel_is_observed_at_next_stage_boundary() {
        let env = TestEnv::new().await;
        let runner = Arc::new(FakeRunner::new().blocking_at(JobStage::Separate));
        let id = env.create_job().await;

        let run = {
            let executor = executor(&env, runner.clone());
            tokio::spawn(async move { executor.run(&id).await })
        };

        runner.entered.notified().await;
        let canceled = env.repo.cancel(&id.to_string()).await.unwrap();
        assert!(canceled.is_some());
        runner.release(1);

        let outcome = run.await.unwrap().unwrap();
        assert_eq!(outcome, RunOutcome::Canceled);
        assert_eq!(runner.calls(), vec!["preprocess", "separate"]);

        let job = env.job(&id).await;
        assert_eq!(job.status, "canceled");
        assert_eq!(job.stage, "finalize");
        assert_eq!(job.progress, 100);
        assert!(job.error_message.is_none());
        assert!(job.output_mix_path.is_none());
    }

    #[tokio::test]
    async fn test_failure_does_not_overwrite_cancellation() {
        let env = TestEnv::new().await;
        let runner = Arc::new(
            FakeRunner::new()
                .blocking_at(JobStage::Mix)
                .failing_at(JobStage::Mix),
        );
        let id = env.create_job().await;

        let run = {
            let executor = executor(&env, runner.clone());
            tokio::spawn(async move { executor.run(&id).await })
        };

        runner.entered.notified().await;
        env.repo.cancel(&id.to_string()).await.unwrap();
        runner.release(1);

        assert_eq!(run.await.unwrap().unwrap(), RunOutcome::Canceled);
        let job = env.job(&id).await;
        assert_eq!(job.status, JobStatus::Canceled.as_str());
        assert!(job.error_message.is_none());
    }
}

mod history_tests {
    use super::*;
    use covergen::database::repositories::{HistoryRepository, SqlxHistoryRepository};

    fn recording_executor(
        env: &TestEnv,
        runner: Arc<FakeRunner>,
    ) -> (PipelineExecutor, Arc<SqlxHistoryRepository>) {
        let history = Arc::new(SqlxHistoryRepository::new(env.pool.clone()));
        (executor(env, runner).with_history(history.clone()), history)
    }

    #[tokio::test]
    async fn test_outcomes_are_recorded() {
        let env = TestEnv::new().await;
        let owned = env.create_job_with(|job| job.with_owner("alice")).await;
        let anonymous = env.create_job().await;

        let (ok, history) = recording_executor(&env, Arc::new(FakeRunner::new()));
        assert_eq!(ok.run(&owned).await.unwrap(), RunOutcome::Succeeded);
        let (failing, _) =
            recording_executor(&env, Arc::new(FakeRunner::new().failing_at(JobStage::Infer)));
        assert_eq!(failing.run(&anonymous).await.unwrap(), RunOutcome::Failed);

        let page = history.list(None, 10, 0).await.unwrap();
        assert_eq!(page.total, 2);

        let success = page
            .items
            .iter()
            .find(|h| h.job_id == owned.to_string())
            .unwrap();
        assert_eq!(success.status, "success");
        assert_eq!(success.owner_id.as_deref(), Some("alice"));
        assert!(success.error_message.is_none());

        let error = page
            .items
            .iter()
            .find(|h| h.job_id == anonymous.to_string())
            .unwrap();
        assert_eq!(error.status, "error");
        assert!(error.owner_id.is_none());
        assert!(error.error_message.as_deref().unwrap().contains("infer failed"));

        assert_eq!(history.list(Some("alice"), 10, 0).await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_canceled_run_is_not_recorded() {
        let env = TestEnv::new().await;
        let id = env.create_job().await;
        env.repo.cancel(&id.to_string()).await.unwrap();

        let (executor, history) = recording_executor(&env, Arc::new(FakeRunner::new()));
        assert_eq!(executor.run(&id).await.unwrap(), RunOutcome::Canceled);

        assert_eq!(history.list(None, 10, 0).await.unwrap().total, 0);
    }
}
