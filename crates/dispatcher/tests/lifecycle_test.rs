mod common;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use orchestrator_core::{
        models::{
            CheckpointTemplate, OrchestratorEvent, ServiceEntry, ServiceTemplate, TaskKey, TaskState,
        },
        traits::TaskLogLevel,
        OrchestratorError,
    };
    use orchestrator_dispatcher::{OrchestratorSettings, WaitTimeout};
    use orchestrator_testing_utils::{TaskDescriptorBuilder, TransportCall};

    use crate::common::OrchestratorHarness;

    /// 任务的最后一次销毁是否早于最后一次创建
    fn destroyed_before_last_create(calls: &[TransportCall], key: &TaskKey) -> bool {
        let destroyed = calls
            .iter()
            .rposition(|call| matches!(call, TransportCall::DestroyTask { key: k, .. } if k == key));
        let created = calls
            .iter()
            .rposition(|call| matches!(call, TransportCall::CreateTask { key: k, .. } if k == key));
        matches!((destroyed, created), (Some(d), Some(c)) if d < c)
    }

    fn finished_template(task_id: &str, context_id: &str) -> CheckpointTemplate {
        CheckpointTemplate::named("task finished")
            .with_task(task_id)
            .with_context(context_id)
    }

    #[tokio::test]
    async fn test_unregister_host_aborts_occupants() {
        let harness = OrchestratorHarness::new();
        harness.add_hosts(&["h1", "h2"]).await;
        let ctx = harness.add_context("ctx").await;
        let mut events = harness.orchestrator.subscribe();

        harness
            .orchestrator
            .submit_task(TaskDescriptorBuilder::new("on-h1", &ctx).on_hosts(&["h1"]).build())
            .await
            .unwrap();
        harness
            .orchestrator
            .submit_task(TaskDescriptorBuilder::new("on-h2", &ctx).on_hosts(&["h2"]).build())
            .await
            .unwrap();

        harness.orchestrator.unregister_host_runtime("H1").await.unwrap();

        assert_eq!(harness.state("on-h1", &ctx).await, TaskState::Aborted);
        assert_eq!(harness.state("on-h2", &ctx).await, TaskState::Running);
        let hosts = harness.orchestrator.get_host_runtimes().await;
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].host_name, "h2");

        let finished = harness
            .orchestrator
            .look_checkpoint(&finished_template("on-h1", &ctx), WaitTimeout::from_millis(0))
            .await
            .unwrap();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].value.as_deref(), Some("1"));

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(seen.contains(&OrchestratorEvent::TaskFinished {
            key: TaskKey::new("on-h1", ctx.as_str()),
            state: TaskState::Aborted,
        }));
        assert!(seen.contains(&OrchestratorEvent::HostRuntimeUnregistered {
            host_name: "h1".to_string(),
        }));

        let err = harness
            .orchestrator
            .unregister_host_runtime("h1")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::HostRuntimeNotFound { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_host_registration_is_ignored() {
        let harness = OrchestratorHarness::new();
        harness.add_hosts(&["h1", "H1.", " h1 "]).await;
        assert_eq!(harness.orchestrator.get_host_runtimes().await.len(), 1);

        let err = harness
            .orchestrator
            .register_host_runtime("not a host")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidHostName { .. }));
    }

    #[tokio::test]
    async fn test_self_cleaning_context_evicts_oldest_finished() {
        let harness = OrchestratorHarness::with_settings(OrchestratorSettings {
            default_finished_tasks_kept: 2,
            ..OrchestratorHarness::settings()
        });
        harness.add_hosts(&["h1"]).await;
        let ctx = harness.add_self_cleaning_context("ctx").await;

        for id in ["t1", "t2", "t3"] {
            harness
                .orchestrator
                .submit_task(TaskDescriptorBuilder::new(id, &ctx).build())
                .await
                .unwrap();
        }
        for id in ["t1", "t2", "t3"] {
            harness.finish(id, &ctx).await;
        }

        let remaining: Vec<String> = harness
            .orchestrator
            .get_tasks_in_context(&ctx)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.task_id)
            .collect();
        assert_eq!(remaining, vec!["t2".to_string(), "t3".to_string()]);
        assert_eq!(
            harness.transport.destroyed_tasks(),
            vec![("h1".to_string(), TaskKey::new("t1", ctx.as_str()))]
        );
        assert!(!harness.log_storage.has_task(&ctx, "t1").await);

        // 被淘汰任务的检查点仍然保留
        let finished = harness
            .orchestrator
            .look_checkpoint(&finished_template("t1", &ctx), WaitTimeout::from_millis(0))
            .await
            .unwrap();
        assert_eq!(finished.len(), 1);
    }

    #[tokio::test]
    async fn test_kill_and_delete_context() {
        let harness = OrchestratorHarness::new();
        harness.add_hosts(&["h1", "h2"]).await;
        let ctx = harness.add_context("ctx").await;

        harness
            .orchestrator
            .submit_task(TaskDescriptorBuilder::new("a", &ctx).on_hosts(&["h1"]).build())
            .await
            .unwrap();
        harness
            .orchestrator
            .submit_task(TaskDescriptorBuilder::new("b", &ctx).on_hosts(&["h2"]).build())
            .await
            .unwrap();
        harness
            .orchestrator
            .submit_task(
                TaskDescriptorBuilder::new("waiting", &ctx)
                    .depends_on("never", "a", None)
                    .build(),
            )
            .await
            .unwrap();

        harness.orchestrator.kill_and_delete_context(&ctx).await.unwrap();

        let err = harness.orchestrator.get_context(&ctx).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ContextNotFound { .. }));
        assert!(harness.orchestrator.get_tasks().await.is_empty());
        assert_eq!(harness.load_of("h1").await, 0);
        assert_eq!(harness.load_of("h2").await, 0);

        let mut terminated = harness.transport.terminated_tasks();
        terminated.sort();
        assert_eq!(
            terminated,
            vec![
                ("h1".to_string(), TaskKey::new("a", ctx.as_str())),
                ("h2".to_string(), TaskKey::new("b", ctx.as_str())),
            ]
        );
        let mut deleted = harness.transport.deleted_contexts();
        deleted.sort();
        assert_eq!(
            deleted,
            vec![("h1".to_string(), ctx.clone()), ("h2".to_string(), ctx.clone())]
        );
        assert!(!harness.log_storage.has_context(&ctx).await);

        // 系统上下文不能被删除
        harness
            .orchestrator
            .kill_and_delete_context("system")
            .await
            .unwrap();
        assert!(harness.orchestrator.get_context("system").await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_context_retention() {
        let harness = OrchestratorHarness::with_settings(OrchestratorSettings {
            kept_closed_context_count: 1,
            ..OrchestratorHarness::settings()
        });
        harness.add_hosts(&["h1"]).await;

        for id in ["old", "new"] {
            let ctx = harness.add_context(id).await;
            harness
                .orchestrator
                .submit_task(TaskDescriptorBuilder::new("t", &ctx).build())
                .await
                .unwrap();
        }

        // 仍有任务运行的关闭上下文不会进入保留队列
        harness.orchestrator.close_context("old").await.unwrap();
        harness.orchestrator.close_context("new").await.unwrap();
        assert!(harness.orchestrator.get_context("old").await.is_ok());

        harness.finish("t", "old").await;
        harness.finish("t", "new").await;

        assert!(harness.orchestrator.get_context("old").await.is_err());
        assert!(harness.orchestrator.get_context("new").await.is_ok());

        harness
            .orchestrator
            .set_kept_closed_context_count(0)
            .await
            .unwrap();
        assert!(harness.orchestrator.get_context("new").await.is_err());
        assert_eq!(
            harness.config_store.get("kept_closed_context_count").as_deref(),
            Some("0")
        );
        assert_eq!(harness.orchestrator.settings().await.kept_closed_context_count, 0);
    }

    #[tokio::test]
    async fn test_resubmit_replaces_terminal_task() {
        let harness = OrchestratorHarness::new();
        harness.add_hosts(&["h1"]).await;
        let ctx = harness.add_context("ctx").await;

        harness
            .orchestrator
            .submit_task(TaskDescriptorBuilder::new("job", &ctx).build())
            .await
            .unwrap();

        let err = harness
            .orchestrator
            .submit_task(TaskDescriptorBuilder::new("job", &ctx).build())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::TaskConflict { .. }));

        harness
            .orchestrator
            .checkpoint_reached("progress", Some("50"), "job", &ctx, "h1")
            .await
            .unwrap();
        harness.finish("job", &ctx).await;

        harness
            .orchestrator
            .submit_task(TaskDescriptorBuilder::new("job", &ctx).with_parameter("run", "2").build())
            .await
            .unwrap();

        let task = harness.orchestrator.get_task("job", &ctx).await.unwrap();
        assert_eq!(task.state, TaskState::Running);
        assert_eq!(task.original.parameters.get("run").map(String::as_str), Some("2"));
        assert_eq!(
            harness.transport.destroyed_tasks(),
            vec![("h1".to_string(), TaskKey::new("job", ctx.as_str()))]
        );

        // 旧任务的检查点随替换一并丢弃
        let progress = harness
            .orchestrator
            .look_checkpoint(
                &CheckpointTemplate::named("progress").with_context(&ctx),
                WaitTimeout::from_millis(0),
            )
            .await
            .unwrap();
        assert!(progress.is_empty());
        let finished = harness
            .orchestrator
            .look_checkpoint(&finished_template("job", &ctx), WaitTimeout::from_millis(0))
            .await
            .unwrap();
        assert!(finished.is_empty());
    }

    #[tokio::test]
    async fn test_kill_by_tree_address() {
        let harness = OrchestratorHarness::new();
        harness.add_hosts(&["h1"]).await;
        let ctx = harness.add_context("ctx").await;

        for (id, address) in [
            ("unit", "/suite/unit"),
            ("integration", "/suite/integration"),
            ("bench", "/bench"),
        ] {
            harness
                .orchestrator
                .submit_task(
                    TaskDescriptorBuilder::new(id, &ctx)
                        .with_tree_address(address)
                        .build(),
                )
                .await
                .unwrap();
        }

        harness.orchestrator.kill_task_by_address("/bench").await.unwrap();
        assert_eq!(harness.state("bench", &ctx).await, TaskState::Aborted);

        let killed = harness.orchestrator.kill_node_by_address("/suite").await.unwrap();
        assert_eq!(killed, 2);
        assert_eq!(harness.state("unit", &ctx).await, TaskState::Aborted);
        assert_eq!(harness.state("integration", &ctx).await, TaskState::Aborted);

        let err = harness
            .orchestrator
            .kill_task_by_address("/nothing")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTreeAddress(_)));
        let err = harness
            .orchestrator
            .kill_node_by_address("/nothing")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTreeAddress(_)));
    }

    #[tokio::test]
    async fn test_terminal_states_are_final() {
        let harness = OrchestratorHarness::new();
        harness.add_hosts(&["h1"]).await;
        let ctx = harness.add_context("ctx").await;

        harness
            .orchestrator
            .submit_task(TaskDescriptorBuilder::new("t", &ctx).build())
            .await
            .unwrap();
        harness.orchestrator.kill_task("t", &ctx).await.unwrap();
        assert_eq!(harness.state("t", &ctx).await, TaskState::Aborted);

        // 迟到的结束事件被忽略
        harness
            .orchestrator
            .task_reached_end("t", &ctx, TaskState::Finished)
            .await
            .unwrap();
        assert_eq!(harness.state("t", &ctx).await, TaskState::Aborted);
        harness.orchestrator.kill_task("t", &ctx).await.unwrap();

        let finished = harness
            .orchestrator
            .look_checkpoint(&finished_template("t", &ctx), WaitTimeout::from_millis(0))
            .await
            .unwrap();
        assert_eq!(finished.len(), 1);
        assert_eq!(harness.transport.terminated_tasks().len(), 1);

        let err = harness
            .orchestrator
            .task_reached_end("t", &ctx, TaskState::Running)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidStateTransition { .. }));
    }

    #[tokio::test]
    async fn test_kill_submitted_task_skips_remote_terminate() {
        let harness = OrchestratorHarness::new();
        let ctx = harness.add_context("ctx").await;

        harness
            .orchestrator
            .submit_task(TaskDescriptorBuilder::new("queued", &ctx).build())
            .await
            .unwrap();
        harness.orchestrator.kill_context(&ctx).await.unwrap();

        assert_eq!(harness.state("queued", &ctx).await, TaskState::Aborted);
        assert!(harness.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_sleep_wake_and_restart() {
        let harness = OrchestratorHarness::new();
        harness.add_hosts(&["h1"]).await;
        let ctx = harness.add_context("ctx").await;
        harness
            .orchestrator
            .submit_task(TaskDescriptorBuilder::new("t", &ctx).build())
            .await
            .unwrap();

        harness.orchestrator.task_sleeping("t", &ctx).await.unwrap();
        assert_eq!(harness.state("t", &ctx).await, TaskState::Sleeping);
        harness.orchestrator.task_woke("t", &ctx).await.unwrap();
        assert_eq!(harness.state("t", &ctx).await, TaskState::Running);

        harness.orchestrator.task_restarted("t", &ctx).await.unwrap();
        harness.orchestrator.task_restarted("t", &ctx).await.unwrap();
        let task = harness.orchestrator.get_task("t", &ctx).await.unwrap();
        assert_eq!(task.restart_count, 2);

        harness.finish("t", &ctx).await;
        let err = harness.orchestrator.task_sleeping("t", &ctx).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidStateTransition { .. }));
    }

    #[tokio::test]
    async fn test_services_follow_task_lifetime() {
        let harness = OrchestratorHarness::new();
        harness.add_hosts(&["h1"]).await;
        let ctx = harness.add_context("ctx").await;
        harness
            .orchestrator
            .submit_task(TaskDescriptorBuilder::new("db", &ctx).build())
            .await
            .unwrap();

        let entry = ServiceEntry::new("postgres", "sql", "h1:5432", "db", &ctx);
        harness.orchestrator.register_service(&entry).await.unwrap();
        assert_eq!(
            harness.orchestrator.find_service("postgres", "sql").await,
            Some(entry.clone())
        );

        harness.finish("db", &ctx).await;

        assert_eq!(harness.orchestrator.find_service("postgres", "sql").await, None);
        let err = harness.orchestrator.register_service(&entry).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidServiceEntry(_)));
    }

    #[tokio::test]
    async fn test_service_lookup_by_pattern() {
        let harness = OrchestratorHarness::new();
        harness.add_hosts(&["h1"]).await;
        let ctx = harness.add_context("ctx").await;
        for task_id in ["db", "cache"] {
            harness
                .orchestrator
                .submit_task(TaskDescriptorBuilder::new(task_id, &ctx).build())
                .await
                .unwrap();
        }
        let on_host = harness.orchestrator.get_tasks_on_host("H1").await.unwrap();
        assert_eq!(on_host.len(), 2);

        for entry in [
            ServiceEntry::new("postgres", "sql", "h1:5432", "db", &ctx),
            ServiceEntry::new("redis", "kv", "h1:6379", "cache", &ctx),
        ] {
            harness.orchestrator.register_service(&entry).await.unwrap();
        }

        let all = harness
            .orchestrator
            .look_services(&ServiceTemplate::new().with_service_name("postgres|redis"))
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        // 模板是完整匹配
        let partial = harness
            .orchestrator
            .look_services(&ServiceTemplate::new().with_service_name("post"))
            .await
            .unwrap();
        assert!(partial.is_empty());

        let removed = harness
            .orchestrator
            .unregister_services(&ServiceTemplate::new().with_interface_name("kv"))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        let left = harness
            .orchestrator
            .look_services(&ServiceTemplate::new().with_context(&ctx))
            .await
            .unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].service_name, "postgres");

        let err = harness
            .orchestrator
            .look_services(&ServiceTemplate::new().with_address("("))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidPattern(_)));
    }

    #[tokio::test]
    async fn test_max_package_cache_size_is_pushed_and_persisted() {
        let harness = OrchestratorHarness::new();
        harness.add_hosts(&["h1", "h2"]).await;

        harness
            .orchestrator
            .set_max_package_cache_size(4096)
            .await
            .unwrap();

        assert_eq!(harness.orchestrator.settings().await.max_package_cache_size, 4096);
        assert_eq!(
            harness.config_store.get("max_package_cache_size").as_deref(),
            Some("4096")
        );
        let pushed: Vec<_> = harness
            .transport
            .calls()
            .into_iter()
            .filter(|call| matches!(call, TransportCall::SetMaxPackageCacheSize { bytes: 4096, .. }))
            .collect();
        assert_eq!(pushed.len(), 2);

        // 之后的分发使用新的上限初始化主机
        let ctx = harness.add_context("ctx").await;
        harness
            .orchestrator
            .submit_task(TaskDescriptorBuilder::new("t", &ctx).build())
            .await
            .unwrap();
        assert!(harness.transport.calls().iter().any(|call| matches!(
            call,
            TransportCall::Initialize { max_package_cache_size: 4096, .. }
        )));
    }

    #[tokio::test]
    async fn test_context_management() {
        let harness = OrchestratorHarness::new();

        let generated = harness
            .orchestrator
            .new_context(None, "nightly", "nightly run", serde_json::json!({"build": 42}), false)
            .await
            .unwrap();
        assert_eq!(generated, "0_0");
        let context = harness.orchestrator.get_context(&generated).await.unwrap();
        assert_eq!(context.payload["build"], 42);
        assert!(context.open);

        let err = harness
            .orchestrator
            .new_context(Some(&generated), "again", "", serde_json::Value::Null, false)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::ContextExists { .. }));

        let err = harness
            .orchestrator
            .new_context(Some("bad id"), "x", "", serde_json::Value::Null, false)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidDescriptor(_)));

        let ids: Vec<String> = harness
            .orchestrator
            .get_contexts()
            .await
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert!(ids.contains(&"system".to_string()));
        assert!(ids.contains(&generated));

        assert_eq!(harness.orchestrator.unique_task_id("job"), "job-0-0");
        assert!(!harness.orchestrator.read_audit_log().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_resubmission_waits_for_previous_run_cleanup() {
        let harness = OrchestratorHarness::new();
        harness.add_hosts(&["h1"]).await;
        let ctx = harness.add_context("ctx").await;
        harness
            .orchestrator
            .submit_task(TaskDescriptorBuilder::new("x", &ctx).build())
            .await
            .unwrap();
        harness.finish("x", &ctx).await;

        harness.transport.delay_destroy(Duration::from_millis(200));
        let orchestrator = harness.orchestrator.clone();
        let descriptor = TaskDescriptorBuilder::new("x", &ctx).build();
        let resubmit = tokio::spawn(async move { orchestrator.submit_task(descriptor).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        // 旧运行清理期间的调度轮次不会派发新运行
        harness.add_hosts(&["h2"]).await;
        assert_eq!(harness.state("x", &ctx).await, TaskState::Submitted);
        assert_eq!(harness.transport.created_tasks().len(), 1);

        resubmit.await.unwrap().unwrap();
        assert_eq!(harness.state("x", &ctx).await, TaskState::Running);
        let key = TaskKey::new("x", ctx.as_str());
        assert_eq!(harness.transport.created_tasks().len(), 2);
        assert!(destroyed_before_last_create(&harness.transport.calls(), &key));
        assert!(harness.log_storage.has_task(&ctx, "x").await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_resubmission_waits_for_eviction_cleanup() {
        let harness = OrchestratorHarness::with_settings(OrchestratorSettings {
            default_finished_tasks_kept: 1,
            ..OrchestratorHarness::settings()
        });
        harness.add_hosts(&["h1"]).await;
        let ctx = harness.add_self_cleaning_context("ctx").await;
        for id in ["t1", "t2"] {
            harness
                .orchestrator
                .submit_task(TaskDescriptorBuilder::new(id, &ctx).build())
                .await
                .unwrap();
        }
        harness.finish("t1", &ctx).await;

        // t2 结束时淘汰 t1，清理期间重新提交 t1
        harness.transport.delay_destroy(Duration::from_millis(200));
        let orchestrator = harness.orchestrator.clone();
        let context_id = ctx.clone();
        let end = tokio::spawn(async move {
            orchestrator
                .task_reached_end("t2", &context_id, TaskState::Finished)
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        harness
            .orchestrator
            .submit_task(TaskDescriptorBuilder::new("t1", &ctx).build())
            .await
            .unwrap();
        end.await.unwrap().unwrap();

        assert_eq!(harness.state("t1", &ctx).await, TaskState::Running);
        let key = TaskKey::new("t1", ctx.as_str());
        assert!(destroyed_before_last_create(&harness.transport.calls(), &key));
        // 淘汰删除的是旧日志，新运行的日志保留
        assert!(harness.log_storage.has_task(&ctx, "t1").await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_service_registration_racing_task_end() {
        let harness = OrchestratorHarness::new();
        harness.add_hosts(&["h1"]).await;
        let ctx = harness.add_context("ctx").await;

        for round in 0..20 {
            let task_id = format!("svc-{round}");
            harness
                .orchestrator
                .submit_task(TaskDescriptorBuilder::new(&task_id, &ctx).build())
                .await
                .unwrap();

            let entry = ServiceEntry::new(format!("service-{round}"), "api", "h1:80", &task_id, &ctx);
            let registrar = harness.orchestrator.clone();
            let register = tokio::spawn(async move { registrar.register_service(&entry).await });
            let reporter = harness.orchestrator.clone();
            let context_id = ctx.clone();
            let end = tokio::spawn(async move {
                reporter
                    .task_reached_end(&task_id, &context_id, TaskState::Finished)
                    .await
            });

            end.await.unwrap().unwrap();
            // 要么被拒绝，要么注册后随任务结束一并注销
            if let Err(err) = register.await.unwrap() {
                assert!(matches!(err, OrchestratorError::InvalidServiceEntry(_)));
            }
        }

        let left = harness
            .orchestrator
            .look_services(&ServiceTemplate::new())
            .await
            .unwrap();
        assert!(left.is_empty(), "已结束任务仍有服务: {left:?}");
    }

    #[tokio::test]
    async fn test_task_logs_by_id_and_address() {
        let harness = OrchestratorHarness::new();
        harness.add_hosts(&["h1"]).await;
        let ctx = harness.add_context("ctx").await;
        harness
            .orchestrator
            .submit_task(
                TaskDescriptorBuilder::new("job", &ctx)
                    .with_tree_address("/suite/job")
                    .build(),
            )
            .await
            .unwrap();

        let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        for (i, level) in [TaskLogLevel::Info, TaskLogLevel::Warn, TaskLogLevel::Error]
            .into_iter()
            .enumerate()
        {
            harness
                .orchestrator
                .log(
                    &ctx,
                    "job",
                    level,
                    start + chrono::Duration::seconds(i as i64),
                    &format!("line {i}"),
                )
                .await
                .unwrap();
        }

        assert_eq!(
            harness.orchestrator.get_log_count_for_task("job", &ctx).await.unwrap(),
            3
        );
        let all = harness
            .orchestrator
            .get_logs_for_task("job", &ctx, None)
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].timestamp, start);
        assert_eq!(all[2].level, TaskLogLevel::Error);

        let middle = harness
            .orchestrator
            .get_logs_by_address("/suite/job", Some((1, 2)))
            .await
            .unwrap();
        let lines: Vec<_> = middle.iter().map(|r| r.line.as_str()).collect();
        assert_eq!(lines, vec!["line 1", "line 2"]);
        assert_eq!(
            harness
                .orchestrator
                .get_log_count_by_address("/suite/job")
                .await
                .unwrap(),
            3
        );

        let err = harness
            .orchestrator
            .get_logs_by_address("/suite/missing", None)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTreeAddress(_)));
        assert!(harness
            .orchestrator
            .log(&ctx, "ghost", TaskLogLevel::Info, start, "x")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_delete_by_address() {
        let harness = OrchestratorHarness::new();
        harness.add_hosts(&["h1"]).await;
        let ctx = harness.add_context("ctx").await;
        for (id, address) in [
            ("unit", "/suite/unit"),
            ("integration", "/suite/integration"),
            ("bench", "/bench"),
        ] {
            harness
                .orchestrator
                .submit_task(
                    TaskDescriptorBuilder::new(id, &ctx)
                        .with_tree_address(address)
                        .build(),
                )
                .await
                .unwrap();
        }
        harness.finish("unit", &ctx).await;

        harness.orchestrator.delete_task_by_address("/bench").await.unwrap();
        let err = harness.orchestrator.get_task("bench", &ctx).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(harness
            .transport
            .terminated_tasks()
            .contains(&("h1".to_string(), TaskKey::new("bench", ctx.as_str()))));
        assert!(!harness.log_storage.has_task(&ctx, "bench").await);
        assert_eq!(harness.load_of("h1").await, 1);

        // 结束与运行中的任务都被删除，检查点保留
        let deleted = harness
            .orchestrator
            .delete_node_by_address("/suite")
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert!(harness.orchestrator.get_tasks().await.is_empty());
        assert_eq!(harness.load_of("h1").await, 0);
        assert_eq!(harness.transport.destroyed_tasks().len(), 3);
        let finished = harness
            .orchestrator
            .look_checkpoint(&finished_template("unit", &ctx), WaitTimeout::from_millis(0))
            .await
            .unwrap();
        assert_eq!(finished[0].value.as_deref(), Some("0"));

        // 地址被释放，可以重新使用
        harness
            .orchestrator
            .submit_task(
                TaskDescriptorBuilder::new("bench", &ctx)
                    .with_tree_address("/bench")
                    .build(),
            )
            .await
            .unwrap();
        assert_eq!(harness.state("bench", &ctx).await, TaskState::Running);

        let err = harness
            .orchestrator
            .delete_node_by_address("/suite")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTreeAddress(_)));
        let err = harness
            .orchestrator
            .delete_task_by_address("/nothing")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTreeAddress(_)));
    }
}
