#[cfg(test)]
mod integration_tests {
    use crate::{
        CaptureQueue, CaptureResult, CaptureService, CaptureState, Config, ListenerExit, MemoryQueue,
        MemorySeedStore, Metrics, SeedError, SeedService, SeedStore, UrlError,
    };
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct Pipeline {
        service: Arc<CaptureService>,
        queue: Arc<MemoryQueue>,
        store: Arc<MemorySeedStore>,
    }

    fn pipeline() -> Pipeline {
        let mut config = Config::default();
        config.listener.poll_timeout = Duration::from_millis(20);
        let metrics = Arc::new(Metrics::new());
        let store = Arc::new(MemorySeedStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let seeds = Arc::new(SeedService::new(store.clone(), metrics.clone(), &config));
        let service = Arc::new(CaptureService::new(queue.clone(), seeds, metrics, config.listener));
        Pipeline { service, queue, store }
    }

    /// Plays the crawler: answers every queued request with `respond`.
    async fn crawl(queue: &MemoryQueue, respond: impl Fn(&str, &str) -> String) -> usize {
        let mut answered = 0;
        while let Some(request) = queue.pop_request().await.unwrap() {
            assert_eq!(request.state, CaptureState::NotEnqueued);
            queue
                .push_raw_result(respond(request.seed_shadow_id.as_str(), &request.seed_url))
                .await;
            answered += 1;
        }
        answered
    }

    async fn settle(store: &MemorySeedStore, ids: &[crate::ShadowId]) {
        for _ in 0..200 {
            let mut done = true;
            for id in ids {
                done &= store.get_seed(id).await.unwrap().state.is_terminal();
            }
            if done {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("seeds never finished");
    }

    #[tokio::test]
    async fn test_submission_to_archived_capture() {
        let p = pipeline();
        let cancel = CancellationToken::new();
        let listener = p.service.listen_for_results(cancel.clone());

        let group = p
            .service
            .seeds()
            .save("example.com\nhttps://example.org/broken\nhttp://example.net:8080/x", true)
            .await
            .unwrap();
        p.service.capture_group(&group).await.unwrap();
        for seed in &group.seeds {
            assert_eq!(p.store.get_seed(&seed.shadow_id).await.unwrap().state, CaptureState::Pending);
        }

        let answered = crawl(&p.queue, |id, url| {
            if url.contains("broken") {
                format!(r#"{{"SeedShadowID":"{id}","Done":true,"ErrorMessages":["dns failure"],"CaptureMetadata":null}}"#)
            } else {
                format!(
                    r#"{{"SeedShadowID":"{id}","Done":true,"ErrorMessages":null,"CaptureMetadata":{{"Timestamp":"20240315083000","CapturedUrl":"{url}/"}}}}"#
                )
            }
        })
        .await;
        assert_eq!(answered, 3);

        let ids: Vec<_> = group.seeds.iter().map(|s| s.shadow_id.clone()).collect();
        settle(&p.store, &ids).await;
        cancel.cancel();
        assert_eq!(listener.await.unwrap(), ListenerExit::Cancelled);

        let finished = p.service.seeds().get_group(&group.shadow_id).await.unwrap();
        let states: Vec<_> = finished.seeds.iter().map(|s| s.state).collect();
        assert_eq!(
            states,
            vec![CaptureState::DoneSuccess, CaptureState::DoneFailure, CaptureState::DoneSuccess]
        );
        assert_eq!(
            finished.seeds[0].archival_url(),
            Some("https://wayback.webarchiv.cz/wayback/20240315083000/https://example.com/")
        );
        assert_eq!(
            finished.seeds[2].archival_url(),
            Some("https://wayback.webarchiv.cz/wayback/20240315083000/http://example.net:8080/x/")
        );
        assert!(finished.seeds[1].archival_url().is_none());
        assert!(finished.seeds.iter().all(|s| s.archive_is_consistent()));
        assert_eq!(p.queue.pending_results().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unsafe_submission_never_reaches_crawler() {
        let p = pipeline();
        for (input, expected) in [
            ("http://localhost:8080/", UrlError::Loopback),
            ("http://172.20.0.7/latest/meta-data", UrlError::PrivateIp),
            ("https://example.com:22/", UrlError::WellKnownPort(22)),
            ("ftp://example.com/", UrlError::ForbiddenScheme("ftp".to_string())),
        ] {
            let err = p
                .service
                .seeds()
                .save(&format!("example.org\n{input}"), true)
                .await
                .unwrap_err();
            assert_eq!(err, SeedError::InvalidUrl { line: 2, source: expected });
        }
        assert_eq!(p.store.seed_count().await, 0);
        assert_eq!(p.queue.pending_requests().await.unwrap(), 0);
        assert_eq!(p.service.metrics().snapshot().urls_rejected, 4);
    }

    #[tokio::test]
    async fn test_redelivered_and_unfinished_results_are_dropped() {
        let p = pipeline();
        let group = p.service.seeds().save("example.com", true).await.unwrap();
        p.service.capture_group(&group).await.unwrap();
        let id = group.seeds[0].shadow_id.clone();

        let raw = |done: bool, ts: &str| {
            format!(
                r#"{{"SeedShadowID":"{id}","Done":{done},"ErrorMessages":null,"CaptureMetadata":{{"Timestamp":"{ts}","CapturedUrl":"https://example.com"}}}}"#
            )
        };
        p.queue.push_raw_result(raw(false, "20240101000000")).await;
        p.queue.push_raw_result(raw(true, "20240101000001")).await;
        p.queue.push_raw_result(raw(true, "20240101000002")).await;

        let cancel = CancellationToken::new();
        let listener = p.service.listen_for_results(cancel.clone());
        settle(&p.store, std::slice::from_ref(&id)).await;
        for _ in 0..200 {
            if p.queue.pending_results().await.unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        // Let the last popped result be applied before stopping.
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        listener.await.unwrap();

        let seed = p.store.get_seed(&id).await.unwrap();
        assert_eq!(seed.state, CaptureState::DoneSuccess);
        assert!(seed.archival_url().unwrap().contains("/20240101000001/"));
        let snapshot = p.service.metrics().snapshot();
        assert_eq!(snapshot.results_succeeded, 1);
        assert_eq!(snapshot.results_dropped, 2);
    }

    #[tokio::test]
    async fn test_request_wire_format() {
        let p = pipeline();
        let group = p.service.seeds().save("https://user:pw@example.com/a?b=c", false).await.unwrap();
        p.service.capture_seed(&group.seeds[0]).await.unwrap();

        let request = p.queue.pop_request().await.unwrap().unwrap();
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["SeedURL"], "https://example.com/a?b=c");
        assert_eq!(json["SeedShadowID"], group.seeds[0].shadow_id.as_str());
        assert_eq!(json["Status"], "NotEnqueued");

        let result: CaptureResult = serde_json::from_str(&format!(
            r#"{{"SeedShadowID":"{}","Done":true,"ErrorMessages":null,"CaptureMetadata":null}}"#,
            group.seeds[0].shadow_id
        ))
        .unwrap();
        assert!(result.error_messages.is_empty());
    }
}
