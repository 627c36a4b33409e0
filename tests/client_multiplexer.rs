mod common;

use common::{document, quiet_config, Script, ScriptedLoader};
use gs_worker::batch_plan::convert_in_batches;
use gs_worker::client::Lifecycle;
use gs_worker::config::{Batching, BusyPolicy};
use gs_worker::engine::EngineFs;
use gs_worker::protocol::OperationKind;
use gs_worker::{ConvertOptions, OptimizeOptions, Progress, ProgressCallback, WorkerClient, WorkerError};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn recorder() -> (Arc<Mutex<Vec<Progress>>>, ProgressCallback) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, Arc::new(move |p: Progress| sink.lock().unwrap().push(p)))
}

fn slow(ms: u64) -> Script {
    Script {
        delay: Duration::from_millis(ms),
        ..Script::default()
    }
}

#[tokio::test]
async fn three_page_convert_end_to_end() {
    let loader = ScriptedLoader::new(Script::default());
    let client = WorkerClient::new(loader.clone(), &quiet_config());
    let (seen, on_progress) = recorder();

    let out = client
        .convert(
            document(3),
            ConvertOptions {
                on_progress: Some(on_progress),
                ..ConvertOptions::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(out.images.len(), 3);
    assert_eq!((out.first_page, out.last_page), (1, 3));
    assert_eq!(out.images[2], b"png16m:3".to_vec());
    let seen = seen.lock().unwrap();
    assert_eq!(seen.first(), Some(&Progress { current: 0, total: 3 }));
    assert_eq!(seen.last(), Some(&Progress { current: 3, total: 3 }));
    assert!(seen.iter().all(|p| p.current <= p.total));
    assert!(client.is_ready());
    assert!(loader.fs.files().is_empty());
    assert!(loader.probe.invocations()[0].contains(&"-r150".to_string()));
}

#[tokio::test]
async fn concurrent_inits_share_one_load() {
    let loader = ScriptedLoader::new(Script::default());
    let client = WorkerClient::new(loader.clone(), &quiet_config());

    let (a, b, c) = tokio::join!(client.init(), client.init(), client.init());
    assert_eq!((a, b, c), (Ok(()), Ok(()), Ok(())));
    assert_eq!(client.lifecycle(), Lifecycle::Ready);
    assert_eq!(loader.probe.loads.load(Ordering::SeqCst), 1);

    client.init().await.unwrap();
    assert_eq!(loader.probe.loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_init_rejects_joiners_and_allows_retry() {
    let loader = ScriptedLoader::failing(Script::default(), 1);
    let client = WorkerClient::new(loader.clone(), &quiet_config());

    let (a, b) = tokio::join!(client.init(), client.init());
    assert!(matches!(a, Err(WorkerError::Initialization(_))));
    assert_eq!(a, b);
    assert_eq!(client.lifecycle(), Lifecycle::Uninitialized);

    client.init().await.unwrap();
    assert_eq!(loader.probe.loads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn queued_operations_never_overlap() {
    let loader = ScriptedLoader::new(slow(20));
    let client = WorkerClient::new(loader.clone(), &quiet_config());

    let (a, b, c) = tokio::join!(
        client.convert(document(2), ConvertOptions::default()),
        client.analyze(document(4), None),
        client.optimize(document(1), OptimizeOptions::default()),
    );
    assert_eq!(a.unwrap().images.len(), 2);
    assert_eq!(b.unwrap(), 4);
    assert!(!c.unwrap().is_empty());
    assert_eq!(loader.probe.max_running.load(Ordering::SeqCst), 1);
    assert_eq!(loader.probe.invocations().len(), 3);
}

#[tokio::test]
async fn reject_policy_refuses_second_operation() {
    let loader = ScriptedLoader::new(slow(50));
    let mut cfg = quiet_config();
    cfg.client.busy_policy = BusyPolicy::Reject;
    let client = WorkerClient::new(loader.clone(), &cfg);
    client.init().await.unwrap();

    let (a, b) = tokio::join!(
        client.convert(document(2), ConvertOptions::default()),
        client.convert(document(2), ConvertOptions::default()),
    );
    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(WorkerError::Busy(OperationKind::Convert)))));
}

#[tokio::test]
async fn operations_require_init_when_auto_init_is_off() {
    let loader = ScriptedLoader::new(Script::default());
    let mut cfg = quiet_config();
    cfg.client.auto_init = false;
    let client = WorkerClient::new(loader.clone(), &cfg);

    let err = client.analyze(document(1), None).await.unwrap_err();
    assert_eq!(err, WorkerError::NotReady);
    assert_eq!(loader.probe.loads.load(Ordering::SeqCst), 0);

    client.init().await.unwrap();
    assert_eq!(client.analyze(document(6), None).await.unwrap(), 6);
}

#[tokio::test]
async fn engine_failure_settles_only_its_operation() {
    let loader = ScriptedLoader::new(Script {
        exit_code: 3,
        ..Script::default()
    });
    let client = WorkerClient::new(loader.clone(), &quiet_config());

    let err = client
        .convert(document(2), ConvertOptions::default())
        .await
        .unwrap_err();
    match err {
        WorkerError::Operation { kind, message } => {
            assert_eq!(kind, OperationKind::Convert);
            assert!(message.contains("code 3"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(client.is_ready());
    assert!(loader.fs.files().is_empty());
}

#[tokio::test]
async fn terminate_settles_in_flight_work() {
    let loader = ScriptedLoader::new(slow(200));
    let client = WorkerClient::new(loader.clone(), &quiet_config());
    client.init().await.unwrap();

    let running = {
        let client = client.clone();
        tokio::spawn(async move { client.convert(document(1), ConvertOptions::default()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.terminate();

    assert_eq!(running.await.unwrap().unwrap_err(), WorkerError::Terminated);
    assert_eq!(client.lifecycle(), Lifecycle::Uninitialized);

    let page_count = client.analyze(document(2), None).await.unwrap();
    assert_eq!(page_count, 2);
    assert_eq!(loader.probe.loads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn optimize_passes_requested_profile() {
    let loader = ScriptedLoader::new(Script::default());
    let client = WorkerClient::new(loader.clone(), &quiet_config());
    let out = client
        .optimize(
            document(2),
            OptimizeOptions {
                quality_profile: Some("/screen".to_string()),
                on_progress: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(out, b"%PDF-1.4 /screen".to_vec());
}

#[tokio::test]
async fn batched_convert_keeps_page_order_and_overall_progress() {
    let loader = ScriptedLoader::new(Script::default());
    let client = WorkerClient::new(loader.clone(), &quiet_config());
    let batching = Batching {
        pages_per_batch: 4,
        min_pages_per_batch: 2,
    };
    let (seen, on_progress) = recorder();

    let out = convert_in_batches(
        &client,
        document(10),
        ConvertOptions {
            on_progress: Some(on_progress),
            ..ConvertOptions::default()
        },
        &batching,
    )
    .await
    .unwrap();

    let expected: Vec<Vec<u8>> = (1..=10).map(|p| format!("png16m:{p}").into_bytes()).collect();
    assert_eq!(out.images, expected);
    assert_eq!((out.first_page, out.last_page), (1, 10));
    // analyze plus batches 1-4, 5-8, 9-10
    assert_eq!(loader.probe.invocations().len(), 4);

    let seen = seen.lock().unwrap();
    assert!(seen.iter().all(|p| p.total == 10 && p.current <= 10));
    assert_eq!(seen.last(), Some(&Progress { current: 10, total: 10 }));
}

#[tokio::test]
async fn missing_output_is_a_staging_failure() {
    let loader = ScriptedLoader::new(Script {
        skip_outputs: true,
        ..Script::default()
    });
    let client = WorkerClient::new(loader.clone(), &quiet_config());

    let err = client
        .optimize(document(2), OptimizeOptions::default())
        .await
        .unwrap_err();
    match err {
        WorkerError::Operation { kind, message } => {
            assert_eq!(kind, OperationKind::Optimize);
            assert!(message.contains("staging failed"), "{message}");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(loader.fs.files().is_empty());
    assert!(client.is_ready());
}

#[tokio::test]
async fn boundary_death_settles_outstanding_work() {
    let loader = ScriptedLoader::new(Script {
        panic_on_run: true,
        delay: Duration::from_millis(50),
        ..Script::default()
    });
    let client = WorkerClient::new(loader.clone(), &quiet_config());
    client.init().await.unwrap();

    let (a, b) = tokio::join!(
        client.convert(document(1), ConvertOptions::default()),
        client.analyze(document(1), None),
    );
    assert_eq!(a.unwrap_err(), WorkerError::BoundaryGone);
    // queued behind the gate; by its turn the boundary is gone
    assert_eq!(b.unwrap_err(), WorkerError::NotReady);
    assert_eq!(client.lifecycle(), Lifecycle::Uninitialized);
}

#[tokio::test]
async fn stale_outputs_never_reach_a_result() {
    let loader = ScriptedLoader::new(Script::default());
    loader.fs.make_dir("/tmp").unwrap();
    loader.fs.make_dir("/tmp/output").unwrap();
    loader.fs.write("/tmp/output/page-2.png", b"stale:2").unwrap();
    loader.fs.write("/tmp/output/page-3.png", b"stale:3").unwrap();
    let client = WorkerClient::new(loader.clone(), &quiet_config());

    let out = client
        .convert(document(1), ConvertOptions::default())
        .await
        .unwrap();
    assert_eq!(out.images, vec![b"png16m:1".to_vec()]);
    assert_eq!((out.first_page, out.last_page), (1, 1));
    assert!(loader.fs.files().is_empty());
}
