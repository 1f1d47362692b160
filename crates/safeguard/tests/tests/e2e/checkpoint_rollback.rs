//! End-to-end test: checkpoint creation, rollback, compensation on partial
//! failure and integrity refusal.

use safeguard_checkpoint::{
    AesGcmCodec, CheckpointConfig, CheckpointError, CheckpointFilter, CheckpointKind,
    CheckpointManager, CheckpointSort, CheckpointSpec, CheckpointStore, CodecChain, GzipCodec,
    InMemoryCheckpointStore, RetentionPolicy, RollbackOptions, RollbackTarget,
};
use safeguard_tests::{memory_provider, FailingStateProvider, COMPONENTS};
use std::sync::Arc;
use std::time::Duration;

const ALL: [&str; 3] = ["episodic", "semantic", "working"];

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn manager_over(
    provider: Arc<FailingStateProvider>,
    store: Arc<InMemoryCheckpointStore>,
) -> Arc<CheckpointManager> {
    Arc::new(
        CheckpointManager::open(
            provider,
            store,
            CodecChain::identity(),
            CheckpointConfig::default(),
        )
        .await
        .unwrap(),
    )
}

fn mutate(provider: &FailingStateProvider) {
    for (name, _) in COMPONENTS {
        provider.set(name, format!("{}-v2", name).as_bytes());
    }
}

fn assert_contents(provider: &FailingStateProvider, version: &str) {
    for (name, _) in COMPONENTS {
        assert_eq!(
            provider.get(name).unwrap(),
            format!("{}-{}", name, version).into_bytes(),
            "component {}",
            name
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rollback_restores_exact_state() {
    let provider = Arc::new(FailingStateProvider::new(memory_provider()));
    let manager = manager_over(provider.clone(), Arc::new(InMemoryCheckpointStore::new())).await;

    let id = manager
        .create_checkpoint(CheckpointSpec::manual("before-consolidation").components(ALL))
        .await
        .unwrap();
    mutate(&provider);
    assert_contents(&provider, "v2");

    let result = manager
        .rollback_to_checkpoint(id, RollbackOptions::default())
        .await
        .unwrap();
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.restored, ALL.map(String::from).to_vec());
    assert!(result.failed.is_empty());
    assert_contents(&provider, "v1");
}

#[tokio::test]
async fn partial_restore_failure_is_compensated() {
    let provider = Arc::new(FailingStateProvider::new(memory_provider()));
    let manager = manager_over(provider.clone(), Arc::new(InMemoryCheckpointStore::new())).await;
    let id = manager
        .create_checkpoint(CheckpointSpec::automatic("hourly").components(ALL))
        .await
        .unwrap();

    mutate(&provider);
    provider.fail_restore("semantic");
    let result = manager
        .rollback_to_checkpoint(id, RollbackOptions::default())
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result.restored.is_empty());
    assert_eq!(result.failed.len(), 1);
    assert_eq!(result.failed[0].component, "semantic");
    // The failing device also refuses the compensating write.
    assert_eq!(result.unreconciled, vec!["semantic".to_string()]);
    assert_eq!(result.reverted, vec!["episodic".to_string()]);
    assert_eq!(result.not_attempted, vec!["working".to_string()]);
    assert!(result.error.as_deref().unwrap().contains("semantic"));

    // episodic was restored and then put back.
    assert_eq!(provider.restores(), vec!["episodic", "episodic"]);
    assert_contents(&provider, "v2");

    match result.into_result() {
        Err(CheckpointError::RollbackFailed { restored, failed }) => {
            assert!(restored.is_empty());
            assert!(failed.contains(&"semantic".to_string()));
        }
        other => panic!("unexpected: {:?}", other),
    }

    provider.heal();
    let retry = manager
        .rollback_to_checkpoint(id, RollbackOptions::default())
        .await
        .unwrap();
    assert!(retry.success);
    assert_contents(&provider, "v1");
}

#[tokio::test]
async fn corrupt_checkpoint_is_refused_before_any_restore() {
    let provider = Arc::new(FailingStateProvider::new(memory_provider()));
    let store = Arc::new(InMemoryCheckpointStore::new());
    let manager = manager_over(provider.clone(), store.clone()).await;
    let id = manager
        .create_checkpoint(CheckpointSpec::manual("golden").components(ALL))
        .await
        .unwrap();
    mutate(&provider);

    assert!(store.replace_payload(id, "working", b"bit rot".to_vec()));
    let err = manager
        .rollback_to_checkpoint(id, RollbackOptions::default())
        .await
        .unwrap_err();
    match err {
        CheckpointError::Integrity { id: failed, detail } => {
            assert_eq!(failed, id);
            assert!(detail.contains("working"), "{}", detail);
        }
        other => panic!("unexpected: {:?}", other),
    }

    assert!(provider.restores().is_empty());
    assert_contents(&provider, "v2");
    for component in ALL {
        assert!(!manager.locks().is_locked(component));
    }
}

#[tokio::test]
async fn selective_rollback_leaves_other_components_alone() {
    let provider = Arc::new(FailingStateProvider::new(memory_provider()));
    let manager = manager_over(provider.clone(), Arc::new(InMemoryCheckpointStore::new())).await;
    let id = manager
        .create_checkpoint(CheckpointSpec::manual("all").components(ALL))
        .await
        .unwrap();
    mutate(&provider);

    let result = manager
        .rollback_to_checkpoint(id, RollbackOptions::default().components(["working"]))
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(provider.get("working").unwrap(), b"working-v1".to_vec());
    assert_eq!(provider.get("episodic").unwrap(), b"episodic-v2".to_vec());

    let partial = manager
        .create_checkpoint(CheckpointSpec::manual("episodic-only").components(["episodic"]))
        .await
        .unwrap();
    let err = manager
        .rollback_to_checkpoint(partial, RollbackOptions::default().components(["semantic"]))
        .await
        .unwrap_err();
    assert!(matches!(err, CheckpointError::ComponentNotCovered { .. }));
}

#[tokio::test]
async fn pre_rollback_checkpoint_allows_undo() {
    let provider = Arc::new(FailingStateProvider::new(memory_provider()));
    let manager = manager_over(provider.clone(), Arc::new(InMemoryCheckpointStore::new())).await;
    let id = manager
        .create_checkpoint(CheckpointSpec::manual("v1").components(ALL))
        .await
        .unwrap();
    mutate(&provider);

    let result = manager
        .rollback_to_checkpoint(id, RollbackOptions::default().with_pre_rollback_checkpoint())
        .await
        .unwrap();
    assert_contents(&provider, "v1");

    let undo = result.pre_rollback_checkpoint.unwrap();
    assert_eq!(
        manager.get_checkpoint(undo).unwrap().kind,
        CheckpointKind::EventTriggered
    );
    manager
        .rollback_to_checkpoint(undo, RollbackOptions::default())
        .await
        .unwrap();
    assert_contents(&provider, "v2");
}

#[tokio::test]
async fn emergency_rollback_targets_latest() {
    let provider = Arc::new(FailingStateProvider::new(memory_provider()));
    let manager = manager_over(provider.clone(), Arc::new(InMemoryCheckpointStore::new())).await;

    let empty = manager
        .emergency_rollback(RollbackTarget::Latest, Duration::from_secs(1))
        .await;
    assert!(!empty.success);
    assert_eq!(empty.checkpoint, None);

    manager
        .create_checkpoint(CheckpointSpec::automatic("first").components(ALL))
        .await
        .unwrap();
    mutate(&provider);
    let latest = manager
        .create_checkpoint(CheckpointSpec::automatic("second").components(ALL))
        .await
        .unwrap();
    provider.set("episodic", b"episodic-v3");

    let result = manager
        .emergency_rollback(RollbackTarget::Latest, Duration::from_secs(5))
        .await;
    assert!(result.success);
    assert_eq!(result.checkpoint, Some(latest));
    assert_contents(&provider, "v2");
}

#[tokio::test]
async fn encrypted_payloads_never_hold_plaintext() {
    let provider = Arc::new(FailingStateProvider::new(memory_provider()));
    let store = Arc::new(InMemoryCheckpointStore::new());
    let manager = CheckpointManager::open(
        provider.clone(),
        store.clone(),
        CodecChain::identity()
            .then(GzipCodec::new(6))
            .then(AesGcmCodec::generate()),
        CheckpointConfig {
            compression: true,
            encryption: true,
            ..CheckpointConfig::default()
        },
    )
    .await
    .unwrap();

    let id = manager
        .create_checkpoint(CheckpointSpec::manual("sealed").components(ALL))
        .await
        .unwrap();
    let stored = store.load(id).await.unwrap();
    for (name, plain) in COMPONENTS {
        let bytes = &stored.components[name];
        assert!(!bytes.windows(plain.len()).any(|w| w == plain));
    }

    mutate(&provider);
    manager
        .rollback_to_checkpoint(id, RollbackOptions::default())
        .await
        .unwrap();
    assert_contents(&provider, "v1");
}

#[tokio::test]
async fn retention_prunes_automatic_but_keeps_manual() {
    let provider = Arc::new(FailingStateProvider::new(memory_provider()));
    let manager = CheckpointManager::open(
        provider,
        Arc::new(InMemoryCheckpointStore::new()),
        CodecChain::identity(),
        CheckpointConfig {
            retention: RetentionPolicy {
                max_checkpoints: 10,
                keep_recent: 2,
                ..RetentionPolicy::default()
            },
            ..CheckpointConfig::default()
        },
    )
    .await
    .unwrap();

    for name in ["release-1", "release-2"] {
        manager
            .create_checkpoint(CheckpointSpec::manual(name).components(["working"]))
            .await
            .unwrap();
    }
    for i in 0..5 {
        manager
            .create_checkpoint(CheckpointSpec::automatic(format!("auto-{}", i)).components(["working"]))
            .await
            .unwrap();
    }

    let manual = manager.list_checkpoints(
        &CheckpointFilter::all().kind(CheckpointKind::Manual),
        CheckpointSort::Name,
    );
    assert_eq!(manual.len(), 2);
    let automatic: Vec<_> = manager
        .list_checkpoints(
            &CheckpointFilter::all().kind(CheckpointKind::Automatic),
            CheckpointSort::OldestFirst,
        )
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(automatic, vec!["auto-3", "auto-4"]);
    assert_eq!(manager.len(), 4);
}
