//! Property tests: rolling back restores exactly the checkpointed bytes,
//! whatever happened to the components in between.

use proptest::prelude::*;
use safeguard_checkpoint::{
    CheckpointConfig, CheckpointManager, CheckpointSpec, CodecChain, GzipCodec,
    InMemoryCheckpointStore, InMemoryStateProvider, RollbackOptions,
};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Helpers / Strategies
// ---------------------------------------------------------------------------

const NAMES: [&str; 4] = ["episodic", "semantic", "working", "procedural"];

fn arb_contents() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..512), 1..=NAMES.len())
}

/// Writes as (component index, new bytes); indexes wrap onto the components present.
fn arb_mutations() -> impl Strategy<Value = Vec<(usize, Vec<u8>)>> {
    prop::collection::vec((0usize..NAMES.len(), prop::collection::vec(any::<u8>(), 0..256)), 0..20)
}

async fn manager(provider: Arc<InMemoryStateProvider>, compress: bool) -> CheckpointManager {
    let codec = if compress {
        CodecChain::identity().then(GzipCodec::new(6))
    } else {
        CodecChain::identity()
    };
    CheckpointManager::open(
        provider,
        Arc::new(InMemoryCheckpointStore::new()),
        codec,
        CheckpointConfig {
            compression: compress,
            ..CheckpointConfig::default()
        },
    )
    .await
    .unwrap()
}

fn provider_with(contents: &[Vec<u8>]) -> Arc<InMemoryStateProvider> {
    let provider = InMemoryStateProvider::new();
    for (name, state) in NAMES.iter().zip(contents) {
        provider.set(*name, state.clone());
    }
    Arc::new(provider)
}

// ---------------------------------------------------------------------------
// Property Tests
// ---------------------------------------------------------------------------

proptest! {
    /// Any mutation sequence is undone by a full rollback.
    #[test]
    fn rollback_undoes_any_mutations(
        contents in arb_contents(),
        mutations in arb_mutations(),
        compress in any::<bool>(),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let provider = provider_with(&contents);
            let names = &NAMES[..contents.len()];
            let manager = manager(provider.clone(), compress).await;

            let id = manager
                .create_checkpoint(CheckpointSpec::automatic("before").components(names.iter().copied()))
                .await
                .unwrap();
            let checkpoint = manager.get_checkpoint(id).unwrap();
            prop_assert_eq!(checkpoint.components.len(), names.len());

            for (index, bytes) in &mutations {
                provider.set(names[index % names.len()], bytes.clone());
            }

            let result = manager
                .rollback_to_checkpoint(id, RollbackOptions::default())
                .await
                .unwrap();
            prop_assert!(result.success);
            for (name, expected) in names.iter().zip(&contents) {
                prop_assert_eq!(&provider.get(name).unwrap(), expected);
            }
            Ok(())
        })?;
    }

    /// A selective rollback restores only the selected component.
    #[test]
    fn selective_rollback_touches_only_selection(
        contents in arb_contents(),
        replacement in prop::collection::vec(any::<u8>(), 1..128),
        pick in any::<prop::sample::Index>(),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let provider = provider_with(&contents);
            let names = &NAMES[..contents.len()];
            let manager = manager(provider.clone(), true).await;

            let id = manager
                .create_checkpoint(CheckpointSpec::manual("base").components(names.iter().copied()))
                .await
                .unwrap();
            for name in names {
                provider.set(*name, replacement.clone());
            }

            let chosen = pick.index(names.len());
            let result = manager
                .rollback_to_checkpoint(id, RollbackOptions::default().components([names[chosen]]))
                .await
                .unwrap();
            prop_assert_eq!(result.restored.clone(), vec![names[chosen].to_string()]);

            for (i, name) in names.iter().enumerate() {
                let expected = if i == chosen { &contents[i] } else { &replacement };
                prop_assert_eq!(&provider.get(name).unwrap(), expected);
            }
            Ok(())
        })?;
    }
}
