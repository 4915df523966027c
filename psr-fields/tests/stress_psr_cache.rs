//! Concurrent loads against the regenerating grid cache.
//!
//! Run with: cargo test --release --test stress_psr_cache -- --nocapture

mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::{lock_path, reference_grid, through_f16, CountingSolver, Dataset};
use psr_fields::cache::CachePolicy;
use psr_fields::{Field, FieldKey, FullPsrFieldAbc};

const RES: usize = 8;

fn shared_field(dataset: &Dataset, solver: Arc<CountingSolver>) -> Arc<FullPsrFieldAbc> {
    let policy = CachePolicy {
        lock_poll: Duration::from_millis(5),
        retry_backoff: Duration::from_millis(5),
        ..CachePolicy::default()
    };
    Arc::new(
        FullPsrFieldAbc::new(RES, solver)
            .with_cache_root(dataset.cache_root.clone())
            .with_surface_samples(512)
            .with_policy(policy),
    )
}

#[test]
fn stress_same_key_regenerates_once() {
    let dataset = Dataset::new("abc");
    dataset.add_mesh("m1");
    let solver = Arc::new(CountingSolver::with_delay(Duration::from_millis(100)));
    let field = shared_field(&dataset, solver.clone());
    let model = dataset.model_path("m1");

    let start = Instant::now();
    let grids: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|idx| {
                let field = field.clone();
                let model = model.clone();
                scope.spawn(move || field.load(&model, idx, "").unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    println!("8 concurrent loads of one key took {:?}", start.elapsed());

    assert_eq!(solver.calls(), 1);
    let expected = through_f16(&reference_grid(RES).into_dyn());
    for data in &grids {
        assert_eq!(data.array(&FieldKey::Primary), Some(&expected));
    }
    assert!(!lock_path(&dataset.artifact("m1")).exists());
}

#[test]
fn stress_distinct_keys_regenerate_independently() {
    let dataset = Dataset::new("abc");
    let models = ["a", "b", "c", "d"];
    for model in models {
        dataset.add_mesh(model);
    }
    let solver = Arc::new(CountingSolver::with_delay(Duration::from_millis(20)));
    let field = shared_field(&dataset, solver.clone());

    thread::scope(|scope| {
        for round in 0..4 {
            for model in models {
                let field = field.clone();
                let path = dataset.model_path(model);
                scope.spawn(move || field.load(&path, round, "").unwrap());
            }
        }
    });

    assert_eq!(solver.calls(), models.len());
    for model in models {
        let artifact = dataset.artifact(model);
        assert!(artifact.is_file());
        assert!(!lock_path(&artifact).exists());
    }
}
