mod common;

use std::sync::Arc;

use common::{Probe, indexed_source};
use orchestra::{
    AveragingCoordinator, Batch, DataSource, Device, OrchestraErr, Transport, Trigger, WorkerPool,
};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};

fn random_parts(n: usize, len: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..len).map(|_| rng.random_range(0.0..10.0)).collect())
        .collect()
}

fn reduce(t: Transport, parts: &[Vec<f32>]) -> Vec<f32> {
    let views: Vec<&[f32]> = parts.iter().map(Vec::as_slice).collect();
    let mut out = vec![0.0; parts[0].len()];
    t.reduce(&views, &mut out).unwrap();
    out
}

fn assert_close(a: &[f32], b: &[f32]) {
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(b) {
        let tol = 1e-6 * x.abs().max(y.abs()).max(1.0);
        assert!((x - y).abs() <= tol, "{x} vs {y}");
    }
}

#[test]
fn legacy_and_peer_to_peer_agree() {
    for workers in [1, 2, 3, 4, 7] {
        let parts = random_parts(workers, 10_001, workers as u64);
        assert_close(
            &reduce(Transport::Legacy, &parts),
            &reduce(Transport::PeerToPeer, &parts),
        );
    }
}

#[test]
fn the_mean_does_not_depend_on_participant_order() {
    let mut parts = random_parts(5, 4096, 99);
    let before = reduce(Transport::Legacy, &parts);

    let mut rng = StdRng::seed_from_u64(3);
    for _ in 0..4 {
        parts.shuffle(&mut rng);
        assert_close(&before, &reduce(Transport::Legacy, &parts));
        assert_close(&before, &reduce(Transport::PeerToPeer, &parts));
    }
}

/// Trains `n` batches, one at a time so slot assignment is deterministic.
async fn train(pool: &mut WorkerPool<Probe>, n: usize) {
    let mut source = indexed_source(n);
    while let Some(batch) = source.next_batch().unwrap() {
        pool.dispatch(batch).await.unwrap();
        pool.quiesce().await.unwrap();
    }
}

fn pool(workers: usize) -> WorkerPool<Probe> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let devices = (0..workers).map(Device::Gpu).collect();
    WorkerPool::new(devices, |id, _| Ok(Probe::new(id, 64, Arc::clone(&seen)))).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn averaging_twice_without_batches_changes_nothing() {
    let mut pool = pool(3);
    let mut coord = {
        let mut barrier = pool.barrier().unwrap();
        AveragingCoordinator::seed(Transport::Legacy, true, true, &mut barrier).unwrap()
    };

    train(&mut pool, 6).await;

    let mut barrier = pool.barrier().unwrap();
    let first = coord.average(&mut barrier, 0, Trigger::Boundary).unwrap();
    let after_first = coord.consensus().clone();
    let second = coord.average(&mut barrier, 0, Trigger::Boundary).unwrap();

    assert!(first.changed);
    assert_eq!(first.version, 1);
    assert!(!second.changed);
    assert_eq!(second.version, 1);
    assert_eq!(coord.consensus(), &after_first);
    assert_eq!(coord.rounds(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn broadcast_leaves_every_slot_bit_identical_to_the_consensus() {
    let mut pool = pool(4);
    let mut coord = {
        let mut barrier = pool.barrier().unwrap();
        AveragingCoordinator::seed(Transport::PeerToPeer, true, false, &mut barrier).unwrap()
    };

    for round in 1..=3 {
        train(&mut pool, 5).await;

        let mut barrier = pool.barrier().unwrap();
        let result = coord.average(&mut barrier, 0, Trigger::Boundary).unwrap();
        assert_eq!(result.version, round);
        assert_eq!(result.participants, vec![0, 1, 2, 3]);
        assert_eq!(result.score, None);

        for id in 0..4 {
            assert_eq!(barrier.state(id).unwrap(), *coord.consensus());
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pools_averaged_over_either_transport_agree() {
    let mut legacy = pool(4);
    let mut p2p = pool(4);

    let mut a = {
        let mut barrier = legacy.barrier().unwrap();
        AveragingCoordinator::seed(Transport::Legacy, true, true, &mut barrier).unwrap()
    };
    let mut b = {
        let mut barrier = p2p.barrier().unwrap();
        AveragingCoordinator::seed(Transport::PeerToPeer, true, true, &mut barrier).unwrap()
    };

    for _ in 0..3 {
        train(&mut legacy, 7).await;
        train(&mut p2p, 7).await;

        a.average(&mut legacy.barrier().unwrap(), 0, Trigger::Boundary).unwrap();
        b.average(&mut p2p.barrier().unwrap(), 0, Trigger::Boundary).unwrap();
    }

    assert_eq!(a.consensus().version(), b.consensus().version());
    assert_close(a.consensus().params(), b.consensus().params());
    assert_close(a.consensus().updater(), b.consensus().updater());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn optimizer_state_is_left_alone_when_not_averaged() {
    let mut pool = pool(2);
    let mut coord = {
        let mut barrier = pool.barrier().unwrap();
        AveragingCoordinator::seed(Transport::Legacy, false, true, &mut barrier).unwrap()
    };

    train(&mut pool, 2).await;
    let local: Vec<_> = pool.slots().iter().map(|s| s.state().unwrap()).collect();
    assert_ne!(local[0].updater(), local[1].updater());

    let mut barrier = pool.barrier().unwrap();
    coord.average(&mut barrier, 0, Trigger::EpochEnd).unwrap();

    for (id, before) in local.iter().enumerate() {
        let after = barrier.state(id).unwrap();
        assert_eq!(after.params(), coord.consensus().params());
        assert_eq!(after.updater(), before.updater());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn the_barrier_is_unavailable_while_a_batch_is_in_flight() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut pool = WorkerPool::new(vec![Device::Cpu(0)], |id, _| {
        Ok(Probe::new(id, 4, Arc::clone(&seen)).slowed(std::time::Duration::from_millis(50)))
    })
    .unwrap();

    let batch = Batch::new(ndarray::Array2::zeros((1, 1)), ndarray::Array2::zeros((1, 1))).unwrap();
    pool.dispatch(batch).await.unwrap();

    assert!(pool.barrier().is_none());
    pool.quiesce().await.unwrap();
    assert!(pool.barrier().is_some());
}

#[test]
fn mismatched_states_fail_the_transport() {
    let a = vec![1.0; 4];
    let b = vec![1.0; 5];
    let mut out = vec![0.0; 4];

    let err = Transport::PeerToPeer
        .reduce(&[a.as_slice(), b.as_slice()], &mut out)
        .unwrap_err();
    assert!(matches!(err, OrchestraErr::AveragingTransport(_)));
}
