//! Deferred batch verification of mempool proofs.
//!
//! Entries admitted with [`ProofVerification::Async`](crate::admission::ProofVerification)
//! wait outside the pool while a worker thread collects their proofs into
//! batches. A batch is verified once it holds `batch_size` entries or its
//! oldest entry waited `max_delay`, but never while a block is being
//! verified through the [`PrioritizedVerifier`] handed to the chain state.
//! Verdicts come back over a channel and are applied by the node under the
//! chain-state write lock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use zend_chainstate::proof::{ProofContext, ProofVerifier};
use zend_consensus::{hash256_to_hex, Hash256};
use zend_log::{log_cat, log_warn, Category};

pub const DEFAULT_PROOF_BATCH_SIZE: usize = 10;
pub const DEFAULT_PROOF_BATCH_DELAY_MS: u64 = 5_000;
const WORKER_POLL: Duration = Duration::from_millis(100);

/// Counts verifications running on behalf of block validation.
#[derive(Debug, Default)]
pub struct PriorityGate {
    active: AtomicUsize,
}

impl PriorityGate {
    pub fn is_busy(&self) -> bool {
        self.active.load(Ordering::Acquire) > 0
    }

    fn enter(&self) -> GateGuard<'_> {
        self.active.fetch_add(1, Ordering::AcqRel);
        GateGuard { gate: self }
    }
}

struct GateGuard<'a> {
    gate: &'a PriorityGate,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.gate.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Verifier for the chain state. While it runs, the async queue holds its
/// batches back.
pub struct PrioritizedVerifier {
    inner: Arc<dyn ProofVerifier>,
    gate: Arc<PriorityGate>,
}

impl PrioritizedVerifier {
    pub fn new(inner: Arc<dyn ProofVerifier>, gate: Arc<PriorityGate>) -> Self {
        Self { inner, gate }
    }
}

impl ProofVerifier for PrioritizedVerifier {
    fn verify(&self, context: &ProofContext) -> bool {
        let _guard = self.gate.enter();
        self.inner.verify(context)
    }

    fn batch_verify(&self, contexts: &[ProofContext]) -> Result<(), Hash256> {
        let _guard = self.gate.enter();
        self.inner.batch_verify(contexts)
    }
}

#[derive(Clone, Debug)]
pub struct ProofQueueConfig {
    pub batch_size: usize,
    pub max_delay: Duration,
}

impl Default for ProofQueueConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_PROOF_BATCH_SIZE,
            max_delay: Duration::from_millis(DEFAULT_PROOF_BATCH_DELAY_MS),
        }
    }
}

#[derive(Clone, Debug)]
struct ProofJob {
    id: Hash256,
    proofs: Vec<ProofContext>,
    queued: Instant,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProofVerdict {
    pub id: Hash256,
    pub valid: bool,
}

pub struct ProofQueue {
    jobs: Option<Sender<ProofJob>>,
    verdicts: Receiver<ProofVerdict>,
    gate: Arc<PriorityGate>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ProofQueue {
    pub fn spawn(
        verifier: Arc<dyn ProofVerifier>,
        gate: Arc<PriorityGate>,
        config: ProofQueueConfig,
    ) -> Self {
        let (job_tx, job_rx) = unbounded::<ProofJob>();
        let (verdict_tx, verdict_rx) = unbounded::<ProofVerdict>();
        let worker_gate = Arc::clone(&gate);
        let handle = thread::Builder::new()
            .name("zend-proofs".to_string())
            .spawn(move || proof_worker(verifier, worker_gate, config, job_rx, verdict_tx))
            .map_err(|err| log_warn!("failed to start proof verifier thread: {err}"))
            .ok();
        Self {
            jobs: Some(job_tx),
            verdicts: verdict_rx,
            gate,
            handle,
        }
    }

    pub fn gate(&self) -> Arc<PriorityGate> {
        Arc::clone(&self.gate)
    }

    /// Queues the proofs of one entry. Returns false once the worker is gone.
    pub fn submit(&self, id: Hash256, proofs: Vec<ProofContext>) -> bool {
        if self.handle.is_none() {
            return false;
        }
        let Some(jobs) = &self.jobs else {
            return false;
        };
        jobs.send(ProofJob {
            id,
            proofs,
            queued: Instant::now(),
        })
        .is_ok()
    }

    pub fn try_verdicts(&self) -> Vec<ProofVerdict> {
        self.verdicts.try_iter().collect()
    }

    pub fn recv_verdict(&self, timeout: Duration) -> Option<ProofVerdict> {
        self.verdicts.recv_timeout(timeout).ok()
    }
}

impl Drop for ProofQueue {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn proof_worker(
    verifier: Arc<dyn ProofVerifier>,
    gate: Arc<PriorityGate>,
    config: ProofQueueConfig,
    jobs: Receiver<ProofJob>,
    verdicts: Sender<ProofVerdict>,
) {
    let batch_size = config.batch_size.max(1);
    let mut batch: Vec<ProofJob> = Vec::new();
    let mut open = true;
    while open || !batch.is_empty() {
        if open {
            match jobs.recv_timeout(WORKER_POLL) {
                Ok(job) => {
                    batch.push(job);
                    batch.extend(jobs.try_iter().take(batch_size.saturating_sub(batch.len())));
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => open = false,
            }
        }
        if batch.is_empty() {
            continue;
        }
        let due = !open
            || batch.len() >= batch_size
            || batch
                .iter()
                .map(|job| job.queued)
                .min()
                .is_some_and(|oldest| oldest.elapsed() >= config.max_delay);
        if !due {
            continue;
        }
        if gate.is_busy() {
            if open {
                continue;
            }
            thread::sleep(WORKER_POLL);
            continue;
        }
        let take = batch.len().min(batch_size);
        let ready: Vec<ProofJob> = batch.drain(..take).collect();
        for verdict in verify_batch(verifier.as_ref(), &ready) {
            if verdicts.send(verdict).is_err() {
                return;
            }
        }
    }
}

/// Verifies the batch as a whole and falls back to entry by entry once it
/// fails, so one bad proof does not condemn its batch mates.
fn verify_batch(verifier: &dyn ProofVerifier, jobs: &[ProofJob]) -> Vec<ProofVerdict> {
    let contexts: Vec<ProofContext> = jobs
        .iter()
        .flat_map(|job| job.proofs.iter().cloned())
        .collect();
    log_cat!(
        Category::Cert,
        "verifying {} proofs for {} entries",
        contexts.len(),
        jobs.len()
    );
    if verifier.batch_verify(&contexts).is_ok() {
        return jobs
            .iter()
            .map(|job| ProofVerdict {
                id: job.id,
                valid: true,
            })
            .collect();
    }
    jobs.iter()
        .map(|job| {
            let valid = verifier.batch_verify(&job.proofs).is_ok();
            if !valid {
                log_cat!(
                    Category::Cert,
                    "proof verification failed for {}",
                    hash256_to_hex(&job.id)
                );
            }
            ProofVerdict { id: job.id, valid }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingVerifier {
        batches: Mutex<Vec<usize>>,
    }

    impl ProofVerifier for RecordingVerifier {
        fn verify(&self, context: &ProofContext) -> bool {
            match context {
                ProofContext::JoinSplit { proof, .. } => !proof.is_empty(),
                _ => true,
            }
        }

        fn batch_verify(&self, contexts: &[ProofContext]) -> Result<(), Hash256> {
            if let Ok(mut batches) = self.batches.lock() {
                batches.push(contexts.len());
            }
            for context in contexts {
                if !self.verify(context) {
                    return Err(context.owner());
                }
            }
            Ok(())
        }
    }

    fn proof(owner: u8, valid: bool) -> ProofContext {
        ProofContext::JoinSplit {
            txid: [owner; 32],
            index: 0,
            anchor: [0u8; 32],
            proof: if valid { vec![1] } else { Vec::new() },
        }
    }

    fn recorder() -> Arc<RecordingVerifier> {
        Arc::new(RecordingVerifier {
            batches: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn full_batch_is_verified_without_waiting() {
        let verifier = recorder();
        let queue = ProofQueue::spawn(
            verifier.clone(),
            Arc::new(PriorityGate::default()),
            ProofQueueConfig {
                batch_size: 2,
                max_delay: Duration::from_secs(600),
            },
        );
        assert!(queue.submit([1; 32], vec![proof(1, true)]));
        assert!(queue.submit([2; 32], vec![proof(2, false)]));

        let mut verdicts: Vec<ProofVerdict> = (0..2)
            .filter_map(|_| queue.recv_verdict(Duration::from_secs(5)))
            .collect();
        verdicts.sort_by_key(|verdict| verdict.id);
        assert_eq!(
            verdicts,
            vec![
                ProofVerdict {
                    id: [1; 32],
                    valid: true
                },
                ProofVerdict {
                    id: [2; 32],
                    valid: false
                },
            ]
        );
        // One combined attempt, then one per entry.
        assert_eq!(*verifier.batches.lock().expect("lock"), vec![2, 1, 1]);
    }

    #[test]
    fn partial_batch_waits_for_the_delay() {
        let queue = ProofQueue::spawn(
            recorder(),
            Arc::new(PriorityGate::default()),
            ProofQueueConfig {
                batch_size: 10,
                max_delay: Duration::from_millis(300),
            },
        );
        let started = Instant::now();
        queue.submit([3; 32], vec![proof(3, true)]);
        let verdict = queue
            .recv_verdict(Duration::from_secs(5))
            .expect("verdict");
        assert!(verdict.valid);
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[test]
    fn block_verification_holds_batches_back() {
        let gate = Arc::new(PriorityGate::default());
        let queue = ProofQueue::spawn(
            recorder(),
            Arc::clone(&gate),
            ProofQueueConfig {
                batch_size: 1,
                max_delay: Duration::from_millis(0),
            },
        );
        let guard = gate.enter();
        queue.submit([4; 32], vec![proof(4, true)]);
        assert!(queue.recv_verdict(Duration::from_millis(400)).is_none());
        drop(guard);
        assert!(queue.recv_verdict(Duration::from_secs(5)).is_some());
    }

    #[test]
    fn prioritized_verifier_marks_the_gate_busy() {
        struct Probe(Arc<PriorityGate>);
        impl ProofVerifier for Probe {
            fn verify(&self, _context: &ProofContext) -> bool {
                self.0.is_busy()
            }
        }
        let gate = Arc::new(PriorityGate::default());
        let verifier = PrioritizedVerifier::new(Arc::new(Probe(Arc::clone(&gate))), Arc::clone(&gate));
        assert!(verifier.verify(&proof(5, true)));
        assert!(!gate.is_busy());
    }
}
