// SPDX-License-Identifier: AGPL-3.0-or-later

//! Debounced batching of read calls through a Multicall3 aggregator.
//!
//! Every `call` joins an in-memory pending batch and restarts a fixed quiet
//! period; when the period elapses with no new arrivals the batch is flushed
//! as a single `tryAggregate(requireSuccess=false, ...)` static call. Results
//! map positionally back onto the queued order. If the aggregate call itself
//! fails, every entry of that batch is rejected - a partial batch never
//! leaves callers hanging.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{Address, Bytes};
use futures::future::BoxFuture;
use tokio::sync::oneshot;

use crate::contracts::IMulticall3;
use crate::error::RelayerError;
use crate::relayer::ReadProvider;

/// One read call queued for aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateCall {
    pub target: Address,
    pub call_data: Bytes,
}

/// Positional result of one aggregated call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateResult {
    pub success: bool,
    pub return_data: Bytes,
}

/// Transport seam for issuing the aggregate call itself.
pub trait CallAggregator: Send + Sync {
    fn try_aggregate(
        &self,
        calls: Vec<AggregateCall>,
    ) -> BoxFuture<'static, Result<Vec<AggregateResult>, RelayerError>>;
}

/// Production aggregator backed by a Multicall3 deployment.
pub struct MulticallAggregator {
    provider: ReadProvider,
    address: Address,
}

impl MulticallAggregator {
    pub fn new(provider: ReadProvider, address: Address) -> Self {
        Self { provider, address }
    }
}

impl CallAggregator for MulticallAggregator {
    fn try_aggregate(
        &self,
        calls: Vec<AggregateCall>,
    ) -> BoxFuture<'static, Result<Vec<AggregateResult>, RelayerError>> {
        let contract = IMulticall3::new(self.address, self.provider.clone());
        Box::pin(async move {
            let calls: Vec<IMulticall3::Call> = calls
                .into_iter()
                .map(|call| IMulticall3::Call {
                    target: call.target,
                    callData: call.call_data,
                })
                .collect();

            let results = contract
                .tryAggregate(false, calls)
                .call()
                .await
                .map_err(|err| RelayerError::Rpc(err.to_string()))?;

            Ok(results
                .into_iter()
                .map(|result| AggregateResult {
                    success: result.success,
                    return_data: result.returnData,
                })
                .collect())
        })
    }
}

struct QueuedCall {
    call: AggregateCall,
    done: oneshot::Sender<Result<Bytes, RelayerError>>,
}

#[derive(Default)]
struct BatchState {
    pending: Vec<QueuedCall>,
    /// Bumped on every arrival; only the timer matching the latest
    /// generation flushes, which is what restarts the quiet period.
    generation: u64,
}

struct BatchInner {
    aggregator: Arc<dyn CallAggregator>,
    delay: Duration,
    state: Mutex<BatchState>,
}

/// Debounced multicall batcher for read calls.
#[derive(Clone)]
pub struct BatchCaller {
    inner: Arc<BatchInner>,
}

impl BatchCaller {
    pub fn new(aggregator: Arc<dyn CallAggregator>, delay: Duration) -> Self {
        Self {
            inner: Arc::new(BatchInner {
                aggregator,
                delay,
                state: Mutex::new(BatchState::default()),
            }),
        }
    }

    /// Queue a read call. The entry joins the current debounce window
    /// immediately, before the returned future is first polled.
    pub fn call(
        &self,
        target: Address,
        call_data: Bytes,
    ) -> impl Future<Output = Result<Bytes, RelayerError>> {
        let (done, result) = oneshot::channel();

        let generation = {
            let mut state = lock_state(&self.inner.state);
            state.pending.push(QueuedCall {
                call: AggregateCall { target, call_data },
                done,
            });
            state.generation += 1;
            state.generation
        };

        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(inner.delay).await;
            BatchCaller::flush_if_quiet(inner, generation).await;
        });

        async move {
            result
                .await
                .map_err(|_| RelayerError::Rpc("batched call was dropped before settling".into()))?
        }
    }

    /// Flush the pending batch if no call arrived after `generation`.
    /// Entries arriving during execution start a fresh batch; the pending
    /// list is swapped out atomically before the aggregate call is issued.
    async fn flush_if_quiet(inner: Arc<BatchInner>, generation: u64) {
        let batch = {
            let mut state = lock_state(&inner.state);
            if state.generation != generation {
                return;
            }
            std::mem::take(&mut state.pending)
        };
        if batch.is_empty() {
            return;
        }

        tracing::debug!(calls = batch.len(), "flushing multicall batch");
        let calls: Vec<AggregateCall> = batch.iter().map(|queued| queued.call.clone()).collect();

        match inner.aggregator.try_aggregate(calls).await {
            Ok(results) if results.len() == batch.len() => {
                for (queued, result) in batch.into_iter().zip(results) {
                    let settled = if result.success {
                        Ok(result.return_data)
                    } else {
                        Err(RelayerError::BatchCallReverted(result.return_data))
                    };
                    let _ = queued.done.send(settled);
                }
            }
            Ok(results) => {
                tracing::warn!(
                    expected = batch.len(),
                    got = results.len(),
                    "aggregator returned a mis-sized result set"
                );
                for queued in batch {
                    let _ = queued.done.send(Err(RelayerError::Rpc(
                        "aggregator returned a mis-sized result set".into(),
                    )));
                }
            }
            Err(err) => {
                // Reject the whole batch: nobody gets a silent hang.
                let message = format!("multicall aggregate failed: {err}");
                for queued in batch {
                    let _ = queued.done.send(Err(RelayerError::Rpc(message.clone())));
                }
            }
        }
    }
}

fn lock_state(state: &Mutex<BatchState>) -> std::sync::MutexGuard<'_, BatchState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Marker call data that the mock treats as a reverting target.
    const REVERTING: [u8; 4] = [0xde, 0xad, 0xbe, 0xef];

    struct MockAggregator {
        batches: Mutex<Vec<usize>>,
        fail: bool,
    }

    impl MockAggregator {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                batches: Mutex::new(Vec::new()),
                fail,
            })
        }

        fn batch_sizes(&self) -> Vec<usize> {
            self.batches.lock().unwrap().clone()
        }
    }

    impl CallAggregator for MockAggregator {
        fn try_aggregate(
            &self,
            calls: Vec<AggregateCall>,
        ) -> BoxFuture<'static, Result<Vec<AggregateResult>, RelayerError>> {
            self.batches.lock().unwrap().push(calls.len());
            let fail = self.fail;
            Box::pin(async move {
                if fail {
                    return Err(RelayerError::Rpc("aggregate transport down".into()));
                }
                Ok(calls
                    .into_iter()
                    .map(|call| {
                        if call.call_data.as_ref() == REVERTING {
                            AggregateResult {
                                success: false,
                                return_data: Bytes::from_static(b"revert reason"),
                            }
                        } else {
                            // Echo the call data so order mapping is visible.
                            AggregateResult {
                                success: true,
                                return_data: call.call_data,
                            }
                        }
                    })
                    .collect())
            })
        }
    }

    fn target() -> Address {
        Address::repeat_byte(0x42)
    }

    #[tokio::test]
    async fn one_window_one_aggregate_with_positional_results() {
        let aggregator = MockAggregator::new(false);
        let caller = BatchCaller::new(aggregator.clone(), Duration::from_millis(20));

        let pending: Vec<_> = (0u8..5)
            .map(|i| {
                let data = if i == 2 {
                    Bytes::from_static(&REVERTING)
                } else {
                    Bytes::from(vec![i])
                };
                caller.call(target(), data)
            })
            .collect();

        let results = futures::future::join_all(pending).await;

        assert_eq!(aggregator.batch_sizes(), vec![5]);
        for (i, result) in results.iter().enumerate() {
            if i == 2 {
                match result {
                    Err(RelayerError::BatchCallReverted(data)) => {
                        assert_eq!(data.as_ref(), b"revert reason");
                    }
                    other => panic!("expected revert, got {other:?}"),
                }
            } else {
                assert_eq!(result.as_ref().unwrap().as_ref(), &[i as u8]);
            }
        }
    }

    #[tokio::test]
    async fn calls_in_separate_windows_form_separate_batches() {
        let aggregator = MockAggregator::new(false);
        let caller = BatchCaller::new(aggregator.clone(), Duration::from_millis(10));

        caller
            .call(target(), Bytes::from_static(&[1]))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        caller
            .call(target(), Bytes::from_static(&[2]))
            .await
            .unwrap();

        assert_eq!(aggregator.batch_sizes(), vec![1, 1]);
    }

    #[tokio::test]
    async fn late_arrivals_restart_the_quiet_period() {
        let aggregator = MockAggregator::new(false);
        let caller = BatchCaller::new(aggregator.clone(), Duration::from_millis(40));

        let first = caller.call(target(), Bytes::from_static(&[1]));
        tokio::time::sleep(Duration::from_millis(20)).await;
        // Arrives inside the first window, so it joins the same batch.
        let second = caller.call(target(), Bytes::from_static(&[2]));

        let (a, b) = tokio::join!(first, second);
        a.unwrap();
        b.unwrap();
        assert_eq!(aggregator.batch_sizes(), vec![2]);
    }

    #[tokio::test]
    async fn transport_failure_rejects_every_queued_call() {
        let aggregator = MockAggregator::new(true);
        let caller = BatchCaller::new(aggregator, Duration::from_millis(10));

        let pending: Vec<_> = (0u8..3)
            .map(|i| caller.call(target(), Bytes::from(vec![i])))
            .collect();

        for result in futures::future::join_all(pending).await {
            match result {
                Err(RelayerError::Rpc(message)) => {
                    assert!(message.contains("aggregate transport down"));
                }
                other => panic!("expected rpc failure, got {other:?}"),
            }
        }
    }
}
