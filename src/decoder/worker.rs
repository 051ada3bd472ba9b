//! Background decode worker.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use rayon::{ThreadPool, ThreadPoolBuilder};

use super::FrameDecoder;
use crate::catalog::FrameAddress;
use crate::error::{Result, ViewerError};
use crate::DecodedFrame;

/// Shared cancellation flag of one decode request.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create an uncanceled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One decode job for one viewport.
#[derive(Debug, Clone)]
pub struct DecodeRequest {
    /// Monotonic request token, compared on completion.
    pub token: u64,
    /// Grid cell that asked for the frame.
    pub viewport: usize,
    /// Series of the target.
    pub series_id: String,
    /// Slice of the target.
    pub slice_index: usize,
    /// Frame to decode.
    pub address: FrameAddress,
    /// Cancellation flag shared with the requesting viewport.
    pub cancel: CancelToken,
}

/// Completion of a [`DecodeRequest`].
#[derive(Debug)]
pub struct DecodeOutcome {
    /// Token of the originating request.
    pub token: u64,
    /// Grid cell that asked for the frame.
    pub viewport: usize,
    /// Series of the target.
    pub series_id: String,
    /// Slice of the target.
    pub slice_index: usize,
    /// Decoded frame or the failure.
    pub result: Result<DecodedFrame>,
}

/// Executes decode requests on a thread pool and reports completions over a channel.
///
/// Completions are drained by the UI thread with [`try_next`](Self::try_next)
/// or [`next_timeout`](Self::next_timeout).
pub struct DecodeWorker {
    decoder: Arc<FrameDecoder>,
    pool: ThreadPool,
    sender: Sender<DecodeOutcome>,
    receiver: Receiver<DecodeOutcome>,
    in_flight: Arc<AtomicUsize>,
}

impl DecodeWorker {
    /// Create a worker with `threads` decode threads.
    pub fn new(decoder: Arc<FrameDecoder>, threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("decode-{}", i))
            .build()
            .map_err(|e| ViewerError::Internal(format!("Failed to create decode pool: {}", e)))?;
        let (sender, receiver) = mpsc::channel();

        log::info!("Decode worker started with {} threads", threads.max(1));

        Ok(Self {
            decoder,
            pool,
            sender,
            receiver,
            in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Queue a request. Its outcome arrives on the completion channel.
    pub fn submit(&self, request: DecodeRequest) {
        let decoder = Arc::clone(&self.decoder);
        let sender = self.sender.clone();
        let in_flight = Arc::clone(&self.in_flight);
        in_flight.fetch_add(1, Ordering::SeqCst);

        log::debug!(
            "Submitting decode #{} for viewport {} ({} slice {})",
            request.token,
            request.viewport,
            request.series_id,
            request.slice_index
        );

        self.pool.spawn(move || {
            let result = run_request(&decoder, &request);
            let outcome = DecodeOutcome {
                token: request.token,
                viewport: request.viewport,
                series_id: request.series_id,
                slice_index: request.slice_index,
                result,
            };
            // receiver may have been dropped
            let _ = sender.send(outcome);
            in_flight.fetch_sub(1, Ordering::SeqCst);
        });
    }

    /// Next completion, if one is ready.
    pub fn try_next(&self) -> Option<DecodeOutcome> {
        self.receiver.try_recv().ok()
    }

    /// Wait up to `timeout` for the next completion.
    pub fn next_timeout(&self, timeout: Duration) -> Option<DecodeOutcome> {
        match self.receiver.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Requests submitted but not yet reported.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// The synchronous decoder behind the worker.
    pub fn decoder(&self) -> &Arc<FrameDecoder> {
        &self.decoder
    }
}

/// Decode one request, checking for cancellation between stages.
fn run_request(decoder: &FrameDecoder, request: &DecodeRequest) -> Result<DecodedFrame> {
    let check = || {
        if request.cancel.is_canceled() {
            Err(ViewerError::Canceled)
        } else {
            Ok(())
        }
    };

    check()?;
    let frame = match decoder.cached(&request.address) {
        Some(frame) => frame,
        None => {
            let bytes = decoder.fetch(&request.address)?;
            check()?;
            decoder.decode_bytes(&request.address, &bytes)?
        }
    };
    check()?;
    Ok(frame.as_ref().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::test_support::gray_png;
    use crate::decoder::{FrameFetcher, MemoryFetcher};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Fetcher that blocks selected addresses until released.
    struct GatedFetcher {
        inner: MemoryFetcher,
        gates: Mutex<HashMap<String, Receiver<()>>>,
    }

    impl FrameFetcher for GatedFetcher {
        fn fetch(&self, address: &FrameAddress) -> Result<Vec<u8>> {
            let gate = self.gates.lock().unwrap().remove(address.as_str());
            if let Some(gate) = gate {
                let _ = gate.recv_timeout(Duration::from_secs(5));
            }
            self.inner.fetch(address)
        }
    }

    fn request(token: u64, address: &str, cancel: CancelToken) -> DecodeRequest {
        DecodeRequest {
            token,
            viewport: 0,
            series_id: "s".into(),
            slice_index: token as usize,
            address: address.into(),
            cancel,
        }
    }

    #[test]
    fn test_worker_decodes_off_thread() {
        let fetcher = MemoryFetcher::new().with_frame("a", gray_png(2, 2, 9));
        let decoder = Arc::new(FrameDecoder::new(Arc::new(fetcher), 4));
        let worker = DecodeWorker::new(decoder, 2).unwrap();

        worker.submit(request(1, "a", CancelToken::new()));
        let outcome = worker.next_timeout(Duration::from_secs(5)).unwrap();

        assert_eq!(outcome.token, 1);
        assert_eq!(outcome.result.unwrap().samples.get(0), Some(9.0));
    }

    #[test]
    fn test_canceled_before_start() {
        let fetcher = MemoryFetcher::new().with_frame("a", gray_png(2, 2, 0));
        let worker = DecodeWorker::new(Arc::new(FrameDecoder::new(Arc::new(fetcher), 4)), 1).unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        worker.submit(request(1, "a", cancel));

        let outcome = worker.next_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(outcome.result, Err(ViewerError::Canceled)));
    }

    #[test]
    fn test_cancel_during_fetch() {
        let (release, gate) = mpsc::channel();
        let fetcher = GatedFetcher {
            inner: MemoryFetcher::new().with_frame("slow", gray_png(2, 2, 0)),
            gates: Mutex::new(HashMap::from([("slow".to_string(), gate)])),
        };
        let decoder = Arc::new(FrameDecoder::new(Arc::new(fetcher), 4));
        let worker = DecodeWorker::new(Arc::clone(&decoder), 1).unwrap();

        let cancel = CancelToken::new();
        worker.submit(request(1, "slow", cancel.clone()));
        cancel.cancel();
        release.send(()).unwrap();

        let outcome = worker.next_timeout(Duration::from_secs(5)).unwrap();
        assert!(outcome.result.unwrap_err().is_canceled());
        // canceled after fetch, so nothing was decoded or cached
        assert!(decoder.cache().is_empty());
    }

    #[test]
    fn test_out_of_order_completion() {
        let (release, gate) = mpsc::channel();
        let fetcher = GatedFetcher {
            inner: MemoryFetcher::new()
                .with_frame("slice5", gray_png(2, 2, 5))
                .with_frame("slice6", gray_png(2, 2, 6)),
            gates: Mutex::new(HashMap::from([("slice5".to_string(), gate)])),
        };
        let worker = DecodeWorker::new(Arc::new(FrameDecoder::new(Arc::new(fetcher), 4)), 2).unwrap();

        worker.submit(request(5, "slice5", CancelToken::new()));
        worker.submit(request(6, "slice6", CancelToken::new()));

        let first = worker.next_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first.token, 6);
        release.send(()).unwrap();
        let second = worker.next_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(second.token, 5);
    }
}
