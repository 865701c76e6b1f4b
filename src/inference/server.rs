use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use itertools::Itertools;

use crate::error::ChannelError;
use crate::game::Game;
use crate::net::store::ModelHandle;
use crate::net::Evaluation;
use crate::util::metrics::RunningAverage;
use crate::util::worker_pool::panic_message;

struct EvalRequest<G: Game> {
    position: G::Position,
    reply: Sender<Evaluation<G>>,
}

/// Shared model evaluation backend.
///
/// A few threads pull requests from one queue, group them into batches of up to `batch_size`
/// (waiting at most `batch_timeout` for a batch to fill) and evaluate each batch under the model
/// read lock. The threads stop once every channel created by the server is dropped.
pub struct InferenceServer<G: Game> {
    requests: Sender<EvalRequest<G>>,
}

impl<G: Game> InferenceServer<G> {
    pub fn start(
        model: ModelHandle<G>,
        threads: usize,
        batch_size: usize,
        batch_timeout: Duration,
    ) -> io::Result<Self> {
        assert!(threads > 0);
        let batch_size = batch_size.max(1);
        let (requests_tx, requests_rx) = unbounded::<EvalRequest<G>>();
        for idx in 0..threads {
            let model = model.clone();
            let requests_rx = requests_rx.clone();
            thread::Builder::new()
                .name(format!("inference-{idx}"))
                .spawn(move || serve(model, requests_rx, batch_size, batch_timeout))?;
        }
        Ok(Self {
            requests: requests_tx,
        })
    }

    /// Open `count` channels to this backend, numbered from zero.
    pub fn channels(self, count: usize) -> Vec<InferenceChannel<G>> {
        (0..count)
            .map(|id| InferenceChannel::new(id, self.requests.clone()))
            .collect()
    }
}

fn serve<G: Game>(
    model: ModelHandle<G>,
    requests: Receiver<EvalRequest<G>>,
    batch_size: usize,
    batch_timeout: Duration,
) {
    log::debug!("inference server started, batch size {batch_size}");
    let mut batch_size_metric = RunningAverage::new(0.01, metrics::gauge!("inference.batch_size"));

    while let Ok(first) = requests.recv() {
        let mut batch = vec![first];
        let deadline = Instant::now() + batch_timeout;
        while batch.len() < batch_size {
            match requests.recv_deadline(deadline) {
                Ok(request) => batch.push(request),
                Err(_) => break,
            }
        }

        let positions = batch.iter().map(|r| r.position).collect_vec();
        let evaluated = panic::catch_unwind(AssertUnwindSafe(|| model.read().net().evaluate(&positions)));
        let outputs = match evaluated {
            Ok(outputs) => outputs,
            Err(payload) => {
                /* Dropping the batch drops its reply senders, only these requests fail */
                log::warn!(
                    "model evaluation panicked on a batch of {} positions: {}",
                    batch.len(),
                    panic_message(payload.as_ref())
                );
                metrics::counter!("inference.failed_batches").increment(1);
                continue;
            }
        };
        debug_assert_eq!(outputs.len(), batch.len());
        batch_size_metric.set(batch.len() as f64);
        metrics::counter!("inference.requests").increment(batch.len() as u64);

        for (request, output) in batch.into_iter().zip(outputs) {
            /* The requesting game may have been abandoned, its reply is simply dropped */
            let _ = request.reply.send(output);
        }
    }
    log::debug!("inference server stopped");
}

/// A handle through which one game at a time requests evaluations from the backend.
///
/// Every request carries its own reply slot, so an abandoned request never leaves a stale answer
/// behind for the next game borrowing this channel.
pub struct InferenceChannel<G: Game> {
    id: usize,
    requests: Sender<EvalRequest<G>>,
}

impl<G: Game> InferenceChannel<G> {
    fn new(id: usize, requests: Sender<EvalRequest<G>>) -> Self {
        Self { id, requests }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn evaluate(&self, position: &G::Position) -> Result<Evaluation<G>, ChannelError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.requests
            .send(EvalRequest {
                position: *position,
                reply: reply_tx,
            })
            .map_err(|_| ChannelError::Disconnected)?;
        reply_rx.recv().map_err(|_| ChannelError::Disconnected)
    }
}

#[cfg(test)]
pub(crate) fn disconnected_channel<G: Game>(id: usize) -> InferenceChannel<G> {
    let (requests_tx, _requests_rx) = unbounded();
    InferenceChannel::new(id, requests_tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::game::Position;
    use crate::net::linear::LinearNetBuilder;
    use crate::net::{Network, NetworkBuilder};
    use crate::ttt::{TttGame, TttMove, TttPosition};
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn start_server(threads: usize, batch_size: usize) -> InferenceServer<TttGame> {
        let net = LinearNetBuilder::<TttGame>::new().build_new();
        InferenceServer::start(
            ModelHandle::new(net, None),
            threads,
            batch_size,
            Duration::from_millis(1),
        )
        .unwrap()
    }

    #[test]
    fn evaluates_legal_moves_only() {
        let channels = start_server(1, 4).channels(1);
        let mut pos = TttPosition::new();
        pos.board_x.set(TttMove::new(1, 1).to_idx(), true);
        pos.turn = pos.turn.opposite();

        let (probs, value) = channels[0].evaluate(&pos).unwrap();
        assert_eq!(probs.len(), 8);
        assert!(probs.iter().all(|(m, _p)| *m != TttMove::new(1, 1)));
        assert!((-1.0..=1.0).contains(&value));
        assert_eq!(probs.len(), pos.legal_moves().len());
    }

    #[test]
    fn concurrent_channels_get_their_own_answers() {
        let channels = start_server(2, 8).channels(6);
        let channels = channels.into_iter().map(Arc::new).collect_vec();

        let handles = channels
            .iter()
            .cloned()
            .map(|channel| {
                thread::spawn(move || {
                    /* Each channel asks about a position with a different number of stones, none a line */
                    let mut pos = TttPosition::new();
                    for idx in [1, 3, 5, 7, 0].into_iter().take(channel.id()) {
                        pos.board_o.set(idx, true);
                    }
                    for _ in 0..20 {
                        let (probs, _value) = channel.evaluate(&pos).unwrap();
                        assert_eq!(probs.len(), 9 - channel.id());
                    }
                })
            })
            .collect_vec();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(channels.iter().map(|c| c.id()).collect_vec(), (0..6).collect_vec());
    }

    struct PanicOnceNet {
        inner: Box<dyn Network<TttGame>>,
        panicked: AtomicBool,
    }

    impl Network<TttGame> for PanicOnceNet {
        fn evaluate(&self, positions: &[TttPosition]) -> Vec<Evaluation<TttGame>> {
            if !self.panicked.swap(true, Ordering::SeqCst) {
                panic!("bad batch");
            }
            self.inner.evaluate(positions)
        }

        fn save(&self, path: &Path) -> Result<(), ModelError> {
            self.inner.save(path)
        }

        fn load_weights(&mut self, path: &Path) -> Result<(), ModelError> {
            self.inner.load_weights(path)
        }
    }

    #[test]
    fn evaluation_panic_fails_only_its_batch() {
        let net = PanicOnceNet {
            inner: LinearNetBuilder::<TttGame>::new().build_new(),
            panicked: AtomicBool::new(false),
        };
        let channel = InferenceServer::start(
            ModelHandle::new(Box::new(net), None),
            1,
            1,
            Duration::ZERO,
        )
        .unwrap()
        .channels(1)
        .remove(0);

        let pos = TttPosition::new();
        assert!(matches!(channel.evaluate(&pos), Err(ChannelError::Disconnected)));
        for _ in 0..3 {
            let (probs, _value) = channel.evaluate(&pos).unwrap();
            assert_eq!(probs.len(), 9);
        }
    }

    #[test]
    fn disconnected_backend_is_an_error() {
        let channel = disconnected_channel::<TttGame>(0);
        assert!(matches!(
            channel.evaluate(&TttPosition::new()),
            Err(ChannelError::Disconnected)
        ));
    }
}
