use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::{bounded, select, Receiver, Sender};

use crate::error::ChannelError;
use crate::game::Game;
use crate::inference::server::InferenceChannel;

/// Fixed set of inference channels, each lent to one game at a time.
///
/// Borrowing blocks while all channels are out. A borrowed channel goes back to the pool when its
/// guard is dropped, on every exit path of the borrower including unwinding.
pub struct ChannelPool<G: Game> {
    available_tx: Sender<InferenceChannel<G>>,
    available_rx: Receiver<InferenceChannel<G>>,
    close_tx: Mutex<Option<Sender<()>>>,
    closed_rx: Receiver<()>,
    size: usize,
    borrowed: AtomicUsize,
    released: AtomicUsize,
}

impl<G: Game> ChannelPool<G> {
    pub fn new(channels: Vec<InferenceChannel<G>>) -> Self {
        let size = channels.len();
        let (available_tx, available_rx) = bounded(size.max(1));
        for channel in channels {
            /* Capacity equals the number of channels, never blocks */
            let _ = available_tx.send(channel);
        }
        let (close_tx, closed_rx) = bounded(0);
        Self {
            available_tx,
            available_rx,
            close_tx: Mutex::new(Some(close_tx)),
            closed_rx,
            size,
            borrowed: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Take a channel out of the pool, waiting for one to be released if none is available.
    pub fn borrow_channel(self: &Arc<Self>) -> Result<BorrowedChannel<G>, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::PoolClosed);
        }
        let channel = select! {
            recv(self.available_rx) -> channel => channel.map_err(|_| ChannelError::PoolClosed)?,
            recv(self.closed_rx) -> _ => return Err(ChannelError::PoolClosed),
        };
        self.borrowed.fetch_add(1, Ordering::SeqCst);
        log::trace!("borrowed inference channel {}", channel.id());
        Ok(BorrowedChannel {
            channel: Some(channel),
            pool: Arc::clone(self),
        })
    }

    /// Wake every blocked borrower with `PoolClosed` and refuse further borrows.
    /// Channels already lent out are still taken back.
    pub fn close(&self) {
        self.close_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_closed(&self) -> bool {
        self.close_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    pub fn borrow_count(&self) -> usize {
        self.borrowed.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Channels currently in the pool
    pub fn available(&self) -> usize {
        self.available_rx.len()
    }

    fn release(&self, channel: InferenceChannel<G>) {
        log::trace!("released inference channel {}", channel.id());
        self.released.fetch_add(1, Ordering::SeqCst);
        let _ = self.available_tx.send(channel);
    }
}

/// Exclusive use of one pooled channel, returned to the pool on drop.
pub struct BorrowedChannel<G: Game> {
    channel: Option<InferenceChannel<G>>,
    pool: Arc<ChannelPool<G>>,
}

impl<G: Game> Deref for BorrowedChannel<G> {
    type Target = InferenceChannel<G>;

    fn deref(&self) -> &Self::Target {
        /* Only vacated by drop */
        self.channel.as_ref().unwrap()
    }
}

impl<G: Game> Drop for BorrowedChannel<G> {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.take() {
            self.pool.release(channel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::server::disconnected_channel;
    use crate::ttt::TttGame;
    use std::collections::HashSet;
    use std::thread;
    use std::time::Duration;

    fn pool(size: usize) -> Arc<ChannelPool<TttGame>> {
        Arc::new(ChannelPool::new((0..size).map(disconnected_channel).collect()))
    }

    #[test]
    fn no_leak_and_no_sharing_under_load() {
        let pool = pool(3);
        let in_use = Arc::new(Mutex::new(HashSet::new()));

        let handles = (0..8)
            .map(|_| {
                let pool = pool.clone();
                let in_use = in_use.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        let channel = pool.borrow_channel().unwrap();
                        assert!(in_use.lock().unwrap().insert(channel.id()));
                        thread::yield_now();
                        assert!(in_use.lock().unwrap().remove(&channel.id()));
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(pool.borrow_count(), 400);
        assert_eq!(pool.release_count(), 400);
        assert_eq!(pool.available(), 3);
    }

    #[test]
    fn borrow_blocks_until_release() {
        let pool = pool(1);
        let first = pool.borrow_channel().unwrap();

        let (done_tx, done_rx) = bounded(1);
        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || {
                let channel = pool.borrow_channel().unwrap();
                done_tx.send(channel.id()).unwrap();
            })
        };

        thread::sleep(Duration::from_millis(30));
        assert!(done_rx.try_recv().is_err());

        drop(first);
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)), Ok(0));
        waiter.join().unwrap();
        assert_eq!(pool.borrow_count(), pool.release_count());
    }

    #[test]
    fn released_on_panic() {
        let pool = pool(1);
        let res = {
            let pool = pool.clone();
            thread::spawn(move || {
                let _channel = pool.borrow_channel().unwrap();
                panic!("game crashed");
            })
            .join()
        };
        assert!(res.is_err());
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.release_count(), 1);
    }

    #[test]
    fn close_wakes_blocked_borrowers() {
        let pool = pool(1);
        let held = pool.borrow_channel().unwrap();

        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.borrow_channel().map(|c| c.id()))
        };
        thread::sleep(Duration::from_millis(20));
        pool.close();
        assert!(matches!(waiter.join().unwrap(), Err(ChannelError::PoolClosed)));

        drop(held);
        assert_eq!(pool.available(), 1);
        assert!(matches!(pool.borrow_channel(), Err(ChannelError::PoolClosed)));
    }
}
