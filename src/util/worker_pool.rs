use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Why a submitted job produced no result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error("{0}")]
    Panicked(String),

    #[error("job dropped before running")]
    Lost,
}

/// Fixed set of OS threads, each running one job to completion before taking the next.
pub struct WorkerPool {
    jobs: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(name: &str, size: usize) -> io::Result<Self> {
        assert!(size > 0);
        let (jobs_tx, jobs_rx) = unbounded::<Job>();
        let workers = (0..size)
            .map(|idx| {
                let jobs_rx = jobs_rx.clone();
                thread::Builder::new()
                    .name(format!("{name}-{idx}"))
                    .spawn(move || {
                        /* Exits once the pool drops the sender and the queue is drained */
                        for job in jobs_rx {
                            job();
                        }
                    })
            })
            .collect::<io::Result<Vec<_>>>()?;
        Ok(Self {
            jobs: Some(jobs_tx),
            workers,
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue a job, its result (or panic) is delivered through the returned ticket.
    pub fn submit<T: Send + 'static>(&self, job: impl FnOnce() -> T + Send + 'static) -> Ticket<T> {
        let (result_tx, result_rx) = bounded(1);
        let job: Job = Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(job))
                .map_err(|payload| JobError::Panicked(panic_message(payload.as_ref())));
            /* The ticket may have been dropped, nobody is waiting then */
            let _ = result_tx.send(result);
        });
        if let Some(jobs) = &self.jobs {
            /* On failure the job and its result sender are dropped, the ticket reports it as lost */
            let _ = jobs.send(job);
        }
        Ticket { result: result_rx }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.jobs.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("worker thread terminated abnormally");
            }
        }
    }
}

/// The pending result of one submitted job.
pub struct Ticket<T> {
    result: Receiver<Result<T, JobError>>,
}

impl<T> Ticket<T> {
    /// Block until this specific job is done.
    pub fn wait(self) -> Result<T, JobError> {
        self.result.recv().unwrap_or(Err(JobError::Lost))
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        String::from("unknown panic payload")
    }
}
