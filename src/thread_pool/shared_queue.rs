use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;

use log::error;

use crate::KvError;

use super::ThreadPool;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed set of workers pulling jobs off one shared queue.
pub struct SharedQueueThreadPool {
    workers: Vec<Worker>,
    sender: Option<mpsc::Sender<Job>>,
}

impl ThreadPool for SharedQueueThreadPool {
    fn new(num_threads: usize) -> crate::Result<Self> {
        if num_threads == 0 {
            return Err(KvError::StringError(
                "num_threads must greater than zero".to_owned(),
            ));
        }

        let (sender, receiver) = mpsc::channel();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(num_threads);
        for _ in 0..num_threads {
            workers.push(Worker::new(Arc::clone(&receiver)));
        }

        Ok(SharedQueueThreadPool {
            workers,
            sender: Some(sender),
        })
    }

    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender
            .as_ref()
            .expect("sender lives as long as the pool")
            .send(Box::new(job))
            .expect("The thread pool has no thread.");
    }
}

/// When drop, join all threads in the pool.
impl Drop for SharedQueueThreadPool {
    fn drop(&mut self) {
        drop(self.sender.take());

        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

struct Worker {
    thread: Option<thread::JoinHandle<()>>,
}

impl Worker {
    fn new(receiver: Arc<Mutex<Receiver<Job>>>) -> Worker {
        let thread = thread::spawn(move || loop {
            let message = receiver.lock().unwrap().recv();
            match message {
                Ok(job) => {
                    if let Err(e) = panic::catch_unwind(AssertUnwindSafe(job)) {
                        error!("job panicked: {:?}", e);
                    }
                }
                Err(_) => break,
            }
        });

        Worker {
            thread: Some(thread),
        }
    }
}
