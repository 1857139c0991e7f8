use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::capture::{CaptureStrategy, Frame};
use crate::error::CaptureError;
use crate::logger;
use crate::platform::WindowHandle;

type Reply = Result<Frame, CaptureError>;

struct Job {
    strategy: Arc<dyn CaptureStrategy>,
    window: Arc<dyn WindowHandle>,
    reply: mpsc::Sender<Reply>,
}

struct Worker {
    jobs: mpsc::Sender<Job>,
    handle: JoinHandle<()>,
}

/// Runs capture attempts on a worker thread with a bounded wait.
///
/// A worker that misses the deadline is abandoned: its job channel is
/// dropped so it exits once the OS call returns, and the next attempt gets
/// a fresh worker.
pub struct AttemptRunner {
    timeout: Duration,
    worker: Option<Worker>,
    abandoned: Vec<JoinHandle<()>>,
}

impl AttemptRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout, worker: None, abandoned: Vec::new() }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn run(
        &mut self,
        strategy: &Arc<dyn CaptureStrategy>,
        window: &Arc<dyn WindowHandle>,
    ) -> Result<Frame, CaptureError> {
        let name = strategy.name();
        let (reply_tx, reply_rx) = mpsc::channel();
        let job = Job {
            strategy: Arc::clone(strategy),
            window: Arc::clone(window),
            reply: reply_tx,
        };

        let worker = match self.worker.take() {
            Some(w) => w,
            None => spawn_worker().map_err(|e| CaptureError::os(name, format!("spawn worker: {}", e)))?,
        };
        if worker.jobs.send(job).is_err() {
            // Worker died on a previous job; drop it and report this attempt as failed.
            self.abandon(worker);
            return Err(CaptureError::os(name, "capture worker exited"));
        }

        match reply_rx.recv_timeout(self.timeout) {
            Ok(result) => {
                self.worker = Some(worker);
                result
            }
            Err(RecvTimeoutError::Timeout) => {
                logger::warn_p("capture", &format!("{} hung past {:?}, abandoning worker", name, self.timeout));
                self.abandon(worker);
                Err(CaptureError::Timeout { strategy: name, after: self.timeout })
            }
            Err(RecvTimeoutError::Disconnected) => {
                logger::error_p("capture", &format!("{} panicked inside capture worker", name));
                self.abandon(worker);
                Err(CaptureError::os(name, "capture worker panicked"))
            }
        }
    }

    fn abandon(&mut self, worker: Worker) {
        drop(worker.jobs);
        self.abandoned.push(worker.handle);
        self.abandoned.retain(|h| !h.is_finished());
    }

    /// Let any in-flight attempt finish or run out its timeout, then join
    /// every worker that has exited.
    pub fn shutdown(mut self) {
        if let Some(worker) = self.worker.take() {
            self.abandon(worker);
        }
        let deadline = Instant::now() + self.timeout;
        while self.abandoned.iter().any(|h| !h.is_finished()) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        for handle in self.abandoned.drain(..) {
            if handle.is_finished() {
                handle.join().ok();
            } else {
                logger::warn_p("capture", "capture worker still blocked in OS call at shutdown");
            }
        }
    }
}

fn spawn_worker() -> std::io::Result<Worker> {
    let (jobs_tx, jobs_rx) = mpsc::channel::<Job>();
    let handle = thread::Builder::new()
        .name("capture-worker".into())
        .spawn(move || {
            for job in jobs_rx {
                let result = job.strategy.capture(job.window.as_ref());
                job.reply.send(result).ok();
            }
        })?;
    Ok(Worker { jobs: jobs_tx, handle })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::stub::FixedWindow;
    use image::RgbImage;

    struct Sleepy(Duration);

    impl CaptureStrategy for Sleepy {
        fn name(&self) -> &'static str {
            "sleepy"
        }

        fn capture(&self, _window: &dyn WindowHandle) -> Result<Frame, CaptureError> {
            thread::sleep(self.0);
            Ok(Frame::new(RgbImage::new(2, 2), "sleepy"))
        }
    }

    struct Panicky;

    impl CaptureStrategy for Panicky {
        fn name(&self) -> &'static str {
            "panicky"
        }

        fn capture(&self, _window: &dyn WindowHandle) -> Result<Frame, CaptureError> {
            panic!("driver exploded");
        }
    }

    fn window() -> Arc<dyn WindowHandle> {
        Arc::new(FixedWindow::new(64, 64))
    }

    #[test]
    fn slow_attempt_times_out_and_next_attempt_gets_fresh_worker() {
        let mut runner = AttemptRunner::new(Duration::from_millis(50));
        let slow: Arc<dyn CaptureStrategy> = Arc::new(Sleepy(Duration::from_millis(300)));
        let fast: Arc<dyn CaptureStrategy> = Arc::new(Sleepy(Duration::from_millis(1)));
        let win = window();

        let started = Instant::now();
        let err = runner.run(&slow, &win).unwrap_err();
        assert!(matches!(err, CaptureError::Timeout { strategy: "sleepy", .. }));
        assert!(started.elapsed() < Duration::from_millis(250));

        assert!(runner.run(&fast, &win).is_ok());
        runner.shutdown();
    }

    #[test]
    fn panicking_strategy_is_absorbed() {
        let mut runner = AttemptRunner::new(Duration::from_millis(500));
        let bad: Arc<dyn CaptureStrategy> = Arc::new(Panicky);
        let good: Arc<dyn CaptureStrategy> = Arc::new(Sleepy(Duration::ZERO));
        let win = window();

        assert!(matches!(runner.run(&bad, &win), Err(CaptureError::Os { strategy: "panicky", .. })));
        assert!(runner.run(&good, &win).is_ok());
        runner.shutdown();
    }
}
