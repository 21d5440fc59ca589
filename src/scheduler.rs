use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

struct Job {
    name: String,
    interval: Duration,
    last_run: Option<Instant>,
    task: Box<dyn FnMut() + Send>,
}

/// Fixed-interval job runner for the daemon loop. All jobs fire from the one
/// thread that calls `run`, so a job can never overlap itself and two jobs
/// never run at once. A job with no recorded run is due immediately.
pub struct Scheduler {
    jobs: Vec<Job>,
    tick: Duration,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            jobs: Vec::new(),
            tick: Duration::from_secs(1),
        }
    }

    pub fn add_job<F>(&mut self, name: &str, interval: Duration, task: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.jobs.push(Job {
            name: name.to_string(),
            interval,
            last_run: None,
            task: Box::new(task),
        });
    }

    /// Run every due job to completion, in registration order.
    pub fn run_pending(&mut self) {
        let now = Instant::now();
        for job in &mut self.jobs {
            let due = match job.last_run {
                None => true,
                Some(last) => now.duration_since(last) >= job.interval,
            };
            if !due {
                continue;
            }
            debug!(job = %job.name, "running scheduled job");
            (job.task)();
            // Measured from completion, not start: a slow job does not
            // immediately re-fire.
            job.last_run = Some(Instant::now());
        }
    }

    /// Block until `shutdown` is set, firing due jobs as they come.
    pub fn run(mut self, shutdown: Arc<AtomicBool>) {
        info!(jobs = self.jobs.len(), "scheduler started");
        while !shutdown.load(Ordering::Relaxed) {
            self.run_pending();
            std::thread::sleep(self.tick);
        }
        info!("scheduler stopped");
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
