//! Per-tick work scheduling.
//!
//! A frame loop calls [`FrameScheduler::tick`] once per animation frame,
//! before rendering. A tick:
//!
//! 1. runs queued CPU tasks until the time budget is spent (always at least one),
//! 2. flushes every [`FrameFlush`] target, so deferred layer uploads land
//!    before the frame is drawn and never in the middle of it.
//!
//! # Example
//!
//! ```ignore
//! let mut scheduler = FrameScheduler::new(Duration::from_millis(4));
//! scheduler.schedule("load tiles", || load_next_tile());
//!
//! // Each frame:
//! let stats = scheduler.tick(&mut [&mut layers])?;
//! render(&layers);
//! ```

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::error::LayerError;
use crate::layers::{InstancingLayer, LayerSet, RendererLayer};

/// Something holding uploads that must land before the next frame renders.
pub trait FrameFlush {
    /// Upload everything deferred. Returns the number of uploads.
    fn flush_frame(&mut self) -> Result<usize, LayerError>;
}

impl FrameFlush for RendererLayer {
    fn flush_frame(&mut self) -> Result<usize, LayerError> {
        self.flush()
    }
}

impl FrameFlush for InstancingLayer {
    fn flush_frame(&mut self) -> Result<usize, LayerError> {
        self.flush()
    }
}

impl FrameFlush for LayerSet {
    fn flush_frame(&mut self) -> Result<usize, LayerError> {
        self.flush()
    }
}

/// A queued CPU task.
struct Task {
    name: String,
    run: Box<dyn FnOnce() + Send>,
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickStats {
    /// Tasks run during the tick.
    pub tasks_run: usize,
    /// Tasks still queued after the tick.
    pub tasks_pending: usize,
    /// Uploads issued by the flush step.
    pub uploads: usize,
}

/// Runs deferred CPU work within a per-tick time budget.
pub struct FrameScheduler {
    budget: Duration,
    tasks: VecDeque<Task>,
    frame: u64,
}

impl FrameScheduler {
    /// Create a scheduler with a per-tick task budget.
    pub fn new(budget: Duration) -> Self {
        Self {
            budget,
            tasks: VecDeque::new(),
            frame: 0,
        }
    }

    /// Task budget of one tick.
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Ticks run so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Queued tasks.
    pub fn num_pending(&self) -> usize {
        self.tasks.len()
    }

    /// Queue a task for a later tick.
    pub fn schedule(&mut self, name: impl Into<String>, task: impl FnOnce() + Send + 'static) {
        self.tasks.push_back(Task {
            name: name.into(),
            run: Box::new(task),
        });
    }

    /// Run one tick: tasks within the budget, then every flush.
    ///
    /// # Errors
    ///
    /// Returns the first flush error. Tasks already run are not undone.
    pub fn tick(&mut self, targets: &mut [&mut dyn FrameFlush]) -> Result<TickStats, LayerError> {
        let start = Instant::now();
        let mut stats = TickStats::default();

        while let Some(task) = self.tasks.pop_front() {
            log::trace!("FrameScheduler: frame {} running {}", self.frame, task.name);
            (task.run)();
            stats.tasks_run += 1;
            if start.elapsed() >= self.budget {
                break;
            }
        }
        stats.tasks_pending = self.tasks.len();

        for target in targets.iter_mut() {
            stats.uploads += target.flush_frame()?;
        }

        if stats.tasks_pending > 0 {
            log::debug!(
                "FrameScheduler: frame {} ran {} tasks, {} left for later ticks",
                self.frame,
                stats.tasks_run,
                stats.tasks_pending
            );
        }
        self.frame += 1;
        Ok(stats)
    }
}

impl std::fmt::Debug for FrameScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameScheduler")
            .field("budget", &self.budget)
            .field("pending", &self.tasks.len())
            .field("frame", &self.frame)
            .finish()
    }
}
