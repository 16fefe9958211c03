//! Single-threaded cooperative executor for generator routines.
//!
//! Routines are plain futures. The only thing that ever returns `Pending` is
//! a variable lookup, and it records the missing name in the shared state
//! before doing so; the scheduler reads that name back and parks the
//! routine until a `register_variable` for it shows up.
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap};
use std::task::{Context, Poll, Waker};

use ordered_float::OrderedFloat;
use serde::Serialize;

use super::{BuildFuture, Codegen, CodegenError, UnresolvedId};

struct Routine {
    label: String,
    priority: f64,
    future: BuildFuture<()>,
}

#[derive(PartialEq, Eq)]
struct ReadyEntry {
    priority: OrderedFloat<f64>,
    /// Earlier enqueue first among equal priorities.
    order: Reverse<u64>,
    handle: usize,
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.priority, self.order).cmp(&(other.priority, other.order))
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub routines: usize,
    pub polls: usize,
    pub parks: usize,
}

pub struct Scheduler {
    cg: Codegen,
    routines: Vec<Option<Routine>>,
    ready: BinaryHeap<ReadyEntry>,
    parked: BTreeMap<String, Vec<usize>>,
    next_order: u64,
    stats: SchedulerStats,
}

impl Scheduler {
    pub fn new(cg: Codegen) -> Self {
        Self {
            cg,
            routines: Vec::new(),
            ready: BinaryHeap::new(),
            parked: BTreeMap::new(),
            next_order: 0,
            stats: SchedulerStats::default(),
        }
    }

    pub fn add(&mut self, priority: f64, label: impl Into<String>, future: BuildFuture<()>) {
        let handle = self.routines.len();
        self.routines.push(Some(Routine { label: label.into(), priority, future }));
        self.stats.routines += 1;
        self.enqueue(handle, priority);
    }

    fn enqueue(&mut self, handle: usize, priority: f64) {
        let order = Reverse(self.next_order);
        self.next_order += 1;
        self.ready.push(ReadyEntry { priority: OrderedFloat(priority), order, handle });
    }

    /// Drains the queue. Any routine error aborts; routines still parked at
    /// the end are reported together.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn run(mut self) -> Result<SchedulerStats, CodegenError> {
        let mut cx = Context::from_waker(Waker::noop());
        while let Some(ReadyEntry { handle, .. }) = self.ready.pop() {
            let Some(routine) = self.routines[handle].as_mut() else { continue };
            self.cg.state_mut().demand = None;
            self.stats.polls += 1;
            let polled = routine.future.as_mut().poll(&mut cx);
            match polled {
                Poll::Ready(Ok(())) => {
                    tracing::trace!(routine = %routine.label, "completed");
                    self.routines[handle] = None;
                }
                Poll::Ready(Err(err)) => {
                    let component = routine.label.clone();
                    return Err(match err {
                        CodegenError::GeneratorFailure { .. } => err,
                        other => CodegenError::GeneratorFailure { component, cause: other.to_string() },
                    });
                }
                Poll::Pending => {
                    let demand = self.cg.state_mut().demand.take();
                    let Some(name) = demand else {
                        return Err(CodegenError::GeneratorFailure {
                            component: routine.label.clone(),
                            cause: "suspended without waiting for an ID".into(),
                        });
                    };
                    tracing::debug!(routine = %routine.label, id = %name, "parked");
                    self.stats.parks += 1;
                    self.parked.entry(name).or_default().push(handle);
                }
            }
            self.wake_declared();
            self.adopt_spawned();
        }
        if self.parked.is_empty() {
            return Ok(self.stats);
        }
        let unresolved = std::mem::take(&mut self.parked)
            .into_iter()
            .map(|(name, handles)| UnresolvedId {
                name,
                demanders: handles
                    .into_iter()
                    .filter_map(|h| self.routines[h].as_ref().map(|r| r.label.clone()))
                    .collect(),
            })
            .collect();
        Err(CodegenError::Unresolved(unresolved))
    }

    fn wake_declared(&mut self) {
        let declared = std::mem::take(&mut self.cg.state_mut().newly_declared);
        for name in declared {
            let Some(handles) = self.parked.remove(&name) else { continue };
            for handle in handles {
                let Some(priority) = self.routines[handle].as_ref().map(|r| r.priority) else { continue };
                tracing::debug!(id = %name, handle, "woken");
                self.enqueue(handle, priority);
            }
        }
    }

    fn adopt_spawned(&mut self) {
        let spawned = std::mem::take(&mut self.cg.state_mut().spawned);
        for job in spawned {
            self.add(job.priority, job.label, job.future);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Expression;
    use crate::ir::types::COMPONENT;
    use crate::target::Target;
    use crate::value::ConfigId;

    fn declare(cg: &Codegen, name: &str) {
        let id = ConfigId::declare(Some(name.to_string()), COMPONENT.clone());
        cg.state_mut().register_variable(&id, Expression::raw(name)).unwrap();
    }

    fn consumer(cg: Codegen, wants: &'static str, log: &'static str) -> BuildFuture<()> {
        Box::pin(async move {
            let var = cg.get_variable_by_name(wants).await?;
            cg.add(Expression::raw(format!("{log}({var})")));
            Ok(())
        })
    }

    fn producer(cg: Codegen, name: &'static str) -> BuildFuture<()> {
        Box::pin(async move {
            cg.add(Expression::raw(format!("declare({name})")));
            declare(&cg, name);
            Ok(())
        })
    }

    fn lines(cg: &Codegen) -> Vec<String> {
        cg.state_mut().statements.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn higher_priority_runs_first_and_ties_are_fifo() {
        let cg = Codegen::new(Target::default());
        let mut s = Scheduler::new(cg.clone());
        for (p, name) in [(0.0, "a"), (10.0, "b"), (0.0, "c")] {
            let cg2 = cg.clone();
            s.add(p, name, Box::pin(async move {
                cg2.add(Expression::raw(name));
                Ok(())
            }));
        }
        s.run().unwrap();
        assert_eq!(lines(&cg), ["b;", "a;", "c;"]);
    }

    #[test]
    fn consumers_park_until_the_declaration() {
        let cg = Codegen::new(Target::default());
        let mut s = Scheduler::new(cg.clone());
        s.add(5.0, "first", consumer(cg.clone(), "io", "use_high"));
        s.add(0.0, "second", consumer(cg.clone(), "io", "use_low"));
        s.add(-1.0, "decl", producer(cg.clone(), "io"));
        let stats = s.run().unwrap();
        assert_eq!(stats.parks, 2);
        assert_eq!(lines(&cg), ["declare(io);", "use_high(io);", "use_low(io);"]);
    }

    #[test]
    fn cycles_report_every_parked_demand() {
        let cg = Codegen::new(Target::default());
        let mut s = Scheduler::new(cg.clone());
        s.add(0.0, "a", Box::pin({
            let cg = cg.clone();
            async move {
                cg.get_variable_by_name("b").await?;
                declare(&cg, "a");
                Ok(())
            }
        }));
        s.add(0.0, "b", Box::pin({
            let cg = cg.clone();
            async move {
                cg.get_variable_by_name("a").await?;
                declare(&cg, "b");
                Ok(())
            }
        }));
        match s.run() {
            Err(CodegenError::Unresolved(ids)) => {
                let names: Vec<&str> = ids.iter().map(|u| u.name.as_str()).collect();
                assert_eq!(names, ["a", "b"]);
                assert_eq!(ids[0].demanders, ["b"]);
            }
            other => panic!("expected unresolved IDs, got {other:?}"),
        }
    }

    #[test]
    fn routine_errors_fail_fast() {
        let cg = Codegen::new(Target::default());
        let mut s = Scheduler::new(cg.clone());
        s.add(1.0, "broken", Box::pin(async { Err(CodegenError::Expression("bad".into())) }));
        s.add(0.0, "never", producer(cg.clone(), "x"));
        match s.run() {
            Err(CodegenError::GeneratorFailure { component, cause }) => {
                assert_eq!(component, "broken");
                assert!(cause.contains("bad"));
            }
            other => panic!("expected a generator failure, got {other:?}"),
        }
        assert!(lines(&cg).is_empty());
    }

    #[test]
    fn spawned_jobs_are_adopted() {
        let cg = Codegen::new(Target::default());
        let mut s = Scheduler::new(cg.clone());
        let spawner = cg.clone();
        s.add(0.0, "spawner", Box::pin(async move {
            spawner.add_job(-5.0, "late", producer(spawner.clone(), "late"));
            spawner.add(Expression::raw("early"));
            Ok(())
        }));
        s.run().unwrap();
        assert_eq!(lines(&cg), ["early;", "declare(late);"]);
    }
}
