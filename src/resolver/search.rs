use std::{
    cmp::Reverse,
    collections::{BTreeMap, BinaryHeap, HashSet},
    sync::atomic::{AtomicBool, Ordering},
};

use log::trace;

use crate::{
    cache::{AssignmentVerdicts, Verdict},
    graph::{FanInGraph, FanInNode},
    model::{history::Modification, material::MaterialIdentity},
    provider::HistorySnapshot,
};

pub(super) enum Outcome {
    Converged {
        pointers: Vec<usize>,
        backtracks: usize,
    },
    Exhausted {
        conflicts: Vec<MaterialIdentity>,
        backtracks: usize,
    },
    Cancelled,
}

/// Best-first walk over pointer assignments, least total advancement first.
///
/// Only paths blocking the convergence test are advanced. Among assignments with equal total
/// advancement the one discovered first wins, and successors are discovered in declaration order.
/// The walk ends as soon as a blocking path sits at the edge of its window, and never expands more
/// assignments than the windows sum to.
pub(super) struct Search<'g, 's> {
    paths: Vec<&'g FanInNode>,
    /// Contributing paths of every reachable root.
    contributors: BTreeMap<&'g MaterialIdentity, Vec<usize>>,
    /// Exclusive bound on each path's pointer.
    limits: Vec<usize>,
    snapshot: &'s HistorySnapshot,
}

impl<'g, 's> Search<'g, 's> {
    pub fn new(graph: &'g FanInGraph, snapshot: &'s HistorySnapshot, window: usize) -> Self {
        let paths = graph.paths().collect::<Vec<_>>();
        let mut contributors = BTreeMap::<_, Vec<usize>>::new();
        for (index, path) in paths.iter().enumerate() {
            for root in path.roots() {
                contributors.entry(root).or_default().push(index);
            }
        }
        let limits = paths
            .iter()
            .map(|path| path.depth(snapshot).min(window))
            .collect();
        Search {
            paths,
            contributors,
            limits,
            snapshot,
        }
    }

    pub fn paths(&self) -> &[&'g FanInNode] {
        &self.paths
    }

    pub fn snapshot(&self) -> &'s HistorySnapshot {
        self.snapshot
    }

    pub fn run(&self, verdicts: &AssignmentVerdicts<'_>, cancel: &AtomicBool) -> Outcome {
        let start = vec![0; self.paths.len()];
        let mut discovered = 0u64;
        let mut frontier = BinaryHeap::from([Reverse((0usize, discovered, start.clone()))]);
        let mut seen = HashSet::from([start]);
        let mut backtracks = 0;
        let mut conflicts = Vec::new();
        let budget = self.limits.iter().sum::<usize>();

        while let Some(Reverse((advancement, _, pointers))) = frontier.pop() {
            if cancel.load(Ordering::Relaxed) {
                return Outcome::Cancelled;
            }
            let verdict = match verdicts.get(&pointers) {
                Some(verdict) => verdict,
                None => {
                    let verdict = self.evaluate(&pointers);
                    verdicts.insert(pointers.clone(), verdict.clone());
                    verdict
                }
            };
            let paths = match verdict {
                Verdict::Converged => {
                    return Outcome::Converged {
                        pointers,
                        backtracks,
                    }
                }
                Verdict::Blocked {
                    paths,
                    conflicts: blocked,
                } => {
                    trace!("Assignment {:?} blocked by {} root(s)", pointers, blocked.len());
                    conflicts = blocked;
                    paths
                }
            };
            if let Some(&path) = paths
                .iter()
                .find(|&&path| pointers[path] + 1 >= self.limits[path])
            {
                trace!("Path {} blocks {:?} at the edge of its window", path, pointers);
                break;
            }
            if backtracks >= budget {
                trace!("Giving up after {} backtrack(s)", backtracks);
                break;
            }
            backtracks += 1;
            for path in paths {
                let mut next = pointers.clone();
                next[path] += 1;
                if seen.insert(next.clone()) {
                    discovered += 1;
                    frontier.push(Reverse((advancement + 1, discovered, next)));
                }
            }
        }

        Outcome::Exhausted {
            conflicts,
            backtracks,
        }
    }

    /// Convergence test of a single assignment.
    pub fn evaluate(&self, pointers: &[usize]) -> Verdict {
        let mut blocking = Vec::new();
        let mut conflicts = Vec::new();
        for (root, contributors) in &self.contributors {
            if self.agreed(root, contributors, pointers).is_empty() {
                conflicts.push((*root).clone());
                blocking.extend(self.blocking(root, contributors, pointers));
            }
        }
        if conflicts.is_empty() {
            return Verdict::Converged;
        }
        blocking.sort_unstable();
        blocking.dedup();
        Verdict::Blocked {
            paths: blocking,
            conflicts,
        }
    }

    /// Contributors of a disagreeing `root` that have to move: those seeing no modification of it,
    /// otherwise those seeing its newest one. Older instances only ever see older modifications, so
    /// moving any other path cannot produce agreement.
    fn blocking(
        &self,
        root: &MaterialIdentity,
        contributors: &[usize],
        pointers: &[usize],
    ) -> Vec<usize> {
        let newest = contributors
            .iter()
            .map(|&path| {
                let sequence = self.paths[path]
                    .candidates(self.snapshot, pointers[path], root)
                    .iter()
                    .map(|modification| modification.sequence)
                    .max();
                (path, sequence)
            })
            .collect::<Vec<_>>();
        let target = if newest.iter().any(|(_, sequence)| sequence.is_none()) {
            None
        } else {
            newest.iter().filter_map(|(_, sequence)| *sequence).max()
        };
        newest
            .into_iter()
            .filter(|(_, sequence)| *sequence == target)
            .map(|(path, _)| path)
            .collect()
    }

    /// Modifications of `root` every contributing path sees at its pointer.
    fn agreed(
        &self,
        root: &MaterialIdentity,
        contributors: &[usize],
        pointers: &[usize],
    ) -> Vec<&'s Modification> {
        let mut contributors = contributors.iter();
        let Some(&first) = contributors.next() else {
            return Vec::new();
        };
        let mut agreed = self.paths[first]
            .candidates(self.snapshot, pointers[first], root)
            .iter()
            .collect::<Vec<_>>();
        for &path in contributors {
            let seen = self.paths[path].candidates(self.snapshot, pointers[path], root);
            agreed.retain(|candidate| seen.iter().any(|other| candidate.same_revision(other)));
        }
        agreed
    }

    /// Newest agreed modification of every root under a converging assignment.
    pub fn revisions(&self, pointers: &[usize]) -> Vec<(MaterialIdentity, Option<Modification>)> {
        self.contributors
            .iter()
            .map(|(root, contributors)| {
                let newest = self
                    .agreed(root, contributors, pointers)
                    .into_iter()
                    .max_by_key(|modification| modification.sequence)
                    .cloned();
                ((*root).clone(), newest)
            })
            .collect()
    }

    /// Newest modification of every root seen by any path at the latest position, agreed or not.
    pub fn latest(&self) -> Vec<(MaterialIdentity, Option<Modification>)> {
        self.contributors
            .iter()
            .map(|(root, contributors)| {
                let newest = contributors
                    .iter()
                    .flat_map(|&path| self.paths[path].candidates(self.snapshot, 0, root))
                    .max_by_key(|modification| modification.sequence)
                    .cloned();
                ((*root).clone(), newest)
            })
            .collect()
    }
}
