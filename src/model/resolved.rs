use std::{collections::BTreeMap, fmt::Display, time::Duration};

use super::{history::Modification, material::MaterialIdentity, pipeline::PipelineName};

/// Exactly one modification per root material reachable from a fan-in graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedRevisions(BTreeMap<MaterialIdentity, Modification>);

impl ResolvedRevisions {
    pub fn get(&self, material: &MaterialIdentity) -> Option<&Modification> {
        self.0.get(material)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MaterialIdentity, &Modification)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(MaterialIdentity, Modification)> for ResolvedRevisions {
    fn from_iter<T: IntoIterator<Item = (MaterialIdentity, Modification)>>(iter: T) -> Self {
        ResolvedRevisions(iter.into_iter().collect())
    }
}

/// A successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub revisions: ResolvedRevisions,
    /// Counter of the upstream instance chosen for every pipeline dependency path.
    pub upstream: BTreeMap<PipelineName, u64>,
    /// Final instance pointer of every top-level path, in declaration order.
    pub pointers: Vec<usize>,
    /// Number of non-converging assignments expanded before the answer was found.
    pub backtracks: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    UpstreamNotBuilt,
    NoModifications,
    InsufficientHistory,
    Timeout,
    Internal,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::UpstreamNotBuilt => "UPSTREAM_NOT_BUILT",
            FailureReason::NoModifications => "NO_MODIFICATIONS",
            FailureReason::InsufficientHistory => "INSUFFICIENT_HISTORY",
            FailureReason::Timeout => "TIMEOUT",
            FailureReason::Internal => "INTERNAL",
        }
    }

    /// Everything except internal defects is expected to clear up on a later evaluation.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FailureReason::Internal)
    }
}

impl Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionResult {
    Success(Resolution),
    Failure {
        reason: FailureReason,
        detail: String,
    },
}

impl ResolutionResult {
    pub fn failure(reason: FailureReason, detail: impl Into<String>) -> Self {
        ResolutionResult::Failure {
            reason,
            detail: detail.into(),
        }
    }

    pub fn timeout(budget: Duration) -> Self {
        Self::failure(
            FailureReason::Timeout,
            format!("resolution exceeded its budget of {}ms", budget.as_millis()),
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResolutionResult::Success(_))
    }

    pub fn resolution(&self) -> Option<&Resolution> {
        match self {
            ResolutionResult::Success(resolution) => Some(resolution),
            ResolutionResult::Failure { .. } => None,
        }
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            ResolutionResult::Success(_) => None,
            ResolutionResult::Failure { reason, .. } => Some(*reason),
        }
    }
}

impl Display for ResolutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionResult::Success(resolution) => write!(
                f,
                "resolved {} material(s) after {} backtrack(s)",
                resolution.revisions.len(),
                resolution.backtracks
            ),
            ResolutionResult::Failure { reason, detail } => write!(f, "{}: {}", reason, detail),
        }
    }
}
