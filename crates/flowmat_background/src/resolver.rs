use std::collections::HashMap;
use std::str::FromStr;

use flowmat_archive::{Archive, Direction, FlowId, Process, ProcessId};

use crate::error::BackgroundError;

/// Policy for exchanges whose flow is terminated by more than one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MultiTermStrategy {
    /// Call the flow a cutoff and ignore the candidates.
    Cutoff,
    /// Synthesize a market process mixing the candidates.
    Mix,
    /// Alphabetically first candidate by process name.
    #[default]
    First,
    /// Alphabetically last candidate by process name.
    Last,
}

impl FromStr for MultiTermStrategy {
    type Err = BackgroundError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cutoff" => Ok(Self::Cutoff),
            "mix" => Ok(Self::Mix),
            "first" => Ok(Self::First),
            "last" => Ok(Self::Last),
            other => Err(BackgroundError::UnknownMultiTermStrategy(other.to_string())),
        }
    }
}

impl std::fmt::Display for MultiTermStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Cutoff => "cutoff",
            Self::Mix => "mix",
            Self::First => "first",
            Self::Last => "last",
        };
        write!(f, "{s}")
    }
}

/// Pre-built index of reference flows: (flow, direction) maps to the
/// processes whose *reference* exchange carries the complementary direction
/// (an input is terminated by producers, an output by consumers).
#[derive(Debug, Default)]
pub struct TerminationIndex {
    map: HashMap<(FlowId, Direction), Vec<ProcessId>>,
}

impl TerminationIndex {
    pub fn build(archive: &Archive) -> Self {
        let mut map: HashMap<(FlowId, Direction), Vec<ProcessId>> = HashMap::new();
        for (id, process) in archive.processes() {
            for rx in process.reference_exchanges() {
                map.entry((rx.flow, rx.direction.complement()))
                    .or_default()
                    .push(id);
            }
        }
        Self { map }
    }

    pub fn candidates(&self, flow: FlowId, direction: Direction) -> &[ProcessId] {
        self.map
            .get(&(flow, direction))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Outcome of resolving an ambiguous termination.
#[derive(Debug)]
pub enum Resolution {
    /// No termination: the exchange becomes an emission.
    Cutoff,
    Process(ProcessId),
    /// A transient market process mixing the candidates; never enters the
    /// archive, the manager owns it.
    Market(Process),
}

/// Apply a multi-termination strategy to a candidate list.
pub fn resolve_termination(
    archive: &Archive,
    flow: FlowId,
    direction: Direction,
    candidates: &[ProcessId],
    strategy: MultiTermStrategy,
) -> Resolution {
    if candidates.len() == 1 {
        return Resolution::Process(candidates[0]);
    }
    if candidates.is_empty() || strategy == MultiTermStrategy::Cutoff {
        return Resolution::Cutoff;
    }
    match strategy {
        MultiTermStrategy::Mix => {
            let flow_entity = archive.flow(flow);
            let mut market = Process::new(
                format!("market-{}", flow_entity.uuid),
                format!("Market for {}", flow_entity.name),
            );
            market.add_reference(
                flow,
                direction.complement(),
                Some(candidates.len() as f64),
            );
            for &candidate in candidates {
                market.add_exchange(flow, direction, Some(1.0), Some(candidate));
            }
            Resolution::Market(market)
        }
        MultiTermStrategy::First | MultiTermStrategy::Last => {
            let mut sorted = candidates.to_vec();
            sorted.sort_by(|a, b| archive.process(*a).name.cmp(&archive.process(*b).name));
            let pick = if strategy == MultiTermStrategy::First {
                sorted[0]
            } else {
                sorted[sorted.len() - 1]
            };
            Resolution::Process(pick)
        }
        MultiTermStrategy::Cutoff => unreachable!("handled above"),
    }
}
