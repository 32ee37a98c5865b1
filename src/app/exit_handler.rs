//! Exit code logic for the bookfetch process.

use bookfetch_core::BatchStats;

use crate::ProcessExit;

/// Determines the process exit outcome of a `fetch` batch.
///
/// Works already present count as successes; an interrupted batch is a
/// failure so scripts notice the run did not finish.
pub(crate) fn determine_exit_outcome(stats: &BatchStats, interrupted: bool) -> ProcessExit {
    let succeeded = stats.downloaded + stats.already_present;
    if interrupted || stats.cancelled > 0 {
        ProcessExit::Failure
    } else if stats.failed == 0 {
        ProcessExit::Success
    } else if succeeded > 0 {
        ProcessExit::Partial
    } else {
        ProcessExit::Failure
    }
}
