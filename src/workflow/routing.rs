//! Where a run goes after an approval round

use super::state::ApprovalDecision;

/// Next step after an approval round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Execute,
    Refine,
    FinalizeRejected,
    FinalizeTimedOut,
}

/// Total, fail-closed routing. Anything that is not an explicit approve or
/// refine ends the run without executing.
pub fn route(decision: ApprovalDecision) -> Route {
    match decision {
        ApprovalDecision::Approve => Route::Execute,
        ApprovalDecision::Refine => Route::Refine,
        ApprovalDecision::Reject => Route::FinalizeRejected,
        // Only reachable when the round expired
        ApprovalDecision::Undetermined => Route::FinalizeTimedOut,
        ApprovalDecision::Unrecognized => Route::FinalizeRejected,
    }
}
