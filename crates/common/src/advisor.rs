/// Optional AI/heuristic scorer collaborator.
///
/// Supplies a bounded adjustment added to a symbol's confluence score
/// before the gate. The scorer clamps whatever comes back to the
/// configured limit, so a misbehaving advisor cannot dominate the
/// indicator evidence. The core functions with no advisor present.
pub trait ScoreAdvisor: Send + Sync {
    /// Adjustment for one symbol this cycle, or `None` for no opinion.
    fn adjustment(&self, symbol: &str) -> Option<f64>;
}
