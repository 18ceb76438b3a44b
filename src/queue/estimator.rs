/// Estimated wait in minutes for a patient standing at `queue_position`.
///
/// Linear approximation: every patient ahead is assumed to take the clinic's
/// average service time. It does not model the historical distribution of
/// service times and is not a guarantee. Callers validate that both inputs
/// are positive.
pub fn estimate_wait(queue_position: u32, avg_service_minutes: u32) -> u32 {
    queue_position.saturating_mul(avg_service_minutes)
}
