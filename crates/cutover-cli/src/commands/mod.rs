pub mod report;
pub mod rollout;

use cutover_rollout::RolloutError;

/// Map a command failure onto the documented process exit codes.
/// Anything that is not a rollout error (bad flags, unreadable config,
/// audit store trouble) exits with 1.
pub fn exit_code(error: &anyhow::Error) -> u8 {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<RolloutError>())
        .map(|e| u8::try_from(e.exit_code()).unwrap_or(1))
        .unwrap_or(1)
}
