pub mod errors;

/// Path of the liveness endpoint. No board may be mounted on or under it.
pub const HEALTH_PATH: &str = "/health";
