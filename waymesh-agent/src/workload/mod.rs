pub mod cache;
pub mod hashname;
pub mod processor;

/// Load-balancing policy recorded in every service row.
pub const LB_POLICY_RANDOM: u32 = 0;

/// Waypoints terminate HBONE on this fixed port regardless of the ports
/// their service declares.
pub const WAYPOINT_TARGET_PORT: u32 = 15019;
