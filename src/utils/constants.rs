//! Shared configuration constants for streaming sessions
//!
//! Default values and wire-visible strings used throughout the crate.

/// Step budget used when the caller does not provide one
pub const DEFAULT_MAX_STEPS: usize = 25;

/// Consecutive step failures tolerated before the agent gives up
pub const DEFAULT_MAX_FAILURES: usize = 3;

/// Upper bound on actions executed from a single planner step
pub const DEFAULT_MAX_ACTIONS_PER_STEP: usize = 10;

/// Per-step planner timeout
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 120;

/// Remote browser connect endpoint (Steel CDP gateway)
pub const DEFAULT_CONNECT_URL: &str = "wss://connect.steel.dev";

/// Environment variable holding the remote browser API key
pub const ENV_BROWSER_API_KEY: &str = "STEEL_API_KEY";

/// Environment variable overriding the remote browser connect endpoint
pub const ENV_BROWSER_CONNECT_URL: &str = "STEEL_CONNECT_URL";

/// Prefix for generated tool call ids
pub const TOOL_CALL_ID_PREFIX: &str = "tool_call_";

/// Name of the approval gate's announcement tool
pub const ANNOUNCE_TOOL: &str = "print_call";

/// Name of the approval gate's pause tool
pub const PAUSE_TOOL: &str = "pause_execution";

/// Message carried by the approval gate's announcement call
pub const SAFETY_ANNOUNCEMENT: &str =
    "⚠️ BROWSER SAFETY: This agent requires verification before proceeding";

/// Reason carried by the approval gate's pause call
pub const PAUSE_REASON: &str = "⏸️ Click 'Resume' to allow the agent to start browsing";

/// Action key that marks task completion
pub const DONE_ACTION: &str = "done";
