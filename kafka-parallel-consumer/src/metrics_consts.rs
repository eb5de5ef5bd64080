// ==== Client proxy metrics ====
/// Counter for records fetched from the broker
pub const RECORDS_FETCHED: &str = "parallel_consumer_records_fetched_total";

/// Counter for polls that returned no record within the poll timeout
pub const EMPTY_POLLS: &str = "parallel_consumer_empty_polls_total";

/// Counter for non-fatal broker errors, labelled by error kind
pub const BROKER_ERRORS: &str = "parallel_consumer_broker_errors_total";

/// Counter for commit calls made to the broker, labelled by trigger
pub const COMMITS: &str = "parallel_consumer_commits_total";

/// Counter for failed commit calls, labelled by phase
pub const COMMIT_FAILURES: &str = "parallel_consumer_commit_failures_total";

/// Gauge for the last committed position per partition
pub const PARTITION_LAST_COMMITTED_OFFSET: &str = "parallel_consumer_partition_last_committed_offset";

// ==== Offset tracking metrics ====
/// Gauge for offsets tracked but not yet released for commit
pub const OFFSETS_TRACKED: &str = "parallel_consumer_offsets_tracked";

/// Counter for commit watermarks released by completions
pub const OFFSET_WATERMARKS_RELEASED: &str = "parallel_consumer_offset_watermarks_released_total";

// ==== Scheduling metrics ====
/// Gauge for lanes currently holding a runner
pub const RUNNING_LANES: &str = "parallel_consumer_running_lanes";

/// Gauge for records accepted by the coordinator and not yet handled
pub const RECORDS_IN_FLIGHT: &str = "parallel_consumer_records_in_flight";

/// Counter for records queued behind a busy lane
pub const RECORDS_ENQUEUED_BEHIND_LANE: &str = "parallel_consumer_records_enqueued_behind_lane_total";

/// Counter for records handled successfully
pub const RECORDS_HANDLED: &str = "parallel_consumer_records_handled_total";

/// Histogram for handler duration in seconds
pub const HANDLER_DURATION: &str = "parallel_consumer_handler_duration_seconds";

/// Counter for handler failures
pub const HANDLER_FAILURES: &str = "parallel_consumer_handler_failures_total";

// ==== Supervision metrics ====
/// Counter for pipeline restarts after a failure
pub const SUBTREE_RESTARTS: &str = "parallel_consumer_subtree_restarts_total";

/// Counter for pipeline incarnations started
pub const SUBTREE_STARTS: &str = "parallel_consumer_subtree_starts_total";
