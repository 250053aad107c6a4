use prometheus::Counter;
use prometheus::CounterVec;
use prometheus::HistogramVec;
use prometheus::Registry;
use slog::Logger;


lazy_static! {
    pub static ref LOCK_ACQUIRE_TOTAL: Counter = Counter::new(
        "zooky_lock_acquire_total",
        "Total number of lock acquire attempts started"
    ).expect("Failed to create LOCK_ACQUIRE_TOTAL counter");

    pub static ref LOCK_ACQUIRE_TIMEOUT: Counter = Counter::new(
        "zooky_lock_acquire_timeout",
        "Number of acquire attempts that gave up after their timeout elapsed"
    ).expect("Failed to create LOCK_ACQUIRE_TIMEOUT counter");

    pub static ref LOCK_ACQUIRED: Counter = Counter::new(
        "zooky_lock_acquired_total",
        "Total number of successful lock acquisitions"
    ).expect("Failed to create LOCK_ACQUIRED counter");

    pub static ref LOCK_RELEASE_TOTAL: Counter = Counter::new(
        "zooky_lock_release_total",
        "Total number of lock release operations"
    ).expect("Failed to create LOCK_RELEASE_TOTAL counter");

    pub static ref LOCK_SESSION_RESTARTS: Counter = Counter::new(
        "zooky_lock_session_restarts_total",
        "Number of times a synchronous acquire restarted its candidate after session loss"
    ).expect("Failed to create LOCK_SESSION_RESTARTS counter");

    pub static ref LOCK_REVOKED_OBSERVED: Counter = Counter::new(
        "zooky_lock_revoked_observed_total",
        "Number of times a held lock observed a revocation request"
    ).expect("Failed to create LOCK_REVOKED_OBSERVED counter");

    pub static ref BACKEND_OP_DURATION: HistogramVec = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "zooky_backend_op_duration",
            "Duration of coordination-service operations"
        ),
        &["op"]
    ).expect("Failed to create BACKEND_OP_DURATION histogram");

    pub static ref BACKEND_OP_ERRORS: CounterVec = CounterVec::new(
        prometheus::Opts::new(
            "zooky_backend_op_errors",
            "Number of coordination-service operations that returned an error"
        ),
        &["op"]
    ).expect("Failed to create BACKEND_OP_ERRORS counter");

    pub static ref BACKEND_RETRIES: Counter = Counter::new(
        "zooky_backend_retries_total",
        "Number of coordination-service operations retried after a retryable error"
    ).expect("Failed to create BACKEND_RETRIES counter");
}


/// Attempts to register metrics with the registry.
///
/// Metrics that fail to register are logged and ignored, following this
/// crate's general policy that observability should never be allowed to
/// take down the locking path it is meant to be observing.
pub fn register_metrics(logger: &Logger, registry: &Registry) {
    if let Err(err) = registry.register(Box::new(LOCK_ACQUIRE_TOTAL.clone())) {
        debug!(logger, "Failed to register LOCK_ACQUIRE_TOTAL"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(LOCK_ACQUIRE_TIMEOUT.clone())) {
        debug!(logger, "Failed to register LOCK_ACQUIRE_TIMEOUT"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(LOCK_ACQUIRED.clone())) {
        debug!(logger, "Failed to register LOCK_ACQUIRED"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(LOCK_RELEASE_TOTAL.clone())) {
        debug!(logger, "Failed to register LOCK_RELEASE_TOTAL"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(LOCK_SESSION_RESTARTS.clone())) {
        debug!(logger, "Failed to register LOCK_SESSION_RESTARTS"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(LOCK_REVOKED_OBSERVED.clone())) {
        debug!(logger, "Failed to register LOCK_REVOKED_OBSERVED"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(BACKEND_OP_DURATION.clone())) {
        debug!(logger, "Failed to register BACKEND_OP_DURATION"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(BACKEND_OP_ERRORS.clone())) {
        debug!(logger, "Failed to register BACKEND_OP_ERRORS"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(BACKEND_RETRIES.clone())) {
        debug!(logger, "Failed to register BACKEND_RETRIES"; "error" => ?err);
    }
}
