pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# W1LOG CONFIGURATION
# =============================================================================
# w1log polls 1-Wire sensors, delivers each poll as a batch to a collector
# endpoint (keeping undelivered batches in a local outbox), and reduces the
# archive of delivered batches into named per-stream time series.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/w1log/config.yml
#   3. /etc/w1log/config.yml
#
# Paths may use ~ and $env{VAR} references.

# =============================================================================
# COLLECTOR (required for `w1log collect`)
# =============================================================================
# `w1log collect` runs exactly one poll cycle. Schedule it with cron or a
# systemd timer; overlapping runs are serialized by a lock on the outbox.

collector:
  # Each batch is POSTed here as JSON. batch_id is an idempotency key.
  endpoint: http://127.0.0.1:7200/observations
  # Identifies this gizmo in delivered batches (default: hostname)
  # collector_id: attic-gizmo
  # Per-attempt network timeout
  timeout: 30s
  # Immediate retries per batch within one cycle; later cycles retry anyway
  max_retries: 2
  retry_interval: 500ms
  # How long to wait for an overlapping collector before giving up cleanly
  lock_wait: 5s
  # How far the archiving host's clock may lag this one
  max_clock_skew: 10m
  # The external schedule, used by `w1log status` to judge backlog age
  poll_interval: 5m

# =============================================================================
# SENSORS
# =============================================================================

sensors:
  path: /sys/bus/w1/devices
  # 'w1_slave' (raw driver output) or 'temperature' (plain value)
  value_file: w1_slave
  address_pattern: '^[0-9a-fA-F]{2}-[0-9a-fA-F]+$'

# =============================================================================
# STORAGE
# =============================================================================

storage:
  # Batches not yet acknowledged by the endpoint
  outbox: ~/.local/share/w1log/outbox
  # Append-only store of delivered batches, one file per batch
  archive: ~/.local/share/w1log/archive

# =============================================================================
# REDUCER (required for `w1log reduce`)
# =============================================================================

reducer:
  # {"sensors": [{"address": "28-011912588b87", "stream_name": "office_air", "unit": "degC"}]}
  metadata: ~/.config/w1log/metadata.json
  # Receives summary.json and one <stream>.data plot file per stream
  output: ~/.local/share/w1log/reduced
  # 'day' or 'month'
  period: day

# =============================================================================
# RECEIVER (optional, for `w1log receive`)
# =============================================================================
# A minimal endpoint that archives delivered batches. On a host that also
# collects, it needs its own directory: storage.archive holds the
# collector's copy of everything it delivered.

receiver:
  listen: 127.0.0.1:7200
  archive: ~/.local/share/w1log/received
"#
    .to_string()
}
