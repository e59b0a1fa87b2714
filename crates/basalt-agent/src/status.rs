use basalt_core::ServerStatus;

const READY_MARKER_A: &str = "Done (";
const READY_MARKER_B: &str = "For help, type \"help\"";
const STARTING_MARKER: &str = "Starting minecraft server";
const LEVEL_MARKERS: [&str; 2] = ["Preparing level", "Loading level"];

/// Maps container state plus a recent log tail to a coarse status.
///
/// The tail is scanned most-recent-first and the first matching line wins;
/// intermediate phases can log repeatedly, so only recency matters, not
/// strict ordering.
pub fn infer_status(running: bool, tail: &[String]) -> ServerStatus {
    if !running {
        return ServerStatus::Stopped;
    }
    if tail.is_empty() {
        return ServerStatus::Unknown;
    }

    for line in tail.iter().rev() {
        if line.contains(READY_MARKER_A) && line.contains(READY_MARKER_B) {
            return ServerStatus::Ready;
        }
        if line.contains(STARTING_MARKER) {
            return ServerStatus::Starting;
        }
        if LEVEL_MARKERS.iter().any(|m| line.contains(m)) {
            return ServerStatus::Initializing;
        }
    }

    ServerStatus::Booting
}
