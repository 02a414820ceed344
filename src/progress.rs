//! Progress snapshot handed to callbacks and status lines.

use std::time::Instant;

use crate::uint256::UInt256;

#[derive(Clone, Debug)]
pub struct Progress {
    pub keys_checked: u64,
    pub keys_per_second: u64,
    pub progress_percent: f64,
    pub started_at: Instant,
    pub last_update: Instant,
    pub current_position: UInt256,
    pub results_found: usize,
}

impl Progress {
    pub fn format_speed(&self) -> String {
        let kps = self.keys_per_second;
        if kps >= 1_000_000_000_000 {
            format!("{:.2} Tkeys/s", kps as f64 / 1e12)
        } else if kps >= 1_000_000_000 {
            format!("{:.2} Gkeys/s", kps as f64 / 1e9)
        } else if kps >= 1_000_000 {
            format!("{:.2} Mkeys/s", kps as f64 / 1e6)
        } else if kps >= 1_000 {
            format!("{:.2} Kkeys/s", kps as f64 / 1e3)
        } else {
            format!("{kps} keys/s")
        }
    }

    pub fn format_elapsed(&self) -> String {
        let secs = self.started_at.elapsed().as_secs();
        format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

impl Default for Progress {
    fn default() -> Self {
        let now = Instant::now();
        Self {
            keys_checked: 0,
            keys_per_second: 0,
            progress_percent: 0.0,
            started_at: now,
            last_update: now,
            current_position: UInt256::ZERO,
            results_found: 0,
        }
    }
}
