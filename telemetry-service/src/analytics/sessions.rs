//! Charging-session detection from state-of-charge deltas.

/// Minimum rise in state of charge, in percentage points, between two
/// consecutive readings for the pair to count as a session.
pub const SESSION_SOC_JUMP: f64 = 5.0;

/// Count adjacent pairs in `soc` (time ordered) whose rise exceeds
/// [`SESSION_SOC_JUMP`].
///
/// Every qualifying jump counts, so one long charge sampled sparsely can
/// count more than once.
pub fn count_charging_sessions(soc: impl IntoIterator<Item = f64>) -> u32 {
    let mut prev: Option<f64> = None;
    let mut sessions = 0;
    for cur in soc {
        if let Some(p) = prev {
            if cur > p + SESSION_SOC_JUMP {
                sessions += 1;
            }
        }
        prev = Some(cur);
    }
    sessions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_each_large_jump() {
        assert_eq!(count_charging_sessions([50.0, 52.0, 60.0, 61.0, 40.0, 80.0]), 2);
    }

    #[test]
    fn exact_threshold_is_not_a_session() {
        assert_eq!(count_charging_sessions([10.0, 15.0, 20.0]), 0);
    }

    #[test]
    fn short_sequences() {
        assert_eq!(count_charging_sessions([]), 0);
        assert_eq!(count_charging_sessions([42.0]), 0);
    }
}
