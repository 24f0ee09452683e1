use std::time::{Duration, SystemTime};

const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Short unique id for container names and staging directories.
///
/// 64 random bits from the OS; falls back to a time/pid mix when the OS source is unavailable.
pub fn unique_id() -> String {
    let mut bytes = [0u8; 8];
    let v = match getrandom::getrandom(&mut bytes) {
        Ok(()) => u64::from_le_bytes(bytes),
        Err(e) => {
            tracing::debug!("getrandom unavailable ({e}); using time/pid id");
            time_pid_mix()
        }
    };
    base36(v)
}

fn time_pid_mix() -> u64 {
    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0));
    let pid = u128::from(std::process::id());
    let mix = now.as_nanos() ^ (pid << 64);
    (mix as u64) ^ ((mix >> 64) as u64)
}

fn base36(mut v: u64) -> String {
    if v == 0 {
        return "0".to_string();
    }
    let mut s = Vec::new();
    while v > 0 {
        s.push(ALPHABET[(v % 36) as usize]);
        v /= 36;
    }
    s.reverse();
    String::from_utf8_lossy(&s).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base36() {
        assert_eq!(base36(0), "0");
        assert_eq!(base36(35), "z");
        assert_eq!(base36(36), "10");
    }

    #[test]
    fn test_unique_ids_differ_and_are_name_safe() {
        let a = unique_id();
        let b = unique_id();
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
