// src/paths/job_id.rs

use rand::RngCore;
use rand::rngs::OsRng;

/// Length of a job id in hex characters.
pub const JOB_ID_LEN: usize = 40;

/// Prefix length used in directory names and short displays.
pub const SHORT_ID_LEN: usize = 7;

/// Fresh 40-character lowercase hex id from the OS random source.
pub fn create_unique_job_id() -> String {
    let mut bytes = [0u8; JOB_ID_LEN / 2];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn is_valid_job_id(id: &str) -> bool {
    id.len() == JOB_ID_LEN && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// First seven characters, or the whole id if shorter.
pub fn short_id(id: &str) -> &str {
    id.get(..SHORT_ID_LEN).unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_valid_and_distinct() {
        let a = create_unique_job_id();
        let b = create_unique_job_id();
        assert!(is_valid_job_id(&a), "{a}");
        assert!(is_valid_job_id(&b), "{b}");
        assert_ne!(a, b);
    }

    #[test]
    fn validation_rejects_uppercase_and_short() {
        assert!(!is_valid_job_id("ABCDEF0123456789abcdef0123456789abcdef01"));
        assert!(!is_valid_job_id("abc"));
    }

    #[test]
    fn short_id_handles_short_input() {
        assert_eq!(short_id("0123456789"), "0123456");
        assert_eq!(short_id("01"), "01");
    }
}
