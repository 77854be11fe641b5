// src/exit_codes.rs

//! Process exit codes. Job-level codes are a bitmask: the final code of a
//! job is the bitwise OR of every condition that applies.

pub const ALL_OK: i32 = 0x00;
pub const TESTS_FAIL: i32 = 0x01;
pub const JOB_FAIL: i32 = 0x02;
pub const FAIL: i32 = 0x04;
pub const JOB_INTERRUPTED: i32 = 0x08;
pub const GENERIC_CRASH: i32 = -1;

/// Human readable names of the bits set in `code`.
pub fn describe(code: i32) -> Vec<&'static str> {
    if code == GENERIC_CRASH {
        return vec!["GENERIC_CRASH"];
    }
    if code == ALL_OK {
        return vec!["ALL_OK"];
    }
    [
        (TESTS_FAIL, "TESTS_FAIL"),
        (JOB_FAIL, "JOB_FAIL"),
        (FAIL, "FAIL"),
        (JOB_INTERRUPTED, "JOB_INTERRUPTED"),
    ]
    .into_iter()
    .filter(|(bit, _)| code & bit != 0)
    .map(|(_, name)| name)
    .collect()
}
