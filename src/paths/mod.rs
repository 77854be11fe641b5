// src/paths/mod.rs

//! Identity and on-disk naming.
//!
//! - [`job_id`] generates the 40-hex job identifier.
//! - [`safe_name`] turns arbitrary strings into filesystem-safe components.
//! - [`layout`] knows where every artifact of a job lives and creates the
//!   job directory and the `latest` link.
//! - [`job_ref`] turns user supplied job references (`latest`, partial ids,
//!   paths) back into results directories.

pub mod job_id;
pub mod job_ref;
pub mod layout;
pub mod safe_name;

pub use job_id::{JOB_ID_LEN, create_unique_job_id, is_valid_job_id};
pub use job_ref::{list_job_dirs, read_job_id, resolve_job_ref};
pub use layout::{JobLayout, TaskDir, create_job_logs_dir, update_latest_link};
pub use safe_name::safe_filename;
