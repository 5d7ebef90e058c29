//! Deterministic job names. The name is the subject's identity in the
//! registry, so the same subject must always map to the same string.

use sha2::{Digest, Sha256};

/// Hex characters of the query digest kept in a project job name.
const QUERY_DIGEST_LEN: usize = 16;

/// Name of a chat subscriber's recurring notification job.
pub fn subscriber_job_name(chat_id: &str) -> String {
    format!("periodic_{chat_id}")
}

/// Name of a project member's ad-hoc search job.
///
/// The full query is hashed, so queries sharing a long prefix get distinct
/// jobs.
pub fn project_job_name(project_id: i64, user_id: i64, query: &str) -> String {
    let digest = hex::encode(Sha256::digest(query.as_bytes()));
    format!(
        "project_search_{project_id}_{user_id}_{}",
        &digest[..QUERY_DIGEST_LEN]
    )
}
