/// Stream id format policy.
///
/// Publishers pick their own stream ids, and those ids end up in ingest
/// URLs and datastore keys, so the accepted alphabet is restricted to
/// characters that are safe in both.
const MAX_STREAM_ID_LEN: usize = 256;

/// Returns true when `stream_id` is acceptable as a stream name: non-empty,
/// at most 256 bytes, ASCII alphanumerics plus `_`, `-` and `.`.
pub fn is_valid(stream_id: &str) -> bool {
    if stream_id.is_empty() || stream_id.len() > MAX_STREAM_ID_LEN {
        return false;
    }
    stream_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}
