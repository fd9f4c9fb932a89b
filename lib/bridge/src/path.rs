/// Forward slash is accepted as a separator by every host we run on.
pub const SEPARATOR: u8 = b'/';

/// Joins `segments` with a single [`SEPARATOR`] between consecutive
/// segments and none at either end. Segments are taken verbatim, byte for
/// byte, so separators already inside them are kept.
///
/// Returns `None` for an empty sequence.
pub fn join_segments<S: AsRef<[u8]>>(segments: &[S]) -> Option<Vec<u8>> {
    let (first, rest) = segments.split_first()?;

    let len = segments.iter().map(|s| s.as_ref().len()).sum::<usize>() + rest.len();
    let mut joined = Vec::with_capacity(len);
    joined.extend_from_slice(first.as_ref());
    for segment in rest {
        joined.push(SEPARATOR);
        joined.extend_from_slice(segment.as_ref());
    }
    Some(joined)
}
