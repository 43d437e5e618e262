use percent_encoding::percent_decode_str;
use url::Url;

/// Name a download after the last path segment of its url.
///
/// Percent-encoding is decoded, strictly as UTF-8 first then lossily.
/// Returns ``None`` when the url ends in ``/`` or has no path at all.
pub fn infer_file_name(url: &Url) -> Option<String> {
    let seg = url.path_segments().and_then(Iterator::last)?;
    let decoded = percent_decode_str(seg)
        .decode_utf8()
        .map_or_else(|_| percent_decode_str(seg).decode_utf8_lossy().into_owned(), std::borrow::Cow::into_owned);
    if decoded.is_empty() {
        return None;
    }
    Some(decoded)
}
