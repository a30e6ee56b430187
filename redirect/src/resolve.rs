use regions::RegionSnapshot;

/// First segment of `path`, e.g. "us" for "/us/store". None for "/".
pub fn first_segment(path: &str) -> Option<&str> {
    path.split('/').nth(1).filter(|segment| !segment.is_empty())
}

/// Picks the country whose region governs a request, trying in order the
/// first path segment, the geolocation country, the default region and
/// finally the first country known to `snapshot`. Only countries present
/// in `snapshot` are returned.
pub fn resolve_country_code(
    path: &str,
    geo_country: Option<&str>,
    snapshot: &RegionSnapshot,
    default_region: &str,
) -> Option<String> {
    let known = |code: String| snapshot.contains(&code).then_some(code);

    first_segment(path)
        .map(str::to_ascii_lowercase)
        .and_then(known)
        .or_else(|| {
            geo_country
                .map(|c| c.trim().to_ascii_lowercase())
                .and_then(known)
        })
        .or_else(|| known(default_region.to_ascii_lowercase()))
        .or_else(|| snapshot.first_country().map(String::from))
}
