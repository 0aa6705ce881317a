//! Link-header pagination helpers
//!
//! GitLab paginates listings with an RFC 8288 `link` header, e.g.
//! `<https://gitlab.com/api/v4/projects?page=2>; rel="next", <...>; rel="last"`.
//! Only the `next` relation is followed.

/// Appends the page-size parameter to a base query
pub fn with_page_size(base_query: &str, per_page: u32) -> String {
    let separator = if base_query.contains('?') { '&' } else { '?' };
    format!("{}{}per_page={}", base_query, separator, per_page)
}

/// Extracts the target of the `next` relation from a `link` header value
///
/// Returns `None` when no entry carries `rel="next"`, which ends pagination.
pub fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|entry| {
        let (target, params) = entry.trim().split_once(';')?;
        let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
        params
            .split(';')
            .any(is_next_relation)
            .then(|| target.to_string())
    })
}

fn is_next_relation(param: &str) -> bool {
    let Some((name, value)) = param.split_once('=') else {
        return false;
    };
    name.trim().eq_ignore_ascii_case("rel")
        && value
            .trim()
            .trim_matches('"')
            .split_whitespace()
            .any(|rel| rel.eq_ignore_ascii_case("next"))
}
