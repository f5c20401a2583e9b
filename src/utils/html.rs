use ammonia;

/// Clean HTML content using the ammonia library.
///
/// Whitelist-based: safe tags (like <b>, <p>) are preserved, dangerous tags
/// (like <script>, <iframe>) and attributes (like onclick) are stripped.
/// Free-text answers go through this before they are stored, since reviewers
/// read them in an HTML page.
pub fn clean_html(input: &str) -> String {
    ammonia::clean(input)
}
