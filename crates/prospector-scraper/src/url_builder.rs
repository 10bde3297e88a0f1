use crate::error::Result;
use url::Url;

/// Search phrase for one industry in one town.
#[must_use]
pub fn search_query(industry: &str, town: &str) -> String {
    format!("{} in {}", industry.trim(), town.trim())
}

/// Maps search URL for `query`, appended as the `query` parameter.
pub fn build_search_url(search_url: &str, query: &str) -> Result<String> {
    let mut url = Url::parse(search_url)?;
    url.query_pairs_mut().append_pair("query", query);
    Ok(url.into())
}

/// Resolve a listing link found on the results page against the search URL.
pub fn resolve_listing_url(search_url: &str, href: &str) -> Result<String> {
    let base = Url::parse(search_url)?;
    Ok(base.join(href)?.into())
}

/// Lookup page URL for `phone`; the `{phone}` placeholder gets the digits only.
#[must_use]
pub fn build_lookup_url(template: &str, phone: &str) -> String {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    template.replace("{phone}", &digits)
}
