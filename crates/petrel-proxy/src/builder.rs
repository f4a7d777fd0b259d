//! Backend request construction: canonical URLs, query encoding, and the
//! striped account/container update headers.

use std::collections::BTreeMap;

use http::{HeaderMap, HeaderName, HeaderValue};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use petrel_types::Device;

/// Path escaping: unreserved characters and `/` pass through.
const PATH: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// Query escaping: like path escaping but `/` is encoded too.
const QUERY: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Percent-encode a URL path component, leaving `/` intact.
pub(crate) fn urlencode(s: &str) -> String {
    utf8_percent_encode(s, PATH).to_string()
}

/// Backend URL for an account request.
pub(crate) fn account_url(dev: &Device, partition: u64, account: &str) -> String {
    format!(
        "{}://{}:{}/{}/{}/{}",
        dev.scheme,
        dev.host,
        dev.port,
        dev.device,
        partition,
        urlencode(account)
    )
}

/// Backend URL for a container request.
pub(crate) fn container_url(
    dev: &Device,
    partition: u64,
    account: &str,
    container: &str,
) -> String {
    format!(
        "{}://{}:{}/{}/{}/{}/{}",
        dev.scheme,
        dev.host,
        dev.port,
        dev.device,
        partition,
        urlencode(account),
        urlencode(container)
    )
}

/// Backend URL for an object request.
pub(crate) fn object_url(
    dev: &Device,
    partition: u64,
    account: &str,
    container: &str,
    object: &str,
) -> String {
    format!(
        "{}://{}:{}/{}/{}/{}/{}/{}",
        dev.scheme,
        dev.host,
        dev.port,
        dev.device,
        partition,
        urlencode(account),
        urlencode(container),
        urlencode(object)
    )
}

/// Render listing options as a query string (`?k=v&...`), skipping empty
/// values. Empty options render as an empty string.
pub(crate) fn query_string(options: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (key, value) in options {
        if value.is_empty() {
            continue;
        }
        out.push(if out.is_empty() { '?' } else { '&' });
        out.push_str(&utf8_percent_encode(key, QUERY).to_string());
        out.push('=');
        out.push_str(&utf8_percent_encode(value, QUERY).to_string());
    }
    out
}

/// Copy client-supplied headers onto a backend request.
pub(crate) fn copy_headers(dst: &mut HeaderMap, src: &HeaderMap) {
    for (name, value) in src {
        dst.insert(name.clone(), value.clone());
    }
}

/// Set the striped update headers that drive async account/container
/// updates on the backend.
///
/// Replica `i` of a mutation gets every `replicas`-th device starting at
/// `i`, comma-joined, as `{prefix}-Host`, `{prefix}-Device` and
/// `{prefix}-Scheme`.
pub(crate) fn add_update_headers(
    prefix: &str,
    headers: &mut HeaderMap,
    devices: &[Device],
    i: usize,
    replicas: usize,
) {
    if i >= devices.len() || replicas == 0 {
        return;
    }
    let mut hosts = Vec::new();
    let mut names = Vec::new();
    let mut schemes = Vec::new();
    let mut index = i;
    while index < devices.len() {
        hosts.push(devices[index].endpoint());
        names.push(devices[index].device.clone());
        schemes.push(devices[index].scheme.clone());
        index += replicas;
    }
    set_header(headers, &format!("{prefix}-Scheme"), &schemes.join(","));
    set_header(headers, &format!("{prefix}-Host"), &hosts.join(","));
    set_header(headers, &format!("{prefix}-Device"), &names.join(","));
}

/// Insert a header, skipping values that are not valid on the wire.
pub(crate) fn set_header(headers: &mut HeaderMap, name: &str, value: &str) {
    if let (Ok(name), Ok(value)) = (
        HeaderName::try_from(name.to_ascii_lowercase()),
        HeaderValue::from_str(value),
    ) {
        headers.insert(name, value);
    }
}
