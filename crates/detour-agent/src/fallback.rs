//! Responses synthesized when no endpoint could serve a request.

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use detour_common::{CandidateEndpoint, Origin};
use http::{header, Response, StatusCode};
use std::fmt::Write;

/// Delay before the fallback page re-probes the candidates.
pub const RETRY_DELAY_MS: u64 = 3000;

/// Empty `503` for non-document requests so callers fail fast.
pub fn unavailable() -> Response<Bytes> {
    let mut response = Response::new(Bytes::new());
    *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
    response
}

/// `302` to `location`.
pub fn redirect(location: &str) -> Response<Bytes> {
    let mut response = Response::new(Bytes::new());
    *response.status_mut() = StatusCode::FOUND;
    if let Ok(value) = header::HeaderValue::from_str(location) {
        response.headers_mut().insert(header::LOCATION, value);
    }
    response
}

/// Self-contained HTML page for a document request that could not be
/// served.
///
/// Lists every candidate, shows the origin the user was on and when the
/// check happened, and retries in the browser after [`RETRY_DELAY_MS`],
/// navigating to the first candidate that answers.
pub fn offline_page(
    candidates: &[CandidateEndpoint],
    current_origin: &Origin,
    path_and_query: &str,
    health_path: &str,
    checked_at: DateTime<Utc>,
) -> Response<Bytes> {
    let html = render_offline_page(
        candidates,
        current_origin,
        path_and_query,
        health_path,
        checked_at,
    );

    let mut response = Response::new(Bytes::from(html));
    *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/html; charset=utf-8"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn render_offline_page(
    candidates: &[CandidateEndpoint],
    current_origin: &Origin,
    path_and_query: &str,
    health_path: &str,
    checked_at: DateTime<Utc>,
) -> String {
    let mut links = String::new();
    for candidate in candidates {
        let href = format!("{}{}", candidate.origin, path_and_query);
        // Writing to a String cannot fail.
        let _ = writeln!(
            links,
            "      <li><a href=\"{}\">{}</a></li>",
            escape_html(&href),
            escape_html(candidate.origin.as_str())
        );
    }

    let origins: Vec<String> = candidates
        .iter()
        .map(|c| c.origin.as_str().to_string())
        .collect();
    let origins_json = serde_json::to_string(&origins).unwrap_or_else(|_| "[]".to_string());
    let path_json = serde_json::to_string(path_and_query).unwrap_or_else(|_| "\"/\"".to_string());
    let probe_json = serde_json::to_string(health_path).unwrap_or_else(|_| "\"/\"".to_string());

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>Service temporarily unavailable</title>
  </head>
  <body>
    <h1>Service temporarily unavailable</h1>
    <p>None of the service endpoints could be reached from <code>{current}</code>.</p>
    <p>Last checked: <time datetime="{checked}">{checked}</time></p>
    <p>Try one of these addresses:</p>
    <ul>
{links}    </ul>
    <p id="status">Retrying automatically&hellip;</p>
    <script>
      (function () {{
        var origins = {origins};
        var path = {path};
        var probePath = {probe};
        function probe(origin) {{
          return fetch(origin + probePath, {{ mode: "no-cors", cache: "no-store" }})
            .then(function () {{ return origin; }});
        }}
        function retry() {{
          var chain = Promise.reject();
          origins.forEach(function (origin) {{
            chain = chain.catch(function () {{ return probe(origin); }});
          }});
          chain.then(function (origin) {{
            window.location.href = origin + path;
          }}).catch(function () {{
            document.getElementById("status").textContent = "Still unreachable, retrying…";
            setTimeout(retry, {delay});
          }});
        }}
        setTimeout(retry, {delay});
      }})();
    </script>
  </body>
</html>
"#,
        current = escape_html(current_origin.as_str()),
        checked = checked_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        links = links,
        origins = escape_script(&origins_json),
        path = escape_script(&path_json),
        probe = escape_script(&probe_json),
        delay = RETRY_DELAY_MS,
    )
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

// JSON embedded in a <script> block must not be able to close it.
fn escape_script(json: &str) -> String {
    json.replace("</", "<\\/")
}
