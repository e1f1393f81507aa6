//! A WebDAV subset (PROPFIND, GET, PUT, MKCOL, DELETE, MOVE) over the same metadata and
//! back-end pair as the JSON API. MOVE on directories is explicitly unsupported.

use super::error::{ApiError, ApiResult};
use super::{AppState, normalize_wildcard};
use crate::auth::Claims;
use crate::error::Error;
use crate::meta::FileEntry;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use chrono::SecondsFormat;
use percent_encoding::percent_decode_str;
use tokio_util::io::ReaderStream;

/// Dispatches a `/dav/{path}` request by method.
pub(super) async fn handle(
    State(state): State<AppState>,
    claims: Claims,
    Path(raw): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let path = normalize_wildcard(&raw)?;
    match method.as_str() {
        "PROPFIND" => propfind(&state, &claims, &path, &headers).await,
        "GET" => get(&state, &claims, &path).await,
        "PUT" => put(&state, &claims, &path, body).await,
        "MKCOL" => mkcol(&state, &claims, &path).await,
        "DELETE" => delete(&state, &claims, &path).await,
        "MOVE" => move_(&state, &claims, &path, &headers).await,
        _ => Ok(StatusCode::METHOD_NOT_ALLOWED.into_response()),
    }
}

async fn propfind(state: &AppState, claims: &Claims, path: &str, headers: &HeaderMap) -> ApiResult<Response> {
    let depth = headers.get("Depth").and_then(|v| v.to_str().ok()).unwrap_or("1");
    let entry = state.pipeline.stat(claims, path).await?;

    let mut responses = vec![propfind_entry(&entry)];
    if depth != "0" && entry.is_dir {
        for child in state.meta().list(path).await? {
            responses.push(propfind_entry(&child));
        }
    }
    let xml = format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<D:multistatus xmlns:D=\"DAV:\">{}</D:multistatus>",
        responses.join("")
    );
    Ok((
        StatusCode::MULTI_STATUS,
        [(header::CONTENT_TYPE, "application/xml; charset=utf-8")],
        xml,
    )
        .into_response())
}

fn propfind_entry(entry: &FileEntry) -> String {
    let href = format!("/dav{}", entry.path);
    let modified = entry.modified.to_rfc3339_opts(SecondsFormat::Secs, true);
    let resource = if entry.is_dir { "<D:collection/>" } else { "" };
    format!(
        "<D:response><D:href>{}</D:href><D:propstat><D:prop>\
         <D:displayname>{}</D:displayname>\
         <D:resourcetype>{resource}</D:resourcetype>\
         <D:getcontentlength>{}</D:getcontentlength>\
         <D:getlastmodified>{modified}</D:getlastmodified>\
         <D:getetag>\"{}\"</D:getetag>\
         </D:prop><D:status>HTTP/1.1 200 OK</D:status></D:propstat></D:response>",
        xml_escape(&href),
        xml_escape(&entry.name),
        entry.size,
        entry.hash,
    )
}

fn xml_escape(raw: &str) -> String {
    raw.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

async fn get(state: &AppState, claims: &Claims, path: &str) -> ApiResult<Response> {
    let (entry, read) = state.pipeline.read(claims, path, None).await?;
    Response::builder()
        .header(header::CONTENT_TYPE, crate::mime::from_path(&entry.path))
        .header(header::CONTENT_LENGTH, read.length.to_string())
        .header(header::ETAG, format!("\"{}\"", entry.hash))
        .body(Body::from_stream(ReaderStream::new(read.stream)))
        .map_err(|e| ApiError(Error::Internal(format!("response build: {e}"))))
}

async fn put(state: &AppState, claims: &Claims, path: &str, body: Bytes) -> ApiResult<Response> {
    let outcome = state.pipeline.write(claims, path, body, None, None).await?;
    state.tree.refresh().await?;
    let status = if outcome.created { StatusCode::CREATED } else { StatusCode::NO_CONTENT };
    Ok(status.into_response())
}

async fn mkcol(state: &AppState, claims: &Claims, path: &str) -> ApiResult<Response> {
    if state.meta().get_live(path).await?.is_some() {
        return Ok(StatusCode::METHOD_NOT_ALLOWED.into_response());
    }
    state.pipeline.mkdir(claims, path).await?;
    state.tree.refresh().await?;
    Ok(StatusCode::CREATED.into_response())
}

async fn delete(state: &AppState, claims: &Claims, path: &str) -> ApiResult<Response> {
    state.pipeline.delete(claims, path).await?;
    state.tree.refresh().await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn move_(state: &AppState, claims: &Claims, path: &str, headers: &HeaderMap) -> ApiResult<Response> {
    let entry = state.pipeline.stat(claims, path).await?;
    if entry.is_dir {
        // Directory MOVE is out of contract for the DAV surface.
        return Ok((StatusCode::BAD_GATEWAY, "directory MOVE is not supported").into_response());
    }
    let destination = headers
        .get("Destination")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError(Error::bad_request("MOVE requires a Destination header")))?;
    let target = parse_destination(destination)
        .ok_or_else(|| ApiError(Error::bad_request(format!("Destination {destination:?} is not under /dav"))))?;
    let target = crate::pathutil::normalize(&target).map_err(ApiError)?;
    state.pipeline.move_entry(claims, path, &target).await?;
    state.tree.refresh().await?;
    Ok(StatusCode::CREATED.into_response())
}

// Destination may be absolute ("https://host/dav/x") or a bare path ("/dav/x").
fn parse_destination(destination: &str) -> Option<String> {
    let path_part = if let Some(scheme_end) = destination.find("://") {
        let after = &destination[scheme_end + 3..];
        &after[after.find('/')?..]
    } else {
        destination
    };
    let decoded = percent_decode_str(path_part).decode_utf8().ok()?;
    decoded.strip_prefix("/dav").map(|rest| if rest.is_empty() { "/".to_string() } else { rest.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn destination_parsing() {
        assert_eq!(parse_destination("/dav/a/b.txt").as_deref(), Some("/a/b.txt"));
        assert_eq!(
            parse_destination("https://files.example.com/dav/a%20b.txt").as_deref(),
            Some("/a b.txt")
        );
        assert_eq!(parse_destination("/elsewhere/a.txt"), None);
    }

    #[test]
    fn xml_escaping() {
        assert_eq!(xml_escape("a<b>&c"), "a&lt;b&gt;&amp;c");
    }
}
