//! End-to-end scenarios driven through the HTTP API against in-memory stores.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use common::{body_bytes, body_json, server, sha256_hex};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn overwrite_with_conflict_detection() {
    let srv = server().await;

    // First write: version 1.
    let res = srv.send_raw("POST", "/api/v1/content/a.txt", "alice-token", b"v1").await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let body = body_json(res).await;
    assert_eq!(body["version"], 1);
    assert_eq!(body["created"], true);

    // Same client reads and writes again with the version it saw.
    let res = srv
        .request(
            Request::builder()
                .method("POST")
                .uri("/api/v1/content/a.txt")
                .header(header::AUTHORIZATION, "Bearer alice-token")
                .header("X-Expected-Version", "1")
                .body(Body::from("v2"))
                .unwrap(),
        )
        .await;
    assert_eq!(res.status(), StatusCode::CREATED);
    assert_eq!(body_json(res).await["version"], 2);

    // A second client retries with the stale version.
    let res = srv
        .request(
            Request::builder()
                .method("POST")
                .uri("/api/v1/content/a.txt")
                .header(header::AUTHORIZATION, "Bearer alice-token")
                .header("X-Expected-Version", "1")
                .body(Body::from("v3"))
                .unwrap(),
        )
        .await;
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let conflict = body_json(res).await;
    assert_eq!(conflict["expected_version"], 1);
    assert_eq!(conflict["current_version"], 2);
    assert_eq!(conflict["current_hash"], sha256_hex(b"v2"));

    // No change to stored content.
    let res = srv.send("GET", "/api/v1/content/a.txt", Some("alice-token"), Body::empty()).await;
    assert_eq!(body_bytes(res).await, b"v2");
}

#[tokio::test]
async fn resumable_upload_with_resume() {
    let srv = server().await;

    let res = srv
        .send(
            "POST",
            "/api/v1/upload/init",
            Some("alice-token"),
            Body::from(r#"{"path": "/up/big.bin", "fileName": "big.bin", "fileSize": 12}"#),
        )
        .await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let init = body_json(res).await;
    assert_eq!(init["chunkSize"], common::CHUNK_SIZE);
    assert_eq!(init["totalChunks"], 3);
    let id = init["uploadId"].as_str().unwrap().to_string();

    // Chunks 0 and 2 arrive before the crash.
    let res = srv.send_raw("PUT", &format!("/api/v1/upload/{id}/chunk/0"), "alice-token", b"01234").await;
    assert_eq!(res.status(), StatusCode::OK);
    let res = srv.send_raw("PUT", &format!("/api/v1/upload/{id}/chunk/2"), "alice-token", b"ab").await;
    assert_eq!(res.status(), StatusCode::OK);

    // A premature complete names the gap.
    let res = srv.send("POST", &format!("/api/v1/upload/{id}/complete"), Some("alice-token"), Body::empty()).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(res).await["error"], "bad request: received 2/3 chunks");

    // The client discovers what is missing and fills it in.
    let res = srv.send("GET", &format!("/api/v1/upload/{id}"), Some("alice-token"), Body::empty()).await;
    let status = body_json(res).await;
    assert_eq!(status["received"], serde_json::json!([0, 2]));
    assert_eq!(status["status"], "active");

    let res = srv.send_raw("PUT", &format!("/api/v1/upload/{id}/chunk/1"), "alice-token", b"56789").await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = srv.send("POST", &format!("/api/v1/upload/{id}/complete"), Some("alice-token"), Body::empty()).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let done = body_json(res).await;
    assert_eq!(done["size"], 12);
    assert_eq!(done["version"], 1);
    assert_eq!(done["hash"], sha256_hex(b"0123456789ab"));

    let res = srv.send("GET", "/api/v1/content/up/big.bin", Some("alice-token"), Body::empty()).await;
    assert_eq!(body_bytes(res).await, b"0123456789ab");
}

#[tokio::test]
async fn rollback_to_first_version() {
    let srv = server().await;
    srv.send_raw("POST", "/api/v1/content/doc", "alice-token", b"hello").await;
    srv.send_raw("POST", "/api/v1/content/doc", "alice-token", b"world").await;

    let res = srv
        .send("POST", "/api/v1/versions/doc", Some("alice-token"), Body::from(r#"{"version": 1}"#))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let rb = body_json(res).await;
    assert_eq!(rb["restored_version"], 1);
    assert_eq!(rb["new_version"], 3);

    let res = srv.send("GET", "/api/v1/content/doc", Some("alice-token"), Body::empty()).await;
    assert_eq!(res.headers().get("X-Version").unwrap(), "3");
    assert_eq!(
        res.headers().get(header::ETAG).unwrap().to_str().unwrap(),
        format!("\"{}\"", sha256_hex(b"hello"))
    );
    assert_eq!(body_bytes(res).await, b"hello");
}

#[tokio::test]
async fn version_listing_and_historical_bytes() {
    let srv = server().await;
    srv.send_raw("POST", "/api/v1/content/v.txt", "alice-token", b"one").await;
    srv.send_raw("POST", "/api/v1/content/v.txt", "alice-token", b"two").await;

    let res = srv.send("GET", "/api/v1/versions/v.txt", Some("alice-token"), Body::empty()).await;
    let listing = body_json(res).await;
    assert_eq!(listing["current_version"], 2);
    assert_eq!(listing["versions"][0]["version"], 1);
    assert_eq!(listing["versions"][0]["hash"], sha256_hex(b"one"));

    let res = srv.send("GET", "/api/v1/versions/v.txt?v=1", Some("alice-token"), Body::empty()).await;
    assert_eq!(res.headers().get("X-Version").unwrap(), "1");
    assert_eq!(res.headers().get("X-Version-Hash").unwrap().to_str().unwrap(), sha256_hex(b"one"));
    assert_eq!(body_bytes(res).await, b"one");
}

#[tokio::test]
async fn soft_delete_and_restore_of_a_tree() {
    let srv = server().await;
    srv.send_raw("POST", "/api/v1/content/x/a", "alice-token", b"a").await;
    srv.send_raw("POST", "/api/v1/content/x/b", "alice-token", b"b").await;

    let res = srv.send("DELETE", "/api/v1/tree/x", Some("alice-token"), Body::empty()).await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = srv.send("GET", "/api/v1/tree", Some("alice-token"), Body::empty()).await;
    let tree = body_json(res).await;
    let top: Vec<&str> = tree["root"]["children"].as_array().unwrap().iter().map(|c| c["name"].as_str().unwrap()).collect();
    assert!(!top.contains(&"x"));

    let res = srv.send("GET", "/api/v1/trash", Some("alice-token"), Body::empty()).await;
    let trash = body_json(res).await;
    let paths: Vec<&str> = trash["entries"].as_array().unwrap().iter().map(|e| e["original_path"].as_str().unwrap()).collect();
    assert!(paths.contains(&"/x/a") && paths.contains(&"/x/b"));

    let res = srv
        .send("POST", "/api/v1/trash/restore", Some("alice-token"), Body::from(r#"{"path": "/x"}"#))
        .await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = srv.send("GET", "/api/v1/content/x/a", Some("alice-token"), Body::empty()).await;
    assert_eq!(body_bytes(res).await, b"a");
    let res = srv.send("GET", "/api/v1/content/x/b", Some("alice-token"), Body::empty()).await;
    assert_eq!(body_bytes(res).await, b"b");
}

#[tokio::test]
async fn share_with_password_and_download_limit() {
    let srv = server().await;
    srv.send_raw("POST", "/api/v1/content/secret.pdf", "alice-token", b"classified").await;

    let res = srv
        .send(
            "POST",
            "/api/v1/share",
            Some("alice-token"),
            Body::from(r#"{"path": "/secret.pdf", "password": "p", "max_downloads": 2}"#),
        )
        .await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let link = body_json(res).await;
    let id = link["id"].as_str().unwrap().to_string();

    // Info page: valid, password-protected.
    let res = srv.send("GET", &format!("/api/v1/share/{id}/info"), None, Body::empty()).await;
    let info = body_json(res).await;
    assert_eq!(info["valid"], true);
    assert_eq!(info["has_password"], true);
    assert_eq!(info["file_name"], "secret.pdf");

    // No password, wrong password.
    let res = srv.send("GET", &format!("/api/v1/share/{id}"), None, Body::empty()).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let res = srv.send("GET", &format!("/api/v1/share/{id}?password=wrong"), None, Body::empty()).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    // Two successful downloads, then the limit.
    let res = srv.send("GET", &format!("/api/v1/share/{id}?password=p"), None, Body::empty()).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        res.headers().get(header::CONTENT_DISPOSITION).unwrap().to_str().unwrap(),
        "attachment; filename=\"secret.pdf\""
    );
    assert_eq!(body_bytes(res).await, b"classified");
    let res = srv.send("GET", &format!("/api/v1/share/{id}?password=p"), None, Body::empty()).await;
    assert_eq!(res.status(), StatusCode::OK);
    let res = srv.send("GET", &format!("/api/v1/share/{id}?password=p"), None, Body::empty()).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert!(body_json(res).await["error"].as_str().unwrap().contains("download limit reached"));

    // Revoked wins over everything else afterwards.
    let res = srv.send("DELETE", &format!("/api/v1/share/{id}"), Some("alice-token"), Body::empty()).await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    let res = srv.send("GET", &format!("/api/v1/share/{id}?password=p"), None, Body::empty()).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert!(body_json(res).await["error"].as_str().unwrap().contains("revoked"));
}

#[tokio::test]
async fn visibility_pruning_in_tree_responses() {
    let srv = server().await;
    srv.send_raw("POST", "/api/v1/content/grp/shared", "alice-token", b"team data").await;
    srv.send_raw("POST", "/api/v1/content/private", "alice-token", b"mine").await;

    let res = srv
        .send(
            "PUT",
            "/api/v1/visibility/grp/shared",
            Some("admin-token"),
            Body::from(r#"{"visibility": "group", "group_id": "g1"}"#),
        )
        .await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    let res = srv
        .send(
            "PUT",
            "/api/v1/visibility/private",
            Some("admin-token"),
            Body::from(r#"{"visibility": "private"}"#),
        )
        .await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    // Uma is a member of g1: sees the group file, not the private one.
    let res = srv.send("GET", "/api/v1/tree", Some("uma-token"), Body::empty()).await;
    let tree = serde_json::to_string(&body_json(res).await).unwrap();
    assert!(tree.contains("/grp/shared"));
    assert!(!tree.contains("/private"));

    // Bob is in no group and sees neither.
    let res = srv.send("GET", "/api/v1/tree", Some("bob-token"), Body::empty()).await;
    let tree = serde_json::to_string(&body_json(res).await).unwrap();
    assert!(!tree.contains("/grp/shared"));
    assert!(!tree.contains("/private"));
}

#[tokio::test]
async fn range_requests() {
    let srv = server().await;
    srv.send_raw("POST", "/api/v1/content/r.bin", "alice-token", b"0123456789").await;

    let get = |range: &'static str| {
        Request::builder()
            .method("GET")
            .uri("/api/v1/content/r.bin")
            .header(header::AUTHORIZATION, "Bearer alice-token")
            .header(header::RANGE, range)
            .body(Body::empty())
            .unwrap()
    };

    // Exactly one byte.
    let res = srv.request(get("bytes=0-0")).await;
    assert_eq!(res.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(res.headers().get(header::CONTENT_RANGE).unwrap(), "bytes 0-0/10");
    assert_eq!(body_bytes(res).await, b"0");

    // Open-ended tail.
    let res = srv.request(get("bytes=7-")).await;
    assert_eq!(body_bytes(res).await, b"789");

    srv.send_raw("POST", "/api/v1/content/tiny.bin", "alice-token", b"abc").await;
    let res = srv
        .request(
            Request::builder()
                .method("GET")
                .uri("/api/v1/content/tiny.bin")
                .header(header::AUTHORIZATION, "Bearer alice-token")
                .header(header::RANGE, "bytes=-5")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    // Suffix longer than the file returns all of it.
    assert_eq!(res.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(body_bytes(res).await, b"abc");
}

#[tokio::test]
async fn authentication_is_required() {
    let srv = server().await;
    let res = srv.send("GET", "/api/v1/tree", None, Body::empty()).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let res = srv.send("GET", "/api/v1/tree", Some("nonsense"), Body::empty()).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(res).await;
    assert_eq!(body["code"], 401);
}

#[tokio::test]
async fn permission_grants_gate_other_users() {
    let srv = server().await;
    srv.send_raw("POST", "/api/v1/content/proj/plan.txt", "alice-token", b"draft").await;

    // Bob cannot read until granted.
    let res = srv.send("GET", "/api/v1/content/proj/plan.txt", Some("bob-token"), Body::empty()).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = srv
        .send(
            "PUT",
            "/api/v1/permissions/proj",
            Some("alice-token"),
            Body::from(r#"{"user_id": "bob", "level": "read"}"#),
        )
        .await;
    assert_eq!(res.status(), StatusCode::CREATED);

    let res = srv.send("GET", "/api/v1/content/proj/plan.txt", Some("bob-token"), Body::empty()).await;
    assert_eq!(res.status(), StatusCode::OK);
    // Read does not include write.
    let res = srv.send_raw("POST", "/api/v1/content/proj/plan.txt", "bob-token", b"hijack").await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn gzip_tree_when_accepted() {
    let srv = server().await;
    srv.send_raw("POST", "/api/v1/content/z.txt", "alice-token", b"z").await;

    let res = srv
        .request(
            Request::builder()
                .method("GET")
                .uri("/api/v1/tree")
                .header(header::AUTHORIZATION, "Bearer alice-token")
                .header(header::ACCEPT_ENCODING, "gzip")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(res.headers().get(header::CONTENT_ENCODING).unwrap(), "gzip");
    let compressed = body_bytes(res).await;
    // gzip magic bytes
    assert_eq!(&compressed[..2], &[0x1f, 0x8b]);
}

#[tokio::test]
async fn webdav_roundtrip_and_directory_move_refusal() {
    let srv = server().await;

    let res = srv.send_raw("PUT", "/dav/w/report.txt", "alice-token", b"dav body").await;
    assert_eq!(res.status(), StatusCode::CREATED);

    let res = srv.send("GET", "/dav/w/report.txt", Some("alice-token"), Body::empty()).await;
    assert_eq!(body_bytes(res).await, b"dav body");

    // PROPFIND depth 1 on the parent collection lists the child.
    let res = srv
        .request(
            Request::builder()
                .method("PROPFIND")
                .uri("/dav/w")
                .header(header::AUTHORIZATION, "Bearer alice-token")
                .header("Depth", "1")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(res.status(), StatusCode::MULTI_STATUS);
    let xml = String::from_utf8(body_bytes(res).await).unwrap();
    assert!(xml.contains("<D:href>/dav/w/report.txt</D:href>"));
    assert!(xml.contains("<D:collection/>"));

    // MOVE of a file works.
    let res = srv
        .request(
            Request::builder()
                .method("MOVE")
                .uri("/dav/w/report.txt")
                .header(header::AUTHORIZATION, "Bearer alice-token")
                .header("Destination", "/dav/w/renamed.txt")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let res = srv.send("GET", "/dav/w/renamed.txt", Some("alice-token"), Body::empty()).await;
    assert_eq!(body_bytes(res).await, b"dav body");

    // MOVE of a directory is explicitly unsupported.
    let res = srv
        .request(
            Request::builder()
                .method("MOVE")
                .uri("/dav/w")
                .header(header::AUTHORIZATION, "Bearer alice-token")
                .header("Destination", "/dav/elsewhere")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn bulk_operations_report_per_item_results() {
    let srv = server().await;
    srv.send_raw("POST", "/api/v1/content/b/one.txt", "alice-token", b"1").await;
    srv.send_raw("POST", "/api/v1/content/b/two.txt", "alice-token", b"2").await;

    let res = srv
        .send(
            "POST",
            "/api/v1/bulk/copy",
            Some("alice-token"),
            Body::from(
                r#"{"items": [
                    {"from": "/b/one.txt", "to": "/c/one.txt"},
                    {"from": "/b/missing.txt", "to": "/c/missing.txt"}
                ]}"#,
            ),
        )
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let report = body_json(res).await;
    assert_eq!(report["succeeded"], 1);
    assert_eq!(report["failed"], 1);

    let res = srv.send("GET", "/api/v1/content/c/one.txt", Some("alice-token"), Body::empty()).await;
    assert_eq!(body_bytes(res).await, b"1");
}

#[tokio::test]
async fn favorites_and_search() {
    let srv = server().await;
    srv.send_raw("POST", "/api/v1/content/notes/ideas.txt", "alice-token", b"x").await;

    let res = srv.send("PUT", "/api/v1/favorites/notes/ideas.txt", Some("alice-token"), Body::empty()).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let res = srv.send("GET", "/api/v1/favorites", Some("alice-token"), Body::empty()).await;
    let favs = body_json(res).await;
    assert_eq!(favs["entries"][0]["path"], "/notes/ideas.txt");

    let res = srv.send("GET", "/api/v1/search?q=ideas&type=files", Some("alice-token"), Body::empty()).await;
    let hits = body_json(res).await;
    assert_eq!(hits["entries"].as_array().unwrap().len(), 1);
    // Bob holds no grant on the path, so his search comes back empty.
    let res = srv.send("GET", "/api/v1/search?q=ideas&type=files", Some("bob-token"), Body::empty()).await;
    assert!(body_json(res).await["entries"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn quota_admin_roundtrip() {
    let srv = server().await;
    let res = srv
        .send(
            "PUT",
            "/api/v1/admin/quotas/bob",
            Some("admin-token"),
            Body::from(r#"{"max_storage_bytes": 1000, "max_upload_bytes": 10}"#),
        )
        .await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = srv.send("GET", "/api/v1/admin/quotas/bob", Some("admin-token"), Body::empty()).await;
    let quota = body_json(res).await;
    assert_eq!(quota["max_storage_bytes"], 1000);
    assert_eq!(quota["max_upload_bytes"], 10);

    // Not for regular users.
    let res = srv.send("GET", "/api/v1/admin/quotas/bob", Some("bob-token"), Body::empty()).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}
