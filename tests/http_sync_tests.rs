//! End-to-end tests over real HTTP: a bundle registry served from a temp
//! directory, and a small writable registry standing in for a destination.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::Router;
use registry_sync::config::{ServerConfig, SystemContext};
use registry_sync::credentials::Credentials;
use registry_sync::digest::DigestUtils;
use registry_sync::error::SyncError;
use registry_sync::policy::default_policy_context;
use registry_sync::registry::{
    discover, resolve_registry_address, CopyOptions, HttpTransport, ImageCopier, ImageListSelection,
    RegistryTransport,
};
use registry_sync::server::EphemeralRegistry;
use registry_sync::{ImageBundle, SyncConfig, Syncer, TaggedImageRef};
use std::collections::HashMap;
use std::path::{Path as FsPath, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

// ---------------------------------------------------------------------------
// source layout

fn v2_root(root: &FsPath) -> PathBuf {
    root.join("docker/registry/v2")
}

fn write_blob(root: &FsPath, data: &[u8]) -> String {
    let digest = DigestUtils::compute_docker_digest(data);
    let hex = &digest[7..];
    let dir = v2_root(root).join("blobs/sha256").join(&hex[..2]).join(hex);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("data"), data).unwrap();
    digest
}

fn write_link(path: PathBuf, digest: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, digest).unwrap();
}

fn repo_dir(root: &FsPath, name: &str) -> PathBuf {
    v2_root(root).join("repositories").join(name)
}

/// Store an image manifest (config + one layer) as a revision of `name`.
fn store_image(root: &FsPath, name: &str, layer: &[u8]) -> (String, Vec<u8>) {
    let config = format!(r#"{{"os":"linux","layer_len":{}}}"#, layer.len());
    let config_digest = write_blob(root, config.as_bytes());
    let layer_digest = write_blob(root, layer);
    for digest in [&config_digest, &layer_digest] {
        write_link(repo_dir(root, name).join("_layers/sha256").join(&digest[7..]).join("link"), digest);
    }

    let manifest = serde_json::to_vec(&serde_json::json!({
        "schemaVersion": 2,
        "mediaType": OCI_MANIFEST,
        "config": {"mediaType": "application/vnd.oci.image.config.v1+json", "digest": config_digest, "size": config.len()},
        "layers": [{"mediaType": "application/vnd.oci.image.layer.v1.tar+gzip", "digest": layer_digest, "size": layer.len()}]
    }))
    .unwrap();
    let digest = write_blob(root, &manifest);
    write_link(
        repo_dir(root, name).join("_manifests/revisions/sha256").join(&digest[7..]).join("link"),
        &digest,
    );
    (digest, manifest)
}

fn tag(root: &FsPath, name: &str, tag: &str, digest: &str) {
    write_link(repo_dir(root, name).join("_manifests/tags").join(tag).join("current/link"), digest);
}

/// `app:v1` (single image) and `multi:latest` (amd64 + arm64 index).
/// Returns the digests of app:v1 and of the arm64 child.
fn populate(root: &FsPath) -> (String, String) {
    let (app, _) = store_image(root, "app", b"app layer");
    tag(root, "app", "v1", &app);

    let (amd64, amd64_bytes) = store_image(root, "multi", b"amd64 layer");
    let (arm64, arm64_bytes) = store_image(root, "multi", b"arm64 layer");
    let index = serde_json::to_vec(&serde_json::json!({
        "schemaVersion": 2,
        "mediaType": OCI_INDEX,
        "manifests": [
            {"mediaType": OCI_MANIFEST, "digest": amd64, "size": amd64_bytes.len(),
             "platform": {"os": "linux", "architecture": "amd64"}},
            {"mediaType": OCI_MANIFEST, "digest": arm64, "size": arm64_bytes.len(),
             "platform": {"os": "linux", "architecture": "arm64"}}
        ]
    }))
    .unwrap();
    let index_digest = write_blob(root, &index);
    write_link(
        repo_dir(root, "multi").join("_manifests/revisions/sha256").join(&index_digest[7..]).join("link"),
        &index_digest,
    );
    tag(root, "multi", "latest", &index_digest);

    (app, arm64)
}

// ---------------------------------------------------------------------------
// writable destination

#[derive(Default)]
struct Destination {
    credentials: Option<(String, String)>,
    blobs: HashMap<String, Vec<u8>>,
    manifests: HashMap<(String, String), (String, Vec<u8>)>,
    uploads: usize,
}

type Shared = Arc<Mutex<Destination>>;

fn authorized(dest: &Destination, headers: &HeaderMap) -> bool {
    let Some((user, pass)) = &dest.credentials else {
        return true;
    };
    let expected = reqwest::Client::new()
        .get("http://unused/")
        .basic_auth(user, Some(pass))
        .build()
        .unwrap();
    headers.get(header::AUTHORIZATION) == expected.headers().get(header::AUTHORIZATION)
}

fn challenge() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, r#"Basic realm="test""#)],
    )
        .into_response()
}

async fn dest_root(State(dest): State<Shared>, headers: HeaderMap) -> Response {
    if !authorized(&dest.lock().unwrap(), &headers) {
        return challenge();
    }
    StatusCode::OK.into_response()
}

async fn dest_dispatch(
    State(dest): State<Shared>,
    method: Method,
    Path(path): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut dest = dest.lock().unwrap();
    if !authorized(&dest, &headers) {
        return challenge();
    }
    let path = path.trim_start_matches('/');

    if method == Method::POST {
        if let Some(name) = path.trim_end_matches('/').strip_suffix("/blobs/uploads") {
            dest.uploads += 1;
            let location = format!("/v2/{}/blobs/uploads/{}", name, dest.uploads);
            return (StatusCode::ACCEPTED, [(header::LOCATION, location)]).into_response();
        }
    }
    if method == Method::PUT && path.contains("/blobs/uploads/") {
        let Some(digest) = query.get("digest") else {
            return StatusCode::BAD_REQUEST.into_response();
        };
        if DigestUtils::verify_data_integrity(&body, digest).is_err() {
            return (StatusCode::BAD_REQUEST, "DIGEST_INVALID").into_response();
        }
        dest.blobs.insert(digest.clone(), body.to_vec());
        return StatusCode::CREATED.into_response();
    }
    if let Some((_, digest)) = path.rsplit_once("/blobs/") {
        return if dest.blobs.contains_key(digest) {
            StatusCode::OK.into_response()
        } else {
            StatusCode::NOT_FOUND.into_response()
        };
    }
    if let Some((name, reference)) = path.rsplit_once("/manifests/") {
        if method == Method::PUT {
            let media_type = headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            dest.manifests
                .insert((name.to_string(), reference.to_string()), (media_type, body.to_vec()));
            return StatusCode::CREATED.into_response();
        }
    }
    StatusCode::NOT_FOUND.into_response()
}

async fn start_destination(credentials: Option<(&str, &str)>) -> (String, Shared) {
    let state: Shared = Arc::new(Mutex::new(Destination {
        credentials: credentials.map(|(u, p)| (u.to_string(), p.to_string())),
        ..Default::default()
    }));
    let app = Router::new()
        .route("/v2/", get(dest_root))
        .route("/v2/*path", any(dest_dispatch))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr.to_string(), state)
}

fn bundle_with_images(dir: &TempDir) -> (ImageBundle, String, String) {
    let mount = dir.path().join("bundle");
    let root = mount.join("registry");
    std::fs::create_dir_all(&root).unwrap();
    let (app, arm64) = populate(&root);
    (ImageBundle::new("bundle", mount), app, arm64)
}

fn config(username: &str, password: &str) -> SyncConfig {
    let mut config = SyncConfig::default();
    config.credentials.username_override = Some(username.to_string());
    config.credentials.password_override = Some(password.to_string());
    config.system.os_choice = Some("linux".to_string());
    config.system.architecture_choice = Some("arm64".to_string());
    config
}

// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_sync_copies_bundle_to_destination() {
    let dir = TempDir::new().unwrap();
    let (bundle, app_digest, arm64_digest) = bundle_with_images(&dir);
    let (host, dest) = start_destination(Some(("mirror", "s3cret"))).await;

    let report = Syncer::with_http_transport(vec![bundle], config("mirror", "s3cret"))
        .unwrap()
        .sync(&[host], &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.images_copied(), 2);

    let dest = dest.lock().unwrap();
    let (media_type, app) = &dest.manifests[&("app".to_string(), "v1".to_string())];
    assert_eq!(media_type, OCI_MANIFEST);
    assert_eq!(DigestUtils::compute_docker_digest(app), app_digest);

    // the index was resolved to the arm64 image only
    let (_, multi) = &dest.manifests[&("multi".to_string(), "latest".to_string())];
    assert_eq!(DigestUtils::compute_docker_digest(multi), arm64_digest);
    assert!(dest.blobs.contains_key(&DigestUtils::compute_docker_digest(b"arm64 layer")));
    assert!(!dest.blobs.contains_key(&DigestUtils::compute_docker_digest(b"amd64 layer")));
}

#[tokio::test]
async fn test_second_sync_skips_existing_blobs() {
    let dir = TempDir::new().unwrap();
    let (bundle, _, _) = bundle_with_images(&dir);
    let (host, dest) = start_destination(None).await;
    let hosts = [host];

    for _ in 0..2 {
        Syncer::with_http_transport(vec![bundle.clone()], config("u", "p"))
            .unwrap()
            .sync(&hosts, &CancellationToken::new())
            .await
            .unwrap();
    }

    // two images, two blobs each, uploaded once
    assert_eq!(dest.lock().unwrap().uploads, 4);
}

#[tokio::test]
async fn test_wrong_password_is_login_error() {
    let dir = TempDir::new().unwrap();
    let (bundle, _, _) = bundle_with_images(&dir);
    let (host, dest) = start_destination(Some(("mirror", "s3cret"))).await;

    let err = Syncer::with_http_transport(vec![bundle], config("mirror", "wrong"))
        .unwrap()
        .sync(&[host], &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Login { .. }), "{err:?}");
    assert!(dest.lock().unwrap().manifests.is_empty());
}

#[tokio::test]
async fn test_discovery_over_http() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("registry");
    std::fs::create_dir_all(&root).unwrap();
    populate(&root);

    let serving = EphemeralRegistry::bind("a", ServerConfig::with_root(&root))
        .await
        .unwrap()
        .serve();
    let source = resolve_registry_address("127.0.0.1", Some(&serving.local_addr().to_string())).unwrap();

    let sys = SystemContext::default();
    let transport = HttpTransport::new(&sys).unwrap();
    let images = discover(&transport, &sys, &source, &CancellationToken::new())
        .await
        .unwrap();
    let names: Vec<String> = images.iter().map(|i| i.to_string()).collect();
    assert_eq!(
        names,
        [format!("{}/app:v1", source), format!("{}/multi:latest", source)]
    );

    // catalog pages are followed up to the limit
    let first = transport.search(&sys, &source, 1).await.unwrap();
    assert_eq!(first, ["app"]);

    serving.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_server_routes() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("registry");
    std::fs::create_dir_all(&root).unwrap();
    let (app_digest, _) = populate(&root);

    let serving = EphemeralRegistry::bind("a", ServerConfig::with_root(&root))
        .await
        .unwrap()
        .serve();
    let base = format!("http://{}", serving.local_addr());
    let client = reqwest::Client::new();

    let root_resp = client.get(format!("{}/v2/", base)).send().await.unwrap();
    assert_eq!(root_resp.status(), 200);
    assert_eq!(
        root_resp.headers()["docker-distribution-api-version"],
        "registry/2.0"
    );

    let page = client
        .get(format!("{}/v2/_catalog?n=1", base))
        .send()
        .await
        .unwrap();
    assert!(page.headers()[header::LINK]
        .to_str()
        .unwrap()
        .contains("last=app"));

    let head = client
        .head(format!("{}/v2/app/manifests/v1", base))
        .send()
        .await
        .unwrap();
    assert_eq!(head.status(), 200);
    assert_eq!(head.headers()["docker-content-digest"], app_digest.as_str());
    assert_eq!(head.headers()[header::CONTENT_TYPE], OCI_MANIFEST);

    let unknown: serde_json::Value = client
        .get(format!("{}/v2/nope/tags/list", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(unknown["errors"][0]["code"], "NAME_UNKNOWN");

    // blobs of another repository are not served
    let foreign = DigestUtils::compute_docker_digest(b"arm64 layer");
    let resp = client
        .get(format!("{}/v2/app/blobs/{}", base, foreign))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let write = client
        .put(format!("{}/v2/app/manifests/v2", base))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(write.status(), 405);

    serving.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_login_against_basic_auth_registry() {
    let (host, _) = start_destination(Some(("mirror", "s3cret"))).await;
    let sys = SystemContext::default();
    let transport = HttpTransport::new(&sys).unwrap();
    let registry = resolve_registry_address(&host, None).unwrap();

    transport
        .login(&sys, &registry, &Credentials::new("mirror", "s3cret"))
        .await
        .unwrap();
    let other = HttpTransport::new(&sys).unwrap();
    assert!(other
        .login(&sys, &registry, &Credentials::new("mirror", "nope"))
        .await
        .is_err());
}

#[tokio::test]
async fn test_copy_all_images_pushes_every_child_and_the_index() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("registry");
    std::fs::create_dir_all(&root).unwrap();
    let (_, arm64_digest) = populate(&root);

    let serving = EphemeralRegistry::bind("a", ServerConfig::with_root(&root))
        .await
        .unwrap()
        .serve();
    let (host, dest) = start_destination(None).await;

    let sys = Arc::new(SystemContext::default());
    let transport = HttpTransport::new(&sys).unwrap();
    let policy = default_policy_context(&sys).unwrap();
    let source = TaggedImageRef::parse(&format!("{}/multi:latest", serving.local_addr())).unwrap();
    let destination = TaggedImageRef::parse(&format!("{}/multi:latest", host)).unwrap();
    let options = CopyOptions {
        image_list_selection: ImageListSelection::CopyAllImages,
        ..CopyOptions::system_image(sys.clone())
    };

    let report = transport
        .copy_image(&policy, &destination, &source, &options)
        .await
        .unwrap();
    // both children carry the same config blob
    assert_eq!(report.blobs_copied, 3);
    assert_eq!(report.blobs_skipped, 1);

    let dest = dest.lock().unwrap();
    let (media_type, index) = &dest.manifests[&("multi".to_string(), "latest".to_string())];
    assert_eq!(media_type, OCI_INDEX);
    assert_eq!(DigestUtils::compute_docker_digest(index), report.manifest_digest);
    assert!(dest.manifests.contains_key(&("multi".to_string(), arm64_digest)));
    assert_eq!(dest.manifests.keys().filter(|(name, _)| name == "multi").count(), 3);
    for layer in [b"amd64 layer".as_slice(), b"arm64 layer".as_slice()] {
        assert!(dest.blobs.contains_key(&DigestUtils::compute_docker_digest(layer)));
    }
    drop(dest);

    policy.destroy();
    serving.shutdown().await.unwrap();
}
