/// End-to-end pipeline tests against an in-process release host.
///
/// Each test binds an axum server on 127.0.0.1:0 that answers like GitHub or
/// Forgejo and serves the archives referenced by `browser_download_url`.
#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use axum::extract::{Path as UrlPath, Query};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::{Json, Router};
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use serde_json::{json, Value};
    use tokio::net::TcpListener;

    use jorik_installer::elevate::Elevate;
    use jorik_installer::{Api, FetchError, FetchResult, HostKind, InstallTarget};

    const REPO: &str = "/repos/jorik-bot/jorik-cli";
    const LINUX: &str = "x86_64-unknown-linux-gnu";

    struct DecliningElevator;

    impl Elevate for DecliningElevator {
        async fn copy(&self, _src: &Path, dest: &Path) -> FetchResult<()> {
            Err(FetchError::Permission {
                path: dest.to_path_buf(),
                reason: "elevation was declined".into(),
            })
        }

        async fn remove(&self, path: &Path) -> FetchResult<()> {
            Err(FetchError::Permission {
                path: path.to_path_buf(),
                reason: "elevation was declined".into(),
            })
        }
    }

    fn tar_gz(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append_data(&mut header, name, data.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn jorik_script(version: &str) -> String {
        format!("#!/bin/sh\necho 'jorik {version}'\n")
    }

    /// A mock host: release JSON per route plus downloadable archives.
    struct MockHost {
        base: String,
        downloads: Arc<AtomicUsize>,
        auth: Arc<Mutex<Option<String>>>,
    }

    struct Fixture {
        latest: Option<Value>,
        /// Pages of the release list; later pages come back empty.
        list: Option<Vec<Value>>,
        tags: Vec<(String, Value)>,
        archives: Vec<(String, Vec<u8>)>,
        /// Downloads never send a response.
        stall_downloads: bool,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                latest: None,
                list: None,
                tags: Vec::new(),
                archives: Vec::new(),
                stall_downloads: false,
            }
        }
    }

    async fn start(build: impl FnOnce(&str) -> Fixture) -> MockHost {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let fixture = build(&base);

        let downloads = Arc::new(AtomicUsize::new(0));
        let auth = Arc::new(Mutex::new(None));

        let latest = fixture.latest.clone();
        let latest_auth = auth.clone();
        let list = fixture.list.clone();
        let tags = Arc::new(fixture.tags);
        let archives = Arc::new(fixture.archives);
        let counter = downloads.clone();
        let stall = fixture.stall_downloads;

        let router = Router::new()
            .route(
                &format!("{REPO}/releases/latest"),
                get(move |headers: HeaderMap| {
                    let latest = latest.clone();
                    let auth = latest_auth.clone();
                    async move {
                        *auth.lock().unwrap() = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_owned);
                        match latest {
                            Some(body) => Ok(Json(body)),
                            None => Err(StatusCode::NOT_FOUND),
                        }
                    }
                }),
            )
            .route(
                &format!("{REPO}/releases"),
                get(move |Query(query): Query<HashMap<String, String>>| {
                    let list = list.clone();
                    async move {
                        let pages = list.ok_or(StatusCode::NOT_FOUND)?;
                        let page: usize = query
                            .get("page")
                            .and_then(|p| p.parse().ok())
                            .unwrap_or(1);
                        let body = page
                            .checked_sub(1)
                            .and_then(|i| pages.get(i).cloned())
                            .unwrap_or_else(|| json!([]));
                        Ok::<_, StatusCode>(Json(body))
                    }
                }),
            )
            .route(
                &format!("{REPO}/releases/tags/{{tag}}"),
                get(move |UrlPath(tag): UrlPath<String>| {
                    let tags = tags.clone();
                    async move {
                        tags.iter()
                            .find(|(t, _)| *t == tag)
                            .map(|(_, body)| Json(body.clone()))
                            .ok_or(StatusCode::NOT_FOUND)
                    }
                }),
            )
            .route(
                "/download/{name}",
                get(move |UrlPath(name): UrlPath<String>| {
                    let archives = archives.clone();
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        if stall {
                            std::future::pending::<()>().await;
                        }
                        archives
                            .iter()
                            .find(|(n, _)| *n == name)
                            .map(|(_, bytes)| bytes.clone())
                            .ok_or(StatusCode::NOT_FOUND)
                    }
                }),
            );

        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        MockHost {
            base,
            downloads,
            auth,
        }
    }

    fn release(base: &str, tag: &str, names: &[&str]) -> Value {
        let assets: Vec<Value> = names
            .iter()
            .map(|n| json!({"name": n, "browser_download_url": format!("{base}/download/{n}")}))
            .collect();
        json!({"tag_name": tag, "prerelease": false, "assets": assets})
    }

    struct Dirs {
        scratch: tempfile::TempDir,
        state: tempfile::TempDir,
        dest: tempfile::TempDir,
    }

    impl Dirs {
        fn new() -> Self {
            Self {
                scratch: tempfile::tempdir().unwrap(),
                state: tempfile::tempdir().unwrap(),
                dest: tempfile::tempdir().unwrap(),
            }
        }

        fn api(&self, host: &MockHost, kind: HostKind) -> Api {
            Api::new()
                .set_host(kind)
                .set_api_url(&host.base)
                .no_progress()
                .set_scratch_dir(self.scratch.path())
                .set_state_dir(self.state.path())
                .set_modify_path(false)
        }

        fn target(&self) -> InstallTarget {
            InstallTarget::new(self.dest.path().join("bin").join("jorik"), "jorik").unwrap()
        }

        fn scratch_is_empty(&self) -> bool {
            std::fs::read_dir(self.scratch.path()).unwrap().count() == 0
        }
    }

    const LINUX_ASSET: &str = "jorik-x86_64-unknown-linux-gnu.tar.gz";

    #[tokio::test]
    async fn latest_release_installs_entry_point() {
        let archive = tar_gz(&[("jorik", &jorik_script("0.3.1")), ("LICENSE", "MIT")]);
        let host = start(|base| Fixture {
            latest: Some(release(
                base,
                "v0.3.1",
                &["jorik-aarch64-apple-darwin.tar.gz", LINUX_ASSET],
            )),
            archives: vec![(LINUX_ASSET.into(), archive.clone())],
            ..Fixture::new()
        })
        .await;
        let dirs = Dirs::new();
        let target = dirs.target();

        let report = dirs
            .api(&host, HostKind::Github)
            .repo("jorik-bot", "jorik-cli")
            .latest()
            .install(LINUX, &target)
            .await
            .expect("install");

        assert_eq!(report.tag, "v0.3.1");
        assert_eq!(report.asset, LINUX_ASSET);
        assert!(!report.outcome.elevated);
        assert_eq!(
            std::fs::read_to_string(&target.destination).unwrap(),
            jorik_script("0.3.1")
        );
        #[cfg(unix)]
        assert_eq!(report.outcome.reported_version.as_deref(), Some("jorik 0.3.1"));
        assert_eq!(host.downloads.load(Ordering::SeqCst), 1);
        assert!(dirs.scratch_is_empty());

        let receipt = dirs
            .api(&host, HostKind::Github)
            .installed()
            .unwrap()
            .expect("receipt");
        assert_eq!(receipt.tag, "v0.3.1");
        assert_eq!(receipt.repo, "jorik-bot/jorik-cli");
        assert_eq!(receipt.destination, target.destination);
    }

    #[tokio::test]
    async fn list_host_skips_release_without_matching_asset() {
        let host = start(|base| Fixture {
            list: Some(vec![json!([
                release(base, "v0.4.0-rc1", &["jorik-aarch64-apple-darwin.tar.gz"]),
                release(base, "v0.3.1", &[LINUX_ASSET]),
            ])]),
            archives: vec![(LINUX_ASSET.into(), tar_gz(&[("jorik", &jorik_script("0.3.1"))]))],
            ..Fixture::new()
        })
        .await;
        let dirs = Dirs::new();

        let report = dirs
            .api(&host, HostKind::Forgejo)
            .repo("jorik-bot", "jorik-cli")
            .latest()
            .install(LINUX, &dirs.target())
            .await
            .expect("install");

        assert_eq!(report.tag, "v0.3.1");
        assert_eq!(report.asset, LINUX_ASSET);
    }

    #[tokio::test]
    async fn list_host_reads_every_page() {
        let host = start(|base| Fixture {
            list: Some(vec![
                json!([
                    release(base, "v0.5.0", &["jorik-aarch64-apple-darwin.tar.gz"]),
                    release(base, "v0.4.0", &["jorik-aarch64-apple-darwin.tar.gz"]),
                ]),
                json!([release(base, "v0.2.0", &[LINUX_ASSET])]),
            ]),
            archives: vec![(LINUX_ASSET.into(), tar_gz(&[("jorik", &jorik_script("0.2.0"))]))],
            ..Fixture::new()
        })
        .await;
        let dirs = Dirs::new();

        let report = dirs
            .api(&host, HostKind::Forgejo)
            .repo("jorik-bot", "jorik-cli")
            .latest()
            .install(LINUX, &dirs.target())
            .await
            .expect("install");
        assert_eq!(report.tag, "v0.2.0");
    }

    #[tokio::test]
    async fn abandoned_run_removes_scratch_workspace() {
        let host = start(|base| Fixture {
            latest: Some(release(base, "v0.3.1", &[LINUX_ASSET])),
            stall_downloads: true,
            ..Fixture::new()
        })
        .await;
        let dirs = Dirs::new();
        let target = dirs.target();

        let run = dirs
            .api(&host, HostKind::Github)
            .repo("jorik-bot", "jorik-cli")
            .latest()
            .install(LINUX, &target);
        let timed_out = tokio::time::timeout(std::time::Duration::from_secs(2), run).await;

        assert!(timed_out.is_err());
        assert_eq!(host.downloads.load(Ordering::SeqCst), 1);
        assert!(dirs.scratch_is_empty());
        assert!(!target.destination.exists());
    }

    #[tokio::test]
    async fn explicit_tag_uses_tag_endpoint() {
        let host = start(|base| Fixture {
            tags: vec![("v0.2.0".into(), release(base, "v0.2.0", &[LINUX_ASSET]))],
            archives: vec![(LINUX_ASSET.into(), tar_gz(&[("jorik", &jorik_script("0.2.0"))]))],
            ..Fixture::new()
        })
        .await;
        let dirs = Dirs::new();

        let report = dirs
            .api(&host, HostKind::Forgejo)
            .repo("jorik-bot", "jorik-cli")
            .version("v0.2.0")
            .install(LINUX, &dirs.target())
            .await
            .expect("install");
        assert_eq!(report.tag, "v0.2.0");
    }

    #[tokio::test]
    async fn unknown_tag_is_resolution_error() {
        let host = start(|_| Fixture::new()).await;
        let dirs = Dirs::new();

        let err = dirs
            .api(&host, HostKind::Github)
            .repo("jorik-bot", "jorik-cli")
            .version("v9.9.9")
            .install(LINUX, &dirs.target())
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Resolution { .. }), "{err}");
        assert_eq!(err.exit_code(), 2);
        assert!(dirs.scratch_is_empty());
    }

    #[tokio::test]
    async fn malformed_body_is_resolution_error() {
        let host = start(|_| Fixture {
            latest: Some(json!({"message": "rate limited"})),
            ..Fixture::new()
        })
        .await;
        let dirs = Dirs::new();

        let err = dirs
            .api(&host, HostKind::Github)
            .repo("jorik-bot", "jorik-cli")
            .latest()
            .install(LINUX, &dirs.target())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Resolution { .. }), "{err}");
    }

    #[tokio::test]
    async fn no_matching_asset_skips_download() {
        let host = start(|base| Fixture {
            list: Some(vec![json!([
                release(base, "v0.3.1", &["jorik-aarch64-apple-darwin.tar.gz"]),
                release(base, "v0.3.0", &["jorik-x86_64-pc-windows-msvc.tar.gz"]),
            ])]),
            ..Fixture::new()
        })
        .await;
        let dirs = Dirs::new();
        let target = dirs.target();

        let err = dirs
            .api(&host, HostKind::Forgejo)
            .repo("jorik-bot", "jorik-cli")
            .latest()
            .install(LINUX, &target)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::NotFound { searched: 2, .. }), "{err}");
        assert_ne!(err.exit_code(), 0);
        assert_eq!(host.downloads.load(Ordering::SeqCst), 0);
        assert!(!target.destination.exists());
        assert!(dirs.scratch_is_empty());
    }

    #[tokio::test]
    async fn archive_without_entry_point_is_packaging_error() {
        let host = start(|base| Fixture {
            latest: Some(release(base, "v0.3.1", &[LINUX_ASSET])),
            archives: vec![(
                LINUX_ASSET.into(),
                tar_gz(&[("jorik-v0.3.1/jorik", &jorik_script("0.3.1"))]),
            )],
            ..Fixture::new()
        })
        .await;
        let dirs = Dirs::new();
        let target = dirs.target();

        let err = dirs
            .api(&host, HostKind::Github)
            .repo("jorik-bot", "jorik-cli")
            .latest()
            .install(LINUX, &target)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Packaging { .. }), "{err}");
        assert_eq!(err.exit_code(), 4);
        assert!(!target.destination.exists());
        assert!(dirs.scratch_is_empty());
    }

    #[tokio::test]
    async fn missing_download_is_download_error() {
        let host = start(|base| Fixture {
            latest: Some(release(base, "v0.3.1", &[LINUX_ASSET])),
            ..Fixture::new()
        })
        .await;
        let dirs = Dirs::new();

        let err = dirs
            .api(&host, HostKind::Github)
            .repo("jorik-bot", "jorik-cli")
            .latest()
            .install(LINUX, &dirs.target())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Download { .. }), "{err}");
        assert!(dirs.scratch_is_empty());
    }

    #[tokio::test]
    async fn reinstall_overwrites_previous_binary() {
        let host = start(|base| Fixture {
            tags: vec![
                ("v0.3.0".into(), release(base, "v0.3.0", &["old-x86_64-unknown-linux-gnu.tar.gz"])),
                ("v0.3.1".into(), release(base, "v0.3.1", &[LINUX_ASSET])),
            ],
            archives: vec![
                (
                    "old-x86_64-unknown-linux-gnu.tar.gz".into(),
                    tar_gz(&[("jorik", &jorik_script("0.3.0"))]),
                ),
                (LINUX_ASSET.into(), tar_gz(&[("jorik", &jorik_script("0.3.1"))])),
            ],
            ..Fixture::new()
        })
        .await;
        let dirs = Dirs::new();
        let target = dirs.target();

        for tag in ["v0.3.0", "v0.3.1"] {
            dirs.api(&host, HostKind::Github)
                .repo("jorik-bot", "jorik-cli")
                .version(tag)
                .install(LINUX, &target)
                .await
                .expect("install");
        }

        assert_eq!(
            std::fs::read_to_string(&target.destination).unwrap(),
            jorik_script("0.3.1")
        );
        let entries: Vec<PathBuf> = std::fs::read_dir(target.directory())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(entries, vec![target.destination.clone()]);

        let receipt = dirs.api(&host, HostKind::Github).installed().unwrap().unwrap();
        assert_eq!(receipt.tag, "v0.3.1");
    }

    #[tokio::test]
    async fn token_is_sent_as_bearer() {
        let host = start(|base| Fixture {
            latest: Some(release(base, "v0.3.1", &[LINUX_ASSET])),
            archives: vec![(LINUX_ASSET.into(), tar_gz(&[("jorik", &jorik_script("0.3.1"))]))],
            ..Fixture::new()
        })
        .await;
        let dirs = Dirs::new();

        dirs.api(&host, HostKind::Github)
            .set_token(Some("s3cret".into()))
            .repo("jorik-bot", "jorik-cli")
            .latest()
            .install(LINUX, &dirs.target())
            .await
            .expect("install");

        assert_eq!(host.auth.lock().unwrap().as_deref(), Some("Bearer s3cret"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn declined_elevation_fails_without_writing() {
        use std::os::unix::fs::PermissionsExt;

        let host = start(|base| Fixture {
            latest: Some(release(base, "v0.3.1", &[LINUX_ASSET])),
            archives: vec![(LINUX_ASSET.into(), tar_gz(&[("jorik", &jorik_script("0.3.1"))]))],
            ..Fixture::new()
        })
        .await;
        let dirs = Dirs::new();
        let locked = dirs.dest.path().join("locked");
        std::fs::create_dir(&locked).unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o555)).unwrap();

        // Root ignores directory permissions; nothing to observe then.
        if std::fs::write(locked.join("probe"), b"").is_ok() {
            return;
        }

        let target = InstallTarget::new(locked.join("jorik"), "jorik").unwrap();
        let err = dirs
            .api(&host, HostKind::Github)
            .repo("jorik-bot", "jorik-cli")
            .latest()
            .install_with(LINUX, &target, DecliningElevator)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Permission { .. }), "{err}");
        assert_eq!(err.exit_code(), 5);
        assert!(!target.destination.exists());
        assert!(dirs.scratch_is_empty());
        assert!(dirs.api(&host, HostKind::Github).installed().unwrap().is_none());

        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[tokio::test]
    async fn uninstall_removes_binary_and_receipt() {
        let host = start(|base| Fixture {
            latest: Some(release(base, "v0.3.1", &[LINUX_ASSET])),
            archives: vec![(LINUX_ASSET.into(), tar_gz(&[("jorik", &jorik_script("0.3.1"))]))],
            ..Fixture::new()
        })
        .await;
        let dirs = Dirs::new();
        let target = dirs.target();

        dirs.api(&host, HostKind::Github)
            .repo("jorik-bot", "jorik-cli")
            .latest()
            .install(LINUX, &target)
            .await
            .expect("install");

        let api = dirs.api(&host, HostKind::Github);
        let receipt = api.uninstall_with(DecliningElevator).await.expect("uninstall");
        assert_eq!(receipt.destination, target.destination);
        assert!(!target.destination.exists());
        assert!(api.installed().unwrap().is_none());

        let err = api.uninstall_with(DecliningElevator).await.unwrap_err();
        assert!(matches!(err, FetchError::State(_)), "{err}");
    }
}
