//! Integration tests for the request broker.
//!
//! These tests run the real HTTP transport against a wiremock server and check
//! the outcome each response shape produces.

mod support;

use std::io::Write;
use std::time::Duration;

use modrepo_broker::broker::BrokerError;
use modrepo_broker::{
    AccountTier, AllowedErrors, Broker, DownloadGrant, FailureKind, Payload, RequestKind,
    RequestOptions, SubmitError, TransportErrorKind, UpdatePeriod,
};
use serde_json::json;
use support::{API_KEY, USER_ID, broker_for, config_for, credentials, registry};
use tempfile::TempDir;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FILES_PATH: &str = "/games/skyrimspecialedition/mods/100/files";

fn files_body() -> serde_json::Value {
    json!({
        "files": [{
            "file_id": 5,
            "name": "Main File",
            "version": "1.0",
            "category_id": 1,
            "file_name": "main-100-1-0.7z",
            "size": 2048
        }],
        "file_updates": []
    })
}

#[tokio::test]
async fn test_files_success_delivers_typed_payload() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(FILES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(files_body()))
        .expect(1)
        .mount(&server)
        .await;

    let broker = broker_for(&server.uri());
    let ticket = broker
        .request_files(
            "skyrimse",
            100,
            RequestOptions::new().with_user_data(json!({"row": 7})),
        )
        .unwrap();
    let outcome = ticket.outcome().await.unwrap();

    assert_eq!(outcome.kind, RequestKind::Files);
    assert_eq!(outcome.game.as_deref(), Some("skyrimse"));
    assert_eq!(outcome.mod_id, Some(100));
    assert_eq!(outcome.user_data, json!({"row": 7}));
    match outcome.result {
        Ok(Payload::Files(list)) => {
            assert_eq!(list.files.len(), 1);
            assert_eq!(list.files[0].file_id, 5);
            assert_eq!(list.files[0].version, "1.0");
        }
        other => panic!("expected files payload, got {other:?}"),
    }
}

#[tokio::test]
async fn test_request_carries_api_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/games/skyrimspecialedition/mods/100"))
        .and(header("apikey", API_KEY))
        .and(header("protocol-version", "1.0.0"))
        .and(header("content-type", "application/json"))
        .and(header("application-name", "modrepo"))
        .and(header("cache-control", "no-cache"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"mod_id": 100})))
        .expect(1)
        .mount(&server)
        .await;

    let broker = broker_for(&server.uri());
    let outcome = broker
        .request_mod_info("skyrimse", 100, RequestOptions::new().with_submodule("installer"))
        .unwrap()
        .outcome()
        .await
        .unwrap();

    assert_eq!(outcome.payload(), Some(&Payload::ModInfo(json!({"mod_id": 100}))));

    let requests = server.received_requests().await.unwrap();
    let user_agent = requests[0]
        .headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap();
    assert!(user_agent.starts_with("modrepo/"), "{user_agent}");
    assert!(user_agent.contains("module: installer"), "{user_agent}");
}

#[tokio::test]
async fn test_rate_limited_updates_stats() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(FILES_PATH))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("x-rl-daily-limit", "2500")
                .insert_header("x-rl-daily-remaining", "0")
                .insert_header("x-rl-hourly-limit", "100")
                .insert_header("x-rl-hourly-remaining", "0")
                .insert_header("x-rl-hourly-reset", "2026-10-18T12:00:00+00:00")
                .insert_header("retry-after", "120"),
        )
        .mount(&server)
        .await;

    let broker = broker_for(&server.uri());
    let outcome = broker
        .request_files("skyrimse", 100, RequestOptions::new())
        .unwrap()
        .outcome()
        .await
        .unwrap();

    let failure = outcome.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::RateLimited);
    assert_eq!(failure.status, 429);

    let limits = broker.stats().limits.unwrap();
    assert_eq!(limits.daily_limit, Some(2500));
    assert_eq!(limits.hourly_remaining, Some(0));
    assert_eq!(limits.hourly_reset.as_deref(), Some("2026-10-18T12:00:00+00:00"));
    assert_eq!(limits.retry_after, Some(Duration::from_secs(120)));
    assert!(limits.is_exhausted());
}

#[tokio::test]
async fn test_successful_response_records_limits() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(FILES_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-rl-daily-remaining", "2400")
                .insert_header("x-rl-hourly-remaining", "99")
                .set_body_json(files_body()),
        )
        .mount(&server)
        .await;

    let broker = broker_for(&server.uri());
    let mut watch = broker.watch_stats();
    broker
        .request_files("skyrimse", 100, RequestOptions::new())
        .unwrap()
        .outcome()
        .await
        .unwrap();

    let stats = watch.borrow_and_update().clone();
    let limits = stats.limits.unwrap();
    assert_eq!(limits.daily_remaining, Some(2400));
    assert_eq!(limits.hourly_remaining, Some(99));
    assert!(!limits.is_exhausted());
}

#[tokio::test]
async fn test_empty_body_uses_diagnostic_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/games/skyrimspecialedition/mods/1"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("NexusErrorInfo", "Mod is hidden"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/games/skyrimspecialedition/mods/2"))
        .respond_with(ResponseTemplate::new(200).set_body_string("null"))
        .mount(&server)
        .await;

    let broker = broker_for(&server.uri());
    let hidden = broker
        .request_description("skyrimse", 1, RequestOptions::new())
        .unwrap();
    let null = broker
        .request_description("skyrimse", 2, RequestOptions::new())
        .unwrap();

    let hidden = hidden.outcome().await.unwrap();
    let failure = hidden.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::Protocol);
    assert_eq!(failure.message, "Mod is hidden");
    assert_eq!(failure.status, 200);

    let null = null.outcome().await.unwrap();
    assert_eq!(null.failure().unwrap().message, "empty response");
}

#[tokio::test]
async fn test_non_json_body_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(FILES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let broker = broker_for(&server.uri());
    let outcome = broker
        .request_files("skyrimse", 100, RequestOptions::new())
        .unwrap()
        .outcome()
        .await
        .unwrap();

    let failure = outcome.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::Protocol);
    assert_eq!(failure.message, "invalid response");
}

#[tokio::test]
async fn test_md5_not_found_is_tolerated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(
            "/games/skyrimspecialedition/mods/md5_search/00ff10ab",
        ))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({"error": "File hash not found"})),
        )
        .mount(&server)
        .await;

    let broker = broker_for(&server.uri());
    let mut failures = broker.subscribe_failures();
    let outcome = broker
        .request_info_from_md5("skyrimse", &[0x00, 0xff, 0x10, 0xab], RequestOptions::new())
        .unwrap()
        .outcome()
        .await
        .unwrap();

    let failure = outcome.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::Tolerated);
    assert_eq!(failure.status, 404);

    let published = failures.recv().await.unwrap();
    assert_eq!(published.id, outcome.id);
}

#[tokio::test]
async fn test_generic_not_found_uses_error_field() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/games/skyrimspecialedition/mods/404"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({"error": "No Mod Found"})),
        )
        .mount(&server)
        .await;

    let broker = broker_for(&server.uri());
    let outcome = broker
        .request_mod_info("skyrimse", 404, RequestOptions::new())
        .unwrap()
        .outcome()
        .await
        .unwrap();

    let failure = outcome.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::Transport);
    assert_eq!(failure.status, 404);
    assert_eq!(failure.message, "No Mod Found");
}

#[tokio::test]
async fn test_caller_allowed_errors_are_tolerated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/games/skyrimspecialedition/mods/9/files/1"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let broker = broker_for(&server.uri());
    let options = RequestOptions::new().with_allowed_errors(
        AllowedErrors::new().allow(TransportErrorKind::ContentAccessDenied, 403),
    );
    let outcome = broker
        .request_file_info("skyrimse", 9, 1, options)
        .unwrap()
        .outcome()
        .await
        .unwrap();

    assert_eq!(outcome.failure().unwrap().kind, FailureKind::Tolerated);
    assert_eq!(outcome.file_id, Some(1));
}

#[tokio::test]
async fn test_moved_permanently_is_followed_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(FILES_PATH))
        .respond_with(
            ResponseTemplate::new(301).insert_header("Location", "/games/skyrimse-moved/mods/100/files"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/games/skyrimse-moved/mods/100/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(files_body()))
        .expect(1)
        .mount(&server)
        .await;

    let broker = broker_for(&server.uri());
    let mut events = broker.subscribe(RequestKind::Files);
    let outcome = broker
        .request_files("skyrimse", 100, RequestOptions::new())
        .unwrap()
        .outcome()
        .await
        .unwrap();

    assert!(outcome.is_success());
    // The redirect itself produced no event.
    assert_eq!(events.recv().await.unwrap().id, outcome.id);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_redirect_loop_fails_after_hop_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(FILES_PATH))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", FILES_PATH))
        .mount(&server)
        .await;

    let mut config = config_for(&server.uri());
    config.max_redirect_hops = 2;
    let broker = Broker::builder()
        .config(config)
        .registry(registry())
        .credentials(credentials(AccountTier::Regular))
        .build()
        .unwrap();

    let outcome = broker
        .request_files("skyrimse", 100, RequestOptions::new())
        .unwrap()
        .outcome()
        .await
        .unwrap();

    let failure = outcome.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::Protocol);
    assert_eq!(failure.status, 301);
    assert_eq!(failure.message, "redirect loop");
    // Original call plus two reroutes.
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_toggle_tracking_verbs_and_state() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/user/tracked_mods"))
        .and(query_param("domain_name", "skyrimspecialedition"))
        .and(body_json(json!({"mod_id": 100})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"message": "User 42 is now Tracking Mod: 100"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/user/tracked_mods"))
        .and(query_param("domain_name", "skyrimspecialedition"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"message": "User 42 is no longer tracking 100"})),
        )
        .mount(&server)
        .await;

    let broker = broker_for(&server.uri());
    let track = broker
        .request_toggle_tracking("skyrimse", 100, true, RequestOptions::new())
        .unwrap();
    let untrack = broker
        .request_toggle_tracking("skyrimse", 100, false, RequestOptions::new())
        .unwrap();

    assert_eq!(
        track.outcome().await.unwrap().result,
        Ok(Payload::TrackingToggled(true))
    );
    assert_eq!(
        untrack.outcome().await.unwrap().result,
        Ok(Payload::TrackingToggled(false))
    );
}

#[tokio::test]
async fn test_toggle_endorsement_posts_version() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/games/skyrimspecialedition/mods/100/abstain"))
        .and(body_json(json!({"Version": "2.1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "Abstained"})))
        .expect(1)
        .mount(&server)
        .await;

    let broker = broker_for(&server.uri());
    let outcome = broker
        .request_toggle_endorsement("skyrimse", 100, "2.1", false, RequestOptions::new())
        .unwrap()
        .outcome()
        .await
        .unwrap();

    assert_eq!(
        outcome.result,
        Ok(Payload::EndorsementToggled(json!({"status": "Abstained"})))
    );
}

#[tokio::test]
async fn test_update_info_sends_period() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/games/skyrimspecialedition/mods/updated"))
        .and(query_param("period", "1d"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"mod_id": 1}])))
        .expect(1)
        .mount(&server)
        .await;

    let broker = broker_for(&server.uri());
    let outcome = broker
        .request_update_info("skyrimse", UpdatePeriod::Day, RequestOptions::new())
        .unwrap()
        .outcome()
        .await
        .unwrap();

    assert_eq!(outcome.kind, RequestKind::CheckUpdates);
    assert!(outcome.is_success());
}

#[tokio::test]
async fn test_download_link_with_valid_grant() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(
            "/games/skyrimspecialedition/mods/100/files/5/download_link",
        ))
        .and(query_param("key", "abc"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{"name": "CDN", "URI": "https://cdn.example/x.7z"}])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let broker = broker_for(&server.uri());
    let grant = DownloadGrant {
        key: "abc".into(),
        expires: i64::MAX,
        user_id: USER_ID,
    };
    let outcome = broker
        .request_download_url("skyrimse", 100, 5, Some(grant), RequestOptions::new())
        .unwrap()
        .outcome()
        .await
        .unwrap();

    assert!(matches!(outcome.result, Ok(Payload::DownloadLinks(_))));
}

#[tokio::test]
async fn test_download_refused_without_grant() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(files_body()))
        .mount(&server)
        .await;

    let broker = broker_for(&server.uri());
    let refused = broker
        .request_download_url("skyrimse", 100, 5, None, RequestOptions::new())
        .unwrap();
    let later = broker
        .request_files("skyrimse", 100, RequestOptions::new())
        .unwrap();

    let refused_id = refused.id();
    match refused.outcome().await {
        Err(BrokerError::RequestDropped { id }) => assert_eq!(id, refused_id),
        other => panic!("expected dropped request, got {other:?}"),
    }
    // Admission continues past the refusal.
    assert!(later.outcome().await.unwrap().is_success());

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url.path(), FILES_PATH);
}

#[tokio::test]
async fn test_premium_download_needs_no_grant() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(
            "/games/skyrimspecialedition/mods/100/files/5/download_link",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let broker = Broker::builder()
        .config(config_for(&server.uri()))
        .registry(registry())
        .credentials(credentials(AccountTier::Premium))
        .build()
        .unwrap();
    let outcome = broker
        .request_download_url("skyrimse", 100, 5, None, RequestOptions::new())
        .unwrap()
        .outcome()
        .await
        .unwrap();

    assert!(outcome.is_success());
}

#[tokio::test]
async fn test_unknown_game_is_refused_at_submit() {
    let server = MockServer::start().await;
    let broker = broker_for(&server.uri());

    let err = broker
        .request_files("morrowind", 1, RequestOptions::new())
        .unwrap_err();
    assert_eq!(
        err,
        SubmitError::UnknownGame {
            name: "morrowind".into()
        }
    );
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_account_requests_need_no_game() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/user/endorsements"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/user/tracked_mods"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"mod_id": 3}])))
        .mount(&server)
        .await;

    let broker = broker_for(&server.uri());
    let endorsements = broker.request_endorsement_info(RequestOptions::new()).unwrap();
    let tracked = broker.request_tracking_info(RequestOptions::new()).unwrap();

    let endorsements = endorsements.outcome().await.unwrap();
    assert_eq!(endorsements.game, None);
    assert_eq!(endorsements.result, Ok(Payload::Endorsements(json!([]))));
    assert_eq!(
        tracked.outcome().await.unwrap().result,
        Ok(Payload::TrackedMods(json!([{"mod_id": 3}])))
    );
}

#[tokio::test]
async fn test_connection_refused_is_transport_failure() {
    // Bind then drop to get a port with nothing listening.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let broker = broker_for(&format!("http://127.0.0.1:{port}"));
    let outcome = broker
        .request_files("skyrimse", 100, RequestOptions::new())
        .unwrap()
        .outcome()
        .await
        .unwrap();

    let failure = outcome.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::Transport);
    assert_eq!(failure.status, 0);
}

#[tokio::test]
async fn test_clear_cache_empties_directory_and_cookie_file() {
    let dir = TempDir::new().unwrap();
    let cache_dir = dir.path().join("cache");
    let cookie_path = dir.path().join("cookies.txt");
    {
        let mut file = std::fs::File::create(&cookie_path).unwrap();
        writeln!(file, "# Netscape HTTP Cookie File").unwrap();
        writeln!(
            file,
            ".nexusmods.com\tTRUE\t/\tTRUE\t4102444800\tsid\tsecret-value"
        )
        .unwrap();
    }

    let server = MockServer::start().await;
    let jar = std::sync::Arc::new(
        modrepo_broker::auth::SessionCookieJar::from_file(&cookie_path).unwrap(),
    );
    let broker = Broker::builder()
        .config(config_for(&server.uri()))
        .registry(registry())
        .credentials(credentials(AccountTier::Regular))
        .cookie_jar(jar)
        .cache_dir(&cache_dir)
        .build()
        .unwrap();

    std::fs::write(cache_dir.join("files-100.json"), b"{}").unwrap();
    std::fs::create_dir(cache_dir.join("nested")).unwrap();

    broker.clear_cache().unwrap();

    assert!(cache_dir.is_dir());
    assert_eq!(std::fs::read_dir(&cache_dir).unwrap().count(), 0);
    assert!(!cookie_path.exists());
}

#[tokio::test]
async fn test_set_cache_directory_switches_target() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    let broker = broker_for(&server.uri());
    assert_eq!(broker.cache_directory(), None);

    let target = dir.path().join("a").join("b");
    broker.set_cache_directory(&target).unwrap();

    assert!(target.is_dir());
    assert_eq!(broker.cache_directory(), Some(target));
}
