mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use updater_engine::{
    extract_identity, ChannelEventSink, FetchSettings, HandlerRegistry, SessionStore, SweepPlan, SweepReport,
    WalkEvent, Walker,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{
    event_channel, item_status, multi_file_torrent, page_with_link, public_site,
    single_file_torrent, FakeHost, RecordingContext,
};

fn walker(host: Arc<FakeHost>, events: Arc<ChannelEventSink>) -> Walker {
    let mut registry = HandlerRegistry::new();
    registry.register_spec(public_site());
    Walker::new(
        Arc::new(registry),
        SessionStore::new(),
        host,
        events,
        FetchSettings::default(),
    )
}

fn plan(items: &[&str], forced: bool) -> SweepPlan {
    SweepPlan {
        items: items.iter().map(|id| id.to_string()).collect(),
        forced,
    }
}

async fn serve_release(server: &MockServer, page: &str, artifact: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(page.to_string()))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(page_with_link("/download/release.torrent"), "text/html; charset=utf-8"),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/download/release.torrent"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "visited=1; Path=/")
                .set_body_raw(artifact, "application/x-bittorrent"),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn changed_artifact_replaces_the_item() {
    updater_logging::initialize_for_tests();
    let server = MockServer::start().await;
    let old = multi_file_torrent("show", &[("e01.mkv", 10), ("e02.mkv", 20)], "v1");
    let new = multi_file_torrent("show", &[("e01.mkv", 10), ("e03.mkv", 30)], "v2");
    serve_release(&server, "/release/1", new.clone()).await;

    let reference = format!("{}/release/1", server.uri());
    let mut status = item_status("old", Some(&reference), &old);
    status.file_priorities = vec![0, 1];
    status
        .options
        .insert("save_path".to_string(), serde_json::json!("/downloads"));
    status
        .options
        .insert("total_uploaded".to_string(), serde_json::json!(512));
    let host = Arc::new(FakeHost::with_items(vec![status]));
    let (sink, rx) = event_channel();
    let context = RecordingContext::default();

    let report = walker(host.clone(), sink)
        .run(&plan(&["old"], false), &context)
        .await;

    assert_eq!(
        report,
        SweepReport {
            forced: false,
            productive: true,
            updated: 1,
            up_to_date: 0,
            skipped: 0,
            failed: 0,
        }
    );

    let created = host.created();
    assert_eq!(created.len(), 1);
    let (new_id, preferences) = &created[0];
    assert_eq!(preferences.file_priorities, vec![0, 1]);
    assert_eq!(
        preferences.options.get("download_location"),
        Some(&serde_json::json!("/downloads"))
    );
    assert!(preferences.dropped_fields.contains("total_uploaded"));
    assert_eq!(host.removed(), vec![("old".to_string(), false)]);
    assert!(!host.contains("old"));
    assert_eq!(
        context.replaced.lock().unwrap().clone(),
        vec![("old".to_string(), new_id.clone())]
    );

    let identity = extract_identity(&new).unwrap().content_hash;
    let events: Vec<WalkEvent> = rx.try_iter().collect();
    assert_eq!(
        events,
        vec![WalkEvent::ItemUpdated {
            old_item_id: "old".to_string(),
            new_item_id: new_id.clone(),
            identity,
        }]
    );

    let cookies = context.cookies.lock().unwrap().clone();
    assert_eq!(cookies.len(), 1);
    assert_eq!(cookies[0].0, common::MOCK_SITE);
    assert!(cookies[0].1.contains_key("visited"));
}

#[tokio::test]
async fn recreating_under_the_same_id_keeps_the_item() {
    let server = MockServer::start().await;
    let old = single_file_torrent("movie.mkv", 700, "v1");
    let new = single_file_torrent("movie.mkv", 700, "v2");
    serve_release(&server, "/release/3", new.clone()).await;

    let new_identity = extract_identity(&new).unwrap().content_hash;
    let item_id = new_identity.to_string();
    let reference = format!("{}/release/3", server.uri());
    let host = Arc::new(FakeHost::with_items(vec![item_status(
        &item_id,
        Some(&reference),
        &old,
    )]));
    host.use_identity_ids();
    let (sink, rx) = event_channel();
    let context = RecordingContext::default();

    let report = walker(host.clone(), sink)
        .run(&plan(&[item_id.as_str()], false), &context)
        .await;

    assert_eq!(report.updated, 1);
    assert_eq!(host.created().len(), 1);
    assert!(host.removed().is_empty());
    assert!(host.contains(&item_id));
    assert!(context.replaced.lock().unwrap().is_empty());
    assert_eq!(
        rx.try_recv().unwrap(),
        WalkEvent::ItemUpdated {
            old_item_id: item_id.clone(),
            new_item_id: item_id.clone(),
            identity: new_identity,
        }
    );
}

#[tokio::test]
async fn failed_creation_keeps_the_old_item() {
    let server = MockServer::start().await;
    let old = single_file_torrent("movie.mkv", 700, "v1");
    let new = single_file_torrent("movie.mkv", 700, "v2");
    serve_release(&server, "/release/2", new).await;

    let reference = format!("{}/release/2", server.uri());
    let host = Arc::new(FakeHost::with_items(vec![item_status(
        "old",
        Some(&reference),
        &old,
    )]));
    host.fail_creation();
    let (sink, rx) = event_channel();

    let report = walker(host.clone(), sink)
        .run(&plan(&["old"], false), &RecordingContext::default())
        .await;

    assert_eq!(report.failed, 1);
    assert_eq!(report.updated, 0);
    assert!(host.removed().is_empty());
    assert!(host.contains("old"));

    match rx.try_recv().unwrap() {
        WalkEvent::ItemError { item_id, message } => {
            assert_eq!(item_id, "old");
            assert!(message.contains("Unable to replace"), "{message}");
            assert!(message.contains("not enough disk space"), "{message}");
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn identical_artifact_is_up_to_date() {
    let server = MockServer::start().await;
    let torrent = single_file_torrent("album.flac", 300, "same");
    serve_release(&server, "/release/3", torrent.clone()).await;

    let reference = format!("{}/release/3", server.uri());
    let host = Arc::new(FakeHost::with_items(vec![item_status(
        "item",
        Some(&reference),
        &torrent,
    )]));
    let (sink, rx) = event_channel();

    let report = walker(host.clone(), sink)
        .run(&plan(&["item"], true), &RecordingContext::default())
        .await;

    assert_eq!(report.up_to_date, 1);
    assert!(report.forced);
    assert!(host.created().is_empty());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn unusable_items_are_skipped_without_making_the_sweep_productive() {
    let torrent = single_file_torrent("a", 1, "x");
    let host = Arc::new(FakeHost::with_items(vec![
        item_status("no-reference", None, &torrent),
        item_status("bad-reference", Some("magnet:?xt=urn:btih:abc"), &torrent),
    ]));
    let (sink, rx) = event_channel();

    let report = walker(host, sink)
        .run(
            &plan(&["vanished", "no-reference", "bad-reference"], false),
            &RecordingContext::default(),
        )
        .await;

    assert_eq!(report.skipped, 3);
    assert!(!report.productive);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn unknown_site_is_an_item_error() {
    let torrent = single_file_torrent("a", 1, "x");
    let host = Arc::new(FakeHost::with_items(vec![item_status(
        "item",
        Some("http://unknown.example/topic/1"),
        &torrent,
    )]));
    let (sink, rx) = event_channel();

    let report = walker(host, sink)
        .run(&plan(&["item"], false), &RecordingContext::default())
        .await;

    assert!(!report.productive);
    assert_eq!(report.failed, 1);
    assert_eq!(
        rx.try_recv().unwrap(),
        WalkEvent::ItemError {
            item_id: "item".to_string(),
            message: "Unable to find site handler for http://unknown.example/topic/1".to_string(),
        }
    );
}

#[tokio::test]
async fn one_failure_does_not_stop_the_sweep() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/release/empty"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>nothing here</p>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/release/broken"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page_with_link("/download/broken")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/download/broken"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>login first</html>"))
        .mount(&server)
        .await;
    let torrent = single_file_torrent("ok", 5, "same");
    serve_release(&server, "/release/ok", torrent.clone()).await;

    let uri = server.uri();
    let host = Arc::new(FakeHost::with_items(vec![
        item_status("empty", Some(&format!("{uri}/release/empty")), &torrent),
        item_status("broken", Some(&format!("{uri}/release/broken")), &torrent),
        item_status("ok", Some(&format!("{uri}/release/ok")), &torrent),
    ]));
    let (sink, rx) = event_channel();

    let report = walker(host, sink)
        .run(&plan(&["empty", "broken", "ok"], false), &RecordingContext::default())
        .await;

    assert_eq!(report.failed, 2);
    assert_eq!(report.up_to_date, 1);

    let messages: Vec<String> = rx
        .try_iter()
        .filter_map(|event| match event {
            WalkEvent::ItemError { message, .. } => Some(message),
            _ => None,
        })
        .collect();
    assert_eq!(messages.len(), 2);
    assert!(messages[0].contains("Cannot find download link"), "{}", messages[0]);
    assert!(messages[1].contains("not a valid torrent"), "{}", messages[1]);
}
