use papers2zotero::gdrive::{DriveSettings, GoogleDriveClient};
use papers2zotero_core::contract::{CloudObject, CloudProvider};
use papers2zotero_core::error::CloudError;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn drive(server: &MockServer) -> GoogleDriveClient {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok", "expires_in": 3600
        })))
        .expect(1)
        .mount(server)
        .await;
    let settings = DriveSettings {
        client_id: "client".into(),
        client_secret: Some("shh".into()),
        refresh_token: "refresh-me".into(),
        token_uri: format!("{}/token", server.uri()),
    };
    GoogleDriveClient::with_api_base(settings, &server.uri())
}

fn child_query(parent: &str, name: &str) -> String {
    format!("'{parent}' in parents and name = '{name}' and trashed = false")
}

async fn mount_child(server: &MockServer, parent: &str, name: &str, files: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .and(query_param("q", child_query(parent, name).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "files": files })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn locate_walks_folders_and_reuses_the_token() {
    let server = MockServer::start().await;
    let drive = drive(&server).await;
    mount_child(&server, "root", "Zotero", json!([{ "id": "F1", "name": "Zotero" }])).await;
    mount_child(&server, "F1", "x.pdf", json!([{ "id": "X1", "name": "x.pdf" }])).await;
    mount_child(&server, "F1", "gone.pdf", json!([])).await;
    Mock::given(method("GET"))
        .and(path("/drive/v3/files/X1"))
        .and(header("Authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "X1", "name": "x.pdf", "webViewLink": "https://drive.example/X1"
        })))
        .mount(&server)
        .await;

    let found = drive.locate("/Zotero/x.pdf").await.expect("locate").expect("exists");
    assert_eq!(found, CloudObject { id: "X1".into(), name: "x.pdf".into(), path: "/Zotero/x.pdf".into() });
    assert!(drive.locate("/Zotero/gone.pdf").await.expect("locate").is_none());
    assert_eq!(
        drive.shareable_reference(&found).await.expect("link"),
        "https://drive.example/X1"
    );
}

#[tokio::test]
async fn move_creates_missing_folders_and_renames() {
    let server = MockServer::start().await;
    let drive = drive(&server).await;
    mount_child(&server, "root", "Zotero", json!([{ "id": "F1", "name": "Zotero" }])).await;
    mount_child(&server, "F1", "Book", json!([])).await;
    Mock::given(method("POST"))
        .and(path("/drive/v3/files"))
        .and(body_string_contains("application/vnd.google-apps.folder"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "B1", "name": "Book" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/drive/v3/files/SRC"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "SRC", "name": "a.pdf", "parents": ["P0"]
        })))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/drive/v3/files/SRC"))
        .and(query_param("addParents", "B1"))
        .and(query_param("removeParents", "P0"))
        .and(body_string_contains("Supplement-a.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "SRC", "name": "Supplement-a.pdf", "parents": ["B1"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let source = CloudObject { id: "SRC".into(), name: "a.pdf".into(), path: "/Papers2/a.pdf".into() };
    let moved = drive
        .move_to_folder(&source, "/Zotero/Book", "Supplement-a.pdf")
        .await
        .expect("move");
    assert_eq!(moved.path, "/Zotero/Book/Supplement-a.pdf");
    assert_eq!(moved.id, "SRC");
}

#[tokio::test]
async fn rejected_token_is_an_authentication_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
        .mount(&server)
        .await;
    let settings = DriveSettings {
        client_id: "client".into(),
        client_secret: None,
        refresh_token: "expired".into(),
        token_uri: format!("{}/token", server.uri()),
    };
    let drive = GoogleDriveClient::with_api_base(settings, &server.uri());

    let err = drive.locate("/Zotero").await.expect_err("token refresh fails");
    assert!(matches!(err, CloudError::Authentication(_)));
}

#[test]
fn settings_load_from_yaml() {
    let file = tempfile::NamedTempFile::new().expect("temp file");
    std::fs::write(
        file.path(),
        "client_id: abc.apps.googleusercontent.com\nclient_secret: shh\nrefresh_token: 1//xyz\n",
    )
    .expect("write settings");
    let settings = DriveSettings::load(file.path()).expect("load settings");
    assert_eq!(settings.refresh_token, "1//xyz");
    assert_eq!(settings.token_uri, papers2zotero::gdrive::DEFAULT_TOKEN_URI);
}
