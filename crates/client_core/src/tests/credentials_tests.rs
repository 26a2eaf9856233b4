use super::*;
use shared::domain::Jid;

#[tokio::test]
async fn load_without_file_is_none() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = FileCredentialStore::new(root.path().join("session"));
    assert!(store.load().await.expect("load").is_none());
}

#[tokio::test]
async fn save_then_load_restores_material() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = FileCredentialStore::new(root.path().join("session"));

    let mut auth = AuthMaterial::new("secret-token");
    auth.me = Some(Jid::from("123:4@s.whatsapp.net"));
    auth.keys.insert("noise".to_string(), "abc".to_string());
    store.save(&auth).await.expect("save");

    let loaded = store.load().await.expect("load").expect("present");
    assert_eq!(loaded.token, "secret-token");
    assert_eq!(loaded.me, auth.me);
    assert_eq!(loaded.keys.get("noise").map(String::as_str), Some("abc"));
    assert!(!store.dir().join("creds.json.tmp").exists());
}

#[tokio::test]
async fn save_overwrites_previous_material() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = FileCredentialStore::new(root.path().join("session"));
    store.save(&AuthMaterial::new("old")).await.expect("save old");
    store.save(&AuthMaterial::new("new")).await.expect("save new");

    let loaded = store.load().await.expect("load").expect("present");
    assert_eq!(loaded.token, "new");
}

#[tokio::test]
async fn clear_removes_directory_and_is_repeatable() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = FileCredentialStore::new(root.path().join("session"));
    store.save(&AuthMaterial::new("t")).await.expect("save");

    store.clear().await.expect("clear");
    assert!(!store.dir().exists());
    store.clear().await.expect("second clear");
    assert!(store.load().await.expect("load").is_none());
}

#[tokio::test]
async fn corrupt_file_is_an_error() {
    let root = tempfile::tempdir().expect("tempdir");
    let dir = root.path().join("session");
    std::fs::create_dir_all(&dir).expect("dir");
    std::fs::write(dir.join("creds.json"), b"{not json").expect("write");

    let store = FileCredentialStore::new(dir);
    assert!(store.load().await.is_err());
}
