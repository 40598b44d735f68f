use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::*;
use crate::cache::memory::Backend;
use crate::identity::{NewUser, UserColumn};
use crate::source::ldap::fake::{entry, FakeDirectory};
use crate::source::pam::MockPamStack;
use crate::store::{MemoryStore, UserStore};

const SECRET_KEY: &str = "test-secret-key";
const ALICE_DN: &str = "uid=alice,ou=people,dc=example,dc=org";

fn ldap_config() -> ldap::Config {
    ldap::Config {
        host: "ldap.example.org".to_string(),
        bind_dn: "cn=reader,dc=example,dc=org".to_string(),
        bind_password: "reader-pw".into(),
        user_base: "ou=people,dc=example,dc=org".to_string(),
        filter: "(uid=%s)".to_string(),
        attribute_username: "uid".to_string(),
        attribute_mail: "mail".to_string(),
        ..ldap::Config::default()
    }
}

fn directory() -> FakeDirectory {
    let alice = entry(ALICE_DN, &[("uid", "alice"), ("mail", "alice@example.org")]);
    FakeDirectory::default()
        .with_password("cn=reader,dc=example,dc=org", "reader-pw")
        .with_password(ALICE_DN, "wonderland")
        .with_search("ou=people,dc=example,dc=org", "(uid=alice)", vec![alice.clone()])
        .with_search("ou=people,dc=example,dc=org", "(uid=*)", vec![alice.clone()])
        .with_search(ALICE_DN, "(uid=alice)", vec![alice])
}

fn sources(store: &Arc<MemoryStore>) -> Sources {
    let registry =
        oauth2::Registry::new(Arc::new(Backend::new()), "https://forge.example.com/user/oauth2")
            .unwrap();
    Sources::new(
        Stores::memory(store.clone()),
        SecretBox::new(SECRET_KEY),
        Arc::new(registry),
    )
    .with_ldap_connector(Arc::new(directory()))
}

async fn local_user(store: &Arc<MemoryStore>, name: &str, password: &str) -> User {
    store
        .create_user(NewUser {
            name: name.to_string(),
            email: format!("{name}@example.org"),
            passwd: db::hash_password(password).unwrap(),
            login_type: SourceType::Plain,
            is_active: true,
            ..NewUser::default()
        })
        .await
        .unwrap()
}

#[test]
fn test_bind_password_is_encrypted_at_rest() {
    let secret_box = SecretBox::new(SECRET_KEY);
    let config = SourceConfig::Ldap(ldap_config());

    let bytes = config.to_db(&secret_box).unwrap();
    let stored = String::from_utf8(bytes.clone()).unwrap();
    assert!(!stored.contains("reader-pw"));
    assert!(stored.contains("bind_password_encrypt"));

    let SourceConfig::Ldap(restored) =
        SourceConfig::from_db(SourceType::Ldap, &bytes, &secret_box).unwrap()
    else {
        panic!("expected an LDAP configuration");
    };
    assert_eq!(restored.bind_password.expose(), "reader-pw");

    let other_box = SecretBox::new("another-key");
    assert!(SourceConfig::from_db(SourceType::Ldap, &bytes, &other_box).is_err());
}

#[test]
fn test_source_type_capabilities() {
    assert_eq!(SourceType::Ldap.as_i32(), 2);
    assert_eq!(SourceType::Sspi.as_i32(), 7);
    assert!(SourceType::Pam.accepts_password());
    assert!(!SourceType::OAuth2.accepts_password());
    assert!(SourceType::DLdap.supports_sync());
    assert!(!SourceType::Smtp.supports_sync());
}

#[tokio::test]
async fn test_create_checks_kind_and_name() {
    let store = Arc::new(MemoryStore::new());
    let sources = sources(&store);

    let mismatched = Source::new("corp", SourceType::Smtp, SourceConfig::Ldap(ldap_config()));
    assert!(matches!(
        sources.create(mismatched).await,
        Err(Error::Configuration(_))
    ));

    let mut smtp = Source::new(
        "mail",
        SourceType::Smtp,
        SourceConfig::Smtp(smtp::Config::default()),
    );
    smtp.is_sync_enabled = true;
    let created = sources.create(smtp.clone()).await.unwrap();
    assert!(created.id > 0);
    assert!(!created.is_sync_enabled);

    assert_eq!(
        sources.create(smtp).await.unwrap_err(),
        Error::AlreadyExists("mail".to_string())
    );
}

#[tokio::test]
async fn test_failed_oauth2_registration_removes_the_row() {
    let store = Arc::new(MemoryStore::new());
    let sources = sources(&store);

    let source = Source::new(
        "cloud",
        SourceType::OAuth2,
        SourceConfig::OAuth2(oauth2::Config {
            provider: "nextcloud".to_string(),
            client_id: "id".to_string(),
            ..oauth2::Config::default()
        }),
    );
    assert!(sources.create(source).await.is_err());
    assert!(sources.list().await.unwrap().is_empty());
    assert!(sources.oauth2().names().await.is_empty());
}

#[tokio::test]
async fn test_delete_refused_while_in_use() {
    let store = Arc::new(MemoryStore::new());
    let sources = sources(&store);
    let source = sources
        .create(Source::new(
            "corp",
            SourceType::Ldap,
            SourceConfig::Ldap(ldap_config()),
        ))
        .await
        .unwrap();

    let user = sources
        .sign_in("alice", "wonderland", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(user.login_source, source.id);
    assert_eq!(sources.delete(source.id).await, Err(Error::InUse(source.id)));

    let unused = sources
        .create(Source::new(
            "spare",
            SourceType::Pam,
            SourceConfig::Pam(pam::Config::default()),
        ))
        .await
        .unwrap();
    sources.delete(unused.id).await.unwrap();
    assert_eq!(
        sources.get(unused.id).await.unwrap_err(),
        Error::SourceNotFound(unused.id)
    );
}

#[tokio::test]
async fn test_sign_in_local_user() {
    let store = Arc::new(MemoryStore::new());
    let sources = sources(&store);
    let cancel = CancellationToken::new();
    local_user(&store, "bob", "correct horse").await;

    assert_eq!(
        sources.sign_in("bob", "correct horse", &cancel).await.unwrap().name,
        "bob"
    );
    assert_eq!(
        sources
            .sign_in("BOB@example.org", "correct horse", &cancel)
            .await
            .unwrap()
            .name,
        "bob"
    );
    assert_eq!(
        sources.sign_in("bob", "battery", &cancel).await.unwrap_err(),
        Error::UserNotFound("bob".to_string())
    );
    assert_eq!(
        sources.sign_in("nobody", "x", &cancel).await.unwrap_err(),
        Error::UserNotFound("nobody".to_string())
    );
}

#[tokio::test]
async fn test_sign_in_refuses_prohibited_and_inactive_users() {
    let store = Arc::new(MemoryStore::new());
    let sources = sources(&store);
    let cancel = CancellationToken::new();

    let mut user = local_user(&store, "carol", "pw").await;
    user.prohibit_login = true;
    store
        .update_user_columns(&user, &[UserColumn::ProhibitLogin])
        .await
        .unwrap();
    assert_eq!(
        sources.sign_in("carol", "pw", &cancel).await.unwrap_err(),
        Error::ProhibitLogin("carol".to_string())
    );

    let mut user = local_user(&store, "dave", "pw").await;
    user.is_active = false;
    store
        .update_user_columns(&user, &[UserColumn::IsActive])
        .await
        .unwrap();
    assert!(matches!(
        sources.sign_in("dave", "pw", &cancel).await,
        Err(Error::ProhibitLogin(_))
    ));
}

#[tokio::test]
async fn test_unknown_user_tries_password_sources_in_order() {
    let store = Arc::new(MemoryStore::new());
    let mut stack = MockPamStack::new();
    stack
        .expect_authenticate()
        .returning(|_, _, _| Err("Authentication failure".to_string()));
    let sources = sources(&store).with_pam_stack(Arc::new(stack));
    let cancel = CancellationToken::new();

    sources
        .create(Source::new(
            "pam",
            SourceType::Pam,
            SourceConfig::Pam(pam::Config::default()),
        ))
        .await
        .unwrap();
    let ldap = sources
        .create(Source::new(
            "corp",
            SourceType::Ldap,
            SourceConfig::Ldap(ldap_config()),
        ))
        .await
        .unwrap();

    let user = sources.sign_in("alice", "wonderland", &cancel).await.unwrap();
    assert_eq!(user.login_type, SourceType::Ldap);
    assert_eq!(user.login_source, ldap.id);
    assert_eq!(user.email, "alice@example.org");

    // Now bound to the LDAP source, the same login goes straight there.
    let again = sources.sign_in("alice", "wonderland", &cancel).await.unwrap();
    assert_eq!(again.id, user.id);
    assert_eq!(
        sources.sign_in("alice", "nope", &cancel).await.unwrap_err(),
        Error::UserNotFound("alice".to_string())
    );
}

#[tokio::test]
async fn test_inactive_source_is_refused() {
    let store = Arc::new(MemoryStore::new());
    let sources = sources(&store);
    let mut source = Source::new("corp", SourceType::Ldap, SourceConfig::Ldap(ldap_config()));
    source.is_active = false;

    let error = sources
        .external_login(None, "alice", "wonderland", &source, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(error, Error::SourceNotActive("corp".to_string()));
}

#[tokio::test]
async fn test_cancelled_sign_in() {
    let store = Arc::new(MemoryStore::new());
    let sources = sources(&store);
    sources
        .create(Source::new(
            "corp",
            SourceType::Ldap,
            SourceConfig::Ldap(ldap_config()),
        ))
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    assert_eq!(
        sources.sign_in("alice", "wonderland", &cancel).await.unwrap_err(),
        Error::Cancelled
    );
}

#[tokio::test]
async fn test_synchronize_runs_enabled_sources() {
    let store = Arc::new(MemoryStore::new());
    let sources = sources(&store);
    let mut source = Source::new("corp", SourceType::Ldap, SourceConfig::Ldap(ldap_config()));
    source.is_sync_enabled = true;
    let source = sources.create(source).await.unwrap();

    sources.synchronize(&CancellationToken::new()).await.unwrap();

    let users = store.list_users_by_source(source.id).await.unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].name, "alice");
}

#[tokio::test]
async fn test_skip_local_two_fa_follows_the_user_source() {
    let store = Arc::new(MemoryStore::new());
    let sources = sources(&store);
    let cancel = CancellationToken::new();

    sources
        .create(Source::new(
            "corp",
            SourceType::Ldap,
            SourceConfig::Ldap(ldap::Config {
                skip_local_two_fa: true,
                ..ldap_config()
            }),
        ))
        .await
        .unwrap();

    let alice = sources.sign_in("alice", "wonderland", &cancel).await.unwrap();
    assert!(sources.skips_local_two_fa(&alice).await);

    let bob = local_user(&store, "bob", "builder").await;
    assert!(!sources.skips_local_two_fa(&bob).await);
}

#[tokio::test]
async fn test_unknown_user_during_outage_is_unavailable() {
    let store = Arc::new(MemoryStore::new());
    let registry =
        oauth2::Registry::new(Arc::new(Backend::new()), "https://forge.example.com/user/oauth2")
            .unwrap();
    let mut stack = MockPamStack::new();
    stack
        .expect_authenticate()
        .returning(|_, _, _| Err("Authentication failure".to_string()));
    let sources = Sources::new(
        Stores::memory(store.clone()),
        SecretBox::new(SECRET_KEY),
        Arc::new(registry),
    )
    .with_ldap_connector(Arc::new(FakeDirectory::default().unavailable()))
    .with_pam_stack(Arc::new(stack));
    let cancel = CancellationToken::new();

    sources
        .create(Source::new(
            "corp",
            SourceType::Ldap,
            SourceConfig::Ldap(ldap_config()),
        ))
        .await
        .unwrap();
    assert!(matches!(
        sources.sign_in("alice", "wonderland", &cancel).await,
        Err(Error::Unavailable(_))
    ));

    // One backend answering is enough to report the login as unknown.
    sources
        .create(Source::new(
            "pam",
            SourceType::Pam,
            SourceConfig::Pam(pam::Config::default()),
        ))
        .await
        .unwrap();
    assert_eq!(
        sources.sign_in("alice", "wonderland", &cancel).await.unwrap_err(),
        Error::UserNotFound("alice".to_string())
    );
}
