use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::fake::{entry, FakeDirectory};
use super::*;
use crate::identity::UserColumn;
use crate::source::SourceConfig;
use crate::store::memory::MemoryStore;
use crate::store::{self, UserStore};

const KEY_A: &str =
    "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIHaSw601QLuAPAILOu5mzYiHEjI06gxucUPArdc/9DHt";
const KEY_B: &str =
    "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAID/EzP50WHDiwNmfcfMP8GVsje3UHMHX09N2sNvmheLz";
const ALICE_DN: &str = "uid=alice,ou=people,dc=example,dc=org";

fn config() -> Config {
    Config {
        host: "ldap.example.org".to_string(),
        bind_dn: "cn=reader,dc=example,dc=org".to_string(),
        bind_password: "reader-pw".into(),
        user_base: "ou=people,dc=example,dc=org".to_string(),
        user_dn: "uid=%s,ou=people,dc=example,dc=org".to_string(),
        filter: "(uid=%s)".to_string(),
        attribute_username: "uid".to_string(),
        attribute_name: "givenName".to_string(),
        attribute_surname: "sn".to_string(),
        attribute_mail: "mail".to_string(),
        ..Config::default()
    }
}

fn source(kind: SourceType, config: &Config) -> Source {
    Source {
        id: 7,
        ..Source::new("corp", kind, SourceConfig::Ldap(config.clone()))
    }
}

fn alice() -> Entry {
    entry(
        ALICE_DN,
        &[
            ("uid", "alice"),
            ("givenName", "Alice"),
            ("sn", "Liddell"),
            ("mail", "alice@example.org"),
            ("sshPublicKey", KEY_A),
        ],
    )
}

fn directory() -> FakeDirectory {
    FakeDirectory::default()
        .with_password("cn=reader,dc=example,dc=org", "reader-pw")
        .with_password(ALICE_DN, "wonderland")
        .with_search("ou=people,dc=example,dc=org", "(uid=alice)", vec![alice()])
        .with_search(ALICE_DN, "(uid=alice)", vec![alice()])
}

#[tokio::test]
async fn test_search_then_bind() {
    let directory = directory();
    let result = search_entry(&directory, &config(), "alice", "wonderland", false)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(result.username, "alice");
    assert_eq!(result.full_name(), "Alice Liddell");
    assert_eq!(result.email(), "alice@example.org");
    assert!(!result.is_admin);
    assert_eq!(
        directory.binds(),
        vec!["cn=reader,dc=example,dc=org".to_string(), ALICE_DN.to_string()]
    );
    assert_eq!(directory.open_connections(), 0);
}

#[tokio::test]
async fn test_wrong_password_is_not_found() {
    let directory = directory();
    let result = search_entry(&directory, &config(), "alice", "looking-glass", false)
        .await
        .unwrap();
    assert!(result.is_none());
    assert_eq!(directory.open_connections(), 0);
}

#[tokio::test]
async fn test_empty_password_never_reaches_directory() {
    let directory = directory();
    let result = search_entry(&directory, &config(), "alice", "", false)
        .await
        .unwrap();
    assert!(result.is_none());
    assert!(directory.binds().is_empty());
}

#[tokio::test]
async fn test_filter_injection_rejected_without_binding() {
    let directory = directory();
    for login in ["*", "alice)(uid=*", "al\\ice"] {
        let result = search_entry(&directory, &config(), login, "wonderland", false)
            .await
            .unwrap();
        assert!(result.is_none(), "{login} was accepted");
    }
    assert!(directory.binds().is_empty());
}

#[tokio::test]
async fn test_direct_bind() {
    let directory = directory();
    let mut config = config();
    config.bind_dn.clear();

    let result = search_entry(&directory, &config, "alice", "wonderland", true)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.username, "alice");
    assert_eq!(directory.binds(), vec![ALICE_DN.to_string()]);

    let refused = search_entry(&directory, &config, "alice,ou=admins", "wonderland", true)
        .await
        .unwrap();
    assert!(refused.is_none());
}

#[tokio::test]
async fn test_admin_and_restricted_filters() {
    let directory = directory()
        .with_search(ALICE_DN, "(memberOf=cn=admins)", vec![alice()])
        .with_search(ALICE_DN, "(memberOf=cn=guests)", vec![alice()]);
    let mut config = config();
    config.admin_filter = "(memberOf=cn=admins)".to_string();
    config.restricted_filter = "(memberOf=cn=guests)".to_string();

    let result = search_entry(&directory, &config, "alice", "wonderland", false)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_admin);
    assert!(!result.is_restricted);
}

#[tokio::test]
async fn test_group_membership_gate() {
    let mut config = config();
    config.group_dn = "ou=groups,dc=example,dc=org".to_string();
    config.group_filter = "(cn=developers)".to_string();
    config.group_member_uid = "memberUid".to_string();
    config.user_uid = "uid".to_string();

    let outsider = search_entry(&directory(), &config, "alice", "wonderland", false)
        .await
        .unwrap();
    assert!(outsider.is_none());

    let directory = directory().with_search(
        "ou=groups,dc=example,dc=org",
        "(&(cn=developers)(memberUid=alice))",
        vec![entry("cn=developers,ou=groups,dc=example,dc=org", &[])],
    );
    let member = search_entry(&directory, &config, "alice", "wonderland", false)
        .await
        .unwrap();
    assert!(member.is_some());
}

#[tokio::test]
async fn test_refused_service_account_is_unavailable() {
    let mut config = config();
    config.bind_password = "stale".into();

    let directory = directory();
    let error = search_entry(&directory, &config, "alice", "wonderland", false)
        .await
        .unwrap_err();
    assert!(matches!(error, Error::Unavailable(_)));
    assert_eq!(directory.open_connections(), 0);
}

#[tokio::test]
async fn test_unreachable_directory() {
    let directory = FakeDirectory::default().unavailable();
    let error = search_entry(&directory, &config(), "alice", "wonderland", false)
        .await
        .unwrap_err();
    assert!(matches!(error, Error::Unavailable(_)));
}

#[tokio::test]
async fn test_login_creates_user_with_keys() {
    let store = Arc::new(MemoryStore::new());
    let stores = Stores::memory(store);
    let mut config = config();
    config.attribute_ssh_public_key = "sshPublicKey".to_string();
    let source = source(SourceType::Ldap, &config);

    let user = login(&stores, &directory(), &source, &config, None, "alice", "wonderland")
        .await
        .unwrap();
    assert_eq!(user.name, "alice");
    assert_eq!(user.full_name, "Alice Liddell");
    assert_eq!(user.login_type, SourceType::Ldap);
    assert_eq!(user.login_source, 7);

    let keys = stores.keys.list_keys_by_source(user.id, 7).await.unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].name, format!("corp-{}", keys[0].fingerprint));

    let error = login(&stores, &directory(), &source, &config, None, "alice", "nope")
        .await
        .unwrap_err();
    assert_eq!(error, Error::UserNotFound("alice".to_string()));
}

#[tokio::test]
async fn test_login_updates_admin_flag() {
    let store = Arc::new(MemoryStore::new());
    let stores = Stores::memory(store);
    let mut config = config();
    let source = source(SourceType::Ldap, &config);

    let user = login(&stores, &directory(), &source, &config, None, "alice", "wonderland")
        .await
        .unwrap();
    assert!(!user.is_admin);

    config.admin_filter = "(memberOf=cn=admins)".to_string();
    let directory = directory().with_search(ALICE_DN, "(memberOf=cn=admins)", vec![alice()]);
    let user = login(&stores, &directory, &source, &config, Some(user), "alice", "wonderland")
        .await
        .unwrap();
    assert!(user.is_admin);

    let stored = stores.users.get_user_by_name("alice").await.unwrap();
    assert!(stored.is_admin);
}

#[tokio::test]
async fn test_sync_public_keys_replaces_stale_keys() {
    let store = Arc::new(MemoryStore::new());
    let stores = Stores::memory(store);
    let config = config();
    let source = source(SourceType::Ldap, &config);
    let user = stores
        .users
        .create_user(NewUser {
            name: "alice".to_string(),
            ..NewUser::default()
        })
        .await
        .unwrap();

    let keys = stores.keys.as_ref();
    assert!(sync_public_keys(keys, &user, &source, &[KEY_A.to_string()]).await.unwrap());
    assert!(!sync_public_keys(keys, &user, &source, &[KEY_A.to_string()]).await.unwrap());
    assert!(sync_public_keys(keys, &user, &source, &[KEY_B.to_string(), "garbage".to_string()])
        .await
        .unwrap());

    let stored = keys.list_keys_by_source(user.id, source.id).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(
        stored[0].fingerprint,
        "SHA256:tizwNQktrV1RbSqpvEx12LMkiK4VwNPYc/rWB77LEi8"
    );
}

fn sync_directory() -> FakeDirectory {
    let bob = entry(
        "uid=bob,ou=people,dc=example,dc=org",
        &[("uid", "bob"), ("mail", "bob@example.org")],
    );
    FakeDirectory::default()
        .with_password("cn=reader,dc=example,dc=org", "reader-pw")
        .with_search("ou=people,dc=example,dc=org", "(uid=*)", vec![alice(), bob])
}

#[tokio::test]
async fn test_synchronize_creates_updates_and_deactivates() {
    let store = Arc::new(MemoryStore::new());
    let stores = Stores::memory(store);
    let config = config();
    let source = source(SourceType::Ldap, &config);

    let mut alice = stores
        .users
        .create_user(NewUser {
            name: "alice".to_string(),
            full_name: "Old Name".to_string(),
            email: "alice@example.org".to_string(),
            login_type: SourceType::Ldap,
            login_source: 7,
            is_active: false,
            ..NewUser::default()
        })
        .await
        .unwrap();
    let carol = stores
        .users
        .create_user(NewUser {
            name: "carol".to_string(),
            login_type: SourceType::Ldap,
            login_source: 7,
            is_active: true,
            ..NewUser::default()
        })
        .await
        .unwrap();

    let directory = sync_directory();
    let report = synchronize(&stores, &directory, &source, &config, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        report,
        SyncReport {
            created: 1,
            updated: 1,
            deactivated: 1,
            failed: 0,
            deactivation_refused: false,
        }
    );
    assert_eq!(report.to_string(), "1 created, 1 updated, 1 deactivated");
    assert_eq!(directory.open_connections(), 0);

    alice = stores.users.get_user_by_id(alice.id).await.unwrap();
    assert!(alice.is_active);
    assert_eq!(alice.full_name, "Alice Liddell");

    let bob = stores.users.get_user_by_name("bob").await.unwrap();
    assert_eq!(bob.login_source, 7);
    assert_eq!(bob.full_name, "bob");

    let carol = stores.users.get_user_by_id(carol.id).await.unwrap();
    assert!(!carol.is_active);
}

#[tokio::test]
async fn test_synchronize_refuses_to_deactivate_everyone() {
    let store = Arc::new(MemoryStore::new());
    let stores = Stores::memory(store);
    let config = config();
    let source = source(SourceType::Ldap, &config);
    let user = stores
        .users
        .create_user(NewUser {
            name: "carol".to_string(),
            login_type: SourceType::Ldap,
            login_source: 7,
            is_active: true,
            ..NewUser::default()
        })
        .await
        .unwrap();

    let directory =
        FakeDirectory::default().with_password("cn=reader,dc=example,dc=org", "reader-pw");
    let report = synchronize(&stores, &directory, &source, &config, &CancellationToken::new())
        .await
        .unwrap();
    assert!(report.deactivation_refused);
    assert!(stores.users.get_user_by_id(user.id).await.unwrap().is_active);
}

#[tokio::test]
async fn test_synchronize_stops_when_cancelled() {
    let store = Arc::new(MemoryStore::new());
    let stores = Stores::memory(store);
    let config = config();
    let source = source(SourceType::Ldap, &config);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let error = synchronize(&stores, &sync_directory(), &source, &config, &cancel)
        .await
        .unwrap_err();
    assert_eq!(error, Error::Cancelled);
    assert!(stores.users.list_users_by_source(7).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_synchronize_continues_past_a_taken_name() {
    let store = Arc::new(MemoryStore::new());
    let stores = Stores::memory(store);
    let config = config();
    let source = source(SourceType::Ldap, &config);

    stores
        .users
        .create_user(NewUser {
            name: "alice".to_string(),
            login_type: SourceType::Plain,
            is_active: true,
            ..NewUser::default()
        })
        .await
        .unwrap();
    let carol = stores
        .users
        .create_user(NewUser {
            name: "carol".to_string(),
            login_type: SourceType::Ldap,
            login_source: 7,
            is_active: true,
            ..NewUser::default()
        })
        .await
        .unwrap();

    let report = synchronize(&stores, &sync_directory(), &source, &config, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.deactivated, 1);
    assert_eq!(report.to_string(), "1 created, 0 updated, 1 deactivated, 1 failed");

    let bob = stores.users.get_user_by_name("bob").await.unwrap();
    assert_eq!(bob.login_source, 7);
    assert!(!stores.users.get_user_by_id(carol.id).await.unwrap().is_active);

    let alice = stores.users.get_user_by_name("alice").await.unwrap();
    assert_eq!(alice.login_source, 0);
}

/// Cancels `cancel` once the first user has been created.
struct CancelAfterCreate {
    inner: Arc<MemoryStore>,
    cancel: CancellationToken,
}

#[async_trait]
impl UserStore for CancelAfterCreate {
    async fn get_user_by_id(&self, id: i64) -> Result<User, store::Error> {
        self.inner.get_user_by_id(id).await
    }

    async fn get_user_by_name(&self, name: &str) -> Result<User, store::Error> {
        self.inner.get_user_by_name(name).await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<User, store::Error> {
        self.inner.get_user_by_email(email).await
    }

    async fn create_user(&self, user: NewUser) -> Result<User, store::Error> {
        let created = self.inner.create_user(user).await;
        self.cancel.cancel();
        created
    }

    async fn update_user_columns(
        &self,
        user: &User,
        columns: &[UserColumn],
    ) -> Result<(), store::Error> {
        self.inner.update_user_columns(user, columns).await
    }

    async fn list_users_by_source(&self, source_id: i64) -> Result<Vec<User>, store::Error> {
        self.inner.list_users_by_source(source_id).await
    }
}

#[tokio::test]
async fn test_synchronize_keeps_changes_applied_before_cancellation() {
    let store = Arc::new(MemoryStore::new());
    let cancel = CancellationToken::new();
    let mut stores = Stores::memory(store.clone());
    stores.users = Arc::new(CancelAfterCreate {
        inner: store.clone(),
        cancel: cancel.clone(),
    });
    let config = config();
    let source = source(SourceType::Ldap, &config);

    let error = synchronize(&stores, &sync_directory(), &source, &config, &cancel)
        .await
        .unwrap_err();
    assert_eq!(error, Error::Cancelled);

    let users = store.list_users_by_source(7).await.unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].name, "alice");
    assert!(store.get_user_by_name("bob").await.is_err());
}
