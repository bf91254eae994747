//! Integration tests for looking up and creating entries.

mod common;

use common::{user, MemoryDirectory, ADMINS_GROUP};
use secrecy::ExposeSecret;
use ucp_core::{Error, DEFAULT_PASSWORD_LENGTH};
use ucp_directory::{DistinguishedName, ExternalMail, Identity, NewGroup};

#[tokio::test]
async fn test_get_user_parses_seeded_entry() {
    let server = MemoryDirectory::seeded();
    let directory = server.directory();

    let alice = user(&directory, "alice").await;
    assert_eq!(alice.name, "alice");
    assert_eq!(alice.display_name, "Alice Liddell");
    assert_eq!(alice.given_name, "Alice");
    assert_eq!(alice.surname, "Liddell");
    assert_eq!(alice.member_id.as_deref(), Some("1001"));
    assert_eq!(alice.primary_mail.as_deref(), Some("alice@example.org"));

    let bob = user(&directory, "bob").await;
    assert_eq!(bob.surname, "", "placeholder surname must read as unset");
    assert!(bob.member_id.is_none());
    assert_eq!(server.open_sessions(), 0);
}

#[tokio::test]
async fn test_unknown_user_is_not_found() {
    let server = MemoryDirectory::seeded();
    let directory = server.directory();

    assert!(matches!(
        directory.get_user("nobody").await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        directory.get_user("").await,
        Err(Error::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn test_get_user_by_mail_searches_every_mail_attribute() {
    let server = MemoryDirectory::seeded();
    let directory = server.directory();

    let by_primary = directory.get_user_by_mail("alice@example.org").await.unwrap();
    assert_eq!(by_primary.name, "alice");

    let by_verified = directory.get_user_by_mail("bob@verified.example").await.unwrap();
    let by_unverified = directory.get_user_by_mail("X@Example.com").await.unwrap();
    assert_eq!(by_verified.dn, by_unverified.dn);
}

#[tokio::test]
async fn test_get_user_by_mail_requires_exactly_one_match() {
    let server = MemoryDirectory::seeded();
    let directory = server.directory();

    // carol has it unverified, dave verified
    assert!(matches!(
        directory.get_user_by_mail("shared@example.net").await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        directory.get_user_by_mail("nobody@example.org").await,
        Err(Error::NotFound(_))
    ));

    assert!(directory.is_mail_in_use("shared@example.net").await.unwrap());
    assert!(!directory.is_mail_in_use("nobody@example.org").await.unwrap());
}

#[tokio::test]
async fn test_filter_metacharacters_in_mail_are_escaped() {
    let server = MemoryDirectory::seeded();
    let directory = server.directory();

    assert!(!directory.is_mail_in_use("*").await.unwrap());
    assert!(!directory.is_mail_in_use("a)(uid=*").await.unwrap());
}

#[tokio::test]
async fn test_create_user_seeds_password_and_unverified_mail() {
    let server = MemoryDirectory::seeded();
    let directory = server.directory();

    let erin = directory
        .create_user("erin", "erin-secret", "erin@home.example")
        .await
        .unwrap();

    assert_eq!(erin.name, "erin");
    assert_eq!(erin.surname, "");
    assert_eq!(
        erin.external_mails,
        vec![ExternalMail::unverified("erin@home.example")]
    );
    assert!(erin.primary_mail.is_none());
    assert_eq!(
        server.values(erin.dn.as_str(), "sn"),
        vec!["-".to_string()]
    );
    assert!(erin.check_password(&directory, "erin-secret").await.unwrap());
}

#[tokio::test]
async fn test_create_user_rejects_taken_uid() {
    let server = MemoryDirectory::seeded();
    let directory = server.directory();

    let result = directory.create_user("bob", "whatever", "b@example.org").await;
    assert!(matches!(result, Err(Error::AlreadyExists(_))));
    assert_eq!(server.open_sessions(), 0);
}

#[tokio::test]
async fn test_register_user_returns_generated_password() {
    let server = MemoryDirectory::seeded();
    let directory = server.directory();

    let (frank, password) = directory
        .register_user("frank", "frank@home.example")
        .await
        .unwrap();

    assert_eq!(password.expose_secret().len(), DEFAULT_PASSWORD_LENGTH);
    let authenticated = directory
        .authenticate("frank", password.expose_secret())
        .await
        .unwrap();
    assert_eq!(authenticated.dn, frank.dn);
}

#[tokio::test]
async fn test_authenticate_hides_which_part_was_wrong() {
    let server = MemoryDirectory::seeded();
    let directory = server.directory();

    assert!(directory.authenticate("alice", "alice-secret").await.is_ok());
    assert!(matches!(
        directory.authenticate("alice", "wrong").await,
        Err(Error::InvalidCredentials(_))
    ));
    assert!(matches!(
        directory.authenticate("nobody", "alice-secret").await,
        Err(Error::InvalidCredentials(_))
    ));
    assert!(matches!(
        directory.authenticate("alice", "").await,
        Err(Error::InvalidCredentials(_))
    ));
}

#[tokio::test]
async fn test_unreachable_directory_is_not_a_credentials_failure() {
    let server = MemoryDirectory::seeded();
    let directory = server.directory();
    let alice = user(&directory, "alice").await;

    server.set_unreachable(true);
    assert!(matches!(
        alice.check_password(&directory, "alice-secret").await,
        Err(Error::Unreachable(_))
    ));
    assert!(matches!(
        directory.authenticate("alice", "alice-secret").await,
        Err(Error::Unreachable(_))
    ));
}

#[tokio::test]
async fn test_get_groups_lists_group_base() {
    let server = MemoryDirectory::seeded();
    let directory = server.directory();

    let mut names: Vec<String> = directory
        .get_groups()
        .await
        .unwrap()
        .into_iter()
        .map(|group| group.name)
        .collect();
    names.sort();
    assert_eq!(names, ["admins", "choir", "open"]);

    let admins = directory
        .get_group_by_dn(&DistinguishedName::parse(ADMINS_GROUP).unwrap())
        .await
        .unwrap();
    assert_eq!(admins.display_name, "Admins");
}

#[tokio::test]
async fn test_create_group_defaults_managers_to_members() {
    let server = MemoryDirectory::seeded();
    let directory = server.directory();
    let alice = user(&directory, "alice").await;

    let group = directory
        .create_group(
            NewGroup::new("Foo Bar")
                .description("desc")
                .members([alice.dn.clone()]),
        )
        .await
        .unwrap();

    assert_eq!(group.name, "foo_bar");
    assert_eq!(group.display_name, "Foo Bar");
    assert_eq!(group.description, "desc");
    assert_eq!(group.managers, vec![Identity::Dn(alice.dn.clone())]);
    assert!(group.owners.is_empty());
    assert!(group.is_member(&alice));

    let again = directory.create_group(NewGroup::new("foo bar")).await;
    assert!(matches!(again, Err(Error::AlreadyExists(_))));
}

#[tokio::test]
async fn test_create_group_without_members_stores_placeholder() {
    let server = MemoryDirectory::seeded();
    let directory = server.directory();

    let group = directory
        .create_group(NewGroup::new("Board/Finance").owners([Identity::Everybody]))
        .await
        .unwrap();

    assert_eq!(group.name, "board-finance");
    assert!(group.members.is_empty());
    assert_eq!(group.raw_members(), ["cn=empty"]);
    assert_eq!(group.owners, vec![Identity::Everybody]);

    assert!(matches!(
        directory.create_group(NewGroup::new("  ")).await,
        Err(Error::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn test_may_create_group_requires_admin_membership() {
    let server = MemoryDirectory::seeded();
    let directory = server.directory();
    let alice = user(&directory, "alice").await;
    let bob = user(&directory, "bob").await;

    assert!(directory.may_create_group(Some(&alice)).await.unwrap());
    assert!(!directory.may_create_group(Some(&bob)).await.unwrap());
    assert!(!directory.may_create_group(None).await.unwrap());
}
