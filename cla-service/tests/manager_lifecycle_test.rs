mod common;

use chrono::Duration;
use cla_service::{
    models::Role,
    services::{EmailTemplate, NewManager, ServiceError, SigningStore},
    utils::Password,
};
use common::{TestApp, org_key};

fn candidate(name: &str, email: &str) -> NewManager {
    NewManager {
        name: name.to_string(),
        email: email.to_string(),
    }
}

#[tokio::test]
async fn test_employee_manager_roster_for_example_com() {
    let app = TestApp::new();
    let key = org_key();
    app.signed_link(&key).await;

    let added = app
        .managers()
        .add_employee_managers(&key, "admin@example.com", &[candidate("Bob", "bob@example.com")])
        .await
        .unwrap();
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].id, "bob_example_com");
    assert_eq!(added[0].role, Role::Manager);
    assert_eq!(
        app.email.sent_to("bob@example.com")[0].template,
        EmailTemplate::AddingCorpManager
    );

    let err = app
        .managers()
        .add_employee_managers(&key, "admin@example.com", &[candidate("Bob", "bob@other.com")])
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::UnmatchedEmailDomain));

    // subdomains share the two trailing labels
    app.managers()
        .add_employee_managers(
            &key,
            "admin@example.com",
            &[
                candidate("Carol", "carol@mail.example.com"),
                candidate("Dan", "dan@example.com"),
                candidate("Eve", "eve@example.com"),
                candidate("Frank", "frank@example.com"),
            ],
        )
        .await
        .unwrap();

    let err = app
        .managers()
        .add_employee_managers(&key, "admin@example.com", &[candidate("Grace", "grace@example.com")])
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ManyEmployeeManagers));

    let listed = app
        .managers()
        .list_managers(&key, Role::Manager, "example_com")
        .await
        .unwrap();
    assert_eq!(listed.len(), 5);

    let removed = app
        .managers()
        .delete_employee_managers(&key, "admin@example.com", &["bob@example.com".to_string()])
        .await
        .unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(
        app.email.sent_to("bob@example.com").last().unwrap().template,
        EmailTemplate::RemovingCorpManager
    );

    let removed_again = app
        .managers()
        .delete_employee_managers(&key, "admin@example.com", &["bob@example.com".to_string()])
        .await
        .unwrap();
    assert!(removed_again.is_empty());

    let listed = app
        .managers()
        .list_managers(&key, Role::Manager, "example_com")
        .await
        .unwrap();
    assert_eq!(listed.len(), 4);
}

#[tokio::test]
async fn test_batch_add_is_all_or_nothing() {
    let app = TestApp::new();
    let key = org_key();
    app.signed_link(&key).await;

    let err = app
        .managers()
        .add_employee_managers(
            &key,
            "admin@example.com",
            &[
                candidate("Bob", "bob@example.com"),
                candidate("Mallory", "mallory@elsewhere.org"),
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::UnmatchedEmailDomain));

    let listed = app
        .managers()
        .list_managers(&key, Role::Manager, "example_com")
        .await
        .unwrap();
    assert!(listed.is_empty());
}

#[tokio::test]
async fn test_manager_of_another_corporation_is_rejected() {
    let app = TestApp::new();
    let key = org_key();
    app.signed_link(&key).await;
    app.signings()
        .sign_as_corporation(&key, "Other Corp", "boss@other.com", "Oscar")
        .await
        .unwrap();

    let err = app
        .managers()
        .add_employee_managers(&key, "admin@example.com", &[candidate("Olga", "olga@other.com")])
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotSameCorp));

    let err = app
        .managers()
        .add_employee_managers(&key, "admin@example.com", &[candidate("Alice", "admin@example.com")])
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::AdminAsManager));

    let err = app
        .managers()
        .delete_employee_managers(&key, "admin@example.com", &["olga@other.com".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotSameCorp));
}

#[tokio::test]
async fn test_only_the_admin_manages_employee_managers() {
    let app = TestApp::new();
    let key = org_key();
    app.signed_link(&key).await;
    app.managers()
        .add_employee_managers(&key, "admin@example.com", &[candidate("Bob", "bob@example.com")])
        .await
        .unwrap();

    let err = app
        .managers()
        .add_employee_managers(&key, "bob@example.com", &[candidate("Dan", "dan@example.com")])
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotCorpAdmin));
}

#[tokio::test]
async fn test_second_admin_is_conflict() {
    let app = TestApp::new();
    let key = org_key();
    app.signed_link(&key).await;

    let err = app
        .managers()
        .create_admin(&key, "admin@example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::CorpAdminExists));

    let err = app
        .managers()
        .create_admin(&key, "someone@unsigned.com")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::CorpSigningNotFound));
}

#[tokio::test]
async fn test_admin_must_be_the_signing_admin_email() {
    let app = TestApp::new();
    let key = org_key();
    app.signings().open_link(&key).await.unwrap();
    app.signings()
        .sign_as_corporation(&key, "Example Inc", "admin@example.com", "Alice")
        .await
        .unwrap();

    let err = app
        .managers()
        .create_admin(&key, "mallory@example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));
    assert!(app.email.sent_to("mallory@example.com").is_empty());

    let admin = app
        .managers()
        .create_admin(&key, "Admin@Example.com")
        .await
        .unwrap();
    assert_eq!(admin.email, "admin@example.com");
    assert_eq!(admin.name, "Alice");
}

#[tokio::test]
async fn test_signing_can_not_be_removed_while_managers_exist() {
    let app = TestApp::new();
    let key = org_key();
    app.signed_link(&key).await;

    let err = app
        .signings()
        .remove_corp_signing(&key, "example_com")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::CorpSigningCanNotDelete));

    let err = app
        .signings()
        .remove_corp_signing(&key, "unknown_com")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::CorpSigningNotFound));
}

#[tokio::test]
async fn test_login_freezes_after_five_failures_and_thaws() {
    let app = TestApp::new();
    let key = org_key();
    let password = app.signed_link(&key).await;
    let wrong = Password::new("Wrong-pass-123");

    for _ in 0..5 {
        let err = app
            .managers()
            .authenticate(&key, "admin@example.com", &wrong)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NoLinkOrNoManager));
        app.clock.advance(Duration::seconds(10));
    }

    let err = app
        .managers()
        .authenticate(&key, "admin@example.com", &password)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::UserFrozen));

    app.clock.advance(Duration::seconds(301));

    let result = app
        .managers()
        .authenticate(&key, "admin_example_com", &password)
        .await
        .unwrap();
    assert_eq!(result.role, Role::Admin);
    assert_eq!(result.corporation_id, "example_com");
    assert!(!result.initial_password_changed);

    let record = app.store.find_record(&key).await.unwrap().unwrap();
    let admin = record.manager_by_email("admin@example.com").unwrap();
    assert_eq!(admin.login.failed_count, 0);
    assert!(admin.login.frozen_until_utc.is_none());
}

#[tokio::test]
async fn test_success_resets_the_failure_counter() {
    let app = TestApp::new();
    let key = org_key();
    let password = app.signed_link(&key).await;
    let wrong = Password::new("Wrong-pass-123");

    for _ in 0..4 {
        assert!(app
            .managers()
            .authenticate(&key, "admin@example.com", &wrong)
            .await
            .is_err());
    }
    app.managers()
        .authenticate(&key, "admin@example.com", &password)
        .await
        .unwrap();

    // four more failures stay below the threshold
    for _ in 0..4 {
        let err = app
            .managers()
            .authenticate(&key, "admin@example.com", &wrong)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NoLinkOrNoManager));
    }
    app.managers()
        .authenticate(&key, "admin@example.com", &password)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unknown_user_and_unknown_link() {
    let app = TestApp::new();
    let key = org_key();
    app.signed_link(&key).await;

    let err = app
        .managers()
        .authenticate(&key, "nobody@example.com", &Password::new("whatever"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::UserNotExists));

    let err = app
        .managers()
        .authenticate(
            &cla_service::models::OrgKey::new("github", "unknown", ""),
            "admin@example.com",
            &Password::new("whatever"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NoLinkOrNoManager));
}

#[tokio::test]
async fn test_reset_password_marks_initial_password_changed() {
    let app = TestApp::new();
    let key = org_key();
    let password = app.signed_link(&key).await;
    let new_password = Password::new("N3w-Secret!x");

    let err = app
        .managers()
        .reset_password(&key, "admin@example.com", &password, &password)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::SamePassword));

    let err = app
        .managers()
        .reset_password(&key, "admin@example.com", &Password::new("not-it"), &new_password)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidPassword));

    app.managers()
        .reset_password(&key, "admin@example.com", &password, &new_password)
        .await
        .unwrap();

    let result = app
        .managers()
        .authenticate(&key, "admin@example.com", &new_password)
        .await
        .unwrap();
    assert!(result.initial_password_changed);
}

#[tokio::test]
async fn test_password_retrieval_clears_a_freeze() {
    let app = TestApp::new();
    let key = org_key();
    app.signed_link(&key).await;

    for _ in 0..5 {
        let _ = app
            .managers()
            .authenticate(&key, "admin@example.com", &Password::new("Wrong-pass-123"))
            .await;
    }

    app.managers()
        .request_password_retrieval(&key, "admin@example.com")
        .await
        .unwrap();
    let code = app.code_sent_to("admin@example.com", EmailTemplate::PasswordRetrieval);

    let new_password = Password::new("Fresh-Start-42!");
    app.managers()
        .retrieve_password(&key, "admin@example.com", &code, &new_password)
        .await
        .unwrap();

    let result = app
        .managers()
        .authenticate(&key, "admin@example.com", &new_password)
        .await
        .unwrap();
    assert!(result.initial_password_changed);
}
