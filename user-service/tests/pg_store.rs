mod support;

use anyhow::Result;
use chrono::{Duration, Utc};
use common_auth::{ROLE_ADMIN, ROLE_USER};
use support::{seed_user, TestDatabase};
use user_service::store::{
    NewUserRecord, ProfileUpdate, RoleAssignment, StoreError, UserSearch, UserStore,
};
use user_service::PgUserStore;

#[tokio::test(flavor = "multi_thread")]
#[cfg_attr(not(feature = "integration"), ignore = "enable with --features integration (requires Postgres: embedded or external)")]
async fn postgres_store_round_trip() -> Result<()> {
    let Some(db) = TestDatabase::setup().await? else {
        return Ok(());
    };
    let store = PgUserStore::new(db.pool_clone());

    let roles = store.list_roles().await?;
    let names: Vec<&str> = roles.iter().map(|role| role.name.as_str()).collect();
    assert_eq!(names, vec![ROLE_USER, ROLE_ADMIN]);

    let ada = store
        .create(NewUserRecord::registration(
            "ada@example.com".to_string(),
            "hash".to_string(),
            Some("Ada".to_string()),
            Some("+44-555_0100".to_string()),
        ))
        .await?;
    assert!(!ada.active);
    assert_eq!(ada.role_names(), vec![ROLE_USER.to_string()]);
    assert!(store.exists(ada.id).await?);

    let duplicate = store
        .create(NewUserRecord::registration(
            "ada@example.com".to_string(),
            "hash".to_string(),
            None,
            None,
        ))
        .await;
    assert!(matches!(duplicate, Err(StoreError::DuplicateEmail(_))));

    let admin = seed_user(&store, "admin@example.com", &[ROLE_USER, ROLE_ADMIN], true).await?;
    assert_eq!(admin.roles.len(), 2);

    let clash = store
        .update_profile(
            ada.id,
            ProfileUpdate {
                email: Some("admin@example.com".to_string()),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(clash, Err(StoreError::DuplicateEmail(_))));

    let activated = store.set_active(ada.id, true).await?.expect("ada exists");
    assert!(activated.active);
    assert!(store.set_password_hash(ada.id, "new-hash").await?);
    assert_eq!(
        store.find_by_id(ada.id).await?.expect("ada").password_hash,
        "new-hash"
    );

    let by_username = store
        .search(&UserSearch {
            username: Some("ADA".to_string()),
            ..Default::default()
        })
        .await?;
    assert_eq!(by_username.len(), 1);

    let literal_underscore = store
        .search(&UserSearch {
            phone_number: Some("555_".to_string()),
            ..Default::default()
        })
        .await?;
    assert_eq!(literal_underscore.len(), 1);
    let wildcard_miss = store
        .search(&UserSearch {
            phone_number: Some("%0100x".to_string()),
            ..Default::default()
        })
        .await?;
    assert!(wildcard_miss.is_empty());

    let admins_since_yesterday = store
        .search(&UserSearch {
            active: Some(true),
            created_from: Some(Utc::now() - Duration::days(1)),
            role_name: Some(ROLE_ADMIN.to_string()),
            ..Default::default()
        })
        .await?;
    assert_eq!(admins_since_yesterday.len(), 1);
    assert_eq!(admins_since_yesterday[0].id, admin.id);
    assert_eq!(admins_since_yesterday[0].roles.len(), 2);

    let names = vec![ROLE_ADMIN.to_string(), "ROLE_GHOST".to_string()];
    match store.replace_roles(ada.id, &names).await? {
        RoleAssignment::Updated(user) => {
            assert_eq!(user.role_names(), vec![ROLE_ADMIN.to_string()])
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(store.list_by_role(ROLE_ADMIN).await?.len(), 2);
    assert_eq!(store.list_by_role(ROLE_USER).await?.len(), 1);

    let all = store.list_all().await?;
    assert!(all.windows(2).all(|pair| pair[0].id < pair[1].id));

    assert!(store.delete(ada.id).await?);
    assert!(!store.exists(ada.id).await?);
    assert!(store.find_by_email("ada@example.com").await?.is_none());

    db.teardown().await?;
    Ok(())
}
