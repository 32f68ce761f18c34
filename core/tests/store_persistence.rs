//! Durable store behavior across database reopens

use corvus_core::store::{Entity, Group, GroupStore, Store, StoreError, User};

#[test]
fn test_entities_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();

    let group_id = {
        let db = sled::open(dir.path()).unwrap();
        let users: Store<User> = Store::persistent("users", &db).unwrap();
        users.add(User::new("alice", "hunter2")).unwrap();
        users.add(User::new("bob", "pw")).unwrap();

        let groups = GroupStore::persistent(&db).unwrap();
        let mut group = Group::new("ops", "alice");
        group.passwords.push("agent-secret".into());
        let id = group.id.clone();
        groups.add(group).unwrap();
        id
    };

    let db = sled::open(dir.path()).unwrap();
    let users: Store<User> = Store::persistent("users", &db).unwrap();
    assert_eq!(users.count().unwrap(), 2);

    let alice = users.get("alice").unwrap().unwrap();
    assert!(alice.verify_password("hunter2"));
    assert!(!alice.verify_password("wrong"));

    let groups = GroupStore::persistent(&db).unwrap();
    let group = groups.get(&group_id).unwrap().unwrap();
    assert_eq!(group.name, "ops");
    assert_eq!(groups.by_password("agent-secret").unwrap().len(), 1);
    assert_eq!(groups.membership("alice").unwrap().len(), 1);
}

#[test]
fn test_id_conflict_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();

    {
        let db = sled::open(dir.path()).unwrap();
        let users: Store<User> = Store::persistent("users", &db).unwrap();
        users.add(User::new("alice", "pw")).unwrap();
    }

    let db = sled::open(dir.path()).unwrap();
    let users: Store<User> = Store::persistent("users", &db).unwrap();
    assert!(matches!(
        users.add(User::new("alice", "other")),
        Err(StoreError::IdConflict(_))
    ));
    // The original is untouched
    assert!(users.get("alice").unwrap().unwrap().verify_password("pw"));
}

#[test]
fn test_removal_is_durable() {
    let dir = tempfile::tempdir().unwrap();

    {
        let db = sled::open(dir.path()).unwrap();
        let users: Store<User> = Store::persistent("users", &db).unwrap();
        users.add(User::new("gone", "pw")).unwrap();
        users.remove("gone").unwrap();
    }

    let db = sled::open(dir.path()).unwrap();
    let users: Store<User> = Store::persistent("users", &db).unwrap();
    assert!(users.get("gone").unwrap().is_none());
    assert_eq!(users.count().unwrap(), 0);

    // The id is free again after removal
    let replacement = User::new("gone", "new");
    assert_eq!(replacement.valid(), corvus_core::ErrorCode::Ok);
    users.add(replacement).unwrap();
}
