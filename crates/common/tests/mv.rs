//! Integration tests for move and rename

mod common;

use ::common::acl::Permission;
use ::common::share::GrantSpec;
use ::common::vfs::VfsError;

#[tokio::test]
async fn test_move_file_between_folders() {
    let env = common::setup_test_env().await;
    let file = common::put(&env, &env.alice, "/a/file.txt", b"data").await;
    let b = env
        .vfs
        .mkdir(&env.alice, &env.alice, &common::path("/b"), false)
        .await
        .unwrap();

    env.vfs.move_node(&env.alice, &file, &b, None).await.unwrap();

    assert!(env
        .vfs
        .resolve(&env.alice, &common::path("/a/file.txt"))
        .is_err());
    let moved = common::resolve(&env, &env.alice, "/b/file.txt");
    assert_eq!(moved.id(), &file);
    let data = env.vfs.read_file(&env.alice, &file).await.unwrap();
    assert_eq!(data, "data");
}

#[tokio::test]
async fn test_move_directory_with_rename() {
    let env = common::setup_test_env().await;
    common::put(&env, &env.alice, "/old/one.txt", b"1").await;
    common::put(&env, &env.alice, "/old/sub/two.txt", b"2").await;
    let old = common::resolve(&env, &env.alice, "/old");
    let dest = env
        .vfs
        .mkdir(&env.alice, &env.alice, &common::path("/archive"), false)
        .await
        .unwrap();

    env.vfs
        .move_node(&env.alice, old.id(), &dest, Some("renamed"))
        .await
        .unwrap();

    common::resolve(&env, &env.alice, "/archive/renamed/one.txt");
    common::resolve(&env, &env.alice, "/archive/renamed/sub/two.txt");
    assert!(env.vfs.resolve(&env.alice, &common::path("/old")).is_err());
}

#[tokio::test]
async fn test_move_into_own_subtree_is_rejected() {
    let env = common::setup_test_env().await;
    common::put(&env, &env.alice, "/a/b/c/file", b"x").await;
    let a = common::resolve(&env, &env.alice, "/a");
    let c = common::resolve(&env, &env.alice, "/a/b/c");
    let before = env.vfs.path_of(a.id()).unwrap();

    let err = env
        .vfs
        .move_node(&env.alice, a.id(), c.id(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, VfsError::CyclicMove { .. }));

    let err = env
        .vfs
        .move_node(&env.alice, a.id(), a.id(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, VfsError::CyclicMove { .. }));

    // tree unchanged
    assert_eq!(env.vfs.path_of(a.id()).unwrap(), before);
    assert_eq!(
        env.vfs.path_of(c.id()).unwrap().to_string(),
        "/a/b/c"
    );
}

#[tokio::test]
async fn test_move_name_conflict() {
    let env = common::setup_test_env().await;
    let one = common::put(&env, &env.alice, "/one/x.txt", b"1").await;
    common::put(&env, &env.alice, "/two/x.txt", b"2").await;
    let two = common::resolve(&env, &env.alice, "/two");

    let err = env
        .vfs
        .move_node(&env.alice, &one, two.id(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, VfsError::NameConflict { .. }));
    assert_eq!(
        env.vfs.path_of(&one).unwrap().to_string(),
        "/one/x.txt"
    );
}

#[tokio::test]
async fn test_root_cannot_move() {
    let env = common::setup_test_env().await;
    let dir = env
        .vfs
        .mkdir(&env.alice, &env.alice, &common::path("/dir"), false)
        .await
        .unwrap();

    let err = env
        .vfs
        .move_node(&env.alice, &env.alice_root, &dir, None)
        .await
        .unwrap_err();
    assert!(matches!(err, VfsError::RootImmutable(_)));

    let err = env
        .vfs
        .rename(&env.alice, &env.alice_root, "elsewhere")
        .await
        .unwrap_err();
    assert!(matches!(err, VfsError::RootImmutable(_)));
}

#[tokio::test]
async fn test_cross_root_move_is_rejected() {
    let env = common::setup_test_env().await;
    let file = common::put(&env, &env.alice, "/file.txt", b"x").await;
    let bob_dir = env
        .vfs
        .mkdir(&env.bob, &env.bob, &common::path("/shared-in"), false)
        .await
        .unwrap();
    // bob lets alice write into his folder
    env.vfs
        .shares()
        .issue(
            &env.bob,
            &bob_dir,
            GrantSpec::for_principal(env.alice.clone(), Permission::Write),
        )
        .await
        .unwrap();

    let err = env
        .vfs
        .move_node(&env.alice, &file, &bob_dir, None)
        .await
        .unwrap_err();
    assert!(matches!(err, VfsError::CrossRootMove { .. }));
}

#[tokio::test]
async fn test_move_requires_write_on_both_ends() {
    let env = common::setup_test_env().await;
    let file = common::put(&env, &env.alice, "/src/file.txt", b"x").await;
    let src = common::resolve(&env, &env.alice, "/src");
    let dest = env
        .vfs
        .mkdir(&env.alice, &env.alice, &common::path("/dest"), false)
        .await
        .unwrap();

    env.vfs
        .shares()
        .issue(
            &env.alice,
            src.id(),
            GrantSpec::for_principal(env.bob.clone(), Permission::Write),
        )
        .await
        .unwrap();
    env.vfs
        .shares()
        .issue(
            &env.alice,
            &dest,
            GrantSpec::for_principal(env.bob.clone(), Permission::Read),
        )
        .await
        .unwrap();

    let err = env
        .vfs
        .move_node(&env.bob, &file, &dest, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        VfsError::InsufficientPermission { required: Permission::Write, .. }
    ));

    // upgrade bob on the destination and try again
    env.vfs
        .shares()
        .issue(
            &env.alice,
            &dest,
            GrantSpec::for_principal(env.bob.clone(), Permission::Write),
        )
        .await
        .unwrap();
    env.vfs.move_node(&env.bob, &file, &dest, None).await.unwrap();
    assert_eq!(
        env.vfs.path_of(&file).unwrap().to_string(),
        "/dest/file.txt"
    );
}

#[tokio::test]
async fn test_rename() {
    let env = common::setup_test_env().await;
    let file = common::put(&env, &env.alice, "/dir/old.txt", b"x").await;
    common::put(&env, &env.alice, "/dir/taken.txt", b"y").await;

    env.vfs.rename(&env.alice, &file, "new.txt").await.unwrap();
    assert_eq!(
        common::resolve(&env, &env.alice, "/dir/new.txt").id(),
        &file
    );

    let err = env
        .vfs
        .rename(&env.alice, &file, "taken.txt")
        .await
        .unwrap_err();
    assert!(matches!(err, VfsError::NameConflict { .. }));

    let err = env
        .vfs
        .rename(&env.alice, &file, "bad/name")
        .await
        .unwrap_err();
    assert!(matches!(err, VfsError::InvalidName { .. }));

    // renaming to the current name is a no-op
    env.vfs.rename(&env.alice, &file, "new.txt").await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_cross_moves() {
    for _ in 0..20 {
        let env = common::setup_test_env().await;
        let a = env
            .vfs
            .mkdir(&env.alice, &env.alice, &common::path("/a"), false)
            .await
            .unwrap();
        let b = env
            .vfs
            .mkdir(&env.alice, &env.alice, &common::path("/b"), false)
            .await
            .unwrap();

        // a into b while b into a
        let a_into_b = tokio::spawn({
            let vfs = env.vfs.clone();
            let alice = env.alice.clone();
            async move { vfs.move_node(&alice, &a, &b, None).await }
        });
        let b_into_a = tokio::spawn({
            let vfs = env.vfs.clone();
            let alice = env.alice.clone();
            async move { vfs.move_node(&alice, &b, &a, None).await }
        });
        let (first, second) = tokio::join!(a_into_b, b_into_a);
        let results = [first.unwrap(), second.unwrap()];

        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(succeeded, 1, "{:?}", results);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(VfsError::CyclicMove { .. }))));

        // both still hang off alice's root
        let a_path = env.vfs.path_of(&a).unwrap().to_string();
        let b_path = env.vfs.path_of(&b).unwrap().to_string();
        assert!(
            (a_path == "/b/a" && b_path == "/b") || (a_path == "/a" && b_path == "/a/b"),
            "{} {}",
            a_path,
            b_path
        );
        let snapshot = env.vfs.snapshot();
        assert!(snapshot
            .lineage(&a)
            .last()
            .is_some_and(|top| top.id() == &env.alice_root));
        assert!(snapshot
            .lineage(&b)
            .last()
            .is_some_and(|top| top.id() == &env.alice_root));
    }
}
