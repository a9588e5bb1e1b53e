use std::fs;
use std::sync::Arc;

use arkdb::{key_bytes, Database, DbFlags, Environment, VerifyResult};
use tempfile::TempDir;

// Common test setup
fn setup_env() -> (TempDir, Arc<Environment>) {
    let dir = TempDir::new().unwrap();
    let env = Arc::new(Environment::new(dir.path()));
    (dir, env)
}

fn seed(env: &Arc<Environment>, file: &str, pairs: &[(&str, &str)]) {
    let mut db = Database::open(env, file, DbFlags::CREATE).unwrap();
    for (key, value) in pairs {
        assert!(db.write(*key, *value, true));
    }
}

#[test]
fn test_verify_clean_file() {
    let (_dir, env) = setup_env();
    seed(&env, "clean.dat", &[("k", "v")]);
    env.flush(false);

    let result = env.verify("clean.dat", |_, _| panic!("recovery must not run"));
    assert_eq!(result, VerifyResult::Ok);
}

#[test]
fn test_verify_missing_file() {
    let (_dir, env) = setup_env();
    env.open().unwrap();
    let result = env.verify("ghost.dat", |_, _| panic!("recovery must not run"));
    assert_eq!(result, VerifyResult::Ok);
}

#[test]
fn test_verify_in_mock_mode() {
    let env = Environment::make_mock();
    let result = env.verify("any.dat", |_, _| panic!("recovery must not run"));
    assert_eq!(result, VerifyResult::Ok);
}

#[test]
fn test_verify_garbage_file_recovery_failed() {
    let (dir, env) = setup_env();
    env.open().unwrap();
    fs::write(dir.path().join("bad.dat"), b"this is not a database").unwrap();

    // The stock strategy cannot salvage anything from pure garbage
    let result = env.verify("bad.dat", Database::recover);
    assert_eq!(result, VerifyResult::RecoveryFailed);
}

#[test]
fn test_verify_with_custom_strategy_recovers() {
    let (dir, env) = setup_env();
    env.open().unwrap();
    fs::write(dir.path().join("app.dat"), b"scrambled").unwrap();

    // An application-level strategy that rebuilds the file from scratch
    let rebuild_env = Arc::clone(&env);
    let result = env.verify("app.dat", move |_, file| {
        let path = rebuild_env.dir().join(file);
        if fs::remove_file(&path).is_err() {
            return false;
        }
        let mut db = match Database::open(&rebuild_env, file, DbFlags::CREATE) {
            Ok(db) => db,
            Err(_) => return false,
        };
        db.write("restored", &99u32, true)
    });
    assert_eq!(result, VerifyResult::Recovered);

    let db = Database::open(&env, "app.dat", DbFlags::empty()).unwrap();
    let restored: Option<u32> = db.read("restored");
    assert_eq!(restored, Some(99));
}

#[test]
fn test_stock_recover_rebuilds_from_salvage() {
    let (dir, env) = setup_env();
    seed(&env, "sal.dat", &[("k1", "v1"), ("k2", "v2")]);
    env.flush(false);

    assert!(Database::recover(&env, "sal.dat"));

    // The damaged file was moved aside before the rebuild
    let has_backup = fs::read_dir(dir.path())
        .unwrap()
        .flatten()
        .any(|e| e.file_name().to_string_lossy().ends_with(".bak"));
    assert!(has_backup);

    let db = Database::open(&env, "sal.dat", DbFlags::empty()).unwrap();
    let v1: Option<String> = db.read("k1");
    let v2: Option<String> = db.read("k2");
    assert_eq!(v1.as_deref(), Some("v1"));
    assert_eq!(v2.as_deref(), Some("v2"));
}

#[test]
fn test_salvage_reads_every_record() {
    let (_dir, env) = setup_env();
    seed(&env, "scan.dat", &[("a", "1"), ("b", "2"), ("c", "3")]);
    env.flush(false);

    let records = env.salvage("scan.dat", false).unwrap();
    assert_eq!(records.len(), 3);
    assert!(records.iter().any(|(k, _)| k == &key_bytes("b")));
}

#[test]
fn test_salvage_missing_file_is_unavailable() {
    let (dir, env) = setup_env();
    env.open().unwrap();
    assert!(env.salvage("none.dat", false).is_err());
    // The failed salvage must not leave a file behind
    assert!(!dir.path().join("none.dat").exists());
}

#[test]
fn test_salvage_unavailable_in_mock_mode() {
    let env = Environment::make_mock();
    env.open().unwrap();
    assert!(env.salvage("mock.dat", true).is_err());
}

#[test]
fn test_rewrite_filters_prefixed_keys() {
    let (_dir, env) = setup_env();
    seed(
        &env,
        "rw.dat",
        &[("a1", "va1"), ("a2", "va2"), ("b1", "vb1")],
    );

    assert!(Database::rewrite(&env, "rw.dat", Some(b"a")));

    let db = Database::open(&env, "rw.dat", DbFlags::empty()).unwrap();
    let kept: Option<String> = db.read("b1");
    assert_eq!(kept.as_deref(), Some("vb1"));
    assert!(!db.exists("a1"));
    assert!(!db.exists("a2"));

    let mut cursor = db.cursor().unwrap();
    let mut count = 0;
    while cursor.next().unwrap().is_some() {
        count += 1;
    }
    assert_eq!(count, 1);
}

#[test]
fn test_rewrite_without_filter_keeps_everything() {
    let (_dir, env) = setup_env();
    seed(&env, "compact.dat", &[("x", "1"), ("y", "2")]);

    assert!(Database::rewrite(&env, "compact.dat", None));

    let db = Database::open(&env, "compact.dat", DbFlags::empty()).unwrap();
    assert!(db.exists("x"));
    assert!(db.exists("y"));
}

#[test]
fn test_rewrite_fails_while_file_in_use() {
    let (_dir, env) = setup_env();
    let mut db = Database::open(&env, "busy.dat", DbFlags::CREATE).unwrap();
    assert!(db.write("k", "v", true));

    assert!(!Database::rewrite(&env, "busy.dat", None));
    assert!(db.exists("k"));

    drop(db);
    assert!(Database::rewrite(&env, "busy.dat", None));
}

#[test]
fn test_rewrite_refuses_missing_and_mock_files() {
    let (_dir, env) = setup_env();
    env.open().unwrap();
    assert!(!Database::rewrite(&env, "ghost.dat", None));

    let mock = Environment::make_mock();
    mock.open().unwrap();
    assert!(!Database::rewrite(&mock, "mock.dat", None));
}

#[test]
fn test_close_db_and_remove_db() {
    let (dir, env) = setup_env();
    seed(&env, "gone.dat", &[("k", "v")]);
    let db = Database::open(&env, "gone.dat", DbFlags::empty()).unwrap();

    assert!(env.close_db("gone.dat").is_err());
    drop(db);

    env.close_db("gone.dat").unwrap();
    assert!(!env.is_cached("gone.dat"));
    assert!(dir.path().join("gone.dat").exists());

    env.remove_db("gone.dat").unwrap();
    assert!(!dir.path().join("gone.dat").exists());
    // Removing an absent file is tolerated
    env.remove_db("gone.dat").unwrap();
}

#[test]
fn test_checkpoint_lsn_smoke() {
    let (_dir, env) = setup_env();
    // Closed environment and unknown files are quiet no-ops
    env.checkpoint_lsn("nothing.dat");

    seed(&env, "ckpt.dat", &[("k", "v")]);
    env.checkpoint_lsn("ckpt.dat");
    env.checkpoint_lsn("unknown.dat");
}

#[test]
fn test_shutdown_flush_sweeps_rewrite_leftovers() {
    let (dir, env) = setup_env();
    env.open().unwrap();
    fs::write(dir.path().join("old.dat.rewrite"), b"junk").unwrap();

    env.flush(true);
    assert!(!env.is_open());
    assert!(!dir.path().join("old.dat.rewrite").exists());
}
