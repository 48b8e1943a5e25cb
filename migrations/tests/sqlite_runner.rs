//! End-to-end runner tests against SQLite files in temporary directories.

#![cfg(feature = "rusqlite")]

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use rusqlite::Connection;
use shiftsql_migrations::{
    CancellationToken, ConnectionConfig, Dialect, Direction, Error, NewMigration, Runner,
    RunnerConfig, Steps,
};
use tempfile::TempDir;

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    fn db_path(&self) -> PathBuf {
        self.dir.path().join("dev.db")
    }

    fn migrations_dir(&self) -> PathBuf {
        self.dir.path().join("migrations")
    }

    fn runner_with(&self, config: RunnerConfig) -> Runner {
        let connection =
            ConnectionConfig::new(Dialect::Sqlite, self.db_path().to_string_lossy().into_owned());
        Runner::connect(&connection, config).expect("connect")
    }

    fn runner(&self) -> Runner {
        self.runner_with(RunnerConfig::new(self.migrations_dir()))
    }

    /// A runner that has already been initialized
    fn ready(&self) -> Runner {
        let mut runner = self.runner();
        runner.init().expect("init");
        runner
    }

    fn db(&self) -> Connection {
        Connection::open(self.db_path()).expect("open db")
    }

    fn table_exists(&self, table: &str) -> bool {
        let count: i64 = self
            .db()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get(0),
            )
            .unwrap();
        count == 1
    }

    /// `(name, executed)` for every record, in insertion order
    fn states(&self) -> Vec<(String, bool)> {
        let db = self.db();
        let mut stmt = db
            .prepare(r#"SELECT name, executed FROM "migrations" ORDER BY id"#)
            .unwrap();
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    fn file_count(&self) -> usize {
        fs::read_dir(self.migrations_dir()).unwrap().count()
    }
}

fn new_migration(runner: &mut Runner, name: &str, up: &str, down: &str) -> NewMigration {
    let created = runner.create(name).expect("create migration");
    fs::write(&created.files.up, up).unwrap();
    fs::write(&created.files.down, down).unwrap();
    created
}

fn names(report: &shiftsql_migrations::BatchReport) -> Vec<&str> {
    report.applied.iter().map(|m| m.name.as_str()).collect()
}

fn write_script(dir: &Path, file: &str, sql: &str) {
    fs::write(dir.join(file), sql).unwrap();
}

// ============================================================================
// Init
// ============================================================================

#[test]
fn init_is_idempotent() {
    let fx = Fixture::new();
    let mut runner = fx.runner();

    let first = runner.init().unwrap();
    assert!(first.created_dir);
    assert!(first.created_table);

    let second = runner.init().unwrap();
    assert!(!second.created_dir);
    assert!(!second.created_table);

    assert!(fx.migrations_dir().is_dir());
    assert!(fx.table_exists("migrations"));
    assert!(fx.states().is_empty());
}

#[test]
fn init_uses_custom_table_name() {
    let fx = Fixture::new();
    let connection = ConnectionConfig::new(Dialect::Sqlite, fx.db_path().to_string_lossy())
        .with_table("schema_history");
    let mut runner = Runner::connect(&connection, RunnerConfig::new(fx.migrations_dir())).unwrap();

    runner.init().unwrap();
    assert!(fx.table_exists("schema_history"));
    assert!(!fx.table_exists("migrations"));
}

// ============================================================================
// New
// ============================================================================

#[test]
fn create_writes_empty_pair_and_pending_record() {
    let fx = Fixture::new();
    let mut runner = fx.ready();

    let created = runner.create("create_users").unwrap();
    let ts = created.created_at.timestamp();
    assert_eq!(
        created.files.up,
        fx.migrations_dir().join(format!("{ts}_create_users.up.sql"))
    );
    assert_eq!(
        created.files.down,
        fx.migrations_dir().join(format!("{ts}_create_users.down.sql"))
    );
    assert_eq!(fs::read_to_string(&created.files.up).unwrap(), "");
    assert_eq!(fs::read_to_string(&created.files.down).unwrap(), "");
    assert_eq!(fx.states(), [("create_users".to_string(), false)]);

    let stored: i64 = fx
        .db()
        .query_row(r#"SELECT created_at FROM "migrations""#, [], |row| row.get(0))
        .unwrap();
    assert_eq!(stored, ts);
}

#[test]
fn duplicate_name_fails_without_new_files() {
    let fx = Fixture::new();
    let mut runner = fx.ready();

    runner.create("create_users").unwrap();
    assert_eq!(fx.file_count(), 2);

    let err = runner.create("create_users").unwrap_err();
    assert!(
        matches!(err, Error::UniqueConstraint { ref name, .. } if name == "create_users"),
        "unexpected error: {err}"
    );
    assert_eq!(fx.file_count(), 2);
    assert_eq!(fx.states().len(), 1);
}

#[test]
fn invalid_name_is_rejected_before_any_io() {
    let fx = Fixture::new();
    let mut runner = fx.ready();

    for bad in ["", "../escape", "with space"] {
        let err = runner.create(bad).unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "{bad:?} accepted");
    }
    assert_eq!(fx.file_count(), 0);
    assert!(fx.states().is_empty());
}

#[test]
fn create_without_state_table_leaves_nothing_behind() {
    let fx = Fixture::new();
    fs::create_dir_all(fx.migrations_dir()).unwrap();
    let mut runner = fx.runner();

    let err = runner.create("orphan").unwrap_err();
    assert!(matches!(err, Error::Query { .. }), "unexpected error: {err}");
    assert_eq!(fx.file_count(), 0);
}

// ============================================================================
// Up / Down
// ============================================================================

#[test]
fn up_applies_every_migration_once_in_order() {
    let fx = Fixture::new();
    let mut runner = fx.ready();

    new_migration(&mut runner, "create_a", "CREATE TABLE a (id INTEGER);", "DROP TABLE a;");
    new_migration(
        &mut runner,
        "add_b",
        "ALTER TABLE a ADD COLUMN b INTEGER;",
        "ALTER TABLE a DROP COLUMN b;",
    );
    new_migration(&mut runner, "index_b", "CREATE INDEX a_b ON a (b);", "DROP INDEX a_b;");

    let report = runner.up(Steps::All).unwrap();
    assert_eq!(report.direction, Direction::Up);
    assert_eq!(names(&report), ["create_a", "add_b", "index_b"]);
    assert!(report.applied.iter().all(|m| m.executed));
    assert!(fx.states().iter().all(|(_, executed)| *executed));

    let again = runner.up(Steps::All).unwrap();
    assert!(again.is_empty());
}

#[test]
fn up_then_down_round_trips() {
    let fx = Fixture::new();
    let mut runner = fx.ready();

    new_migration(&mut runner, "create_a", "CREATE TABLE a (id INTEGER);", "DROP TABLE a;");
    new_migration(&mut runner, "create_b", "CREATE TABLE b (id INTEGER);", "DROP TABLE b;");

    runner.up(Steps::All).unwrap();
    assert!(fx.table_exists("a") && fx.table_exists("b"));

    let report = runner.down(Steps::All).unwrap();
    assert_eq!(report.direction, Direction::Down);
    assert_eq!(names(&report), ["create_b", "create_a"]);
    assert!(report.applied.iter().all(|m| !m.executed));

    assert!(!fx.table_exists("a") && !fx.table_exists("b"));
    assert!(fx.states().iter().all(|(_, executed)| !*executed));
}

#[test]
fn failing_migration_rolls_back_the_whole_batch() {
    let fx = Fixture::new();
    let mut runner = fx.ready();

    new_migration(&mut runner, "create_a", "CREATE TABLE a (id INTEGER);", "DROP TABLE a;");
    new_migration(&mut runner, "broken", "CREATE TABLE b (id INTEGER); NOT VALID SQL;", "");
    new_migration(&mut runner, "create_c", "CREATE TABLE c (id INTEGER);", "DROP TABLE c;");

    let err = runner.up(Steps::All).unwrap_err();
    assert_eq!(err.migration(), Some("broken"));
    assert!(err.sql().is_some_and(|sql| sql.contains("NOT VALID SQL")));

    assert!(fx.states().iter().all(|(_, executed)| !*executed));
    for table in ["a", "b", "c"] {
        assert!(!fx.table_exists(table), "{table} survived the rollback");
    }
}

#[test]
fn up_respects_step_limit() {
    let fx = Fixture::new();
    let mut runner = fx.ready();

    for i in 1..=5 {
        new_migration(
            &mut runner,
            &format!("m{i}"),
            &format!("CREATE TABLE t{i} (id INTEGER);"),
            &format!("DROP TABLE t{i};"),
        );
    }

    let report = runner.up(Steps::from_arg(2).unwrap()).unwrap();
    assert_eq!(names(&report), ["m1", "m2"]);

    let states = fx.states();
    assert_eq!(
        states.iter().filter(|(_, executed)| *executed).count(),
        2
    );
    assert!(states[..2].iter().all(|(_, executed)| *executed));
    assert!(states[2..].iter().all(|(_, executed)| !*executed));

    // a limit larger than what is pending applies the rest
    let rest = runner.up(Steps::from_arg(10).unwrap()).unwrap();
    assert_eq!(names(&rest), ["m3", "m4", "m5"]);

    let reverted = runner.down(Steps::from_arg(1).unwrap()).unwrap();
    assert_eq!(names(&reverted), ["m5"]);
}

#[test]
fn nothing_to_do_is_success() {
    let fx = Fixture::new();
    let mut runner = fx.ready();

    assert!(runner.up(Steps::All).unwrap().is_empty());
    assert!(runner.down(Steps::All).unwrap().is_empty());
}

#[test]
fn ordering_follows_created_at_not_insertion() {
    let fx = Fixture::new();
    let mut runner = fx.ready();

    // insert the later migration first to prove the sort key is created_at
    let db = fx.db();
    db.execute_batch(
        r#"INSERT INTO "migrations" (name, created_at, executed) VALUES ('add_col', 2000, 0);
           INSERT INTO "migrations" (name, created_at, executed) VALUES ('init', 1000, 0);"#,
    )
    .unwrap();
    drop(db);

    let dir = fx.migrations_dir();
    write_script(&dir, "1000_init.up.sql", "CREATE TABLE t (id INTEGER);");
    write_script(&dir, "1000_init.down.sql", "DROP TABLE t;");
    write_script(&dir, "2000_add_col.up.sql", "ALTER TABLE t ADD COLUMN c INTEGER;");
    write_script(&dir, "2000_add_col.down.sql", "ALTER TABLE t DROP COLUMN c;");

    let up = runner.up(Steps::All).unwrap();
    assert_eq!(names(&up), ["init", "add_col"]);
    assert_eq!(up.applied[0].to_string(), "1000_init");

    let down = runner.down(Steps::All).unwrap();
    assert_eq!(names(&down), ["add_col", "init"]);
    assert!(!fx.table_exists("t"));
}

#[test]
fn missing_script_fails_at_execution_time() {
    let fx = Fixture::new();
    let mut runner = fx.ready();

    let created = runner.create("no_up_yet").unwrap();
    fs::remove_file(&created.files.up).unwrap();

    let err = runner.up(Steps::All).unwrap_err();
    assert!(
        matches!(err, Error::FileNotFound { ref path } if *path == created.files.up),
        "unexpected error: {err}"
    );
    assert_eq!(fx.states(), [("no_up_yet".to_string(), false)]);
}

#[test]
fn scripts_are_read_fresh_each_run() {
    let fx = Fixture::new();
    let mut runner = fx.ready();

    let created = new_migration(&mut runner, "create_a", "CREATE TABLE a (id INTEGER);", "");
    runner.up(Steps::All).unwrap();

    fs::write(&created.files.down, "DROP TABLE a;").unwrap();
    runner.down(Steps::All).unwrap();
    assert!(!fx.table_exists("a"));
}

#[test]
fn status_lists_every_record_in_order() {
    let fx = Fixture::new();
    let mut runner = fx.ready();

    new_migration(&mut runner, "first", "CREATE TABLE a (id INTEGER);", "DROP TABLE a;");
    new_migration(&mut runner, "second", "CREATE TABLE b (id INTEGER);", "DROP TABLE b;");
    runner.up(Steps::from_arg(1).unwrap()).unwrap();

    let status = runner.status().unwrap();
    let listed: Vec<_> = status.iter().map(|m| (m.name.as_str(), m.executed)).collect();
    assert_eq!(listed, [("first", true), ("second", false)]);
}

#[test]
fn status_reads_while_another_connection_holds_the_write_lock() {
    let fx = Fixture::new();
    let mut runner = fx.ready();
    new_migration(&mut runner, "first", "CREATE TABLE a (id INTEGER);", "DROP TABLE a;");

    let writer = fx.db();
    writer.execute_batch("BEGIN IMMEDIATE").unwrap();

    let status = runner.status().unwrap();
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].name, "first");

    writer.execute_batch("ROLLBACK").unwrap();
}

// ============================================================================
// Deadline and cancellation
// ============================================================================

#[test]
fn hung_statement_times_out_and_rolls_back() {
    let fx = Fixture::new();
    let mut runner =
        fx.runner_with(RunnerConfig::new(fx.migrations_dir()).with_step_timeout(Duration::from_millis(300)));
    runner.init().unwrap();

    new_migration(&mut runner, "create_a", "CREATE TABLE a (id INTEGER);", "DROP TABLE a;");
    new_migration(
        &mut runner,
        "spin",
        "CREATE TABLE spin AS WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT count(*) AS n FROM c;",
        "DROP TABLE spin;",
    );

    let err = runner.up(Steps::All).unwrap_err();
    assert!(
        matches!(err, Error::Timeout { ref migration, .. } if migration == "spin"),
        "unexpected error: {err}"
    );

    assert!(fx.states().iter().all(|(_, executed)| !*executed));
    assert!(!fx.table_exists("a"));
    assert!(!fx.table_exists("spin"));

    // the connection is still usable afterwards
    assert_eq!(runner.status().unwrap().len(), 2);
}

#[test]
fn cancelled_runner_applies_nothing() {
    let fx = Fixture::new();
    let token = CancellationToken::new();
    let mut runner = fx.runner().with_cancellation(token.clone());
    runner.init().unwrap();

    new_migration(&mut runner, "create_a", "CREATE TABLE a (id INTEGER);", "DROP TABLE a;");
    token.cancel();

    let err = runner.up(Steps::All).unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(fx.states(), [("create_a".to_string(), false)]);
    assert!(!fx.table_exists("a"));
    assert!(runner.cancellation_token().is_cancelled());
}

#[test]
fn cancelling_mid_batch_interrupts_the_running_step_and_rolls_back() {
    let fx = Fixture::new();
    let mut runner =
        fx.runner_with(RunnerConfig::new(fx.migrations_dir()).with_step_timeout(Duration::from_secs(30)));
    runner.init().unwrap();

    new_migration(&mut runner, "create_a", "CREATE TABLE a (id INTEGER);", "DROP TABLE a;");
    new_migration(
        &mut runner,
        "spin",
        "CREATE TABLE spin AS WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT count(*) AS n FROM c;",
        "DROP TABLE spin;",
    );

    let token = runner.cancellation_token();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        token.cancel();
    });

    let started = Instant::now();
    let err = runner.up(Steps::All).unwrap_err();
    canceller.join().unwrap();

    assert!(matches!(err, Error::Cancelled), "unexpected error: {err}");
    // stopped by the cancel, well before the step deadline
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(fx.states().iter().all(|(_, executed)| !*executed));
    assert!(!fx.table_exists("a"));
    assert!(!fx.table_exists("spin"));
}

#[test]
fn exec_on_start_runs_on_connect() {
    let fx = Fixture::new();
    let connection = ConnectionConfig::new(Dialect::Sqlite, fx.db_path().to_string_lossy())
        .with_exec_on_start("CREATE TABLE IF NOT EXISTS boot (id INTEGER);");
    Runner::connect(&connection, RunnerConfig::new(fx.migrations_dir())).unwrap();
    assert!(fx.table_exists("boot"));
}

#[test]
fn failing_exec_on_start_is_a_query_error() {
    let fx = Fixture::new();
    let connection = ConnectionConfig::new(Dialect::Sqlite, fx.db_path().to_string_lossy())
        .with_exec_on_start("NOT SQL AT ALL");
    let err = Runner::connect(&connection, RunnerConfig::new(fx.migrations_dir()))
        .err()
        .expect("exec on start should fail");
    assert!(matches!(err, Error::Query { ref sql, .. } if sql == "NOT SQL AT ALL"));
}
