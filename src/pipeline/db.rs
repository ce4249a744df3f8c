//! Durable kill sink
//!
//! `KillSink` is the seam between the engine and storage. The SQLite
//! implementation writes the relational rows (host-scoped server and match,
//! player, weapon) idempotently, one `loadout` row per non-empty loadout,
//! and appends one `kill` row per event inside a single transaction. Tables
//! live in `/sql/`.

use super::hosts::HostDirectory;
use super::types::{KillEvent, Loadout};
use async_trait::async_trait;
use rusqlite::{params, Connection, Row, Transaction};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Debug)]
pub enum SinkError {
    Sqlite(rusqlite::Error),
    Io(std::io::Error),
    SchemaDirMissing(String),
    /// Connection mutex poisoned by a panicking writer
    LockPoisoned,
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Sqlite(e) => write!(f, "sqlite error: {}", e),
            SinkError::Io(e) => write!(f, "io error: {}", e),
            SinkError::SchemaDirMissing(dir) => write!(f, "Schema directory not found: {}", dir),
            SinkError::LockPoisoned => write!(f, "sqlite connection lock poisoned"),
        }
    }
}

impl std::error::Error for SinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SinkError::Sqlite(e) => Some(e),
            SinkError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for SinkError {
    fn from(e: rusqlite::Error) -> Self {
        SinkError::Sqlite(e)
    }
}

impl From<std::io::Error> for SinkError {
    fn from(e: std::io::Error) -> Self {
        SinkError::Io(e)
    }
}

/// Durable write side for accepted kills
///
/// Called from the persist task, never from the submission path, so a slow
/// or failing store cannot delay or fail a submission.
#[async_trait]
pub trait KillSink: Send + Sync {
    /// Persist one kill
    ///
    /// Events with a missing dimension are stored flagged `incomplete`.
    async fn persist(&self, event: &KillEvent) -> Result<(), SinkError>;
}

/// Run schema migrations from SQL files
///
/// Executes every `.sql` file in `schema_dir` in file-name order (00_, 01_,
/// ...). Files must use `IF NOT EXISTS` so reruns are no-ops.
pub fn run_schema_migrations(conn: &mut Connection, schema_dir: &str) -> Result<(), SinkError> {
    let schema_path = Path::new(schema_dir);

    if !schema_path.exists() {
        return Err(SinkError::SchemaDirMissing(schema_dir.to_string()));
    }

    conn.pragma_update(None, "journal_mode", "WAL")?;
    log::info!("📊 Enabled WAL mode for SQLite database");

    let mut sql_files: Vec<_> = fs::read_dir(schema_path)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().and_then(|s| s.to_str()) == Some("sql"))
        .collect();

    sql_files.sort_by_key(|entry| entry.file_name());

    log::info!("🔧 Running schema migrations from: {}", schema_dir);

    for entry in sql_files {
        let path = entry.path();
        let filename = entry.file_name().to_string_lossy().into_owned();

        log::info!("   ├─ Executing: {}", filename);
        let sql_content = fs::read_to_string(&path)?;
        conn.execute_batch(&sql_content)?;
    }

    log::info!("✅ All schema migrations completed successfully");

    Ok(())
}

/// SQLite implementation of `KillSink`
pub struct SqliteKillWriter {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteKillWriter {
    /// Open (creating if needed) the database at `db_path`
    ///
    /// Does not create the schema; see `open_with_schema`.
    pub fn new(db_path: &str) -> Result<Self, SinkError> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open the database and apply migrations from `schema_dir`
    pub fn open_with_schema(db_path: &str, schema_dir: &str) -> Result<Self, SinkError> {
        let writer = Self::new(db_path)?;
        {
            let mut conn = writer.lock()?;
            run_schema_migrations(&mut conn, schema_dir)?;
        }
        Ok(writer)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, SinkError> {
        self.conn.lock().map_err(|_| SinkError::LockPoisoned)
    }

    /// Every stored kill in arrival order, for rebuilding the index
    ///
    /// Player names come from the `player` table (latest name seen).
    pub fn load_kills(&self) -> Result<Vec<KillEvent>, SinkError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT k.host_id, k.server_name, k.match_id, k.game_map, k.gamemode,
                   k.attacker_id, COALESCE(a.player_name, ''),
                   k.victim_id, COALESCE(v.player_name, ''),
                   k.cause_of_death,
                   k.attacker_held_weapon, k.attacker_weapon_mods,
                   k.victim_held_weapon, k.victim_weapon_mods,
                   k.distance, k.game_time, k.player_count, k.killstat_version,
                   al.weapon_1, al.weapon_1_mods, al.weapon_2, al.weapon_2_mods,
                   al.weapon_3, al.weapon_3_mods, al.offhand_weapon_1, al.offhand_weapon_2,
                   vl.weapon_1, vl.weapon_1_mods, vl.weapon_2, vl.weapon_2_mods,
                   vl.weapon_3, vl.weapon_3_mods, vl.offhand_weapon_1, vl.offhand_weapon_2
            FROM kill k
            LEFT JOIN player a ON a.player_id = k.attacker_id
            LEFT JOIN player v ON v.player_id = k.victim_id
            LEFT JOIN loadout al ON al.loadout_id = k.attacker_loadout_id
            LEFT JOIN loadout vl ON vl.loadout_id = k.victim_loadout_id
            ORDER BY k.kill_id
            "#,
        )?;

        let rows = stmt.query_map([], |row| {
            let cause_of_death: String = row.get(9)?;
            let victim_weapon: Option<String> = row.get(12)?;
            let deaths_with_weapon =
                !cause_of_death.is_empty() && victim_weapon.as_deref() == Some(cause_of_death.as_str());

            Ok(KillEvent {
                server_id: row.get(0)?,
                servername: row.get(1)?,
                match_id: row.get(2)?,
                map: row.get(3)?,
                game_mode: row.get(4)?,
                attacker_id: row.get(5)?,
                attacker_name: row.get(6)?,
                victim_id: row.get(7)?,
                victim_name: row.get(8)?,
                cause_of_death,
                attacker_weapon: row.get(10)?,
                attacker_weapon_mods: row.get(11)?,
                victim_weapon,
                victim_weapon_mods: row.get(13)?,
                attacker_loadout: loadout_from_row(row, 18)?,
                victim_loadout: loadout_from_row(row, 26)?,
                distance: row.get(14)?,
                game_time: row.get(15)?,
                player_count: row.get(16)?,
                kills: 1,
                deaths: 1,
                deaths_with_weapon,
                killstat_version: row.get(17)?,
            })
        })?;

        let mut kills = Vec::new();
        for row in rows {
            kills.push(row?);
        }
        Ok(kills)
    }

    pub fn load_hosts(&self) -> Result<HostDirectory, SinkError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT host_id, host_name FROM host ORDER BY host_id")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;

        let mut hosts = HostDirectory::new();
        for row in rows {
            let (host_id, host_name) = row?;
            hosts.insert(host_id, host_name);
        }
        Ok(hosts)
    }

    /// Register a new host; returns `(host_id, host_token)`
    pub fn register_host(&self, host_name: &str) -> Result<(i64, String), SinkError> {
        let conn = self.lock()?;
        conn.execute("INSERT INTO host (host_name) VALUES (?1)", params![host_name])?;
        let host_id = conn.last_insert_rowid();
        let token: String = conn.query_row(
            "SELECT host_token FROM host WHERE host_id = ?1",
            params![host_id],
            |row| row.get(0),
        )?;
        Ok((host_id, token))
    }

    pub fn kill_count(&self) -> Result<i64, SinkError> {
        let conn = self.lock()?;
        let count = conn.query_row("SELECT COUNT(*) FROM kill", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[async_trait]
impl KillSink for SqliteKillWriter {
    async fn persist(&self, event: &KillEvent) -> Result<(), SinkError> {
        let incomplete = event.missing_dimension().is_some();
        let now = chrono::Utc::now().timestamp();

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        if !event.servername.is_empty() {
            tx.execute(
                "INSERT OR IGNORE INTO server (server_name, host_id) VALUES (?1, ?2)",
                params![event.servername, event.server_id],
            )?;
        }

        if let Some(match_id) = &event.match_id {
            tx.execute(
                r#"
                INSERT OR IGNORE INTO game_match (match_id, host_id, server_name, game_map, gamemode)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![match_id, event.server_id, event.servername, event.map, event.game_mode],
            )?;
        }

        for (player_id, player_name) in [
            (&event.attacker_id, &event.attacker_name),
            (&event.victim_id, &event.victim_name),
        ] {
            if player_id.is_empty() {
                continue;
            }
            tx.execute(
                r#"
                INSERT INTO player (player_id, player_name) VALUES (?1, ?2)
                ON CONFLICT(player_id) DO UPDATE SET player_name = excluded.player_name
                WHERE excluded.player_name != ''
                "#,
                params![player_id, player_name],
            )?;
        }

        let held = [
            Some(event.cause_of_death.as_str()),
            event.attacker_weapon.as_deref(),
            event.victim_weapon.as_deref(),
        ];
        let carried = [&event.attacker_loadout, &event.victim_loadout]
            .into_iter()
            .flat_map(|loadout| [&loadout.weapon_1, &loadout.weapon_2, &loadout.weapon_3])
            .map(|w| w.as_deref());
        for weapon_id in held.into_iter().chain(carried).flatten().filter(|w| !w.is_empty()) {
            tx.execute(
                "INSERT OR IGNORE INTO weapon (weapon_id) VALUES (?1)",
                params![weapon_id],
            )?;
        }

        let attacker_loadout_id = insert_loadout(&tx, &event.attacker_loadout)?;
        let victim_loadout_id = insert_loadout(&tx, &event.victim_loadout)?;

        tx.execute(
            r#"
            INSERT INTO kill (
                host_id, server_name, match_id, game_map, gamemode,
                attacker_id, victim_id, cause_of_death,
                attacker_held_weapon, attacker_weapon_mods,
                victim_held_weapon, victim_weapon_mods,
                attacker_loadout_id, victim_loadout_id,
                distance, game_time, player_count, killstat_version,
                incomplete, unix_time
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)
            "#,
            params![
                event.server_id,
                event.servername,
                event.match_id,
                event.map,
                event.game_mode,
                event.attacker_id,
                event.victim_id,
                event.cause_of_death,
                event.attacker_weapon,
                event.attacker_weapon_mods,
                event.victim_weapon,
                event.victim_weapon_mods,
                attacker_loadout_id,
                victim_loadout_id,
                event.distance,
                event.game_time,
                event.player_count,
                event.killstat_version,
                incomplete,
                now,
            ],
        )?;

        tx.commit()?;
        Ok(())
    }
}

/// Store a loadout row; empty loadouts are not stored
fn insert_loadout(tx: &Transaction<'_>, loadout: &Loadout) -> Result<Option<i64>, SinkError> {
    if loadout.is_empty() {
        return Ok(None);
    }

    tx.execute(
        r#"
        INSERT INTO loadout (
            weapon_1, weapon_1_mods, weapon_2, weapon_2_mods,
            weapon_3, weapon_3_mods, offhand_weapon_1, offhand_weapon_2
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
        params![
            loadout.weapon_1,
            loadout.weapon_1_mods,
            loadout.weapon_2,
            loadout.weapon_2_mods,
            loadout.weapon_3,
            loadout.weapon_3_mods,
            loadout.offhand_weapon_1,
            loadout.offhand_weapon_2,
        ],
    )?;
    Ok(Some(tx.last_insert_rowid()))
}

/// Eight loadout columns starting at `start`; a missing row reads as empty
fn loadout_from_row(row: &Row<'_>, start: usize) -> rusqlite::Result<Loadout> {
    Ok(Loadout {
        weapon_1: row.get(start)?,
        weapon_1_mods: row.get::<_, Option<i64>>(start + 1)?.unwrap_or(0),
        weapon_2: row.get(start + 2)?,
        weapon_2_mods: row.get::<_, Option<i64>>(start + 3)?.unwrap_or(0),
        weapon_3: row.get(start + 4)?,
        weapon_3_mods: row.get::<_, Option<i64>>(start + 5)?.unwrap_or(0),
        offhand_weapon_1: row.get(start + 6)?,
        offhand_weapon_2: row.get(start + 7)?,
    })
}
