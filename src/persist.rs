//! World ↔ redb persistence.
//!
//! redb is a save file: loaded on boot, flushed on every mutation.
//! Never queried at runtime — World is the runtime truth.

use crate::world::{Event, Punishment, Task, Tomato, User, World};
use redb::{Database, ReadableTable, TableDefinition};
use std::sync::Arc;
#[cfg(feature = "profile")]
use std::time::Instant;

const WORLD_USERS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("world_users");
const WORLD_TASKS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("world_tasks");
const WORLD_TOMATOES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("world_tomatoes");
const WORLD_PUNISHMENTS: TableDefinition<&[u8], &[u8]> =
    TableDefinition::new("world_punishments");
const WORLD_META: TableDefinition<&str, &[u8]> = TableDefinition::new("world_meta");

/// Thin handle to the redb file. Cloneable (Arc inside).
#[derive(Clone)]
pub struct SaveFile {
    db: Arc<Database>,
}

impl SaveFile {
    /// Open (or create) the save file at the given path.
    /// Creates tables if they don't exist.
    pub fn open(path: &str) -> Result<Self, SaveFileError> {
        let db = Database::create(path)?;

        // Ensure tables exist
        let txn = db.begin_write()?;
        {
            let _ = txn.open_table(WORLD_USERS)?;
            let _ = txn.open_table(WORLD_TASKS)?;
            let _ = txn.open_table(WORLD_TOMATOES)?;
            let _ = txn.open_table(WORLD_PUNISHMENTS)?;
            let _ = txn.open_table(WORLD_META)?;
        }
        txn.commit()?;

        Ok(SaveFile { db: Arc::new(db) })
    }

    /// Load the entire World from disk. Called once at boot.
    pub fn load_world(&self) -> Result<World, SaveFileError> {
        let mut world = World::new();
        let txn = self.db.begin_read()?;

        let users_table = txn.open_table(WORLD_USERS)?;
        for entry in users_table.iter()? {
            let (_, value) = entry?;
            let user: User = postcard::from_bytes(value.value())
                .map_err(|e| SaveFileError::Decode(e.to_string()))?;
            world.users.insert(user.id, user);
        }

        let tasks_table = txn.open_table(WORLD_TASKS)?;
        for entry in tasks_table.iter()? {
            let (_, value) = entry?;
            let task: Task = postcard::from_bytes(value.value())
                .map_err(|e| SaveFileError::Decode(e.to_string()))?;
            world.tasks.insert(task.id, task);
        }

        let tomatoes_table = txn.open_table(WORLD_TOMATOES)?;
        for entry in tomatoes_table.iter()? {
            let (_, value) = entry?;
            let tomato: Tomato = postcard::from_bytes(value.value())
                .map_err(|e| SaveFileError::Decode(e.to_string()))?;
            world.tomatoes.insert(tomato.id, tomato);
        }

        let punishments_table = txn.open_table(WORLD_PUNISHMENTS)?;
        for entry in punishments_table.iter()? {
            let (_, value) = entry?;
            let punishment: Punishment = postcard::from_bytes(value.value())
                .map_err(|e| SaveFileError::Decode(e.to_string()))?;
            world.punishments.insert(punishment.id, punishment);
        }

        // Load revision counter
        let meta_table = txn.open_table(WORLD_META)?;
        if let Some(rev_data) = meta_table.get("revision")? {
            let bytes = rev_data.value();
            if bytes.len() == 8 {
                world.revision = u64::from_le_bytes(bytes.try_into().unwrap());
            }
        }

        Ok(world)
    }

    /// Flush a single event to disk. Called after every World mutation,
    /// while the caller still holds the world write lock.
    /// Writes exactly the entities the event names + the updated revision
    /// in one transaction — the task-state change and its ledger effects
    /// land together or not at all.
    pub fn flush(&self, world: &World, event: &Event) -> Result<(), SaveFileError> {
        #[cfg(feature = "profile")]
        let total_start = Instant::now();
        let txn = self.db.begin_write()?;
        {
            #[cfg(feature = "profile")]
            let table_start = Instant::now();
            let mut tasks = txn.open_table(WORLD_TASKS)?;
            let mut tomatoes = txn.open_table(WORLD_TOMATOES)?;
            let mut punishments = txn.open_table(WORLD_PUNISHMENTS)?;
            let mut meta = txn.open_table(WORLD_META)?;
            #[cfg(feature = "profile")]
            tracing::debug!(elapsed_us = table_start.elapsed().as_micros() as u64, "flush opened tables");

            #[cfg(feature = "profile")]
            let write_start = Instant::now();
            match event {
                Event::TaskCreated { task, .. } => {
                    let bytes = postcard::to_allocvec(task)
                        .map_err(|e| SaveFileError::Encode(e.to_string()))?;
                    tasks.insert(task.id.as_bytes().as_slice(), bytes.as_slice())?;
                }

                Event::TaskUpdated { task_id, .. } => {
                    // Look up the current state in World and write the whole entity
                    let task = &world.tasks[task_id];
                    let bytes = postcard::to_allocvec(task)
                        .map_err(|e| SaveFileError::Encode(e.to_string()))?;
                    tasks.insert(task_id.as_bytes().as_slice(), bytes.as_slice())?;
                }

                Event::TaskCompleted { task_id, tomato, resolved, .. } => {
                    let task = &world.tasks[task_id];
                    let bytes = postcard::to_allocvec(task)
                        .map_err(|e| SaveFileError::Encode(e.to_string()))?;
                    tasks.insert(task_id.as_bytes().as_slice(), bytes.as_slice())?;

                    if let Some(tomato_id) = tomato {
                        let t = &world.tomatoes[tomato_id];
                        let bytes = postcard::to_allocvec(t)
                            .map_err(|e| SaveFileError::Encode(e.to_string()))?;
                        tomatoes.insert(tomato_id.as_bytes().as_slice(), bytes.as_slice())?;
                    }

                    if let Some(punishment_id) = resolved {
                        let p = &world.punishments[punishment_id];
                        let bytes = postcard::to_allocvec(p)
                            .map_err(|e| SaveFileError::Encode(e.to_string()))?;
                        punishments.insert(punishment_id.as_bytes().as_slice(), bytes.as_slice())?;
                    }
                }

                Event::TaskExpired { task_id, punishment, .. } => {
                    let task = &world.tasks[task_id];
                    let bytes = postcard::to_allocvec(task)
                        .map_err(|e| SaveFileError::Encode(e.to_string()))?;
                    tasks.insert(task_id.as_bytes().as_slice(), bytes.as_slice())?;

                    let p = &world.punishments[punishment];
                    let bytes = postcard::to_allocvec(p)
                        .map_err(|e| SaveFileError::Encode(e.to_string()))?;
                    punishments.insert(punishment.as_bytes().as_slice(), bytes.as_slice())?;
                }

                Event::TaskDeleted { task_id, revoked, .. } => {
                    tasks.remove(task_id.as_bytes().as_slice())?;
                    for tomato_id in revoked {
                        tomatoes.remove(tomato_id.as_bytes().as_slice())?;
                    }
                }
            }

            // Always update revision
            meta.insert("revision", world.revision.to_le_bytes().as_slice())?;
            #[cfg(feature = "profile")]
            tracing::debug!(elapsed_us = write_start.elapsed().as_micros() as u64, "flush wrote rows and revision");
        }
        #[cfg(feature = "profile")]
        let commit_start = Instant::now();
        txn.commit()?;
        #[cfg(feature = "profile")]
        tracing::debug!(elapsed_us = commit_start.elapsed().as_micros() as u64, total_us = total_start.elapsed().as_micros() as u64, "flush committed transaction");
        Ok(())
    }

    /// Write a user to the save file (registration, username change).
    pub fn save_user(&self, user: &User) -> Result<(), SaveFileError> {
        let txn = self.db.begin_write()?;
        {
            let mut users = txn.open_table(WORLD_USERS)?;
            let bytes = postcard::to_allocvec(user)
                .map_err(|e| SaveFileError::Encode(e.to_string()))?;
            users.insert(user.id.as_bytes().as_slice(), bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }
}

// ── Errors ─────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SaveFileError {
    Redb(String),
    Decode(String),
    Encode(String),
}

// redb 2.x has many error types. Blanket them all into SaveFileError::Redb.
macro_rules! from_redb {
    ($($t:ty),*) => {
        $(impl From<$t> for SaveFileError {
            fn from(e: $t) -> Self { SaveFileError::Redb(e.to_string()) }
        })*
    };
}

from_redb!(
    redb::Error,
    redb::DatabaseError,
    redb::TableError,
    redb::TransactionError,
    redb::StorageError,
    redb::CommitError
);

impl std::fmt::Display for SaveFileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SaveFileError::Redb(e) => write!(f, "redb: {e}"),
            SaveFileError::Decode(e) => write!(f, "decode: {e}"),
            SaveFileError::Encode(e) => write!(f, "encode: {e}"),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{Priority, PunishmentKind};
    use chrono::{Duration, Utc};
    use std::fs;
    use uuid::Uuid;

    /// Create a temp save file that auto-cleans.
    fn temp_save(name: &str) -> (SaveFile, String) {
        let path = format!("/tmp/tomato_test_{name}_{}.redb", std::process::id());
        let _ = fs::remove_file(&path); // clean up any leftover
        let sf = SaveFile::open(&path).unwrap();
        (sf, path)
    }

    fn cleanup(path: &str) {
        let _ = fs::remove_file(path);
    }

    fn create_task(world: &mut World, sf: &SaveFile, due_offset_secs: i64) -> Uuid {
        let due = Utc::now() + Duration::seconds(due_offset_secs);
        let event = world
            .create_task(
                Uuid::nil(),
                "Persisted task".into(),
                Some("with a description".into()),
                Priority::High,
                Some(due),
            )
            .unwrap();
        sf.flush(world, &event).unwrap();
        match event {
            Event::TaskCreated { task, .. } => task.id,
            _ => panic!("expected TaskCreated"),
        }
    }

    #[test]
    fn round_trip_empty_world() {
        let (sf, path) = temp_save("empty");

        let world = sf.load_world().unwrap();
        assert_eq!(world.users.len(), 0);
        assert_eq!(world.tasks.len(), 0);
        assert_eq!(world.tomatoes.len(), 0);
        assert_eq!(world.punishments.len(), 0);
        assert_eq!(world.revision, 0);

        cleanup(&path);
    }

    #[test]
    fn save_user_and_reload() {
        let (sf, path) = temp_save("user");

        let user = User {
            id: Uuid::new_v4(),
            username: "lena".into(),
            email: "lena@example.com".into(),
            password_hash: "not-a-real-hash".into(),
            created_at: Utc::now(),
        };
        sf.save_user(&user).unwrap();

        let world = sf.load_world().unwrap();
        assert_eq!(world.users.len(), 1);
        assert_eq!(world.users[&user.id].email, "lena@example.com");
        assert_eq!(world.get_user_by_email("lena@example.com").unwrap().id, user.id);

        cleanup(&path);
    }

    #[test]
    fn flush_create_update_and_reload() {
        let (sf, path) = temp_save("update");

        let mut world = sf.load_world().unwrap();
        let task_id = create_task(&mut world, &sf, 3600);

        let event = world
            .update_task(Uuid::nil(), task_id, "Renamed".into(), None, Priority::Low, None)
            .unwrap();
        sf.flush(&world, &event).unwrap();

        // Reboot — world should have the task in the right state
        let world2 = sf.load_world().unwrap();
        assert_eq!(world2.revision, 2);
        assert_eq!(world2.tasks.len(), 1);

        let task = &world2.tasks[&task_id];
        assert_eq!(task.title, "Renamed");
        assert_eq!(task.description, None);
        assert_eq!(task.priority, Priority::Low);
        assert!(!task.deadline_tracked);

        cleanup(&path);
    }

    #[test]
    fn flush_completion_persists_tomato() {
        let (sf, path) = temp_save("complete");

        let mut world = sf.load_world().unwrap();
        let task_id = create_task(&mut world, &sf, 3600);

        let event = world.complete_task(Uuid::nil(), task_id).unwrap().unwrap();
        sf.flush(&world, &event).unwrap();

        let world2 = sf.load_world().unwrap();
        let task = &world2.tasks[&task_id];
        assert!(task.completed);
        assert_eq!(task.tomatoes_earned, 1);
        assert_eq!(world2.tomato_count(Uuid::nil()), 1);
        assert_eq!(world2.tomatoes.values().next().unwrap().task_id, task_id);

        cleanup(&path);
    }

    #[test]
    fn flush_expiry_persists_punishment() {
        let (sf, path) = temp_save("expire");

        let mut world = sf.load_world().unwrap();
        let task_id = create_task(&mut world, &sf, -5);

        let event = world
            .expire_task(task_id, Utc::now(), PunishmentKind::Fog)
            .unwrap();
        sf.flush(&world, &event).unwrap();

        let world2 = sf.load_world().unwrap();
        assert!(world2.tasks[&task_id].expired);
        assert_eq!(world2.punishments.len(), 1);
        let p = world2.punishments.values().next().unwrap();
        assert_eq!(p.task_id, task_id);
        assert_eq!(p.kind, PunishmentKind::Fog);
        assert!(!p.resolved);

        cleanup(&path);
    }

    #[test]
    fn flush_resolution_persists_both_sides() {
        let (sf, path) = temp_save("resolve");

        let mut world = sf.load_world().unwrap();
        let late = create_task(&mut world, &sf, -5);
        let event = world
            .expire_task(late, Utc::now(), PunishmentKind::Weeds)
            .unwrap();
        sf.flush(&world, &event).unwrap();

        let fresh = create_task(&mut world, &sf, 3600);
        let event = world.complete_task(Uuid::nil(), fresh).unwrap().unwrap();
        sf.flush(&world, &event).unwrap();

        let world2 = sf.load_world().unwrap();
        let p = world2.punishments.values().next().unwrap();
        assert!(p.resolved);
        assert_eq!(p.resolved_by, Some(fresh));
        assert_eq!(world2.tasks[&fresh].tomatoes_earned, 0);
        assert_eq!(world2.tomato_count(Uuid::nil()), 0);

        cleanup(&path);
    }

    #[test]
    fn delete_removes_task_and_revoked_tomatoes_from_disk() {
        let (sf, path) = temp_save("delete");

        let mut world = sf.load_world().unwrap();
        let task_id = create_task(&mut world, &sf, 3600);

        let event = world.complete_task(Uuid::nil(), task_id).unwrap().unwrap();
        sf.flush(&world, &event).unwrap();

        let event = world.delete_task(Uuid::nil(), task_id).unwrap();
        sf.flush(&world, &event).unwrap();

        // Reboot — task and its tomato should be gone
        let world2 = sf.load_world().unwrap();
        assert_eq!(world2.tasks.len(), 0);
        assert_eq!(world2.tomatoes.len(), 0);
        assert_eq!(world2.revision, 3);

        cleanup(&path);
    }
}
