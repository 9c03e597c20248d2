use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// ── Entity types ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Priority {
    Low = 0,
    Medium = 1,
    High = 2,
}

/// Cosmetic flavor attached to a punishment. Picked uniformly at random
/// when the punishment is created; display only, never drives logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PunishmentKind {
    Bug = 0,
    Fog = 1,
    Fungus = 2,
    Weeds = 3,
    WiltedLeaves = 4,
}

impl PunishmentKind {
    pub const ALL: [PunishmentKind; 5] = [
        PunishmentKind::Bug,
        PunishmentKind::Fog,
        PunishmentKind::Fungus,
        PunishmentKind::Weeds,
        PunishmentKind::WiltedLeaves,
    ];

    pub fn random() -> PunishmentKind {
        use rand::Rng;
        Self::ALL[rand::thread_rng().gen_range(0..Self::ALL.len())]
    }
}

/// A task — the unit of work being tracked.
///
/// `expired` and `completed` are one-way flags: `expired` flips only while
/// the task is incomplete, and `completed` never reverts. `deadline_tracked`
/// is derived (true iff due_time is set) and recomputed on create/update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub due_time: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed: bool,
    pub expired: bool,
    pub deadline_tracked: bool,
    /// Reward tokens this task generated. 0 or 1 under current rules;
    /// kept as an integer so multi-reward tasks stay representable.
    pub tomatoes_earned: u32,
}

/// A reward token. Immutably tied to the task that produced it; removed
/// only when that task is deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tomato {
    pub id: Uuid,
    pub user_id: Uuid,
    pub task_id: Uuid,
    pub earned_at: DateTime<Utc>,
}

/// An outstanding (or settled) debt. Created when a task misses its
/// deadline; resolved at most once, by a later on-time completion.
/// Never deleted — punishments outlive the tasks that caused them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Punishment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub task_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub kind: PunishmentKind,
    pub resolved: bool,
    pub resolved_by: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

// ── Events ─────────────────────────────────────────────────────

/// What actually happened. Consumed by the persistence layer: flush()
/// writes exactly the entities an event names. Each event carries the
/// revision it was applied at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    TaskCreated {
        revision: u64,
        task: Task,
    },
    TaskUpdated {
        revision: u64,
        task_id: Uuid,
    },
    TaskCompleted {
        revision: u64,
        task_id: Uuid,
        /// Tomato granted by this completion, if any.
        tomato: Option<Uuid>,
        /// Punishment this completion paid down, if any.
        resolved: Option<Uuid>,
    },
    TaskExpired {
        revision: u64,
        task_id: Uuid,
        punishment: Uuid,
    },
    TaskDeleted {
        revision: u64,
        task_id: Uuid,
        /// Tomatoes retracted along with the task.
        revoked: Vec<Uuid>,
    },
}

// ── Errors ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorldError {
    /// Title missing or blank
    TitleRequired,
    TaskNotFound,
    /// Task belongs to a different user
    NotOwner,
}

impl std::fmt::Display for WorldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorldError::TitleRequired => write!(f, "title is required"),
            WorldError::TaskNotFound => write!(f, "task not found"),
            WorldError::NotOwner => write!(f, "task belongs to another user"),
        }
    }
}

// ── The World ──────────────────────────────────────────────────

/// The authoritative state. Lives in memory. Loaded from redb on boot.
/// Every mutation is a method that validates, mutates, and returns an
/// Event for the save-file flush. Failed calls change nothing.
///
/// Entities reference each other by id only — no embedded object graphs.
pub struct World {
    pub users: HashMap<Uuid, User>,
    pub tasks: HashMap<Uuid, Task>,
    pub tomatoes: HashMap<Uuid, Tomato>,
    pub punishments: HashMap<Uuid, Punishment>,
    pub revision: u64,
}

impl World {
    pub fn new() -> Self {
        World {
            users: HashMap::new(),
            tasks: HashMap::new(),
            tomatoes: HashMap::new(),
            punishments: HashMap::new(),
            revision: 0,
        }
    }

    // ── Reconciliation engine ──────────────────────────────────

    /// Create a task for a user. Fresh tasks start incomplete, unexpired,
    /// with no tomatoes; the deadline is tracked iff one was given.
    pub fn create_task(
        &mut self,
        user_id: Uuid,
        title: String,
        description: Option<String>,
        priority: Priority,
        due_time: Option<DateTime<Utc>>,
    ) -> Result<Event, WorldError> {
        if title.trim().is_empty() {
            return Err(WorldError::TitleRequired);
        }

        let task = Task {
            id: Uuid::new_v4(),
            user_id,
            title,
            description,
            priority,
            created_at: Utc::now(),
            due_time,
            completed_at: None,
            completed: false,
            expired: false,
            deadline_tracked: due_time.is_some(),
            tomatoes_earned: 0,
        };

        self.revision += 1;
        let event = Event::TaskCreated {
            revision: self.revision,
            task: task.clone(),
        };
        self.tasks.insert(task.id, task);
        Ok(event)
    }

    /// Replace a task's editable fields (title, description, priority,
    /// due time). `deadline_tracked` is recomputed from the new due time;
    /// `completed`, `expired` and `tomatoes_earned` are never touched —
    /// moving the deadline does not un-expire a task.
    pub fn update_task(
        &mut self,
        user_id: Uuid,
        task_id: Uuid,
        title: String,
        description: Option<String>,
        priority: Priority,
        due_time: Option<DateTime<Utc>>,
    ) -> Result<Event, WorldError> {
        if title.trim().is_empty() {
            return Err(WorldError::TitleRequired);
        }

        let task = self.tasks.get_mut(&task_id).ok_or(WorldError::TaskNotFound)?;
        if task.user_id != user_id {
            return Err(WorldError::NotOwner);
        }

        task.title = title;
        task.description = description;
        task.priority = priority;
        task.due_time = due_time;
        task.deadline_tracked = due_time.is_some();

        self.revision += 1;
        Ok(Event::TaskUpdated {
            revision: self.revision,
            task_id,
        })
    }

    /// Complete a task and settle the ledgers.
    ///
    /// Already completed → Ok(None): nothing changes, no event, no
    /// revision bump. Completion is never retried or re-rewarded.
    ///
    /// Otherwise the tie-break rule applies:
    /// - expired task: grant one tomato unconditionally (lateness was
    ///   already punished by the debt the expiry opened);
    /// - on-time task with outstanding debt: pay down the oldest
    ///   unresolved punishment instead of earning a tomato;
    /// - on-time task, no debt: grant one tomato.
    pub fn complete_task(
        &mut self,
        user_id: Uuid,
        task_id: Uuid,
    ) -> Result<Option<Event>, WorldError> {
        let task = self.tasks.get(&task_id).ok_or(WorldError::TaskNotFound)?;
        if task.user_id != user_id {
            return Err(WorldError::NotOwner);
        }
        if task.completed {
            return Ok(None);
        }

        let was_expired = task.expired;
        let now = Utc::now();

        let resolved = if was_expired {
            None
        } else {
            self.claim_oldest_unresolved(user_id, task_id)
        };

        let tomato = if resolved.is_none() {
            let t = Tomato {
                id: Uuid::new_v4(),
                user_id,
                task_id,
                earned_at: now,
            };
            let id = t.id;
            self.tomatoes.insert(id, t);
            Some(id)
        } else {
            None
        };

        // Re-borrow: the entry is known to exist, checked above
        let task = self.tasks.get_mut(&task_id).ok_or(WorldError::TaskNotFound)?;
        task.completed = true;
        task.completed_at = Some(now);
        task.tomatoes_earned = if tomato.is_some() { 1 } else { 0 };

        self.revision += 1;
        Ok(Some(Event::TaskCompleted {
            revision: self.revision,
            task_id,
            tomato,
            resolved,
        }))
    }

    /// Delete a task. If the task had earned tomatoes, retract them from
    /// the ledger. Punishments referencing the task — as originator or as
    /// resolver — stay untouched: debts are history, rewards are not.
    pub fn delete_task(&mut self, user_id: Uuid, task_id: Uuid) -> Result<Event, WorldError> {
        let task = self.tasks.get(&task_id).ok_or(WorldError::TaskNotFound)?;
        if task.user_id != user_id {
            return Err(WorldError::NotOwner);
        }

        let revoked: Vec<Uuid> = if task.completed && task.tomatoes_earned > 0 {
            let ids: Vec<Uuid> = self
                .tomatoes
                .values()
                .filter(|t| t.user_id == user_id && t.task_id == task_id)
                .map(|t| t.id)
                .collect();
            for id in &ids {
                self.tomatoes.remove(id);
            }
            ids
        } else {
            Vec::new()
        };

        self.tasks.remove(&task_id);

        self.revision += 1;
        Ok(Event::TaskDeleted {
            revision: self.revision,
            task_id,
            revoked,
        })
    }

    /// Flip an overdue task to expired and open one punishment for its
    /// owner. Called by the sweeper under the write lock; re-checks
    /// eligibility so a task completed (or already expired) between the
    /// candidate scan and this call is left alone. Returns None when the
    /// task is no longer eligible — that is the exactly-once guard.
    pub fn expire_task(
        &mut self,
        task_id: Uuid,
        now: DateTime<Utc>,
        kind: PunishmentKind,
    ) -> Option<Event> {
        let task = self.tasks.get_mut(&task_id)?;
        if task.completed || task.expired || !task.deadline_tracked {
            return None;
        }
        let due = task.due_time?;
        if due >= now {
            return None;
        }

        task.expired = true;
        let user_id = task.user_id;

        let punishment = Punishment {
            id: Uuid::new_v4(),
            user_id,
            task_id,
            created_at: now,
            kind,
            resolved: false,
            resolved_by: None,
        };
        let punishment_id = punishment.id;
        self.punishments.insert(punishment_id, punishment);

        self.revision += 1;
        Some(Event::TaskExpired {
            revision: self.revision,
            task_id,
            punishment: punishment_id,
        })
    }

    /// Mark the user's oldest unresolved punishment resolved by the given
    /// task, in one step. Query and mutation are fused so two concurrent
    /// completions can never claim the same punishment (callers hold the
    /// world write lock for the whole completion).
    ///
    /// Oldest = smallest (created_at, id); the id tie-break makes the
    /// pick deterministic when timestamps collide.
    fn claim_oldest_unresolved(&mut self, user_id: Uuid, resolving_task: Uuid) -> Option<Uuid> {
        let oldest = self
            .punishments
            .values()
            .filter(|p| p.user_id == user_id && !p.resolved)
            .min_by_key(|p| (p.created_at, p.id))?
            .id;

        let p = self.punishments.get_mut(&oldest)?;
        p.resolved = true;
        p.resolved_by = Some(resolving_task);
        Some(oldest)
    }

    // ── Queries ────────────────────────────────────────────────

    /// A user's tasks, newest first.
    pub fn tasks_for(&self, user_id: Uuid) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self
            .tasks
            .values()
            .filter(|t| t.user_id == user_id)
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }

    /// Tasks the sweeper should expire: tracked deadline, incomplete,
    /// not yet expired, and overdue.
    pub fn expirable(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        self.tasks
            .values()
            .filter(|t| {
                t.deadline_tracked
                    && !t.completed
                    && !t.expired
                    && t.due_time.is_some_and(|due| due < now)
            })
            .map(|t| t.id)
            .collect()
    }

    pub fn tomato_count(&self, user_id: Uuid) -> usize {
        self.tomatoes.values().filter(|t| t.user_id == user_id).count()
    }

    /// A user's tomatoes, newest first.
    pub fn tomato_history(&self, user_id: Uuid) -> Vec<&Tomato> {
        let mut tomatoes: Vec<&Tomato> = self
            .tomatoes
            .values()
            .filter(|t| t.user_id == user_id)
            .collect();
        tomatoes.sort_by(|a, b| b.earned_at.cmp(&a.earned_at));
        tomatoes
    }

    /// All of a user's punishments, oldest first.
    pub fn punishments_for(&self, user_id: Uuid) -> Vec<&Punishment> {
        let mut punishments: Vec<&Punishment> = self
            .punishments
            .values()
            .filter(|p| p.user_id == user_id)
            .collect();
        punishments.sort_by_key(|p| (p.created_at, p.id));
        punishments
    }

    /// A user's outstanding punishments, oldest first — the same order
    /// resolution consumes them in.
    pub fn unresolved_punishments(&self, user_id: Uuid) -> Vec<&Punishment> {
        let mut punishments: Vec<&Punishment> = self
            .punishments
            .values()
            .filter(|p| p.user_id == user_id && !p.resolved)
            .collect();
        punishments.sort_by_key(|p| (p.created_at, p.id));
        punishments
    }

    /// Look up a user by email (linear scan — fine at this scale).
    pub fn get_user_by_email(&self, email: &str) -> Option<&User> {
        self.users.values().find(|u| u.email == email)
    }
}

// ── Tests ──────────────────────────────────────────────────────
