//! SQLite reference backend.
//!
//! # Responsibility
//! - Persist roster rows and enforce the authoritative constraints: group
//!   name uniqueness, referenced-id existence, all-or-nothing addresses.
//! - Record every committed row change in `change_log` for the feed.
//!
//! # Invariants
//! - Each request and the change-log rows it produces commit in one
//!   transaction.
//! - Cascade-deleted associations are logged as `guest_groups` deletes
//!   before the delete of the entity that caused them.
//! - `server_ts` is strictly increasing, including across reopen.

use super::{
    BackendError, BackendResult, ChangeBatch, FeedCursor, PersistAck, PersistOp, PersistRequest,
    StorageBackend,
};
use crate::db::{open_db, open_db_in_memory, DbError};
use crate::feed::{ChangeEvent, ChangeOp, GroupRow, GuestGroupRow, GuestRow, RowId, Table};
use crate::model::{
    now_ms, EntityKey, Group, GroupId, GroupType, Guest, GuestId, InclusionStatus, Membership,
    RsvpStatus, Side, Timestamp,
};
use log::{info, warn};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;
use std::time::Instant;
use uuid::Uuid;

const GUEST_SELECT_SQL: &str = "SELECT
    id,
    first_name,
    last_name,
    email,
    street,
    city,
    state,
    zip,
    inclusion_status,
    rsvp_status,
    side,
    notes,
    created_at,
    updated_at
FROM guests";

const GROUP_SELECT_SQL: &str = "SELECT
    id,
    name,
    group_type,
    created_at,
    updated_at
FROM roster_groups";

/// Strictly increasing millisecond clock.
#[derive(Debug)]
struct ServerClock {
    last: Timestamp,
}

impl ServerClock {
    fn next(&mut self) -> Timestamp {
        self.last = now_ms().max(self.last + 1);
        self.last
    }
}

/// Shared source of truth backed by one SQLite connection.
#[derive(Debug)]
pub struct SqliteBackend {
    conn: Connection,
    clock: ServerClock,
}

impl SqliteBackend {
    pub fn open(path: impl AsRef<Path>) -> BackendResult<Self> {
        Self::from_connection(open_db(path)?)
    }

    pub fn open_in_memory() -> BackendResult<Self> {
        Self::from_connection(open_db_in_memory()?)
    }

    /// Wraps an already migrated connection.
    pub fn from_connection(conn: Connection) -> BackendResult<Self> {
        let last: Option<Timestamp> =
            conn.query_row("SELECT MAX(server_ts) FROM change_log;", [], |row| {
                row.get(0)
            })?;
        Ok(Self {
            conn,
            clock: ServerClock {
                last: last.unwrap_or(0),
            },
        })
    }

    pub fn load_guest(&self, id: GuestId) -> BackendResult<Option<Guest>> {
        load_guest(&self.conn, id)
    }

    pub fn load_group(&self, id: GroupId) -> BackendResult<Option<Group>> {
        load_group(&self.conn, id)
    }

    /// Every association, ordered by guest then group.
    pub fn load_memberships(&self) -> BackendResult<Vec<Membership>> {
        let mut stmt = self.conn.prepare(
            "SELECT guest_id, group_id FROM roster_memberships ORDER BY guest_id, group_id;",
        )?;
        let mut rows = stmt.query([])?;
        let mut pairs = Vec::new();
        while let Some(row) = rows.next()? {
            pairs.push(Membership::new(
                parse_uuid(row, "guest_id")?,
                parse_uuid(row, "group_id")?,
            ));
        }
        Ok(pairs)
    }
}

impl StorageBackend for SqliteBackend {
    fn execute(&mut self, request: &PersistRequest) -> BackendResult<PersistAck> {
        let started_at = Instant::now();
        let server_ts = self.clock.next();
        let tx = self.conn.transaction()?;

        match apply_op(&tx, &request.op, server_ts) {
            Ok(()) => {
                tx.commit()?;
                info!(
                    "event=backend_execute module=backend status=ok request={} op={} server_ts={} duration_ms={}",
                    request.id,
                    request.op.name(),
                    server_ts,
                    started_at.elapsed().as_millis()
                );
                Ok(PersistAck { server_ts })
            }
            Err(err) => {
                warn!(
                    "event=backend_execute module=backend status=rejected request={} op={} duration_ms={} error={}",
                    request.id,
                    request.op.name(),
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    fn changes_since(&mut self, cursor: FeedCursor, limit: usize) -> BackendResult<ChangeBatch> {
        let mut stmt = self.conn.prepare(
            "SELECT seq, table_name, operation, row_json, server_ts
             FROM change_log
             WHERE seq > ?1
             ORDER BY seq ASC
             LIMIT ?2;",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let cursor_value = i64::try_from(cursor).unwrap_or(i64::MAX);
        let mut rows = stmt.query(params![cursor_value, limit])?;

        let mut events = Vec::new();
        let mut next_cursor = cursor;
        while let Some(row) = rows.next()? {
            let seq: i64 = row.get("seq")?;
            let table_text: String = row.get("table_name")?;
            let table = Table::parse(&table_text).ok_or_else(|| {
                DbError::InvalidData(format!(
                    "invalid table `{table_text}` in change_log.table_name"
                ))
            })?;
            let op_text: String = row.get("operation")?;
            let operation = ChangeOp::parse(&op_text).ok_or_else(|| {
                DbError::InvalidData(format!("invalid operation `{op_text}` in change_log.operation"))
            })?;
            let row_json: String = row.get("row_json")?;
            let row_value = serde_json::from_str(&row_json).map_err(|err| {
                DbError::InvalidData(format!("invalid change_log.row_json at seq {seq}: {err}"))
            })?;

            events.push(ChangeEvent {
                table,
                operation,
                row: row_value,
                server_ts: row.get("server_ts")?,
            });
            next_cursor = u64::try_from(seq).map_err(|_| {
                DbError::InvalidData(format!("negative change_log.seq `{seq}`"))
            })?;
        }

        Ok(ChangeBatch {
            events,
            next_cursor,
        })
    }
}

fn apply_op(conn: &Connection, op: &PersistOp, ts: Timestamp) -> BackendResult<()> {
    match op {
        PersistOp::CreateGuest { guest, group_ids } => {
            for group_id in group_ids {
                ensure_group(conn, *group_id)?;
            }
            insert_guest(conn, guest, ts)?;
            for group_id in group_ids {
                link(conn, Membership::new(guest.id, *group_id), ts)?;
            }
            Ok(())
        }
        PersistOp::UpdateGuest { id, patch } => {
            patch.validate()?;
            let current =
                load_guest(conn, *id)?.ok_or(BackendError::NotFound(EntityKey::Guest(*id)))?;
            let next = patch.apply_to(&current, ts);
            next.validate()?;
            conn.execute(
                "UPDATE guests
                 SET
                    first_name = ?1,
                    last_name = ?2,
                    email = ?3,
                    street = ?4,
                    city = ?5,
                    state = ?6,
                    zip = ?7,
                    inclusion_status = ?8,
                    rsvp_status = ?9,
                    side = ?10,
                    notes = ?11,
                    updated_at = ?12
                 WHERE id = ?13;",
                params![
                    next.first_name.as_str(),
                    next.last_name.as_str(),
                    next.email.as_deref(),
                    next.address.as_ref().map(|a| a.street.as_str()),
                    next.address.as_ref().map(|a| a.city.as_str()),
                    next.address.as_ref().map(|a| a.state.as_str()),
                    next.address.as_ref().map(|a| a.zip.as_str()),
                    inclusion_to_db(next.inclusion),
                    next.rsvp.map(rsvp_to_db),
                    side_to_db(next.side),
                    next.notes.as_deref(),
                    ts,
                    id.to_string(),
                ],
            )?;
            log_change(conn, Table::Guests, ChangeOp::Update, &GuestRow::from_guest(&next), ts)
        }
        PersistOp::DeleteGuest { id } => {
            if load_guest(conn, *id)?.is_none() {
                return Err(BackendError::NotFound(EntityKey::Guest(*id)));
            }
            log_cascade(conn, "guest_id", *id, ts)?;
            conn.execute("DELETE FROM guests WHERE id = ?1;", [id.to_string()])?;
            log_change(conn, Table::Guests, ChangeOp::Delete, &RowId { id: *id }, ts)
        }
        PersistOp::CreateGroup {
            group,
            new_guests,
            member_ids,
        } => {
            group.validate()?;
            ensure_name_free(conn, group.name_key(), group.id)?;
            let stamped = Group {
                name: group.name_key().to_string(),
                created_at: ts,
                updated_at: ts,
                ..group.clone()
            };
            conn.execute(
                "INSERT INTO roster_groups (id, name, group_type, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5);",
                params![
                    stamped.id.to_string(),
                    stamped.name.as_str(),
                    group_type_to_db(stamped.kind),
                    ts,
                    ts,
                ],
            )?;
            log_change(conn, Table::Groups, ChangeOp::Insert, &GroupRow::from_group(&stamped), ts)?;
            for guest in new_guests {
                insert_guest(conn, guest, ts)?;
            }
            for guest_id in member_ids {
                if load_guest(conn, *guest_id)?.is_none() {
                    return Err(BackendError::MissingReference(EntityKey::Guest(*guest_id)));
                }
                link(conn, Membership::new(*guest_id, group.id), ts)?;
            }
            Ok(())
        }
        PersistOp::UpdateGroup { id, patch } => {
            patch.validate()?;
            let current =
                load_group(conn, *id)?.ok_or(BackendError::NotFound(EntityKey::Group(*id)))?;
            let next = patch.apply_to(&current, ts);
            next.validate()?;
            ensure_name_free(conn, next.name_key(), next.id)?;
            conn.execute(
                "UPDATE roster_groups
                 SET name = ?1, group_type = ?2, updated_at = ?3
                 WHERE id = ?4;",
                params![
                    next.name.as_str(),
                    group_type_to_db(next.kind),
                    ts,
                    id.to_string()
                ],
            )?;
            log_change(conn, Table::Groups, ChangeOp::Update, &GroupRow::from_group(&next), ts)
        }
        PersistOp::DeleteGroup { id } => {
            if load_group(conn, *id)?.is_none() {
                return Err(BackendError::NotFound(EntityKey::Group(*id)));
            }
            log_cascade(conn, "group_id", *id, ts)?;
            conn.execute("DELETE FROM roster_groups WHERE id = ?1;", [id.to_string()])?;
            log_change(conn, Table::Groups, ChangeOp::Delete, &RowId { id: *id }, ts)
        }
        PersistOp::LinkGuest {
            guest_id,
            group_ids,
        } => {
            if load_guest(conn, *guest_id)?.is_none() {
                return Err(BackendError::MissingReference(EntityKey::Guest(*guest_id)));
            }
            for group_id in group_ids {
                ensure_group(conn, *group_id)?;
                link(conn, Membership::new(*guest_id, *group_id), ts)?;
            }
            Ok(())
        }
        PersistOp::UnlinkGuest { pair } => {
            let removed = conn.execute(
                "DELETE FROM roster_memberships WHERE guest_id = ?1 AND group_id = ?2;",
                params![pair.guest_id.to_string(), pair.group_id.to_string()],
            )?;
            if removed == 0 {
                return Err(BackendError::NotFound(EntityKey::Membership(*pair)));
            }
            log_change(
                conn,
                Table::GuestGroups,
                ChangeOp::Delete,
                &GuestGroupRow::from(*pair),
                ts,
            )
        }
    }
}

fn insert_guest(conn: &Connection, guest: &Guest, ts: Timestamp) -> BackendResult<()> {
    guest.validate()?;
    let stamped = Guest {
        created_at: ts,
        updated_at: ts,
        ..guest.clone()
    };
    conn.execute(
        "INSERT INTO guests (
            id,
            first_name,
            last_name,
            email,
            street,
            city,
            state,
            zip,
            inclusion_status,
            rsvp_status,
            side,
            notes,
            created_at,
            updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14);",
        params![
            stamped.id.to_string(),
            stamped.first_name.as_str(),
            stamped.last_name.as_str(),
            stamped.email.as_deref(),
            stamped.address.as_ref().map(|a| a.street.as_str()),
            stamped.address.as_ref().map(|a| a.city.as_str()),
            stamped.address.as_ref().map(|a| a.state.as_str()),
            stamped.address.as_ref().map(|a| a.zip.as_str()),
            inclusion_to_db(stamped.inclusion),
            stamped.rsvp.map(rsvp_to_db),
            side_to_db(stamped.side),
            stamped.notes.as_deref(),
            ts,
            ts,
        ],
    )?;
    log_change(conn, Table::Guests, ChangeOp::Insert, &GuestRow::from_guest(&stamped), ts)
}

/// Inserts the pair unless present; only an actual insert is logged.
fn link(conn: &Connection, pair: Membership, ts: Timestamp) -> BackendResult<()> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO roster_memberships (guest_id, group_id) VALUES (?1, ?2);",
        params![pair.guest_id.to_string(), pair.group_id.to_string()],
    )?;
    if inserted == 0 {
        return Ok(());
    }
    log_change(
        conn,
        Table::GuestGroups,
        ChangeOp::Insert,
        &GuestGroupRow::from(pair),
        ts,
    )
}

/// Logs a delete for every association the cascade is about to remove.
fn log_cascade(
    conn: &Connection,
    column: &'static str,
    id: Uuid,
    ts: Timestamp,
) -> BackendResult<()> {
    let mut stmt = conn.prepare(&format!(
        "SELECT guest_id, group_id
         FROM roster_memberships
         WHERE {column} = ?1
         ORDER BY guest_id, group_id;"
    ))?;
    let mut rows = stmt.query([id.to_string()])?;
    let mut pairs = Vec::new();
    while let Some(row) = rows.next()? {
        pairs.push(Membership::new(
            parse_uuid(row, "guest_id")?,
            parse_uuid(row, "group_id")?,
        ));
    }
    for pair in pairs {
        log_change(
            conn,
            Table::GuestGroups,
            ChangeOp::Delete,
            &GuestGroupRow::from(pair),
            ts,
        )?;
    }
    Ok(())
}

fn ensure_group(conn: &Connection, id: GroupId) -> BackendResult<()> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM roster_groups WHERE id = ?1);",
        [id.to_string()],
        |row| row.get(0),
    )?;
    if !exists {
        return Err(BackendError::MissingReference(EntityKey::Group(id)));
    }
    Ok(())
}

fn ensure_name_free(conn: &Connection, name: &str, except: GroupId) -> BackendResult<()> {
    let taken: Option<String> = conn
        .query_row(
            "SELECT id FROM roster_groups WHERE name = ?1 AND id <> ?2;",
            params![name, except.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    if taken.is_some() {
        return Err(BackendError::Conflict(name.to_string()));
    }
    Ok(())
}

fn log_change(
    conn: &Connection,
    table: Table,
    operation: ChangeOp,
    row: &impl Serialize,
    ts: Timestamp,
) -> BackendResult<()> {
    let row_json = serde_json::to_string(row)
        .map_err(|err| DbError::InvalidData(format!("cannot encode {table} row: {err}")))?;
    conn.execute(
        "INSERT INTO change_log (table_name, operation, row_json, server_ts)
         VALUES (?1, ?2, ?3, ?4);",
        params![table.as_str(), operation.as_str(), row_json, ts],
    )?;
    Ok(())
}

fn load_guest(conn: &Connection, id: GuestId) -> BackendResult<Option<Guest>> {
    let mut stmt = conn.prepare(&format!("{GUEST_SELECT_SQL} WHERE id = ?1;"))?;
    let mut rows = stmt.query([id.to_string()])?;
    match rows.next()? {
        Some(row) => Ok(Some(parse_guest_row(row)?)),
        None => Ok(None),
    }
}

fn load_group(conn: &Connection, id: GroupId) -> BackendResult<Option<Group>> {
    let mut stmt = conn.prepare(&format!("{GROUP_SELECT_SQL} WHERE id = ?1;"))?;
    let mut rows = stmt.query([id.to_string()])?;
    match rows.next()? {
        Some(row) => Ok(Some(parse_group_row(row)?)),
        None => Ok(None),
    }
}

fn parse_guest_row(row: &Row<'_>) -> BackendResult<Guest> {
    let inclusion_text: String = row.get("inclusion_status")?;
    let inclusion = parse_inclusion(&inclusion_text).ok_or_else(|| {
        DbError::InvalidData(format!(
            "invalid inclusion status `{inclusion_text}` in guests.inclusion_status"
        ))
    })?;
    let rsvp = match row.get::<_, Option<String>>("rsvp_status")? {
        Some(value) => Some(parse_rsvp(&value).ok_or_else(|| {
            DbError::InvalidData(format!("invalid rsvp status `{value}` in guests.rsvp_status"))
        })?),
        None => None,
    };
    let side_text: String = row.get("side")?;
    let side = parse_side(&side_text).ok_or_else(|| {
        DbError::InvalidData(format!("invalid side `{side_text}` in guests.side"))
    })?;

    let guest_row = GuestRow {
        id: parse_uuid(row, "id")?,
        first_name: row.get("first_name")?,
        last_name: row.get("last_name")?,
        email: row.get("email")?,
        street: row.get("street")?,
        city: row.get("city")?,
        state: row.get("state")?,
        zip: row.get("zip")?,
        inclusion_status: inclusion,
        rsvp_status: rsvp,
        side,
        notes: row.get("notes")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    };
    let id = guest_row.id;
    guest_row.into_guest().map_err(|err| {
        BackendError::Storage(DbError::InvalidData(format!(
            "persisted guest {id} violates field rules: {err}"
        )))
    })
}

fn parse_group_row(row: &Row<'_>) -> BackendResult<Group> {
    let type_text: String = row.get("group_type")?;
    let kind = parse_group_type(&type_text).ok_or_else(|| {
        DbError::InvalidData(format!(
            "invalid group type `{type_text}` in roster_groups.group_type"
        ))
    })?;
    let group_row = GroupRow {
        id: parse_uuid(row, "id")?,
        name: row.get("name")?,
        kind,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    };
    let id = group_row.id;
    group_row.into_group().map_err(|err| {
        BackendError::Storage(DbError::InvalidData(format!(
            "persisted group {id} violates field rules: {err}"
        )))
    })
}

fn parse_uuid(row: &Row<'_>, column: &str) -> BackendResult<Uuid> {
    let text: String = row.get(column)?;
    Uuid::parse_str(&text).map_err(|_| {
        BackendError::Storage(DbError::InvalidData(format!(
            "invalid uuid value `{text}` in column {column}"
        )))
    })
}

fn inclusion_to_db(status: InclusionStatus) -> &'static str {
    match status {
        InclusionStatus::Definitely => "definitely",
        InclusionStatus::Maybe => "maybe",
        InclusionStatus::NotInvited => "not_invited",
    }
}

fn parse_inclusion(value: &str) -> Option<InclusionStatus> {
    match value {
        "definitely" => Some(InclusionStatus::Definitely),
        "maybe" => Some(InclusionStatus::Maybe),
        "not_invited" => Some(InclusionStatus::NotInvited),
        _ => None,
    }
}

fn rsvp_to_db(status: RsvpStatus) -> &'static str {
    match status {
        RsvpStatus::Invited => "invited",
        RsvpStatus::Attending => "attending",
        RsvpStatus::Declined => "declined",
    }
}

fn parse_rsvp(value: &str) -> Option<RsvpStatus> {
    match value {
        "invited" => Some(RsvpStatus::Invited),
        "attending" => Some(RsvpStatus::Attending),
        "declined" => Some(RsvpStatus::Declined),
        _ => None,
    }
}

fn side_to_db(side: Side) -> &'static str {
    match side {
        Side::Bride => "bride",
        Side::Groom => "groom",
        Side::Both => "both",
    }
}

fn parse_side(value: &str) -> Option<Side> {
    match value {
        "bride" => Some(Side::Bride),
        "groom" => Some(Side::Groom),
        "both" => Some(Side::Both),
        _ => None,
    }
}

fn group_type_to_db(kind: GroupType) -> &'static str {
    match kind {
        GroupType::Family => "family",
        GroupType::Couple => "couple",
        GroupType::FriendGroup => "friend_group",
    }
}

fn parse_group_type(value: &str) -> Option<GroupType> {
    match value {
        "family" => Some(GroupType::Family),
        "couple" => Some(GroupType::Couple),
        "friend_group" => Some(GroupType::FriendGroup),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GroupPatch, NewGroup, NewGuest};
    use crate::sync::MutationId;

    fn request(op: PersistOp) -> PersistRequest {
        PersistRequest {
            id: MutationId(1),
            op,
        }
    }

    fn guest(first: &str) -> Guest {
        NewGuest::new(first, "Silva", Side::Bride).into_guest(Uuid::new_v4(), 0)
    }

    fn group(name: &str) -> Group {
        NewGroup::new(name, GroupType::Family).to_group(Uuid::new_v4(), 0)
    }

    #[test]
    fn server_clock_is_strictly_increasing() {
        let mut clock = ServerClock { last: i64::MAX - 10 };
        let first = clock.next();
        assert!(clock.next() > first);
    }

    #[test]
    fn create_guest_stamps_server_timestamps() {
        let mut backend = SqliteBackend::open_in_memory().unwrap();
        let ana = guest("Ana");
        let ack = backend
            .execute(&request(PersistOp::CreateGuest {
                guest: ana.clone(),
                group_ids: vec![],
            }))
            .unwrap();

        let stored = backend.load_guest(ana.id).unwrap().unwrap();
        assert_eq!(stored.created_at, ack.server_ts);
        assert_eq!(stored.updated_at, ack.server_ts);
        assert_eq!(stored.first_name, "Ana");
    }

    #[test]
    fn duplicate_group_name_is_conflict_and_commits_nothing() {
        let mut backend = SqliteBackend::open_in_memory().unwrap();
        backend
            .execute(&request(PersistOp::CreateGroup {
                group: group("Smiths"),
                new_guests: vec![],
                member_ids: vec![],
            }))
            .unwrap();
        let cursor = backend.changes_since(0, 100).unwrap().next_cursor;

        let newcomer = guest("Ben");
        let clash = group("Smiths");
        let err = backend
            .execute(&request(PersistOp::CreateGroup {
                group: clash.clone(),
                new_guests: vec![newcomer.clone()],
                member_ids: vec![newcomer.id],
            }))
            .unwrap_err();
        assert!(matches!(err, BackendError::Conflict(name) if name == "Smiths"));
        assert!(backend.load_group(clash.id).unwrap().is_none());
        assert!(backend.load_guest(newcomer.id).unwrap().is_none());
        assert!(backend.changes_since(cursor, 100).unwrap().events.is_empty());
    }

    #[test]
    fn missing_member_rolls_back_the_batch() {
        let mut backend = SqliteBackend::open_in_memory().unwrap();
        let smiths = group("Smiths");
        let missing = Uuid::new_v4();
        let err = backend
            .execute(&request(PersistOp::CreateGroup {
                group: smiths.clone(),
                new_guests: vec![],
                member_ids: vec![missing],
            }))
            .unwrap_err();
        assert!(matches!(
            err,
            BackendError::MissingReference(EntityKey::Guest(id)) if id == missing
        ));
        assert!(backend.load_group(smiths.id).unwrap().is_none());
    }

    #[test]
    fn delete_group_logs_cascaded_memberships_first() {
        let mut backend = SqliteBackend::open_in_memory().unwrap();
        let ana = guest("Ana");
        let smiths = group("Smiths");
        backend
            .execute(&request(PersistOp::CreateGroup {
                group: smiths.clone(),
                new_guests: vec![ana.clone()],
                member_ids: vec![ana.id],
            }))
            .unwrap();
        let cursor = backend.changes_since(0, 100).unwrap().next_cursor;

        let ack = backend
            .execute(&request(PersistOp::DeleteGroup { id: smiths.id }))
            .unwrap();
        let batch = backend.changes_since(cursor, 100).unwrap();
        let shape: Vec<_> = batch
            .events
            .iter()
            .map(|event| (event.table, event.operation, event.server_ts))
            .collect();
        assert_eq!(
            shape,
            vec![
                (Table::GuestGroups, ChangeOp::Delete, ack.server_ts),
                (Table::Groups, ChangeOp::Delete, ack.server_ts),
            ]
        );
        assert!(backend.load_memberships().unwrap().is_empty());
        assert!(backend.load_guest(ana.id).unwrap().is_some());
    }

    #[test]
    fn rename_onto_taken_name_is_conflict() {
        let mut backend = SqliteBackend::open_in_memory().unwrap();
        let smiths = group("Smiths");
        let jones = group("Jones");
        for g in [&smiths, &jones] {
            backend
                .execute(&request(PersistOp::CreateGroup {
                    group: g.clone(),
                    new_guests: vec![],
                    member_ids: vec![],
                }))
                .unwrap();
        }
        let err = backend
            .execute(&request(PersistOp::UpdateGroup {
                id: jones.id,
                patch: GroupPatch {
                    name: Some("  Smiths ".to_string()),
                    kind: None,
                },
            }))
            .unwrap_err();
        assert!(matches!(err, BackendError::Conflict(_)));
        assert_eq!(backend.load_group(jones.id).unwrap().unwrap().name, "Jones");
    }

    #[test]
    fn unlink_of_absent_pair_is_not_found() {
        let mut backend = SqliteBackend::open_in_memory().unwrap();
        let pair = Membership::new(Uuid::new_v4(), Uuid::new_v4());
        assert!(matches!(
            backend.execute(&request(PersistOp::UnlinkGuest { pair })),
            Err(BackendError::NotFound(EntityKey::Membership(_)))
        ));
    }

    #[test]
    fn relinking_existing_pair_logs_nothing() {
        let mut backend = SqliteBackend::open_in_memory().unwrap();
        let ana = guest("Ana");
        let smiths = group("Smiths");
        backend
            .execute(&request(PersistOp::CreateGroup {
                group: smiths.clone(),
                new_guests: vec![ana.clone()],
                member_ids: vec![ana.id],
            }))
            .unwrap();
        let cursor = backend.changes_since(0, 100).unwrap().next_cursor;
        backend
            .execute(&request(PersistOp::LinkGuest {
                guest_id: ana.id,
                group_ids: vec![smiths.id],
            }))
            .unwrap();
        assert!(backend.changes_since(cursor, 100).unwrap().events.is_empty());
    }

    #[test]
    fn partial_address_is_rejected_by_check_constraint() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let result = backend.conn.execute(
            "INSERT INTO guests (id, first_name, last_name, street, side, created_at, updated_at)
             VALUES (?1, 'Ana', 'Silva', '1 Chapel Row', 'bride', 0, 0);",
            [Uuid::new_v4().to_string()],
        );
        assert!(result.is_err());
    }
}
