//! Graft orphan spaces into the tree that holds their parent.
//!
//! Blocks are laid out as a nested-set forest: within a space, a block is an
//! ancestor of another exactly when its `[span_left, span_right]` interval
//! contains the other's and its depth is smaller. Grafting a space under a
//! parent therefore means making room to the right of the parent, widening
//! every ancestor interval, and then translating the whole orphan space into
//! the parent's coordinates. Chains (space 0 only) are shifted and copied so
//! each new leaf column starts with the trunk's accumulated work.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::error::ChainError;

/// A nested-set interval. `left <= right` always holds for stored rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Span {
    pub left: i64,
    pub right: i64,
}

impl Span {
    /// Number of leaf columns the interval covers.
    pub fn width(&self) -> i64 {
        self.right - self.left + 1
    }
}

/// Full position of a block within the forest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Position {
    pub space: i64,
    pub depth: i64,
    pub span: Span,
}

/// Rewrites forest coordinates; the only mutator of `space`/`depth`/spans.
pub struct Organizer<'c> {
    conn: &'c Connection,
}

impl<'c> Organizer<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Graft every orphan space whose root's parent is now stored.
    ///
    /// Each graft runs in its own transaction. Parent and child coordinates
    /// are reloaded inside the loop: an earlier graft in the same run may
    /// have moved either one.
    pub fn organize(&self) -> Result<usize, ChainError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT block.block_id, parent.block_id
             FROM blocks AS block, blocks AS parent
             WHERE block.prev_block_hash = parent.block_hash
               AND block.space > 0
               AND block.depth = 0
             ORDER BY block.block_id ASC",
        )?;
        let pairs: Vec<(i64, i64)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<_, _>>()?;
        drop(stmt);

        let mut grafted = 0;
        for (child_id, parent_id) in pairs {
            self.graft(child_id, parent_id)?;
            grafted += 1;
        }
        Ok(grafted)
    }

    /// Move the orphan space rooted at `child_id` under `parent_id`.
    fn graft(&self, child_id: i64, parent_id: i64) -> Result<(), ChainError> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            "UPDATE blocks SET prev_block_id = ?1 WHERE block_id = ?2",
            params![parent_id, child_id],
        )?;

        let parent = load_position(&tx, parent_id)?;
        let child = load_position(&tx, child_id)?;
        if child.span.left != 0 || child.depth != 0 {
            // Orphan roots are always laid out at (depth 0, span_left 0).
            return Err(ChainError::Corrupt(format!(
                "orphan root {child_id} not at origin: {child:?}"
            )));
        }

        let parent_width = block_width(&tx, &parent)?;
        let child_width = child.span.width();

        let mut new_span_left = parent.span.right;
        if parent_width > 0 {
            new_span_left += 1;
        }
        let new_depth = parent.depth + 1;

        reserve_branch_area(&tx, parent.space, parent_width, parent.span, new_depth, child_width)?;
        position_child_branch(&tx, child.space, parent.space, new_depth, new_span_left)?;

        tx.commit()?;
        debug!(
            child_id,
            parent_id,
            space = parent.space,
            depth = new_depth,
            span_left = new_span_left,
            "grafted orphan branch"
        );
        Ok(())
    }

    /// Remove a subtree and collapse the coordinates it occupied.
    ///
    /// A row one generation up sharing the subtree's exact span is a parent
    /// whose only child is this subtree: it stays behind as a leaf, keeping
    /// its column's chain row with the deleted work unwound. Otherwise every
    /// column under the subtree disappears along with its chains.
    pub fn delete_branch(
        &self,
        space: i64,
        depth: i64,
        span_left: i64,
        span_right: i64,
    ) -> Result<(), ChainError> {
        let tx = self.conn.unchecked_transaction()?;

        let lonely_parent = depth > 0
            && tx
                .query_row(
                    "SELECT 1 FROM blocks
                     WHERE space = ?1 AND depth = ?2 - 1
                       AND span_left = ?3 AND span_right = ?4
                     LIMIT 1",
                    params![space, depth, span_left, span_right],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();

        let mut offset = span_right - span_left;
        if lonely_parent {
            if space == 0 {
                delete_chains(&tx, span_left + 1, span_right)?;
                unwind_chain(&tx, depth, span_left)?;
            }
        } else {
            offset += 1;
            if space == 0 {
                delete_chains(&tx, span_left, span_right)?;
            }
        }

        let deleted = tx.execute(
            "DELETE FROM blocks
             WHERE space = ?1 AND depth >= ?2
               AND span_left >= ?3 AND span_right <= ?4",
            params![space, depth, span_left, span_right],
        )?;
        tx.execute(
            "UPDATE blocks SET span_left = span_left - ?1
             WHERE space = ?2 AND span_left > ?3",
            params![offset, space, span_right],
        )?;
        tx.execute(
            "UPDATE blocks SET span_right = span_right - ?1
             WHERE space = ?2 AND span_right >= ?3",
            params![offset, space, span_right],
        )?;

        tx.commit()?;
        warn!(space, depth, span_left, span_right, deleted, "deleted branch");
        Ok(())
    }
}

/// Current coordinates of a block. A missing row is a fatal inconsistency.
pub fn load_position(conn: &Connection, block_id: i64) -> Result<Position, ChainError> {
    let mut stmt = conn.prepare_cached(
        "SELECT space, depth, span_left, span_right FROM blocks WHERE block_id = ?1",
    )?;
    let position = stmt
        .query_row([block_id], |row| {
            Ok(Position {
                space: row.get(0)?,
                depth: row.get(1)?,
                span: Span { left: row.get(2)?, right: row.get(3)? },
            })
        })
        .optional()?
        .ok_or_else(|| {
            ChainError::Corrupt(format!("load_position failed for block {block_id}"))
        })?;
    if position.span.left > position.span.right {
        return Err(ChainError::Corrupt(format!(
            "inverted span for block {block_id}: {position:?}"
        )));
    }
    Ok(position)
}

/// How many leaf columns a block's descendants occupy.
///
/// A widened interval counts its full width. A point interval is width 1
/// when something deeper sits inside it, and width 0 when the block is a
/// leaf with no reserved gap beneath it.
pub fn block_width(conn: &Connection, position: &Position) -> Result<i64, ChainError> {
    if position.span.left < position.span.right {
        return Ok(position.span.width());
    }
    let mut stmt = conn.prepare_cached(
        "SELECT 1 FROM blocks
         WHERE space = ?1 AND depth > ?2
           AND span_left >= ?3 AND span_right <= ?4
         LIMIT 1",
    )?;
    let has_children = stmt
        .query_row(
            params![position.space, position.depth, position.span.left, position.span.right],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    Ok(if has_children { 1 } else { 0 })
}

/// Make room for `child_width` new leaf columns under the parent.
///
/// Shifts everything strictly right of the parent further right, widens
/// every ancestor interval ending at the parent's right edge, and (space 0
/// only) renumbers and copies chain rows so each new column inherits the
/// trunk's accumulated work.
fn reserve_branch_area(
    conn: &Connection,
    parent_space: i64,
    parent_width: i64,
    parent_span: Span,
    new_child_depth: i64,
    child_width: i64,
) -> Result<(), ChainError> {
    if parent_width == 0 && child_width == 1 {
        // The parent is a bare leaf and one column suffices: the child will
        // sit directly beneath it on the same column.
        return Ok(());
    }

    conn.execute(
        "UPDATE blocks SET span_right = span_right + ?1
         WHERE space = ?2 AND span_right > ?3",
        params![child_width, parent_space, parent_span.right],
    )?;
    conn.execute(
        "UPDATE blocks SET span_left = span_left + ?1
         WHERE space = ?2 AND span_left > ?3",
        params![child_width, parent_space, parent_span.right],
    )?;
    conn.execute(
        "UPDATE blocks SET span_right = span_right + ?1
         WHERE space = ?2 AND depth < ?3 AND span_right = ?4",
        params![child_width, parent_space, new_child_depth, parent_span.right],
    )?;

    if parent_space != 0 {
        return Ok(());
    }

    conn.execute(
        "UPDATE chains SET chain_id = chain_id + ?1 WHERE chain_id > ?2",
        params![child_width, parent_span.right],
    )?;
    // A bare-leaf parent already owns its column's chain row; only the
    // columns beyond it get copies.
    let first_new_column = if parent_width == 0 { 1 } else { parent_width };
    for sub_chain in first_new_column..parent_width + child_width {
        conn.execute(
            "INSERT INTO chains (chain_id, work, depth)
             SELECT chain_id + ?1, work, depth FROM chains WHERE chain_id = ?2",
            params![sub_chain, parent_span.left],
        )?;
    }
    Ok(())
}

/// Translate a whole space into its new parent's coordinates.
fn position_child_branch(
    conn: &Connection,
    old_space: i64,
    new_space: i64,
    new_depth: i64,
    new_span_left: i64,
) -> Result<(), ChainError> {
    conn.execute(
        "UPDATE blocks SET
            space = ?1,
            depth = depth + ?2,
            span_left = span_left + ?3,
            span_right = span_right + ?3
         WHERE space = ?4",
        params![new_space, new_depth, new_span_left, old_space],
    )?;
    Ok(())
}

/// Drop the chain rows for columns `[left, right]` and renumber the rest.
fn delete_chains(conn: &Connection, left: i64, right: i64) -> Result<(), ChainError> {
    conn.execute(
        "DELETE FROM chains WHERE chain_id BETWEEN ?1 AND ?2",
        params![left, right],
    )?;
    let offset = (right + 1) - left;
    conn.execute(
        "UPDATE chains SET chain_id = chain_id - ?1 WHERE chain_id > ?2",
        params![offset, right],
    )?;
    Ok(())
}

/// Subtract a deleted subtree's validated work from the chain it fed.
fn unwind_chain(conn: &Connection, depth: i64, chain_id: i64) -> Result<(), ChainError> {
    conn.execute(
        "UPDATE chains SET work = work - IFNULL(
            (SELECT SUM(difficulty(bits_head, bits_body))
             FROM blocks
             WHERE space = 0 AND depth >= ?1
               AND span_left <= ?2 AND span_right >= ?2
               AND status = 'valid'),
            0)
         WHERE chain_id = ?2",
        params![depth, chain_id],
    )?;
    Ok(())
}
