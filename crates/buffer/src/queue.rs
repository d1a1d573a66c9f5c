//! Shared row queue
//!
//! A doubly linked list of rows living in a [`SharedZone`]. Each node is a
//! single arena allocation:
//!
//! ```text
//! 0   prev node offset (0 = none)
//! 8   next node offset (0 = none)
//! 16  column count (u32) | reserved (u32)
//! 24  column lengths, u32 each, u32::MAX for NULL
//! ..  column bytes, back to back
//! ```
//!
//! Head, tail and length live in the zone header and are only touched
//! through a [`LockedBuffer`].

use bytes::Bytes;
use sqlitelog_store::Row;

use crate::error::{BufferError, ZoneError};
use crate::zone::{OFF_QUEUE_HEAD, OFF_QUEUE_LEN, OFF_QUEUE_TAIL, SharedZone, ZoneGuard, ZoneStats};

const NODE_PREV: usize = 0;
const NODE_NEXT: usize = 8;
const NODE_COLUMNS: usize = 16;
const NODE_LENS: usize = 24;
const NULL_LEN: u32 = u32::MAX;

/// Result of a successful push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushStatus {
    Accepted,
    /// Row was queued and the queue has reached its row limit
    Full,
}

/// Row queue backed by a shared zone
#[derive(Debug)]
pub struct SharedBuffer {
    zone: SharedZone,
    max: Option<usize>,
}

impl SharedBuffer {
    pub fn new(zone: SharedZone, max: Option<usize>) -> Self {
        Self { zone, max }
    }

    #[inline]
    pub fn zone(&self) -> &SharedZone {
        &self.zone
    }

    #[inline]
    pub fn max(&self) -> Option<usize> {
        self.max
    }

    /// Take the zone lock; it is held until the returned value drops
    pub fn lock(&self) -> LockedBuffer<'_> {
        LockedBuffer {
            guard: self.zone.lock(),
            max: self.max,
        }
    }

    pub fn push(&self, row: &Row) -> Result<PushStatus, BufferError> {
        self.lock().push(row)
    }

    pub fn unshift(&self, row: &Row) -> Result<(), BufferError> {
        self.lock().unshift(row)
    }

    /// Move every queued row into `out`, oldest first
    pub fn drain_to_list(&self, out: &mut Vec<Row>) -> Result<usize, BufferError> {
        self.lock().drain_into(out)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A [`SharedBuffer`] with its zone lock held
pub struct LockedBuffer<'a> {
    guard: ZoneGuard<'a>,
    max: Option<usize>,
}

impl LockedBuffer<'_> {
    #[inline]
    pub fn len(&self) -> usize {
        self.guard.read_u64(OFF_QUEUE_LEN).map_or(0, |n| n as usize)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> Result<ZoneStats, BufferError> {
        Ok(self.guard.stats()?)
    }

    /// Append a copy of `row` at the tail
    ///
    /// On [`BufferError::Exhausted`] nothing was linked.
    pub fn push(&mut self, row: &Row) -> Result<PushStatus, BufferError> {
        let node = self.write_node(row)?;
        let tail = self.guard.read_offset(OFF_QUEUE_TAIL)?;

        self.guard.write_u64(node + NODE_PREV, tail as u64)?;
        if tail == 0 {
            self.guard.write_u64(OFF_QUEUE_HEAD, node as u64)?;
        } else {
            self.guard.write_u64(tail + NODE_NEXT, node as u64)?;
        }
        self.guard.write_u64(OFF_QUEUE_TAIL, node as u64)?;
        let len = self.bump_len()?;

        match self.max {
            Some(max) if len >= max => Ok(PushStatus::Full),
            _ => Ok(PushStatus::Accepted),
        }
    }

    /// Insert a copy of `row` at the head
    pub fn unshift(&mut self, row: &Row) -> Result<(), BufferError> {
        let node = self.write_node(row)?;
        let head = self.guard.read_offset(OFF_QUEUE_HEAD)?;

        self.guard.write_u64(node + NODE_NEXT, head as u64)?;
        if head == 0 {
            self.guard.write_u64(OFF_QUEUE_TAIL, node as u64)?;
        } else {
            self.guard.write_u64(head + NODE_PREV, node as u64)?;
        }
        self.guard.write_u64(OFF_QUEUE_HEAD, node as u64)?;
        self.bump_len()?;
        Ok(())
    }

    /// Copy every queued row into `out` and empty the queue
    ///
    /// Rows are appended to `out` only if the whole queue was read. A queue
    /// that cannot be read is discarded: the zone is reset and
    /// [`BufferError::Corrupted`] returned.
    pub fn drain_into(&mut self, out: &mut Vec<Row>) -> Result<usize, BufferError> {
        match self.read_all() {
            Ok((rows, nodes)) => {
                if let Err(e) = self.release(&nodes) {
                    self.guard.reset();
                    return Err(e.into());
                }
                let n = rows.len();
                out.extend(rows);
                Ok(n)
            }
            Err(e) => {
                tracing::error!(error = %e, "shared buffer unreadable, discarding queued rows");
                self.guard.reset();
                Err(e.into())
            }
        }
    }

    fn read_all(&self) -> Result<(Vec<Row>, Vec<usize>), ZoneError> {
        let len = self.guard.read_u64(OFF_QUEUE_LEN)? as usize;
        let mut rows = Vec::with_capacity(len);
        let mut nodes = Vec::with_capacity(len);

        let mut cur = self.guard.read_offset(OFF_QUEUE_HEAD)?;
        while cur != 0 {
            if nodes.len() == len {
                return Err(ZoneError::Corrupted { offset: cur });
            }
            rows.push(self.read_node(cur)?);
            nodes.push(cur);
            cur = self.guard.read_offset(cur + NODE_NEXT)?;
        }

        if nodes.len() != len {
            return Err(ZoneError::Corrupted {
                offset: OFF_QUEUE_LEN,
            });
        }
        Ok((rows, nodes))
    }

    fn release(&mut self, nodes: &[usize]) -> Result<(), ZoneError> {
        for &node in nodes {
            self.guard.free(node)?;
        }
        self.guard.write_u64(OFF_QUEUE_HEAD, 0)?;
        self.guard.write_u64(OFF_QUEUE_TAIL, 0)?;
        self.guard.write_u64(OFF_QUEUE_LEN, 0)
    }

    fn read_node(&self, node: usize) -> Result<Row, ZoneError> {
        let head = self.guard.bytes(node, NODE_LENS)?;
        let columns = u32::from_le_bytes([
            head[NODE_COLUMNS],
            head[NODE_COLUMNS + 1],
            head[NODE_COLUMNS + 2],
            head[NODE_COLUMNS + 3],
        ]) as usize;

        let usable = self.guard.usable_size(node)?;
        let data_start = columns
            .checked_mul(4)
            .and_then(|n| n.checked_add(NODE_LENS))
            .filter(|n| *n <= usable)
            .ok_or(ZoneError::Corrupted { offset: node })?;

        let node_bytes = self.guard.bytes(node, usable)?;
        let lens = &node_bytes[NODE_LENS..data_start];
        let mut pos = data_start;
        let mut values = Vec::with_capacity(columns);

        for chunk in lens.chunks_exact(4) {
            let len = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            if len == NULL_LEN {
                values.push(None);
                continue;
            }
            let end = pos
                .checked_add(len as usize)
                .filter(|end| *end <= usable)
                .ok_or(ZoneError::Corrupted { offset: node })?;
            values.push(Some(Bytes::copy_from_slice(&node_bytes[pos..end])));
            pos = end;
        }
        Ok(Row::new(values))
    }

    fn write_node(&mut self, row: &Row) -> Result<usize, BufferError> {
        let columns = row.len();
        let data_start = NODE_LENS + 4 * columns;
        let needed = data_start + row.payload_len();

        let node = self
            .guard
            .alloc(needed)?
            .ok_or(BufferError::Exhausted { needed })?;

        let buf = self.guard.bytes_mut(node, needed)?;
        buf[..NODE_LENS].fill(0);
        buf[NODE_COLUMNS..NODE_COLUMNS + 4].copy_from_slice(&(columns as u32).to_le_bytes());

        let mut pos = data_start;
        for (i, value) in row.values().iter().enumerate() {
            let slot = NODE_LENS + 4 * i;
            match value {
                Some(bytes) => {
                    buf[slot..slot + 4].copy_from_slice(&(bytes.len() as u32).to_le_bytes());
                    buf[pos..pos + bytes.len()].copy_from_slice(bytes);
                    pos += bytes.len();
                }
                None => buf[slot..slot + 4].copy_from_slice(&NULL_LEN.to_le_bytes()),
            }
        }
        Ok(node)
    }

    fn bump_len(&mut self) -> Result<usize, ZoneError> {
        let len = self.guard.read_u64(OFF_QUEUE_LEN)? + 1;
        self.guard.write_u64(OFF_QUEUE_LEN, len)?;
        Ok(len as usize)
    }
}

#[cfg(test)]
#[path = "queue_test.rs"]
mod queue_test;
