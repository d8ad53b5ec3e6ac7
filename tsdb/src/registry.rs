//! Per-open-file channel table.
//!
//! Channel ids are only meaningful inside the file that defined them. The
//! 8-bit range 0..=0xef is a dense arena filled from 0 upward as channels
//! first appear; the 16-bit range 0xf0..=0xffff is an overflow map that is
//! only entered once the dense arena is full. The table is rebuilt from the
//! channel-definition entries on every open and never persisted separately.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::error::FormatError;
use crate::value::FormatId;

/// Highest channel id encodable directly in a value entry's type byte.
pub const MAX_DENSE_CHANNEL_ID: u16 = 0x00ef;
/// First id of the 16-bit overflow range.
pub const FIRST_WIDE_CHANNEL_ID: u16 = 0x00f0;

const DENSE_CAPACITY: usize = MAX_DENSE_CHANNEL_ID as usize + 1;

/// What a channel definition entry records about a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct ChannelDef {
    pub name: String,
    pub format: FormatId,
}

/// Result of a writer-side id allocation.
#[derive(Debug, Clone, Copy)]
pub struct Allocated {
    pub id: u16,
    /// True when the channel was new and a definition entry must be emitted.
    pub newly_defined: bool,
}

#[derive(Debug, Default)]
pub struct ChannelRegistry {
    dense: Vec<Option<ChannelDef>>,
    wide: BTreeMap<u16, ChannelDef>,
    by_name: HashMap<String, u16>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a definition observed while scanning a file. Readers accept any
    /// legal id sequence, including gaps left by other writers.
    pub fn define(&mut self, id: u16, format: FormatId, name: &str) -> Result<(), FormatError> {
        if id <= MAX_DENSE_CHANNEL_ID {
            let slot = id as usize;
            if self.dense.len() <= slot {
                self.dense.resize(slot + 1, None);
            }
            if self.dense[slot].is_some() {
                return Err(FormatError::DuplicateChannel { id });
            }
            self.dense[slot] = Some(ChannelDef {
                name: name.to_owned(),
                format,
            });
        } else {
            if self.wide.contains_key(&id) {
                return Err(FormatError::DuplicateChannel { id });
            }
            self.wide.insert(
                id,
                ChannelDef {
                    name: name.to_owned(),
                    format,
                },
            );
        }
        // First definition wins when a foreign file reuses a name
        self.by_name.entry(name.to_owned()).or_insert(id);
        Ok(())
    }

    /// Writer-side definition: additionally enforces that 8-bit ids never
    /// skip an unused slot and that 16-bit ids appear only once the dense
    /// arena is full.
    pub fn define_strict(
        &mut self,
        id: u16,
        format: FormatId,
        name: &str,
    ) -> Result<(), FormatError> {
        match self.next_dense_id() {
            Some(expected) if id <= MAX_DENSE_CHANNEL_ID && id != expected => {
                return Err(FormatError::DenseAllocation { expected, got: id });
            }
            Some(expected) if id > MAX_DENSE_CHANNEL_ID => {
                return Err(FormatError::DenseAllocation { expected, got: id });
            }
            _ => {}
        }
        self.define(id, format, name)
    }

    /// Smallest unused 8-bit id, or `None` once the dense arena is full.
    fn next_dense_id(&self) -> Option<u16> {
        for (slot, def) in self.dense.iter().enumerate() {
            if def.is_none() {
                return Some(slot as u16);
            }
        }
        if self.dense.len() < DENSE_CAPACITY {
            Some(self.dense.len() as u16)
        } else {
            None
        }
    }

    pub fn lookup(&self, id: u16) -> Option<&ChannelDef> {
        if id <= MAX_DENSE_CHANNEL_ID {
            self.dense.get(id as usize)?.as_ref()
        } else {
            self.wide.get(&id)
        }
    }

    pub fn id_of(&self, name: &str) -> Option<u16> {
        self.by_name.get(name).copied()
    }

    /// All definitions, dense arena first, then the overflow range in id order.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &ChannelDef)> {
        let dense = self
            .dense
            .iter()
            .enumerate()
            .filter_map(|(id, def)| def.as_ref().map(|d| (id as u16, d)));
        let wide = self.wide.iter().map(|(id, def)| (*id, def));
        dense.chain(wide)
    }

    pub fn len(&self) -> usize {
        self.dense.iter().filter(|d| d.is_some()).count() + self.wide.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the id for `name`, allocating the smallest unused one (8-bit
    /// preferred) and defining it when the channel is new. Idempotent for an
    /// existing `(name, format)` pair; a format clash is an error.
    pub fn allocate(&mut self, name: &str, format: FormatId) -> Result<Allocated, FormatError> {
        if let Some(id) = self.id_of(name) {
            let known = self.lookup(id).map(|def| def.format);
            return if known == Some(format) {
                Ok(Allocated {
                    id,
                    newly_defined: false,
                })
            } else {
                Err(FormatError::DuplicateChannel { id })
            };
        }

        let id = self.smallest_unused_id()?;
        self.define_strict(id, format, name)?;
        Ok(Allocated {
            id,
            newly_defined: true,
        })
    }

    fn smallest_unused_id(&self) -> Result<u16, FormatError> {
        if let Some(id) = self.next_dense_id() {
            return Ok(id);
        }
        (FIRST_WIDE_CHANNEL_ID..=u16::MAX)
            .find(|id| !self.wide.contains_key(id))
            .ok_or(FormatError::ChannelSpaceExhausted)
    }
}
