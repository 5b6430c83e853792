//! Object-list reuse between steps ("fast emit").
//!
//! The engine side ([`FastEmitCache`]) remembers the last object list it sent
//! and for which agent.  When the next step neither mutated the scene nor
//! switched agent, the same list is reused and the response carries
//! `fastEmit: true` instead of the list.  The client side ([`ObjectListCache`])
//! mirrors that slot and hands back the previous `Arc`.

use std::sync::Arc;

use log::trace;
use serde_json::Value;

use crate::error::CodecError;
use crate::types::ObjectMetadata;

pub type ObjectList = Arc<Vec<ObjectMetadata>>;

#[derive(Debug, Default)]
pub struct FastEmitCache {
    enabled: bool,
    last: Option<(usize, ObjectList)>,
}

impl FastEmitCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            last: None,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.last = None;
    }

    /// Drop the remembered list; the next emit rebuilds.
    pub fn invalidate(&mut self) {
        self.last = None;
    }

    /// Return the object list for `agent`, and whether it was reused.
    pub fn emit<F>(&mut self, agent: usize, build: F) -> (ObjectList, bool)
    where
        F: FnOnce() -> Vec<ObjectMetadata>,
    {
        if self.enabled {
            if let Some((key, list)) = &self.last {
                if *key == agent {
                    trace!("fast emit: reusing {} objects for agent {}", list.len(), agent);
                    return (Arc::clone(list), true);
                }
            }
        }
        let list = Arc::new(build());
        self.last = Some((agent, Arc::clone(&list)));
        (list, false)
    }
}

/// Client-side mirror of the engine's last emitted list.
#[derive(Debug, Default)]
pub struct ObjectListCache {
    last: Option<ObjectList>,
}

impl ObjectListCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.last = None;
    }

    pub fn last(&self) -> Option<&ObjectList> {
        self.last.as_ref()
    }

    /// Turn the `objects` field of a response into a shared list.
    pub fn resolve(
        &mut self,
        fast_emit: bool,
        objects: Option<Value>,
    ) -> Result<ObjectList, CodecError> {
        match (fast_emit, objects) {
            (_, Some(value)) => {
                let list: ObjectList = Arc::new(serde_json::from_value(value)?);
                self.last = Some(Arc::clone(&list));
                Ok(list)
            }
            (true, None) => self.last.clone().ok_or(CodecError::MissingObjectList),
            (false, None) => {
                let list: ObjectList = Arc::default();
                self.last = Some(Arc::clone(&list));
                Ok(list)
            }
        }
    }
}
