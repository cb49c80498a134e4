use std::sync::{Arc, Weak};

use crate::renderer::error::{Error, Result};
use crate::renderer::types::{DescriptorHeapKind, Format};

use super::memory::{Allocation, HeadlessResource};

/// Views do not keep their resource alive, like descriptors on real devices.
#[derive(Debug, Clone)]
pub(super) struct HeadlessView {
    pub kind: DescriptorHeapKind,
    pub format: Format,
    pub target: Weak<Allocation>,
}

#[derive(Debug)]
pub struct HeadlessDescriptorHeap {
    pub(super) kind: DescriptorHeapKind,
    pub(super) shader_visible: bool,
    pub(super) cpu_start: u64,
    pub(super) slots: Vec<Option<HeadlessView>>,
}

impl HeadlessDescriptorHeap {
    pub(super) fn new(kind: DescriptorHeapKind, capacity: u32, shader_visible: bool, cpu_start: u64) -> Self {
        Self {
            kind,
            shader_visible,
            cpu_start,
            slots: vec![None; capacity as usize],
        }
    }

    pub(super) fn write(
        &mut self,
        view_kind: DescriptorHeapKind,
        index: u32,
        resource: &HeadlessResource,
        format: Format,
    ) -> Result<()> {
        if view_kind != self.kind {
            return Err(Error::contract(format!(
                "cannot write a {view_kind:?} view into a {:?} heap",
                self.kind
            )));
        }
        let capacity = self.slots.len();
        let slot = self.slots.get_mut(index as usize).ok_or_else(|| {
            Error::contract(format!("descriptor index {index} outside heap of {capacity}"))
        })?;
        *slot = Some(HeadlessView {
            kind: view_kind,
            format,
            target: Arc::downgrade(&resource.0),
        });
        Ok(())
    }

    pub(super) fn release(&mut self, index: u32) {
        if let Some(slot) = self.slots.get_mut(index as usize) {
            *slot = None;
        }
    }

    /// Resolves the resource a slot points at, failing on empty or stale slots.
    pub(super) fn resolve(&self, index: u32) -> Result<(Arc<Allocation>, Format)> {
        let view = self
            .slots
            .get(index as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| {
                Error::contract(format!("{:?} descriptor {index} holds no view", self.kind))
            })?;
        let target = view.target.upgrade().ok_or_else(|| {
            Error::contract(format!(
                "{:?} descriptor {index} refers to a released resource",
                view.kind
            ))
        })?;
        Ok((target, view.format))
    }

    pub fn occupied_slots(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}
