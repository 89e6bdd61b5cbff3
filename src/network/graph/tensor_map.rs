use super::NodeId;
use crate::backend::Backend;
use crate::error::{NetworkError, Result};
use crate::ops::cpu::SumMode;
use crate::tensors::Tensor;

/// Completion map of a graph pass: at most one tensor per node.
#[derive(Debug, Default)]
pub(crate) struct TensorMap {
    slots: Vec<Option<Tensor>>,
}

impl TensorMap {
    pub(crate) fn new(nodes: usize) -> Self {
        Self {
            slots: (0..nodes).map(|_| None).collect(),
        }
    }

    fn slot(&mut self, id: NodeId) -> Result<&mut Option<Tensor>> {
        self.slots
            .get_mut(id.0)
            .ok_or_else(|| NetworkError::Computation(format!("node {id} is out of range")))
    }

    /// Stores the tensor of `id`, which must not be present yet.
    pub(crate) fn insert(&mut self, id: NodeId, tensor: Tensor) -> Result<()> {
        let slot = self.slot(id)?;
        if slot.is_some() {
            return Err(NetworkError::Computation(format!("node {id} was computed twice")));
        }
        *slot = Some(tensor);
        Ok(())
    }

    pub(crate) fn get(&self, id: NodeId) -> Result<&Tensor> {
        self.slots
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| NetworkError::Computation(format!("node {id} has no tensor")))
    }

    /// Moves the tensor of `id` out, failing if it is missing.
    pub(crate) fn take(&mut self, id: NodeId) -> Result<Tensor> {
        self.slot(id)?
            .take()
            .ok_or_else(|| NetworkError::Computation(format!("node {id} has no tensor")))
    }

    /// Drops the tensor of `id`, if any.
    pub(crate) fn remove(&mut self, id: NodeId) -> Option<Tensor> {
        self.slots.get_mut(id.0).and_then(Option::take)
    }

    /// Stores `tensor` or adds it to the tensor already present.
    pub(crate) fn accumulate(&mut self, backend: &dyn Backend, id: NodeId, tensor: Tensor) -> Result<()> {
        let slot = self.slot(id)?;
        if let Some(existing) = slot.as_mut() {
            return backend.sum_in_place(existing, tensor.view(), SumMode::Elementwise);
        }
        *slot = Some(tensor);
        Ok(())
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.slots.get(id.0).is_some_and(Option::is_some)
    }

    /// Number of tensors currently held.
    pub(crate) fn live_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}
