//! Scoped ownership of native allocations.
//!
//! An [`Arena`] records every buffer, indicator array, descriptor and
//! parameter handle it hands out and frees them, newest first, when it is
//! dropped. Bind lists, column layouts and describe passes each own one, so
//! a failure at any step releases everything allocated before it.

use crate::error::{Error, Result};
use crate::native::constants::ORA_OUT_OF_MEMORY;
use crate::native::{
    BufferHandle, DescriptorHandle, DescriptorKind, EnvHandle, IndicatorHandle, NativeApi,
    ParamHandle,
};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Allocation {
    Buffer(BufferHandle),
    Indicators(IndicatorHandle),
    Descriptor(DescriptorHandle, DescriptorKind),
    Param(ParamHandle),
}

pub(crate) struct Arena {
    api: Arc<dyn NativeApi>,
    env: EnvHandle,
    items: Vec<Allocation>,
}

impl Arena {
    pub(crate) fn new(api: Arc<dyn NativeApi>, env: EnvHandle) -> Self {
        Self {
            api,
            env,
            items: Vec::new(),
        }
    }

    pub(crate) fn buffer(&mut self, size: usize) -> Result<BufferHandle> {
        let buf = self
            .api
            .buffer_alloc(self.env, size)
            .map_err(|_| out_of_memory(format!("allocating {} byte buffer", size)))?;
        self.items.push(Allocation::Buffer(buf));
        Ok(buf)
    }

    /// Allocate a buffer holding a copy of `data`.
    pub(crate) fn buffer_from(&mut self, data: &[u8]) -> Result<BufferHandle> {
        let buf = self.buffer(data.len())?;
        if !self.api.buffer_write(buf, data).is_success() {
            return Err(out_of_memory(format!("writing {} byte buffer", data.len())));
        }
        Ok(buf)
    }

    pub(crate) fn indicators(&mut self, count: usize) -> Result<IndicatorHandle> {
        let array = self
            .api
            .indicators_alloc(self.env, count)
            .map_err(|_| out_of_memory(format!("allocating {} indicators", count)))?;
        self.items.push(Allocation::Indicators(array));
        Ok(array)
    }

    pub(crate) fn descriptor(&mut self, kind: DescriptorKind) -> Result<DescriptorHandle> {
        let desc = self
            .api
            .descriptor_alloc(self.env, kind)
            .map_err(|_| out_of_memory(format!("allocating {:?} descriptor", kind)))?;
        self.items.push(Allocation::Descriptor(desc, kind));
        Ok(desc)
    }

    /// Take ownership of a parameter descriptor obtained from describe.
    pub(crate) fn adopt_param(&mut self, param: ParamHandle) -> ParamHandle {
        self.items.push(Allocation::Param(param));
        param
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    /// Move everything held so far into a new arena, leaving this one empty.
    pub(crate) fn take(&mut self) -> Arena {
        Arena {
            api: Arc::clone(&self.api),
            env: self.env,
            items: std::mem::take(&mut self.items),
        }
    }

    /// Free everything held so far. The arena stays usable.
    pub(crate) fn release(&mut self) {
        while let Some(item) = self.items.pop() {
            let rc = match item {
                Allocation::Buffer(buf) => self.api.buffer_free(buf),
                Allocation::Indicators(array) => self.api.indicators_free(array),
                Allocation::Descriptor(desc, kind) => self.api.descriptor_free(desc, kind),
                Allocation::Param(param) => self.api.param_free(param),
            };
            if !rc.is_success() {
                tracing::warn!(allocation = ?item, status = %rc, "failed to free native allocation");
            }
        }
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("env", &self.env)
            .field("items", &self.items)
            .finish()
    }
}

fn out_of_memory(context: String) -> Error {
    Error::oracle(
        ORA_OUT_OF_MEMORY,
        format!("out of process memory when {}", context),
    )
}
