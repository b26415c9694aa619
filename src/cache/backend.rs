use crate::error::{PortmeshError, Result};

/// Key/value primitives available inside an atomic script.
///
/// Hashes map a key to field/value pairs; lists are FIFO queues that grow at
/// the tail and are consumed from the head.
pub trait KvTransaction {
    /// Reads one hash field.
    fn hget(&mut self, key: &str, field: &str) -> Result<Option<String>>;
    /// Writes one hash field, creating the hash if needed.
    fn hset(&mut self, key: &str, field: &str, value: &str) -> Result<()>;
    /// Removes one hash field. Returns whether it existed.
    fn hdel(&mut self, key: &str, field: &str) -> Result<bool>;
    /// All fields of a hash ordered by field name; empty if the hash is absent.
    fn hgetall(&mut self, key: &str) -> Result<Vec<(String, String)>>;
    /// Appends to the tail of a list and returns the new length.
    fn rpush(&mut self, list: &str, value: &str) -> Result<usize>;
    /// Removes and returns up to `count` values from the head of a list.
    fn lpop(&mut self, list: &str, count: usize) -> Result<Vec<String>>;
    /// Current list length.
    fn llen(&mut self, list: &str) -> Result<usize>;
}

/// A store that can run a read/write script against several keys atomically.
///
/// Either every write made by the script becomes visible at once, or, when the
/// script or the store fails, none does. Concurrent scripts never observe each
/// other's partial writes.
pub trait KvBackend: Send + Sync {
    /// Runs `script` as one indivisible transaction.
    fn transaction(
        &self,
        script: &mut dyn FnMut(&mut dyn KvTransaction) -> Result<()>,
    ) -> Result<()>;
}

impl<B: KvBackend + ?Sized> KvBackend for std::sync::Arc<B> {
    fn transaction(
        &self,
        script: &mut dyn FnMut(&mut dyn KvTransaction) -> Result<()>,
    ) -> Result<()> {
        (**self).transaction(script)
    }
}

/// Runs a value-returning script through [`KvBackend::transaction`].
pub fn atomically<B, T, F>(backend: &B, script: F) -> Result<T>
where
    B: KvBackend + ?Sized,
    F: FnOnce(&mut dyn KvTransaction) -> Result<T>,
{
    let mut script = Some(script);
    let mut output = None;
    backend.transaction(&mut |txn: &mut dyn KvTransaction| {
        let run = script
            .take()
            .ok_or_else(|| PortmeshError::Store("transaction script invoked twice".into()))?;
        output = Some(run(txn)?);
        Ok(())
    })?;
    output.ok_or_else(|| PortmeshError::Store("transaction finished without running".into()))
}
