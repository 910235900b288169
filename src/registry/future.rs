/*!
 * Future Handle Realization
 *
 * A future handle carries realize/discard callbacks and a placeholder
 * object. The first lookup that wins the record's do-not-disturb token
 * resolves it: the realize callback produces the actual handle (registered
 * separately by the callback), the actual object is extracted by removing
 * that handle, the placeholder is discarded, and the kernel becomes a
 * regular live kernel. Any failure releases the token and leaves the
 * kernel future, so callers may retry.
 */

use super::activity::EntryKind;
use super::info::IdInfo;
use super::registry::Registry;
use super::stats::RegistryStats;
use super::type_info::TypeInfo;
use crate::core::errors::{RegistryError, RegistryResult};
use crate::core::handle::type_of;
use crate::core::types::{Handle, Object, TypeTag};
use crate::sync::Backoff;
use crossbeam_epoch as epoch;
use log::warn;
use std::sync::Arc;

impl Registry {
    /// Resolve a future handle; called from lookup with the token observed
    /// open. Returns the actual object on success.
    pub(super) fn realize_future(
        &self,
        handle: Handle,
        tag: TypeTag,
        type_info: &Arc<TypeInfo>,
        record: &Arc<IdInfo>,
    ) -> RegistryResult<Object> {
        // Phase 1: secure the token (or discover someone else finished)
        let placeholder = {
            let mut backoff = Backoff::new();
            let mut guard = epoch::pin();
            loop {
                let acquired = {
                    let (shared, kernel) = record.kernel(&guard);
                    if kernel.marked {
                        return Err(RegistryError::NotFound(handle));
                    }
                    if !kernel.is_future {
                        // Another thread realized it first
                        let object = kernel.object.clone().ok_or_else(|| {
                            RegistryError::Internal(format!(
                                "realized handle {:#x} without object",
                                handle
                            ))
                        })?;
                        type_info.cache_store(record);
                        return Ok(object);
                    }
                    if kernel.token_held() {
                        if self.may_bypass(kernel) {
                            // A frame of this thread is mid-realization;
                            // hand back the placeholder rather than deadlock
                            RegistryStats::bump(&self.stats.disturb_bypasses);
                            return kernel.object.clone().ok_or_else(|| {
                                RegistryError::Internal(format!(
                                    "future handle {:#x} without placeholder",
                                    handle
                                ))
                            });
                        }
                        None
                    } else {
                        // Validate the placeholder before taking the token so
                        // no error path has to give the token back
                        let placeholder = kernel.object.clone().ok_or_else(|| {
                            RegistryError::Internal(format!(
                                "future handle {:#x} without placeholder",
                                handle
                            ))
                        })?;
                        let holds_lock = self.api_lock.held_by_current_thread();
                        if record.try_commit(shared, kernel.with_token(holds_lock), &guard) {
                            Some(placeholder)
                        } else {
                            RegistryStats::bump(&self.stats.kernel_cas_retries);
                            None
                        }
                    }
                };
                match acquired {
                    Some(placeholder) => break placeholder,
                    None => {
                        RegistryStats::bump(&self.stats.disturb_waits);
                        backoff.snooze();
                        guard.repin();
                    }
                }
            }
        };

        // Phase 2: run the protocol without an epoch pin; the token keeps
        // every other writer out
        let outcome = self.run_realize_protocol(handle, tag, record, &placeholder);

        // Phase 3: commit. Re-read the kernel: reentrant bypass frames may
        // have adjusted the counts while the callbacks ran.
        let guard = epoch::pin();
        let (_, current) = record.kernel(&guard);
        if current.marked {
            // A reentrant frame of this thread removed the record while the
            // callbacks ran; the terminal kernel already released the token
            RegistryStats::bump(&self.stats.future_realize_failures);
            return Err(RegistryError::NotFound(handle));
        }
        match outcome {
            Ok(actual) => {
                let mut next = current.with_token_released();
                next.object = Some(Arc::clone(&actual));
                next.is_future = false;
                record.commit_owned(next, &guard);
                RegistryStats::bump(&self.stats.futures_realized);
                type_info.cache_store(record);
                Ok(actual)
            }
            Err(err) => {
                record.commit_owned(current.with_token_released(), &guard);
                RegistryStats::bump(&self.stats.future_realize_failures);
                warn!("realization of future handle {:#x} failed: {}", handle, err);
                Err(RegistryError::NotFound(handle))
            }
        }
    }

    /// Steps 2–4 of the realization protocol
    fn run_realize_protocol(
        &self,
        handle: Handle,
        tag: TypeTag,
        record: &Arc<IdInfo>,
        placeholder: &Object,
    ) -> RegistryResult<Object> {
        let realize = record.realize_func().ok_or_else(|| {
            RegistryError::Internal(format!("future handle {:#x} without realize_cb", handle))
        })?;
        let actual_handle = realize(placeholder).map_err(|err| {
            RegistryError::CallbackFailed(format!("realize_cb for {:#x}: {}", handle, err))
        })?;

        if actual_handle <= 0 {
            return Err(RegistryError::CallbackFailed(format!(
                "realize_cb for {:#x} produced invalid handle {}",
                handle, actual_handle
            )));
        }
        if type_of(actual_handle) != tag {
            return Err(RegistryError::CallbackFailed(format!(
                "realize_cb for {:#x} produced handle of type {} (expected {})",
                handle,
                type_of(actual_handle),
                tag
            )));
        }

        // Extract the actual object the realize callback registered
        let actual = {
            let _nested = self.enter(EntryKind::Internal);
            self.remove_impl(actual_handle)?
        };

        let discard = record.discard_func().ok_or_else(|| {
            RegistryError::Internal(format!("future handle {:#x} without discard_cb", handle))
        })?;
        discard(placeholder).map_err(|err| {
            RegistryError::CallbackFailed(format!("discard_cb for {:#x}: {}", handle, err))
        })?;

        Ok(actual)
    }
}
