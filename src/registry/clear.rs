/*!
 * Clear and Destroy
 *
 * Two-phase mark-and-sweep over a type's records. The mark phase runs the
 * release callbacks and installs marked kernels; the sweep phase physically
 * deletes marked records once no clearer is active on the type. While any
 * clear is in flight (`marking[tag] > 0`), other release paths defer
 * physical deletion to the sweeper.
 */

use super::activity::EntryKind;
use super::info::IdInfo;
use super::kernel::IdKernel;
use super::registry::Registry;
use super::stats::RegistryStats;
use super::type_info::TypeInfo;
use crate::core::errors::RegistryResult;
use crate::core::types::TypeTag;
use crate::sync::Backoff;
use crossbeam_epoch as epoch;
use log::{debug, warn};
use std::sync::atomic::Ordering;
use std::sync::Arc;

impl Registry {
    /// Release and delete records of a type
    ///
    /// A record is a candidate when `force` is set or its retained count
    /// (total count, minus application references unless `app_ref`) is at
    /// most one. Candidates get their release callback and are marked; a
    /// failing callback leaves the record live unless `force`, in which
    /// case it is marked anyway and the object may be left stale.
    pub fn clear_type(&self, tag: TypeTag, force: bool, app_ref: bool) -> RegistryResult<()> {
        let _activity = self.enter(EntryKind::Public);
        let type_info = self.type_info(tag)?;
        self.clear_type_impl(tag, &type_info, force, app_ref)
    }

    pub(super) fn clear_type_impl(
        &self,
        tag: TypeTag,
        type_info: &Arc<TypeInfo>,
        force: bool,
        app_ref: bool,
    ) -> RegistryResult<()> {
        RegistryStats::bump(&self.stats.clears);
        self.marking[tag].fetch_add(1, Ordering::SeqCst);

        // Mark phase
        for (_, record) in type_info.table().snapshot() {
            self.try_mark(type_info, &record, force, app_ref);
        }

        // Sweep phase: only the last clearer out drains; if a concurrent
        // clearer re-raised the counter, its own sweep will
        if self.marking[tag].fetch_sub(1, Ordering::SeqCst) == 1 {
            let mut swept = 0usize;
            for (key, record) in type_info.table().snapshot() {
                let marked = {
                    let guard = epoch::pin();
                    let (_, kernel) = record.kernel(&guard);
                    kernel.marked
                };
                if marked {
                    type_info.cache_invalidate(&record);
                    if let Some(stale) = type_info.table().delete(key) {
                        self.id_free.retire(stale);
                        swept += 1;
                    }
                }
            }
            debug!("clear of type {} swept {} records", tag, swept);
        }
        Ok(())
    }

    /// Mark one record if the clear predicate admits it
    fn try_mark(&self, type_info: &Arc<TypeInfo>, record: &Arc<IdInfo>, force: bool, app_ref: bool) {
        let class = Arc::clone(type_info.class());

        // Secure the token on a record that satisfies the predicate
        let (snapshot, bypassed) = {
            let mut backoff = Backoff::new();
            let mut guard = epoch::pin();
            loop {
                let secured = {
                    let (shared, kernel) = record.kernel(&guard);
                    if kernel.marked {
                        return;
                    }
                    let retained = kernel.count - if app_ref { 0 } else { kernel.app_count };
                    if !force && retained > 1 {
                        return;
                    }
                    if kernel.token_held() {
                        if self.may_bypass(kernel) {
                            RegistryStats::bump(&self.stats.disturb_bypasses);
                            Some((kernel.clone(), true))
                        } else {
                            None
                        }
                    } else {
                        let (_, holds_lock) = self.callback_locking(&class);
                        if record.try_commit(shared, kernel.with_token(holds_lock), &guard) {
                            Some((kernel.clone(), false))
                        } else {
                            RegistryStats::bump(&self.stats.kernel_cas_retries);
                            None
                        }
                    }
                };
                match secured {
                    Some(result) => break result,
                    None => {
                        RegistryStats::bump(&self.stats.disturb_waits);
                        backoff.snooze();
                        guard.repin();
                    }
                }
            }
        };

        // Run the release action: discard for futures, free_func otherwise
        let callback_result = match snapshot.object.clone() {
            Some(object) => {
                let (needs_lock, _) = self.callback_locking(&class);
                let _api = needs_lock.then(|| self.api_lock.lock());
                if snapshot.is_future {
                    match record.discard_func() {
                        Some(discard) => discard(&object),
                        None => Ok(()),
                    }
                } else {
                    match &class.free_func {
                        Some(free_func) => {
                            RegistryStats::bump(&self.stats.free_func_calls);
                            free_func(object, None)
                        }
                        None => Ok(()),
                    }
                }
            }
            None => Ok(()),
        };

        let failed = callback_result.is_err();
        if let Err(err) = callback_result {
            RegistryStats::bump(&self.stats.free_func_failures);
            warn!(
                "release callback failed for handle {:#x} during clear: {}",
                record.handle(),
                err
            );
        }

        let guard = epoch::pin();
        if failed && !force {
            // Leave the record live; the object may now be stale, which is
            // the documented caveat of a failed non-forced clear
            if !bypassed {
                let (_, current) = record.kernel(&guard);
                record.commit_owned(current.with_token_released(), &guard);
            }
            return;
        }

        // Install the terminal kernel and settle the live count; physical
        // deletion is the sweeper's job while marking > 0
        let already_marked = {
            let (_, current) = record.kernel(&guard);
            current.marked
        };
        if !already_marked {
            record.commit_owned(IdKernel::dead(), &guard);
            type_info.dec_id_count();
            type_info.cache_invalidate(record);
        }
    }

    /// Tear a type down: force-clear, unpublish the slot, retire the record
    pub fn destroy_type(&self, tag: TypeTag) -> RegistryResult<()> {
        let _activity = self.enter(EntryKind::Public);
        let type_info = self.type_info(tag)?;
        self.destroy_type_impl(tag, type_info)
    }

    pub(super) fn destroy_type_impl(
        &self,
        tag: TypeTag,
        type_info: Arc<TypeInfo>,
    ) -> RegistryResult<()> {
        RegistryStats::bump(&self.stats.destroys);
        self.clear_type_impl(tag, &type_info, true, false)?;

        type_info.mark_cleared();
        type_info.table().clear();
        self.types[tag].store(None);
        self.allocated[tag].store(false, Ordering::SeqCst);
        self.type_free.retire(type_info);
        debug!("type {} destroyed", tag);
        Ok(())
    }
}
