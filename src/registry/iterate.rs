/*!
 * Iteration
 *
 * Visitor iteration, the stateless ordered walk, and object search. None
 * of these are snapshots: records added concurrently may or may not be
 * seen, and records marked concurrently are skipped. The visitor runs
 * under the record's do-not-disturb token; a visitor that looks up the
 * handle it is visiting deadlocks unless the reentrancy bypass applies.
 */

use super::activity::EntryKind;
use super::class::TypeClass;
use super::info::IdInfo;
use super::registry::Registry;
use super::stats::RegistryStats;
use super::type_info::TypeInfo;
use crate::core::errors::{RegistryError, RegistryResult};
use crate::core::handle::INVALID_HANDLE;
use crate::core::types::{Handle, Object, TypeTag, VisitAction};
use crate::sync::Backoff;
use crossbeam_epoch as epoch;
use std::sync::Arc;

impl Registry {
    /// Visit every live record of a type
    ///
    /// Skips marked records and, when `app_ref_only` is set, records with
    /// no application references. The visitor's verdict controls the walk:
    /// `Continue` proceeds, `Stop` ends successfully, an error ends the
    /// walk and is returned verbatim.
    pub fn iterate<F>(
        &self,
        tag: TypeTag,
        app_ref_only: bool,
        mut visitor: F,
    ) -> RegistryResult<()>
    where
        F: FnMut(&Object, Handle) -> RegistryResult<VisitAction>,
    {
        let _activity = self.enter(EntryKind::Public);
        RegistryStats::bump(&self.stats.iterations);
        self.validate_tag(tag)?;
        let type_info = match &*self.types[tag].load() {
            Some(type_info) if !type_info.is_cleared() => Arc::clone(type_info),
            // Nothing registered, nothing to visit
            _ => return Ok(()),
        };
        self.iterate_impl(&type_info, app_ref_only, &mut visitor)
    }

    pub(super) fn iterate_impl(
        &self,
        type_info: &Arc<TypeInfo>,
        app_ref_only: bool,
        visitor: &mut dyn FnMut(&Object, Handle) -> RegistryResult<VisitAction>,
    ) -> RegistryResult<()> {
        for (key, record) in type_info.table().snapshot() {
            let handle = key as Handle;
            match self.visit_one(type_info, &record, handle, app_ref_only, visitor)? {
                VisitAction::Continue => continue,
                VisitAction::Stop => break,
            }
        }
        Ok(())
    }

    /// Apply the visitor to one record under its token
    fn visit_one(
        &self,
        type_info: &Arc<TypeInfo>,
        record: &Arc<IdInfo>,
        handle: Handle,
        app_ref_only: bool,
        visitor: &mut dyn FnMut(&Object, Handle) -> RegistryResult<VisitAction>,
    ) -> RegistryResult<VisitAction> {
        let class = Arc::clone(type_info.class());

        // Secure the token, or discover the record should be skipped
        let (object, bypassed) = {
            let mut backoff = Backoff::new();
            let mut guard = epoch::pin();
            loop {
                let secured = {
                    let (shared, kernel) = record.kernel(&guard);
                    if kernel.marked {
                        return Ok(VisitAction::Continue);
                    }
                    if app_ref_only && kernel.app_count == 0 {
                        return Ok(VisitAction::Continue);
                    }
                    // Validate the payload before taking the token so no
                    // error path has to give the token back
                    let object = kernel.object.clone().ok_or_else(|| {
                        RegistryError::Internal(format!(
                            "unmarked handle {:#x} without object",
                            handle
                        ))
                    })?;
                    if kernel.token_held() {
                        if self.may_bypass(kernel) {
                            RegistryStats::bump(&self.stats.disturb_bypasses);
                            Some((object, true))
                        } else {
                            None
                        }
                    } else {
                        let (_, holds_lock) = self.callback_locking(&class);
                        if record.try_commit(shared, kernel.with_token(holds_lock), &guard) {
                            Some((object, false))
                        } else {
                            RegistryStats::bump(&self.stats.kernel_cas_retries);
                            None
                        }
                    }
                };
                match secured {
                    Some((object, bypassed)) => break (object, bypassed),
                    None => {
                        RegistryStats::bump(&self.stats.disturb_waits);
                        backoff.snooze();
                        guard.repin();
                    }
                }
            }
        };

        // Invoke the visitor on the unwrapped object, bracketing with the
        // API lock when the class requires it
        let verdict = {
            let (needs_lock, _) = self.callback_locking(&class);
            let _api = needs_lock.then(|| self.api_lock.lock());
            let unwrapped = unwrap_with_class(&class, &object);
            visitor(&unwrapped, handle)
        };

        if !bypassed {
            let guard = epoch::pin();
            let (_, current) = record.kernel(&guard);
            record.commit_owned(current.with_token_released(), &guard);
        }
        verdict
    }

    /// First live record of a type in handle order
    ///
    /// Returns the handle and its unwrapped object. Not a snapshot:
    /// concurrent mutation can repeat or miss entries across a walk.
    pub fn get_first(&self, tag: TypeTag) -> RegistryResult<Option<(Handle, Object)>> {
        let _activity = self.enter(EntryKind::Public);
        self.validate_tag(tag)?;
        self.ordered_step(tag, None)
    }

    /// Next live record after `last` in handle order
    pub fn get_next(&self, tag: TypeTag, last: Handle) -> RegistryResult<Option<(Handle, Object)>> {
        let _activity = self.enter(EntryKind::Public);
        self.validate_tag(tag)?;
        self.ordered_step(tag, Some(last))
    }

    fn ordered_step(
        &self,
        tag: TypeTag,
        after: Option<Handle>,
    ) -> RegistryResult<Option<(Handle, Object)>> {
        let type_info = match &*self.types[tag].load() {
            Some(type_info) if !type_info.is_cleared() => Arc::clone(type_info),
            _ => return Ok(None),
        };

        let mut cursor = match after {
            None => type_info.table().get_first(),
            Some(last) => type_info.table().get_next(last as u64),
        };
        while let Some((key, record)) = cursor {
            let object = {
                let guard = epoch::pin();
                let (_, kernel) = record.kernel(&guard);
                if kernel.marked {
                    None
                } else {
                    kernel.object.clone()
                }
            };
            if let Some(object) = object {
                let class = type_info.class();
                let unwrapped = if class.unwrap_func.is_some() {
                    let (needs_lock, _) = self.callback_locking(class);
                    let _api = needs_lock.then(|| self.api_lock.lock());
                    unwrap_with_class(class, &object)
                } else {
                    object
                };
                return Ok(Some((key as Handle, unwrapped)));
            }
            cursor = type_info.table().get_next(key);
        }
        Ok(None)
    }

    /// Handle of the first live record whose unwrapped object is `query`
    ///
    /// Identity comparison (`Arc::ptr_eq`); returns `INVALID_HANDLE` when
    /// no record matches.
    pub fn find_by_object(&self, tag: TypeTag, query: &Object) -> RegistryResult<Handle> {
        let _activity = self.enter(EntryKind::Public);
        self.validate_tag(tag)?;
        let type_info = match &*self.types[tag].load() {
            Some(type_info) if !type_info.is_cleared() => Arc::clone(type_info),
            _ => return Ok(INVALID_HANDLE),
        };

        let mut found = INVALID_HANDLE;
        self.iterate_impl(&type_info, false, &mut |object, handle| {
            if Arc::ptr_eq(object, query) {
                found = handle;
                Ok(VisitAction::Stop)
            } else {
                Ok(VisitAction::Continue)
            }
        })?;
        Ok(found)
    }
}

/// Apply the class extractor, or identity when the class has none
fn unwrap_with_class(class: &TypeClass, object: &Object) -> Object {
    match &class.unwrap_func {
        Some(unwrap) => unwrap(object),
        None => Arc::clone(object),
    }
}
