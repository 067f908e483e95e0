use crate::errors::RelataResult;
use crate::model::Record;

/// Lifecycle callbacks invoked by repositories around persistence
/// operations.
///
/// The `pre_*` hooks return a verdict: `Ok(false)` aborts the
/// operation quietly, while an `Err` aborts it and propagates. The
/// `post_*` hooks run after the storage write succeeded.
pub trait EntityHooks: Send + Sync {
    /// Runs before an insert (`is_update` false) or update (`is_update`
    /// true).
    fn pre_save(&self, _record: &mut Record, _is_update: bool) -> RelataResult<bool> {
        Ok(true)
    }

    fn post_save(&self, _record: &mut Record, _is_update: bool) -> RelataResult<()> {
        Ok(())
    }

    fn pre_remove(&self, _record: &mut Record) -> RelataResult<bool> {
        Ok(true)
    }

    fn post_remove(&self, _record: &mut Record) -> RelataResult<()> {
        Ok(())
    }

    /// Runs after a record has been hydrated from storage.
    fn post_load(&self, _record: &mut Record) -> RelataResult<()> {
        Ok(())
    }
}

/// The default hook set, every callback is a no-op.
#[derive(Clone, Copy, Default)]
pub struct NoHooks;

impl EntityHooks for NoHooks {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityModel, PropertyMeta, PropertyType};
    use std::sync::Arc;

    #[test]
    fn default_hooks_allow_everything() {
        let model = Arc::new(
            EntityModel::builder("thing")
                .property(PropertyMeta::new("name", PropertyType::Str))
                .build()
                .unwrap(),
        );
        let mut record = Record::new(model);
        let hooks = NoHooks;
        assert!(hooks.pre_save(&mut record, false).unwrap());
        assert!(hooks.pre_remove(&mut record).unwrap());
        hooks.post_load(&mut record).unwrap();
    }
}
