//! Post-mutation consistency policy
//!
//! Reaction and comment counts are computed server-side, so after a like or
//! comment the store discards its pages and reloads the first one. A created
//! post comes back complete and is merged at the head instead.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    CreatePost,
    ToggleLike,
    AddComment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// Prepend the returned post, no fetch
    MergeLocally,
    /// Replace the whole list with a fresh first page
    ReloadFirstPage,
    /// Leave the list alone
    Keep,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reconciler {
    /// Reload even when the like/comment failed on both paths
    reload_after_failure: bool,
}

impl Reconciler {
    pub fn new(reload_after_failure: bool) -> Self {
        Self {
            reload_after_failure,
        }
    }

    pub fn after(&self, mutation: Mutation, succeeded: bool) -> Reconciliation {
        match (mutation, succeeded) {
            (Mutation::CreatePost, true) => Reconciliation::MergeLocally,
            (Mutation::CreatePost, false) => Reconciliation::Keep,
            (_, true) => Reconciliation::ReloadFirstPage,
            (_, false) if self.reload_after_failure => Reconciliation::ReloadFirstPage,
            (_, false) => Reconciliation::Keep,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_policy() {
        let policy = Reconciler::default();
        assert_eq!(
            policy.after(Mutation::CreatePost, true),
            Reconciliation::MergeLocally
        );
        assert_eq!(
            policy.after(Mutation::ToggleLike, true),
            Reconciliation::ReloadFirstPage
        );
        assert_eq!(
            policy.after(Mutation::AddComment, true),
            Reconciliation::ReloadFirstPage
        );
    }

    #[test]
    fn test_failure_policy() {
        let strict = Reconciler::default();
        assert_eq!(strict.after(Mutation::ToggleLike, false), Reconciliation::Keep);
        assert_eq!(strict.after(Mutation::CreatePost, false), Reconciliation::Keep);

        let lenient = Reconciler::new(true);
        assert_eq!(
            lenient.after(Mutation::AddComment, false),
            Reconciliation::ReloadFirstPage
        );
        assert_eq!(lenient.after(Mutation::CreatePost, false), Reconciliation::Keep);
    }
}
