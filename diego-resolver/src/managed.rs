use crate::log::Log;
use crate::traits::{State, Transaction};
use diego_base::invariant;

// Walks the log forward from the earliest entry the transaction hasn't
// seen to the back, skipping entries that commute with it, rewriting
// through entries that don't but resolve, and aborting on the first entry
// that neither commutes nor resolves. On success the rewritten
// transaction's id is set to back_id + 1.
pub trait ManagedResolve<S: State> {
    type Context;

    // `None` if this transaction kind needs no scratch context, in which
    // case the walk skips straight to the commutes/resolves loop.
    fn make_context(&self, ancestor: &S, current: &S::Txn) -> Option<Self::Context>;

    fn update_context(&self, current: &S::Txn, existing: &S::Txn, ctx: &mut Self::Context);

    fn commutes_with(&self, current: &S::Txn, existing: &S::Txn, ctx: Option<&Self::Context>) -> bool;

    fn resolves_with(
        &self,
        current: &S::Txn,
        existing: &S::Txn,
        ctx: Option<&Self::Context>,
    ) -> (bool, Option<S::Txn>);

    fn resolve(&self, ancestor: &S, log: &Log<S::Txn>, mut current: S::Txn) -> (bool, Option<S::Txn>) {
        invariant!(!log.is_empty(), "managed resolve called against an empty log");
        let trid = current.id();
        let front_id = log.front_id();
        let back_id = log.back_id().expect("log is non-empty");

        let mut ctx = self.make_context(ancestor, &current);
        if let Some(ctx) = ctx.as_mut() {
            for existing in log.iter_range(front_id, trid - 1) {
                self.update_context(&current, existing, ctx);
            }
        }

        let start_id = trid.max(front_id);
        for existing in log.iter_range(start_id, back_id) {
            if !self.commutes_with(&current, existing, ctx.as_ref()) {
                let (ok, rewritten) = self.resolves_with(&current, existing, ctx.as_ref());
                if !ok {
                    return (false, None);
                }
                current = rewritten.expect("resolvesWith ok must return a transaction");
            }
        }

        current.set_id(back_id + 1);
        (true, Some(current))
    }
}
