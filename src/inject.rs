//! Payload builders for the common injected call-site shapes.
//!
//! Every injected call site passes a fixed selection of the routine's live
//! locals and arguments to an external hook. Two shapes cover nearly all
//! patches:
//!
//! - a notification: load the selected values, call the hook, continue with
//!   the original body;
//! - a guarded early return: call the hook and let its control value decide
//!   whether the rest of the original body still runs.
//!
//! The hook itself is opaque to the engine and runs synchronously at the
//! injected point. A hook used with [`guarded_early_return`] must handle its
//! own failures and return the "continue" value as its safe default; an
//! unwind from hook code is not something the patched host can recover from.

use crate::patch::payload::{Payload, PayloadOp};
use crate::stream::RoutineId;

/// Mark used for the resume point of a guarded early return.
const RESUME_MARK: &str = "resume";

/// Fire-and-forget hook call: `args…, call hook`.
///
/// `args` are the loads selecting which locals/arguments the hook sees, in
/// push order.
pub fn notify(hook: impl Into<RoutineId>, args: Vec<PayloadOp>) -> Payload {
    let mut ops = args;
    ops.push(PayloadOp::call(hook));
    Payload::new(ops)
}

/// Hook call whose boolean result short-circuits the routine.
///
/// Produces `args…, call hook, jump-if-false resume, return, nop(resume)`:
/// a hook returning true takes the early return, false falls through to the
/// original instructions that followed the anchor.
pub fn guarded_early_return(hook: impl Into<RoutineId>, args: Vec<PayloadOp>) -> Payload {
    let mut ops = args;
    ops.push(PayloadOp::call(hook));
    ops.push(PayloadOp::jump_if_false(RESUME_MARK));
    ops.push(PayloadOp::ret());
    ops.push(PayloadOp::nop().marked(RESUME_MARK));
    Payload::new(ops)
}
